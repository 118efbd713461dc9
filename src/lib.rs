//! Rule-driven message relay between chat conversations.

pub mod api;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod platform;
pub mod store;
