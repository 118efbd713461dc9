//! Forwarding core: rule filtering and relay worker lifecycle.

pub mod entity_cache;
pub mod filter;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod worker;

pub use entity_cache::EntityCache;
pub use filter::FilterDecision;
pub use model::{AuditLogEntry, LogStatus, MediaType, NewRule, Rule, Session};
pub use orchestrator::Orchestrator;
pub use registry::{ForwarderRegistry, WorkerState};
pub use worker::{RelayWorker, WorkerDeps};
