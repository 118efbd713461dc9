//! libSQL-backed persistence for sessions, rules and audit logs.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Database, RuleFilter};
