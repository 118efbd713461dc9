//! Async interface to persisted sessions, rules and logs.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::forwarder::model::{AuditLogEntry, Rule, Session};

/// Selection criteria for [`Database::list_rules`]. `None` fields match anything.
#[derive(Debug, Clone, Default)]
pub struct RuleFilter {
    pub user_id: Option<String>,
    pub is_active: Option<bool>,
}

impl RuleFilter {
    /// Every rule with the active flag set.
    pub fn active() -> Self {
        Self {
            user_id: None,
            is_active: Some(true),
        }
    }

    /// Every rule owned by one account.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            is_active: None,
        }
    }
}

/// Backend-agnostic persistence for the forwarder.
#[async_trait]
pub trait Database: Send + Sync {
    // ── Sessions ────────────────────────────────────────────────────

    /// Insert a new account session.
    async fn insert_session(&self, session: &Session) -> Result<(), DatabaseError>;

    /// Get an account's session, authenticated or not.
    async fn get_session(&self, user_id: &str) -> Result<Option<Session>, DatabaseError>;

    // ── Rules ───────────────────────────────────────────────────────

    /// Insert a new forwarding rule.
    async fn insert_rule(&self, rule: &Rule) -> Result<(), DatabaseError>;

    /// Get a rule by id.
    async fn get_rule(&self, rule_id: &str) -> Result<Option<Rule>, DatabaseError>;

    /// List rules matching the filter, oldest first.
    async fn list_rules(&self, filter: &RuleFilter) -> Result<Vec<Rule>, DatabaseError>;

    /// Set a rule's active flag. Returns false if the rule does not exist.
    async fn set_rule_active(&self, rule_id: &str, active: bool) -> Result<bool, DatabaseError>;

    /// Delete a rule. Returns false if the rule does not exist.
    async fn delete_rule(&self, rule_id: &str) -> Result<bool, DatabaseError>;

    // ── Audit log ───────────────────────────────────────────────────

    /// Append one relay-attempt record.
    async fn append_audit(&self, entry: &AuditLogEntry) -> Result<(), DatabaseError>;

    /// An account's audit entries, newest first, up to `limit`.
    async fn list_audit(&self, user_id: &str, limit: usize) -> Result<Vec<AuditLogEntry>, DatabaseError>;
}
