//! libSQL implementation of the `Database` trait.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::error::DatabaseError;
use crate::forwarder::model::{AuditLogEntry, LogStatus, MediaType, Rule, Session};
use crate::store::migrations;
use crate::store::traits::{Database, RuleFilter};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }
        let backend = Self::open(path).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        Self::open(":memory:").await
    }

    async fn open(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp format; fixed width so text ordering is time ordering.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn query_err(op: &'static str) -> impl Fn(libsql::Error) -> DatabaseError {
    move |e| DatabaseError::Query(format!("{op}: {e}"))
}

const SESSION_COLUMNS: &str =
    "user_id, api_id, api_hash, phone_number, session_string, is_authenticated, created_at";

/// Map a libsql Row to a Session. Column order matches SESSION_COLUMNS.
fn row_to_session(row: &libsql::Row) -> Result<Session, libsql::Error> {
    let api_hash: String = row.get(2)?;
    let session_string: Option<String> = row.get::<String>(4).ok();
    let created_str: String = row.get(6)?;

    Ok(Session {
        user_id: row.get(0)?,
        api_id: row.get::<i64>(1)? as i32,
        api_hash: SecretString::from(api_hash),
        phone_number: row.get(3)?,
        session_string: session_string.map(SecretString::from),
        is_authenticated: row.get::<i64>(5)? != 0,
        created_at: parse_datetime(&created_str),
    })
}

const RULE_COLUMNS: &str = "rule_id, user_id, source_chat_id, source_chat_name, destination_chat_id, \
     destination_chat_name, keywords, filter_media, media_types, hide_source, is_active, created_at";

/// Map a libsql Row to a Rule. Column order matches RULE_COLUMNS.
fn row_to_rule(row: &libsql::Row) -> Result<Rule, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Serialization(format!("rule row: {e}"));

    let keywords_str: String = row.get(6).map_err(get_err)?;
    let keywords: Vec<String> = serde_json::from_str(&keywords_str)
        .map_err(|e| DatabaseError::Serialization(format!("rule keywords: {e}")))?;

    // An unknown name must fail the read: dropping it could leave an empty
    // allowed set, which admits every media type.
    let media_str: String = row.get(8).map_err(get_err)?;
    let media_names: Vec<String> = serde_json::from_str(&media_str)
        .map_err(|e| DatabaseError::Serialization(format!("rule media_types: {e}")))?;
    let media_types = media_names
        .iter()
        .map(|n| n.parse::<MediaType>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DatabaseError::Serialization(format!("rule media_types: {e}")))?;

    let created_str: String = row.get(11).map_err(get_err)?;

    Ok(Rule {
        rule_id: row.get(0).map_err(get_err)?,
        user_id: row.get(1).map_err(get_err)?,
        source_chat_id: row.get(2).map_err(get_err)?,
        source_chat_name: row.get(3).map_err(get_err)?,
        destination_chat_id: row.get(4).map_err(get_err)?,
        destination_chat_name: row.get(5).map_err(get_err)?,
        keywords,
        filter_media: row.get::<i64>(7).map_err(get_err)? != 0,
        media_types,
        hide_source: row.get::<i64>(9).map_err(get_err)? != 0,
        is_active: row.get::<i64>(10).map_err(get_err)? != 0,
        created_at: parse_datetime(&created_str),
    })
}

const LOG_COLUMNS: &str = "log_id, rule_id, user_id, message_text, has_media, media_type, \
     forwarded_at, status, error_message";

/// Map a libsql Row to an AuditLogEntry. Column order matches LOG_COLUMNS.
fn row_to_log(row: &libsql::Row) -> Result<AuditLogEntry, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Serialization(format!("log row: {e}"));

    let forwarded_str: String = row.get(6).map_err(get_err)?;
    let status_str: String = row.get(7).map_err(get_err)?;
    let status: LogStatus = status_str.parse().map_err(DatabaseError::Serialization)?;

    Ok(AuditLogEntry {
        log_id: row.get(0).map_err(get_err)?,
        rule_id: row.get(1).map_err(get_err)?,
        user_id: row.get(2).map_err(get_err)?,
        message_text: row.get::<String>(3).ok(),
        has_media: row.get::<i64>(4).map_err(get_err)? != 0,
        media_type: row.get::<String>(5).ok().and_then(|s| s.parse().ok()),
        forwarded_at: parse_datetime(&forwarded_str),
        status,
        error_message: row.get::<String>(8).ok(),
    })
}

// ── Database trait implementation ───────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    // ── Sessions ────────────────────────────────────────────────────

    async fn insert_session(&self, session: &Session) -> Result<(), DatabaseError> {
        let session_string = session
            .session_string
            .as_ref()
            .map(|s| s.expose_secret().to_string());

        self.conn()
            .execute(
                &format!("INSERT INTO telegram_sessions ({SESSION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
                params![
                    session.user_id.clone(),
                    session.api_id as i64,
                    session.api_hash.expose_secret().to_string(),
                    session.phone_number.clone(),
                    opt_text(session_string.as_deref()),
                    session.is_authenticated as i64,
                    format_datetime(&session.created_at),
                ],
            )
            .await
            .map_err(query_err("insert_session"))?;
        Ok(())
    }

    async fn get_session(&self, user_id: &str) -> Result<Option<Session>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SESSION_COLUMNS} FROM telegram_sessions WHERE user_id = ?1"),
                params![user_id],
            )
            .await
            .map_err(query_err("get_session"))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_session(&row).map_err(query_err("get_session"))?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_session: {e}"))),
        }
    }

    // ── Rules ───────────────────────────────────────────────────────

    async fn insert_rule(&self, rule: &Rule) -> Result<(), DatabaseError> {
        let keywords = serde_json::to_string(&rule.keywords)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let media_types = serde_json::to_string(&rule.media_types)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        self.conn()
            .execute(
                &format!(
                    "INSERT INTO forwarding_rules ({RULE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                params![
                    rule.rule_id.clone(),
                    rule.user_id.clone(),
                    rule.source_chat_id,
                    rule.source_chat_name.clone(),
                    rule.destination_chat_id,
                    rule.destination_chat_name.clone(),
                    keywords,
                    rule.filter_media as i64,
                    media_types,
                    rule.hide_source as i64,
                    rule.is_active as i64,
                    format_datetime(&rule.created_at),
                ],
            )
            .await
            .map_err(query_err("insert_rule"))?;
        Ok(())
    }

    async fn get_rule(&self, rule_id: &str) -> Result<Option<Rule>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {RULE_COLUMNS} FROM forwarding_rules WHERE rule_id = ?1"),
                params![rule_id],
            )
            .await
            .map_err(query_err("get_rule"))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_rule(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_rule: {e}"))),
        }
    }

    async fn list_rules(&self, filter: &RuleFilter) -> Result<Vec<Rule>, DatabaseError> {
        // NULL parameters disable their condition.
        let active: libsql::Value = match filter.is_active {
            Some(a) => libsql::Value::Integer(a as i64),
            None => libsql::Value::Null,
        };
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RULE_COLUMNS} FROM forwarding_rules \
                     WHERE (?1 IS NULL OR user_id = ?1) AND (?2 IS NULL OR is_active = ?2) \
                     ORDER BY created_at ASC"
                ),
                params![opt_text(filter.user_id.as_deref()), active],
            )
            .await
            .map_err(query_err("list_rules"))?;

        let mut rules = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_rule(&row) {
                Ok(r) => rules.push(r),
                Err(e) => tracing::warn!("Skipping rule row: {e}"),
            }
        }
        Ok(rules)
    }

    async fn set_rule_active(&self, rule_id: &str, active: bool) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE forwarding_rules SET is_active = ?1 WHERE rule_id = ?2",
                params![active as i64, rule_id],
            )
            .await
            .map_err(query_err("set_rule_active"))?;
        Ok(count > 0)
    }

    async fn delete_rule(&self, rule_id: &str) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "DELETE FROM forwarding_rules WHERE rule_id = ?1",
                params![rule_id],
            )
            .await
            .map_err(query_err("delete_rule"))?;
        Ok(count > 0)
    }

    // ── Audit log ───────────────────────────────────────────────────

    async fn append_audit(&self, entry: &AuditLogEntry) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!("INSERT INTO forwarding_logs ({LOG_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
                params![
                    entry.log_id.clone(),
                    entry.rule_id.clone(),
                    entry.user_id.clone(),
                    opt_text(entry.message_text.as_deref()),
                    entry.has_media as i64,
                    opt_text(entry.media_type.map(|m| m.as_str())),
                    format_datetime(&entry.forwarded_at),
                    entry.status.as_str(),
                    opt_text(entry.error_message.as_deref()),
                ],
            )
            .await
            .map_err(query_err("append_audit"))?;
        Ok(())
    }

    async fn list_audit(&self, user_id: &str, limit: usize) -> Result<Vec<AuditLogEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {LOG_COLUMNS} FROM forwarding_logs WHERE user_id = ?1 \
                     ORDER BY forwarded_at DESC, rowid DESC LIMIT ?2"
                ),
                params![user_id, limit as i64],
            )
            .await
            .map_err(query_err("list_audit"))?;

        let mut entries = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_log(&row) {
                Ok(e) => entries.push(e),
                Err(e) => tracing::warn!("Skipping log row: {e}"),
            }
        }
        Ok(entries)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
