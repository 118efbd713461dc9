//! Forwarding data model: sessions, rules, and audit log entries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An account's platform credentials and serialized connection token.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub api_id: i32,
    pub api_hash: SecretString,
    pub phone_number: String,
    /// Serialized authenticated connection; `None` until login completes.
    pub session_string: Option<SecretString>,
    pub is_authenticated: bool,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// A fresh, unauthenticated session with a generated account id.
    pub fn new(api_id: i32, api_hash: SecretString, phone_number: impl Into<String>) -> Self {
        Self {
            user_id: Uuid::new_v4().to_string(),
            api_id,
            api_hash,
            phone_number: phone_number.into(),
            session_string: None,
            is_authenticated: false,
            created_at: Utc::now(),
        }
    }

    /// Builder: attach a completed login's session string.
    pub fn authenticated(mut self, session_string: SecretString) -> Self {
        self.session_string = Some(session_string);
        self.is_authenticated = true;
        self
    }
}

/// A classified media attachment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Photo,
    Document,
    Video,
    Audio,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Photo => "photo",
            MediaType::Document => "document",
            MediaType::Video => "video",
            MediaType::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "photo" => Ok(MediaType::Photo),
            "document" => Ok(MediaType::Document),
            "video" => Ok(MediaType::Video),
            "audio" => Ok(MediaType::Audio),
            other => Err(format!("unknown media type: {other}")),
        }
    }
}

fn default_hide_source() -> bool {
    true
}

/// A user-defined relay rule from a source conversation to a destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    /// Owning account.
    pub user_id: String,
    pub source_chat_id: i64,
    pub source_chat_name: String,
    pub destination_chat_id: i64,
    pub destination_chat_name: String,
    /// Case-insensitive substrings; empty matches everything.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub filter_media: bool,
    #[serde(default)]
    pub media_types: Vec<MediaType>,
    /// Copy content without attribution instead of a native forward.
    #[serde(default = "default_hide_source")]
    pub hide_source: bool,
    #[serde(default)]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Rule {
    /// Registry key for this rule's worker.
    pub fn worker_key(&self) -> String {
        format!("{}_{}", self.user_id, self.rule_id)
    }
}

/// Request body for creating a rule.
#[derive(Debug, Clone, Deserialize)]
pub struct NewRule {
    pub user_id: String,
    pub source_chat_id: i64,
    pub source_chat_name: String,
    pub destination_chat_id: i64,
    pub destination_chat_name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub filter_media: bool,
    #[serde(default)]
    pub media_types: Vec<MediaType>,
    #[serde(default = "default_hide_source")]
    pub hide_source: bool,
}

impl NewRule {
    /// Materialize into an inactive rule with a fresh id.
    pub fn into_rule(self) -> Rule {
        Rule {
            rule_id: Uuid::new_v4().to_string(),
            user_id: self.user_id,
            source_chat_id: self.source_chat_id,
            source_chat_name: self.source_chat_name,
            destination_chat_id: self.destination_chat_id,
            destination_chat_name: self.destination_chat_name,
            keywords: self.keywords,
            filter_media: self.filter_media,
            media_types: self.media_types,
            hide_source: self.hide_source,
            is_active: false,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of a relay attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Failed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Success => "success",
            LogStatus::Failed => "failed",
        }
    }
}

impl FromStr for LogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(LogStatus::Success),
            "failed" => Ok(LogStatus::Failed),
            other => Err(format!("unknown log status: {other}")),
        }
    }
}

/// Append-only audit record of one relay attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub log_id: String,
    pub rule_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_text: Option<String>,
    pub has_media: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,
    pub forwarded_at: DateTime<Utc>,
    pub status: LogStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AuditLogEntry {
    fn new(rule: &Rule, status: LogStatus) -> Self {
        Self {
            log_id: Uuid::new_v4().to_string(),
            rule_id: rule.rule_id.clone(),
            user_id: rule.user_id.clone(),
            message_text: None,
            has_media: false,
            media_type: None,
            forwarded_at: Utc::now(),
            status,
            error_message: None,
        }
    }

    pub fn success(rule: &Rule) -> Self {
        Self::new(rule, LogStatus::Success)
    }

    pub fn failed(rule: &Rule, error: &str, max_error_chars: usize) -> Self {
        let mut entry = Self::new(rule, LogStatus::Failed);
        entry.error_message = Some(truncate_chars(error, max_error_chars));
        entry
    }

    /// Builder: record the message text, truncated. Empty text is stored as absent.
    pub fn with_text(mut self, text: &str, max_chars: usize) -> Self {
        self.message_text = if text.is_empty() {
            None
        } else {
            Some(truncate_chars(text, max_chars))
        };
        self
    }

    /// Builder: record media presence and its classified type.
    pub fn with_media(mut self, has_media: bool, media_type: Option<MediaType>) -> Self {
        self.has_media = has_media;
        self.media_type = media_type;
        self
    }
}

/// Truncate to at most `max` characters, never splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
