//! Messaging platform abstraction.
//!
//! The forwarding core talks to the platform only through [`Connector`] and
//! [`PlatformClient`]. [`bridge`] implements them over an HTTP gateway.

pub mod bridge;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::PlatformError;
use crate::forwarder::model::Session;

pub use bridge::{BridgeClient, BridgeConnector};

/// Numeric conversation identifier.
pub type ConversationId = i64;

/// Kind of conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Channel,
    Group,
    User,
}

/// Opaque reference to a conversation, usable for send and forward calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerHandle {
    pub id: ConversationId,
    pub kind: ConversationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_hash: Option<i64>,
}

/// One entry of the account's conversation list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub handle: PeerHandle,
}

/// Where a send or forward should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A resolved handle.
    Peer(PeerHandle),
    /// Bare id, left to the platform to resolve. Callers with no resolved
    /// handle send here; relay workers never do, since they refuse to start
    /// without one.
    Id(ConversationId),
}

impl Target {
    pub fn id(&self) -> ConversationId {
        match self {
            Target::Peer(h) => h.id,
            Target::Id(id) => *id,
        }
    }
}

/// Reference to a file already stored on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_hash: Option<i64>,
}

/// Media attached to a message, as the platform shapes it.
///
/// More than one field may be set at once; classification picks by precedence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMedia {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<FileRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<FileRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<FileRef>,
    /// Payload of kinds with no dedicated field (polls, locations, contacts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other: Option<serde_json::Value>,
}

/// A new message delivered on a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: i64,
    pub chat_id: ConversationId,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media: Option<MessageMedia>,
    pub date: DateTime<Utc>,
}

impl IncomingMessage {
    pub fn text(chat_id: ConversationId, id: i64, text: impl Into<String>) -> Self {
        Self {
            id,
            chat_id,
            text: Some(text.into()),
            media: None,
            date: Utc::now(),
        }
    }

    /// Builder: attach media.
    pub fn with_media(mut self, media: MessageMedia) -> Self {
        self.media = Some(media);
        self
    }
}

/// Stream of new-message events for one conversation; ends when the connection drops.
pub type MessageStream = Pin<Box<dyn Stream<Item = IncomingMessage> + Send>>;

/// Stream of the account's conversations; an `Err` item ends enumeration.
pub type ConversationStream = Pin<Box<dyn Stream<Item = Result<Conversation, PlatformError>> + Send>>;

/// A live, authenticated connection to the platform.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Enumerate every conversation visible to the account.
    async fn enumerate_conversations(&self) -> Result<ConversationStream, PlatformError>;

    /// Look up a conversation handle directly by id.
    async fn resolve(&self, id: ConversationId) -> Result<PeerHandle, PlatformError>;

    /// Subscribe to new messages arriving in one conversation.
    async fn subscribe_new_message(&self, chat: ConversationId) -> Result<MessageStream, PlatformError>;

    /// Send content as a new message with no attribution to its origin.
    async fn send(
        &self,
        target: &Target,
        text: Option<&str>,
        media: Option<&MessageMedia>,
    ) -> Result<(), PlatformError>;

    /// Forward a message natively, keeping "forwarded from" attribution.
    async fn forward(&self, target: &Target, message: &IncomingMessage) -> Result<(), PlatformError>;

    /// Close the connection. Open subscriptions end.
    async fn disconnect(&self);
}

/// Opens connections from stored sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, session: &Session) -> Result<Arc<dyn PlatformClient>, PlatformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_id_from_either_form() {
        assert_eq!(Target::Id(-100123).id(), -100123);

        let handle = PeerHandle {
            id: -100123,
            kind: ConversationKind::Channel,
            access_hash: Some(42),
        };
        assert_eq!(Target::Peer(handle).id(), -100123);
    }

    #[test]
    fn media_payload_deserializes_partial_shape() {
        let media: MessageMedia =
            serde_json::from_str(r#"{"document": {"id": "doc-1"}, "video": {"id": "vid-1"}}"#).unwrap();
        assert!(media.photo.is_none());
        assert_eq!(media.document.as_ref().map(|f| f.id.as_str()), Some("doc-1"));
        assert!(media.video.is_some());
    }

    #[test]
    fn incoming_message_without_text_or_media() {
        let msg: IncomingMessage =
            serde_json::from_str(r#"{"id": 7, "chat_id": -1, "date": "2026-01-01T00:00:00Z"}"#).unwrap();
        assert!(msg.text.is_none());
        assert!(msg.media.is_none());
    }
}
