//! HTTP gateway client for user-account access to the messaging platform.
//!
//! The gateway holds the MTProto connection and exposes each operation as a
//! JSON method at `{base}/{method}`. Replies use the envelope
//! `{ok, result, error_code, description, parameters}`, with the platform's
//! RPC code (e.g. `CHAT_WRITE_FORBIDDEN`) in `description`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::PlatformError;
use crate::forwarder::model::Session;
use crate::platform::{
    Connector, Conversation, ConversationId, ConversationStream, IncomingMessage, MessageMedia,
    MessageStream, PeerHandle, PlatformClient, Target,
};

/// Page size requested from `getDialogs`.
const DIALOG_PAGE_SIZE: u32 = 100;

/// Backoff after a failed `getUpdates` poll.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Gateway reply envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ErrorParameters>,
}

#[derive(Debug, Deserialize)]
struct ErrorParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ConnectResult {
    connection_id: String,
}

#[derive(Debug, Deserialize)]
struct DialogPage {
    #[serde(default)]
    dialogs: Vec<Conversation>,
    #[serde(default)]
    next_offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<IncomingMessage>,
}

/// Unwrap a gateway envelope into its result or a classified error.
fn parse_envelope<T>(envelope: Envelope<T>) -> Result<T, PlatformError> {
    if envelope.ok {
        return envelope
            .result
            .ok_or_else(|| PlatformError::InvalidResponse("ok reply without result".into()));
    }

    let code = envelope.error_code.unwrap_or(0);
    let description = envelope.description.unwrap_or_else(|| "unknown error".into());

    if code == 429 || code == 420 || description.starts_with("FLOOD_WAIT") {
        let retry_after = envelope
            .parameters
            .and_then(|p| p.retry_after)
            .map(Duration::from_secs);
        return Err(PlatformError::RateLimited { retry_after });
    }
    if description == "CONNECTION_CLOSED" {
        return Err(PlatformError::Disconnected(description));
    }
    if code == 401 {
        return Err(PlatformError::Unauthorized(description));
    }
    Err(PlatformError::Rpc {
        code,
        message: description,
    })
}

/// Gateway request body field naming a destination.
fn target_fields(target: &Target) -> serde_json::Value {
    match target {
        Target::Peer(handle) => serde_json::json!({ "peer": handle }),
        Target::Id(id) => serde_json::json!({ "peer_id": id }),
    }
}

/// Merge `extra`'s top-level keys into `body`.
fn merge(mut body: serde_json::Value, extra: serde_json::Value) -> serde_json::Value {
    if let (Some(b), serde_json::Value::Object(e)) = (body.as_object_mut(), extra) {
        b.extend(e);
    }
    body
}

struct Inner {
    http: reqwest::Client,
    base_url: String,
    connection_id: String,
    poll_timeout_secs: u64,
    closed: CancellationToken,
}

impl Inner {
    fn api_url(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, PlatformError> {
        if self.closed.is_cancelled() {
            return Err(PlatformError::Disconnected("client disconnected".into()));
        }

        let body = merge(
            serde_json::json!({ "connection_id": self.connection_id }),
            body,
        );
        let envelope: Envelope<T> = self
            .http
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        parse_envelope(envelope)
    }
}

/// One gateway connection for one account.
#[derive(Clone)]
pub struct BridgeClient {
    inner: Arc<Inner>,
}

#[async_trait]
impl PlatformClient for BridgeClient {
    async fn enumerate_conversations(&self) -> Result<ConversationStream, PlatformError> {
        let inner = Arc::clone(&self.inner);

        let pages = stream::try_unfold(Some(0_i64), move |offset| {
            let inner = Arc::clone(&inner);
            async move {
                let Some(offset) = offset else {
                    return Ok::<_, PlatformError>(None);
                };
                let page: DialogPage = inner
                    .call(
                        "getDialogs",
                        serde_json::json!({ "offset": offset, "limit": DIALOG_PAGE_SIZE }),
                    )
                    .await?;
                let next = if page.dialogs.is_empty() {
                    None
                } else {
                    page.next_offset
                };
                Ok(Some((page.dialogs, next)))
            }
        });

        let conversations = pages
            .map_ok(|page| stream::iter(page.into_iter().map(Ok::<Conversation, PlatformError>)))
            .try_flatten();

        Ok(Box::pin(conversations))
    }

    async fn resolve(&self, id: ConversationId) -> Result<PeerHandle, PlatformError> {
        self.inner
            .call("resolvePeer", serde_json::json!({ "peer_id": id }))
            .await
    }

    async fn subscribe_new_message(&self, chat: ConversationId) -> Result<MessageStream, PlatformError> {
        if self.inner.closed.is_cancelled() {
            return Err(PlatformError::Disconnected("client disconnected".into()));
        }

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let mut offset: i64 = 0;
            tracing::debug!(chat_id = chat, "Gateway subscription polling");

            loop {
                let body = serde_json::json!({
                    "chat_id": chat,
                    "offset": offset,
                    "timeout": inner.poll_timeout_secs,
                });

                let polled = tokio::select! {
                    _ = inner.closed.cancelled() => return,
                    r = inner.call::<Vec<Update>>("getUpdates", body) => r,
                };

                let updates = match polled {
                    Ok(u) => u,
                    Err(PlatformError::Disconnected(reason)) | Err(PlatformError::Unauthorized(reason)) => {
                        tracing::info!(chat_id = chat, "Gateway subscription ended: {reason}");
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(chat_id = chat, "Gateway poll error: {e}");
                        tokio::select! {
                            _ = inner.closed.cancelled() => return,
                            _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => continue,
                        }
                    }
                };

                for update in updates {
                    offset = offset.max(update.update_id + 1);

                    let Some(message) = update.message else {
                        continue;
                    };
                    if message.chat_id != chat {
                        continue;
                    }
                    if tx.send(message).is_err() {
                        tracing::debug!(chat_id = chat, "Subscription receiver dropped");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(stream.boxed())
    }

    async fn send(
        &self,
        target: &Target,
        text: Option<&str>,
        media: Option<&MessageMedia>,
    ) -> Result<(), PlatformError> {
        let _: serde_json::Value = match media {
            Some(media) => {
                let body = merge(
                    target_fields(target),
                    serde_json::json!({ "caption": text, "media": media }),
                );
                self.inner.call("sendMedia", body).await?
            }
            None => {
                let body = merge(
                    target_fields(target),
                    serde_json::json!({ "text": text.unwrap_or_default() }),
                );
                self.inner.call("sendMessage", body).await?
            }
        };
        Ok(())
    }

    async fn forward(&self, target: &Target, message: &IncomingMessage) -> Result<(), PlatformError> {
        let body = merge(
            target_fields(target),
            serde_json::json!({
                "from_chat_id": message.chat_id,
                "message_ids": [message.id],
            }),
        );
        let _: serde_json::Value = self.inner.call("forwardMessages", body).await?;
        Ok(())
    }

    async fn disconnect(&self) {
        if self.inner.closed.is_cancelled() {
            return;
        }

        let result = self
            .inner
            .http
            .post(self.inner.api_url("disconnect"))
            .json(&serde_json::json!({ "connection_id": self.inner.connection_id }))
            .send()
            .await;
        if let Err(e) = result {
            tracing::debug!("Gateway disconnect request failed: {e}");
        }

        self.inner.closed.cancel();
    }
}

/// Opens gateway connections from stored sessions.
#[derive(Clone)]
pub struct BridgeConnector {
    http: reqwest::Client,
    base_url: String,
    poll_timeout_secs: u64,
}

impl BridgeConnector {
    pub fn new(base_url: impl Into<String>, poll_timeout_secs: u64) -> Self {
        let base_url: String = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_timeout_secs,
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url)
    }
}

#[async_trait]
impl Connector for BridgeConnector {
    async fn connect(&self, session: &Session) -> Result<Arc<dyn PlatformClient>, PlatformError> {
        let session_string = match (&session.session_string, session.is_authenticated) {
            (Some(s), true) => s,
            _ => {
                return Err(PlatformError::Unauthorized(format!(
                    "session for {} is not authenticated",
                    session.user_id
                )));
            }
        };

        let body = serde_json::json!({
            "api_id": session.api_id,
            "api_hash": session.api_hash.expose_secret(),
            "session": session_string.expose_secret(),
        });
        let envelope: Envelope<ConnectResult> = self
            .http
            .post(self.api_url("connect"))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        let connected = parse_envelope(envelope)?;

        tracing::debug!(
            account_id = %session.user_id,
            connection_id = %connected.connection_id,
            "Gateway connection opened"
        );

        Ok(Arc::new(BridgeClient {
            inner: Arc::new(Inner {
                http: self.http.clone(),
                base_url: self.base_url.clone(),
                connection_id: connected.connection_id,
                poll_timeout_secs: self.poll_timeout_secs,
                closed: CancellationToken::new(),
            }),
        }))
    }
}
