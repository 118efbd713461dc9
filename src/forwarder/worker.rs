//! Relay worker: one live subscription per active rule.
//!
//! A worker starts (session, connection, cache, destination), then runs
//! (subscribed, relaying events one at a time), then stops (disconnected and
//! removed from the registry).

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, error, info, warn};

use crate::config::ForwarderConfig;
use crate::error::PlatformError;
use crate::forwarder::entity_cache::EntityCache;
use crate::forwarder::filter::{self, FilterDecision};
use crate::forwarder::model::{AuditLogEntry, Rule, truncate_chars};
use crate::forwarder::registry::{ForwarderRegistry, Reservation};
use crate::platform::{Connector, IncomingMessage, PlatformClient, Target};
use crate::store::Database;

/// Shared dependencies for relay workers.
#[derive(Clone)]
pub struct WorkerDeps {
    pub store: Arc<dyn Database>,
    pub connector: Arc<dyn Connector>,
    pub registry: Arc<ForwarderRegistry>,
    pub config: ForwarderConfig,
}

/// What the event loop should do after handling one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    /// Destination is permanently unreachable; the rule has been deactivated.
    Teardown,
}

/// Worker that relays messages for a single rule.
pub struct RelayWorker {
    rule: Rule,
    reservation: Reservation,
    deps: WorkerDeps,
}

impl RelayWorker {
    pub fn new(rule: Rule, reservation: Reservation, deps: WorkerDeps) -> Self {
        Self {
            rule,
            reservation,
            deps,
        }
    }

    fn store(&self) -> &Arc<dyn Database> {
        &self.deps.store
    }

    fn config(&self) -> &ForwarderConfig {
        &self.deps.config
    }

    /// Run to completion: start, relay until cancelled or torn down, then clean up.
    pub async fn run(self) {
        let cancel = self.reservation.cancel.clone();

        // Connecting is not raced against cancellation: a connection opened on
        // the platform side must always be closed again.
        if let Some(client) = self.connect().await {
            if cancel.is_cancelled() {
                debug!(rule_id = %self.rule.rule_id, "Relay worker cancelled while connecting");
            } else {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(rule_id = %self.rule.rule_id, "Relay worker cancelled");
                    }
                    _ = self.serve(client.as_ref()) => {}
                }
            }
            client.disconnect().await;
        }

        self.deps.registry.release(&self.reservation).await;
        info!(rule_id = %self.rule.rule_id, "Relay worker stopped");
    }

    /// Load the account's session and open a connection with it.
    async fn connect(&self) -> Option<Arc<dyn PlatformClient>> {
        let session = match self.store().get_session(&self.rule.user_id).await {
            Ok(Some(s)) if s.is_authenticated => s,
            Ok(_) => {
                warn!(
                    rule_id = %self.rule.rule_id,
                    account_id = %self.rule.user_id,
                    "No authenticated session, worker not started"
                );
                return None;
            }
            Err(e) => {
                error!(rule_id = %self.rule.rule_id, "Failed to load session: {e}");
                return None;
            }
        };

        match self.deps.connector.connect(&session).await {
            Ok(client) => Some(client),
            Err(e) => {
                error!(rule_id = %self.rule.rule_id, "Failed to connect: {e}");
                None
            }
        }
    }

    /// Build the cache, resolve the destination, subscribe, and relay events.
    async fn serve(&self, client: &dyn PlatformClient) {
        let rule_id = &self.rule.rule_id;
        let cache = EntityCache::populate(client, rule_id).await;

        let target = match self.resolve_destination(client, &cache).await {
            Ok(target) => target,
            Err(e) => {
                self.fail_startup(&e).await;
                return;
            }
        };

        let mut events = match client.subscribe_new_message(self.rule.source_chat_id).await {
            Ok(s) => s,
            Err(e) => {
                error!(rule_id = %rule_id, "Failed to subscribe to source: {e}");
                return;
            }
        };

        if !self.deps.registry.mark_running(&self.reservation).await {
            debug!(rule_id = %rule_id, "Registry slot gone before start completed");
            return;
        }
        info!(
            rule_id = %rule_id,
            source = self.rule.source_chat_id,
            destination = self.rule.destination_chat_id,
            "Relay worker running"
        );

        while let Some(message) = events.next().await {
            if self.handle_event(client, &target, &message).await == Flow::Teardown {
                return;
            }
        }
        info!(rule_id = %rule_id, "Source subscription ended");
    }

    /// Direct lookup first, then the entity cache.
    async fn resolve_destination(
        &self,
        client: &dyn PlatformClient,
        cache: &EntityCache,
    ) -> Result<Target, PlatformError> {
        let dest = self.rule.destination_chat_id;
        match client.resolve(dest).await {
            Ok(handle) => {
                debug!(rule_id = %self.rule.rule_id, destination = dest, "Destination resolved");
                Ok(Target::Peer(handle))
            }
            Err(e) => match cache.get(dest) {
                Some(handle) => {
                    debug!(
                        rule_id = %self.rule.rule_id,
                        destination = dest,
                        "Direct lookup failed, using cached handle: {e}"
                    );
                    Ok(Target::Peer(handle.clone()))
                }
                None => Err(e),
            },
        }
    }

    /// Record why the worker could not start and deactivate the rule.
    async fn fail_startup(&self, err: &PlatformError) {
        error!(
            rule_id = %self.rule.rule_id,
            destination = self.rule.destination_chat_id,
            "Destination not accessible: {err}"
        );

        let detail = truncate_chars(&err.to_string(), self.config().max_startup_error_chars);
        let entry = AuditLogEntry::failed(
            &self.rule,
            &format!("Destination not accessible: {detail}"),
            self.config().max_audit_error_chars,
        )
        .with_text("Failed to start forwarder", self.config().max_audit_text_chars);

        self.write_audit(&entry).await;
        self.deactivate().await;
    }

    /// Filter one event and relay it if it passes.
    async fn handle_event(
        &self,
        client: &dyn PlatformClient,
        target: &Target,
        message: &IncomingMessage,
    ) -> Flow {
        let rule_id = &self.rule.rule_id;

        match self.store().get_rule(rule_id).await {
            Ok(Some(current)) if current.is_active => {}
            Ok(_) => {
                debug!(rule_id = %rule_id, message_id = message.id, "Rule inactive, event discarded");
                return Flow::Continue;
            }
            Err(e) => {
                warn!(rule_id = %rule_id, "Could not re-check rule, event discarded: {e}");
                return Flow::Continue;
            }
        }

        let text = message.text.as_deref().unwrap_or("");
        let has_media = message.media.is_some();

        let media_type = match filter::evaluate(&self.rule, text, message.media.as_ref()) {
            FilterDecision::Relay { media_type } => media_type,
            decision => {
                debug!(rule_id = %rule_id, message_id = message.id, ?decision, "Event filtered out");
                return Flow::Continue;
            }
        };

        let sent = if self.rule.hide_source {
            let body = if text.is_empty() { None } else { Some(text) };
            client.send(target, body, message.media.as_ref()).await
        } else {
            client.forward(target, message).await
        };

        match sent {
            Ok(()) => {
                debug!(
                    rule_id = %rule_id,
                    message_id = message.id,
                    destination = target.id(),
                    "Message relayed"
                );
                let entry = AuditLogEntry::success(&self.rule)
                    .with_text(text, self.config().max_audit_text_chars)
                    .with_media(has_media, media_type);
                self.write_audit(&entry).await;
                Flow::Continue
            }
            Err(e) => {
                error!(rule_id = %rule_id, message_id = message.id, "Relay failed: {e}");
                let entry = AuditLogEntry::failed(
                    &self.rule,
                    &e.to_string(),
                    self.config().max_audit_error_chars,
                )
                .with_text(text, self.config().max_audit_text_chars)
                .with_media(has_media, media_type);
                self.write_audit(&entry).await;

                if e.is_destination_unreachable() {
                    self.deactivate().await;
                    Flow::Teardown
                } else {
                    Flow::Continue
                }
            }
        }
    }

    async fn write_audit(&self, entry: &AuditLogEntry) {
        if let Err(e) = self.store().append_audit(entry).await {
            warn!(rule_id = %self.rule.rule_id, "Failed to write audit entry: {e}");
        }
    }

    async fn deactivate(&self) {
        warn!(rule_id = %self.rule.rule_id, "Deactivating rule");
        if let Err(e) = self.store().set_rule_active(&self.rule.rule_id, false).await {
            error!(rule_id = %self.rule.rule_id, "Failed to deactivate rule: {e}");
        }
    }
}
