//! In-process fake platform shared by the integration tests.
//!
//! Conversations, resolvable ids, and per-destination send failures are
//! scripted up front; tests inject new-message events with [`FakeState::push`].

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use secrecy::SecretString;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use autoforward::config::ForwarderConfig;
use autoforward::error::PlatformError;
use autoforward::forwarder::model::{NewRule, Rule, Session};
use autoforward::forwarder::Orchestrator;
use autoforward::platform::{
    Connector, Conversation, ConversationId, ConversationKind, ConversationStream,
    IncomingMessage, MessageMedia, MessageStream, PeerHandle, PlatformClient, Target,
};
use autoforward::store::{Database, LibSqlBackend};

/// Maximum time any test is allowed to run before we consider it hung.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub const SOURCE: ConversationId = -1001;
pub const DEST: ConversationId = -1002;

/// What the fake recorded for one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Copy {
        target: ConversationId,
        text: Option<String>,
        has_media: bool,
    },
    Forward {
        target: ConversationId,
        from_chat: ConversationId,
        message_id: i64,
    },
}

/// Scripted platform behaviour and recorded calls.
#[derive(Default)]
pub struct FakeState {
    pub conversations: Mutex<Vec<Conversation>>,
    pub enumerate_fails: Mutex<bool>,
    /// Ids that direct lookup can resolve.
    pub resolvable: Mutex<HashSet<ConversationId>>,
    /// Errors returned by the next deliveries to a destination, in order.
    pub send_failures: Mutex<HashMap<ConversationId, VecDeque<PlatformError>>>,
    pub connect_delay: Mutex<Option<Duration>>,
    pub deliveries: Mutex<Vec<Delivery>>,
    subscribers: Mutex<Vec<(ConversationId, mpsc::UnboundedSender<IncomingMessage>)>>,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl FakeState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `id` resolvable by direct lookup.
    pub fn allow_resolve(&self, id: ConversationId) {
        self.resolvable.lock().unwrap().insert(id);
    }

    /// List `id` among the account's conversations.
    pub fn add_conversation(&self, id: ConversationId) {
        self.conversations.lock().unwrap().push(Conversation {
            id,
            name: format!("chat {id}"),
            username: None,
            handle: handle(id),
        });
    }

    pub fn fail_next_send(&self, dest: ConversationId, err: PlatformError) {
        self.send_failures
            .lock()
            .unwrap()
            .entry(dest)
            .or_default()
            .push_back(err);
    }

    /// Deliver an event to every live subscription on `msg.chat_id`.
    /// Returns how many subscriptions received it.
    pub fn push(&self, msg: IncomingMessage) -> usize {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|(_, tx)| !tx.is_closed());
        subs.iter()
            .filter(|(chat, _)| *chat == msg.chat_id)
            .filter(|(_, tx)| tx.send(msg.clone()).is_ok())
            .count()
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    fn next_failure(&self, dest: ConversationId) -> Option<PlatformError> {
        self.send_failures
            .lock()
            .unwrap()
            .get_mut(&dest)
            .and_then(|q| q.pop_front())
    }
}

pub fn handle(id: ConversationId) -> PeerHandle {
    PeerHandle {
        id,
        kind: ConversationKind::Channel,
        access_hash: Some(id.abs()),
    }
}

pub struct FakeClient {
    state: Arc<FakeState>,
    closed: CancellationToken,
}

#[async_trait]
impl PlatformClient for FakeClient {
    async fn enumerate_conversations(&self) -> Result<ConversationStream, PlatformError> {
        if *self.state.enumerate_fails.lock().unwrap() {
            return Err(PlatformError::Network("dialogs unavailable".into()));
        }
        let items: Vec<_> = self
            .state
            .conversations
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .map(Ok::<Conversation, PlatformError>)
            .collect();
        Ok(stream::iter(items).boxed())
    }

    async fn resolve(&self, id: ConversationId) -> Result<PeerHandle, PlatformError> {
        if self.state.resolvable.lock().unwrap().contains(&id) {
            Ok(handle(id))
        } else {
            Err(PlatformError::Rpc {
                code: 400,
                message: format!("Could not find the input entity for PeerChannel({id})"),
            })
        }
    }

    async fn subscribe_new_message(&self, chat: ConversationId) -> Result<MessageStream, PlatformError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.subscribers.lock().unwrap().push((chat, tx));

        let closed = self.closed.clone();
        let events = stream::unfold((rx, closed), |(mut rx, closed)| async move {
            tokio::select! {
                _ = closed.cancelled() => None,
                msg = rx.recv() => msg.map(|m| (m, (rx, closed))),
            }
        });
        Ok(events.boxed())
    }

    async fn send(
        &self,
        target: &Target,
        text: Option<&str>,
        media: Option<&MessageMedia>,
    ) -> Result<(), PlatformError> {
        if let Some(err) = self.state.next_failure(target.id()) {
            return Err(err);
        }
        self.state.deliveries.lock().unwrap().push(Delivery::Copy {
            target: target.id(),
            text: text.map(str::to_string),
            has_media: media.is_some(),
        });
        Ok(())
    }

    async fn forward(&self, target: &Target, message: &IncomingMessage) -> Result<(), PlatformError> {
        if let Some(err) = self.state.next_failure(target.id()) {
            return Err(err);
        }
        self.state.deliveries.lock().unwrap().push(Delivery::Forward {
            target: target.id(),
            from_chat: message.chat_id,
            message_id: message.id,
        });
        Ok(())
    }

    async fn disconnect(&self) {
        if !self.closed.is_cancelled() {
            self.closed.cancel();
            self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub struct FakeConnector {
    pub state: Arc<FakeState>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _session: &Session) -> Result<Arc<dyn PlatformClient>, PlatformError> {
        let delay = *self.state.connect_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeClient {
            state: Arc::clone(&self.state),
            closed: CancellationToken::new(),
        }))
    }
}

/// Everything a forwarding test needs.
pub struct Harness {
    pub db: Arc<dyn Database>,
    pub platform: Arc<FakeState>,
    pub connector: Arc<dyn Connector>,
    pub orchestrator: Arc<Orchestrator>,
    pub user_id: String,
}

impl Harness {
    /// In-memory store with one authenticated account; source and
    /// destination are directly resolvable.
    pub async fn new() -> Self {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let platform = FakeState::new();
        platform.allow_resolve(SOURCE);
        platform.allow_resolve(DEST);

        let connector: Arc<dyn Connector> = Arc::new(FakeConnector {
            state: Arc::clone(&platform),
        });
        let config = ForwarderConfig {
            stop_grace_period: Duration::from_secs(2),
            ..ForwarderConfig::default()
        };
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&db),
            Arc::clone(&connector),
            config,
        ));

        let session = Session::new(1234, SecretString::from("hash".to_string()), "+15550000")
            .authenticated(SecretString::from("session-token".to_string()));
        db.insert_session(&session).await.unwrap();

        Self {
            db,
            platform,
            connector,
            orchestrator,
            user_id: session.user_id,
        }
    }

    /// Insert an active rule from `SOURCE` to `DEST`, adjusted by `edit`.
    pub async fn add_rule(&self, edit: impl FnOnce(&mut NewRule)) -> Rule {
        let mut new = NewRule {
            user_id: self.user_id.clone(),
            source_chat_id: SOURCE,
            source_chat_name: "Source".into(),
            destination_chat_id: DEST,
            destination_chat_name: "Destination".into(),
            keywords: vec![],
            filter_media: false,
            media_types: vec![],
            hide_source: true,
        };
        edit(&mut new);
        let mut rule = new.into_rule();
        rule.is_active = true;
        self.db.insert_rule(&rule).await.unwrap();
        rule
    }

    /// Start the rule and wait until its worker is relaying.
    pub async fn start_running(&self, rule: &Rule) {
        self.orchestrator.start_rule(&rule.rule_id).await.unwrap();
        self.wait_running(&rule.rule_id).await;
    }

    pub async fn wait_running(&self, rule_id: &str) {
        while !self.orchestrator.is_running(rule_id).await {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn wait_deregistered(&self, rule_id: &str) {
        while self.orchestrator.registry().state_of(rule_id).await.is_some() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Wait until the account has at least `n` audit entries; returns them newest first.
    pub async fn wait_logs(&self, n: usize) -> Vec<autoforward::forwarder::AuditLogEntry> {
        loop {
            let logs = self.db.list_audit(&self.user_id, 100).await.unwrap();
            if logs.len() >= n {
                return logs;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn rule_active(&self, rule_id: &str) -> bool {
        self.db
            .get_rule(rule_id)
            .await
            .unwrap()
            .map(|r| r.is_active)
            .unwrap_or(false)
    }
}
