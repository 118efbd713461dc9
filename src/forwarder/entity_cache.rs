//! Conversation handles learned by enumerating the account's dialogs.
//!
//! Direct lookup by id is unreliable for conversations the connection has not
//! recently seen, so each worker enumerates once at startup and keeps the
//! handles it found.

use std::collections::HashMap;

use futures::StreamExt;
use tracing::{debug, warn};

use crate::platform::{ConversationId, PeerHandle, PlatformClient};

/// Id-to-handle map built from one enumeration pass.
#[derive(Debug, Default)]
pub struct EntityCache {
    entries: HashMap<ConversationId, PeerHandle>,
}

impl EntityCache {
    /// Enumerate every visible conversation and cache its handle.
    ///
    /// Failures are logged and swallowed: whatever was collected before the
    /// error is kept.
    pub async fn populate(client: &dyn PlatformClient, rule_id: &str) -> Self {
        let mut cache = Self::default();

        let mut stream = match client.enumerate_conversations().await {
            Ok(s) => s,
            Err(e) => {
                warn!(rule_id = %rule_id, "Could not enumerate conversations: {e}");
                return cache;
            }
        };

        while let Some(item) = stream.next().await {
            match item {
                Ok(conv) => {
                    cache.insert(conv.handle);
                }
                Err(e) => {
                    warn!(
                        rule_id = %rule_id,
                        cached = cache.len(),
                        "Conversation enumeration interrupted: {e}"
                    );
                    break;
                }
            }
        }

        debug!(rule_id = %rule_id, count = cache.len(), "Entity cache populated");
        cache
    }

    pub fn insert(&mut self, handle: PeerHandle) {
        self.entries.insert(handle.id, handle);
    }

    pub fn get(&self, id: ConversationId) -> Option<&PeerHandle> {
        self.entries.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures::{StreamExt, stream};

    use super::*;
    use crate::error::PlatformError;
    use crate::platform::{
        Conversation, ConversationKind, ConversationStream, IncomingMessage, MessageMedia,
        MessageStream, Target,
    };

    /// Serves a scripted enumeration; everything else is unused here.
    struct ScriptedDialogs {
        items: Mutex<Option<Vec<Result<Conversation, PlatformError>>>>,
        fail_open: bool,
    }

    impl ScriptedDialogs {
        fn new(items: Vec<Result<Conversation, PlatformError>>) -> Self {
            Self {
                items: Mutex::new(Some(items)),
                fail_open: false,
            }
        }
    }

    fn conv(id: i64) -> Conversation {
        Conversation {
            id,
            name: format!("chat {id}"),
            username: None,
            handle: PeerHandle {
                id,
                kind: ConversationKind::Channel,
                access_hash: Some(id * 7),
            },
        }
    }

    #[async_trait]
    impl PlatformClient for ScriptedDialogs {
        async fn enumerate_conversations(&self) -> Result<ConversationStream, PlatformError> {
            if self.fail_open {
                return Err(PlatformError::Network("dialogs unavailable".into()));
            }
            let items = self.items.lock().unwrap().take().unwrap_or_default();
            Ok(stream::iter(items).boxed())
        }

        async fn resolve(&self, _id: ConversationId) -> Result<PeerHandle, PlatformError> {
            unimplemented!()
        }

        async fn subscribe_new_message(&self, _chat: ConversationId) -> Result<MessageStream, PlatformError> {
            unimplemented!()
        }

        async fn send(
            &self,
            _target: &Target,
            _text: Option<&str>,
            _media: Option<&MessageMedia>,
        ) -> Result<(), PlatformError> {
            unimplemented!()
        }

        async fn forward(&self, _target: &Target, _message: &IncomingMessage) -> Result<(), PlatformError> {
            unimplemented!()
        }

        async fn disconnect(&self) {}
    }

    #[tokio::test]
    async fn populate_collects_all_handles() {
        let client = ScriptedDialogs::new(vec![Ok(conv(-100)), Ok(conv(-200)), Ok(conv(300))]);
        let cache = EntityCache::populate(&client, "r1").await;
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(-200).and_then(|h| h.access_hash), Some(-1400));
        assert!(cache.get(999).is_none());
    }

    #[tokio::test]
    async fn enumeration_error_keeps_partial_cache() {
        let client = ScriptedDialogs::new(vec![
            Ok(conv(-100)),
            Err(PlatformError::Network("reset".into())),
            Ok(conv(-200)),
        ]);
        let cache = EntityCache::populate(&client, "r1").await;
        assert_eq!(cache.len(), 1);
        assert!(cache.get(-100).is_some());
        assert!(cache.get(-200).is_none());
    }

    #[tokio::test]
    async fn open_failure_yields_empty_cache() {
        let client = ScriptedDialogs {
            items: Mutex::new(None),
            fail_open: true,
        };
        let cache = EntityCache::populate(&client, "r1").await;
        assert!(cache.is_empty());
    }
}
