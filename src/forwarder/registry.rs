//! Process-wide table of relay workers.
//!
//! Keys are `"{account}_{rule}"`. A slot is reserved atomically before the
//! worker task is spawned, so concurrent starts for one rule never yield two
//! workers. Each reservation carries a generation number; a worker only ever
//! removes the slot it reserved. Once closed, the registry refuses new
//! reservations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle phase of a registered worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Resolving session, cache, and destination.
    Starting,
    /// Subscribed and relaying.
    Running,
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    state: WorkerState,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Proof of a reserved slot, handed to the worker it belongs to.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub key: String,
    pub generation: u64,
    pub cancel: CancellationToken,
}

/// A worker pulled out of the registry, ready to be stopped.
#[derive(Debug)]
pub struct Detached {
    pub key: String,
    pub cancel: CancellationToken,
    pub handle: Option<JoinHandle<()>>,
}

/// Table of relay workers keyed by account and rule.
#[derive(Debug, Default)]
pub struct ForwarderRegistry {
    slots: RwLock<HashMap<String, Slot>>,
    next_generation: AtomicU64,
    /// Only written while holding the `slots` write lock.
    closed: AtomicBool,
}

impl ForwarderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot in the `Starting` state.
    ///
    /// Returns `None` if the key is taken or the registry is closed.
    pub async fn reserve(&self, key: &str) -> Option<Reservation> {
        let mut slots = self.slots.write().await;
        if self.closed.load(Ordering::Acquire) || slots.contains_key(key) {
            return None;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        slots.insert(
            key.to_string(),
            Slot {
                generation,
                state: WorkerState::Starting,
                cancel: cancel.clone(),
                handle: None,
            },
        );

        Some(Reservation {
            key: key.to_string(),
            generation,
            cancel,
        })
    }

    /// Attach the spawned task to its slot.
    ///
    /// If the slot is already gone (stopped, or the worker finished first) the
    /// handle is dropped, which detaches the task without aborting it.
    pub async fn attach(&self, reservation: &Reservation, handle: JoinHandle<()>) {
        let mut slots = self.slots.write().await;
        match slots.get_mut(&reservation.key) {
            Some(slot) if slot.generation == reservation.generation => slot.handle = Some(handle),
            _ => {}
        }
    }

    /// Promote a reserved slot to `Running`. Returns false if it was removed meanwhile.
    pub async fn mark_running(&self, reservation: &Reservation) -> bool {
        let mut slots = self.slots.write().await;
        match slots.get_mut(&reservation.key) {
            Some(slot) if slot.generation == reservation.generation => {
                slot.state = WorkerState::Running;
                true
            }
            _ => false,
        }
    }

    /// Remove the slot if it still belongs to this reservation.
    pub async fn release(&self, reservation: &Reservation) -> bool {
        let mut slots = self.slots.write().await;
        match slots.get(&reservation.key) {
            Some(slot) if slot.generation == reservation.generation => {
                slots.remove(&reservation.key);
                true
            }
            _ => false,
        }
    }

    /// Remove every slot whose key ends with `rule_id`.
    pub async fn take_matching(&self, rule_id: &str) -> Vec<Detached> {
        let mut slots = self.slots.write().await;
        let keys: Vec<String> = slots
            .keys()
            .filter(|k| k.ends_with(rule_id))
            .cloned()
            .collect();

        keys.into_iter()
            .filter_map(|key| {
                slots.remove(&key).map(|slot| Detached {
                    key,
                    cancel: slot.cancel,
                    handle: slot.handle,
                })
            })
            .collect()
    }

    /// Refuse further reservations and remove every slot.
    pub async fn close(&self) -> Vec<Detached> {
        let mut slots = self.slots.write().await;
        self.closed.store(true, Ordering::Release);
        slots
            .drain()
            .map(|(key, slot)| Detached {
                key,
                cancel: slot.cancel,
                handle: slot.handle,
            })
            .collect()
    }

    /// Current state of the worker registered for `rule_id`, if any.
    pub async fn state_of(&self, rule_id: &str) -> Option<WorkerState> {
        let slots = self.slots.read().await;
        slots
            .iter()
            .find(|(k, _)| k.ends_with(rule_id))
            .map(|(_, slot)| slot.state)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }
}
