use std::collections::{BTreeSet, HashMap};
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, error};

use crate::config::FormConfig;
use crate::error::{FormError, FormResult, lock_recover};
use crate::services::batch::Operation;
use crate::state::{ErrorMap, SubmitOutcome};
use crate::value::FormValue;

pub type ListenerResult = anyhow::Result<()>;
pub type Listener = Arc<dyn Fn(&FormEvent) -> ListenerResult + Send + Sync>;

static CONTEXT_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

/// Opaque grouping key for bulk unsubscription. The bus only records which
/// subscriptions carry a key; it never owns whatever the key stands for.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ContextKey(u64);

impl ContextKey {
    pub fn next() -> Self {
        Self(CONTEXT_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst))
    }
}

#[derive(Clone, Debug)]
pub struct FormEvent {
    pub topic: String,
    pub payload: EventPayload,
}

#[derive(Clone, Debug)]
pub enum EventPayload {
    Empty,
    Values(FormValue),
    Config(FormConfig),
    Changes(Vec<Operation>),
    Change(Operation),
    Error {
        path: String,
        error: Option<String>,
    },
    Touch {
        path: String,
        touched: Vec<String>,
    },
    Field {
        path: Option<String>,
    },
    Flag(bool),
    Active(Option<String>),
    Validation {
        errors: ErrorMap,
        valid: bool,
    },
    Submit {
        submitting: bool,
        outcome: Option<SubmitOutcome>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EventConfig {
    /// When `false`, the first failing listener aborts the emit and its error
    /// is returned to the emitter.
    pub isolate_listener_errors: bool,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            isolate_listener_errors: true,
        }
    }
}

/// Handle returned by [`EventBus::on`]. Dropping it keeps the subscription.
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() -> bool + Send + Sync>>,
}

impl Subscription {
    pub fn new(remove: impl FnOnce() -> bool + Send + Sync + 'static) -> Self {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    pub fn noop() -> Self {
        Self { remove: None }
    }

    /// Returns `true` if the listener was still registered.
    pub fn unsubscribe(mut self) -> bool {
        self.remove.take().is_some_and(|remove| remove())
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

pub trait EventBus: Send + Sync {
    fn on(&self, topic: &str, listener: Listener, context: Option<ContextKey>) -> Subscription;
    /// Returns how many listeners ran.
    fn emit(&self, topic: &str, payload: EventPayload) -> FormResult<usize>;
    fn cleanup_context(&self, context: ContextKey) -> usize;
    fn remove_all_listeners(&self) -> usize;
    fn listener_count(&self, topic: &str) -> usize;
    fn configure(&self, config: EventConfig);
}

struct ListenerEntry {
    id: u64,
    listener: Listener,
    context: Option<ContextKey>,
}

#[derive(Default)]
struct BusState {
    next_id: u64,
    config: EventConfig,
    topics: HashMap<String, Vec<ListenerEntry>>,
    contexts: HashMap<ContextKey, BTreeSet<(String, u64)>>,
}

impl BusState {
    fn remove(&mut self, topic: &str, id: u64) -> bool {
        let Some(entries) = self.topics.get_mut(topic) else {
            return false;
        };
        let Some(position) = entries.iter().position(|entry| entry.id == id) else {
            return false;
        };
        let entry = entries.remove(position);
        if entries.is_empty() {
            self.topics.remove(topic);
        }
        if let Some(context) = entry.context {
            if let Some(index) = self.contexts.get_mut(&context) {
                index.remove(&(topic.to_string(), id));
                if index.is_empty() {
                    self.contexts.remove(&context);
                }
            }
        }
        true
    }
}

#[derive(Clone, Default)]
pub struct EventService {
    state: Arc<Mutex<BusState>>,
}

impl EventService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EventConfig) -> Self {
        let service = Self::default();
        service.configure(config);
        service
    }

    pub fn tracked_contexts(&self) -> usize {
        lock_recover(&self.state).contexts.len()
    }
}

impl EventBus for EventService {
    fn on(&self, topic: &str, listener: Listener, context: Option<ContextKey>) -> Subscription {
        let id = {
            let mut state = lock_recover(&self.state);
            state.next_id += 1;
            let id = state.next_id;
            state
                .topics
                .entry(topic.to_string())
                .or_default()
                .push(ListenerEntry {
                    id,
                    listener,
                    context,
                });
            if let Some(context) = context {
                state
                    .contexts
                    .entry(context)
                    .or_default()
                    .insert((topic.to_string(), id));
            }
            id
        };

        let weak: Weak<Mutex<BusState>> = Arc::downgrade(&self.state);
        let topic = topic.to_string();
        Subscription::new(move || {
            weak.upgrade()
                .is_some_and(|state| lock_recover(&state).remove(&topic, id))
        })
    }

    fn emit(&self, topic: &str, payload: EventPayload) -> FormResult<usize> {
        let (listeners, config) = {
            let state = lock_recover(&self.state);
            let listeners = state
                .topics
                .get(topic)
                .map(|entries| {
                    entries
                        .iter()
                        .map(|entry| entry.listener.clone())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            (listeners, state.config)
        };
        if listeners.is_empty() {
            return Ok(0);
        }

        let event = FormEvent {
            topic: topic.to_string(),
            payload,
        };
        let mut ran = 0;
        for listener in listeners {
            ran += 1;
            if let Err(failure) = listener(&event) {
                if !config.isolate_listener_errors {
                    return Err(FormError::Listener {
                        topic: topic.to_string(),
                        message: failure.to_string(),
                    });
                }
                error!(topic, error = %failure, "event listener failed");
            }
        }
        Ok(ran)
    }

    fn cleanup_context(&self, context: ContextKey) -> usize {
        let mut state = lock_recover(&self.state);
        let Some(index) = state.contexts.remove(&context) else {
            return 0;
        };
        let mut removed = 0;
        for (topic, id) in index {
            if let Some(entries) = state.topics.get_mut(&topic) {
                let before = entries.len();
                entries.retain(|entry| entry.id != id);
                removed += before - entries.len();
                if entries.is_empty() {
                    state.topics.remove(&topic);
                }
            }
        }
        debug!(?context, removed, "context subscriptions cleaned up");
        removed
    }

    fn remove_all_listeners(&self) -> usize {
        let mut state = lock_recover(&self.state);
        let removed = state.topics.values().map(Vec::len).sum();
        state.topics.clear();
        state.contexts.clear();
        removed
    }

    fn listener_count(&self, topic: &str) -> usize {
        lock_recover(&self.state)
            .topics
            .get(topic)
            .map_or(0, Vec::len)
    }

    fn configure(&self, config: EventConfig) {
        lock_recover(&self.state).config = config;
    }
}

/// Owns a fresh [`ContextKey`] and removes every subscription made through it
/// when dropped.
pub struct EventScope {
    key: ContextKey,
    bus: Arc<dyn EventBus>,
}

impl EventScope {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            key: ContextKey::next(),
            bus,
        }
    }

    pub fn key(&self) -> ContextKey {
        self.key
    }

    pub fn on(
        &self,
        topic: &str,
        listener: impl Fn(&FormEvent) -> ListenerResult + Send + Sync + 'static,
    ) -> Subscription {
        self.bus.on(topic, Arc::new(listener), Some(self.key))
    }

    pub fn emit(&self, topic: &str, payload: EventPayload) -> FormResult<usize> {
        self.bus.emit(topic, payload)
    }
}

impl Drop for EventScope {
    fn drop(&mut self) {
        self.bus.cleanup_context(self.key);
    }
}
