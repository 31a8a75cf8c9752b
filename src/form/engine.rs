use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use tracing::{debug, error};

use super::api::FormApi;
use crate::config::FormConfig;
use crate::error::{FormError, FormResult, read_lock, write_lock};
use crate::hash::hash_form_state;
use crate::path::get_by_path;
use crate::scheduler::{ManualScheduler, Scheduler};
use crate::services::{
    BatchService, BatchStats, Batcher, CacheService, CacheStats, EventBus, EventPayload,
    EventService, FieldValidation, FormEvent, ListenerResult, Operation, StateCache, Subscription,
    ValidationContext, ValidationService, ValueKey,
};
use crate::state::{ErrorMap, FieldState, FormState};
use crate::topics;
use crate::value::FormValue;

#[derive(Default)]
pub(super) struct EngineState {
    pub(super) initialized: bool,
    pub(super) config: FormConfig,
    pub(super) values: FormValue,
    pub(super) initial_values: FormValue,
    /// Bumped on every replacement of `values`; keys the value cache.
    pub(super) revision: u64,
    pub(super) errors: ErrorMap,
    pub(super) touched: BTreeSet<String>,
    pub(super) active: Option<String>,
    pub(super) submitting: bool,
}

pub(super) struct EngineInner {
    pub(super) state: RwLock<EngineState>,
    pub(super) events: Arc<dyn EventBus>,
    pub(super) cache: Arc<dyn StateCache>,
    pub(super) batcher: Arc<dyn Batcher>,
    pub(super) validation: Arc<dyn FieldValidation>,
    pub(super) scheduler: Arc<dyn Scheduler>,
    pub(super) api: OnceLock<Arc<FormApi>>,
}

/// Owns the value tree, error map, touched set, active field and submitting
/// flag of one form, and publishes every change through its event bus.
///
/// Cloning is cheap and yields another handle to the same form.
#[derive(Clone)]
pub struct FormEngine {
    pub(super) inner: Arc<EngineInner>,
}

#[derive(Clone)]
pub struct WeakFormEngine {
    inner: Weak<EngineInner>,
}

impl WeakFormEngine {
    pub fn upgrade(&self) -> Option<FormEngine> {
        self.inner.upgrade().map(|inner| FormEngine { inner })
    }
}

impl Debug for WeakFormEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakFormEngine")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

/// Replaces individual services of a [`FormEngine`]. Anything left unset
/// falls back to the crate's default implementation.
///
/// The default scheduler is a [`ManualScheduler`] nobody drives: queued
/// batches, debounced validation and deferred dirty checks only run once the
/// host calls `run_until_idle`, `advance` or awaits `run_realtime`. Pass a
/// shared handle through [`FormEngineBuilder::scheduler`] to drive it.
#[derive(Default)]
pub struct FormEngineBuilder {
    scheduler: Option<Arc<dyn Scheduler>>,
    events: Option<Arc<dyn EventBus>>,
    cache: Option<Arc<dyn StateCache>>,
    batcher: Option<Arc<dyn Batcher>>,
    validation: Option<Arc<dyn FieldValidation>>,
}

impl FormEngineBuilder {
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn StateCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn batcher(mut self, batcher: Arc<dyn Batcher>) -> Self {
        self.batcher = Some(batcher);
        self
    }

    pub fn validation(mut self, validation: Arc<dyn FieldValidation>) -> Self {
        self.validation = Some(validation);
        self
    }

    pub fn build(self) -> FormEngine {
        let scheduler: Arc<dyn Scheduler> = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Arc::new(ManualScheduler::new()),
        };
        let events: Arc<dyn EventBus> = match self.events {
            Some(events) => events,
            None => Arc::new(EventService::new()),
        };
        let cache: Arc<dyn StateCache> = match self.cache {
            Some(cache) => cache,
            None => Arc::new(CacheService::default()),
        };
        let batcher: Arc<dyn Batcher> = match self.batcher {
            Some(batcher) => batcher,
            None => Arc::new(BatchService::new(scheduler.clone())),
        };
        let validation: Arc<dyn FieldValidation> = match self.validation {
            Some(validation) => validation,
            None => Arc::new(ValidationService::new(scheduler.clone())),
        };

        let engine = FormEngine {
            inner: Arc::new(EngineInner {
                state: RwLock::new(EngineState::default()),
                events,
                cache,
                batcher,
                validation,
                scheduler,
                api: OnceLock::new(),
            }),
        };
        engine.wire_services();
        engine
    }
}

impl FormEngine {
    /// Engine with every default service. See [`FormEngineBuilder`] for how
    /// the default scheduler has to be driven.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> FormEngineBuilder {
        FormEngineBuilder::default()
    }

    pub fn downgrade(&self) -> WeakFormEngine {
        WeakFormEngine {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn wire_services(&self) {
        let weak = self.downgrade();
        self.inner.batcher.set_flush_handler(Arc::new(move |operations: Vec<Operation>| {
            let Some(engine) = weak.upgrade() else {
                return;
            };
            if let Err(error) = engine.emit_operations(&operations) {
                error!(error = %error, "failed to publish batched changes");
            }
        }));

        let weak = self.downgrade();
        self.inner
            .validation
            .set_context_provider(Some(Arc::new(move |path: &str| {
                let Some(engine) = weak.upgrade() else {
                    return ValidationContext::default();
                };
                ValidationContext {
                    field_state: engine.field_state(path).ok(),
                    api: engine.form_api().ok(),
                }
            })));

        let weak = self.downgrade();
        self.inner
            .validation
            .set_settle_handler(Some(Arc::new(move |path: &str, result: Option<String>| {
                let Some(engine) = weak.upgrade() else {
                    return;
                };
                if let Err(error) = engine.apply_validation_result(path, result) {
                    error!(path, error = %error, "failed to apply debounced validation");
                }
            })));
    }

    pub(super) fn state(&self) -> FormResult<RwLockReadGuard<'_, EngineState>> {
        let state = read_lock(&self.inner.state, "reading form state")?;
        if !state.initialized {
            return Err(FormError::NotInitialized);
        }
        Ok(state)
    }

    pub(super) fn state_mut(&self) -> FormResult<RwLockWriteGuard<'_, EngineState>> {
        let state = write_lock(&self.inner.state, "updating form state")?;
        if !state.initialized {
            return Err(FormError::NotInitialized);
        }
        Ok(state)
    }

    pub(super) fn emit(&self, topic: &str, payload: EventPayload) -> FormResult<()> {
        self.inner.events.emit(topic, payload).map(|_| ())
    }

    /// Resets all state, takes `initial_values` as both the current and the
    /// initial tree, and publishes `init`.
    pub fn init(&self, initial_values: impl Into<FormValue>, config: FormConfig) -> FormResult<&Self> {
        let values = initial_values.into();
        self.inner.batcher.clear();
        self.inner.validation.cleanup();
        let revision = {
            let mut state = write_lock(&self.inner.state, "initializing form")?;
            let revision = state.revision + 1;
            *state = EngineState {
                initialized: true,
                config: config.clone(),
                values: values.clone(),
                initial_values: values.clone(),
                revision,
                ..EngineState::default()
            };
            revision
        };
        self.inner.cache.invalidate();
        self.apply_config(&config);

        debug!(revision, ?config, "form engine initialized");
        self.emit(topics::INIT, EventPayload::Values(values))?;
        Ok(self)
    }

    /// Drops pending work and all form state. The engine must be initialized
    /// again before further use; validators stay registered.
    pub fn reset(&self) -> FormResult<()> {
        self.inner.batcher.dispose();
        self.inner.validation.cleanup();
        {
            let mut state = write_lock(&self.inner.state, "resetting form")?;
            let revision = state.revision + 1;
            *state = EngineState {
                revision,
                ..EngineState::default()
            };
        }
        self.inner.cache.invalidate();

        debug!("form engine reset");
        self.emit(topics::RESET, EventPayload::Empty)
    }

    fn apply_config(&self, config: &FormConfig) {
        self.inner.batcher.configure(config.batch_config());
        self.inner.cache.set_max_size(config.max_cache_size);
        self.inner
            .validation
            .set_default_debounce(config.validation_debounce());
        self.inner.events.configure(config.event_config());
    }

    /// Applies `update` to a copy of the current config, pushes the result
    /// to the services and publishes `config-update`.
    pub fn update_config(&self, update: impl FnOnce(&mut FormConfig)) -> FormResult<()> {
        let mut config = self.state()?.config.clone();
        update(&mut config);
        self.state_mut()?.config = config.clone();
        self.apply_config(&config);
        self.emit(topics::CONFIG_UPDATE, EventPayload::Config(config))
    }

    pub fn is_initialized(&self) -> bool {
        read_lock(&self.inner.state, "reading init flag").is_ok_and(|state| state.initialized)
    }

    pub fn config(&self) -> FormResult<FormConfig> {
        Ok(self.state()?.config.clone())
    }

    /// Reads `path` from the current tree. Missing paths read as `Null`.
    pub fn get(&self, path: impl AsRef<str>) -> FormResult<FormValue> {
        let path = path.as_ref();
        let (root, revision) = {
            let state = self.state()?;
            (state.values.clone(), state.revision)
        };
        let key = ValueKey {
            path: path.to_string(),
            revision,
        };
        if let Some(value) = self.inner.cache.value(&key) {
            return Ok(value);
        }
        let value = get_by_path(&root, path).cloned().unwrap_or_default();
        self.inner.cache.store_value(key, value.clone());
        Ok(value)
    }

    pub fn values(&self) -> FormResult<FormValue> {
        Ok(self.state()?.values.clone())
    }

    pub fn initial_values(&self) -> FormResult<FormValue> {
        Ok(self.state()?.initial_values.clone())
    }

    pub fn initial_value(&self, path: impl AsRef<str>) -> FormResult<FormValue> {
        let state = self.state()?;
        Ok(get_by_path(&state.initial_values, path.as_ref())
            .cloned()
            .unwrap_or_default())
    }

    pub fn errors(&self) -> FormResult<ErrorMap> {
        Ok(self.state()?.errors.clone())
    }

    pub fn error(&self, path: impl AsRef<str>) -> FormResult<Option<String>> {
        Ok(self.state()?.errors.get(path.as_ref()).cloned())
    }

    pub fn touched(&self) -> FormResult<Vec<String>> {
        Ok(self.state()?.touched.iter().cloned().collect())
    }

    pub fn is_touched(&self, path: impl AsRef<str>) -> FormResult<bool> {
        Ok(self.state()?.touched.contains(path.as_ref()))
    }

    pub fn active(&self) -> FormResult<Option<String>> {
        Ok(self.state()?.active.clone())
    }

    pub fn is_submitting(&self) -> FormResult<bool> {
        Ok(self.state()?.submitting)
    }

    /// Composite snapshot. Identical snapshots share one allocation while
    /// they stay in the form-state cache.
    pub fn form_state(&self) -> FormResult<Arc<FormState>> {
        let snapshot = {
            let state = self.state()?;
            FormState {
                values: state.values.clone(),
                errors: state.errors.clone(),
                touched: state.touched.iter().cloned().collect(),
                active: state.active.clone(),
                submitting: state.submitting,
                valid: state.errors.is_empty(),
                dirty: !state.touched.is_empty(),
                pristine: state.touched.is_empty(),
            }
        };

        let hash = hash_form_state(&snapshot);
        if let Some(cached) = self.inner.cache.form_state(hash) {
            if *cached == snapshot {
                return Ok(cached);
            }
        }
        let snapshot = Arc::new(snapshot);
        self.inner.cache.store_form_state(hash, snapshot.clone());
        Ok(snapshot)
    }

    pub fn field_state(&self, path: impl AsRef<str>) -> FormResult<FieldState> {
        let path = path.as_ref();
        let (value, initial_value, error, touched, active, is_equal) = {
            let state = self.state()?;
            (
                get_by_path(&state.values, path).cloned().unwrap_or_default(),
                get_by_path(&state.initial_values, path)
                    .cloned()
                    .unwrap_or_default(),
                state.errors.get(path).cloned(),
                state.touched.contains(path),
                state.active.as_deref() == Some(path),
                state.config.is_equal.clone(),
            )
        };
        let dirty = match is_equal {
            Some(is_equal) => !is_equal(&value, &initial_value),
            None => !value.same(&initial_value),
        };
        Ok(FieldState {
            name: path.to_string(),
            value,
            initial_value,
            dirty,
            error,
            touched,
            active,
        })
    }

    /// Narrow facade over this engine. Built once and shared afterwards.
    pub fn form_api(&self) -> FormResult<Arc<FormApi>> {
        drop(self.state()?);
        Ok(self
            .inner
            .api
            .get_or_init(|| Arc::new(FormApi::new(self.downgrade())))
            .clone())
    }

    pub fn on(
        &self,
        topic: impl AsRef<str>,
        listener: impl Fn(&FormEvent) -> ListenerResult + Send + Sync + 'static,
    ) -> Subscription {
        self.inner
            .events
            .on(topic.as_ref(), Arc::new(listener), None)
    }

    pub fn events(&self) -> Arc<dyn EventBus> {
        self.inner.events.clone()
    }

    pub fn scheduler(&self) -> Arc<dyn Scheduler> {
        self.inner.scheduler.clone()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn batch_stats(&self) -> BatchStats {
        self.inner.batcher.stats()
    }
}

impl Default for FormEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for FormEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("FormEngine");
        match read_lock(&self.inner.state, "formatting engine") {
            Ok(state) => debug
                .field("initialized", &state.initialized)
                .field("revision", &state.revision)
                .field("errors", &state.errors.len())
                .field("touched", &state.touched.len())
                .field("active", &state.active)
                .field("submitting", &state.submitting),
            Err(_) => debug.field("state", &"<poisoned>"),
        };
        debug.finish()
    }
}
