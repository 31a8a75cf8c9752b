use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::channel::oneshot;
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::error::{lock_recover, read_recover, write_recover};
use crate::form::FormApi;
use crate::path::get_by_path;
use crate::scheduler::{Scheduler, TaskHandle};
use crate::state::{ErrorMap, FieldState};
use crate::value::FormValue;

pub type ValidatorFn = Arc<
    dyn Fn(&FormValue, &FormValue, &ValidationContext) -> anyhow::Result<Option<String>>
        + Send
        + Sync,
>;
pub type ContextProvider = Arc<dyn Fn(&str) -> ValidationContext + Send + Sync>;
/// Observes the result of every debounced run once it settles.
pub type SettleHandler = Arc<dyn Fn(&str, Option<String>) + Send + Sync>;

type RunFn = Arc<dyn Fn(&FormValue, &FormValue) -> Option<String> + Send + Sync>;

pub fn validator_fn<F>(validator: F) -> ValidatorFn
where
    F: Fn(&FormValue, &FormValue, &ValidationContext) -> anyhow::Result<Option<String>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(validator)
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum ValidationMode {
    Change,
    #[default]
    Blur,
    Submit,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecutionStrategy {
    Immediate,
    Debounced(Duration),
}

impl ValidationMode {
    pub fn strategy(self, debounce: Duration) -> ExecutionStrategy {
        match self {
            ValidationMode::Change if !debounce.is_zero() => ExecutionStrategy::Debounced(debounce),
            ValidationMode::Change | ValidationMode::Blur | ValidationMode::Submit => {
                ExecutionStrategy::Immediate
            }
        }
    }
}

/// Extra information handed to validators when a context provider is set.
#[derive(Clone, Default)]
pub struct ValidationContext {
    pub field_state: Option<FieldState>,
    pub api: Option<Arc<FormApi>>,
}

impl Debug for ValidationContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationContext")
            .field("field_state", &self.field_state)
            .field("api", &self.api.is_some())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ValidateOptions {
    /// Overrides the service-wide debounce for change-mode validation.
    pub debounce: Option<Duration>,
}

/// Result of [`FieldValidation::validate_by_mode`]. Immediate strategies are
/// settled on return; debounced ones settle when the trailing run completes.
/// Awaiting a skipped or cancelled validation yields `None`.
pub struct PendingValidation {
    state: PendingState,
}

enum PendingState {
    Skipped,
    Ready(Option<String>),
    Waiting(oneshot::Receiver<Option<String>>),
    Taken,
}

impl PendingValidation {
    pub fn skipped() -> Self {
        Self {
            state: PendingState::Skipped,
        }
    }

    pub fn ready(result: Option<String>) -> Self {
        Self {
            state: PendingState::Ready(result),
        }
    }

    fn waiting(receiver: oneshot::Receiver<Option<String>>) -> Self {
        Self {
            state: PendingState::Waiting(receiver),
        }
    }

    /// The validator's mode did not match the requested one.
    pub fn is_skipped(&self) -> bool {
        matches!(self.state, PendingState::Skipped)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, PendingState::Waiting(_))
    }

    /// Takes the settled result, if there is one yet.
    pub fn try_take(&mut self) -> Option<Option<String>> {
        match std::mem::replace(&mut self.state, PendingState::Taken) {
            PendingState::Ready(result) => Some(result),
            PendingState::Waiting(mut receiver) => match receiver.try_recv() {
                Ok(Some(result)) => Some(result),
                Ok(None) => {
                    self.state = PendingState::Waiting(receiver);
                    None
                }
                Err(oneshot::Canceled) => None,
            },
            other => {
                self.state = other;
                None
            }
        }
    }
}

impl Future for PendingValidation {
    type Output = Option<String>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let output = match &mut this.state {
            PendingState::Skipped | PendingState::Taken => None,
            PendingState::Ready(result) => result.take(),
            PendingState::Waiting(receiver) => match Pin::new(receiver).poll(cx) {
                Poll::Ready(result) => result.unwrap_or(None),
                Poll::Pending => return Poll::Pending,
            },
        };
        this.state = PendingState::Taken;
        Poll::Ready(output)
    }
}

impl Debug for PendingValidation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            PendingState::Skipped => "skipped",
            PendingState::Ready(_) => "ready",
            PendingState::Waiting(_) => "waiting",
            PendingState::Taken => "taken",
        };
        f.debug_struct("PendingValidation")
            .field("state", &state)
            .finish()
    }
}

pub trait FieldValidation: Send + Sync {
    fn register_validator(&self, path: &str, validator: ValidatorFn, mode: ValidationMode);
    fn unregister_validator(&self, path: &str) -> bool;
    fn has_validator(&self, path: &str) -> bool;
    fn validator_mode(&self, path: &str) -> Option<ValidationMode>;
    /// Runs the validator for `path` now, regardless of its mode.
    fn validate_field(&self, path: &str, value: &FormValue, all_values: &FormValue)
    -> Option<String>;
    /// Runs every validator in registration order; only failures are returned.
    fn validate_all(&self, all_values: &FormValue) -> ErrorMap;
    fn validate_by_mode(
        &self,
        path: &str,
        value: &FormValue,
        all_values: &FormValue,
        mode: ValidationMode,
        options: ValidateOptions,
    ) -> PendingValidation;
    fn set_context_provider(&self, provider: Option<ContextProvider>);
    fn set_settle_handler(&self, handler: Option<SettleHandler>);
    fn set_default_debounce(&self, debounce: Duration);
    /// Cancels every outstanding debounced run.
    fn cleanup(&self);
}

#[derive(Default)]
struct RunnerState {
    last_value: Option<FormValue>,
    last_result: Option<String>,
    timer: Option<TaskHandle>,
    waiters: Vec<oneshot::Sender<Option<String>>>,
}

/// Trailing-edge debouncer for one field's change validation.
pub struct DebouncedRunner {
    path: String,
    scheduler: Arc<dyn Scheduler>,
    run: RunFn,
    state: Mutex<RunnerState>,
}

impl DebouncedRunner {
    fn new(path: &str, scheduler: Arc<dyn Scheduler>, run: RunFn) -> Arc<Self> {
        Arc::new(Self {
            path: path.to_string(),
            scheduler,
            run,
            state: Mutex::new(RunnerState::default()),
        })
    }

    pub fn call(
        self: &Arc<Self>,
        value: FormValue,
        all_values: FormValue,
        delay: Duration,
    ) -> PendingValidation {
        let mut state = lock_recover(&self.state);
        if state
            .last_value
            .as_ref()
            .is_some_and(|last| last.same(&value))
        {
            if state.timer.is_none() {
                return PendingValidation::ready(state.last_result.clone());
            }
            let (sender, receiver) = oneshot::channel();
            state.waiters.push(sender);
            return PendingValidation::waiting(receiver);
        }

        state.last_value = Some(value.clone());
        if let Some(previous) = state.timer.take() {
            self.scheduler.cancel(previous);
        }
        let (sender, receiver) = oneshot::channel();
        state.waiters.push(sender);

        let weak: Weak<Self> = Arc::downgrade(self);
        state.timer = Some(self.scheduler.delay(
            delay,
            Box::new(move || {
                if let Some(runner) = weak.upgrade() {
                    runner.fire(&value, &all_values);
                }
            }),
        ));
        debug!(path = %self.path, ?delay, "debounced validation scheduled");
        PendingValidation::waiting(receiver)
    }

    fn fire(&self, value: &FormValue, all_values: &FormValue) {
        let waiters = {
            let mut state = lock_recover(&self.state);
            state.timer = None;
            std::mem::take(&mut state.waiters)
        };
        let result = (self.run)(value, all_values);
        lock_recover(&self.state).last_result = result.clone();
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    pub fn is_pending(&self) -> bool {
        lock_recover(&self.state).timer.is_some()
    }

    /// Cancels the outstanding timer and forgets the last run. Callers
    /// awaiting the cancelled run resolve with `None`.
    pub fn cleanup(&self) {
        let mut state = lock_recover(&self.state);
        if let Some(timer) = state.timer.take() {
            self.scheduler.cancel(timer);
        }
        state.waiters.clear();
        state.last_value = None;
        state.last_result = None;
    }
}

struct ValidatorEntry {
    validator: ValidatorFn,
    mode: ValidationMode,
}

struct ValidationShared {
    registry: RwLock<IndexMap<String, ValidatorEntry>>,
    runners: Mutex<HashMap<String, Arc<DebouncedRunner>>>,
    context_provider: RwLock<Option<ContextProvider>>,
    settle_handler: RwLock<Option<SettleHandler>>,
    default_debounce: RwLock<Duration>,
    scheduler: Arc<dyn Scheduler>,
}

impl ValidationShared {
    fn validate_field(&self, path: &str, value: &FormValue, all_values: &FormValue) -> Option<String> {
        let validator = read_recover(&self.registry)
            .get(path)
            .map(|entry| entry.validator.clone())?;
        let provider = read_recover(&self.context_provider).clone();
        let context = provider.map(|provider| provider(path)).unwrap_or_default();

        match validator(value, all_values, &context) {
            Ok(Some(message)) if !message.is_empty() => Some(message),
            Ok(_) => None,
            Err(error) => {
                warn!(path, error = %error, "validator failed");
                Some(error.to_string())
            }
        }
    }

    fn drop_runner(&self, path: &str) {
        if let Some(runner) = lock_recover(&self.runners).remove(path) {
            runner.cleanup();
        }
    }
}

#[derive(Clone)]
pub struct ValidationService {
    shared: Arc<ValidationShared>,
}

impl ValidationService {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            shared: Arc::new(ValidationShared {
                registry: RwLock::new(IndexMap::new()),
                runners: Mutex::new(HashMap::new()),
                context_provider: RwLock::new(None),
                settle_handler: RwLock::new(None),
                default_debounce: RwLock::new(Duration::ZERO),
                scheduler,
            }),
        }
    }

    pub fn runner(&self, path: &str) -> Option<Arc<DebouncedRunner>> {
        lock_recover(&self.shared.runners).get(path).cloned()
    }

    fn runner_or_create(&self, path: &str) -> Arc<DebouncedRunner> {
        let mut runners = lock_recover(&self.shared.runners);
        runners
            .entry(path.to_string())
            .or_insert_with(|| {
                let weak = Arc::downgrade(&self.shared);
                let owned_path = path.to_string();
                let run: RunFn = Arc::new(move |value: &FormValue, all_values: &FormValue| {
                    let shared = weak.upgrade()?;
                    let result = shared.validate_field(&owned_path, value, all_values);
                    let handler = read_recover(&shared.settle_handler).clone();
                    if let Some(handler) = handler {
                        handler(&owned_path, result.clone());
                    }
                    result
                });
                DebouncedRunner::new(path, self.shared.scheduler.clone(), run)
            })
            .clone()
    }
}

impl FieldValidation for ValidationService {
    fn register_validator(&self, path: &str, validator: ValidatorFn, mode: ValidationMode) {
        self.shared.drop_runner(path);
        write_recover(&self.shared.registry)
            .insert(path.to_string(), ValidatorEntry { validator, mode });
    }

    fn unregister_validator(&self, path: &str) -> bool {
        self.shared.drop_runner(path);
        write_recover(&self.shared.registry)
            .shift_remove(path)
            .is_some()
    }

    fn has_validator(&self, path: &str) -> bool {
        read_recover(&self.shared.registry).contains_key(path)
    }

    fn validator_mode(&self, path: &str) -> Option<ValidationMode> {
        read_recover(&self.shared.registry)
            .get(path)
            .map(|entry| entry.mode)
    }

    fn validate_field(
        &self,
        path: &str,
        value: &FormValue,
        all_values: &FormValue,
    ) -> Option<String> {
        self.shared.validate_field(path, value, all_values)
    }

    fn validate_all(&self, all_values: &FormValue) -> ErrorMap {
        let paths = read_recover(&self.shared.registry)
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        let mut errors = ErrorMap::new();
        for path in paths {
            let value = get_by_path(all_values, &path).cloned().unwrap_or_default();
            if let Some(error) = self.shared.validate_field(&path, &value, all_values) {
                errors.insert(path, error);
            }
        }
        errors
    }

    fn validate_by_mode(
        &self,
        path: &str,
        value: &FormValue,
        all_values: &FormValue,
        mode: ValidationMode,
        options: ValidateOptions,
    ) -> PendingValidation {
        if self.validator_mode(path) != Some(mode) {
            return PendingValidation::skipped();
        }

        let debounce = options
            .debounce
            .unwrap_or_else(|| *read_recover(&self.shared.default_debounce));
        match mode.strategy(debounce) {
            ExecutionStrategy::Immediate => {
                PendingValidation::ready(self.shared.validate_field(path, value, all_values))
            }
            ExecutionStrategy::Debounced(delay) => {
                self.runner_or_create(path)
                    .call(value.clone(), all_values.clone(), delay)
            }
        }
    }

    fn set_context_provider(&self, provider: Option<ContextProvider>) {
        *write_recover(&self.shared.context_provider) = provider;
    }

    fn set_settle_handler(&self, handler: Option<SettleHandler>) {
        *write_recover(&self.shared.settle_handler) = handler;
    }

    fn set_default_debounce(&self, debounce: Duration) {
        *write_recover(&self.shared.default_debounce) = debounce;
    }

    fn cleanup(&self) {
        let runners = lock_recover(&self.shared.runners)
            .values()
            .cloned()
            .collect::<Vec<_>>();
        for runner in runners {
            runner.cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;
    use futures::executor::block_on;
    use serde_json::json;

    fn required() -> ValidatorFn {
        validator_fn(|value, _, _| Ok(value.is_blank().then(|| "required".to_string())))
    }

    fn service() -> (Arc<ManualScheduler>, ValidationService) {
        let scheduler = Arc::new(ManualScheduler::new());
        let service = ValidationService::new(scheduler.clone());
        (scheduler, service)
    }

    #[test]
    fn results_are_normalized() {
        let (_, service) = service();
        service.register_validator(
            "empty",
            validator_fn(|_, _, _| Ok(Some(String::new()))),
            ValidationMode::Blur,
        );
        service.register_validator(
            "failing",
            validator_fn(|_, _, _| Err(anyhow::anyhow!("lookup exploded"))),
            ValidationMode::Blur,
        );
        service.register_validator("name", required(), ValidationMode::Blur);

        let values = FormValue::Null;
        assert_eq!(service.validate_field("empty", &values, &values), None);
        assert_eq!(
            service.validate_field("failing", &values, &values),
            Some("lookup exploded".to_string())
        );
        assert_eq!(
            service.validate_field("name", &FormValue::from(""), &values),
            Some("required".to_string())
        );
        assert_eq!(service.validate_field("unknown", &values, &values), None);
    }

    #[test]
    fn last_registration_wins() {
        let (_, service) = service();
        service.register_validator("name", required(), ValidationMode::Blur);
        service.register_validator(
            "name",
            validator_fn(|_, _, _| Ok(Some("replaced".into()))),
            ValidationMode::Submit,
        );
        assert_eq!(service.validator_mode("name"), Some(ValidationMode::Submit));
        assert_eq!(
            service.validate_field("name", &FormValue::from("x"), &FormValue::Null),
            Some("replaced".to_string())
        );
    }

    #[test]
    fn validate_all_reports_only_failures() {
        let (_, service) = service();
        service.register_validator("name", required(), ValidationMode::Blur);
        service.register_validator("email", required(), ValidationMode::Change);
        service.register_validator(
            "broken",
            validator_fn(|_, _, _| Err(anyhow::anyhow!("broken validator"))),
            ValidationMode::Submit,
        );
        let values = FormValue::from(json!({ "name": "Ada", "email": "" }));

        let errors = service.validate_all(&values);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors.get("email").map(String::as_str), Some("required"));
        assert_eq!(
            errors.get("broken").map(String::as_str),
            Some("broken validator")
        );
    }

    #[test]
    fn mode_mismatch_is_skipped() {
        let (_, service) = service();
        service.register_validator("name", required(), ValidationMode::Blur);
        let values = FormValue::Null;

        let mut pending = service.validate_by_mode(
            "name",
            &values,
            &values,
            ValidationMode::Change,
            ValidateOptions::default(),
        );
        assert!(pending.is_skipped());
        assert_eq!(pending.try_take(), None);

        let mut pending = service.validate_by_mode(
            "name",
            &values,
            &values,
            ValidationMode::Blur,
            ValidateOptions::default(),
        );
        assert_eq!(pending.try_take(), Some(Some("required".to_string())));
    }

    #[test]
    fn debounced_change_runs_once_with_latest_value() {
        let (scheduler, service) = service();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            service.register_validator(
                "name",
                validator_fn(move |value, _, _| {
                    seen.lock().expect("seen lock").push(value.clone());
                    Ok(value.is_blank().then(|| "required".to_string()))
                }),
                ValidationMode::Change,
            );
        }
        service.set_default_debounce(Duration::from_millis(100));
        let all = FormValue::Null;

        let first = service.validate_by_mode(
            "name",
            &"a".into(),
            &all,
            ValidationMode::Change,
            ValidateOptions::default(),
        );
        scheduler.advance(Duration::from_millis(40));
        let _second = service.validate_by_mode(
            "name",
            &"ab".into(),
            &all,
            ValidationMode::Change,
            ValidateOptions::default(),
        );
        scheduler.advance(Duration::from_millis(40));
        let third = service.validate_by_mode(
            "name",
            &"abc".into(),
            &all,
            ValidationMode::Change,
            ValidateOptions::default(),
        );
        assert!(third.is_pending());
        assert!(seen.lock().expect("seen lock").is_empty());

        scheduler.advance(Duration::from_millis(100));
        assert_eq!(*seen.lock().expect("seen lock"), vec![FormValue::from("abc")]);
        assert_eq!(block_on(third), None);
        assert_eq!(block_on(first), None);
    }

    #[test]
    fn identical_value_does_not_reschedule() {
        let (scheduler, service) = service();
        let calls = Arc::new(Mutex::new(0_usize));
        {
            let calls = calls.clone();
            service.register_validator(
                "name",
                validator_fn(move |_, _, _| {
                    *calls.lock().expect("calls lock") += 1;
                    Ok(Some("taken".into()))
                }),
                ValidationMode::Change,
            );
        }
        let options = ValidateOptions {
            debounce: Some(Duration::from_millis(50)),
        };
        let all = FormValue::Null;

        let _first =
            service.validate_by_mode("name", &"x".into(), &all, ValidationMode::Change, options);
        scheduler.advance(Duration::from_millis(30));
        let joined =
            service.validate_by_mode("name", &"x".into(), &all, ValidationMode::Change, options);
        scheduler.advance(Duration::from_millis(20));
        assert_eq!(*calls.lock().expect("calls lock"), 1);
        assert_eq!(block_on(joined), Some("taken".to_string()));

        let mut repeat =
            service.validate_by_mode("name", &"x".into(), &all, ValidationMode::Change, options);
        assert_eq!(repeat.try_take(), Some(Some("taken".to_string())));
        assert_eq!(scheduler.pending_timers(), 0);
    }

    #[test]
    fn cleanup_cancels_outstanding_timer() {
        let (scheduler, service) = service();
        let calls = Arc::new(Mutex::new(0_usize));
        {
            let calls = calls.clone();
            service.register_validator(
                "name",
                validator_fn(move |_, _, _| {
                    *calls.lock().expect("calls lock") += 1;
                    Ok(None)
                }),
                ValidationMode::Change,
            );
        }
        service.set_default_debounce(Duration::from_millis(10));
        let pending = service.validate_by_mode(
            "name",
            &"x".into(),
            &FormValue::Null,
            ValidationMode::Change,
            ValidateOptions::default(),
        );
        service.runner("name").expect("runner exists").cleanup();
        scheduler.advance(Duration::from_millis(100));

        assert_eq!(*calls.lock().expect("calls lock"), 0);
        assert_eq!(block_on(pending), None);
    }

    #[test]
    fn cleanup_forgets_the_last_value() {
        let (scheduler, service) = service();
        service.register_validator("name", required(), ValidationMode::Change);
        service.set_default_debounce(Duration::from_millis(10));
        let blank = || {
            service.validate_by_mode(
                "name",
                &FormValue::from(""),
                &FormValue::Null,
                ValidationMode::Change,
                ValidateOptions::default(),
            )
        };

        let _ = blank();
        service.cleanup();
        let pending = blank();
        assert!(pending.is_pending());
        scheduler.advance(Duration::from_millis(10));

        assert_eq!(block_on(pending), Some("required".to_string()));
    }

    #[test]
    fn settle_handler_sees_debounced_results() {
        let (scheduler, service) = service();
        service.register_validator("name", required(), ValidationMode::Change);
        service.set_default_debounce(Duration::from_millis(5));
        let settled = Arc::new(Mutex::new(Vec::new()));
        {
            let settled = settled.clone();
            service.set_settle_handler(Some(Arc::new(move |path: &str, result: Option<String>| {
                settled
                    .lock()
                    .expect("settled lock")
                    .push((path.to_string(), result));
            })));
        }

        let _pending = service.validate_by_mode(
            "name",
            &"".into(),
            &FormValue::Null,
            ValidationMode::Change,
            ValidateOptions::default(),
        );
        scheduler.advance(Duration::from_millis(5));
        assert_eq!(
            *settled.lock().expect("settled lock"),
            vec![("name".to_string(), Some("required".to_string()))]
        );
    }

    #[test]
    fn context_provider_feeds_validators() {
        let (_, service) = service();
        service.set_context_provider(Some(Arc::new(|path: &str| ValidationContext {
            field_state: Some(FieldState {
                name: path.to_string(),
                value: FormValue::Null,
                initial_value: FormValue::Null,
                dirty: false,
                error: None,
                touched: true,
                active: false,
            }),
            api: None,
        })));
        service.register_validator(
            "name",
            validator_fn(|_, _, context| {
                let touched = context
                    .field_state
                    .as_ref()
                    .is_some_and(|state| state.touched);
                Ok(touched.then(|| "seen as touched".to_string()))
            }),
            ValidationMode::Blur,
        );
        assert_eq!(
            service.validate_field("name", &FormValue::Null, &FormValue::Null),
            Some("seen as touched".to_string())
        );
    }

    #[test]
    fn strategy_table_is_per_mode() {
        let delay = Duration::from_millis(10);
        assert_eq!(
            ValidationMode::Change.strategy(delay),
            ExecutionStrategy::Debounced(delay)
        );
        assert_eq!(
            ValidationMode::Change.strategy(Duration::ZERO),
            ExecutionStrategy::Immediate
        );
        assert_eq!(ValidationMode::Blur.strategy(delay), ExecutionStrategy::Immediate);
        assert_eq!(
            ValidationMode::Submit.strategy(delay),
            ExecutionStrategy::Immediate
        );
    }
}
