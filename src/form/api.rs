use std::sync::Arc;

use super::engine::{FormEngine, WeakFormEngine};
use super::mutation::SetOptions;
use crate::error::{FormError, FormResult};
use crate::services::{FormEvent, ListenerResult, Subscription};
use crate::state::{ErrorMap, FieldState, FormState};
use crate::value::FormValue;

/// Facade handed to bindings and validators. It exposes no services and no
/// way to replace the value tree wholesale. Holds the engine weakly.
#[derive(Debug)]
pub struct FormApi {
    engine: WeakFormEngine,
}

impl FormApi {
    pub(super) fn new(engine: WeakFormEngine) -> Self {
        Self { engine }
    }

    fn engine(&self) -> FormResult<FormEngine> {
        self.engine.upgrade().ok_or(FormError::EngineDropped)
    }

    pub fn get(&self, path: impl AsRef<str>) -> FormResult<FormValue> {
        self.engine()?.get(path)
    }

    pub fn set(
        &self,
        path: impl AsRef<str>,
        value: impl Into<FormValue>,
        options: SetOptions,
    ) -> FormResult<()> {
        self.engine()?.set(path, value, options)
    }

    pub fn values(&self) -> FormResult<FormValue> {
        self.engine()?.values()
    }

    pub fn set_many<P, V>(&self, updates: impl IntoIterator<Item = (P, V)>) -> FormResult<()>
    where
        P: AsRef<str>,
        V: Into<FormValue>,
    {
        self.engine()?.set_many(updates)
    }

    pub fn errors(&self) -> FormResult<ErrorMap> {
        self.engine()?.errors()
    }

    pub fn touch(&self, path: impl AsRef<str>) -> FormResult<()> {
        self.engine()?.touch(path)
    }

    pub fn focus(&self, path: impl AsRef<str>) -> FormResult<()> {
        self.engine()?.focus(path)
    }

    pub fn blur(&self) -> FormResult<()> {
        self.engine()?.blur()
    }

    pub fn validate_all(&self) -> FormResult<bool> {
        self.engine()?.validate_all()
    }

    pub fn form_state(&self) -> FormResult<Arc<FormState>> {
        self.engine()?.form_state()
    }

    pub fn field_state(&self, path: impl AsRef<str>) -> FormResult<FieldState> {
        self.engine()?.field_state(path)
    }

    pub fn on(
        &self,
        topic: impl AsRef<str>,
        listener: impl Fn(&FormEvent) -> ListenerResult + Send + Sync + 'static,
    ) -> FormResult<Subscription> {
        Ok(self.engine()?.on(topic, listener))
    }
}
