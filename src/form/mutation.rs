use std::sync::{Arc, Mutex};

use super::engine::FormEngine;
use crate::error::{FormError, FormResult, lock_recover};
use crate::path::{get_by_path, set_by_path};
use crate::services::{
    EventPayload, FlushHandler, Operation, ValidateOptions, ValidationMode,
};
use crate::topics;
use crate::value::FormValue;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SetOptions {
    /// Publish the change now instead of queueing it in the batcher.
    pub immediate: bool,
}

impl SetOptions {
    pub const IMMEDIATE: Self = Self { immediate: true };
}

impl FormEngine {
    pub fn set(
        &self,
        path: impl AsRef<str>,
        value: impl Into<FormValue>,
        options: SetOptions,
    ) -> FormResult<()> {
        let path = path.as_ref();
        let value = value.into();
        let (config, all_values) = {
            let mut state = self.state_mut()?;
            let next = set_by_path(&state.values, path, value.clone());
            state.values = next;
            state.revision += 1;
            (state.config.clone(), state.values.clone())
        };
        self.inner.cache.invalidate();

        if config.enable_validation && config.validate_on_change {
            let mut pending = self.inner.validation.validate_by_mode(
                path,
                &value,
                &all_values,
                ValidationMode::Change,
                ValidateOptions::default(),
            );
            if let Some(result) = pending.try_take() {
                self.apply_validation_result(path, result)?;
            }
        }

        let operation = Operation::new(path, value);
        if config.enable_batching && !options.immediate {
            self.inner.batcher.queue_operation(operation);
            Ok(())
        } else {
            self.emit_operations(&[operation])
        }
    }

    /// Applies `updates` in order. With batching on they are published as
    /// one change set.
    pub fn set_many<P, V>(&self, updates: impl IntoIterator<Item = (P, V)>) -> FormResult<()>
    where
        P: AsRef<str>,
        V: Into<FormValue>,
    {
        let updates = updates
            .into_iter()
            .map(|(path, value)| (path.as_ref().to_string(), value.into()))
            .collect::<Vec<_>>();
        let batching = self.state()?.config.enable_batching;

        if batching {
            self.batch(|engine| {
                updates
                    .into_iter()
                    .try_for_each(|(path, value)| engine.set(path, value, SetOptions::default()))
            })?
        } else {
            updates
                .into_iter()
                .try_for_each(|(path, value)| self.set(path, value, SetOptions::IMMEDIATE))
        }
    }

    /// Runs `body` with change publication held back, then publishes one
    /// aggregate change set for everything it queued. Nested calls run inline
    /// and join the outer batch.
    pub fn batch<R>(&self, body: impl FnOnce(&Self) -> R) -> FormResult<R> {
        drop(self.state()?);

        let collected: Arc<Mutex<Vec<Operation>>> = Arc::default();
        let sink = collected.clone();
        let on_flush: FlushHandler =
            Arc::new(move |operations: Vec<Operation>| lock_recover(&sink).extend(operations));

        let mut body = Some(body);
        let mut output = None;
        self.inner.batcher.batch(
            &mut || {
                if let Some(body) = body.take() {
                    output = Some(body(self));
                }
            },
            on_flush,
        );

        let operations = std::mem::take(&mut *lock_recover(&collected));
        self.emit_operations(&operations)?;
        output.ok_or(FormError::BatchNotRun)
    }

    /// Publishes the aggregate `change` first, then `change:<path>` per
    /// operation in queue order.
    pub(super) fn emit_operations(&self, operations: &[Operation]) -> FormResult<()> {
        if operations.is_empty() {
            return Ok(());
        }
        self.emit(topics::CHANGE, EventPayload::Changes(operations.to_vec()))?;
        for operation in operations {
            self.emit(
                &topics::field(topics::CHANGE, &operation.path),
                EventPayload::Change(operation.clone()),
            )?;
        }
        Ok(())
    }

    pub fn set_error(&self, path: impl AsRef<str>, error: impl Into<String>) -> FormResult<()> {
        let path = path.as_ref();
        let error = error.into();
        self.state_mut()?
            .errors
            .insert(path.to_string(), error.clone());
        self.emit_error(path, Some(error))
    }

    pub fn clear_error(&self, path: impl AsRef<str>) -> FormResult<()> {
        let path = path.as_ref();
        self.state_mut()?.errors.remove(path);
        self.emit_error(path, None)
    }

    fn emit_error(&self, path: &str, error: Option<String>) -> FormResult<()> {
        self.emit(
            topics::ERROR,
            EventPayload::Error {
                path: path.to_string(),
                error: error.clone(),
            },
        )?;
        self.emit(
            &topics::field(topics::ERROR, path),
            EventPayload::Error {
                path: path.to_string(),
                error,
            },
        )
    }

    /// A passing result only publishes when it clears an existing error.
    pub(super) fn apply_validation_result(
        &self,
        path: &str,
        result: Option<String>,
    ) -> FormResult<()> {
        match result {
            Some(error) => self.set_error(path, error),
            None => {
                let had_error = self.state()?.errors.contains_key(path);
                if had_error {
                    self.clear_error(path)
                } else {
                    Ok(())
                }
            }
        }
    }

    pub fn touch(&self, path: impl AsRef<str>) -> FormResult<()> {
        let path = path.as_ref();
        self.mark_touched(path)?;
        self.validate_for_blur(path)
    }

    pub(super) fn mark_touched(&self, path: &str) -> FormResult<()> {
        let touched = {
            let mut state = self.state_mut()?;
            state.touched.insert(path.to_string());
            state.touched.iter().cloned().collect::<Vec<_>>()
        };
        self.emit(
            &topics::field(topics::TOUCH, path),
            EventPayload::Field {
                path: Some(path.to_string()),
            },
        )?;
        self.emit(
            topics::TOUCH,
            EventPayload::Touch {
                path: path.to_string(),
                touched,
            },
        )
    }

    pub fn focus(&self, path: impl AsRef<str>) -> FormResult<()> {
        let path = path.as_ref().to_string();
        self.state_mut()?.active = Some(path.clone());
        self.emit(topics::FOCUS, EventPayload::Field { path: Some(path) })
    }

    /// Clears the active field and runs blur validation for the field left.
    pub fn blur(&self) -> FormResult<()> {
        let left = self.state_mut()?.active.take();
        self.emit(topics::BLUR, EventPayload::Field { path: left.clone() })?;
        match left {
            Some(path) => self.validate_for_blur(&path),
            None => Ok(()),
        }
    }

    fn validate_for_blur(&self, path: &str) -> FormResult<()> {
        let (enabled, all_values) = {
            let state = self.state()?;
            (
                state.config.enable_validation && state.config.validate_on_blur,
                state.values.clone(),
            )
        };
        if !enabled {
            return Ok(());
        }

        let value = get_by_path(&all_values, path).cloned().unwrap_or_default();
        let mut pending = self.inner.validation.validate_by_mode(
            path,
            &value,
            &all_values,
            ValidationMode::Blur,
            ValidateOptions::default(),
        );
        match pending.try_take() {
            Some(result) => self.apply_validation_result(path, result),
            None => Ok(()),
        }
    }
}
