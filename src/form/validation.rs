use super::engine::FormEngine;
use crate::error::FormResult;
use crate::path::get_by_path;
use crate::services::{EventPayload, ValidationMode, ValidatorFn};
use crate::topics;

impl FormEngine {
    /// Registers `validator` for `path`, replacing any earlier one. The
    /// registry survives `reset`, so this works before `init`.
    pub fn register_validator(
        &self,
        path: impl AsRef<str>,
        validator: ValidatorFn,
        mode: ValidationMode,
    ) {
        self.inner
            .validation
            .register_validator(path.as_ref(), validator, mode);
    }

    pub fn has_validator(&self, path: impl AsRef<str>) -> bool {
        self.inner.validation.has_validator(path.as_ref())
    }

    pub fn unregister_validator(&self, path: impl AsRef<str>) -> bool {
        self.inner.validation.unregister_validator(path.as_ref())
    }

    /// Runs every validator, replaces the error map with the failures and
    /// publishes `validation`. Returns whether the form is valid.
    pub fn validate_all(&self) -> FormResult<bool> {
        let all_values = self.state()?.values.clone();
        let errors = self.inner.validation.validate_all(&all_values);
        let valid = errors.is_empty();
        self.state_mut()?.errors = errors.clone();
        self.emit(topics::VALIDATION, EventPayload::Validation { errors, valid })?;
        Ok(valid)
    }

    /// Runs the validator for `path` regardless of its mode and applies the
    /// result to the error map.
    pub fn validate_field(&self, path: impl AsRef<str>) -> FormResult<Option<String>> {
        let path = path.as_ref();
        let all_values = self.state()?.values.clone();
        let value = get_by_path(&all_values, path).cloned().unwrap_or_default();
        let result = self
            .inner
            .validation
            .validate_field(path, &value, &all_values);
        self.apply_validation_result(path, result.clone())?;
        Ok(result)
    }
}
