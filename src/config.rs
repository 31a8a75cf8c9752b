use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FormError, FormResult};
use crate::services::{BatchConfig, EventConfig};
use crate::value::FormValue;

pub type EqualityFn = Arc<dyn Fn(&FormValue, &FormValue) -> bool + Send + Sync>;

pub const DEFAULT_MAX_CACHE_SIZE: usize = 100;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirtyCheckStrategy {
    /// The form is dirty as soon as any field was touched.
    Touched,
    /// The form is dirty while any checked field differs from its initial value.
    #[default]
    Values,
}

/// Engine configuration. Deserializing fills every missing key from
/// [`FormConfig::default`], so partial JSON documents merge over the defaults.
#[derive(Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FormConfig {
    pub enable_batching: bool,
    #[serde(rename = "batchDelay")]
    pub batch_delay_ms: u64,
    pub enable_validation: bool,
    pub validate_on_change: bool,
    pub validate_on_blur: bool,
    pub dirty_check_strategy: DirtyCheckStrategy,
    pub max_cache_size: usize,
    #[serde(rename = "validationDebounce")]
    pub validation_debounce_ms: u64,
    pub isolate_listener_errors: bool,
    #[serde(skip)]
    pub is_equal: Option<EqualityFn>,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            enable_batching: true,
            batch_delay_ms: 0,
            enable_validation: true,
            validate_on_change: false,
            validate_on_blur: true,
            dirty_check_strategy: DirtyCheckStrategy::Values,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            validation_debounce_ms: 0,
            isolate_listener_errors: true,
            is_equal: None,
        }
    }
}

impl FormConfig {
    pub fn from_json(source: &str) -> FormResult<Self> {
        serde_json::from_str(source).map_err(|error| FormError::Config(error.to_string()))
    }

    pub fn with_is_equal(
        mut self,
        is_equal: impl Fn(&FormValue, &FormValue) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.is_equal = Some(Arc::new(is_equal));
        self
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn validation_debounce(&self) -> Duration {
        Duration::from_millis(self.validation_debounce_ms)
    }

    pub(crate) fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            enabled: self.enable_batching,
            delay: self.batch_delay(),
        }
    }

    pub(crate) fn event_config(&self) -> EventConfig {
        EventConfig {
            isolate_listener_errors: self.isolate_listener_errors,
        }
    }
}

impl Debug for FormConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormConfig")
            .field("enable_batching", &self.enable_batching)
            .field("batch_delay_ms", &self.batch_delay_ms)
            .field("enable_validation", &self.enable_validation)
            .field("validate_on_change", &self.validate_on_change)
            .field("validate_on_blur", &self.validate_on_blur)
            .field("dirty_check_strategy", &self.dirty_check_strategy)
            .field("max_cache_size", &self.max_cache_size)
            .field("validation_debounce_ms", &self.validation_debounce_ms)
            .field("isolate_listener_errors", &self.isolate_listener_errors)
            .field("is_equal", &self.is_equal.as_ref().map(|_| "custom"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_contract() {
        let config = FormConfig::default();
        assert!(config.enable_batching);
        assert_eq!(config.batch_delay(), Duration::ZERO);
        assert!(config.enable_validation);
        assert!(!config.validate_on_change);
        assert!(config.validate_on_blur);
        assert_eq!(config.dirty_check_strategy, DirtyCheckStrategy::Values);
    }

    #[test]
    fn partial_json_merges_over_defaults() {
        let config = FormConfig::from_json(
            r#"{ "batchDelay": 25, "validateOnChange": true, "dirtyCheckStrategy": "touched" }"#,
        )
        .expect("config parses");
        assert_eq!(config.batch_delay_ms, 25);
        assert!(config.validate_on_change);
        assert_eq!(config.dirty_check_strategy, DirtyCheckStrategy::Touched);
        assert!(config.enable_batching);
        assert_eq!(config.max_cache_size, DEFAULT_MAX_CACHE_SIZE);
    }

    #[test]
    fn unknown_strategy_is_a_config_error() {
        let error = FormConfig::from_json(r#"{ "dirtyCheckStrategy": "sometimes" }"#)
            .expect_err("strategy is rejected");
        assert!(matches!(error, FormError::Config(_)));
    }
}
