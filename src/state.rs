use std::collections::BTreeMap;

use crate::value::FormValue;

pub type ErrorMap = BTreeMap<String, String>;

/// Composite snapshot returned by `FormEngine::form_state`.
#[derive(Clone, Debug, PartialEq)]
pub struct FormState {
    pub values: FormValue,
    pub errors: ErrorMap,
    /// Sorted, so equal touched sets always produce equal snapshots.
    pub touched: Vec<String>,
    pub active: Option<String>,
    pub submitting: bool,
    pub valid: bool,
    pub dirty: bool,
    pub pristine: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldState {
    pub name: String,
    pub value: FormValue,
    pub initial_value: FormValue,
    pub dirty: bool,
    pub error: Option<String>,
    pub touched: bool,
    pub active: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SubmitOutcome {
    Succeeded { values: FormValue },
    Invalid { errors: ErrorMap, values: FormValue },
    Failed { error: String },
}

impl SubmitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn values(&self) -> Option<&FormValue> {
        match self {
            Self::Succeeded { values } | Self::Invalid { values, .. } => Some(values),
            Self::Failed { .. } => None,
        }
    }

    pub fn errors(&self) -> Option<&ErrorMap> {
        match self {
            Self::Invalid { errors, .. } => Some(errors),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { error } => Some(error),
            _ => None,
        }
    }
}
