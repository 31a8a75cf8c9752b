//! Observer-based form state engine.
//!
//! [`FormEngine`] owns a form's values, errors, touched set, active field and
//! submitting flag. Changes are coalesced by a [`Batcher`](services::Batcher),
//! published on an [`EventBus`](services::EventBus) and validated per field
//! according to each validator's [`ValidationMode`](services::ValidationMode).
//! Derived dirty, active and submitting state lives in [`features`].

pub mod config;
pub mod error;
pub mod features;
pub mod form;
pub mod hash;
pub mod model;
pub mod path;
pub mod prelude;
pub mod scheduler;
pub mod services;
pub mod state;
pub mod topics;
pub mod value;

pub use config::{DirtyCheckStrategy, FormConfig};
pub use error::{FormError, FormResult};
pub use form::{FormApi, FormEngine, FormEngineBuilder, SetOptions, WeakFormEngine};
pub use state::{ErrorMap, FieldState, FormState, SubmitOutcome};
pub use value::{FormMap, FormValue};
