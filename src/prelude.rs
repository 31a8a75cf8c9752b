pub use crate::config::{DirtyCheckStrategy, FormConfig};
pub use crate::error::{FormError, FormResult};
pub use crate::features::{ActiveFeature, DirtyFeature, FormFeatures, SubmittingFeature};
pub use crate::form::{FormApi, FormEngine, SetOptions};
pub use crate::model::{FieldKey, FieldLens, FormModel};
pub use crate::scheduler::{ManualScheduler, Scheduler};
pub use crate::services::{
    EventPayload, EventScope, FormEvent, Subscription, ValidationMode, validator_fn,
};
pub use crate::state::{FieldState, FormState, SubmitOutcome};
pub use crate::value::FormValue;
