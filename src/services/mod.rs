//! Replaceable collaborators of the form engine. Each concern is an
//! interface trait with a default implementation.

mod batch;
mod cache;
mod events;
mod validation;

pub use batch::{BatchConfig, BatchService, BatchStats, Batcher, FlushHandler, Operation};
pub use cache::{BoundedCache, CacheService, CacheStats, StateCache, ValueKey};
pub use events::{
    ContextKey, EventBus, EventConfig, EventPayload, EventScope, EventService, FormEvent,
    Listener, ListenerResult, Subscription,
};
pub use validation::{
    ContextProvider, DebouncedRunner, ExecutionStrategy, FieldValidation, PendingValidation,
    SettleHandler, ValidateOptions, ValidationContext, ValidationMode, ValidationService,
    ValidatorFn, validator_fn,
};
