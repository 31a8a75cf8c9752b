//! Derived state published on top of the engine's own events. Every feature
//! listens through its own [`EventScope`](crate::services::EventScope) and
//! only publishes when its state actually changes.

mod active;
mod dirty;
mod submitting;

pub use active::ActiveFeature;
pub use dirty::DirtyFeature;
pub use submitting::SubmittingFeature;

use crate::form::FormEngine;

/// The three standard features attached to one engine.
pub struct FormFeatures {
    pub active: ActiveFeature,
    pub dirty: DirtyFeature,
    pub submitting: SubmittingFeature,
}

impl FormFeatures {
    pub fn attach(engine: &FormEngine) -> Self {
        Self {
            active: ActiveFeature::attach(engine),
            dirty: DirtyFeature::attach(engine),
            submitting: SubmittingFeature::attach(engine),
        }
    }

    pub fn dispose(&mut self) {
        self.active.dispose();
        self.dirty.dispose();
        self.submitting.dispose();
    }
}
