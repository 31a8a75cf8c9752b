use std::sync::{Arc, Mutex};

use crate::error::{FormError, FormResult, lock_recover};
use crate::form::{FormEngine, WeakFormEngine};
use crate::services::{EventPayload, EventScope};
use crate::topics;

/// Mirrors the engine's submitting flag and publishes `submitting` on edges.
pub struct SubmittingFeature {
    engine: WeakFormEngine,
    submitting: Arc<Mutex<bool>>,
    scope: Option<EventScope>,
}

impl SubmittingFeature {
    pub fn attach(engine: &FormEngine) -> Self {
        let bus = engine.events();
        let scope = EventScope::new(bus.clone());
        let submitting = Arc::new(Mutex::new(engine.is_submitting().unwrap_or(false)));

        {
            let submitting = submitting.clone();
            let bus = Arc::downgrade(&bus);
            scope.on(topics::SUBMIT, move |event| {
                let EventPayload::Submit { submitting: next, .. } = event.payload else {
                    return Ok(());
                };
                {
                    let mut current = lock_recover(&submitting);
                    if *current == next {
                        return Ok(());
                    }
                    *current = next;
                }
                if let Some(bus) = bus.upgrade() {
                    bus.emit(topics::SUBMITTING, EventPayload::Flag(next))?;
                }
                Ok(())
            });
        }

        Self {
            engine: engine.downgrade(),
            submitting,
            scope: Some(scope),
        }
    }

    pub fn is_submitting(&self) -> bool {
        *lock_recover(&self.submitting)
    }

    /// Changes the flag through the engine, which stays its only owner.
    pub fn set_submitting(&self, submitting: bool) -> FormResult<()> {
        self.engine
            .upgrade()
            .ok_or(FormError::EngineDropped)?
            .set_submitting(submitting)
    }

    pub fn dispose(&mut self) {
        self.scope.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FormConfig;
    use crate::value::FormValue;
    use futures::executor::block_on;

    fn flags(engine: &FormEngine) -> Arc<Mutex<Vec<bool>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        engine.on(topics::SUBMITTING, move |event| {
            if let EventPayload::Flag(flag) = event.payload {
                sink.lock().expect("log lock").push(flag);
            }
            Ok(())
        });
        log
    }

    #[test]
    fn redundant_updates_are_silent() {
        let engine = FormEngine::new();
        engine.init(FormValue::Null, FormConfig::default()).expect("init");
        let feature = SubmittingFeature::attach(&engine);
        let log = flags(&engine);

        feature.set_submitting(true).expect("set");
        feature.set_submitting(true).expect("set again");
        assert!(engine.is_submitting().expect("flag"));
        feature.set_submitting(false).expect("clear");

        assert_eq!(*log.lock().expect("log lock"), vec![true, false]);
        assert!(!feature.is_submitting());
    }

    #[test]
    fn follows_submit_phases() {
        let engine = FormEngine::new();
        engine.init(FormValue::Null, FormConfig::default()).expect("init");
        let feature = SubmittingFeature::attach(&engine);
        let log = flags(&engine);

        let outcome = block_on(engine.submit(|_| async { Ok(()) })).expect("submit");
        assert!(outcome.is_success());
        assert_eq!(*log.lock().expect("log lock"), vec![true, false]);
        assert!(!feature.is_submitting());
    }
}
