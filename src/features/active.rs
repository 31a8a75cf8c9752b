use std::sync::{Arc, Mutex, Weak};

use crate::error::{FormError, FormResult, lock_recover};
use crate::form::{FormEngine, WeakFormEngine};
use crate::services::{EventBus, EventPayload, EventScope, ListenerResult};
use crate::topics;

/// Tracks which field has focus and publishes `active` when that changes.
pub struct ActiveFeature {
    engine: WeakFormEngine,
    active: Arc<Mutex<Option<String>>>,
    scope: Option<EventScope>,
}

impl ActiveFeature {
    pub fn attach(engine: &FormEngine) -> Self {
        let bus = engine.events();
        let scope = EventScope::new(bus.clone());
        let active = Arc::new(Mutex::new(engine.active().ok().flatten()));

        for topic in [topics::FOCUS, topics::BLUR] {
            let active = active.clone();
            let bus = Arc::downgrade(&bus);
            scope.on(topic, move |event| match &event.payload {
                EventPayload::Field { path } if event.topic == topics::FOCUS => {
                    update(&active, &bus, path.clone())
                }
                _ => update(&active, &bus, None),
            });
        }

        Self {
            engine: engine.downgrade(),
            active,
            scope: Some(scope),
        }
    }

    pub fn active(&self) -> Option<String> {
        lock_recover(&self.active).clone()
    }

    pub fn focus(&self, path: impl AsRef<str>) -> FormResult<()> {
        self.engine()?.focus(path)
    }

    pub fn blur(&self) -> FormResult<()> {
        self.engine()?.blur()
    }

    /// Stops listening. Safe to call more than once.
    pub fn dispose(&mut self) {
        self.scope.take();
    }

    fn engine(&self) -> FormResult<FormEngine> {
        self.engine.upgrade().ok_or(FormError::EngineDropped)
    }
}

fn update(
    active: &Mutex<Option<String>>,
    bus: &Weak<dyn EventBus>,
    next: Option<String>,
) -> ListenerResult {
    {
        let mut current = lock_recover(active);
        if *current == next {
            return Ok(());
        }
        *current = next.clone();
    }
    if let Some(bus) = bus.upgrade() {
        bus.emit(topics::ACTIVE, EventPayload::Active(next))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FormConfig;
    use crate::value::FormValue;

    fn recorded(engine: &FormEngine) -> Arc<Mutex<Vec<Option<String>>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        engine.on(topics::ACTIVE, move |event| {
            if let EventPayload::Active(path) = &event.payload {
                sink.lock().expect("log lock").push(path.clone());
            }
            Ok(())
        });
        log
    }

    #[test]
    fn emits_only_on_change() {
        let engine = FormEngine::new();
        engine
            .init(FormValue::map([("name", "")]), FormConfig::default())
            .expect("init");
        let feature = ActiveFeature::attach(&engine);
        let log = recorded(&engine);

        feature.focus("name").expect("focus");
        feature.focus("name").expect("focus again");
        feature.focus("email").expect("focus other");
        feature.blur().expect("blur");
        feature.blur().expect("blur again");

        assert_eq!(
            *log.lock().expect("log lock"),
            vec![Some("name".to_string()), Some("email".to_string()), None]
        );
        assert_eq!(feature.active(), None);
    }

    #[test]
    fn dispose_detaches_listeners() {
        let engine = FormEngine::new();
        engine.init(FormValue::Null, FormConfig::default()).expect("init");
        let mut feature = ActiveFeature::attach(&engine);
        assert_eq!(engine.events().listener_count(topics::FOCUS), 1);

        feature.dispose();
        feature.dispose();
        assert_eq!(engine.events().listener_count(topics::FOCUS), 0);
        engine.focus("name").expect("focus");
        assert_eq!(feature.active(), None);
    }
}
