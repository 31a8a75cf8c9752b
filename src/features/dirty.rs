use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use indexmap::IndexSet;
use tracing::warn;

use crate::config::{DirtyCheckStrategy, EqualityFn};
use crate::error::{FormResult, lock_recover};
use crate::form::{FormEngine, WeakFormEngine};
use crate::scheduler::{Scheduler, TaskHandle};
use crate::services::{EventBus, EventPayload, EventScope};
use crate::topics;
use crate::value::shallow_equal;

/// Emissions for a ledger transition as `(base topic, flag)` pairs. A first
/// observation only speaks up when it is dirty.
fn transition(previous: Option<bool>, dirty: bool) -> &'static [(&'static str, bool)] {
    match (previous, dirty) {
        (None | Some(false), true) => &[(topics::DIRTY, true)],
        (Some(true), false) => &[(topics::PRISTINE, true), (topics::DIRTY, false)],
        _ => &[],
    }
}

#[derive(Default)]
struct Ledger {
    pending: IndexSet<String>,
    flush: Option<TaskHandle>,
    fields: HashMap<String, bool>,
    form: Option<bool>,
}

struct DirtyInner {
    engine: WeakFormEngine,
    bus: Weak<dyn EventBus>,
    scheduler: Arc<dyn Scheduler>,
    is_equal: EqualityFn,
    ledger: Mutex<Ledger>,
}

impl DirtyInner {
    fn queue_check(self: &Arc<Self>, path: &str) {
        let mut ledger = lock_recover(&self.ledger);
        ledger.pending.insert(path.to_string());
        if ledger.flush.is_some() {
            return;
        }
        let weak = Arc::downgrade(self);
        ledger.flush = Some(self.scheduler.defer(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                if let Err(error) = inner.flush() {
                    warn!(error = %error, "dirty check failed");
                }
            }
        })));
    }

    fn flush(&self) -> FormResult<()> {
        let pending = {
            let mut ledger = lock_recover(&self.ledger);
            ledger.flush = None;
            std::mem::take(&mut ledger.pending)
        };
        let Some(engine) = self.engine.upgrade() else {
            return Ok(());
        };

        let is_equal = engine
            .config()?
            .is_equal
            .unwrap_or_else(|| self.is_equal.clone());
        let mut emissions = Vec::new();
        for path in pending {
            let current = engine.get(&path)?;
            let initial = engine.initial_value(&path)?;
            let dirty = !is_equal(&current, &initial);
            let previous = lock_recover(&self.ledger).fields.insert(path.clone(), dirty);
            emissions.extend(
                transition(previous, dirty)
                    .iter()
                    .map(|(base, flag)| (topics::field(base, &path), *flag)),
            );
        }
        emissions.extend(self.form_transition(&engine)?);
        self.publish(emissions)
    }

    fn recompute_form(&self) -> FormResult<()> {
        let Some(engine) = self.engine.upgrade() else {
            return Ok(());
        };
        let emissions = self.form_transition(&engine)?;
        self.publish(emissions)
    }

    fn form_transition(&self, engine: &FormEngine) -> FormResult<Vec<(String, bool)>> {
        let touched_any = match engine.config()?.dirty_check_strategy {
            DirtyCheckStrategy::Touched => Some(!engine.touched()?.is_empty()),
            DirtyCheckStrategy::Values => None,
        };
        let mut ledger = lock_recover(&self.ledger);
        let dirty = touched_any.unwrap_or_else(|| ledger.fields.values().any(|dirty| *dirty));
        let previous = ledger.form.replace(dirty);
        Ok(transition(previous, dirty)
            .iter()
            .map(|(base, flag)| (base.to_string(), *flag))
            .collect())
    }

    fn publish(&self, emissions: Vec<(String, bool)>) -> FormResult<()> {
        let Some(bus) = self.bus.upgrade() else {
            return Ok(());
        };
        for (topic, flag) in emissions {
            bus.emit(&topic, EventPayload::Flag(flag))?;
        }
        Ok(())
    }

    fn clear(&self) {
        let flush = {
            let mut ledger = lock_recover(&self.ledger);
            let flush = ledger.flush.take();
            *ledger = Ledger::default();
            flush
        };
        if let Some(flush) = flush {
            self.scheduler.cancel(flush);
        }
    }
}

/// Lazily tracks per-field and form-level dirtiness. Fields enter the ledger
/// once they have been checked, and checks run on the next deferred tick
/// after a change. The form's configured `is_equal` wins over the equality
/// the feature was attached with.
pub struct DirtyFeature {
    inner: Arc<DirtyInner>,
    scope: Option<EventScope>,
}

impl DirtyFeature {
    pub fn attach(engine: &FormEngine) -> Self {
        Self::with_equality(engine, Arc::new(shallow_equal))
    }

    pub fn with_equality(engine: &FormEngine, is_equal: EqualityFn) -> Self {
        let bus = engine.events();
        let inner = Arc::new(DirtyInner {
            engine: engine.downgrade(),
            bus: Arc::downgrade(&bus),
            scheduler: engine.scheduler(),
            is_equal,
            ledger: Mutex::new(Ledger::default()),
        });
        let scope = EventScope::new(bus);

        {
            let inner = Arc::downgrade(&inner);
            scope.on(topics::CHANGE, move |event| {
                let (Some(inner), EventPayload::Changes(operations)) =
                    (inner.upgrade(), &event.payload)
                else {
                    return Ok(());
                };
                for operation in operations {
                    inner.queue_check(&operation.path);
                }
                Ok(())
            });
        }
        {
            let inner = Arc::downgrade(&inner);
            scope.on(topics::TOUCH, move |_| match inner.upgrade() {
                Some(inner) => Ok(inner.recompute_form()?),
                None => Ok(()),
            });
        }
        for topic in [topics::INIT, topics::RESET] {
            let inner = Arc::downgrade(&inner);
            scope.on(topic, move |_| {
                if let Some(inner) = inner.upgrade() {
                    inner.clear();
                }
                Ok(())
            });
        }

        Self {
            inner,
            scope: Some(scope),
        }
    }

    pub fn queue_check(&self, path: impl AsRef<str>) {
        self.inner.queue_check(path.as_ref());
    }

    /// Last published form-level state. Unknown counts as pristine.
    pub fn is_dirty(&self) -> bool {
        lock_recover(&self.inner.ledger).form.unwrap_or(false)
    }

    pub fn is_field_dirty(&self, path: impl AsRef<str>) -> bool {
        lock_recover(&self.inner.ledger)
            .fields
            .get(path.as_ref())
            .copied()
            .unwrap_or(false)
    }

    pub fn dispose(&mut self) {
        self.scope.take();
        self.inner.clear();
    }
}

impl Drop for DirtyFeature {
    fn drop(&mut self) {
        self.inner.clear();
    }
}
