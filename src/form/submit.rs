use std::future::Future;

use tracing::debug;

use super::engine::FormEngine;
use crate::error::{FormResult, write_recover};
use crate::services::EventPayload;
use crate::state::SubmitOutcome;
use crate::topics;
use crate::value::FormValue;

impl FormEngine {
    /// Validates the whole form and, when it is valid, hands the values to
    /// `on_submit`. Failures come back as [`SubmitOutcome`] values; only
    /// usage errors are returned as `Err`. The submitting flag is cleared on
    /// every path.
    pub async fn submit<F, Fut>(&self, on_submit: F) -> FormResult<SubmitOutcome>
    where
        F: FnOnce(FormValue) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        self.state_mut()?.submitting = true;
        let outcome = match self.emit_submit(true, None) {
            Ok(()) => self.run_submit(on_submit).await,
            Err(error) => SubmitOutcome::Failed {
                error: error.to_string(),
            },
        };
        write_recover(&self.inner.state).submitting = false;

        debug!(success = outcome.is_success(), "form submit finished");
        self.emit_submit(false, Some(outcome.clone()))?;
        Ok(outcome)
    }

    async fn run_submit<F, Fut>(&self, on_submit: F) -> SubmitOutcome
    where
        F: FnOnce(FormValue) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let checked = self.validate_all().and_then(|valid| {
            let state = self.state()?;
            Ok((valid, state.errors.clone(), state.values.clone()))
        });
        let (valid, errors, values) = match checked {
            Ok(checked) => checked,
            Err(error) => {
                return SubmitOutcome::Failed {
                    error: error.to_string(),
                };
            }
        };

        if !valid {
            for path in errors.keys() {
                if let Err(error) = self.mark_touched(path) {
                    return SubmitOutcome::Failed {
                        error: error.to_string(),
                    };
                }
            }
            return SubmitOutcome::Invalid { errors, values };
        }

        match on_submit(values.clone()).await {
            Ok(()) => SubmitOutcome::Succeeded { values },
            Err(error) => SubmitOutcome::Failed {
                error: error.to_string(),
            },
        }
    }

    /// Sets the flag directly and publishes `submit` without an outcome.
    pub fn set_submitting(&self, submitting: bool) -> FormResult<()> {
        self.state_mut()?.submitting = submitting;
        self.emit_submit(submitting, None)
    }

    fn emit_submit(&self, submitting: bool, outcome: Option<SubmitOutcome>) -> FormResult<()> {
        self.emit(
            topics::SUBMIT,
            EventPayload::Submit {
                submitting,
                outcome,
            },
        )
    }
}
