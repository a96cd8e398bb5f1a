//! Pending-job draining
//!
//! Promise reactions and other deferred tasks sit in the engine's job queue
//! until someone runs them. Every top-level entry point drains that queue to a
//! fixpoint before returning, so callers observe the effects of
//! `Promise.resolve().then(...)` as soon as `evaluate` returns.

use qjsbind_core::{Engine, EngineError};

use crate::error::Error;

/// Result of one drain
#[derive(Debug)]
pub(crate) struct Drained {
    /// Jobs that ran, including any that ran before a failure
    pub(crate) executed: u64,
    pub(crate) failure: Option<Error>,
}

impl Drained {
    pub(crate) fn into_result(self) -> Result<u64, Error> {
        match self.failure {
            Some(error) => Err(error),
            None => Ok(self.executed),
        }
    }
}

/// Run jobs until the queue is empty or a job fails irrecoverably
pub(crate) fn drain<E: Engine>(engine: &mut E) -> Drained {
    let mut executed = 0;
    loop {
        let status = engine.execute_pending_job();
        if status > 0 {
            executed += 1;
            continue;
        }
        if status == 0 {
            return Drained {
                executed,
                failure: None,
            };
        }

        let message = match engine.take_job_error() {
            Some(EngineError::Script(error)) => error.render(),
            Some(other) => other.to_string(),
            None => "job failed without an exception".to_string(),
        };
        return Drained {
            executed,
            failure: Some(Error::JobLoop { status, message }),
        };
    }
}
