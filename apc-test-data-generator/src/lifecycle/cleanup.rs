//! Best-effort sequence: run named steps in order, report each failure, never
//! stop early.

use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error, info};

use crate::error::{CleanupFault, Fault};
use crate::lifecycle::panic_message;
use crate::metrics;

pub type StepFuture<'a> = BoxFuture<'a, Result<(), Fault>>;

/// One named operation. A step without an operation belongs to a resource that
/// was never created and is skipped.
pub struct CleanupStep<'a> {
    name: &'static str,
    operation: Option<StepFuture<'a>>,
}

impl<'a> CleanupStep<'a> {
    pub fn new(name: &'static str, operation: Option<StepFuture<'a>>) -> Self {
        Self { name, operation }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    Skipped,
    Failed,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Completed => "completed",
            StepOutcome::Skipped => "skipped",
            StepOutcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub steps: Vec<(&'static str, StepOutcome)>,
}

impl CleanupReport {
    pub fn outcome(&self, step: &str) -> Option<StepOutcome> {
        self.steps
            .iter()
            .find(|(name, _)| *name == step)
            .map(|(_, outcome)| *outcome)
    }

    pub fn failures(&self) -> usize {
        self.steps
            .iter()
            .filter(|(_, outcome)| *outcome == StepOutcome::Failed)
            .count()
    }

    pub fn is_clean(&self) -> bool {
        self.failures() == 0
    }
}

/// Await every step in order. A step that errors or panics is logged as a
/// [`CleanupFault`] and the next step runs regardless.
pub async fn run_best_effort(steps: Vec<CleanupStep<'_>>) -> CleanupReport {
    let mut report = CleanupReport::default();

    for step in steps {
        let outcome = match step.operation {
            None => {
                debug!(step = step.name, "cleanup step skipped, resource was not created");
                StepOutcome::Skipped
            }
            Some(operation) => {
                info!(step = step.name, "cleanup step started");
                let result = match AssertUnwindSafe(operation).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => Err(Fault::Panic(panic_message(panic.as_ref()))),
                };
                match result {
                    Ok(()) => StepOutcome::Completed,
                    Err(source) => {
                        let fault = CleanupFault {
                            step: step.name,
                            source,
                        };
                        error!(step = step.name, "{}", fault);
                        StepOutcome::Failed
                    }
                }
            }
        };
        metrics::emit_shutdown_step(step.name, outcome.as_str());
        report.steps.push((step.name, outcome));
    }

    report
}
