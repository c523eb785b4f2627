//! Structured health reporting for daemon lifecycle events.

use std::sync::Arc;

use dockyard_engine::{ShutdownReport, TeardownFailure};

use crate::boot::{BootError, BootState};

pub(crate) const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked each time the boot sequence enters a new state.
    fn boot_state_changed(&self, state: BootState);

    /// Invoked when boot fails fatally.
    fn boot_failed(&self, error: &BootError);

    /// Invoked once an execution backend has been selected.
    fn exec_driver_selected(&self, name: &str);

    /// Invoked after teardown finishes, whatever its outcome.
    fn teardown_completed(&self, report: &ShutdownReport);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn boot_state_changed(&self, state: BootState) {
        (**self).boot_state_changed(state);
    }

    fn boot_failed(&self, error: &BootError) {
        (**self).boot_failed(error);
    }

    fn exec_driver_selected(&self, name: &str) {
        (**self).exec_driver_selected(name);
    }

    fn teardown_completed(&self, report: &ShutdownReport) {
        (**self).teardown_completed(report);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn boot_state_changed(&self, state: BootState) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "boot_state_changed",
            state = %state,
            "boot state changed"
        );
    }

    fn boot_failed(&self, error: &BootError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "boot_failed",
            state = %error.state(),
            error = %error,
            "daemon boot failed"
        );
    }

    fn exec_driver_selected(&self, name: &str) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "exec_driver_selected",
            driver = name,
            "execution backend selected"
        );
    }

    fn teardown_completed(&self, report: &ShutdownReport) {
        for TeardownFailure { hook, error } in report.failures() {
            tracing::error!(
                target: HEALTH_TARGET,
                event = "teardown_failed",
                hook = %hook,
                error = %error,
                "teardown hook failed"
            );
        }
        tracing::info!(
            target: HEALTH_TARGET,
            event = "teardown_completed",
            hooks = report.attempted().len(),
            failures = report.failures().len(),
            drained = report.drained(),
            "teardown completed"
        );
    }
}
