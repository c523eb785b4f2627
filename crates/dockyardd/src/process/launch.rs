//! Runs the daemon with the production collaborators.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::boot::{BootError, BootOptions, SystemConfigLoader, boot_with};
use crate::health::StructuredHealthReporter;

use super::PROCESS_TARGET;
use super::shutdown::{ShutdownError, ShutdownOutcome, SystemShutdownSignal, TeardownOutcome};

/// Errors surfaced while running the daemon process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Signal handlers could not be installed.
    #[error(transparent)]
    Signal(#[from] ShutdownError),
    /// Boot failed or was interrupted.
    #[error(transparent)]
    Boot(#[from] BootError),
}

impl LaunchError {
    /// Returns `true` when a termination signal stopped the daemon before it
    /// finished booting.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Boot(error) if error.is_interrupted())
    }
}

/// Boots the daemon and serves until a termination signal arrives.
///
/// Signal handlers are installed before anything else so a signal during
/// boot is never fatal to the process.
///
/// # Errors
///
/// Returns a [`LaunchError`] when boot fails or signal handling is lost.
pub fn run_daemon() -> Result<ShutdownOutcome, LaunchError> {
    let signal = SystemShutdownSignal::install()?;
    let reporter = Arc::new(StructuredHealthReporter::new());
    let daemon = boot_with(&SystemConfigLoader, reporter, signal, BootOptions::default())?;
    let outcome = daemon.wait()?;
    info!(
        target: PROCESS_TARGET,
        signal = %outcome.signal,
        completed = matches!(outcome.teardown, TeardownOutcome::Completed(_)),
        "daemon stopped"
    );
    Ok(outcome)
}
