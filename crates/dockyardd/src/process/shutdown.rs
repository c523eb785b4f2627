//! The Shutdown Coordinator.
//!
//! Boot hands a [`ShutdownSignal`] to [`spawn_coordinator`] as soon as the
//! kernel exists. The coordinator thread waits for the first termination
//! signal, runs the kernel teardown on a worker bounded by the configured
//! grace period, and reports the outcome on the boot event channel.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Duration;

use dockyard_engine::{Engine, ShutdownReport};
use signal_hook::consts::signal::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::PROCESS_TARGET;
use crate::boot::BootEvent;
use crate::health::HealthReporter;

/// Termination signals the daemon traps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// `SIGINT`.
    Interrupt,
    /// `SIGTERM`.
    Terminate,
    /// `SIGQUIT`; exits without teardown.
    Quit,
}

impl SignalKind {
    /// Maps a raw signal number.
    #[must_use]
    pub fn from_raw(signal: i32) -> Option<Self> {
        match signal {
            SIGINT => Some(Self::Interrupt),
            SIGTERM => Some(Self::Terminate),
            SIGQUIT => Some(Self::Quit),
            _ => None,
        }
    }

    /// Whether the signal asks for an immediate exit.
    #[must_use]
    pub const fn skips_teardown(self) -> bool {
        matches!(self, Self::Quit)
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Quit => "SIGQUIT",
        })
    }
}

/// Errors reported by shutdown signal sources.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The coordinator thread could not be started.
    #[error("failed to spawn shutdown coordinator: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The signal source ended without delivering a signal.
    #[error("shutdown signal source closed")]
    SourceClosed,
}

/// Source of termination signals.
pub trait ShutdownSignal: Send {
    /// Blocks until a trapped signal arrives. `Ok(None)` means the source
    /// closed and no signal will ever arrive.
    fn wait(&mut self) -> Result<Option<SignalKind>, ShutdownError>;
}

/// Traps `SIGINT`, `SIGTERM` and `SIGQUIT` for the whole process.
///
/// Handlers are installed on construction, so signals arriving before the
/// coordinator starts waiting are queued rather than killing the process.
pub struct SystemShutdownSignal {
    signals: Signals,
}

impl SystemShutdownSignal {
    /// Installs the signal handlers.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::Install`] when registration fails.
    pub fn install() -> Result<Self, ShutdownError> {
        let signals = Signals::new([SIGINT, SIGTERM, SIGQUIT])
            .map_err(|source| ShutdownError::Install { source })?;
        Ok(Self { signals })
    }
}

impl fmt::Debug for SystemShutdownSignal {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("SystemShutdownSignal").finish_non_exhaustive()
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&mut self) -> Result<Option<SignalKind>, ShutdownError> {
        Ok(self.signals.forever().find_map(SignalKind::from_raw))
    }
}

/// What teardown achieved after a signal.
#[derive(Debug)]
pub enum TeardownOutcome {
    /// Every hook ran.
    Completed(ShutdownReport),
    /// The grace period elapsed first.
    TimedOut,
    /// The signal asked for an immediate exit.
    Skipped,
}

/// Result of a signal-driven shutdown.
#[derive(Debug)]
pub struct ShutdownOutcome {
    /// Signal that triggered the shutdown.
    pub signal: SignalKind,
    /// What teardown achieved.
    pub teardown: TeardownOutcome,
}

pub(crate) fn spawn_coordinator<S>(
    mut signal: S,
    engine: Engine,
    grace: Duration,
    events: Sender<BootEvent>,
    reporter: Arc<dyn HealthReporter>,
) -> Result<thread::JoinHandle<()>, ShutdownError>
where
    S: ShutdownSignal + 'static,
{
    thread::Builder::new()
        .name("dockyard-signals".to_owned())
        .spawn(move || {
            let event = match signal.wait() {
                Ok(Some(kind)) => {
                    info!(
                        target: PROCESS_TARGET,
                        signal = %kind,
                        grace_ms = grace.as_millis(),
                        "shutdown signal received"
                    );
                    let teardown = if kind.skips_teardown() {
                        TeardownOutcome::Skipped
                    } else {
                        run_teardown(engine, grace, reporter.as_ref())
                    };
                    BootEvent::Shutdown(ShutdownOutcome {
                        signal: kind,
                        teardown,
                    })
                }
                Ok(None) => {
                    debug!(target: PROCESS_TARGET, "signal source closed");
                    BootEvent::SignalLost(ShutdownError::SourceClosed)
                }
                Err(error) => {
                    warn!(target: PROCESS_TARGET, error = %error, "signal source failed");
                    BootEvent::SignalLost(error)
                }
            };
            if events.send(event).is_err() {
                debug!(target: PROCESS_TARGET, "boot event receiver gone");
            }
        })
        .map_err(|source| ShutdownError::Spawn { source })
}

fn run_teardown(engine: Engine, grace: Duration, reporter: &dyn HealthReporter) -> TeardownOutcome {
    let (done, finished) = mpsc::channel();
    let worker = thread::Builder::new()
        .name("dockyard-teardown".to_owned())
        .spawn(move || {
            let report = engine.shutdown();
            // The coordinator may have given up on us already.
            let _ = done.send(report);
        });
    if let Err(error) = worker {
        warn!(target: PROCESS_TARGET, error = %error, "failed to spawn teardown worker");
        return TeardownOutcome::TimedOut;
    }
    match finished.recv_timeout(grace) {
        Ok(report) => {
            reporter.teardown_completed(&report);
            TeardownOutcome::Completed(report)
        }
        Err(_) => {
            warn!(
                target: PROCESS_TARGET,
                grace_ms = grace.as_millis(),
                "teardown exceeded grace period; exiting anyway"
            );
            TeardownOutcome::TimedOut
        }
    }
}
