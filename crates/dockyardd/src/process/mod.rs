//! Process-level concerns: termination signals and the run loop.

mod launch;
mod shutdown;

pub use self::launch::{LaunchError, run_daemon};
pub use self::shutdown::{
    ShutdownError, ShutdownOutcome, ShutdownSignal, SignalKind, SystemShutdownSignal,
    TeardownOutcome,
};
pub(crate) use self::shutdown::spawn_coordinator;

const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
