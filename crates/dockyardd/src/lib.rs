//! The Dockyard container daemon.
//!
//! Every capability of the daemon is a named command bound in a
//! [`dockyard_engine::Engine`]. Boot ([`boot_with`]) validates configuration,
//! builds the kernel, registers the built-in subsystems and then constructs
//! the daemon on a background thread while the API listeners come up with
//! requests buffered. Requests are only served once the daemon has installed
//! its commands and boot has dispatched `acceptconnections`.
//!
//! Termination signals are routed to the kernel's teardown by the shutdown
//! coordinator, which bounds it by the configured grace period.
//!
//! ## Subsystems
//!
//! - [`api`]: `serveapi`/`acceptconnections` and the JSON-lines protocol.
//! - [`network`]: the bridge network driver (`init_networkdriver`).
//! - [`execdriver`]: the execution-backend registry with the `native` and
//!   `lxc` backends.
//! - [`daemon`]: pidfile, storage graph and the container commands.

pub mod api;
mod boot;
mod builtins;
pub mod daemon;
pub mod execdriver;
mod health;
pub mod network;
mod process;
mod telemetry;

pub use boot::{
    BootError, BootOptions, BootState, ConfigLoader, RunningDaemon, StaticConfigLoader,
    SystemConfigLoader, boot_with,
};
pub use builtins::{VERSION, VERSION_COMMAND};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{
    LaunchError, ShutdownError, ShutdownOutcome, ShutdownSignal, SignalKind,
    SystemShutdownSignal, TeardownOutcome, run_daemon,
};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
