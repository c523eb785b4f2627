//! Job dispatch kernel for the Dockyard daemon.
//!
//! The kernel decouples independently built subsystems (storage, networking,
//! execution backends, the API layer) by binding string command names to
//! [`Handler`] implementations. Subsystems register their handlers while the
//! daemon boots; callers then create a [`Job`] for a named command, attach
//! positional arguments and named configuration through its [`Env`], and run
//! it synchronously.
//!
//! ## Registration discipline
//!
//! The [`Engine`] is constructed once per process and shared by cloning the
//! handle. Registration is expected to finish before concurrent dispatch
//! begins: the handler table is guarded by a reader/writer lock so lookups
//! never observe a half-inserted binding, but the boot sequence, not the
//! lock, decides when a command becomes reachable. Names are never silently
//! overwritten; a second registration under the same name fails with
//! [`EngineError::AlreadyRegistered`].
//!
//! ## Shutdown
//!
//! Subsystems that own resources register teardown hooks through
//! [`Engine::on_shutdown`]. [`Engine::shutdown`] is idempotent: the first
//! call drains in-flight jobs for a bounded period, runs every hook in
//! reverse registration order, and returns a [`ShutdownReport`] listing each
//! failure without aborting the remaining hooks.
//!
//! ```
//! use dockyard_engine::{Engine, HandlerError, Job};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::new();
//! engine.register("echo", |job: &mut Job| -> Result<(), HandlerError> {
//!     let line = job.args().join(" ");
//!     job.write_stdout(&line);
//!     Ok(())
//! })?;
//!
//! let mut job = engine.job("echo", ["hello", "world"]);
//! job.run()?;
//! assert_eq!(job.stdout_text(), "hello world\n");
//! # Ok(())
//! # }
//! ```

mod engine;
mod env;
mod errors;
mod handler;
mod job;
mod shutdown;

pub use self::engine::{DEFAULT_DRAIN_TIMEOUT, Engine};
pub use self::env::Env;
pub use self::errors::{EngineError, EnvError, HandlerError, JobError};
pub use self::handler::Handler;
pub use self::job::{Job, STATUS_FAILED, STATUS_OK, STATUS_UNKNOWN_COMMAND};
pub use self::shutdown::{ShutdownReport, TeardownFailure};

/// Command name reserved for listing registered commands.
pub const COMMANDS_COMMAND: &str = "commands";

/// Command name reserved for triggering kernel shutdown as a dispatched job.
pub const SHUTDOWN_COMMAND: &str = "shutdown";

#[cfg(test)]
mod tests;
