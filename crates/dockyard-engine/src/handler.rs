//! Capability implemented by command handlers.

use crate::errors::HandlerError;
use crate::job::Job;

/// Function bound to a command name.
///
/// Handlers read positional arguments and named configuration from the job,
/// write any output into the job's buffers, and report success or failure.
/// They run synchronously on the caller's thread and may be invoked
/// concurrently, hence the `Send + Sync` bound.
pub trait Handler: Send + Sync {
    /// Executes the command described by `job`.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] describing why the command failed.
    fn run(&self, job: &mut Job) -> Result<(), HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&mut Job) -> Result<(), HandlerError> + Send + Sync,
{
    fn run(&self, job: &mut Job) -> Result<(), HandlerError> {
        self(job)
    }
}
