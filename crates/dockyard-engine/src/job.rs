//! Units of work dispatched through the kernel.

use std::borrow::Cow;
use std::fmt;

use tracing::debug;

use crate::engine::{ENGINE_TARGET, Engine};
use crate::env::Env;
use crate::errors::JobError;

/// Status recorded when a handler succeeds.
pub const STATUS_OK: i32 = 0;
/// Status recorded when a handler fails without a specific code.
pub const STATUS_FAILED: i32 = 1;
/// Status recorded when no handler is bound to the command name.
pub const STATUS_UNKNOWN_COMMAND: i32 = 127;

/// A named, parameterised unit of work.
///
/// Jobs are created through [`Engine::job`] and owned by the caller until
/// they complete. The handler is resolved when [`Job::run`] is called, so a
/// job may be configured before its command is registered.
pub struct Job {
    engine: Engine,
    name: String,
    args: Vec<String>,
    env: Env,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    status: Option<i32>,
}

impl Job {
    pub(crate) fn new(engine: Engine, name: String, args: Vec<String>, env: Env) -> Self {
        Self {
            engine,
            name,
            args,
            env,
            stdout: Vec::new(),
            stderr: Vec::new(),
            status: None,
        }
    }

    /// Command name bound to the job.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Positional arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        self.args.as_slice()
    }

    /// Positional argument at `index`, when present.
    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Named configuration attached to the job.
    #[must_use]
    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Mutable access to the named configuration.
    pub fn env_mut(&mut self) -> &mut Env {
        &mut self.env
    }

    /// Stores a string setting on the job.
    pub fn setenv(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.set(key, value);
    }

    /// Stores a boolean setting on the job.
    pub fn setenv_bool(&mut self, key: impl Into<String>, value: bool) {
        self.env.set_bool(key, value);
    }

    /// Stores an ordered list setting on the job.
    pub fn setenv_list<I, S>(&mut self, key: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env.set_list(key, values);
    }

    /// Handle to the engine that created the job, for dispatching sub-jobs.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Appends a line to the job's standard output.
    pub fn write_stdout(&mut self, line: &str) {
        push_line(&mut self.stdout, line);
    }

    /// Appends a line to the job's standard error.
    pub fn write_stderr(&mut self, line: &str) {
        push_line(&mut self.stderr, line);
    }

    /// Raw bytes written to standard output.
    #[must_use]
    pub fn stdout(&self) -> &[u8] {
        self.stdout.as_slice()
    }

    /// Raw bytes written to standard error.
    #[must_use]
    pub fn stderr(&self) -> &[u8] {
        self.stderr.as_slice()
    }

    /// Standard output decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn stdout_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// Standard error decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn stderr_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }

    /// Exit status, available once the job has run.
    #[must_use]
    pub fn status(&self) -> Option<i32> {
        self.status
    }

    /// Runs the job synchronously on the calling thread.
    ///
    /// Dispatching an unregistered command fails with
    /// [`JobError::UnknownCommand`] without invoking anything. Otherwise the
    /// handler runs with the job's arguments and configuration, and its
    /// failure, if any, is returned as [`JobError::Failed`]. The exit status
    /// is recorded either way.
    ///
    /// # Errors
    ///
    /// Returns a [`JobError`] when the command is unknown, the engine is
    /// shutting down, the job already ran, or the handler failed.
    pub fn run(&mut self) -> Result<(), JobError> {
        if self.status.is_some() {
            return Err(JobError::AlreadyRun {
                name: self.name.clone(),
            });
        }

        let entry = match self.engine.resolve(&self.name) {
            Ok(entry) => entry,
            Err(error) => {
                self.status = Some(error.status());
                return Err(error);
            }
        };
        let _in_flight = if entry.tracked {
            match self.engine.begin_job(&self.name) {
                Ok(guard) => Some(guard),
                Err(error) => {
                    self.status = Some(error.status());
                    return Err(error);
                }
            }
        } else {
            None
        };

        debug!(
            target: ENGINE_TARGET,
            command = %self.name,
            args = self.args.len(),
            "running job"
        );
        match entry.handler.run(self) {
            Ok(()) => {
                self.status = Some(STATUS_OK);
                debug!(target: ENGINE_TARGET, command = %self.name, "job completed");
                Ok(())
            }
            Err(source) => {
                self.status = Some(source.status());
                debug!(
                    target: ENGINE_TARGET,
                    command = %self.name,
                    status = source.status(),
                    error = %source,
                    "job failed"
                );
                Err(JobError::Failed {
                    name: self.name.clone(),
                    source,
                })
            }
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Job")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("env", &self.env)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Job {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.name)?;
        for arg in &self.args {
            write!(formatter, " {arg}")?;
        }
        Ok(())
    }
}

fn push_line(buffer: &mut Vec<u8>, line: &str) {
    buffer.extend_from_slice(line.as_bytes());
    if !line.ends_with('\n') {
        buffer.push(b'\n');
    }
}
