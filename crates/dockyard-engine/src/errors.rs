//! Error types surfaced by the dispatch kernel.
//!
//! Registration failures ([`EngineError`]) are kept apart from dispatch
//! failures ([`JobError`]) so callers can distinguish a wiring mistake made
//! during boot from a command that failed at runtime. Handlers report their
//! own failures with [`HandlerError`], which the kernel wraps together with
//! the command name.

use std::error::Error as StdError;
use std::num::ParseIntError;

use thiserror::Error;

/// Errors raised while registering handlers or teardown hooks.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A handler is already bound to the command name.
    #[error("command '{name}' is already registered")]
    AlreadyRegistered {
        /// Command name that was registered twice.
        name: String,
    },
    /// The kernel has begun shutting down and refuses new bindings.
    #[error("engine is shutting down; refusing to register '{name}'")]
    ShuttingDown {
        /// Name of the handler or hook that was rejected.
        name: String,
    },
    /// Internal state could not be accessed (for example, a poisoned lock).
    #[error("internal engine error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl EngineError {
    pub(crate) fn poisoned(what: &str) -> Self {
        Self::Internal {
            message: format!("{what} lock poisoned"),
        }
    }
}

/// Errors returned by [`Job::run`](crate::Job::run).
#[derive(Debug, Error)]
pub enum JobError {
    /// No handler is registered under the command name.
    #[error("unknown command '{name}'")]
    UnknownCommand {
        /// Command name that could not be resolved.
        name: String,
    },
    /// The kernel is shutting down and no longer dispatches commands.
    #[error("engine is shutting down; cannot run '{name}'")]
    ShuttingDown {
        /// Command that was rejected.
        name: String,
    },
    /// The job object has already been run once.
    #[error("job '{name}' has already completed")]
    AlreadyRun {
        /// Command bound to the job.
        name: String,
    },
    /// The handler reported a failure.
    #[error("{name}: {source}")]
    Failed {
        /// Command whose handler failed.
        name: String,
        /// Failure reported by the handler.
        #[source]
        source: HandlerError,
    },
    /// Internal state could not be accessed.
    #[error("internal engine error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl JobError {
    /// Returns `true` when dispatch failed because the command is unknown.
    #[must_use]
    pub fn is_unknown_command(&self) -> bool {
        matches!(self, Self::UnknownCommand { .. })
    }

    /// Exit status associated with the failure.
    #[must_use]
    pub fn status(&self) -> i32 {
        match self {
            Self::UnknownCommand { .. } => crate::job::STATUS_UNKNOWN_COMMAND,
            Self::Failed { source, .. } => source.status(),
            Self::ShuttingDown { .. } | Self::AlreadyRun { .. } | Self::Internal { .. } => {
                crate::job::STATUS_FAILED
            }
        }
    }
}

/// Failure reported by a command handler or a teardown hook.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    status: i32,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl HandlerError {
    /// Builds an error with the default failure status.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: crate::job::STATUS_FAILED,
            source: None,
        }
    }

    /// Builds an error that wraps an underlying source.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            status: crate::job::STATUS_FAILED,
            source: Some(source.into()),
        }
    }

    /// Overrides the exit status reported for the failure.
    ///
    /// A status of zero is coerced to the generic failure status so a failed
    /// job never reports success.
    #[must_use]
    pub fn status_code(mut self, status: i32) -> Self {
        self.status = if status == crate::job::STATUS_OK {
            crate::job::STATUS_FAILED
        } else {
            status
        };
        self
    }

    /// Human-readable description of the failure.
    #[must_use]
    pub fn message(&self) -> &str {
        self.message.as_str()
    }

    /// Exit status reported for the failure.
    #[must_use]
    pub fn status(&self) -> i32 {
        self.status
    }
}

impl From<EnvError> for HandlerError {
    fn from(error: EnvError) -> Self {
        Self::with_source(error.to_string(), error)
    }
}

impl From<EngineError> for HandlerError {
    fn from(error: EngineError) -> Self {
        Self::with_source(error.to_string(), error)
    }
}

impl From<JobError> for HandlerError {
    fn from(error: JobError) -> Self {
        let status = error.status();
        Self::with_source(error.to_string(), error).status_code(status)
    }
}

/// Errors raised while reading typed values from an [`Env`](crate::Env).
#[derive(Debug, Error)]
pub enum EnvError {
    /// The value is not a valid integer.
    #[error("value '{value}' for '{key}' is not an integer: {source}")]
    InvalidInteger {
        /// Key that was read.
        key: String,
        /// Raw value stored under the key.
        value: String,
        /// Underlying parse error.
        #[source]
        source: ParseIntError,
    },
    /// The value is not a JSON-encoded list of strings.
    #[error("value for '{key}' is not a list: {source}")]
    InvalidList {
        /// Key that was read.
        key: String,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
}
