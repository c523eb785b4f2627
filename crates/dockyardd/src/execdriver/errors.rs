use std::io;

use thiserror::Error;

/// Errors raised by the backend registry and by backends themselves.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Two backends claimed the same name.
    #[error("execution backend '{name}' is already registered")]
    AlreadyRegistered {
        /// Duplicated backend name.
        name: String,
    },
    /// No backend is registered under the configured name.
    #[error("unsupported backend '{name}' (available: {available})")]
    Unsupported {
        /// Requested backend name.
        name: String,
        /// Comma separated names that are registered.
        available: String,
    },
    /// The backend cannot honour mandatory isolation.
    #[error("execution backend '{name}' does not support mandatory isolation")]
    MandatoryIsolationUnsupported {
        /// Backend name.
        name: String,
    },
    /// A container with this id already exists.
    #[error("container '{id}' already exists")]
    AlreadyExists {
        /// Container id.
        id: String,
    },
    /// No container with this id exists.
    #[error("no such container '{id}'")]
    NotFound {
        /// Container id.
        id: String,
    },
    /// The container was never started.
    #[error("container '{id}' has not been started")]
    NotStarted {
        /// Container id.
        id: String,
    },
    /// The container was already started once.
    #[error("container '{id}' has already been started")]
    AlreadyStarted {
        /// Container id.
        id: String,
    },
    /// A container setting would break the backend's configuration format.
    #[error("container '{id}' has a line break or NUL byte in {key}")]
    InvalidConfigValue {
        /// Container id.
        id: String,
        /// Configuration key being written.
        key: &'static str,
    },
    /// Launching the container process failed.
    #[error("failed to launch container '{id}': {source}")]
    Spawn {
        /// Container id.
        id: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Signalling the container process failed.
    #[error("failed to signal container '{id}': {source}")]
    Signal {
        /// Container id.
        id: String,
        /// Underlying errno.
        #[source]
        source: nix::Error,
    },
    /// Filesystem or process IO failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being done.
        context: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Internal state could not be accessed.
    #[error("internal execution backend error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl DriverError {
    pub(crate) fn poisoned(what: &str) -> Self {
        Self::Internal {
            message: format!("{what} lock poisoned"),
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns `true` when selection failed because the name is unknown.
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}
