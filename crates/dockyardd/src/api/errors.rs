//! Error types for the API subsystem.

use std::io;
use std::net::SocketAddr;

use camino::Utf8PathBuf;
use dockyard_config::SocketParseError;
use thiserror::Error;

/// Errors surfaced while binding or running a socket listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Host name resolution failed.
    #[error("failed to resolve TCP address {host}:{port}: {source}")]
    Resolve {
        /// Host being resolved.
        host: String,
        /// Requested port.
        port: u16,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Resolution yielded nothing to bind.
    #[error("no TCP addresses resolved for {host}:{port}")]
    ResolveEmpty {
        /// Host being resolved.
        host: String,
        /// Requested port.
        port: u16,
    },
    /// Binding a TCP socket failed.
    #[error("failed to bind TCP listener at {addr}: {source}")]
    BindTcp {
        /// Address being bound.
        addr: SocketAddr,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The listener could not be switched to non-blocking mode.
    #[error("failed to enable non-blocking listener: {source}")]
    NonBlocking {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Binding a unix socket failed.
    #[error("failed to bind unix listener at {path}: {source}")]
    BindUnix {
        /// Socket path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Another process is serving on the socket.
    #[error("existing unix socket {path} is already in use")]
    UnixInUse {
        /// Socket path.
        path: Utf8PathBuf,
    },
    /// Something other than a socket occupies the path.
    #[error("unix socket path {path} is not a socket")]
    UnixNotSocket {
        /// Socket path.
        path: Utf8PathBuf,
    },
    /// The existing socket path could not be inspected.
    #[error("failed to inspect unix socket {path}: {source}")]
    UnixInspect {
        /// Socket path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A stale socket file could not be removed.
    #[error("failed to remove stale unix socket {path}: {source}")]
    UnixCleanup {
        /// Socket path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The accept loop panicked.
    #[error("listener thread panicked")]
    ThreadPanic,
    /// The accept thread could not be spawned.
    #[error("failed to spawn listener thread: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Errors raised by the `serveapi` and `acceptconnections` commands.
#[derive(Debug, Error)]
pub enum ApiError {
    /// `serveapi` was given no listen addresses.
    #[error("serveapi requires at least one listen address")]
    NoHosts,
    /// A listen address did not parse.
    #[error("invalid listen address '{value}': {source}")]
    InvalidHost {
        /// Address as given.
        value: String,
        /// Parse failure.
        #[source]
        source: SocketParseError,
    },
    /// `serveapi` already ran in this process.
    #[error("the API is already being served")]
    AlreadyServing,
    /// TLS was requested but no acceptor is installed.
    #[error("TLS requested but no TLS acceptor is available")]
    TlsUnavailable,
    /// A TLS certificate file is missing.
    #[error("TLS {role} file {path} does not exist")]
    TlsMaterialMissing {
        /// Which file (`ca`, `cert`, `key`).
        role: &'static str,
        /// Expected location.
        path: Utf8PathBuf,
    },
    /// The socket group does not exist.
    #[error("socket group '{group}' does not exist")]
    UnknownGroup {
        /// Group name.
        group: String,
    },
    /// Looking up or applying the socket group failed.
    #[error("failed to apply group '{group}' to {path}: {source}")]
    SocketOwnership {
        /// Group name.
        group: String,
        /// Socket path.
        path: Utf8PathBuf,
        /// Underlying errno.
        #[source]
        source: nix::Error,
    },
    /// Socket permissions could not be set.
    #[error("failed to set permissions on {path}: {source}")]
    SocketMode {
        /// Socket path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Binding or starting a listener failed.
    #[error(transparent)]
    Listener(#[from] ListenerError),
    /// `acceptconnections` arrived before the daemon signalled readiness.
    #[error("daemon is not ready to accept connections")]
    NotReady,
    /// `acceptconnections` arrived before `serveapi`.
    #[error("acceptconnections requires serveapi to run first")]
    NotServing,
    /// Internal state could not be accessed.
    #[error("internal API error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl ApiError {
    pub(crate) fn poisoned(what: &str) -> Self {
        Self::Internal {
            message: format!("{what} lock poisoned"),
        }
    }
}
