//! The API subsystem: listeners bound by `serveapi`, opened by
//! `acceptconnections`.
//!
//! Boot dispatches `serveapi` while the daemon is still initialising, so the
//! sockets are live early and early clients wait in the listen backlog. Only
//! once the daemon has installed its commands does boot dispatch
//! `acceptconnections`, which opens the gate the accept loops
//! poll. Each connection carries one JSON request that is run through the
//! kernel; see [`request`] and [`response`] for the wire format.

mod connection;
mod errors;
mod gate;
mod listener;
pub mod request;
pub mod response;
mod server;
mod tls;

pub use self::connection::ConnectionStream;
pub use self::errors::{ApiError, ListenerError};
pub use self::gate::Readiness;
pub use self::request::ApiRequest;
pub use self::response::{ApiMessage, ResponseWriter, StreamTarget};
pub use self::server::{ApiHandle, BoundEndpoint, ServeOptions, register};
pub use self::tls::{TlsAcceptor, TlsMaterial, TlsStream};

pub(crate) const API_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::api");

/// Command that binds the API listeners.
pub const SERVE_API_COMMAND: &str = "serveapi";
/// Command that lets bound listeners start accepting.
pub const ACCEPT_CONNECTIONS_COMMAND: &str = "acceptconnections";
/// Name of the teardown hook the API registers.
pub const API_HOOK: &str = "api";
