use std::path::PathBuf;

use dirs::home_dir;

use crate::logging::LogFormat;
use crate::socket::SocketEndpoint;

/// Bridge name that disables container networking.
pub const BRIDGE_DISABLED: &str = "none";

/// Graph driver used when none is configured.
pub const DEFAULT_GRAPH_DRIVER: &str = "vfs";

/// MTU used when the host default cannot be detected.
pub const DEFAULT_MTU: u32 = 1500;

/// Unix socket the API listens on when no hosts are configured.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/dockyard.sock";

/// Default log filter expression used by the daemon.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default pidfile path.
#[must_use]
pub fn default_pidfile() -> String {
    "/var/run/dockyard.pid".to_owned()
}

/// Default root directory.
#[must_use]
pub fn default_root() -> String {
    "/var/lib/dockyard".to_owned()
}

/// Containers are restarted by default.
#[must_use]
pub const fn default_auto_restart() -> bool {
    true
}

/// Firewall rules are managed by default.
#[must_use]
pub const fn default_enable_iptables() -> bool {
    true
}

/// IP forwarding is enabled by default.
#[must_use]
pub const fn default_enable_ip_forward() -> bool {
    true
}

/// Inter-container communication is allowed by default.
#[must_use]
pub const fn default_icc() -> bool {
    true
}

/// Default container binding address.
#[must_use]
pub fn default_default_ip() -> String {
    "0.0.0.0".to_owned()
}

/// Default execution backend.
#[must_use]
pub fn default_exec_driver() -> String {
    "native".to_owned()
}

/// Default owner group for unix API sockets.
#[must_use]
pub fn default_socket_group() -> String {
    "dockyard".to_owned()
}

/// Default certificate authority path.
#[must_use]
pub fn default_tls_ca() -> String {
    tls_material("ca.pem")
}

/// Default server certificate path.
#[must_use]
pub fn default_tls_cert() -> String {
    tls_material("cert.pem")
}

/// Default server key path.
#[must_use]
pub fn default_tls_key() -> String {
    tls_material("key.pem")
}

fn tls_material(file: &str) -> String {
    let mut path = home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".dockyard");
    path.push(file);
    path.to_string_lossy().into_owned()
}

/// Default log filter expression used by the daemon.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Seconds allowed for background initialisation.
#[must_use]
pub const fn default_init_timeout_secs() -> u64 {
    120
}

/// Seconds allowed for teardown after a termination signal.
#[must_use]
pub const fn default_shutdown_grace_secs() -> u64 {
    15
}

/// Listen socket used when no hosts are configured.
#[must_use]
pub fn default_socket_endpoint() -> SocketEndpoint {
    SocketEndpoint::unix(DEFAULT_SOCKET_PATH)
}
