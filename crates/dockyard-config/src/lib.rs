//! Configuration inputs and validation for the Dockyard daemon.
//!
//! [`Config`] is the raw, layered input: defaults, an optional configuration
//! file, `DOCKYARD_*` environment variables and command-line flags are merged
//! by `ortho_config`. Nothing in the daemon reads [`Config`] directly.
//! [`validate`] checks it once, before any subsystem starts, and produces the
//! immutable [`DaemonConfig`] snapshot every subsystem reads from.

mod defaults;
mod logging;
mod mtu;
mod settings;
mod socket;
mod validate;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use self::defaults::{
    BRIDGE_DISABLED, DEFAULT_GRAPH_DRIVER, DEFAULT_LOG_FILTER, DEFAULT_MTU, DEFAULT_SOCKET_PATH,
    default_auto_restart, default_default_ip, default_enable_ip_forward, default_enable_iptables,
    default_exec_driver, default_icc, default_init_timeout_secs, default_log_filter,
    default_log_filter_string, default_log_format, default_pidfile, default_root,
    default_shutdown_grace_secs, default_socket_endpoint, default_socket_group, default_tls_ca,
    default_tls_cert, default_tls_key,
};
pub use self::logging::{LogFormat, LogFormatParseError};
pub use self::mtu::{FixedMtuSource, MtuSource, SystemMtuSource};
pub use self::settings::{
    ApiSettings, DaemonConfig, GraphOption, NetworkSettings, StorageSettings, TlsSettings,
};
pub use self::socket::{SocketEndpoint, SocketParseError};
pub use self::validate::{ConfigError, validate, validate_with};

/// Layered daemon configuration as supplied by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "DOCKYARD")]
pub struct Config {
    /// Path of the pidfile written while the daemon runs.
    #[serde(default = "defaults::default_pidfile")]
    pub pidfile: String,
    /// Root directory for daemon state.
    #[serde(default = "defaults::default_root")]
    pub root: String,
    /// Restart containers that were running when the daemon last stopped.
    #[serde(default = "defaults::default_auto_restart")]
    pub auto_restart: bool,
    /// Manage firewall rules for container networking.
    #[serde(default = "defaults::default_enable_iptables")]
    pub enable_iptables: bool,
    /// Enable kernel IP forwarding.
    #[serde(default = "defaults::default_enable_ip_forward")]
    pub enable_ip_forward: bool,
    /// CIDR address assigned to the bridge the daemon creates.
    #[serde(default)]
    pub bridge_ip: Option<String>,
    /// Existing bridge to attach containers to; `none` disables networking.
    #[serde(default)]
    pub bridge_iface: Option<String>,
    /// Default address used when binding container ports.
    #[serde(default = "defaults::default_default_ip")]
    pub default_ip: String,
    /// Allow unrestricted traffic between containers.
    #[serde(default = "defaults::default_icc")]
    pub inter_container_communication: bool,
    /// Storage graph driver; picks the default driver when unset.
    #[serde(default)]
    pub graph_driver: Option<String>,
    /// Execution backend used to run containers.
    #[serde(default = "defaults::default_exec_driver")]
    pub exec_driver: String,
    /// Require mandatory-access-control labelling for containers.
    #[serde(default)]
    pub mandatory_isolation: bool,
    /// Graph driver options in `key=value` form.
    #[serde(default)]
    pub graph_options: Vec<String>,
    /// DNS servers handed to containers.
    #[serde(default)]
    pub dns: Vec<String>,
    /// DNS search domains handed to containers.
    #[serde(default)]
    pub dns_search: Vec<String>,
    /// Network MTU; zero selects the host default.
    #[serde(default)]
    pub mtu: u32,
    /// API listen sockets (`unix://path` or `tcp://host:port`).
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Add CORS headers to API responses.
    #[serde(default)]
    pub enable_cors: bool,
    /// Group that owns unix API sockets.
    #[serde(default = "defaults::default_socket_group")]
    pub socket_group: String,
    /// Serve the API over TLS.
    #[serde(default)]
    pub tls: bool,
    /// Serve the API over TLS and verify client certificates.
    #[serde(default)]
    pub tls_verify: bool,
    /// Certificate authority used to verify clients.
    #[serde(default = "defaults::default_tls_ca")]
    pub tls_ca: String,
    /// Server certificate.
    #[serde(default = "defaults::default_tls_cert")]
    pub tls_cert: String,
    /// Server private key.
    #[serde(default = "defaults::default_tls_key")]
    pub tls_key: String,
    /// `tracing` filter expression.
    #[serde(default = "defaults::default_log_filter_string")]
    pub log_filter: String,
    /// Log output format.
    #[serde(default = "defaults::default_log_format")]
    pub log_format: LogFormat,
    /// Seconds to wait for background initialisation before giving up.
    #[serde(default = "defaults::default_init_timeout_secs")]
    pub init_timeout_secs: u64,
    /// Seconds allowed for teardown after a termination signal.
    #[serde(default = "defaults::default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Config {
    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Returns `true` when the bridge name is the networking-disabled sentinel.
    #[must_use]
    pub fn network_disabled(&self) -> bool {
        self.bridge_iface.as_deref() == Some(BRIDGE_DISABLED)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pidfile: default_pidfile(),
            root: default_root(),
            auto_restart: default_auto_restart(),
            enable_iptables: default_enable_iptables(),
            enable_ip_forward: default_enable_ip_forward(),
            bridge_ip: None,
            bridge_iface: None,
            default_ip: default_default_ip(),
            inter_container_communication: default_icc(),
            graph_driver: None,
            exec_driver: default_exec_driver(),
            mandatory_isolation: false,
            graph_options: Vec::new(),
            dns: Vec::new(),
            dns_search: Vec::new(),
            mtu: 0,
            hosts: Vec::new(),
            enable_cors: false,
            socket_group: default_socket_group(),
            tls: false,
            tls_verify: false,
            tls_ca: default_tls_ca(),
            tls_cert: default_tls_cert(),
            tls_key: default_tls_key(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            init_timeout_secs: default_init_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}
