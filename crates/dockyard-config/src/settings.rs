//! The validated, immutable configuration snapshot.

use std::net::IpAddr;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};

use crate::logging::LogFormat;
use crate::socket::SocketEndpoint;

/// Validated settings shared read-only by every subsystem.
///
/// Built only by [`validate`](crate::validate); there is no way to mutate a
/// snapshot once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub(crate) pidfile: Utf8PathBuf,
    pub(crate) root: Utf8PathBuf,
    pub(crate) auto_restart: bool,
    pub(crate) exec_driver: String,
    pub(crate) mandatory_isolation: bool,
    pub(crate) storage: StorageSettings,
    pub(crate) network: NetworkSettings,
    pub(crate) api: ApiSettings,
    pub(crate) log_filter: String,
    pub(crate) log_format: LogFormat,
    pub(crate) init_timeout: Duration,
    pub(crate) shutdown_grace: Duration,
}

impl DaemonConfig {
    /// Pidfile path.
    #[must_use]
    pub fn pidfile(&self) -> &Utf8Path {
        &self.pidfile
    }

    /// Root directory for daemon state.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Whether flagged containers are restarted on boot.
    #[must_use]
    pub const fn auto_restart(&self) -> bool {
        self.auto_restart
    }

    /// Name of the execution backend to select.
    #[must_use]
    pub fn exec_driver(&self) -> &str {
        &self.exec_driver
    }

    /// Whether mandatory-access-control labelling is required.
    #[must_use]
    pub const fn mandatory_isolation(&self) -> bool {
        self.mandatory_isolation
    }

    /// Storage graph settings.
    #[must_use]
    pub const fn storage(&self) -> &StorageSettings {
        &self.storage
    }

    /// Container network settings.
    #[must_use]
    pub const fn network(&self) -> &NetworkSettings {
        &self.network
    }

    /// API listener settings.
    #[must_use]
    pub const fn api(&self) -> &ApiSettings {
        &self.api
    }

    /// `tracing` filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Bound on background initialisation.
    #[must_use]
    pub const fn init_timeout(&self) -> Duration {
        self.init_timeout
    }

    /// Bound on teardown after a termination signal.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }
}

/// A single `key=value` graph driver option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphOption {
    /// Option name.
    pub key: String,
    /// Option value, possibly empty.
    pub value: String,
}

/// Storage graph settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub(crate) graph_driver: String,
    pub(crate) graph_options: Vec<GraphOption>,
}

impl StorageSettings {
    /// Graph driver name, with the default already substituted.
    #[must_use]
    pub fn graph_driver(&self) -> &str {
        &self.graph_driver
    }

    /// Graph driver options in the order given.
    #[must_use]
    pub fn graph_options(&self) -> &[GraphOption] {
        &self.graph_options
    }
}

/// Container network settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSettings {
    pub(crate) disable_network: bool,
    pub(crate) enable_iptables: bool,
    pub(crate) enable_ip_forward: bool,
    pub(crate) bridge_iface: Option<String>,
    pub(crate) bridge_ip: Option<String>,
    pub(crate) default_ip: IpAddr,
    pub(crate) inter_container_communication: bool,
    pub(crate) mtu: u32,
    pub(crate) dns: Vec<IpAddr>,
    pub(crate) dns_search: Vec<String>,
}

impl NetworkSettings {
    /// `true` when the bridge name was the networking-disabled sentinel.
    #[must_use]
    pub const fn disable_network(&self) -> bool {
        self.disable_network
    }

    /// Whether firewall rules are managed.
    #[must_use]
    pub const fn enable_iptables(&self) -> bool {
        self.enable_iptables
    }

    /// Whether IP forwarding is enabled.
    #[must_use]
    pub const fn enable_ip_forward(&self) -> bool {
        self.enable_ip_forward
    }

    /// Existing bridge to attach to, if configured.
    #[must_use]
    pub fn bridge_iface(&self) -> Option<&str> {
        self.bridge_iface.as_deref()
    }

    /// Bridge CIDR, if configured.
    #[must_use]
    pub fn bridge_ip(&self) -> Option<&str> {
        self.bridge_ip.as_deref()
    }

    /// Default container binding address.
    #[must_use]
    pub const fn default_ip(&self) -> IpAddr {
        self.default_ip
    }

    /// Whether containers may talk to each other freely.
    #[must_use]
    pub const fn inter_container_communication(&self) -> bool {
        self.inter_container_communication
    }

    /// Effective MTU; never zero.
    #[must_use]
    pub const fn mtu(&self) -> u32 {
        self.mtu
    }

    /// DNS servers handed to containers.
    #[must_use]
    pub fn dns(&self) -> &[IpAddr] {
        &self.dns
    }

    /// DNS search domains handed to containers.
    #[must_use]
    pub fn dns_search(&self) -> &[String] {
        &self.dns_search
    }
}

/// API listener settings passed to `serveapi` as named configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
    pub(crate) hosts: Vec<SocketEndpoint>,
    pub(crate) enable_cors: bool,
    pub(crate) socket_group: String,
    pub(crate) tls: TlsSettings,
}

impl ApiSettings {
    /// Listen sockets; never empty.
    #[must_use]
    pub fn hosts(&self) -> &[SocketEndpoint] {
        &self.hosts
    }

    /// Whether CORS headers are added.
    #[must_use]
    pub const fn enable_cors(&self) -> bool {
        self.enable_cors
    }

    /// Group owning unix sockets.
    #[must_use]
    pub fn socket_group(&self) -> &str {
        &self.socket_group
    }

    /// TLS settings.
    #[must_use]
    pub const fn tls(&self) -> &TlsSettings {
        &self.tls
    }
}

/// TLS material locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    pub(crate) enabled: bool,
    pub(crate) verify: bool,
    pub(crate) ca: Utf8PathBuf,
    pub(crate) cert: Utf8PathBuf,
    pub(crate) key: Utf8PathBuf,
}

impl TlsSettings {
    /// Whether the API is served over TLS. Always `true` when
    /// [`TlsSettings::verify`] is.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Whether client certificates are verified.
    #[must_use]
    pub const fn verify(&self) -> bool {
        self.verify
    }

    /// Certificate authority path.
    #[must_use]
    pub fn ca(&self) -> &Utf8Path {
        &self.ca
    }

    /// Server certificate path.
    #[must_use]
    pub fn cert(&self) -> &Utf8Path {
        &self.cert
    }

    /// Server key path.
    #[must_use]
    pub fn key(&self) -> &Utf8Path {
        &self.key
    }
}
