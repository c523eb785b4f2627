//! Startup checks run before any subsystem is constructed.
//!
//! Every rule here is a fatal configuration error: the daemon refuses to
//! start rather than run with settings that contradict each other.

use std::net::{AddrParseError, IpAddr};
use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::Config;
use crate::defaults::{BRIDGE_DISABLED, DEFAULT_GRAPH_DRIVER, default_socket_endpoint};
use crate::mtu::{MtuSource, SystemMtuSource};
use crate::settings::{
    ApiSettings, DaemonConfig, GraphOption, NetworkSettings, StorageSettings, TlsSettings,
};
use crate::socket::{SocketEndpoint, SocketParseError};

/// Fatal configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Both a bridge name and a bridge address were supplied.
    #[error("bridge name '{iface}' and bridge address '{ip}' are mutually exclusive")]
    BridgeConflict {
        /// Configured bridge name.
        iface: String,
        /// Configured bridge address.
        ip: String,
    },
    /// Inter-container communication was disabled without firewall rules.
    #[error(
        "disabling inter-container communication requires firewall rules; \
         enable iptables or allow inter-container communication"
    )]
    IccRequiresIptables,
    /// The default container address is not an IP literal.
    #[error("default IP '{value}' is not a valid address: {source}")]
    InvalidDefaultIp {
        /// Rejected value.
        value: String,
        /// Underlying parse error.
        #[source]
        source: AddrParseError,
    },
    /// A DNS server is not an IP literal.
    #[error("DNS server '{value}' is not a valid address: {source}")]
    InvalidDns {
        /// Rejected value.
        value: String,
        /// Underlying parse error.
        #[source]
        source: AddrParseError,
    },
    /// A listen address could not be parsed.
    #[error("invalid listen address '{value}': {source}")]
    InvalidHost {
        /// Rejected value.
        value: String,
        /// Underlying parse error.
        #[source]
        source: SocketParseError,
    },
    /// A graph driver option is not in `key=value` form.
    #[error("graph option '{value}' is not in key=value form")]
    InvalidGraphOption {
        /// Rejected value.
        value: String,
    },
    /// A required path is empty.
    #[error("{field} must not be empty")]
    EmptyPath {
        /// Configuration field name.
        field: &'static str,
    },
    /// The execution backend name is empty.
    #[error("an execution backend must be named")]
    MissingExecDriver,
    /// A timeout of zero would make the daemon give up immediately.
    #[error("{field} must be greater than zero")]
    ZeroTimeout {
        /// Configuration field name.
        field: &'static str,
    },
}

/// Validates `config` using the host's default MTU.
///
/// # Errors
///
/// Returns the first [`ConfigError`] found.
pub fn validate(config: &Config) -> Result<DaemonConfig, ConfigError> {
    validate_with(config, &SystemMtuSource::new())
}

/// Validates `config`, asking `mtu_source` for the MTU when none is set.
///
/// # Errors
///
/// Returns the first [`ConfigError`] found.
pub fn validate_with(
    config: &Config,
    mtu_source: &dyn MtuSource,
) -> Result<DaemonConfig, ConfigError> {
    let network = network_settings(config, mtu_source)?;
    let storage = storage_settings(config)?;
    let api = api_settings(config)?;

    let exec_driver = config.exec_driver.trim();
    if exec_driver.is_empty() {
        return Err(ConfigError::MissingExecDriver);
    }

    Ok(DaemonConfig {
        pidfile: required_path("pidfile", &config.pidfile)?,
        root: required_path("root", &config.root)?,
        auto_restart: config.auto_restart,
        exec_driver: exec_driver.to_owned(),
        mandatory_isolation: config.mandatory_isolation,
        storage,
        network,
        api,
        log_filter: config.log_filter.clone(),
        log_format: config.log_format,
        init_timeout: non_zero_secs("init_timeout_secs", config.init_timeout_secs)?,
        shutdown_grace: non_zero_secs("shutdown_grace_secs", config.shutdown_grace_secs)?,
    })
}

fn network_settings(
    config: &Config,
    mtu_source: &dyn MtuSource,
) -> Result<NetworkSettings, ConfigError> {
    let bridge_iface = non_empty(config.bridge_iface.as_deref());
    let bridge_ip = non_empty(config.bridge_ip.as_deref());
    if let (Some(iface), Some(ip)) = (bridge_iface, bridge_ip) {
        return Err(ConfigError::BridgeConflict {
            iface: iface.to_owned(),
            ip: ip.to_owned(),
        });
    }
    if !config.enable_iptables && !config.inter_container_communication {
        return Err(ConfigError::IccRequiresIptables);
    }

    let default_ip = config
        .default_ip
        .trim()
        .parse::<IpAddr>()
        .map_err(|source| ConfigError::InvalidDefaultIp {
            value: config.default_ip.clone(),
            source,
        })?;
    let dns = config
        .dns
        .iter()
        .map(|server| {
            server
                .trim()
                .parse::<IpAddr>()
                .map_err(|source| ConfigError::InvalidDns {
                    value: server.clone(),
                    source,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mtu = if config.mtu == 0 {
        mtu_source.default_mtu()
    } else {
        config.mtu
    };

    Ok(NetworkSettings {
        disable_network: bridge_iface == Some(BRIDGE_DISABLED),
        enable_iptables: config.enable_iptables,
        enable_ip_forward: config.enable_ip_forward,
        bridge_iface: bridge_iface.map(str::to_owned),
        bridge_ip: bridge_ip.map(str::to_owned),
        default_ip,
        inter_container_communication: config.inter_container_communication,
        mtu,
        dns,
        dns_search: config.dns_search.clone(),
    })
}

fn storage_settings(config: &Config) -> Result<StorageSettings, ConfigError> {
    let graph_options = config
        .graph_options
        .iter()
        .map(|raw| parse_graph_option(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let graph_driver = non_empty(config.graph_driver.as_deref()).unwrap_or(DEFAULT_GRAPH_DRIVER);
    Ok(StorageSettings {
        graph_driver: graph_driver.to_owned(),
        graph_options,
    })
}

fn parse_graph_option(raw: &str) -> Result<GraphOption, ConfigError> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok(GraphOption {
            key: key.trim().to_ascii_lowercase(),
            value: value.trim().to_owned(),
        }),
        _ => Err(ConfigError::InvalidGraphOption {
            value: raw.to_owned(),
        }),
    }
}

fn api_settings(config: &Config) -> Result<ApiSettings, ConfigError> {
    let mut hosts = config
        .hosts
        .iter()
        .map(|host| {
            host.trim()
                .parse::<SocketEndpoint>()
                .map_err(|source| ConfigError::InvalidHost {
                    value: host.clone(),
                    source,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    if hosts.is_empty() {
        hosts.push(default_socket_endpoint());
    }

    Ok(ApiSettings {
        hosts,
        enable_cors: config.enable_cors,
        socket_group: config.socket_group.trim().to_owned(),
        tls: TlsSettings {
            enabled: config.tls || config.tls_verify,
            verify: config.tls_verify,
            ca: Utf8PathBuf::from(&config.tls_ca),
            cert: Utf8PathBuf::from(&config.tls_cert),
            key: Utf8PathBuf::from(&config.tls_key),
        },
    })
}

fn required_path(field: &'static str, value: &str) -> Result<Utf8PathBuf, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyPath { field });
    }
    Ok(Utf8PathBuf::from(trimmed))
}

fn non_zero_secs(field: &'static str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::ZeroTimeout { field });
    }
    Ok(Duration::from_secs(secs))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
