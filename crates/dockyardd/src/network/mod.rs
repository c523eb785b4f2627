//! Bridge network driver.
//!
//! `init_networkdriver` reads the network settings from its job variables,
//! validates the bridge and binds the `allocate_interface` and
//! `release_interface` commands. Host bridge and firewall plumbing is left to
//! the platform; the driver owns address bookkeeping only.

mod allocator;

use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use dockyard_engine::{Engine, EngineError, HandlerError, Job};
use ipnetwork::Ipv4Network;
use serde::Serialize;
use tracing::info;

use self::allocator::IpAllocator;

/// Command that initialises the bridge driver.
pub const INIT_NETWORK_COMMAND: &str = "init_networkdriver";
/// Command that leases an address to a container.
pub const ALLOCATE_INTERFACE_COMMAND: &str = "allocate_interface";
/// Command that returns a container's address to the pool.
pub const RELEASE_INTERFACE_COMMAND: &str = "release_interface";
/// Name of the teardown hook the driver registers.
pub const NETWORK_HOOK: &str = "network";

/// Bridge created when none is configured.
pub const DEFAULT_BRIDGE: &str = "dockyard0";
/// Bridge address used when no CIDR is configured.
pub const DEFAULT_BRIDGE_CIDR: &str = "172.17.42.1/16";

const NETWORK_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::network");
const MAX_IFACE_NAME: usize = 15;
const MAX_PREFIX: u8 = 30;

/// Binds `init_networkdriver`.
///
/// # Errors
///
/// Fails when the command name is taken.
pub fn register(engine: &Engine) -> Result<(), EngineError> {
    engine.register(INIT_NETWORK_COMMAND, init_networkdriver)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BridgeSettings {
    iface: String,
    network: Ipv4Network,
    mtu: u32,
    default_ip: IpAddr,
    enable_iptables: bool,
    enable_ip_forward: bool,
    icc: bool,
}

impl BridgeSettings {
    fn from_job(job: &Job) -> Result<Self, HandlerError> {
        let env = job.env();
        let iface = match env.get_or_empty("BridgeIface") {
            "" => DEFAULT_BRIDGE,
            name => name,
        };
        validate_iface(iface)?;

        let cidr = match env.get_or_empty("BridgeIP") {
            "" => DEFAULT_BRIDGE_CIDR,
            cidr => cidr,
        };
        let network: Ipv4Network = cidr.parse().map_err(|error| {
            HandlerError::with_source(format!("invalid bridge address '{cidr}'"), error)
        })?;
        if network.prefix() > MAX_PREFIX {
            return Err(HandlerError::new(format!(
                "bridge network {cidr} leaves no room for containers"
            )));
        }
        if network.ip() == network.network() || network.ip() == network.broadcast() {
            return Err(HandlerError::new(format!(
                "bridge address {cidr} is not a host address"
            )));
        }

        let mtu = env
            .get_int("Mtu")?
            .map(u32::try_from)
            .transpose()
            .map_err(|error| HandlerError::with_source("invalid Mtu", error))?
            .filter(|mtu| *mtu > 0)
            .unwrap_or(dockyard_config::DEFAULT_MTU);

        let raw_default_ip = env.get_or_empty("DefaultBindingIP");
        let default_ip = match raw_default_ip {
            "" => IpAddr::from([0, 0, 0, 0]),
            raw => raw.parse().map_err(|error| {
                HandlerError::with_source(format!("invalid DefaultBindingIP '{raw}'"), error)
            })?,
        };

        Ok(Self {
            iface: iface.to_owned(),
            network,
            mtu,
            default_ip,
            enable_iptables: env.get_bool("EnableIptables"),
            enable_ip_forward: env.get_bool("EnableIpForward"),
            icc: env.get_bool("InterContainerCommunication"),
        })
    }
}

fn validate_iface(name: &str) -> Result<(), HandlerError> {
    let valid = name.len() <= MAX_IFACE_NAME
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(HandlerError::new(format!(
            "invalid bridge interface name '{name}'"
        )))
    }
}

struct Bridge {
    settings: BridgeSettings,
    pool: Mutex<IpAllocator>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Interface {
    #[serde(rename = "IP")]
    ip: String,
    mask: String,
    #[serde(rename = "IPPrefixLen")]
    prefix_len: u8,
    gateway: String,
    bridge: String,
    mtu: u32,
}

impl Bridge {
    fn allocate(&self, job: &mut Job) -> Result<(), HandlerError> {
        let owner = owner_arg(job)?;
        let mut pool = self
            .pool
            .lock()
            .map_err(|_| HandlerError::new("address pool lock poisoned"))?;
        if pool.lease(&owner).is_some() {
            return Err(HandlerError::new(format!(
                "{owner} already has a network interface"
            )));
        }
        let ip = pool.allocate(&owner).ok_or_else(|| {
            HandlerError::new(format!(
                "no addresses left in bridge network {}",
                pool.network()
            ))
        })?;
        drop(pool);

        let network = self.settings.network;
        let interface = Interface {
            ip: ip.to_string(),
            mask: network.mask().to_string(),
            prefix_len: network.prefix(),
            gateway: network.ip().to_string(),
            bridge: self.settings.iface.clone(),
            mtu: self.settings.mtu,
        };
        let rendered = serde_json::to_string(&interface)
            .map_err(|error| HandlerError::with_source("cannot encode interface", error))?;
        job.write_stdout(&rendered);
        Ok(())
    }

    fn release(&self, job: &mut Job) -> Result<(), HandlerError> {
        let owner = owner_arg(job)?;
        let released = self
            .pool
            .lock()
            .map_err(|_| HandlerError::new("address pool lock poisoned"))?
            .release(&owner);
        match released {
            Some(ip) => {
                job.write_stdout(&ip.to_string());
                Ok(())
            }
            None => Err(HandlerError::new(format!(
                "{owner} has no network interface"
            ))),
        }
    }

    fn teardown(&self) -> Result<(), HandlerError> {
        let released = self
            .pool
            .lock()
            .map_err(|_| HandlerError::new("address pool lock poisoned"))?
            .release_all();
        info!(
            target: NETWORK_TARGET,
            bridge = %self.settings.iface,
            released,
            "bridge released"
        );
        Ok(())
    }
}

fn owner_arg(job: &Job) -> Result<String, HandlerError> {
    job.arg(0)
        .map(str::to_owned)
        .ok_or_else(|| HandlerError::new(format!("usage: {} <id>", job.name())))
}

fn init_networkdriver(job: &mut Job) -> Result<(), HandlerError> {
    let settings = BridgeSettings::from_job(job)?;
    info!(
        target: NETWORK_TARGET,
        bridge = %settings.iface,
        network = %settings.network,
        mtu = settings.mtu,
        default_ip = %settings.default_ip,
        iptables = settings.enable_iptables,
        ip_forward = settings.enable_ip_forward,
        icc = settings.icc,
        "bridge configured"
    );

    let bridge = Arc::new(Bridge {
        pool: Mutex::new(IpAllocator::new(settings.network)),
        settings,
    });
    let engine = job.engine().clone();

    let bound = Arc::clone(&bridge);
    engine.on_shutdown(NETWORK_HOOK, move || bound.teardown())?;
    let bound = Arc::clone(&bridge);
    engine.register(
        ALLOCATE_INTERFACE_COMMAND,
        move |job: &mut Job| -> Result<(), HandlerError> { bound.allocate(job) },
    )?;
    engine.register(
        RELEASE_INTERFACE_COMMAND,
        move |job: &mut Job| -> Result<(), HandlerError> { bridge.release(job) },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn engine() -> Engine {
        let engine = Engine::new();
        register(&engine).expect("register network driver");
        engine
    }

    fn init(engine: &Engine, vars: &[(&str, &str)]) -> Result<(), dockyard_engine::JobError> {
        let mut job = engine.job(INIT_NETWORK_COMMAND, std::iter::empty::<String>());
        for (key, value) in vars {
            job.setenv(*key, *value);
        }
        job.run()
    }

    fn interface(engine: &Engine, owner: &str) -> serde_json::Value {
        let mut job = engine.job(ALLOCATE_INTERFACE_COMMAND, [owner]);
        job.run().expect("allocate interface");
        serde_json::from_str(job.stdout_text().trim()).expect("interface json")
    }

    #[rstest]
    fn default_bridge_allocates_from_default_network(engine: Engine) {
        init(&engine, &[("Mtu", "9000")]).expect("init network");
        let first = interface(&engine, "web");
        assert_eq!(first["IP"], "172.17.0.1");
        assert_eq!(first["Gateway"], "172.17.42.1");
        assert_eq!(first["Mask"], "255.255.0.0");
        assert_eq!(first["IPPrefixLen"], 16);
        assert_eq!(first["Bridge"], DEFAULT_BRIDGE);
        assert_eq!(first["Mtu"], 9000);
    }

    #[rstest]
    fn configured_cidr_is_used(engine: Engine) {
        init(&engine, &[("BridgeIP", "10.10.0.1/24")]).expect("init network");
        assert_eq!(interface(&engine, "web")["IP"], "10.10.0.2");
        assert_eq!(interface(&engine, "db")["IP"], "10.10.0.3");
    }

    #[rstest]
    fn duplicate_allocation_fails(engine: Engine) {
        init(&engine, &[]).expect("init network");
        interface(&engine, "web");
        let mut job = engine.job(ALLOCATE_INTERFACE_COMMAND, ["web"]);
        assert!(job.run().is_err());
    }

    #[rstest]
    fn release_returns_address(engine: Engine) {
        init(&engine, &[("BridgeIP", "10.10.0.1/24")]).expect("init network");
        interface(&engine, "web");
        let mut release = engine.job(RELEASE_INTERFACE_COMMAND, ["web"]);
        release.run().expect("release interface");
        assert_eq!(release.stdout_text().trim(), "10.10.0.2");
        let mut again = engine.job(RELEASE_INTERFACE_COMMAND, ["web"]);
        assert!(again.run().is_err());
    }

    #[rstest]
    #[case(&[("BridgeIP", "10.0.0.1")][..])]
    #[case(&[("BridgeIP", "10.0.0.1/31")][..])]
    #[case(&[("BridgeIP", "10.0.0.0/24")][..])]
    #[case(&[("BridgeIface", "an-interface-name-too-long")][..])]
    #[case(&[("BridgeIface", "br 0")][..])]
    #[case(&[("DefaultBindingIP", "999.1.1.1")][..])]
    fn invalid_settings_are_rejected(engine: Engine, #[case] vars: &[(&str, &str)]) {
        assert!(init(&engine, vars).is_err());
        assert!(!engine.is_registered(ALLOCATE_INTERFACE_COMMAND));
    }

    #[rstest]
    fn teardown_hook_is_registered(engine: Engine) {
        init(&engine, &[]).expect("init network");
        let report = engine.shutdown();
        assert_eq!(report.attempted(), [NETWORK_HOOK.to_owned()]);
        assert!(report.is_clean());
    }
}
