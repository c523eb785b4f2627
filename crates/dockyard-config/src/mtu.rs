//! Host network MTU detection.

use std::fs;
use std::path::{Path, PathBuf};

use crate::defaults::DEFAULT_MTU;

/// Supplies the MTU substituted when none is configured.
pub trait MtuSource {
    /// MTU of the host's default route interface.
    fn default_mtu(&self) -> u32;
}

/// Reads the MTU of the default route interface from procfs and sysfs.
///
/// Falls back to [`DEFAULT_MTU`] when the route table has no default entry
/// or the interface MTU cannot be read.
#[derive(Debug, Clone)]
pub struct SystemMtuSource {
    route_table: PathBuf,
    sys_class_net: PathBuf,
}

impl SystemMtuSource {
    /// Source reading the live host tables.
    #[must_use]
    pub fn new() -> Self {
        Self::with_roots("/proc/net/route", "/sys/class/net")
    }

    /// Source reading tables rooted elsewhere, for tests and containers.
    #[must_use]
    pub fn with_roots(route_table: impl Into<PathBuf>, sys_class_net: impl Into<PathBuf>) -> Self {
        Self {
            route_table: route_table.into(),
            sys_class_net: sys_class_net.into(),
        }
    }

    fn default_route_iface(&self) -> Option<String> {
        let table = fs::read_to_string(&self.route_table).ok()?;
        default_iface_from_route_table(&table)
    }

    fn iface_mtu(&self, iface: &str) -> Option<u32> {
        read_u32(&self.sys_class_net.join(iface).join("mtu"))
    }
}

impl Default for SystemMtuSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MtuSource for SystemMtuSource {
    fn default_mtu(&self) -> u32 {
        self.default_route_iface()
            .and_then(|iface| self.iface_mtu(&iface))
            .filter(|mtu| *mtu > 0)
            .unwrap_or(DEFAULT_MTU)
    }
}

/// Returns a fixed MTU.
#[derive(Debug, Clone, Copy)]
pub struct FixedMtuSource(pub u32);

impl MtuSource for FixedMtuSource {
    fn default_mtu(&self) -> u32 {
        self.0
    }
}

// Columns: Iface Destination Gateway Flags ... with hex-encoded addresses.
fn default_iface_from_route_table(table: &str) -> Option<String> {
    table.lines().skip(1).find_map(|line| {
        let mut columns = line.split_whitespace();
        let iface = columns.next()?;
        let destination = columns.next()?;
        (destination == "00000000").then(|| iface.to_owned())
    })
}

fn read_u32(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;

    const ROUTES: &str = "Iface\tDestination\tGateway\tFlags\tRefCnt\tUse\tMetric\tMask\n\
        eth1\t0000A8C0\t00000000\t0001\t0\t0\t0\t00FFFFFF\n\
        eth0\t00000000\t0101A8C0\t0003\t0\t0\t0\t00000000\n";

    #[fixture]
    fn host() -> TempDir {
        TempDir::new().expect("temp dir")
    }

    #[rstest]
    fn reads_default_route_mtu(host: TempDir) {
        let routes = host.path().join("route");
        fs::write(&routes, ROUTES).expect("write routes");
        let iface = host.path().join("net").join("eth0");
        fs::create_dir_all(&iface).expect("iface dir");
        fs::write(iface.join("mtu"), "9000\n").expect("write mtu");

        let source = SystemMtuSource::with_roots(routes, host.path().join("net"));
        assert_eq!(source.default_mtu(), 9000);
    }

    #[rstest]
    fn falls_back_without_default_route(host: TempDir) {
        let routes = host.path().join("route");
        fs::write(&routes, "Iface\tDestination\n").expect("write routes");
        let source = SystemMtuSource::with_roots(routes, host.path().join("net"));
        assert_eq!(source.default_mtu(), DEFAULT_MTU);
    }

    #[rstest]
    fn falls_back_when_tables_are_missing(host: TempDir) {
        let source =
            SystemMtuSource::with_roots(host.path().join("absent"), host.path().join("net"));
        assert_eq!(source.default_mtu(), DEFAULT_MTU);
    }
}
