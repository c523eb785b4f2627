//! Address allocation inside the bridge network.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;

/// Hands out addresses from a bridge network, never the network address,
/// the broadcast address or the gateway.
#[derive(Debug)]
pub(super) struct IpAllocator {
    network: Ipv4Network,
    leases: BTreeMap<String, Ipv4Addr>,
}

impl IpAllocator {
    /// `network.ip()` is the gateway address.
    pub(super) fn new(network: Ipv4Network) -> Self {
        Self {
            network,
            leases: BTreeMap::new(),
        }
    }

    pub(super) fn network(&self) -> Ipv4Network {
        self.network
    }

    pub(super) fn lease(&self, owner: &str) -> Option<Ipv4Addr> {
        self.leases.get(owner).copied()
    }

    /// Lowest free address, or `None` when the network is exhausted.
    pub(super) fn allocate(&mut self, owner: &str) -> Option<Ipv4Addr> {
        let reserved = [
            self.network.network(),
            self.network.broadcast(),
            self.network.ip(),
        ];
        let free = self
            .network
            .iter()
            .find(|ip| !reserved.contains(ip) && !self.leases.values().any(|leased| leased == ip))?;
        self.leases.insert(owner.to_owned(), free);
        Some(free)
    }

    pub(super) fn release(&mut self, owner: &str) -> Option<Ipv4Addr> {
        self.leases.remove(owner)
    }

    pub(super) fn release_all(&mut self) -> usize {
        let released = self.leases.len();
        self.leases.clear();
        released
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn allocator(cidr: &str) -> IpAllocator {
        IpAllocator::new(cidr.parse().expect("valid cidr"))
    }

    #[rstest]
    fn skips_network_and_gateway() {
        let mut pool = allocator("10.0.0.1/24");
        assert_eq!(pool.allocate("a"), Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(pool.allocate("b"), Some(Ipv4Addr::new(10, 0, 0, 3)));
        assert_eq!(pool.lease("a"), Some(Ipv4Addr::new(10, 0, 0, 2)));
    }

    #[rstest]
    fn reuses_released_addresses() {
        let mut pool = allocator("10.0.0.1/24");
        let first = pool.allocate("a");
        pool.allocate("b");
        assert_eq!(pool.release("a"), first);
        assert_eq!(pool.allocate("c"), first);
    }

    #[rstest]
    fn exhausts_small_networks() {
        // .0 network, .1 gateway, .3 broadcast: only .2 is usable.
        let mut pool = allocator("192.168.5.1/30");
        assert_eq!(pool.allocate("a"), Some(Ipv4Addr::new(192, 168, 5, 2)));
        assert_eq!(pool.allocate("b"), None);
        assert_eq!(pool.release_all(), 1);
    }
}
