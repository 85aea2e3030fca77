use bacroute_core::MacAddr;
use std::collections::{BTreeSet, HashMap};

/// Health of a known router, driven by the busy/available notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterStatus {
    Available,
    Busy,
    Disconnected,
    Unreachable,
}

/// One router and the destination networks currently reachable through it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterInfo {
    /// The directly connected network the router is reachable through.
    /// `None` when it was learned on an unnumbered adapter.
    pub source_network: Option<u16>,
    /// The router's station address on that network.
    pub address: MacAddr,
    /// Destination networks this router claims.
    pub networks: BTreeSet<u16>,
    pub status: RouterStatus,
}

type RouterKey = (Option<u16>, MacAddr);

/// Learned routes, keyed both ways.
///
/// `routers` owns one record per `(source network, address)` pair; `networks`
/// maps a destination network to the key of the record serving it and never
/// to the record itself. A destination network belongs to at most one record
/// at a time: claiming it for a new router detaches it from the previous
/// owner, and an owner left with no networks is dropped.
#[derive(Debug, Default)]
pub struct RouterInfoCache {
    routers: HashMap<RouterKey, RouterInfo>,
    networks: HashMap<u16, RouterKey>,
}

impl RouterInfoCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The router currently serving `dnet`, if any.
    pub fn get_router_info(&self, dnet: u16) -> Option<&RouterInfo> {
        let key = self.networks.get(&dnet)?;
        self.routers.get(key)
    }

    /// Records that the networks in `networks` are reachable through the
    /// router at `address` on `source_network`. An empty claim changes
    /// nothing.
    pub fn update_router_info(
        &mut self,
        source_network: Option<u16>,
        address: MacAddr,
        networks: &[u16],
    ) {
        if networks.is_empty() {
            return;
        }
        let key = (source_network, address);
        for &dnet in networks {
            if let Some(&owner) = self.networks.get(&dnet) {
                if owner != key {
                    self.detach_network(owner, dnet);
                }
            }
        }
        let record = self.routers.entry(key).or_insert_with(|| RouterInfo {
            source_network,
            address,
            networks: BTreeSet::new(),
            status: RouterStatus::Available,
        });
        record.networks.extend(networks.iter().copied());
        for &dnet in networks {
            self.networks.insert(dnet, key);
        }
    }

    /// Marks a known router's health; unknown routers are ignored.
    pub fn update_router_status(
        &mut self,
        source_network: Option<u16>,
        address: MacAddr,
        status: RouterStatus,
    ) {
        if let Some(record) = self.routers.get_mut(&(source_network, address)) {
            record.status = status;
        }
    }

    /// Forgets routing information.
    ///
    /// With `address` `None`, every router reachable through `source_network`
    /// is dropped. With an address but `networks` `None`, that one router is
    /// dropped entirely. With both, only the listed networks are released,
    /// and the router is pruned once it claims none. Absent keys are ignored.
    pub fn delete_router_info(
        &mut self,
        source_network: Option<u16>,
        address: Option<MacAddr>,
        networks: Option<&[u16]>,
    ) {
        let keys: Vec<RouterKey> = match address {
            Some(address) => vec![(source_network, address)],
            None => self
                .routers
                .keys()
                .filter(|(snet, _)| *snet == source_network)
                .copied()
                .collect(),
        };
        for key in keys {
            match networks {
                None => {
                    if let Some(record) = self.routers.remove(&key) {
                        for dnet in record.networks {
                            self.networks.remove(&dnet);
                        }
                    }
                }
                Some(networks) => {
                    for &dnet in networks {
                        if self.networks.get(&dnet) == Some(&key) {
                            self.detach_network(key, dnet);
                        }
                    }
                }
            }
        }
    }

    fn detach_network(&mut self, owner: RouterKey, dnet: u16) {
        self.networks.remove(&dnet);
        if let Some(record) = self.routers.get_mut(&owner) {
            record.networks.remove(&dnet);
            if record.networks.is_empty() {
                self.routers.remove(&owner);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mac(octet: u8) -> MacAddr {
        MacAddr::from(octet)
    }

    #[test]
    fn claim_transfer_moves_ownership() {
        let mut cache = RouterInfoCache::new();
        cache.update_router_info(Some(1), mac(0x0a), &[5, 6]);
        cache.update_router_info(Some(2), mac(0x0b), &[5]);

        let owner = cache.get_router_info(5).unwrap();
        assert_eq!(owner.source_network, Some(2));
        assert_eq!(owner.address, mac(0x0b));

        let previous = cache.get_router_info(6).unwrap();
        assert_eq!(previous.address, mac(0x0a));
        assert!(!previous.networks.contains(&5));
    }

    #[test]
    fn emptied_owner_is_pruned() {
        let mut cache = RouterInfoCache::new();
        cache.update_router_info(Some(1), mac(0x0a), &[5]);
        cache.update_router_info(Some(1), mac(0x0b), &[5]);
        assert!(!cache.routers.contains_key(&(Some(1), mac(0x0a))));
        assert_eq!(cache.get_router_info(5).unwrap().address, mac(0x0b));
    }

    #[test]
    fn status_update_ignores_unknown_routers() {
        let mut cache = RouterInfoCache::new();
        cache.update_router_status(Some(1), mac(0x0a), RouterStatus::Busy);
        assert!(cache.routers.is_empty());

        cache.update_router_info(Some(1), mac(0x0a), &[5]);
        cache.update_router_status(Some(1), mac(0x0a), RouterStatus::Busy);
        assert_eq!(cache.get_router_info(5).unwrap().status, RouterStatus::Busy);
    }

    #[test]
    fn delete_shapes() {
        let mut cache = RouterInfoCache::new();
        cache.update_router_info(Some(1), mac(0x0a), &[5, 6]);
        cache.update_router_info(Some(1), mac(0x0b), &[7]);
        cache.update_router_info(Some(2), mac(0x0c), &[8]);

        // Only the listed network is released.
        cache.delete_router_info(Some(1), Some(mac(0x0a)), Some(&[6]));
        assert!(cache.get_router_info(6).is_none());
        assert!(cache.get_router_info(5).is_some());

        // Releasing the last network prunes the record.
        cache.delete_router_info(Some(1), Some(mac(0x0a)), Some(&[5]));
        assert!(!cache.routers.contains_key(&(Some(1), mac(0x0a))));

        // No address drops every router on the source network.
        cache.delete_router_info(Some(1), None, None);
        assert!(cache.get_router_info(7).is_none());
        assert!(cache.get_router_info(8).is_some());

        // Absent keys are a no-op.
        cache.delete_router_info(Some(9), Some(mac(0x7f)), None);
        assert!(cache.get_router_info(8).is_some());
    }

    #[test]
    fn update_same_router_is_idempotent() {
        let mut cache = RouterInfoCache::new();
        cache.update_router_info(Some(1), mac(0x0a), &[5]);
        cache.update_router_info(Some(1), mac(0x0a), &[5]);
        assert_eq!(cache.routers.len(), 1);
        assert_eq!(cache.networks.len(), 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Update(Option<u16>, u8, Vec<u16>),
        DeleteAll(Option<u16>),
        DeleteRouter(Option<u16>, u8),
        DeleteNetworks(Option<u16>, u8, Vec<u16>),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let snet = prop_oneof![Just(None), (1u16..4).prop_map(Some)];
        let nets = proptest::collection::vec(1u16..8, 0..4);
        prop_oneof![
            (snet.clone(), 1u8..4, nets.clone()).prop_map(|(s, m, n)| Op::Update(s, m, n)),
            snet.clone().prop_map(Op::DeleteAll),
            (snet.clone(), 1u8..4).prop_map(|(s, m)| Op::DeleteRouter(s, m)),
            (snet, 1u8..4, nets).prop_map(|(s, m, n)| Op::DeleteNetworks(s, m, n)),
        ]
    }

    proptest! {
        /// Both maps stay consistent and no network ever has two owners.
        #[test]
        fn ownership_stays_exclusive(ops in proptest::collection::vec(op_strategy(), 0..40)) {
            let mut cache = RouterInfoCache::new();
            for op in ops {
                match op {
                    Op::Update(snet, m, nets) => {
                        cache.update_router_info(snet, mac(m), &nets);
                    }
                    Op::DeleteAll(snet) => cache.delete_router_info(snet, None, None),
                    Op::DeleteRouter(snet, m) => {
                        cache.delete_router_info(snet, Some(mac(m)), None);
                    }
                    Op::DeleteNetworks(snet, m, nets) => {
                        cache.delete_router_info(snet, Some(mac(m)), Some(&nets));
                    }
                }
            }
            for (dnet, key) in &cache.networks {
                let record = cache.routers.get(key).expect("back-reference to a live record");
                prop_assert!(record.networks.contains(dnet));
            }
            for (key, record) in &cache.routers {
                prop_assert!(!record.networks.is_empty());
                for dnet in &record.networks {
                    prop_assert_eq!(cache.networks.get(dnet), Some(key));
                }
            }
        }
    }
}
