use crate::cache::RouterInfoCache;
use crate::error::NetworkError;
use bacroute_core::encoding::reader::Reader;
use bacroute_core::{Address, MacAddr, NetworkMessage, Npdu, NpduContent};
use bacroute_datalink::{Link, LinkDestination};
use std::collections::{HashMap, VecDeque};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(30);
const DEFAULT_PENDING_CAPACITY: usize = 32;

/// An application-layer payload delivered upstream, with its addressing
/// already rewritten to what the application should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingApdu {
    pub source: Address,
    pub destination: Address,
    pub expecting_reply: bool,
    pub apdu: Vec<u8>,
}

/// One binding to a directly attached network.
#[derive(Debug)]
pub struct NetworkAdapter<L> {
    link: L,
    network: Option<u16>,
    address: Option<MacAddr>,
}

impl<L: Link> NetworkAdapter<L> {
    /// The network number this adapter is attached to, `None` when
    /// unnumbered.
    pub fn network(&self) -> Option<u16> {
        self.network
    }

    /// Our own station address on this network, when known.
    pub fn address(&self) -> Option<MacAddr> {
        self.address
    }

    pub(crate) fn link(&self) -> &L {
        &self.link
    }

    pub(crate) async fn send(&self, npdu: &Npdu) -> Result<(), NetworkError> {
        let destination = match npdu.destination {
            Some(Address::LocalStation(mac)) => LinkDestination::Station(mac),
            Some(Address::LocalBroadcast) => LinkDestination::Broadcast,
            _ => return Err(NetworkError::InvalidDestination),
        };
        let frame = npdu.to_vec()?;
        self.link.send(destination, &frame).await?;
        Ok(())
    }
}

#[derive(Debug)]
struct PendingNpdu {
    npdu: Npdu,
    queued_at: Instant,
}

/// The network service access point: owns the adapters, the router cache and
/// the queue of packets awaiting route resolution, and implements the
/// forwarding algorithm between them.
///
/// Outbound traffic enters through [`indication`](Self::indication), inbound
/// frames through [`process_frame`](Self::process_frame). With a single
/// adapter this behaves as an ordinary node; with several it routes.
#[derive(Debug)]
pub struct NetworkServiceAccessPoint<L> {
    pub(crate) adapters: Vec<NetworkAdapter<L>>,
    pub(crate) local_adapter: Option<usize>,
    pub(crate) cache: RouterInfoCache,
    pub(crate) pending: HashMap<u16, VecDeque<PendingNpdu>>,
    pending_ttl: Duration,
    pending_capacity: usize,
    upstream: Option<mpsc::UnboundedSender<IncomingApdu>>,
}

impl<L: Link> Default for NetworkServiceAccessPoint<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: Link> NetworkServiceAccessPoint<L> {
    pub fn new() -> Self {
        Self {
            adapters: Vec::new(),
            local_adapter: None,
            cache: RouterInfoCache::new(),
            pending: HashMap::new(),
            pending_ttl: DEFAULT_PENDING_TTL,
            pending_capacity: DEFAULT_PENDING_CAPACITY,
            upstream: None,
        }
    }

    /// Sets how long and how many packets may wait for route discovery per
    /// destination network.
    pub fn with_pending_policy(mut self, ttl: Duration, capacity: usize) -> Self {
        self.pending_ttl = ttl;
        self.pending_capacity = capacity.max(1);
        self
    }

    /// Attaches a link as a new adapter.
    ///
    /// Network numbers must be unique and an unnumbered adapter must be the
    /// only one. The first adapter bound with a station `address` becomes the
    /// designated local adapter, the one whose traffic belongs to the local
    /// application.
    pub fn bind(
        &mut self,
        link: L,
        network: Option<u16>,
        address: Option<MacAddr>,
    ) -> Result<(), NetworkError> {
        match network {
            Some(network) => {
                if self.adapters.iter().any(|a| a.network == Some(network)) {
                    return Err(NetworkError::DuplicateNetwork(network));
                }
                if self.adapters.iter().any(|a| a.network.is_none()) {
                    return Err(NetworkError::UnnumberedAdapter);
                }
            }
            None => {
                if !self.adapters.is_empty() {
                    return Err(NetworkError::UnnumberedAdapter);
                }
            }
        }
        self.adapters.push(NetworkAdapter {
            link,
            network,
            address,
        });
        if address.is_some() && self.local_adapter.is_none() {
            self.local_adapter = Some(self.adapters.len() - 1);
        }
        Ok(())
    }

    pub fn adapters(&self) -> &[NetworkAdapter<L>] {
        &self.adapters
    }

    /// Read-only view of the learned routes.
    pub fn cache(&self) -> &RouterInfoCache {
        &self.cache
    }

    /// Hands out the receiving end for local application traffic, replacing
    /// any previous one.
    pub fn upstream(&mut self) -> mpsc::UnboundedReceiver<IncomingApdu> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.upstream = Some(tx);
        rx
    }

    /// Sends an NPDU originated by the local application.
    ///
    /// Remote destinations with no cached route are queued and a
    /// Who-Is-Router-To-Network broadcast is issued; the packet leaves once
    /// the answering router is learned.
    pub async fn indication(&mut self, mut npdu: Npdu) -> Result<(), NetworkError> {
        if self.adapters.is_empty() {
            return Err(NetworkError::NoAdapters);
        }
        let local_index = if self.adapters.len() == 1 {
            0
        } else {
            self.local_adapter.ok_or(NetworkError::NoLocalAdapter)?
        };

        let destination = npdu.destination.ok_or(NetworkError::InvalidDestination)?;
        let dnet = match destination {
            Address::LocalStation(_) | Address::LocalBroadcast => {
                return self.send_via(local_index, &npdu).await;
            }
            Address::GlobalBroadcast => {
                npdu.dadr = Some(Address::GlobalBroadcast);
                npdu.destination = Some(Address::LocalBroadcast);
                for index in 0..self.adapters.len() {
                    self.send_via(index, &npdu).await?;
                }
                return Ok(());
            }
            Address::RemoteStation(dnet, _) | Address::RemoteBroadcast(dnet) => dnet,
            Address::Null => return Err(NetworkError::InvalidDestination),
        };

        if self.adapters[local_index].network == Some(dnet) {
            return Err(NetworkError::LocalDestination(dnet));
        }
        npdu.dadr = Some(destination);
        npdu.destination = None;

        // A queue for this network means discovery is already in flight.
        if self.pending.contains_key(&dnet) {
            self.enqueue_pending(dnet, npdu);
            return Ok(());
        }

        if let Some(info) = self.cache.get_router_info(dnet) {
            let (source_network, router) = (info.source_network, info.address);
            if let Some(index) = self.adapter_index(source_network) {
                npdu.destination = Some(Address::LocalStation(router));
                return self.send_via(index, &npdu).await;
            }
            log::warn!("router to network {dnet} cached via an unbound network, rediscovering");
        }

        self.enqueue_pending(dnet, npdu);
        let mut request = Npdu::network(NetworkMessage::WhoIsRouterToNetwork(Some(dnet)));
        request.destination = Some(Address::LocalBroadcast);
        for index in 0..self.adapters.len() {
            self.send_via(index, &request).await?;
        }
        Ok(())
    }

    /// Decodes an inbound frame and runs it through the forwarding logic.
    /// Malformed frames are logged and dropped.
    pub async fn process_frame(
        &mut self,
        index: usize,
        frame: &[u8],
        source: MacAddr,
        broadcast: bool,
    ) {
        if index >= self.adapters.len() {
            log::warn!("frame for unknown adapter {index} dropped");
            return;
        }
        let mut reader = Reader::new(frame);
        let mut npdu = match Npdu::decode(&mut reader) {
            Ok(npdu) => npdu,
            Err(err) => {
                log::debug!("adapter {index}: dropping malformed NPDU: {err}");
                return;
            }
        };
        npdu.source = Some(Address::LocalStation(source));
        npdu.destination = Some(if broadcast {
            Address::LocalBroadcast
        } else {
            match self.adapters[index].address {
                Some(station) => Address::LocalStation(station),
                None => Address::Null,
            }
        });
        if let Err(err) = self.process_npdu(index, npdu).await {
            log::warn!("adapter {index}: inbound processing failed: {err}");
        }
    }

    /// Applies the forwarding algorithm to one inbound NPDU: learn the
    /// reverse route, decide local delivery versus relaying, and forward with
    /// the hop count decremented when this node routes between networks.
    pub async fn process_npdu(&mut self, index: usize, npdu: Npdu) -> Result<(), NetworkError> {
        let arrival_network = self.adapters[index].network;
        let link_source = match npdu.source {
            Some(Address::LocalStation(mac)) => Some(mac),
            _ => None,
        };

        // Learn the path back to the originating network from SADR. A source
        // network we are directly attached to cannot legitimately appear
        // there.
        if let Some(Address::RemoteStation(snet, _)) = npdu.sadr {
            if self.directly_connected(snet) {
                log::warn!(
                    "adapter {index}: dropping NPDU claiming source network {snet}, \
                     which is directly connected"
                );
                return Ok(());
            }
            if let Some(sender) = link_source {
                let cached = self
                    .cache
                    .get_router_info(snet)
                    .map(|info| (info.source_network, info.address));
                if cached != Some((arrival_network, sender)) {
                    self.cache
                        .update_router_info(arrival_network, sender, &[snet]);
                }
            }
        }

        let (process_locally, forward) = match npdu.dadr {
            None => {
                let local = match self.local_adapter {
                    None => true,
                    Some(local_index) => local_index == index,
                };
                (local || npdu.is_network_message(), false)
            }
            Some(Address::RemoteBroadcast(dnet)) => {
                if arrival_network == Some(dnet) {
                    log::warn!("adapter {index}: remote broadcast to network {dnet} is looping");
                    return Ok(());
                }
                let local = self
                    .local_adapter
                    .is_some_and(|i| self.adapters[i].network == Some(dnet));
                (local, true)
            }
            Some(Address::RemoteStation(dnet, mac)) => {
                if arrival_network == Some(dnet) {
                    log::warn!("adapter {index}: remote station on network {dnet} is looping");
                    return Ok(());
                }
                let local = self.local_adapter.is_some_and(|i| {
                    self.adapters[i].network == Some(dnet) && self.adapters[i].address == Some(mac)
                });
                (local, !local)
            }
            Some(Address::GlobalBroadcast) => (true, true),
            Some(_) => {
                log::debug!("adapter {index}: NPDU with an invalid destination header dropped");
                return Ok(());
            }
        };

        if process_locally {
            match &npdu.content {
                NpduContent::Network(message) => {
                    let message = message.clone();
                    self.handle_network_message(index, &npdu, message).await?;
                }
                NpduContent::Apdu(_) => self.deliver_upstream(index, &npdu),
            }
        }

        if !forward || self.adapters.len() <= 1 {
            return Ok(());
        }
        let hop_count = npdu.hop_count.unwrap_or(255);
        if hop_count == 0 {
            log::debug!("adapter {index}: hop count exhausted, not forwarding");
            return Ok(());
        }

        let mut npdu = npdu;
        npdu.source = None;
        npdu.destination = None;
        npdu.hop_count = Some(hop_count - 1);
        if npdu.sadr.is_none() {
            if let (Some(network), Some(mac)) = (arrival_network, link_source) {
                npdu.sadr = Some(Address::RemoteStation(network, mac));
            }
        }

        match npdu.dadr {
            Some(Address::GlobalBroadcast) => {
                npdu.destination = Some(Address::LocalBroadcast);
                for other in 0..self.adapters.len() {
                    if other == index {
                        continue;
                    }
                    if let Err(err) = self.send_via(other, &npdu).await {
                        log::warn!("adapter {other}: forwarding broadcast failed: {err}");
                    }
                }
            }
            Some(Address::RemoteBroadcast(dnet)) | Some(Address::RemoteStation(dnet, _)) => {
                if let Some(direct) = self.adapter_index(Some(dnet)) {
                    // Last hop: the routing header comes off here.
                    npdu.destination = Some(match npdu.dadr {
                        Some(Address::RemoteStation(_, mac)) => Address::LocalStation(mac),
                        _ => Address::LocalBroadcast,
                    });
                    npdu.dadr = None;
                    if let Err(err) = self.send_via(direct, &npdu).await {
                        log::warn!("adapter {direct}: forwarding failed: {err}");
                    }
                    return Ok(());
                }

                let known = self.cache.get_router_info(dnet).and_then(|info| {
                    self.adapter_index(info.source_network)
                        .map(|via| (via, info.address))
                });
                if let Some((via, router)) = known {
                    npdu.destination = Some(Address::LocalStation(router));
                    if let Err(err) = self.send_via(via, &npdu).await {
                        log::warn!("adapter {via}: forwarding failed: {err}");
                    }
                    return Ok(());
                }

                // Transit traffic is not queued: probe for a route and drop
                // the packet.
                log::debug!("no route to network {dnet}, probing and dropping");
                let mut request = Npdu::network(NetworkMessage::WhoIsRouterToNetwork(Some(dnet)));
                request.destination = Some(Address::LocalBroadcast);
                for other in 0..self.adapters.len() {
                    if other == index {
                        continue;
                    }
                    if let Err(err) = self.send_via(other, &request).await {
                        log::warn!("adapter {other}: route probe failed: {err}");
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Drops queued packets older than the pending TTL. A destination whose
    /// queue empties out becomes eligible for a fresh discovery round.
    pub fn expire_pending(&mut self, now: Instant) {
        let ttl = self.pending_ttl;
        self.pending.retain(|dnet, queue| {
            let before = queue.len();
            queue.retain(|entry| now.duration_since(entry.queued_at) < ttl);
            if queue.len() < before {
                log::warn!(
                    "dropped {} packets still awaiting a route to network {dnet}",
                    before - queue.len()
                );
            }
            !queue.is_empty()
        });
    }

    fn deliver_upstream(&self, index: usize, npdu: &Npdu) {
        let Some(upstream) = &self.upstream else {
            return;
        };
        let NpduContent::Apdu(apdu) = &npdu.content else {
            return;
        };

        let routed_in = self.adapters.len() > 1 && self.local_adapter != Some(index);
        let (source, destination) = if routed_in {
            let source = npdu
                .sadr
                .or_else(|| match (self.adapters[index].network, npdu.source) {
                    (Some(network), Some(Address::LocalStation(mac))) => {
                        Some(Address::RemoteStation(network, mac))
                    }
                    _ => npdu.source,
                })
                .unwrap_or(Address::Null);
            let destination = match npdu.dadr {
                Some(Address::GlobalBroadcast) => Address::GlobalBroadcast,
                Some(Address::RemoteBroadcast(_)) => Address::LocalBroadcast,
                Some(Address::RemoteStation(_, _)) => self
                    .local_adapter
                    .and_then(|i| self.adapters[i].address)
                    .map(Address::LocalStation)
                    .unwrap_or(Address::Null),
                _ => npdu.destination.unwrap_or(Address::Null),
            };
            (source, destination)
        } else {
            let source = npdu.sadr.or(npdu.source).unwrap_or(Address::Null);
            let destination = match npdu.dadr {
                Some(Address::GlobalBroadcast) => Address::GlobalBroadcast,
                _ => npdu.destination.unwrap_or(Address::Null),
            };
            (source, destination)
        };

        let delivered = upstream.send(IncomingApdu {
            source,
            destination,
            expecting_reply: npdu.expecting_reply,
            apdu: apdu.clone(),
        });
        if delivered.is_err() {
            log::debug!("upstream receiver dropped, discarding APDU");
        }
    }

    pub(crate) async fn send_via(&self, index: usize, npdu: &Npdu) -> Result<(), NetworkError> {
        self.adapters[index].send(npdu).await
    }

    pub(crate) fn adapter_index(&self, network: Option<u16>) -> Option<usize> {
        self.adapters.iter().position(|a| a.network == network)
    }

    fn directly_connected(&self, network: u16) -> bool {
        self.adapters.iter().any(|a| a.network == Some(network))
    }

    fn enqueue_pending(&mut self, dnet: u16, npdu: Npdu) {
        let queue = self.pending.entry(dnet).or_default();
        if queue.len() >= self.pending_capacity {
            queue.pop_front();
            log::warn!("pending queue for network {dnet} is full, dropping the oldest packet");
        }
        queue.push_back(PendingNpdu {
            npdu,
            queued_at: Instant::now(),
        });
    }

    /// Removes and returns everything queued for `dnet`.
    pub(crate) fn take_pending(&mut self, dnet: u16) -> Vec<Npdu> {
        self.pending
            .remove(&dnet)
            .map(|queue| queue.into_iter().map(|entry| entry.npdu).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bacroute_datalink::LinkError;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Counts frames and otherwise goes nowhere.
    #[derive(Clone, Default)]
    struct NullLink {
        sent: Arc<AtomicUsize>,
    }

    impl Link for NullLink {
        fn send(
            &self,
            _destination: LinkDestination,
            _npdu: &[u8],
        ) -> impl Future<Output = Result<(), LinkError>> + Send {
            self.sent.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        }

        fn recv(
            &self,
            _buf: &mut [u8],
        ) -> impl Future<Output = Result<(usize, MacAddr, bool), LinkError>> + Send {
            async { std::future::pending().await }
        }
    }

    #[tokio::test]
    async fn indication_requires_an_adapter() {
        let mut nsap: NetworkServiceAccessPoint<NullLink> = NetworkServiceAccessPoint::new();
        let mut npdu = Npdu::apdu(vec![0x01]);
        npdu.destination = Some(Address::LocalBroadcast);
        assert!(matches!(
            nsap.indication(npdu).await,
            Err(NetworkError::NoAdapters)
        ));
    }

    #[tokio::test]
    async fn two_adapters_need_a_designated_local_one() {
        let mut nsap = NetworkServiceAccessPoint::new();
        nsap.bind(NullLink::default(), Some(1), None).unwrap();
        nsap.bind(NullLink::default(), Some(2), None).unwrap();
        let mut npdu = Npdu::apdu(vec![0x01]);
        npdu.destination = Some(Address::LocalBroadcast);
        assert!(matches!(
            nsap.indication(npdu).await,
            Err(NetworkError::NoLocalAdapter)
        ));
    }

    #[tokio::test]
    async fn bind_rejects_duplicate_and_mixed_networks() {
        let mut nsap = NetworkServiceAccessPoint::new();
        nsap.bind(NullLink::default(), Some(1), None).unwrap();
        assert!(matches!(
            nsap.bind(NullLink::default(), Some(1), None),
            Err(NetworkError::DuplicateNetwork(1))
        ));
        assert!(matches!(
            nsap.bind(NullLink::default(), None, None),
            Err(NetworkError::UnnumberedAdapter)
        ));
    }

    #[tokio::test]
    async fn destination_on_the_local_network_is_a_caller_error() {
        let mut nsap = NetworkServiceAccessPoint::new();
        nsap.bind(NullLink::default(), Some(1), Some(MacAddr::from(0x0a)))
            .unwrap();
        let mut npdu = Npdu::apdu(vec![0x01]);
        npdu.destination = Some(Address::RemoteStation(1, MacAddr::from(0x0b)));
        assert!(matches!(
            nsap.indication(npdu).await,
            Err(NetworkError::LocalDestination(1))
        ));
    }

    #[tokio::test]
    async fn pending_queue_caps_and_expires() {
        let mut nsap = NetworkServiceAccessPoint::new()
            .with_pending_policy(Duration::from_secs(30), 2);
        nsap.bind(NullLink::default(), Some(1), None).unwrap();

        for payload in [0x01u8, 0x02, 0x03] {
            let mut npdu = Npdu::apdu(vec![payload]);
            npdu.destination = Some(Address::RemoteStation(9, MacAddr::from(0x0c)));
            nsap.indication(npdu).await.unwrap();
        }
        // One discovery broadcast; the follow-ups only queued.
        assert_eq!(nsap.adapters[0].link().sent.load(Ordering::SeqCst), 1);
        assert_eq!(nsap.pending[&9].len(), 2);
        // The oldest packet fell out.
        assert!(matches!(
            &nsap.pending[&9][0].npdu.content,
            NpduContent::Apdu(apdu) if apdu == &vec![0x02]
        ));

        nsap.expire_pending(Instant::now() + Duration::from_secs(31));
        assert!(nsap.pending.is_empty());
    }
}
