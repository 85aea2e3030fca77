use crate::bip::bvll::{BvllMessage, RESULT_DELETE_FDT_NAK, RESULT_SUCCESS, RESULT_WRITE_BDT_NAK};
use crate::bip::link::fill;
use crate::bip::tables::{BdtEntry, FdtEntry};
use crate::bip::{mac_from_socket, socket_from_mac, TaskGuard, MAX_FRAME_LEN};
use crate::traits::{Link, LinkDestination, LinkError};
use bacroute_core::MacAddr;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::Duration;

/// A BACnet/IP Broadcast Management Device: relays subnet broadcasts to
/// peer BBMDs and registered foreign devices.
///
/// The relay rules run inside [`Link::recv`], so they only apply while
/// something drives the receive side. The address peers list for this BBMD
/// is the bound socket address; use [`Bbmd::bind_nat`] when the two differ.
#[derive(Debug, Clone)]
pub struct Bbmd {
    socket: Arc<UdpSocket>,
    /// The address peer tables hold for this BBMD (public when behind NAT).
    address: SocketAddrV4,
    broadcast: SocketAddrV4,
    nat: bool,
    bdt: Arc<Mutex<Vec<BdtEntry>>>,
    fdt: Arc<Mutex<Vec<FdtEntry>>>,
    _sweep: Arc<TaskGuard>,
}

impl Bbmd {
    pub async fn bind(bind: SocketAddrV4, broadcast: SocketAddrV4) -> Result<Self, LinkError> {
        Self::bind_inner(bind, broadcast, None).await
    }

    /// A BBMD behind NAT: `public` is the address peers reach it at, and
    /// peer relays always use the literal peer address rather than a
    /// mask-derived directed broadcast.
    pub async fn bind_nat(
        bind: SocketAddrV4,
        broadcast: SocketAddrV4,
        public: SocketAddrV4,
    ) -> Result<Self, LinkError> {
        Self::bind_inner(bind, broadcast, Some(public)).await
    }

    async fn bind_inner(
        bind: SocketAddrV4,
        broadcast: SocketAddrV4,
        public: Option<SocketAddrV4>,
    ) -> Result<Self, LinkError> {
        let socket = UdpSocket::bind(SocketAddr::V4(bind)).await?;
        socket.set_broadcast(true)?;
        let address = match (public, socket.local_addr()?) {
            (Some(public), _) => public,
            (None, SocketAddr::V4(local)) => local,
            (None, SocketAddr::V6(_)) => return Err(LinkError::NotIpStation),
        };

        let fdt = Arc::new(Mutex::new(Vec::new()));
        let sweep_fdt = Arc::clone(&fdt);
        let sweep = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let mut fdt = sweep_fdt.lock().await;
                fdt.retain_mut(|entry: &mut FdtEntry| {
                    entry.remaining_seconds = entry.remaining_seconds.saturating_sub(1);
                    if entry.remaining_seconds == 0 {
                        log::debug!("foreign device registration from {} expired", entry.address);
                        return false;
                    }
                    true
                });
            }
        });

        Ok(Self {
            socket: Arc::new(socket),
            address,
            broadcast,
            nat: public.is_some(),
            bdt: Arc::new(Mutex::new(Vec::new())),
            fdt,
            _sweep: Arc::new(TaskGuard::new(sweep)),
        })
    }

    /// The address peer tables list for this BBMD.
    pub fn address(&self) -> SocketAddrV4 {
        self.address
    }

    /// This BBMD's 6-octet station address.
    pub fn station(&self) -> MacAddr {
        mac_from_socket(self.address)
    }

    /// Adds or replaces a peer entry. A NAT BBMD refuses its own address as
    /// the first entry.
    pub async fn add_peer(&self, entry: BdtEntry) -> Result<(), LinkError> {
        let mut bdt = self.bdt.lock().await;
        if self.nat && bdt.is_empty() && entry.address == self.address {
            return Err(LinkError::NatSelfPeer);
        }
        match bdt.iter_mut().find(|e| e.address == entry.address) {
            Some(existing) => *existing = entry,
            None => bdt.push(entry),
        }
        Ok(())
    }

    pub async fn remove_peer(&self, address: SocketAddrV4) {
        self.bdt.lock().await.retain(|e| e.address != address);
    }

    /// Upserts a foreign device registration, granting `ttl + 5` seconds
    /// before the sweep removes it. Returns the Result code for the reply.
    pub async fn register_foreign_device(&self, address: SocketAddrV4, ttl: u16) -> u16 {
        let mut fdt = self.fdt.lock().await;
        let remaining = ttl.saturating_add(5);
        match fdt.iter_mut().find(|e| e.address == address) {
            Some(entry) => {
                entry.ttl_seconds = ttl;
                entry.remaining_seconds = remaining;
            }
            None => fdt.push(FdtEntry {
                address,
                ttl_seconds: ttl,
                remaining_seconds: remaining,
            }),
        }
        RESULT_SUCCESS
    }

    /// Removes one registration; 0x0050 when no such entry exists.
    pub async fn delete_foreign_device_table_entry(&self, address: SocketAddrV4) -> u16 {
        let mut fdt = self.fdt.lock().await;
        let before = fdt.len();
        fdt.retain(|e| e.address != address);
        if fdt.len() == before {
            RESULT_DELETE_FDT_NAK
        } else {
            RESULT_SUCCESS
        }
    }

    pub async fn bdt(&self) -> Vec<BdtEntry> {
        self.bdt.lock().await.clone()
    }

    pub async fn fdt(&self) -> Vec<FdtEntry> {
        self.fdt.lock().await.clone()
    }

    async fn send_or_log(&self, frame: &[u8], target: SocketAddrV4, what: &str) {
        if let Err(err) = self.socket.send_to(frame, target).await {
            log::warn!("{what} to {target} failed: {err}");
        }
    }

    async fn reply(&self, code: u16, target: SocketAddrV4) {
        match (BvllMessage::Result { code }).to_vec() {
            Ok(frame) => self.send_or_log(&frame, target, "result reply").await,
            Err(err) => log::warn!("encoding result reply failed: {err}"),
        }
    }

    /// Relays `frame` to every peer except this BBMD's own entry, which is
    /// either skipped or turned into a local broadcast.
    async fn relay_to_peers(&self, frame: &[u8], broadcast_for_self: bool) {
        let bdt = self.bdt.lock().await.clone();
        for peer in bdt {
            let target = if peer.address == self.address {
                if !broadcast_for_self {
                    continue;
                }
                self.broadcast
            } else if self.nat {
                peer.address
            } else {
                peer.directed_broadcast()
            };
            self.send_or_log(frame, target, "peer relay").await;
        }
    }

    async fn relay_to_foreign(&self, frame: &[u8], exclude: Option<SocketAddrV4>) {
        let fdt = self.fdt.lock().await.clone();
        for entry in fdt {
            if Some(entry.address) == exclude {
                continue;
            }
            self.send_or_log(frame, entry.address, "foreign relay").await;
        }
    }

    /// Whether peers deliver to this BBMD by unicast, read off its own BDT
    /// entry. A host-only mask means two-hop distribution, so a Forwarded-
    /// NPDU arriving here has not been seen by the subnet yet.
    async fn peers_unicast_to_self(&self) -> bool {
        self.bdt
            .lock()
            .await
            .iter()
            .find(|e| e.address == self.address)
            .is_some_and(BdtEntry::is_unicast)
    }
}

impl Link for Bbmd {
    async fn send(&self, destination: LinkDestination, npdu: &[u8]) -> Result<(), LinkError> {
        match destination {
            LinkDestination::Station(mac) => {
                let frame = BvllMessage::OriginalUnicastNpdu(npdu.to_vec()).to_vec()?;
                self.socket.send_to(&frame, socket_from_mac(mac)?).await?;
            }
            LinkDestination::Broadcast => {
                let original = BvllMessage::OriginalBroadcastNpdu(npdu.to_vec()).to_vec()?;
                self.socket.send_to(&original, self.broadcast).await?;

                let forwarded = BvllMessage::ForwardedNpdu {
                    origin: self.address,
                    npdu: npdu.to_vec(),
                }
                .to_vec()?;
                self.relay_to_peers(&forwarded, false).await;
                self.relay_to_foreign(&forwarded, None).await;
            }
        }
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, MacAddr, bool), LinkError> {
        let mut frame = [0u8; MAX_FRAME_LEN];
        loop {
            let (n, src) = self.socket.recv_from(&mut frame).await?;
            let src = match src {
                SocketAddr::V4(addr) => addr,
                SocketAddr::V6(_) => continue,
            };
            match BvllMessage::decode(&frame[..n]) {
                Ok(BvllMessage::OriginalUnicastNpdu(npdu)) => {
                    return Ok((fill(buf, &npdu)?, mac_from_socket(src), false));
                }
                Ok(BvllMessage::OriginalBroadcastNpdu(npdu)) => {
                    match (BvllMessage::ForwardedNpdu {
                        origin: src,
                        npdu: npdu.clone(),
                    })
                    .to_vec()
                    {
                        Ok(forwarded) => {
                            self.relay_to_peers(&forwarded, false).await;
                            self.relay_to_foreign(&forwarded, None).await;
                        }
                        Err(err) => log::warn!("re-wrapping broadcast from {src} failed: {err}"),
                    }
                    return Ok((fill(buf, &npdu)?, mac_from_socket(src), true));
                }
                Ok(BvllMessage::ForwardedNpdu { origin, npdu }) => {
                    match (BvllMessage::ForwardedNpdu {
                        origin,
                        npdu: npdu.clone(),
                    })
                    .to_vec()
                    {
                        Ok(forwarded) => {
                            if self.peers_unicast_to_self().await {
                                self.send_or_log(&forwarded, self.broadcast, "re-broadcast").await;
                            }
                            self.relay_to_foreign(&forwarded, None).await;
                        }
                        Err(err) => log::warn!("re-wrapping forward from {src} failed: {err}"),
                    }
                    return Ok((fill(buf, &npdu)?, mac_from_socket(origin), true));
                }
                Ok(BvllMessage::DistributeBroadcastToNetwork(npdu)) => {
                    match (BvllMessage::ForwardedNpdu {
                        origin: src,
                        npdu: npdu.clone(),
                    })
                    .to_vec()
                    {
                        Ok(forwarded) => {
                            self.relay_to_peers(&forwarded, true).await;
                            self.relay_to_foreign(&forwarded, Some(src)).await;
                        }
                        Err(err) => log::warn!("re-wrapping distribute from {src} failed: {err}"),
                    }
                    return Ok((fill(buf, &npdu)?, mac_from_socket(src), true));
                }
                Ok(BvllMessage::RegisterForeignDevice { ttl }) => {
                    let code = self.register_foreign_device(src, ttl).await;
                    self.reply(code, src).await;
                }
                Ok(BvllMessage::ReadBroadcastDistributionTable) => {
                    let snapshot = self.bdt().await;
                    match BvllMessage::ReadBroadcastDistributionTableAck(snapshot).to_vec() {
                        Ok(ack) => self.send_or_log(&ack, src, "bdt ack").await,
                        Err(err) => log::warn!("encoding bdt ack failed: {err}"),
                    }
                }
                Ok(BvllMessage::WriteBroadcastDistributionTable(_)) => {
                    // Tables are administered locally.
                    self.reply(RESULT_WRITE_BDT_NAK, src).await;
                }
                Ok(BvllMessage::ReadForeignDeviceTable) => {
                    let snapshot = self.fdt().await;
                    match BvllMessage::ReadForeignDeviceTableAck(snapshot).to_vec() {
                        Ok(ack) => self.send_or_log(&ack, src, "fdt ack").await,
                        Err(err) => log::warn!("encoding fdt ack failed: {err}"),
                    }
                }
                Ok(BvllMessage::DeleteForeignDeviceTableEntry { address }) => {
                    let code = self.delete_foreign_device_table_entry(address).await;
                    self.reply(code, src).await;
                }
                Ok(BvllMessage::Result { code }) => {
                    log::debug!("ignoring stray BVLL result 0x{code:04x} from {src}");
                }
                Ok(message) => {
                    log::debug!(
                        "ignoring BVLL function 0x{:02x} from {src}",
                        message.function().to_u8()
                    );
                }
                Err(LinkError::UnsupportedFunction(function)) => {
                    log::debug!("ignoring unsupported BVLL function 0x{function:02x} from {src}");
                }
                Err(err) => {
                    log::debug!("dropping malformed frame from {src}: {err}");
                }
            }
        }
    }
}
