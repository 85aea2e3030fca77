//! Network-layer control message handling: the discovery protocol that feeds
//! the router cache and replays queued packets.

use crate::cache::RouterStatus;
use crate::error::NetworkError;
use crate::nsap::NetworkServiceAccessPoint;
use bacroute_core::{Address, MacAddr, NetworkMessage, Npdu, RoutingTableEntry};
use bacroute_datalink::Link;

impl<L: Link> NetworkServiceAccessPoint<L> {
    /// Dispatches a locally processed network-layer message. Unhandled types
    /// are accepted and ignored.
    pub(crate) async fn handle_network_message(
        &mut self,
        index: usize,
        npdu: &Npdu,
        message: NetworkMessage,
    ) -> Result<(), NetworkError> {
        match message {
            NetworkMessage::WhoIsRouterToNetwork(network) => {
                self.who_is_router_to_network(index, npdu, network).await
            }
            NetworkMessage::IAmRouterToNetwork(networks) => {
                self.i_am_router_to_network(index, npdu, networks).await
            }
            NetworkMessage::RouterBusyToNetwork(_) => {
                self.note_router_status(index, npdu, RouterStatus::Busy);
                Ok(())
            }
            NetworkMessage::RouterAvailableToNetwork(_) => {
                self.note_router_status(index, npdu, RouterStatus::Available);
                Ok(())
            }
            NetworkMessage::RejectMessageToNetwork { reason, network } => {
                log::warn!(
                    "adapter {index}: message to network {network} rejected, reason {reason}"
                );
                Ok(())
            }
            NetworkMessage::WhatIsNetworkNumber => self.what_is_network_number(index).await,
            NetworkMessage::NetworkNumberIs {
                network,
                configured,
            } => {
                log::debug!(
                    "adapter {index}: network number announced as {network} \
                     (configured: {configured})"
                );
                Ok(())
            }
            NetworkMessage::InitializeRoutingTable(entries) if entries.is_empty() => {
                self.routing_table_snapshot(index, npdu).await
            }
            other => {
                log::debug!(
                    "adapter {index}: ignoring network message 0x{:02x}",
                    other.message_type()
                );
                Ok(())
            }
        }
    }

    /// Answers when this node can route to the asked-for network, relays the
    /// question otherwise. Single-adapter nodes stay quiet.
    async fn who_is_router_to_network(
        &mut self,
        index: usize,
        npdu: &Npdu,
        network: Option<u16>,
    ) -> Result<(), NetworkError> {
        if self.adapters.len() < 2 {
            return Ok(());
        }
        let Some(Address::LocalStation(requester)) = npdu.source else {
            return Ok(());
        };

        let Some(dnet) = network else {
            let networks: Vec<u16> = self
                .adapters
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != index)
                .filter_map(|(_, a)| a.network())
                .collect();
            if networks.is_empty() {
                return Ok(());
            }
            return self.reply_i_am_router(index, requester, networks).await;
        };

        if self.adapters[index].network() == Some(dnet) {
            log::debug!("adapter {index}: asked for a router to its own network {dnet}");
            return Ok(());
        }
        let direct = self
            .adapters
            .iter()
            .enumerate()
            .any(|(i, a)| i != index && a.network() == Some(dnet));
        if direct || self.cache.get_router_info(dnet).is_some() {
            return self.reply_i_am_router(index, requester, vec![dnet]).await;
        }

        // No answer to give; relay the question so a router further out can
        // answer, with SADR stamped for the return path.
        let mut relay = Npdu::network(NetworkMessage::WhoIsRouterToNetwork(Some(dnet)));
        relay.destination = Some(Address::LocalBroadcast);
        relay.sadr = npdu.sadr.or_else(|| {
            self.adapters[index]
                .network()
                .map(|net| Address::RemoteStation(net, requester))
        });
        for other in 0..self.adapters.len() {
            if other == index {
                continue;
            }
            self.send_via(other, &relay).await?;
        }
        Ok(())
    }

    /// Records an announced route, propagates it when routing, and replays
    /// any packets queued for the announced networks.
    async fn i_am_router_to_network(
        &mut self,
        index: usize,
        npdu: &Npdu,
        networks: Vec<u16>,
    ) -> Result<(), NetworkError> {
        let Some(Address::LocalStation(router)) = npdu.source else {
            return Ok(());
        };
        if networks.is_empty() {
            return Ok(());
        }
        let arrival_network = self.adapters[index].network();
        self.cache
            .update_router_info(arrival_network, router, &networks);

        if self.adapters.len() > 1 {
            let mut announce =
                Npdu::network(NetworkMessage::IAmRouterToNetwork(networks.clone()));
            announce.destination = Some(Address::LocalBroadcast);
            for other in 0..self.adapters.len() {
                if other == index {
                    continue;
                }
                self.send_via(other, &announce).await?;
            }
        }

        for dnet in networks {
            let queued = self.take_pending(dnet);
            if queued.is_empty() {
                continue;
            }
            log::debug!(
                "resending {} queued packets for network {dnet} to the announcing router",
                queued.len()
            );
            for mut pending in queued {
                pending.destination = Some(Address::LocalStation(router));
                if let Err(err) = self.send_via(index, &pending).await {
                    log::warn!("adapter {index}: resend toward network {dnet} failed: {err}");
                }
            }
        }
        Ok(())
    }

    fn note_router_status(&mut self, index: usize, npdu: &Npdu, status: RouterStatus) {
        let Some(Address::LocalStation(router)) = npdu.source else {
            return;
        };
        let arrival_network = self.adapters[index].network();
        self.cache
            .update_router_status(arrival_network, router, status);
    }

    async fn what_is_network_number(&self, index: usize) -> Result<(), NetworkError> {
        let Some(network) = self.adapters[index].network() else {
            log::debug!("adapter {index}: unnumbered, cannot answer What-Is-Network-Number");
            return Ok(());
        };
        let mut reply = Npdu::network(NetworkMessage::NetworkNumberIs {
            network,
            configured: true,
        });
        reply.destination = Some(Address::LocalBroadcast);
        self.send_via(index, &reply).await
    }

    async fn routing_table_snapshot(&self, index: usize, npdu: &Npdu) -> Result<(), NetworkError> {
        let Some(Address::LocalStation(requester)) = npdu.source else {
            return Ok(());
        };
        let entries: Vec<RoutingTableEntry> = self
            .adapters
            .iter()
            .enumerate()
            .filter_map(|(i, a)| {
                let network = a.network()?;
                // A port id is one octet; adapters past the 255th cannot be
                // represented and are left out of the snapshot.
                let Ok(port_id) = u8::try_from(i + 1) else {
                    log::warn!("adapter {i}: no port id left for network {network}");
                    return None;
                };
                Some(RoutingTableEntry {
                    network,
                    port_id,
                    port_info: Vec::new(),
                })
            })
            .collect();
        let mut reply = Npdu::network(NetworkMessage::InitializeRoutingTableAck(entries));
        reply.destination = Some(Address::LocalStation(requester));
        self.send_via(index, &reply).await
    }

    async fn reply_i_am_router(
        &self,
        index: usize,
        requester: MacAddr,
        networks: Vec<u16>,
    ) -> Result<(), NetworkError> {
        let mut reply = Npdu::network(NetworkMessage::IAmRouterToNetwork(networks));
        reply.destination = Some(Address::LocalStation(requester));
        self.send_via(index, &reply).await
    }
}
