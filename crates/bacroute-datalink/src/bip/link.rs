use crate::bip::bvll::{
    BvllFunction, BvllMessage, RESULT_DELETE_FDT_NAK, RESULT_DISTRIBUTE_NAK, RESULT_READ_BDT_NAK,
    RESULT_READ_FDT_NAK, RESULT_REGISTER_NAK, RESULT_WRITE_BDT_NAK,
};
use crate::bip::{mac_from_socket, socket_from_mac, MAX_FRAME_LEN};
use crate::traits::{Link, LinkDestination, LinkError};
use bacroute_core::MacAddr;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;

/// A plain BACnet/IP station: one UDP socket on a subnet with a working
/// local broadcast address.
///
/// Frames are exchanged as Original-Unicast/Original-Broadcast NPDUs.
/// Inbound Forwarded-NPDUs (relayed by a BBMD elsewhere on the subnet) are
/// delivered as broadcasts sourced from the embedded origin. BVLL service
/// requests aimed at this node are answered with the per-operation NAK
/// result codes.
#[derive(Debug, Clone)]
pub struct BipLink {
    socket: Arc<UdpSocket>,
    broadcast: SocketAddrV4,
}

impl BipLink {
    pub async fn bind(bind: SocketAddrV4, broadcast: SocketAddrV4) -> Result<Self, LinkError> {
        let socket = UdpSocket::bind(SocketAddr::V4(bind)).await?;
        socket.set_broadcast(true)?;
        Ok(Self {
            socket: Arc::new(socket),
            broadcast,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddrV4, LinkError> {
        match self.socket.local_addr()? {
            SocketAddr::V4(addr) => Ok(addr),
            SocketAddr::V6(_) => Err(LinkError::NotIpStation),
        }
    }

    /// This link's own 6-octet station address.
    pub fn station(&self) -> Result<MacAddr, LinkError> {
        Ok(mac_from_socket(self.local_addr()?))
    }

    pub fn broadcast_addr(&self) -> SocketAddrV4 {
        self.broadcast
    }
}

/// The NAK a node that offers no broadcast management sends back for a BVLL
/// service request.
pub(crate) fn service_nak_code(function: BvllFunction) -> Option<u16> {
    match function {
        BvllFunction::WriteBroadcastDistributionTable => Some(RESULT_WRITE_BDT_NAK),
        BvllFunction::ReadBroadcastDistributionTable => Some(RESULT_READ_BDT_NAK),
        BvllFunction::RegisterForeignDevice => Some(RESULT_REGISTER_NAK),
        BvllFunction::ReadForeignDeviceTable => Some(RESULT_READ_FDT_NAK),
        BvllFunction::DeleteForeignDeviceTableEntry => Some(RESULT_DELETE_FDT_NAK),
        BvllFunction::DistributeBroadcastToNetwork => Some(RESULT_DISTRIBUTE_NAK),
        _ => None,
    }
}

pub(crate) fn fill(buf: &mut [u8], npdu: &[u8]) -> Result<usize, LinkError> {
    if npdu.len() > buf.len() {
        return Err(LinkError::FrameTooLarge);
    }
    buf[..npdu.len()].copy_from_slice(npdu);
    Ok(npdu.len())
}

impl Link for BipLink {
    async fn send(&self, destination: LinkDestination, npdu: &[u8]) -> Result<(), LinkError> {
        let (message, target) = match destination {
            LinkDestination::Station(mac) => (
                BvllMessage::OriginalUnicastNpdu(npdu.to_vec()),
                socket_from_mac(mac)?,
            ),
            LinkDestination::Broadcast => (
                BvllMessage::OriginalBroadcastNpdu(npdu.to_vec()),
                self.broadcast,
            ),
        };
        self.socket.send_to(&message.to_vec()?, target).await?;
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
                    return Ok((fill(buf, &npdu)?, mac_from_socket(src), true));
                }
                Ok(BvllMessage::ForwardedNpdu { origin, npdu }) => {
                    return Ok((fill(buf, &npdu)?, mac_from_socket(origin), true));
                }
                Ok(BvllMessage::Result { code }) => {
                    log::debug!("ignoring stray BVLL result 0x{code:04x} from {src}");
                }
                Ok(message) => match service_nak_code(message.function()) {
                    Some(code) => {
                        log::debug!(
                            "refusing BVLL function 0x{:02x} from {src} with 0x{code:04x}",
                            message.function().to_u8()
                        );
                        let nak = BvllMessage::Result { code }.to_vec()?;
                        self.socket.send_to(&nak, src).await?;
                    }
                    None => {
                        log::debug!(
                            "ignoring BVLL function 0x{:02x} from {src}",
                            message.function().to_u8()
                        );
                    }
                },
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
