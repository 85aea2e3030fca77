//! BACnet/IP (Annex J) links over UDP.

pub mod admin;
pub mod bbmd;
pub mod bvll;
pub mod foreign;
pub mod link;
pub mod tables;

use crate::traits::LinkError;
use bacroute_core::MacAddr;
use std::net::SocketAddrV4;

/// Standard BACnet/IP UDP port (0xBAC0).
pub const DEFAULT_PORT: u16 = 47808;

/// Largest UDP frame a BACnet/IP link will send or accept.
pub const MAX_FRAME_LEN: usize = 1600;

/// The 6-octet station form of a BACnet/IP endpoint (4 IP octets, then the
/// port in network order).
pub fn mac_from_socket(address: SocketAddrV4) -> MacAddr {
    let ip = address.ip().octets();
    let port = address.port().to_be_bytes();
    MacAddr::from([ip[0], ip[1], ip[2], ip[3], port[0], port[1]])
}

/// Holds a background task and aborts it when dropped.
#[derive(Debug)]
pub(crate) struct TaskGuard(tokio::task::JoinHandle<()>);

impl TaskGuard {
    pub(crate) fn new(handle: tokio::task::JoinHandle<()>) -> Self {
        Self(handle)
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Recovers the UDP endpoint a 6-octet station address names.
pub fn socket_from_mac(mac: MacAddr) -> Result<SocketAddrV4, LinkError> {
    let bytes = mac.as_bytes();
    if bytes.len() != 6 {
        return Err(LinkError::NotIpStation);
    }
    Ok(SocketAddrV4::new(
        std::net::Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]),
        u16::from_be_bytes([bytes[4], bytes[5]]),
    ))
}
