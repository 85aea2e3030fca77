use bacroute_core::{DecodeError, EncodeError, MacAddr};
use std::future::Future;
use thiserror::Error;

/// Errors that can occur at the data-link layer.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame too large")]
    FrameTooLarge,
    #[error("invalid frame")]
    InvalidFrame,
    #[error("unsupported BVLL function 0x{0:02x}")]
    UnsupportedFunction(u8),
    #[error("BVLL result code 0x{0:04x}")]
    Nak(u16),
    #[error("timed out waiting for a reply")]
    Timeout,
    #[error("registration time-to-live must be nonzero")]
    InvalidTtl,
    #[error("address is not a 6-octet BACnet/IP station")]
    NotIpStation,
    #[error("a NAT BBMD cannot list itself as the first peer")]
    NatSelfPeer,
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// Where a frame should go on the directly attached network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDestination {
    Station(MacAddr),
    Broadcast,
}

/// Async trait for moving NPDUs over one attached network.
///
/// The futures are `Send` so a service loop can drive a link from a spawned
/// task. Implementors include [`BipLink`](crate::BipLink),
/// [`Bbmd`](crate::Bbmd) and [`ForeignDevice`](crate::ForeignDevice).
pub trait Link: Send + Sync {
    /// Sends an encoded NPDU to `destination`.
    fn send(
        &self,
        destination: LinkDestination,
        npdu: &[u8],
    ) -> impl Future<Output = Result<(), LinkError>> + Send;

    /// Receives an NPDU into `buf`, returning `(bytes_read, source_station,
    /// arrived_as_broadcast)`.
    fn recv(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<(usize, MacAddr, bool), LinkError>> + Send;
}
