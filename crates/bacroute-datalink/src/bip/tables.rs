//! Broadcast Distribution and Foreign Device table rows and their 10-octet
//! wire layouts.

use bacroute_core::encoding::{reader::Reader, writer::Writer};
use bacroute_core::{DecodeError, EncodeError};
use std::net::{Ipv4Addr, SocketAddrV4};

/// One Broadcast Distribution Table row: a peer BBMD and its broadcast
/// distribution mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BdtEntry {
    pub address: SocketAddrV4,
    pub mask: Ipv4Addr,
}

impl BdtEntry {
    pub const fn new(address: SocketAddrV4, mask: Ipv4Addr) -> Self {
        Self { address, mask }
    }

    /// A host-only mask: the peer expects Forwarded-NPDUs by unicast and
    /// re-broadcasts them onto its subnet itself (two-hop distribution).
    pub fn is_unicast(&self) -> bool {
        self.mask == Ipv4Addr::BROADCAST
    }

    /// Where broadcasts for this peer's subnet are sent: the entry address
    /// with the mask's host bits set.
    pub fn directed_broadcast(&self) -> SocketAddrV4 {
        let ip = u32::from(*self.address.ip()) | !u32::from(self.mask);
        SocketAddrV4::new(Ipv4Addr::from(ip), self.address.port())
    }

    pub fn encode(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        encode_socket(self.address, writer)?;
        writer.write_all(&self.mask.octets())
    }

    pub fn decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let address = decode_socket(reader)?;
        let mask = reader.read_be_u32()?;
        Ok(Self {
            address,
            mask: Ipv4Addr::from(mask),
        })
    }
}

/// One Foreign Device Table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FdtEntry {
    pub address: SocketAddrV4,
    /// The time-to-live the device registered with.
    pub ttl_seconds: u16,
    /// Seconds left before the registration lapses.
    pub remaining_seconds: u16,
}

impl FdtEntry {
    pub fn encode(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        encode_socket(self.address, writer)?;
        writer.write_be_u16(self.ttl_seconds)?;
        writer.write_be_u16(self.remaining_seconds)
    }

    pub fn decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let address = decode_socket(reader)?;
        let ttl_seconds = reader.read_be_u16()?;
        let remaining_seconds = reader.read_be_u16()?;
        Ok(Self {
            address,
            ttl_seconds,
            remaining_seconds,
        })
    }
}

pub(crate) fn encode_socket(
    address: SocketAddrV4,
    writer: &mut Writer<'_>,
) -> Result<(), EncodeError> {
    writer.write_all(&address.ip().octets())?;
    writer.write_be_u16(address.port())
}

pub(crate) fn decode_socket(reader: &mut Reader<'_>) -> Result<SocketAddrV4, DecodeError> {
    let ip = reader.read_be_u32()?;
    let port = reader.read_be_u16()?;
    Ok(SocketAddrV4::new(Ipv4Addr::from(ip), port))
}
