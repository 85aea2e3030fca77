//! BACnet Virtual Link Layer codec (Annex J).
//!
//! Every frame is decoded once into the closed [`BvllMessage`] enum and
//! matched exhaustively from there.

use crate::bip::tables::{decode_socket, encode_socket, BdtEntry, FdtEntry};
use crate::bip::MAX_FRAME_LEN;
use crate::traits::LinkError;
use bacroute_core::encoding::{reader::Reader, writer::Writer};
use bacroute_core::{DecodeError, EncodeError};
use std::net::SocketAddrV4;

pub const BVLL_TYPE_BIP: u8 = 0x81;

/// Result code for a request honored as asked.
pub const RESULT_SUCCESS: u16 = 0x0000;
/// NAK for Write-Broadcast-Distribution-Table.
pub const RESULT_WRITE_BDT_NAK: u16 = 0x0010;
/// NAK for Read-Broadcast-Distribution-Table.
pub const RESULT_READ_BDT_NAK: u16 = 0x0020;
/// NAK for Register-Foreign-Device.
pub const RESULT_REGISTER_NAK: u16 = 0x0030;
/// NAK for Read-Foreign-Device-Table.
pub const RESULT_READ_FDT_NAK: u16 = 0x0040;
/// NAK for Delete-Foreign-Device-Table-Entry.
pub const RESULT_DELETE_FDT_NAK: u16 = 0x0050;
/// NAK for Distribute-Broadcast-To-Network.
pub const RESULT_DISTRIBUTE_NAK: u16 = 0x0060;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BvllFunction {
    Result,
    WriteBroadcastDistributionTable,
    ReadBroadcastDistributionTable,
    ReadBroadcastDistributionTableAck,
    ForwardedNpdu,
    RegisterForeignDevice,
    ReadForeignDeviceTable,
    ReadForeignDeviceTableAck,
    DeleteForeignDeviceTableEntry,
    DistributeBroadcastToNetwork,
    OriginalUnicastNpdu,
    OriginalBroadcastNpdu,
    Unknown(u8),
}

impl BvllFunction {
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::Result,
            0x01 => Self::WriteBroadcastDistributionTable,
            0x02 => Self::ReadBroadcastDistributionTable,
            0x03 => Self::ReadBroadcastDistributionTableAck,
            0x04 => Self::ForwardedNpdu,
            0x05 => Self::RegisterForeignDevice,
            0x06 => Self::ReadForeignDeviceTable,
            0x07 => Self::ReadForeignDeviceTableAck,
            0x08 => Self::DeleteForeignDeviceTableEntry,
            0x09 => Self::DistributeBroadcastToNetwork,
            0x0A => Self::OriginalUnicastNpdu,
            0x0B => Self::OriginalBroadcastNpdu,
            v => Self::Unknown(v),
        }
    }

    pub const fn to_u8(self) -> u8 {
        match self {
            Self::Result => 0x00,
            Self::WriteBroadcastDistributionTable => 0x01,
            Self::ReadBroadcastDistributionTable => 0x02,
            Self::ReadBroadcastDistributionTableAck => 0x03,
            Self::ForwardedNpdu => 0x04,
            Self::RegisterForeignDevice => 0x05,
            Self::ReadForeignDeviceTable => 0x06,
            Self::ReadForeignDeviceTableAck => 0x07,
            Self::DeleteForeignDeviceTableEntry => 0x08,
            Self::DistributeBroadcastToNetwork => 0x09,
            Self::OriginalUnicastNpdu => 0x0A,
            Self::OriginalBroadcastNpdu => 0x0B,
            Self::Unknown(v) => v,
        }
    }
}

/// A fully decoded BVLL frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BvllMessage {
    Result {
        code: u16,
    },
    WriteBroadcastDistributionTable(Vec<BdtEntry>),
    ReadBroadcastDistributionTable,
    ReadBroadcastDistributionTableAck(Vec<BdtEntry>),
    /// A broadcast relayed by a BBMD; `origin` is the device that sent the
    /// original frame.
    ForwardedNpdu {
        origin: SocketAddrV4,
        npdu: Vec<u8>,
    },
    RegisterForeignDevice {
        ttl: u16,
    },
    ReadForeignDeviceTable,
    ReadForeignDeviceTableAck(Vec<FdtEntry>),
    DeleteForeignDeviceTableEntry {
        address: SocketAddrV4,
    },
    DistributeBroadcastToNetwork(Vec<u8>),
    OriginalUnicastNpdu(Vec<u8>),
    OriginalBroadcastNpdu(Vec<u8>),
}

impl BvllMessage {
    pub const fn function(&self) -> BvllFunction {
        match self {
            Self::Result { .. } => BvllFunction::Result,
            Self::WriteBroadcastDistributionTable(_) => {
                BvllFunction::WriteBroadcastDistributionTable
            }
            Self::ReadBroadcastDistributionTable => BvllFunction::ReadBroadcastDistributionTable,
            Self::ReadBroadcastDistributionTableAck(_) => {
                BvllFunction::ReadBroadcastDistributionTableAck
            }
            Self::ForwardedNpdu { .. } => BvllFunction::ForwardedNpdu,
            Self::RegisterForeignDevice { .. } => BvllFunction::RegisterForeignDevice,
            Self::ReadForeignDeviceTable => BvllFunction::ReadForeignDeviceTable,
            Self::ReadForeignDeviceTableAck(_) => BvllFunction::ReadForeignDeviceTableAck,
            Self::DeleteForeignDeviceTableEntry { .. } => {
                BvllFunction::DeleteForeignDeviceTableEntry
            }
            Self::DistributeBroadcastToNetwork(_) => BvllFunction::DistributeBroadcastToNetwork,
            Self::OriginalUnicastNpdu(_) => BvllFunction::OriginalUnicastNpdu,
            Self::OriginalBroadcastNpdu(_) => BvllFunction::OriginalBroadcastNpdu,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            Self::Result { .. } | Self::RegisterForeignDevice { .. } => 2,
            Self::WriteBroadcastDistributionTable(entries)
            | Self::ReadBroadcastDistributionTableAck(entries) => entries.len() * 10,
            Self::ReadBroadcastDistributionTable | Self::ReadForeignDeviceTable => 0,
            Self::ReadForeignDeviceTableAck(entries) => entries.len() * 10,
            Self::ForwardedNpdu { npdu, .. } => 6 + npdu.len(),
            Self::DeleteForeignDeviceTableEntry { .. } => 6,
            Self::DistributeBroadcastToNetwork(npdu)
            | Self::OriginalUnicastNpdu(npdu)
            | Self::OriginalBroadcastNpdu(npdu) => npdu.len(),
        }
    }

    pub fn encode(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        let length =
            u16::try_from(4 + self.payload_len()).map_err(|_| EncodeError::InvalidLength)?;
        writer.write_u8(BVLL_TYPE_BIP)?;
        writer.write_u8(self.function().to_u8())?;
        writer.write_be_u16(length)?;
        match self {
            Self::Result { code } => writer.write_be_u16(*code),
            Self::WriteBroadcastDistributionTable(entries)
            | Self::ReadBroadcastDistributionTableAck(entries) => {
                for entry in entries {
                    entry.encode(writer)?;
                }
                Ok(())
            }
            Self::ReadBroadcastDistributionTable | Self::ReadForeignDeviceTable => Ok(()),
            Self::ReadForeignDeviceTableAck(entries) => {
                for entry in entries {
                    entry.encode(writer)?;
                }
                Ok(())
            }
            Self::ForwardedNpdu { origin, npdu } => {
                encode_socket(*origin, writer)?;
                writer.write_all(npdu)
            }
            Self::RegisterForeignDevice { ttl } => writer.write_be_u16(*ttl),
            Self::DeleteForeignDeviceTableEntry { address } => encode_socket(*address, writer),
            Self::DistributeBroadcastToNetwork(npdu)
            | Self::OriginalUnicastNpdu(npdu)
            | Self::OriginalBroadcastNpdu(npdu) => writer.write_all(npdu),
        }
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let mut writer = Writer::new(&mut buf);
        self.encode(&mut writer)?;
        Ok(writer.as_written().to_vec())
    }

    /// Decodes one UDP datagram. The header's length field must match the
    /// datagram length exactly.
    pub fn decode(frame: &[u8]) -> Result<Self, LinkError> {
        let mut reader = Reader::new(frame);
        if reader.read_u8()? != BVLL_TYPE_BIP {
            return Err(DecodeError::InvalidValue.into());
        }
        let function = BvllFunction::from_u8(reader.read_u8()?);
        let length = reader.read_be_u16()? as usize;
        if length < 4 || length != frame.len() {
            return Err(DecodeError::InvalidLength.into());
        }

        let message = match function {
            BvllFunction::Result => Self::Result {
                code: expect_len(&mut reader, 2)?.read_be_u16()?,
            },
            BvllFunction::WriteBroadcastDistributionTable => {
                Self::WriteBroadcastDistributionTable(decode_bdt(&mut reader)?)
            }
            BvllFunction::ReadBroadcastDistributionTable => {
                expect_len(&mut reader, 0)?;
                Self::ReadBroadcastDistributionTable
            }
            BvllFunction::ReadBroadcastDistributionTableAck => {
                Self::ReadBroadcastDistributionTableAck(decode_bdt(&mut reader)?)
            }
            BvllFunction::ForwardedNpdu => Self::ForwardedNpdu {
                origin: decode_socket(&mut reader)?,
                npdu: reader.take_rest().to_vec(),
            },
            BvllFunction::RegisterForeignDevice => Self::RegisterForeignDevice {
                ttl: expect_len(&mut reader, 2)?.read_be_u16()?,
            },
            BvllFunction::ReadForeignDeviceTable => {
                expect_len(&mut reader, 0)?;
                Self::ReadForeignDeviceTable
            }
            BvllFunction::ReadForeignDeviceTableAck => {
                if reader.remaining() % 10 != 0 {
                    return Err(DecodeError::InvalidLength.into());
                }
                let mut entries = Vec::with_capacity(reader.remaining() / 10);
                while !reader.is_empty() {
                    entries.push(FdtEntry::decode(&mut reader)?);
                }
                Self::ReadForeignDeviceTableAck(entries)
            }
            BvllFunction::DeleteForeignDeviceTableEntry => {
                expect_len(&mut reader, 6)?;
                Self::DeleteForeignDeviceTableEntry {
                    address: decode_socket(&mut reader)?,
                }
            }
            BvllFunction::DistributeBroadcastToNetwork => {
                Self::DistributeBroadcastToNetwork(reader.take_rest().to_vec())
            }
            BvllFunction::OriginalUnicastNpdu => {
                Self::OriginalUnicastNpdu(reader.take_rest().to_vec())
            }
            BvllFunction::OriginalBroadcastNpdu => {
                Self::OriginalBroadcastNpdu(reader.take_rest().to_vec())
            }
            BvllFunction::Unknown(v) => return Err(LinkError::UnsupportedFunction(v)),
        };
        Ok(message)
    }
}

fn decode_bdt(reader: &mut Reader<'_>) -> Result<Vec<BdtEntry>, DecodeError> {
    if reader.remaining() % 10 != 0 {
        return Err(DecodeError::InvalidLength);
    }
    let mut entries = Vec::with_capacity(reader.remaining() / 10);
    while !reader.is_empty() {
        entries.push(BdtEntry::decode(reader)?);
    }
    Ok(entries)
}

fn expect_len<'r, 'a>(
    reader: &'r mut Reader<'a>,
    len: usize,
) -> Result<&'r mut Reader<'a>, DecodeError> {
    if reader.remaining() != len {
        return Err(DecodeError::InvalidLength);
    }
    Ok(reader)
}

#[cfg(test)]
mod tests {
    use super::{BvllFunction, BvllMessage, BVLL_TYPE_BIP, RESULT_REGISTER_NAK};
    use crate::bip::tables::BdtEntry;
    use crate::traits::LinkError;
    use bacroute_core::DecodeError;
    use std::net::{Ipv4Addr, SocketAddrV4};

    #[test]
    fn original_broadcast_frame() {
        let message = BvllMessage::OriginalBroadcastNpdu(vec![0x01, 0x00, 0x10, 0x08]);
        let bytes = message.to_vec().unwrap();
        assert_eq!(bytes, [0x81, 0x0B, 0x00, 0x08, 0x01, 0x00, 0x10, 0x08]);
        assert_eq!(BvllMessage::decode(&bytes).unwrap(), message);
    }

    #[test]
    fn forwarded_carries_origin() {
        let message = BvllMessage::ForwardedNpdu {
            origin: SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 9), 0xBAC0),
            npdu: vec![0x01, 0x00],
        };
        let bytes = message.to_vec().unwrap();
        assert_eq!(
            bytes,
            [0x81, 0x04, 0x00, 0x0C, 10, 0, 0, 9, 0xBA, 0xC0, 0x01, 0x00]
        );
        assert_eq!(BvllMessage::decode(&bytes).unwrap(), message);
    }

    #[test]
    fn register_and_result_frames() {
        let register = BvllMessage::RegisterForeignDevice { ttl: 60 };
        assert_eq!(register.to_vec().unwrap(), [0x81, 0x05, 0x00, 0x06, 0x00, 0x3C]);

        let nak = BvllMessage::Result {
            code: RESULT_REGISTER_NAK,
        };
        assert_eq!(nak.to_vec().unwrap(), [0x81, 0x00, 0x00, 0x06, 0x00, 0x30]);
    }

    #[test]
    fn bdt_ack_roundtrip() {
        let message = BvllMessage::ReadBroadcastDistributionTableAck(vec![BdtEntry::new(
            SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 2), 0xBAC0),
            Ipv4Addr::new(255, 255, 255, 0),
        )]);
        let bytes = message.to_vec().unwrap();
        assert_eq!(bytes.len(), 14);
        assert_eq!(message.function(), BvllFunction::ReadBroadcastDistributionTableAck);
        assert_eq!(BvllMessage::decode(&bytes).unwrap(), message);
    }

    #[test]
    fn length_must_match_datagram() {
        // Header claims 10 octets but the datagram has 8.
        let bytes = [0x81, 0x0B, 0x00, 0x0A, 0x01, 0x00, 0x10, 0x08];
        assert!(matches!(
            BvllMessage::decode(&bytes),
            Err(LinkError::Decode(DecodeError::InvalidLength))
        ));
    }

    #[test]
    fn unknown_function_is_reported() {
        let bytes = [BVLL_TYPE_BIP, 0x99, 0x00, 0x04];
        assert!(matches!(
            BvllMessage::decode(&bytes),
            Err(LinkError::UnsupportedFunction(0x99))
        ));
    }

    #[test]
    fn oversized_register_payload_is_rejected() {
        let bytes = [0x81, 0x05, 0x00, 0x07, 0x00, 0x3C, 0xFF];
        assert!(matches!(
            BvllMessage::decode(&bytes),
            Err(LinkError::Decode(DecodeError::InvalidLength))
        ));
    }
}
