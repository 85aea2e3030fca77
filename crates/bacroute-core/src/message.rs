use crate::encoding::reader::Reader;
use crate::encoding::writer::Writer;
use crate::error::{DecodeError, EncodeError};

/// One row of an Initialize-Routing-Table (or its Ack) payload.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoutingTableEntry {
    pub network: u16,
    pub port_id: u8,
    pub port_info: Vec<u8>,
}

impl RoutingTableEntry {
    fn encode(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.write_be_u16(self.network)?;
        writer.write_u8(self.port_id)?;
        let len = u8::try_from(self.port_info.len()).map_err(|_| EncodeError::InvalidLength)?;
        writer.write_u8(len)?;
        writer.write_all(&self.port_info)
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let network = reader.read_be_u16()?;
        let port_id = reader.read_u8()?;
        let len = reader.read_u8()? as usize;
        let port_info = reader.read_exact(len)?.to_vec();
        Ok(Self {
            network,
            port_id,
            port_info,
        })
    }
}

/// A network-layer message, carried in an NPDU whose control octet has the
/// network-message bit set.
///
/// Message types 0x0A..=0x7F outside the ones below decode as
/// [`NetworkMessage::Unrecognized`] with the raw payload preserved; types
/// 0x80..=0xFF are vendor-proprietary and carry a vendor identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NetworkMessage {
    /// `None` asks for routes to every reachable network.
    WhoIsRouterToNetwork(Option<u16>),
    IAmRouterToNetwork(Vec<u16>),
    ICouldBeRouterToNetwork {
        network: u16,
        performance_index: u8,
    },
    RejectMessageToNetwork {
        reason: u8,
        network: u16,
    },
    RouterBusyToNetwork(Vec<u16>),
    RouterAvailableToNetwork(Vec<u16>),
    InitializeRoutingTable(Vec<RoutingTableEntry>),
    InitializeRoutingTableAck(Vec<RoutingTableEntry>),
    EstablishConnectionToNetwork {
        network: u16,
        /// Seconds the connection should stay up; 0 means permanent.
        termination_time: u8,
    },
    DisconnectConnectionToNetwork(u16),
    WhatIsNetworkNumber,
    NetworkNumberIs {
        network: u16,
        /// Whether the number was configured rather than learned.
        configured: bool,
    },
    /// A reserved message type this crate does not interpret.
    Unrecognized {
        message_type: u8,
        data: Vec<u8>,
    },
    /// A vendor-proprietary message (type 0x80..=0xFF).
    Vendor {
        message_type: u8,
        vendor_id: u16,
        data: Vec<u8>,
    },
}

impl NetworkMessage {
    pub const fn message_type(&self) -> u8 {
        match self {
            Self::WhoIsRouterToNetwork(_) => 0x00,
            Self::IAmRouterToNetwork(_) => 0x01,
            Self::ICouldBeRouterToNetwork { .. } => 0x02,
            Self::RejectMessageToNetwork { .. } => 0x03,
            Self::RouterBusyToNetwork(_) => 0x04,
            Self::RouterAvailableToNetwork(_) => 0x05,
            Self::InitializeRoutingTable(_) => 0x06,
            Self::InitializeRoutingTableAck(_) => 0x07,
            Self::EstablishConnectionToNetwork { .. } => 0x08,
            Self::DisconnectConnectionToNetwork(_) => 0x09,
            Self::WhatIsNetworkNumber => 0x12,
            Self::NetworkNumberIs { .. } => 0x13,
            Self::Unrecognized { message_type, .. } | Self::Vendor { message_type, .. } => {
                *message_type
            }
        }
    }

    pub fn encode(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.write_u8(self.message_type())?;
        match self {
            Self::WhoIsRouterToNetwork(network) => {
                if let Some(network) = network {
                    writer.write_be_u16(*network)?;
                }
            }
            Self::IAmRouterToNetwork(networks)
            | Self::RouterBusyToNetwork(networks)
            | Self::RouterAvailableToNetwork(networks) => {
                for network in networks {
                    writer.write_be_u16(*network)?;
                }
            }
            Self::ICouldBeRouterToNetwork {
                network,
                performance_index,
            } => {
                writer.write_be_u16(*network)?;
                writer.write_u8(*performance_index)?;
            }
            Self::RejectMessageToNetwork { reason, network } => {
                writer.write_u8(*reason)?;
                writer.write_be_u16(*network)?;
            }
            Self::InitializeRoutingTable(entries) | Self::InitializeRoutingTableAck(entries) => {
                let count =
                    u8::try_from(entries.len()).map_err(|_| EncodeError::ValueOutOfRange)?;
                writer.write_u8(count)?;
                for entry in entries {
                    entry.encode(writer)?;
                }
            }
            Self::EstablishConnectionToNetwork {
                network,
                termination_time,
            } => {
                writer.write_be_u16(*network)?;
                writer.write_u8(*termination_time)?;
            }
            Self::DisconnectConnectionToNetwork(network) => {
                writer.write_be_u16(*network)?;
            }
            Self::WhatIsNetworkNumber => {}
            Self::NetworkNumberIs {
                network,
                configured,
            } => {
                writer.write_be_u16(*network)?;
                writer.write_u8(u8::from(*configured))?;
            }
            Self::Unrecognized { data, .. } => {
                writer.write_all(data)?;
            }
            Self::Vendor {
                message_type,
                vendor_id,
                data,
            } => {
                if *message_type < 0x80 {
                    return Err(EncodeError::ValueOutOfRange);
                }
                writer.write_be_u16(*vendor_id)?;
                writer.write_all(data)?;
            }
        }
        Ok(())
    }

    pub fn decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let message_type = reader.read_u8()?;
        let message = match message_type {
            0x00 => {
                let network = if reader.is_empty() {
                    None
                } else {
                    Some(reader.read_be_u16()?)
                };
                Self::WhoIsRouterToNetwork(network)
            }
            0x01 => Self::IAmRouterToNetwork(decode_network_list(reader)?),
            0x02 => Self::ICouldBeRouterToNetwork {
                network: reader.read_be_u16()?,
                performance_index: reader.read_u8()?,
            },
            0x03 => Self::RejectMessageToNetwork {
                reason: reader.read_u8()?,
                network: reader.read_be_u16()?,
            },
            0x04 => Self::RouterBusyToNetwork(decode_network_list(reader)?),
            0x05 => Self::RouterAvailableToNetwork(decode_network_list(reader)?),
            0x06 => Self::InitializeRoutingTable(decode_routing_entries(reader)?),
            0x07 => Self::InitializeRoutingTableAck(decode_routing_entries(reader)?),
            0x08 => Self::EstablishConnectionToNetwork {
                network: reader.read_be_u16()?,
                termination_time: reader.read_u8()?,
            },
            0x09 => Self::DisconnectConnectionToNetwork(reader.read_be_u16()?),
            0x12 => Self::WhatIsNetworkNumber,
            0x13 => Self::NetworkNumberIs {
                network: reader.read_be_u16()?,
                configured: reader.read_u8()? != 0,
            },
            0x80..=0xFF => Self::Vendor {
                message_type,
                vendor_id: reader.read_be_u16()?,
                data: reader.take_rest().to_vec(),
            },
            _ => Self::Unrecognized {
                message_type,
                data: reader.take_rest().to_vec(),
            },
        };
        Ok(message)
    }
}

fn decode_network_list(reader: &mut Reader<'_>) -> Result<Vec<u16>, DecodeError> {
    let mut networks = Vec::with_capacity(reader.remaining() / 2);
    while !reader.is_empty() {
        networks.push(reader.read_be_u16()?);
    }
    Ok(networks)
}

fn decode_routing_entries(reader: &mut Reader<'_>) -> Result<Vec<RoutingTableEntry>, DecodeError> {
    let count = reader.read_u8()? as usize;
    let mut entries = Vec::with_capacity(count.min(16));
    for _ in 0..count {
        entries.push(RoutingTableEntry::decode(reader)?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::{NetworkMessage, RoutingTableEntry};
    use crate::encoding::reader::Reader;
    use crate::encoding::writer::Writer;
    use crate::error::EncodeError;

    fn encode(message: &NetworkMessage) -> Vec<u8> {
        let mut buf = [0u8; 256];
        let mut writer = Writer::new(&mut buf);
        message.encode(&mut writer).unwrap();
        writer.as_written().to_vec()
    }

    fn decode(bytes: &[u8]) -> NetworkMessage {
        NetworkMessage::decode(&mut Reader::new(bytes)).unwrap()
    }

    #[test]
    fn who_is_router_forms() {
        assert_eq!(encode(&NetworkMessage::WhoIsRouterToNetwork(None)), [0x00]);
        assert_eq!(
            encode(&NetworkMessage::WhoIsRouterToNetwork(Some(0x0102))),
            [0x00, 0x01, 0x02]
        );
        assert_eq!(decode(&[0x00]), NetworkMessage::WhoIsRouterToNetwork(None));
        assert_eq!(
            decode(&[0x00, 0x01, 0x02]),
            NetworkMessage::WhoIsRouterToNetwork(Some(0x0102))
        );
    }

    #[test]
    fn i_am_router_network_list() {
        let message = NetworkMessage::IAmRouterToNetwork(vec![1, 2, 0xBAC0]);
        let bytes = encode(&message);
        assert_eq!(bytes, [0x01, 0x00, 0x01, 0x00, 0x02, 0xBA, 0xC0]);
        assert_eq!(decode(&bytes), message);
    }

    #[test]
    fn reject_carries_reason_then_network() {
        let message = NetworkMessage::RejectMessageToNetwork {
            reason: 1,
            network: 9,
        };
        assert_eq!(encode(&message), [0x03, 0x01, 0x00, 0x09]);
    }

    #[test]
    fn routing_table_ack_roundtrip() {
        let message = NetworkMessage::InitializeRoutingTableAck(vec![
            RoutingTableEntry {
                network: 1,
                port_id: 1,
                port_info: vec![],
            },
            RoutingTableEntry {
                network: 2,
                port_id: 2,
                port_info: vec![0xAA, 0xBB],
            },
        ]);
        let bytes = encode(&message);
        assert_eq!(
            bytes,
            [0x07, 0x02, 0x00, 0x01, 0x01, 0x00, 0x00, 0x02, 0x02, 0x02, 0xAA, 0xBB]
        );
        assert_eq!(decode(&bytes), message);
    }

    #[test]
    fn network_number_is_flag() {
        let bytes = encode(&NetworkMessage::NetworkNumberIs {
            network: 5,
            configured: true,
        });
        assert_eq!(bytes, [0x13, 0x00, 0x05, 0x01]);
        assert_eq!(
            decode(&[0x13, 0x00, 0x05, 0x00]),
            NetworkMessage::NetworkNumberIs {
                network: 5,
                configured: false,
            }
        );
    }

    #[test]
    fn vendor_messages_carry_vendor_id() {
        let message = NetworkMessage::Vendor {
            message_type: 0x90,
            vendor_id: 0x0105,
            data: vec![0xDE, 0xAD],
        };
        let bytes = encode(&message);
        assert_eq!(bytes, [0x90, 0x01, 0x05, 0xDE, 0xAD]);
        assert_eq!(decode(&bytes), message);

        let bad = NetworkMessage::Vendor {
            message_type: 0x10,
            vendor_id: 0,
            data: vec![],
        };
        let mut buf = [0u8; 8];
        assert_eq!(
            bad.encode(&mut Writer::new(&mut buf)),
            Err(EncodeError::ValueOutOfRange)
        );
    }

    #[test]
    fn reserved_types_are_preserved_verbatim() {
        let message = decode(&[0x0A, 0x01, 0x02, 0x03]);
        assert_eq!(
            message,
            NetworkMessage::Unrecognized {
                message_type: 0x0A,
                data: vec![0x01, 0x02, 0x03],
            }
        );
        assert_eq!(encode(&message), [0x0A, 0x01, 0x02, 0x03]);
    }
}
