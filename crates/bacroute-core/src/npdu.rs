use crate::address::{Address, MacAddr};
use crate::encoding::reader::Reader;
use crate::encoding::writer::Writer;
use crate::error::{DecodeError, EncodeError};
use crate::message::NetworkMessage;

/// Largest NPDU a BACnet/IP link may carry: the Clause J.4 frame limit
/// minus the 4-octet BVLL header.
pub const MAX_NPDU_LEN: usize = 1497;

const NPDU_VERSION: u8 = 0x01;

const CONTROL_NETWORK_MESSAGE: u8 = 0x80;
const CONTROL_DESTINATION: u8 = 0x20;
const CONTROL_SOURCE: u8 = 0x08;
const CONTROL_EXPECTING_REPLY: u8 = 0x04;
const CONTROL_PRIORITY: u8 = 0x03;

/// What an NPDU carries after the network header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NpduContent {
    /// An application-layer payload, passed through opaquely.
    Apdu(Vec<u8>),
    /// A network-layer message addressed to routers and the like.
    Network(NetworkMessage),
}

/// A decoded network-layer PDU.
///
/// The `sadr`, `dadr` and `hop_count` fields mirror the optional routing
/// header on the wire. `source` and `destination` are never encoded; they
/// carry the link-level addressing a frame arrived with (or should leave
/// with) between a port and the network service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Npdu {
    pub source: Option<Address>,
    pub destination: Option<Address>,
    /// Ultimate source, present once a router has relayed the PDU. Always a
    /// `RemoteStation` on the wire.
    pub sadr: Option<Address>,
    /// Ultimate destination for PDUs still in transit. `RemoteStation`,
    /// `RemoteBroadcast` or `GlobalBroadcast`.
    pub dadr: Option<Address>,
    /// Encoded only while `dadr` is present; `None` encodes as 255.
    pub hop_count: Option<u8>,
    pub expecting_reply: bool,
    /// Two-bit wire priority, 0 (normal) through 3 (life safety).
    pub priority: u8,
    pub content: NpduContent,
}

impl Npdu {
    /// An NPDU wrapping an application payload, with no routing header.
    pub fn apdu(payload: Vec<u8>) -> Self {
        Self {
            source: None,
            destination: None,
            sadr: None,
            dadr: None,
            hop_count: None,
            expecting_reply: false,
            priority: 0,
            content: NpduContent::Apdu(payload),
        }
    }

    /// An NPDU wrapping a network-layer message, with no routing header.
    pub fn network(message: NetworkMessage) -> Self {
        Self {
            source: None,
            destination: None,
            sadr: None,
            dadr: None,
            hop_count: None,
            expecting_reply: false,
            priority: 0,
            content: NpduContent::Network(message),
        }
    }

    pub const fn is_network_message(&self) -> bool {
        matches!(self.content, NpduContent::Network(_))
    }

    fn control(&self) -> u8 {
        let mut control = self.priority & CONTROL_PRIORITY;
        if self.is_network_message() {
            control |= CONTROL_NETWORK_MESSAGE;
        }
        if self.dadr.is_some() {
            control |= CONTROL_DESTINATION;
        }
        if self.sadr.is_some() {
            control |= CONTROL_SOURCE;
        }
        if self.expecting_reply {
            control |= CONTROL_EXPECTING_REPLY;
        }
        control
    }

    pub fn encode(&self, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
        writer.write_u8(NPDU_VERSION)?;
        writer.write_u8(self.control())?;
        if let Some(dadr) = &self.dadr {
            encode_destination(dadr, writer)?;
        }
        if let Some(sadr) = &self.sadr {
            encode_source(sadr, writer)?;
        }
        if self.dadr.is_some() {
            writer.write_u8(self.hop_count.unwrap_or(255))?;
        }
        match &self.content {
            NpduContent::Apdu(payload) => writer.write_all(payload),
            NpduContent::Network(message) => message.encode(writer),
        }
    }

    /// Encodes into a fresh buffer, the common case when handing a PDU to a
    /// port.
    pub fn to_vec(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = [0u8; MAX_NPDU_LEN];
        let mut writer = Writer::new(&mut buf);
        self.encode(&mut writer)?;
        Ok(writer.as_written().to_vec())
    }

    pub fn decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        if reader.read_u8()? != NPDU_VERSION {
            return Err(DecodeError::InvalidVersion);
        }
        let control = reader.read_u8()?;

        let dadr = if control & CONTROL_DESTINATION != 0 {
            Some(decode_destination(reader)?)
        } else {
            None
        };
        let sadr = if control & CONTROL_SOURCE != 0 {
            Some(decode_source(reader)?)
        } else {
            None
        };
        let hop_count = if dadr.is_some() {
            Some(reader.read_u8()?)
        } else {
            None
        };

        let content = if control & CONTROL_NETWORK_MESSAGE != 0 {
            NpduContent::Network(NetworkMessage::decode(reader)?)
        } else {
            NpduContent::Apdu(reader.take_rest().to_vec())
        };

        Ok(Self {
            source: None,
            destination: None,
            sadr,
            dadr,
            hop_count,
            expecting_reply: control & CONTROL_EXPECTING_REPLY != 0,
            priority: control & CONTROL_PRIORITY,
            content,
        })
    }
}

fn encode_destination(dadr: &Address, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
    match dadr {
        Address::RemoteStation(network, mac) => {
            if *network == 0xFFFF || mac.is_empty() {
                return Err(EncodeError::ValueOutOfRange);
            }
            writer.write_be_u16(*network)?;
            writer.write_u8(mac.len() as u8)?;
            writer.write_all(mac.as_bytes())
        }
        Address::RemoteBroadcast(network) => {
            if *network == 0xFFFF {
                return Err(EncodeError::ValueOutOfRange);
            }
            writer.write_be_u16(*network)?;
            writer.write_u8(0)
        }
        Address::GlobalBroadcast => {
            writer.write_be_u16(0xFFFF)?;
            writer.write_u8(0)
        }
        _ => Err(EncodeError::ValueOutOfRange),
    }
}

fn decode_destination(reader: &mut Reader<'_>) -> Result<Address, DecodeError> {
    let network = reader.read_be_u16()?;
    let len = reader.read_u8()? as usize;
    if network == 0xFFFF {
        if len != 0 {
            return Err(DecodeError::InvalidValue);
        }
        return Ok(Address::GlobalBroadcast);
    }
    if len == 0 {
        return Ok(Address::RemoteBroadcast(network));
    }
    let mac = MacAddr::new(reader.read_exact(len)?).ok_or(DecodeError::InvalidLength)?;
    Ok(Address::RemoteStation(network, mac))
}

fn encode_source(sadr: &Address, writer: &mut Writer<'_>) -> Result<(), EncodeError> {
    match sadr {
        Address::RemoteStation(network, mac) => {
            if *network == 0xFFFF || mac.is_empty() {
                return Err(EncodeError::ValueOutOfRange);
            }
            writer.write_be_u16(*network)?;
            writer.write_u8(mac.len() as u8)?;
            writer.write_all(mac.as_bytes())
        }
        _ => Err(EncodeError::ValueOutOfRange),
    }
}

fn decode_source(reader: &mut Reader<'_>) -> Result<Address, DecodeError> {
    let network = reader.read_be_u16()?;
    if network == 0xFFFF {
        return Err(DecodeError::InvalidValue);
    }
    let len = reader.read_u8()? as usize;
    if len == 0 {
        return Err(DecodeError::InvalidValue);
    }
    let mac = MacAddr::new(reader.read_exact(len)?).ok_or(DecodeError::InvalidLength)?;
    Ok(Address::RemoteStation(network, mac))
}

#[cfg(test)]
mod tests {
    use super::{Npdu, NpduContent};
    use crate::address::{Address, MacAddr};
    use crate::encoding::reader::Reader;
    use crate::error::DecodeError;
    use crate::message::NetworkMessage;

    fn decode(bytes: &[u8]) -> Npdu {
        Npdu::decode(&mut Reader::new(bytes)).unwrap()
    }

    #[test]
    fn plain_apdu_has_two_byte_header() {
        let npdu = Npdu::apdu(vec![0x10, 0x08]);
        assert_eq!(npdu.to_vec().unwrap(), [0x01, 0x00, 0x10, 0x08]);
        assert_eq!(decode(&[0x01, 0x00, 0x10, 0x08]), npdu);
    }

    #[test]
    fn who_is_router_golden_frame() {
        let npdu = Npdu::network(NetworkMessage::WhoIsRouterToNetwork(Some(2)));
        assert_eq!(npdu.to_vec().unwrap(), [0x01, 0x80, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn routed_apdu_with_destination() {
        let mut npdu = Npdu::apdu(vec![0xAA]);
        npdu.dadr = Some(Address::RemoteStation(1, MacAddr::from(0x0a)));
        assert_eq!(
            npdu.to_vec().unwrap(),
            [0x01, 0x20, 0x00, 0x01, 0x01, 0x0a, 0xff, 0xAA]
        );

        let decoded = decode(&[0x01, 0x20, 0x00, 0x01, 0x01, 0x0a, 0xff, 0xAA]);
        assert_eq!(decoded.dadr, Some(Address::RemoteStation(1, MacAddr::from(0x0a))));
        assert_eq!(decoded.hop_count, Some(255));
        assert_eq!(decoded.content, NpduContent::Apdu(vec![0xAA]));
    }

    #[test]
    fn global_broadcast_destination() {
        let mut npdu = Npdu::apdu(vec![0x55]);
        npdu.dadr = Some(Address::GlobalBroadcast);
        npdu.hop_count = Some(3);
        let bytes = npdu.to_vec().unwrap();
        assert_eq!(bytes, [0x01, 0x20, 0xFF, 0xFF, 0x00, 0x03, 0x55]);
        assert_eq!(decode(&bytes).dadr, Some(Address::GlobalBroadcast));
    }

    #[test]
    fn full_header_field_order() {
        let mut npdu = Npdu::apdu(vec![0x99]);
        npdu.dadr = Some(Address::RemoteStation(2, MacAddr::from(0x0b)));
        npdu.sadr = Some(Address::RemoteStation(5, MacAddr::from(0x0c)));
        npdu.hop_count = Some(254);
        npdu.expecting_reply = true;
        npdu.priority = 1;
        // DNET/DLEN/DADR, SNET/SLEN/SADR, then the hop count.
        assert_eq!(
            npdu.to_vec().unwrap(),
            [0x01, 0x2D, 0x00, 0x02, 0x01, 0x0b, 0x00, 0x05, 0x01, 0x0c, 0xFE, 0x99]
        );

        let decoded = decode(&npdu.to_vec().unwrap());
        assert_eq!(decoded.sadr, npdu.sadr);
        assert_eq!(decoded.dadr, npdu.dadr);
        assert_eq!(decoded.hop_count, Some(254));
        assert!(decoded.expecting_reply);
        assert_eq!(decoded.priority, 1);
    }

    #[test]
    fn remote_broadcast_destination() {
        let decoded = decode(&[0x01, 0x20, 0x00, 0x07, 0x00, 0xFF, 0xAA]);
        assert_eq!(decoded.dadr, Some(Address::RemoteBroadcast(7)));
    }

    #[test]
    fn wrong_version_is_rejected() {
        assert_eq!(
            Npdu::decode(&mut Reader::new(&[0x02, 0x00, 0xAA])),
            Err(DecodeError::InvalidVersion)
        );
    }

    #[test]
    fn invalid_source_fields_are_rejected() {
        // SNET 0xFFFF is reserved.
        assert_eq!(
            Npdu::decode(&mut Reader::new(&[0x01, 0x08, 0xFF, 0xFF, 0x01, 0x0a, 0xAA])),
            Err(DecodeError::InvalidValue)
        );
        // A source always names a station, so SLEN 0 is malformed.
        assert_eq!(
            Npdu::decode(&mut Reader::new(&[0x01, 0x08, 0x00, 0x05, 0x00, 0xAA])),
            Err(DecodeError::InvalidValue)
        );
    }

    #[test]
    fn truncated_header_is_unexpected_eof() {
        assert_eq!(
            Npdu::decode(&mut Reader::new(&[0x01, 0x20, 0x00])),
            Err(DecodeError::UnexpectedEof)
        );
    }

    #[test]
    fn link_fields_are_not_encoded() {
        let mut npdu = Npdu::apdu(vec![0x01]);
        npdu.source = Some(Address::LocalStation(MacAddr::from(0x0a)));
        npdu.destination = Some(Address::LocalBroadcast);
        assert_eq!(npdu.to_vec().unwrap(), [0x01, 0x00, 0x01]);
    }
}
