use core::fmt;

/// A link-level station address of up to 6 octets (1 for MS/TP, 6 for
/// BACnet/IP), stored inline.
///
/// Bytes past `len` are always zero so the derived equality and hashing are
/// sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MacAddr {
    bytes: [u8; 6],
    len: u8,
}

impl MacAddr {
    /// Builds a station address from up to 6 octets; `None` if longer.
    pub fn new(octets: &[u8]) -> Option<Self> {
        if octets.len() > 6 {
            return None;
        }
        let mut bytes = [0u8; 6];
        bytes[..octets.len()].copy_from_slice(octets);
        Some(Self {
            bytes,
            len: octets.len() as u8,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub const fn len(&self) -> usize {
        self.len as usize
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(bytes: [u8; 6]) -> Self {
        Self { bytes, len: 6 }
    }
}

impl From<u8> for MacAddr {
    fn from(octet: u8) -> Self {
        Self {
            bytes: [octet, 0, 0, 0, 0, 0],
            len: 1,
        }
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("0x")?;
        for byte in self.as_bytes() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// A BACnet address as seen by the network layer.
///
/// `LocalStation`/`LocalBroadcast` address the directly attached network;
/// the remote and global variants name destinations at least one router hop
/// away and travel in the NPDU's DNET/DADR and SNET/SADR fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Address {
    Null,
    LocalStation(MacAddr),
    RemoteStation(u16, MacAddr),
    LocalBroadcast,
    RemoteBroadcast(u16),
    GlobalBroadcast,
}

impl Address {
    /// The network number named by a remote variant.
    pub const fn network(&self) -> Option<u16> {
        match self {
            Self::RemoteStation(net, _) | Self::RemoteBroadcast(net) => Some(*net),
            _ => None,
        }
    }

    /// The station octets of a station variant.
    pub const fn mac(&self) -> Option<MacAddr> {
        match self {
            Self::LocalStation(mac) | Self::RemoteStation(_, mac) => Some(*mac),
            _ => None,
        }
    }

    pub const fn is_broadcast(&self) -> bool {
        matches!(
            self,
            Self::LocalBroadcast | Self::RemoteBroadcast(_) | Self::GlobalBroadcast
        )
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::LocalStation(mac) => write!(f, "{mac}"),
            Self::RemoteStation(net, mac) => write!(f, "{net}:{mac}"),
            Self::LocalBroadcast => f.write_str("*"),
            Self::RemoteBroadcast(net) => write!(f, "{net}:*"),
            Self::GlobalBroadcast => f.write_str("*:*"),
        }
    }
}
