use bacroute_datalink::BdtEntry;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Parses a broadcast distribution entry written as `ip:port/mask`, where
/// the mask is either a prefix length or a dotted quad.
pub fn parse_bdt_entry(value: &str) -> Result<BdtEntry, String> {
    let (addr_part, mask_part) = value
        .split_once('/')
        .ok_or_else(|| "entry must be in ip:port/mask format".to_string())?;
    let address: SocketAddrV4 = addr_part
        .parse()
        .map_err(|e| format!("invalid entry address '{addr_part}': {e}"))?;
    let mask = parse_mask(mask_part)?;
    Ok(BdtEntry { address, mask })
}

fn parse_mask(value: &str) -> Result<Ipv4Addr, String> {
    if let Ok(prefix) = value.parse::<u8>() {
        if prefix > 32 {
            return Err(format!("prefix length {prefix} is out of range"));
        }
        let bits = if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix))
        };
        return Ok(Ipv4Addr::from(bits));
    }
    value
        .parse()
        .map_err(|e| format!("invalid subnet mask '{value}': {e}"))
}

/// One `--adapter` binding: the network number, the socket to bind, and the
/// subnet broadcast address frames leave on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterSpec {
    pub network: u16,
    pub bind: SocketAddrV4,
    pub broadcast: SocketAddrV4,
}

/// Parses an adapter binding written as `net=ip:port[,broadcast]`. The
/// broadcast part takes either `ip:port` or a bare address reusing the bind
/// port; without it the limited broadcast address is used.
pub fn parse_adapter_spec(value: &str) -> Result<AdapterSpec, String> {
    let (net_part, rest) = value
        .split_once('=')
        .ok_or_else(|| "adapter must be in net=ip:port[,broadcast] format".to_string())?;
    let network: u16 = net_part
        .parse()
        .map_err(|e| format!("invalid network number '{net_part}': {e}"))?;
    if network == 0 || network == 0xFFFF {
        return Err(format!("network number {network} is reserved"));
    }
    let (bind_part, broadcast_part) = match rest.split_once(',') {
        Some((bind, broadcast)) => (bind, Some(broadcast)),
        None => (rest, None),
    };
    let bind: SocketAddrV4 = bind_part
        .parse()
        .map_err(|e| format!("invalid bind address '{bind_part}': {e}"))?;
    let broadcast = match broadcast_part {
        Some(part) => match part.parse::<SocketAddrV4>() {
            Ok(addr) => addr,
            Err(_) => {
                let ip: Ipv4Addr = part
                    .parse()
                    .map_err(|e| format!("invalid broadcast address '{part}': {e}"))?;
                SocketAddrV4::new(ip, bind.port())
            }
        },
        None => SocketAddrV4::new(Ipv4Addr::BROADCAST, bind.port()),
    };
    Ok(AdapterSpec {
        network,
        bind,
        broadcast,
    })
}
