use crate::bip::bvll::{BvllMessage, RESULT_SUCCESS};
use crate::bip::tables::{BdtEntry, FdtEntry};
use crate::bip::MAX_FRAME_LEN;
use crate::traits::LinkError;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration, Instant};

const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// A request/reply client for administering one BBMD remotely.
///
/// Commands are serialized, so replies cannot be attributed to the wrong
/// request; frames from anyone but the target are ignored.
#[derive(Debug)]
pub struct BbmdAdmin {
    socket: UdpSocket,
    bbmd: SocketAddrV4,
    reply_timeout: Duration,
    command_lock: Mutex<()>,
}

impl BbmdAdmin {
    /// Binds an ephemeral socket aimed at `bbmd`.
    pub async fn connect(bbmd: SocketAddrV4) -> Result<Self, LinkError> {
        Self::connect_from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0), bbmd).await
    }

    /// Like [`connect`](Self::connect), but binds to a specific local
    /// address. Needed on multihomed hosts where the outgoing interface
    /// matters (the BBMD keys its foreign device table on source address).
    pub async fn connect_from(local: SocketAddrV4, bbmd: SocketAddrV4) -> Result<Self, LinkError> {
        let socket = UdpSocket::bind(local).await?;
        Ok(Self {
            socket,
            bbmd,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            command_lock: Mutex::new(()),
        })
    }

    /// The local address commands are sent from.
    pub fn local_addr(&self) -> Result<SocketAddrV4, LinkError> {
        match self.socket.local_addr()? {
            SocketAddr::V4(addr) => Ok(addr),
            SocketAddr::V6(_) => Err(LinkError::NotIpStation),
        }
    }

    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    async fn command(&self, request: BvllMessage) -> Result<BvllMessage, LinkError> {
        let _guard = self.command_lock.lock().await;
        self.socket.send_to(&request.to_vec()?, self.bbmd).await?;

        let deadline = Instant::now() + self.reply_timeout;
        let mut frame = [0u8; MAX_FRAME_LEN];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LinkError::Timeout);
            }
            let (n, src) = match timeout(remaining, self.socket.recv_from(&mut frame)).await {
                Ok(received) => received?,
                Err(_) => return Err(LinkError::Timeout),
            };
            if src != SocketAddr::V4(self.bbmd) {
                continue;
            }
            match BvllMessage::decode(&frame[..n]) {
                Ok(reply) => return Ok(reply),
                Err(err) => log::debug!("ignoring malformed reply from {src}: {err}"),
            }
        }
    }

    pub async fn read_bdt(&self) -> Result<Vec<BdtEntry>, LinkError> {
        match self.command(BvllMessage::ReadBroadcastDistributionTable).await? {
            BvllMessage::ReadBroadcastDistributionTableAck(entries) => Ok(entries),
            reply => Err(unexpected(reply)),
        }
    }

    pub async fn write_bdt(&self, entries: &[BdtEntry]) -> Result<(), LinkError> {
        let request = BvllMessage::WriteBroadcastDistributionTable(entries.to_vec());
        expect_success(self.command(request).await?)
    }

    pub async fn read_fdt(&self) -> Result<Vec<FdtEntry>, LinkError> {
        match self.command(BvllMessage::ReadForeignDeviceTable).await? {
            BvllMessage::ReadForeignDeviceTableAck(entries) => Ok(entries),
            reply => Err(unexpected(reply)),
        }
    }

    pub async fn delete_fdt_entry(&self, address: SocketAddrV4) -> Result<(), LinkError> {
        let request = BvllMessage::DeleteForeignDeviceTableEntry { address };
        expect_success(self.command(request).await?)
    }

    pub async fn register(&self, ttl: u16) -> Result<(), LinkError> {
        expect_success(
            self.command(BvllMessage::RegisterForeignDevice { ttl })
                .await?,
        )
    }
}

fn expect_success(reply: BvllMessage) -> Result<(), LinkError> {
    match reply {
        BvllMessage::Result {
            code: RESULT_SUCCESS,
        } => Ok(()),
        reply => Err(unexpected(reply)),
    }
}

fn unexpected(reply: BvllMessage) -> LinkError {
    match reply {
        BvllMessage::Result { code } => LinkError::Nak(code),
        other => LinkError::UnsupportedFunction(other.function().to_u8()),
    }
}

#[cfg(test)]
mod tests {
    use super::BbmdAdmin;
    use crate::bip::bbmd::Bbmd;
    use crate::bip::bvll::{RESULT_DELETE_FDT_NAK, RESULT_WRITE_BDT_NAK};
    use crate::bip::tables::BdtEntry;
    use crate::traits::{Link, LinkError};
    use std::net::{Ipv4Addr, SocketAddrV4};
    use tokio::time::Duration;

    const ANY: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0);

    fn spawn_driver(bbmd: &Bbmd) -> tokio::task::JoinHandle<()> {
        let bbmd = bbmd.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 1600];
            loop {
                let _ = bbmd.recv(&mut buf).await;
            }
        })
    }

    #[tokio::test]
    async fn administers_a_live_bbmd() {
        let bbmd = Bbmd::bind(ANY, ANY).await.unwrap();
        let driver = spawn_driver(&bbmd);
        let admin = BbmdAdmin::connect_from(ANY, bbmd.address()).await.unwrap();
        let admin_addr = admin.local_addr().unwrap();

        assert!(admin.read_bdt().await.unwrap().is_empty());

        let peer = BdtEntry::new(
            SocketAddrV4::new(Ipv4Addr::new(198, 51, 100, 1), 47808),
            Ipv4Addr::BROADCAST,
        );
        assert!(matches!(
            admin.write_bdt(&[peer]).await,
            Err(LinkError::Nak(RESULT_WRITE_BDT_NAK))
        ));

        bbmd.add_peer(peer).await.unwrap();
        assert_eq!(admin.read_bdt().await.unwrap(), vec![peer]);

        admin.register(60).await.unwrap();
        let fdt = admin.read_fdt().await.unwrap();
        assert_eq!(fdt.len(), 1);
        assert_eq!(fdt[0].address, admin_addr);
        assert_eq!(fdt[0].remaining_seconds, 65);

        admin.delete_fdt_entry(admin_addr).await.unwrap();
        assert!(matches!(
            admin.delete_fdt_entry(admin_addr).await,
            Err(LinkError::Nak(RESULT_DELETE_FDT_NAK))
        ));
        assert!(admin.read_fdt().await.unwrap().is_empty());

        driver.abort();
    }

    #[tokio::test]
    async fn times_out_without_a_reply() {
        // Bound but never driven, so nothing answers.
        let silent = Bbmd::bind(ANY, ANY).await.unwrap();
        let admin = BbmdAdmin::connect(silent.address())
            .await
            .unwrap()
            .with_reply_timeout(Duration::from_millis(50));
        assert!(matches!(admin.read_bdt().await, Err(LinkError::Timeout)));
    }
}
