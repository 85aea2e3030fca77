use crate::bip::bvll::{BvllMessage, RESULT_SUCCESS};
use crate::bip::link::{fill, service_nak_code};
use crate::bip::{mac_from_socket, socket_from_mac, TaskGuard, MAX_FRAME_LEN};
use crate::traits::{Link, LinkDestination, LinkError};
use bacroute_core::MacAddr;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::{Arc, Weak};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::Duration;

/// Seconds past the ttl a registration may go unconfirmed before it is
/// considered lapsed (Annex J.5.2.3).
const REGISTRATION_GRACE_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStatus {
    Unregistered,
    /// Registration sent, no Result heard back yet.
    RegistrationPending,
    Registered,
    /// The BBMD answered with a non-zero Result code.
    Rejected(u16),
}

impl RegistrationStatus {
    /// The conventional numeric form: -2 unregistered, -1 pending, 0
    /// registered, the literal code when rejected.
    pub const fn code(&self) -> i32 {
        match self {
            Self::Unregistered => -2,
            Self::RegistrationPending => -1,
            Self::Registered => 0,
            Self::Rejected(code) => *code as i32,
        }
    }
}

#[derive(Debug)]
struct RegistrationState {
    status: RegistrationStatus,
    bbmd: Option<SocketAddrV4>,
    ttl: u16,
    renewal: Option<TaskGuard>,
    grace: Option<TaskGuard>,
}

/// A device on a subnet without a BBMD of its own, registered with a remote
/// BBMD that relays broadcasts both ways.
///
/// Broadcasts leave as Distribute-Broadcast-To-Network and arrive back as
/// Forwarded-NPDUs; both directions require a live registration.
#[derive(Debug, Clone)]
pub struct ForeignDevice {
    socket: Arc<UdpSocket>,
    state: Arc<Mutex<RegistrationState>>,
}

impl ForeignDevice {
    pub async fn bind(bind: SocketAddrV4) -> Result<Self, LinkError> {
        let socket = UdpSocket::bind(SocketAddr::V4(bind)).await?;
        socket.set_broadcast(true)?;
        Ok(Self {
            socket: Arc::new(socket),
            state: Arc::new(Mutex::new(RegistrationState {
                status: RegistrationStatus::Unregistered,
                bbmd: None,
                ttl: 0,
                renewal: None,
                grace: None,
            })),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddrV4, LinkError> {
        match self.socket.local_addr()? {
            SocketAddr::V4(addr) => Ok(addr),
            SocketAddr::V6(_) => Err(LinkError::NotIpStation),
        }
    }

    pub async fn status(&self) -> RegistrationStatus {
        self.state.lock().await.status
    }

    pub async fn bbmd(&self) -> Option<SocketAddrV4> {
        self.state.lock().await.bbmd
    }

    /// Registers with `bbmd`, sending immediately and then renewing every
    /// `ttl` seconds until unregistered or dropped.
    pub async fn register(&self, bbmd: SocketAddrV4, ttl: u16) -> Result<(), LinkError> {
        if ttl == 0 {
            return Err(LinkError::InvalidTtl);
        }
        let frame = (BvllMessage::RegisterForeignDevice { ttl }).to_vec()?;

        let mut state = self.state.lock().await;
        state.status = RegistrationStatus::RegistrationPending;
        state.bbmd = Some(bbmd);
        state.ttl = ttl;
        state.grace = None;

        let socket = Arc::clone(&self.socket);
        state.renewal = Some(TaskGuard::new(tokio::spawn(async move {
            loop {
                if let Err(err) = socket.send_to(&frame, bbmd).await {
                    log::warn!("foreign device registration with {bbmd} failed: {err}");
                }
                tokio::time::sleep(Duration::from_secs(u64::from(ttl))).await;
            }
        })));
        Ok(())
    }

    /// Tells the BBMD to drop the registration and resets local state.
    pub async fn unregister(&self) -> Result<(), LinkError> {
        let mut state = self.state.lock().await;
        if let Some(bbmd) = state.bbmd {
            let frame = (BvllMessage::RegisterForeignDevice { ttl: 0 }).to_vec()?;
            self.socket.send_to(&frame, bbmd).await?;
        }
        state.status = RegistrationStatus::Unregistered;
        state.bbmd = None;
        state.ttl = 0;
        state.renewal = None;
        state.grace = None;
        Ok(())
    }

    /// Starts the ttl + grace countdown that declares the registration
    /// lapsed unless another successful Result arrives first.
    fn arm_grace(&self, state: &mut RegistrationState) {
        let delay = Duration::from_secs(u64::from(state.ttl) + REGISTRATION_GRACE_SECS);
        let weak: Weak<Mutex<RegistrationState>> = Arc::downgrade(&self.state);
        state.grace = Some(TaskGuard::new(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(state) = weak.upgrade() {
                let mut state = state.lock().await;
                log::warn!("foreign device registration lapsed without confirmation");
                state.status = RegistrationStatus::Unregistered;
            }
        })));
    }

    async fn handle_result(&self, src: SocketAddrV4, code: u16) {
        let mut state = self.state.lock().await;
        // Results count only from the BBMD we registered with, and only
        // while not Unregistered: a lapsed registration stays lapsed until
        // register() is called again.
        if state.bbmd != Some(src) || state.status == RegistrationStatus::Unregistered {
            log::debug!("ignoring BVLL result 0x{code:04x} from {src}");
            return;
        }
        if code == RESULT_SUCCESS {
            state.status = RegistrationStatus::Registered;
            self.arm_grace(&mut state);
        } else {
            log::warn!("registration rejected by {src} with 0x{code:04x}");
            state.status = RegistrationStatus::Rejected(code);
        }
    }
}

impl Link for ForeignDevice {
    async fn send(&self, destination: LinkDestination, npdu: &[u8]) -> Result<(), LinkError> {
        match destination {
            LinkDestination::Station(mac) => {
                let frame = BvllMessage::OriginalUnicastNpdu(npdu.to_vec()).to_vec()?;
                self.socket.send_to(&frame, socket_from_mac(mac)?).await?;
            }
            LinkDestination::Broadcast => {
                let target = {
                    let state = self.state.lock().await;
                    match (state.status, state.bbmd) {
                        (RegistrationStatus::Registered, Some(bbmd)) => Some(bbmd),
                        _ => None,
                    }
                };
                // Not registered means nobody would relay it; drop quietly.
                let Some(bbmd) = target else {
                    log::debug!("dropping broadcast while unregistered");
                    return Ok(());
                };
                let frame = BvllMessage::DistributeBroadcastToNetwork(npdu.to_vec()).to_vec()?;
                self.socket.send_to(&frame, bbmd).await?;
            }
        }
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
                Ok(BvllMessage::ForwardedNpdu { origin, npdu }) => {
                    let state = self.state.lock().await;
                    let accepted = state.status == RegistrationStatus::Registered
                        && state.bbmd == Some(src);
                    drop(state);
                    if accepted {
                        return Ok((fill(buf, &npdu)?, mac_from_socket(origin), true));
                    }
                    log::debug!("dropping forwarded NPDU from {src} while unregistered");
                }
                Ok(BvllMessage::Result { code }) => {
                    self.handle_result(src, code).await;
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

#[cfg(test)]
mod tests {
    use super::{ForeignDevice, RegistrationStatus};
    use crate::bip::bvll::{BvllMessage, RESULT_SUCCESS};
    use crate::bip::mac_from_socket;
    use crate::traits::{Link, LinkDestination, LinkError};
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
    use tokio::net::UdpSocket;
    use tokio::time::{timeout, Duration};

    const ANY: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0);

    async fn sock() -> (UdpSocket, SocketAddrV4) {
        let socket = UdpSocket::bind(ANY).await.unwrap();
        let addr = match socket.local_addr().unwrap() {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => unreachable!(),
        };
        (socket, addr)
    }

    async fn recv_message(socket: &UdpSocket) -> BvllMessage {
        let mut buf = [0u8; 1600];
        let (n, _) = socket.recv_from(&mut buf).await.unwrap();
        BvllMessage::decode(&buf[..n]).unwrap()
    }

    async fn wait_for_status(device: &ForeignDevice, wanted: RegistrationStatus) {
        for _ in 0..100 {
            if device.status().await == wanted {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("status never became {wanted:?}");
    }

    #[test]
    fn status_codes() {
        assert_eq!(RegistrationStatus::Unregistered.code(), -2);
        assert_eq!(RegistrationStatus::RegistrationPending.code(), -1);
        assert_eq!(RegistrationStatus::Registered.code(), 0);
        assert_eq!(RegistrationStatus::Rejected(0x0030).code(), 0x30);
    }

    #[tokio::test]
    async fn zero_ttl_is_rejected() {
        let device = ForeignDevice::bind(ANY).await.unwrap();
        let bbmd = SocketAddrV4::new(Ipv4Addr::new(198, 51, 100, 1), 47808);
        assert!(matches!(
            device.register(bbmd, 0).await,
            Err(LinkError::InvalidTtl)
        ));
        assert_eq!(device.status().await.code(), -2);
    }

    #[tokio::test]
    async fn register_sends_immediately_and_goes_pending() {
        let (bbmd, bbmd_addr) = sock().await;
        let device = ForeignDevice::bind(ANY).await.unwrap();

        device.register(bbmd_addr, 60).await.unwrap();
        assert_eq!(device.status().await.code(), -1);
        assert_eq!(
            recv_message(&bbmd).await,
            BvllMessage::RegisterForeignDevice { ttl: 60 }
        );
    }

    #[tokio::test]
    async fn successful_result_enables_distribute() {
        let (bbmd, bbmd_addr) = sock().await;
        let device = ForeignDevice::bind(ANY).await.unwrap();
        let device_addr = device.local_addr().unwrap();

        device.register(bbmd_addr, 60).await.unwrap();
        recv_message(&bbmd).await;

        let driver = {
            let device = device.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 64];
                let _ = device.recv(&mut buf).await;
            })
        };
        let ack = BvllMessage::Result {
            code: RESULT_SUCCESS,
        }
        .to_vec()
        .unwrap();
        bbmd.send_to(&ack, device_addr).await.unwrap();
        wait_for_status(&device, RegistrationStatus::Registered).await;

        device
            .send(LinkDestination::Broadcast, &[0x01, 0x00, 0x33])
            .await
            .unwrap();
        assert_eq!(
            recv_message(&bbmd).await,
            BvllMessage::DistributeBroadcastToNetwork(vec![0x01, 0x00, 0x33])
        );
        driver.abort();
    }

    #[tokio::test]
    async fn broadcasts_drop_silently_until_registered() {
        let (bbmd, bbmd_addr) = sock().await;
        let device = ForeignDevice::bind(ANY).await.unwrap();
        device.register(bbmd_addr, 60).await.unwrap();
        recv_message(&bbmd).await;

        device
            .send(LinkDestination::Broadcast, &[0x01, 0x00])
            .await
            .unwrap();
        let mut buf = [0u8; 64];
        assert!(timeout(Duration::from_millis(100), bbmd.recv_from(&mut buf))
            .await
            .is_err());

        // Unicasts are not gated on registration.
        device
            .send(
                LinkDestination::Station(mac_from_socket(bbmd_addr)),
                &[0x01, 0x00],
            )
            .await
            .unwrap();
        assert!(matches!(
            recv_message(&bbmd).await,
            BvllMessage::OriginalUnicastNpdu(_)
        ));
    }

    #[tokio::test]
    async fn forwarded_accepted_only_from_bbmd_while_registered() {
        let (bbmd, bbmd_addr) = sock().await;
        let (stranger, _) = sock().await;
        let device = ForeignDevice::bind(ANY).await.unwrap();
        let device_addr = device.local_addr().unwrap();

        device.register(bbmd_addr, 60).await.unwrap();
        recv_message(&bbmd).await;

        let origin = SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 3), 47808);
        let early = BvllMessage::ForwardedNpdu {
            origin,
            npdu: vec![0xAA],
        }
        .to_vec()
        .unwrap();
        // Still pending, so this one must be dropped.
        stranger.send_to(&early, device_addr).await.unwrap();

        let ack = BvllMessage::Result {
            code: RESULT_SUCCESS,
        }
        .to_vec()
        .unwrap();
        bbmd.send_to(&ack, device_addr).await.unwrap();

        let wanted = BvllMessage::ForwardedNpdu {
            origin,
            npdu: vec![0xBB],
        }
        .to_vec()
        .unwrap();
        bbmd.send_to(&wanted, device_addr).await.unwrap();

        let mut buf = [0u8; 64];
        let (n, src, is_broadcast) = device.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0xBB]);
        assert_eq!(src, mac_from_socket(origin));
        assert!(is_broadcast);
    }

    #[tokio::test]
    async fn rejection_code_is_stored() {
        let (bbmd, bbmd_addr) = sock().await;
        let device = ForeignDevice::bind(ANY).await.unwrap();
        let device_addr = device.local_addr().unwrap();
        device.register(bbmd_addr, 60).await.unwrap();
        recv_message(&bbmd).await;

        let driver = {
            let device = device.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 64];
                let _ = device.recv(&mut buf).await;
            })
        };
        let nak = BvllMessage::Result { code: 0x0030 }.to_vec().unwrap();
        bbmd.send_to(&nak, device_addr).await.unwrap();
        wait_for_status(&device, RegistrationStatus::Rejected(0x0030)).await;
        assert_eq!(device.status().await.code(), 0x30);
        driver.abort();
    }

    #[tokio::test]
    async fn unregister_sends_zero_ttl_and_resets() {
        let (bbmd, bbmd_addr) = sock().await;
        let device = ForeignDevice::bind(ANY).await.unwrap();
        device.register(bbmd_addr, 60).await.unwrap();
        recv_message(&bbmd).await;

        device.unregister().await.unwrap();
        assert_eq!(
            recv_message(&bbmd).await,
            BvllMessage::RegisterForeignDevice { ttl: 0 }
        );
        assert_eq!(device.status().await.code(), -2);
        assert_eq!(device.bbmd().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn grace_period_forces_unregistered() {
        let (bbmd, bbmd_addr) = sock().await;
        let device = ForeignDevice::bind(ANY).await.unwrap();
        let device_addr = device.local_addr().unwrap();

        device.register(bbmd_addr, 60).await.unwrap();
        recv_message(&bbmd).await;

        let driver = {
            let device = device.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 64];
                let _ = device.recv(&mut buf).await;
            })
        };
        let ack = BvllMessage::Result {
            code: RESULT_SUCCESS,
        }
        .to_vec()
        .unwrap();
        bbmd.send_to(&ack, device_addr).await.unwrap();
        wait_for_status(&device, RegistrationStatus::Registered).await;

        // The renewal keeps trying at ttl intervals, but no Result comes
        // back, so ttl + 30 seconds after the last success the registration
        // lapses.
        assert_eq!(
            recv_message(&bbmd).await,
            BvllMessage::RegisterForeignDevice { ttl: 60 }
        );
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(device.status().await.code(), -2);
        driver.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn late_ack_after_a_lapse_is_ignored_until_reregistered() {
        let (bbmd, bbmd_addr) = sock().await;
        let device = ForeignDevice::bind(ANY).await.unwrap();
        let device_addr = device.local_addr().unwrap();

        device.register(bbmd_addr, 60).await.unwrap();
        recv_message(&bbmd).await;

        let driver = {
            let device = device.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 64];
                let _ = device.recv(&mut buf).await;
            })
        };
        let ack = BvllMessage::Result {
            code: RESULT_SUCCESS,
        }
        .to_vec()
        .unwrap();
        bbmd.send_to(&ack, device_addr).await.unwrap();
        wait_for_status(&device, RegistrationStatus::Registered).await;

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(device.status().await.code(), -2);

        // The renewal task is still announcing, but an ack for the lapsed
        // registration must not bring it back. The unicast behind it ends
        // the driver once both frames have been processed in order.
        bbmd.send_to(&ack, device_addr).await.unwrap();
        let marker = BvllMessage::OriginalUnicastNpdu(vec![0x01, 0x00])
            .to_vec()
            .unwrap();
        bbmd.send_to(&marker, device_addr).await.unwrap();
        driver.await.unwrap();
        assert_eq!(device.status().await.code(), -2);

        // Recovery goes through register(), nothing less.
        device.register(bbmd_addr, 60).await.unwrap();
        recv_message(&bbmd).await;
        let driver = {
            let device = device.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 64];
                let _ = device.recv(&mut buf).await;
            })
        };
        bbmd.send_to(&ack, device_addr).await.unwrap();
        wait_for_status(&device, RegistrationStatus::Registered).await;
        driver.abort();
    }

    #[tokio::test]
    async fn stale_ack_after_unregister_is_ignored() {
        let (bbmd, bbmd_addr) = sock().await;
        let device = ForeignDevice::bind(ANY).await.unwrap();
        let device_addr = device.local_addr().unwrap();

        device.register(bbmd_addr, 60).await.unwrap();
        recv_message(&bbmd).await;

        let driver = {
            let device = device.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 64];
                let _ = device.recv(&mut buf).await;
            })
        };
        let ack = BvllMessage::Result {
            code: RESULT_SUCCESS,
        }
        .to_vec()
        .unwrap();
        bbmd.send_to(&ack, device_addr).await.unwrap();
        wait_for_status(&device, RegistrationStatus::Registered).await;

        device.unregister().await.unwrap();
        assert_eq!(
            recv_message(&bbmd).await,
            BvllMessage::RegisterForeignDevice { ttl: 0 }
        );

        // An ack for the old registration arriving after the reset must
        // leave the device unregistered.
        bbmd.send_to(&ack, device_addr).await.unwrap();
        let marker = BvllMessage::OriginalUnicastNpdu(vec![0x01, 0x00])
            .to_vec()
            .unwrap();
        bbmd.send_to(&marker, device_addr).await.unwrap();
        driver.await.unwrap();
        assert_eq!(device.status().await.code(), -2);
        assert_eq!(device.bbmd().await, None);
    }
}
