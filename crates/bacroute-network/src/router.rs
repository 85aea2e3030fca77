use crate::error::NetworkError;
use crate::nsap::NetworkServiceAccessPoint;
use bacroute_core::Npdu;
use bacroute_datalink::Link;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

const RECV_BUF_LEN: usize = 1600;

/// Runs a [`NetworkServiceAccessPoint`] as a live node or router: one
/// receive driver per adapter plus the pending-queue expiry timer.
///
/// All tasks stop when the service is dropped or [`stop`](Self::stop) is
/// called.
#[derive(Debug)]
pub struct RouterService<L: Link> {
    nsap: Arc<Mutex<NetworkServiceAccessPoint<L>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<L> RouterService<L>
where
    L: Link + Clone + 'static,
{
    pub fn start(nsap: NetworkServiceAccessPoint<L>) -> Self {
        let links: Vec<L> = nsap.adapters().iter().map(|a| a.link().clone()).collect();
        let nsap = Arc::new(Mutex::new(nsap));
        let mut tasks = Vec::with_capacity(links.len() + 1);

        for (index, link) in links.into_iter().enumerate() {
            let nsap = Arc::clone(&nsap);
            tasks.push(tokio::spawn(async move {
                let mut buf = [0u8; RECV_BUF_LEN];
                loop {
                    match link.recv(&mut buf).await {
                        Ok((len, source, broadcast)) => {
                            let mut nsap = nsap.lock().await;
                            nsap.process_frame(index, &buf[..len], source, broadcast).await;
                        }
                        Err(err) => log::warn!("adapter {index}: receive failed: {err}"),
                    }
                }
            }));
        }

        let expiry = Arc::clone(&nsap);
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                expiry.lock().await.expire_pending(Instant::now());
            }
        }));

        Self { nsap, tasks }
    }

    /// Sends an NPDU originated by the local application.
    pub async fn indication(&self, npdu: Npdu) -> Result<(), NetworkError> {
        self.nsap.lock().await.indication(npdu).await
    }

    /// Shared handle to the access point, for inspection and for taking the
    /// upstream receiver after the service has started.
    pub fn nsap(&self) -> Arc<Mutex<NetworkServiceAccessPoint<L>>> {
        Arc::clone(&self.nsap)
    }

    pub fn stop(self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl<L: Link> Drop for RouterService<L> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
