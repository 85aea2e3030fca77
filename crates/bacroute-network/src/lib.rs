//! The BACnet network layer: multi-port routing between directly attached
//! networks.
//!
//! A [`NetworkServiceAccessPoint`] owns one [`NetworkAdapter`] per attached
//! network and implements NPDU forwarding across them: source-route learning,
//! hop-count handling, last-hop address rewriting and delivery of local
//! traffic upstream. Routes are discovered with Who-Is-Router-To-Network and
//! recorded in a [`RouterInfoCache`]; packets sent toward a network with no
//! known router wait in a bounded pending queue until the matching
//! I-Am-Router-To-Network arrives or the queue entry times out.
//!
//! [`RouterService`] wraps an access point in the task plumbing needed to run
//! it as a daemon: one receive driver per adapter and a queue-expiry timer.

pub mod cache;
pub mod error;
pub mod nsap;
pub mod nse;
pub mod router;

pub use cache::{RouterInfo, RouterInfoCache, RouterStatus};
pub use error::NetworkError;
pub use nsap::{IncomingApdu, NetworkAdapter, NetworkServiceAccessPoint};
pub use router::RouterService;
