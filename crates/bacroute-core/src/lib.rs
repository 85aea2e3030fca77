//! BACnet network-layer types and codecs in pure Rust.
//!
//! `bacroute-core` holds the pieces of the internetworking stack that know
//! nothing about sockets or timers: the BACnet address model, the NPDU
//! container with its routing fields, the network-layer message set, and the
//! zero-copy reader/writer the codecs are built on. The routing and broadcast
//! distribution crates in this workspace are layered on top.
//!
//! # Feature flags
//!
//! - **`serde`**: derives `Serialize`/`Deserialize` on address and message types.

/// BACnet address model: station MACs and the six-variant address union.
pub mod address;
/// Binary encoding helpers: zero-copy reader and caller-owned-buffer writer.
pub mod encoding;
/// Error types for encoding and decoding operations.
pub mod error;
/// Network-layer message set (Who-Is-Router-To-Network and friends).
pub mod message;
/// NPDU (Network Protocol Data Unit) container and codec.
pub mod npdu;

pub use address::{Address, MacAddr};
pub use error::{DecodeError, EncodeError};
pub use message::{NetworkMessage, RoutingTableEntry};
pub use npdu::{Npdu, NpduContent};
