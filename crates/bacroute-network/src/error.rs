use bacroute_core::{DecodeError, EncodeError};
use bacroute_datalink::LinkError;
use thiserror::Error;

/// Errors raised by the network layer.
///
/// Setup mistakes (`NoAdapters`, `NoLocalAdapter`, `DuplicateNetwork`) and
/// impossible destinations surface synchronously from `bind` and
/// `indication`. Inbound protocol violations never appear here; they are
/// logged and the offending packet is dropped.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("link error: {0}")]
    Link(#[from] LinkError),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("no adapters are bound")]
    NoAdapters,
    #[error("more than one adapter is bound but none is designated local")]
    NoLocalAdapter,
    #[error("network {0} is already bound to an adapter")]
    DuplicateNetwork(u16),
    #[error("an unnumbered adapter must be the only adapter")]
    UnnumberedAdapter,
    #[error("network {0} is directly connected; the destination should be local")]
    LocalDestination(u16),
    #[error("destination address cannot be routed")]
    InvalidDestination,
}
