//! Network Source/Sink transport (component H): the wire codec and the
//! partition-addressed, credit-backed TCP transport built on it.

pub mod transport;
pub mod wire;

pub use transport::{receive_loop, NetworkTransport};
pub use wire::{FrameType, MetadataHeader};
