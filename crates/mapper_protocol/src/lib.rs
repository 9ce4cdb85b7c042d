//! Wire types and codec contract for the mapper control plane.
//!
//! Defines the [`Envelope`](types::Envelope) carried between the mapper,
//! agents, and the offline queue, plus the [`Codec`](codec::Codec) trait
//! external serialization schemes implement. Transport (the broker) and
//! the concrete bytes-on-the-wire encoding are deliberately kept out of
//! this crate's core types — see spec.md §6.

pub mod codec;
pub mod defaults;
pub mod header;
pub mod types;

pub use codec::{Codec, CodecError, JsonCodec};
pub use header::{FrameHeader, FrameHeaderError};
pub use types::{AgentId, Envelope, Selector, ServiceRoute};
pub use mapper_ids::Token;
