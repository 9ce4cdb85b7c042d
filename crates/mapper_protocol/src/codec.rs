//! Serializer interface consumed by the mapper (spec.md §6).
//!
//! The format is negotiated once, at mapper construction time, and shared
//! cluster-wide — every agent must decode with the same scheme the mapper
//! encodes with. The core never inspects payload bytes itself; it only
//! round-trips whole envelopes through this trait.

use crate::types::Envelope;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode envelope: {0}")]
    Encode(String),
    #[error("failed to decode envelope: {0}")]
    Decode(String),
}

/// Opaque encode/decode of envelopes over the wire.
pub trait Codec: Send + Sync {
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<Envelope, CodecError>;
    /// Opaque format tag, for logging and cross-mapper negotiation checks.
    fn format(&self) -> &'static str;
}

/// Default codec: plain JSON. Simple to inspect in logs and fixtures;
/// a production deployment may swap in a MessagePack or bincode codec
/// behind the same trait without touching the mapper core.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(envelope).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn format(&self) -> &'static str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentId, Selector, ServiceRoute};
    use mapper_ids::Token;

    fn sample_envelope() -> Envelope {
        Envelope {
            kind: ServiceRoute::new("hash"),
            payload: b"abc".to_vec(),
            from: AgentId::new("mapper-1"),
            token: Token::new(),
            reply_to: Some(AgentId::new("mapper-1")),
            selector: Selector::LeastLoaded,
            target: None,
            persistent: false,
            offline_failsafe: false,
        }
    }

    #[test]
    fn json_codec_round_trips_every_field() {
        let codec = JsonCodec;
        let envelope = sample_envelope();
        let bytes = codec.encode(&envelope).unwrap();
        let decoded = codec.decode(&bytes).unwrap();

        assert_eq!(decoded.kind, envelope.kind);
        assert_eq!(decoded.payload, envelope.payload);
        assert_eq!(decoded.from, envelope.from);
        assert_eq!(decoded.token, envelope.token);
        assert_eq!(decoded.reply_to, envelope.reply_to);
        assert_eq!(decoded.selector, envelope.selector);
        assert_eq!(decoded.target, envelope.target);
        assert_eq!(decoded.persistent, envelope.persistent);
        assert_eq!(decoded.offline_failsafe, envelope.offline_failsafe);
    }

    #[test]
    fn decode_rejects_garbage() {
        let codec = JsonCodec;
        assert!(codec.decode(b"not an envelope").is_err());
    }
}
