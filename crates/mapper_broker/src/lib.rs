//! Broker adaptor consumed by the mapper core (spec.md §6).
//!
//! The mapper never talks to a transport directly — every publish,
//! subscribe, and acknowledgement crosses the [`Broker`] trait. This keeps
//! the core testable against [`memory::InMemoryBroker`] and lets a real
//! deployment swap in the [`zmq`] adaptor (feature `zmq-broker`) or any
//! other transport without touching cluster/warden/façade code.

pub mod memory;
#[cfg(feature = "zmq-broker")]
pub mod zmq;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors surfaced by a broker adaptor. Transient failures are the
/// adaptor's to retry/reconnect (spec.md §7); they are reported here only
/// so callers can log them.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker publish failed: {0}")]
    Publish(String),
    #[error("broker subscribe failed: {0}")]
    Subscribe(String),
    #[error("broker queue declaration failed: {0}")]
    Declare(String),
    #[error("broker ack failed: {0}")]
    Ack(String),
    #[error("broker recover failed: {0}")]
    Recover(String),
}

/// Identifies one delivered message for acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryInfo {
    pub queue: String,
    pub delivery_tag: u64,
}

/// One message handed to a subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub info: DeliveryInfo,
    pub payload: Vec<u8>,
}

/// A live subscription. The mapper's event loop polls `rx` instead of
/// registering a callback — see DESIGN.md for why the callback shape
/// named in spec.md §6 is expressed this way in Rust.
pub struct Subscription {
    pub rx: mpsc::UnboundedReceiver<Delivery>,
}

/// Capability set the mapper core requires of a message-broker fabric.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn declare_queue(&self, name: &str, durable: bool, exclusive: bool) -> Result<(), BrokerError>;
    async fn declare_fanout(&self, name: &str) -> Result<(), BrokerError>;
    async fn bind(&self, queue: &str, exchange: &str) -> Result<(), BrokerError>;
    /// Publish to `queue`, routed through `exchange` (empty string for a
    /// direct per-agent address with no exchange indirection).
    async fn publish(
        &self,
        exchange: &str,
        queue: &str,
        payload: Vec<u8>,
        persistent: bool,
    ) -> Result<(), BrokerError>;
    async fn subscribe(&self, queue: &str, manual_ack: bool) -> Result<Subscription, BrokerError>;
    async fn ack(&self, info: &DeliveryInfo) -> Result<(), BrokerError>;
    /// Re-deliver previously-delivered-but-unacked messages on `queue`.
    async fn recover(&self, queue: &str) -> Result<(), BrokerError>;

    /// Drains one inbound transport-level frame and routes it to the
    /// matching queue's subscriber. Brokers that have no transport of
    /// their own to poll (e.g. [`memory::InMemoryBroker`], which is
    /// driven entirely by direct calls to `publish`/`subscribe`) use the
    /// default, which simply never resolves so the event loop's `select!`
    /// branch calling it never fires. [`zmq::ZmqBroker`] overrides this to
    /// read the next ROUTER frame off the wire.
    async fn pump(&self) -> Result<(), BrokerError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}
