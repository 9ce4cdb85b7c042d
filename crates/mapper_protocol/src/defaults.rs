//! Canonical default values shared across the mapper and its broker adaptor.

/// Broker bind address agents connect to (spec.md §6).
pub const DEFAULT_BROKER_ADDR: &str = "tcp://127.0.0.1:5555";
/// Default agent heartbeat timeout, in seconds (spec.md §6).
pub const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 15;
/// Default offline-queue recovery cadence, in seconds (spec.md §6).
pub const DEFAULT_OFFLINE_REDELIVERY_FREQUENCY_SECS: u64 = 10;
/// Name of the durable queue deferred requests are parked on (spec.md §3).
pub const OFFLINE_QUEUE_NAME: &str = "mapper-offline";
