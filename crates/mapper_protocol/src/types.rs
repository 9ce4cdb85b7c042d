//! Canonical wire types for the mapper control plane.
//!
//! # Envelope
//!
//! Every message crossing the broker — a request published to an agent, an
//! agent's reply delivered back to the mapper's private inbox, or a message
//! parked in the offline queue — is carried as one [`Envelope`]. Agents only
//! ever read `kind`, `payload`, `from`, and `token`; the selection fields
//! (`selector`, `target`) are consumed by the cluster registry before the
//! envelope is ever published and are irrelevant on the reply path.

use mapper_ids::Token;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Opaque identity string, unique within the cluster (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Borrow<str> for AgentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Service-route tag an agent advertises and a request targets (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ServiceRoute(String);

impl ServiceRoute {
    pub fn new(route: impl Into<String>) -> Self {
        Self(route.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ServiceRoute {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ServiceRoute {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Borrow<str> for ServiceRoute {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Target-selection policy (spec.md §3/§4.1). Default is `LeastLoaded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    #[default]
    LeastLoaded,
    Random,
    RoundRobin,
    All,
}

/// Immutable-once-built request/reply envelope (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Service route this request targets. Unused on the reply path.
    pub kind: ServiceRoute,
    /// Opaque payload, carried end-to-end.
    pub payload: Vec<u8>,
    /// Sender identity: the mapper's identity on the way out, the
    /// replying agent's identity on the way back.
    pub from: AgentId,
    /// Correlation id, fresh per outgoing request.
    pub token: Token,
    /// Set to the mapper's identity for request-with-reply, unset for push.
    pub reply_to: Option<AgentId>,
    #[serde(default)]
    pub selector: Selector,
    /// Explicit target identity; overrides `selector` when set.
    pub target: Option<AgentId>,
    /// Broker durability flag.
    pub persistent: bool,
    /// Offline-failsafe policy flag.
    pub offline_failsafe: bool,
}

impl Envelope {
    /// True when this envelope expects a reply (the façade's `request`, not `push`).
    pub fn expects_reply(&self) -> bool {
        self.reply_to.is_some()
    }
}
