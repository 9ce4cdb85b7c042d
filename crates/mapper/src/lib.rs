//! Mapper control node: cluster membership, target selection, job
//! correlation, and offline-failsafe redelivery (spec.md §1-§5).
//!
//! This crate is the façade binding [`mapper_cluster`], [`mapper_warden`],
//! [`mapper_broker`], and [`mapper_protocol`] together into one runnable
//! control node. The binary (`src/main.rs`) is a thin wrapper around
//! [`facade::Mapper`] and [`run::run`]; everything in here is also usable
//! as a library, e.g. to embed a mapper in a single-process integration
//! test against [`mapper_broker::memory::InMemoryBroker`].

pub mod config;
pub mod facade;
pub mod metrics;
pub mod redeliverer;
pub mod run;

pub use config::MapperConfig;
pub use facade::{Dispatch, Mapper, RequestOpts, SharedMapper};
pub use metrics::{Metrics, MetricsSnapshot, METRICS};
