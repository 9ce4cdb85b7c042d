//! Mapper binary: control node for a broker-fabric work-dispatch cluster.
//!
//! Usage:
//!     mapper --identity east-1 --agent-timeout 15

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use mapper::{Mapper, MapperConfig};
#[cfg(not(feature = "zmq-broker"))]
use mapper_broker::memory::InMemoryBroker;
#[cfg(feature = "zmq-broker")]
use mapper_broker::zmq::ZmqBroker;
use mapper_protocol::{AgentId, JsonCodec};
use tokio::sync::Mutex;

/// Reaper cadence is a fraction of `agent_timeout`, distinct from the
/// timeout itself (spec.md §4.1: "at a cadence ≤ agent_timeout"); see
/// DESIGN.md for why a fixed divisor was chosen over a dedicated flag.
const REAP_TICK_DIVISOR: f64 = 3.0;
const MIN_REAP_TICK_SECS: f64 = 1.0;

/// In-process broker fake, suitable for embedding the mapper in one
/// process or for running the integration/scenario test suite.
#[cfg(not(feature = "zmq-broker"))]
async fn build_broker(_config: &MapperConfig) -> anyhow::Result<Arc<InMemoryBroker>> {
    Ok(Arc::new(InMemoryBroker::new()))
}

/// Production broker: binds a ROUTER socket agents connect DEALER
/// sockets to at `tcp://<host>:<port>`.
#[cfg(feature = "zmq-broker")]
async fn build_broker(config: &MapperConfig) -> anyhow::Result<Arc<ZmqBroker>> {
    let addr = format!("tcp://{}:{}", config.host, config.port);
    let broker = ZmqBroker::bind(&addr)
        .await
        .with_context(|| format!("failed to bind zmq router at {addr}"))?;
    Ok(Arc::new(broker))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = MapperConfig::parse();

    mapper_logging::init_logging(mapper_logging::LogConfig {
        app_name: "mapper",
        verbose: config.log_level.eq_ignore_ascii_case("debug"),
        quiet_console: config.console,
    })
    .context("failed to initialize logging")?;

    let identity = AgentId::from(config.mapper_identity());
    tracing::info!(%identity, agent_timeout = config.agent_timeout, "starting mapper");

    let broker = build_broker(&config).await?;
    let codec = JsonCodec;
    let mut mapper = Mapper::new(
        identity,
        broker,
        codec,
        config.agent_timeout_secs(),
        config.persistent,
    );
    mapper
        .declare_topology()
        .await
        .context("failed to declare broker topology")?;

    let reap_interval_secs = (config.agent_timeout_secs() / REAP_TICK_DIVISOR).max(MIN_REAP_TICK_SECS);
    let mapper = Arc::new(Mutex::new(mapper));
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received ctrl-c, shutting down");
            let _ = shutdown_tx.send(());
        }
    });

    mapper::run::run(
        mapper,
        Duration::from_secs_f64(reap_interval_secs),
        Duration::from_secs_f64(config.offline_redelivery_frequency_secs()),
        shutdown_rx,
    )
    .await
    .context("mapper event loop exited with an error")?;

    Ok(())
}
