//! Event-loop glue (spec.md §4.5, §5): a periodic-timer abstraction that
//! drives the heartbeat reaper and the offline-redelivery sweep, threaded
//! explicitly through this function rather than relying on a process-wide
//! reactor (spec.md §9 design note).
//!
//! Everything the mapper reacts to — inbound replies, offline-queue
//! deliveries, reap ticks, redelivery ticks, and (for a transport that
//! needs it) inbound wire frames — funnels through one `tokio::select!`
//! over a single `Arc<Mutex<Mapper>>`. The lock is only ever held across
//! a synchronous section (target selection and warden bookkeeping never
//! yield, per spec.md §5), so this is not a source of contention; it
//! exists only so the offline redeliverer and the reply loop can share
//! one `Mapper` without a second owner.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use mapper_broker::{Broker, BrokerError};
use mapper_protocol::{defaults, Codec};
use tokio::sync::{oneshot, Mutex};
use tokio::time;

use crate::facade::{now_secs, Mapper};
use crate::metrics::METRICS;

/// Runs the mapper's event loop until `shutdown` fires.
///
/// Declares nothing itself — call [`Mapper::declare_topology`] first.
/// Subscribes to the mapper's private inbox (replies) and to
/// `mapper-offline` (manual-ack), then loops forever on five event
/// sources: inbound replies, offline deliveries, the reap tick, the
/// redelivery-recover tick, and [`Broker::pump`] (a no-op that never
/// resolves for brokers with no transport-level frames of their own to
/// drain, real work for [`mapper_broker::zmq::ZmqBroker`]).
pub async fn run<B, C>(
    mapper: Arc<Mutex<Mapper<B, C>>>,
    reap_interval: Duration,
    redelivery_interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) -> Result<(), BrokerError>
where
    B: Broker + 'static,
    C: Codec + 'static,
{
    let (broker, inbox) = {
        let guard = mapper.lock().await;
        (Arc::clone(guard.broker()), guard.identity().as_str().to_string())
    };

    let mut inbox_sub = broker.subscribe(&inbox, false).await?;
    let mut offline_sub = broker.subscribe(defaults::OFFLINE_QUEUE_NAME, true).await?;

    let mut reap_ticker = time::interval(reap_interval);
    let mut redelivery_ticker = time::interval(redelivery_interval);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                tracing::info!("mapper event loop shutting down");
                return Ok(());
            }

            Some(delivery) = inbox_sub.rx.recv() => {
                let mut guard = mapper.lock().await;
                guard.handle_reply(&delivery.payload);
            }

            Some(delivery) = offline_sub.rx.recv() => {
                let mut guard = mapper.lock().await;
                match guard.handle_offline_delivery(&delivery).await {
                    Ok(true) => drop(guard), // release before the ack I/O below
                    Ok(false) => {
                        tracing::debug!("offline message still has no target, leaving unacked");
                        continue;
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "offline redelivery publish failed");
                        METRICS.broker_errors.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                }
                if let Err(err) = broker.ack(&delivery.info).await {
                    tracing::error!(error = %err, "failed to ack offline delivery");
                    METRICS.broker_errors.fetch_add(1, Ordering::Relaxed);
                }
            }

            _ = reap_ticker.tick() => {
                let mut guard = mapper.lock().await;
                guard.reap(now_secs());
            }

            _ = redelivery_ticker.tick() => {
                if let Err(err) = broker.recover(defaults::OFFLINE_QUEUE_NAME).await {
                    tracing::error!(error = %err, "offline queue recover failed");
                    METRICS.broker_errors.fetch_add(1, Ordering::Relaxed);
                }
            }

            result = broker.pump() => {
                if let Err(err) = result {
                    tracing::error!(error = %err, "broker pump failed");
                    METRICS.broker_errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use mapper_broker::memory::InMemoryBroker;
    use mapper_protocol::{AgentId, Codec, JsonCodec, ServiceRoute};
    use tokio::sync::oneshot;

    use super::*;
    use crate::facade::RequestOpts;

    fn new_mapper() -> Mapper<InMemoryBroker, JsonCodec> {
        Mapper::new(
            AgentId::from("mapper-test"),
            Arc::new(InMemoryBroker::new()),
            JsonCodec,
            15.0,
            false,
        )
    }

    #[tokio::test]
    async fn reply_delivered_to_inbox_completes_the_job() {
        let mut mapper = new_mapper();
        mapper.declare_topology().await.unwrap();
        mapper.broker().declare_queue("A", false, true).await.unwrap();
        let mut services = HashSet::new();
        services.insert(ServiceRoute::from("hash"));
        mapper.observe_register(AgentId::from("A"), services, 0.1);

        let handle = match mapper
            .request("hash", b"abc".to_vec(), RequestOpts::default())
            .await
            .unwrap()
        {
            crate::facade::Dispatch::Job(handle) => handle,
            _ => panic!("expected a job, got a different dispatch outcome"),
        };

        let mapper = Arc::new(Mutex::new(mapper));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let run_handle = tokio::spawn(run(
            Arc::clone(&mapper),
            Duration::from_secs(15),
            Duration::from_secs(10),
            shutdown_rx,
        ));

        // Simulate agent A's reply landing on the mapper's private inbox.
        {
            let guard = mapper.lock().await;
            let codec = JsonCodec;
            let reply = mapper_protocol::Envelope {
                kind: ServiceRoute::from("hash"),
                payload: b"3".to_vec(),
                from: AgentId::from("A"),
                token: handle.token.clone(),
                reply_to: None,
                selector: mapper_protocol::Selector::LeastLoaded,
                target: None,
                persistent: false,
                offline_failsafe: false,
            };
            let bytes = codec.encode(&reply).unwrap();
            guard
                .broker()
                .publish("", "mapper-test", bytes, false)
                .await
                .unwrap();
        }

        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome.results.get(&AgentId::from("A")).unwrap(), b"3");

        let _ = shutdown_tx.send(());
        let _ = run_handle.await;
    }
}
