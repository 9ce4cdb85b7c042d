//! In-process [`Broker`] fake used by every other crate's test suite.
//!
//! Mirrors just enough AMQP-like semantics for the mapper core to be
//! exercised deterministically: queues are declared before use, fanout
//! exchanges replicate a publish to every bound queue, and manual-ack
//! queues hold delivered-but-unacked messages until [`Broker::ack`] or
//! redeliver them on [`Broker::recover`] — the behavior spec.md §4.4
//! depends on for offline redelivery.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::{Broker, BrokerError, Delivery, DeliveryInfo, Subscription};

struct QueueState {
    durable: bool,
    /// Messages waiting for a subscriber, or waiting to be redelivered.
    backlog: VecDeque<Delivery>,
    /// Delivered to the current subscriber but not yet acked.
    unacked: HashMap<u64, Delivery>,
    subscriber: Option<mpsc::UnboundedSender<Delivery>>,
    manual_ack: bool,
}

impl QueueState {
    fn new(durable: bool) -> Self {
        Self {
            durable,
            backlog: VecDeque::new(),
            unacked: HashMap::new(),
            subscriber: None,
            manual_ack: false,
        }
    }

    fn deliver_backlog(&mut self, tag_source: &AtomicU64) {
        let Some(tx) = self.subscriber.clone() else {
            return;
        };
        while let Some(delivery) = self.backlog.pop_front() {
            let tag = tag_source.fetch_add(1, Ordering::SeqCst);
            let mut delivery = delivery;
            delivery.info.delivery_tag = tag;
            if self.manual_ack {
                self.unacked.insert(tag, delivery.clone());
            }
            if tx.send(delivery.clone()).is_err() {
                // Subscriber dropped mid-drain; undo the unacked bookkeeping
                // and put the message back on the backlog so a future
                // subscriber or recover() still sees it.
                if self.manual_ack {
                    self.unacked.remove(&tag);
                }
                self.backlog.push_front(delivery);
                self.subscriber = None;
                break;
            }
        }
    }
}

#[derive(Default)]
struct Inner {
    queues: HashMap<String, QueueState>,
    /// exchange name -> bound queue names.
    fanouts: HashMap<String, HashSet<String>>,
}

/// In-memory stand-in for a real broker, suitable for single-process tests.
pub struct InMemoryBroker {
    inner: Mutex<Inner>,
    next_tag: AtomicU64,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_tag: AtomicU64::new(1),
        }
    }

    /// Depth of a queue's backlog, for assertions in tests.
    pub async fn backlog_len(&self, queue: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.queues.get(queue).map(|q| q.backlog.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn declare_queue(&self, name: &str, durable: bool, _exclusive: bool) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().await;
        inner
            .queues
            .entry(name.to_string())
            .or_insert_with(|| QueueState::new(durable));
        Ok(())
    }

    async fn declare_fanout(&self, name: &str) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().await;
        inner.fanouts.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn bind(&self, queue: &str, exchange: &str) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().await;
        if !inner.queues.contains_key(queue) {
            return Err(BrokerError::Declare(format!("queue {queue} not declared")));
        }
        inner
            .fanouts
            .entry(exchange.to_string())
            .or_default()
            .insert(queue.to_string());
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        queue: &str,
        payload: Vec<u8>,
        _persistent: bool,
    ) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().await;

        let targets: Vec<String> = if exchange.is_empty() {
            vec![queue.to_string()]
        } else {
            inner
                .fanouts
                .get(exchange)
                .map(|bound| bound.iter().cloned().collect())
                .unwrap_or_default()
        };
        if targets.is_empty() {
            return Err(BrokerError::Publish(format!("no route for exchange '{exchange}'")));
        }

        for target in targets {
            let state = inner
                .queues
                .get_mut(&target)
                .ok_or_else(|| BrokerError::Publish(format!("queue {target} not declared")))?;
            state.backlog.push_back(Delivery {
                info: DeliveryInfo {
                    queue: target.clone(),
                    delivery_tag: 0,
                },
                payload: payload.clone(),
            });
            state.deliver_backlog(&self.next_tag);
        }
        Ok(())
    }

    async fn subscribe(&self, queue: &str, manual_ack: bool) -> Result<Subscription, BrokerError> {
        let mut inner = self.inner.lock().await;
        let state = inner
            .queues
            .entry(queue.to_string())
            .or_insert_with(|| QueueState::new(false));
        let (tx, rx) = mpsc::unbounded_channel();
        state.subscriber = Some(tx);
        state.manual_ack = manual_ack;
        state.deliver_backlog(&self.next_tag);
        Ok(Subscription { rx })
    }

    async fn ack(&self, info: &DeliveryInfo) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().await;
        let state = inner
            .queues
            .get_mut(&info.queue)
            .ok_or_else(|| BrokerError::Ack(format!("queue {} not declared", info.queue)))?;
        state.unacked.remove(&info.delivery_tag);
        Ok(())
    }

    async fn recover(&self, queue: &str) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().await;
        let state = inner
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::Recover(format!("queue {queue} not declared")))?;
        let pending: Vec<Delivery> = state.unacked.drain().map(|(_, d)| d).collect();
        for delivery in pending {
            state.backlog.push_front(delivery);
        }
        state.deliver_backlog(&self.next_tag);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_before_subscribe_is_buffered() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("agent-1", false, true).await.unwrap();
        broker
            .publish("", "agent-1", b"hello".to_vec(), false)
            .await
            .unwrap();
        assert_eq!(broker.backlog_len("agent-1").await, 1);

        let mut sub = broker.subscribe("agent-1", false).await.unwrap();
        let delivery = sub.rx.recv().await.unwrap();
        assert_eq!(delivery.payload, b"hello");
    }

    #[tokio::test]
    async fn fanout_replicates_to_every_bound_queue() {
        let broker = InMemoryBroker::new();
        broker.declare_fanout("mapper-inbox").await.unwrap();
        broker.declare_queue("q1", false, true).await.unwrap();
        broker.declare_queue("q2", false, true).await.unwrap();
        broker.bind("q1", "mapper-inbox").await.unwrap();
        broker.bind("q2", "mapper-inbox").await.unwrap();

        let mut sub1 = broker.subscribe("q1", false).await.unwrap();
        let mut sub2 = broker.subscribe("q2", false).await.unwrap();
        broker
            .publish("mapper-inbox", "", b"heartbeat".to_vec(), false)
            .await
            .unwrap();

        assert_eq!(sub1.rx.recv().await.unwrap().payload, b"heartbeat");
        assert_eq!(sub2.rx.recv().await.unwrap().payload, b"heartbeat");
    }

    #[tokio::test]
    async fn unacked_message_is_redelivered_on_recover() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("mapper-offline", true, false).await.unwrap();
        broker
            .publish("", "mapper-offline", b"payload".to_vec(), true)
            .await
            .unwrap();

        let mut sub = broker.subscribe("mapper-offline", true).await.unwrap();
        let delivery = sub.rx.recv().await.unwrap();
        drop(sub);

        // Never acked — recover() should hand it back out.
        broker.recover("mapper-offline").await.unwrap();
        let mut sub = broker.subscribe("mapper-offline", true).await.unwrap();
        let redelivered = sub.rx.recv().await.unwrap();
        assert_eq!(redelivered.payload, delivery.payload);
    }

    #[tokio::test]
    async fn acked_message_is_not_redelivered() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("mapper-offline", true, false).await.unwrap();
        broker
            .publish("", "mapper-offline", b"payload".to_vec(), true)
            .await
            .unwrap();

        let mut sub = broker.subscribe("mapper-offline", true).await.unwrap();
        let delivery = sub.rx.recv().await.unwrap();
        broker.ack(&delivery.info).await.unwrap();
        broker.recover("mapper-offline").await.unwrap();

        assert_eq!(broker.backlog_len("mapper-offline").await, 0);
    }

    #[tokio::test]
    async fn publish_to_undeclared_exchange_errors() {
        let broker = InMemoryBroker::new();
        let err = broker
            .publish("missing-exchange", "", b"x".to_vec(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Publish(_)));
    }
}
