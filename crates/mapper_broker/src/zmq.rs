//! ZeroMQ-backed [`Broker`] implementation (feature `zmq-broker`).
//!
//! A ROUTER socket owns the wire: agents connect with DEALER sockets and
//! their identity frame becomes the queue name, so `publish("", agent_id,
//! ..)` and `subscribe(agent_id, ..)` address a single connected peer with
//! no exchange indirection, mirroring the `[identity, header, payload]`
//! multipart framing the agent side already speaks.
//!
//! The mapper-inbox fanout (heartbeats, register/unregister) is carried
//! over the same ROUTER socket: `publish(exchange, "", ..)` replicates to
//! every queue currently bound to that exchange.
//!
//! Durability and manual-ack redelivery are approximated in-process with
//! the same backlog/unacked bookkeeping as [`crate::memory::InMemoryBroker`]
//! — a real deployment's durable queue lives on the broker side of the
//! wire, but this adaptor still has to hold a message until it is acked
//! so `recover()` has something to redeliver.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use mapper_protocol::header;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use zeromq::{RouterSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use crate::{Broker, BrokerError, Delivery, DeliveryInfo, Subscription};

struct QueueState {
    manual_ack: bool,
    unacked: HashMap<u64, Delivery>,
    subscriber: Option<mpsc::UnboundedSender<Delivery>>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            manual_ack: false,
            unacked: HashMap::new(),
            subscriber: None,
        }
    }
}

#[derive(Default)]
struct Inner {
    queues: HashMap<String, QueueState>,
    fanouts: HashMap<String, HashSet<String>>,
    /// Messages waiting for a queue's subscriber to attach.
    backlog: HashMap<String, VecDeque<Vec<u8>>>,
}

/// Broker adaptor speaking ROUTER/DEALER ZeroMQ framing directly.
///
/// Construction only binds the ROUTER socket; inbound frames are pumped
/// into per-queue channels by repeated calls to [`Broker::pump`] from the
/// event loop, not by a background task. Outbound publishes write
/// straight to the socket under a mutex (ZeroMQ sockets are not `Sync`).
pub struct ZmqBroker {
    router: Mutex<RouterSocket>,
    inner: Mutex<Inner>,
    next_tag: AtomicU64,
}

impl ZmqBroker {
    pub async fn bind(addr: &str) -> Result<Self, BrokerError> {
        let mut router = RouterSocket::new();
        router
            .bind(addr)
            .await
            .map_err(|e| BrokerError::Declare(format!("router bind {addr}: {e}")))?;
        Ok(Self {
            router: Mutex::new(router),
            inner: Mutex::new(Inner::default()),
            next_tag: AtomicU64::new(1),
        })
    }

    fn route_to_queue(&self, inner: &mut Inner, queue: &str, payload: Vec<u8>) {
        let state = inner.queues.entry(queue.to_string()).or_insert_with(QueueState::new);
        if let Some(tx) = &state.subscriber {
            let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
            let delivery = Delivery {
                info: DeliveryInfo {
                    queue: queue.to_string(),
                    delivery_tag: tag,
                },
                payload,
            };
            if state.manual_ack {
                state.unacked.insert(tag, delivery.clone());
            }
            if tx.send(delivery.clone()).is_err() {
                // Subscriber dropped mid-delivery; undo the unacked
                // bookkeeping and fall through to the backlog so a future
                // subscriber or recover() still sees the message.
                if state.manual_ack {
                    state.unacked.remove(&tag);
                }
                state.subscriber = None;
                inner
                    .backlog
                    .entry(queue.to_string())
                    .or_default()
                    .push_back(delivery.payload);
            }
        } else {
            inner
                .backlog
                .entry(queue.to_string())
                .or_default()
                .push_back(payload);
        }
    }
}

#[async_trait]
impl Broker for ZmqBroker {
    /// Awaits and routes one inbound multipart frame from the ROUTER
    /// socket. [`run::run`] in the `mapper` crate selects on this
    /// alongside reap/redelivery ticks and subscriber channels, so the
    /// ZeroMQ transport is drained on the same single-threaded event loop
    /// as the rest of the core rather than a dedicated reader task.
    async fn pump(&self) -> Result<(), BrokerError> {
        let multipart = {
            let mut router = self.router.lock().await;
            match router.recv().await {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(error = %e, "router recv failed");
                    return Err(BrokerError::Subscribe(e.to_string()));
                }
            }
        };

        let parts: Vec<Vec<u8>> = multipart.into_vec().into_iter().map(|b| b.to_vec()).collect();
        let Some(identity) = parts.first() else {
            return Ok(());
        };
        let queue = String::from_utf8_lossy(identity).into_owned();
        let framed = parts.into_iter().nth(1).unwrap_or_default();
        let payload = match header::unwrap(&framed) {
            Ok(payload) => payload.to_vec(),
            Err(err) => {
                warn!(%queue, error = %err, "dropping frame with invalid header");
                return Ok(());
            }
        };

        let mut inner = self.inner.lock().await;
        self.route_to_queue(&mut inner, &queue, payload);
        Ok(())
    }

    async fn declare_queue(&self, name: &str, _durable: bool, _exclusive: bool) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().await;
        inner.queues.entry(name.to_string()).or_insert_with(QueueState::new);
        Ok(())
    }

    async fn declare_fanout(&self, name: &str) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().await;
        inner.fanouts.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn bind(&self, queue: &str, exchange: &str) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().await;
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
        let targets: Vec<String> = if exchange.is_empty() {
            vec![queue.to_string()]
        } else {
            let inner = self.inner.lock().await;
            inner
                .fanouts
                .get(exchange)
                .map(|bound| bound.iter().cloned().collect())
                .unwrap_or_default()
        };
        if targets.is_empty() {
            return Err(BrokerError::Publish(format!("no route for exchange '{exchange}'")));
        }

        let framed = header::wrap(&payload);
        let mut router = self.router.lock().await;
        for target in targets {
            let mut multipart = ZmqMessage::from(target.clone().into_bytes());
            multipart.push_back(framed.clone().into());
            router
                .send(multipart)
                .await
                .map_err(|e| BrokerError::Publish(format!("{target}: {e}")))?;
            debug!(queue = %target, "published");
        }
        Ok(())
    }

    async fn subscribe(&self, queue: &str, manual_ack: bool) -> Result<Subscription, BrokerError> {
        let mut inner = self.inner.lock().await;
        let state = inner.queues.entry(queue.to_string()).or_insert_with(QueueState::new);
        let (tx, rx) = mpsc::unbounded_channel();
        state.manual_ack = manual_ack;

        if let Some(backlog) = inner.backlog.remove(queue) {
            for payload in backlog {
                let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
                let delivery = Delivery {
                    info: DeliveryInfo {
                        queue: queue.to_string(),
                        delivery_tag: tag,
                    },
                    payload,
                };
                if manual_ack {
                    inner
                        .queues
                        .get_mut(queue)
                        .expect("just inserted")
                        .unacked
                        .insert(tag, delivery.clone());
                }
                let _ = tx.send(delivery);
            }
        }
        inner.queues.get_mut(queue).expect("just inserted").subscriber = Some(tx);
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
        let pending: Vec<Delivery> = {
            let state = inner
                .queues
                .get_mut(queue)
                .ok_or_else(|| BrokerError::Recover(format!("queue {queue} not declared")))?;
            state.unacked.drain().map(|(_, d)| d).collect()
        };
        for delivery in pending {
            self.route_to_queue(&mut inner, queue, delivery.payload);
        }
        Ok(())
    }
}
