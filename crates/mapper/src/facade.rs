//! Request construction, route-to-publish glue, and offline-failsafe
//! policy (spec.md §4.3).

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use mapper_broker::Broker;
use mapper_cluster::ClusterRegistry;
use mapper_protocol::{defaults, AgentId, Codec, Envelope, Selector, ServiceRoute, Token};
use mapper_warden::{JobHandle, JobWarden, ProcessOutcome};
use tokio::sync::Mutex;

use crate::metrics::METRICS;

/// Wall-clock seconds, the timebase `ClusterRegistry`/`JobWarden` expect.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs_f64()
}

/// Per-request overrides of the mapper's defaults.
#[derive(Debug, Clone, Default)]
pub struct RequestOpts {
    pub selector: Selector,
    pub target: Option<AgentId>,
    pub persistent: Option<bool>,
    pub offline_failsafe: bool,
}

/// Result of [`Mapper::request`] (spec.md §4.3).
pub enum Dispatch {
    /// At least one live target was found; `job` resolves on completion.
    Job(JobHandle),
    /// No live target existed; the request was parked on `mapper-offline`.
    Offline,
    /// No live target existed and offline-failsafe was not requested; the
    /// request was dropped and no reply will ever arrive.
    Nothing,
}

/// Control node tying the cluster registry, job warden, broker, and codec
/// together. Owns no transport state of its own beyond what those three
/// collaborators hold.
///
/// `request`/`push` are `&mut self` because target selection and warden
/// bookkeeping must not interleave with anything else touching the same
/// state (spec.md §5) — callers that need to invoke the façade from
/// multiple tasks should funnel calls through a single owning task (for
/// example an mpsc command channel feeding the same loop that drives
/// `Mapper::run`). A completion callback firing from inside `run` may
/// itself call `request`/`push` directly; that reentrancy is safe because
/// it happens on the same call stack, not a concurrent one.
pub struct Mapper<B: Broker, C: Codec> {
    identity: AgentId,
    broker: Arc<B>,
    codec: C,
    pub cluster: ClusterRegistry,
    pub warden: JobWarden,
    default_persistent: bool,
}

impl<B: Broker, C: Codec> Mapper<B, C> {
    pub fn new(identity: AgentId, broker: Arc<B>, codec: C, agent_timeout: f64, default_persistent: bool) -> Self {
        Self {
            identity,
            broker,
            codec,
            cluster: ClusterRegistry::new(agent_timeout),
            warden: JobWarden::new(),
            default_persistent,
        }
    }

    pub fn identity(&self) -> &AgentId {
        &self.identity
    }

    /// Declares the mapper's private inbox (exclusive queue bound to a
    /// same-named fanout exchange) and the durable offline queue. Call
    /// once before `run`.
    pub async fn declare_topology(&self) -> Result<(), mapper_broker::BrokerError> {
        let inbox = self.identity.as_str();
        self.broker.declare_fanout(inbox).await?;
        self.broker.declare_queue(inbox, false, true).await?;
        self.broker.bind(inbox, inbox).await?;
        self.broker
            .declare_queue(defaults::OFFLINE_QUEUE_NAME, true, false)
            .await?;
        Ok(())
    }

    fn build_envelope(&self, kind: ServiceRoute, payload: Vec<u8>, opts: &RequestOpts, reply: bool) -> Envelope {
        Envelope {
            kind,
            payload,
            from: self.identity.clone(),
            token: Token::new(),
            reply_to: if reply { Some(self.identity.clone()) } else { None },
            selector: opts.selector,
            target: opts.target.clone(),
            persistent: opts.persistent.unwrap_or(self.default_persistent),
            offline_failsafe: opts.offline_failsafe,
        }
    }

    pub(crate) async fn publish_to_targets(&self, envelope: &Envelope, targets: &[AgentId]) -> Result<(), mapper_broker::BrokerError> {
        let bytes = self
            .codec
            .encode(envelope)
            .map_err(|e| mapper_broker::BrokerError::Publish(e.to_string()))?;
        for target in targets {
            if let Err(err) = self
                .broker
                .publish("", target.as_str(), bytes.clone(), envelope.persistent)
                .await
            {
                METRICS.broker_errors.fetch_add(1, Ordering::Relaxed);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Builds and dispatches a request-with-reply (spec.md §4.3).
    pub async fn request(
        &mut self,
        kind: impl Into<ServiceRoute>,
        payload: Vec<u8>,
        opts: RequestOpts,
    ) -> Result<Dispatch, mapper_broker::BrokerError> {
        let envelope = self.build_envelope(kind.into(), payload, &opts, true);
        let targets = self.cluster.targets_for(&envelope);

        if !targets.is_empty() {
            self.publish_to_targets(&envelope, &targets).await?;
            let handle = self
                .warden
                .new_job(envelope.token.clone(), targets, now_secs())
                .expect("fresh uuid token cannot collide");
            METRICS.jobs_created.fetch_add(1, Ordering::Relaxed);
            return Ok(Dispatch::Job(handle));
        }

        METRICS.requests_no_targets.fetch_add(1, Ordering::Relaxed);
        if opts.offline_failsafe {
            let bytes = self
                .codec
                .encode(&envelope)
                .map_err(|e| mapper_broker::BrokerError::Publish(e.to_string()))?;
            self.broker
                .publish("", defaults::OFFLINE_QUEUE_NAME, bytes, true)
                .await?;
            METRICS.requests_offline_parked.fetch_add(1, Ordering::Relaxed);
            Ok(Dispatch::Offline)
        } else {
            Ok(Dispatch::Nothing)
        }
    }

    /// Builds and dispatches a fire-and-forget push (spec.md §4.3). Always
    /// returns `true`, even when the target set is empty.
    pub async fn push(
        &mut self,
        kind: impl Into<ServiceRoute>,
        payload: Vec<u8>,
        opts: RequestOpts,
    ) -> Result<bool, mapper_broker::BrokerError> {
        let envelope = self.build_envelope(kind.into(), payload, &opts, false);
        let targets = self.cluster.targets_for(&envelope);
        if !targets.is_empty() {
            self.publish_to_targets(&envelope, &targets).await?;
        }
        Ok(true)
    }

    /// Decodes and routes an inbound reply delivered to the private inbox
    /// (spec.md §4.2). Malformed payloads are logged and dropped.
    pub fn handle_reply(&mut self, payload: &[u8]) {
        match self.codec.decode(payload) {
            Ok(envelope) => {
                match self.warden.process(&envelope.token, envelope.from, envelope.payload) {
                    ProcessOutcome::Completed => {
                        METRICS.jobs_completed.fetch_add(1, Ordering::Relaxed);
                    }
                    ProcessOutcome::UnknownToken => {
                        METRICS.replies_dropped_unknown_token.fetch_add(1, Ordering::Relaxed);
                    }
                    ProcessOutcome::Pending => {}
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed reply envelope");
                METRICS.malformed_envelopes.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Cancels an in-flight job, delivering whatever partial results exist
    /// to the job handle (spec.md §4.2). Returns whether a job was
    /// actually cancelled; a no-op for a token that never existed or has
    /// already completed.
    pub fn cancel(&mut self, token: &Token) -> bool {
        let cancelled = self.warden.cancel(token);
        if cancelled {
            METRICS.jobs_cancelled.fetch_add(1, Ordering::Relaxed);
        }
        cancelled
    }

    /// Runs the heartbeat reaper for one tick (spec.md §4.1/§4.5).
    pub fn reap(&mut self, now: f64) {
        let evicted = self.cluster.reap(now);
        if !evicted.is_empty() {
            METRICS.agents_reaped.fetch_add(evicted.len() as u64, Ordering::Relaxed);
            tracing::info!(count = evicted.len(), "reaped stale agents");
        }
    }

    pub fn observe_register(&mut self, identity: AgentId, services: std::collections::HashSet<ServiceRoute>, status: f64) {
        self.cluster.observe_register(identity, services, status, now_secs());
        METRICS.agents_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_heartbeat(&mut self, identity: &AgentId, status: f64) {
        self.cluster.observe_heartbeat(identity, status, now_secs());
    }

    pub fn observe_unregister(&mut self, identity: &AgentId) {
        self.cluster.observe_unregister(identity);
    }

    pub(crate) fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    pub(crate) fn codec(&self) -> &C {
        &self.codec
    }
}

/// Thin `Mutex` wrapper letting the offline redeliverer and the reply
/// loop share one `Mapper` without violating `&mut self`'s non-yielding
/// requirement — the lock is only ever held across synchronous sections.
pub type SharedMapper<B, C> = Arc<Mutex<Mapper<B, C>>>;
