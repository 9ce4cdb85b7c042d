//! Offline redeliverer (spec.md §4.4).
//!
//! A message parked on `mapper-offline` is redelivered to this handler
//! whenever [`run::run`]'s subscriber wakes or a `recover` sweep re-offers
//! it. A delivery that now resolves to at least one target is acked and
//! redispatched; one that still resolves to nothing is left unacked so the
//! next `recover` tick hands it back out. There is no completion callback
//! for a redelivered job — the original caller that would have held the
//! job handle is long gone — so the handle [`mapper_warden::JobWarden::new_job`]
//! returns is simply dropped; its `oneshot` send then fails silently,
//! which is exactly the discard semantics spec.md asks for.

use std::sync::atomic::Ordering;

use mapper_broker::{Broker, BrokerError, Delivery};
use mapper_protocol::Codec;

use crate::facade::{now_secs, Mapper};
use crate::metrics::METRICS;

impl<B: Broker, C: Codec> Mapper<B, C> {
    /// Processes one delivery from `mapper-offline`.
    ///
    /// Returns `true` if the caller should ack the delivery (it was
    /// dispatched, or it was malformed and acking avoids a poison-pill
    /// redelivery loop), `false` if the delivery must stay unacked for a
    /// future recovery sweep.
    pub async fn handle_offline_delivery(&mut self, delivery: &Delivery) -> Result<bool, BrokerError> {
        let mut envelope = match self.codec().decode(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed offline envelope");
                METRICS.malformed_envelopes.fetch_add(1, Ordering::Relaxed);
                return Ok(true);
            }
        };

        // A different mapper instance than the one that originally parked
        // this message may be the one draining the queue.
        envelope.reply_to = Some(self.identity().clone());

        let targets = self.cluster.targets_for(&envelope);
        if targets.is_empty() {
            return Ok(false);
        }

        self.publish_to_targets(&envelope, &targets).await?;
        if let Err(err) = self.warden.new_job(envelope.token.clone(), targets, now_secs()) {
            tracing::error!(error = %err, "offline redelivery produced a duplicate token");
        }
        METRICS.offline_redeliveries.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }
}
