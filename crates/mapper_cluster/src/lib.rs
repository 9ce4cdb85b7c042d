//! Agent directory, heartbeat reaping, and target selection (spec.md §3, §4.1).
//!
//! The registry is a single logical mutator: every public method takes
//! `&mut self` and none of them yield, so the mapper's event loop can call
//! straight into it from a broker callback without any locking (spec.md §5).

use std::collections::{HashMap, HashSet};

use mapper_protocol::{AgentId, Envelope, Selector, ServiceRoute};
use rand::Rng;
use thiserror::Error;

/// Seconds-since-epoch, matching the granularity agents report heartbeats at.
pub type Timestamp = f64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("agent {0} is not registered")]
    UnknownAgent(String),
}

#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub identity: AgentId,
    pub services: HashSet<ServiceRoute>,
    pub status: f64,
    pub last_seen: Timestamp,
}

/// Agent directory, service index, and round-robin cursors.
///
/// Invariant (spec.md §8.1): for every agent `i` and service `s` in
/// `agents[i].services`, `i` is present in `service_index[s]`, and
/// conversely. This struct never lets the two structures diverge; every
/// mutation updates both under one call.
#[derive(Default)]
pub struct ClusterRegistry {
    agents: HashMap<AgentId, AgentRecord>,
    service_index: HashMap<ServiceRoute, HashSet<AgentId>>,
    round_robin_cursor: HashMap<ServiceRoute, usize>,
    agent_timeout: f64,
}

impl ClusterRegistry {
    pub fn new(agent_timeout: f64) -> Self {
        Self {
            agents: HashMap::new(),
            service_index: HashMap::new(),
            round_robin_cursor: HashMap::new(),
            agent_timeout,
        }
    }

    /// Number of live agents, for metrics/diagnostics.
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn is_live(&self, identity: &AgentId) -> bool {
        self.agents.contains_key(identity)
    }

    fn unindex(&mut self, identity: &AgentId, services: &HashSet<ServiceRoute>) {
        for service in services {
            if let Some(set) = self.service_index.get_mut(service) {
                set.remove(identity);
                if set.is_empty() {
                    self.service_index.remove(service);
                }
            }
        }
    }

    fn index(&mut self, identity: &AgentId, services: &HashSet<ServiceRoute>) {
        for service in services {
            self.service_index
                .entry(service.clone())
                .or_default()
                .insert(identity.clone());
        }
    }

    /// Creates or replaces the agent record. Idempotent: re-registering an
    /// already-live agent with a new service set removes stale index
    /// entries from the old set before indexing the new one.
    pub fn observe_register(
        &mut self,
        identity: AgentId,
        services: HashSet<ServiceRoute>,
        status: f64,
        now: Timestamp,
    ) {
        if let Some(existing) = self.agents.get(&identity) {
            let stale = existing.services.clone();
            self.unindex(&identity, &stale);
        }
        self.index(&identity, &services);
        self.agents.insert(
            identity.clone(),
            AgentRecord {
                identity,
                services,
                status,
                last_seen: now,
            },
        );
    }

    /// Updates `status` and `last_seen`. Unknown identities are ignored
    /// (spec.md §9 open question: agents must register before heartbeating).
    pub fn observe_heartbeat(&mut self, identity: &AgentId, status: f64, now: Timestamp) {
        match self.agents.get_mut(identity) {
            Some(record) => {
                record.status = status;
                record.last_seen = now;
            }
            None => {
                tracing::debug!(%identity, "heartbeat for unknown agent dropped");
            }
        }
    }

    pub fn observe_unregister(&mut self, identity: &AgentId) {
        if let Some(record) = self.agents.remove(identity) {
            self.unindex(identity, &record.services);
        }
    }

    /// Evicts every agent whose `last_seen` predates `now - agent_timeout`.
    pub fn reap(&mut self, now: Timestamp) -> Vec<AgentId> {
        let cutoff = now - self.agent_timeout;
        let stale: Vec<AgentId> = self
            .agents
            .values()
            .filter(|r| r.last_seen < cutoff)
            .map(|r| r.identity.clone())
            .collect();
        for identity in &stale {
            self.observe_unregister(identity);
        }
        stale
    }

    /// Identities advertising `service`, in deterministic (sorted) order.
    fn sorted_candidates(&self, service: &ServiceRoute) -> Vec<AgentId> {
        let mut candidates: Vec<AgentId> = self
            .service_index
            .get(service)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        candidates.sort();
        candidates
    }

    /// Core selection algorithm (spec.md §4.1).
    pub fn targets_for(&mut self, envelope: &Envelope) -> Vec<AgentId> {
        if let Some(target) = &envelope.target {
            return match self.agents.get(target) {
                Some(record) if record.services.contains(&envelope.kind) => vec![target.clone()],
                _ => Vec::new(),
            };
        }

        let candidates = self.sorted_candidates(&envelope.kind);
        if candidates.is_empty() {
            return Vec::new();
        }

        match envelope.selector {
            Selector::All => candidates,
            Selector::Random => {
                let idx = rand::thread_rng().gen_range(0..candidates.len());
                vec![candidates[idx].clone()]
            }
            Selector::LeastLoaded => self.least_loaded(&candidates),
            Selector::RoundRobin => self.round_robin(&envelope.kind, &candidates),
        }
    }

    fn least_loaded(&self, candidates: &[AgentId]) -> Vec<AgentId> {
        let mut best: Option<&AgentId> = None;
        let mut best_status = f64::INFINITY;
        for identity in candidates {
            let status = self.agents.get(identity).map(|r| r.status).unwrap_or(f64::INFINITY);
            let better = match best {
                None => true,
                Some(current_best) => {
                    status < best_status || (status == best_status && identity < current_best)
                }
            };
            if better {
                best = Some(identity);
                best_status = status;
            }
        }
        best.cloned().into_iter().collect()
    }

    fn round_robin(&mut self, service: &ServiceRoute, candidates: &[AgentId]) -> Vec<AgentId> {
        let cursor = self.round_robin_cursor.entry(service.clone()).or_insert(0);
        if *cursor >= candidates.len() {
            *cursor = 0;
        }
        let chosen = candidates[*cursor].clone();
        *cursor = (*cursor + 1) % candidates.len();
        vec![chosen]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapper_protocol::Token;
    use std::collections::HashSet;

    fn services(names: &[&str]) -> HashSet<ServiceRoute> {
        names.iter().map(|n| ServiceRoute::from(*n)).collect()
    }

    fn envelope(kind: &str, selector: Selector, target: Option<&str>) -> Envelope {
        Envelope {
            kind: ServiceRoute::from(kind),
            payload: Vec::new(),
            from: AgentId::from("mapper-test"),
            token: Token::new(),
            reply_to: None,
            selector,
            target: target.map(AgentId::from),
            persistent: false,
            offline_failsafe: false,
        }
    }

    #[test]
    fn register_then_heartbeat_updates_status_and_last_seen() {
        let mut reg = ClusterRegistry::new(15.0);
        reg.observe_register(AgentId::from("A"), services(&["hash"]), 0.5, 0.0);
        reg.observe_heartbeat(&AgentId::from("A"), 0.1, 5.0);
        assert!(reg.is_live(&AgentId::from("A")));
    }

    #[test]
    fn heartbeat_for_unknown_agent_is_ignored() {
        let mut reg = ClusterRegistry::new(15.0);
        reg.observe_heartbeat(&AgentId::from("ghost"), 0.1, 5.0);
        assert!(!reg.is_live(&AgentId::from("ghost")));
    }

    #[test]
    fn reregister_moves_service_index_entries() {
        let mut reg = ClusterRegistry::new(15.0);
        reg.observe_register(AgentId::from("A"), services(&["hash"]), 0.1, 0.0);
        reg.observe_register(AgentId::from("A"), services(&["encode"]), 0.1, 1.0);

        let env = envelope("hash", Selector::All, None);
        assert_eq!(reg.targets_for(&env), Vec::<AgentId>::new());
    }

    #[test]
    fn least_loaded_breaks_ties_lexicographically() {
        let mut reg = ClusterRegistry::new(15.0);
        reg.observe_register(AgentId::from("B"), services(&["s"]), 0.5, 0.0);
        reg.observe_register(AgentId::from("A"), services(&["s"]), 0.5, 0.0);
        let env = envelope("s", Selector::LeastLoaded, None);
        assert_eq!(reg.targets_for(&env), vec![AgentId::from("A")]);
    }

    #[test]
    fn round_robin_cycles_fairly_across_n_agents() {
        let mut reg = ClusterRegistry::new(15.0);
        reg.observe_register(AgentId::from("A"), services(&["s"]), 0.1, 0.0);
        reg.observe_register(AgentId::from("B"), services(&["s"]), 0.1, 0.0);
        reg.observe_register(AgentId::from("C"), services(&["s"]), 0.1, 0.0);

        let env = envelope("s", Selector::RoundRobin, None);
        let picks: Vec<AgentId> = (0..4).map(|_| reg.targets_for(&env)[0].clone()).collect();
        assert_eq!(
            picks,
            vec![
                AgentId::from("A"),
                AgentId::from("B"),
                AgentId::from("C"),
                AgentId::from("A"),
            ]
        );
    }

    #[test]
    fn round_robin_cursor_resets_when_candidates_shrink() {
        let mut reg = ClusterRegistry::new(15.0);
        reg.observe_register(AgentId::from("A"), services(&["s"]), 0.1, 0.0);
        reg.observe_register(AgentId::from("B"), services(&["s"]), 0.1, 0.0);
        let env = envelope("s", Selector::RoundRobin, None);
        let _ = reg.targets_for(&env); // cursor -> 1
        reg.observe_unregister(&AgentId::from("B"));
        // Only "A" remains; cursor (1) is out of range and must reset to 0.
        assert_eq!(reg.targets_for(&env), vec![AgentId::from("A")]);
    }

    #[test]
    fn explicit_target_without_matching_service_returns_empty() {
        let mut reg = ClusterRegistry::new(15.0);
        reg.observe_register(AgentId::from("A"), services(&["hash"]), 0.1, 0.0);
        let env = envelope("encode", Selector::LeastLoaded, Some("A"));
        assert_eq!(reg.targets_for(&env), Vec::<AgentId>::new());
    }

    #[test]
    fn explicit_target_on_dead_agent_returns_empty() {
        let mut reg = ClusterRegistry::new(15.0);
        let env = envelope("hash", Selector::LeastLoaded, Some("ghost"));
        assert_eq!(reg.targets_for(&env), Vec::<AgentId>::new());
    }

    #[test]
    fn reap_evicts_agents_past_timeout_and_clears_index() {
        let mut reg = ClusterRegistry::new(15.0);
        reg.observe_register(AgentId::from("A"), services(&["s"]), 0.1, 0.0);
        let evicted = reg.reap(20.0);
        assert_eq!(evicted, vec![AgentId::from("A")]);

        let env = envelope("s", Selector::All, None);
        assert_eq!(reg.targets_for(&env), Vec::<AgentId>::new());
    }

    #[test]
    fn all_selector_returns_every_candidate_sorted() {
        let mut reg = ClusterRegistry::new(15.0);
        reg.observe_register(AgentId::from("C"), services(&["s"]), 0.1, 0.0);
        reg.observe_register(AgentId::from("A"), services(&["s"]), 0.1, 0.0);
        reg.observe_register(AgentId::from("B"), services(&["s"]), 0.1, 0.0);
        let env = envelope("s", Selector::All, None);
        assert_eq!(
            reg.targets_for(&env),
            vec![AgentId::from("A"), AgentId::from("B"), AgentId::from("C")]
        );
    }
}
