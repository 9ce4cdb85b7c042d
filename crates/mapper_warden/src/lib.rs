//! In-flight request/reply correlation (spec.md §3, §4.2).
//!
//! The design note in spec.md §9 calls for a future-like completion handle
//! rather than the source's registered-closure style, so `new_job` hands
//! back a [`JobHandle`] wrapping a oneshot receiver instead of taking a
//! callback. The offline redeliverer (spec.md §4.4) allocates a job with
//! "no completion callback" simply by dropping the handle it gets back —
//! the warden's send on completion then fails silently, which is exactly
//! the discard semantics spec.md asks for.

use std::collections::{HashMap, HashSet};

use mapper_protocol::{AgentId, Token};
use thiserror::Error;
use tokio::sync::oneshot;

pub type Timestamp = f64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WardenError {
    #[error("token {0} is already registered")]
    DuplicateToken(String),
}

/// What happened to a reply passed to [`JobWarden::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Result recorded; the job is still awaiting other targets.
    Pending,
    /// Result recorded and the job's completion callback fired.
    Completed,
    /// No job was registered for this token; the reply was dropped.
    UnknownToken,
}

/// Final state handed to whoever is holding the [`JobHandle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub results: HashMap<AgentId, Vec<u8>>,
    pub cancelled: bool,
}

/// Await-able completion handle returned by [`JobWarden::new_job`].
pub struct JobHandle {
    pub token: Token,
    rx: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    /// Resolves when the job completes or is cancelled. Resolves to
    /// `None` only if the warden itself is dropped before completion.
    pub async fn wait(self) -> Option<JobOutcome> {
        self.rx.await.ok()
    }
}

struct JobRecord {
    targets: HashSet<AgentId>,
    pending: HashSet<AgentId>,
    results: HashMap<AgentId, Vec<u8>>,
    completion: oneshot::Sender<JobOutcome>,
    created_at: Timestamp,
}

/// Owns the job table keyed by correlation token. Every method here is
/// synchronous and non-yielding, as required by spec.md §5.
#[derive(Default)]
pub struct JobWarden {
    jobs: HashMap<Token, JobRecord>,
}

impl JobWarden {
    pub fn new() -> Self {
        Self { jobs: HashMap::new() }
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Registers a job under `token`, capturing the target set. Fails with
    /// `DuplicateToken` if the token is already tracked.
    pub fn new_job(
        &mut self,
        token: Token,
        targets: Vec<AgentId>,
        now: Timestamp,
    ) -> Result<JobHandle, WardenError> {
        if self.jobs.contains_key(&token) {
            return Err(WardenError::DuplicateToken(token.as_str().to_string()));
        }
        let (tx, rx) = oneshot::channel();
        let record = JobRecord {
            targets: targets.iter().cloned().collect(),
            pending: targets.into_iter().collect(),
            results: HashMap::new(),
            completion: tx,
            created_at: now,
        };
        self.jobs.insert(token.clone(), record);
        Ok(JobHandle { token, rx })
    }

    /// Records a reply. Unknown tokens are dropped at `debug` (spec.md §7).
    /// A duplicate reply from an identity already recorded overwrites its
    /// result without double-counting against `pending`.
    pub fn process(&mut self, token: &Token, from: AgentId, payload: Vec<u8>) -> ProcessOutcome {
        let Some(record) = self.jobs.get_mut(token) else {
            tracing::debug!(token = token.as_str(), "reply for unknown token dropped");
            return ProcessOutcome::UnknownToken;
        };

        record.results.insert(from.clone(), payload);
        record.pending.remove(&from);

        if record.pending.is_empty() {
            let record = self.jobs.remove(token).expect("just matched");
            let outcome = JobOutcome {
                results: record.results,
                cancelled: false,
            };
            let _ = record.completion.send(outcome);
            ProcessOutcome::Completed
        } else {
            ProcessOutcome::Pending
        }
    }

    /// Transitions the job to `cancelled`, delivering whatever partial
    /// results exist. No-op if the token is unknown (already completed or
    /// never registered). Returns whether a job was actually cancelled.
    pub fn cancel(&mut self, token: &Token) -> bool {
        let Some(record) = self.jobs.remove(token) else {
            return false;
        };
        let outcome = JobOutcome {
            results: record.results,
            cancelled: true,
        };
        let _ = record.completion.send(outcome);
        true
    }

    /// Cancels every job older than `deadline` seconds, for implementations
    /// that opt into a job-expiry sweep (spec.md §4.2, optional). Returns
    /// the tokens that were expired.
    pub fn expire(&mut self, now: Timestamp, deadline: Timestamp) -> Vec<Token> {
        let stale: Vec<Token> = self
            .jobs
            .iter()
            .filter(|(_, record)| now - record.created_at > deadline)
            .map(|(token, _)| token.clone())
            .collect();
        for token in &stale {
            self.cancel(token);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(name: &str) -> AgentId {
        AgentId::from(name)
    }

    #[tokio::test]
    async fn single_target_job_completes_on_one_reply() {
        let mut warden = JobWarden::new();
        let token = Token::new();
        let handle = warden.new_job(token.clone(), vec![agent("A")], 0.0).unwrap();

        warden.process(&token, agent("A"), b"3".to_vec());

        let outcome = handle.wait().await.unwrap();
        assert!(!outcome.cancelled);
        assert_eq!(outcome.results.get(&agent("A")).unwrap(), b"3");
    }

    #[tokio::test]
    async fn job_completes_only_after_every_target_replies() {
        let mut warden = JobWarden::new();
        let token = Token::new();
        let handle = warden
            .new_job(token.clone(), vec![agent("A"), agent("B")], 0.0)
            .unwrap();

        warden.process(&token, agent("A"), b"1".to_vec());
        assert_eq!(warden.job_count(), 1);

        warden.process(&token, agent("B"), b"2".to_vec());
        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(warden.job_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_reply_overwrites_without_double_counting() {
        let mut warden = JobWarden::new();
        let token = Token::new();
        let handle = warden
            .new_job(token.clone(), vec![agent("A"), agent("B")], 0.0)
            .unwrap();

        warden.process(&token, agent("A"), b"first".to_vec());
        warden.process(&token, agent("A"), b"second".to_vec());
        assert_eq!(warden.job_count(), 1);

        warden.process(&token, agent("B"), b"done".to_vec());
        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome.results.get(&agent("A")).unwrap(), b"second");
    }

    #[test]
    fn duplicate_token_registration_is_rejected() {
        let mut warden = JobWarden::new();
        let token = Token::new();
        warden.new_job(token.clone(), vec![agent("A")], 0.0).unwrap();
        let err = warden.new_job(token, vec![agent("B")], 0.0).unwrap_err();
        assert!(matches!(err, WardenError::DuplicateToken(_)));
    }

    #[tokio::test]
    async fn cancel_delivers_partial_results() {
        let mut warden = JobWarden::new();
        let token = Token::new();
        let handle = warden
            .new_job(token.clone(), vec![agent("A"), agent("B")], 0.0)
            .unwrap();
        warden.process(&token, agent("A"), b"only-a".to_vec());

        assert!(warden.cancel(&token));
        let outcome = handle.wait().await.unwrap();
        assert!(outcome.cancelled);
        assert_eq!(outcome.results.len(), 1);
    }

    #[test]
    fn unknown_token_reply_leaves_warden_unchanged() {
        let mut warden = JobWarden::new();
        warden.process(&Token::new(), agent("nobody"), b"x".to_vec());
        assert_eq!(warden.job_count(), 0);
    }

    #[test]
    fn cancel_of_unknown_token_is_a_harmless_no_op() {
        let mut warden = JobWarden::new();
        assert!(!warden.cancel(&Token::new()));
    }

    #[tokio::test]
    async fn dropped_handle_swallows_completion_without_panicking() {
        let mut warden = JobWarden::new();
        let token = Token::new();
        let handle = warden.new_job(token.clone(), vec![agent("A")], 0.0).unwrap();
        drop(handle);
        warden.process(&token, agent("A"), b"x".to_vec());
        assert_eq!(warden.job_count(), 0);
    }

    #[test]
    fn expire_cancels_jobs_older_than_deadline() {
        let mut warden = JobWarden::new();
        let token = Token::new();
        let _handle = warden.new_job(token.clone(), vec![agent("A")], 0.0).unwrap();
        let expired = warden.expire(100.0, 15.0);
        assert_eq!(expired, vec![token]);
        assert_eq!(warden.job_count(), 0);
    }
}
