//! Job store abstraction and the in-memory reference store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use dynjob_core::JobId;
use dynjob_jobs::DynamicJobEnvelope;

use super::types::{ExecutionOutcome, JobState, StoredJob};

/// Durable queue of envelopes.
///
/// Stores must hand back the envelope JSON byte for byte; delivery guarantees
/// and retries are theirs to define.
pub trait JobStore: Send + Sync {
    /// Persist `envelope` on its effective queue.
    fn enqueue(&self, envelope: &DynamicJobEnvelope) -> Result<JobId, JobStoreError>;

    fn get(&self, job_id: JobId) -> Result<Option<StoredJob>, JobStoreError>;

    /// Claim the oldest enqueued job from the first of `queues` (priority
    /// order) that has one.
    fn claim_next(&self, queues: &[String]) -> Result<Option<StoredJob>, JobStoreError>;

    /// Record the outcome of an attempt on a claimed job.
    fn report(&self, job_id: JobId, outcome: &ExecutionOutcome) -> Result<(), JobStoreError>;

    fn stats(&self) -> Result<JobStats, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job {0} is not being processed")]
    NotProcessing(JobId),
    #[error("envelope serialization failed: {0}")]
    Serialization(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Counts per job state.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub enqueued: usize,
    pub processing: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// In-memory job store for tests/dev.
///
/// Claims are FIFO in enqueue order.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Slot>>,
    next_seq: AtomicU64,
}

#[derive(Debug)]
struct Slot {
    seq: u64,
    job: StoredJob,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// All jobs, oldest first.
    pub fn jobs(&self) -> Result<Vec<StoredJob>, JobStoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let mut slots: Vec<_> = jobs.values().collect();
        slots.sort_by_key(|slot| slot.seq);
        Ok(slots.into_iter().map(|slot| slot.job.clone()).collect())
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> JobStoreError {
    JobStoreError::Storage("job store lock poisoned".to_string())
}

impl JobStore for InMemoryJobStore {
    fn enqueue(&self, envelope: &DynamicJobEnvelope) -> Result<JobId, JobStoreError> {
        let payload = envelope
            .to_json()
            .map_err(|e| JobStoreError::Serialization(e.to_string()))?;
        let job = StoredJob::new(envelope, payload);
        let id = job.id;

        debug!(job_id = %id, queue = %job.queue, name = %job.display_name, "enqueued job");
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.jobs
            .write()
            .map_err(poisoned)?
            .insert(id, Slot { seq, job });
        Ok(id)
    }

    fn get(&self, job_id: JobId) -> Result<Option<StoredJob>, JobStoreError> {
        Ok(self
            .jobs
            .read()
            .map_err(poisoned)?
            .get(&job_id)
            .map(|slot| slot.job.clone()))
    }

    fn claim_next(&self, queues: &[String]) -> Result<Option<StoredJob>, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;

        // Queues are in priority order; FIFO within a queue.
        let next = queues.iter().find_map(|queue| {
            jobs.values()
                .filter(|slot| slot.job.state == JobState::Enqueued && slot.job.queue == *queue)
                .min_by_key(|slot| slot.seq)
                .map(|slot| slot.job.id)
        });

        Ok(next.and_then(|id| {
            jobs.get_mut(&id).map(|slot| {
                slot.job.mark_processing();
                slot.job.clone()
            })
        }))
    }

    fn report(&self, job_id: JobId, outcome: &ExecutionOutcome) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let job = &mut jobs
            .get_mut(&job_id)
            .ok_or(JobStoreError::NotFound(job_id))?
            .job;

        if job.state != JobState::Processing {
            return Err(JobStoreError::NotProcessing(job_id));
        }
        job.apply_outcome(outcome);
        Ok(())
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let mut stats = JobStats::default();

        for slot in jobs.values() {
            match &slot.job.state {
                JobState::Enqueued => stats.enqueued += 1,
                JobState::Processing => stats.processing += 1,
                JobState::Succeeded { .. } => stats.succeeded += 1,
                JobState::Failed { .. } => stats.failed += 1,
            }
        }

        Ok(stats)
    }
}

impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    fn enqueue(&self, envelope: &DynamicJobEnvelope) -> Result<JobId, JobStoreError> {
        (**self).enqueue(envelope)
    }

    fn get(&self, job_id: JobId) -> Result<Option<StoredJob>, JobStoreError> {
        (**self).get(job_id)
    }

    fn claim_next(&self, queues: &[String]) -> Result<Option<StoredJob>, JobStoreError> {
        (**self).claim_next(queues)
    }

    fn report(&self, job_id: JobId, outcome: &ExecutionOutcome) -> Result<(), JobStoreError> {
        (**self).report(job_id, outcome)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        (**self).stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynjob_jobs::{InvocationDescriptor, MethodCall, Policy};

    fn envelope(queue: &str, arg: &str) -> DynamicJobEnvelope {
        let call = MethodCall::new("Job", "Run").arg(arg);
        let descriptor = InvocationDescriptor::build(&call).unwrap();
        DynamicJobEnvelope::new(descriptor, vec![Policy::queue(queue)], None)
    }

    fn queues(names: &[&str]) -> Vec<String> {
        names.iter().map(|q| q.to_string()).collect()
    }

    #[test]
    fn enqueue_and_claim() {
        let store = InMemoryJobStore::new();
        let job_id = store.enqueue(&envelope("default", "x")).unwrap();

        let claimed = store.claim_next(&queues(&["default"])).unwrap().unwrap();
        assert_eq!(claimed.id, job_id);
        assert_eq!(claimed.state, JobState::Processing);
        assert_eq!(claimed.attempts, 1);

        // No more jobs
        assert!(store.claim_next(&queues(&["default"])).unwrap().is_none());
    }

    #[test]
    fn payload_is_kept_verbatim() {
        let store = InMemoryJobStore::new();
        let envelope = envelope("default", "ünïcode \"quoted\"");
        let job_id = store.enqueue(&envelope).unwrap();

        let stored = store.get(job_id).unwrap().unwrap();
        assert_eq!(stored.payload, envelope.to_json().unwrap());
        assert_eq!(DynamicJobEnvelope::from_json(&stored.payload).unwrap(), envelope);
    }

    #[test]
    fn claims_only_listened_queues() {
        let store = InMemoryJobStore::new();
        store.enqueue(&envelope("newsletter", "a")).unwrap();

        assert!(store.claim_next(&queues(&["default"])).unwrap().is_none());
        assert!(store.claim_next(&queues(&["default", "newsletter"])).unwrap().is_some());
    }

    #[test]
    fn claims_by_queue_priority_then_age() {
        let store = InMemoryJobStore::new();
        let low = store.enqueue(&envelope("low", "older")).unwrap();
        let high_first = store.enqueue(&envelope("high", "a")).unwrap();
        let high_second = store.enqueue(&envelope("high", "b")).unwrap();
        let listen = queues(&["high", "low"]);

        assert_eq!(store.claim_next(&listen).unwrap().unwrap().id, high_first);
        assert_eq!(store.claim_next(&listen).unwrap().unwrap().id, high_second);
        assert_eq!(store.claim_next(&listen).unwrap().unwrap().id, low);
    }

    #[test]
    fn report_requires_a_claimed_job() {
        let store = InMemoryJobStore::new();
        let job_id = store.enqueue(&envelope("default", "x")).unwrap();
        let outcome = ExecutionOutcome::Succeeded {
            result: serde_json::Value::Null,
        };

        assert_eq!(
            store.report(job_id, &outcome),
            Err(JobStoreError::NotProcessing(job_id))
        );

        store.claim_next(&queues(&["default"])).unwrap();
        store.report(job_id, &outcome).unwrap();
        assert!(store.get(job_id).unwrap().unwrap().state.is_terminal());
    }

    #[test]
    fn stats_tracking() {
        let store = InMemoryJobStore::new();
        for i in 0..3 {
            store.enqueue(&envelope("default", &i.to_string())).unwrap();
        }

        store.claim_next(&queues(&["default"])).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.enqueued, 2);
        assert_eq!(stats.processing, 1);
        assert_eq!(store.jobs().unwrap().len(), 3);
    }
}
