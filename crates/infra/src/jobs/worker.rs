//! Polling worker: claims jobs from a store and runs them through the executor.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use dynjob_core::JobId;
use dynjob_jobs::{CancellationToken, MethodResolver};

use super::executor::DeferredExecutor;
use super::store::{JobStore, JobStoreError};
use super::types::ExecutionOutcome;
use crate::config::WorkerConfig;

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_cancelled: u64,
    pub uptime_secs: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: &ExecutionOutcome) {
        self.jobs_processed += 1;
        match outcome {
            ExecutionOutcome::Succeeded { .. } => self.jobs_succeeded += 1,
            ExecutionOutcome::Failed { .. } => self.jobs_failed += 1,
            ExecutionOutcome::Cancelled => self.jobs_cancelled += 1,
        }
    }
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    cancellation: CancellationToken,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Stop polling, cancel the in-flight job, and wait for the thread.
    pub fn shutdown(mut self) {
        self.cancellation.cancel();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

/// Runs envelopes from `store` on the queues listed in the config.
pub struct JobWorker<S, R> {
    store: S,
    executor: DeferredExecutor<R>,
    config: WorkerConfig,
}

impl<S, R> JobWorker<S, R>
where
    S: JobStore + 'static,
    R: MethodResolver + 'static,
{
    pub fn new(store: S, executor: DeferredExecutor<R>, config: WorkerConfig) -> Self {
        Self {
            store,
            executor,
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Claim and run one job. `Ok(None)` when no job is waiting.
    pub fn process_next(
        &self,
        cancellation: &CancellationToken,
    ) -> Result<Option<(JobId, ExecutionOutcome)>, JobStoreError> {
        let Some(job) = self.store.claim_next(&self.config.queues)? else {
            return Ok(None);
        };

        debug!(worker = %self.config.name, job_id = %job.id, queue = %job.queue, attempt = job.attempts, "claimed job");

        let outcome = self.executor.execute_stored(&job, cancellation.clone());
        if let Err(e) = self.store.report(job.id, &outcome) {
            error!(worker = %self.config.name, job_id = %job.id, outcome = ?outcome, error = %e, "failed to report job outcome");
            return Err(e);
        }

        Ok(Some((job.id, outcome)))
    }

    /// Run the polling loop on a dedicated thread.
    pub fn spawn(self) -> std::io::Result<WorkerHandle> {
        let cancellation = CancellationToken::new();
        let stats = Arc::new(Mutex::new(WorkerStats::default()));

        let token = cancellation.clone();
        let loop_stats = stats.clone();
        let join = thread::Builder::new()
            .name(self.config.name.clone())
            .spawn(move || self.run(token, loop_stats))?;

        Ok(WorkerHandle {
            cancellation,
            join: Some(join),
            stats,
        })
    }

    fn run(self, cancellation: CancellationToken, stats: Arc<Mutex<WorkerStats>>) {
        info!(worker = %self.config.name, queues = ?self.config.queues, "job worker started");
        let started = Instant::now();

        while !cancellation.is_cancelled() {
            let polled = self.process_next(&cancellation);

            if let Ok(mut s) = stats.lock() {
                s.uptime_secs = started.elapsed().as_secs();
                if let Ok(Some((_, outcome))) = &polled {
                    s.record(outcome);
                }
            }

            match polled {
                Ok(Some((job_id, ExecutionOutcome::Cancelled))) => {
                    warn!(worker = %self.config.name, job_id = %job_id, "job cancelled, returned to queue");
                }
                Ok(Some(_)) => {}
                Ok(None) => thread::sleep(self.config.poll_interval),
                Err(e) => {
                    error!(worker = %self.config.name, error = %e, "failed to process job");
                    thread::sleep(self.config.poll_interval);
                }
            }
        }

        info!(worker = %self.config.name, "job worker stopped");
    }
}
