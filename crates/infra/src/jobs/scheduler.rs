//! Recurring schedule storage.
//!
//! Cron evaluation is not done here: a scheduler only keeps the binding of an id
//! to a cron expression and an envelope, and enqueues the envelope when told to.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use tracing::{debug, info};

use dynjob_core::JobId;
use dynjob_jobs::DynamicJobEnvelope;

use super::store::{JobStore, JobStoreError};
use super::types::{RecurringJobOptions, RecurringScheduleEntry};

/// Scheduler error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("recurring job not found: {0}")]
    NotFound(String),
    #[error("scheduler storage error: {0}")]
    Storage(String),
    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// Keeps recurring entries keyed by id.
///
/// `upsert` must replace an existing entry atomically: an observer sees either
/// the old entry or the new one, never a mix.
pub trait RecurringScheduler: Send + Sync {
    fn upsert(
        &self,
        id: &str,
        cron_expression: &str,
        envelope: DynamicJobEnvelope,
        options: RecurringJobOptions,
    ) -> Result<(), SchedulerError>;

    /// Returns whether an entry was removed.
    fn remove(&self, id: &str) -> Result<bool, SchedulerError>;
}

impl<T> RecurringScheduler for std::sync::Arc<T>
where
    T: RecurringScheduler + ?Sized,
{
    fn upsert(
        &self,
        id: &str,
        cron_expression: &str,
        envelope: DynamicJobEnvelope,
        options: RecurringJobOptions,
    ) -> Result<(), SchedulerError> {
        (**self).upsert(id, cron_expression, envelope, options)
    }

    fn remove(&self, id: &str) -> Result<bool, SchedulerError> {
        (**self).remove(id)
    }
}

/// In-memory scheduler for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryRecurringScheduler {
    entries: RwLock<HashMap<String, RecurringScheduleEntry>>,
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> SchedulerError {
    SchedulerError::Storage("scheduler lock poisoned".to_string())
}

impl InMemoryRecurringScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Result<Option<RecurringScheduleEntry>, SchedulerError> {
        Ok(self.entries.read().map_err(poisoned)?.get(id).cloned())
    }

    /// All entries, sorted by id.
    pub fn list(&self) -> Result<Vec<RecurringScheduleEntry>, SchedulerError> {
        let entries = self.entries.read().map_err(poisoned)?;
        let mut all: Vec<_> = entries.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    pub fn len(&self) -> Result<usize, SchedulerError> {
        Ok(self.entries.read().map_err(poisoned)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, SchedulerError> {
        Ok(self.len()? == 0)
    }

    /// Enqueue the entry's envelope now, as a cron tick would.
    pub fn trigger<S>(&self, id: &str, store: &S) -> Result<JobId, SchedulerError>
    where
        S: JobStore + ?Sized,
    {
        let mut entries = self.entries.write().map_err(poisoned)?;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;

        let job_id = store.enqueue(&entry.envelope)?;
        entry.last_job_id = Some(job_id);
        entry.last_triggered_at = Some(Utc::now());

        info!(recurring_job = %id, job_id = %job_id, queue = %entry.envelope.effective_queue(), "triggered recurring job");
        Ok(job_id)
    }
}

impl RecurringScheduler for InMemoryRecurringScheduler {
    fn upsert(
        &self,
        id: &str,
        cron_expression: &str,
        envelope: DynamicJobEnvelope,
        options: RecurringJobOptions,
    ) -> Result<(), SchedulerError> {
        let now = Utc::now();
        let mut entries = self.entries.write().map_err(poisoned)?;

        let (created_at, last_job_id, last_triggered_at) = match entries.get(id) {
            Some(existing) => (
                existing.created_at,
                existing.last_job_id,
                existing.last_triggered_at,
            ),
            None => (now, None, None),
        };

        entries.insert(
            id.to_string(),
            RecurringScheduleEntry {
                id: id.to_string(),
                cron_expression: cron_expression.to_string(),
                envelope,
                options,
                created_at,
                updated_at: now,
                last_job_id,
                last_triggered_at,
            },
        );

        debug!(recurring_job = %id, cron = %cron_expression, "upserted recurring job");
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<bool, SchedulerError> {
        let removed = self.entries.write().map_err(poisoned)?.remove(id).is_some();
        debug!(recurring_job = %id, removed, "removed recurring job");
        Ok(removed)
    }
}
