//! Stored jobs, recurring entries, scheduling options, and execution outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use dynjob_core::{ExecutionError, ExecutionResult, JobId};
use dynjob_jobs::{DynamicJobEnvelope, Policy};

/// Lifecycle of a job inside the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    /// Waiting on its queue.
    Enqueued,
    /// Claimed by a worker.
    Processing,
    /// Finished; carries the method's result.
    Succeeded { result: JsonValue },
    /// Finished with an error. Retrying is the store's decision.
    Failed { error: String },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded { .. } | JobState::Failed { .. })
    }
}

/// A job as the store keeps it.
///
/// `payload` is the envelope's JSON exactly as produced at enqueue time; it is
/// never re-serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredJob {
    pub id: JobId,
    pub queue: String,
    pub display_name: String,
    pub payload: String,
    pub state: JobState,
    /// Number of times the job has been claimed.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredJob {
    pub fn new(envelope: &DynamicJobEnvelope, payload: String) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            queue: envelope.effective_queue().to_string(),
            display_name: envelope.display_name(),
            payload,
            state: JobState::Enqueued,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_processing(&mut self) {
        self.state = JobState::Processing;
        self.attempts += 1;
        self.updated_at = Utc::now();
    }

    /// Apply an execution outcome. Cancelled attempts go back on the queue.
    pub fn apply_outcome(&mut self, outcome: &ExecutionOutcome) {
        self.state = match outcome {
            ExecutionOutcome::Succeeded { result } => JobState::Succeeded {
                result: result.clone(),
            },
            ExecutionOutcome::Failed { error } => JobState::Failed {
                error: error.to_string(),
            },
            ExecutionOutcome::Cancelled => JobState::Enqueued,
        };
        self.updated_at = Utc::now();
    }
}

/// Result of one execution attempt.
///
/// Cancellation is its own outcome and is never reported as a failure.
#[derive(Debug)]
pub enum ExecutionOutcome {
    Succeeded { result: JsonValue },
    Failed { error: ExecutionError },
    Cancelled,
}

impl ExecutionOutcome {
    pub fn from_result(result: ExecutionResult<JsonValue>) -> Self {
        match result {
            Ok(result) => Self::Succeeded { result },
            Err(ExecutionError::Cancelled) => Self::Cancelled,
            Err(error) => Self::Failed { error },
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn error(&self) -> Option<&ExecutionError> {
        match self {
            Self::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// What a scheduler does with occurrences missed while it was not running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MisfireHandling {
    /// Fire once for all missed occurrences.
    #[default]
    Relaxed,
    /// Fire once per missed occurrence.
    Strict,
    /// Skip missed occurrences.
    Ignorable,
}

/// Scheduling configuration passed through to the recurring scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringJobOptions {
    /// IANA time zone id the cron expression is evaluated in. Opaque here.
    pub time_zone: String,
    #[serde(default)]
    pub misfire_handling: MisfireHandling,
}

impl Default for RecurringJobOptions {
    fn default() -> Self {
        Self {
            time_zone: "UTC".to_string(),
            misfire_handling: MisfireHandling::default(),
        }
    }
}

impl RecurringJobOptions {
    pub fn with_time_zone(mut self, time_zone: impl Into<String>) -> Self {
        self.time_zone = time_zone.into();
        self
    }

    pub fn with_misfire_handling(mut self, misfire_handling: MisfireHandling) -> Self {
        self.misfire_handling = misfire_handling;
        self
    }
}

/// Registrar options: scheduling configuration plus caller-supplied policies.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DynamicRecurringJobOptions {
    pub schedule: RecurringJobOptions,
    /// Applied ahead of every declared policy.
    pub filters: Vec<Policy>,
}

impl DynamicRecurringJobOptions {
    pub fn with_schedule(mut self, schedule: RecurringJobOptions) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_filter(mut self, policy: Policy) -> Self {
        self.filters.push(policy);
        self
    }
}

/// A named binding of a cron expression to an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringScheduleEntry {
    pub id: String,
    pub cron_expression: String,
    pub envelope: DynamicJobEnvelope,
    pub options: RecurringJobOptions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Most recent job enqueued from this entry.
    pub last_job_id: Option<JobId>,
    pub last_triggered_at: Option<DateTime<Utc>>,
}
