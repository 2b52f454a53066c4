//! Collaborators around the dynamic job envelope.
//!
//! ## Components
//!
//! - `JobStore`: durable queue of envelopes (in-memory reference store)
//! - `RecurringScheduler`: id → (cron, envelope) bindings
//! - `DynamicJobRegistrar` / `DynamicJobClient`: recurring and immediate registration
//! - `DeferredExecutor`: resolve, decode, wrap in policy layers, invoke
//! - `JobWorker`: polls a store and feeds the executor on its own thread

pub mod executor;
pub mod registrar;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod worker;

pub use executor::{DeferredExecutor, Next, PolicyLayer, QueueLayer};
pub use registrar::{DynamicJobClient, DynamicJobRegistrar};
pub use scheduler::{InMemoryRecurringScheduler, RecurringScheduler, SchedulerError};
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{
    DynamicRecurringJobOptions, ExecutionOutcome, JobState, MisfireHandling, RecurringJobOptions,
    RecurringScheduleEntry, StoredJob,
};
pub use worker::{JobWorker, WorkerHandle, WorkerStats};
