//! Infrastructure layer: job store, recurring scheduler, registrar, executor, worker.

pub mod config;
pub mod jobs;

mod integration_tests;

pub use config::{ConfigError, WorkerConfig};
