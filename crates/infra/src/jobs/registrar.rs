//! Registration entry points: recurring registrar and immediate client.

use tracing::info;

use dynjob_core::{DeclarationError, DeclarationResult, JobId};
use dynjob_jobs::{
    DynamicJobEnvelope, EnvelopeBuilder, MethodCall, Policy, PolicySource, ensure_valid_queues,
    is_valid_queue_name,
};

use super::scheduler::{RecurringScheduler, SchedulerError};
use super::store::{JobStore, JobStoreError};
use super::types::{DynamicRecurringJobOptions, RecurringJobOptions};

impl From<SchedulerError> for DeclarationError {
    fn from(err: SchedulerError) -> Self {
        DeclarationError::Scheduler(err.to_string())
    }
}

impl From<JobStoreError> for DeclarationError {
    fn from(err: JobStoreError) -> Self {
        DeclarationError::Store(err.to_string())
    }
}

fn queue_policy(queue: &str) -> DeclarationResult<Policy> {
    if !is_valid_queue_name(queue) {
        return Err(DeclarationError::invalid_argument(format!(
            "invalid queue name: {queue:?}"
        )));
    }
    Ok(Policy::queue(queue))
}

fn with_queue(queue: &str, filters: &[Policy]) -> DeclarationResult<Vec<Policy>> {
    let mut policies = Vec::with_capacity(filters.len() + 1);
    policies.push(queue_policy(queue)?);
    policies.extend_from_slice(filters);
    Ok(policies)
}

/// Registers dynamic jobs as named recurring entries.
///
/// Registering an existing id replaces its entry; nothing is written when
/// validation, encoding or policy resolution fails.
pub struct DynamicJobRegistrar<R, S> {
    scheduler: R,
    builder: EnvelopeBuilder<S>,
}

impl<R, S> DynamicJobRegistrar<R, S>
where
    R: RecurringScheduler,
    S: PolicySource,
{
    pub fn new(scheduler: R, source: S) -> Self {
        Self {
            scheduler,
            builder: EnvelopeBuilder::new(source),
        }
    }

    pub fn scheduler(&self) -> &R {
        &self.scheduler
    }

    /// Register a pre-built envelope.
    pub fn upsert(
        &self,
        id: &str,
        envelope: DynamicJobEnvelope,
        cron_expression: &str,
        options: RecurringJobOptions,
    ) -> DeclarationResult<()> {
        validate(id, cron_expression)?;
        ensure_valid_queues(envelope.policies())?;

        let queue = envelope.effective_queue().to_string();
        self.scheduler.upsert(id, cron_expression, envelope, options)?;

        info!(recurring_job = %id, cron = %cron_expression, queue = %queue, "registered recurring job");
        Ok(())
    }

    /// Build an envelope from `call` and register it.
    ///
    /// `options.filters` are applied ahead of the declared policies.
    pub fn add_or_update(
        &self,
        id: &str,
        call: &MethodCall,
        cron_expression: &str,
        options: Option<DynamicRecurringJobOptions>,
    ) -> DeclarationResult<()> {
        validate(id, cron_expression)?;
        let options = options.unwrap_or_default();

        let envelope = self.builder.build(call, &options.filters)?;
        self.upsert(id, envelope, cron_expression, options.schedule)
    }

    /// Like [`add_or_update`](Self::add_or_update), routed to `queue`
    /// regardless of declared queues.
    pub fn add_or_update_on_queue(
        &self,
        id: &str,
        queue: &str,
        call: &MethodCall,
        cron_expression: &str,
        options: Option<DynamicRecurringJobOptions>,
    ) -> DeclarationResult<()> {
        validate(id, cron_expression)?;
        let options = options.unwrap_or_default();

        let policies = with_queue(queue, &options.filters)?;
        let envelope = self.builder.build(call, &policies)?;
        self.upsert(id, envelope, cron_expression, options.schedule)
    }

    /// Returns whether an entry existed.
    pub fn remove(&self, id: &str) -> DeclarationResult<bool> {
        if id.trim().is_empty() {
            return Err(DeclarationError::invalid_argument("recurring job id is required"));
        }
        Ok(self.scheduler.remove(id)?)
    }
}

fn validate(id: &str, cron_expression: &str) -> DeclarationResult<()> {
    if id.trim().is_empty() {
        return Err(DeclarationError::invalid_argument("recurring job id is required"));
    }
    if cron_expression.trim().is_empty() {
        return Err(DeclarationError::invalid_argument("cron expression is required"));
    }
    Ok(())
}

/// Enqueues dynamic jobs for immediate execution.
pub struct DynamicJobClient<J, S> {
    store: J,
    builder: EnvelopeBuilder<S>,
}

impl<J, S> DynamicJobClient<J, S>
where
    J: JobStore,
    S: PolicySource,
{
    pub fn new(store: J, source: S) -> Self {
        Self {
            store,
            builder: EnvelopeBuilder::new(source),
        }
    }

    pub fn store(&self) -> &J {
        &self.store
    }

    pub fn enqueue(&self, call: &MethodCall, filters: &[Policy]) -> DeclarationResult<JobId> {
        let envelope = self.builder.build(call, filters)?;
        let job_id = self.store.enqueue(&envelope)?;

        info!(job_id = %job_id, queue = %envelope.effective_queue(), name = %envelope.display_name(), "enqueued dynamic job");
        Ok(job_id)
    }

    pub fn enqueue_on_queue(
        &self,
        queue: &str,
        call: &MethodCall,
        filters: &[Policy],
    ) -> DeclarationResult<JobId> {
        let policies = with_queue(queue, filters)?;
        self.enqueue(call, &policies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::jobs::scheduler::InMemoryRecurringScheduler;
    use crate::jobs::store::InMemoryJobStore;
    use dynjob_jobs::{JobCatalog, MethodDecl, TypeDecl};

    fn catalog() -> Arc<JobCatalog> {
        let mut catalog = JobCatalog::new();
        catalog
            .declare_type(TypeDecl::new("ReportJob").with_policy(Policy::queue("reports")))
            .unwrap()
            .declare_method(MethodDecl::new("ReportJob", "Build").param_of::<String>())
            .unwrap();
        Arc::new(catalog)
    }

    fn registrar() -> DynamicJobRegistrar<Arc<InMemoryRecurringScheduler>, Arc<JobCatalog>> {
        DynamicJobRegistrar::new(Arc::new(InMemoryRecurringScheduler::new()), catalog())
    }

    fn build(region: &str) -> MethodCall {
        MethodCall::new("ReportJob", "Build").arg(region)
    }

    #[test]
    fn empty_id_or_cron_writes_nothing() {
        let registrar = registrar();

        assert!(matches!(
            registrar.add_or_update("", &build("eu"), "0 6 * * *", None),
            Err(DeclarationError::InvalidArgument(_))
        ));
        assert!(matches!(
            registrar.add_or_update("weekly", &build("eu"), "  ", None),
            Err(DeclarationError::InvalidArgument(_))
        ));
        assert!(registrar.scheduler().is_empty().unwrap());
    }

    #[test]
    fn filters_precede_declared_policies() {
        let registrar = registrar();
        let options = DynamicRecurringJobOptions::default()
            .with_filter(Policy::custom("audit", serde_json::Value::Null));

        registrar
            .add_or_update("weekly", &build("eu"), "0 6 * * 1", Some(options))
            .unwrap();

        let entry = registrar.scheduler().get("weekly").unwrap().unwrap();
        assert_eq!(
            entry.envelope.policies(),
            [
                Policy::custom("audit", serde_json::Value::Null),
                Policy::queue("reports"),
            ]
        );
    }

    #[test]
    fn explicit_queue_outranks_declared_queue() {
        let registrar = registrar();
        registrar
            .add_or_update_on_queue("weekly", "critical", &build("eu"), "0 6 * * 1", None)
            .unwrap();

        let entry = registrar.scheduler().get("weekly").unwrap().unwrap();
        assert_eq!(entry.envelope.effective_queue(), "critical");
        assert_eq!(entry.envelope.policies()[0], Policy::queue("critical"));

        assert!(matches!(
            registrar.add_or_update_on_queue("other", "", &build("eu"), "0 6 * * 1", None),
            Err(DeclarationError::InvalidArgument(_))
        ));
        assert!(registrar.scheduler().get("other").unwrap().is_none());
    }

    #[test]
    fn undeclared_method_fails_policy_resolution() {
        let registrar = registrar();
        let call = MethodCall::new("ReportJob", "Unknown");

        assert!(matches!(
            registrar.add_or_update("x", &call, "* * * * *", None),
            Err(DeclarationError::PolicyResolution(_))
        ));
        assert!(registrar.scheduler().is_empty().unwrap());
    }

    #[test]
    fn invalid_queue_in_filters_writes_nothing() {
        let registrar = registrar();
        let options = DynamicRecurringJobOptions::default().with_filter(Policy::queue("Urgent Q"));
        assert!(matches!(
            registrar.add_or_update("weekly", &build("eu"), "0 6 * * 1", Some(options)),
            Err(DeclarationError::InvalidArgument(_))
        ));
        assert!(registrar.scheduler().is_empty().unwrap());

        let store = Arc::new(InMemoryJobStore::new());
        let client = DynamicJobClient::new(store.clone(), catalog());
        assert!(matches!(
            client.enqueue(&build("eu"), &[Policy::queue("Urgent Q")]),
            Err(DeclarationError::InvalidArgument(_))
        ));
        assert_eq!(store.stats().unwrap(), Default::default());

        let descriptor = dynjob_jobs::InvocationDescriptor::build(&build("eu")).unwrap();
        let envelope = DynamicJobEnvelope::new(descriptor, vec![Policy::queue("Bad")], None);
        assert!(
            registrar
                .upsert("weekly", envelope, "0 6 * * 1", RecurringJobOptions::default())
                .is_err()
        );
        assert!(registrar.scheduler().is_empty().unwrap());
    }

    #[test]
    fn remove_delegates_to_scheduler() {
        let registrar = registrar();
        registrar
            .add_or_update("weekly", &build("eu"), "0 6 * * 1", None)
            .unwrap();

        assert!(registrar.remove("weekly").unwrap());
        assert!(!registrar.remove("weekly").unwrap());
    }

    #[test]
    fn client_enqueues_on_effective_queue() {
        let store = Arc::new(InMemoryJobStore::new());
        let client = DynamicJobClient::new(store.clone(), catalog());

        let declared = client.enqueue(&build("eu"), &[]).unwrap();
        let explicit = client.enqueue_on_queue("urgent", &build("us"), &[]).unwrap();

        assert_eq!(store.get(declared).unwrap().unwrap().queue, "reports");
        assert_eq!(store.get(explicit).unwrap().unwrap().queue, "urgent");
        assert!(client.enqueue_on_queue("Bad Queue", &build("us"), &[]).is_err());
        assert_eq!(store.stats().unwrap().enqueued, 2);
    }
}
