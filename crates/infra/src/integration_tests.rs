//! Integration tests for the full dynamic job pipeline.
//!
//! Tests: MethodCall → EnvelopeBuilder → Registrar/Client → Scheduler/Store → Worker → Executor
//!
//! Verifies:
//! - Recurring registration stores one envelope per id and replaces it on re-registration
//! - Arguments survive the store boundary exactly
//! - Queue routing follows caller > type > method precedence
//! - Unknown targets fail without side effects

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use dynjob_core::ExecutionError;
    use dynjob_jobs::{
        CancellationToken, DynamicJobEnvelope, JobCatalog, MethodCall, MethodDecl, Policy, TypeDecl,
    };

    use crate::config::WorkerConfig;
    use crate::jobs::{
        DeferredExecutor, DynamicJobClient, DynamicJobRegistrar, DynamicRecurringJobOptions,
        InMemoryJobStore, InMemoryRecurringScheduler, JobState, JobStore, JobWorker,
        RecurringJobOptions,
    };

    #[derive(Default)]
    struct Outbox {
        digests: AtomicUsize,
        sent: Mutex<Vec<(String, i64)>>,
    }

    fn newsletter_catalog(outbox: Arc<Outbox>) -> Arc<JobCatalog> {
        let digests = outbox.clone();
        let sent = outbox;

        let mut catalog = JobCatalog::new();
        catalog
            .declare_type(TypeDecl::new("NewsletterJob").with_policy(Policy::queue("newsletter")))
            .unwrap()
            .declare_method(MethodDecl::new("NewsletterJob", "SendDigest").handler(move |_, _| {
                digests.digests.fetch_add(1, Ordering::SeqCst);
                Ok(serde_json::Value::Null)
            }))
            .unwrap()
            .declare_method(
                MethodDecl::new("NewsletterJob", "Send")
                    .param_of::<String>()
                    .param_of::<i64>()
                    .display_name("Send newsletter to {0}")
                    .handler(move |_, args| {
                        let to: String = args.get(0)?;
                        let retries: i64 = args.get(1)?;
                        sent.sent.lock().unwrap().push((to, retries));
                        Ok(serde_json::Value::Null)
                    }),
            )
            .unwrap();
        Arc::new(catalog)
    }

    struct Setup {
        catalog: Arc<JobCatalog>,
        outbox: Arc<Outbox>,
        store: Arc<InMemoryJobStore>,
        registrar: DynamicJobRegistrar<Arc<InMemoryRecurringScheduler>, Arc<JobCatalog>>,
        client: DynamicJobClient<Arc<InMemoryJobStore>, Arc<JobCatalog>>,
    }

    fn setup() -> Setup {
        let outbox = Arc::new(Outbox::default());
        let catalog = newsletter_catalog(outbox.clone());
        let store = InMemoryJobStore::arc();

        Setup {
            registrar: DynamicJobRegistrar::new(
                Arc::new(InMemoryRecurringScheduler::new()),
                catalog.clone(),
            ),
            client: DynamicJobClient::new(store.clone(), catalog.clone()),
            catalog,
            outbox,
            store,
        }
    }

    fn worker(setup: &Setup, queues: &[&str]) -> JobWorker<Arc<InMemoryJobStore>, Arc<JobCatalog>> {
        JobWorker::new(
            setup.store.clone(),
            DeferredExecutor::new(setup.catalog.clone()),
            WorkerConfig::default().with_queues(queues.iter().copied()),
        )
    }

    fn drain(worker: &JobWorker<Arc<InMemoryJobStore>, Arc<JobCatalog>>) -> usize {
        let token = CancellationToken::new();
        let mut processed = 0;
        while worker.process_next(&token).unwrap().is_some() {
            processed += 1;
        }
        processed
    }

    #[test]
    fn daily_digest_registers_single_entry() {
        let setup = setup();
        let call = MethodCall::new("NewsletterJob", "SendDigest");

        setup
            .registrar
            .add_or_update("daily-digest", &call, "0 6 * * *", None)
            .unwrap();

        let entries = setup.registrar.scheduler().list().unwrap();
        assert_eq!(entries.len(), 1);

        let entry = &entries[0];
        assert_eq!(entry.id, "daily-digest");
        assert_eq!(entry.cron_expression, "0 6 * * *");
        assert_eq!(entry.envelope.descriptor().method_name(), "SendDigest");
        assert!(entry.envelope.descriptor().arguments().is_empty());
        assert_eq!(entry.envelope.policies(), [Policy::queue("newsletter")]);
    }

    #[test]
    fn re_registration_replaces_cron() {
        let setup = setup();
        let call = MethodCall::new("NewsletterJob", "SendDigest");

        setup
            .registrar
            .add_or_update("daily-digest", &call, "0 6 * * *", None)
            .unwrap();
        setup
            .registrar
            .add_or_update("daily-digest", &call, "0 7 * * *", None)
            .unwrap();

        let entries = setup.registrar.scheduler().list().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].cron_expression, "0 7 * * *");
    }

    #[test]
    fn send_arguments_survive_the_store() {
        let setup = setup();
        let call = MethodCall::new("NewsletterJob", "Send").arg("a@b.com").arg(3_i64);

        let job_id = setup.client.enqueue(&call, &[]).unwrap();

        let stored = setup.store.get(job_id).unwrap().unwrap();
        assert_eq!(stored.queue, "newsletter");
        assert_eq!(stored.display_name, "Send newsletter to a@b.com");

        assert_eq!(drain(&worker(&setup, &["newsletter"])), 1);
        assert_eq!(
            *setup.outbox.sent.lock().unwrap(),
            [("a@b.com".to_string(), 3_i64)]
        );
        assert!(matches!(
            setup.store.get(job_id).unwrap().unwrap().state,
            JobState::Succeeded { .. }
        ));
    }

    #[test]
    fn triggered_recurring_job_runs_on_its_queue() {
        let setup = setup();
        let call = MethodCall::new("NewsletterJob", "SendDigest");
        setup
            .registrar
            .add_or_update("daily-digest", &call, "0 6 * * *", None)
            .unwrap();

        setup
            .registrar
            .scheduler()
            .trigger("daily-digest", setup.store.as_ref())
            .unwrap();

        assert_eq!(drain(&worker(&setup, &["default"])), 0);
        assert_eq!(drain(&worker(&setup, &["newsletter"])), 1);
        assert_eq!(setup.outbox.digests.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn explicit_queue_overrides_declared_queue() {
        let setup = setup();
        let call = MethodCall::new("NewsletterJob", "SendDigest");
        let options = DynamicRecurringJobOptions::default()
            .with_schedule(RecurringJobOptions::default().with_time_zone("Europe/Paris"));

        setup
            .registrar
            .add_or_update_on_queue("digest-critical", "critical", &call, "0 6 * * *", Some(options))
            .unwrap();

        let entry = setup
            .registrar
            .scheduler()
            .get("digest-critical")
            .unwrap()
            .unwrap();
        assert_eq!(entry.envelope.effective_queue(), "critical");
        assert_eq!(
            entry.envelope.policies(),
            [Policy::queue("critical"), Policy::queue("newsletter")]
        );
        assert_eq!(entry.options.time_zone, "Europe/Paris");
    }

    #[test]
    fn envelope_from_another_deployment_fails_resolution() {
        let setup = setup();

        // Built by a process that knows a method this one does not.
        let mut other = JobCatalog::new();
        other
            .declare_type(TypeDecl::new("NewsletterJob"))
            .unwrap()
            .declare_method(MethodDecl::new("NewsletterJob", "Archive"))
            .unwrap();
        let envelope = dynjob_jobs::EnvelopeBuilder::new(&other)
            .build(&MethodCall::new("NewsletterJob", "Archive"), &[])
            .unwrap();
        let job_id = setup.store.enqueue(&envelope).unwrap();

        assert_eq!(drain(&worker(&setup, &["default"])), 1);

        assert!(matches!(
            setup.store.get(job_id).unwrap().unwrap().state,
            JobState::Failed { .. }
        ));
        assert_eq!(setup.outbox.digests.load(Ordering::SeqCst), 0);
        assert!(setup.outbox.sent.lock().unwrap().is_empty());

        let executor = DeferredExecutor::new(setup.catalog.clone());
        let err = executor
            .execute(&envelope, CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, ExecutionError::TargetResolution(_)));
    }

    #[test]
    fn stored_payload_replays_identically() {
        let setup = setup();
        let call = MethodCall::new("NewsletterJob", "Send").arg("ünï@example.com").arg(-1_i64);
        let job_id = setup.client.enqueue(&call, &[]).unwrap();

        let payload = setup.store.get(job_id).unwrap().unwrap().payload;
        let envelope = DynamicJobEnvelope::from_json(&payload).unwrap();
        assert_eq!(envelope.to_json().unwrap(), payload);

        DeferredExecutor::new(setup.catalog.clone())
            .execute_json(&payload, CancellationToken::new())
            .unwrap();
        assert_eq!(
            *setup.outbox.sent.lock().unwrap(),
            [("ünï@example.com".to_string(), -1_i64)]
        );
    }
}
