//! Sample newsletter service: declares `NewsletterJob`, registers a daily
//! digest, enqueues one send, and runs a worker until both are processed.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};

use dynjob_infra::WorkerConfig;
use dynjob_infra::jobs::{
    DeferredExecutor, DynamicJobClient, DynamicJobRegistrar, InMemoryJobStore,
    InMemoryRecurringScheduler, JobStore, JobWorker,
};
use dynjob_jobs::{JobCatalog, MethodCall, MethodDecl, Policy, TypeDecl};

const NEWSLETTER_QUEUE: &str = "newsletter";

fn catalog() -> anyhow::Result<JobCatalog> {
    let mut catalog = JobCatalog::new();
    catalog
        .declare_type(TypeDecl::new("NewsletterJob").with_policy(Policy::queue(NEWSLETTER_QUEUE)))?
        .declare_method(MethodDecl::new("NewsletterJob", "SendDigest").handler(|ctx, _| {
            tracing::info!(job = %ctx.display_name(), "sending daily digest");
            Ok(serde_json::json!({ "digest": "sent" }))
        }))?
        .declare_method(
            MethodDecl::new("NewsletterJob", "Send")
                .param_of::<String>()
                .param_of::<i64>()
                .display_name("Send newsletter to {0}")
                .handler(|ctx, args| {
                    let to: String = args.get(0)?;
                    let retries: i64 = args.get(1)?;
                    ctx.cancellation().check()?;
                    tracing::info!(to = %to, retries, "sending newsletter");
                    Ok(serde_json::json!({ "to": to }))
                }),
        )?;
    Ok(catalog)
}

fn main() -> anyhow::Result<()> {
    dynjob_observability::init();

    let config = WorkerConfig::from_env()
        .context("invalid worker configuration")?
        .with_queues([NEWSLETTER_QUEUE]);

    let catalog = Arc::new(catalog()?);
    let store = InMemoryJobStore::arc();
    let scheduler = Arc::new(InMemoryRecurringScheduler::new());

    let registrar = DynamicJobRegistrar::new(scheduler.clone(), catalog.clone());
    registrar.add_or_update(
        "daily-digest",
        &MethodCall::new("NewsletterJob", "SendDigest"),
        "0 6 * * *",
        None,
    )?;
    scheduler.trigger("daily-digest", store.as_ref())?;

    let client = DynamicJobClient::new(store.clone(), catalog.clone());
    client.enqueue(
        &MethodCall::new("NewsletterJob", "Send").arg("a@b.com").arg(3_i64),
        &[],
    )?;

    let worker = JobWorker::new(store.clone(), DeferredExecutor::new(catalog), config);
    let handle = worker.spawn().context("failed to spawn worker thread")?;

    let deadline = Instant::now() + Duration::from_secs(10);
    while handle.stats().jobs_processed < 2 {
        if Instant::now() > deadline {
            handle.shutdown();
            bail!("jobs were not processed within 10s");
        }
        thread::sleep(Duration::from_millis(20));
    }

    let stats = handle.stats();
    handle.shutdown();

    tracing::info!(
        processed = stats.jobs_processed,
        succeeded = stats.jobs_succeeded,
        failed = stats.jobs_failed,
        store = ?store.stats()?,
        "newsletter service finished"
    );
    Ok(())
}
