//! Queue workers: claim, execute, settle.
//!
//! A fixed number of workers poll the store on an interval. Within one job,
//! execution is sequential; parallelism exists only across jobs. Workers
//! respect graceful shutdown via the cancellation token.

use super::models::{Job, JobError, JobKind};
use super::retry_policy::RetryPolicy;
use super::store::JobStore;
use crate::audit::AuditLogger;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Executes one claimed job. Implemented by the smart upload processor.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, job: &Job, cancel: &CancellationToken) -> Result<(), JobError>;
}

/// Default worker concurrency for the smart upload queues.
pub const DEFAULT_CONCURRENCY: usize = 2;

/// The job queue: enqueue API plus the worker pool.
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    retry_policy: RetryPolicy,
    concurrency: usize,
    poll_interval: Duration,
    audit: Option<Arc<AuditLogger>>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>, audit: Option<Arc<AuditLogger>>) -> Self {
        Self {
            store,
            retry_policy: RetryPolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
            poll_interval: Duration::from_secs(1),
            audit,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn enqueue_process(&self, session_id: &str, file_id: &str) -> anyhow::Result<String> {
        self.enqueue(Job::new(
            JobKind::Process,
            session_id,
            Some(file_id.to_string()),
        ))
    }

    pub fn enqueue_second_pass(&self, session_id: &str) -> anyhow::Result<String> {
        self.enqueue(Job::new(JobKind::SecondPass, session_id, None))
    }

    pub fn enqueue_auto_commit(&self, session_id: &str) -> anyhow::Result<String> {
        self.enqueue(Job::new(JobKind::AutoCommit, session_id, None))
    }

    fn enqueue(&self, job: Job) -> anyhow::Result<String> {
        let id = job.id.clone();
        self.store.enqueue(&job)?;
        info!(
            job_id = %id,
            queue = job.kind.queue_name(),
            session_id = %job.session_id,
            "Enqueued job"
        );
        Ok(id)
    }

    /// Run the worker pool until the shutdown token fires.
    pub async fn run(&self, handler: Arc<dyn JobHandler>, shutdown: CancellationToken) {
        info!(
            concurrency = self.concurrency,
            "Smart upload queue workers starting"
        );

        let mut workers = Vec::with_capacity(self.concurrency);
        for worker_index in 0..self.concurrency {
            let store = Arc::clone(&self.store);
            let handler = Arc::clone(&handler);
            let retry_policy = self.retry_policy.clone();
            let audit = self.audit.clone();
            let shutdown = shutdown.clone();
            let poll_interval = self.poll_interval;

            workers.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(poll_interval);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            worker_tick(&store, &handler, &retry_policy, audit.as_deref(), &shutdown).await;
                        }
                        _ = shutdown.cancelled() => {
                            debug!(worker_index, "Queue worker shutting down");
                            break;
                        }
                    }
                }
            }));
        }

        join_all(workers).await;
        info!("Smart upload queue workers stopped");
    }
}

async fn worker_tick(
    store: &Arc<dyn JobStore>,
    handler: &Arc<dyn JobHandler>,
    retry_policy: &RetryPolicy,
    audit: Option<&AuditLogger>,
    shutdown: &CancellationToken,
) {
    if let Err(e) = store.promote_ready_retries() {
        error!("Failed to promote retries: {}", e);
    }

    let job = match store.claim_next_pending() {
        Ok(Some(job)) => job,
        Ok(None) => return,
        Err(e) => {
            error!("Failed to claim job: {}", e);
            return;
        }
    };

    debug!(
        job_id = %job.id,
        queue = job.kind.queue_name(),
        attempt = job.attempt_count,
        "Executing job"
    );

    match handler.execute(&job, shutdown).await {
        Ok(()) => {
            if let Err(e) = store.mark_completed(&job.id) {
                error!(job_id = %job.id, "Failed to mark job completed: {}", e);
            }
            let _ = store.trim_finished();
        }
        Err(JobError::Cancelled) => {
            // No state writes past the last checkpoint; just return the job
            // to a terminal cancelled state.
            warn!(job_id = %job.id, "Job cancelled");
            let _ = store.mark_cancelled(&job.id);
        }
        Err(JobError::Fatal(message)) => {
            error!(job_id = %job.id, error = %message, "Job failed fatally");
            settle_failure(store, audit, &job, &message);
        }
        Err(JobError::Retryable(message)) => {
            if retry_policy.should_retry(job.attempt_count) {
                let next = retry_policy.next_retry_at(job.attempt_count);
                warn!(
                    job_id = %job.id,
                    attempt = job.attempt_count,
                    error = %message,
                    "Job failed, retrying"
                );
                if let Err(e) = store.mark_retry_waiting(&job.id, next, &message) {
                    error!(job_id = %job.id, "Failed to schedule retry: {}", e);
                }
            } else {
                error!(
                    job_id = %job.id,
                    attempts = job.attempt_count,
                    error = %message,
                    "Job failed after final attempt"
                );
                settle_failure(store, audit, &job, &message);
            }
        }
    }
}

fn settle_failure(store: &Arc<dyn JobStore>, audit: Option<&AuditLogger>, job: &Job, message: &str) {
    if let Err(e) = store.mark_failed(&job.id, message) {
        error!(job_id = %job.id, "Failed to mark job failed: {}", e);
    }
    let _ = store.trim_finished();
    if let Some(audit) = audit {
        let _ = audit.log_job_failed(&job.session_id, job.kind.queue_name(), message);
    }
}
