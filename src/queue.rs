// src/queue.rs
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::error::{QueueError, Result};
use crate::fallback::FallbackExecutor;
use crate::health::{assess, HealthReport, HealthThresholds, QueueMode, QueueStats};
use crate::job::{Job, JobOptions, JobStatus, JobType};
use crate::registry::HandlerRegistry;
use crate::retry::RetryPolicy;
use crate::store::{RedisStore, Store, StoreOp};
use crate::utils::codec::{
    decode_job, encode_job, FieldSet, F_COMPLETED_AT, F_ERROR, F_RETRY_AT, F_RETRY_COUNT, F_STARTED_AT,
    F_STATUS, F_UPDATED_AT, F_WORKER_ID,
};
use crate::utils::constants::{
    job_key, DELAYED_QUEUE_KEY, PENDING_QUEUE_KEY, PROCESSING_QUEUE_KEY, REDIS_URL_ENV, STATS_ADDED_KEY,
    STATS_COMPLETED_KEY, STATS_FAILED_KEY,
};
use crate::utils::now_ms;

const LEASE_EXHAUSTED_ERROR: &str = "lease expired with no retries remaining";

/// What `fail` did with the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum FailOutcome {
    #[serde(rename_all = "camelCase")]
    Retrying {
        retry_count: u32,
        retry_at: i64,
        delay_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    Failed { retry_count: u32 },
    /// The job had already completed or failed; nothing was written.
    AlreadyFinished { status: JobStatus },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusReport {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: i64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub retryable: bool,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    /// Delayed retries whose backoff had elapsed.
    pub promoted: usize,
    /// Expired leases returned to pending.
    pub requeued: usize,
    /// Expired leases with no retry budget left, now failed.
    pub failed: usize,
    /// Processing entries whose job record no longer exists.
    pub orphaned: usize,
    pub errors: usize,
}

enum Expired {
    Requeued,
    Failed,
    Orphaned,
    Skipped,
}

/// Job lifecycle API over a [`Store`].
///
/// Without a store every job goes straight to the [`FallbackExecutor`] and
/// the read side of the API reports an empty queue.
#[derive(Clone)]
pub struct QueueClient {
    store: Option<Arc<dyn Store>>,
    fallback: FallbackExecutor,
    registry: Arc<HandlerRegistry>,
    retry: RetryPolicy,
    config: QueueConfig,
}

impl QueueClient {
    pub fn new(store: Arc<dyn Store>, registry: Arc<HandlerRegistry>, config: QueueConfig) -> Self {
        Self::build(Some(store), registry, config)
    }

    pub fn fallback(registry: Arc<HandlerRegistry>, config: QueueConfig) -> Self {
        Self::build(None, registry, config)
    }

    /// Connects to the configured store, degrading to fallback mode when no
    /// connection string is set or the store cannot be reached.
    pub async fn connect(registry: Arc<HandlerRegistry>, config: QueueConfig) -> Self {
        match RedisStore::from_config(&config).await {
            Ok(store) => Self::new(Arc::new(store), registry, config),
            Err(QueueError::NotConfigured(var)) => {
                warn!("{var} is not set, jobs will run inline");
                Self::fallback(registry, config)
            }
            Err(err) => {
                error!(error = %err, "queue store unreachable, jobs will run inline");
                Self::fallback(registry, config)
            }
        }
    }

    fn build(store: Option<Arc<dyn Store>>, registry: Arc<HandlerRegistry>, config: QueueConfig) -> Self {
        Self {
            store,
            fallback: FallbackExecutor::new(registry.clone()),
            registry,
            retry: RetryPolicy::new(config.retry_base_delay, config.retry_max_delay),
            config,
        }
    }

    pub fn mode(&self) -> QueueMode {
        if self.store.is_some() {
            QueueMode::Store
        } else {
            QueueMode::Fallback
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.store.is_none()
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn lease_ms(&self) -> i64 {
        self.config.lease_duration.as_millis() as i64
    }

    /// Queues a job and returns its id.
    ///
    /// In fallback mode, or when the store rejects the write, the job runs
    /// inline instead and the returned id is synthesized.
    pub async fn add(&self, job_type: JobType, data: serde_json::Value, options: JobOptions) -> Result<String> {
        let Some(store) = &self.store else {
            return Ok(self.fallback.execute(job_type, data));
        };

        let job = Job::new(job_type, data, options);
        let ops = vec![
            StoreOp::hset(job_key(&job.id), encode_job(&job)?),
            StoreOp::zadd(PENDING_QUEUE_KEY, &job.id, job.priority as f64),
            StoreOp::incr(STATS_ADDED_KEY),
        ];

        match store.apply(ops).await {
            Ok(()) => {
                info!(job_id = %job.id, %job_type, priority = job.priority, "job queued");
                Ok(job.id)
            }
            Err(err) => {
                error!(error = %err, %job_type, "failed to queue job");
                Ok(self.fallback.execute(job_type, job.data))
            }
        }
    }

    /// Claims the highest-priority pending job for `worker_id`.
    ///
    /// The claim moves the id into the processing set under a lease; if the
    /// worker disappears, `cleanup` hands the job out again once the lease
    /// expires.
    pub async fn get_next(&self, worker_id: &str) -> Result<Option<Job>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };

        if let Err(err) = self.promote_due_at(store.as_ref(), now_ms()).await {
            warn!(error = %err, "failed to promote delayed jobs");
        }

        loop {
            let now = now_ms();
            let lease_until = now + self.lease_ms();
            let Some(entry) = store
                .zmove_max(PENDING_QUEUE_KEY, PROCESSING_QUEUE_KEY, lease_until as f64)
                .await?
            else {
                return Ok(None);
            };

            let job_id = entry.member;
            let key = job_key(&job_id);
            let record = store.hgetall(&key).await?;
            if record.is_empty() {
                warn!(%job_id, "dropping queue entry without a job record");
                store.zrem(PROCESSING_QUEUE_KEY, &job_id).await?;
                continue;
            }

            let mut job = match decode_job(&job_id, &record) {
                Ok(job) => job,
                Err(err) => {
                    error!(%job_id, error = %err, "failing unreadable job record");
                    self.fail_terminal(store.as_ref(), &job_id, &err.to_string(), None, now)
                        .await?;
                    continue;
                }
            };

            let claim = FieldSet::new()
                .set(F_STATUS, JobStatus::Processing)
                .set(F_STARTED_AT, now)
                .set(F_UPDATED_AT, now)
                .set(F_WORKER_ID, worker_id)
                .into_fields();
            store.hset_multiple(&key, &claim).await?;

            job.status = JobStatus::Processing;
            job.started_at = Some(now);
            job.updated_at = now;
            job.worker_id = Some(worker_id.to_string());

            debug!(%job_id, %worker_id, priority = job.priority, "job claimed");
            return Ok(Some(job));
        }
    }

    /// Marks a job completed. Calling it again just moves `completedAt`.
    pub async fn complete(&self, job_id: &str) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let key = job_key(job_id);
        if store.hgetall(&key).await?.is_empty() {
            return Err(QueueError::NotFound(job_id.to_string()));
        }

        let now = now_ms();
        let fields = FieldSet::new()
            .set(F_STATUS, JobStatus::Completed)
            .set(F_COMPLETED_AT, now)
            .set(F_UPDATED_AT, now)
            .into_fields();

        store
            .apply(vec![
                StoreOp::hset(key, fields),
                StoreOp::zrem(PROCESSING_QUEUE_KEY, job_id),
                StoreOp::zrem(PENDING_QUEUE_KEY, job_id),
                StoreOp::zrem(DELAYED_QUEUE_KEY, job_id),
                StoreOp::incr(STATS_COMPLETED_KEY),
            ])
            .await?;

        info!(%job_id, "job completed");
        Ok(())
    }

    /// Records a failed attempt.
    ///
    /// A retryable failure with budget left is parked in the delayed set until
    /// its backoff elapses, then re-enters pending at its original priority.
    /// Anything else is terminal. A job that already completed or failed is
    /// left untouched.
    pub async fn fail(&self, job_id: &str, error: &str, retryable: bool) -> Result<FailOutcome> {
        let Some(store) = &self.store else {
            return Err(QueueError::NotConfigured(REDIS_URL_ENV));
        };

        let key = job_key(job_id);
        let record = store.hgetall(&key).await?;
        if record.is_empty() {
            store.zrem(PROCESSING_QUEUE_KEY, job_id).await?;
            return Err(QueueError::NotFound(job_id.to_string()));
        }
        let job = decode_job(job_id, &record)?;

        if job.status.is_terminal() {
            warn!(%job_id, status = %job.status, %error, "ignoring failure report for finished job");
            return Ok(FailOutcome::AlreadyFinished { status: job.status });
        }

        let retry_count = job.retry_count.saturating_add(1).min(job.max_retries);
        let now = now_ms();

        if !(retryable && retry_count < job.max_retries) {
            self.fail_terminal(store.as_ref(), job_id, error, Some(retry_count), now)
                .await?;
            error!(
                %job_id,
                job_type = %job.job_type,
                retry_count,
                max_retries = job.max_retries,
                retryable,
                %error,
                "job permanently failed"
            );
            return Ok(FailOutcome::Failed { retry_count });
        }

        let delay = self.retry.delay_for(retry_count);
        let delay_ms = delay.as_millis() as u64;
        let retry_at = now + delay_ms as i64;
        let fields = FieldSet::new()
            .set(F_STATUS, JobStatus::Retrying)
            .set(F_RETRY_COUNT, retry_count)
            .set(F_ERROR, error)
            .set(F_RETRY_AT, retry_at)
            .set(F_UPDATED_AT, now)
            .into_fields();

        store
            .apply(vec![
                StoreOp::zrem(PROCESSING_QUEUE_KEY, job_id),
                StoreOp::zrem(PENDING_QUEUE_KEY, job_id),
                StoreOp::hset(key, fields),
                StoreOp::zadd(DELAYED_QUEUE_KEY, job_id, retry_at as f64),
            ])
            .await?;

        warn!(
            %job_id,
            job_type = %job.job_type,
            retry_count,
            max_retries = job.max_retries,
            delay_ms,
            %error,
            "job failed, retry scheduled"
        );
        Ok(FailOutcome::Retrying {
            retry_count,
            retry_at,
            delay_ms,
        })
    }

    async fn fail_terminal(
        &self,
        store: &dyn Store,
        job_id: &str,
        error: &str,
        retry_count: Option<u32>,
        now: i64,
    ) -> Result<()> {
        let fields = FieldSet::new()
            .set(F_STATUS, JobStatus::Failed)
            .set_opt(F_RETRY_COUNT, retry_count)
            .set(F_ERROR, error)
            .set(F_COMPLETED_AT, now)
            .set(F_UPDATED_AT, now)
            .into_fields();

        store
            .apply(vec![
                StoreOp::zrem(PROCESSING_QUEUE_KEY, job_id),
                StoreOp::zrem(PENDING_QUEUE_KEY, job_id),
                StoreOp::zrem(DELAYED_QUEUE_KEY, job_id),
                StoreOp::hset(job_key(job_id), fields),
                StoreOp::incr(STATS_FAILED_KEY),
            ])
            .await
    }

    /// Moves delayed retries whose backoff has elapsed into pending.
    pub async fn promote_due(&self) -> Result<usize> {
        match &self.store {
            Some(store) => self.promote_due_at(store.as_ref(), now_ms()).await,
            None => Ok(0),
        }
    }

    pub(crate) async fn promote_due_at(&self, store: &dyn Store, now: i64) -> Result<usize> {
        let due = store.zrangebyscore(DELAYED_QUEUE_KEY, 0.0, now as f64).await?;
        let mut promoted = 0;

        for entry in due {
            let job_id = entry.member;
            let key = job_key(&job_id);
            let record = store.hgetall(&key).await?;
            if record.is_empty() {
                warn!(%job_id, "dropping delayed entry without a job record");
                store.zrem(DELAYED_QUEUE_KEY, &job_id).await?;
                continue;
            }

            let priority = match decode_job(&job_id, &record) {
                Ok(job) => job.priority,
                Err(err) => {
                    error!(%job_id, error = %err, "failing unreadable job record");
                    self.fail_terminal(store, &job_id, &err.to_string(), None, now).await?;
                    continue;
                }
            };

            let stamp = FieldSet::new()
                .set(F_STATUS, JobStatus::Pending)
                .set(F_UPDATED_AT, now)
                .into_fields();
            if store
                .zmove(DELAYED_QUEUE_KEY, PENDING_QUEUE_KEY, &job_id, priority as f64, &key, &stamp)
                .await?
            {
                debug!(%job_id, priority, "retry is due, job back in pending");
                promoted += 1;
            }
        }

        Ok(promoted)
    }

    pub async fn get_status(&self, job_id: &str) -> Result<Option<JobStatusReport>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };

        let record = store.hgetall(&job_key(job_id)).await?;
        if record.is_empty() {
            return Ok(None);
        }
        let job = decode_job(job_id, &record)?;

        let lease_expires_at = match job.status {
            JobStatus::Processing => store
                .zscore(PROCESSING_QUEUE_KEY, job_id)
                .await?
                .map(|score| score as i64),
            _ => None,
        };

        Ok(Some(JobStatusReport {
            retryable: job.has_retries_left(),
            retry_at: job.retry_at.filter(|_| job.status == JobStatus::Retrying),
            lease_expires_at,
            id: job.id,
            job_type: job.job_type,
            status: job.status,
            priority: job.priority,
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            created_at: job.created_at,
            updated_at: job.updated_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error: job.error,
        }))
    }

    pub async fn get_stats(&self) -> Result<QueueStats> {
        let Some(store) = &self.store else {
            return Ok(QueueStats {
                healthy: true,
                ..QueueStats::default()
            });
        };

        let (pending, processing, delayed, added, completed, failed) = tokio::try_join!(
            store.zcard(PENDING_QUEUE_KEY),
            store.zcard(PROCESSING_QUEUE_KEY),
            store.zcard(DELAYED_QUEUE_KEY),
            store.get_counter(STATS_ADDED_KEY),
            store.get_counter(STATS_COMPLETED_KEY),
            store.get_counter(STATS_FAILED_KEY),
        )?;

        Ok(QueueStats {
            pending,
            processing,
            delayed,
            added: added.max(0) as u64,
            completed: completed.max(0) as u64,
            failed: failed.max(0) as u64,
            healthy: processing < self.config.processing_health_threshold,
        })
    }

    /// Recovers jobs whose lease expired while processing.
    ///
    /// Jobs with retry budget left go back to pending at their original
    /// priority without consuming a retry. Jobs without budget are failed.
    /// Errors on individual entries are logged and counted, not returned.
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        let Some(store) = &self.store else {
            return Ok(report);
        };

        let now = now_ms();
        match self.promote_due_at(store.as_ref(), now).await {
            Ok(promoted) => report.promoted = promoted,
            Err(err) => {
                error!(error = %err, "failed to promote delayed jobs during cleanup");
                report.errors += 1;
            }
        }

        let expired = store
            .zrangebyscore(PROCESSING_QUEUE_KEY, 0.0, now as f64)
            .await?;
        for entry in expired {
            match self.recover_expired(store.as_ref(), &entry.member, now).await {
                Ok(Expired::Requeued) => report.requeued += 1,
                Ok(Expired::Failed) => report.failed += 1,
                Ok(Expired::Orphaned) => report.orphaned += 1,
                Ok(Expired::Skipped) => {}
                Err(err) => {
                    error!(job_id = %entry.member, error = %err, "cleanup of expired lease failed");
                    report.errors += 1;
                }
            }
        }

        if report != CleanupReport::default() {
            info!(?report, "queue cleanup finished");
        }
        Ok(report)
    }

    async fn recover_expired(&self, store: &dyn Store, job_id: &str, now: i64) -> Result<Expired> {
        let key = job_key(job_id);
        let record = store.hgetall(&key).await?;
        if record.is_empty() {
            let removed = store.zrem(PROCESSING_QUEUE_KEY, job_id).await?;
            return Ok(if removed { Expired::Orphaned } else { Expired::Skipped });
        }

        let job = match decode_job(job_id, &record) {
            Ok(job) => job,
            Err(err) => {
                self.fail_terminal(store, job_id, &err.to_string(), None, now).await?;
                return Ok(Expired::Failed);
            }
        };

        if job.has_retries_left() {
            let stamp = FieldSet::new()
                .set(F_STATUS, JobStatus::Pending)
                .set(F_UPDATED_AT, now)
                .into_fields();
            let moved = store
                .zmove(PROCESSING_QUEUE_KEY, PENDING_QUEUE_KEY, job_id, job.priority as f64, &key, &stamp)
                .await?;
            if moved {
                warn!(%job_id, worker_id = ?job.worker_id, "lease expired, job requeued");
                return Ok(Expired::Requeued);
            }
            return Ok(Expired::Skipped);
        }

        // Only the caller that removes the entry records the failure.
        if !store.zrem(PROCESSING_QUEUE_KEY, job_id).await? {
            return Ok(Expired::Skipped);
        }
        self.fail_terminal(store, job_id, LEASE_EXHAUSTED_ERROR, None, now).await?;
        error!(%job_id, worker_id = ?job.worker_id, retry_count = job.retry_count, "lease expired with no retries left, job failed");
        Ok(Expired::Failed)
    }

    /// Never fails: problems reaching the store show up in the report.
    pub async fn health_check(&self) -> HealthReport {
        let stats = match &self.store {
            None => self.get_stats().await.map_err(|e| e.to_string()),
            Some(store) => match store.ping().await {
                Ok(()) => self.get_stats().await.map_err(|e| e.to_string()),
                Err(err) => Err(err.to_string()),
            },
        };
        assess(self.mode(), stats, HealthThresholds::from(&self.config), now_ms())
    }
}
