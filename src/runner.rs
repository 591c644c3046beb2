// src/runner.rs
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn, Instrument};

use crate::job::{Job, JobType};
use crate::queue::{FailOutcome, QueueClient};
use crate::retry::is_retryable;
use crate::utils::constants::{DEFAULT_MAX_JOBS, DEFAULT_WORKER_TIMEOUT_MS, MAX_SAFETY_BUFFER_MS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOptions {
    pub max_jobs: usize,
    /// Wall-clock budget for one `process_jobs` call.
    pub timeout: Duration,
    pub worker_id: String,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            max_jobs: DEFAULT_MAX_JOBS,
            timeout: Duration::from_millis(DEFAULT_WORKER_TIMEOUT_MS),
            worker_id: format!("worker-{}", nanoid!(8)),
        }
    }
}

impl WorkerOptions {
    /// Time kept in reserve before `timeout`: 10% of it, at most 30s.
    pub fn safety_buffer(&self) -> Duration {
        (self.timeout / 10).min(Duration::from_millis(MAX_SAFETY_BUFFER_MS))
    }

    fn deadline(&self) -> Duration {
        self.timeout.saturating_sub(self.safety_buffer())
    }
}

/// Options as they arrive over HTTP; `timeout` is in milliseconds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRequest {
    pub max_jobs: Option<usize>,
    pub timeout: Option<u64>,
    pub worker_id: Option<String>,
}

impl From<WorkerRequest> for WorkerOptions {
    fn from(req: WorkerRequest) -> Self {
        let defaults = WorkerOptions::default();
        Self {
            max_jobs: req.max_jobs.unwrap_or(defaults.max_jobs),
            timeout: req.timeout.map(Duration::from_millis).unwrap_or(defaults.timeout),
            worker_id: req
                .worker_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or(defaults.worker_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum JobOutcomeKind {
    Completed,
    Retrying,
    Failed,
    /// Another worker finished the job first; the failure was not recorded.
    AlreadyFinished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub job_id: String,
    pub job_type: JobType,
    pub outcome: JobOutcomeKind,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    QueueEmpty,
    MaxJobs,
    Timeout,
    StoreError,
}

/// Everything a caller learns about one `process_jobs` run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSummary {
    pub worker_id: String,
    pub processed: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
    pub jobs: Vec<JobOutcome>,
    pub duration_ms: u64,
    pub stop_reason: StopReason,
}

/// Drains the queue in bounded batches.
///
/// Each `process_jobs` call claims jobs one at a time until the queue is
/// empty, `max_jobs` have been handled, or the time budget is nearly spent,
/// leaving the rest for the next invocation. A handler that hangs is not
/// interrupted; it holds the loop until it returns.
#[derive(Clone)]
pub struct Worker {
    client: QueueClient,
}

impl Worker {
    pub fn new(client: QueueClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &QueueClient {
        &self.client
    }

    pub async fn process_jobs(&self, options: WorkerOptions) -> WorkerSummary {
        let started = Instant::now();
        let deadline = options.deadline();
        let worker_id = options.worker_id.as_str();

        let mut jobs = Vec::new();
        let stop_reason = loop {
            if jobs.len() >= options.max_jobs {
                break StopReason::MaxJobs;
            }
            if started.elapsed() >= deadline {
                info!(%worker_id, processed = jobs.len(), "time budget nearly spent, stopping");
                break StopReason::Timeout;
            }

            let job = match self.client.get_next(worker_id).await {
                Ok(Some(job)) => job,
                Ok(None) => break StopReason::QueueEmpty,
                Err(err) => {
                    error!(%worker_id, error = %err, "failed to fetch next job");
                    break StopReason::StoreError;
                }
            };

            jobs.push(self.run_job(job, worker_id).await);
        };

        let summary = WorkerSummary {
            worker_id: options.worker_id.clone(),
            processed: jobs.len(),
            completed: count(&jobs, JobOutcomeKind::Completed),
            retried: count(&jobs, JobOutcomeKind::Retrying),
            failed: count(&jobs, JobOutcomeKind::Failed),
            jobs,
            duration_ms: started.elapsed().as_millis() as u64,
            stop_reason,
        };

        info!(
            worker_id = %summary.worker_id,
            processed = summary.processed,
            completed = summary.completed,
            retried = summary.retried,
            failed = summary.failed,
            duration_ms = summary.duration_ms,
            stop_reason = ?summary.stop_reason,
            "worker run finished"
        );
        summary
    }

    async fn run_job(&self, job: Job, worker_id: &str) -> JobOutcome {
        let started = Instant::now();
        let job_id = job.id.clone();
        let job_type = job.job_type;

        let Some(handler) = self.client.registry().get(job_type) else {
            let message = format!("no handler registered for job type '{job_type}'");
            error!(%job_id, %job_type, "{message}");
            let outcome = self.report_failure(&job_id, &message, false).await;
            return JobOutcome {
                job_id,
                job_type,
                outcome,
                duration_ms: started.elapsed().as_millis() as u64,
                error: Some(message),
            };
        };

        let span = tracing::info_span!("job", %job_id, %job_type, %worker_id, attempt = job.retry_count + 1);
        let result = AssertUnwindSafe(handler.perform(&job.data))
            .catch_unwind()
            .instrument(span)
            .await
            .unwrap_or_else(|panic| Err(anyhow::anyhow!("handler panicked: {}", panic_message(&*panic))));

        let (outcome, error) = match result {
            Ok(()) => {
                if let Err(err) = self.client.complete(&job_id).await {
                    error!(%job_id, error = %err, "failed to record job completion");
                }
                (JobOutcomeKind::Completed, None)
            }
            Err(err) => {
                let message = format!("{err:#}");
                let retryable = is_retryable(&err);
                warn!(%job_id, %job_type, retryable, error = %message, "job handler failed");
                (self.report_failure(&job_id, &message, retryable).await, Some(message))
            }
        };

        JobOutcome {
            job_id,
            job_type,
            outcome,
            duration_ms: started.elapsed().as_millis() as u64,
            error,
        }
    }

    async fn report_failure(&self, job_id: &str, message: &str, retryable: bool) -> JobOutcomeKind {
        match self.client.fail(job_id, message, retryable).await {
            Ok(FailOutcome::Retrying { .. }) => JobOutcomeKind::Retrying,
            Ok(FailOutcome::Failed { .. }) => JobOutcomeKind::Failed,
            Ok(FailOutcome::AlreadyFinished { .. }) => JobOutcomeKind::AlreadyFinished,
            Err(err) => {
                error!(%job_id, error = %err, "failed to record job failure");
                JobOutcomeKind::Failed
            }
        }
    }
}

fn count(jobs: &[JobOutcome], kind: JobOutcomeKind) -> usize {
    jobs.iter().filter(|j| j.outcome == kind).count()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safety_buffer_is_ten_percent_capped_at_thirty_seconds() {
        let short = WorkerOptions {
            timeout: Duration::from_secs(10),
            ..WorkerOptions::default()
        };
        assert_eq!(short.safety_buffer(), Duration::from_secs(1));
        assert_eq!(short.deadline(), Duration::from_secs(9));

        let long = WorkerOptions {
            timeout: Duration::from_secs(900),
            ..WorkerOptions::default()
        };
        assert_eq!(long.safety_buffer(), Duration::from_secs(30));
        assert_eq!(long.deadline(), Duration::from_secs(870));
    }

    #[test]
    fn request_fills_in_defaults() {
        let opts = WorkerOptions::from(WorkerRequest {
            max_jobs: Some(3),
            timeout: None,
            worker_id: Some("  ".into()),
        });
        assert_eq!(opts.max_jobs, 3);
        assert_eq!(opts.timeout, Duration::from_millis(DEFAULT_WORKER_TIMEOUT_MS));
        assert!(opts.worker_id.starts_with("worker-"));
    }

    #[test]
    fn panic_payloads_become_messages() {
        let static_str: Box<dyn std::any::Any + Send> = Box::new("boom");
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        let other: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*static_str), "boom");
        assert_eq!(panic_message(&*owned), "bang");
        assert_eq!(panic_message(&*other), "unknown panic");
    }

    #[test]
    fn summary_serializes_camel_case() {
        let summary = WorkerSummary {
            worker_id: "w1".into(),
            processed: 1,
            completed: 1,
            retried: 0,
            failed: 0,
            jobs: vec![JobOutcome {
                job_id: "1-a".into(),
                job_type: JobType::LinkProcessing,
                outcome: JobOutcomeKind::Completed,
                duration_ms: 5,
                error: None,
            }],
            duration_ms: 6,
            stop_reason: StopReason::QueueEmpty,
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["stopReason"], "queueEmpty");
        assert_eq!(value["jobs"][0]["jobType"], "link-processing");
        assert_eq!(value["jobs"][0]["outcome"], "completed");
        assert!(value["jobs"][0].get("error").is_none());
    }
}
