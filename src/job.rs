// src/job.rs
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::QueueError;
use crate::utils::constants::{DEFAULT_PRIORITY, MAX_RETRIES};
use crate::utils::{now_ms, random_suffix};

/// Selects the handler a job is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    #[serde(rename = "link-processing")]
    LinkProcessing,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::LinkProcessing => "link-processing",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "link-processing" => Ok(JobType::LinkProcessing),
            other => Err(QueueError::UnknownJobType(other.to_string())),
        }
    }
}

/// Persisted lifecycle state of a job.
///
/// `Retrying` covers the window between a retryable failure and the moment the
/// backoff elapses and the job re-enters the pending queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Retrying,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Retrying => "retrying",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Infers the state from timestamps, for records written without a
    /// `status` field.
    pub fn derive(started_at: Option<i64>, completed_at: Option<i64>, error: Option<&str>) -> Self {
        match (started_at, completed_at, error) {
            (_, Some(_), Some(_)) => JobStatus::Failed,
            (_, Some(_), None) => JobStatus::Completed,
            (Some(_), None, _) => JobStatus::Processing,
            (None, None, _) => JobStatus::Pending,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "retrying" => Ok(JobStatus::Retrying),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobOptions {
    pub priority: i64,
    pub max_retries: u32,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            max_retries: MAX_RETRIES,
        }
    }
}

impl JobOptions {
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// One unit of deferred work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub data: serde_json::Value,
    pub priority: i64,
    pub max_retries: u32,
    pub retry_count: u32,
    pub status: JobStatus,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

impl Job {
    pub fn new(job_type: JobType, data: serde_json::Value, options: JobOptions) -> Self {
        let now = now_ms();
        Self {
            id: generate_job_id(),
            job_type,
            data,
            priority: options.priority,
            max_retries: options.max_retries,
            retry_count: 0,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            retry_at: None,
            error: None,
            worker_id: None,
        }
    }

    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// `<millis>-<alphanumeric suffix>`; the suffix keeps ids unique across
/// producers created within the same millisecond.
pub fn generate_job_id() -> String {
    format!("{}-{}", now_ms(), random_suffix())
}

/// Id handed back when a job bypasses the store.
pub fn fallback_job_id() -> String {
    format!("job:{}:{}", now_ms(), random_suffix())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_follows_timestamps() {
        assert_eq!(JobStatus::derive(None, None, None), JobStatus::Pending);
        assert_eq!(JobStatus::derive(Some(1), None, None), JobStatus::Processing);
        assert_eq!(JobStatus::derive(Some(1), Some(2), None), JobStatus::Completed);
        assert_eq!(JobStatus::derive(Some(1), Some(2), Some("boom")), JobStatus::Failed);
        // an error left over from an earlier attempt does not make a running job failed
        assert_eq!(JobStatus::derive(Some(1), None, Some("boom")), JobStatus::Processing);
    }

    #[test]
    fn job_type_round_trips_through_wire_name() {
        assert_eq!("link-processing".parse::<JobType>().unwrap(), JobType::LinkProcessing);
        assert!(matches!(
            "video".parse::<JobType>(),
            Err(QueueError::UnknownJobType(t)) if t == "video"
        ));
        assert_eq!(
            serde_json::to_value(JobType::LinkProcessing).unwrap(),
            serde_json::json!("link-processing")
        );
    }

    #[test]
    fn generated_ids_are_unique_and_well_formed() {
        let a = generate_job_id();
        let b = generate_job_id();
        assert_ne!(a, b);

        let (millis, suffix) = a.split_once('-').unwrap();
        assert!(millis.chars().all(|c| c.is_ascii_digit()));
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn default_options() {
        let opts = JobOptions::default();
        assert_eq!(opts.priority, 1);
        assert_eq!(opts.max_retries, 3);
    }
}
