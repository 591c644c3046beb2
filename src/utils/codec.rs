// src/utils/codec.rs
//
// Job records live in a hash where every value is a string. These helpers
// turn a `Job` into hash fields and coerce a fetched hash back into a `Job`.

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{QueueError, Result};
use crate::job::{Job, JobStatus, JobType};

pub const F_ID: &str = "id";
pub const F_TYPE: &str = "type";
pub const F_DATA: &str = "data";
pub const F_PRIORITY: &str = "priority";
pub const F_MAX_RETRIES: &str = "maxRetries";
pub const F_RETRY_COUNT: &str = "retryCount";
pub const F_STATUS: &str = "status";
pub const F_CREATED_AT: &str = "createdAt";
pub const F_UPDATED_AT: &str = "updatedAt";
pub const F_STARTED_AT: &str = "startedAt";
pub const F_COMPLETED_AT: &str = "completedAt";
pub const F_RETRY_AT: &str = "retryAt";
pub const F_ERROR: &str = "error";
pub const F_WORKER_ID: &str = "workerId";

pub type Fields = Vec<(String, String)>;

/// Small builder so call sites read as a list of field assignments.
#[derive(Debug, Default)]
pub struct FieldSet(Fields);

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl ToString) -> Self {
        self.0.push((field.to_string(), value.to_string()));
        self
    }

    pub fn set_opt<T: ToString>(self, field: &str, value: Option<T>) -> Self {
        match value {
            Some(v) => self.set(field, v),
            None => self,
        }
    }

    pub fn into_fields(self) -> Fields {
        self.0
    }
}

pub fn encode_job(job: &Job) -> Result<Fields> {
    let fields = FieldSet::new()
        .set(F_ID, &job.id)
        .set(F_TYPE, job.job_type)
        .set(F_DATA, serde_json::to_string(&job.data)?)
        .set(F_PRIORITY, job.priority)
        .set(F_MAX_RETRIES, job.max_retries)
        .set(F_RETRY_COUNT, job.retry_count)
        .set(F_STATUS, job.status)
        .set(F_CREATED_AT, job.created_at)
        .set(F_UPDATED_AT, job.updated_at)
        .set_opt(F_STARTED_AT, job.started_at)
        .set_opt(F_COMPLETED_AT, job.completed_at)
        .set_opt(F_RETRY_AT, job.retry_at)
        .set_opt(F_ERROR, job.error.as_deref())
        .set_opt(F_WORKER_ID, job.worker_id.as_deref());
    Ok(fields.into_fields())
}

pub fn decode_job(id: &str, map: &HashMap<String, String>) -> Result<Job> {
    let job_type = match map.get(F_TYPE) {
        Some(raw) => JobType::from_str(raw)?,
        None => return Err(QueueError::malformed(id, "missing type")),
    };

    let data = match map.get(F_DATA) {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| QueueError::malformed(id, format!("data is not JSON: {e}")))?,
        None => serde_json::Value::Null,
    };

    let started_at = parse_opt(id, map, F_STARTED_AT)?;
    let completed_at = parse_opt(id, map, F_COMPLETED_AT)?;
    let error = map.get(F_ERROR).filter(|e| !e.is_empty()).cloned();

    let status = match map.get(F_STATUS) {
        Some(raw) => JobStatus::from_str(raw).map_err(|e| QueueError::malformed(id, e))?,
        None => JobStatus::derive(started_at, completed_at, error.as_deref()),
    };

    let created_at = parse_opt(id, map, F_CREATED_AT)?.unwrap_or_default();
    let max_retries: u32 = parse_opt(id, map, F_MAX_RETRIES)?.unwrap_or(0);
    let retry_count: u32 = parse_opt(id, map, F_RETRY_COUNT)?.unwrap_or(0);

    Ok(Job {
        id: map.get(F_ID).cloned().unwrap_or_else(|| id.to_string()),
        job_type,
        data,
        priority: parse_opt(id, map, F_PRIORITY)?.unwrap_or(0),
        max_retries,
        retry_count: retry_count.min(max_retries),
        status,
        created_at,
        updated_at: parse_opt(id, map, F_UPDATED_AT)?.unwrap_or(created_at),
        started_at,
        completed_at,
        retry_at: parse_opt(id, map, F_RETRY_AT)?,
        error,
        worker_id: map.get(F_WORKER_ID).cloned(),
    })
}

fn parse_opt<T: FromStr>(id: &str, map: &HashMap<String, String>, field: &str) -> Result<Option<T>> {
    match map.get(field) {
        None => Ok(None),
        Some(raw) if raw.is_empty() => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| QueueError::malformed(id, format!("field '{field}' has invalid value '{raw}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobOptions;
    use serde_json::json;

    fn to_map(fields: Fields) -> HashMap<String, String> {
        fields.into_iter().collect()
    }

    #[test]
    fn decode_coerces_string_fields() {
        let job = Job::new(
            JobType::LinkProcessing,
            json!({"url": "https://a.example", "teamId": "T1"}),
            JobOptions::default().with_priority(5),
        );
        let map = to_map(encode_job(&job).unwrap());

        assert_eq!(map.get(F_PRIORITY).map(String::as_str), Some("5"));
        assert_eq!(map.get(F_TYPE).map(String::as_str), Some("link-processing"));
        assert!(!map.contains_key(F_STARTED_AT));

        let decoded = decode_job(&job.id, &map).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn legacy_record_without_status_is_derived() {
        let map = to_map(vec![
            (F_TYPE.into(), "link-processing".into()),
            (F_DATA.into(), "{}".into()),
            (F_PRIORITY.into(), "2".into()),
            (F_MAX_RETRIES.into(), "3".into()),
            (F_RETRY_COUNT.into(), "1".into()),
            (F_CREATED_AT.into(), "1000".into()),
            (F_STARTED_AT.into(), "2000".into()),
            (F_COMPLETED_AT.into(), "3000".into()),
            (F_ERROR.into(), "timeout".into()),
        ]);

        let job = decode_job("abc", &map).unwrap();
        assert_eq!(job.id, "abc");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.updated_at, 1000);
        assert_eq!(job.retry_count, 1);
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let map = to_map(vec![
            (F_TYPE.into(), "link-processing".into()),
            (F_PRIORITY.into(), "high".into()),
        ]);

        let err = decode_job("abc", &map).unwrap_err();
        assert!(matches!(err, QueueError::Malformed { ref id, .. } if id == "abc"));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let map = to_map(vec![(F_TYPE.into(), "transcode".into())]);
        assert!(matches!(
            decode_job("abc", &map),
            Err(QueueError::UnknownJobType(_))
        ));
    }
}
