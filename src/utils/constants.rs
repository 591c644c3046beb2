pub const JOB_KEY_PREFIX: &str = "job";
pub const PENDING_QUEUE_KEY: &str = "queue:pending";
pub const PROCESSING_QUEUE_KEY: &str = "queue:processing";
pub const DELAYED_QUEUE_KEY: &str = "queue:delayed";

pub const STATS_ADDED_KEY: &str = "stats:jobs:added";
pub const STATS_COMPLETED_KEY: &str = "stats:jobs:completed";
pub const STATS_FAILED_KEY: &str = "stats:jobs:failed";

pub const DEFAULT_PRIORITY: i64 = 1;
pub const MAX_RETRIES: u32 = 3;
pub const LEASE_DURATION_MS: i64 = 5 * 60 * 1000;

pub const BASE_RETRY_DELAY_MS: u64 = 1_000;
pub const MAX_RETRY_DELAY_MS: u64 = 60_000;

pub const PROCESSING_HEALTH_THRESHOLD: u64 = 100;
pub const FAILURE_RATIO_THRESHOLD: f64 = 0.1;

pub const DEFAULT_MAX_JOBS: usize = 10;
pub const DEFAULT_WORKER_TIMEOUT_MS: u64 = 50_000;
pub const MAX_SAFETY_BUFFER_MS: u64 = 30_000;

pub const REDIS_URL_ENV: &str = "REDIS_URL";

/// Hash key holding the record for `id`.
pub fn job_key(id: &str) -> String {
    format!("{JOB_KEY_PREFIX}:{id}")
}
