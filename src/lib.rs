//! Priority job queue for shared-link processing.
//!
//! Jobs live in a Redis-compatible store as a hash per job plus sorted sets
//! for pending, processing and delayed work. Workers claim jobs under a
//! lease, failures are retried with exponential backoff, and when no store is
//! configured jobs run inline through a fallback executor.

pub mod basic_auth;
pub mod config;
pub mod error;
pub mod fallback;
pub mod health;
pub mod job;
pub mod link;
pub mod logging;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod routes;
pub mod runner;
pub mod services;
pub mod store;
pub mod utils;

pub use config::{BasicAuthConfig, QueueConfig};
pub use error::{QueueError, Result};
pub use health::{HealthReport, HealthStatus, QueueMode, QueueStats};
pub use job::{Job, JobOptions, JobStatus, JobType};
pub use link::{enqueue_link, CommandProcessor, LinkJobData, LinkProcessingHandler, LinkProcessor};
pub use queue::{CleanupReport, FailOutcome, JobStatusReport, QueueClient};
pub use registry::{HandlerRegistry, JobHandler};
pub use retry::{is_retryable, PermanentError, RetryPolicy};
pub use runner::{Worker, WorkerOptions, WorkerSummary};
pub use store::{MemoryStore, RedisStore, Store};
