// src/config.rs
use std::env;
use std::time::Duration;

use tracing::warn;

use crate::utils::constants::{
    BASE_RETRY_DELAY_MS, FAILURE_RATIO_THRESHOLD, LEASE_DURATION_MS, MAX_RETRY_DELAY_MS,
    PROCESSING_HEALTH_THRESHOLD, REDIS_URL_ENV,
};

pub const LEASE_SECS_ENV: &str = "LINKQUEUE_LEASE_SECS";
pub const WORKER_USER_ENV: &str = "LINKQUEUE_WORKER_USER";
pub const WORKER_PASSWORD_ENV: &str = "LINKQUEUE_WORKER_PASSWORD";
pub const PROCESSOR_CMD_ENV: &str = "LINKQUEUE_PROCESSOR_CMD";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicAuthConfig {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueueConfig {
    /// Store connection string; `None` runs every job inline.
    pub redis_url: Option<String>,
    /// How long a claimed job may run before `cleanup` considers it abandoned.
    pub lease_duration: Duration,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// `get_stats` reports unhealthy at or above this many in-flight jobs.
    pub processing_health_threshold: u64,
    /// Health check flags `failed > completed * ratio`.
    pub failure_ratio_threshold: f64,
    /// Credentials required by the HTTP worker routes, if any.
    pub basic_auth: Option<BasicAuthConfig>,
    /// External command invoked for link-processing jobs by the CLI.
    pub processor_command: Option<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            lease_duration: Duration::from_millis(LEASE_DURATION_MS as u64),
            retry_base_delay: Duration::from_millis(BASE_RETRY_DELAY_MS),
            retry_max_delay: Duration::from_millis(MAX_RETRY_DELAY_MS),
            processing_health_threshold: PROCESSING_HEALTH_THRESHOLD,
            failure_ratio_threshold: FAILURE_RATIO_THRESHOLD,
            basic_auth: None,
            processor_command: None,
        }
    }
}

impl QueueConfig {
    /// Reads configuration from the process environment, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        config.redis_url = lookup(REDIS_URL_ENV).filter(|url| !url.trim().is_empty());

        if let Some(raw) = lookup(LEASE_SECS_ENV) {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => config.lease_duration = Duration::from_secs(secs),
                _ => warn!(value = %raw, "ignoring invalid {LEASE_SECS_ENV}"),
            }
        }

        if let (Some(username), Some(password)) = (lookup(WORKER_USER_ENV), lookup(WORKER_PASSWORD_ENV)) {
            config.basic_auth = Some(BasicAuthConfig { username, password });
        }

        config.processor_command = lookup(PROCESSOR_CMD_ENV).filter(|cmd| !cmd.trim().is_empty());
        config
    }

    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self
    }

    pub fn with_retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_delay = base;
        self.retry_max_delay = max;
        self
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some(BasicAuthConfig {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_processor_command(mut self, command: impl Into<String>) -> Self {
        self.processor_command = Some(command.into());
        self
    }

    pub fn has_store(&self) -> bool {
        self.redis_url.is_some()
    }
}
