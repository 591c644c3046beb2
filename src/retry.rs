// src/retry.rs
use std::time::Duration;

use thiserror::Error;

/// Exponential backoff between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self { base_delay, max_delay }
    }

    /// Delay before the attempt following failure number `retry_count`
    /// (1-based): `min(base * 2^(retry_count - 1), max)`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Marks a handler error as not worth retrying, whatever its message says.
///
/// ```ignore
/// return Err(PermanentError::new("url points at a private network").into());
/// ```
#[derive(Debug, Error)]
#[error("{0}")]
pub struct PermanentError(String);

impl PermanentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

const RETRYABLE_PHRASES: &[&str] = &[
    "timeout",
    "timed out",
    "network",
    "connection",
    "econnreset",
    "econnrefused",
    "enotfound",
    "socket hang up",
    "rate limit",
    "ratelimit",
    "too many requests",
    "temporarily unavailable",
    "database",
    "deadlock",
];

const RETRYABLE_STATUS_CODES: &[&str] = &["429", "502", "503", "504"];

const PERMANENT_PHRASES: &[&str] = &[
    "unauthorized",
    "forbidden",
    "invalid_auth",
    "invalid auth",
    "not_authed",
    "authentication failed",
];

const PERMANENT_STATUS_CODES: &[&str] = &["401", "403"];

/// Decides whether a failed job should be retried.
///
/// An explicit [`PermanentError`] anywhere in the chain wins. Otherwise the
/// message is matched against known transient and auth failure phrases;
/// anything unrecognized is retried.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    if err.chain().any(|cause| cause.is::<PermanentError>()) {
        return false;
    }
    is_retryable_message(&format!("{err:#}"))
}

/// URLs are ignored and status codes only count as standalone numbers, so a
/// link like `/story/14013` is not read as a 401.
pub fn is_retryable_message(message: &str) -> bool {
    let message = without_urls(&message.to_lowercase());
    if matches_any(&message, RETRYABLE_PHRASES, RETRYABLE_STATUS_CODES) {
        return true;
    }
    if matches_any(&message, PERMANENT_PHRASES, PERMANENT_STATUS_CODES) {
        return false;
    }
    true
}

fn without_urls(message: &str) -> String {
    message
        .split_whitespace()
        .filter(|word| !word.contains("://"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn matches_any(message: &str, phrases: &[&str], codes: &[&str]) -> bool {
    phrases.iter().any(|p| message.contains(p))
        || message
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|token| codes.contains(&token))
}
