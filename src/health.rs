// src/health.rs
use serde::Serialize;

use crate::config::QueueConfig;

/// Queue cardinalities and lifetime counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    /// Jobs waiting out a retry backoff.
    pub delayed: u64,
    pub added: u64,
    pub completed: u64,
    pub failed: u64,
    pub healthy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueMode {
    Store,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthThresholds {
    pub max_processing: u64,
    pub max_failure_ratio: f64,
}

impl From<&QueueConfig> for HealthThresholds {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_processing: config.processing_health_threshold,
            max_failure_ratio: config.failure_ratio_threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub mode: QueueMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<QueueStats>,
    pub issues: Vec<String>,
    pub checked_at: i64,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Combines what the client could learn about the store into one report.
///
/// `stats` is `Err` when the store could not be read; that alone makes the
/// queue unhealthy. Fallback mode is degraded: work still runs, but without
/// ordering or retries.
pub fn assess(
    mode: QueueMode,
    stats: Result<QueueStats, String>,
    thresholds: HealthThresholds,
    checked_at: i64,
) -> HealthReport {
    let mut issues = Vec::new();
    let mut status = HealthStatus::Healthy;

    if mode == QueueMode::Fallback {
        status = HealthStatus::Degraded;
        issues.push("queue store not configured; jobs run inline without retries".to_string());
    }

    let stats = match stats {
        Ok(stats) => Some(stats),
        Err(reason) => {
            status = HealthStatus::Unhealthy;
            issues.push(format!("queue store unreachable: {reason}"));
            None
        }
    };

    if let Some(stats) = &stats {
        if stats.processing >= thresholds.max_processing {
            status = HealthStatus::Unhealthy;
            issues.push(format!(
                "{} jobs processing (threshold {})",
                stats.processing, thresholds.max_processing
            ));
        }
        if stats.failed as f64 > stats.completed as f64 * thresholds.max_failure_ratio {
            if status == HealthStatus::Healthy {
                status = HealthStatus::Degraded;
            }
            issues.push(format!(
                "high failure rate: {} failed vs {} completed",
                stats.failed, stats.completed
            ));
        }
    }

    HealthReport {
        status,
        mode,
        stats,
        issues,
        checked_at,
    }
}
