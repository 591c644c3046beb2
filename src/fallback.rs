// src/fallback.rs
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::job::{fallback_job_id, JobType};
use crate::registry::HandlerRegistry;

/// Runs jobs inline when there is no queue store to put them in.
///
/// No ordering, no retries, nothing persisted: the handler is spawned and the
/// caller gets a synthesized id straight back. Failures are only logged.
#[derive(Clone)]
pub struct FallbackExecutor {
    registry: Arc<HandlerRegistry>,
}

impl FallbackExecutor {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    /// Spawns the handler for `job_type` without awaiting it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn execute(&self, job_type: JobType, data: serde_json::Value) -> String {
        let job_id = fallback_job_id();
        warn!(%job_id, %job_type, "queue store unavailable, running job inline");

        let registry = self.registry.clone();
        let span_id = job_id.clone();
        tokio::spawn(async move {
            match registry.dispatch(job_type, &data).await {
                Ok(()) => info!(job_id = %span_id, %job_type, "inline job finished"),
                Err(err) => error!(job_id = %span_id, %job_type, error = %format!("{err:#}"), "inline job failed"),
            }
        });

        job_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::JobHandler;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Forward(mpsc::UnboundedSender<serde_json::Value>);

    #[async_trait]
    impl JobHandler for Forward {
        async fn perform(&self, data: &serde_json::Value) -> anyhow::Result<()> {
            self.0.send(data.clone())?;
            anyhow::bail!("failures stay inside the executor")
        }
    }

    #[tokio::test]
    async fn runs_handler_in_background() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = HandlerRegistry::new().register(JobType::LinkProcessing, Forward(tx));
        let executor = FallbackExecutor::new(Arc::new(registry));

        let id = executor.execute(JobType::LinkProcessing, serde_json::json!({"url": "https://a.example"}));
        assert!(id.starts_with("job:"));

        let seen = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen["url"], "https://a.example");
    }
}
