// src/registry.rs
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;

use crate::job::JobType;

/// Executes the payload of one job type.
///
/// Handlers may run more than once for the same job (lease expiry and retries
/// both redeliver), so `perform` must tolerate duplicate execution.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn perform(&self, data: &serde_json::Value) -> anyhow::Result<()>;
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, job_type: JobType, handler: impl JobHandler + 'static) -> Self {
        self.handlers.insert(job_type, Arc::new(handler));
        self
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&job_type).cloned()
    }

    pub fn is_registered(&self, job_type: JobType) -> bool {
        self.handlers.contains_key(&job_type)
    }

    pub async fn dispatch(&self, job_type: JobType, data: &serde_json::Value) -> anyhow::Result<()> {
        match self.get(job_type) {
            Some(handler) => handler.perform(data).await,
            None => Err(anyhow!("no handler registered for job type '{job_type}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl JobHandler for Counting {
        async fn perform(&self, _data: &serde_json::Value) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatches_to_registered_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = HandlerRegistry::new().register(JobType::LinkProcessing, Counting(calls.clone()));

        assert!(registry.is_registered(JobType::LinkProcessing));
        registry
            .dispatch(JobType::LinkProcessing, &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_handler_is_an_error() {
        let registry = HandlerRegistry::new();
        let err = registry
            .dispatch(JobType::LinkProcessing, &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("link-processing"));
    }
}
