use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use linkqueue::job::{JobOptions, JobStatus, JobType};
use linkqueue::link::{LinkJobData, LinkProcessingHandler, LinkProcessor};
use linkqueue::runner::{JobOutcomeKind, StopReason};
use linkqueue::store::MemoryStore;
use linkqueue::{
    enqueue_link, HandlerRegistry, JobHandler, PermanentError, QueueClient, QueueConfig, Worker, WorkerOptions,
};

/// Behaves according to the `mode` field of the payload.
struct Scripted {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl JobHandler for Scripted {
    async fn perform(&self, data: &Value) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match data["mode"].as_str().unwrap_or("ok") {
            "ok" => Ok(()),
            "timeout" => anyhow::bail!("upstream request timed out"),
            "forbidden" => anyhow::bail!("403 forbidden"),
            "permanent" => Err(PermanentError::new("gateway timeout on a deleted message").into()),
            "panic" => panic!("handler exploded"),
            other => anyhow::bail!("unexpected mode {other}"),
        }
    }
}

fn setup(config: QueueConfig) -> (QueueClient, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = HandlerRegistry::new().register(JobType::LinkProcessing, Scripted { calls: calls.clone() });
    let client = QueueClient::new(Arc::new(MemoryStore::new()), Arc::new(registry), config);
    (client, calls)
}

async fn add(client: &QueueClient, mode: &str, priority: i64) -> String {
    client
        .add(
            JobType::LinkProcessing,
            json!({"url": "https://a.example", "mode": mode}),
            JobOptions::default().with_priority(priority),
        )
        .await
        .unwrap()
}

fn options(max_jobs: usize) -> WorkerOptions {
    WorkerOptions {
        max_jobs,
        timeout: Duration::from_secs(30),
        worker_id: "test-worker".into(),
    }
}

#[tokio::test]
async fn drains_queue_and_classifies_outcomes() {
    let (client, calls) = setup(QueueConfig::default());
    let ok = add(&client, "ok", 4).await;
    let timeout = add(&client, "timeout", 3).await;
    let forbidden = add(&client, "forbidden", 2).await;
    let permanent = add(&client, "permanent", 1).await;

    let summary = Worker::new(client.clone()).process_jobs(options(10)).await;

    assert_eq!(summary.stop_reason, StopReason::QueueEmpty);
    assert_eq!(summary.worker_id, "test-worker");
    assert_eq!(summary.processed, 4);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.retried, 1);
    assert_eq!(summary.failed, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    let ids: Vec<&str> = summary.jobs.iter().map(|j| j.job_id.as_str()).collect();
    assert_eq!(ids, vec![ok.as_str(), timeout.as_str(), forbidden.as_str(), permanent.as_str()]);
    assert_eq!(summary.jobs[1].outcome, JobOutcomeKind::Retrying);
    assert!(summary.jobs[1].error.as_deref().unwrap().contains("timed out"));
    assert!(summary.jobs[0].error.is_none());

    let status = client.get_status(&ok).await.unwrap().unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    let status = client.get_status(&timeout).await.unwrap().unwrap();
    assert_eq!(status.status, JobStatus::Retrying);
    assert_eq!(status.retry_count, 1);
    let status = client.get_status(&permanent).await.unwrap().unwrap();
    assert_eq!(status.status, JobStatus::Failed);

    let stats = client.get_stats().await.unwrap();
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.delayed, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 2);
}

#[tokio::test]
async fn stops_at_max_jobs() {
    let (client, _) = setup(QueueConfig::default());
    for _ in 0..5 {
        add(&client, "ok", 1).await;
    }

    let summary = Worker::new(client.clone()).process_jobs(options(2)).await;
    assert_eq!(summary.stop_reason, StopReason::MaxJobs);
    assert_eq!(summary.processed, 2);
    assert_eq!(client.get_stats().await.unwrap().pending, 3);
}

#[tokio::test]
async fn spent_budget_leaves_work_for_next_pass() {
    let (client, calls) = setup(QueueConfig::default());
    add(&client, "ok", 1).await;

    let summary = Worker::new(client.clone())
        .process_jobs(WorkerOptions {
            timeout: Duration::ZERO,
            ..options(10)
        })
        .await;
    assert_eq!(summary.stop_reason, StopReason::Timeout);
    assert_eq!(summary.processed, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(client.get_stats().await.unwrap().pending, 1);
}

#[tokio::test]
async fn panicking_handler_is_retried() {
    let (client, _) = setup(QueueConfig::default());
    let id = add(&client, "panic", 1).await;

    let summary = Worker::new(client.clone()).process_jobs(options(10)).await;
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.jobs[0].outcome, JobOutcomeKind::Retrying);
    assert!(summary.jobs[0].error.as_deref().unwrap().contains("handler exploded"));
    assert_eq!(client.get_status(&id).await.unwrap().unwrap().status, JobStatus::Retrying);
}

#[tokio::test]
async fn unregistered_type_fails_without_retry() {
    let client = QueueClient::new(
        Arc::new(MemoryStore::new()),
        Arc::new(HandlerRegistry::new()),
        QueueConfig::default(),
    );
    let id = add(&client, "ok", 1).await;

    let summary = Worker::new(client.clone()).process_jobs(options(10)).await;
    assert_eq!(summary.failed, 1);
    let status = client.get_status(&id).await.unwrap().unwrap();
    assert_eq!(status.status, JobStatus::Failed);
    assert!(status.error.unwrap().contains("no handler registered"));
}

#[tokio::test]
async fn retried_job_completes_on_later_pass() {
    let config = QueueConfig::default().with_retry_delays(Duration::from_millis(200), Duration::from_millis(200));
    let attempts = Arc::new(AtomicUsize::new(0));

    struct Flaky(Arc<AtomicUsize>);

    #[async_trait]
    impl LinkProcessor for Flaky {
        async fn process(&self, _link: &LinkJobData) -> anyhow::Result<()> {
            if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("connection reset by peer");
            }
            Ok(())
        }
    }

    let registry = HandlerRegistry::new().register(
        JobType::LinkProcessing,
        LinkProcessingHandler::new(Flaky(attempts.clone())),
    );
    let client = QueueClient::new(Arc::new(MemoryStore::new()), Arc::new(registry), config);
    let worker = Worker::new(client.clone());

    let id = enqueue_link(&client, LinkJobData::new("https://a.example")).await.unwrap();

    let first = worker.process_jobs(options(10)).await;
    assert_eq!(first.retried, 1);

    tokio::time::sleep(Duration::from_millis(250)).await;
    let second = worker.process_jobs(options(10)).await;
    assert_eq!(second.completed, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    let status = client.get_status(&id).await.unwrap().unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.retry_count, 1);
}

#[tokio::test]
async fn fallback_worker_is_a_no_op() {
    let client = QueueClient::fallback(Arc::new(HandlerRegistry::new()), QueueConfig::default());
    let summary = Worker::new(client).process_jobs(options(10)).await;
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.stop_reason, StopReason::QueueEmpty);
}
