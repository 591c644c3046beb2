// src/link.rs
//
// The one job type the queue carries today: a link shared in a chat channel
// that has to be fetched, summarized and narrated.

use std::process::Stdio;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::Result;
use crate::job::{JobOptions, JobType};
use crate::queue::QueueClient;
use crate::registry::JobHandler;
use crate::retry::PermanentError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkJobData {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
}

impl LinkJobData {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            message_id: None,
            channel_id: None,
            team_id: None,
        }
    }
}

/// Does the actual fetch / summarize / narrate work for one link.
#[async_trait]
pub trait LinkProcessor: Send + Sync {
    async fn process(&self, link: &LinkJobData) -> anyhow::Result<()>;
}

/// Adapts a [`LinkProcessor`] to the queue's [`JobHandler`] interface.
pub struct LinkProcessingHandler<P> {
    processor: P,
}

impl<P: LinkProcessor> LinkProcessingHandler<P> {
    pub fn new(processor: P) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl<P: LinkProcessor> JobHandler for LinkProcessingHandler<P> {
    async fn perform(&self, data: &serde_json::Value) -> anyhow::Result<()> {
        // a payload that does not parse will not parse on retry either
        let link: LinkJobData = serde_json::from_value(data.clone())
            .map_err(|e| PermanentError::new(format!("invalid link payload: {e}")))?;
        self.processor.process(&link).await
    }
}

/// Hands each link to an external command, payload JSON on stdin.
///
/// A non-zero exit is an error carrying the command's stderr, so the usual
/// retry classification applies to whatever the command printed.
#[derive(Debug, Clone)]
pub struct CommandProcessor {
    command: String,
}

impl CommandProcessor {
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into() }
    }
}

#[async_trait]
impl LinkProcessor for CommandProcessor {
    async fn process(&self, link: &LinkJobData) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(link)?;
        debug!(command = %self.command, url = %link.url, "running link processor");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start processor command '{}'", self.command))?;

        // the exit status decides the outcome, even if the command never read stdin
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(err) = stdin.write_all(&payload).await {
                debug!(error = %err, "processor did not consume its payload");
            }
        }

        let output = child.wait_with_output().await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(anyhow!(
            "processor exited with {}: {}",
            output.status,
            stderr.trim()
        ))
    }
}

/// Producer entry point: queue a shared link at the default priority.
pub async fn enqueue_link(client: &QueueClient, link: LinkJobData) -> Result<String> {
    let data = serde_json::to_value(&link)?;
    client
        .add(JobType::LinkProcessing, data, JobOptions::default())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::is_retryable;
    use serde_json::json;

    struct Accept;

    #[async_trait]
    impl LinkProcessor for Accept {
        async fn process(&self, link: &LinkJobData) -> anyhow::Result<()> {
            anyhow::ensure!(link.url.starts_with("https://"), "not https");
            Ok(())
        }
    }

    #[test]
    fn payload_uses_camel_case() {
        let mut link = LinkJobData::new("https://a.example");
        link.channel_id = Some("C1".into());
        assert_eq!(
            serde_json::to_value(&link).unwrap(),
            json!({"url": "https://a.example", "channelId": "C1"})
        );
    }

    #[tokio::test]
    async fn handler_parses_payload() {
        let handler = LinkProcessingHandler::new(Accept);
        handler.perform(&json!({"url": "https://a.example"})).await.unwrap();
        assert!(handler.perform(&json!({"url": "http://a.example"})).await.is_err());
    }

    #[tokio::test]
    async fn bad_payload_is_permanent() {
        let handler = LinkProcessingHandler::new(Accept);
        let err = handler.perform(&json!({"href": "https://a.example"})).await.unwrap_err();
        assert!(!is_retryable(&err));
    }

    #[tokio::test]
    async fn command_processor_reports_exit_status() {
        let link = LinkJobData::new("https://a.example");

        CommandProcessor::new("cat > /dev/null").process(&link).await.unwrap();

        let err = CommandProcessor::new("echo 'upstream timeout' >&2; exit 3")
            .process(&link)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("upstream timeout"));
        assert!(is_retryable(&err));
    }
}
