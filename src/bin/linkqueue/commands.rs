// src/bin/linkqueue/commands.rs
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::ArgMatches;
use colored::*;
use tokio::signal;
use tokio::time::interval;

use linkqueue::job::{JobOptions, JobType};
use linkqueue::link::{CommandProcessor, LinkJobData, LinkProcessingHandler};
use linkqueue::routes::serve;
use linkqueue::runner::{StopReason, Worker, WorkerOptions, WorkerSummary};
use linkqueue::{HandlerRegistry, HealthStatus, QueueClient, QueueConfig};

fn build_registry(config: &QueueConfig) -> HandlerRegistry {
    match &config.processor_command {
        Some(command) => HandlerRegistry::new().register(
            JobType::LinkProcessing,
            LinkProcessingHandler::new(CommandProcessor::new(command.clone())),
        ),
        None => {
            tracing::warn!("no processor command configured, link jobs will fail");
            HandlerRegistry::new()
        }
    }
}

async fn connect() -> QueueClient {
    let config = QueueConfig::from_env();
    let registry = Arc::new(build_registry(&config));
    QueueClient::connect(registry, config).await
}

async fn connect_store() -> Result<QueueClient> {
    let client = connect().await;
    if client.is_fallback() {
        bail!("no queue store available (set REDIS_URL)");
    }
    Ok(client)
}

fn print_summary(summary: &WorkerSummary) {
    let reason = match summary.stop_reason {
        StopReason::QueueEmpty => "queue empty".green(),
        StopReason::MaxJobs => "max jobs reached".yellow(),
        StopReason::Timeout => "time budget spent".yellow(),
        StopReason::StoreError => "store error".red(),
    };
    println!(
        "{} processed {} ({} completed, {} retrying, {} failed) in {}ms, stopped: {}",
        summary.worker_id.bold(),
        summary.processed,
        summary.completed.to_string().green(),
        summary.retried.to_string().yellow(),
        summary.failed.to_string().red(),
        summary.duration_ms,
        reason
    );
    for job in &summary.jobs {
        let line = format!("  • {} [{}] {:?} {}ms", job.job_id, job.job_type, job.outcome, job.duration_ms);
        match &job.error {
            Some(error) => println!("{} {}", line, error.red()),
            None => println!("{line}"),
        }
    }
}

pub async fn work_command(matches: &ArgMatches) -> Result<()> {
    let client = connect_store().await?;
    let worker = Worker::new(client.clone());

    let mut options = WorkerOptions::default();
    if let Some(max_jobs) = matches.get_one::<usize>("max_jobs") {
        options.max_jobs = *max_jobs;
    }
    if let Some(timeout) = matches.get_one::<u64>("timeout") {
        options.timeout = Duration::from_millis(*timeout);
    }
    if let Some(worker_id) = matches.get_one::<String>("worker_id") {
        options.worker_id = worker_id.clone();
    }

    let Some(every) = matches.get_one::<u64>("interval").copied() else {
        print_summary(&worker.process_jobs(options).await);
        return Ok(());
    };

    println!("{}", format!("Worker {} polling every {every}s. Press Ctrl+C to stop.", options.worker_id).green());
    let mut ticker = interval(Duration::from_secs(every.max(1)));
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                println!("\n{}", "Worker stopped.".yellow());
                return Ok(());
            }
            _ = ticker.tick() => {
                if let Err(err) = client.cleanup().await {
                    eprintln!("{} {err}", "cleanup failed:".red());
                }
                let summary = worker.process_jobs(options.clone()).await;
                if summary.processed > 0 || summary.stop_reason == StopReason::StoreError {
                    print_summary(&summary);
                }
            }
        }
    }
}

pub async fn serve_command(matches: &ArgMatches) -> Result<()> {
    let bind = matches
        .get_one::<String>("bind")
        .map(String::as_str)
        .unwrap_or("127.0.0.1:8080");
    let client = connect().await;
    println!("{} {}", "Serving queue routes on".green(), bind.bold());
    serve(client, bind).await.context("http server failed")
}

pub async fn enqueue_command(matches: &ArgMatches) -> Result<()> {
    let Some(url) = matches.get_one::<String>("url") else {
        bail!("a url is required");
    };
    let mut link = LinkJobData::new(url.clone());
    link.message_id = matches.get_one::<String>("message_id").cloned();
    link.channel_id = matches.get_one::<String>("channel_id").cloned();
    link.team_id = matches.get_one::<String>("team_id").cloned();

    let mut options = JobOptions::default();
    if let Some(priority) = matches.get_one::<i64>("priority") {
        options = options.with_priority(*priority);
    }
    if let Some(max_retries) = matches.get_one::<u32>("max_retries") {
        options = options.with_max_retries(*max_retries);
    }

    let client = connect().await;
    let data = serde_json::to_value(&link)?;

    // the process would exit before a spawned inline job finished
    if client.is_fallback() {
        println!("{}", "No queue store, processing inline...".yellow());
        client
            .registry()
            .dispatch(JobType::LinkProcessing, &data)
            .await
            .context("inline processing failed")?;
        println!("{}", "Processed.".green());
        return Ok(());
    }

    let job_id = client.add(JobType::LinkProcessing, data, options).await?;
    println!("{} {}", "Queued".green(), job_id.bold());
    Ok(())
}

pub async fn stats_command(matches: &ArgMatches) -> Result<()> {
    let client = connect_store().await?;
    let stats = client.get_stats().await?;

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{}", "Queue Statistics".blue().bold());
    println!("{}", "=".repeat(30).blue());
    println!("  Pending:    {}", stats.pending.to_string().yellow());
    println!("  Processing: {}", stats.processing.to_string().cyan());
    println!("  Delayed:    {}", stats.delayed.to_string().blue());
    println!("  Added:      {}", stats.added);
    println!("  Completed:  {}", stats.completed.to_string().green());
    println!("  Failed:     {}", stats.failed.to_string().red());
    let healthy = if stats.healthy { "yes".green() } else { "no".red() };
    println!("  Healthy:    {healthy}");
    Ok(())
}

pub async fn status_command(matches: &ArgMatches) -> Result<()> {
    let Some(job_id) = matches.get_one::<String>("job_id") else {
        bail!("a job id is required");
    };
    let client = connect_store().await?;
    match client.get_status(job_id).await? {
        Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
        None => {
            println!("{}", format!("Job {job_id} not found.").yellow());
        }
    }
    Ok(())
}

pub async fn cleanup_command() -> Result<()> {
    let client = connect_store().await?;
    let report = client.cleanup().await?;
    println!(
        "{} promoted {}, requeued {}, failed {}, orphaned {}, errors {}",
        "Cleanup:".blue().bold(),
        report.promoted,
        report.requeued,
        report.failed.to_string().red(),
        report.orphaned,
        report.errors
    );
    Ok(())
}

pub async fn health_command() -> Result<()> {
    let client = connect().await;
    let report = client.health_check().await;
    let status = match report.status {
        HealthStatus::Healthy => "healthy".green().bold(),
        HealthStatus::Degraded => "degraded".yellow().bold(),
        HealthStatus::Unhealthy => "unhealthy".red().bold(),
    };
    println!("Queue is {status} ({:?} mode)", report.mode);
    for issue in &report.issues {
        println!("  • {issue}");
    }
    if report.status == HealthStatus::Unhealthy {
        bail!("queue unhealthy");
    }
    Ok(())
}
