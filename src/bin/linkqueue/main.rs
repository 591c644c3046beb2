// src/bin/linkqueue/main.rs
use std::process;

use anyhow::Result;
use clap::{Arg, ArgAction, Command};

mod commands;
use commands::*;

#[tokio::main]
async fn main() -> Result<()> {
    linkqueue::logging::init_logging();

    let app = Command::new("linkqueue")
        .version(env!("CARGO_PKG_VERSION"))
        .about("linkqueue - priority job queue for shared-link processing")
        .subcommand(
            Command::new("work")
                .about("Drain the queue with a bounded worker pass")
                .arg(Arg::new("max_jobs")
                    .short('n')
                    .long("max-jobs")
                    .value_name("NUMBER")
                    .help("Maximum jobs handled per pass")
                    .value_parser(clap::value_parser!(usize))
                    .default_value("10"))
                .arg(Arg::new("timeout")
                    .short('t')
                    .long("timeout")
                    .value_name("MILLIS")
                    .help("Time budget per pass in milliseconds")
                    .value_parser(clap::value_parser!(u64))
                    .default_value("50000"))
                .arg(Arg::new("worker_id")
                    .short('w')
                    .long("worker-id")
                    .value_name("ID")
                    .help("Worker id recorded on claimed jobs"))
                .arg(Arg::new("interval")
                    .short('i')
                    .long("interval")
                    .value_name("SECONDS")
                    .help("Keep running, one pass (plus cleanup) every N seconds")
                    .value_parser(clap::value_parser!(u64)))
        )
        .subcommand(
            Command::new("serve")
                .about("Serve the worker and queue HTTP routes")
                .arg(Arg::new("bind")
                    .short('b')
                    .long("bind")
                    .value_name("HOST:PORT")
                    .help("Address to bind")
                    .default_value("127.0.0.1:8080"))
        )
        .subcommand(
            Command::new("enqueue")
                .about("Queue a link for processing")
                .arg(Arg::new("url")
                    .help("Link to process")
                    .required(true))
                .arg(Arg::new("message_id")
                    .long("message-id")
                    .value_name("ID"))
                .arg(Arg::new("channel_id")
                    .long("channel-id")
                    .value_name("ID"))
                .arg(Arg::new("team_id")
                    .long("team-id")
                    .value_name("ID"))
                .arg(Arg::new("priority")
                    .short('p')
                    .long("priority")
                    .value_name("NUMBER")
                    .help("Higher runs first")
                    .value_parser(clap::value_parser!(i64))
                    .default_value("1"))
                .arg(Arg::new("max_retries")
                    .short('r')
                    .long("max-retries")
                    .value_name("NUMBER")
                    .value_parser(clap::value_parser!(u32))
                    .default_value("3"))
        )
        .subcommand(
            Command::new("stats")
                .about("Show queue statistics")
                .arg(Arg::new("json")
                    .long("json")
                    .help("Print raw JSON")
                    .action(ArgAction::SetTrue))
        )
        .subcommand(
            Command::new("status")
                .about("Show the status of one job")
                .arg(Arg::new("job_id")
                    .help("Job id")
                    .required(true))
        )
        .subcommand(Command::new("cleanup").about("Recover expired leases and promote due retries"))
        .subcommand(Command::new("health").about("Check queue health"));

    let matches = app.get_matches();

    match matches.subcommand() {
        Some(("work", sub_matches)) => work_command(sub_matches).await,
        Some(("serve", sub_matches)) => serve_command(sub_matches).await,
        Some(("enqueue", sub_matches)) => enqueue_command(sub_matches).await,
        Some(("stats", sub_matches)) => stats_command(sub_matches).await,
        Some(("status", sub_matches)) => status_command(sub_matches).await,
        Some(("cleanup", _)) => cleanup_command().await,
        Some(("health", _)) => health_command().await,
        _ => {
            println!("No command specified. Use --help for usage information.");
            process::exit(1);
        }
    }
}
