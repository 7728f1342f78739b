//! lineport-stress: concurrent TCP load generator for lineport.
//!
//! Usage: `lineport-stress <host> <port> <connections> <messages>`

use clap::builder::RangedU64ValueParser;
use clap::Parser;
use lineport::loadgen::{self, LoadConfig};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Drive a lineport server with synthetic traffic
#[derive(Parser, Debug)]
#[command(name = "lineport-stress")]
#[command(about = "Open many connections to a lineport server and send requests")]
struct Args {
    /// Server host
    host: String,

    /// Server port
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,

    /// Number of concurrent connections
    #[arg(value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    connections: usize,

    /// Requests sent on each connection
    #[arg(value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    messages: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = LoadConfig {
        host: args.host,
        port: args.port,
        connections: args.connections,
        messages: args.messages,
    };

    info!(
        host = %config.host,
        port = config.port,
        connections = config.connections,
        messages = config.messages,
        "Starting load run"
    );

    match loadgen::run(&config).await {
        Ok(summary) => {
            info!(
                completed = summary.completed(),
                failed_connects = summary.failed_connects,
                requests = summary.total_requests(),
                responses = summary.total_responses(),
                echo_mismatches = summary.echo_mismatches(),
                elapsed_ms = summary.elapsed.as_millis() as u64,
                "Load run finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Load run failed");
            ExitCode::FAILURE
        }
    }
}
