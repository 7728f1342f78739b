//! lineport: line-oriented echo and command server
//!
//! Features:
//! - TCP and UDP on the same port, one event loop
//! - Echo of trimmed lines plus `/time`, `/stats`, `/help`, `/shutdown`
//! - Client cap and per-connection growable line buffers
//! - Configuration via CLI arguments or TOML file

use lineport::config::Config;
use lineport::runtime;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        max_clients = config.max_clients,
        buffer_size = config.client_buffer_size,
        "Starting lineport server"
    );

    match runtime::run(&config) {
        Ok(stats) => {
            info!(
                total_tcp_clients = stats.total_tcp_clients,
                total_udp_messages = stats.total_udp_messages,
                "Server exited cleanly"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}
