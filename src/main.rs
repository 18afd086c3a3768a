use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use campd::bootstrap::Server;
use campd::config::Config;
use campd::telemetry::{init_tracing, TracingConfig};

#[derive(Parser, Debug)]
#[command(name = "campd")]
#[command(author, version, about = "Time-windowed outbound campaign dispatcher")]
struct Args {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Validate config and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration first (to get log settings)
    let config = Config::load(&args.config)?;

    // Initialize tracing with config-based settings
    let tracing_config = TracingConfig {
        service_name: "campd".to_string(),
        log_level: config.telemetry.log_level.clone(),
        json_logs: config.telemetry.json_logs,
    };

    init_tracing(&tracing_config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "starting campd"
    );

    info!(queues = config.queues.len(), "configuration loaded");

    // Validate only mode
    if args.validate {
        info!("configuration is valid");
        return Ok(());
    }

    // Create and run server
    let server = Server::new(config)?;
    server.run().await?;

    Ok(())
}
