/// Wyoming wake-word service binary
///
/// Serves the configured hotwords over the Wyoming protocol.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use wyoming_wakeword::{init_logging, LogFormat, ServerUri, ServiceConfig, WakeWordServer};

#[derive(Parser, Debug)]
#[command(name = "wyoming-wakeword")]
#[command(about = "Wyoming server for configurable wake-word detectors", long_about = None)]
struct Cli {
    /// unix:// or tcp:// or stdio://
    #[arg(long, default_value = "stdio://")]
    uri: String,

    /// JSON configuration file (falls back to WAKEWORD_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log DEBUG messages
    #[arg(long)]
    debug: bool,

    /// Format for log messages
    #[arg(long, value_enum, default_value_t = LogFormat::Full)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug, cli.log_format);
    debug!("{:?}", cli);

    let uri = ServerUri::parse(&cli.uri)?;

    let config = ServiceConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;
    info!(
        "Loaded {} hotword(s), default wake word: {}",
        config.hotwords.len(),
        config.listener.wake_word
    );

    let server = WakeWordServer::new(Arc::new(config));
    info!("Ready");

    tokio::select! {
        result = server.run(&uri) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
