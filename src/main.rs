//! Streaming demo CLI
//!
//! Streams a synthetic test-pattern camera to an inference server and prints
//! the predictions it returns. A harness for the pipeline, not a UI.

use anyhow::Result;
use clap::Parser;
use sign_stream::{StreamConfig, StreamSession, TestPatternBackend};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "sign-stream")]
#[command(about = "Stream camera frames to a sign-language inference server")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Override the inference server URL
    #[arg(short, long)]
    server_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt().with_env_filter(filter).with_target(false).init();

    let mut config = if std::path::Path::new(&cli.config).exists() {
        info!(config_path = %cli.config, "Loading configuration");
        StreamConfig::load(&cli.config)?
    } else {
        info!("No config file found, using defaults");
        StreamConfig::default()
    };

    if let Some(url) = cli.server_url {
        config.server_url = url;
    }

    info!(
        server = %config.server_url,
        fps = config.frame_rate,
        resolution = %format!("{}x{}", config.width, config.height),
        "Starting stream session"
    );

    let backend = Arc::new(TestPatternBackend::new());
    let mut session = StreamSession::new(backend, config)?;

    session
        .connect(Arc::new(|prediction| {
            info!(
                letter = %prediction.letter,
                confidence = %format!("{:.2}", prediction.confidence),
                "Prediction"
            );
        }))
        .await?;

    info!("Streaming started, press Ctrl+C to stop");

    let mut stats_ticker = tokio::time::interval(std::time::Duration::from_secs(10));
    stats_ticker.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = stats_ticker.tick() => {
                let transport = session.transport_stats();
                if let Some(encoder) = session.encoder_stats() {
                    info!(
                        encoded = encoder.frames_encoded,
                        sent = transport.frames_sent,
                        predictions = transport.predictions_received,
                        skipped = encoder.ticks_skipped,
                        "Stats"
                    );
                }
                if !session.status().is_active() {
                    warn!(status = ?session.status(), "Stream is down, exiting");
                    break;
                }
            }
        }
    }

    info!("Shutting down");
    session.disconnect().await;

    Ok(())
}
