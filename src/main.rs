use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

use tradewire::application::system::Application;
use tradewire::config::Config;

/// Real-time equity trading decision engine (paper execution only).
#[derive(Debug, Parser)]
#[command(name = "tradewire", version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Evaluate each symbol once and exit.
    #[arg(long)]
    oneshot: Option<bool>,

    /// Wire transport mode: "poll" or "sse".
    #[arg(long)]
    wire_mode: Option<String>,

    /// Wire stream base URL.
    #[arg(long)]
    wire_url: Option<String>,

    /// Stop ingesting after this many events.
    #[arg(long)]
    max_events: Option<u64>,

    /// Stop ingesting after this many seconds.
    #[arg(long)]
    duration_seconds: Option<u64>,

    /// Earnings calendar file (JSON array).
    #[arg(long)]
    earnings: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    let args = Args::parse();

    let mut config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            // Config problems are fatal; exit with an explicit message.
            eprintln!("tradewire: configuration error: {:#}", e);
            std::process::exit(2);
        }
    };

    if let Some(oneshot) = args.oneshot {
        config.oneshot = oneshot;
    }
    if let Some(mode) = args.wire_mode {
        config.transport.mode = mode;
    }
    if let Some(url) = args.wire_url {
        config.transport.base_url = url;
    }
    if let Some(max_events) = args.max_events {
        config.transport.max_events = Some(max_events);
    }
    if let Some(duration) = args.duration_seconds {
        config.transport.duration_seconds = Some(duration);
    }
    if let Some(earnings) = args.earnings {
        config.earnings_path = Some(earnings.display().to_string());
    }

    info!(
        "tradewire {} starting (mode={}, oneshot={}, {} symbols)",
        env!("CARGO_PKG_VERSION"),
        config.trading_mode,
        config.oneshot,
        config.symbols.len()
    );
    if config.slack_enabled {
        info!("tradewire: Slack notifications are handled by an external notifier");
    }

    let app = Application::build(config).await?;
    app.run().await?;

    Ok(())
}
