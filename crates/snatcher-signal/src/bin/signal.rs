//! StreamSnatcher Signal Server
//!
//! WebSocket signaling relay for WebRTC peer discovery.
//!
//! # Usage
//!
//! ```bash
//! # Defaults (port 8080, config from the platform config dir)
//! snatcher-signal
//!
//! # Explicit port and config file
//! snatcher-signal --port 9000 --config /etc/snatcher/config.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use snatcher_core::Config;
use snatcher_signal::SignalServer;

#[derive(Parser, Debug)]
#[command(name = "snatcher-signal")]
#[command(about = "StreamSnatcher signaling server for WebRTC peer discovery")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Configuration file path (defaults to the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = &args.bind {
        config.server.bind = bind.parse()?;
    }

    let addr = SocketAddr::new(config.server.bind, config.server.port);

    info!("Starting StreamSnatcher Signal Server");
    info!("Listening on {}", addr);
    info!("Base URL: {}", config.server.base_url);
    info!("Max peers per session: {}", config.session.max_peers);

    let server = SignalServer::new(config);
    server.serve(addr).await?;

    Ok(())
}
