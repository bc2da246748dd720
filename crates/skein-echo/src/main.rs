//! # skein-echo
//!
//! Echo server for exercising every skein transport from a browser client.
//!
//! - `/echo`: replies with each message it receives
//! - `/close`: closes every session with "Go away!" as soon as it opens

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use skein_core::{BoxError, CloseStatus};
use skein_server::{MessageHandler, Session, SkeinServer};
use skein_settings::{LoggingSettings, SkeinSettings};
use tokio::net::TcpListener;
use tracing::info;

/// skein echo server.
#[derive(Parser, Debug)]
#[command(name = "skein-echo", about = "skein echo server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `$SKEIN_SETTINGS` or `./skein.json`).
    #[arg(long)]
    settings: Option<PathBuf>,
}

impl Cli {
    fn load_settings(&self) -> Result<SkeinSettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(skein_settings::settings_path);
        let mut settings = skein_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        Ok(settings)
    }
}

struct Echo;

#[async_trait]
impl MessageHandler for Echo {
    async fn on_message(&self, session: &Arc<Session>, message: String) -> Result<(), BoxError> {
        session.send(message)?;
        Ok(())
    }
}

struct Close;

#[async_trait]
impl MessageHandler for Close {
    async fn on_open(&self, session: &Arc<Session>) -> Result<(), BoxError> {
        session.close(CloseStatus::GO_AWAY).await?;
        Ok(())
    }

    async fn on_message(&self, _session: &Arc<Session>, _message: String) -> Result<(), BoxError> {
        Ok(())
    }
}

fn init_logging(logging: &LoggingSettings) {
    if logging.json {
        skein_core::logging::init_json_subscriber(&logging.level);
    } else {
        skein_core::logging::init_subscriber(&logging.level);
    }
}

fn build_server(settings: SkeinSettings) -> Result<SkeinServer> {
    SkeinServer::builder(settings)
        .mount("/echo", Arc::new(Echo))
        .mount("/close", Arc::new(Close))
        .build()
        .context("Invalid server configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;
    init_logging(&settings.logging);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let server = Arc::new(build_server(settings)?);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    let addr = server.spawn(listener).context("Failed to start server")?;
    info!("skein echo server listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("Shutting down...");
    server.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}
