//! # tidewatch
//!
//! Tidewatch binary: serves the hazard-reporting web app while it builds,
//! and can tail the realtime hazard feed from the terminal.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tidewatch_realtime::events::{CONNECTION_ERROR, CONNECTION_STATUS, SERVER_EVENTS};
use tidewatch_realtime::{EventClient, Listener, SocketIoConnector, TransportOptions};
use tidewatch_server::{BootstrapServer, ServerConfig, ShellBuildRunner};
use tidewatch_settings::{TidewatchSettings, load_settings_from_path, settings_path};

/// Tidewatch ocean hazard app tooling.
#[derive(Parser, Debug)]
#[command(name = "tidewatch", version, about = "Tidewatch bootstrap server and realtime feed client")]
struct Cli {
    /// Settings file (defaults to `$TIDEWATCH_SETTINGS` or `./tidewatch.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the web app, building it first if needed.
    Serve,
    /// Connect to the realtime server and log incoming events.
    Listen {
        /// Latitude of the location room to join.
        #[arg(long, requires = "lng", allow_negative_numbers = true)]
        lat: Option<f64>,
        /// Longitude of the location room to join.
        #[arg(long, requires = "lat", allow_negative_numbers = true)]
        lng: Option<f64>,
        /// Room radius (defaults to 10).
        #[arg(long)]
        radius: Option<f64>,
        /// Realtime endpoint, overriding settings.
        #[arg(long)]
        url: Option<String>,
    },
    /// Print the resolved settings as JSON.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = cli.settings.clone().unwrap_or_else(settings_path);
    let settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;

    match cli.command {
        Command::Config => {
            let json = serde_json::to_string_pretty(&settings)
                .context("Failed to serialize settings")?;
            println!("{json}");
            Ok(())
        }
        Command::Serve => serve(&settings).await,
        Command::Listen {
            lat,
            lng,
            radius,
            url,
        } => {
            let room = lat.zip(lng).map(|(lat, lng)| (lat, lng, radius));
            listen(&settings, url, room).await
        }
    }
}

async fn serve(settings: &TidewatchSettings) -> Result<()> {
    let _logging = tidewatch_logging::init_logging(&settings.logging);
    tracing::info!(api = %settings.api.base_url, "app will talk to API");

    let config = ServerConfig::from(&settings.server);
    let handle = BootstrapServer::start(config, Arc::new(ShellBuildRunner))
        .await
        .context("Failed to start bootstrap server")?;
    tracing::info!(
        addr = %handle.local_addr(),
        status = %handle.readiness().status(),
        "tidewatch server ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;
    tracing::info!("Shutting down");
    Ok(())
}

fn log_listener(event: &'static str) -> Listener {
    Listener::new(move |data: &Value| tracing::info!(event, %data, "realtime event"))
}

async fn listen(
    settings: &TidewatchSettings,
    url: Option<String>,
    room: Option<(f64, f64, Option<f64>)>,
) -> Result<()> {
    let _logging = tidewatch_logging::init_logging(&settings.logging);
    let endpoint = url.unwrap_or_else(|| settings.realtime.url.clone());

    let client = Arc::new(EventClient::new(
        SocketIoConnector,
        TransportOptions::from(&settings.realtime),
    ));

    for event in SERVER_EVENTS {
        let _ = client.on(event, log_listener(event));
    }
    let _ = client.on(
        CONNECTION_ERROR,
        Listener::new(|data: &Value| tracing::warn!(%data, "realtime connection error")),
    );

    let weak: Weak<EventClient<SocketIoConnector>> = Arc::downgrade(&client);
    let _ = client.on(
        CONNECTION_STATUS,
        Listener::new(move |data: &Value| {
            let connected = data["connected"].as_bool().unwrap_or(false);
            tracing::info!(connected, "realtime connection status");
            if let (true, Some((lat, lng, radius)), Some(client)) = (connected, room, weak.upgrade())
            {
                let _ = client.join_location_room(lat, lng, radius);
            }
        }),
    );

    client.connect(&endpoint);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;
    client.disconnect();
    tracing::info!("Shutting down");
    Ok(())
}
