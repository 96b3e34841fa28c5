//! Stranger Relay - Entry Point
//!
//! Loads configuration, wires the collaborators, starts the ChatServer
//! actor and accepts connections.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use stranger_relay::{
    handle_connection, ChatServer, Config, CountryTable, EventRecorder, EventSink, GeoLocator,
    ImageHost, JsonLinesRecorder, NoGeoLocator, NoImageHost, Relay, TracingRecorder,
    UploadImageHost,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=stranger_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("stranger_relay=info")),
        )
        .init();

    let config = Config::from_env()?;

    let geo: Arc<dyn GeoLocator> = match &config.geo_table {
        Some(path) => {
            let table = CountryTable::load(path)?;
            info!("Loaded {} networks from {}", table.len(), path.display());
            Arc::new(table)
        }
        None => {
            warn!("No geolocation table configured; countries will be Unknown");
            Arc::new(NoGeoLocator)
        }
    };

    let images: Arc<dyn ImageHost> = match &config.image_upload_url {
        Some(url) => Arc::new(UploadImageHost::new(
            url.clone(),
            config.image_upload_preset.clone(),
            config.max_image_bytes,
        )),
        None => {
            warn!("No image host configured; images will be dropped");
            Arc::new(NoImageHost)
        }
    };

    let recorder: Arc<dyn EventRecorder> = match &config.event_log {
        Some(path) => Arc::new(JsonLinesRecorder::open(path).await?),
        None => Arc::new(TracingRecorder),
    };

    let listener = TcpListener::bind(&config.addr).await?;
    info!("Stranger relay listening on {}", config.addr);

    let events = EventSink::spawn(recorder);
    let server = ChatServer::spawn(config.command_buffer, geo, events);
    let relay = Relay::new(server.clone(), images);

    info!("ChatServer actor started");

    // Connection accept loop
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let server = server.clone();
                let relay = relay.clone();
                let outbound_buffer = config.outbound_buffer;

                // Spawn handler task for each connection
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, server, relay, outbound_buffer).await
                    {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
