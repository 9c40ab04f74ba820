//! socks: a TCP acknowledgment server and its client pool
//!
//! Two modes:
//! - `server` (default): accept connections forever, read one message per
//!   connection, reply `Message received.` and keep a running total
//! - `client`: launch a pool of workers that each dial the server (retrying
//!   until it is up), send `Hello from client` and read the reply
//!
//! Configuration via CLI arguments or TOML file.

mod client;
mod config;
mod protocol;
mod server;
mod tracker;

use config::{Command, Config};
use server::Server;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match config.command {
        Command::Server => run_server(config).await,
        Command::Client => run_client(config).await,
    }
}

async fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        address = %config.address,
        backlog = config.backlog,
        buffer_size = config.buffer_size,
        "Starting socks server"
    );

    let server = Server::new(config);
    if let Err(e) = server.run().await {
        error!(error = %e, "Error starting server");
        return Err(e.into());
    }
    Ok(())
}

async fn run_client(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        address = %config.address,
        max_clients = config.max_clients,
        retry_delay = ?config.retry_delay,
        "Starting socks client pool"
    );

    client::run_pool(&config).await;
    Ok(())
}
