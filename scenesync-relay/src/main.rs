//! Scenesync relay binary.
//!
//! Hosts one or more shared scene sessions:
//! - TCP control port for subscribe / unsubscribe / snapshot transfer
//! - UDP data port for operation datagrams
//! - a snapshot directory holding each session's canonical scene

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use log::info;
use scenesync_collab::config::{DEFAULT_CLIENT_PORT_BASE, DEFAULT_CONTROL_PORT, DEFAULT_DATA_PORT};
use scenesync_collab::{ServerConfig, SessionServer, DEFAULT_QUEUE_CAPACITY};

/// Relay command line arguments.
#[derive(Parser, Debug)]
#[command(name = "scenesync-relay")]
#[command(about = "Session server for collaborative 3D scene editing")]
struct Args {
    /// Interface to bind both sockets to
    #[arg(long, default_value = "127.0.0.1")]
    bind: IpAddr,

    /// TCP control port
    #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
    control_port: u16,

    /// UDP data port
    #[arg(long, default_value_t = DEFAULT_DATA_PORT)]
    data_port: u16,

    /// Directory holding session snapshots
    #[arg(long, value_name = "DIR", default_value = "./sessions")]
    storage: PathBuf,

    /// First port handed out to subscribing clients
    #[arg(long, default_value_t = DEFAULT_CLIENT_PORT_BASE)]
    client_port_base: u16,

    /// Processing tick period in milliseconds
    #[arg(long, default_value_t = 1000)]
    tick_ms: u64,

    /// Inbound/outbound queue capacity
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Seed an empty session with this name (repeatable)
    #[arg(long = "create", value_name = "SESSION")]
    create: Vec<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_ip: self.bind,
            control_port: self.control_port,
            data_port: self.data_port,
            storage_dir: self.storage.clone(),
            client_port_base: self.client_port_base,
            queue_capacity: self.queue_capacity,
            tick_interval: Duration::from_millis(self.tick_ms.max(1)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    info!("Starting scenesync-relay");
    info!("Snapshot directory: {}", args.storage.display());

    let server = SessionServer::bind(args.server_config()).await?;
    for session in &args.create {
        server.create_session(session)?;
    }

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl-C: {e}");
            }
            info!("Shutting down");
        })
        .await;

    Ok(())
}
