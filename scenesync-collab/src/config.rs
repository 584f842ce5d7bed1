//! Server and client configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::registry::MIN_CLIENT_PORT;

pub const DEFAULT_CONTROL_PORT: u16 = 5555;
pub const DEFAULT_DATA_PORT: u16 = 5556;
pub const DEFAULT_CLIENT_PORT_BASE: u16 = 6100;

/// Session server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface both sockets bind to
    pub bind_ip: IpAddr,
    /// TCP port for SUBSCRIBE / UNSUBSCRIBE / REQUEST_FILE
    pub control_port: u16,
    /// UDP port for operation datagrams
    pub data_port: u16,
    /// Directory holding `<session>.scene` snapshots
    pub storage_dir: PathBuf,
    /// First port handed out to subscribing clients
    pub client_port_base: u16,
    /// Capacity of the inbound and outbound queues
    pub queue_capacity: usize,
    /// Processing tick period
    pub tick_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            control_port: DEFAULT_CONTROL_PORT,
            data_port: DEFAULT_DATA_PORT,
            storage_dir: PathBuf::from("./sessions"),
            client_port_base: DEFAULT_CLIENT_PORT_BASE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            tick_interval: Duration::from_secs(1),
        }
    }
}

impl ServerConfig {
    /// Ephemeral ports and a fast tick, for tests. A client port base of 0
    /// means the default; anything lower is raised to [`MIN_CLIENT_PORT`].
    pub fn for_testing(storage_dir: impl Into<PathBuf>, client_port_base: u16) -> Self {
        let client_port_base = match client_port_base {
            0 => DEFAULT_CLIENT_PORT_BASE,
            base => base.max(MIN_CLIENT_PORT),
        };
        Self {
            control_port: 0,
            data_port: 0,
            storage_dir: storage_dir.into(),
            client_port_base,
            tick_interval: Duration::from_millis(10),
            ..Self::default()
        }
    }

    pub fn control_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.control_port)
    }

    pub fn data_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.data_port)
    }
}

/// Session client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_control: SocketAddr,
    pub server_data: SocketAddr,
    /// Session to join
    pub session: String,
    /// Where the received snapshot is written
    pub storage_dir: PathBuf,
    /// Bound on the SUBSCRIBE round trip
    pub subscribe_timeout: Duration,
    pub queue_capacity: usize,
    pub tick_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let server = IpAddr::V4(Ipv4Addr::LOCALHOST);
        Self {
            server_control: SocketAddr::new(server, DEFAULT_CONTROL_PORT),
            server_data: SocketAddr::new(server, DEFAULT_DATA_PORT),
            session: "default".to_string(),
            storage_dir: PathBuf::from("./received"),
            subscribe_timeout: Duration::from_secs(5),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            tick_interval: Duration::from_secs(1),
        }
    }
}

impl ClientConfig {
    pub fn for_testing(
        server_control: SocketAddr,
        server_data: SocketAddr,
        session: impl Into<String>,
        storage_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            server_control,
            server_data,
            session: session.into(),
            storage_dir: storage_dir.into(),
            subscribe_timeout: Duration::from_secs(2),
            tick_interval: Duration::from_millis(10),
            ..Self::default()
        }
    }
}
