//! Session client: joins a session, ships local edits, replays remote ones.
//!
//! Connection lifecycle:
//! ```text
//! Disconnected ──connect()──► Subscribing ──ack + snapshot──► Connected
//!      ▲                           │                              │
//!      └──────── failure ──────────┘                     disconnect()
//!      ▲                                                          │
//!      └──────────────────────── Disconnecting ◄──────────────────┘
//! ```
//!
//! All scene access happens in [`SessionClient::tick`], on the host's
//! thread. The receive loop only parses datagrams and queues them.

use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Interval, MissedTickBehavior};

use scenesync_core::{
    apply, Encoder, FocusManager, LocalAction, Operation, Scene, SelectionSnapshot,
};

use crate::config::ClientConfig;
use crate::error::SyncError;
use crate::protocol::{
    read_ack, write_line, Ack, Action, Endpoint, Envelope, CHUNK_SIZE, MAX_DATAGRAM,
};
use crate::queue::BoundedQueue;
use crate::server::wait_for_shutdown;
use crate::snapshot::{FileSnapshots, SnapshotError};

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Subscribing,
    Connected,
    Disconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Subscribing => "subscribing",
            SessionState::Connected => "connected",
            SessionState::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

/// Client statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub sent: u64,
    pub received: u64,
    pub applied: u64,
    pub queue_drops: u64,
    pub unsupported: u64,
    pub send_failures: u64,
}

#[derive(Default)]
struct AtomicClientStats {
    sent: AtomicU64,
    received: AtomicU64,
    applied: AtomicU64,
    queue_drops: AtomicU64,
    unsupported: AtomicU64,
    send_failures: AtomicU64,
}

impl AtomicClientStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ClientStats {
        ClientStats {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            queue_drops: self.queue_drops.load(Ordering::Relaxed),
            unsupported: self.unsupported.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

/// One participant in a session.
pub struct SessionClient {
    config: ClientConfig,
    state: SessionState,
    endpoint: Option<Endpoint>,
    encoder: Encoder,
    focus: FocusManager,
    inbound: Arc<BoundedQueue<Operation>>,
    outbound: BoundedQueue<Operation>,
    socket: Option<Arc<UdpSocket>>,
    shutdown: Option<watch::Sender<bool>>,
    receiver: Option<JoinHandle<()>>,
    stats: Arc<AtomicClientStats>,
}

impl SessionClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inbound: Arc::new(BoundedQueue::new(config.queue_capacity)),
            outbound: BoundedQueue::new(config.queue_capacity),
            config,
            state: SessionState::Disconnected,
            endpoint: None,
            encoder: Encoder::new(),
            focus: FocusManager::new(),
            socket: None,
            shutdown: None,
            receiver: None,
            stats: Arc::new(AtomicClientStats::default()),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Endpoint assigned by the server while connected.
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.endpoint
    }

    pub fn session(&self) -> &str {
        &self.config.session
    }

    pub fn stats(&self) -> ClientStats {
        self.stats.snapshot()
    }

    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }

    pub fn pending_inbound(&self) -> usize {
        self.inbound.len()
    }

    /// Interval at the configured tick period, for hosts driving [`tick`](Self::tick).
    pub fn ticker(&self) -> Interval {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    /// Mark `op` as already sent so an identical record is not re-emitted.
    pub fn prime(&mut self, op: Operation) {
        self.encoder.prime(op);
    }

    fn expect_state(&self, expected: SessionState) -> Result<(), SyncError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SyncError::InvalidState {
                expected: expected.to_string(),
                found: self.state.to_string(),
            })
        }
    }

    /// Subscribe, fetch the session snapshot into `scene`, and start
    /// listening for remote operations.
    ///
    /// On any failure the client is back in `Disconnected` with no socket
    /// bound, and `scene` is untouched.
    pub async fn connect<S>(&mut self, scene: &mut S) -> Result<(), SyncError>
    where
        S: Scene + DeserializeOwned,
    {
        self.expect_state(SessionState::Disconnected)?;
        self.state = SessionState::Subscribing;
        log::info!("Subscribing to '{}' at {}", self.config.session, self.config.server_control);

        let endpoint = match self.subscribe().await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                self.state = SessionState::Disconnected;
                log::warn!("Subscribe failed: {e}");
                return Err(e);
            }
        };

        let (loaded, socket) = match self.join::<S>(endpoint).await {
            Ok(joined) => joined,
            Err(e) => {
                log::warn!("Joining '{}' failed: {e}", self.config.session);
                if let Err(e) = self.unsubscribe(endpoint).await {
                    log::debug!("Unsubscribe after failed join: {e}");
                }
                self.state = SessionState::Disconnected;
                return Err(e);
            }
        };

        *scene = loaded;
        let socket = Arc::new(socket);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.receiver = Some(tokio::spawn(receive_loop(
            socket.clone(),
            self.inbound.clone(),
            self.stats.clone(),
            shutdown_rx,
        )));
        self.socket = Some(socket);
        self.shutdown = Some(shutdown_tx);
        self.endpoint = Some(endpoint);
        self.state = SessionState::Connected;
        log::info!("Connected to '{}' as {endpoint}", self.config.session);
        Ok(())
    }

    async fn subscribe(&self) -> Result<Endpoint, SyncError> {
        let addr = self.config.server_control;
        let request = Envelope::subscribe(&self.config.session);
        let exchange = async {
            let stream = TcpStream::connect(addr)
                .await
                .map_err(|e| SyncError::ConnectionRefused(format!("{addr}: {e}")))?;
            let (read_half, mut write_half) = stream.into_split();
            write_line(&mut write_half, &request).await?;
            read_ack(&mut BufReader::new(read_half)).await
        };
        let ack = timeout(self.config.subscribe_timeout, exchange)
            .await
            .map_err(|_| {
                SyncError::ConnectionTimeout(format!(
                    "no reply from {addr} within {:?}",
                    self.config.subscribe_timeout
                ))
            })??;
        match ack {
            Ack { success: true, endpoint: Some(endpoint) } => Ok(endpoint),
            _ => Err(SyncError::ConnectionRefused(format!(
                "server rejected session '{}'",
                self.config.session
            ))),
        }
    }

    async fn join<S: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
    ) -> Result<(S, UdpSocket), SyncError> {
        self.fetch_snapshot(endpoint).await?;
        let scene = FileSnapshots::new(&self.config.storage_dir).import(&self.config.session)?;
        let socket = UdpSocket::bind(endpoint.socket_addr()).await?;
        Ok((scene, socket))
    }

    /// Stream the session snapshot to `<storage_dir>/<session>.scene`.
    async fn fetch_snapshot(&self, endpoint: Endpoint) -> Result<u64, SyncError> {
        let stream = TcpStream::connect(self.config.server_control).await?;
        let (mut read_half, mut write_half) = stream.into_split();
        write_line(&mut write_half, &Envelope::request_file(endpoint, &self.config.session)).await?;

        tokio::fs::create_dir_all(&self.config.storage_dir).await?;
        let path = FileSnapshots::new(&self.config.storage_dir).path(&self.config.session);
        let mut file = tokio::fs::File::create(&path).await?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            let n = timeout(self.config.subscribe_timeout, read_half.read(&mut buf))
                .await
                .map_err(|_| SyncError::ConnectionTimeout("snapshot transfer stalled".into()))??;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await?;
            total += n as u64;
        }
        file.flush().await?;

        if total == 0 {
            return Err(SnapshotError::Empty.into());
        }
        log::debug!("Received snapshot ({total} bytes) into {}", path.display());
        Ok(total)
    }

    async fn unsubscribe(&self, endpoint: Endpoint) -> Result<(), SyncError> {
        let addr = self.config.server_control;
        let request = Envelope::unsubscribe(endpoint, &self.config.session);
        let exchange = async {
            let stream = TcpStream::connect(addr).await?;
            let (read_half, mut write_half) = stream.into_split();
            write_line(&mut write_half, &request).await?;
            read_ack(&mut BufReader::new(read_half)).await
        };
        timeout(self.config.subscribe_timeout, exchange)
            .await
            .map_err(|_| SyncError::ConnectionTimeout(format!("unsubscribe from {addr}")))??;
        Ok(())
    }

    /// One processing step.
    ///
    /// Pass `Some(action)` on the tick right after the host performed
    /// `action`, once per performed action, and `None` on every other tick.
    /// The action is encoded against the selection at call time, so handing
    /// an old action in again after the selection changed ships it again
    /// against the new selection.
    ///
    /// Also sends at most one queued operation and applies at most one
    /// received operation with focus isolation. Does nothing unless
    /// connected.
    pub fn tick<S: Scene>(&mut self, scene: &mut S, latest: Option<&LocalAction>) {
        if self.state != SessionState::Connected {
            return;
        }

        let selection = SelectionSnapshot::capture(scene);
        self.encoder.track(&selection);
        if let Some(action) = latest {
            let active = scene.active();
            if let Some(op) =
                self.encoder.encode_distinct(action, &selection, active.as_deref(), scene.mode())
            {
                if let Err(e) = self.outbound.try_enqueue(op) {
                    AtomicClientStats::bump(&self.stats.queue_drops);
                    log::warn!("Dropping local operation: {e}");
                }
            }
        }

        if let Some(op) = self.outbound.dequeue() {
            let label = op.label();
            if let Err(e) = self.send(op) {
                log::warn!("Dropping {label}: {e}");
            }
        }

        if let Some(op) = self.inbound.dequeue() {
            match self.focus.apply_isolated(&op, scene, |op, s| apply(op, s)) {
                Ok(()) => {
                    AtomicClientStats::bump(&self.stats.applied);
                    log::debug!("Applied remote {}", op.label());
                }
                Err(e) => log::warn!("Remote {} failed: {e}", op.label()),
            }
        }
    }

    /// Hand `op` to a send task. Fails without a listening socket.
    fn send(&self, op: Operation) -> Result<(), SyncError> {
        let (Some(socket), Some(endpoint)) = (self.socket.clone(), self.endpoint) else {
            return Err(SyncError::SocketClosed);
        };
        let bytes = Envelope::send(endpoint, op).encode()?;
        let server = self.config.server_data;
        let stats = self.stats.clone();
        tokio::spawn(async move {
            match socket.send_to(&bytes, server).await {
                Ok(_) => AtomicClientStats::bump(&stats.sent),
                Err(e) => {
                    AtomicClientStats::bump(&stats.send_failures);
                    log::warn!("Send to {server} failed: {e}");
                }
            }
        });
        Ok(())
    }

    /// Unsubscribe (best effort), stop listening and drop queued work.
    pub async fn disconnect(&mut self) -> Result<(), SyncError> {
        self.expect_state(SessionState::Connected)?;
        self.state = SessionState::Disconnecting;

        if let Some(endpoint) = self.endpoint {
            if let Err(e) = self.unsubscribe(endpoint).await {
                log::warn!("Unsubscribe failed: {e}");
            }
        }

        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(receiver) = self.receiver.take() {
            let _ = receiver.await;
        }
        self.socket = None;
        let dropped = self.inbound.clear() + self.outbound.clear();
        self.endpoint = None;
        self.state = SessionState::Disconnected;
        log::info!("Left '{}' ({dropped} queued operations dropped)", self.config.session);
        Ok(())
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    inbound: Arc<BoundedQueue<Operation>>,
    stats: Arc<AtomicClientStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, from)) => match Envelope::decode(&buf[..n]) {
                    Ok(Envelope { action: Action::Send, operation: Some(op), .. }) => {
                        if inbound.enqueue(op) {
                            AtomicClientStats::bump(&stats.received);
                        } else {
                            AtomicClientStats::bump(&stats.queue_drops);
                            log::warn!("Inbound queue full, dropping operation from {from}");
                        }
                    }
                    Ok(_) => log::debug!("Ignoring non-SEND datagram from {from}"),
                    Err(SyncError::UnsupportedOperation(name)) => {
                        AtomicClientStats::bump(&stats.unsupported);
                        log::warn!("Ignoring unsupported operation '{name}' from {from}");
                    }
                    Err(e) => log::debug!("Dropping malformed datagram from {from}: {e}"),
                },
                Err(e) => log::debug!("Listener receive failed: {e}"),
            },
        }
    }
    log::debug!("Listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenesync_core::{MemoryScene, PrimitiveShape, SceneQuery, Vec3};
    use std::net::SocketAddr;
    use tempfile::TempDir;

    fn unreachable_config(dir: &TempDir) -> ClientConfig {
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        ClientConfig::for_testing(addr, addr, "demo", dir.path())
    }

    #[test]
    fn test_new_client_is_disconnected() {
        let dir = TempDir::new().unwrap();
        let client = SessionClient::new(unreachable_config(&dir));
        assert_eq!(client.state(), SessionState::Disconnected);
        assert!(client.endpoint().is_none());
        assert_eq!(client.session(), "demo");
    }

    #[tokio::test]
    async fn test_tick_is_noop_when_disconnected() {
        let dir = TempDir::new().unwrap();
        let mut client = SessionClient::new(unreachable_config(&dir));
        let mut scene = MemoryScene::new();
        scene.add_primitive(PrimitiveShape::Cube, Vec3::ZERO, None).unwrap();
        let action = LocalAction::AddPrimitive { shape: PrimitiveShape::Cube, location: Vec3::ZERO };
        client.tick(&mut scene, Some(&action));
        assert_eq!(client.pending_outbound(), 0);
        assert_eq!(scene.active().as_deref(), Some("Cube"));
    }

    #[tokio::test]
    async fn test_disconnect_requires_connection() {
        let dir = TempDir::new().unwrap();
        let mut client = SessionClient::new(unreachable_config(&dir));
        assert!(matches!(
            client.disconnect().await,
            Err(SyncError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_send_without_socket_fails() {
        let dir = TempDir::new().unwrap();
        let client = SessionClient::new(unreachable_config(&dir));
        let mut scene = MemoryScene::new();
        scene.add_primitive(PrimitiveShape::Cube, Vec3::ZERO, None).unwrap();
        let action = LocalAction::AddPrimitive { shape: PrimitiveShape::Cube, location: Vec3::ZERO };
        let op = Encoder::new()
            .encode(&action, &SelectionSnapshot::capture(&scene), Some("Cube"), scene.mode());
        assert!(matches!(client.send(op), Err(SyncError::SocketClosed)));
        assert_eq!(client.stats().sent, 0);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Subscribing.to_string(), "subscribing");
        assert_eq!(SessionState::Disconnecting.to_string(), "disconnecting");
    }
}
