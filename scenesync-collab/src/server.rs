//! Session server: canonical scene copy, conflict transform, fan-out.
//!
//! Architecture:
//! ```text
//!  Client A ──TCP── control loop ── ClientRegistry (endpoint → session)
//!     │                  │
//!     └──UDP──► data loop ──► inbound queue
//!                                  │  tick
//!                                  ▼
//!                 Transformer ─► FocusManager::apply_isolated ─► MemoryScene
//!                                  │                               │
//!                                  │                        FileSnapshots
//!                                  ▼
//!                            outbound queue ──tick──► join_all(send_to)
//!                                                        │         │
//!                                                        ▼         ▼
//!                                                    Client B   Client C
//! ```
//!
//! The tick handles at most one inbound and one outbound item, so a burst
//! of operations drains over several ticks and anything past the queue
//! capacity is dropped at receive time.

use futures_util::future::join_all;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use scenesync_core::{apply, FocusManager, MemoryScene, Operation, Transformer};

use crate::config::ServerConfig;
use crate::error::SyncError;
use crate::protocol::{
    read_line, write_line, Ack, Action, Endpoint, Envelope, CHUNK_SIZE, MAX_DATAGRAM,
};
use crate::queue::BoundedQueue;
use crate::registry::ClientRegistry;
use crate::snapshot::{is_valid_session_name, FileSnapshots, SnapshotError};

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Operations accepted into the inbound queue
    pub received: u64,
    /// Datagrams from endpoints that are not subscribed
    pub rejected: u64,
    /// Datagrams that failed to parse or carried an unknown kind
    pub invalid: u64,
    pub applied: u64,
    /// Individual datagrams sent to peers
    pub broadcast: u64,
    pub queue_drops: u64,
    pub persist_failures: u64,
}

#[derive(Default)]
struct AtomicServerStats {
    received: AtomicU64,
    rejected: AtomicU64,
    invalid: AtomicU64,
    applied: AtomicU64,
    broadcast: AtomicU64,
    queue_drops: AtomicU64,
    persist_failures: AtomicU64,
}

impl AtomicServerStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ServerStats {
        ServerStats {
            received: self.received.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            broadcast: self.broadcast.load(Ordering::Relaxed),
            queue_drops: self.queue_drops.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
        }
    }
}

/// An operation waiting for the canonical apply.
struct Inbound {
    session: String,
    origin: Endpoint,
    operation: Operation,
}

/// An applied operation waiting for fan-out.
struct Outbound {
    session: String,
    origin: Endpoint,
    operation: Operation,
}

/// Resolves once `rx` carries `true` or its sender is gone.
pub(crate) async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        let stop = *rx.borrow_and_update();
        if stop || rx.changed().await.is_err() {
            return;
        }
    }
}

/// Cheap, clonable view of a running server.
#[derive(Clone)]
pub struct ServerHandle {
    shutdown: Arc<watch::Sender<bool>>,
    stats: Arc<AtomicServerStats>,
    registry: Arc<ClientRegistry>,
    control_addr: SocketAddr,
    data_addr: SocketAddr,
}

impl ServerHandle {
    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    pub fn data_addr(&self) -> SocketAddr {
        self.data_addr
    }

    pub fn stats(&self) -> ServerStats {
        self.stats.snapshot()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.registry.len().await
    }

    /// Ask the server loops to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

struct ControlContext {
    registry: Arc<ClientRegistry>,
    snapshots: FileSnapshots,
    stats: Arc<AtomicServerStats>,
}

/// The session server.
pub struct SessionServer {
    config: ServerConfig,
    snapshots: FileSnapshots,
    registry: Arc<ClientRegistry>,
    inbound: Arc<BoundedQueue<Inbound>>,
    outbound: BoundedQueue<Outbound>,
    /// Canonical scenes, imported lazily per session
    scenes: HashMap<String, MemoryScene>,
    transformer: Transformer,
    focus: FocusManager,
    data_socket: Arc<UdpSocket>,
    stats: Arc<AtomicServerStats>,
    shutdown: Arc<watch::Sender<bool>>,
    control_addr: SocketAddr,
    data_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionServer {
    /// Bind both sockets and start the receive loops.
    pub async fn bind(config: ServerConfig) -> Result<Self, SyncError> {
        let listener = TcpListener::bind(config.control_addr()).await?;
        let data_socket = Arc::new(UdpSocket::bind(config.data_addr()).await?);
        let control_addr = listener.local_addr()?;
        let data_addr = data_socket.local_addr()?;

        let snapshots = FileSnapshots::new(&config.storage_dir);
        let registry = Arc::new(ClientRegistry::new(config.client_port_base));
        let inbound = Arc::new(BoundedQueue::new(config.queue_capacity));
        let stats = Arc::new(AtomicServerStats::default());
        let (shutdown_tx, _) = watch::channel(false);
        let shutdown = Arc::new(shutdown_tx);

        let control_ctx = Arc::new(ControlContext {
            registry: registry.clone(),
            snapshots: snapshots.clone(),
            stats: stats.clone(),
        });
        let control_task = tokio::spawn(control_loop(listener, control_ctx, shutdown.subscribe()));
        let data_task = tokio::spawn(data_loop(
            data_socket.clone(),
            registry.clone(),
            inbound.clone(),
            stats.clone(),
            shutdown.subscribe(),
        ));

        log::info!("Session server listening on {control_addr} (control) and {data_addr} (data)");

        Ok(Self {
            outbound: BoundedQueue::new(config.queue_capacity),
            config,
            snapshots,
            registry,
            inbound,
            scenes: HashMap::new(),
            transformer: Transformer::new(),
            focus: FocusManager::new(),
            data_socket,
            stats,
            shutdown,
            control_addr,
            data_addr,
            tasks: vec![control_task, data_task],
        })
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: self.shutdown.clone(),
            stats: self.stats.clone(),
            registry: self.registry.clone(),
            control_addr: self.control_addr,
            data_addr: self.data_addr,
        }
    }

    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    pub fn data_addr(&self) -> SocketAddr {
        self.data_addr
    }

    pub fn stats(&self) -> ServerStats {
        self.stats.snapshot()
    }

    /// Canonical scene of `session`, if it has been loaded.
    pub fn scene(&self, session: &str) -> Option<&MemoryScene> {
        self.scenes.get(session)
    }

    /// Seed an empty snapshot for `session` unless one already exists.
    /// Returns true when a new session was created.
    pub fn create_session(&self, session: &str) -> Result<bool, SnapshotError> {
        if self.snapshots.exists(session) {
            return Ok(false);
        }
        self.snapshots.export(session, &MemoryScene::new())?;
        log::info!("Created session '{session}'");
        Ok(true)
    }

    /// One processing step: apply at most one inbound operation and
    /// broadcast at most one applied operation.
    pub fn tick(&mut self) {
        if let Some(item) = self.inbound.dequeue() {
            self.process(item);
        }
        if let Some(item) = self.outbound.dequeue() {
            self.broadcast(item);
        }
    }

    fn process(&mut self, item: Inbound) {
        let Inbound { session, origin, mut operation } = item;

        let scene = match load_scene(&mut self.scenes, &self.snapshots, &session) {
            Ok(scene) => scene,
            Err(e) => {
                log::error!("Cannot load session '{session}': {e}");
                return;
            }
        };

        if let Some(renamed) = self.transformer.resolve(&mut operation, scene) {
            log::info!("{} from {origin} renamed to '{renamed}'", operation.label());
        }

        // Persisted and forwarded even when the canonical apply fails.
        match self.focus.apply_isolated(&operation, scene, |op, s| apply(op, s)) {
            Ok(()) => {
                AtomicServerStats::bump(&self.stats.applied);
                log::debug!("Applied {} from {origin} to '{session}'", operation.label());
            }
            Err(e) => log::warn!("Applying {} from {origin} failed: {e}", operation.label()),
        }

        if let Err(e) = self.snapshots.export(&session, scene) {
            AtomicServerStats::bump(&self.stats.persist_failures);
            log::error!("Failed to persist session '{session}': {e}");
        }

        if let Err(e) = self.outbound.try_enqueue(Outbound { session, origin, operation }) {
            AtomicServerStats::bump(&self.stats.queue_drops);
            log::warn!("Dropping broadcast: {e}");
        }
    }

    fn broadcast(&self, item: Outbound) {
        let Outbound { session, origin, operation } = item;
        let bytes = match Envelope::send(origin, operation).encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("Failed to encode broadcast: {e}");
                return;
            }
        };
        let socket = self.data_socket.clone();
        let registry = self.registry.clone();
        let stats = self.stats.clone();

        tokio::spawn(async move {
            let peers = registry.members_of(&session, Some(&origin)).await;
            let sends = peers.iter().map(|peer| socket.send_to(&bytes, peer.socket_addr()));
            let results = join_all(sends).await;
            for (peer, result) in peers.iter().zip(results) {
                match result {
                    Ok(_) => AtomicServerStats::bump(&stats.broadcast),
                    Err(e) => log::warn!("Send to {peer} failed: {e}"),
                }
            }
            log::trace!("Broadcast to {} peers in '{session}'", peers.len());
        });
    }

    /// Tick at the configured interval until shutdown is requested.
    pub async fn run(self) {
        self.run_until(std::future::pending()).await
    }

    /// Tick at the configured interval until `signal` resolves or shutdown
    /// is requested through a [`ServerHandle`].
    pub async fn run_until<F>(mut self, signal: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stop = self.shutdown.subscribe();
        tokio::pin!(signal);

        loop {
            tokio::select! {
                _ = &mut signal => break,
                _ = wait_for_shutdown(&mut stop) => break,
                _ = ticker.tick() => self.tick(),
            }
        }
        self.shutdown().await;
    }

    /// Stop both loops and drop queued work.
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        let pending = self.inbound.clear() + self.outbound.clear();
        self.registry.clear().await;
        log::info!("Session server stopped ({pending} queued operations dropped)");
    }
}

fn load_scene<'a>(
    scenes: &'a mut HashMap<String, MemoryScene>,
    snapshots: &FileSnapshots,
    session: &str,
) -> Result<&'a mut MemoryScene, SnapshotError> {
    match scenes.entry(session.to_string()) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => {
            let scene = snapshots.import(session)?;
            log::info!("Loaded canonical scene for '{session}'");
            Ok(entry.insert(scene))
        }
    }
}

async fn control_loop(
    listener: TcpListener,
    ctx: Arc<ControlContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let ctx = ctx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_control(stream, peer, &ctx).await {
                            log::warn!("Control request from {peer} failed: {e}");
                        }
                    });
                }
                Err(e) => log::error!("Accept failed: {e}"),
            },
        }
    }
    log::debug!("Control loop stopped");
}

async fn handle_control(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: &ControlContext,
) -> Result<(), SyncError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let Some(line) = read_line(&mut reader).await? else {
        return Ok(());
    };
    let request = Envelope::decode(&line)?;

    match request.action {
        Action::Subscribe => {
            let ack = match request.session_filename.as_deref() {
                Some(session) if !is_valid_session_name(session) => {
                    AtomicServerStats::bump(&ctx.stats.rejected);
                    log::warn!("{peer} asked for invalid session name '{session}'");
                    Ack::rejected()
                }
                Some(session) if ctx.snapshots.exists(session) => {
                    match ctx.registry.register(peer.ip(), session).await {
                        Some(endpoint) => Ack::accepted(endpoint),
                        None => {
                            log::warn!("No free client port for {peer}");
                            Ack::rejected()
                        }
                    }
                }
                Some(session) => {
                    log::warn!("{peer} asked for unknown session '{session}'");
                    Ack::rejected()
                }
                None => Ack::rejected(),
            };
            write_line(&mut write_half, &ack).await?;
        }
        Action::Unsubscribe => {
            if let Some(endpoint) = request.sender_endpoint {
                ctx.registry.unregister(&endpoint).await;
            }
            write_line(&mut write_half, &Ack::ok()).await?;
        }
        Action::RequestFile => {
            let endpoint = request
                .sender_endpoint
                .ok_or_else(|| SyncError::Protocol("REQUEST_FILE without senderEndpoint".into()))?;
            let Some(session) = ctx.registry.session_of(&endpoint).await else {
                AtomicServerStats::bump(&ctx.stats.rejected);
                log::warn!("File request from unsubscribed {endpoint}");
                return Ok(());
            };
            let bytes = ctx.snapshots.read_raw(&session)?;
            for chunk in bytes.chunks(CHUNK_SIZE) {
                write_half.write_all(chunk).await?;
            }
            write_half.shutdown().await?;
            log::info!("Sent '{session}' snapshot ({} bytes) to {endpoint}", bytes.len());
        }
        Action::Send => {
            return Err(SyncError::Protocol("SEND on control channel".into()));
        }
    }
    Ok(())
}

async fn data_loop(
    socket: Arc<UdpSocket>,
    registry: Arc<ClientRegistry>,
    inbound: Arc<BoundedQueue<Inbound>>,
    stats: Arc<AtomicServerStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, from)) => {
                    handle_datagram(&buf[..n], from, &registry, &inbound, &stats).await;
                }
                Err(e) => log::warn!("Data socket receive failed: {e}"),
            },
        }
    }
    log::debug!("Data loop stopped");
}

async fn handle_datagram(
    bytes: &[u8],
    from: SocketAddr,
    registry: &ClientRegistry,
    inbound: &BoundedQueue<Inbound>,
    stats: &AtomicServerStats,
) {
    let envelope = match Envelope::decode(bytes) {
        Ok(envelope) => envelope,
        Err(SyncError::UnsupportedOperation(name)) => {
            AtomicServerStats::bump(&stats.invalid);
            log::warn!("Ignoring unsupported operation '{name}' from {from}");
            return;
        }
        Err(e) => {
            AtomicServerStats::bump(&stats.invalid);
            log::debug!("Dropping malformed datagram from {from}: {e}");
            return;
        }
    };

    let (Action::Send, Some(origin), Some(operation)) =
        (envelope.action, envelope.sender_endpoint, envelope.operation)
    else {
        AtomicServerStats::bump(&stats.invalid);
        log::debug!("Dropping non-SEND datagram from {from}");
        return;
    };

    let Some(session) = registry.session_of(&origin).await else {
        AtomicServerStats::bump(&stats.rejected);
        log::warn!("Rejecting operation from unsubscribed {origin}");
        return;
    };

    if inbound.enqueue(Inbound { session, origin, operation }) {
        AtomicServerStats::bump(&stats.received);
    } else {
        AtomicServerStats::bump(&stats.queue_drops);
        log::warn!("Inbound queue full, dropping operation from {origin}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenesync_core::{EditMode, OperationKind, PrimitiveShape, SceneQuery};
    use std::net::{IpAddr, Ipv4Addr};
    use tempfile::TempDir;

    fn add_cube(name: &str) -> Operation {
        Operation {
            kind: OperationKind::AddPrimitive {
                shape: PrimitiveShape::Cube,
                loc_x: 0.0,
                loc_y: 0.0,
                loc_z: 0.0,
            },
            targets: [name.to_string()].into_iter().collect(),
            active_object: name.to_string(),
            mode: EditMode::ObjectLevel,
            elements: None,
        }
    }

    fn origin(port: u16) -> Endpoint {
        Endpoint::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    async fn server(dir: &TempDir) -> SessionServer {
        let server = SessionServer::bind(ServerConfig::for_testing(dir.path(), 0)).await.unwrap();
        server.create_session("demo").unwrap();
        server
    }

    #[tokio::test]
    async fn test_create_session_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut server = server(&dir).await;
        assert!(!server.create_session("demo").unwrap());
        assert!(dir.path().join("demo.scene").is_file());
        assert!(matches!(server.create_session("../demo"), Err(SnapshotError::InvalidName(_))));
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_tick_applies_and_renames_collisions() {
        let dir = TempDir::new().unwrap();
        let mut server = server(&dir).await;

        for port in [7001, 7002] {
            server.inbound.enqueue(Inbound {
                session: "demo".into(),
                origin: origin(port),
                operation: add_cube("Cube"),
            });
        }
        server.tick();
        server.tick();

        let scene = server.scene("demo").unwrap();
        assert!(scene.contains("Cube"));
        assert!(scene.contains("Cube.001"));
        assert_eq!(server.stats().applied, 2);

        let persisted: MemoryScene = FileSnapshots::new(dir.path()).import("demo").unwrap();
        assert_eq!(persisted.len(), 2);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_one_inbound_item_per_tick() {
        let dir = TempDir::new().unwrap();
        let mut server = server(&dir).await;
        for name in ["A", "B", "C"] {
            server.inbound.enqueue(Inbound {
                session: "demo".into(),
                origin: origin(7001),
                operation: add_cube(name),
            });
        }
        server.tick();
        assert_eq!(server.inbound.len(), 2);
        assert_eq!(server.scene("demo").unwrap().len(), 1);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_session_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut server = server(&dir).await;
        server.inbound.enqueue(Inbound {
            session: "missing".into(),
            origin: origin(7001),
            operation: add_cube("Cube"),
        });
        server.tick();
        assert!(server.scene("missing").is_none());
        assert_eq!(server.stats().applied, 0);
        assert!(server.outbound.is_empty());
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_handle_shutdown_stops_run() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir).await;
        let handle = server.handle();
        let running = tokio::spawn(server.run());
        handle.shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap();
    }
}
