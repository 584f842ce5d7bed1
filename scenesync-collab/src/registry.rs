//! Subscribed clients, keyed by the endpoint the server handed them.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::sync::RwLock;

use crate::protocol::Endpoint;

/// Lowest port ever handed to a client.
pub const MIN_CLIENT_PORT: u16 = 1024;

/// Endpoint → session name.
pub struct ClientRegistry {
    clients: RwLock<HashMap<Endpoint, String>>,
    port_base: u16,
}

impl ClientRegistry {
    /// `port_base` below [`MIN_CLIENT_PORT`] is raised to it.
    pub fn new(port_base: u16) -> Self {
        Self { clients: RwLock::new(HashMap::new()), port_base: port_base.max(MIN_CLIENT_PORT) }
    }

    /// Assign a fresh endpoint on `ip` for `session` and register it.
    ///
    /// Ports are handed out upward from the base, skipping ones already
    /// assigned and ones that are busy on this host. The busy check runs
    /// without the lock held; the insert re-checks the slot.
    pub async fn register(&self, ip: IpAddr, session: &str) -> Option<Endpoint> {
        let mut port = self.port_base;
        loop {
            let candidate = Endpoint::new(ip, port);
            if !self.contains(&candidate).await && port_is_free(port).await {
                if let Entry::Vacant(slot) = self.clients.write().await.entry(candidate) {
                    slot.insert(session.to_string());
                    log::info!("Registered {candidate} for session '{session}'");
                    return Some(candidate);
                }
            }
            port = port.checked_add(1)?;
        }
    }

    pub async fn unregister(&self, endpoint: &Endpoint) -> Option<String> {
        let removed = self.clients.write().await.remove(endpoint);
        if removed.is_some() {
            log::info!("Unregistered {endpoint}");
        }
        removed
    }

    pub async fn contains(&self, endpoint: &Endpoint) -> bool {
        self.clients.read().await.contains_key(endpoint)
    }

    pub async fn session_of(&self, endpoint: &Endpoint) -> Option<String> {
        self.clients.read().await.get(endpoint).cloned()
    }

    /// Every endpoint in `session` except `except`.
    pub async fn members_of(&self, session: &str, except: Option<&Endpoint>) -> Vec<Endpoint> {
        self.clients
            .read()
            .await
            .iter()
            .filter(|(ep, s)| s.as_str() == session && Some(*ep) != except)
            .map(|(ep, _)| *ep)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.clients.write().await.clear();
    }
}

async fn port_is_free(port: u16) -> bool {
    UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))
        .await
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket as StdUdpSocket;
    use std::sync::Arc;

    const LOCAL: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn base() -> u16 {
        // An ephemeral port the OS just released.
        let sock = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        sock.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_register_assigns_distinct_ports() {
        let registry = ClientRegistry::new(base());
        let a = registry.register(LOCAL, "demo").await.unwrap();
        let b = registry.register(LOCAL, "demo").await.unwrap();
        assert_ne!(a, b);
        assert!(a.port >= registry.port_base);
        assert_eq!(registry.len().await, 2);
        assert_eq!(registry.session_of(&a).await.as_deref(), Some("demo"));
    }

    #[tokio::test]
    async fn test_register_skips_busy_port() {
        let busy = StdUdpSocket::bind("0.0.0.0:0").unwrap();
        let port = busy.local_addr().unwrap().port();
        let registry = ClientRegistry::new(port);
        let ep = registry.register(LOCAL, "demo").await.unwrap();
        assert_ne!(ep.port, port);
    }

    #[tokio::test]
    async fn test_members_exclude_origin_and_other_sessions() {
        let registry = ClientRegistry::new(base());
        let a = registry.register(LOCAL, "demo").await.unwrap();
        let b = registry.register(LOCAL, "demo").await.unwrap();
        let c = registry.register(LOCAL, "other").await.unwrap();

        let members = registry.members_of("demo", Some(&a)).await;
        assert_eq!(members, vec![b]);
        assert_eq!(registry.members_of("other", None).await, vec![c]);
    }

    #[tokio::test]
    async fn test_low_port_base_is_raised() {
        let registry = ClientRegistry::new(0);
        let ep = registry.register(LOCAL, "demo").await.unwrap();
        assert!(ep.port >= MIN_CLIENT_PORT);
    }

    #[tokio::test]
    async fn test_concurrent_registrations_get_distinct_ports() {
        let registry = Arc::new(ClientRegistry::new(base()));
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.register(LOCAL, "demo").await.unwrap() })
            })
            .collect();
        let mut ports = Vec::new();
        for task in tasks {
            ports.push(task.await.unwrap().port);
        }
        ports.sort_unstable();
        ports.dedup();
        assert_eq!(ports.len(), 8);
        assert_eq!(registry.len().await, 8);
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = ClientRegistry::new(base());
        let a = registry.register(LOCAL, "demo").await.unwrap();
        assert_eq!(registry.unregister(&a).await.as_deref(), Some("demo"));
        assert!(!registry.contains(&a).await);
        assert!(registry.unregister(&a).await.is_none());
        assert!(registry.is_empty().await);
    }
}
