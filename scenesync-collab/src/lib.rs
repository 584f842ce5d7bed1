//! # scenesync-collab: Session networking for shared 3D scenes
//!
//! Clients join a named session hosted by a central server, ship their
//! local edits as JSON operations over UDP, and replay everyone else's.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐  TCP: SUBSCRIBE / REQUEST_FILE  ┌───────────────┐
//! │ SessionClient │ ◄──────────────────────────────► │ SessionServer │
//! │  (per host)   │  UDP: SEND {operation}           │  (central)    │
//! └───────┬───────┘ ◄──────────────────────────────► └───────┬───────┘
//!         │                                                  │
//!         ▼                                                  ▼
//! ┌───────────────┐                                  ┌───────────────┐
//! │ host Scene    │                                  │ MemoryScene   │
//! │ (local copy)  │                                  │ (canonical)   │
//! └───────────────┘                                  └───────┬───────┘
//!                                                            │
//!                                                    ┌───────┴───────┐
//!                                                    │ FileSnapshots │
//!                                                    │ (bincode+LZ4) │
//!                                                    └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON envelopes, endpoints and acks
//! - [`queue`]: Fixed-capacity drop-on-full queues between tasks and the tick
//! - [`registry`]: Subscribed endpoints and client port allocation
//! - [`snapshot`]: Session snapshot files
//! - [`server`]: Session server
//! - [`client`]: Session client

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod server;
pub mod snapshot;

// Re-exports for convenience
pub use client::{ClientStats, SessionClient, SessionState};
pub use config::{ClientConfig, ServerConfig};
pub use error::SyncError;
pub use protocol::{Ack, Action, Endpoint, Envelope};
pub use queue::{BoundedQueue, DEFAULT_QUEUE_CAPACITY};
pub use registry::ClientRegistry;
pub use server::{ServerHandle, ServerStats, SessionServer};
pub use snapshot::{is_valid_session_name, FileSnapshots, SnapshotError};
