//! Error taxonomy for the sync layer.
//!
//! Only subscribe-time failures (`ConnectionTimeout`, `ConnectionRefused`,
//! `Snapshot`) reach the caller of [`SessionClient::connect`](crate::client::SessionClient::connect).
//! Everything else is logged where it happens and the tick loop carries on.

use scenesync_core::{OperationError, SceneError};
use thiserror::Error;

use crate::snapshot::SnapshotError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Connection timed out: {0}")]
    ConnectionTimeout(String),
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("Scene error: {0}")]
    Scene(#[from] SceneError),
    #[error("Queue full, item dropped")]
    QueueFull,
    #[error("Socket closed")]
    SocketClosed,
    #[error("Invalid session state: expected {expected}, found {found}")]
    InvalidState { expected: String, found: String },
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<OperationError> for SyncError {
    fn from(e: OperationError) -> Self {
        match e {
            OperationError::UnsupportedOperation(name) => SyncError::UnsupportedOperation(name),
            OperationError::Malformed(msg) => SyncError::Protocol(msg),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Protocol(e.to_string())
    }
}
