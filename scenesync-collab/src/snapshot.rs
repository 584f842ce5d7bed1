//! Scene snapshot files.
//!
//! One file per session at `<dir>/<session>.scene`:
//! bincode (serde, standard config) wrapped in LZ4 block compression with
//! the uncompressed size prepended. The server streams these bytes verbatim
//! to subscribing clients.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Snapshot file extension.
pub const SNAPSHOT_EXT: &str = "scene";

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Snapshot encoding error: {0}")]
    Encode(String),
    #[error("Snapshot decoding error: {0}")]
    Decode(String),
    #[error("Snapshot compression error: {0}")]
    Compression(String),
    #[error("Snapshot is empty")]
    Empty,
    #[error("No snapshot for session '{0}'")]
    NotFound(String),
    #[error("Invalid session name '{0}'")]
    InvalidName(String),
}

/// A session name must be one plain path component so its file stays
/// inside the snapshot directory.
pub fn is_valid_session_name(name: &str) -> bool {
    if name.is_empty() || name.contains(['/', '\\', '\0']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Directory of session snapshots.
#[derive(Debug, Clone)]
pub struct FileSnapshots {
    dir: PathBuf,
}

impl FileSnapshots {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, session: &str) -> PathBuf {
        self.dir.join(format!("{session}.{SNAPSHOT_EXT}"))
    }

    fn checked_path(&self, session: &str) -> Result<PathBuf, SnapshotError> {
        if !is_valid_session_name(session) {
            return Err(SnapshotError::InvalidName(session.to_string()));
        }
        Ok(self.path(session))
    }

    pub fn exists(&self, session: &str) -> bool {
        is_valid_session_name(session) && self.path(session).is_file()
    }

    /// Serialize `scene` and atomically replace the session file.
    /// Returns the number of bytes written.
    pub fn export<S: Serialize>(&self, session: &str, scene: &S) -> Result<u64, SnapshotError> {
        let path = self.checked_path(session)?;
        let bytes = encode(scene)?;
        fs::create_dir_all(&self.dir)?;
        let tmp = path.with_extension(format!("{SNAPSHOT_EXT}.tmp"));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        log::debug!("Exported snapshot '{session}' ({} bytes)", bytes.len());
        Ok(bytes.len() as u64)
    }

    pub fn import<S: DeserializeOwned>(&self, session: &str) -> Result<S, SnapshotError> {
        let path = self.checked_path(session)?;
        if !path.is_file() {
            return Err(SnapshotError::NotFound(session.to_string()));
        }
        let bytes = fs::read(&path)?;
        decode(&bytes)
    }

    /// Raw file contents, as sent over the wire.
    pub fn read_raw(&self, session: &str) -> Result<Vec<u8>, SnapshotError> {
        let path = self.checked_path(session)?;
        if !path.is_file() {
            return Err(SnapshotError::NotFound(session.to_string()));
        }
        Ok(fs::read(path)?)
    }
}

pub fn encode<S: Serialize>(scene: &S) -> Result<Vec<u8>, SnapshotError> {
    let raw = bincode::serde::encode_to_vec(scene, bincode::config::standard())
        .map_err(|e| SnapshotError::Encode(e.to_string()))?;
    Ok(lz4_flex::compress_prepend_size(&raw))
}

pub fn decode<S: DeserializeOwned>(bytes: &[u8]) -> Result<S, SnapshotError> {
    if bytes.is_empty() {
        return Err(SnapshotError::Empty);
    }
    let raw = lz4_flex::decompress_size_prepended(bytes)
        .map_err(|e| SnapshotError::Compression(e.to_string()))?;
    let (scene, _) = bincode::serde::decode_from_slice(&raw, bincode::config::standard())
        .map_err(|e| SnapshotError::Decode(e.to_string()))?;
    Ok(scene)
}
