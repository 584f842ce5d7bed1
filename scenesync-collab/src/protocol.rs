//! JSON wire protocol for the control channel and operation datagrams.
//!
//! Control channel (TCP, one request per connection, newline-terminated JSON):
//! ```text
//! client ── {"action":"SUBSCRIBE","sessionFilename":"demo"}\n ──► server
//! client ◄── {"success":true,"endpoint":{"ip":"10.0.0.7","port":6100}}\n ── server
//!
//! client ── {"action":"REQUEST_FILE","senderEndpoint":{..},"sessionFilename":"demo"}\n ──► server
//! client ◄── raw snapshot bytes in CHUNK_SIZE pieces, then EOF ── server
//! ```
//!
//! Data channel (UDP, one envelope per datagram):
//! ```text
//! {"action":"SEND","senderEndpoint":{"ip":..,"port":..},"operation":{..}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use scenesync_core::Operation;

use crate::error::SyncError;

/// Snapshot transfer chunk size in bytes.
pub const CHUNK_SIZE: usize = 4096;

/// Largest UDP payload we will try to receive.
pub const MAX_DATAGRAM: usize = 65_507;

/// Upper bound on a control-channel line.
pub const MAX_CONTROL_LINE: usize = 64 * 1024;

/// Envelope action tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Subscribe,
    Unsubscribe,
    RequestFile,
    Send,
}

/// Client address assigned by the server at subscribe time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self { ip: addr.ip(), port: addr.port() }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

/// Transport wrapper for every control request and operation datagram.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_endpoint: Option<Endpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
}

/// Decoding goes through here so that an unknown operation kind can be told
/// apart from a broken envelope.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    action: Action,
    #[serde(default)]
    sender_endpoint: Option<Endpoint>,
    #[serde(default)]
    session_filename: Option<String>,
    #[serde(default)]
    operation: Option<Value>,
}

impl Envelope {
    pub fn subscribe(session: impl Into<String>) -> Self {
        Self {
            action: Action::Subscribe,
            sender_endpoint: None,
            session_filename: Some(session.into()),
            operation: None,
        }
    }

    pub fn unsubscribe(endpoint: Endpoint, session: impl Into<String>) -> Self {
        Self {
            action: Action::Unsubscribe,
            sender_endpoint: Some(endpoint),
            session_filename: Some(session.into()),
            operation: None,
        }
    }

    pub fn request_file(endpoint: Endpoint, session: impl Into<String>) -> Self {
        Self {
            action: Action::RequestFile,
            sender_endpoint: Some(endpoint),
            session_filename: Some(session.into()),
            operation: None,
        }
    }

    pub fn send(endpoint: Endpoint, operation: Operation) -> Self {
        Self {
            action: Action::Send,
            sender_endpoint: Some(endpoint),
            session_filename: None,
            operation: Some(operation),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, SyncError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Fails with `UnsupportedOperation` for an unknown operation kind and
    /// `Protocol` for anything else that does not parse.
    pub fn decode(bytes: &[u8]) -> Result<Self, SyncError> {
        let raw: RawEnvelope = serde_json::from_slice(bytes)?;
        let operation = raw.operation.map(Operation::from_value).transpose()?;
        Ok(Self {
            action: raw.action,
            sender_endpoint: raw.sender_endpoint,
            session_filename: raw.session_filename,
            operation,
        })
    }
}

/// Reply to SUBSCRIBE and UNSUBSCRIBE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,
}

impl Ack {
    pub fn accepted(endpoint: Endpoint) -> Self {
        Self { success: true, endpoint: Some(endpoint) }
    }

    pub fn ok() -> Self {
        Self { success: true, endpoint: None }
    }

    pub fn rejected() -> Self {
        Self { success: false, endpoint: None }
    }
}

/// Write one newline-terminated JSON document.
pub async fn write_line<W, T>(writer: &mut W, value: &T) -> Result<(), SyncError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one newline-terminated line; `None` on EOF before any byte.
pub async fn read_line<R>(reader: &mut R) -> Result<Option<Vec<u8>>, SyncError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = (&mut *reader).take(MAX_CONTROL_LINE as u64).read_until(b'\n', &mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    if line.last() != Some(&b'\n') && n >= MAX_CONTROL_LINE {
        return Err(SyncError::Protocol("control line too long".into()));
    }
    Ok(Some(line))
}

/// Read one line and parse it as an [`Ack`].
pub async fn read_ack<R>(reader: &mut R) -> Result<Ack, SyncError>
where
    R: AsyncBufRead + Unpin,
{
    match read_line(reader).await? {
        Some(line) => Ok(serde_json::from_slice(&line)?),
        None => Err(SyncError::Protocol("connection closed before ack".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenesync_core::{AxisMask, EditMode, OperationKind, Vec3};
    use serde_json::json;
    use std::net::Ipv4Addr;

    fn endpoint() -> Endpoint {
        Endpoint::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 6100)
    }

    #[test]
    fn test_envelope_field_names() {
        let value = serde_json::to_value(Envelope::request_file(endpoint(), "demo")).unwrap();
        assert_eq!(
            value,
            json!({
                "action": "REQUEST_FILE",
                "senderEndpoint": {"ip": "127.0.0.1", "port": 6100},
                "sessionFilename": "demo"
            })
        );
    }

    #[test]
    fn test_send_envelope_decodes_operation() {
        let op = scenesync_core::Operation {
            kind: OperationKind::Resize { factors: Vec3::new(2.0, 1.0, 1.0), constraint: AxisMask::NONE },
            targets: ["Cube".to_string()].into_iter().collect(),
            active_object: "Cube".into(),
            mode: EditMode::ObjectLevel,
            elements: None,
        };
        let bytes = Envelope::send(endpoint(), op.clone()).encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded.action, Action::Send);
        assert_eq!(decoded.sender_endpoint, Some(endpoint()));
        assert_eq!(decoded.operation, Some(op));
    }

    #[test]
    fn test_unknown_operation_kind() {
        let bytes = serde_json::to_vec(&json!({
            "action": "SEND",
            "senderEndpoint": {"ip": "127.0.0.1", "port": 6100},
            "operation": {"name": "Subdivide", "targets": [], "active_object": "", "mode": "OBJECT"}
        }))
        .unwrap();
        assert!(matches!(
            Envelope::decode(&bytes),
            Err(SyncError::UnsupportedOperation(name)) if name == "Subdivide"
        ));
    }

    #[test]
    fn test_garbage_is_protocol_error() {
        assert!(matches!(Envelope::decode(b"not json"), Err(SyncError::Protocol(_))));
        assert!(matches!(
            Envelope::decode(br#"{"action":"LOGIN"}"#),
            Err(SyncError::Protocol(_))
        ));
    }

    #[test]
    fn test_ack_shape() {
        assert_eq!(serde_json::to_value(Ack::rejected()).unwrap(), json!({"success": false}));
        let ack: Ack = serde_json::from_value(json!({"success": true, "endpoint": {"ip": "127.0.0.1", "port": 6100}})).unwrap();
        assert_eq!(ack, Ack::accepted(endpoint()));
    }

    #[tokio::test]
    async fn test_line_helpers() {
        let mut buf = Vec::new();
        write_line(&mut buf, &Ack::ok()).await.unwrap();
        write_line(&mut buf, &Ack::rejected()).await.unwrap();
        let mut reader = tokio::io::BufReader::new(buf.as_slice());
        assert_eq!(read_ack(&mut reader).await.unwrap(), Ack::ok());
        assert_eq!(read_ack(&mut reader).await.unwrap(), Ack::rejected());
        assert!(read_line(&mut reader).await.unwrap().is_none());
    }
}
