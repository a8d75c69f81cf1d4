//! Socket wire format.
//!
//! A request is one frame: a 4-byte big-endian length followed by that many
//! bytes of JSON `{"name": ..., "arg": ...}`. The reply is plain UTF-8 text
//! terminated by the daemon closing the connection.

use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{io_err, DaemonError};

/// Replies starting with this denote a failed command.
pub const ERROR_PREFIX: &str = "error: ";

/// Largest request body accepted from a client.
pub const MAX_FRAME_LEN: u32 = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub name: String,
    #[serde(default)]
    pub arg: String,
}

impl DaemonRequest {
    pub fn new(name: impl Into<String>, arg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arg: arg.into(),
        }
    }

    /// `None` for names the daemon does not know.
    pub fn command(&self) -> Option<Command> {
        match self.name.as_str() {
            "sync" => Some(Command::Sync),
            "prune" => Some(Command::Prune),
            "switch" => Some(Command::Switch(self.arg.clone())),
            "status" => Some(Command::Status),
            _ => None,
        }
    }
}

/// A command the worker knows how to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Sync,
    Prune,
    Switch(String),
    Status,
}

impl From<Command> for DaemonRequest {
    fn from(command: Command) -> Self {
        match command {
            Command::Sync => DaemonRequest::new("sync", ""),
            Command::Prune => DaemonRequest::new("prune", ""),
            Command::Switch(remote) => DaemonRequest::new("switch", remote),
            Command::Status => DaemonRequest::new("status", ""),
        }
    }
}

pub fn encode_request(request: &DaemonRequest) -> Result<Vec<u8>, DaemonError> {
    let body = serde_json::to_vec(request)?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| DaemonError::Protocol(format!("request too large: {} bytes", body.len())))?;

    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub async fn read_request<R>(reader: &mut R) -> Result<DaemonRequest, DaemonError>
where
    R: AsyncRead + Unpin,
{
    let len = reader
        .read_u32()
        .await
        .map_err(|e| io_err("daemon socket read", e))?;
    if len > MAX_FRAME_LEN {
        return Err(DaemonError::Protocol(format!(
            "request frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}"
        )));
    }

    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| io_err("daemon socket read", e))?;
    Ok(serde_json::from_slice(&body)?)
}

/// Send one request to the daemon listening on `socket` and return its reply.
///
/// `Ok(None)` means no daemon is running: the socket file is absent, or it
/// is left over from a daemon that is gone.
pub fn send_command(socket: &Path, request: &DaemonRequest) -> Result<Option<String>, DaemonError> {
    if !socket.exists() {
        return Ok(None);
    }

    let mut stream = match UnixStream::connect(socket) {
        Ok(stream) => stream,
        Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) => {
            tracing::warn!(socket = %socket.display(), error = %err, "ignoring stale daemon socket");
            return Ok(None);
        }
        Err(err) => return Err(io_err(socket, err)),
    };

    let frame = encode_request(request)?;
    stream.write_all(&frame).map_err(|e| io_err(socket, e))?;
    stream.flush().map_err(|e| io_err(socket, e))?;

    let mut reply = String::new();
    stream
        .read_to_string(&mut reply)
        .map_err(|e| io_err(socket, e))?;
    if reply.is_empty() {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }
    Ok(Some(reply))
}
