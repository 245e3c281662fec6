//! JSON-over-newline framing for the coordinator ⇄ child sockets
//!
//! Each message is a single line of JSON followed by `\n`. The Unix stream
//! gives reliable in-order delivery per (src, dst) pair; nothing here relies
//! on ordering across pairs.

use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixListener;
use tracing::debug;

/// Maximum size of a single wire message.
pub const MAX_WIRE_MESSAGE: usize = 64 * 1024;

/// Socket path for the coordinator within a run directory.
pub fn master_socket_path(run_dir: &Path) -> PathBuf {
    run_dir.join("master.sock")
}

/// Create and bind the coordinator's listening socket.
///
/// Handles cleanup of stale socket files from previous runs.
pub fn bind_listener(socket_path: &Path) -> Result<UnixListener> {
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
    }

    if socket_path.exists() {
        debug!(?socket_path, "Removing stale socket");
        std::fs::remove_file(socket_path).context("Failed to remove stale socket")?;
    }

    let listener = UnixListener::bind(socket_path).context("Failed to bind coordinator socket")?;
    debug!(?socket_path, "Socket bound");

    Ok(listener)
}

/// Remove the socket file on shutdown.
pub fn cleanup_socket(socket_path: &Path) {
    if socket_path.exists() {
        if let Err(e) = std::fs::remove_file(socket_path) {
            tracing::warn!(?socket_path, error = %e, "Failed to remove socket file");
        }
    }
}

/// Read one message from the stream.
///
/// Returns `Ok(None)` on a clean end of stream. Oversized or malformed lines
/// are errors; the caller is expected to drop the connection.
pub async fn read_message<T, R>(reader: &mut R) -> Result<Option<T>>
where
    T: DeserializeOwned,
    R: AsyncBufReadExt + Unpin,
{
    let mut line = String::new();
    let bytes_read = reader.read_line(&mut line).await.context("Failed to read wire message")?;

    if bytes_read == 0 {
        return Ok(None);
    }

    if bytes_read > MAX_WIRE_MESSAGE {
        return Err(eyre::eyre!("Wire message too large: {} bytes", bytes_read));
    }

    let msg: T = serde_json::from_str(line.trim()).context("Failed to parse wire message")?;
    Ok(Some(msg))
}

/// Send one message on the stream.
pub async fn send_message<T, W>(writer: &mut W, msg: &T) -> Result<()>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(msg).context("Failed to serialize wire message")?;

    if json.len() > MAX_WIRE_MESSAGE {
        return Err(eyre::eyre!("Wire message too large: {} bytes", json.len()));
    }

    writer
        .write_all(json.as_bytes())
        .await
        .context("Failed to write wire message")?;
    writer.write_all(b"\n").await.context("Failed to write newline")?;
    writer.flush().await.context("Failed to flush stream")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ids::AttemptId;
    use crate::protocol::messages::ChildToMaster;
    use tempfile::TempDir;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_send_then_read_roundtrip() {
        let (client, server) = tokio::io::duplex(4096);
        let (_, mut write_half) = tokio::io::split(client);
        let (read_half, _) = tokio::io::split(server);
        let mut reader = BufReader::new(read_half);

        let msg = ChildToMaster::Ping {
            attempt_id: AttemptId(4),
        };
        send_message(&mut write_half, &msg).await.unwrap();

        let read: Option<ChildToMaster> = read_message(&mut reader).await.unwrap();
        assert_eq!(read, Some(msg));
    }

    #[tokio::test]
    async fn test_read_clean_eof_returns_none() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);
        let (read_half, _) = tokio::io::split(server);
        let mut reader = BufReader::new(read_half);

        let read: Option<ChildToMaster> = read_message(&mut reader).await.unwrap();
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn test_read_rejects_garbage() {
        let (client, server) = tokio::io::duplex(64);
        let (_, mut write_half) = tokio::io::split(client);
        let (read_half, _) = tokio::io::split(server);
        let mut reader = BufReader::new(read_half);

        write_half.write_all(b"not json\n").await.unwrap();

        let read: Result<Option<ChildToMaster>> = read_message(&mut reader).await;
        assert!(read.is_err());
    }

    #[tokio::test]
    async fn test_send_rejects_oversized_message() {
        let (client, _server) = tokio::io::duplex(64);
        let (_, mut write_half) = tokio::io::split(client);

        let msg = ChildToMaster::ChildAck {
            attempt_id: AttemptId(0),
            address: "x".repeat(MAX_WIRE_MESSAGE),
        };
        let result = send_message(&mut write_half, &msg).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_bind_listener_creates_parent_dir() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("run").join("master.sock");

        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        let listener = bind_listener(&socket_path);
        assert!(listener.is_ok());
        assert!(socket_path.exists());
    }

    #[test]
    fn test_bind_listener_removes_stale_socket() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("master.sock");
        std::fs::write(&socket_path, "stale").unwrap();

        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        assert!(bind_listener(&socket_path).is_ok());
    }

    #[test]
    fn test_master_socket_path() {
        let path = master_socket_path(Path::new("/tmp/aft"));
        assert!(path.ends_with("master.sock"));
    }
}
