//! Length-prefixed framing over TCP.
//!
//! Wire format: `[4-byte length as u32 big-endian] + [data]`.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::protocol::error::{Result, RpcError};

/// Maximum frame size (16 MB). Larger frames are rejected before the
/// payload is allocated.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Opens a TCP connection to `host:port`, giving up after `connect_timeout`.
///
/// A timed-out connect surfaces as [`RpcError::Timeout`] so the caller's
/// classification treats it like any other expired deadline.
pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<TcpStream> {
    let addr = format!("{host}:{port}");
    match tokio::time::timeout(connect_timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => {
            // Small request/response frames; latency matters more than
            // throughput here.
            let _ = stream.set_nodelay(true);
            Ok(stream)
        }
        Ok(Err(e)) => Err(RpcError::Connection(format!(
            "failed to connect to {addr}: {e}"
        ))),
        Err(_) => Err(RpcError::Timeout(connect_timeout.as_millis() as u64)),
    }
}

/// Sends one length-prefixed frame.
pub async fn send_message<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> Result<()> {
    let len = data.len() as u32;

    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| map_io_error(e, "writing length prefix"))?;
    writer
        .write_all(data)
        .await
        .map_err(|e| map_io_error(e, "writing data"))?;
    writer
        .flush()
        .await
        .map_err(|e| map_io_error(e, "flushing stream"))?;

    Ok(())
}

/// Receives one length-prefixed frame.
///
/// # Errors
///
/// Returns an error if the peer closed the stream, the frame exceeds
/// [`MAX_MESSAGE_SIZE`], or the read fails.
pub async fn receive_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| map_io_error(e, "reading length prefix"))?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(RpcError::Connection(format!(
            "frame too large: {len} bytes (max {MAX_MESSAGE_SIZE} bytes)"
        )));
    }

    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| map_io_error(e, "reading data"))?;

    Ok(buf)
}

/// Maps I/O errors to the connection-level taxonomy: anything that means the
/// peer is gone becomes `Connection`, the rest stays `Io`.
fn map_io_error(err: std::io::Error, context: &str) -> RpcError {
    match err.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::UnexpectedEof => {
            RpcError::Connection(format!("{context}: connection lost ({err})"))
        }
        _ => RpcError::Io(err),
    }
}
