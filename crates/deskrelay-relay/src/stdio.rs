// crates/deskrelay-relay/src/stdio.rs
// ============================================================================
// Module: Stdio Transport
// Description: Content-Length framed session over stdin/stdout.
// Purpose: Serve the relay to an orchestration process over a pipe.
// Dependencies: tokio
// ============================================================================

//! ## Overview
//! Each message is a `Content-Length: N` header block followed by `N` bytes of
//! JSON. End of input at a frame boundary ends the session cleanly; a
//! truncated or oversized frame is a transport error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;

use crate::RelayError;
use crate::relay::Relay;
use crate::session::Session;

// ============================================================================
// SECTION: Transport
// ============================================================================

/// Serves one session over the process stdin and stdout.
///
/// # Errors
///
/// Returns [`RelayError::Transport`] on framing or I/O failures.
pub async fn serve_stdio(relay: &Relay) -> Result<(), RelayError> {
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut writer = tokio::io::stdout();
    serve_framed(relay, &mut reader, &mut writer).await
}

/// Serves one session over any framed byte stream.
///
/// # Errors
///
/// Returns [`RelayError::Transport`] on framing or I/O failures.
pub async fn serve_framed<R, W>(
    relay: &Relay,
    reader: &mut R,
    writer: &mut W,
) -> Result<(), RelayError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut session = Session::new(relay);
    while let Some(bytes) = read_framed(reader, relay.max_frame_bytes()).await? {
        let reply = session.handle(&bytes).await;
        let payload = serde_json::to_vec(&reply.message)
            .map_err(|_| RelayError::Transport("reply serialization failed".to_string()))?;
        write_framed(writer, &payload).await?;
        if reply.close {
            break;
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Framing
// ============================================================================

/// Reads one framed payload; `None` at end of input before a header.
///
/// # Errors
///
/// Returns [`RelayError::Transport`] when the frame is malformed, truncated,
/// or larger than `max_body_bytes`.
pub async fn read_framed<R>(
    reader: &mut R,
    max_body_bytes: usize,
) -> Result<Option<Vec<u8>>, RelayError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader
            .read_line(&mut line)
            .await
            .map_err(|_| RelayError::Transport("stdio read failed".to_string()))?;
        if bytes == 0 {
            if saw_header {
                return Err(RelayError::Transport("stdio closed mid-frame".to_string()));
            }
            return Ok(None);
        }
        if line.trim().is_empty() {
            if saw_header {
                break;
            }
            continue;
        }
        saw_header = true;
        if let Some(value) = line.strip_prefix("Content-Length:") {
            let parsed = value
                .trim()
                .parse::<usize>()
                .map_err(|_| RelayError::Transport("invalid content length".to_string()))?;
            content_length = Some(parsed);
        }
    }
    let len =
        content_length.ok_or_else(|| RelayError::Transport("missing content length".to_string()))?;
    if len > max_body_bytes {
        return Err(RelayError::Transport("payload too large".to_string()));
    }
    let mut buf = vec![0_u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|_| RelayError::Transport("stdio read failed".to_string()))?;
    Ok(Some(buf))
}

/// Writes one framed payload.
///
/// # Errors
///
/// Returns [`RelayError::Transport`] when writing fails.
pub async fn write_framed<W>(writer: &mut W, payload: &[u8]) -> Result<(), RelayError>
where
    W: AsyncWrite + Unpin,
{
    let header = format!("Content-Length: {}\r\n\r\n", payload.len());
    writer
        .write_all(header.as_bytes())
        .await
        .map_err(|_| RelayError::Transport("stdio write failed".to_string()))?;
    writer
        .write_all(payload)
        .await
        .map_err(|_| RelayError::Transport("stdio write failed".to_string()))?;
    writer.flush().await.map_err(|_| RelayError::Transport("stdio write failed".to_string()))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
