//! Frame Codec: length-delimited framing on top of an arbitrary async byte
//! stream. Each frame is a LEB128 varint length prefix followed by a
//! JSON-encoded payload — the same `varint(length) || bytes(length)` framing
//! `go-libp2p-daemon` gets from `ggio.NewDelimitedReader`/`DelimitedWriter`,
//! read and written a byte at a time with `unsigned_varint` rather than
//! buffered protobuf, since the payload here is JSON, not protobuf.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use unsigned_varint::{decode, encode};

/// Default ceiling on a single frame's payload size, well above any single
/// control message but far below a pathological allocation.
pub const DEFAULT_MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: u64, max: u32 },
    #[error("peer closed the connection")]
    Eof,
    #[error("malformed frame payload: {0}")]
    Malformed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads one varint-prefixed unsigned length from `stream`, a byte at a
/// time since the prefix's own length is unknown up front. Returns
/// `FrameError::Eof` if the peer closed the connection cleanly before any
/// byte of a new frame arrived.
async fn read_varint_len<R: AsyncRead + Unpin>(stream: &mut R) -> Result<u64, FrameError> {
    let mut buf = [0u8; 10]; // enough bytes for a u64 LEB128 varint
    for i in 0..buf.len() {
        let mut byte = [0u8; 1];
        match stream.read_exact(&mut byte).await {
            Ok(_) => {},
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof && i == 0 => {
                return Err(FrameError::Eof);
            },
            Err(e) => return Err(e.into()),
        }
        buf[i] = byte[0];
        if byte[0] & 0x80 == 0 {
            let (len, _) = decode::u64(&buf[..=i])
                .map_err(|e| FrameError::Malformed(format!("bad varint length: {e}")))?;
            return Ok(len);
        }
    }
    Err(FrameError::Malformed("varint length prefix too long".into()))
}

/// Reads one length-prefixed JSON frame from `stream`.
pub async fn read_frame<R, T>(stream: &mut R, max_frame_bytes: u32) -> Result<T, FrameError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = read_varint_len(stream).await?;
    if len > max_frame_bytes as u64 {
        return Err(FrameError::TooLarge { len, max: max_frame_bytes });
    }

    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await?;

    serde_json::from_slice(&body)
        .map_err(|e| FrameError::Malformed(format!("{e}: {}", String::from_utf8_lossy(&body))))
}

/// Writes one length-prefixed JSON frame to `stream`.
pub async fn write_frame<W, T>(
    stream: &mut W,
    value: &T,
    max_frame_bytes: u32,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(value)
        .map_err(|e| FrameError::Malformed(format!("encode: {e}")))?;
    let len = body.len() as u64;
    if len > max_frame_bytes as u64 {
        return Err(FrameError::TooLarge { len, max: max_frame_bytes });
    }

    let mut len_buf = encode::u64_buffer();
    let len_prefix = encode::u64(len, &mut len_buf);
    stream.write_all(len_prefix).await?;
    stream.write_all(&body).await?;
    Ok(())
}

/// Races `fut` against `timeout`, translating either outcome into an
/// `anyhow::Error` labeled with `label`. Mirrors the teacher's
/// `io_with_timeout`, generalized beyond I/O futures and cancellation tokens
/// since frame I/O here is bounded by a plain deadline rather than a shared
/// cancellation signal.
pub async fn with_timeout<F, T>(label: &'static str, fut: F, timeout: Duration) -> Result<T>
where
    F: Future<Output = Result<T, FrameError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(anyhow!("{label}: {e}")),
        Err(_) => Err(anyhow!("{label}: timed out after {timeout:?}")),
    }
}
