//! Wire protocol utilities
//!
//! Length-prefixed framing and JSON encoding shared by the tracker and the
//! peer segment server.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{SwarmError, SwarmResult};

/// Largest frame either side will accept
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Read one length-prefixed frame from the stream
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> SwarmResult<Bytes> {
    let mut length_buf = [0u8; 4];
    reader.read_exact(&mut length_buf).await
        .map_err(|e| SwarmError::protocol_error_with_source("Failed to read frame length", e.to_string()))?;
    let length = u32::from_be_bytes(length_buf) as usize;

    if length > MAX_FRAME_LEN {
        return Err(SwarmError::protocol_error_with_source(
            "Frame too large",
            format!("{} bytes (max {})", length, MAX_FRAME_LEN),
        ));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await
        .map_err(|e| SwarmError::protocol_error_with_source("Failed to read frame payload", e.to_string()))?;
    trace!("Read frame of {} bytes", length);
    Ok(Bytes::from(payload))
}

/// Write one length-prefixed frame to the stream
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> SwarmResult<()> {
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    encode_frame(&mut buf, payload)?;
    writer.write_all(&buf).await
        .map_err(|e| SwarmError::protocol_error_with_source("Failed to write frame", e.to_string()))?;
    writer.flush().await
        .map_err(|e| SwarmError::protocol_error_with_source("Failed to flush frame", e.to_string()))?;
    trace!("Wrote frame of {} bytes", payload.len());
    Ok(())
}

/// Serialize a message and write it as one frame
pub async fn write_json<W, T>(writer: &mut W, message: &T) -> SwarmResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(message)?;
    write_frame(writer, &payload).await
}

/// Read one frame and deserialize it
pub async fn read_json<R, T>(reader: &mut R) -> SwarmResult<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let frame = read_frame(reader).await?;
    Ok(serde_json::from_slice(&frame)?)
}

/// Append a length-prefixed frame to the buffer
pub fn encode_frame(buf: &mut BytesMut, payload: &[u8]) -> SwarmResult<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(SwarmError::protocol_error_with_source(
            "Frame too large",
            format!("{} bytes (max {})", payload.len(), MAX_FRAME_LEN),
        ));
    }
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(())
}

/// Take a complete frame off the front of the buffer, if one is there
pub fn decode_frame(buf: &mut BytesMut) -> SwarmResult<Option<Bytes>> {
    if buf.len() < 4 {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if length > MAX_FRAME_LEN {
        return Err(SwarmError::protocol_error("Frame too large"));
    }
    if buf.len() < 4 + length {
        return Ok(None);
    }

    buf.advance(4);
    Ok(Some(buf.split_to(length).freeze()))
}
