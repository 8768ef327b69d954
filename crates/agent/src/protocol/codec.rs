// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frame encode/decode against byte slices and async streams.
//!
//! The slice-based entry points are the single source of truth for the
//! header layout; the stream entry points read exactly one header and
//! exactly one payload so a framing error never desynchronizes the reader
//! silently.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{CodecError, Frame, FrameType, HEADER_LEN, MAX_MESSAGE_SIZE};

/// Encode a frame into a single contiguous buffer (header + payload).
pub fn encode(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + frame.payload.len());
    buf.put_u8(frame.version);
    buf.put_i32(frame.session_id);
    buf.put_u8(frame.frame_type.code());
    buf.put_u32(frame.payload.len() as u32);
    buf.extend_from_slice(&frame.payload);
    buf.freeze()
}

/// Decode one frame from a byte slice. The slice must contain exactly one
/// frame; framing is externally delimited (one frame per transport
/// message), so trailing bytes mean the declared length was wrong.
pub fn decode(buf: &[u8]) -> Result<Frame, CodecError> {
    let (frame, consumed) = decode_prefix(buf, MAX_MESSAGE_SIZE)?;
    if consumed != buf.len() {
        return Err(CodecError::IncompletePayload {
            expected: consumed - HEADER_LEN,
            got: buf.len() - HEADER_LEN,
        });
    }
    Ok(frame)
}

/// Decode a frame from the front of `buf`, returning it and the number of
/// bytes consumed. Validates the declared length against `max_payload`
/// before touching the payload bytes.
pub fn decode_prefix(buf: &[u8], max_payload: u32) -> Result<(Frame, usize), CodecError> {
    if buf.len() < HEADER_LEN {
        return Err(CodecError::IncompleteHeader { got: buf.len() });
    }

    let version = buf[0];
    let session_id = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
    let type_code = buf[5];
    let payload_len = u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]);

    if payload_len > max_payload {
        return Err(CodecError::PayloadTooLarge {
            declared: payload_len,
            max: max_payload,
        });
    }
    let frame_type = FrameType::from_code(type_code)?;

    let total = HEADER_LEN + payload_len as usize;
    if buf.len() < total {
        return Err(CodecError::IncompletePayload {
            expected: payload_len as usize,
            got: buf.len() - HEADER_LEN,
        });
    }

    let payload = Bytes::copy_from_slice(&buf[HEADER_LEN..total]);
    Ok((
        Frame {
            version,
            session_id,
            frame_type,
            payload,
        },
        total,
    ))
}

/// Read exactly one frame from an async byte stream.
///
/// Reads the 10-byte header, validates length and type, then reads exactly
/// `payload_len` bytes. Short reads surface as `IncompleteHeader` /
/// `IncompletePayload`; the length check runs before the payload is
/// allocated.
pub async fn read_frame<R>(reader: &mut R, max_payload: u32) -> anyhow::Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            return Err(CodecError::IncompleteHeader { got: filled }.into());
        }
        filled += n;
    }

    let version = header[0];
    let session_id = i32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    let frame_type = FrameType::from_code(header[5])?;
    let payload_len = u32::from_be_bytes([header[6], header[7], header[8], header[9]]);

    if payload_len > max_payload {
        return Err(CodecError::PayloadTooLarge {
            declared: payload_len,
            max: max_payload,
        }
        .into());
    }

    let mut payload = vec![0u8; payload_len as usize];
    let mut filled = 0;
    while filled < payload.len() {
        let n = reader.read(&mut payload[filled..]).await?;
        if n == 0 {
            return Err(CodecError::IncompletePayload {
                expected: payload.len(),
                got: filled,
            }
            .into());
        }
        filled += n;
    }

    Ok(Frame {
        version,
        session_id,
        frame_type,
        payload: Bytes::from(payload),
    })
}

/// Write one frame to an async byte stream.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let encoded = encode(frame);
    writer.write_all(&encoded).await?;
    Ok(())
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
