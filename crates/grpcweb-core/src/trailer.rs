//! gRPC-Web trailer frame.
//!
//! Frame format: [0x80][length u32 big-endian][payload]
//! Payload: `name:value\r\n` for every trailing metadata entry, in order.
//!
//! The frame is appended to the response body after the last message, which
//! is how gRPC-Web carries trailers over a plain HTTP response.

use crate::error::TrailerError;
use bytes::{BufMut, Bytes, BytesMut};
use http::{HeaderName, HeaderValue};

/// Flag byte marking a trailer frame (MSB of the gRPC frame flags)
pub const TRAILER_FLAG: u8 = 0x80;

/// Flag byte plus the 4-byte length prefix
pub const TRAILER_HEADER_LEN: usize = 5;

/// Largest payload the 4-byte length prefix can describe
pub const MAX_TRAILER_PAYLOAD: usize = u32::MAX as usize;

/// Encode trailing metadata as a complete trailer frame
///
/// Entries that would push the payload past [`MAX_TRAILER_PAYLOAD`] are left
/// out, along with everything after them.
pub fn encode_trailers<'a, I>(trailers: I) -> Bytes
where
    I: IntoIterator<Item = (&'a HeaderName, &'a HeaderValue)>,
{
    encode_with_limit(trailers, MAX_TRAILER_PAYLOAD)
}

fn encode_with_limit<'a, I>(trailers: I, limit: usize) -> Bytes
where
    I: IntoIterator<Item = (&'a HeaderName, &'a HeaderValue)>,
{
    let mut payload = BytesMut::new();
    for (name, value) in trailers {
        let line_len = name.as_str().len() + 1 + value.len() + 2;
        if line_len > limit - payload.len() {
            break;
        }
        payload.put_slice(name.as_str().as_bytes());
        payload.put_u8(b':');
        payload.put_slice(value.as_bytes());
        payload.put_slice(b"\r\n");
    }

    let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    let mut frame = BytesMut::with_capacity(TRAILER_HEADER_LEN + payload.len());
    frame.put_u8(TRAILER_FLAG);
    frame.put_u32(len);
    frame.put_slice(&payload);
    frame.freeze()
}

/// Parse a complete trailer frame back into `(name, value)` pairs
pub fn parse_trailer_frame(frame: &[u8]) -> Result<Vec<(String, String)>, TrailerError> {
    if frame.len() < TRAILER_HEADER_LEN {
        return Err(TrailerError::Truncated(frame.len()));
    }
    if frame[0] != TRAILER_FLAG {
        return Err(TrailerError::InvalidFlag(frame[0]));
    }

    let declared = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
    let payload = &frame[TRAILER_HEADER_LEN..];
    if payload.len() != declared {
        return Err(TrailerError::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }

    let text = std::str::from_utf8(payload)
        .map_err(|_| TrailerError::MalformedLine(String::from_utf8_lossy(payload).into_owned()))?;

    let mut entries = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let (line, tail) = rest
            .split_once("\r\n")
            .ok_or_else(|| TrailerError::MalformedLine(rest.to_string()))?;
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| TrailerError::MalformedLine(line.to_string()))?;
        entries.push((name.to_string(), value.to_string()));
        rest = tail;
    }

    Ok(entries)
}
