//! Streaming base64 transcoding for `application/grpc-web-text`.
//!
//! Both directions accept input split at arbitrary chunk boundaries. The
//! encoder holds back up to 2 bytes and the decoder up to 3 symbols until
//! more input arrives or the stream is finished.

use crate::error::TextError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{Bytes, BytesMut};

/// Incremental base64 encoder for the response direction
#[derive(Debug, Default)]
pub struct Base64Encoder {
    pending: BytesMut,
}

impl Base64Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode every complete 3-byte group seen so far
    pub fn push(&mut self, input: &[u8]) -> Bytes {
        self.pending.extend_from_slice(input);
        let whole = self.pending.len() - self.pending.len() % 3;
        if whole == 0 {
            return Bytes::new();
        }
        let group = self.pending.split_to(whole);
        Bytes::from(STANDARD.encode(&group))
    }

    /// Encode the held-back tail with padding
    pub fn finish(&mut self) -> Bytes {
        if self.pending.is_empty() {
            return Bytes::new();
        }
        let tail = self.pending.split();
        Bytes::from(STANDARD.encode(&tail))
    }
}

/// Incremental base64 decoder for the request direction
///
/// Browsers base64 each message separately, so a request body may be several
/// padded segments back to back (`AAAA...==AAAA...`). A padded quantum ends
/// one segment and decoding resumes with the next.
#[derive(Debug, Default)]
pub struct Base64Decoder {
    pending: Vec<u8>,
}

impl Base64Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode every complete 4-symbol quantum seen so far
    pub fn push(&mut self, input: &[u8]) -> Result<Bytes, TextError> {
        self.pending
            .extend(input.iter().copied().filter(|b| !b.is_ascii_whitespace()));
        let whole = self.pending.len() - self.pending.len() % 4;
        if whole == 0 {
            return Ok(Bytes::new());
        }
        let quanta: Vec<u8> = self.pending.drain(..whole).collect();
        decode_quanta(&quanta)
    }

    /// Fails if the input ended inside a quantum
    pub fn finish(&mut self) -> Result<Bytes, TextError> {
        if self.pending.is_empty() {
            Ok(Bytes::new())
        } else {
            Err(TextError::Incomplete(self.pending.len()))
        }
    }
}

fn decode_quanta(symbols: &[u8]) -> Result<Bytes, TextError> {
    let mut out = Vec::with_capacity(symbols.len() / 4 * 3);
    let mut start = 0;
    for end in (4..=symbols.len()).step_by(4) {
        if symbols[end - 1] == b'=' {
            STANDARD.decode_vec(&symbols[start..end], &mut out)?;
            start = end;
        }
    }
    if start < symbols.len() {
        STANDARD.decode_vec(&symbols[start..], &mut out)?;
    }
    Ok(Bytes::from(out))
}
