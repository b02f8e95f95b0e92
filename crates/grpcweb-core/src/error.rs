//! Error types for the wire-level codecs.

/// Errors produced while parsing a trailer frame
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrailerError {
    #[error("Trailer frame too short: {0} bytes (need at least 5)")]
    Truncated(usize),

    #[error("Not a trailer frame: flag byte {0:#04x}")]
    InvalidFlag(u8),

    #[error("Trailer length mismatch: header says {declared}, payload has {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Malformed trailer line: {0:?}")]
    MalformedLine(String),
}

/// Errors produced by the text-safe transcoding stage
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TextError {
    #[error("Invalid base64 input: {0}")]
    InvalidBase64(String),

    #[error("Base64 input ended with {0} dangling symbol(s)")]
    Incomplete(usize),
}

impl From<base64::DecodeError> for TextError {
    fn from(err: base64::DecodeError) -> Self {
        TextError::InvalidBase64(err.to_string())
    }
}
