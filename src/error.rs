//! Unified error types for stream-core

use std::fmt;

use crate::stream::{StreamAction, StreamState};

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all stream-core operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Stream path has fewer than two "/"-separated segments
    BadPath(String),
    /// Action submitted after the stream transitioned to Closed
    StreamClosed,
    /// A track with the same name already exists on the stream
    DuplicateTrackName(String),
    /// Container-framed payload shorter than the minimum header
    ShortWrite { len: usize },
    /// Action not allowed from the current state
    BadTransition {
        from: StreamState,
        action: StreamAction,
    },
    /// Codec parsing or sequence-header construction failure
    Codec(CodecError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadPath(path) => write!(f, "Bad stream path: {}", path),
            Error::StreamClosed => write!(f, "Stream is closed"),
            Error::DuplicateTrackName(name) => write!(f, "Duplicate track name: {}", name),
            Error::ShortWrite { len } => write!(f, "Frame too short: {} bytes", len),
            Error::BadTransition { from, action } => {
                write!(f, "Action {} not allowed in state {}", action, from)
            }
            Error::Codec(e) => write!(f, "Codec error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        Error::Codec(err)
    }
}

/// Codec-level errors (HEVC parsing, RTP packetization)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Sequence header missing, truncated, or malformed
    InvalidSequenceHeader,
    /// Sequence header does not contain all of VPS/SPS/PPS
    MissingParameterSet(&'static str),
    /// SPS bitstream could not be parsed
    InvalidSps,
    /// NALU shorter than its two-byte header
    InvalidNalu,
    /// RTP payload truncated mid-structure
    TruncatedPayload,
    /// Fragmentation unit sequence violated (missing start, stray end)
    InvalidFragment,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::InvalidSequenceHeader => write!(f, "Invalid HEVC sequence header"),
            CodecError::MissingParameterSet(which) => {
                write!(f, "Missing parameter set: {}", which)
            }
            CodecError::InvalidSps => write!(f, "Invalid HEVC SPS"),
            CodecError::InvalidNalu => write!(f, "Invalid NAL unit"),
            CodecError::TruncatedPayload => write!(f, "Truncated RTP payload"),
            CodecError::InvalidFragment => write!(f, "Invalid fragmentation unit sequence"),
        }
    }
}

impl std::error::Error for CodecError {}
