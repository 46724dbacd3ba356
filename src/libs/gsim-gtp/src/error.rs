//! GTP codec error types

use thiserror::Error;

/// GTP codec error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GtpError {
    /// Buffer too short for the structure being decoded
    #[error("buffer too short: need {needed} bytes, have {available}")]
    BufferTooShort { needed: usize, available: usize },

    /// Version field is not GTPv2
    #[error("invalid GTP version: {0}")]
    InvalidVersion(u8),

    /// Message type octet not in the supported set
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    /// Header length field disagrees with the datagram length
    #[error("invalid message length: header says {declared}, datagram has {actual}")]
    InvalidLength { declared: usize, actual: usize },

    /// Sequence number does not fit in 24 bits
    #[error("sequence number out of range: {0:#x}")]
    SequenceOutOfRange(u32),
}

pub type GtpResult<T> = Result<T, GtpError>;
