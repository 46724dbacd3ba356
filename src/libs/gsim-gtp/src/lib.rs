//! GSIM GTPv2-C Codec Library
//!
//! Wire encoding and decoding for the GTPv2-C control plane (3GPP TS 29.274),
//! restricted to the session-management message set the simulator exercises.
//! The simulation engine treats a message as {type, TEID, sequence number,
//! payload}; information-element contents beyond the standard mandatory set
//! are opaque to it.

pub mod error;
pub mod header;
pub mod message;
pub mod seq;


pub use error::{GtpError, GtpResult};
pub use header::{Gtp2Header, GTPV2C_HEADER_LEN, GTPV2C_HEADER_LEN_NO_TEID};
pub use message::{Gtp2Message, Gtp2MessageType};
pub use seq::{SequencePool, TeidPool};

/// GTPv2-C UDP port (2123)
pub const GTPV2_C_UDP_PORT: u16 = 2123;

/// Sequence numbers are 24 bits on the wire
pub const GTP2_SQN_MAX: u32 = 0x00FF_FFFF;
