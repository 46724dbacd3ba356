//! GTPv2-C header
//!
//! Fixed header layout per 3GPP TS 29.274 section 5.1: flags, message type,
//! length, optional TEID, 24-bit sequence number plus a spare octet.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{GtpError, GtpResult};
use crate::GTP2_SQN_MAX;

/// Header length with TEID present
pub const GTPV2C_HEADER_LEN: usize = 12;

/// Header length without TEID (Echo, Version Not Supported)
pub const GTPV2C_HEADER_LEN_NO_TEID: usize = 8;

/// GTPv2-C message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gtp2Header {
    /// Piggybacked flag (P bit)
    pub piggybacked: bool,
    /// Message type octet
    pub message_type: u8,
    /// Length of everything after the first four octets
    pub length: u16,
    /// Tunnel Endpoint Identifier; `None` when the T bit is clear
    pub teid: Option<u32>,
    /// Sequence number, 24 bits
    pub sequence_number: u32,
}

impl Gtp2Header {
    /// Header for a message that carries a TEID
    pub fn new(message_type: u8, teid: u32, sequence_number: u32) -> Self {
        Self {
            piggybacked: false,
            message_type,
            length: 0,
            teid: Some(teid),
            sequence_number,
        }
    }

    /// Header for a TEID-less message (path management)
    pub fn new_no_teid(message_type: u8, sequence_number: u32) -> Self {
        Self {
            piggybacked: false,
            message_type,
            length: 0,
            teid: None,
            sequence_number,
        }
    }

    /// Total encoded header length
    pub fn header_len(&self) -> usize {
        if self.teid.is_some() {
            GTPV2C_HEADER_LEN
        } else {
            GTPV2C_HEADER_LEN_NO_TEID
        }
    }

    fn flags(&self) -> u8 {
        let mut flags = 2 << 5; // version 2
        if self.piggybacked {
            flags |= 0x10;
        }
        if self.teid.is_some() {
            flags |= 0x08;
        }
        flags
    }

    /// Encode the header, with `length` already set by the caller
    pub fn encode(&self, buf: &mut BytesMut) -> GtpResult<()> {
        if self.sequence_number > GTP2_SQN_MAX {
            return Err(GtpError::SequenceOutOfRange(self.sequence_number));
        }
        buf.put_u8(self.flags());
        buf.put_u8(self.message_type);
        buf.put_u16(self.length);
        if let Some(teid) = self.teid {
            buf.put_u32(teid);
        }
        // 24-bit sequence number followed by a spare octet
        buf.put_u32(self.sequence_number << 8);
        Ok(())
    }

    /// Decode a header, consuming it from `buf`
    pub fn decode(buf: &mut Bytes) -> GtpResult<Self> {
        if buf.remaining() < 4 {
            return Err(GtpError::BufferTooShort {
                needed: 4,
                available: buf.remaining(),
            });
        }

        let flags = buf.get_u8();
        let version = flags >> 5;
        if version != 2 {
            return Err(GtpError::InvalidVersion(version));
        }
        let piggybacked = (flags & 0x10) != 0;
        let teid_present = (flags & 0x08) != 0;

        let message_type = buf.get_u8();
        let length = buf.get_u16();

        let needed = if teid_present { 8 } else { 4 };
        if buf.remaining() < needed {
            return Err(GtpError::BufferTooShort {
                needed,
                available: buf.remaining(),
            });
        }

        let teid = if teid_present {
            Some(buf.get_u32())
        } else {
            None
        };
        let sequence_number = buf.get_u32() >> 8;

        Ok(Self {
            piggybacked,
            message_type,
            length,
            teid,
            sequence_number,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_with_teid() {
        let mut hdr = Gtp2Header::new(32, 0xdead_beef, 0x00ab_cdef);
        hdr.length = 24;

        let mut buf = BytesMut::new();
        hdr.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), GTPV2C_HEADER_LEN);

        let decoded = Gtp2Header::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, hdr);
    }

    #[test]
    fn test_roundtrip_without_teid() {
        let hdr = Gtp2Header::new_no_teid(1, 42);

        let mut buf = BytesMut::new();
        hdr.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), GTPV2C_HEADER_LEN_NO_TEID);

        let decoded = Gtp2Header::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded.teid, None);
        assert_eq!(decoded.sequence_number, 42);
    }

    #[test]
    fn test_rejects_wrong_version() {
        // GTPv1 flags octet
        let raw = Bytes::from_static(&[0x30, 0x01, 0x00, 0x04, 0x00, 0x00, 0x2a, 0x00]);
        let err = Gtp2Header::decode(&mut raw.clone()).unwrap_err();
        assert_eq!(err, GtpError::InvalidVersion(1));
    }

    #[test]
    fn test_rejects_truncated_header() {
        let raw = Bytes::from_static(&[0x48, 0x20, 0x00]);
        let err = Gtp2Header::decode(&mut raw.clone()).unwrap_err();
        assert!(matches!(err, GtpError::BufferTooShort { .. }));
    }

    #[test]
    fn test_rejects_oversize_sequence() {
        let hdr = Gtp2Header::new_no_teid(1, 0x0100_0000);
        let mut buf = BytesMut::new();
        assert!(matches!(
            hdr.encode(&mut buf),
            Err(GtpError::SequenceOutOfRange(_))
        ));
    }
}
