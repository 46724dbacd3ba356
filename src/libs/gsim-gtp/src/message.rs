//! Logical GTPv2-C messages
//!
//! The simulator works on a logical message: a typed header plus an opaque
//! payload of information elements. Templates fill in the standard mandatory
//! IEs for each message type so that real peers accept the traffic; nothing
//! in the engine inspects them.

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{GtpError, GtpResult};
use crate::header::Gtp2Header;

/// GTPv2-C message types used in simulation scenarios
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Gtp2MessageType {
    EchoRequest = 1,
    EchoResponse = 2,
    CreateSessionRequest = 32,
    CreateSessionResponse = 33,
    ModifyBearerRequest = 34,
    ModifyBearerResponse = 35,
    DeleteSessionRequest = 36,
    DeleteSessionResponse = 37,
    CreateBearerRequest = 95,
    CreateBearerResponse = 96,
    DeleteBearerRequest = 99,
    DeleteBearerResponse = 100,
    ReleaseAccessBearersRequest = 170,
    ReleaseAccessBearersResponse = 171,
    DownlinkDataNotification = 176,
    DownlinkDataNotificationAcknowledge = 177,
}

impl TryFrom<u8> for Gtp2MessageType {
    type Error = GtpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::EchoRequest),
            2 => Ok(Self::EchoResponse),
            32 => Ok(Self::CreateSessionRequest),
            33 => Ok(Self::CreateSessionResponse),
            34 => Ok(Self::ModifyBearerRequest),
            35 => Ok(Self::ModifyBearerResponse),
            36 => Ok(Self::DeleteSessionRequest),
            37 => Ok(Self::DeleteSessionResponse),
            95 => Ok(Self::CreateBearerRequest),
            96 => Ok(Self::CreateBearerResponse),
            99 => Ok(Self::DeleteBearerRequest),
            100 => Ok(Self::DeleteBearerResponse),
            170 => Ok(Self::ReleaseAccessBearersRequest),
            171 => Ok(Self::ReleaseAccessBearersResponse),
            176 => Ok(Self::DownlinkDataNotification),
            177 => Ok(Self::DownlinkDataNotificationAcknowledge),
            other => Err(GtpError::UnknownMessageType(other)),
        }
    }
}

impl Gtp2MessageType {
    /// Scenario-file name of the message
    pub fn name(self) -> &'static str {
        match self {
            Self::EchoRequest => "echo-request",
            Self::EchoResponse => "echo-response",
            Self::CreateSessionRequest => "create-session-request",
            Self::CreateSessionResponse => "create-session-response",
            Self::ModifyBearerRequest => "modify-bearer-request",
            Self::ModifyBearerResponse => "modify-bearer-response",
            Self::DeleteSessionRequest => "delete-session-request",
            Self::DeleteSessionResponse => "delete-session-response",
            Self::CreateBearerRequest => "create-bearer-request",
            Self::CreateBearerResponse => "create-bearer-response",
            Self::DeleteBearerRequest => "delete-bearer-request",
            Self::DeleteBearerResponse => "delete-bearer-response",
            Self::ReleaseAccessBearersRequest => "release-access-bearers-request",
            Self::ReleaseAccessBearersResponse => "release-access-bearers-response",
            Self::DownlinkDataNotification => "downlink-data-notification",
            Self::DownlinkDataNotificationAcknowledge => "downlink-data-notification-ack",
        }
    }

    /// True for request/notification messages that open a transaction
    pub fn is_request(self) -> bool {
        matches!(
            self,
            Self::EchoRequest
                | Self::CreateSessionRequest
                | Self::ModifyBearerRequest
                | Self::DeleteSessionRequest
                | Self::CreateBearerRequest
                | Self::DeleteBearerRequest
                | Self::ReleaseAccessBearersRequest
                | Self::DownlinkDataNotification
        )
    }

    /// True for responses/acknowledgements that close a transaction
    pub fn is_response(self) -> bool {
        !self.is_request()
    }

    /// Response type that answers this request, if it is a request
    pub fn expected_response(self) -> Option<Gtp2MessageType> {
        match self {
            Self::EchoRequest => Some(Self::EchoResponse),
            Self::CreateSessionRequest => Some(Self::CreateSessionResponse),
            Self::ModifyBearerRequest => Some(Self::ModifyBearerResponse),
            Self::DeleteSessionRequest => Some(Self::DeleteSessionResponse),
            Self::CreateBearerRequest => Some(Self::CreateBearerResponse),
            Self::DeleteBearerRequest => Some(Self::DeleteBearerResponse),
            Self::ReleaseAccessBearersRequest => Some(Self::ReleaseAccessBearersResponse),
            Self::DownlinkDataNotification => Some(Self::DownlinkDataNotificationAcknowledge),
            _ => None,
        }
    }

    /// Path-management messages are sent without a TEID field
    pub fn carries_teid(self) -> bool {
        !matches!(self, Self::EchoRequest | Self::EchoResponse)
    }
}

impl fmt::Display for Gtp2MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Gtp2MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "echo-request" => Ok(Self::EchoRequest),
            "echo-response" => Ok(Self::EchoResponse),
            "create-session-request" => Ok(Self::CreateSessionRequest),
            "create-session-response" => Ok(Self::CreateSessionResponse),
            "modify-bearer-request" => Ok(Self::ModifyBearerRequest),
            "modify-bearer-response" => Ok(Self::ModifyBearerResponse),
            "delete-session-request" => Ok(Self::DeleteSessionRequest),
            "delete-session-response" => Ok(Self::DeleteSessionResponse),
            "create-bearer-request" => Ok(Self::CreateBearerRequest),
            "create-bearer-response" => Ok(Self::CreateBearerResponse),
            "delete-bearer-request" => Ok(Self::DeleteBearerRequest),
            "delete-bearer-response" => Ok(Self::DeleteBearerResponse),
            "release-access-bearers-request" => Ok(Self::ReleaseAccessBearersRequest),
            "release-access-bearers-response" => Ok(Self::ReleaseAccessBearersResponse),
            "downlink-data-notification" => Ok(Self::DownlinkDataNotification),
            "downlink-data-notification-ack" => Ok(Self::DownlinkDataNotificationAcknowledge),
            other => Err(format!("unknown GTPv2-C message name: {other}")),
        }
    }
}

// IE type octets used by the payload templates
const IE_IMSI: u8 = 1;
const IE_CAUSE: u8 = 2;
const IE_RECOVERY: u8 = 3;
const IE_RAT_TYPE: u8 = 82;
const IE_EBI: u8 = 73;

const CAUSE_REQUEST_ACCEPTED: u8 = 16;
const RAT_TYPE_EUTRAN: u8 = 6;
const DEFAULT_EBI: u8 = 5;

/// A decoded (or to-be-encoded) GTPv2-C message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gtp2Message {
    /// Message type
    pub msg_type: Gtp2MessageType,
    /// Tunnel endpoint identifier of the receiving end (0 for initial messages)
    pub teid: u32,
    /// Sequence number, the engine's transaction id
    pub sqn: u32,
    /// Encoded information elements, opaque to the engine
    pub payload: Bytes,
}

impl Gtp2Message {
    /// Build a message with the standard mandatory IEs for its type
    pub fn with_template(msg_type: Gtp2MessageType, teid: u32, sqn: u32) -> Self {
        Self {
            msg_type,
            teid,
            sqn,
            payload: template_payload(msg_type),
        }
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> GtpResult<Bytes> {
        let mut header = if self.msg_type.carries_teid() {
            Gtp2Header::new(self.msg_type as u8, self.teid, self.sqn)
        } else {
            Gtp2Header::new_no_teid(self.msg_type as u8, self.sqn)
        };
        header.length = (header.header_len() - 4 + self.payload.len()) as u16;

        let mut buf = BytesMut::with_capacity(header.header_len() + self.payload.len());
        header.encode(&mut buf)?;
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Decode from wire bytes
    pub fn decode(raw: Bytes) -> GtpResult<Self> {
        let mut buf = raw;
        let header = Gtp2Header::decode(&mut buf)?;
        let msg_type = Gtp2MessageType::try_from(header.message_type)?;

        // The length field covers the TEID/sequence part of the header too;
        // a value smaller than that remainder is malformed, not a payload.
        let declared = (header.length as usize + 4)
            .checked_sub(header.header_len())
            .ok_or(GtpError::InvalidLength {
                declared: header.length as usize,
                actual: buf.len(),
            })?;
        if buf.len() < declared {
            return Err(GtpError::InvalidLength {
                declared,
                actual: buf.len(),
            });
        }

        Ok(Self {
            msg_type,
            teid: header.teid.unwrap_or(0),
            sqn: header.sequence_number,
            payload: buf.slice(..declared),
        })
    }
}

/// TLV writer for the minimal IE set: type(1) length(2) spare/instance(1) value
fn put_ie(buf: &mut BytesMut, ie_type: u8, value: &[u8]) {
    buf.put_u8(ie_type);
    buf.put_u16(value.len() as u16);
    buf.put_u8(0);
    buf.put_slice(value);
}

fn put_imsi(buf: &mut BytesMut, digits: &str) {
    // TBCD encoding, odd digit count padded with 0xf
    let d: Vec<u8> = digits.bytes().map(|b| b - b'0').collect();
    let mut enc = Vec::with_capacity(d.len().div_ceil(2));
    for pair in d.chunks(2) {
        let lo = pair[0];
        let hi = if pair.len() == 2 { pair[1] } else { 0x0f };
        enc.push((hi << 4) | lo);
    }
    put_ie(buf, IE_IMSI, &enc);
}

fn template_payload(msg_type: Gtp2MessageType) -> Bytes {
    let mut buf = BytesMut::new();
    match msg_type {
        Gtp2MessageType::EchoRequest | Gtp2MessageType::EchoResponse => {
            put_ie(&mut buf, IE_RECOVERY, &[0]);
        }
        Gtp2MessageType::CreateSessionRequest => {
            put_imsi(&mut buf, "001010123456789");
            put_ie(&mut buf, IE_RAT_TYPE, &[RAT_TYPE_EUTRAN]);
        }
        Gtp2MessageType::DeleteSessionRequest
        | Gtp2MessageType::CreateBearerRequest
        | Gtp2MessageType::DeleteBearerRequest
        | Gtp2MessageType::DownlinkDataNotification => {
            put_ie(&mut buf, IE_EBI, &[DEFAULT_EBI]);
        }
        Gtp2MessageType::ModifyBearerRequest
        | Gtp2MessageType::ReleaseAccessBearersRequest => {}
        // Responses all carry Cause: accepted
        _ => {
            put_ie(&mut buf, IE_CAUSE, &[CAUSE_REQUEST_ACCEPTED, 0]);
        }
    }
    buf.freeze()
}
