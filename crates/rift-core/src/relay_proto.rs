//! Relay control-plane framing (§4.5, §6 External Interfaces).
//!
//! Unlike the peer `Frame` (§4.1), `RelayFrame` has no checksum: it
//! only ever rides a single TCP connection between one registered
//! connection and the relay, so accidental byte corruption is TCP's
//! problem, not this layer's.

use thiserror::Error;

/// `{msg_type, flags, reserved, data_length}`.
pub const RELAY_HEADER_SIZE: usize = 8;

pub const DEFAULT_RELAY_FRAME_CAP: usize = 4 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayProtoError {
    #[error("relay frame payload of {0} bytes exceeds cap of {1} bytes")]
    TooLarge(u32, usize),
    #[error("header buffer too short: {0} bytes, need {RELAY_HEADER_SIZE}")]
    HeaderTooShort(usize),
    #[error("payload buffer does not match declared data_length")]
    PayloadLengthMismatch,
    #[error("unknown relay message type: {0:#04x}")]
    UnknownMsgType(u8),
}

/// Control-plane message types exchanged between a registered
/// connection and the relay (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RelayMsgType {
    Register = 0x01,
    RegisterResponse = 0x02,
    ConnectRequest = 0x03,
    ConnectResponse = 0x04,
    PartnerConnected = 0x05,
    Data = 0x06,
    Ping = 0x07,
    Pong = 0x08,
    Disconnect = 0x09,
    PartnerDisconnected = 0x0a,
}

impl TryFrom<u8> for RelayMsgType {
    type Error = RelayProtoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use RelayMsgType::*;
        Ok(match value {
            0x01 => Register,
            0x02 => RegisterResponse,
            0x03 => ConnectRequest,
            0x04 => ConnectResponse,
            0x05 => PartnerConnected,
            0x06 => Data,
            0x07 => Ping,
            0x08 => Pong,
            0x09 => Disconnect,
            0x0a => PartnerDisconnected,
            other => return Err(RelayProtoError::UnknownMsgType(other)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayHeader {
    pub msg_type: u8,
    pub flags: u8,
    pub reserved: u16,
    pub data_length: u32,
}

impl RelayHeader {
    pub fn encode(&self) -> [u8; RELAY_HEADER_SIZE] {
        let mut buf = [0u8; RELAY_HEADER_SIZE];
        buf[0] = self.msg_type;
        buf[1] = self.flags;
        buf[2..4].copy_from_slice(&self.reserved.to_le_bytes());
        buf[4..8].copy_from_slice(&self.data_length.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RelayProtoError> {
        if buf.len() < RELAY_HEADER_SIZE {
            return Err(RelayProtoError::HeaderTooShort(buf.len()));
        }
        Ok(Self {
            msg_type: buf[0],
            flags: buf[1],
            reserved: u16::from_le_bytes([buf[2], buf[3]]),
            data_length: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFrame {
    pub msg_type: u8,
    pub flags: u8,
    pub payload: Vec<u8>,
}

impl RelayFrame {
    pub fn encode(msg_type: u8, flags: u8, payload: &[u8]) -> Vec<u8> {
        let header = RelayHeader {
            msg_type,
            flags,
            reserved: 0,
            data_length: payload.len() as u32,
        };
        let mut out = Vec::with_capacity(RELAY_HEADER_SIZE + payload.len());
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(payload);
        out
    }
}

pub struct RelayFrameCodec {
    frame_cap: usize,
}

impl RelayFrameCodec {
    pub fn new(frame_cap: usize) -> Self {
        Self { frame_cap }
    }

    pub fn frame_cap(&self) -> usize {
        self.frame_cap
    }

    pub fn decode(
        &self,
        header: RelayHeader,
        payload: &[u8],
    ) -> Result<RelayFrame, RelayProtoError> {
        if header.data_length as usize > self.frame_cap {
            return Err(RelayProtoError::TooLarge(header.data_length, self.frame_cap));
        }
        if payload.len() != header.data_length as usize {
            return Err(RelayProtoError::PayloadLengthMismatch);
        }
        Ok(RelayFrame {
            msg_type: header.msg_type,
            flags: header.flags,
            payload: payload.to_vec(),
        })
    }
}

impl Default for RelayFrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_RELAY_FRAME_CAP)
    }
}

/// `REGISTER`: the connection announces the `ClientId` it wants to be
/// reachable as (§4.5 control-plane table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterPayload {
    pub requested_id: u32,
}

pub const REGISTER_PAYLOAD_LEN: usize = 4;

impl RegisterPayload {
    pub fn encode(&self) -> [u8; REGISTER_PAYLOAD_LEN] {
        self.requested_id.to_le_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RelayProtoError> {
        if buf.len() < REGISTER_PAYLOAD_LEN {
            return Err(RelayProtoError::HeaderTooShort(buf.len()));
        }
        Ok(Self {
            requested_id: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
        })
    }
}

/// `REGISTER_RESPONSE`: `{status}` (§4.5 control-plane table: OK allows
/// the client to proceed, DUPLICATE forces it to disconnect).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterResponsePayload {
    pub status: u32,
}

pub const REGISTER_STATUS_OK: u32 = 0;
pub const REGISTER_STATUS_DUPLICATE: u32 = 1;

pub const REGISTER_RESPONSE_PAYLOAD_LEN: usize = 4;

impl RegisterResponsePayload {
    pub fn encode(&self) -> [u8; REGISTER_RESPONSE_PAYLOAD_LEN] {
        self.status.to_le_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RelayProtoError> {
        if buf.len() < REGISTER_RESPONSE_PAYLOAD_LEN {
            return Err(RelayProtoError::HeaderTooShort(buf.len()));
        }
        Ok(Self {
            status: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
        })
    }
}

/// `CONNECT_REQUEST`: ask the relay to pair this connection with
/// `target_id`. `password` is carried on the wire per the control-plane
/// table (§4.5) but is opaque to the relay — it is only meaningful to
/// the handshake the two peers run after pairing (§4.6), so the relay
/// forwards pairing decisions without inspecting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectRequestPayload {
    pub target_id: u32,
    pub password: u32,
}

pub const CONNECT_REQUEST_PAYLOAD_LEN: usize = 8;

impl ConnectRequestPayload {
    pub fn encode(&self) -> [u8; CONNECT_REQUEST_PAYLOAD_LEN] {
        let mut buf = [0u8; CONNECT_REQUEST_PAYLOAD_LEN];
        buf[0..4].copy_from_slice(&self.target_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.password.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RelayProtoError> {
        if buf.len() < CONNECT_REQUEST_PAYLOAD_LEN {
            return Err(RelayProtoError::HeaderTooShort(buf.len()));
        }
        Ok(Self {
            target_id: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            password: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }
}

/// The four status codes the pairing algorithm can produce (§4.5
/// Pairing algorithm): success, or one of the three rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ConnectStatus {
    Ok = 0,
    TargetNotFound = 1,
    TargetBusy = 2,
    TargetNotReady = 3,
}

impl TryFrom<u32> for ConnectStatus {
    type Error = RelayProtoError;
    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ConnectStatus::Ok),
            1 => Ok(ConnectStatus::TargetNotFound),
            2 => Ok(ConnectStatus::TargetBusy),
            3 => Ok(ConnectStatus::TargetNotReady),
            other => Err(RelayProtoError::UnknownMsgType(other as u8)),
        }
    }
}

/// `CONNECT_RESPONSE`: `{status}` (§4.5 control-plane table: success or
/// a not-online/busy/not-ready code). On success a `PARTNER_CONNECTED`
/// follows on the target's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectResponsePayload {
    pub status: u32,
}

pub const CONNECT_RESPONSE_PAYLOAD_LEN: usize = 4;

impl ConnectResponsePayload {
    pub fn encode(&self) -> [u8; CONNECT_RESPONSE_PAYLOAD_LEN] {
        self.status.to_le_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RelayProtoError> {
        if buf.len() < CONNECT_RESPONSE_PAYLOAD_LEN {
            return Err(RelayProtoError::HeaderTooShort(buf.len()));
        }
        Ok(Self {
            status: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
        })
    }
}

/// `PARTNER_CONNECTED`: `{partner_id}`, sent to both sides of a newly
/// paired connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartnerConnectedPayload {
    pub partner_id: u32,
}

pub const PARTNER_CONNECTED_PAYLOAD_LEN: usize = 4;

impl PartnerConnectedPayload {
    pub fn encode(&self) -> [u8; PARTNER_CONNECTED_PAYLOAD_LEN] {
        self.partner_id.to_le_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RelayProtoError> {
        if buf.len() < PARTNER_CONNECTED_PAYLOAD_LEN {
            return Err(RelayProtoError::HeaderTooShort(buf.len()));
        }
        Ok(Self {
            partner_id: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
        })
    }
}

/// `PARTNER_DISCONNECTED`: `{reason, partner_id}`, sent when the other
/// side of a pairing leaves (graceful DISCONNECT or eviction).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartnerDisconnectedPayload {
    pub reason: u8,
    pub partner_id: u32,
}

pub const PARTNER_DISCONNECTED_PAYLOAD_LEN: usize = 5;

impl PartnerDisconnectedPayload {
    pub fn encode(&self) -> [u8; PARTNER_DISCONNECTED_PAYLOAD_LEN] {
        let mut buf = [0u8; PARTNER_DISCONNECTED_PAYLOAD_LEN];
        buf[0] = self.reason;
        buf[1..5].copy_from_slice(&self.partner_id.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RelayProtoError> {
        if buf.len() < PARTNER_DISCONNECTED_PAYLOAD_LEN {
            return Err(RelayProtoError::HeaderTooShort(buf.len()));
        }
        Ok(Self {
            reason: buf[0],
            partner_id: u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn relay_frame_round_trips() {
        let wire = RelayFrame::encode(RelayMsgType::Data as u8, 0, b"payload bytes");
        let header = RelayHeader::decode(&wire[..RELAY_HEADER_SIZE]).unwrap();
        let codec = RelayFrameCodec::default();
        let frame = codec.decode(header, &wire[RELAY_HEADER_SIZE..]).unwrap();
        assert_eq!(frame.payload, b"payload bytes");
    }

    #[test]
    fn register_round_trips() {
        let p = RegisterPayload { requested_id: 0x1020_3040 };
        assert_eq!(RegisterPayload::decode(&p.encode()).unwrap(), p);
    }

    #[test]
    fn register_response_round_trips() {
        let p = RegisterResponsePayload {
            status: REGISTER_STATUS_DUPLICATE,
        };
        assert_eq!(RegisterResponsePayload::decode(&p.encode()).unwrap(), p);
    }

    #[test]
    fn connect_request_round_trips() {
        let p = ConnectRequestPayload {
            target_id: 77,
            password: 123456,
        };
        assert_eq!(ConnectRequestPayload::decode(&p.encode()).unwrap(), p);
    }

    #[test]
    fn connect_response_round_trips() {
        let p = ConnectResponsePayload {
            status: ConnectStatus::TargetBusy as u32,
        };
        assert_eq!(ConnectResponsePayload::decode(&p.encode()).unwrap(), p);
    }

    #[test]
    fn partner_connected_round_trips() {
        let p = PartnerConnectedPayload { partner_id: 999 };
        assert_eq!(PartnerConnectedPayload::decode(&p.encode()).unwrap(), p);
    }

    #[test]
    fn partner_disconnected_round_trips() {
        let p = PartnerDisconnectedPayload {
            reason: 0,
            partner_id: 999,
        };
        assert_eq!(PartnerDisconnectedPayload::decode(&p.encode()).unwrap(), p);
    }

    #[test]
    fn relay_msg_type_round_trips_all_variants() {
        for raw in [0x01u8, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a] {
            let mt = RelayMsgType::try_from(raw).unwrap();
            assert_eq!(mt as u8, raw);
        }
        assert!(RelayMsgType::try_from(0xff).is_err());
    }

    #[test]
    fn fuzz_relay_header_decode_never_panics() {
        let mut rng = rand::thread_rng();
        for _ in 0..10_000 {
            let len = rng.gen_range(0..32);
            let mut data = vec![0u8; len];
            rng.fill(&mut data[..]);
            let _ = RelayHeader::decode(&data);
        }
    }
}
