//! Relay control-plane client dance (§4.5, §4.6).
//!
//! Runs REGISTER, and either the requester half (send CONNECT_REQUEST,
//! wait for CONNECT_RESPONSE) or the target half (wait for
//! PARTNER_CONNECTED), directly on the TCP stream that will later carry
//! tunnelled peer frames. Once this returns, the same stream is handed
//! to [`crate::transport::Transport`] in `TransportMode::Relayed` and
//! the relay control link is otherwise untouched until teardown (§5
//! "the peer session MUST NOT close it on session teardown").

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use rift_core::relay_proto::{
    ConnectRequestPayload, ConnectResponsePayload, ConnectStatus, PartnerConnectedPayload,
    RegisterPayload, RegisterResponsePayload, RelayFrame, RelayFrameCodec, RelayHeader,
    RelayMsgType, RELAY_HEADER_SIZE, REGISTER_STATUS_OK,
};
use rift_crypto::obfuscation;
use wavry_common::CoreError;

const RELAY_FLAG_OL: u8 = 0x01;

async fn send_control<W: AsyncWrite + Unpin>(
    write: &mut W,
    io_timeout: Duration,
    msg_type: RelayMsgType,
    payload: &[u8],
) -> Result<(), CoreError> {
    let encrypted = obfuscation::encrypt(payload);
    let wire = RelayFrame::encode(msg_type as u8, RELAY_FLAG_OL, &encrypted);
    tokio::time::timeout(io_timeout, write.write_all(&wire))
        .await
        .map_err(|_| CoreError::timeout("relay control write"))?
        .map_err(|e| CoreError::Transport(e.to_string()))
}

async fn recv_control<R: AsyncRead + Unpin>(
    read: &mut R,
    codec: &RelayFrameCodec,
    io_timeout: Duration,
) -> Result<(u8, Vec<u8>), CoreError> {
    let mut header_buf = [0u8; RELAY_HEADER_SIZE];
    tokio::time::timeout(io_timeout, read.read_exact(&mut header_buf))
        .await
        .map_err(|_| CoreError::timeout("relay control read"))?
        .map_err(|e| CoreError::Transport(e.to_string()))?;
    let header = RelayHeader::decode(&header_buf).map_err(|e| CoreError::protocol(e.to_string()))?;
    if header.data_length as usize > codec.frame_cap() {
        return Err(CoreError::protocol("relay control frame too large"));
    }
    let mut payload = vec![0u8; header.data_length as usize];
    tokio::time::timeout(io_timeout, read.read_exact(&mut payload))
        .await
        .map_err(|_| CoreError::timeout("relay control read"))?
        .map_err(|e| CoreError::Transport(e.to_string()))?;
    let frame = codec
        .decode(header, &payload)
        .map_err(|e| CoreError::protocol(e.to_string()))?;
    let decoded = if frame.flags & RELAY_FLAG_OL != 0 {
        obfuscation::decrypt(&frame.payload)
    } else {
        frame.payload
    };
    Ok((frame.msg_type, decoded))
}

async fn register(
    stream: &mut TcpStream,
    codec: &RelayFrameCodec,
    client_id: u32,
    io_timeout: Duration,
) -> Result<(), CoreError> {
    let payload = RegisterPayload { requested_id: client_id }.encode();
    send_control(stream, io_timeout, RelayMsgType::Register, &payload).await?;

    let (msg_type, payload) = recv_control(stream, codec, io_timeout).await?;
    if msg_type != RelayMsgType::RegisterResponse as u8 {
        return Err(CoreError::protocol("expected REGISTER_RESPONSE"));
    }
    let response = RegisterResponsePayload::decode(&payload).map_err(|e| CoreError::protocol(e.to_string()))?;
    if response.status != REGISTER_STATUS_OK {
        return Err(CoreError::DuplicateId(client_id));
    }
    debug!(client_id, "registered on relay");
    Ok(())
}

/// Host/target role: REGISTER, then wait for `PARTNER_CONNECTED`. The
/// returned stream is ready for `TransportMode::Relayed`.
pub async fn register_and_wait_for_partner(
    mut stream: TcpStream,
    client_id: u32,
    frame_cap: usize,
    io_timeout: Duration,
) -> Result<(TcpStream, u32), CoreError> {
    let codec = RelayFrameCodec::new(frame_cap);
    register(&mut stream, &codec, client_id, io_timeout).await?;

    loop {
        let (msg_type, payload) = recv_control(&mut stream, &codec, io_timeout).await?;
        if msg_type == RelayMsgType::PartnerConnected as u8 {
            let partner = PartnerConnectedPayload::decode(&payload)
                .map_err(|e| CoreError::protocol(e.to_string()))?;
            debug!(partner_id = partner.partner_id, "paired by relay");
            return Ok((stream, partner.partner_id));
        }
        debug!(msg_type, "ignoring relay message while awaiting pairing");
    }
}

/// Viewer/requester role: REGISTER, then CONNECT_REQUEST `target_id`
/// and wait for CONNECT_RESPONSE. The returned stream is ready for
/// `TransportMode::Relayed`.
pub async fn register_and_connect(
    mut stream: TcpStream,
    client_id: u32,
    target_id: u32,
    password: u32,
    frame_cap: usize,
    io_timeout: Duration,
) -> Result<TcpStream, CoreError> {
    let codec = RelayFrameCodec::new(frame_cap);
    register(&mut stream, &codec, client_id, io_timeout).await?;

    let request = ConnectRequestPayload { target_id, password }.encode();
    send_control(&mut stream, io_timeout, RelayMsgType::ConnectRequest, &request).await?;

    let (msg_type, payload) = recv_control(&mut stream, &codec, io_timeout).await?;
    if msg_type != RelayMsgType::ConnectResponse as u8 {
        return Err(CoreError::protocol("expected CONNECT_RESPONSE"));
    }
    let response =
        ConnectResponsePayload::decode(&payload).map_err(|e| CoreError::protocol(e.to_string()))?;
    let status = ConnectStatus::try_from(response.status).map_err(|e| CoreError::protocol(e.to_string()))?;
    match status {
        ConnectStatus::Ok => {
            debug!(target_id, "paired by relay");
            Ok(stream)
        }
        ConnectStatus::TargetNotFound => Err(CoreError::protocol(format!("target {target_id} is not online"))),
        ConnectStatus::TargetBusy => Err(CoreError::protocol(format!("target {target_id} is busy"))),
        ConnectStatus::TargetNotReady => Err(CoreError::protocol(format!("target {target_id} is not ready"))),
    }
}
