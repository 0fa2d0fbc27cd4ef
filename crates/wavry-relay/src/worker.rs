//! Per-connection worker task (§4.5 Concurrency).
//!
//! One of these runs per accepted TCP connection, for its whole
//! lifetime. It owns the read half directly and reads relay frames in
//! a loop; the write half is owned exclusively by a sibling writer
//! task fed through an [`OutboundHandle`], so nothing but that task
//! ever calls `write_all` on the socket (§5, §9 single-writer
//! invariant, mirrored from the peer side in `wavry-peer`).

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use rift_core::relay_proto::{
    ConnectRequestPayload, RegisterPayload, RelayFrameCodec, RelayHeader, RelayMsgType,
    RELAY_HEADER_SIZE,
};
use rift_crypto::obfuscation;
use wavry_common::CoreError;

use crate::connection::OutboundHandle;
use crate::pool::{ConnectionPool, RegisterOutcome};

/// How often the read loop wakes up with nothing to show for it
/// before re-checking staleness (§4.5 Inactivity: "`recv` polling with
/// a 1 s slice").
const POLL_SLICE: Duration = Duration::from_secs(1);

/// Bound on how long teardown waits for the writer to drain its queue
/// (e.g. a REGISTER_RESPONSE{DUPLICATE} sent right before the worker
/// loop exits) before aborting it outright.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const RELAY_FLAG_OL: u8 = 0x01;

async fn read_relay_message(
    read: &mut OwnedReadHalf,
    codec: &RelayFrameCodec,
) -> Result<(u8, Vec<u8>), CoreError> {
    let mut header_buf = [0u8; RELAY_HEADER_SIZE];
    read.read_exact(&mut header_buf)
        .await
        .map_err(|e| CoreError::Transport(e.to_string()))?;
    let header = RelayHeader::decode(&header_buf).map_err(|e| CoreError::protocol(e.to_string()))?;
    if header.data_length as usize > codec.frame_cap() {
        return Err(CoreError::protocol(format!(
            "relay frame of {} bytes exceeds cap of {} bytes",
            header.data_length,
            codec.frame_cap()
        )));
    }
    let mut payload = vec![0u8; header.data_length as usize];
    read.read_exact(&mut payload)
        .await
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

/// The connection's sole writer: drains `rx` and is the only task
/// that ever touches `write`.
async fn run_writer(mut write: OwnedWriteHalf, mut rx: mpsc::Receiver<(u8, Vec<u8>)>) {
    while let Some((msg_type, payload)) = rx.recv().await {
        let encrypted = obfuscation::encrypt(&payload);
        let wire = rift_core::relay_proto::RelayFrame::encode(msg_type, RELAY_FLAG_OL, &encrypted);
        if write.write_all(&wire).await.is_err() {
            break;
        }
    }
}

/// Runs for the lifetime of one accepted connection: spawns its
/// writer, registers itself in the pool, and dispatches control
/// messages until the connection ends (error, DISCONNECT, or
/// inactivity).
pub async fn run(stream: TcpStream, pool: std::sync::Arc<ConnectionPool>, frame_cap: usize) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!(error = %e, "failed to set TCP_NODELAY on accepted connection");
    }
    let (mut read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::channel(1024);
    let writer_task = tokio::spawn(run_writer(write_half, rx));
    let abort_handle = writer_task.abort_handle();
    let outbound = OutboundHandle::new(tx);
    let idx = pool.insert(outbound.clone(), abort_handle.clone());

    let codec = RelayFrameCodec::new(frame_cap);
    let mut registered = false;

    loop {
        match tokio::time::timeout(POLL_SLICE, read_relay_message(&mut read_half, &codec)).await {
            Ok(Ok((msg_type, payload))) => {
                let Ok(kind) = RelayMsgType::try_from(msg_type) else {
                    debug!(msg_type, "ignoring unknown relay message type");
                    continue;
                };
                if !handle_message(kind, payload, idx, &pool, &outbound, &mut registered).await {
                    break;
                }
            }
            Ok(Err(e)) => {
                debug!(slot = idx, error = %e, "relay connection ended");
                break;
            }
            Err(_elapsed) => {
                if pool.is_stale(idx) {
                    info!(slot = idx, "evicting connection after inactivity timeout");
                    break;
                }
            }
        }
    }

    pool.disconnect(idx);
    pool.free(idx);
    // Drop our own sender so the writer's channel can close once the
    // pool's clone (freed above) is also gone, then give it a bounded
    // window to flush anything already queued (e.g. a DUPLICATE
    // REGISTER_RESPONSE sent right before this loop exited) before
    // aborting it outright.
    drop(outbound);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer_task).await.is_err() {
        abort_handle.abort();
    }
}

/// Dispatches one decoded relay message. Returns `false` when the
/// worker loop should stop.
async fn handle_message(
    kind: RelayMsgType,
    payload: Vec<u8>,
    idx: usize,
    pool: &ConnectionPool,
    outbound: &OutboundHandle,
    registered: &mut bool,
) -> bool {
    match kind {
        RelayMsgType::Register => {
            let Ok(req) = RegisterPayload::decode(&payload) else {
                warn!(slot = idx, "malformed REGISTER payload");
                return false;
            };
            let outcome = pool.register(idx, req.requested_id);
            let accepted = matches!(outcome, RegisterOutcome::Accepted);
            *registered = accepted;
            let response = ConnectionPool::register_response(accepted).encode();
            let _ = outbound.try_send(RelayMsgType::RegisterResponse as u8, response.to_vec());
            accepted
        }
        RelayMsgType::ConnectRequest => {
            if !*registered {
                warn!(slot = idx, "CONNECT_REQUEST before REGISTER");
                return true;
            }
            let Ok(req) = ConnectRequestPayload::decode(&payload) else {
                warn!(slot = idx, "malformed CONNECT_REQUEST payload");
                return true;
            };
            let response = pool.connect(idx, req.target_id).encode();
            let _ = outbound.try_send(RelayMsgType::ConnectResponse as u8, response.to_vec());
            true
        }
        RelayMsgType::Data => {
            pool.forward(idx, payload);
            true
        }
        RelayMsgType::Ping => {
            pool.touch(idx);
            let _ = outbound.try_send(RelayMsgType::Pong as u8, Vec::new());
            true
        }
        RelayMsgType::Pong => {
            pool.touch(idx);
            true
        }
        RelayMsgType::Disconnect => {
            debug!(slot = idx, "received graceful DISCONNECT");
            false
        }
        RelayMsgType::RegisterResponse
        | RelayMsgType::ConnectResponse
        | RelayMsgType::PartnerConnected
        | RelayMsgType::PartnerDisconnected => {
            warn!(slot = idx, ?kind, "client sent a server-to-client message type");
            true
        }
    }
}
