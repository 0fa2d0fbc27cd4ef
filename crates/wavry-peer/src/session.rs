//! Peer Session (PS), §4.6.
//!
//! Owns the handshake and the message dispatch loop. The socket write
//! side is handed to a dedicated task behind an `mpsc` channel so the
//! dispatcher and the File Transfer Engine's async-mode sender can
//! both queue outbound frames without racing on the same write half
//! (§5, §9 — the single-writer invariant).

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use rift_core::frame::MsgType;
use rift_core::handshake::{Handshake, HandshakeAck};
use rift_core::messages::{ClipboardPayload, KeyEvent, MouseEvent, ScreenRectHeader};
use wavry_common::{CoreConfig, CoreError};

use crate::transport::{FrameWriter, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Host,
    Viewer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    HandshakePending,
    Connected,
    Closing,
    Closed,
}

/// A dispatched, decoded message from the partner. Session-management
/// traffic (`Ping`/`Pong`/`Disconnect`) is surfaced too so the caller's
/// event loop can drive keep-alives and reconnect decisions itself
/// rather than this module hiding them.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    ScreenUpdate { rect: ScreenRectHeader, pixels: Vec<u8> },
    FullScreenRequest,
    MouseEvent(MouseEvent),
    KeyEvent(KeyEvent),
    ClipboardText(Vec<u8>),
    ClipboardFiles(Vec<String>),
    /// Raw file/folder sub-protocol message; the File Transfer Engine
    /// decodes the payload further by `msg_type` (§4.7).
    FileMessage { msg_type: u8, payload: Vec<u8> },
    Ping,
    Pong,
    Disconnect,
}

/// Clonable outbound queue handle — the dispatcher and the File
/// Transfer Engine both send through this instead of touching the
/// socket directly.
#[derive(Clone)]
pub struct OutboundHandle {
    tx: mpsc::Sender<(u8, u8, Vec<u8>)>,
}

impl OutboundHandle {
    pub async fn send(&self, msg_type: u8, flags: u8, payload: Vec<u8>) -> Result<(), CoreError> {
        self.tx
            .send((msg_type, flags, payload))
            .await
            .map_err(|_| CoreError::protocol("outbound writer task has stopped"))
    }

    pub fn queue_depth_hint(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

fn spawn_writer(mut writer: FrameWriter) -> (OutboundHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<(u8, u8, Vec<u8>)>(1024);
    let handle = tokio::spawn(async move {
        while let Some((msg_type, flags, payload)) = rx.recv().await {
            if writer.send_frame(msg_type, flags, &payload).await.is_err() {
                break;
            }
        }
    });
    (OutboundHandle { tx }, handle)
}

pub struct PeerSession {
    reader: crate::transport::FrameReader,
    outbound: OutboundHandle,
    writer_task: JoinHandle<()>,
    state: SessionState,
    role: SessionRole,
}

impl PeerSession {
    /// Viewer side: send `Handshake`, then wait for `HandshakeAck`.
    /// Fails with [`CoreError::Auth`] if the host rejects the
    /// handshake (bad password or incompatible magic).
    pub async fn connect_as_viewer(
        mut transport: Transport,
        handshake: Handshake,
    ) -> Result<(Self, HandshakeAck), CoreError> {
        let wire = handshake.encode();
        transport
            .send_frame(MsgType::Handshake as u8, 0, &wire)
            .await?;

        let frame = transport.recv_frame().await?;
        if frame.msg_type != MsgType::HandshakeAck as u8 {
            return Err(CoreError::protocol("expected HandshakeAck"));
        }
        let ack = HandshakeAck::decode(&frame.payload).map_err(|e| CoreError::protocol(e.to_string()))?;
        if !ack.accepted {
            warn!("host rejected handshake");
            return Err(CoreError::Auth);
        }

        debug!(screen_w = ack.screen_w, screen_h = ack.screen_h, "handshake accepted");
        let session = Self::from_connected_transport(transport, SessionRole::Viewer);
        Ok((session, ack))
    }

    /// Host side: wait for `Handshake`, verify the password, and reply
    /// with `HandshakeAck`.
    pub async fn accept_as_host(
        mut transport: Transport,
        expected_password: u32,
        reply: HandshakeAck,
    ) -> Result<(Self, Handshake), CoreError> {
        let frame = transport.recv_frame().await?;
        if frame.msg_type != MsgType::Handshake as u8 {
            return Err(CoreError::protocol("expected Handshake"));
        }
        let handshake =
            Handshake::decode(&frame.payload).map_err(|e| CoreError::protocol(e.to_string()))?;

        let accepted = handshake.password == expected_password;
        let mut ack = reply;
        ack.accepted = accepted;
        transport
            .send_frame(MsgType::HandshakeAck as u8, 0, &ack.encode())
            .await?;

        if !accepted {
            warn!(your_id = handshake.your_id, "rejected handshake: bad password");
            return Err(CoreError::Auth);
        }

        debug!(your_id = handshake.your_id, "accepted handshake");
        let session = Self::from_connected_transport(transport, SessionRole::Host);
        Ok((session, handshake))
    }

    fn from_connected_transport(transport: Transport, role: SessionRole) -> Self {
        let (reader, writer) = transport.split();
        let (outbound, writer_task) = spawn_writer(writer);
        Self {
            reader,
            outbound,
            writer_task,
            state: SessionState::Connected,
            role,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn outbound(&self) -> OutboundHandle {
        self.outbound.clone()
    }

    pub async fn send_mouse_event(&self, event: MouseEvent) -> Result<(), CoreError> {
        self.outbound
            .send(MsgType::MouseEvent as u8, 0, event.encode().to_vec())
            .await
    }

    pub async fn send_key_event(&self, event: KeyEvent) -> Result<(), CoreError> {
        self.outbound
            .send(MsgType::KeyboardEvent as u8, 0, event.encode().to_vec())
            .await
    }

    pub async fn send_clipboard_text(&self, text: &[u8]) -> Result<(), CoreError> {
        let payload = ClipboardPayload {
            is_file: false,
            data: text.to_vec(),
        };
        self.outbound
            .send(MsgType::ClipboardText as u8, 0, payload.encode())
            .await
    }

    pub async fn send_ping(&self) -> Result<(), CoreError> {
        self.outbound.send(MsgType::Ping as u8, 0, Vec::new()).await
    }

    pub async fn send_pong(&self) -> Result<(), CoreError> {
        self.outbound.send(MsgType::Pong as u8, 0, Vec::new()).await
    }

    pub async fn send_disconnect(&mut self) -> Result<(), CoreError> {
        self.state = SessionState::Closing;
        self.outbound
            .send(MsgType::Disconnect as u8, 0, Vec::new())
            .await
    }

    /// Receive and decode the next message. Returns `Ok(PeerEvent::Disconnect)`
    /// exactly once, then the caller should stop calling this and tear
    /// the session down.
    pub async fn next_event(&mut self) -> Result<PeerEvent, CoreError> {
        if self.state == SessionState::Closed {
            return Err(CoreError::protocol("session is closed"));
        }

        let frame = match self.reader.recv_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                self.state = SessionState::Closed;
                return Err(e);
            }
        };

        let msg_type = MsgType::try_from(frame.msg_type)
            .map_err(|e| CoreError::protocol(e.to_string()))?;

        let event = match msg_type {
            MsgType::ScreenUpdate => {
                use rift_core::messages::SCREEN_RECT_HEADER_LEN;
                if frame.payload.len() < SCREEN_RECT_HEADER_LEN {
                    return Err(CoreError::protocol("ScreenUpdate payload too short"));
                }
                let rect = ScreenRectHeader::decode(&frame.payload[..SCREEN_RECT_HEADER_LEN])
                    .map_err(|e| CoreError::protocol(e.to_string()))?;
                let pixels = frame.payload[SCREEN_RECT_HEADER_LEN..].to_vec();
                PeerEvent::ScreenUpdate { rect, pixels }
            }
            MsgType::FullScreenReq => PeerEvent::FullScreenRequest,
            MsgType::MouseEvent => PeerEvent::MouseEvent(
                MouseEvent::decode(&frame.payload).map_err(|e| CoreError::protocol(e.to_string()))?,
            ),
            MsgType::KeyboardEvent => PeerEvent::KeyEvent(
                KeyEvent::decode(&frame.payload).map_err(|e| CoreError::protocol(e.to_string()))?,
            ),
            MsgType::ClipboardText => {
                let payload = ClipboardPayload::decode(&frame.payload)
                    .map_err(|e| CoreError::protocol(e.to_string()))?;
                PeerEvent::ClipboardText(payload.data)
            }
            MsgType::ClipboardFiles => {
                let payload = ClipboardPayload::decode(&frame.payload)
                    .map_err(|e| CoreError::protocol(e.to_string()))?;
                let paths = payload
                    .file_paths()
                    .map_err(|e| CoreError::protocol(e.to_string()))?;
                PeerEvent::ClipboardFiles(paths)
            }
            MsgType::FileReq
            | MsgType::FileNone
            | MsgType::FileStart
            | MsgType::FileData
            | MsgType::FileEnd
            | MsgType::FolderStart
            | MsgType::FolderEntry
            | MsgType::FolderEnd => PeerEvent::FileMessage {
                msg_type: frame.msg_type,
                payload: frame.payload,
            },
            MsgType::Ping => PeerEvent::Ping,
            MsgType::Pong => PeerEvent::Pong,
            MsgType::Disconnect => {
                debug!("partner sent Disconnect");
                self.state = SessionState::Closed;
                PeerEvent::Disconnect
            }
            MsgType::Handshake | MsgType::HandshakeAck => {
                return Err(CoreError::protocol("unexpected handshake message after connect"))
            }
        };
        Ok(event)
    }

    /// Stop accepting new outbound frames and wait for the writer task
    /// to drain and exit.
    pub async fn shutdown(mut self) {
        self.state = SessionState::Closed;
        drop(self.outbound);
        let _ = self.writer_task.await;
    }

    pub async fn config_defaults() -> CoreConfig {
        CoreConfig::default()
    }
}

/// Test-only seam: lets other modules in this crate (the File
/// Transfer Engine's tests) exercise an [`OutboundHandle`] without
/// standing up a real `TcpStream`-backed writer task.
#[cfg(test)]
pub(crate) mod test_support {
    use super::OutboundHandle;
    use tokio::sync::mpsc;

    pub fn outbound_channel(buffer: usize) -> (OutboundHandle, mpsc::Receiver<(u8, u8, Vec<u8>)>) {
        let (tx, rx) = mpsc::channel(buffer);
        (OutboundHandle { tx }, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportMode;
    use rift_core::handshake::{Compression, PROTOCOL_VERSION_MAJOR, PROTOCOL_VERSION_MINOR};
    use tokio::net::{TcpListener, TcpStream};

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr);
        let (server, client) = tokio::join!(
            async { listener.accept().await.unwrap().0 },
            async { client.await.unwrap() }
        );
        (server, client)
    }

    fn sample_handshake(password: u32) -> Handshake {
        Handshake {
            your_id: 0x1111_2222,
            password,
            screen_w: 1920,
            screen_h: 1080,
            color_depth: 24,
            compression: Compression::Raw as u8,
            version_major: PROTOCOL_VERSION_MAJOR,
            version_minor: PROTOCOL_VERSION_MINOR,
        }
    }

    fn sample_ack() -> HandshakeAck {
        HandshakeAck {
            screen_w: 1920,
            screen_h: 1080,
            color_depth: 24,
            compression: Compression::Raw as u8,
            version_major: PROTOCOL_VERSION_MAJOR,
            version_minor: PROTOCOL_VERSION_MINOR,
            accepted: false,
        }
    }

    #[tokio::test]
    async fn handshake_succeeds_with_correct_password() {
        let (server, client) = connected_pair().await;
        let host_transport = Transport::new(server, TransportMode::Direct, 1024 * 1024);
        let viewer_transport = Transport::new(client, TransportMode::Direct, 1024 * 1024);

        let host_fut = PeerSession::accept_as_host(host_transport, 4242, sample_ack());
        let viewer_fut = PeerSession::connect_as_viewer(viewer_transport, sample_handshake(4242));

        let (host_result, viewer_result) = tokio::join!(host_fut, viewer_fut);
        let (host_session, _handshake) = host_result.unwrap();
        let (viewer_session, ack) = viewer_result.unwrap();

        assert!(ack.accepted);
        assert_eq!(host_session.state(), SessionState::Connected);
        assert_eq!(viewer_session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn handshake_rejects_wrong_password() {
        let (server, client) = connected_pair().await;
        let host_transport = Transport::new(server, TransportMode::Direct, 1024 * 1024);
        let viewer_transport = Transport::new(client, TransportMode::Direct, 1024 * 1024);

        let host_fut = PeerSession::accept_as_host(host_transport, 4242, sample_ack());
        let viewer_fut = PeerSession::connect_as_viewer(viewer_transport, sample_handshake(9999));

        let (host_result, viewer_result) = tokio::join!(host_fut, viewer_fut);
        assert!(matches!(host_result, Err(CoreError::Auth)));
        assert!(matches!(viewer_result, Err(CoreError::Auth)));
    }

    #[tokio::test]
    async fn mouse_event_dispatches_end_to_end() {
        let (server, client) = connected_pair().await;
        let host_transport = Transport::new(server, TransportMode::Direct, 1024 * 1024);
        let viewer_transport = Transport::new(client, TransportMode::Direct, 1024 * 1024);

        let host_fut = PeerSession::accept_as_host(host_transport, 1, sample_ack());
        let viewer_fut = PeerSession::connect_as_viewer(viewer_transport, sample_handshake(1));
        let (host_result, viewer_result) = tokio::join!(host_fut, viewer_fut);
        let (mut host_session, _) = host_result.unwrap();
        let (viewer_session, _) = viewer_result.unwrap();

        let event = MouseEvent {
            x: 42,
            y: 84,
            buttons: rift_core::messages::MouseButtons::LEFT,
            flags: rift_core::messages::MouseFlags::DOWN,
            wheel_delta: 0,
        };
        viewer_session.send_mouse_event(event).await.unwrap();

        match host_session.next_event().await.unwrap() {
            PeerEvent::MouseEvent(received) => assert_eq!(received, event),
            other => panic!("expected MouseEvent, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disconnect_is_observed_by_the_partner() {
        let (server, client) = connected_pair().await;
        let host_transport = Transport::new(server, TransportMode::Direct, 1024 * 1024);
        let viewer_transport = Transport::new(client, TransportMode::Direct, 1024 * 1024);

        let host_fut = PeerSession::accept_as_host(host_transport, 1, sample_ack());
        let viewer_fut = PeerSession::connect_as_viewer(viewer_transport, sample_handshake(1));
        let (host_result, viewer_result) = tokio::join!(host_fut, viewer_fut);
        let (mut host_session, _) = host_result.unwrap();
        let (mut viewer_session, _) = viewer_result.unwrap();

        viewer_session.send_disconnect().await.unwrap();
        let event = host_session.next_event().await.unwrap();
        assert!(matches!(event, PeerEvent::Disconnect));
        assert_eq!(host_session.state(), SessionState::Closed);
    }
}
