//! Transport (TR), §4.4.
//!
//! The spec describes a non-blocking socket polled with `select()` on
//! a 200 ms slice so the caller stays responsive to shutdown and
//! cancellation while still applying an overall deadline to any single
//! read or write. The idiomatic `tokio` rendering of that behaviour is
//! a bounded [`tokio::time::timeout`] around each I/O call (§1
//! REDESIGN FLAGS) — the caller gets the same "never blocks forever,
//! always eventually reports failure" guarantee without hand-rolled
//! polling.
//!
//! A connection is either **direct** (the peer frame goes straight
//! over the TCP stream) or **relayed** (the peer frame is wrapped in a
//! relay `DATA` message). `Transport` hides that distinction from the
//! session/dispatch layer, and can be [`split`](Transport::split) into
//! an owned read half and write half so the single-writer invariant
//! (§5, §9) can hold the write half in its own task.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use rift_core::frame::{Frame, FrameCodec, FrameHeader, FRAME_HEADER_SIZE};
use rift_core::relay_proto::{
    RelayFrame, RelayFrameCodec, RelayHeader, RelayMsgType, RELAY_HEADER_SIZE,
};
use rift_crypto::obfuscation;
use wavry_common::CoreError;

/// Flag bit the relay wire sets on every control and DATA message
/// (§4.5, §6): `flags & 0x01 = 1`.
const RELAY_FLAG_OL: u8 = 0x01;

pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Direct,
    Relayed,
}

async fn read_exact_timeout<R: AsyncRead + Unpin>(
    read: &mut R,
    buf: &mut [u8],
    io_timeout: Duration,
) -> Result<(), CoreError> {
    tokio::time::timeout(io_timeout, read.read_exact(buf))
        .await
        .map_err(|_| CoreError::timeout("frame read"))?
        .map_err(|e| CoreError::Transport(e.to_string()))?;
    Ok(())
}

async fn write_all_timeout<W: AsyncWrite + Unpin>(
    write: &mut W,
    buf: &[u8],
    io_timeout: Duration,
) -> Result<(), CoreError> {
    tokio::time::timeout(io_timeout, write.write_all(buf))
        .await
        .map_err(|_| CoreError::timeout("frame write"))?
        .map_err(|e| CoreError::Transport(e.to_string()))?;
    Ok(())
}

/// OL-encrypts `chunk` and writes it as one `RelayFrame{DATA,
/// flags=0x01}` (§4.4, §6). Used to carry one half (header or payload)
/// of a tunnelled peer frame.
async fn send_relay_chunk<W: AsyncWrite + Unpin>(
    write: &mut W,
    io_timeout: Duration,
    chunk: &[u8],
) -> Result<(), CoreError> {
    let encrypted = obfuscation::encrypt(chunk);
    let wrapped = RelayFrame::encode(RelayMsgType::Data as u8, RELAY_FLAG_OL, &encrypted);
    write_all_timeout(write, &wrapped, io_timeout).await
}

/// Reads one `RelayFrame`, OL-decrypts its payload, and returns it.
/// Errors if the relay sent anything other than DATA while tunnelled.
async fn recv_relay_chunk<R: AsyncRead + Unpin>(
    read: &mut R,
    relay_codec: &RelayFrameCodec,
    io_timeout: Duration,
) -> Result<Vec<u8>, CoreError> {
    let mut header_buf = [0u8; RELAY_HEADER_SIZE];
    read_exact_timeout(read, &mut header_buf, io_timeout).await?;
    let header = RelayHeader::decode(&header_buf).map_err(|e| CoreError::protocol(e.to_string()))?;
    if header.data_length as usize > relay_codec.frame_cap() {
        return Err(CoreError::protocol(format!(
            "relay frame of {} bytes exceeds cap of {} bytes",
            header.data_length,
            relay_codec.frame_cap()
        )));
    }
    let mut payload = vec![0u8; header.data_length as usize];
    read_exact_timeout(read, &mut payload, io_timeout).await?;
    let relay_frame = relay_codec
        .decode(header, &payload)
        .map_err(|e| CoreError::protocol(e.to_string()))?;
    if relay_frame.msg_type != RelayMsgType::Data as u8 {
        return Err(CoreError::protocol(format!(
            "expected relay DATA message while tunnelled, got {:#04x}",
            relay_frame.msg_type
        )));
    }
    Ok(obfuscation::decrypt(&relay_frame.payload))
}

async fn send_frame_on<W: AsyncWrite + Unpin>(
    write: &mut W,
    mode: TransportMode,
    io_timeout: Duration,
    msg_type: u8,
    flags: u8,
    payload: &[u8],
) -> Result<(), CoreError> {
    let wire = Frame::encode(msg_type, flags, payload);
    match mode {
        TransportMode::Direct => write_all_timeout(write, &wire, io_timeout).await,
        TransportMode::Relayed => {
            // §6: one peer frame rides two sequential relay DATA
            // frames — the 12-byte header, then the payload.
            send_relay_chunk(write, io_timeout, &wire[..FRAME_HEADER_SIZE]).await?;
            send_relay_chunk(write, io_timeout, &wire[FRAME_HEADER_SIZE..]).await
        }
    }
}

async fn recv_frame_on<R: AsyncRead + Unpin>(
    read: &mut R,
    mode: TransportMode,
    frame_codec: &FrameCodec,
    relay_codec: &RelayFrameCodec,
    io_timeout: Duration,
) -> Result<Frame, CoreError> {
    match mode {
        TransportMode::Direct => recv_direct_frame(read, frame_codec, io_timeout).await,
        TransportMode::Relayed => recv_relayed_frame(read, frame_codec, relay_codec, io_timeout).await,
    }
}

async fn recv_direct_frame<R: AsyncRead + Unpin>(
    read: &mut R,
    frame_codec: &FrameCodec,
    io_timeout: Duration,
) -> Result<Frame, CoreError> {
    let mut header_buf = [0u8; FRAME_HEADER_SIZE];
    read_exact_timeout(read, &mut header_buf, io_timeout).await?;
    let header = FrameHeader::decode(&header_buf).map_err(|e| CoreError::protocol(e.to_string()))?;
    if header.data_length as usize > frame_codec.frame_cap() {
        return Err(CoreError::protocol(format!(
            "frame of {} bytes exceeds cap of {} bytes",
            header.data_length,
            frame_codec.frame_cap()
        )));
    }
    let mut payload = vec![0u8; header.data_length as usize];
    read_exact_timeout(read, &mut payload, io_timeout).await?;
    frame_codec
        .decode(header, &payload)
        .map_err(|e| CoreError::protocol(e.to_string()))
}

async fn recv_relayed_frame<R: AsyncRead + Unpin>(
    read: &mut R,
    frame_codec: &FrameCodec,
    relay_codec: &RelayFrameCodec,
    io_timeout: Duration,
) -> Result<Frame, CoreError> {
    // §6: synthesize the peer frame from the two relay DATA frames
    // that carried it — header first, then payload.
    let header_bytes = recv_relay_chunk(read, relay_codec, io_timeout).await?;
    if header_bytes.len() != FRAME_HEADER_SIZE {
        return Err(CoreError::protocol(format!(
            "tunnelled peer header was {} bytes, expected {FRAME_HEADER_SIZE}",
            header_bytes.len()
        )));
    }
    let inner_header =
        FrameHeader::decode(&header_bytes).map_err(|e| CoreError::protocol(e.to_string()))?;
    if inner_header.data_length as usize > frame_codec.frame_cap() {
        return Err(CoreError::protocol(format!(
            "frame of {} bytes exceeds cap of {} bytes",
            inner_header.data_length,
            frame_codec.frame_cap()
        )));
    }
    let payload_bytes = recv_relay_chunk(read, relay_codec, io_timeout).await?;
    frame_codec
        .decode(inner_header, &payload_bytes)
        .map_err(|e| CoreError::protocol(e.to_string()))
}

/// Owned read half of a split transport (§5: the dispatcher's single
/// reader).
pub struct FrameReader<R = OwnedReadHalf> {
    read: R,
    mode: TransportMode,
    frame_codec: FrameCodec,
    relay_codec: RelayFrameCodec,
    io_timeout: Duration,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub async fn recv_frame(&mut self) -> Result<Frame, CoreError> {
        recv_frame_on(
            &mut self.read,
            self.mode,
            &self.frame_codec,
            &self.relay_codec,
            self.io_timeout,
        )
        .await
    }
}

/// Owned write half of a split transport (§5: the single writer
/// task).
pub struct FrameWriter<W = OwnedWriteHalf> {
    write: W,
    mode: TransportMode,
    io_timeout: Duration,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub async fn send_frame(&mut self, msg_type: u8, flags: u8, payload: &[u8]) -> Result<(), CoreError> {
        send_frame_on(&mut self.write, self.mode, self.io_timeout, msg_type, flags, payload).await
    }
}

pub struct Transport {
    stream: TcpStream,
    mode: TransportMode,
    frame_codec: FrameCodec,
    relay_codec: RelayFrameCodec,
    io_timeout: Duration,
}

impl Transport {
    pub fn new(stream: TcpStream, mode: TransportMode, frame_cap: usize) -> Self {
        Self {
            stream,
            mode,
            frame_codec: FrameCodec::new(frame_cap),
            relay_codec: RelayFrameCodec::new(frame_cap),
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    pub async fn send_frame(&mut self, msg_type: u8, flags: u8, payload: &[u8]) -> Result<(), CoreError> {
        send_frame_on(&mut self.stream, self.mode, self.io_timeout, msg_type, flags, payload).await
    }

    pub async fn recv_frame(&mut self) -> Result<Frame, CoreError> {
        recv_frame_on(
            &mut self.stream,
            self.mode,
            &self.frame_codec,
            &self.relay_codec,
            self.io_timeout,
        )
        .await
    }

    /// Split into an owned reader and writer so the writer can be
    /// handed to a dedicated task, enforcing the single-writer
    /// invariant on the underlying socket (§5, §9).
    pub fn split(self) -> (FrameReader, FrameWriter) {
        let frame_cap = self.frame_codec.frame_cap();
        let (read_half, write_half) = self.stream.into_split();
        let reader = FrameReader {
            read: read_half,
            mode: self.mode,
            frame_codec: FrameCodec::new(frame_cap),
            relay_codec: RelayFrameCodec::new(frame_cap),
            io_timeout: self.io_timeout,
        };
        let writer = FrameWriter {
            write: write_half,
            mode: self.mode,
            io_timeout: self.io_timeout,
        };
        (reader, writer)
    }

    pub fn into_inner(self) -> TcpStream {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rift_core::MsgType;

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr);
        let (server, client) = tokio::join!(
            async { listener.accept().await.unwrap().0 },
            async { client.await.unwrap() }
        );
        (server, client)
    }

    #[tokio::test]
    async fn direct_frame_round_trips() {
        let (server, client) = connected_pair().await;
        let mut sender = Transport::new(client, TransportMode::Direct, 1024 * 1024);
        let mut receiver = Transport::new(server, TransportMode::Direct, 1024 * 1024);

        sender
            .send_frame(MsgType::Ping as u8, 0, b"hi")
            .await
            .unwrap();
        let frame = receiver.recv_frame().await.unwrap();
        assert_eq!(frame.msg_type, MsgType::Ping as u8);
        assert_eq!(frame.payload, b"hi");
    }

    #[tokio::test]
    async fn relayed_frame_round_trips() {
        let (server, client) = connected_pair().await;
        let mut sender = Transport::new(client, TransportMode::Relayed, 1024 * 1024);
        let mut receiver = Transport::new(server, TransportMode::Relayed, 1024 * 1024);

        sender
            .send_frame(MsgType::MouseEvent as u8, 0, &[1, 2, 3])
            .await
            .unwrap();
        let frame = receiver.recv_frame().await.unwrap();
        assert_eq!(frame.msg_type, MsgType::MouseEvent as u8);
        assert_eq!(frame.payload, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn recv_times_out_when_nothing_arrives() {
        let (server, _client) = connected_pair().await;
        let mut receiver = Transport::new(server, TransportMode::Direct, 1024)
            .with_io_timeout(Duration::from_millis(50));
        let result = receiver.recv_frame().await;
        assert!(matches!(result, Err(CoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn split_reader_and_writer_round_trip() {
        let (server, client) = connected_pair().await;
        let (mut server_reader, _server_writer) =
            Transport::new(server, TransportMode::Direct, 1024 * 1024).split();
        let (_client_reader, mut client_writer) =
            Transport::new(client, TransportMode::Direct, 1024 * 1024).split();

        client_writer
            .send_frame(MsgType::Pong as u8, 0, b"pong")
            .await
            .unwrap();
        let frame = server_reader.recv_frame().await.unwrap();
        assert_eq!(frame.msg_type, MsgType::Pong as u8);
        assert_eq!(frame.payload, b"pong");
    }
}
