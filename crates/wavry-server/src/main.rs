#![forbid(unsafe_code)]

//! Host-role peer binary (§4.6, §6 External Interfaces "CLI surface
//! for peer binaries").
//!
//! Accepts a viewer either directly on a listening socket or via a
//! rendezvous relay, runs the handshake as host, and dispatches the
//! resulting session: incoming mouse/keyboard/clipboard events are
//! logged, file and folder transfers are written under `--recv-dir`.
//! Screen capture and encoding are not part of this core and are not
//! reimplemented here; this binary exercises the protocol and file
//! transfer core end to end.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use rift_core::client_id::ClientId;
use rift_core::frame::MsgType;
use rift_core::handshake::{Compression, HandshakeAck, PROTOCOL_VERSION_MAJOR, PROTOCOL_VERSION_MINOR};
use wavry_common::settings::{ClientSettings, IniDocument};
use wavry_common::{singleton, CoreConfig, CoreError, Progress, ProgressObserver};
use wavry_peer::file_transfer::{CancelToken, FileReceiver, FileTransferEngine, FolderReceiver};
use wavry_peer::session::{PeerEvent, PeerSession};
use wavry_peer::transport::{Transport, TransportMode};
use wavry_peer::{parse_endpoint, reconnect::SupervisorAction, ReconnectSupervisor};

#[derive(Parser, Debug)]
#[command(
    name = "wavry-server",
    about = "Host role: waits for a viewer directly or via a rendezvous relay",
    disable_version_flag = true
)]
struct Args {
    /// Address to listen on when not using `--relay`.
    #[arg(long = "listen", default_value = "0.0.0.0:7979")]
    listen: SocketAddr,

    /// Handshake password: a decimal number, or `auto` to generate one.
    #[arg(long = "password", default_value = "auto")]
    password: String,

    /// Relay address to register with instead of listening directly,
    /// as a literal `host:port` or an identifier token (§4.3).
    #[arg(long = "relay")]
    relay: Option<String>,

    /// Path to the persisted settings file.
    #[arg(long = "settings")]
    settings: Option<PathBuf>,

    /// Directory incoming files and folders are written to.
    #[arg(long = "recv-dir", default_value = "received")]
    recv_dir: PathBuf,

    /// Send this file to the viewer once the session is established.
    #[arg(long = "send-file")]
    send_file: Option<PathBuf>,

    /// Send this folder to the viewer once the session is established.
    #[arg(long = "send-folder")]
    send_folder: Option<PathBuf>,

    /// `tracing` log level (`error`, `warn`, `info`, `debug`, `trace`).
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,

    /// Override `CoreConfig::frame_cap`.
    #[arg(long = "frame-cap")]
    frame_cap: Option<usize>,

    /// Override `CoreConfig::chunk_size`.
    #[arg(long = "chunk-size")]
    chunk_size: Option<usize>,
}

fn parse_password(input: &str) -> Result<u32, CoreError> {
    if input.eq_ignore_ascii_case("auto") {
        return Ok(ClientId::random().0);
    }
    input
        .parse()
        .map_err(|_| CoreError::protocol(format!("--password must be a number or `auto`, got {input}")))
}

fn settings_path(override_path: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = override_path {
        return path.clone();
    }
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|dir| dir.join("wavry-server.ini")))
        .unwrap_or_else(|| PathBuf::from("wavry-server.ini"))
}

fn singleton_lock_path() -> PathBuf {
    std::env::temp_dir().join("wavry-server.lock")
}

fn build_config(args: &Args) -> CoreConfig {
    let mut config = CoreConfig::default();
    if let Some(cap) = args.frame_cap {
        config.frame_cap = cap;
    }
    if let Some(size) = args.chunk_size {
        config.chunk_size = size;
    }
    config
}

fn ack_template() -> HandshakeAck {
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

struct LoggingObserver;
impl ProgressObserver for LoggingObserver {
    fn on_progress(&self, event: Progress) {
        match event {
            Progress::Started { total_bytes } => info!(total_bytes, "transfer started"),
            Progress::Advanced { bytes_done } => info!(bytes_done, "transfer progress"),
            Progress::Completed => info!("transfer complete"),
            Progress::Failed(reason) => warn!(%reason, "transfer failed"),
            Progress::Cancelled => warn!("transfer cancelled"),
        }
    }
}

/// Identity information learned while establishing a connection, kept
/// around only to persist into `ClientSettings`.
#[derive(Default, Clone, Copy)]
struct EstablishedIds {
    client_id: Option<u32>,
    partner_id: Option<u32>,
}

/// Establish the transport for one connection attempt: either accept
/// one direct connection, or register with the relay and wait to be
/// paired (§4.5, §4.6).
async fn establish(args: &Args, config: &CoreConfig) -> Result<(Transport, EstablishedIds), CoreError> {
    match &args.relay {
        Some(relay) => {
            let (host, port) = parse_endpoint(relay)?;
            let stream = TcpStream::connect((host.as_str(), port))
                .await
                .map_err(|e| CoreError::server_lost(e.to_string()))?;
            let client_id = ClientId::random();
            info!(client_id = %client_id, "registering with relay");
            let (stream, partner_id) = wavry_peer::relay_client::register_and_wait_for_partner(
                stream,
                client_id.0,
                config.frame_cap,
                Duration::from_millis(config.registered_timeout_ms),
            )
            .await?;
            info!(partner_id = %ClientId(partner_id), "paired by relay");
            let ids = EstablishedIds { client_id: Some(client_id.0), partner_id: Some(partner_id) };
            Ok((Transport::new(stream, TransportMode::Relayed, config.frame_cap), ids))
        }
        None => {
            let listener = TcpListener::bind(args.listen)
                .await
                .map_err(|e| CoreError::transport(e.to_string()))?;
            info!(listen = %args.listen, "waiting for a direct connection");
            let (stream, peer_addr) = listener
                .accept()
                .await
                .map_err(|e| CoreError::transport(e.to_string()))?;
            info!(%peer_addr, "viewer connected directly");
            Ok((Transport::new(stream, TransportMode::Direct, config.frame_cap), EstablishedIds::default()))
        }
    }
}

enum ReceiveMode {
    None,
    File(FileReceiver),
    Folder(FolderReceiver),
}

/// Run the handshake and dispatch loop for one paired session. Returns
/// once the session ends, for whatever reason.
async fn run_session(transport: Transport, password: u32, args: &Args, config: &CoreConfig) -> Result<(), CoreError> {
    let (mut session, _handshake) = PeerSession::accept_as_host(transport, password, ack_template()).await?;
    info!("session established");

    if let Some(path) = &args.send_file {
        let outbound = session.outbound();
        let engine = FileTransferEngine::new(config.clone());
        let path = path.clone();
        tokio::spawn(async move {
            let cancel = CancelToken::new();
            if let Err(e) = engine
                .send_file(&path, &outbound, wavry_peer::file_transfer::WriterMode::Async, &LoggingObserver, &cancel)
                .await
            {
                warn!(error = %e, "file send failed");
            }
        });
    } else if let Some(path) = &args.send_folder {
        let outbound = session.outbound();
        let engine = FileTransferEngine::new(config.clone());
        let path = path.clone();
        tokio::spawn(async move {
            let cancel = CancelToken::new();
            if let Err(e) = engine
                .send_folder(&path, &outbound, wavry_peer::file_transfer::WriterMode::Async, &LoggingObserver, &cancel)
                .await
            {
                warn!(error = %e, "folder send failed");
            }
        });
    }

    let mut recv_mode = ReceiveMode::None;

    loop {
        let event = session.next_event().await?;
        match event {
            PeerEvent::Ping => session.send_pong().await?,
            PeerEvent::Pong => {}
            PeerEvent::MouseEvent(ev) => info!(?ev, "mouse event"),
            PeerEvent::KeyEvent(ev) => info!(?ev, "key event"),
            PeerEvent::ClipboardText(text) => info!(bytes = text.len(), "clipboard text received"),
            PeerEvent::ClipboardFiles(paths) => info!(?paths, "clipboard file list received"),
            PeerEvent::FullScreenRequest => info!("viewer requested a full screen refresh"),
            PeerEvent::ScreenUpdate { rect, pixels } => {
                info!(x = rect.x, y = rect.y, bytes = pixels.len(), "screen update received")
            }
            PeerEvent::FileMessage { msg_type, payload } => {
                let mt = MsgType::try_from(msg_type).map_err(|e| CoreError::protocol(e.to_string()))?;
                if matches!(mt, MsgType::FileStart) {
                    recv_mode = ReceiveMode::File(FileReceiver::new(args.recv_dir.clone()));
                } else if matches!(mt, MsgType::FolderStart) {
                    recv_mode = ReceiveMode::Folder(FolderReceiver::new(args.recv_dir.clone()));
                }
                match &mut recv_mode {
                    ReceiveMode::File(recv) => recv.handle_message(msg_type, &payload, &LoggingObserver).await?,
                    ReceiveMode::Folder(recv) => recv.handle_message(msg_type, &payload, &LoggingObserver).await?,
                    ReceiveMode::None => warn!(msg_type, "file message with no active transfer, ignoring"),
                }
                if matches!(mt, MsgType::FileEnd | MsgType::FolderEnd) {
                    recv_mode = ReceiveMode::None;
                }
            }
            PeerEvent::Disconnect => {
                info!("viewer disconnected");
                break;
            }
        }
    }
    session.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    wavry_common::init_tracing_with_default(&args.log_level);

    let _singleton = match singleton::acquire(singleton_lock_path()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("another wavry-server instance is already running: {e}");
            return ExitCode::FAILURE;
        }
    };

    let password = match parse_password(&args.password) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    info!(password, "host password for this run");

    if let Err(e) = std::fs::create_dir_all(&args.recv_dir) {
        error!(dir = %args.recv_dir.display(), error = %e, "could not create receive directory");
        return ExitCode::FAILURE;
    }

    let settings_path = settings_path(args.settings.as_ref());
    let mut doc = IniDocument::load(&settings_path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load persisted settings, starting fresh");
        IniDocument::new()
    });

    let config = build_config(&args);
    let supervisor = ReconnectSupervisor::new(config.clone());

    loop {
        let (transport, ids) = if args.relay.is_some() {
            match supervisor.reconnect(|_attempt| establish(&args, &config)).await {
                Ok(t) => t,
                Err(e) => {
                    error!(error = %e, "could not establish a relayed session");
                    return ExitCode::FAILURE;
                }
            }
        } else {
            match establish(&args, &config).await {
                Ok(t) => t,
                Err(e) => {
                    error!(error = %e, "could not accept a direct connection");
                    return ExitCode::FAILURE;
                }
            }
        };

        ClientSettings {
            server_id: ids.client_id,
            last_partner_id: ids.partner_id,
            last_direct_partner_id: None,
        }
        .write_to(&mut doc);
        if let Err(e) = doc.save(&settings_path) {
            warn!(error = %e, "failed to persist settings");
        }

        let outcome = run_session(transport, password, &args, &config).await;
        let ending_error = match outcome {
            Ok(()) => CoreError::PartnerLeft,
            Err(e) => e,
        };

        match supervisor.classify(ending_error) {
            SupervisorAction::ResumeIdleRegistered | SupervisorAction::Reconnect => {
                info!("waiting for a new pairing");
                continue;
            }
            SupervisorAction::GiveUp(e) => {
                error!(error = %e, "giving up");
                return ExitCode::FAILURE;
            }
        }
    }
}
