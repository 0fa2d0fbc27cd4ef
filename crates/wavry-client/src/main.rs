#![forbid(unsafe_code)]

//! Viewer-role peer binary (§4.6, §6 External Interfaces "CLI surface
//! for peer binaries").
//!
//! Connects to a host directly or pairs through a rendezvous relay,
//! runs the handshake as viewer, and dispatches the resulting
//! session the same way `wavry-server` does. `--connect` takes the
//! address of whichever side the viewer dials directly: the host
//! itself in direct mode, or the relay in relay mode. Relay mode also
//! needs the host's `ClientId` to request pairing with (§4.5
//! CONNECT_REQUEST), which the host binary logs on startup; this repo
//! carries that as `--target-id`, a necessary piece of CLI plumbing
//! the distilled spec's `--connect ADDR|TOKEN` shorthand did not spell
//! out (see DESIGN.md).

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpStream;
use tracing::{error, info, warn};

use rift_core::client_id::ClientId;
use rift_core::frame::MsgType;
use rift_core::handshake::{Compression, Handshake, PROTOCOL_VERSION_MAJOR, PROTOCOL_VERSION_MINOR};
use wavry_common::settings::{ClientSettings, IniDocument};
use wavry_common::{singleton, CoreConfig, CoreError, Progress, ProgressObserver};
use wavry_peer::file_transfer::{CancelToken, FileReceiver, FileTransferEngine, FolderReceiver};
use wavry_peer::session::{PeerEvent, PeerSession};
use wavry_peer::transport::{Transport, TransportMode};
use wavry_peer::{parse_endpoint, reconnect::SupervisorAction, ReconnectSupervisor};

#[derive(Parser, Debug)]
#[command(
    name = "wavry-client",
    about = "Viewer role: connects to a host directly or pairs through a rendezvous relay",
    disable_version_flag = true
)]
struct Args {
    /// Address to dial: the host directly, or the relay when
    /// `--target-id` is also given, as a literal `host:port` or an
    /// identifier token (§4.3).
    #[arg(long = "connect")]
    connect: String,

    /// The host's relay `ClientId`, required when dialling a relay
    /// instead of the host directly.
    #[arg(long = "target-id")]
    target_id: Option<u32>,

    /// Handshake password, as set on the host.
    #[arg(long = "password")]
    password: u32,

    /// This viewer's own relay `ClientId`: a decimal number, or `auto`
    /// to generate one. Only meaningful in relay mode.
    #[arg(long = "client-id", default_value = "auto")]
    client_id: String,

    /// Path to the persisted settings file.
    #[arg(long = "settings")]
    settings: Option<PathBuf>,

    /// Directory incoming files and folders are written to.
    #[arg(long = "recv-dir", default_value = "received")]
    recv_dir: PathBuf,

    /// Send this file to the host once the session is established.
    #[arg(long = "send-file")]
    send_file: Option<PathBuf>,

    /// Send this folder to the host once the session is established.
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

fn parse_client_id(input: &str) -> Result<u32, CoreError> {
    if input.eq_ignore_ascii_case("auto") {
        return Ok(ClientId::random().0);
    }
    input
        .parse()
        .map_err(|_| CoreError::protocol(format!("--client-id must be a number or `auto`, got {input}")))
}

fn settings_path(override_path: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = override_path {
        return path.clone();
    }
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|dir| dir.join("wavry-client.ini")))
        .unwrap_or_else(|| PathBuf::from("wavry-client.ini"))
}

fn singleton_lock_path() -> PathBuf {
    std::env::temp_dir().join("wavry-client.lock")
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

fn handshake_template(password: u32, client_id: u32) -> Handshake {
    Handshake {
        your_id: client_id,
        password,
        screen_w: 1920,
        screen_h: 1080,
        color_depth: 24,
        compression: Compression::Raw as u8,
        version_major: PROTOCOL_VERSION_MAJOR,
        version_minor: PROTOCOL_VERSION_MINOR,
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

/// Establish the transport for one connection attempt: dial the host
/// directly, or register with the relay and request the paired host
/// (§4.5, §4.6).
async fn establish(args: &Args, client_id: u32, config: &CoreConfig) -> Result<Transport, CoreError> {
    let (host, port) = parse_endpoint(&args.connect)?;
    let addr: (&str, u16) = (host.as_str(), port);

    match args.target_id {
        Some(target_id) => {
            let stream = TcpStream::connect(addr)
                .await
                .map_err(|e| CoreError::server_lost(e.to_string()))?;
            info!(client_id = %ClientId(client_id), target_id = %ClientId(target_id), "registering with relay");
            let stream = wavry_peer::relay_client::register_and_connect(
                stream,
                client_id,
                target_id,
                args.password,
                config.frame_cap,
                Duration::from_millis(config.registered_timeout_ms),
            )
            .await?;
            Ok(Transport::new(stream, TransportMode::Relayed, config.frame_cap))
        }
        None => {
            let stream = TcpStream::connect(addr)
                .await
                .map_err(|e| CoreError::transport(e.to_string()))?;
            info!(%host, port, "connected directly");
            Ok(Transport::new(stream, TransportMode::Direct, config.frame_cap))
        }
    }
}

enum ReceiveMode {
    None,
    File(FileReceiver),
    Folder(FolderReceiver),
}

/// Run the handshake and dispatch loop for one connected session.
async fn run_session(transport: Transport, password: u32, client_id: u32, args: &Args, config: &CoreConfig) -> Result<(), CoreError> {
    let (mut session, ack) =
        PeerSession::connect_as_viewer(transport, handshake_template(password, client_id)).await?;
    info!(screen_w = ack.screen_w, screen_h = ack.screen_h, "session established");

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
            PeerEvent::MouseEvent(ev) => info!(?ev, "mouse event echoed back"),
            PeerEvent::KeyEvent(ev) => info!(?ev, "key event echoed back"),
            PeerEvent::ClipboardText(text) => info!(bytes = text.len(), "clipboard text received"),
            PeerEvent::ClipboardFiles(paths) => info!(?paths, "clipboard file list received"),
            PeerEvent::FullScreenRequest => info!("host requested a full screen refresh"),
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
                info!("host disconnected");
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
            eprintln!("another wavry-client instance is already running: {e}");
            return ExitCode::FAILURE;
        }
    };

    let client_id = match parse_client_id(&args.client_id) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

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

    let transport = if args.target_id.is_some() {
        match supervisor
            .reconnect(|_attempt| establish(&args, client_id, &config))
            .await
        {
            Ok(t) => t,
            Err(e) => {
                error!(error = %e, "could not establish a relayed session");
                return ExitCode::FAILURE;
            }
        }
    } else {
        match establish(&args, client_id, &config).await {
            Ok(t) => t,
            Err(e) => {
                error!(error = %e, "could not connect directly");
                return ExitCode::FAILURE;
            }
        }
    };

    ClientSettings {
        server_id: Some(client_id),
        last_partner_id: args.target_id,
        last_direct_partner_id: None,
    }
    .write_to(&mut doc);
    if let Err(e) = doc.save(&settings_path) {
        warn!(error = %e, "failed to persist settings");
    }

    match run_session(transport, args.password, client_id, &args, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "session ended with an error");
            match supervisor.classify(e) {
                SupervisorAction::GiveUp(_) => ExitCode::FAILURE,
                _ => ExitCode::SUCCESS,
            }
        }
    }
}
