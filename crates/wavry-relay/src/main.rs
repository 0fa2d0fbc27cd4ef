#![forbid(unsafe_code)]

//! Rendezvous relay binary (§4.5, §6 External Interfaces "CLI surface
//! for the relay binary").
//!
//! Accepts control connections, registers `ClientId`s, pairs them on
//! request, and forwards `DATA` between paired connections. Holds no
//! peer-protocol knowledge at all: everything it forwards is opaque
//! bytes re-obfuscated per hop.

mod connection;
mod pool;
mod worker;

use std::net::{IpAddr, Ipv4Addr};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use wavry_common::settings::{IniDocument, RelaySettings};
use wavry_common::singleton;

use crate::pool::ConnectionPool;

#[derive(Parser, Debug)]
#[command(
    name = "wavry-relay",
    about = "Rendezvous relay: pairs and forwards between two control connections",
    disable_version_flag = true
)]
struct Args {
    /// Port to listen on (§6).
    #[arg(short = 'p', long = "port", default_value_t = 7979)]
    port: u16,

    /// Address to bind the listener to.
    #[arg(short = 'b', long = "bind", default_value = "0.0.0.0")]
    bind_ip: IpAddr,

    /// IP to advertise in the generated identifier token, overriding
    /// the bind address (useful behind NAT).
    #[arg(short = 'i', long = "override-ip")]
    override_ip: Option<Ipv4Addr>,

    /// Run detached from the controlling terminal.
    ///
    /// True process daemonization (fork + setsid) has no well-defined
    /// meaning once a tokio runtime is already running, and none of
    /// this workspace's dependencies provide it; this flag is accepted
    /// for CLI compatibility and logged, but the process stays in the
    /// foreground. Most deployments of an async service run it under a
    /// supervisor (systemd, a container) instead of forking anyway.
    #[arg(short = 'd', long = "daemon")]
    daemon: bool,

    /// Write logs to this file instead of stderr.
    #[arg(short = 'l', long = "log-file")]
    log_file: Option<std::path::PathBuf>,

    /// Disable ANSI colour in log output.
    #[arg(short = 'n', long = "no-colour")]
    no_colour: bool,

    /// Print the version and exit.
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// Log active/paired/registered connection counts once per cleanup
    /// pass. Log-only; there is no metrics endpoint to scrape.
    #[arg(long = "metrics")]
    metrics: bool,
}

/// How often the cleanup pass wakes up to log connection counts when
/// `--metrics` is set (§4.5 "cleanup pass").
const CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

async fn run_cleanup_pass(pool: Arc<ConnectionPool>) {
    let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let (active, registered, paired) = pool.counts();
        info!(active, registered, paired, "cleanup pass");
    }
}

fn settings_path() -> std::path::PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|dir| dir.join("wavry-relay.ini")))
        .unwrap_or_else(|| std::path::PathBuf::from("wavry-relay.ini"))
}

fn singleton_lock_path() -> std::path::PathBuf {
    std::env::temp_dir().join("wavry-relay.lock")
}

fn init_logging(log_file: Option<&std::path::PathBuf>, no_colour: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_ansi(!no_colour);

    match log_file {
        Some(path) => match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => builder.with_writer(file).with_ansi(false).init(),
            Err(e) => {
                builder.init();
                error!(path = %path.display(), error = %e, "could not open log file, logging to stderr");
            }
        },
        None => builder.init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.version {
        println!("wavry-relay {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    init_logging(args.log_file.as_ref(), args.no_colour);

    if args.daemon {
        info!("daemon mode requested; running in the foreground under the current supervisor");
    }

    let _singleton = match singleton::acquire(singleton_lock_path()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("another wavry-relay instance is already running: {e}");
            return ExitCode::FAILURE;
        }
    };

    let listener = match TcpListener::bind((args.bind_ip, args.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(bind = %args.bind_ip, port = args.port, error = %e, "failed to bind listener");
            return ExitCode::FAILURE;
        }
    };
    info!(bind = %args.bind_ip, port = args.port, "relay listening");

    let advertised_ip = args.override_ip.unwrap_or(match args.bind_ip {
        IpAddr::V4(v4) if !v4.is_unspecified() => v4,
        _ => Ipv4Addr::LOCALHOST,
    });
    let server_id_token = rift_crypto::encode_identifier(advertised_ip, args.port);
    info!(token = %server_id_token, "identifier token for this relay");

    let settings_path = settings_path();
    let mut doc = IniDocument::load(&settings_path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load persisted settings, starting fresh");
        IniDocument::new()
    });
    RelaySettings {
        ip: Some(advertised_ip.to_string()),
        port: Some(args.port),
        server_id: None,
    }
    .write_to(&mut doc);
    if let Err(e) = doc.save(&settings_path) {
        warn!(error = %e, "failed to persist relay settings");
    }

    let pool = Arc::new(ConnectionPool::new(Duration::from_secs(5)));
    let frame_cap = wavry_common::CoreConfig::default().frame_cap;

    if args.metrics {
        tokio::spawn(run_cleanup_pass(Arc::clone(&pool)));
    }

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed, continuing");
                continue;
            }
        };
        info!(%peer_addr, active = pool.active_count(), "accepted connection");
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            worker::run(stream, pool, frame_cap).await;
        });
    }
}
