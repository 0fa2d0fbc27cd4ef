//! Wavry CLI tools: identifier token encode/decode, connectivity ping.

#![forbid(unsafe_code)]

use std::net::Ipv4Addr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use rift_core::frame::{Frame, FrameCodec, FrameHeader, MsgType, FRAME_HEADER_SIZE};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

#[derive(Parser, Debug)]
#[command(name = "wavry")]
#[command(about = "Wavry CLI tools")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode an address as a human-typeable identifier token (§4.3).
    Encode {
        /// IPv4 address to encode.
        #[arg(long)]
        ip: Ipv4Addr,
        /// Port to encode.
        #[arg(long)]
        port: u16,
    },

    /// Decode an identifier token back into an address and port.
    Decode {
        /// Token, with or without dashes.
        token: String,
    },

    /// Send a PING frame to a listening peer and wait for a PONG.
    Ping {
        /// Address to dial (host:port).
        #[arg(long)]
        connect: String,
    },

    /// Show version information.
    Version,
}

async fn read_frame(stream: &mut TcpStream, codec: &FrameCodec) -> Result<Frame> {
    let mut header_buf = [0u8; FRAME_HEADER_SIZE];
    stream.read_exact(&mut header_buf).await?;
    let header = FrameHeader::decode(&header_buf)?;

    let mut payload = vec![0u8; header.data_length as usize];
    stream.read_exact(&mut payload).await?;
    Ok(codec.decode(header, &payload)?)
}

async fn ping(connect: &str) -> Result<()> {
    let mut stream = TcpStream::connect(connect).await?;
    let codec = FrameCodec::default();

    let wire = Frame::encode(MsgType::Ping as u8, 0, &[]);
    stream.write_all(&wire).await?;

    let start = std::time::Instant::now();
    let frame = timeout(Duration::from_secs(3), read_frame(&mut stream, &codec))
        .await
        .map_err(|_| anyhow!("no reply from {connect} within 3s"))??;

    match MsgType::try_from(frame.msg_type) {
        Ok(MsgType::Pong) => println!("pong from {connect}: rtt={:?}", start.elapsed()),
        Ok(other) => println!("unexpected reply msg_type {other:?} from {connect}"),
        Err(_) => println!("unrecognised msg_type {} from {connect}", frame.msg_type),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    wavry_common::init_tracing();
    let args = Args::parse();

    match args.command {
        Command::Encode { ip, port } => {
            println!("{}", rift_crypto::encode_identifier(ip, port));
        }
        Command::Decode { token } => {
            let (ip, port) = rift_crypto::decode_identifier(&token)?;
            println!("{ip}:{port}");
        }
        Command::Ping { connect } => ping(&connect).await?,
        Command::Version => println!("wavry {}", env!("CARGO_PKG_VERSION")),
    }

    Ok(())
}
