#![forbid(unsafe_code)]
//! Wire-level building blocks shared by the relay and the peer session
//! engine: the peer frame codec (§4.1), the handshake and per-message
//! payload encodings (§3, §4.6, §4.7), the relay control-plane framing
//! (§4.5), and the `ClientId` newtype (§3).
//!
//! The Identifier Codec (§4.3) builds on the Obfuscation Layer and
//! lives in `rift-crypto`, one layer up, rather than here.
//!
//! Nothing in this crate touches a socket; it only encodes and decodes
//! bytes. I/O timing, retries, and dispatch live in `wavry-peer` and
//! `wavry-relay`.

pub mod client_id;
pub mod frame;
pub mod handshake;
pub mod messages;
pub mod relay_proto;

pub use client_id::ClientId;
pub use frame::{Frame, FrameCodec, FrameError, MsgType};
pub use handshake::{Handshake, HandshakeAck};
