//! Peer session engine: the Transport, Peer Session, File Transfer
//! Engine, and Reconnect Supervisor components (§4.4-§4.8).
//!
//! `rift-core` defines the bytes; this crate owns the socket, the
//! handshake and dispatch state machine, and the retry policy around
//! both.

#![forbid(unsafe_code)]

pub mod endpoint;
pub mod file_transfer;
pub mod reconnect;
pub mod relay_client;
pub mod session;
pub mod transport;

pub use endpoint::parse_endpoint;
pub use file_transfer::{CancelToken, FileReceiver, FileTransferEngine, FolderReceiver, WriterMode};
pub use reconnect::{ReconnectSupervisor, SupervisorAction};
pub use session::{OutboundHandle, PeerEvent, PeerSession, SessionRole, SessionState};
pub use transport::{Transport, TransportMode};
