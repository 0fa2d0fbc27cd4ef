//! Error taxonomy shared across the relay and peer session engine
//! (§7 Error Handling Design).

use thiserror::Error;

/// Result type alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Every error kind named in §7, realized as a `thiserror` enum in the
/// same shape the rest of this workspace uses for its error types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The underlying socket read/write failed or timed out at the
    /// transport layer (§4.4).
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame, handshake, or relay message failed to decode, or
    /// arrived out of the sequence the state machine expects.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The handshake password did not match (§4.6).
    #[error("authentication failed")]
    Auth,

    /// The relay already has a registered connection under the
    /// requested `ClientId` and eviction rules did not free it (§4.5).
    #[error("client id {0} is already registered")]
    DuplicateId(u32),

    /// The paired partner disconnected or its connection went idle
    /// past the inactivity timeout (§4.8 classification: retryable).
    #[error("partner left the session")]
    PartnerLeft,

    /// The relay (or the direct listener) became unreachable — treated
    /// distinctly from `PartnerLeft` because reconnect needs to retry
    /// registration, not just re-pairing (§4.8).
    #[error("server connection lost: {0}")]
    ServerLost(String),

    /// A local filesystem operation failed while sending or receiving
    /// a file (§4.7).
    #[error("file I/O error: {0}")]
    FileIO(#[from] std::io::Error),

    /// A requested file exceeds the configured size cap (§4.7, 100
    /// GiB by default).
    #[error("file of {0} bytes exceeds the size cap of {1} bytes")]
    FileTooLarge(u64, u64),

    /// A requested folder's total size exceeds the configured size cap.
    #[error("folder of {0} bytes exceeds the size cap of {1} bytes")]
    FolderTooLarge(u64, u64),

    /// A requested file is zero bytes; there is nothing to transfer
    /// (§4.7).
    #[error("file is empty")]
    Empty,

    /// The operation was cancelled by the caller (user-initiated file
    /// transfer cancel, shutdown, etc.) rather than failing on its own.
    #[error("operation cancelled")]
    Cancelled,

    /// A bounded wait (handshake ack, connect response, ...) elapsed
    /// without a reply.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The Reconnect Supervisor exhausted its retry budget after a
    /// `ServerLost` classification (§4.8).
    #[error("gave up reconnecting after {0} attempts")]
    ReconnectFailed(u32),
}

impl CoreError {
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    pub fn protocol(msg: impl std::fmt::Display) -> Self {
        Self::Protocol(msg.to_string())
    }

    pub fn server_lost(msg: impl std::fmt::Display) -> Self {
        Self::ServerLost(msg.to_string())
    }

    pub fn timeout(what: impl std::fmt::Display) -> Self {
        Self::Timeout(what.to_string())
    }

    /// Classification used by the Reconnect Supervisor (§4.8): whether
    /// this error means "retry pairing with the same id", "retry
    /// registration from scratch", or "give up".
    pub fn reconnect_class(&self) -> ReconnectClass {
        match self {
            CoreError::PartnerLeft => ReconnectClass::RetryPartner,
            CoreError::ServerLost(_) | CoreError::Transport(_) => ReconnectClass::RetryServer,
            _ => ReconnectClass::Fatal,
        }
    }
}

/// §4.8's three-way error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectClass {
    /// Partner dropped; re-announce and wait for a new pairing.
    RetryPartner,
    /// Lost the relay/listener itself; re-register from scratch.
    RetryServer,
    /// Not retryable (auth failure, protocol violation, cancellation).
    Fatal,
}
