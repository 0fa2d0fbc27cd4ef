//! The relay's per-connection state (§3 Data Model, "Connection";
//! §4.5; §9 Design Notes "Cyclic partner pointers").
//!
//! A `Connection` never outlives its slot in [`crate::pool::ConnectionPool`]
//! and never owns another `Connection` by reference: `partner` is a
//! slot index, looked up through the pool's mutex, so pairing two
//! connections never creates a reference cycle.

use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use wavry_common::CoreError;

/// Mirrors §3's `Connection.state` enumeration exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// TCP accepted, no REGISTER seen yet.
    Connected,
    /// Claimed a `ClientId`, waiting to be paired.
    Registered,
    /// Paired with another connection; DATA forwards both ways.
    Paired,
    /// Worker has exited or is exiting; slot is pending free.
    Disconnected,
}

/// One queued outbound relay message: `(msg_type, raw_payload)`. The
/// connection's writer task OL-encrypts and frames it before it hits
/// the socket (§4.4, §4.5) — nothing else is allowed to write to the
/// connection's `OwnedWriteHalf` directly, mirroring the single-writer
/// invariant `wavry-peer` enforces on the peer side (§5, §9).
pub type OutboundMsg = (u8, Vec<u8>);

#[derive(Clone)]
pub struct OutboundHandle {
    tx: mpsc::Sender<OutboundMsg>,
}

impl OutboundHandle {
    pub fn new(tx: mpsc::Sender<OutboundMsg>) -> Self {
        Self { tx }
    }

    /// Best-effort enqueue. A full or closed channel means the
    /// connection's writer is gone or can't keep up; either way this
    /// send's failure is the forwarding path's problem, not the
    /// caller's (§4.5 Forwarding: "any send failure to the partner
    /// terminates only that side's forwarding path").
    pub fn try_send(&self, msg_type: u8, payload: Vec<u8>) -> Result<(), CoreError> {
        self.tx
            .try_send((msg_type, payload))
            .map_err(|_| CoreError::transport("relay outbound channel full or closed"))
    }
}

/// A single registered or pairing-in-progress connection. Lives
/// inside one slot of the pool's slot array; never referenced from
/// another `Connection`.
pub struct Connection {
    /// `None` until the first valid REGISTER; `ClientId` 0 is a valid,
    /// unreserved value (§3) so it cannot double as an "unclaimed"
    /// sentinel.
    pub client_id: Option<u32>,
    pub state: ConnState,
    /// Slot index of the paired partner, or `None` (§3, §9).
    pub partner: Option<usize>,
    pub last_activity: Instant,
    pub outbound: OutboundHandle,
    /// Handle to abort this connection's worker task on eviction or
    /// forced disconnect (§4.5 "signal its worker to stop").
    pub worker: AbortHandle,
}

impl Connection {
    pub fn new(outbound: OutboundHandle, worker: AbortHandle) -> Self {
        Self {
            client_id: None,
            state: ConnState::Connected,
            partner: None,
            last_activity: Instant::now(),
            outbound,
            worker,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_stale(&self, now: Instant, inactivity: std::time::Duration) -> bool {
        now.duration_since(self.last_activity) >= inactivity
    }
}
