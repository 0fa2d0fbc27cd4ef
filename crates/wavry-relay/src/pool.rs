//! The connection-slot arena (§4.5, §9 Design Notes "Cyclic partner
//! pointers").
//!
//! `ConnectionPool` is a single `Mutex`-guarded slot array: the only
//! place in the relay allowed to mutate a [`Connection`]. Workers never
//! lock a connection directly — they call one of these methods, which
//! lock, mutate, and unlock before returning. No method here performs
//! socket I/O; enqueueing onto an [`OutboundHandle`] is an in-memory
//! handoff to the connection's own writer task (§4.5 Concurrency:
//! "must not hold the slot mutex during socket I/O").

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::task::AbortHandle;
use tracing::{debug, warn};

use rift_core::relay_proto::{
    ConnectResponsePayload, ConnectStatus, PartnerConnectedPayload, PartnerDisconnectedPayload,
    RegisterResponsePayload, RelayMsgType, REGISTER_STATUS_DUPLICATE, REGISTER_STATUS_OK,
};

use crate::connection::{ConnState, Connection, OutboundHandle};

pub struct ConnectionPool {
    slots: Mutex<Vec<Option<Connection>>>,
    inactivity: Duration,
}

/// Outcome of a REGISTER attempt (§4.5 "ID uniqueness and stale
/// eviction").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Accepted,
    Duplicate,
}

impl ConnectionPool {
    pub fn new(inactivity: Duration) -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            inactivity,
        }
    }

    /// Insert a freshly-accepted connection (state CONNECTED, no
    /// `client_id` claimed yet) and return its slot index.
    pub fn insert(&self, outbound: OutboundHandle, worker: AbortHandle) -> usize {
        let mut slots = self.slots.lock().unwrap();
        let placeholder = Connection::new(outbound, worker);
        if let Some(idx) = slots.iter().position(|s| s.is_none()) {
            slots[idx] = Some(placeholder);
            idx
        } else {
            slots.push(Some(placeholder));
            slots.len() - 1
        }
    }

    /// Free a slot once its worker has returned (§3 Lifecycles: "the
    /// slot is freed after the worker returns").
    pub fn free(&self, idx: usize) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get_mut(idx) {
            *slot = None;
        }
    }

    pub fn touch(&self, idx: usize) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(conn) = slots.get_mut(idx).and_then(|s| s.as_mut()) {
            conn.touch();
        }
    }

    pub fn is_stale(&self, idx: usize) -> bool {
        let slots = self.slots.lock().unwrap();
        slots
            .get(idx)
            .and_then(|s| s.as_ref())
            .map(|conn| conn.is_stale(Instant::now(), self.inactivity))
            .unwrap_or(false)
    }

    /// §4.5 "ID uniqueness and stale eviction": evicts any stale or
    /// unkept holder of `requested_id`, then accepts or rejects `idx`.
    pub fn register(&self, idx: usize, requested_id: u32) -> RegisterOutcome {
        let mut slots = self.slots.lock().unwrap();
        let now = Instant::now();
        let mut kept = false;

        let others: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                let conn = s.as_ref()?;
                if i != idx && conn.client_id == Some(requested_id) && conn.state != ConnState::Disconnected {
                    Some(i)
                } else {
                    None
                }
            })
            .collect();

        for other_idx in others {
            let evict = {
                let conn = slots[other_idx].as_ref().unwrap();
                match conn.state {
                    ConnState::Paired => false,
                    ConnState::Registered if now.duration_since(conn.last_activity) < self.inactivity => false,
                    _ => true,
                }
            };
            if evict {
                let conn = slots[other_idx].take().unwrap();
                conn.worker.abort();
                debug!(client_id = requested_id, slot = other_idx, "evicted stale registration");
            } else {
                kept = true;
            }
        }

        if kept {
            return RegisterOutcome::Duplicate;
        }

        if let Some(conn) = slots.get_mut(idx).and_then(|s| s.as_mut()) {
            conn.client_id = Some(requested_id);
            conn.state = ConnState::Registered;
            conn.touch();
        }
        RegisterOutcome::Accepted
    }

    /// §4.5 "Pairing algorithm". On success, pushes `PARTNER_CONNECTED`
    /// onto the target's outbound queue directly (cheap, non-blocking
    /// channel send, not socket I/O) and returns the CONNECT_RESPONSE
    /// the caller should send to the requester.
    pub fn connect(&self, requester_idx: usize, target_id: u32) -> ConnectResponsePayload {
        let mut slots = self.slots.lock().unwrap();

        let target_idx = slots.iter().enumerate().find_map(|(i, s)| {
            let conn = s.as_ref()?;
            if conn.client_id == Some(target_id) && conn.state != ConnState::Disconnected {
                Some(i)
            } else {
                None
            }
        });

        let Some(target_idx) = target_idx else {
            return ConnectResponsePayload {
                status: ConnectStatus::TargetNotFound as u32,
            };
        };

        let target_state = slots[target_idx].as_ref().unwrap().state;
        match target_state {
            ConnState::Paired => {
                return ConnectResponsePayload {
                    status: ConnectStatus::TargetBusy as u32,
                }
            }
            ConnState::Registered => {}
            ConnState::Connected | ConnState::Disconnected => {
                return ConnectResponsePayload {
                    status: ConnectStatus::TargetNotReady as u32,
                }
            }
        }

        let requester_id = slots[requester_idx]
            .as_ref()
            .unwrap()
            .client_id
            .expect("requester must be registered before a CONNECT_REQUEST pairs it");

        if let Some(requester) = slots[requester_idx].as_mut() {
            requester.partner = Some(target_idx);
            requester.state = ConnState::Paired;
            requester.touch();
        }
        let target_outbound = {
            let target = slots[target_idx].as_mut().unwrap();
            target.partner = Some(requester_idx);
            target.state = ConnState::Paired;
            target.touch();
            target.outbound.clone()
        };

        let payload = PartnerConnectedPayload { partner_id: requester_id }.encode();
        if target_outbound
            .try_send(RelayMsgType::PartnerConnected as u8, payload.to_vec())
            .is_err()
        {
            warn!(target = target_id, "failed to notify partner of pairing");
        }

        ConnectResponsePayload {
            status: ConnectStatus::Ok as u32,
        }
    }

    /// §4.5 "Forwarding". Re-enqueues `payload` (still plaintext —
    /// the partner's writer OL-re-encrypts it fresh, "per-packet, not
    /// per-stream") onto the partner's outbound queue and touches both
    /// sides' `last_activity`.
    pub fn forward(&self, sender_idx: usize, payload: Vec<u8>) {
        let mut slots = self.slots.lock().unwrap();
        let Some(sender) = slots.get_mut(sender_idx).and_then(|s| s.as_mut()) else {
            return;
        };
        sender.touch();
        let Some(partner_idx) = sender.partner else {
            return;
        };
        let Some(partner) = slots.get_mut(partner_idx).and_then(|s| s.as_mut()) else {
            return;
        };
        partner.touch();
        let outbound = partner.outbound.clone();
        drop(slots);
        if outbound.try_send(RelayMsgType::Data as u8, payload).is_err() {
            warn!(from = sender_idx, to = partner_idx, "forwarding to partner failed");
        }
    }

    /// §4.5 "Graceful DISCONNECT": marks `idx` DISCONNECTED; if it had
    /// a partner, that partner is also forced to DISCONNECTED (not
    /// back to REGISTERED) so it must re-register, and is notified.
    pub fn disconnect(&self, idx: usize) {
        let mut slots = self.slots.lock().unwrap();
        let partner_idx = slots
            .get_mut(idx)
            .and_then(|s| s.as_mut())
            .and_then(|conn| {
                conn.state = ConnState::Disconnected;
                conn.partner.take()
            });
        let Some(partner_idx) = partner_idx else {
            return;
        };
        let Some(partner) = slots.get_mut(partner_idx).and_then(|s| s.as_mut()) else {
            return;
        };
        let client_id = partner
            .client_id
            .expect("a paired connection is always registered");
        partner.partner = None;
        partner.state = ConnState::Disconnected;
        let outbound = partner.outbound.clone();
        drop(slots);
        let payload = PartnerDisconnectedPayload {
            reason: 0,
            partner_id: client_id,
        }
        .encode();
        let _ = outbound.try_send(RelayMsgType::PartnerDisconnected as u8, payload.to_vec());
    }

    pub fn register_response(accepted: bool) -> RegisterResponsePayload {
        RegisterResponsePayload {
            status: if accepted { REGISTER_STATUS_OK } else { REGISTER_STATUS_DUPLICATE },
        }
    }

    pub fn active_count(&self) -> usize {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.is_some())
            .count()
    }

    /// `(active, registered, paired)` slot counts for the cleanup pass's
    /// periodic log line (§4.5 "cleanup pass").
    pub fn counts(&self) -> (usize, usize, usize) {
        let slots = self.slots.lock().unwrap();
        let mut active = 0;
        let mut registered = 0;
        let mut paired = 0;
        for conn in slots.iter().filter_map(|s| s.as_ref()) {
            active += 1;
            match conn.state {
                ConnState::Registered => registered += 1,
                ConnState::Paired => paired += 1,
                ConnState::Connected | ConnState::Disconnected => {}
            }
        }
        (active, registered, paired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn handle() -> (OutboundHandle, mpsc::Receiver<(u8, Vec<u8>)>) {
        let (tx, rx) = mpsc::channel(16);
        (OutboundHandle::new(tx), rx)
    }

    fn abort_handle() -> AbortHandle {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.spawn(async {}).abort_handle()
    }

    #[test]
    fn register_accepts_fresh_id() {
        let pool = ConnectionPool::new(Duration::from_secs(5));
        let (outbound, _rx) = handle();
        let idx = pool.insert(outbound, abort_handle());
        assert_eq!(pool.register(idx, 42), RegisterOutcome::Accepted);
    }

    #[test]
    fn register_rejects_active_duplicate() {
        let pool = ConnectionPool::new(Duration::from_secs(5));
        let (o1, _rx1) = handle();
        let (o2, _rx2) = handle();
        let first = pool.insert(o1, abort_handle());
        pool.register(first, 42);

        let second = pool.insert(o2, abort_handle());
        assert_eq!(pool.register(second, 42), RegisterOutcome::Duplicate);
    }

    #[test]
    fn register_evicts_stale_holder() {
        let pool = ConnectionPool::new(Duration::from_millis(1));
        let (o1, _rx1) = handle();
        let (o2, _rx2) = handle();
        let first = pool.insert(o1, abort_handle());
        pool.register(first, 42);
        std::thread::sleep(Duration::from_millis(5));

        let second = pool.insert(o2, abort_handle());
        assert_eq!(pool.register(second, 42), RegisterOutcome::Accepted);
    }

    #[test]
    fn connect_rejects_unknown_target() {
        let pool = ConnectionPool::new(Duration::from_secs(5));
        let (o1, _rx1) = handle();
        let requester = pool.insert(o1, abort_handle());
        let response = pool.connect(requester, 999);
        assert_eq!(response.status, ConnectStatus::TargetNotFound as u32);
    }

    #[test]
    fn connect_rejects_not_yet_registered_target() {
        let pool = ConnectionPool::new(Duration::from_secs(5));
        let (o1, _rx1) = handle();
        let (o2, _rx2) = handle();
        let requester = pool.insert(o1, abort_handle());
        let target = pool.insert(o2, abort_handle());
        let _ = target;
        let response = pool.connect(requester, 0);
        assert_eq!(response.status, ConnectStatus::TargetNotReady as u32);
    }

    #[test]
    fn connect_pairs_two_registered_connections() {
        let pool = ConnectionPool::new(Duration::from_secs(5));
        let (o1, _rx1) = handle();
        let (o2, mut rx2) = handle();
        let requester = pool.insert(o1, abort_handle());
        pool.register(requester, 1);
        let target = pool.insert(o2, abort_handle());
        pool.register(target, 2);

        let response = pool.connect(requester, 2);
        assert_eq!(response.status, ConnectStatus::Ok as u32);
        let (msg_type, _payload) = rx2.try_recv().unwrap();
        assert_eq!(msg_type, RelayMsgType::PartnerConnected as u8);
    }

    #[test]
    fn connect_rejects_busy_target() {
        let pool = ConnectionPool::new(Duration::from_secs(5));
        let (o1, _rx1) = handle();
        let (o2, _rx2) = handle();
        let (o3, _rx3) = handle();
        let a = pool.insert(o1, abort_handle());
        pool.register(a, 1);
        let b = pool.insert(o2, abort_handle());
        pool.register(b, 2);
        pool.connect(a, 2);

        let c = pool.insert(o3, abort_handle());
        pool.register(c, 3);
        let response = pool.connect(c, 2);
        assert_eq!(response.status, ConnectStatus::TargetBusy as u32);
    }

    #[test]
    fn forward_touches_both_sides_and_delivers_payload() {
        let pool = ConnectionPool::new(Duration::from_secs(5));
        let (o1, _rx1) = handle();
        let (o2, mut rx2) = handle();
        let a = pool.insert(o1, abort_handle());
        pool.register(a, 1);
        let b = pool.insert(o2, abort_handle());
        pool.register(b, 2);
        pool.connect(a, 2);
        let _ = rx2.try_recv();

        pool.forward(a, vec![1, 2, 3]);
        let (msg_type, payload) = rx2.try_recv().unwrap();
        assert_eq!(msg_type, RelayMsgType::Data as u8);
        assert_eq!(payload, vec![1, 2, 3]);
    }

    #[test]
    fn disconnect_forces_partner_to_disconnected_not_registered() {
        let pool = ConnectionPool::new(Duration::from_secs(5));
        let (o1, _rx1) = handle();
        let (o2, mut rx2) = handle();
        let a = pool.insert(o1, abort_handle());
        pool.register(a, 1);
        let b = pool.insert(o2, abort_handle());
        pool.register(b, 2);
        pool.connect(a, 2);
        let _ = rx2.try_recv();

        pool.disconnect(a);
        let (msg_type, _) = rx2.try_recv().unwrap();
        assert_eq!(msg_type, RelayMsgType::PartnerDisconnected as u8);

        // b can now re-register under the same id even though its
        // control link is still open, because it is DISCONNECTED.
        assert_eq!(pool.register(b, 2), RegisterOutcome::Accepted);
    }

    #[test]
    fn register_id_zero_does_not_evict_other_unregistered_slots() {
        // `ClientId` 0 is a valid, unreserved id. Every freshly inserted
        // slot starts with `client_id: None`, not `Some(0)`, so a client
        // registering as 0 must not match (and evict) other still
        // unregistered connections.
        let pool = ConnectionPool::new(Duration::from_secs(5));
        let (o1, _rx1) = handle();
        let (o2, _rx2) = handle();
        let bystander = pool.insert(o1, abort_handle());
        let registrant = pool.insert(o2, abort_handle());

        assert_eq!(pool.register(registrant, 0), RegisterOutcome::Accepted);
        // The bystander is still unregistered and untouched, not evicted.
        assert_eq!(pool.active_count(), 2);
        assert_eq!(pool.register(bystander, 7), RegisterOutcome::Accepted);
    }
}
