//! Correlation table: maps reply identities to waiting callers.
//!
//! Every call sent over the socket registers a record here. The first
//! inbound reply is matched by request identity; if it carries a
//! continuation identity, later replies in the chain are matched by that
//! identity instead. The table is a plain struct owned by the session;
//! dispatch runs only on the reader task.

use duorpc_protocol::Envelope;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::oneshot;

/// Snapshot of an outbound call, carried as the back-reference on every
/// resolved follow-up.
#[derive(Debug, Clone, PartialEq)]
pub struct CallInfo {
    /// Request identity assigned at send time.
    pub id: u64,
    /// Name of the remote procedure.
    pub rpc: String,
    /// Call payload.
    pub request: Value,
}

/// One resolved reply in a call's chain.
#[derive(Debug)]
pub struct FollowUp {
    /// The reply payload as it appeared on the wire.
    pub payload: Value,
    /// The call this reply belongs to.
    pub origin: CallInfo,
}

/// A follow-up slot. `tx` is consumed by dispatch, `rx` by the awaiting
/// caller; at most one slot per record is unresolved at a time.
struct Slot {
    tx: Option<oneshot::Sender<FollowUp>>,
    rx: Option<oneshot::Receiver<FollowUp>>,
}

impl Slot {
    fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            tx: Some(tx),
            rx: Some(rx),
        }
    }
}

struct CallRecord {
    call: CallInfo,
    /// Continuation identity recorded from the first reply.
    response_id: Option<u64>,
    /// Append-only follow-up chain.
    slots: Vec<Slot>,
    /// Set once no further reply can be routed to this record.
    closed: bool,
}

/// What `dispatch` did with an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatched {
    /// Request identity of the record that was resolved.
    pub call_id: u64,
    /// Whether this resolution closed the record.
    pub finalized: bool,
}

/// The envelope matched no outstanding record.
#[derive(Debug, Error)]
#[error("no outstanding call matches reply identity {0}")]
pub struct UnknownIdentity(pub u64);

/// Outstanding call records, keyed by request identity.
#[derive(Default)]
pub struct PendingTable {
    records: HashMap<u64, CallRecord>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    /// Registers a record for a just-sent call with one unresolved slot.
    pub fn register(&mut self, call: CallInfo) {
        let id = call.id;
        self.records.insert(
            id,
            CallRecord {
                call,
                response_id: None,
                slots: vec![Slot::new()],
                closed: false,
            },
        );
    }

    /// Takes the receiver for the next not-yet-awaited slot of a call.
    ///
    /// Returns `None` when the record is gone or its chain is exhausted.
    pub fn take_receiver(&mut self, call_id: u64) -> Option<oneshot::Receiver<FollowUp>> {
        let record = self.records.get_mut(&call_id)?;
        record.slots.iter_mut().find_map(|slot| slot.rx.take())
    }

    /// Routes an inbound envelope to its record, resolves the current
    /// follow-up slot, and appends the next one unless the record closed.
    pub fn dispatch(&mut self, envelope: Envelope) -> Result<Dispatched, UnknownIdentity> {
        let Envelope { id, reply } = envelope;

        // First reply: the envelope identity is a request identity.
        // Otherwise it must match a recorded continuation identity.
        let first = self.records.contains_key(&id);
        let call_id = if first {
            id
        } else {
            self.records
                .values()
                .find(|record| record.response_id == Some(id))
                .map(|record| record.call.id)
                .ok_or(UnknownIdentity(id))?
        };

        let Some(record) = self.records.get_mut(&call_id) else {
            return Err(UnknownIdentity(id));
        };

        // Only the first reply may re-key the chain or end it; follow-ups
        // keep arriving under the recorded continuation identity.
        if first {
            match reply.continues_at() {
                Some(next_id) => record.response_id = Some(next_id),
                None => record.closed = true,
            }
        }

        let follow_up = FollowUp {
            payload: reply.into_payload(),
            origin: record.call.clone(),
        };
        // A dropped receiver is fine; resolution has no other side effect.
        if let Some(tx) = record.slots.iter_mut().rev().find_map(|slot| slot.tx.take()) {
            let _ = tx.send(follow_up);
        }

        if !record.closed {
            record.slots.push(Slot::new());
        }

        Ok(Dispatched {
            call_id,
            finalized: record.closed,
        })
    }

    /// Removes a record outright (finalization).
    pub fn remove(&mut self, call_id: u64) -> bool {
        self.records.remove(&call_id).is_some()
    }

    /// Fails every outstanding record. Dropping the senders wakes any
    /// awaiting caller with a closed-channel error.
    pub fn fail_all(&mut self) {
        self.records.clear();
    }

    pub fn contains(&self, call_id: u64) -> bool {
        self.records.contains_key(&call_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
