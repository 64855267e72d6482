//! Request/response correlation by id, with per-call deadlines.
//!
//! The correlator only keeps books; it never does I/O. The session pumps the
//! transport and feeds every reply into [`Correlator::resolve`], then checks
//! [`Correlator::take`] for the call it is waiting on.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::types::{JsonRpcErrorObject, JsonRpcMessage, RequestId};

/// Outcome bound to a pending call: the `result` or the remote `error`.
pub type Resolution = Result<Value, JsonRpcErrorObject>;

#[derive(Debug)]
pub struct PendingCall {
    pub id: u64,
    pub method: String,
    pub issued_at: Instant,
    pub deadline: Instant,
    resolution: Option<Resolution>,
}

impl PendingCall {
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }
}

/// What happened to an incoming envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Correlation {
    /// Bound to the pending call with this id.
    Resolved(u64),
    /// A reply nobody is waiting for (late, duplicate, or foreign). Dropped.
    Unmatched(RequestId),
    /// Not a reply at all (request or notification from the peer).
    Uncorrelated,
}

/// Per-connection table of outstanding calls.
#[derive(Debug)]
pub struct Correlator {
    next_id: u64,
    pending: HashMap<u64, PendingCall>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Allocate the next id and register a pending call expiring after
    /// `timeout`. Ids are never reused.
    pub fn issue(&mut self, method: &str, timeout: Duration) -> &PendingCall {
        let id = self.next_id;
        self.next_id += 1;
        let now = Instant::now();
        self.pending.entry(id).or_insert(PendingCall {
            id,
            method: method.to_string(),
            issued_at: now,
            deadline: now + timeout,
            resolution: None,
        })
    }

    /// Bind an incoming reply to its pending call.
    ///
    /// A second reply for an already-resolved id is treated as unmatched, so
    /// each pending call resolves exactly once.
    pub fn resolve(&mut self, message: JsonRpcMessage) -> Correlation {
        let (id, resolution) = match message {
            JsonRpcMessage::Response(resp) => (resp.id, Ok(resp.result)),
            JsonRpcMessage::Error(err) => (err.id, Err(err.error)),
            _ => return Correlation::Uncorrelated,
        };

        let slot = id.as_u64().and_then(|n| self.pending.get_mut(&n));
        match slot {
            Some(call) if call.resolution.is_none() => {
                call.resolution = Some(resolution);
                tracing::debug!(id = call.id, method = %call.method, "reply correlated");
                Correlation::Resolved(call.id)
            }
            _ => {
                tracing::warn!(id = %id, "dropping reply with no pending call");
                Correlation::Unmatched(id)
            }
        }
    }

    /// Remove and return the outcome of `id` if it has resolved.
    pub fn take(&mut self, id: u64) -> Option<Resolution> {
        if !self.pending.get(&id)?.is_resolved() {
            return None;
        }
        self.pending.remove(&id).and_then(|call| call.resolution)
    }

    /// Abandon `id` locally. A reply arriving later is unmatched.
    pub fn expire(&mut self, id: u64) -> Option<PendingCall> {
        let call = self.pending.remove(&id)?;
        tracing::debug!(
            id,
            method = %call.method,
            waited_ms = call.issued_at.elapsed().as_millis() as u64,
            "pending call expired"
        );
        Some(call)
    }

    /// Expire every call whose deadline has passed; returns their ids.
    pub fn expire_overdue(&mut self, now: Instant) -> Vec<u64> {
        let overdue: Vec<u64> = self
            .pending
            .values()
            .filter(|call| call.resolution.is_none() && call.deadline <= now)
            .map(|call| call.id)
            .collect();
        for id in &overdue {
            self.pending.remove(id);
        }
        overdue
    }

    pub fn get(&self, id: u64) -> Option<&PendingCall> {
        self.pending.get(&id)
    }

    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Drop every pending call, e.g. when the connection dies.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
