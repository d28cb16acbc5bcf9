//! # Call Ledger
//!
//! Bookkeeping for every call crossing the boundary in either direction.
//!
//! ## Philosophy
//!
//! - **Two Tables, One Id Space**: Outbound calls wait on a oneshot; inbound
//!   calls hold the task answering them. The header's direction bit keeps the
//!   two apart, so the tables never have to agree on anything.
//! - **Settle Once**: An entry is removed before it is settled. Whoever removes
//!   it owns the only sender, so a call cannot settle twice.
//!
//! ## Invariants
//! - Ids are allocated monotonically and never exceed [`MAX_CALL_ID`].
//! - An id is present in a table at most once.

use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use espack::Map;
use esrpc::CallId;
use esrpc::MAX_CALL_ID;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::error::Error as BridgeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A response arrived for an id nobody is waiting on.
    UnknownCallId(CallId),
    /// The engine reused the id of a request still being answered.
    IdCollision(CallId),
    ExhaustedIdSpace,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownCallId(id) => write!(f, "no pending call with id {}", id),
            Self::IdCollision(id) => write!(f, "request id {} is already in flight", id),
            Self::ExhaustedIdSpace => write!(f, "call ids exhausted"),
        }
    }
}

impl std::error::Error for Error {}

impl From<Error> for BridgeError {
    fn from(e: Error) -> Self {
        match e {
            Error::ExhaustedIdSpace => Self::ExhaustedIdSpace,
            other => Self::Protocol(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// What a suspended caller eventually receives.
pub type Settlement = std::result::Result<Map, BridgeError>;

/// An outbound call awaiting its response.
#[derive(Debug)]
pub struct PendingCall {
    pub command: String,
    tx: oneshot::Sender<Settlement>,
}

impl PendingCall {
    /// Wakes the caller. A caller that already gave up is ignored.
    pub fn settle(self, result: Settlement) {
        let _ = self.tx.send(result);
    }
}

#[derive(Debug, Default)]
pub struct Ledger {
    next_id: AtomicU32,
    outbound: DashMap<CallId, PendingCall>,
    inbound: DashMap<CallId, Option<AbortHandle>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn starting_at(id: CallId) -> Self {
        Self { next_id: AtomicU32::new(id), ..Self::default() }
    }

    /// Reserves a fresh id without registering anything under it.
    pub fn next_id(&self) -> Result<CallId> {
        self.next_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
                (id <= MAX_CALL_ID).then_some(id + 1)
            })
            .map_err(|_| Error::ExhaustedIdSpace)
    }

    /// Reserves an id and the slot its response will be delivered to.
    pub fn register_outbound(
        &self,
        command: &str,
    ) -> Result<(CallId, oneshot::Receiver<Settlement>)> {
        let id = self.next_id()?;
        let (tx, rx) = oneshot::channel();
        self.outbound.insert(id, PendingCall { command: command.to_string(), tx });
        Ok((id, rx))
    }

    /// Removes a pending call so the caller can inspect it before settling.
    pub fn take(&self, id: CallId) -> Result<PendingCall> {
        self.outbound
            .remove(&id)
            .map(|(_, pending)| pending)
            .ok_or(Error::UnknownCallId(id))
    }

    pub fn settle(&self, id: CallId, result: Settlement) -> Result<()> {
        self.take(id)?.settle(result);
        Ok(())
    }

    /// Drops a pending call whose caller stopped waiting.
    pub fn forget(&self, id: CallId) {
        self.outbound.remove(&id);
    }

    /// Settles every outbound call with `ChannelClosed` and aborts every
    /// inbound handler. Returns how many outbound calls were settled.
    pub fn abort_all(&self, reason: &str) -> usize {
        let ids: Vec<CallId> = self.outbound.iter().map(|e| *e.key()).collect();
        let mut settled = 0;
        for id in ids {
            if let Some((_, pending)) = self.outbound.remove(&id) {
                pending.settle(Err(BridgeError::ChannelClosed { reason: reason.to_string() }));
                settled += 1;
            }
        }

        let ids: Vec<CallId> = self.inbound.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, Some(task))) = self.inbound.remove(&id) {
                task.abort();
            }
        }
        settled
    }

    /// Marks an engine request as being answered.
    pub fn begin_inbound(&self, id: CallId) -> Result<()> {
        match self.inbound.entry(id) {
            Entry::Occupied(_) => Err(Error::IdCollision(id)),
            Entry::Vacant(slot) => {
                slot.insert(None);
                Ok(())
            }
        }
    }

    /// Attaches the task answering `id`, unless it already finished.
    pub fn attach_inbound(&self, id: CallId, task: AbortHandle) {
        if let Some(mut entry) = self.inbound.get_mut(&id) {
            *entry = Some(task);
        }
    }

    pub fn finish_inbound(&self, id: CallId) {
        self.inbound.remove(&id);
    }

    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }

    pub fn pending_inbound(&self) -> usize {
        self.inbound.len()
    }
}
