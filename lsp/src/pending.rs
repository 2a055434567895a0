//! Pending-request table: request ids mapped to one-shot response slots.
//!
//! Id allocation and slot registration happen under the same lock, so an id
//! is never visible to the reader before its slot exists, and no slot can be
//! registered once the table is closed. Each slot leaves the map exactly once:
//! resolved by a response, cancelled by its waiter (timeout or drop), or
//! failed by [`PendingRequests::close`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::{LspError, Result};

type Outcome = Result<serde_json::Value>;

struct Table {
    slots: HashMap<u64, oneshot::Sender<Outcome>>,
    next_id: u64,
    closed: bool,
}

pub(crate) struct PendingRequests {
    table: Mutex<Table>,
}

impl PendingRequests {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            table: Mutex::new(Table {
                slots: HashMap::new(),
                next_id: 1,
                closed: false,
            }),
        })
    }

    // Never held across an await; a panic elsewhere can't corrupt the map.
    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate the next id and register its slot.
    pub fn register(self: &Arc<Self>) -> Result<Waiter> {
        let mut table = self.lock();
        if table.closed {
            return Err(LspError::SessionClosed);
        }
        let id = table.next_id;
        table.next_id += 1;
        let (tx, rx) = oneshot::channel();
        table.slots.insert(id, tx);
        Ok(Waiter {
            id,
            rx,
            pending: Arc::clone(self),
        })
    }

    /// Deliver a response to the waiter registered under `id`.
    ///
    /// An id that was issued but is no longer pending (duplicate or late
    /// reply) and an id this session never issued are both protocol errors;
    /// neither touches any other slot.
    pub fn resolve(&self, id: u64, outcome: Outcome) -> Result<()> {
        let slot = {
            let mut table = self.lock();
            match table.slots.remove(&id) {
                Some(slot) => slot,
                None if id >= 1 && id < table.next_id => {
                    return Err(LspError::protocol(format!(
                        "response for request {id} which is no longer pending (duplicate or late)"
                    )));
                }
                None => {
                    return Err(LspError::protocol(format!(
                        "unsolicited response with id {id}"
                    )));
                }
            }
        };
        if slot.send(outcome).is_err() {
            tracing::debug!(id, "Waiter went away before its response arrived");
        }
        Ok(())
    }

    /// Remove a slot without resolving it. Returns whether it was present.
    pub fn cancel(&self, id: u64) -> bool {
        self.lock().slots.remove(&id).is_some()
    }

    /// Resolve every current slot with [`LspError::SessionClosed`], leaving
    /// the table open for further registrations.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<_> = self.lock().slots.drain().collect();
        let count = drained.len();
        for (_, slot) in drained {
            let _ = slot.send(Err(LspError::SessionClosed));
        }
        count
    }

    /// Refuse new registrations and fail everything still pending.
    pub fn close(&self) -> usize {
        self.lock().closed = true;
        self.fail_all()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }
}

/// The caller's side of one pending request.
///
/// Dropping a waiter (e.g. the caller's future is cancelled) removes its slot.
pub(crate) struct Waiter {
    id: u64,
    rx: oneshot::Receiver<Outcome>,
    pending: Arc<PendingRequests>,
}

impl Waiter {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Suspend until this request's response arrives or `timeout` elapses.
    pub async fn wait(mut self, timeout: Duration, method: &'static str) -> Outcome {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            // Slot dropped without a response: the table went away.
            Ok(Err(_)) => Err(LspError::SessionClosed),
            Err(_) => {
                if self.pending.cancel(self.id) {
                    return Err(LspError::RequestTimeout {
                        id: self.id,
                        method,
                        timeout,
                    });
                }
                // Resolved in the instant the deadline fired.
                match self.rx.try_recv() {
                    Ok(outcome) => outcome,
                    Err(_) => Err(LspError::SessionClosed),
                }
            }
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.pending.cancel(self.id);
    }
}
