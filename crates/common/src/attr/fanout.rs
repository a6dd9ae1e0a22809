//! Per-client delivery queues for attribute deltas.
//!
//! Every connected worker has a queue of deltas it has not seen yet. At most
//! one batch is in flight per client; anything queued while a send is
//! outstanding is coalesced into the next send, in order.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::FileAttr;
use crate::error::{FanoutError, WireError};

/// A remote peer that receives attribute deltas.
///
/// `send` may block on network I/O; the registry never calls it
/// concurrently for the same client.
pub trait FanoutClient: Send + Sync {
    fn id(&self) -> String;
    fn send(&self, batch: &[FileAttr]) -> Result<(), WireError>;
}

struct Pending {
    client: Arc<dyn FanoutClient>,
    pending: Vec<FileAttr>,
    /// Highest file set id known to be delivered.
    sent_id: u64,
    /// Highest file set id queued.
    pending_id: u64,
    busy: bool,
}

struct Clients {
    clients: HashMap<String, Pending>,
    next_fileset_id: u64,
}

/// Delivery queues, one per connected client.
pub struct FanoutRegistry {
    inner: Mutex<Clients>,
    cond: Condvar,
}

impl Default for FanoutRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FanoutRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Clients {
                clients: HashMap::new(),
                next_fileset_id: 1,
            }),
            cond: Condvar::new(),
        }
    }

    /// Register `client`, seeding its queue with `initial` as one file set.
    pub fn add(
        &self,
        client: Arc<dyn FanoutClient>,
        initial: Vec<FileAttr>,
    ) -> Result<(), FanoutError> {
        let id = client.id();
        let mut inner = self.inner.lock();
        if inner.clients.contains_key(&id) {
            return Err(FanoutError::DuplicateClient(id));
        }
        let fileset_id = inner.next_fileset_id;
        inner.next_fileset_id += 1;
        tracing::debug!(client = %id, entries = initial.len(), "registered fan-out client");
        inner.clients.insert(
            id,
            Pending {
                client,
                pending: initial,
                sent_id: 0,
                pending_id: fileset_id,
                busy: false,
            },
        );
        Ok(())
    }

    /// Drop a client and its queue. Returns whether it was registered.
    pub fn remove(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.clients.remove(id).is_some();
        if removed {
            tracing::debug!(client = %id, "removed fan-out client");
            self.cond.notify_all();
        }
        removed
    }

    /// Queue `files` for every client as a new file set.
    pub fn queue(&self, files: &[FileAttr]) {
        let mut inner = self.inner.lock();
        let fileset_id = inner.next_fileset_id;
        inner.next_fileset_id += 1;
        for c in inner.clients.values_mut() {
            c.pending.extend(files.iter().cloned());
            c.pending_id = fileset_id;
        }
    }

    /// Append `files` to every queue without starting a new file set.
    ///
    /// They ride along with the next delivery that is triggered by a
    /// [`queue`](Self::queue).
    pub fn append(&self, files: &[FileAttr]) {
        let mut inner = self.inner.lock();
        for c in inner.clients.values_mut() {
            c.pending.extend(files.iter().cloned());
        }
    }

    /// Deliver everything queued for client `id`.
    ///
    /// If another send for the same client is in flight and has not yet
    /// covered what was queued when this call started, wait for it first.
    /// A failed delivery puts the batch back at the head of the queue.
    pub fn send(&self, id: &str) -> Result<(), FanoutError> {
        let mut inner = self.inner.lock();
        let need = pending_id(&inner, id)?;
        loop {
            let c = client(&inner, id)?;
            if !(c.busy && need > c.sent_id) {
                break;
            }
            self.cond.wait(&mut inner);
        }

        let c = inner
            .clients
            .get_mut(id)
            .ok_or_else(|| FanoutError::UnknownClient(id.to_string()))?;
        if need <= c.sent_id {
            return Ok(());
        }
        if c.pending.is_empty() {
            c.sent_id = c.sent_id.max(c.pending_id);
            return Ok(());
        }
        let batch = std::mem::take(&mut c.pending);
        let covered = c.pending_id;
        let target = c.client.clone();
        c.busy = true;

        let result = MutexGuard::unlocked(&mut inner, || target.send(&batch));

        let outcome = match inner.clients.get_mut(id) {
            Some(c) => {
                c.busy = false;
                match result {
                    Ok(()) => {
                        tracing::debug!(client = %id, entries = batch.len(), "delivered file set");
                        c.sent_id = c.sent_id.max(covered);
                        Ok(())
                    }
                    Err(source) => {
                        tracing::warn!(client = %id, error = %source, "delivery failed, requeueing");
                        let mut requeued = batch;
                        requeued.append(&mut c.pending);
                        c.pending = requeued;
                        Err(FanoutError::Delivery {
                            id: id.to_string(),
                            source,
                        })
                    }
                }
            }
            None => result.map_err(|source| FanoutError::Delivery {
                id: id.to_string(),
                source,
            }),
        };
        self.cond.notify_all();
        outcome
    }

    /// Number of deltas waiting for client `id`.
    pub fn pending_len(&self, id: &str) -> Option<usize> {
        self.inner.lock().clients.get(id).map(|c| c.pending.len())
    }
}

fn client<'a>(inner: &'a Clients, id: &str) -> Result<&'a Pending, FanoutError> {
    inner
        .clients
        .get(id)
        .ok_or_else(|| FanoutError::UnknownClient(id.to_string()))
}

fn pending_id(inner: &Clients, id: &str) -> Result<u64, FanoutError> {
    client(inner, id).map(|c| c.pending_id)
}
