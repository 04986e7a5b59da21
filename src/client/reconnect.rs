//! Single-slot deferred reconnect
//!
//! `ReconnectSlot` holds at most one pending timer. Arming an occupied slot
//! is refused, cancelling aborts the timer, and a timer that fires removes
//! itself from the slot before running its task, so the task may arm the
//! slot again.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

struct Pending {
    id: u64,
    handle: JoinHandle<()>,
}

#[derive(Clone, Default)]
pub struct ReconnectSlot {
    pending: Arc<Mutex<Option<Pending>>>,
    next_id: Arc<AtomicU64>,
}

impl ReconnectSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay` unless something is already pending.
    /// Returns `false` when the slot was occupied. Must be called from
    /// within a Tokio runtime.
    pub fn arm<F>(&self, delay: Duration, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut pending = self.pending.lock();
        if pending.is_some() {
            return false;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = self.pending.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut pending = slot.lock();
                // cancelled while waking up
                if !pending.as_ref().is_some_and(|p| p.id == id) {
                    return;
                }
                pending.take();
            }
            task.await;
        });

        *pending = Some(Pending { id, handle });
        true
    }

    /// Abort the pending timer, if any. Returns whether one was pending.
    pub fn cancel(&self) -> bool {
        match self.pending.lock().take() {
            Some(p) => {
                p.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending.lock().is_some()
    }
}

impl std::fmt::Debug for ReconnectSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectSlot")
            .field("armed", &self.is_armed())
            .finish()
    }
}
