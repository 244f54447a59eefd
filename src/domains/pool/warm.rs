use crate::domains::sessions::entity::{SessionState, WorkerSession};
use crate::domains::sessions::lifecycle::SessionHolder;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

/// Ordered warm entries: the oldest sits at the front and is adopted first,
/// the newest sits at the back and is evicted first.
#[derive(Debug, Default)]
pub struct WarmPool {
    entries: Mutex<VecDeque<Arc<WorkerSession>>>,
    top_up: Notify,
}

impl WarmPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn push(&self, session: Arc<WorkerSession>) {
        self.entries.lock().push_back(session);
    }

    /// Removes and returns the oldest entry that is ready for adoption.
    pub fn pop_ready(&self) -> Option<Arc<WorkerSession>> {
        let mut entries = self.entries.lock();
        let index = entries
            .iter()
            .position(|s| s.state() == SessionState::WarmReady && !s.is_cleaned())?;
        entries.remove(index)
    }

    /// Puts an entry back at the front, ahead of everything else.
    pub fn restore(&self, session: Arc<WorkerSession>) {
        self.entries.lock().push_front(session);
    }

    pub fn pop_newest(&self) -> Option<Arc<WorkerSession>> {
        self.entries.lock().pop_back()
    }

    /// Drops entries failing `keep`; returns them in pool order.
    pub fn prune(&self, mut keep: impl FnMut(&WorkerSession) -> bool) -> Vec<Arc<WorkerSession>> {
        let mut entries = self.entries.lock();
        let mut removed = Vec::new();
        entries.retain(|session| {
            if keep(session) {
                true
            } else {
                removed.push(Arc::clone(session));
                false
            }
        });
        removed
    }

    pub fn request_top_up(&self) {
        self.top_up.notify_one();
    }

    pub async fn top_up_requested(&self) {
        self.top_up.notified().await;
    }
}

impl SessionHolder for WarmPool {
    fn held_sessions(&self) -> Vec<Arc<WorkerSession>> {
        self.entries.lock().iter().cloned().collect()
    }

    /// A cleaned entry that was never adopted leaves a gap; ask for a refill.
    fn release(&self, session: &Arc<WorkerSession>) {
        let removed = {
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|s| !Arc::ptr_eq(s, session));
            before != entries.len()
        };
        if removed || session.leader().is_none() {
            self.request_top_up();
        }
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}
