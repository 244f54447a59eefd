use crate::domains::sessions::CleanupCoordinator;
use log::{info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::{Handle, RuntimeFlavor};

/// Drains every session (panic/unexpected exit).
pub async fn emergency_cleanup(cleanup: &CleanupCoordinator) -> usize {
    info!("[Cleanup] Emergency cleanup (panic/unexpected exit)");
    let drained = cleanup.cleanup_all().await;
    info!("[Cleanup] Emergency cleanup complete ({drained} session(s))");
    drained
}

/// Ensures sessions are torn down even when the binary unwinds before a
/// clean shutdown. Disarm it once the regular shutdown path has run.
pub struct SessionCleanupGuard {
    cleanup: Arc<CleanupCoordinator>,
    armed: AtomicBool,
}

impl SessionCleanupGuard {
    pub fn new(cleanup: Arc<CleanupCoordinator>) -> Self {
        Self {
            cleanup,
            armed: AtomicBool::new(true),
        }
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }
}

impl Drop for SessionCleanupGuard {
    fn drop(&mut self) {
        if !self.armed.swap(false, Ordering::SeqCst) {
            return;
        }
        let cleanup = Arc::clone(&self.cleanup);

        // Children were spawned on the current runtime, so prefer draining there.
        if let Ok(handle) = Handle::try_current()
            && handle.runtime_flavor() == RuntimeFlavor::MultiThread
        {
            tokio::task::block_in_place(|| {
                handle.block_on(async { emergency_cleanup(&cleanup).await });
            });
            return;
        }

        let drained = std::thread::spawn(move || {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map(|rt| rt.block_on(async { emergency_cleanup(&cleanup).await }))
        })
        .join();
        if !matches!(drained, Ok(Ok(_))) {
            warn!("[Cleanup] Emergency cleanup could not run");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::control::ControlEndpoint;
    use crate::domains::sessions::WorkerSession;
    use crate::shared::PlayerId;
    use crate::test_support::{FakeFrontend, Harness};

    fn attached_session(h: &Harness) -> Arc<WorkerSession> {
        let leader = PlayerId::random();
        let name = h.ctx.session_name_for(leader);
        let session = Arc::new(WorkerSession::fresh(
            name.clone(),
            leader,
            [],
            30100,
            ControlEndpoint::new("127.0.0.1", 30110, "secret"),
            h.ctx.workdir_for(&name),
        ));
        h.ctx.registry.attach(&session, leader, session.members());
        session
    }

    #[tokio::test]
    async fn emergency_cleanup_with_no_sessions() {
        let h = Harness::new(FakeFrontend::new());
        assert_eq!(emergency_cleanup(&h.ctx.cleanup).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn armed_guard_drains_on_drop() {
        let h = Harness::new(FakeFrontend::new());
        let session = attached_session(&h);
        {
            let _guard = SessionCleanupGuard::new(Arc::clone(&h.ctx.cleanup));
        }
        assert!(session.is_cleaned());
        assert!(h.ctx.registry.is_empty());
    }

    #[test]
    fn guard_drains_without_a_runtime() {
        let h = Harness::new(FakeFrontend::new());
        let session = attached_session(&h);
        drop(SessionCleanupGuard::new(Arc::clone(&h.ctx.cleanup)));
        assert!(session.is_cleaned());
    }

    #[tokio::test]
    async fn disarmed_guard_leaves_sessions_alone() {
        let h = Harness::new(FakeFrontend::new());
        let session = attached_session(&h);
        let guard = SessionCleanupGuard::new(Arc::clone(&h.ctx.cleanup));
        guard.disarm();
        assert!(!guard.is_armed());
        drop(guard);
        assert!(!session.is_cleaned());
    }
}
