use super::warm::WarmPool;
use crate::domains::sessions::context::SessionContext;
use crate::domains::sessions::entity::{SessionState, WorkerSession};
use crate::domains::sessions::lifecycle::{CleanupReason, SessionBootstrapper};
use crate::domains::sessions::service::WarmSource;
use crate::infrastructure::frontend::FrontendError;
use crate::shared::PlayerId;
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub target: usize,
    pub pruned: usize,
    pub spawned: usize,
    pub evicted: usize,
    pub size: usize,
}

/// Keeps the warm pool at `min(max, players + buffer)` and hands entries
/// out to leaders.
pub struct WarmPoolManager {
    ctx: Arc<SessionContext>,
    pool: Arc<WarmPool>,
    bootstrapper: SessionBootstrapper,
    reconciling: tokio::sync::Mutex<()>,
}

impl WarmPoolManager {
    pub fn new(ctx: Arc<SessionContext>) -> Arc<Self> {
        let pool = Arc::new(WarmPool::new());
        ctx.cleanup.register_holder(pool.clone());
        Arc::new(Self {
            bootstrapper: SessionBootstrapper::new(Arc::clone(&ctx)),
            ctx,
            pool,
            reconciling: tokio::sync::Mutex::new(()),
        })
    }

    pub fn pool(&self) -> &Arc<WarmPool> {
        &self.pool
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    pub fn target_size(&self, player_count: usize) -> usize {
        let settings = &self.ctx.config.pool;
        player_count.saturating_add(settings.buffer).min(settings.max)
    }

    /// One pass: prune dead entries, then grow or shrink to the target.
    /// Passes never overlap.
    pub async fn reconcile(&self, player_count: usize) -> ReconcileReport {
        let _pass = self.reconciling.lock().await;
        let mut report = ReconcileReport {
            target: self.target_size(player_count),
            ..ReconcileReport::default()
        };
        if self.ctx.is_shutting_down() {
            report.size = self.pool.len();
            return report;
        }

        let supervisor = &self.ctx.supervisor;
        let dropped = self.pool.prune(|session| {
            !session.is_cleaned()
                && (session.process().pid().is_none() || supervisor.is_alive(session.process()))
        });
        report.pruned = dropped.len();
        for session in dropped {
            if session.is_cleaned() {
                continue;
            }
            warn!("[Warm] {} is no longer running; pruning", session.name());
            self.cleanup_in_background(session, CleanupReason::Unhealthy);
        }

        while self.pool.len() < report.target && !self.ctx.is_shutting_down() {
            self.spawn_warm();
            report.spawned += 1;
        }

        while self.pool.len() > report.target {
            let Some(session) = self.pool.pop_newest() else {
                break;
            };
            info!("[Warm] Evicting surplus {}", session.name());
            self.cleanup_in_background(session, CleanupReason::Evicted);
            report.evicted += 1;
        }

        report.size = self.pool.len();
        if report.spawned + report.evicted + report.pruned > 0 {
            info!(
                "[Warm] Pool reconciled: size {} target {} (+{} -{} pruned {})",
                report.size, report.target, report.spawned, report.evicted, report.pruned
            );
        }
        report
    }

    fn spawn_warm(&self) -> Arc<WorkerSession> {
        let name = self.ctx.warm_session_name();
        let (port, control) = self.ctx.allocate_ports();
        info!(
            "[Warm] Spawning {name} on port {port} (control {})",
            control.port
        );
        let session = Arc::new(WorkerSession::warm(
            name.clone(),
            port,
            control,
            self.ctx.workdir_for(&name),
        ));
        self.pool.push(Arc::clone(&session));

        let bootstrapper = self.bootstrapper.clone();
        let task_session = Arc::clone(&session);
        tokio::spawn(async move {
            if let Err(e) = bootstrapper.spawn_warm(&task_session).await {
                debug!("[Warm] {name} did not become ready: {e}");
            }
        });
        session
    }

    fn cleanup_in_background(&self, session: Arc<WorkerSession>, reason: CleanupReason) {
        let cleanup = Arc::clone(&self.ctx.cleanup);
        tokio::spawn(async move {
            cleanup.cleanup(&session, reason).await;
        });
    }

    /// Pops the oldest ready entry and rebinds it to `leader`: registry
    /// ownership first, then the rename, then the front-end entry. `None`
    /// when nothing is ready or the leader already owns a session; a refill
    /// is requested either way.
    pub async fn adopt(
        &self,
        leader: PlayerId,
        members: &[PlayerId],
    ) -> Option<Arc<WorkerSession>> {
        if self.ctx.is_shutting_down() {
            return None;
        }
        let popped = self.pool.pop_ready();
        self.pool.request_top_up();
        let session = popped?;

        if !self
            .ctx
            .registry
            .attach_if_vacant(&session, leader, members.iter().copied())
        {
            debug!(
                "[Warm] {leader} already has a session; returning {} to the pool",
                session.name()
            );
            self.pool.restore(session);
            return None;
        }
        let new_name = self.ctx.session_name_for(leader);
        let old_name = session.reassign(new_name.clone(), leader, members.iter().copied());
        self.ctx.preferences.ensure_defaults(leader);

        let frontend = &self.ctx.frontend;
        match frontend.unregister_address(&old_name).await {
            Ok(()) | Err(FrontendError::NotRegistered { .. }) => {}
            Err(e) => debug!("[Warm] Unregistering {old_name} failed: {e}"),
        }
        if let Err(e) = frontend
            .register_address(&new_name, &self.ctx.config.spawn.host, session.port())
            .await
        {
            warn!("[Warm] Could not register {new_name}: {e}");
            self.ctx
                .cleanup
                .cleanup(&session, CleanupReason::LeaderConnectFailed)
                .await;
            return None;
        }

        if session.is_cleaned() || !session.transition(SessionState::ReachablePendingInit) {
            debug!("[Warm] {new_name} was torn down during adoption");
            self.ctx.cleanup.release_late(&session).await;
            return None;
        }
        session.set_connecting(true);
        info!("[Warm] Warm session {old_name} adopted as {new_name} for leader {leader}");
        Some(session)
    }
}

#[async_trait]
impl WarmSource for WarmPoolManager {
    async fn adopt(&self, leader: PlayerId, members: &[PlayerId]) -> Option<Arc<WorkerSession>> {
        WarmPoolManager::adopt(self, leader, members).await
    }

    fn request_top_up(&self) {
        self.pool.request_top_up();
    }
}
