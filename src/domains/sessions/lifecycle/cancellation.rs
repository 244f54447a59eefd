use crate::domains::process::ProcessSupervisor;
use crate::domains::sessions::entity::{SessionState, WorkerSession};
use crate::domains::sessions::preferences::RadiusPreferences;
use crate::domains::sessions::registry::SessionRegistry;
use crate::errors::WorldpoolError;
use crate::events::{EventSink, SessionEventPayload, WorldpoolEvent, emit_event};
use crate::infrastructure::config::CleanupConfig;
use crate::infrastructure::frontend::{FrontendError, FrontendRegistry};
use crate::utils::fs_utils::remove_tree_with_retries;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// A container that may own sessions outside the leader registry, such as
/// the warm pool. Cleanup releases a session from every holder.
pub trait SessionHolder: Send + Sync {
    fn held_sessions(&self) -> Vec<Arc<WorkerSession>>;
    fn release(&self, session: &Arc<WorkerSession>);
    fn clear(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupReason {
    SpawnFailed,
    ReachabilityTimeout,
    LeaderConnectFailed,
    MembersGone,
    Disbanded,
    Evicted,
    Unhealthy,
    ShuttingDown,
}

impl CleanupReason {
    /// Creation never completed; the leader's cooldown is lifted.
    pub fn is_creation_failure(self) -> bool {
        matches!(
            self,
            CleanupReason::SpawnFailed
                | CleanupReason::ReachabilityTimeout
                | CleanupReason::LeaderConnectFailed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CleanupReason::SpawnFailed => "spawn_failed",
            CleanupReason::ReachabilityTimeout => "reachability_timeout",
            CleanupReason::LeaderConnectFailed => "leader_connect_failed",
            CleanupReason::MembersGone => "members_gone",
            CleanupReason::Disbanded => "disbanded",
            CleanupReason::Evicted => "evicted",
            CleanupReason::Unhealthy => "unhealthy",
            CleanupReason::ShuttingDown => "shutting_down",
        }
    }
}

impl fmt::Display for CleanupReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub process_stopped: bool,
    pub unregistered: bool,
    pub directory_removed: bool,
    pub detached: bool,
    pub errors: Vec<WorldpoolError>,
}

#[derive(Debug, Clone)]
pub enum CleanupOutcome {
    Performed(CleanupReport),
    AlreadyCleaned,
}

impl CleanupOutcome {
    pub fn was_performed(&self) -> bool {
        matches!(self, CleanupOutcome::Performed(_))
    }
}

/// The single path that frees a session's process, front-end entry and
/// working directory.
pub struct CleanupCoordinator {
    supervisor: Arc<ProcessSupervisor>,
    frontend: Arc<dyn FrontendRegistry>,
    registry: Arc<SessionRegistry>,
    preferences: Arc<RadiusPreferences>,
    events: Arc<dyn EventSink>,
    settings: CleanupConfig,
    holders: RwLock<Vec<Arc<dyn SessionHolder>>>,
}

impl CleanupCoordinator {
    pub fn new(
        supervisor: Arc<ProcessSupervisor>,
        frontend: Arc<dyn FrontendRegistry>,
        registry: Arc<SessionRegistry>,
        preferences: Arc<RadiusPreferences>,
        events: Arc<dyn EventSink>,
        settings: CleanupConfig,
    ) -> Self {
        Self {
            supervisor,
            frontend,
            registry,
            preferences,
            events,
            settings,
            holders: RwLock::new(Vec::new()),
        }
    }

    pub fn register_holder(&self, holder: Arc<dyn SessionHolder>) {
        self.holders.write().push(holder);
    }

    /// Tears `session` down at most once. Concurrent and repeated callers
    /// after the first get [`CleanupOutcome::AlreadyCleaned`].
    ///
    /// Each step runs regardless of earlier failures; problems end up in the
    /// report and the log, never as an error.
    pub async fn cleanup(
        &self,
        session: &Arc<WorkerSession>,
        reason: CleanupReason,
    ) -> CleanupOutcome {
        if !session.claim_cleanup() {
            debug!("[Cleanup] {} already cleaned", session.name());
            return CleanupOutcome::AlreadyCleaned;
        }

        let name = session.name();
        let leader = session.leader();
        info!("[Cleanup] Cleaning up {name} ({reason})");
        session.transition(SessionState::Cleaning);
        session.set_connecting(false);

        let mut report = CleanupReport::default();

        self.supervisor.terminate(&name, session.process()).await;
        report.process_stopped = !self.supervisor.is_alive(session.process());
        if !report.process_stopped {
            report.errors.push(WorldpoolError::cleanup(
                &name,
                "terminate",
                "worker still running",
            ));
        }

        match self.frontend.unregister_address(&name).await {
            Ok(()) | Err(FrontendError::NotRegistered { .. }) => report.unregistered = true,
            Err(e) => {
                warn!("[Cleanup] Unregister of {name} failed: {e}");
                report
                    .errors
                    .push(WorldpoolError::cleanup(&name, "unregister", e));
            }
        }

        report.directory_removed = remove_tree_with_retries(
            session.workdir(),
            self.settings.delete_attempts,
            self.settings.delete_backoff(),
        )
        .await;
        if !report.directory_removed {
            report.errors.push(WorldpoolError::cleanup(
                &name,
                "remove_directory",
                format!("leftover {}", session.workdir().display()),
            ));
        }

        report.detached = self.registry.detach(session);
        if let Some(leader) = leader {
            if report.detached {
                self.preferences.forget(leader);
            }
            if reason.is_creation_failure() {
                self.registry.clear_admission(leader);
            }
        }

        for holder in self.holders() {
            holder.release(session);
        }

        session.transition(SessionState::Terminated);
        emit_event(
            self.events.as_ref(),
            WorldpoolEvent::SessionRemoved,
            &SessionEventPayload {
                session: name.clone(),
                leader: leader.map(|l| l.to_string()),
            },
        );

        if report.errors.is_empty() {
            info!("[Cleanup] {name} cleaned up");
        } else {
            for error in &report.errors {
                warn!("[Cleanup] {error}");
            }
            warn!(
                "[Cleanup] {name} cleaned up with {} error(s)",
                report.errors.len()
            );
        }
        CleanupOutcome::Performed(report)
    }

    /// Frees what a bootstrap still in flight acquired after `session` was
    /// cleaned: a late worker PID or launcher, a front-end entry registered
    /// after the unregister, a recreated working directory. No-op for
    /// sessions that were never cleaned.
    pub async fn release_late(&self, session: &WorkerSession) {
        if !session.is_cleaned() {
            return;
        }
        let name = session.name();
        self.supervisor.terminate(&name, session.process()).await;

        if self.frontend.is_registered(&name) {
            info!("[Cleanup] Dropping late registration of {name}");
            match self.frontend.unregister_address(&name).await {
                Ok(()) | Err(FrontendError::NotRegistered { .. }) => {}
                Err(e) => warn!("[Cleanup] Late unregister of {name} failed: {e}"),
            }
        }

        if session.workdir().exists()
            && !remove_tree_with_retries(
                session.workdir(),
                self.settings.delete_attempts,
                self.settings.delete_backoff(),
            )
            .await
        {
            warn!(
                "[Cleanup] Leftover directory {} for {name}",
                session.workdir().display()
            );
        }
    }

    /// Every tracked and pooled session, each object once.
    pub fn collect_all(&self) -> Vec<Arc<WorkerSession>> {
        let mut seen = HashSet::new();
        let mut all = Vec::new();
        let pooled = self.holders().into_iter().flat_map(|h| h.held_sessions());
        for session in self.registry.sessions().into_iter().chain(pooled) {
            if seen.insert(Arc::as_ptr(&session) as usize) {
                all.push(session);
            }
        }
        all
    }

    /// Drains every session with bounded concurrency and a per-session
    /// timeout, then empties all maps. Returns how many sessions were
    /// handed to cleanup.
    pub async fn cleanup_all(&self) -> usize {
        let sessions = self.collect_all();
        let count = sessions.len();
        info!("[Cleanup] Draining {count} session(s)");

        let per_session = self.settings.per_session_timeout();
        stream::iter(sessions)
            .map(|session| async move {
                let name = session.name();
                if tokio::time::timeout(
                    per_session,
                    self.cleanup(&session, CleanupReason::ShuttingDown),
                )
                .await
                .is_err()
                {
                    warn!(
                        "[Cleanup] {name} did not finish within {}s",
                        per_session.as_secs()
                    );
                }
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        self.registry.clear();
        self.preferences.clear();
        for holder in self.holders() {
            holder.clear();
        }
        count
    }

    fn holders(&self) -> Vec<Arc<dyn SessionHolder>> {
        self.holders.read().clone()
    }
}
