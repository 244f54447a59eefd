use crate::domains::process::PidHandoff;
use crate::domains::sessions::context::SessionContext;
use crate::domains::sessions::entity::{SessionState, WorkerSession};
use crate::domains::sessions::lifecycle::cancellation::CleanupReason;
use crate::errors::WorldpoolError;
use crate::events::{
    CommandPayload, SessionEventPayload, SessionFailedPayload, WorldpoolEvent, emit_event,
};
use crate::infrastructure::frontend::FrontendError;
use crate::shared::{PlayerId, RetryError, RetryPolicy};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

const REACH_JITTER: Duration = Duration::from_millis(250);

/// Drives one session from launch to ACTIVE (or WARM_READY), handing it to
/// cleanup on any failure along the way.
#[derive(Clone)]
pub struct SessionBootstrapper {
    ctx: Arc<SessionContext>,
}

impl SessionBootstrapper {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self { ctx }
    }

    /// Fresh session for its leader: launch, PID handoff, register, reach and
    /// connect the leader, then activate.
    pub async fn spawn_fresh(&self, session: &Arc<WorkerSession>) -> Result<(), WorldpoolError> {
        let result = async {
            self.launch(session, session.leader()).await?;
            self.connect_leader(session).await?;
            self.checkpoint(session)
        }
        .await;

        match result {
            Ok(()) => {
                self.activate(session).await;
                Ok(())
            }
            Err(e) => Err(self.fail(session, e, false).await),
        }
    }

    /// Adopted warm session: already launched and registered under its new
    /// name; only the leader connection and activation remain.
    pub async fn connect_adopted(
        &self,
        session: &Arc<WorkerSession>,
    ) -> Result<(), WorldpoolError> {
        let result = async {
            self.connect_leader(session).await?;
            self.checkpoint(session)
        }
        .await;
        match result {
            Ok(()) => {
                self.activate(session).await;
                Ok(())
            }
            Err(e) => Err(self.fail(session, e, true).await),
        }
    }

    /// Pool entry: launch with an empty world, wait until the front-end
    /// reaches it, build the platform, then mark it WARM_READY.
    pub async fn spawn_warm(&self, session: &Arc<WorkerSession>) -> Result<(), WorldpoolError> {
        let result = async {
            self.launch(session, None).await?;
            self.wait_reachable(session).await?;
            self.checkpoint(session)
        }
        .await;
        if let Err(e) = result {
            return Err(self.fail(session, e, false).await);
        }

        session.set_connecting(false);
        if session.claim_platform_init() {
            self.ctx.platform.initialize(session).await;
        }
        let name = session.name();
        if !session.transition(SessionState::WarmReady) {
            debug!(
                "[Warm] {name} left the pool before it was ready ({})",
                session.state()
            );
            return Err(WorldpoolError::InvalidSessionState {
                session: name,
                current_state: session.state().to_string(),
                expected_state: SessionState::WarmSpawning.to_string(),
            });
        }
        info!("[Warm] {name} is ready on port {}", session.port());
        emit_event(
            self.ctx.events.as_ref(),
            WorldpoolEvent::WarmReady,
            &SessionEventPayload {
                session: name,
                leader: None,
            },
        );
        Ok(())
    }

    /// Fails once shutdown started or the session was cleaned underneath the
    /// bootstrap.
    fn checkpoint(&self, session: &WorkerSession) -> Result<(), WorldpoolError> {
        if self.ctx.is_shutting_down() {
            Err(WorldpoolError::ShuttingDown)
        } else if session.is_cleaned() {
            Err(torn_down(session))
        } else {
            Ok(())
        }
    }

    async fn launch(
        &self,
        session: &Arc<WorkerSession>,
        owner: Option<PlayerId>,
    ) -> Result<(), WorldpoolError> {
        self.checkpoint(session)?;
        let name = session.name();
        let spec = self
            .ctx
            .launch_spec(&name, session.port(), session.control(), owner);
        tokio::fs::create_dir_all(&spec.workdir)
            .await
            .map_err(|e| WorldpoolError::spawn(&name, format!("create workdir: {e}")))?;

        let child = self.ctx.supervisor.spawn(&spec)?;
        session.process().set_launcher(child);

        let handoff = self
            .ctx
            .supervisor
            .wait_for_pid_handoff(
                &name,
                &spec.workdir,
                session.process(),
                self.ctx.config.spawn.pid_handoff_timeout(),
                &self.ctx.shutdown,
            )
            .await;
        match handoff {
            PidHandoff::Captured(_) => {}
            PidHandoff::ShuttingDown => return Err(WorldpoolError::ShuttingDown),
            PidHandoff::Released => return Err(torn_down(session)),
            PidHandoff::TimedOut => {
                return Err(WorldpoolError::spawn(
                    &name,
                    format!(
                        "no worker PID after {}s",
                        self.ctx.config.spawn.pid_handoff_timeout_secs
                    ),
                ));
            }
            PidHandoff::LauncherExited(code) => {
                return Err(WorldpoolError::spawn(
                    &name,
                    format!("launcher exited with code {code}"),
                ));
            }
        }

        self.checkpoint(session)?;
        self.ctx
            .frontend
            .register_address(&name, &self.ctx.config.spawn.host, session.port())
            .await
            .map_err(|e| WorldpoolError::spawn(&name, format!("register address: {e}")))?;
        debug!("[Spawn] Registered {name} at port {}", session.port());
        self.checkpoint(session)
    }

    async fn wait_reachable(&self, session: &WorkerSession) -> Result<(), WorldpoolError> {
        let spawn = &self.ctx.config.spawn;
        let policy =
            RetryPolicy::fixed(spawn.reach_poll()).with_deadline(spawn.warm_reach_timeout());
        let name = session.name();
        let name = name.as_str();
        let frontend = &self.ctx.frontend;
        policy
            .run(&self.ctx.shutdown, |_| async move {
                if session.is_cleaned() {
                    return Ok(());
                }
                frontend.ping_reachable(name).await
            })
            .await
            .map_err(|e| reach_error(name, spawn.warm_reach_timeout(), e))
    }

    /// Polls reachability and moves the leader over once it answers.
    async fn connect_leader(&self, session: &WorkerSession) -> Result<(), WorldpoolError> {
        self.checkpoint(session)?;
        let spawn = &self.ctx.config.spawn;
        let Some(leader) = session.leader() else {
            return Err(WorldpoolError::spawn(&session.name(), "session has no leader"));
        };
        session.set_connecting(true);
        let policy = RetryPolicy::fixed(spawn.reach_poll())
            .with_jitter(REACH_JITTER)
            .with_deadline(spawn.reach_timeout());
        let frontend = &self.ctx.frontend;
        let name = session.name();
        let name = name.as_str();

        policy
            .run(&self.ctx.shutdown, |_| async move {
                if session.is_cleaned() {
                    return Ok(());
                }
                frontend.ping_reachable(name).await?;
                if frontend.current_server(leader).as_deref() != Some(name) {
                    frontend.connect_client(leader, name).await?;
                }
                Ok::<(), FrontendError>(())
            })
            .await
            .map_err(|e| reach_error(name, spawn.reach_timeout(), e))?;
        self.checkpoint(session)?;

        info!("[Session] {name} reachable, leader {leader} connected");
        Ok(())
    }

    /// Platform init first, then the queued commands in order, then members.
    async fn activate(&self, session: &Arc<WorkerSession>) {
        if session.is_cleaned() {
            return;
        }
        session.transition(SessionState::ReachablePendingInit);
        session.set_connecting(false);

        if session.claim_platform_init() {
            self.ctx.platform.initialize(session).await;
        }
        if !session.transition(SessionState::Active) {
            debug!(
                "[Session] {} not activated, state is {}",
                session.name(),
                session.state()
            );
            return;
        }

        let name = session.name();
        for command in session.open_command_queue() {
            if self.ctx.platform.dispatch(session.control(), &command).await {
                emit_event(
                    self.ctx.events.as_ref(),
                    WorldpoolEvent::CommandDispatched,
                    &CommandPayload {
                        session: name.clone(),
                        command,
                    },
                );
            }
        }

        if let Some(leader) = session.leader() {
            self.spawn_member_support(session, leader);
        }
        for member in session.members() {
            if Some(member) != session.leader() {
                self.spawn_member_pull(session, member);
            }
        }

        info!("[Session] {name} is active");
        emit_event(
            self.ctx.events.as_ref(),
            WorldpoolEvent::SessionReady,
            &SessionEventPayload {
                session: name,
                leader: session.leader().map(|l| l.to_string()),
            },
        );
    }

    pub fn spawn_member_support(&self, session: &Arc<WorkerSession>, member: PlayerId) {
        let this = self.clone();
        let session = Arc::clone(session);
        tokio::spawn(async move {
            let player = this.player_name(member);
            this.ctx.platform.support_member(&session, &player).await;
        });
    }

    /// Moves `member` onto the session with a fixed retry budget. Members are
    /// independent of each other.
    pub fn spawn_member_pull(&self, session: &Arc<WorkerSession>, member: PlayerId) {
        let this = self.clone();
        let session = Arc::clone(session);
        tokio::spawn(async move {
            if this.pull_member(&session, member).await {
                this.ctx.platform.support_member(&session, &this.player_name(member)).await;
            }
        });
    }

    pub async fn pull_member(&self, session: &WorkerSession, member: PlayerId) -> bool {
        let spawn = &self.ctx.config.spawn;
        let policy = RetryPolicy::fixed(spawn.member_connect_backoff())
            .with_attempts(spawn.member_connect_attempts.max(1));
        let frontend = &self.ctx.frontend;
        let name = session.name();
        let name = name.as_str();
        match policy
            .run(&self.ctx.shutdown, |_| async move {
                if session.is_cleaned() {
                    return Ok(false);
                }
                frontend.connect_client(member, name).await.map(|()| true)
            })
            .await
        {
            Ok(connected) => connected,
            Err(e) => {
                warn!("[Session] Could not move {member} to {name}: {e}");
                false
            }
        }
    }

    fn player_name(&self, member: PlayerId) -> String {
        self.ctx
            .frontend
            .display_name(member)
            .unwrap_or_else(|| member.to_string())
    }

    async fn fail(
        &self,
        session: &Arc<WorkerSession>,
        error: WorldpoolError,
        adopted: bool,
    ) -> WorldpoolError {
        let reason = match &error {
            WorldpoolError::ShuttingDown => CleanupReason::ShuttingDown,
            WorldpoolError::ReachabilityTimeout { .. } if adopted => {
                CleanupReason::LeaderConnectFailed
            }
            WorldpoolError::ReachabilityTimeout { .. } => CleanupReason::ReachabilityTimeout,
            _ => CleanupReason::SpawnFailed,
        };
        let name = session.name();
        let outcome = self.ctx.cleanup.cleanup(session, reason).await;
        if !outcome.was_performed() {
            debug!("[Session] {name} was torn down while starting: {error}");
            self.ctx.cleanup.release_late(session).await;
            return error;
        }

        if matches!(reason, CleanupReason::ShuttingDown) {
            info!("[Session] {name} aborted by shutdown");
        } else {
            warn!("[Session] {name} failed: {error}");
        }
        emit_event(
            self.ctx.events.as_ref(),
            WorldpoolEvent::SessionFailed,
            &SessionFailedPayload {
                session: name,
                leader: session.leader().map(|l| l.to_string()),
                error: error.to_string(),
            },
        );
        error
    }
}

fn torn_down(session: &WorkerSession) -> WorldpoolError {
    WorldpoolError::InvalidSessionState {
        session: session.name(),
        current_state: session.state().to_string(),
        expected_state: SessionState::Spawning.to_string(),
    }
}

fn reach_error(name: &str, waited: Duration, error: RetryError<FrontendError>) -> WorldpoolError {
    if error.is_cancelled() {
        return WorldpoolError::ShuttingDown;
    }
    debug!("[Session] {name} never became reachable: {error}");
    WorldpoolError::ReachabilityTimeout {
        session: name.to_string(),
        waited_secs: waited.as_secs(),
    }
}
