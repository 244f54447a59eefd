use crate::domains::sessions::context::SessionContext;
use crate::domains::sessions::entity::{SessionSnapshot, WorkerSession};
use crate::domains::sessions::lifecycle::bootstrapper::SessionBootstrapper;
use crate::domains::sessions::lifecycle::cancellation::CleanupReason;
use crate::domains::sessions::preferences::{RadiusChange, RadiusKind};
use crate::domains::sessions::utils::{command_line, sanitize_command_text};
use crate::errors::WorldpoolError;
use crate::events::{
    CommandPayload, CooldownPayload, SessionEventPayload, WorldpoolEvent, emit_event,
};
use crate::shared::PlayerId;
use crate::utils::fs_utils::reset_directory;
use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

/// Supplier of pre-spawned sessions.
#[async_trait]
pub trait WarmSource: Send + Sync {
    /// Hands one ready warm session to `leader`, already renamed, registered
    /// and attached. `None` when nothing is ready.
    async fn adopt(&self, leader: PlayerId, members: &[PlayerId]) -> Option<Arc<WorkerSession>>;

    /// Asks the pool keeper to reconcile soon.
    fn request_top_up(&self);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionRequestOutcome {
    /// The leader already has a session; the requester was moved to it
    /// unless it is still starting.
    Existing { session: String, still_starting: bool },
    NotLeader { leader: PlayerId },
    CooldownActive { remaining_secs: u64 },
    ShuttingDown,
    Adopted { session: String },
    Spawning { session: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandDelivery {
    /// Held until the session finishes platform initialization.
    Queued,
    /// Handed to the control protocol.
    Dispatched,
}

pub struct SessionService {
    ctx: Arc<SessionContext>,
    bootstrapper: SessionBootstrapper,
    warm: RwLock<Option<Arc<dyn WarmSource>>>,
}

impl SessionService {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self {
            bootstrapper: SessionBootstrapper::new(Arc::clone(&ctx)),
            ctx,
            warm: RwLock::new(None),
        }
    }

    pub fn attach_warm_source(&self, source: Arc<dyn WarmSource>) {
        *self.warm.write() = Some(source);
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    pub fn bootstrapper(&self) -> &SessionBootstrapper {
        &self.bootstrapper
    }

    fn warm_source(&self) -> Option<Arc<dyn WarmSource>> {
        self.warm.read().clone()
    }

    /// Entry point for "give me a backend". Only the leader may start one;
    /// members of an existing session are moved to it.
    pub async fn request_session(
        &self,
        requester: PlayerId,
        members: Vec<PlayerId>,
    ) -> Result<SessionRequestOutcome, WorldpoolError> {
        if self.ctx.is_shutting_down() {
            return Ok(SessionRequestOutcome::ShuttingDown);
        }
        let registry = &self.ctx.registry;
        let leader = registry.leader_of(requester);

        if let Some(existing) = registry.session_of(leader) {
            return Ok(self.existing_outcome(requester, &existing).await);
        }
        if leader != requester {
            return Ok(SessionRequestOutcome::NotLeader { leader });
        }
        if !registry.can_admit(leader) {
            let remaining_secs = registry.remaining_secs(leader).max(1);
            info!("[Session] {leader} is cooling down ({remaining_secs}s left)");
            emit_event(
                self.ctx.events.as_ref(),
                WorldpoolEvent::CooldownDenied,
                &CooldownPayload {
                    leader: leader.to_string(),
                    remaining_secs,
                },
            );
            return Ok(SessionRequestOutcome::CooldownActive { remaining_secs });
        }

        if let Some(source) = self.warm_source()
            && let Some(session) = source.adopt(leader, &members).await
        {
            return Ok(self.start_adopted(leader, session));
        }

        self.start_fresh(leader, members).await
    }

    async fn existing_outcome(
        &self,
        requester: PlayerId,
        session: &Arc<WorkerSession>,
    ) -> SessionRequestOutcome {
        let name = session.name();
        if session.is_connecting() {
            return SessionRequestOutcome::Existing {
                session: name,
                still_starting: true,
            };
        }
        info!("[Session] Reconnecting {requester} to {name}");
        self.connect_if_elsewhere(requester, &name).await;
        SessionRequestOutcome::Existing {
            session: name,
            still_starting: false,
        }
    }

    fn start_adopted(
        &self,
        leader: PlayerId,
        session: Arc<WorkerSession>,
    ) -> SessionRequestOutcome {
        let name = session.name();
        self.ctx.registry.record_admission(leader);
        info!("[Session] Adopted warm server {name} for leader {leader}");
        emit_event(
            self.ctx.events.as_ref(),
            WorldpoolEvent::SessionAdopted,
            &SessionEventPayload {
                session: name.clone(),
                leader: Some(leader.to_string()),
            },
        );
        let bootstrapper = self.bootstrapper.clone();
        tokio::spawn(async move {
            if let Err(e) = bootstrapper.connect_adopted(&session).await {
                debug!("[Session] Adopted session ended before activation: {e}");
            }
        });
        SessionRequestOutcome::Adopted { session: name }
    }

    async fn start_fresh(
        &self,
        leader: PlayerId,
        members: Vec<PlayerId>,
    ) -> Result<SessionRequestOutcome, WorldpoolError> {
        let name = self.ctx.session_name_for(leader);
        let (port, control) = self.ctx.allocate_ports();
        let session = Arc::new(WorkerSession::fresh(
            name.clone(),
            leader,
            members,
            port,
            control,
            self.ctx.workdir_for(&name),
        ));

        if !self
            .ctx
            .registry
            .attach_if_vacant(&session, leader, session.members())
        {
            // Lost a race against a concurrent request for the same leader.
            if let Some(existing) = self.ctx.registry.session_of(leader) {
                return Ok(self.existing_outcome(leader, &existing).await);
            }
            return Err(WorldpoolError::InvalidSessionState {
                session: name,
                current_state: "contended".to_string(),
                expected_state: "vacant".to_string(),
            });
        }
        session.set_connecting(true);
        self.ctx.preferences.ensure_defaults(leader);
        self.ctx.registry.record_admission(leader);

        info!(
            "[Session] Spawning {name} for leader {leader} (port {port}, control {})",
            session.control().port
        );
        emit_event(
            self.ctx.events.as_ref(),
            WorldpoolEvent::SessionSpawning,
            &SessionEventPayload {
                session: name.clone(),
                leader: Some(leader.to_string()),
            },
        );

        let bootstrapper = self.bootstrapper.clone();
        tokio::spawn(async move {
            if let Err(e) = bootstrapper.spawn_fresh(&session).await {
                debug!("[Session] Fresh session ended before activation: {e}");
            }
        });
        Ok(SessionRequestOutcome::Spawning { session: name })
    }

    async fn connect_if_elsewhere(&self, client: PlayerId, name: &str) {
        let frontend = &self.ctx.frontend;
        if frontend
            .current_server(client)
            .is_some_and(|current| current.eq_ignore_ascii_case(name))
        {
            return;
        }
        if let Err(e) = frontend.connect_client(client, name).await {
            warn!("[Session] Could not move {client} to {name}: {e}");
        }
    }

    /// Tears the session down once none of its members is online. Returns
    /// whether this call performed the teardown.
    pub async fn on_client_disconnect(&self, client: PlayerId) -> bool {
        let Some(session) = self.ctx.registry.session_for_member(client) else {
            return false;
        };
        let someone_online = session
            .members()
            .into_iter()
            .any(|member| member != client && self.ctx.frontend.is_online(member));
        if someone_online {
            return false;
        }
        info!(
            "[Session] Last member left {}; cleaning up",
            session.name()
        );
        self.ctx
            .cleanup
            .cleanup(&session, CleanupReason::MembersGone)
            .await
            .was_performed()
    }

    /// Explicit teardown by the leader.
    pub async fn disband(&self, requester: PlayerId) -> Result<String, WorldpoolError> {
        let leader = self.ctx.registry.leader_of(requester);
        let session = self
            .ctx
            .registry
            .session_of(leader)
            .ok_or_else(|| WorldpoolError::SessionNotFound {
                leader: leader.to_string(),
            })?;
        if leader != requester {
            return Err(WorldpoolError::invalid_input(
                "requester",
                "only the leader can disband",
            ));
        }
        let name = session.name();
        self.ctx
            .cleanup
            .cleanup(&session, CleanupReason::Disbanded)
            .await;
        Ok(name)
    }

    /// Sanitizes `raw` and delivers it to the client's session backend,
    /// queueing it until platform initialization has run.
    pub async fn dispatch_command(
        &self,
        client: PlayerId,
        raw: &str,
    ) -> Result<CommandDelivery, WorldpoolError> {
        let command = sanitize_command_text(raw).ok_or_else(|| {
            WorldpoolError::invalid_input("command", "nothing left after sanitizing")
        })?;
        self.forward(client, command).await
    }

    /// Applies a radius change for the client's leader. The value is stored
    /// only once the backend command was accepted for delivery.
    pub async fn adjust_radius(
        &self,
        client: PlayerId,
        kind: RadiusKind,
        change: RadiusChange,
    ) -> Result<i32, WorldpoolError> {
        let leader = self.ctx.registry.leader_of(client);
        let value = self.ctx.preferences.resolve(leader, kind, change);
        let command = command_line(kind.command_label(), &[&value.to_string()])
            .ok_or_else(|| WorldpoolError::invalid_input("radius", "invalid command"))?;
        self.forward(client, command).await?;
        self.ctx.preferences.store(leader, kind, value);
        Ok(value)
    }

    async fn forward(
        &self,
        client: PlayerId,
        command: String,
    ) -> Result<CommandDelivery, WorldpoolError> {
        if self.ctx.is_shutting_down() {
            return Err(WorldpoolError::ShuttingDown);
        }
        let leader = self.ctx.registry.leader_of(client);
        let session =
            self.ctx
                .registry
                .session_of(leader)
                .ok_or_else(|| WorldpoolError::SessionNotFound {
                    leader: leader.to_string(),
                })?;

        if session.add_member(client) {
            self.ctx.registry.add_member(leader, client);
        }
        let name = session.name();
        if !session.is_connecting() {
            self.connect_if_elsewhere(client, &name).await;
        }

        let command = match session.enqueue_or_release(command.clone()) {
            Some(command) => command,
            None => {
                debug!("[Session] Queued '{command}' for {name}");
                emit_event(
                    self.ctx.events.as_ref(),
                    WorldpoolEvent::CommandQueued,
                    &CommandPayload {
                        session: name,
                        command,
                    },
                );
                return Ok(CommandDelivery::Queued);
            }
        };

        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            if ctx.platform.dispatch(session.control(), &command).await {
                emit_event(
                    ctx.events.as_ref(),
                    WorldpoolEvent::CommandDispatched,
                    &CommandPayload {
                        session: session.name(),
                        command,
                    },
                );
            }
        });
        Ok(CommandDelivery::Dispatched)
    }

    /// Runs member support when a client lands on a tracked session server.
    pub fn on_client_connected(&self, client: PlayerId, server_name: &str) -> bool {
        match self.ctx.registry.find_by_name(server_name) {
            Some(session) => {
                self.bootstrapper.spawn_member_support(&session, client);
                true
            }
            None => false,
        }
    }

    /// Adds `member` to `leader`'s session and moves it there once the
    /// session is up.
    pub async fn join_session(
        &self,
        leader: PlayerId,
        member: PlayerId,
    ) -> Result<String, WorldpoolError> {
        let session = self.ctx.registry.session_of(leader).ok_or_else(|| {
            WorldpoolError::SessionNotFound {
                leader: leader.to_string(),
            }
        })?;
        session.add_member(member);
        self.ctx.registry.add_member(leader, member);
        let name = session.name();
        if !session.is_connecting() {
            self.bootstrapper.spawn_member_pull(&session, member);
        }
        Ok(name)
    }

    /// Tracked and pooled sessions, ordered by name.
    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let mut all: Vec<SessionSnapshot> = self
            .ctx
            .cleanup
            .collect_all()
            .iter()
            .map(|s| s.snapshot())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Rejects new work, drains every session within the grace period and
    /// leaves the servers root empty. Returns the number of sessions drained;
    /// later calls return 0.
    pub async fn shutdown(&self) -> usize {
        if !self.ctx.shutdown.trigger() {
            return 0;
        }
        info!("[Session] Shutdown requested; draining sessions");
        if let Some(source) = self.warm_source() {
            source.request_top_up();
        }

        let settings = &self.ctx.config.cleanup;
        let drained = match tokio::time::timeout(
            settings.shutdown_grace(),
            self.ctx.cleanup.cleanup_all(),
        )
        .await
        {
            Ok(count) => count,
            Err(_) => {
                warn!(
                    "[Cleanup] Drain exceeded {}s grace period",
                    settings.shutdown_grace_secs
                );
                0
            }
        };

        let root = self.ctx.config.spawn.servers_root_path();
        let leftovers =
            reset_directory(&root, settings.delete_attempts, settings.delete_backoff()).await;
        for path in &leftovers {
            warn!("[Cleanup] Leftover after reset: {}", path.display());
        }
        drained
    }
}
