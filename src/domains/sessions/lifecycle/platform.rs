use crate::domains::control::{ControlChannel, ControlEndpoint};
use crate::domains::sessions::entity::WorkerSession;
use crate::infrastructure::config::CommandTemplates;
use crate::shared::{RetryPolicy, ShutdownSignal};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Backoff contracts for every control-protocol loop in this module.
#[derive(Debug, Clone, Copy)]
pub struct PlatformPolicy {
    pub readiness: RetryPolicy,
    pub command: RetryPolicy,
    pub rounds: RetryPolicy,
    pub entity: RetryPolicy,
    pub support_command: RetryPolicy,
}

impl Default for PlatformPolicy {
    fn default() -> Self {
        Self {
            readiness: RetryPolicy::exponential(
                Duration::from_millis(150),
                Duration::from_millis(1500),
            )
            .with_deadline(Duration::from_secs(30)),
            command: RetryPolicy::exponential(Duration::from_millis(200), Duration::from_secs(2))
                .with_attempts(12)
                .with_jitter(Duration::from_millis(60)),
            rounds: RetryPolicy::exponential(Duration::from_millis(500), Duration::from_secs(2))
                .with_attempts(3),
            entity: RetryPolicy::linear(
                Duration::from_millis(200),
                Duration::from_millis(200),
                Duration::from_secs(2),
            )
            .with_deadline(Duration::from_secs(20)),
            support_command: RetryPolicy::exponential(
                Duration::from_millis(200),
                Duration::from_secs(2),
            )
            .with_attempts(6)
            .with_jitter(Duration::from_millis(60)),
        }
    }
}

#[derive(Debug)]
enum PlatformRound {
    ControlUnavailable,
    CommandsFailed,
}

/// Idempotent backend preparation over the control protocol. Every failure
/// here is logged and swallowed; a session stays usable without it.
pub struct PlatformInitializer {
    control: Arc<dyn ControlChannel>,
    commands: CommandTemplates,
    policy: PlatformPolicy,
    shutdown: ShutdownSignal,
}

impl PlatformInitializer {
    pub fn new(
        control: Arc<dyn ControlChannel>,
        commands: CommandTemplates,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self::with_policy(control, commands, PlatformPolicy::default(), shutdown)
    }

    pub fn with_policy(
        control: Arc<dyn ControlChannel>,
        commands: CommandTemplates,
        policy: PlatformPolicy,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            control,
            commands,
            policy,
            shutdown,
        }
    }

    /// Builds the safety platform and sets the spawn point. Both commands
    /// must land in the same round; up to three rounds are tried.
    pub async fn initialize(&self, session: &WorkerSession) -> bool {
        let name = session.name();
        let name = name.as_str();
        let endpoint = session.control();
        let result = self
            .policy
            .rounds
            .run(&self.shutdown, |round| async move {
                let outcome = self.initialize_round(endpoint).await;
                if let Err(reason) = &outcome {
                    warn!("[Platform] Round {round} for {name} failed: {reason:?}");
                }
                outcome
            })
            .await;

        match result {
            Ok(()) => {
                info!("[Platform] Spawn platform initialized for {name}");
                true
            }
            Err(e) => {
                warn!("[Platform] Failed to initialize spawn platform for {name}: {e:?}");
                false
            }
        }
    }

    async fn initialize_round(&self, endpoint: &ControlEndpoint) -> Result<(), PlatformRound> {
        if !self.wait_for_control(endpoint).await {
            return Err(PlatformRound::ControlUnavailable);
        }
        let build = self
            .send_with_retry(endpoint, &self.commands.platform_build, self.policy.command)
            .await;
        let spawn = self
            .send_with_retry(endpoint, &self.commands.spawn_point, self.policy.command)
            .await;
        if build && spawn {
            Ok(())
        } else {
            Err(PlatformRound::CommandsFailed)
        }
    }

    /// Probes the control port until a command round-trips.
    pub async fn wait_for_control(&self, endpoint: &ControlEndpoint) -> bool {
        let probe = self.commands.readiness_probe.as_str();
        self.policy
            .readiness
            .run(&self.shutdown, |_| self.control.execute(endpoint, probe))
            .await
            .is_ok()
    }

    /// Makes sure a freshly arrived participant does not fall into the void:
    /// waits for the entity, then places footing and nudges it.
    pub async fn support_member(&self, session: &WorkerSession, player: &str) -> bool {
        let name = session.name();
        let endpoint = session.control();
        if !self.wait_for_control(endpoint).await {
            warn!("[Platform] Unable to support {player} on {name}: control port unavailable");
            return false;
        }
        if !self.wait_for_entity(endpoint, player).await {
            warn!("[Platform] Entity for {player} not ready on {name}");
            return false;
        }

        let footing = CommandTemplates::for_player(&self.commands.footing, player);
        let nudge = CommandTemplates::for_player(&self.commands.nudge, player);
        let placed = self
            .send_with_retry(endpoint, &footing, self.policy.support_command)
            .await;
        let nudged = self
            .send_with_retry(endpoint, &nudge, self.policy.support_command)
            .await;
        if !(placed && nudged) {
            warn!("[Platform] Support commands for {player} on {name} did not complete");
        }
        placed && nudged
    }

    async fn wait_for_entity(&self, endpoint: &ControlEndpoint, player: &str) -> bool {
        let probe = CommandTemplates::for_player(&self.commands.entity_probe, player);
        let missing = self.commands.entity_missing_marker.to_ascii_lowercase();
        let probe = probe.as_str();
        let missing = missing.as_str();
        self.policy
            .entity
            .run(&self.shutdown, |_| async move {
                let reply = self.control.execute(endpoint, probe).await.map_err(|e| e.to_string())?;
                if reply.to_ascii_lowercase().contains(missing) {
                    Err(reply)
                } else {
                    Ok(())
                }
            })
            .await
            .is_ok()
    }

    /// One command, fresh connection per attempt, waiting for the reply.
    pub async fn send_with_retry(
        &self,
        endpoint: &ControlEndpoint,
        command: &str,
        policy: RetryPolicy,
    ) -> bool {
        match policy
            .run(&self.shutdown, |_| self.control.execute(endpoint, command))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                debug!("[Rcon] '{command}' on port {} {e}", endpoint.port);
                false
            }
        }
    }

    /// Fire-and-forget delivery with the standard command budget.
    pub async fn dispatch(&self, endpoint: &ControlEndpoint, command: &str) -> bool {
        match self
            .policy
            .command
            .run(&self.shutdown, |_| self.control.execute_no_reply(endpoint, command))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!("[Rcon] Dropping '{command}' for port {}: {e}", endpoint.port);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeControl;
    use std::path::PathBuf;

    fn session() -> WorkerSession {
        WorkerSession::warm(
            "world-warm-ab12".into(),
            30100,
            ControlEndpoint::new("127.0.0.1", 30110, "pw"),
            PathBuf::from("servers/world-warm-ab12"),
        )
    }

    fn initializer(control: &Arc<FakeControl>) -> PlatformInitializer {
        PlatformInitializer::new(
            control.clone(),
            CommandTemplates::default(),
            ShutdownSignal::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_sends_probe_then_both_commands() {
        let control = Arc::new(FakeControl::new());
        assert!(initializer(&control).initialize(&session()).await);
        let templates = CommandTemplates::default();
        assert_eq!(
            control.commands(),
            vec![
                templates.readiness_probe,
                templates.platform_build,
                templates.spawn_point
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_retries_transient_failures() {
        let control = Arc::new(FakeControl::new());
        control.fail_next(4);
        assert!(initializer(&control).initialize(&session()).await);
        let templates = CommandTemplates::default();
        assert_eq!(control.count_of(&templates.spawn_point), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_gives_up_after_three_rounds() {
        let control = Arc::new(FakeControl::new());
        control.set_always_fail(true);
        assert!(!initializer(&control).initialize(&session()).await);
        let templates = CommandTemplates::default();
        // Control never becomes ready, so no setup command is attempted.
        assert_eq!(control.count_of(&templates.platform_build), 0);
        assert!(control.count_of(&templates.readiness_probe) >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn support_waits_for_entity_then_sends_two_commands() {
        let control = Arc::new(FakeControl::new());
        control.reply_to("data get entity", "alice has the following entity data: 12.5d");
        assert!(initializer(&control).support_member(&session(), "alice").await);
        let commands = control.commands();
        assert!(commands.contains(&"data get entity alice Pos[0]".to_string()));
        assert!(commands.iter().any(|c| c.contains("setblock") && c.contains("alice")));
        assert!(commands.iter().any(|c| c.contains("tp @s") && c.contains("alice")));
    }

    #[tokio::test(start_paused = true)]
    async fn support_gives_up_when_entity_never_appears() {
        let control = Arc::new(FakeControl::new());
        control.reply_to("data get entity", "No entity was found");
        assert!(!initializer(&control).support_member(&session(), "bob").await);
        assert!(!control.commands().iter().any(|c| c.contains("setblock")));
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_uses_fire_and_forget() {
        let control = Arc::new(FakeControl::new());
        let endpoint = ControlEndpoint::new("127.0.0.1", 30110, "pw");
        assert!(initializer(&control).dispatch(&endpoint, "visit paris").await);
        let sent = control.sent();
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].awaited_reply);
    }
}
