//! Test doubles for the process, front-end and control-protocol seams.

use crate::domains::control::{ControlChannel, ControlEndpoint, RconError};
use crate::domains::process::{ProcessInspector, SupervisorTimings};
use crate::domains::sessions::lifecycle::PlatformPolicy;
use crate::domains::sessions::{Dependencies, SessionContext};
use crate::errors::WorldpoolError;
use crate::events::{ChannelSink, EmittedEvent, WorldpoolEvent};
use crate::infrastructure::config::OrchestratorConfig;
use crate::infrastructure::frontend::{FrontendError, FrontendRegistry};
use crate::shared::{PlayerId, SystemClock};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

#[derive(Default)]
pub struct FakeInspector {
    running: Mutex<HashSet<u32>>,
    stubborn: Mutex<HashSet<u32>>,
    term_calls: AtomicUsize,
    kill_calls: AtomicUsize,
}

impl FakeInspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, pid: u32, running: bool) {
        let mut set = self.running.lock();
        if running {
            set.insert(pid);
        } else {
            set.remove(&pid);
        }
    }

    /// SIGTERM is ignored for `pid`; only SIGKILL stops it.
    pub fn ignore_term(&self, pid: u32) {
        self.stubborn.lock().insert(pid);
    }

    pub fn term_calls(&self) -> usize {
        self.term_calls.load(Ordering::SeqCst)
    }

    pub fn kill_calls(&self) -> usize {
        self.kill_calls.load(Ordering::SeqCst)
    }
}

impl ProcessInspector for FakeInspector {
    fn is_running(&self, pid: u32) -> Result<bool, WorldpoolError> {
        Ok(self.running.lock().contains(&pid))
    }

    fn kill_term(&self, pid: u32) -> Result<(), WorldpoolError> {
        self.term_calls.fetch_add(1, Ordering::SeqCst);
        if !self.stubborn.lock().contains(&pid) {
            self.running.lock().remove(&pid);
        }
        Ok(())
    }

    fn kill_kill(&self, pid: u32) -> Result<(), WorldpoolError> {
        self.kill_calls.fetch_add(1, Ordering::SeqCst);
        self.running.lock().remove(&pid);
        Ok(())
    }
}

/// Front-end whose servers answer pings only after a configurable number of
/// failed probes.
#[derive(Default)]
pub struct FakeFrontend {
    registered: DashMap<String, (String, u16)>,
    pings: DashMap<String, u32>,
    reachable_after: AtomicU32,
    never_reachable: AtomicBool,
    online: DashMap<PlayerId, String>,
    current: DashMap<PlayerId, String>,
    connect_calls: AtomicUsize,
    unregister_calls: AtomicUsize,
    online_count_calls: AtomicUsize,
}

impl FakeFrontend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The n-th ping (1-based) per server succeeds.
    pub fn reachable_after(self, pings: u32) -> Self {
        self.reachable_after.store(pings.saturating_sub(1), Ordering::SeqCst);
        self
    }

    pub fn set_never_reachable(&self, value: bool) {
        self.never_reachable.store(value, Ordering::SeqCst);
    }

    pub fn set_online(&self, id: PlayerId, name: &str) {
        self.online.insert(id, name.to_string());
    }

    pub fn set_offline(&self, id: PlayerId) {
        self.online.remove(&id);
        self.current.remove(&id);
    }

    pub fn ping_count(&self, name: &str) -> u32 {
        self.pings.get(name).map(|c| *c.value()).unwrap_or(0)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn unregister_calls(&self) -> usize {
        self.unregister_calls.load(Ordering::SeqCst)
    }

    pub fn online_count_calls(&self) -> usize {
        self.online_count_calls.load(Ordering::SeqCst)
    }

    pub fn address_of(&self, name: &str) -> Option<(String, u16)> {
        self.registered.get(name).map(|e| e.value().clone())
    }
}

#[async_trait]
impl FrontendRegistry for FakeFrontend {
    async fn register_address(
        &self,
        name: &str,
        host: &str,
        port: u16,
    ) -> Result<(), FrontendError> {
        self.registered
            .insert(name.to_string(), (host.to_string(), port));
        Ok(())
    }

    async fn unregister_address(&self, name: &str) -> Result<(), FrontendError> {
        self.unregister_calls.fetch_add(1, Ordering::SeqCst);
        self.registered
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| FrontendError::NotRegistered {
                name: name.to_string(),
            })
    }

    fn is_registered(&self, name: &str) -> bool {
        self.registered.contains_key(name)
    }

    async fn ping_reachable(&self, name: &str) -> Result<(), FrontendError> {
        if !self.is_registered(name) {
            return Err(FrontendError::NotRegistered {
                name: name.to_string(),
            });
        }
        let seen = {
            let mut count = self.pings.entry(name.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        if self.never_reachable.load(Ordering::SeqCst)
            || seen <= self.reachable_after.load(Ordering::SeqCst)
        {
            return Err(FrontendError::Unreachable {
                name: name.to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }

    async fn connect_client(&self, client: PlayerId, name: &str) -> Result<(), FrontendError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if !self.online.contains_key(&client) {
            return Err(FrontendError::ClientOffline { client });
        }
        self.current.insert(client, name.to_string());
        Ok(())
    }

    fn current_server(&self, client: PlayerId) -> Option<String> {
        self.current.get(&client).map(|e| e.value().clone())
    }

    fn is_online(&self, client: PlayerId) -> bool {
        self.online.contains_key(&client)
    }

    fn online_count(&self) -> usize {
        self.online_count_calls.fetch_add(1, Ordering::SeqCst);
        self.online.len()
    }

    fn display_name(&self, client: PlayerId) -> Option<String> {
        self.online.get(&client).map(|e| e.value().clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCommand {
    pub port: u16,
    pub command: String,
    pub awaited_reply: bool,
}

/// Records every control command; can fail the next N calls.
#[derive(Default)]
pub struct FakeControl {
    sent: Mutex<Vec<SentCommand>>,
    fail_next: AtomicU32,
    always_fail: AtomicBool,
    replies: Mutex<Vec<(String, String)>>,
}

impl FakeControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, calls: u32) {
        self.fail_next.store(calls, Ordering::SeqCst);
    }

    pub fn set_always_fail(&self, value: bool) {
        self.always_fail.store(value, Ordering::SeqCst);
    }

    /// Reply body for commands starting with `prefix`.
    pub fn reply_to(&self, prefix: &str, reply: &str) {
        self.replies
            .lock()
            .push((prefix.to_string(), reply.to_string()));
    }

    pub fn sent(&self) -> Vec<SentCommand> {
        self.sent.lock().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.sent.lock().iter().map(|c| c.command.clone()).collect()
    }

    pub fn count_of(&self, command: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|c| c.command == command)
            .count()
    }

    fn record(
        &self,
        endpoint: &ControlEndpoint,
        command: &str,
        awaited_reply: bool,
    ) -> Result<(), RconError> {
        self.sent.lock().push(SentCommand {
            port: endpoint.port,
            command: command.to_string(),
            awaited_reply,
        });
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(RconError::Timeout { operation: "execute" });
        }
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RconError::Connect {
                address: endpoint.address(),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ControlChannel for FakeControl {
    async fn execute(
        &self,
        endpoint: &ControlEndpoint,
        command: &str,
    ) -> Result<String, RconError> {
        self.record(endpoint, command, true)?;
        let reply = self
            .replies
            .lock()
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_default();
        Ok(reply)
    }

    async fn execute_no_reply(
        &self,
        endpoint: &ControlEndpoint,
        command: &str,
    ) -> Result<(), RconError> {
        self.record(endpoint, command, false)
    }
}

/// Launcher script that reports `pid` through the handoff file and then
/// idles like a running backend.
pub fn write_launcher_script(dir: &Path, pid: u32) -> PathBuf {
    let script = dir.join("spawn_server.sh");
    let body = format!(
        concat!(
            "#!/bin/sh\n",
            "mkdir -p \"$WORLDPOOL_WORKDIR\"\n",
            "echo {pid} > \"$WORLDPOOL_WORKDIR/.server-pid\"\n",
            "exec sleep 30\n",
        ),
        pid = pid
    );
    std::fs::write(&script, body).expect("write launcher script");
    script
}

/// Everything a lifecycle scenario needs, wired to fakes and a scratch
/// directory. Real launcher processes, fake signals and front-end.
pub struct Harness {
    pub dir: TempDir,
    pub frontend: Arc<FakeFrontend>,
    pub control: Arc<FakeControl>,
    pub inspector: Arc<FakeInspector>,
    pub events: mpsc::UnboundedReceiver<EmittedEvent>,
    pub ctx: Arc<SessionContext>,
}

impl Harness {
    pub const WORKER_PID: u32 = 4821;

    pub fn new(frontend: FakeFrontend) -> Self {
        Self::with_config(frontend, |_| {})
    }

    pub fn with_config(
        frontend: FakeFrontend,
        tweak: impl FnOnce(&mut OrchestratorConfig),
    ) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let script = write_launcher_script(dir.path(), Self::WORKER_PID);

        let mut config = OrchestratorConfig::default();
        config.spawn.launcher = format!("sh '{}'", script.display());
        config.spawn.working_dir = dir.path().to_path_buf();
        config.spawn.pid_handoff_timeout_secs = 5;
        config.spawn.reach_timeout_secs = 5;
        config.spawn.warm_reach_timeout_secs = 5;
        config.spawn.reach_poll_ms = 20;
        config.spawn.member_connect_attempts = 3;
        config.spawn.member_connect_backoff_ms = 20;
        config.cleanup.delete_backoff_ms = 5;
        config.cleanup.per_session_timeout_secs = 5;
        config.cleanup.shutdown_grace_secs = 10;
        tweak(&mut config);

        let frontend = Arc::new(frontend);
        let control = Arc::new(FakeControl::new());
        let inspector = Arc::new(FakeInspector::new());
        inspector.set_running(Self::WORKER_PID, true);
        let (sink, events) = ChannelSink::new();

        let deps = Dependencies {
            frontend: frontend.clone(),
            control: control.clone(),
            inspector: inspector.clone(),
            events: Arc::new(sink),
            clock: Arc::new(SystemClock),
            supervisor_timings: SupervisorTimings {
                pid_poll: Duration::from_millis(20),
                term_grace: Duration::from_millis(200),
                kill_grace: Duration::from_millis(500),
                exit_poll: Duration::from_millis(10),
            },
            platform_policy: PlatformPolicy::default(),
        };
        let ctx = Arc::new(SessionContext::new(config, deps).expect("session context"));
        Self {
            dir,
            frontend,
            control,
            inspector,
            events,
            ctx,
        }
    }

    pub fn servers_root(&self) -> PathBuf {
        self.ctx.config.spawn.servers_root_path()
    }

    /// Drains the events emitted so far.
    pub fn drain_events(&mut self) -> Vec<WorldpoolEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            seen.push(event.event);
        }
        seen
    }
}

/// Polls `check` every 20ms until it holds or `within` elapses.
pub async fn wait_until(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
