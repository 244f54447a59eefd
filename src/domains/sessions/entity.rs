use crate::domains::control::ControlEndpoint;
use crate::domains::process::ProcessSlot;
use crate::shared::PlayerId;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    WarmSpawning,
    WarmReady,
    Spawning,
    ReachablePendingInit,
    Active,
    Cleaning,
    Terminated,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::WarmSpawning => "warm_spawning",
            SessionState::WarmReady => "warm_ready",
            SessionState::Spawning => "spawning",
            SessionState::ReachablePendingInit => "reachable_pending_init",
            SessionState::Active => "active",
            SessionState::Cleaning => "cleaning",
            SessionState::Terminated => "terminated",
        }
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Cleaning, Terminated) => true,
            (Cleaning | Terminated, _) => false,
            (_, Cleaning) => true,
            (WarmSpawning, WarmReady) => true,
            (WarmReady, ReachablePendingInit) => true,
            (Spawning, ReachablePendingInit) => true,
            (ReachablePendingInit, Active) => true,
            _ => false,
        }
    }

    pub fn is_warm(self) -> bool {
        matches!(self, SessionState::WarmSpawning | SessionState::WarmReady)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Identity {
    name: String,
    leader: Option<PlayerId>,
    members: BTreeSet<PlayerId>,
}

#[derive(Debug, Default)]
struct CommandQueue {
    /// Set once the post-init drain has run; later commands go out directly.
    open: bool,
    pending: VecDeque<String>,
}

/// One ephemeral backend: its network identity, ownership and the handles
/// needed to tear it down.
///
/// Shared as `Arc<WorkerSession>`; identity fields change only on adoption.
#[derive(Debug)]
pub struct WorkerSession {
    identity: RwLock<Identity>,
    port: u16,
    control: ControlEndpoint,
    workdir: PathBuf,
    state: Mutex<SessionState>,
    process: ProcessSlot,
    connecting: AtomicBool,
    platform_initialized: AtomicBool,
    cleaned: AtomicBool,
    commands: Mutex<CommandQueue>,
    created_at: DateTime<Utc>,
}

impl WorkerSession {
    pub fn fresh(
        name: String,
        leader: PlayerId,
        members: impl IntoIterator<Item = PlayerId>,
        port: u16,
        control: ControlEndpoint,
        workdir: PathBuf,
    ) -> Self {
        let mut members: BTreeSet<PlayerId> = members.into_iter().collect();
        members.insert(leader);
        Self::build(
            Identity {
                name,
                leader: Some(leader),
                members,
            },
            SessionState::Spawning,
            port,
            control,
            workdir,
        )
    }

    pub fn warm(name: String, port: u16, control: ControlEndpoint, workdir: PathBuf) -> Self {
        Self::build(
            Identity {
                name,
                leader: None,
                members: BTreeSet::new(),
            },
            SessionState::WarmSpawning,
            port,
            control,
            workdir,
        )
    }

    fn build(
        identity: Identity,
        state: SessionState,
        port: u16,
        control: ControlEndpoint,
        workdir: PathBuf,
    ) -> Self {
        Self {
            identity: RwLock::new(identity),
            port,
            control,
            workdir,
            state: Mutex::new(state),
            process: ProcessSlot::new(),
            connecting: AtomicBool::new(true),
            platform_initialized: AtomicBool::new(false),
            cleaned: AtomicBool::new(false),
            commands: Mutex::new(CommandQueue::default()),
            created_at: Utc::now(),
        }
    }

    pub fn name(&self) -> String {
        self.identity.read().name.clone()
    }

    pub fn leader(&self) -> Option<PlayerId> {
        self.identity.read().leader
    }

    pub fn members(&self) -> Vec<PlayerId> {
        self.identity.read().members.iter().copied().collect()
    }

    pub fn has_member(&self, id: PlayerId) -> bool {
        self.identity.read().members.contains(&id)
    }

    /// Returns true when `id` was not a member yet.
    pub fn add_member(&self, id: PlayerId) -> bool {
        self.identity.write().members.insert(id)
    }

    /// Rewrites name, leader and members in one step. Port, process and
    /// control credential are kept.
    pub fn reassign(
        &self,
        name: String,
        leader: PlayerId,
        members: impl IntoIterator<Item = PlayerId>,
    ) -> String {
        let mut members: BTreeSet<PlayerId> = members.into_iter().collect();
        members.insert(leader);
        let mut identity = self.identity.write();
        let old = std::mem::replace(&mut identity.name, name);
        identity.leader = Some(leader);
        identity.members = members;
        old
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn control(&self) -> &ControlEndpoint {
        &self.control
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn process(&self) -> &ProcessSlot {
        &self.process
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Applies `next` if the transition is legal; returns whether it was.
    pub fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.lock();
        if state.can_transition_to(next) {
            log::debug!(
                "[Session] {} {} -> {}",
                self.identity.read().name,
                *state,
                next
            );
            *state = next;
            true
        } else {
            false
        }
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::SeqCst)
    }

    pub fn set_connecting(&self, value: bool) {
        self.connecting.store(value, Ordering::SeqCst);
    }

    pub fn is_platform_initialized(&self) -> bool {
        self.platform_initialized.load(Ordering::SeqCst)
    }

    /// One-shot claim of platform initialization; only the first caller wins.
    pub fn claim_platform_init(&self) -> bool {
        self.platform_initialized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_cleaned(&self) -> bool {
        self.cleaned.load(Ordering::SeqCst)
    }

    /// One-shot claim of teardown; only the first caller wins.
    pub fn claim_cleanup(&self) -> bool {
        self.cleaned
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Queues `command` unless the queue was already opened, in which case it
    /// is handed back for immediate dispatch.
    pub fn enqueue_or_release(&self, command: String) -> Option<String> {
        let mut queue = self.commands.lock();
        if queue.open {
            Some(command)
        } else {
            queue.pending.push_back(command);
            None
        }
    }

    /// Opens the queue and returns everything that was waiting, in order.
    pub fn open_command_queue(&self) -> Vec<String> {
        let mut queue = self.commands.lock();
        queue.open = true;
        queue.pending.drain(..).collect()
    }

    pub fn pending_commands(&self) -> usize {
        self.commands.lock().pending.len()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let identity = self.identity.read().clone();
        SessionSnapshot {
            name: identity.name,
            state: self.state(),
            leader: identity.leader,
            members: identity.members.into_iter().collect(),
            port: self.port,
            control_port: self.control.port,
            pid: self.process.pid(),
            connecting: self.is_connecting(),
            platform_initialized: self.is_platform_initialized(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub name: String,
    pub state: SessionState,
    pub leader: Option<PlayerId>,
    pub members: Vec<PlayerId>,
    pub port: u16,
    pub control_port: u16,
    pub pid: Option<u32>,
    pub connecting: bool,
    pub platform_initialized: bool,
    pub created_at: DateTime<Utc>,
}
