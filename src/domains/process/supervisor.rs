use super::inspector::ProcessInspector;
use super::launch::{LaunchSpec, WORKDIR_ENV, pid_file_in};
use crate::errors::WorldpoolError;
use crate::shared::ShutdownSignal;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep, timeout};

/// Launcher child plus the worker PID it handed off.
///
/// The launcher may exit once the worker is up; the PID is what counts for
/// liveness and termination.
#[derive(Debug, Default)]
pub struct ProcessSlot {
    launcher: Mutex<Option<Child>>,
    pid: AtomicU32,
    released: AtomicBool,
}

impl ProcessSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_launcher(&self, child: Child) {
        *self.launcher.lock() = Some(child);
    }

    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    pub fn set_pid(&self, pid: u32) {
        self.pid.store(pid, Ordering::SeqCst);
    }

    fn take_pid(&self) -> Option<u32> {
        match self.pid.swap(0, Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    fn take_launcher(&self) -> Option<Child> {
        self.launcher.lock().take()
    }

    /// Set by the first [`ProcessSupervisor::terminate`]; never cleared.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    /// Exit code of the launcher if it already finished, successfully or not.
    fn launcher_exit(&self) -> Option<i32> {
        let mut guard = self.launcher.lock();
        let child = guard.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => Some(status.code().unwrap_or(-1)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidHandoff {
    Captured(u32),
    TimedOut,
    LauncherExited(i32),
    /// The slot was terminated while the handoff was pending.
    Released,
    ShuttingDown,
}

enum PidFile {
    Missing,
    Garbage,
    Valid(u32),
}

async fn read_pid_file(path: &Path) -> PidFile {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => match raw.trim().parse::<u32>() {
            Ok(pid) if pid > 0 => PidFile::Valid(pid),
            _ => PidFile::Garbage,
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => PidFile::Missing,
        Err(e) => {
            debug!("[Spawn] Reading {} failed: {e}", path.display());
            PidFile::Missing
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SupervisorTimings {
    pub pid_poll: Duration,
    pub term_grace: Duration,
    pub kill_grace: Duration,
    pub exit_poll: Duration,
}

impl Default for SupervisorTimings {
    fn default() -> Self {
        Self {
            pid_poll: Duration::from_millis(250),
            term_grace: Duration::from_secs(3),
            kill_grace: Duration::from_secs(2),
            exit_poll: Duration::from_millis(100),
        }
    }
}

pub struct ProcessSupervisor {
    inspector: Arc<dyn ProcessInspector>,
    timings: SupervisorTimings,
}

impl ProcessSupervisor {
    pub fn new(inspector: Arc<dyn ProcessInspector>) -> Self {
        Self::with_timings(inspector, SupervisorTimings::default())
    }

    pub fn with_timings(inspector: Arc<dyn ProcessInspector>, timings: SupervisorTimings) -> Self {
        Self { inspector, timings }
    }

    /// Starts the launcher with stdout and stderr appended to the spawn log.
    ///
    /// A non-zero exit is not an error here; it shows up through
    /// [`wait_for_pid_handoff`](Self::wait_for_pid_handoff) and liveness checks.
    pub fn spawn(&self, launch: &LaunchSpec) -> Result<Child, WorldpoolError> {
        let log_path = launch.log_file.display().to_string();
        if let Some(parent) = launch.log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| WorldpoolError::io("create_log_dir", parent.display(), e))?;
        }
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&launch.log_file)
            .map_err(|e| WorldpoolError::io("open_spawn_log", &log_path, e))?;
        let stderr = stdout
            .try_clone()
            .map_err(|e| WorldpoolError::io("clone_spawn_log", &log_path, e))?;

        let args = launch.full_arguments();
        debug!(
            "[Spawn] {} {} (cwd={})",
            launch.launcher.program.display(),
            args.join(" "),
            launch.cwd.display()
        );

        let child = Command::new(&launch.launcher.program)
            .args(&args)
            .current_dir(&launch.cwd)
            .env(WORKDIR_ENV, &launch.workdir)
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| WorldpoolError::spawn(&launch.server_name, e))?;

        info!(
            "[Spawn] Launched {} (launcher pid {:?}, log {log_path})",
            launch.server_name,
            child.id()
        );
        Ok(child)
    }

    /// Polls `<workdir>/.server-pid` until it holds a parseable PID.
    ///
    /// Any launcher exit before that is [`PidHandoff::LauncherExited`]; the
    /// file is read once more first so a launcher that writes and exits
    /// between two polls still hands off.
    pub async fn wait_for_pid_handoff(
        &self,
        name: &str,
        workdir: &Path,
        slot: &ProcessSlot,
        deadline: Duration,
        shutdown: &ShutdownSignal,
    ) -> PidHandoff {
        let pid_file = pid_file_in(workdir);
        let started = Instant::now();
        let mut warned = false;

        loop {
            if shutdown.is_triggered() {
                return PidHandoff::ShuttingDown;
            }
            if slot.is_released() {
                debug!("[Spawn] {name} was terminated before its PID handoff");
                return PidHandoff::Released;
            }

            match read_pid_file(&pid_file).await {
                PidFile::Valid(pid) => return Self::capture(name, slot, pid),
                PidFile::Garbage if !warned => {
                    warn!(
                        "[Spawn] PID file {} unreadable for {name}; retrying",
                        pid_file.display()
                    );
                    warned = true;
                }
                PidFile::Garbage | PidFile::Missing => {}
            }

            if let Some(code) = slot.launcher_exit() {
                if let PidFile::Valid(pid) = read_pid_file(&pid_file).await {
                    return Self::capture(name, slot, pid);
                }
                warn!("[Spawn] Launcher for {name} exited with code {code} before handoff");
                return PidHandoff::LauncherExited(code);
            }

            if started.elapsed() >= deadline {
                warn!(
                    "[Spawn] Timed out waiting for PID file {} for {name}",
                    pid_file.display()
                );
                return PidHandoff::TimedOut;
            }
            sleep(self.timings.pid_poll).await;
        }
    }

    fn capture(name: &str, slot: &ProcessSlot, pid: u32) -> PidHandoff {
        slot.set_pid(pid);
        info!("[Spawn] {name} reported worker PID {pid}");
        PidHandoff::Captured(pid)
    }

    pub fn is_alive(&self, slot: &ProcessSlot) -> bool {
        let Some(pid) = slot.pid() else {
            return false;
        };
        match self.inspector.is_running(pid) {
            Ok(running) => running,
            Err(e) => {
                debug!("[Process] Liveness check for {pid} failed: {e}");
                false
            }
        }
    }

    /// Stops the worker (TERM, then KILL) and the launcher child.
    ///
    /// Idempotent and infallible: the slot is always left empty and marked
    /// released, which ends a pending PID handoff.
    pub async fn terminate(&self, name: &str, slot: &ProcessSlot) {
        slot.release();
        if let Some(pid) = slot.take_pid() {
            self.stop_pid(name, pid).await;
        }

        if let Some(mut child) = slot.take_launcher() {
            if matches!(child.try_wait(), Ok(Some(_))) {
                return;
            }
            if let Some(pid) = child.id()
                && let Err(e) = self.inspector.kill_term(pid)
            {
                debug!("[Process] SIGTERM to launcher of {name} failed: {e}");
            }
            if timeout(self.timings.term_grace, child.wait()).await.is_ok() {
                return;
            }
            if let Err(e) = child.start_kill() {
                debug!("[Process] Kill of launcher for {name} failed: {e}");
            }
            let _ = timeout(self.timings.kill_grace, child.wait()).await;
        }
    }

    async fn stop_pid(&self, name: &str, pid: u32) {
        if !self.running(pid) {
            return;
        }

        info!("[Process] Stopping worker PID {pid} ({name})");
        if let Err(e) = self.inspector.kill_term(pid) {
            warn!("[Process] SIGTERM to {pid} failed: {e}");
        }
        if self.wait_exit(pid, self.timings.term_grace).await {
            return;
        }

        warn!("[Process] Graceful stop timed out for {name}; forcing");
        if let Err(e) = self.inspector.kill_kill(pid) {
            warn!("[Process] SIGKILL to {pid} failed: {e}");
        }
        if !self.wait_exit(pid, self.timings.kill_grace).await {
            warn!("[Process] Worker PID {pid} ({name}) still alive after SIGKILL");
        }
    }

    async fn wait_exit(&self, pid: u32, grace: Duration) -> bool {
        let started = Instant::now();
        loop {
            if !self.running(pid) {
                return true;
            }
            if started.elapsed() >= grace {
                return false;
            }
            sleep(self.timings.exit_poll).await;
        }
    }

    fn running(&self, pid: u32) -> bool {
        self.inspector.is_running(pid).unwrap_or(false)
    }
}
