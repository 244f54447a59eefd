use crate::errors::WorldpoolError;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

/// OS-level view of a worker process, addressed by PID only.
pub trait ProcessInspector: Send + Sync {
    fn is_running(&self, pid: u32) -> Result<bool, WorldpoolError>;
    fn kill_term(&self, pid: u32) -> Result<(), WorldpoolError>;
    fn kill_kill(&self, pid: u32) -> Result<(), WorldpoolError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessInspector;

impl SystemProcessInspector {
    fn send(pid: u32, sig: Signal, operation: &str) -> Result<(), WorldpoolError> {
        match signal::kill(Pid::from_raw(pid as i32), sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(WorldpoolError::io(operation, pid, e)),
        }
    }
}

impl ProcessInspector for SystemProcessInspector {
    fn is_running(&self, pid: u32) -> Result<bool, WorldpoolError> {
        if pid == 0 {
            return Ok(false);
        }
        match signal::kill(Pid::from_raw(pid as i32), None) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            // Exists but owned by someone else.
            Err(Errno::EPERM) => Ok(true),
            Err(e) => Err(WorldpoolError::io("kill-check", pid, e)),
        }
    }

    fn kill_term(&self, pid: u32) -> Result<(), WorldpoolError> {
        Self::send(pid, Signal::SIGTERM, "sigterm")
    }

    fn kill_kill(&self, pid: u32) -> Result<(), WorldpoolError> {
        Self::send(pid, Signal::SIGKILL, "sigkill")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_running() {
        let inspector = SystemProcessInspector;
        assert!(inspector.is_running(std::process::id()).unwrap());
    }

    #[test]
    fn pid_zero_is_never_running() {
        assert!(!SystemProcessInspector.is_running(0).unwrap());
    }

    #[tokio::test]
    async fn term_stops_a_child() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        let inspector = SystemProcessInspector;

        assert!(inspector.is_running(pid).unwrap());
        inspector.kill_term(pid).unwrap();
        let status = child.wait().await.unwrap();
        assert!(!status.success());
        assert!(!inspector.is_running(pid).unwrap());
    }
}
