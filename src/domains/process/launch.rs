use crate::errors::WorldpoolError;
use crate::utils::binary_utils::resolve_executable;
use std::path::{Path, PathBuf};

pub const PID_FILE_NAME: &str = ".server-pid";
pub const WORKDIR_ENV: &str = "WORLDPOOL_WORKDIR";

/// The configured launcher, split into an interpreter and its leading
/// arguments (typically the launcher script).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl LauncherCommand {
    /// Parses a shell-style command line and resolves its first token on
    /// `PATH`.
    pub fn parse(command_line: &str) -> Result<Self, WorldpoolError> {
        let mut words = shell_words::split(command_line)
            .map_err(|e| WorldpoolError::config("spawn.launcher", e))?;
        if words.is_empty() {
            return Err(WorldpoolError::config(
                "spawn.launcher",
                "launcher command is empty",
            ));
        }
        let head = words.remove(0);
        let program = resolve_executable(&head).ok_or_else(|| {
            WorldpoolError::config("spawn.launcher", format!("'{head}' not found"))
        })?;
        Ok(Self {
            program,
            args: words,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmTemplate {
    pub template: PathBuf,
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchMode {
    /// Dedicated to `owner` from the start.
    Fresh { owner: String },
    /// Pre-spawned with an empty world, adopted later.
    Warm(WarmTemplate),
}

/// Everything needed to start one backend through the launcher.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub launcher: LauncherCommand,
    pub mode: LaunchMode,
    pub server_name: String,
    pub port: u16,
    pub control_port: u16,
    pub control_password: String,
    /// Session directory; the launcher reports the worker PID inside it.
    pub workdir: PathBuf,
    /// Directory the launcher runs in.
    pub cwd: PathBuf,
    pub log_file: PathBuf,
}

impl LaunchSpec {
    pub fn pid_file(&self) -> PathBuf {
        pid_file_in(&self.workdir)
    }

    /// Arguments after the launcher's own leading args.
    pub fn arguments(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(14);
        match &self.mode {
            LaunchMode::Fresh { owner } => args.push(owner.clone()),
            LaunchMode::Warm(_) => args.push("warm".to_string()),
        }
        args.push(self.port.to_string());
        args.push("--rcon-port".to_string());
        args.push(self.control_port.to_string());
        args.push("--rcon-pass".to_string());
        args.push(self.control_password.clone());
        if let LaunchMode::Warm(template) = &self.mode {
            args.push("--template".to_string());
            args.push(template.template.display().to_string());
            args.push("--base-dir".to_string());
            args.push(template.base_dir.display().to_string());
            args.push("--empty-world".to_string());
        }
        args.push("--server-name".to_string());
        args.push(self.server_name.clone());
        args
    }

    pub fn full_arguments(&self) -> Vec<String> {
        let mut all = self.launcher.args.clone();
        all.extend(self.arguments());
        all
    }
}

pub fn pid_file_in(workdir: &Path) -> PathBuf {
    workdir.join(PID_FILE_NAME)
}
