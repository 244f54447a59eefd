use crate::errors::WorldpoolError;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_LAUNCHER: &str = "WORLDPOOL_LAUNCHER";
pub const ENV_SERVERS_ROOT: &str = "WORLDPOOL_SERVERS_ROOT";
pub const ENV_WARM_BUFFER: &str = "WORLDPOOL_WARM_BUFFER";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub pool: PoolConfig,
    pub spawn: SpawnConfig,
    pub admission: AdmissionConfig,
    pub cleanup: CleanupConfig,
    pub commands: CommandTemplates,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub buffer: usize,
    pub max: usize,
    pub reconcile_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnConfig {
    /// Interpreter plus launcher script, shell-quoted.
    pub launcher: String,
    /// Directory the launcher runs in.
    pub working_dir: PathBuf,
    pub host: String,
    pub port_base: u16,
    pub port_span: u16,
    pub control_port_offset: u16,
    pub pid_handoff_timeout_secs: u64,
    pub reach_timeout_secs: u64,
    pub warm_reach_timeout_secs: u64,
    pub reach_poll_ms: u64,
    pub servers_root: PathBuf,
    pub spawn_log: PathBuf,
    pub template: PathBuf,
    pub base_dir: PathBuf,
    pub name_prefix: String,
    pub member_connect_attempts: u32,
    pub member_connect_backoff_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub concurrency: usize,
    pub per_session_timeout_secs: u64,
    pub delete_attempts: u32,
    pub delete_backoff_ms: u64,
    pub shutdown_grace_secs: u64,
}

/// Backend console commands. `{player}` is replaced with the client's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandTemplates {
    pub readiness_probe: String,
    pub platform_build: String,
    pub spawn_point: String,
    pub entity_probe: String,
    /// Reply fragment meaning the entity is not loaded yet.
    pub entity_missing_marker: String,
    pub footing: String,
    pub nudge: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            buffer: 2,
            max: 8,
            reconcile_interval_secs: 10,
        }
    }
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            launcher: "python3 spawn_server.py".to_string(),
            working_dir: PathBuf::from("."),
            host: "127.0.0.1".to_string(),
            port_base: 30070,
            port_span: 1000,
            control_port_offset: 10,
            pid_handoff_timeout_secs: 90,
            reach_timeout_secs: 90,
            warm_reach_timeout_secs: 60,
            reach_poll_ms: 500,
            servers_root: PathBuf::from("servers"),
            spawn_log: PathBuf::from("spawn_server.log"),
            template: PathBuf::from("world-template.zip"),
            base_dir: PathBuf::from("templates/world-base"),
            name_prefix: "world".to_string(),
            member_connect_attempts: 12,
            member_connect_backoff_ms: 2000,
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self { cooldown_secs: 45 }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            per_session_timeout_secs: 10,
            delete_attempts: 5,
            delete_backoff_ms: 200,
            shutdown_grace_secs: 30,
        }
    }
}

impl Default for CommandTemplates {
    fn default() -> Self {
        Self {
            readiness_probe: "list".to_string(),
            platform_build: "fill -5 180 -5 5 180 5 glass".to_string(),
            spawn_point: "setworldspawn 0 181 0".to_string(),
            entity_probe: "data get entity {player} Pos[0]".to_string(),
            entity_missing_marker: "no entity".to_string(),
            footing: "execute as {player} at @s if block ~ ~-1 ~ air run setblock ~ ~-1 ~ glass"
                .to_string(),
            nudge: "execute as {player} at @s run tp @s ~ ~0.2 ~".to_string(),
        }
    }
}

impl CommandTemplates {
    pub fn for_player(template: &str, player: &str) -> String {
        template.replace("{player}", player)
    }
}

impl SpawnConfig {
    pub fn pid_handoff_timeout(&self) -> Duration {
        Duration::from_secs(self.pid_handoff_timeout_secs)
    }

    pub fn reach_timeout(&self) -> Duration {
        Duration::from_secs(self.reach_timeout_secs)
    }

    pub fn warm_reach_timeout(&self) -> Duration {
        Duration::from_secs(self.warm_reach_timeout_secs)
    }

    pub fn reach_poll(&self) -> Duration {
        Duration::from_millis(self.reach_poll_ms)
    }

    pub fn member_connect_backoff(&self) -> Duration {
        Duration::from_millis(self.member_connect_backoff_ms)
    }

    pub fn spawn_log_path(&self) -> PathBuf {
        self.working_dir.join(&self.spawn_log)
    }

    pub fn servers_root_path(&self) -> PathBuf {
        self.working_dir.join(&self.servers_root)
    }
}

impl AdmissionConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl PoolConfig {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

impl CleanupConfig {
    pub fn per_session_timeout(&self) -> Duration {
        Duration::from_secs(self.per_session_timeout_secs)
    }

    pub fn delete_backoff(&self) -> Duration {
        Duration::from_millis(self.delete_backoff_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("worldpool").join("config.toml"))
}

impl OrchestratorConfig {
    /// Explicit path, then the per-user config file if present, then
    /// defaults. Environment overrides apply on top in every case.
    pub fn load(explicit: Option<&Path>) -> Result<Self, WorldpoolError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => {
                    debug!("[Config] No config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, WorldpoolError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| WorldpoolError::io("read_config", path.display(), e))?;
        let config = Self::from_toml(&raw)?;
        info!("[Config] Loaded {}", path.display());
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, WorldpoolError> {
        toml::from_str(raw).map_err(|e| WorldpoolError::config("file", e))
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), WorldpoolError> {
        if let Ok(launcher) = std::env::var(ENV_LAUNCHER) {
            self.spawn.launcher = launcher;
        }
        if let Ok(root) = std::env::var(ENV_SERVERS_ROOT) {
            self.spawn.servers_root = PathBuf::from(root);
        }
        if let Ok(buffer) = std::env::var(ENV_WARM_BUFFER) {
            self.pool.buffer = buffer
                .trim()
                .parse()
                .map_err(|e| WorldpoolError::config(ENV_WARM_BUFFER, e))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), WorldpoolError> {
        if self.spawn.launcher.trim().is_empty() {
            return Err(WorldpoolError::config(
                "spawn.launcher",
                "launcher command is empty",
            ));
        }
        if self.spawn.port_span == 0 {
            return Err(WorldpoolError::config("spawn.port_span", "must be positive"));
        }
        let highest = u32::from(self.spawn.port_base)
            + u32::from(self.spawn.port_span)
            + u32::from(self.spawn.control_port_offset);
        if highest > u32::from(u16::MAX) {
            return Err(WorldpoolError::config(
                "spawn.port_base",
                format!("port range reaches {highest}, beyond 65535"),
            ));
        }
        if self.cleanup.concurrency == 0 {
            return Err(WorldpoolError::config(
                "cleanup.concurrency",
                "must be at least 1",
            ));
        }
        if self.cleanup.delete_attempts == 0 {
            return Err(WorldpoolError::config(
                "cleanup.delete_attempts",
                "must be at least 1",
            ));
        }
        if self.spawn.name_prefix.is_empty() {
            return Err(WorldpoolError::config(
                "spawn.name_prefix",
                "must not be empty",
            ));
        }
        Ok(())
    }
}
