use crate::cleanup::SessionCleanupGuard;
use crate::domains::control::{ControlChannel, ControlEndpoint, RconConnector};
use crate::domains::pool::{WarmPoolManager, spawn_keeper};
use crate::domains::sessions::{Dependencies, SessionContext, SessionService};
use crate::events::LoggingSink;
use crate::infrastructure::config::OrchestratorConfig;
use crate::infrastructure::frontend::LocalFrontend;
use crate::utils::fs_utils::reset_directory;
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(
    name = "worldpool",
    version = VERSION,
    about = "On-demand per-party backend servers with a warm pool"
)]
pub struct Cli {
    /// Configuration file (defaults to the per-user config, then built-ins)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the orchestrator until Ctrl-C, then drain every session
    Serve {
        /// Log a session snapshot every N seconds (0 disables)
        #[arg(long, default_value_t = 0, value_name = "SECS")]
        status_every: u64,
    },
    /// Send one command to a backend's control port
    Exec {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long)]
        port: u16,
        #[arg(long)]
        password: String,
        /// Do not wait for the reply
        #[arg(long)]
        no_reply: bool,
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Delete everything below the servers root
    Reset,
}

impl Cli {
    pub fn load_config(&self) -> Result<OrchestratorConfig> {
        OrchestratorConfig::load(self.config.as_deref()).context("failed to load configuration")
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        None => serve(cli.load_config()?, 0).await,
        Some(CliCommand::Serve { status_every }) => serve(cli.load_config()?, *status_every).await,
        Some(CliCommand::Exec {
            host,
            port,
            password,
            no_reply,
            command,
        }) => {
            let endpoint = ControlEndpoint::new(host.clone(), *port, password.clone());
            exec(&endpoint, &command.join(" "), *no_reply).await
        }
        Some(CliCommand::Reset) => reset(&cli.load_config()?).await,
    }
}

async fn serve(config: OrchestratorConfig, status_every: u64) -> Result<()> {
    let frontend = Arc::new(LocalFrontend::new());
    let deps = Dependencies::system(frontend, Arc::new(LoggingSink));
    let ctx = Arc::new(SessionContext::new(config, deps).context("invalid configuration")?);
    let service = SessionService::new(Arc::clone(&ctx));
    let manager = WarmPoolManager::new(Arc::clone(&ctx));
    service.attach_warm_source(manager.clone());

    let guard = SessionCleanupGuard::new(Arc::clone(&ctx.cleanup));
    let keeper = spawn_keeper(manager);
    info!(
        "Worldpool {VERSION} serving (servers root {})",
        ctx.config.spawn.servers_root_path().display()
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    if status_every > 0 {
        let mut ticker = tokio::time::interval(Duration::from_secs(status_every));
        loop {
            tokio::select! {
                signal = &mut ctrl_c => {
                    signal.context("failed to listen for Ctrl-C")?;
                    break;
                }
                _ = ticker.tick() => {
                    let snapshot = serde_json::to_string(&service.snapshot())
                        .context("failed to serialize session snapshot")?;
                    info!("[Session] Status {snapshot}");
                }
            }
        }
    } else {
        ctrl_c.await.context("failed to listen for Ctrl-C")?;
    }

    info!("Ctrl-C received; shutting down");
    let drained = service.shutdown().await;
    guard.disarm();
    if let Err(e) = keeper.await {
        warn!("[Warm] Keeper ended abnormally: {e}");
    }
    info!("Shutdown complete ({drained} session(s) drained)");
    Ok(())
}

async fn exec(endpoint: &ControlEndpoint, command: &str, no_reply: bool) -> Result<()> {
    let connector = RconConnector::new();
    if no_reply {
        connector
            .execute_no_reply(endpoint, command)
            .await
            .with_context(|| format!("failed to send to {}", endpoint.address()))?;
        return Ok(());
    }
    let reply = connector
        .execute(endpoint, command)
        .await
        .with_context(|| format!("command failed on {}", endpoint.address()))?;
    println!("{reply}");
    Ok(())
}

async fn reset(config: &OrchestratorConfig) -> Result<()> {
    let root = config.spawn.servers_root_path();
    let settings = &config.cleanup;
    let leftovers =
        reset_directory(&root, settings.delete_attempts, settings.delete_backoff()).await;
    if !leftovers.is_empty() {
        bail!(
            "{} entr(ies) under {} could not be removed",
            leftovers.len(),
            root.display()
        );
    }
    println!("Reset {}", root.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["worldpool"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn exec_joins_trailing_words() {
        let cli = Cli::try_parse_from([
            "worldpool",
            "--config",
            "/tmp/wp.toml",
            "exec",
            "--port",
            "30080",
            "--password",
            "pw",
            "say",
            "hello",
            "world",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/wp.toml")));
        match cli.command {
            Some(CliCommand::Exec {
                host,
                port,
                no_reply,
                command,
                ..
            }) => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(port, 30080);
                assert!(!no_reply);
                assert_eq!(command.join(" "), "say hello world");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn exec_requires_a_port() {
        assert!(Cli::try_parse_from(["worldpool", "exec", "--password", "pw", "list"]).is_err());
    }

    #[tokio::test]
    async fn reset_empties_the_servers_root() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = OrchestratorConfig::default();
        config.spawn.working_dir = dir.path().to_path_buf();
        let root = config.spawn.servers_root_path();
        std::fs::create_dir_all(root.join("world-abc/region")).unwrap();
        std::fs::write(root.join("stray.log"), "x").unwrap();

        reset(&config).await.unwrap();
        assert!(root.is_dir());
        assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);
    }
}
