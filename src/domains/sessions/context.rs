use crate::domains::control::{ControlChannel, ControlEndpoint, RconConnector};
use crate::domains::process::{
    LaunchMode, LaunchSpec, LauncherCommand, ProcessInspector, ProcessSupervisor,
    SupervisorTimings, SystemProcessInspector, WarmTemplate,
};
use crate::domains::sessions::lifecycle::cancellation::CleanupCoordinator;
use crate::domains::sessions::lifecycle::platform::{PlatformInitializer, PlatformPolicy};
use crate::domains::sessions::preferences::RadiusPreferences;
use crate::domains::sessions::registry::SessionRegistry;
use crate::errors::WorldpoolError;
use crate::events::EventSink;
use crate::infrastructure::config::OrchestratorConfig;
use crate::infrastructure::frontend::FrontendRegistry;
use crate::shared::{Clock, PlayerId, ShutdownSignal, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;

/// External collaborators the engine is wired to.
pub struct Dependencies {
    pub frontend: Arc<dyn FrontendRegistry>,
    pub control: Arc<dyn ControlChannel>,
    pub inspector: Arc<dyn ProcessInspector>,
    pub events: Arc<dyn EventSink>,
    pub clock: Arc<dyn Clock>,
    pub supervisor_timings: SupervisorTimings,
    pub platform_policy: PlatformPolicy,
}

impl Dependencies {
    /// Real control protocol, real signals and the wall clock.
    pub fn system(frontend: Arc<dyn FrontendRegistry>, events: Arc<dyn EventSink>) -> Self {
        Self {
            frontend,
            control: Arc::new(RconConnector::new()),
            inspector: Arc::new(SystemProcessInspector),
            events,
            clock: Arc::new(SystemClock),
            supervisor_timings: SupervisorTimings::default(),
            platform_policy: PlatformPolicy::default(),
        }
    }
}

/// Shared state handed to every lifecycle component.
pub struct SessionContext {
    pub config: Arc<OrchestratorConfig>,
    pub registry: Arc<SessionRegistry>,
    pub preferences: Arc<RadiusPreferences>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub frontend: Arc<dyn FrontendRegistry>,
    pub control: Arc<dyn ControlChannel>,
    pub events: Arc<dyn EventSink>,
    pub platform: Arc<PlatformInitializer>,
    pub cleanup: Arc<CleanupCoordinator>,
    pub shutdown: ShutdownSignal,
    launcher: LauncherCommand,
}

impl SessionContext {
    pub fn new(config: OrchestratorConfig, deps: Dependencies) -> Result<Self, WorldpoolError> {
        config.validate()?;
        let launcher = LauncherCommand::parse(&config.spawn.launcher)?;
        let config = Arc::new(config);
        let shutdown = ShutdownSignal::new();

        let registry = Arc::new(SessionRegistry::new(
            config.admission.cooldown(),
            deps.clock,
        ));
        let preferences = Arc::new(RadiusPreferences::new());
        let supervisor = Arc::new(ProcessSupervisor::with_timings(
            deps.inspector,
            deps.supervisor_timings,
        ));
        let platform = Arc::new(PlatformInitializer::with_policy(
            Arc::clone(&deps.control),
            config.commands.clone(),
            deps.platform_policy,
            shutdown.clone(),
        ));
        let cleanup = Arc::new(CleanupCoordinator::new(
            Arc::clone(&supervisor),
            Arc::clone(&deps.frontend),
            Arc::clone(&registry),
            Arc::clone(&preferences),
            Arc::clone(&deps.events),
            config.cleanup.clone(),
        ));

        Ok(Self {
            config,
            registry,
            preferences,
            supervisor,
            frontend: deps.frontend,
            control: deps.control,
            events: deps.events,
            platform,
            cleanup,
            shutdown,
            launcher,
        })
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Name of the session dedicated to `leader`.
    pub fn session_name_for(&self, leader: PlayerId) -> String {
        format!("{}-{}", self.config.spawn.name_prefix, leader.short())
    }

    pub fn warm_session_name(&self) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-warm-{}", self.config.spawn.name_prefix, &suffix[..4])
    }

    pub fn workdir_for(&self, name: &str) -> PathBuf {
        self.config.spawn.servers_root_path().join(name)
    }

    /// Game port drawn from the configured range, plus its control endpoint.
    pub fn allocate_ports(&self) -> (u16, ControlEndpoint) {
        let spawn = &self.config.spawn;
        let offset = match getrandom::u32() {
            Ok(value) => (value % u32::from(spawn.port_span.max(1))) as u16,
            Err(e) => {
                log::debug!("[Spawn] Random source unavailable, using base port: {e}");
                0
            }
        };
        let port = spawn.port_base + offset;
        let control = ControlEndpoint::generate(
            spawn.host.clone(),
            port + spawn.control_port_offset,
        );
        (port, control)
    }

    pub fn launch_spec(
        &self,
        name: &str,
        port: u16,
        control: &ControlEndpoint,
        owner: Option<PlayerId>,
    ) -> LaunchSpec {
        let spawn = &self.config.spawn;
        let mode = match owner {
            Some(owner) => LaunchMode::Fresh {
                owner: owner.to_string(),
            },
            None => LaunchMode::Warm(WarmTemplate {
                template: spawn.template.clone(),
                base_dir: spawn.base_dir.clone(),
            }),
        };
        LaunchSpec {
            launcher: self.launcher.clone(),
            mode,
            server_name: name.to_string(),
            port,
            control_port: control.port,
            control_password: control.password.clone(),
            workdir: self.workdir_for(name),
            cwd: spawn.working_dir.clone(),
            log_file: spawn.spawn_log_path(),
        }
    }
}
