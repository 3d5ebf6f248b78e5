//! The framework facade: configuration, system bundle, bootstrap and
//! shutdown.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use semver::Version;
use tessera_config::{FrameworkConfig, MapProperties};
use tessera_core::{
    Deployment, ModuleIdentifier, ResourceId, ResourceState, SYSTEM_RESOURCE_ID, parse_version,
    system_resource,
};
use tessera_events::{EventBus, EventMetadata, FrameworkEvent};
use tessera_modules::{ModuleLoader, ModuleManager, NativeCode, PathFilter, Platform};
use tessera_resolver::{Environment, Resolver};
use tokio::sync::Mutex;
use tessera_telemetry::{LogConfig, TelemetryError, setup_logging};
use tracing::{debug, info, warn};

use crate::activator::{ActivatorRegistry, BundleActivator};
use crate::bootstrap::{Bootstrap, BootstrapEntry, BootstrapReport};
use crate::bundle::Bundle;
use crate::error::{FrameworkError, FrameworkResult};
use crate::manager::{BundleManager, StartOptions};
use crate::notify::{report_error, transition};
use crate::plugin::ResolverPlugin;
use crate::source::{DeploymentSource, InMemorySource};
use crate::start_level::StartLevel;

/// Builds a [`Framework`].
pub struct FrameworkBuilder {
    properties: MapProperties,
    config_file: Option<PathBuf>,
    source: Option<Arc<dyn DeploymentSource>>,
    activators: ActivatorRegistry,
    platform: Platform,
    resolver: Resolver,
    bus: Option<EventBus>,
    logging: bool,
}

impl Default for FrameworkBuilder {
    fn default() -> Self {
        Self {
            properties: MapProperties::new(),
            config_file: None,
            source: None,
            activators: ActivatorRegistry::new(),
            platform: Platform::current(),
            resolver: Resolver::new(),
            bus: None,
            logging: false,
        }
    }
}

impl FrameworkBuilder {
    /// Create a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one configuration property. Properties override the file.
    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.set(key, value);
        self
    }

    /// Merge configuration properties.
    #[must_use]
    pub fn properties(mut self, properties: &MapProperties) -> Self {
        self.properties.merge(properties);
        self
    }

    /// Read configuration from a TOML file.
    #[must_use]
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Where auto-install and auto-start locations are loaded from.
    #[must_use]
    pub fn source(mut self, source: Arc<dyn DeploymentSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Register the activator of bundles named `symbolic_name`.
    #[must_use]
    pub fn activator(
        mut self,
        symbolic_name: impl Into<String>,
        activator: Arc<dyn BundleActivator>,
    ) -> Self {
        self.activators.register(symbolic_name, activator);
        self
    }

    /// Platform used to select native libraries.
    #[must_use]
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Use a custom resolver.
    #[must_use]
    pub fn resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Publish on an existing bus.
    #[must_use]
    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Install the global log subscriber from the `tessera.log.*`
    /// properties when building. An already installed subscriber is kept.
    #[must_use]
    pub fn with_logging(mut self) -> Self {
        self.logging = true;
        self
    }

    /// Build the framework. Nothing runs until [`Framework::init`] or
    /// [`Framework::start`].
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::Config`] if the configuration cannot be
    /// read, [`FrameworkError::Telemetry`] if logging was requested with an
    /// invalid filter or log directory, and [`FrameworkError::Module`] if a
    /// boot delegation pattern is invalid.
    pub fn build(self) -> FrameworkResult<Framework> {
        let properties = MapProperties::layered(self.config_file.as_deref(), &self.properties)?;
        if self.logging {
            install_logging(&LogConfig::from_properties(&properties))?;
        }
        let config = FrameworkConfig::from_properties(&properties)?;
        let boot_delegation = PathFilter::packages(&config.boot_delegation)?;
        let version = parse_version(env!("CARGO_PKG_VERSION"))?;

        let bus = self.bus.unwrap_or_default();
        let modules = Arc::new(ModuleManager::new(
            Arc::new(ModuleLoader::new()),
            boot_delegation,
        ));
        let plugin = Arc::new(
            ResolverPlugin::new(
                Arc::new(Environment::new()),
                modules,
                NativeCode::new(self.platform),
                bus.clone(),
            )
            .with_resolver(self.resolver),
        );
        let manager = Arc::new(BundleManager::new(
            plugin,
            bus.clone(),
            self.activators,
            config.start_timeout,
            config.initial_bundle_start_level,
        ));
        let source = self
            .source
            .unwrap_or_else(|| Arc::new(InMemorySource::new()));

        Ok(Framework {
            config,
            version,
            bus,
            manager,
            source,
            levels: OnceLock::new(),
            lifecycle: Mutex::new(()),
        })
    }
}

fn install_logging(log: &LogConfig) -> FrameworkResult<()> {
    match setup_logging(log) {
        Ok(()) => {
            info!(level = %log.level, format = ?log.format, "Logging initialized");
            Ok(())
        },
        Err(TelemetryError::AlreadyInitialized(reason)) => {
            debug!(%reason, "Keeping the installed log subscriber");
            Ok(())
        },
        Err(e) => Err(e.into()),
    }
}

/// A configured module runtime.
pub struct Framework {
    config: FrameworkConfig,
    version: Version,
    bus: EventBus,
    manager: Arc<BundleManager>,
    source: Arc<dyn DeploymentSource>,
    levels: OnceLock<StartLevel>,
    lifecycle: Mutex<()>,
}

impl std::fmt::Debug for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framework")
            .field("version", &self.version)
            .field("config", &self.config)
            .field("start_level", &self.manager.active_start_level())
            .finish_non_exhaustive()
    }
}

impl Framework {
    /// Start building a framework.
    #[must_use]
    pub fn builder() -> FrameworkBuilder {
        FrameworkBuilder::new()
    }

    /// The effective configuration.
    #[must_use]
    pub fn config(&self) -> &FrameworkConfig {
        &self.config
    }

    /// Framework version, also the system bundle's version.
    #[must_use]
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// The event bus.
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// The bundle manager.
    #[must_use]
    pub fn bundles(&self) -> &Arc<BundleManager> {
        &self.manager
    }

    /// The environment holding every installed resource.
    #[must_use]
    pub fn environment(&self) -> &Arc<Environment> {
        self.manager.plugin().environment()
    }

    /// The module loader.
    #[must_use]
    pub fn loader(&self) -> &Arc<ModuleLoader> {
        self.manager.plugin().modules().loader()
    }

    /// The start-level scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::SchedulerStopped`] before
    /// [`Framework::init`].
    pub fn start_level(&self) -> FrameworkResult<&StartLevel> {
        self.levels.get().ok_or(FrameworkError::SchedulerStopped)
    }

    /// The system bundle, once initialized.
    #[must_use]
    pub fn system_bundle(&self) -> Option<Arc<Bundle>> {
        self.manager.bundle(SYSTEM_RESOURCE_ID)
    }

    /// Install the system bundle, resolve it and start the start-level
    /// worker. The system bundle is left STARTING. Calling it again does
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::Timeout`] if this takes longer than the
    /// init timeout, or the error that stopped it.
    pub async fn init(&self) -> FrameworkResult<()> {
        let _guard = self.lifecycle.lock().await;
        self.init_locked().await
    }

    async fn init_locked(&self) -> FrameworkResult<()> {
        if self.levels.get().is_some() {
            return Ok(());
        }
        let bound = self.config.init_timeout;
        tokio::time::timeout(bound, self.init_system())
            .await
            .map_err(|_| FrameworkError::timeout("framework init", bound))?
    }

    async fn init_system(&self) -> FrameworkResult<()> {
        let system = match self.system_bundle() {
            Some(system) => system,
            None => {
                let resource = system_resource(self.version.clone(), &self.config.system_packages)?;
                self.manager.install_system(Arc::new(resource))?
            },
        };
        self.manager
            .plugin()
            .resolve_and_apply(std::slice::from_ref(system.resource()), &[])
            .await?;
        transition(&self.bus, system.resource(), ResourceState::Starting);

        let (levels, _worker) = StartLevel::spawn(Arc::clone(&self.manager));
        if self.levels.set(levels).is_err() {
            warn!("Start-level worker already running");
        }
        info!(version = %self.version, "Framework initialized");
        Ok(())
    }

    /// Bootstrap the configured locations and raise the start level to the
    /// beginning start level.
    ///
    /// Per-bundle failures do not fail the start; they are published as
    /// framework error events and listed in the returned report. Starting
    /// an active framework returns an empty report.
    ///
    /// # Errors
    ///
    /// Returns initialization errors, or [`FrameworkError::Timeout`] if the
    /// start-level walk exceeds the start timeout.
    pub async fn start(&self) -> FrameworkResult<BootstrapReport> {
        let _guard = self.lifecycle.lock().await;
        self.init_locked().await?;
        let system = self
            .system_bundle()
            .ok_or(FrameworkError::UnknownBundle(SYSTEM_RESOURCE_ID))?;
        if system.state() == ResourceState::Active {
            return Ok(BootstrapReport::default());
        }

        let bootstrap = Bootstrap::new(
            Arc::clone(&self.manager),
            Arc::clone(&self.source),
            self.config.max_threads,
            self.config.beginning_start_level,
            self.config.start_timeout,
        );
        let report = bootstrap.run(self.bootstrap_entries()).await;

        self.start_level()?
            .set_start_level(self.config.beginning_start_level)
            .wait(self.config.start_timeout)
            .await?;

        transition(&self.bus, system.resource(), ResourceState::Active);
        self.bus.publish(FrameworkEvent::FrameworkStarted {
            metadata: EventMetadata::new("framework"),
            version: self.version.to_string(),
        });
        info!(
            level = self.config.beginning_start_level,
            bundles = report.installed.len(),
            "Framework started"
        );
        Ok(report)
    }

    /// Auto-install locations first, then auto-start ones. A location in
    /// both lists is started.
    fn bootstrap_entries(&self) -> Vec<BootstrapEntry> {
        let auto_start = &self.config.auto_start;
        let mut entries: Vec<BootstrapEntry> = self
            .config
            .auto_install
            .iter()
            .filter(|l| !auto_start.contains(*l))
            .map(BootstrapEntry::install)
            .collect();
        entries.extend(auto_start.iter().map(BootstrapEntry::start));
        entries
    }

    /// Lower the start level to 0, stopping every bundle, and stop the
    /// system bundle.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::Timeout`] if the walk exceeds the start
    /// timeout. The system bundle is RESOLVED afterwards either way.
    pub async fn stop(&self) -> FrameworkResult<()> {
        let _guard = self.lifecycle.lock().await;
        let Some(system) = self.system_bundle() else {
            return Ok(());
        };
        if !system.state().is_active_or_starting() {
            return Ok(());
        }

        transition(&self.bus, system.resource(), ResourceState::Stopping);
        let walk = match self.start_level() {
            Ok(levels) => levels
                .set_start_level(0)
                .wait(self.config.start_timeout)
                .await
                .map(|_| ()),
            Err(error) => Err(error),
        };
        if let Err(error) = &walk {
            report_error(&self.bus, None, "stop", error);
        }
        transition(&self.bus, system.resource(), ResourceState::Resolved);
        self.bus.publish(FrameworkEvent::FrameworkStopped {
            metadata: EventMetadata::new("framework"),
        });
        info!("Framework stopped");
        walk
    }

    /// Install a deployment.
    ///
    /// # Errors
    ///
    /// See [`BundleManager::install`].
    pub fn install(&self, deployment: &Deployment) -> FrameworkResult<Arc<Bundle>> {
        self.manager.install(deployment)
    }

    /// Load a location from the deployment source and install it.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::Deployment`] if the source cannot load it.
    pub async fn install_location(&self, location: &str) -> FrameworkResult<Arc<Bundle>> {
        let mut deployment = self.source.load(location).await?;
        deployment.location = location.to_owned();
        self.manager.install(&deployment)
    }

    /// Start a bundle persistently.
    ///
    /// # Errors
    ///
    /// See [`BundleManager::start`].
    pub async fn start_bundle(&self, id: ResourceId) -> FrameworkResult<()> {
        self.manager.start(id, StartOptions::default()).await
    }

    /// Stop a bundle persistently.
    ///
    /// # Errors
    ///
    /// See [`BundleManager::stop`].
    pub async fn stop_bundle(&self, id: ResourceId) -> FrameworkResult<()> {
        self.manager.stop(id, false).await
    }

    /// Uninstall a bundle.
    ///
    /// # Errors
    ///
    /// See [`BundleManager::uninstall`].
    pub async fn uninstall_bundle(&self, id: ResourceId) -> FrameworkResult<()> {
        self.manager.uninstall(id).await
    }

    /// Find the module serving `path` to `requester`.
    ///
    /// # Errors
    ///
    /// See [`BundleManager::load_class`].
    pub async fn load_class(
        &self,
        requester: ResourceId,
        path: &str,
    ) -> FrameworkResult<Option<ModuleIdentifier>> {
        self.manager.load_class(requester, path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Recording;
    use tessera_test::{EventRecorder, test_exporter, test_host, test_importer};

    fn source() -> Arc<InMemorySource> {
        Arc::new(
            InMemorySource::new()
                .with(test_exporter("api", "1.0", &["com.acme.api"]))
                .with(test_importer("web", &["com.acme.api"]).with_start_level(2))
                .with(test_host("late", "1.0").with_start_level(3)),
        )
    }

    #[test]
    fn test_logging_configured_from_properties() {
        let framework = Framework::builder()
            .property(tessera_telemetry::LOG_LEVEL, "warn")
            .property(tessera_telemetry::LOG_FORMAT, "compact")
            .with_logging()
            .build();
        assert!(framework.is_ok());

        let rejected = Framework::builder()
            .property(tessera_telemetry::LOG_LEVEL, "[invalid=syntax")
            .with_logging()
            .build();
        assert!(matches!(
            rejected,
            Err(FrameworkError::Telemetry(TelemetryError::InvalidFilter { .. }))
        ));
    }

    #[tokio::test]
    async fn test_init_installs_system_bundle() {
        let framework = Framework::builder()
            .property("tessera.system.packages", "org.tessera.api")
            .build()
            .unwrap();
        assert!(framework.start_level().is_err());

        framework.init().await.unwrap();
        framework.init().await.unwrap();

        let system = framework.system_bundle().unwrap();
        assert_eq!(system.state(), ResourceState::Starting);
        assert!(framework.environment().is_resolved(SYSTEM_RESOURCE_ID));
        assert!(framework.loader().framework_identifier().is_some());
        assert_eq!(framework.start_level().unwrap().start_level(), 0);
    }

    #[tokio::test]
    async fn test_start_bootstraps_and_reaches_beginning_level() {
        let calls = Arc::new(std::sync::Mutex::new(Vec::new()));
        let framework = Framework::builder()
            .property("tessera.auto.install", "mem:api")
            .property("tessera.auto.start", "mem:web, mem:late")
            .property("tessera.framework.beginning.startlevel", "2")
            .source(source())
            .activator("web", Arc::new(Recording::sharing(&calls)))
            .activator("late", Arc::new(Recording::sharing(&calls)))
            .build()
            .unwrap();
        let recorder = EventRecorder::attach(framework.event_bus());

        let report = framework.start().await.unwrap();

        assert_eq!(report.installed.len(), 3);
        assert_eq!(report.activated.len(), 1);
        assert_eq!(framework.start_level().unwrap().start_level(), 2);
        assert_eq!(
            framework.system_bundle().unwrap().state(),
            ResourceState::Active
        );
        let late = framework.bundles().bundle_at("mem:late").unwrap();
        assert_eq!(late.state(), ResourceState::Installed);
        assert!(late.is_persistently_started());
        assert_eq!(*calls.lock().unwrap(), vec!["start web"]);
        assert_eq!(recorder.event_types().last(), Some(&"framework_started"));

        framework
            .start_level()
            .unwrap()
            .set_start_level(3)
            .wait(framework.config().start_timeout)
            .await
            .unwrap();
        assert_eq!(late.state(), ResourceState::Active);

        framework.stop().await.unwrap();
        assert_eq!(framework.start_level().unwrap().start_level(), 0);
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["start web", "start late", "stop late", "stop web"]
        );
        assert_eq!(
            framework.system_bundle().unwrap().state(),
            ResourceState::Resolved
        );
        assert_eq!(recorder.event_types().last(), Some(&"framework_stopped"));
    }

    #[tokio::test]
    async fn test_system_packages_are_served_by_framework_module() {
        let framework = Framework::builder()
            .property("tessera.system.packages", "org.tessera.api")
            .build()
            .unwrap();
        framework.start().await.unwrap();

        let web = framework
            .install(&test_importer("web", &["org.tessera.api"]))
            .unwrap();
        framework.start_bundle(web.id()).await.unwrap();
        assert_eq!(web.state(), ResourceState::Active);

        let provider = framework
            .load_class(web.id(), "org/tessera/api/Bundle.class")
            .await
            .unwrap();
        assert_eq!(provider, framework.loader().framework_identifier());
    }

    #[tokio::test]
    async fn test_system_bundle_cannot_be_uninstalled() {
        let framework = Framework::builder().build().unwrap();
        framework.init().await.unwrap();
        assert!(matches!(
            framework.uninstall_bundle(SYSTEM_RESOURCE_ID).await,
            Err(FrameworkError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_invalid_boot_delegation_pattern() {
        let err = Framework::builder()
            .property("tessera.bootdelegation", "com.[acme.*")
            .build()
            .unwrap_err();
        assert!(matches!(err, FrameworkError::Module(_)));
    }
}
