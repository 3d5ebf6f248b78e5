//! Bundle registry and per-bundle lifecycle.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tessera_core::{
    Deployment, ModuleIdentifier, Resource, ResourceId, ResourceState, SYSTEM_RESOURCE_ID,
};
use tessera_events::EventBus;
use tessera_modules::parent_path;
use tracing::{debug, info, warn};

use crate::activator::ActivatorRegistry;
use crate::bundle::Bundle;
use crate::error::{FrameworkError, FrameworkResult};
use crate::notify::transition;
use crate::plugin::ResolverPlugin;

/// How [`BundleManager::start`] treats a bundle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Do not record the bundle as persistently started.
    pub transient: bool,
    /// Run the activator even if the bundle has a lazy activation policy.
    pub eager: bool,
    /// Start even if the bundle's level is above the active start level.
    pub ignore_level: bool,
}

impl StartOptions {
    /// Options used by start-level walks.
    #[must_use]
    pub fn transient() -> Self {
        Self {
            transient: true,
            ..Self::default()
        }
    }
}

/// Installs bundles and moves them through their lifecycle.
#[derive(Debug)]
pub struct BundleManager {
    plugin: Arc<ResolverPlugin>,
    bus: EventBus,
    activators: ActivatorRegistry,
    bundles: RwLock<BTreeMap<ResourceId, Arc<Bundle>>>,
    next_id: AtomicU64,
    start_timeout: Duration,
    active_level: AtomicU32,
    initial_bundle_level: AtomicU32,
}

impl BundleManager {
    /// Create a manager. Bundle ids start at 1; 0 is the system bundle.
    #[must_use]
    pub fn new(
        plugin: Arc<ResolverPlugin>,
        bus: EventBus,
        activators: ActivatorRegistry,
        start_timeout: Duration,
        initial_bundle_level: u32,
    ) -> Self {
        Self {
            plugin,
            bus,
            activators,
            bundles: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            start_timeout,
            active_level: AtomicU32::new(0),
            initial_bundle_level: AtomicU32::new(initial_bundle_level),
        }
    }

    /// The resolver plugin.
    #[must_use]
    pub fn plugin(&self) -> &Arc<ResolverPlugin> {
        &self.plugin
    }

    /// The event bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Take the next bundle id. Ids are handed out in call order, so
    /// reserving them up front fixes the install order of a batch.
    pub fn reserve_id(&self) -> ResourceId {
        ResourceId::new(self.next_id.fetch_add(1, Ordering::AcqRel))
    }

    /// Install a deployment under a fresh id.
    ///
    /// # Errors
    ///
    /// See [`BundleManager::install_with_id`].
    pub fn install(&self, deployment: &Deployment) -> FrameworkResult<Arc<Bundle>> {
        let id = self.reserve_id();
        self.install_with_id(id, deployment)
    }

    /// Install a deployment under a reserved id.
    ///
    /// Installing a location twice returns the existing bundle. The bundle
    /// gets the deployment's start level, or the initial bundle start level
    /// if it declares none or declares the reserved level 0.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::Deployment`] if the descriptor is invalid
    /// and [`FrameworkError::Resolution`] if the id is already taken.
    pub fn install_with_id(
        &self,
        id: ResourceId,
        deployment: &Deployment,
    ) -> FrameworkResult<Arc<Bundle>> {
        if let Some(existing) = self.bundle_at(&deployment.location) {
            debug!(bundle = %existing, "Location already installed");
            return Ok(existing);
        }
        let resource =
            deployment
                .to_resource(id, 0)
                .map_err(|e| FrameworkError::Deployment {
                    location: deployment.location.clone(),
                    message: e.to_string(),
                })?;
        let resource = Arc::new(resource);
        self.plugin.environment().install(Arc::clone(&resource))?;

        let level = match deployment.start_level {
            Some(0) => {
                let fallback = self.initial_bundle_start_level();
                warn!(
                    location = %deployment.location,
                    fallback,
                    "Start level 0 is reserved for the system bundle, using the initial level"
                );
                fallback
            },
            Some(level) => level,
            None => self.initial_bundle_start_level(),
        };
        let bundle = Arc::new(Bundle::new(
            resource,
            &deployment.location,
            level,
            deployment.auto_start,
        ));
        self.write().insert(id, Arc::clone(&bundle));
        info!(bundle = %bundle, level, location = %deployment.location, "Bundle installed");
        Ok(bundle)
    }

    /// Register the system bundle at start level 0.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::Resolution`] if it is already installed.
    pub fn install_system(&self, resource: Arc<Resource>) -> FrameworkResult<Arc<Bundle>> {
        self.plugin.environment().install(Arc::clone(&resource))?;
        let bundle = Arc::new(Bundle::new(resource, "system", 0, true));
        self.write().insert(SYSTEM_RESOURCE_ID, Arc::clone(&bundle));
        Ok(bundle)
    }

    /// Look up a bundle.
    #[must_use]
    pub fn bundle(&self, id: ResourceId) -> Option<Arc<Bundle>> {
        self.read().get(&id).cloned()
    }

    /// The bundle installed from `location`.
    #[must_use]
    pub fn bundle_at(&self, location: &str) -> Option<Arc<Bundle>> {
        self.read()
            .values()
            .find(|b| b.location() == location)
            .cloned()
    }

    /// All bundles in install order, the system bundle first.
    #[must_use]
    pub fn bundles(&self) -> Vec<Arc<Bundle>> {
        self.read().values().cloned().collect()
    }

    fn require(&self, id: ResourceId) -> FrameworkResult<Arc<Bundle>> {
        self.bundle(id).ok_or(FrameworkError::UnknownBundle(id))
    }

    /// The start level the scheduler has reached.
    #[must_use]
    pub fn active_start_level(&self) -> u32 {
        self.active_level.load(Ordering::Acquire)
    }

    pub(crate) fn set_active_start_level(&self, level: u32) {
        self.active_level.store(level, Ordering::Release);
    }

    /// Start level given to bundles installed without one.
    #[must_use]
    pub fn initial_bundle_start_level(&self) -> u32 {
        self.initial_bundle_level.load(Ordering::Acquire)
    }

    pub(crate) fn set_initial_bundle_start_level(&self, level: u32) {
        self.initial_bundle_level.store(level, Ordering::Release);
    }

    /// Resolve one bundle.
    ///
    /// # Errors
    ///
    /// Returns the resolution error; nothing is applied in that case.
    pub async fn resolve(&self, id: ResourceId) -> FrameworkResult<()> {
        let bundle = self.require(id)?;
        if bundle.state() != ResourceState::Installed {
            return Ok(());
        }
        self.plugin
            .resolve_and_apply(std::slice::from_ref(bundle.resource()), &[])
            .await?;
        Ok(())
    }

    /// Start a bundle.
    ///
    /// A bundle whose start level is above the active level is only marked
    /// persistently started. A lazy bundle stops in STARTING until a class
    /// load from one of its lazy packages activates it.
    ///
    /// # Errors
    ///
    /// - [`FrameworkError::FragmentLifecycle`] for fragments.
    /// - [`FrameworkError::InvalidState`] for stopping or uninstalled bundles.
    /// - Resolution errors if the bundle cannot be resolved.
    /// - [`FrameworkError::Activator`] or [`FrameworkError::Timeout`] if the
    ///   activator fails; the bundle is back in RESOLVED.
    pub async fn start(&self, id: ResourceId, options: StartOptions) -> FrameworkResult<()> {
        let bundle = self.require(id)?;
        if bundle.is_fragment() {
            return Err(FrameworkError::FragmentLifecycle(id));
        }
        let _guard = bundle.lock().await;

        match bundle.state() {
            ResourceState::Active => return Ok(()),
            ResourceState::Starting if !options.eager => return Ok(()),
            state @ (ResourceState::Stopping | ResourceState::Uninstalled) => {
                return Err(FrameworkError::InvalidState {
                    bundle: id,
                    state,
                    operation: "start",
                });
            },
            _ => {},
        }

        if !options.transient {
            bundle.set_persistently_started(true);
        }
        if !options.ignore_level && bundle.start_level() > self.active_start_level() {
            debug!(
                bundle = %bundle,
                level = bundle.start_level(),
                active = self.active_start_level(),
                "Start deferred until start level is reached"
            );
            return Ok(());
        }

        if bundle.state() == ResourceState::Installed {
            self.plugin
                .resolve_and_apply(std::slice::from_ref(bundle.resource()), &[])
                .await?;
        }
        if bundle.is_lazy() && !options.eager {
            transition(&self.bus, bundle.resource(), ResourceState::Starting);
            debug!(bundle = %bundle, "Lazy activation pending");
            return Ok(());
        }
        self.activate(&bundle).await
    }

    async fn activate(&self, bundle: &Bundle) -> FrameworkResult<()> {
        transition(&self.bus, bundle.resource(), ResourceState::Starting);
        if let Some(activator) = self.activators.get(bundle.symbolic_name()) {
            let failure =
                match tokio::time::timeout(self.start_timeout, activator.start(bundle)).await {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(FrameworkError::Activator {
                        bundle: bundle.id(),
                        message: e.to_string(),
                    }),
                    Err(_) => Some(FrameworkError::timeout(
                        format!("start of bundle {}", bundle.id()),
                        self.start_timeout,
                    )),
                };
            if let Some(error) = failure {
                transition(&self.bus, bundle.resource(), ResourceState::Resolved);
                return Err(error);
            }
        }
        transition(&self.bus, bundle.resource(), ResourceState::Active);
        info!(bundle = %bundle, "Bundle started");
        Ok(())
    }

    /// Stop a bundle. A non-transient stop clears its persistently-started
    /// flag.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::FragmentLifecycle`] for fragments and the
    /// activator's error; the bundle ends up RESOLVED either way.
    pub async fn stop(&self, id: ResourceId, transient: bool) -> FrameworkResult<()> {
        let bundle = self.require(id)?;
        if bundle.is_fragment() {
            return Err(FrameworkError::FragmentLifecycle(id));
        }
        let _guard = bundle.lock().await;
        if !transient {
            bundle.set_persistently_started(false);
        }

        match bundle.state() {
            ResourceState::Active => {},
            ResourceState::Starting => {
                transition(&self.bus, bundle.resource(), ResourceState::Resolved);
                return Ok(());
            },
            _ => return Ok(()),
        }

        transition(&self.bus, bundle.resource(), ResourceState::Stopping);
        let result = match self.activators.get(bundle.symbolic_name()) {
            None => Ok(()),
            Some(activator) => {
                match tokio::time::timeout(self.start_timeout, activator.stop(&bundle)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(FrameworkError::Activator {
                        bundle: id,
                        message: e.to_string(),
                    }),
                    Err(_) => Err(FrameworkError::timeout(
                        format!("stop of bundle {id}"),
                        self.start_timeout,
                    )),
                }
            },
        };
        transition(&self.bus, bundle.resource(), ResourceState::Resolved);
        info!(bundle = %bundle, "Bundle stopped");
        result
    }

    /// Uninstall a bundle, stopping it first.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::InvalidState`] for the system bundle.
    pub async fn uninstall(&self, id: ResourceId) -> FrameworkResult<()> {
        let bundle = self.require(id)?;
        if bundle.is_system() {
            return Err(FrameworkError::InvalidState {
                bundle: id,
                state: bundle.state(),
                operation: "uninstall",
            });
        }
        if !bundle.is_fragment()
            && let Err(error) = self.stop(id, true).await
        {
            warn!(bundle = %bundle, error = %error, "Stop before uninstall failed");
        }

        let _guard = bundle.lock().await;
        if bundle.is_fragment() {
            self.plugin.detach(bundle.resource()).await;
        }
        self.plugin.uninstall(bundle.resource()).await;
        self.write().remove(&id);
        transition(&self.bus, bundle.resource(), ResourceState::Uninstalled);
        info!(bundle = %bundle, "Bundle uninstalled");
        Ok(())
    }

    /// Find the module serving `path` to `requester`.
    ///
    /// If the provider is a lazy bundle waiting in STARTING and `path` lies
    /// in one of its lazy packages, the bundle is activated first.
    ///
    /// # Errors
    ///
    /// - [`FrameworkError::InvalidState`] if the requester is not resolved.
    /// - [`FrameworkError::Module`] if a mandatory provider is missing.
    /// - Activation errors of the lazily started provider.
    pub async fn load_class(
        &self,
        requester: ResourceId,
        path: &str,
    ) -> FrameworkResult<Option<ModuleIdentifier>> {
        let bundle = self.require(requester)?;
        let Some(module) = bundle.module_identifier() else {
            return Err(FrameworkError::InvalidState {
                bundle: requester,
                state: bundle.state(),
                operation: "load from",
            });
        };
        let loader = self.plugin.modules().loader();
        let Some(provider) = loader.find_provider(&module, path)? else {
            return Ok(None);
        };

        let trigger = loader
            .module(&provider)
            .filter(|unit| unit.triggers_activation(parent_path(path)))
            .and_then(|unit| self.bundle(unit.resource()));
        if let Some(owner) = trigger
            && owner.state() == ResourceState::Starting
        {
            debug!(bundle = %owner, path, "Lazy activation triggered");
            self.start(
                owner.id(),
                StartOptions {
                    transient: true,
                    eager: true,
                    ignore_level: true,
                },
            )
            .await?;
        }
        Ok(Some(provider))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<ResourceId, Arc<Bundle>>> {
        self.bundles.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<ResourceId, Arc<Bundle>>> {
        self.bundles.write().unwrap_or_else(PoisonError::into_inner)
    }
}
