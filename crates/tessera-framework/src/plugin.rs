//! Applying resolutions: fragment attachment, native binding, module
//! composition, state changes and wiring publication.

use std::collections::BTreeMap;
use std::sync::Arc;

use tessera_core::{Namespace, Resource, ResourceId, ResourceState, Wire, WireMap};
use tessera_events::EventBus;
use tessera_modules::{ModuleManager, ModulePlan, NativeCode};
use tessera_resolver::{Environment, ResolutionError, Resolver};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::FrameworkResult;
use crate::notify::transition;

/// Per-bundle result of a lenient resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveOutcome {
    /// Bundles that are resolved afterwards.
    pub resolved: Vec<ResourceId>,
    /// Bundles left unresolved, with the reason.
    pub unresolved: Vec<(ResourceId, String)>,
}

/// Resolves resources and applies the result to the environment.
///
/// Applications are serialized by an async lock; the resolve step itself
/// only reads a snapshot.
#[derive(Debug)]
pub struct ResolverPlugin {
    env: Arc<Environment>,
    resolver: Resolver,
    modules: Arc<ModuleManager>,
    native: NativeCode,
    bus: EventBus,
    apply_lock: Mutex<()>,
}

impl ResolverPlugin {
    /// Create a plugin over `env`.
    #[must_use]
    pub fn new(
        env: Arc<Environment>,
        modules: Arc<ModuleManager>,
        native: NativeCode,
        bus: EventBus,
    ) -> Self {
        Self {
            env,
            resolver: Resolver::new(),
            modules,
            native,
            bus,
            apply_lock: Mutex::new(()),
        }
    }

    /// Use a custom resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// The environment.
    #[must_use]
    pub fn environment(&self) -> &Arc<Environment> {
        &self.env
    }

    /// The module manager.
    #[must_use]
    pub fn modules(&self) -> &Arc<ModuleManager> {
        &self.modules
    }

    /// Resolve and apply one batch.
    ///
    /// Every non-fragment resource of the batch (and every host that gains a
    /// fragment) has its native code bound and its unit composed first. Only
    /// then are fragments attached, bindings stored, units registered, the
    /// wiring published and newly resolved resources moved to RESOLVED.
    ///
    /// # Errors
    ///
    /// Resolution, native binding and composition failures are all returned
    /// before anything is mutated.
    pub async fn resolve_and_apply(
        &self,
        mandatory: &[Arc<Resource>],
        optional: &[Arc<Resource>],
    ) -> FrameworkResult<WireMap> {
        let _guard = self.apply_lock.lock().await;
        let wires = self.resolver.resolve(&self.env, mandatory, optional)?;
        self.apply(&wires)?;
        Ok(wires)
    }

    fn apply(&self, wires: &WireMap) -> FrameworkResult<()> {
        let mut attachments: Vec<(Arc<Resource>, Arc<Resource>)> = Vec::new();
        let mut hosts: BTreeMap<ResourceId, Arc<Resource>> = BTreeMap::new();

        for (id, required) in wires {
            let Some(resource) = self.env.resource(*id) else {
                continue;
            };
            if !resource.is_fragment() {
                hosts.insert(*id, resource);
                continue;
            }
            let host = required
                .iter()
                .find(|w| w.namespace() == &Namespace::Host)
                .and_then(|w| self.env.resource(w.provider()));
            if let Some(host) = host {
                if host.accepts_fragment(&resource) {
                    hosts.insert(host.id(), Arc::clone(&host));
                    attachments.push((resource, host));
                } else {
                    warn!(fragment = %resource, host = %host, "Fragment attachment refused");
                }
            }
        }

        // Work out every host's fragments, native bindings and unit before
        // touching anything; any failure leaves the batch unapplied.
        let mut plans = Vec::with_capacity(hosts.len());
        for host in hosts.values() {
            if host.is_system() && host.module_identifier().is_some() {
                continue;
            }
            let mut fragments: Vec<Arc<Resource>> = host
                .attached_fragments()
                .into_iter()
                .filter_map(|id| self.env.resource(id))
                .collect();
            for (fragment, target) in &attachments {
                if target.id() == host.id() && !fragments.iter().any(|f| f.id() == fragment.id()) {
                    fragments.push(Arc::clone(fragment));
                }
            }
            let native_bindings = if host.is_system() {
                Vec::new()
            } else {
                self.native
                    .resolve_native_code(host, &fragments)
                    .map_err(|e| ResolutionError::NativeBinding {
                        resource: host.id(),
                        message: e.to_string(),
                    })?
            };
            let wires = self.composition_wires(host, &fragments, wires);
            plans.push(ModulePlan {
                resource: Arc::clone(host),
                wires,
                fragments,
                native_bindings,
            });
        }
        let composed = self.modules.compose_batch(&self.env, &plans)?;

        for (fragment, host) in &attachments {
            host.attach_fragment(fragment);
            debug!(fragment = %fragment, host = %host, "Fragment attached");
        }
        for plan in &plans {
            if !plan.resource.is_system() {
                let bindings = plan.native_bindings.clone();
                plan.resource.update_slots(|s| s.native_bindings = bindings);
            }
        }
        self.modules.commit_batch(composed, true);

        let published = self.env.update_wiring(wires);
        for id in &published {
            if let Some(resource) = self.env.resource(*id)
                && resource.state() == ResourceState::Installed
            {
                transition(&self.bus, &resource, ResourceState::Resolved);
            }
        }
        info!(count = published.len(), "Resolution applied");
        Ok(())
    }

    /// The host's wires plus the non-host wires of `fragments`.
    fn composition_wires(
        &self,
        host: &Resource,
        fragments: &[Arc<Resource>],
        batch: &WireMap,
    ) -> Vec<Wire> {
        let wires_of = |id: ResourceId| -> Vec<Wire> {
            batch.get(&id).cloned().unwrap_or_else(|| {
                self.env
                    .wiring(id)
                    .map(|w| w.required_wires().to_vec())
                    .unwrap_or_default()
            })
        };
        let mut wires = wires_of(host.id());
        for fragment in fragments {
            wires.extend(
                wires_of(fragment.id())
                    .into_iter()
                    .filter(|w| w.namespace() != &Namespace::Host),
            );
        }
        wires
    }

    /// Resolve as many of `resources` as possible.
    ///
    /// All unresolved resources are tried as one optional batch. If that
    /// batch fails as a whole (for example on a native binding error), each
    /// resource is retried alone. Unresolved resources are reported with
    /// the reason a mandatory resolution of that resource gives.
    pub async fn resolve_bundles(&self, resources: &[Arc<Resource>]) -> ResolveOutcome {
        let pending: Vec<Arc<Resource>> = resources
            .iter()
            .filter(|r| r.state() == ResourceState::Installed)
            .cloned()
            .collect();

        if !pending.is_empty()
            && let Err(error) = self.resolve_and_apply(&[], &pending).await
        {
            warn!(error = %error, "Batch resolution failed, resolving one by one");
            for resource in &pending {
                if let Err(error) = self
                    .resolve_and_apply(std::slice::from_ref(resource), &[])
                    .await
                {
                    debug!(bundle = %resource, error = %error, "Bundle not resolved");
                }
            }
        }

        let mut outcome = ResolveOutcome::default();
        for resource in resources {
            if resource.state().is_resolved() {
                outcome.resolved.push(resource.id());
            } else {
                outcome
                    .unresolved
                    .push((resource.id(), self.explain(resource)));
            }
        }
        outcome
    }

    fn explain(&self, resource: &Arc<Resource>) -> String {
        match self
            .resolver
            .resolve(&self.env, std::slice::from_ref(resource), &[])
        {
            Err(error) => error.to_string(),
            Ok(_) => "excluded from the batch by a singleton or native binding conflict".into(),
        }
    }

    /// Forget an uninstalled resource: its module and its environment entry.
    ///
    /// Fragments of an uninstalled host lose their host and go back to
    /// INSTALLED, free to attach elsewhere.
    pub async fn uninstall(&self, resource: &Resource) {
        let _guard = self.apply_lock.lock().await;
        if !resource.is_fragment() {
            self.modules.remove_module(resource);
            for fragment in resource
                .attached_fragments()
                .into_iter()
                .filter_map(|id| self.env.resource(id))
            {
                fragment.update_slots(|s| s.host = None);
                self.env.withdraw_wiring(fragment.id());
                if fragment.state() == ResourceState::Resolved {
                    transition(&self.bus, &fragment, ResourceState::Installed);
                }
            }
            resource.update_slots(|s| s.attached_fragments.clear());
        }
        self.env.uninstall(resource.id());
    }

    /// Detach an unresolved fragment from its host. Returns whether it was
    /// attached.
    pub async fn detach(&self, fragment: &Resource) -> bool {
        let _guard = self.apply_lock.lock().await;
        let Some(host) = fragment.host().and_then(|id| self.env.resource(id)) else {
            return false;
        };
        host.detach_fragment(fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{ContentRoot, Deployment, NativeLibrary, ResourceState};
    use tessera_modules::{ModuleLoader, PathFilter, Platform};
    use tessera_test::{
        EventRecorder, ResourceFactory, test_exporter, test_fragment, test_host, test_importer,
        test_singleton,
    };

    struct Fixture {
        plugin: ResolverPlugin,
        factory: ResourceFactory,
        recorder: Arc<EventRecorder>,
    }

    impl Fixture {
        fn new() -> Self {
            let bus = EventBus::new();
            let recorder = EventRecorder::attach(&bus);
            let modules = Arc::new(ModuleManager::new(
                Arc::new(ModuleLoader::new()),
                PathFilter::reject_all(),
            ));
            Self {
                plugin: ResolverPlugin::new(
                    Arc::new(Environment::new()),
                    modules,
                    NativeCode::new(Platform::new("linux", "x86_64")),
                    bus,
                ),
                factory: ResourceFactory::new(),
                recorder,
            }
        }

        fn install(&mut self, deployment: &Deployment) -> Arc<Resource> {
            let resource = self.factory.create(deployment);
            self.plugin
                .environment()
                .install(Arc::clone(&resource))
                .unwrap();
            resource
        }
    }

    #[tokio::test]
    async fn test_apply_resolves_composes_and_publishes() {
        let mut fx = Fixture::new();
        let api = fx.install(&test_exporter("api", "1.0", &["com.acme.api"]));
        let web = fx.install(&test_importer("web", &["com.acme.api"]));

        fx.plugin
            .resolve_and_apply(&[Arc::clone(&web)], &[])
            .await
            .unwrap();

        for resource in [&api, &web] {
            assert_eq!(resource.state(), ResourceState::Resolved);
            assert!(fx.plugin.environment().is_resolved(resource.id()));
            let id = resource.module_identifier().unwrap();
            assert!(fx.plugin.modules().loader().is_loaded(&id));
        }
        assert_eq!(fx.recorder.transitions(web.id()), vec![ResourceState::Resolved]);
    }

    #[tokio::test]
    async fn test_reapply_is_idempotent() {
        let mut fx = Fixture::new();
        let _api = fx.install(&test_exporter("api", "1.0", &["com.acme.api"]));
        let web = fx.install(&test_importer("web", &["com.acme.api"]));

        fx.plugin.resolve_and_apply(&[Arc::clone(&web)], &[]).await.unwrap();
        let id = web.module_identifier().unwrap();
        let first = fx.plugin.modules().loader().module(&id).unwrap();

        fx.plugin.resolve_and_apply(&[Arc::clone(&web)], &[]).await.unwrap();
        let second = fx.plugin.modules().loader().module(&id).unwrap();
        assert_eq!(*first, *second);
        assert_eq!(fx.recorder.transitions(web.id()).len(), 1);
    }

    #[tokio::test]
    async fn test_unresolved_mandatory_mutates_nothing() {
        let mut fx = Fixture::new();
        let web = fx.install(&test_importer("web", &["com.acme.missing"]));

        let err = fx
            .plugin
            .resolve_and_apply(&[Arc::clone(&web)], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, crate::FrameworkError::Resolution(_)));
        assert_eq!(web.state(), ResourceState::Installed);
        assert!(fx.recorder.events().is_empty());
    }

    #[tokio::test]
    async fn test_native_failure_is_all_or_nothing() {
        let mut fx = Fixture::new();
        let api = fx.install(&test_exporter("api", "1.0", &["com.acme.api"]));
        let native = fx.install(
            &test_importer("native", &["com.acme.api"])
                .with_native_library(NativeLibrary::new("lib/libmissing.so")),
        );

        let err = fx
            .plugin
            .resolve_and_apply(&[Arc::clone(&native)], &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::FrameworkError::Resolution(ResolutionError::NativeBinding { .. })
        ));
        assert_eq!(api.state(), ResourceState::Installed);
        assert!(!fx.plugin.environment().is_resolved(api.id()));
        assert!(api.module_identifier().is_none());
    }

    #[tokio::test]
    async fn test_composition_failure_leaves_batch_unapplied() {
        let mut fx = Fixture::new();
        let good = fx.install(&test_exporter("good", "1.0", &["com.acme.good"]));
        let fragment = fx.install(&test_fragment("good.nl", "good"));
        let bad = fx.install(
            &test_host("bad", "1.0")
                .with_export(tessera_core::PackageExport::new("com.acme.bad").with_include("[")),
        );

        let err = fx
            .plugin
            .resolve_and_apply(
                &[Arc::clone(&good), Arc::clone(&fragment), Arc::clone(&bad)],
                &[],
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::FrameworkError::Module(tessera_modules::ModuleError::InvalidPattern { .. })
        ));

        let loader = fx.plugin.modules().loader();
        assert!(loader.module_identifiers().is_empty());
        for resource in [&good, &fragment, &bad] {
            assert_eq!(resource.state(), ResourceState::Installed);
            assert!(!fx.plugin.environment().is_resolved(resource.id()));
            assert!(resource.module_identifier().is_none());
        }
        assert_eq!(fragment.host(), None);
        assert!(good.attached_fragments().is_empty());
        assert!(fx.recorder.events().is_empty());
    }

    #[tokio::test]
    async fn test_uninstalled_host_releases_fragments() {
        let mut fx = Fixture::new();
        let host = fx.install(&test_host("web", "1.0"));
        let fragment = fx.install(&test_fragment("web.nl", "web"));
        fx.plugin
            .resolve_and_apply(&[Arc::clone(&host), Arc::clone(&fragment)], &[])
            .await
            .unwrap();
        assert_eq!(fragment.state(), ResourceState::Resolved);

        fx.plugin.uninstall(&host).await;
        assert_eq!(fragment.host(), None);
        assert_eq!(fragment.state(), ResourceState::Installed);
        assert!(!fx.plugin.environment().is_resolved(fragment.id()));

        let replacement = fx.install(&test_host("web", "1.0"));
        fx.plugin
            .resolve_and_apply(&[Arc::clone(&replacement), Arc::clone(&fragment)], &[])
            .await
            .unwrap();
        assert_eq!(fragment.host(), Some(replacement.id()));
    }

    #[tokio::test]
    async fn test_native_binding_stored() {
        let mut fx = Fixture::new();
        let native = fx.install(
            &test_host("native", "1.0")
                .with_native_library(NativeLibrary::new("lib/libacme.so"))
                .with_content(ContentRoot::new("main", ["lib/libacme.so"])),
        );
        fx.plugin.resolve_and_apply(&[Arc::clone(&native)], &[]).await.unwrap();

        let unit = fx
            .plugin
            .modules()
            .loader()
            .module(&native.module_identifier().unwrap())
            .unwrap();
        assert!(unit.native_library("acme").is_some());
        assert_eq!(native.slots().native_bindings.len(), 1);
    }

    #[tokio::test]
    async fn test_fragment_attaches_to_resolved_host() {
        let mut fx = Fixture::new();
        let host = fx.install(&test_host("web", "1.0"));
        fx.plugin.resolve_and_apply(&[Arc::clone(&host)], &[]).await.unwrap();

        let fragment = fx.install(&test_fragment("web.nl", "web"));
        fx.plugin
            .resolve_and_apply(&[Arc::clone(&fragment)], &[])
            .await
            .unwrap();

        assert_eq!(fragment.state(), ResourceState::Resolved);
        assert_eq!(fragment.host(), Some(host.id()));
        assert_eq!(host.attached_fragments(), vec![fragment.id()]);
        let unit = fx
            .plugin
            .modules()
            .loader()
            .module(&host.module_identifier().unwrap())
            .unwrap();
        assert!(unit.contains("web/nl/Extra.class"));
    }

    #[tokio::test]
    async fn test_resolve_bundles_reports_each_outcome() {
        let mut fx = Fixture::new();
        let good = fx.install(&test_host("good", "1.0"));
        let bad = fx.install(&test_importer("bad", &["com.acme.missing"]));
        let first = fx.install(&test_singleton("single", "1.0"));
        let second = fx.install(&test_singleton("single", "2.0"));

        let outcome = fx
            .plugin
            .resolve_bundles(&[
                Arc::clone(&good),
                Arc::clone(&bad),
                Arc::clone(&first),
                Arc::clone(&second),
            ])
            .await;

        assert_eq!(outcome.resolved, vec![good.id(), first.id()]);
        let unresolved: Vec<ResourceId> = outcome.unresolved.iter().map(|(id, _)| *id).collect();
        assert_eq!(unresolved, vec![bad.id(), second.id()]);
        assert!(outcome.unresolved[0].1.contains("com.acme.missing"));
    }

    #[tokio::test]
    async fn test_detach_and_uninstall() {
        let mut fx = Fixture::new();
        let host = fx.install(&test_host("web", "1.0"));
        let fragment = fx.install(&test_fragment("web.nl", "web"));
        host.attach_fragment(&fragment);

        assert!(fx.plugin.detach(&fragment).await);
        assert!(host.attached_fragments().is_empty());
        assert!(!fx.plugin.detach(&fragment).await);

        fx.plugin.resolve_and_apply(&[Arc::clone(&host)], &[]).await.unwrap();
        let id = host.module_identifier().unwrap();
        fx.plugin.uninstall(&host).await;
        assert!(fx.plugin.environment().resource(host.id()).is_none());
        assert!(fx.plugin.modules().loader().module(&id).is_none());
    }
}
