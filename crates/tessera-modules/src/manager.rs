//! Module graph composition.
//!
//! [`ModuleManager::compose_batch`] turns resolved resources and their wires
//! into [`LoadUnit`]s without touching any shared state.
//! [`ModuleManager::commit_batch`] then registers them with the
//! [`ModuleLoader`]. Edges are laid out in lookup order: the system edge, one
//! edge per distinct provider in wire order, then the local edge.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use tessera_core::{
    ActivationPolicy, ModuleIdentifier, Namespace, NativeBinding, Resource, ResourceId,
    SYSTEM_RESOURCE_ID, Wire,
};
use tessera_resolver::Environment;
use tracing::{debug, info, warn};

use crate::error::{ModuleError, ModuleResult};
use crate::filter::{PathFilter, package_path};
use crate::loader::ModuleLoader;
use crate::unit::{DependencySpec, LoadUnit};

/// Name prefix of every module composed from a resource.
pub const MODULE_PREFIX: &str = "tessera";

/// Module name of the framework unit.
pub const FRAMEWORK_MODULE: &str = "tessera.framework";

/// Slot of the framework unit.
pub const FRAMEWORK_SLOT: &str = "main";

/// Dependencies collected for one provider while walking the wires.
#[derive(Debug)]
struct Holder {
    provider: ResourceId,
    package_paths: BTreeSet<String>,
    packages_optional: bool,
    bundle: Option<BundleEdge>,
}

#[derive(Debug, Clone, Copy)]
struct BundleEdge {
    reexport: bool,
    optional: bool,
}

impl Holder {
    fn new(provider: ResourceId) -> Self {
        Self {
            provider,
            package_paths: BTreeSet::new(),
            packages_optional: true,
            bundle: None,
        }
    }
}

/// Everything a resource's unit is composed from.
///
/// `fragments` and `native_bindings` describe the host as it will be once
/// the batch is applied, which may differ from what its slots hold now.
#[derive(Debug, Clone)]
pub struct ModulePlan {
    /// The host, or the system resource.
    pub resource: Arc<Resource>,
    /// Host wires plus the non-host wires of its fragments.
    pub wires: Vec<Wire>,
    /// Fragments attached to the host after the batch.
    pub fragments: Vec<Arc<Resource>>,
    /// Native libraries bound for the host after the batch.
    pub native_bindings: Vec<NativeBinding>,
}

impl ModulePlan {
    /// Plan built from the resource's current fragments and bindings.
    #[must_use]
    pub fn current(env: &Environment, resource: &Arc<Resource>, wires: Vec<Wire>) -> Self {
        Self {
            resource: Arc::clone(resource),
            wires,
            fragments: resource
                .attached_fragments()
                .into_iter()
                .filter_map(|id| env.resource(id))
                .collect(),
            native_bindings: resource.slots().native_bindings,
        }
    }
}

/// Units composed for one batch, not yet visible to the loader.
#[derive(Debug, Default)]
pub struct ComposedBatch {
    units: Vec<(Arc<Resource>, LoadUnit)>,
}

impl ComposedBatch {
    /// Number of composed units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether nothing was composed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    fn staged(&self, id: &ModuleIdentifier) -> Option<&LoadUnit> {
        self.units
            .iter()
            .map(|(_, unit)| unit)
            .find(|unit| unit.identifier() == id)
    }
}

/// Composes load units and owns the module loader.
#[derive(Debug)]
pub struct ModuleManager {
    loader: Arc<ModuleLoader>,
    boot_delegation: PathFilter,
    framework_created: Mutex<bool>,
}

impl ModuleManager {
    /// Create a manager delegating `boot_delegation` paths to the framework.
    #[must_use]
    pub fn new(loader: Arc<ModuleLoader>, boot_delegation: PathFilter) -> Self {
        Self {
            loader,
            boot_delegation,
            framework_created: Mutex::new(false),
        }
    }

    /// The module loader.
    #[must_use]
    pub fn loader(&self) -> &Arc<ModuleLoader> {
        &self.loader
    }

    /// The identifier of the module composed for `resource`.
    ///
    /// The identifier is derived once and cached in the resource's slots:
    /// `tessera.<symbolic-name>` with slot `<version>-rev<revision>`. The
    /// system resource maps to the framework module.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::FragmentNotModule`] for fragments.
    pub fn module_identifier(&self, resource: &Resource) -> ModuleResult<ModuleIdentifier> {
        let id = derive_identifier(resource)?;
        if resource.module_identifier().is_none() {
            resource.update_slots(|s| s.module_identifier = Some(id.clone()));
        }
        Ok(id)
    }

    /// Compose and register the load unit of `resource` from its `wires`,
    /// using the fragments and native bindings the resource holds now.
    ///
    /// # Errors
    ///
    /// See [`ModuleManager::compose_batch`].
    pub fn add_module(
        &self,
        env: &Environment,
        resource: &Arc<Resource>,
        wires: &[Wire],
    ) -> ModuleResult<ModuleIdentifier> {
        let identifier = derive_identifier(resource)?;
        let plan = ModulePlan::current(env, resource, wires.to_vec());
        let batch = self.compose_batch(env, std::slice::from_ref(&plan))?;
        self.commit_batch(batch, false);
        Ok(identifier)
    }

    /// Compose a unit for every plan, in order.
    ///
    /// Nothing is registered and no resource is touched, so a failure leaves
    /// the loader exactly as it was. A plan may re-export from a provider
    /// composed earlier in the same batch.
    ///
    /// # Errors
    ///
    /// - [`ModuleError::FragmentNotModule`] for fragments.
    /// - [`ModuleError::FrameworkModuleExists`] when the system resource is
    ///   composed a second time.
    /// - [`ModuleError::UnknownProvider`] if a wire names a resource the
    ///   environment no longer holds.
    /// - [`ModuleError::InvalidPattern`] if an include/exclude directive does
    ///   not compile.
    pub fn compose_batch(
        &self,
        env: &Environment,
        plans: &[ModulePlan],
    ) -> ModuleResult<ComposedBatch> {
        let mut batch = ComposedBatch::default();
        for plan in plans {
            let resource = &plan.resource;
            let identifier = derive_identifier(resource)?;
            let unit = if resource.is_system() {
                if self.framework_exists() {
                    return Err(ModuleError::FrameworkModuleExists);
                }
                LoadUnit::framework(identifier, exported_paths(resource))
            } else {
                self.compose(env, plan, identifier, &batch)?
            };
            batch.units.push((Arc::clone(resource), unit));
        }
        Ok(batch)
    }

    /// Register every unit of `batch` and record its identifier on its
    /// resource. Non-framework units are also marked loaded when `load` is
    /// set. Returns the identifiers in batch order.
    pub fn commit_batch(&self, batch: ComposedBatch, load: bool) -> Vec<ModuleIdentifier> {
        let mut committed = Vec::with_capacity(batch.len());
        for (resource, unit) in batch.units {
            let identifier = unit.identifier().clone();
            resource.update_slots(|s| s.module_identifier = Some(identifier.clone()));
            if unit.is_framework() {
                *self
                    .framework_created
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = true;
                info!(module = %identifier, "Framework module created");
                self.loader.create_module(unit);
            } else {
                debug!(
                    module = %identifier,
                    dependencies = unit.dependencies().len(),
                    roots = unit.roots().len(),
                    "Module composed"
                );
                self.loader.create_module(unit);
                if load && self.loader.load_module(&identifier).is_err() {
                    warn!(module = %identifier, "Module vanished before loading");
                }
            }
            committed.push(identifier);
        }
        committed
    }

    /// Remove the module of `resource` from the loader.
    pub fn remove_module(&self, resource: &Resource) -> Option<Arc<LoadUnit>> {
        let id = resource.module_identifier()?;
        self.loader.remove_module(&id)
    }

    fn framework_exists(&self) -> bool {
        *self
            .framework_created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn compose(
        &self,
        env: &Environment,
        plan: &ModulePlan,
        identifier: ModuleIdentifier,
        staged: &ComposedBatch,
    ) -> ModuleResult<LoadUnit> {
        let resource = &plan.resource;
        let mut holders: Vec<Holder> = Vec::new();
        let mut imported_paths = BTreeSet::new();
        let mut system_paths = BTreeSet::new();

        for wire in &plan.wires {
            let provider = wire.provider();
            if provider == resource.id() || wire.namespace() == &Namespace::Host {
                continue;
            }
            match wire.namespace() {
                Namespace::Package => {
                    let Some(package) = wire.capability().package_name() else {
                        continue;
                    };
                    let path = package_path(package);
                    imported_paths.insert(path.clone());
                    if provider == SYSTEM_RESOURCE_ID {
                        system_paths.insert(path);
                        continue;
                    }
                    let holder = holder_for(&mut holders, provider);
                    holder.package_paths.insert(path);
                    holder.packages_optional &= wire.requirement().is_optional();
                },
                Namespace::Bundle => {
                    if provider == SYSTEM_RESOURCE_ID {
                        system_paths.insert("*".to_string());
                        continue;
                    }
                    let requirement = wire.requirement();
                    holder_for(&mut holders, provider).bundle = Some(BundleEdge {
                        reexport: requirement.is_reexport(),
                        optional: requirement.is_optional(),
                    });
                },
                _ => {},
            }
        }

        let mut unit = LoadUnit::new(identifier, resource.id());
        unit.push_dependency(self.system_dependency(system_paths));

        for holder in holders {
            let provider = env
                .resource(holder.provider)
                .ok_or(ModuleError::UnknownProvider(holder.provider))?;
            let provider_id = derive_identifier(&provider)?;

            if !holder.package_paths.is_empty() {
                if holder.bundle.is_some() {
                    debug!(
                        provider = %provider_id,
                        "Whole-unit wire shadowed by package wires to the same provider"
                    );
                }
                unit.push_dependency(DependencySpec::Module {
                    provider: provider_id,
                    import: PathFilter::In(holder.package_paths),
                    export: PathFilter::reject_all(),
                    optional: holder.packages_optional,
                });
                continue;
            }
            let Some(bundle) = holder.bundle else {
                continue;
            };
            let dependency = if bundle.reexport {
                let exported: BTreeSet<String> = self
                    .visible_exports(&provider, &provider_id, staged)
                    .difference(&imported_paths)
                    .cloned()
                    .collect();
                DependencySpec::Module {
                    provider: provider_id,
                    import: PathFilter::In(exported.clone()),
                    export: PathFilter::In(exported),
                    optional: bundle.optional,
                }
            } else {
                DependencySpec::Module {
                    provider: provider_id,
                    import: not_imported(&imported_paths),
                    export: PathFilter::reject_all(),
                    optional: bundle.optional,
                }
            };
            unit.push_dependency(dependency);
        }

        unit.push_dependency(DependencySpec::Local {
            import: not_imported(&imported_paths),
            export: class_filter(resource)?,
        });

        for root in resource.content_roots() {
            unit.push_root(resource.id(), root.clone());
        }
        for fragment in &plan.fragments {
            for root in fragment.content_roots() {
                unit.push_root(fragment.id(), root.clone());
            }
        }

        let mut exported = exported_paths(resource);
        for fragment in &plan.fragments {
            exported.extend(exported_paths(fragment));
        }
        unit.set_exported_paths(exported);

        for binding in plan.native_bindings.iter().cloned() {
            if let Some(alias) = binding.name.strip_prefix("lib").filter(|a| !a.is_empty()) {
                unit.bind_native(alias.to_owned(), binding.clone());
            }
            unit.bind_native(binding.name.clone(), binding);
        }

        unit.set_lazy_filter(
            resource
                .activation_policy()
                .map(lazy_filter)
                .transpose()?,
        );
        Ok(unit)
    }

    fn system_dependency(&self, system_paths: BTreeSet<String>) -> DependencySpec {
        let import = if system_paths.contains("*") {
            PathFilter::accept_all()
        } else if system_paths.is_empty() {
            self.boot_delegation.clone()
        } else {
            PathFilter::any(vec![self.boot_delegation.clone(), PathFilter::In(system_paths)])
        };
        DependencySpec::System { import }
    }

    /// Package paths a consumer of `provider` can see: its own exports plus
    /// whatever its composed unit re-exports.
    fn visible_exports(
        &self,
        provider: &Resource,
        id: &ModuleIdentifier,
        staged: &ComposedBatch,
    ) -> BTreeSet<String> {
        let mut paths = exported_paths(provider);
        let registered = self.loader.module(id);
        if let Some(unit) = staged.staged(id).or(registered.as_deref()) {
            paths.extend(unit.exported_paths().iter().cloned());
            for dependency in unit.dependencies() {
                if let DependencySpec::Module {
                    export: PathFilter::In(reexported),
                    ..
                } = dependency
                {
                    paths.extend(reexported.iter().cloned());
                }
            }
        }
        paths
    }
}

/// `tessera.<symbolic-name>` with slot `<version>-rev<revision>`, or the
/// framework identifier for the system resource. Prefers the cached value.
fn derive_identifier(resource: &Resource) -> ModuleResult<ModuleIdentifier> {
    if resource.is_fragment() {
        return Err(ModuleError::FragmentNotModule(resource.id()));
    }
    if let Some(id) = resource.module_identifier() {
        return Ok(id);
    }
    if resource.is_system() {
        return Ok(ModuleIdentifier::new(FRAMEWORK_MODULE, FRAMEWORK_SLOT));
    }
    let identity = resource.identity();
    Ok(ModuleIdentifier::new(
        format!("{MODULE_PREFIX}.{}", identity.symbolic_name),
        format!("{}-rev{}", identity.version, identity.revision),
    ))
}

fn exported_paths(resource: &Resource) -> BTreeSet<String> {
    resource
        .capabilities_in(&Namespace::Package)
        .filter_map(|c| c.package_name())
        .map(package_path)
        .collect()
}

fn holder_for(holders: &mut Vec<Holder>, provider: ResourceId) -> &mut Holder {
    let index = match holders.iter().position(|h| h.provider == provider) {
        Some(index) => index,
        None => {
            holders.push(Holder::new(provider));
            holders.len().saturating_sub(1)
        },
    };
    &mut holders[index]
}

fn not_imported(imported: &BTreeSet<String>) -> PathFilter {
    if imported.is_empty() {
        PathFilter::accept_all()
    } else {
        PathFilter::not(PathFilter::In(imported.clone()))
    }
}

/// Entry-path filter built from the include/exclude directives of the
/// exported packages. Packages without directives export every class.
fn class_filter(resource: &Resource) -> ModuleResult<PathFilter> {
    let mut per_package = Vec::new();
    for capability in resource.capabilities_in(&Namespace::Package) {
        let include = capability.include_patterns();
        let exclude = capability.exclude_patterns();
        if include.is_none() && exclude.is_none() {
            continue;
        }
        let Some(package) = capability.package_name() else {
            continue;
        };
        let dir = package_path(package);
        let classes = |patterns: Vec<&str>| -> ModuleResult<PathFilter> {
            let globs = patterns
                .into_iter()
                .map(|p| PathFilter::glob(format!("{dir}/{p}.class")))
                .collect::<ModuleResult<Vec<_>>>()?;
            Ok(PathFilter::any(globs))
        };

        let mut rules = Vec::new();
        if let Some(include) = include {
            rules.push(classes(include)?);
        }
        if let Some(exclude) = exclude {
            rules.push(PathFilter::not(classes(exclude)?));
        }
        let outside = PathFilter::not(PathFilter::glob(format!("{dir}/*"))?);
        per_package.push(PathFilter::any(vec![outside, PathFilter::all(rules)]));
    }
    Ok(PathFilter::all(per_package))
}

/// Packages whose first class load activates a lazy unit.
fn lazy_filter(policy: &ActivationPolicy) -> ModuleResult<PathFilter> {
    let included = match &policy.include {
        Some(include) => PathFilter::packages(include)?,
        None => PathFilter::accept_all(),
    };
    if policy.exclude.is_empty() {
        return Ok(included);
    }
    let excluded = PathFilter::packages(&policy.exclude)?;
    Ok(PathFilter::all(vec![included, PathFilter::not(excluded)]))
}

/// Provider edges of `unit` keyed by provider, for inspection.
#[must_use]
pub fn edges_by_provider(unit: &LoadUnit) -> BTreeMap<ModuleIdentifier, &DependencySpec> {
    unit.dependencies()
        .iter()
        .filter_map(|d| d.provider().map(|p| (p.clone(), d)))
        .collect()
}
