//! Registry of created modules and class visibility queries.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use tessera_core::ModuleIdentifier;
use tracing::{debug, trace};

use crate::error::{ModuleError, ModuleResult};
use crate::filter::parent_path;
use crate::unit::{DependencySpec, LoadUnit};

#[derive(Debug)]
struct Entry {
    unit: Arc<LoadUnit>,
    loaded: bool,
}

#[derive(Debug, Default)]
struct Modules {
    entries: BTreeMap<ModuleIdentifier, Entry>,
    framework: Option<ModuleIdentifier>,
}

/// Holds every created module and answers "who provides this path".
#[derive(Debug, Default)]
pub struct ModuleLoader {
    modules: RwLock<Modules>,
}

impl ModuleLoader {
    /// Create an empty loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a load unit, replacing any unit with the same identifier.
    ///
    /// A replaced unit keeps its loaded flag.
    pub fn create_module(&self, unit: LoadUnit) -> Arc<LoadUnit> {
        let unit = Arc::new(unit);
        let id = unit.identifier().clone();
        let mut modules = self.write();
        if unit.is_framework() {
            modules.framework = Some(id.clone());
        }
        let loaded = modules.entries.get(&id).is_some_and(|e| e.loaded);
        modules.entries.insert(
            id.clone(),
            Entry {
                unit: Arc::clone(&unit),
                loaded,
            },
        );
        debug!(module = %id, "Module created");
        unit
    }

    /// Mark a module loaded and return its unit.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::ModuleNotFound`] for an unknown identifier.
    pub fn load_module(&self, id: &ModuleIdentifier) -> ModuleResult<Arc<LoadUnit>> {
        let mut modules = self.write();
        let entry = modules
            .entries
            .get_mut(id)
            .ok_or_else(|| ModuleError::ModuleNotFound(id.clone()))?;
        if !entry.loaded {
            entry.loaded = true;
            debug!(module = %id, "Module loaded");
        }
        Ok(Arc::clone(&entry.unit))
    }

    /// Remove a module.
    pub fn remove_module(&self, id: &ModuleIdentifier) -> Option<Arc<LoadUnit>> {
        let mut modules = self.write();
        if modules.framework.as_ref() == Some(id) {
            modules.framework = None;
        }
        let removed = modules.entries.remove(id).map(|e| e.unit);
        if removed.is_some() {
            debug!(module = %id, "Module removed");
        }
        removed
    }

    /// The unit registered under `id`.
    #[must_use]
    pub fn module(&self, id: &ModuleIdentifier) -> Option<Arc<LoadUnit>> {
        self.read().entries.get(id).map(|e| Arc::clone(&e.unit))
    }

    /// Whether `id` has been loaded.
    #[must_use]
    pub fn is_loaded(&self, id: &ModuleIdentifier) -> bool {
        self.read().entries.get(id).is_some_and(|e| e.loaded)
    }

    /// Identifiers of every registered module.
    #[must_use]
    pub fn module_identifiers(&self) -> Vec<ModuleIdentifier> {
        self.read().entries.keys().cloned().collect()
    }

    /// Identifier of the framework module, once created.
    #[must_use]
    pub fn framework_identifier(&self) -> Option<ModuleIdentifier> {
        self.read().framework.clone()
    }

    /// Find the module that serves `path` to `module`.
    ///
    /// Edges are consulted in order. A module edge whose import filter
    /// accepts the path's directory searches the provider's exports and,
    /// through edges the provider re-exports, further down. The local edge
    /// serves paths from the unit's own content roots.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::ModuleNotFound`] if `module` or a mandatory
    /// provider on the lookup path is not registered.
    pub fn find_provider(
        &self,
        module: &ModuleIdentifier,
        path: &str,
    ) -> ModuleResult<Option<ModuleIdentifier>> {
        let modules = self.read();
        let unit = &modules
            .entries
            .get(module)
            .ok_or_else(|| ModuleError::ModuleNotFound(module.clone()))?
            .unit;
        let dir = parent_path(path);

        for dependency in unit.dependencies() {
            match dependency {
                DependencySpec::System { import } => {
                    if !import.accepts(dir) {
                        continue;
                    }
                    let framework = modules
                        .framework
                        .as_ref()
                        .and_then(|id| modules.entries.get(id));
                    if let Some(framework) = framework
                        && framework.unit.contains(path)
                    {
                        return Ok(Some(framework.unit.identifier().clone()));
                    }
                },
                DependencySpec::Module {
                    provider,
                    import,
                    optional,
                    ..
                } => {
                    if !import.accepts(dir) {
                        continue;
                    }
                    let Some(entry) = modules.entries.get(provider) else {
                        if *optional {
                            continue;
                        }
                        return Err(ModuleError::ModuleNotFound(provider.clone()));
                    };
                    let mut visited = BTreeSet::from([module.clone()]);
                    if let Some(found) = exported_by(&modules, &entry.unit, path, &mut visited) {
                        trace!(module = %module, path, provider = %found, "Path resolved");
                        return Ok(Some(found));
                    }
                },
                DependencySpec::Local { import, .. } => {
                    if import.accepts(dir) && unit.contains(path) {
                        return Ok(Some(module.clone()));
                    }
                },
            }
        }
        Ok(None)
    }

    fn read(&self) -> RwLockReadGuard<'_, Modules> {
        self.modules.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Modules> {
        self.modules.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Search `unit`'s exports, then what it re-exports.
fn exported_by(
    modules: &Modules,
    unit: &LoadUnit,
    path: &str,
    visited: &mut BTreeSet<ModuleIdentifier>,
) -> Option<ModuleIdentifier> {
    if !visited.insert(unit.identifier().clone()) {
        return None;
    }
    if unit.exports(path) {
        return Some(unit.identifier().clone());
    }
    let dir = parent_path(path);
    for dependency in unit.dependencies() {
        let DependencySpec::Module {
            provider, export, ..
        } = dependency
        else {
            continue;
        };
        if !export.accepts(dir) {
            continue;
        }
        if let Some(entry) = modules.entries.get(provider)
            && let Some(found) = exported_by(modules, &entry.unit, path, visited)
        {
            return Some(found);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::PathFilter;
    use tessera_core::{ContentRoot, ResourceId};

    fn id(name: &str) -> ModuleIdentifier {
        ModuleIdentifier::new(name, "1.0.0-rev0")
    }

    fn exporter(name: &str, package: &str) -> LoadUnit {
        let mut unit = LoadUnit::new(id(name), ResourceId::new(1));
        unit.push_dependency(DependencySpec::Local {
            import: PathFilter::accept_all(),
            export: PathFilter::accept_all(),
        });
        unit.push_root(
            ResourceId::new(1),
            ContentRoot::new("main", [format!("{package}/Api.class")]),
        );
        unit.set_exported_paths(BTreeSet::from([package.to_string()]));
        unit
    }

    fn edge(provider: &str, import: PathFilter, export: PathFilter) -> DependencySpec {
        DependencySpec::Module {
            provider: id(provider),
            import,
            export,
            optional: false,
        }
    }

    #[test]
    fn test_create_load_remove() {
        let loader = ModuleLoader::new();
        loader.create_module(exporter("tessera.api", "com/acme/api"));
        let api = id("tessera.api");

        assert!(!loader.is_loaded(&api));
        loader.load_module(&api).unwrap();
        assert!(loader.is_loaded(&api));

        // Replacing keeps the loaded flag.
        loader.create_module(exporter("tessera.api", "com/acme/api"));
        assert!(loader.is_loaded(&api));

        assert_eq!(loader.module_identifiers(), vec![api.clone()]);
        assert!(loader.remove_module(&api).is_some());
        assert!(matches!(
            loader.load_module(&api),
            Err(ModuleError::ModuleNotFound(_))
        ));
    }

    #[test]
    fn test_find_provider_through_import() {
        let loader = ModuleLoader::new();
        loader.create_module(exporter("tessera.api", "com/acme/api"));

        let mut web = LoadUnit::new(id("tessera.web"), ResourceId::new(2));
        web.push_dependency(edge(
            "tessera.api",
            PathFilter::in_set(["com/acme/api"]),
            PathFilter::reject_all(),
        ));
        web.push_dependency(DependencySpec::Local {
            import: PathFilter::not(PathFilter::in_set(["com/acme/api"])),
            export: PathFilter::accept_all(),
        });
        web.push_root(
            ResourceId::new(2),
            ContentRoot::new("main", ["com/acme/web/Web.class", "com/acme/api/Api.class"]),
        );
        loader.create_module(web);

        let web = id("tessera.web");
        assert_eq!(
            loader.find_provider(&web, "com/acme/api/Api.class").unwrap(),
            Some(id("tessera.api"))
        );
        assert_eq!(
            loader.find_provider(&web, "com/acme/web/Web.class").unwrap(),
            Some(web.clone())
        );
        assert_eq!(loader.find_provider(&web, "org/none/X.class").unwrap(), None);
    }

    #[test]
    fn test_reexport_propagates() {
        let loader = ModuleLoader::new();
        loader.create_module(exporter("tessera.api", "com/acme/api"));

        let mut facade = LoadUnit::new(id("tessera.facade"), ResourceId::new(2));
        let reexported = PathFilter::in_set(["com/acme/api"]);
        facade.push_dependency(edge("tessera.api", reexported.clone(), reexported));
        loader.create_module(facade);

        let mut client = LoadUnit::new(id("tessera.client"), ResourceId::new(3));
        client.push_dependency(edge(
            "tessera.facade",
            PathFilter::accept_all(),
            PathFilter::reject_all(),
        ));
        loader.create_module(client);

        assert_eq!(
            loader
                .find_provider(&id("tessera.client"), "com/acme/api/Api.class")
                .unwrap(),
            Some(id("tessera.api"))
        );
    }

    #[test]
    fn test_cycle_guard() {
        let loader = ModuleLoader::new();
        let mut a = LoadUnit::new(id("tessera.a"), ResourceId::new(1));
        a.push_dependency(edge("tessera.b", PathFilter::accept_all(), PathFilter::accept_all()));
        let mut b = LoadUnit::new(id("tessera.b"), ResourceId::new(2));
        b.push_dependency(edge("tessera.a", PathFilter::accept_all(), PathFilter::accept_all()));
        loader.create_module(a);
        loader.create_module(b);

        assert_eq!(
            loader
                .find_provider(&id("tessera.a"), "com/acme/X.class")
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_missing_provider() {
        let loader = ModuleLoader::new();
        let mut a = LoadUnit::new(id("tessera.a"), ResourceId::new(1));
        a.push_dependency(DependencySpec::Module {
            provider: id("tessera.optional"),
            import: PathFilter::accept_all(),
            export: PathFilter::reject_all(),
            optional: true,
        });
        a.push_dependency(edge("tessera.gone", PathFilter::accept_all(), PathFilter::reject_all()));
        loader.create_module(a);

        assert!(matches!(
            loader.find_provider(&id("tessera.a"), "com/acme/X.class"),
            Err(ModuleError::ModuleNotFound(missing)) if missing == id("tessera.gone")
        ));
    }

    #[test]
    fn test_system_edge_uses_framework() {
        let loader = ModuleLoader::new();
        let framework = ModuleIdentifier::new("tessera.framework", "main");
        loader.create_module(LoadUnit::framework(
            framework.clone(),
            BTreeSet::from(["org/tessera/api".to_string()]),
        ));
        let mut a = LoadUnit::new(id("tessera.a"), ResourceId::new(1));
        a.push_dependency(DependencySpec::System {
            import: PathFilter::in_set(["org/tessera/api"]),
        });
        loader.create_module(a);

        assert_eq!(loader.framework_identifier(), Some(framework.clone()));
        assert_eq!(
            loader
                .find_provider(&id("tessera.a"), "org/tessera/api/Bundle.class")
                .unwrap(),
            Some(framework)
        );
    }
}
