//! Composed load units and their dependency edges.

use std::collections::{BTreeMap, BTreeSet};

use tessera_core::{ContentRoot, ModuleIdentifier, NativeBinding, ResourceId};

use crate::filter::{PathFilter, parent_path};

/// One dependency edge of a load unit, in lookup order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencySpec {
    /// The framework module. Always the first edge.
    System {
        /// Directory paths delegated to the framework.
        import: PathFilter,
    },
    /// Another module.
    Module {
        /// Identifier of the providing module.
        provider: ModuleIdentifier,
        /// Directory paths taken from the provider.
        import: PathFilter,
        /// Directory paths passed on to consumers of this unit.
        export: PathFilter,
        /// Whether a missing provider is tolerated.
        optional: bool,
    },
    /// The unit's own content.
    Local {
        /// Directory paths served from local content.
        import: PathFilter,
        /// Entry paths visible to other units.
        export: PathFilter,
    },
}

impl DependencySpec {
    /// The provider of a module edge.
    #[must_use]
    pub fn provider(&self) -> Option<&ModuleIdentifier> {
        match self {
            Self::Module { provider, .. } => Some(provider),
            Self::System { .. } | Self::Local { .. } => None,
        }
    }

    /// The import filter of the edge.
    #[must_use]
    pub fn import(&self) -> &PathFilter {
        match self {
            Self::System { import } | Self::Module { import, .. } | Self::Local { import, .. } => {
                import
            },
        }
    }
}

/// A content root contributed to a unit, with the resource owning it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitRoot {
    /// The host itself or an attached fragment.
    pub owner: ResourceId,
    /// The root.
    pub root: ContentRoot,
}

/// The executable dependency description of one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadUnit {
    identifier: ModuleIdentifier,
    resource: ResourceId,
    framework: bool,
    dependencies: Vec<DependencySpec>,
    roots: Vec<UnitRoot>,
    exported_paths: BTreeSet<String>,
    native_libraries: BTreeMap<String, NativeBinding>,
    lazy_filter: Option<PathFilter>,
}

impl LoadUnit {
    pub(crate) fn new(identifier: ModuleIdentifier, resource: ResourceId) -> Self {
        Self {
            identifier,
            resource,
            framework: false,
            dependencies: Vec::new(),
            roots: Vec::new(),
            exported_paths: BTreeSet::new(),
            native_libraries: BTreeMap::new(),
            lazy_filter: None,
        }
    }

    /// The framework unit: serves the given package paths from the host
    /// process.
    pub(crate) fn framework(identifier: ModuleIdentifier, exported: BTreeSet<String>) -> Self {
        let mut unit = Self::new(identifier, tessera_core::SYSTEM_RESOURCE_ID);
        unit.framework = true;
        unit.exported_paths = exported;
        unit.dependencies.push(DependencySpec::Local {
            import: PathFilter::accept_all(),
            export: PathFilter::accept_all(),
        });
        unit
    }

    pub(crate) fn push_dependency(&mut self, dependency: DependencySpec) {
        self.dependencies.push(dependency);
    }

    pub(crate) fn push_root(&mut self, owner: ResourceId, root: ContentRoot) {
        self.roots.push(UnitRoot { owner, root });
    }

    pub(crate) fn set_exported_paths(&mut self, paths: BTreeSet<String>) {
        self.exported_paths = paths;
    }

    pub(crate) fn bind_native(&mut self, name: String, binding: NativeBinding) {
        self.native_libraries.insert(name, binding);
    }

    pub(crate) fn set_lazy_filter(&mut self, filter: Option<PathFilter>) {
        self.lazy_filter = filter;
    }

    /// Module identifier.
    #[must_use]
    pub fn identifier(&self) -> &ModuleIdentifier {
        &self.identifier
    }

    /// The resource this unit was composed from.
    #[must_use]
    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    /// Whether this is the framework unit.
    #[must_use]
    pub fn is_framework(&self) -> bool {
        self.framework
    }

    /// Dependency edges in lookup order.
    #[must_use]
    pub fn dependencies(&self) -> &[DependencySpec] {
        &self.dependencies
    }

    /// Providers of the module edges, in edge order.
    pub fn providers(&self) -> impl Iterator<Item = &ModuleIdentifier> {
        self.dependencies.iter().filter_map(DependencySpec::provider)
    }

    /// The module edge to `provider`.
    #[must_use]
    pub fn dependency_on(&self, provider: &ModuleIdentifier) -> Option<&DependencySpec> {
        self.dependencies
            .iter()
            .find(|d| d.provider() == Some(provider))
    }

    /// The local edge.
    #[must_use]
    pub fn local_dependency(&self) -> Option<&DependencySpec> {
        self.dependencies
            .iter()
            .find(|d| matches!(d, DependencySpec::Local { .. }))
    }

    /// Content roots: own roots first, then attached fragments' roots.
    #[must_use]
    pub fn roots(&self) -> &[UnitRoot] {
        &self.roots
    }

    /// Package paths this unit exports from its own content.
    #[must_use]
    pub fn exported_paths(&self) -> &BTreeSet<String> {
        &self.exported_paths
    }

    /// Bound native libraries by lookup name.
    #[must_use]
    pub fn native_libraries(&self) -> &BTreeMap<String, NativeBinding> {
        &self.native_libraries
    }

    /// Find a native library by name or by its alias without the `lib`
    /// prefix.
    #[must_use]
    pub fn native_library(&self, name: &str) -> Option<&NativeBinding> {
        self.native_libraries.get(name)
    }

    /// The lazy activation filter; `None` means the unit activates eagerly.
    #[must_use]
    pub fn lazy_filter(&self) -> Option<&PathFilter> {
        self.lazy_filter.as_ref()
    }

    /// Whether loading from `package_path` triggers lazy activation.
    #[must_use]
    pub fn triggers_activation(&self, package_path: &str) -> bool {
        self.lazy_filter
            .as_ref()
            .is_some_and(|f| f.accepts(package_path))
    }

    /// Whether the unit's own content holds `path`.
    ///
    /// The framework unit serves every path under its exported packages.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        if self.framework {
            return self.exported_paths.contains(parent_path(path));
        }
        self.roots.iter().any(|r| r.root.contains(path))
    }

    /// Whether `path` is visible to other units through the local edge.
    #[must_use]
    pub fn exports(&self, path: &str) -> bool {
        let class_visible = match self.local_dependency() {
            Some(DependencySpec::Local { export, .. }) => export.accepts(path),
            _ => false,
        };
        class_visible && self.exported_paths.contains(parent_path(path)) && self.contains(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> ModuleIdentifier {
        ModuleIdentifier::new(name, "1.0.0-rev0")
    }

    #[test]
    fn test_framework_unit_serves_exported_packages() {
        let unit = LoadUnit::framework(
            ModuleIdentifier::new("tessera.framework", "main"),
            BTreeSet::from(["org/tessera/api".to_string()]),
        );
        assert!(unit.is_framework());
        assert!(unit.contains("org/tessera/api/Bundle.class"));
        assert!(unit.exports("org/tessera/api/Bundle.class"));
        assert!(!unit.contains("com/acme/Other.class"));
    }

    #[test]
    fn test_exports_requires_exported_package_and_class_filter() {
        let mut unit = LoadUnit::new(id("tessera.api"), ResourceId::new(1));
        unit.push_dependency(DependencySpec::Local {
            import: PathFilter::accept_all(),
            export: PathFilter::not(PathFilter::in_set(["com/acme/api/Hidden.class"])),
        });
        unit.push_root(
            ResourceId::new(1),
            ContentRoot::new(
                "main",
                [
                    "com/acme/api/Api.class",
                    "com/acme/api/Hidden.class",
                    "com/acme/impl/Impl.class",
                ],
            ),
        );
        unit.set_exported_paths(BTreeSet::from(["com/acme/api".to_string()]));

        assert!(unit.exports("com/acme/api/Api.class"));
        assert!(!unit.exports("com/acme/api/Hidden.class"));
        assert!(!unit.exports("com/acme/impl/Impl.class"));
        assert!(unit.contains("com/acme/impl/Impl.class"));
    }

    #[test]
    fn test_lazy_filter() {
        let mut unit = LoadUnit::new(id("tessera.lazy"), ResourceId::new(2));
        assert!(!unit.triggers_activation("com/acme/api"));
        unit.set_lazy_filter(Some(PathFilter::in_set(["com/acme/api"])));
        assert!(unit.triggers_activation("com/acme/api"));
        assert!(!unit.triggers_activation("com/acme/other"));
    }
}
