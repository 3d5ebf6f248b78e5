//! Test fixtures for deployments and resources.

use std::sync::Arc;

use tessera_core::{
    BundleRequire, ContentRoot, Deployment, HostRef, PackageExport, PackageImport, Resource,
    ResourceId,
};

/// Location used for fixture deployments.
#[must_use]
pub fn test_location(symbolic_name: &str) -> String {
    format!("mem:{symbolic_name}")
}

/// A plain host deployment.
#[must_use]
pub fn test_host(symbolic_name: &str, version: &str) -> Deployment {
    Deployment::new(test_location(symbolic_name), symbolic_name, version)
}

/// A host exporting `packages` at the bundle's version, with one class
/// entry per package in a `main` content root.
#[must_use]
pub fn test_exporter(symbolic_name: &str, version: &str, packages: &[&str]) -> Deployment {
    let mut deployment = test_host(symbolic_name, version);
    let mut entries = Vec::new();
    for package in packages {
        deployment =
            deployment.with_export(PackageExport::new(*package).with_version(version));
        entries.push(format!("{}/Api.class", package.replace('.', "/")));
    }
    if entries.is_empty() {
        deployment
    } else {
        deployment.with_content(ContentRoot::new("main", entries))
    }
}

/// A host at version 1.0 importing `packages` at any version.
#[must_use]
pub fn test_importer(symbolic_name: &str, packages: &[&str]) -> Deployment {
    packages
        .iter()
        .fold(test_host(symbolic_name, "1.0"), |d, package| {
            d.with_import(PackageImport::new(*package))
        })
}

/// A host at version 1.0 requiring `bundles` as whole units.
#[must_use]
pub fn test_requirer(symbolic_name: &str, bundles: &[&str]) -> Deployment {
    bundles
        .iter()
        .fold(test_host(symbolic_name, "1.0"), |d, bundle| {
            d.with_required_bundle(BundleRequire::new(*bundle))
        })
}

/// A fragment of `host` carrying one content root named after itself.
#[must_use]
pub fn test_fragment(symbolic_name: &str, host: &str) -> Deployment {
    test_host(symbolic_name, "1.0")
        .with_fragment_host(HostRef::new(host))
        .with_content(ContentRoot::new(
            symbolic_name,
            [format!("{}/Extra.class", symbolic_name.replace('.', "/"))],
        ))
}

/// A singleton host.
#[must_use]
pub fn test_singleton(symbolic_name: &str, version: &str) -> Deployment {
    test_host(symbolic_name, version).with_singleton(true)
}

/// Allocates resource ids (starting at 1) and builds shared resources.
#[derive(Debug)]
pub struct ResourceFactory {
    next_id: u64,
}

impl ResourceFactory {
    /// Create a factory whose first id is 1.
    #[must_use]
    pub fn new() -> Self {
        Self { next_id: 1 }
    }

    /// Build the resource for `deployment` with the next id.
    ///
    /// # Panics
    ///
    /// Panics if the deployment has an invalid identity.
    pub fn create(&mut self, deployment: &Deployment) -> Arc<Resource> {
        let id = ResourceId::new(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        Arc::new(
            deployment
                .to_resource(id, 0)
                .expect("fixture deployment must be valid"),
        )
    }
}

impl Default for ResourceFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::Namespace;

    #[test]
    fn test_factory_assigns_sequential_ids() {
        let mut factory = ResourceFactory::new();
        let a = factory.create(&test_host("a", "1.0"));
        let b = factory.create(&test_host("b", "1.0"));
        assert_eq!(a.id(), ResourceId::new(1));
        assert_eq!(b.id(), ResourceId::new(2));
    }

    #[test]
    fn test_exporter_fixture() {
        let mut factory = ResourceFactory::new();
        let api = factory.create(&test_exporter("api", "2.0", &["com.acme.api"]));
        assert_eq!(api.capabilities_in(&Namespace::Package).count(), 1);
        assert!(api.content_roots()[0].contains("com/acme/api/Api.class"));
    }

    #[test]
    fn test_fragment_fixture() {
        let mut factory = ResourceFactory::new();
        let frag = factory.create(&test_fragment("web.nl", "web"));
        assert!(frag.is_fragment());
        assert!(frag.host_requirement().is_some());
    }
}
