//! The normalized deployment descriptor.
//!
//! A [`Deployment`] is what an installer hands the runtime: identity,
//! lifecycle hints, declared exports and imports, content and native code.
//! Text formats are out of scope here; descriptors arrive already normalized
//! (typically deserialized from TOML by a deployment source).
//! [`Deployment::to_resource`] turns one into the capability graph's
//! [`Resource`].

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::capability::{AttributeValue, Attributes, Capability, Requirement};
use crate::error::{CoreError, CoreResult};
use crate::filter::Filter;
use crate::namespace::{
    ATTR_NAME, ATTR_PACKAGE, ATTR_TYPE, ATTR_VERSION, DIRECTIVE_EXCLUDE, DIRECTIVE_INCLUDE,
    DIRECTIVE_SINGLETON, DIRECTIVE_USES, Namespace, TYPE_FRAGMENT, TYPE_HOST,
};
use crate::resource::{
    Resource, ResourceId, ResourceIdentity, ResourceKind, SYSTEM_RESOURCE_ID, SYSTEM_SYMBOLIC_NAME,
};
use crate::version::{VersionRange, parse_version};

/// A package exported by a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageExport {
    /// Dotted package name.
    pub package: String,
    /// Exported version (defaults to `0.0.0`).
    #[serde(default)]
    pub version: Option<String>,
    /// Packages referenced by this package's classes.
    #[serde(default)]
    pub uses: Vec<String>,
    /// Class-name patterns visible to importers.
    #[serde(default)]
    pub include: Option<Vec<String>>,
    /// Class-name patterns hidden from importers.
    #[serde(default)]
    pub exclude: Option<Vec<String>>,
}

impl PackageExport {
    /// Export `package` at version `0.0.0`.
    #[must_use]
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            version: None,
            uses: Vec::new(),
            include: None,
            exclude: None,
        }
    }

    /// Set the exported version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Add a `uses` package.
    #[must_use]
    pub fn with_uses(mut self, package: impl Into<String>) -> Self {
        self.uses.push(package.into());
        self
    }

    /// Add an include pattern.
    #[must_use]
    pub fn with_include(mut self, pattern: impl Into<String>) -> Self {
        self.include.get_or_insert_with(Vec::new).push(pattern.into());
        self
    }

    /// Add an exclude pattern.
    #[must_use]
    pub fn with_exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude.get_or_insert_with(Vec::new).push(pattern.into());
        self
    }
}

/// A package imported by a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageImport {
    /// Dotted package name.
    pub package: String,
    /// Accepted exporter versions.
    #[serde(default)]
    pub version: VersionRange,
    /// Whether the import may go unsatisfied.
    #[serde(default)]
    pub optional: bool,
}

impl PackageImport {
    /// Import `package` at any version.
    #[must_use]
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            version: VersionRange::any(),
            optional: false,
        }
    }

    /// Restrict the accepted versions.
    #[must_use]
    pub fn with_version(mut self, range: VersionRange) -> Self {
        self.version = range;
        self
    }

    /// Mark the import optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// A whole-unit dependency on another bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRequire {
    /// Required symbolic name.
    pub symbolic_name: String,
    /// Accepted versions.
    #[serde(default)]
    pub version: VersionRange,
    /// Re-export the provider's packages to our own consumers.
    #[serde(default)]
    pub reexport: bool,
    /// Whether the dependency may go unsatisfied.
    #[serde(default)]
    pub optional: bool,
}

impl BundleRequire {
    /// Require `symbolic_name` at any version.
    #[must_use]
    pub fn new(symbolic_name: impl Into<String>) -> Self {
        Self {
            symbolic_name: symbolic_name.into(),
            version: VersionRange::any(),
            reexport: false,
            optional: false,
        }
    }

    /// Re-export the provider.
    #[must_use]
    pub fn reexport(mut self) -> Self {
        self.reexport = true;
        self
    }

    /// Mark optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// A fragment's host reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRef {
    /// Host symbolic name.
    pub symbolic_name: String,
    /// Accepted host versions.
    #[serde(default)]
    pub version: VersionRange,
}

impl HostRef {
    /// Attach to `symbolic_name` at any version.
    #[must_use]
    pub fn new(symbolic_name: impl Into<String>) -> Self {
        Self {
            symbolic_name: symbolic_name.into(),
            version: VersionRange::any(),
        }
    }
}

/// A native library shipped in a content root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeLibrary {
    /// Entry path of the library file, e.g. `native/linux/libacme.so`.
    pub path: String,
    /// Operating systems the library applies to; empty means any.
    #[serde(default)]
    pub os: Vec<String>,
    /// Processor architectures the library applies to; empty means any.
    #[serde(default)]
    pub arch: Vec<String>,
}

impl NativeLibrary {
    /// A library at `path` for every platform.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            os: Vec::new(),
            arch: Vec::new(),
        }
    }

    /// Restrict to an operating system.
    #[must_use]
    pub fn for_os(mut self, os: impl Into<String>) -> Self {
        self.os.push(os.into());
        self
    }

    /// Restrict to a processor architecture.
    #[must_use]
    pub fn for_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch.push(arch.into());
        self
    }

    /// Whether the library applies to the given platform.
    #[must_use]
    pub fn matches_platform(&self, os: &str, arch: &str) -> bool {
        let os_ok = self.os.is_empty() || self.os.iter().any(|o| o.eq_ignore_ascii_case(os));
        let arch_ok =
            self.arch.is_empty() || self.arch.iter().any(|a| a.eq_ignore_ascii_case(arch));
        os_ok && arch_ok
    }

    /// File name component of the path.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Library name: the file name without its extension.
    #[must_use]
    pub fn library_name(&self) -> &str {
        let file = self.file_name();
        file.split_once('.').map_or(file, |(stem, _)| stem)
    }
}

/// Lazy activation policy.
///
/// The presence of a policy makes activation lazy: a `start` is deferred
/// until the first class is loaded from a lazy package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationPolicy {
    /// Packages that trigger activation; absent means every package.
    #[serde(default)]
    pub include: Option<Vec<String>>,
    /// Packages that never trigger activation.
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// A root of loadable content: a name and its entry paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRoot {
    /// Root name, unique within the resource.
    pub name: String,
    /// Slash-separated entry paths, e.g. `com/acme/api/Client.class`.
    #[serde(default)]
    pub entries: Vec<String>,
}

impl ContentRoot {
    /// Create a content root.
    #[must_use]
    pub fn new(name: impl Into<String>, entries: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            entries: entries.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the root holds `path`.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.entries.iter().any(|e| e == path)
    }

    /// Directory paths holding at least one entry.
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self
            .entries
            .iter()
            .filter_map(|e| e.rsplit_once('/').map(|(dir, _)| dir))
            .collect();
        paths.sort_unstable();
        paths.dedup();
        paths
    }
}

/// An application-defined capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomCapability {
    /// Namespace name.
    pub namespace: String,
    /// Attributes.
    #[serde(default)]
    pub attributes: Attributes,
}

/// An application-defined requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomRequirement {
    /// Namespace name.
    pub namespace: String,
    /// Match filter.
    #[serde(default)]
    pub filter: Filter,
    /// Whether the requirement may go unsatisfied.
    #[serde(default)]
    pub optional: bool,
}

/// A normalized deployment descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    /// Where the deployment came from.
    pub location: String,
    /// Symbolic name.
    pub symbolic_name: String,
    /// Version string, leniently parsed.
    pub version: String,
    /// At most one resolved bundle may carry this symbolic name.
    #[serde(default)]
    pub singleton: bool,
    /// Declared start level; falls back to the initial bundle start level.
    #[serde(default)]
    pub start_level: Option<u32>,
    /// Start automatically during bootstrap.
    #[serde(default)]
    pub auto_start: bool,
    /// Makes the deployment a fragment of the referenced host.
    #[serde(default)]
    pub fragment_host: Option<HostRef>,
    /// Native libraries.
    #[serde(default)]
    pub native_libraries: Vec<NativeLibrary>,
    /// Exported packages.
    #[serde(default)]
    pub exports: Vec<PackageExport>,
    /// Imported packages.
    #[serde(default)]
    pub imports: Vec<PackageImport>,
    /// Whole-unit dependencies.
    #[serde(default)]
    pub required_bundles: Vec<BundleRequire>,
    /// Lazy activation policy.
    #[serde(default)]
    pub activation_policy: Option<ActivationPolicy>,
    /// Loadable content.
    #[serde(default)]
    pub content: Vec<ContentRoot>,
    /// Extra capabilities.
    #[serde(default)]
    pub capabilities: Vec<CustomCapability>,
    /// Extra requirements.
    #[serde(default)]
    pub requirements: Vec<CustomRequirement>,
}

impl Deployment {
    /// A host deployment with no declarations.
    #[must_use]
    pub fn new(
        location: impl Into<String>,
        symbolic_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            location: location.into(),
            symbolic_name: symbolic_name.into(),
            version: version.into(),
            singleton: false,
            start_level: None,
            auto_start: false,
            fragment_host: None,
            native_libraries: Vec::new(),
            exports: Vec::new(),
            imports: Vec::new(),
            required_bundles: Vec::new(),
            activation_policy: None,
            content: Vec::new(),
            capabilities: Vec::new(),
            requirements: Vec::new(),
        }
    }

    /// Mark singleton.
    #[must_use]
    pub fn with_singleton(mut self, singleton: bool) -> Self {
        self.singleton = singleton;
        self
    }

    /// Declare a start level.
    #[must_use]
    pub fn with_start_level(mut self, level: u32) -> Self {
        self.start_level = Some(level);
        self
    }

    /// Start during bootstrap.
    #[must_use]
    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Turn into a fragment of `host`.
    #[must_use]
    pub fn with_fragment_host(mut self, host: HostRef) -> Self {
        self.fragment_host = Some(host);
        self
    }

    /// Add a native library.
    #[must_use]
    pub fn with_native_library(mut self, library: NativeLibrary) -> Self {
        self.native_libraries.push(library);
        self
    }

    /// Add an exported package.
    #[must_use]
    pub fn with_export(mut self, export: PackageExport) -> Self {
        self.exports.push(export);
        self
    }

    /// Add an imported package.
    #[must_use]
    pub fn with_import(mut self, import: PackageImport) -> Self {
        self.imports.push(import);
        self
    }

    /// Add a whole-unit dependency.
    #[must_use]
    pub fn with_required_bundle(mut self, require: BundleRequire) -> Self {
        self.required_bundles.push(require);
        self
    }

    /// Set the activation policy.
    #[must_use]
    pub fn with_activation_policy(mut self, policy: ActivationPolicy) -> Self {
        self.activation_policy = Some(policy);
        self
    }

    /// Add a content root.
    #[must_use]
    pub fn with_content(mut self, root: ContentRoot) -> Self {
        self.content.push(root);
        self
    }

    /// Add an application-defined capability.
    #[must_use]
    pub fn with_capability(mut self, capability: CustomCapability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Add an application-defined requirement.
    #[must_use]
    pub fn with_requirement(mut self, requirement: CustomRequirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    /// Whether this deployment is a fragment.
    #[must_use]
    pub fn is_fragment(&self) -> bool {
        self.fragment_host.is_some()
    }

    /// Build the capability graph resource for this deployment.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidIdentity`] if the symbolic name is empty,
    /// is the reserved system name, or the version does not parse.
    pub fn to_resource(&self, id: ResourceId, revision: u32) -> CoreResult<Resource> {
        let invalid = |reason: String| CoreError::InvalidIdentity {
            location: self.location.clone(),
            reason,
        };
        let name = self.symbolic_name.trim();
        if name.is_empty() {
            return Err(invalid("empty symbolic name".to_string()));
        }
        if name == SYSTEM_SYMBOLIC_NAME {
            return Err(invalid(format!("'{name}' is reserved")));
        }
        let version = parse_version(&self.version).map_err(|e| invalid(e.to_string()))?;

        let kind = if self.is_fragment() {
            ResourceKind::Fragment
        } else {
            ResourceKind::Host
        };
        let identity = ResourceIdentity {
            symbolic_name: name.to_string(),
            version: version.clone(),
            revision,
        };

        let mut resource = Resource::new(id, identity, kind)
            .with_singleton(self.singleton)
            .with_capability(identity_capability(id, name, &version, kind, self.singleton));

        match &self.fragment_host {
            Some(host) => {
                let filter = Filter::equals(ATTR_NAME, host.symbolic_name.as_str())
                    .and(Filter::in_range(ATTR_VERSION, host.version.clone()));
                resource = resource.with_requirement(Requirement::new(id, Namespace::Host, filter));
            },
            None => {
                resource = resource
                    .with_capability(named_capability(id, Namespace::Host, name, &version))
                    .with_capability(named_capability(id, Namespace::Bundle, name, &version));
            },
        }

        for export in &self.exports {
            resource = resource.with_capability(export_capability(id, export)?);
        }
        for import in &self.imports {
            let filter = Filter::equals(ATTR_PACKAGE, import.package.as_str())
                .and(Filter::in_range(ATTR_VERSION, import.version.clone()));
            resource = resource.with_requirement(
                Requirement::new(id, Namespace::Package, filter).optional(import.optional),
            );
        }
        for require in &self.required_bundles {
            let filter = Filter::equals(ATTR_NAME, require.symbolic_name.as_str())
                .and(Filter::in_range(ATTR_VERSION, require.version.clone()));
            resource = resource.with_requirement(
                Requirement::new(id, Namespace::Bundle, filter)
                    .optional(require.optional)
                    .reexport(require.reexport),
            );
        }
        for custom in &self.capabilities {
            let mut capability = Capability::new(id, Namespace::Custom(custom.namespace.clone()));
            for (key, value) in &custom.attributes {
                capability = capability.with_attribute(key.clone(), value.clone());
            }
            resource = resource.with_capability(capability);
        }
        for custom in &self.requirements {
            resource = resource.with_requirement(
                Requirement::new(
                    id,
                    Namespace::Custom(custom.namespace.clone()),
                    custom.filter.clone(),
                )
                .optional(custom.optional),
            );
        }

        for root in &self.content {
            resource = resource.with_content(root.clone());
        }
        for library in &self.native_libraries {
            resource = resource.with_native_library(library.clone());
        }
        if let Some(policy) = &self.activation_policy {
            resource = resource.with_activation_policy(policy.clone());
        }
        Ok(resource)
    }
}

/// Build the system resource exporting `packages`.
///
/// Package entries may carry a version suffix: `com.acme.boot;version=1.2`.
///
/// # Errors
///
/// Returns [`CoreError::InvalidVersion`] if a version suffix does not parse.
pub fn system_resource(version: Version, packages: &[String]) -> CoreResult<Resource> {
    let id = SYSTEM_RESOURCE_ID;
    let identity = ResourceIdentity {
        symbolic_name: SYSTEM_SYMBOLIC_NAME.to_string(),
        version: version.clone(),
        revision: 0,
    };
    let mut resource = Resource::new(id, identity, ResourceKind::System)
        .with_capability(identity_capability(
            id,
            SYSTEM_SYMBOLIC_NAME,
            &version,
            ResourceKind::System,
            false,
        ))
        .with_capability(named_capability(id, Namespace::Host, SYSTEM_SYMBOLIC_NAME, &version))
        .with_capability(named_capability(id, Namespace::Bundle, SYSTEM_SYMBOLIC_NAME, &version));

    for entry in packages {
        let (package, version) = match entry.split_once(";version=") {
            Some((package, version)) => (package, Some(version.trim_matches('"').to_string())),
            None => (entry.as_str(), None),
        };
        let package = package.trim();
        if package.is_empty() {
            continue;
        }
        let export = PackageExport {
            version,
            ..PackageExport::new(package)
        };
        resource = resource.with_capability(export_capability(id, &export)?);
    }
    Ok(resource)
}

fn identity_capability(
    id: ResourceId,
    name: &str,
    version: &Version,
    kind: ResourceKind,
    singleton: bool,
) -> Capability {
    let kind_name = if kind == ResourceKind::Fragment {
        TYPE_FRAGMENT
    } else {
        TYPE_HOST
    };
    let capability = named_capability(id, Namespace::Identity, name, version)
        .with_attribute(ATTR_TYPE, AttributeValue::String(kind_name.to_string()));
    if singleton {
        capability.with_directive(DIRECTIVE_SINGLETON, "true")
    } else {
        capability
    }
}

fn named_capability(id: ResourceId, namespace: Namespace, name: &str, version: &Version) -> Capability {
    Capability::new(id, namespace)
        .with_attribute(ATTR_NAME, AttributeValue::String(name.to_string()))
        .with_attribute(ATTR_VERSION, AttributeValue::Version(version.clone()))
}

fn export_capability(id: ResourceId, export: &PackageExport) -> CoreResult<Capability> {
    let version = match &export.version {
        Some(v) => parse_version(v)?,
        None => Version::new(0, 0, 0),
    };
    let mut capability = Capability::new(id, Namespace::Package)
        .with_attribute(ATTR_PACKAGE, AttributeValue::String(export.package.clone()))
        .with_attribute(ATTR_VERSION, AttributeValue::Version(version));
    if !export.uses.is_empty() {
        capability = capability.with_directive(DIRECTIVE_USES, export.uses.join(","));
    }
    if let Some(include) = &export.include {
        capability = capability.with_directive(DIRECTIVE_INCLUDE, include.join(","));
    }
    if let Some(exclude) = &export.exclude {
        capability = capability.with_directive(DIRECTIVE_EXCLUDE, exclude.join(","));
    }
    Ok(capability)
}
