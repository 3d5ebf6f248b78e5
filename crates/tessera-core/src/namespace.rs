//! Capability namespaces and well-known attribute and directive keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Attribute carrying a symbolic name (identity, bundle and host capabilities).
pub const ATTR_NAME: &str = "name";
/// Attribute carrying a package name (package capabilities).
pub const ATTR_PACKAGE: &str = "package";
/// Attribute carrying a version.
pub const ATTR_VERSION: &str = "version";
/// Attribute carrying the identity type (`host` or `fragment`).
pub const ATTR_TYPE: &str = "type";

/// Identity type of a host resource.
pub const TYPE_HOST: &str = "host";
/// Identity type of a fragment resource.
pub const TYPE_FRAGMENT: &str = "fragment";

/// Directive listing packages a package capability's classes reference.
pub const DIRECTIVE_USES: &str = "uses";
/// Directive listing class-name patterns visible from an exported package.
pub const DIRECTIVE_INCLUDE: &str = "include";
/// Directive listing class-name patterns hidden from an exported package.
pub const DIRECTIVE_EXCLUDE: &str = "exclude";
/// Directive marking an identity capability as a singleton.
pub const DIRECTIVE_SINGLETON: &str = "singleton";

/// The namespace a capability or requirement lives in.
///
/// Requirements only ever match capabilities of the same namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Namespace {
    /// The resource's own identity (`bundle-identity`).
    #[serde(rename = "bundle-identity")]
    Identity,
    /// An exported or imported package.
    Package,
    /// A whole-unit dependency on another resource.
    Bundle,
    /// A fragment's attachment point on a host.
    Host,
    /// Any other, application-defined namespace.
    Custom(String),
}

impl Namespace {
    /// The namespace name as it appears in descriptors and logs.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Identity => "bundle-identity",
            Self::Package => "package",
            Self::Bundle => "bundle",
            Self::Host => "host",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
