//! Capabilities and requirements.

use std::collections::BTreeMap;
use std::fmt;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::filter::Filter;
use crate::namespace::{
    ATTR_NAME, ATTR_PACKAGE, ATTR_VERSION, DIRECTIVE_EXCLUDE, DIRECTIVE_INCLUDE,
    DIRECTIVE_SINGLETON, DIRECTIVE_USES, Namespace,
};
use crate::resource::ResourceId;

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A 64-bit integer.
    Long(i64),
    /// A version.
    Version(Version),
    /// A plain string.
    String(String),
    /// A list of strings.
    List(Vec<String>),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long(n) => write!(f, "{n}"),
            Self::Version(v) => write!(f, "{v}"),
            Self::String(s) => f.write_str(s),
            Self::List(items) => f.write_str(&items.join(",")),
        }
    }
}

/// Attribute map of a capability, ordered for stable diagnostics.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// Split a comma-separated directive value into trimmed, non-empty items.
fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// A typed assertion a resource provides within a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    resource: ResourceId,
    namespace: Namespace,
    #[serde(default)]
    attributes: Attributes,
    #[serde(default)]
    directives: BTreeMap<String, String>,
}

impl Capability {
    /// Create a capability owned by `resource` with no attributes.
    #[must_use]
    pub fn new(resource: ResourceId, namespace: Namespace) -> Self {
        Self {
            resource,
            namespace,
            attributes: Attributes::new(),
            directives: BTreeMap::new(),
        }
    }

    /// Add an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Add a directive.
    #[must_use]
    pub fn with_directive(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.directives.insert(key.into(), value.into());
        self
    }

    /// The owning resource.
    #[must_use]
    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    /// The capability namespace.
    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// All attributes.
    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Look up a directive.
    #[must_use]
    pub fn directive(&self, key: &str) -> Option<&str> {
        self.directives.get(key).map(String::as_str)
    }

    /// Package name of a package capability.
    #[must_use]
    pub fn package_name(&self) -> Option<&str> {
        self.string_attribute(ATTR_PACKAGE)
    }

    /// Symbolic name carried by identity, bundle and host capabilities.
    #[must_use]
    pub fn symbolic_name(&self) -> Option<&str> {
        self.string_attribute(ATTR_NAME)
    }

    /// The `version` attribute, if present and typed as a version.
    #[must_use]
    pub fn version(&self) -> Option<&Version> {
        match self.attributes.get(ATTR_VERSION) {
            Some(AttributeValue::Version(v)) => Some(v),
            _ => None,
        }
    }

    /// Packages named by the `uses` directive.
    #[must_use]
    pub fn uses(&self) -> Vec<&str> {
        self.directive(DIRECTIVE_USES)
            .map(|v| split_list(v).collect())
            .unwrap_or_default()
    }

    /// Class-name patterns from the `include` directive, if declared.
    #[must_use]
    pub fn include_patterns(&self) -> Option<Vec<&str>> {
        self.directive(DIRECTIVE_INCLUDE)
            .map(|v| split_list(v).collect())
    }

    /// Class-name patterns from the `exclude` directive, if declared.
    #[must_use]
    pub fn exclude_patterns(&self) -> Option<Vec<&str>> {
        self.directive(DIRECTIVE_EXCLUDE)
            .map(|v| split_list(v).collect())
    }

    /// Whether an identity capability is marked singleton.
    #[must_use]
    pub fn is_singleton(&self) -> bool {
        self.directive(DIRECTIVE_SINGLETON)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    fn string_attribute(&self, key: &str) -> Option<&str> {
        match self.attributes.get(key) {
            Some(AttributeValue::String(s)) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.namespace)?;
        let mut first = true;
        for (key, value) in &self.attributes {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            write!(f, "{key}={value}")?;
        }
        write!(f, "]@{}", self.resource)
    }
}

/// A typed, filtered need a resource declares within a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    resource: ResourceId,
    namespace: Namespace,
    #[serde(default)]
    filter: Filter,
    #[serde(default)]
    optional: bool,
    #[serde(default)]
    reexport: bool,
}

impl Requirement {
    /// Create a mandatory requirement owned by `resource`.
    #[must_use]
    pub fn new(resource: ResourceId, namespace: Namespace, filter: Filter) -> Self {
        Self {
            resource,
            namespace,
            filter,
            optional: false,
            reexport: false,
        }
    }

    /// Mark the requirement optional.
    #[must_use]
    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    /// Mark the requirement as re-exporting its provider's visibility.
    #[must_use]
    pub fn reexport(mut self, reexport: bool) -> Self {
        self.reexport = reexport;
        self
    }

    /// The declaring resource.
    #[must_use]
    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    /// The requirement namespace.
    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// The match filter.
    #[must_use]
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Whether the requirement may go unsatisfied.
    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Whether consumers of the declaring resource also see the provider.
    #[must_use]
    pub fn is_reexport(&self) -> bool {
        self.reexport
    }

    /// Whether `capability` satisfies this requirement.
    #[must_use]
    pub fn matches(&self, capability: &Capability) -> bool {
        self.namespace == capability.namespace && self.filter.matches(&capability.attributes)
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}@{}", self.namespace, self.filter, self.resource)?;
        if self.optional {
            f.write_str(" (optional)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::ATTR_PACKAGE;

    fn package_cap() -> Capability {
        Capability::new(ResourceId::new(3), Namespace::Package)
            .with_attribute(ATTR_PACKAGE, AttributeValue::String("com.acme.util".into()))
            .with_attribute(ATTR_VERSION, AttributeValue::Version(Version::new(2, 1, 0)))
            .with_directive(DIRECTIVE_USES, "com.acme.api, com.acme.spi")
            .with_directive(DIRECTIVE_EXCLUDE, "*Impl")
    }

    #[test]
    fn test_typed_accessors() {
        let cap = package_cap();
        assert_eq!(cap.package_name(), Some("com.acme.util"));
        assert_eq!(cap.version(), Some(&Version::new(2, 1, 0)));
        assert_eq!(cap.uses(), vec!["com.acme.api", "com.acme.spi"]);
        assert_eq!(cap.include_patterns(), None);
        assert_eq!(cap.exclude_patterns(), Some(vec!["*Impl"]));
        assert!(!cap.is_singleton());
    }

    #[test]
    fn test_requirement_is_namespace_scoped() {
        let cap = package_cap();
        let filter = Filter::equals(ATTR_PACKAGE, "com.acme.util");
        let pkg_req = Requirement::new(ResourceId::new(4), Namespace::Package, filter.clone());
        let bundle_req = Requirement::new(ResourceId::new(4), Namespace::Bundle, filter);
        assert!(pkg_req.matches(&cap));
        assert!(!bundle_req.matches(&cap));
    }

    #[test]
    fn test_requirement_modifiers() {
        let req = Requirement::new(ResourceId::new(1), Namespace::Bundle, Filter::MatchAll)
            .optional(true)
            .reexport(true);
        assert!(req.is_optional());
        assert!(req.is_reexport());
        assert!(req.to_string().ends_with("(optional)"));
    }
}
