//! Wires and the published per-resource wiring view.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capability::{Capability, Requirement};
use crate::error::{CoreError, CoreResult};
use crate::namespace::Namespace;
use crate::resource::ResourceId;

/// Wires computed by one resolution, keyed by requiring resource.
pub type WireMap = BTreeMap<ResourceId, Vec<Wire>>;

/// A binding of one requirement to one capability of another resource.
///
/// Wires are immutable and never connect a resource to itself; a requirement
/// satisfied by its own resource produces no wire at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wire {
    requirement: Requirement,
    capability: Capability,
}

impl Wire {
    /// Bind `requirement` to `capability`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SelfWire`] if both belong to the same resource.
    pub fn new(requirement: Requirement, capability: Capability) -> CoreResult<Self> {
        if requirement.resource() == capability.resource() {
            return Err(CoreError::SelfWire(requirement.resource()));
        }
        Ok(Self {
            requirement,
            capability,
        })
    }

    /// The requiring resource.
    #[must_use]
    pub fn requirer(&self) -> ResourceId {
        self.requirement.resource()
    }

    /// The providing resource.
    #[must_use]
    pub fn provider(&self) -> ResourceId {
        self.capability.resource()
    }

    /// The satisfied requirement.
    #[must_use]
    pub fn requirement(&self) -> &Requirement {
        &self.requirement
    }

    /// The capability bound to.
    #[must_use]
    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    /// Namespace of the wire.
    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        self.capability.namespace()
    }
}

impl fmt::Display for Wire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.requirement, self.capability)
    }
}

/// The published wiring of one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wiring {
    required: Vec<Wire>,
    provided: Vec<Wire>,
}

impl Wiring {
    /// Create a wiring from outgoing and incoming wires.
    #[must_use]
    pub fn new(required: Vec<Wire>, provided: Vec<Wire>) -> Self {
        Self { required, provided }
    }

    /// Outgoing wires, in requirement order.
    #[must_use]
    pub fn required_wires(&self) -> &[Wire] {
        &self.required
    }

    /// Incoming wires from consumers of this resource.
    #[must_use]
    pub fn provided_wires(&self) -> &[Wire] {
        &self.provided
    }

    /// Outgoing wires in one namespace.
    pub fn required_in<'a>(&'a self, namespace: &'a Namespace) -> impl Iterator<Item = &'a Wire> {
        self.required.iter().filter(move |w| w.namespace() == namespace)
    }

    /// Append an incoming wire. Used when a consumer resolves later.
    pub fn add_provided(&mut self, wire: Wire) {
        if !self.provided.contains(&wire) {
            self.provided.push(wire);
        }
    }

    /// Drop incoming wires from `requirer`.
    pub fn remove_provided_from(&mut self, requirer: ResourceId) {
        self.provided.retain(|w| w.requirer() != requirer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::AttributeValue;
    use crate::filter::Filter;
    use crate::namespace::ATTR_PACKAGE;

    fn cap(owner: u64) -> Capability {
        Capability::new(ResourceId::new(owner), Namespace::Package)
            .with_attribute(ATTR_PACKAGE, AttributeValue::String("com.acme".into()))
    }

    fn req(owner: u64) -> Requirement {
        Requirement::new(
            ResourceId::new(owner),
            Namespace::Package,
            Filter::equals(ATTR_PACKAGE, "com.acme"),
        )
    }

    #[test]
    fn test_self_wire_rejected() {
        assert!(matches!(
            Wire::new(req(1), cap(1)),
            Err(CoreError::SelfWire(id)) if id == ResourceId::new(1)
        ));
    }

    #[test]
    fn test_wire_endpoints() {
        let wire = Wire::new(req(1), cap(2)).unwrap();
        assert_eq!(wire.requirer(), ResourceId::new(1));
        assert_eq!(wire.provider(), ResourceId::new(2));
        assert_eq!(wire.namespace(), &Namespace::Package);
    }

    #[test]
    fn test_provided_wires_deduplicate() {
        let wire = Wire::new(req(1), cap(2)).unwrap();
        let mut wiring = Wiring::default();
        wiring.add_provided(wire.clone());
        wiring.add_provided(wire);
        assert_eq!(wiring.provided_wires().len(), 1);

        wiring.remove_provided_from(ResourceId::new(1));
        assert!(wiring.provided_wires().is_empty());
    }
}
