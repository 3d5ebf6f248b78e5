//! The constraint solver.
//!
//! Resolution runs over a [`Snapshot`] of the environment and never mutates
//! it, so any number of resolutions may run concurrently. The solver:
//!
//! 1. drops extra singleton namesakes from the mandatory set (first seen
//!    wins; an already-resolved singleton beats every newcomer),
//! 2. widens the optional set with installed fragments whose host
//!    requirement matches a host capability of a requested resource,
//! 3. collects ranked candidates per requirement, pulling unresolved
//!    providers into the batch transitively; an unresolved singleton
//!    provider joins only if it outranks its namesakes,
//! 4. fails resources with an empty mandatory candidate list, cascading
//!    the failure to everything that depended on them,
//! 5. checks `uses` consistency and, on a conflict, queues permutations
//!    that drop the offending candidate.
//!
//! The first consistent permutation becomes the wire map.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use semver::Version;
use tessera_core::{Capability, Namespace, Requirement, Resource, ResourceId, Wire, WireMap};
use tracing::{debug, trace};

use crate::environment::{Environment, Snapshot};
use crate::error::{ResolutionError, ResolutionResult};

/// Default bound on the number of permutations tried per resolution.
pub const DEFAULT_MAX_PERMUTATIONS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Mandatory,
    Optional,
    Dependency,
}

/// One candidate assignment: per resource, per requirement, ranked providers.
#[derive(Debug, Clone, Default)]
struct Permutation {
    candidates: BTreeMap<ResourceId, Vec<Vec<Capability>>>,
    failed: BTreeSet<ResourceId>,
    unsatisfied: BTreeMap<ResourceId, Requirement>,
}

#[derive(Debug)]
struct Conflict {
    resource: ResourceId,
    package: String,
    /// Requirement index importing the conflicting package directly.
    direct: usize,
    /// Requirement index importing the package whose `uses` names it.
    via: usize,
}

/// Computes wirings for sets of resources.
#[derive(Debug, Clone)]
pub struct Resolver {
    max_permutations: usize,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    /// Create a resolver with the default search bound.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_permutations: DEFAULT_MAX_PERMUTATIONS,
        }
    }

    /// Bound the number of permutations tried per resolution.
    #[must_use]
    pub fn with_max_permutations(mut self, max: usize) -> Self {
        self.max_permutations = max.max(1);
        self
    }

    /// Resolve `mandatory` and as many of `optional` as possible.
    ///
    /// The returned map has an entry for every resource the batch resolves,
    /// including providers pulled in transitively; an entry may hold no
    /// wires. Already-resolved mandatory resources map to their published
    /// wires, so applying the result again is harmless.
    ///
    /// # Errors
    ///
    /// - [`ResolutionError::UnknownResource`] if a requested resource is not
    ///   installed in `env`.
    /// - [`ResolutionError::Unresolved`] if a mandatory resource cannot be
    ///   satisfied; nothing of the batch is returned.
    /// - [`ResolutionError::UsesConflict`] if every permutation violates a
    ///   `uses` constraint of a mandatory resource.
    /// - [`ResolutionError::SearchExhausted`] if the permutation bound is hit.
    pub fn resolve(
        &self,
        env: &Environment,
        mandatory: &[Arc<Resource>],
        optional: &[Arc<Resource>],
    ) -> ResolutionResult<WireMap> {
        let snapshot = env.snapshot();
        for resource in mandatory.iter().chain(optional) {
            if snapshot.resource(resource.id()).is_none() {
                return Err(ResolutionError::UnknownResource(resource.id()));
            }
        }

        let mut session = Session::new(&snapshot);
        let mut wires = WireMap::new();
        let mut roots = Vec::new();

        for resource in mandatory {
            let id = resource.id();
            if let Some(wiring) = snapshot.wiring(id) {
                wires.insert(id, wiring.required_wires().to_vec());
                continue;
            }
            if !session.admit_singleton(resource) {
                debug!(resource = %resource, "Dropping singleton duplicate from mandatory set");
                continue;
            }
            if session.roles.insert(id, Role::Mandatory).is_none() {
                roots.push(id);
            }
        }

        for resource in widen_optional(&snapshot, mandatory, optional) {
            let id = resource.id();
            if snapshot.is_resolved(id) || session.roles.contains_key(&id) {
                continue;
            }
            if session.admit_singleton(&resource) {
                session.roles.insert(id, Role::Optional);
                roots.push(id);
            }
        }

        if roots.is_empty() {
            return Ok(wires);
        }

        let initial = session.populate(&roots);
        let solution = session.search(initial, self.max_permutations)?;

        for (id, lists) in &solution.candidates {
            if solution.failed.contains(id) {
                trace!(resource = %id, "Resource dropped from batch");
                continue;
            }
            let Some(resource) = snapshot.resource(*id) else {
                continue;
            };
            let mut required = Vec::new();
            for (requirement, caps) in resource.requirements().iter().zip(lists) {
                let Some(capability) = caps.first() else {
                    continue;
                };
                if capability.resource() == *id {
                    continue;
                }
                required.push(Wire::new(requirement.clone(), capability.clone())?);
            }
            wires.insert(*id, required);
        }

        debug!(
            resolved = wires.len(),
            dropped = solution.failed.len(),
            "Resolution complete"
        );
        Ok(wires)
    }
}

/// Requested optional resources plus every unresolved fragment that can
/// attach to a requested host.
fn widen_optional(
    snapshot: &Snapshot,
    mandatory: &[Arc<Resource>],
    optional: &[Arc<Resource>],
) -> Vec<Arc<Resource>> {
    let mut widened: Vec<Arc<Resource>> = optional.to_vec();
    for host in mandatory.iter().chain(optional) {
        let Some(host_cap) = host.host_capability() else {
            continue;
        };
        for fragment in snapshot.resources() {
            if !fragment.is_fragment() || snapshot.is_resolved(fragment.id()) {
                continue;
            }
            let attaches = fragment
                .host_requirement()
                .is_some_and(|req| req.matches(host_cap));
            if attaches && !widened.iter().any(|r| r.id() == fragment.id()) {
                widened.push(Arc::clone(fragment));
            }
        }
    }
    widened
}

struct Session<'a> {
    snapshot: &'a Snapshot,
    roles: BTreeMap<ResourceId, Role>,
    singletons: BTreeMap<String, ResourceId>,
}

impl<'a> Session<'a> {
    fn new(snapshot: &'a Snapshot) -> Self {
        let singletons = snapshot
            .resources()
            .filter(|r| r.is_singleton() && snapshot.is_resolved(r.id()))
            .map(|r| (r.symbolic_name().to_owned(), r.id()))
            .collect();
        Self {
            snapshot,
            roles: BTreeMap::new(),
            singletons,
        }
    }

    /// Whether `resource` may join the batch under singleton exclusion.
    fn admit_singleton(&mut self, resource: &Resource) -> bool {
        if !resource.is_singleton() {
            return true;
        }
        let winner = *self
            .singletons
            .entry(resource.symbolic_name().to_owned())
            .or_insert(resource.id());
        winner == resource.id()
    }

    fn populate(&mut self, roots: &[ResourceId]) -> Permutation {
        let mut permutation = Permutation::default();
        let mut queue: VecDeque<ResourceId> = roots.iter().copied().collect();

        while let Some(id) = queue.pop_front() {
            if permutation.candidates.contains_key(&id) {
                continue;
            }
            let Some(resource) = self.snapshot.resource(id).cloned() else {
                continue;
            };
            let mut lists = Vec::with_capacity(resource.requirements().len());
            for requirement in resource.requirements() {
                let caps = self.candidates_for(&resource, requirement);
                for cap in &caps {
                    let provider = cap.resource();
                    if provider != id
                        && !self.snapshot.is_resolved(provider)
                        && !self.roles.contains_key(&provider)
                    {
                        self.roles.insert(provider, Role::Dependency);
                        queue.push_back(provider);
                    }
                }
                lists.push(caps);
            }
            permutation.candidates.insert(id, lists);
        }
        permutation
    }

    /// Ranked candidates: the resource's own matching capabilities first,
    /// then resolved providers, higher versions, lower ids.
    fn candidates_for(&mut self, resource: &Resource, requirement: &Requirement) -> Vec<Capability> {
        let mut candidates: Vec<Capability> = resource
            .capabilities()
            .iter()
            .filter(|c| requirement.matches(c))
            .cloned()
            .collect();

        let snapshot = self.snapshot;
        let mut others: Vec<Capability> = snapshot
            .resources()
            .filter(|other| other.id() != resource.id() && !other.is_fragment())
            .flat_map(|other| other.capabilities().iter())
            .filter(|c| requirement.matches(c))
            .cloned()
            .collect();
        others.sort_by(|a, b| rank(snapshot, a, b));

        // Singleton admission follows the ranking, so the best-ranked
        // unresolved namesake is the one that joins the batch.
        others.retain(|c| {
            let provider = c.resource();
            snapshot.is_resolved(provider)
                || snapshot
                    .resource(provider)
                    .is_some_and(|other| self.admit_singleton(other))
        });
        candidates.extend(others);
        candidates
    }

    /// Fail resources whose mandatory requirements ran out of candidates
    /// until nothing changes.
    fn cascade(&self, permutation: &mut Permutation) {
        let Permutation {
            candidates,
            failed,
            unsatisfied,
        } = permutation;

        loop {
            let mut newly_failed = Vec::new();
            for (id, lists) in candidates.iter_mut() {
                if failed.contains(id) {
                    continue;
                }
                let Some(resource) = self.snapshot.resource(*id) else {
                    continue;
                };
                for (requirement, caps) in resource.requirements().iter().zip(lists.iter_mut()) {
                    caps.retain(|c| !failed.contains(&c.resource()));
                    if caps.is_empty() && !requirement.is_optional() {
                        newly_failed.push((*id, requirement.clone()));
                        break;
                    }
                }
            }
            if newly_failed.is_empty() {
                return;
            }
            for (id, requirement) in newly_failed {
                trace!(resource = %id, requirement = %requirement, "Requirement unsatisfied");
                failed.insert(id);
                unsatisfied.entry(id).or_insert(requirement);
            }
        }
    }

    fn mandatory_failure(&self, permutation: &Permutation) -> Option<ResolutionError> {
        let failed: Vec<&ResourceId> = permutation
            .failed
            .iter()
            .filter(|id| self.roles.get(id) == Some(&Role::Mandatory))
            .collect();
        if failed.is_empty() {
            return None;
        }
        let requirements = failed
            .into_iter()
            .filter_map(|id| permutation.unsatisfied.get(id).cloned())
            .collect();
        Some(ResolutionError::Unresolved { requirements })
    }

    fn search(&self, initial: Permutation, max: usize) -> ResolutionResult<Permutation> {
        let mut queue = VecDeque::from([initial]);
        let mut attempts = 0_usize;
        let mut first_error = None;

        while let Some(mut permutation) = queue.pop_front() {
            if attempts >= max {
                return Err(ResolutionError::SearchExhausted { attempts });
            }
            attempts = attempts.saturating_add(1);

            self.cascade(&mut permutation);
            if let Some(error) = self.mandatory_failure(&permutation) {
                first_error.get_or_insert(error);
                continue;
            }

            let Some(conflict) = self.find_conflict(&permutation) else {
                trace!(attempts, "Consistent permutation found");
                return Ok(permutation);
            };
            debug!(
                resource = %conflict.resource,
                package = %conflict.package,
                "Uses conflict, trying another permutation"
            );

            for index in [conflict.direct, conflict.via] {
                let mut alternative = permutation.clone();
                if let Some(caps) = alternative
                    .candidates
                    .get_mut(&conflict.resource)
                    .and_then(|lists| lists.get_mut(index))
                    .filter(|caps| !caps.is_empty())
                {
                    caps.remove(0);
                    queue.push_back(alternative);
                }
            }
            if self.roles.get(&conflict.resource) != Some(&Role::Mandatory) {
                let mut alternative = permutation.clone();
                alternative.failed.insert(conflict.resource);
                queue.push_back(alternative);
            }
            first_error.get_or_insert(ResolutionError::UsesConflict {
                resource: conflict.resource,
                package: conflict.package,
            });
        }

        Err(first_error.unwrap_or(ResolutionError::SearchExhausted { attempts }))
    }

    /// First resource whose imported packages disagree with what their
    /// exporters use.
    fn find_conflict(&self, permutation: &Permutation) -> Option<Conflict> {
        for (id, lists) in &permutation.candidates {
            if permutation.failed.contains(id) {
                continue;
            }
            let Some(resource) = self.snapshot.resource(*id) else {
                continue;
            };

            let mut imports: BTreeMap<&str, (usize, &Capability)> = BTreeMap::new();
            for (index, (requirement, caps)) in
                resource.requirements().iter().zip(lists).enumerate()
            {
                if requirement.namespace() != &Namespace::Package {
                    continue;
                }
                if let Some(cap) = caps.first()
                    && let Some(package) = cap.package_name()
                {
                    imports.entry(package).or_insert((index, cap));
                }
            }

            for (via, capability) in imports.values() {
                if capability.resource() == *id {
                    continue;
                }
                for used in capability.uses() {
                    let Some((direct, mine)) = imports.get(used) else {
                        continue;
                    };
                    let Some(theirs) = self.package_source(permutation, capability.resource(), used)
                    else {
                        continue;
                    };
                    if theirs != **mine {
                        return Some(Conflict {
                            resource: *id,
                            package: used.to_owned(),
                            direct: *direct,
                            via: *via,
                        });
                    }
                }
            }
        }
        None
    }

    /// The capability `owner` sees for `package`: its own export, its
    /// published wire, or its current first candidate.
    fn package_source(
        &self,
        permutation: &Permutation,
        owner: ResourceId,
        package: &str,
    ) -> Option<Capability> {
        let resource = self.snapshot.resource(owner)?;
        if let Some(own) = resource
            .capabilities_in(&Namespace::Package)
            .find(|c| c.package_name() == Some(package))
        {
            return Some(own.clone());
        }
        if let Some(wiring) = self.snapshot.wiring(owner) {
            return wiring
                .required_in(&Namespace::Package)
                .find(|w| w.capability().package_name() == Some(package))
                .map(|w| w.capability().clone());
        }
        let lists = permutation.candidates.get(&owner)?;
        resource
            .requirements()
            .iter()
            .zip(lists)
            .filter(|(req, _)| req.namespace() == &Namespace::Package)
            .filter_map(|(_, caps)| caps.first())
            .find(|c| c.package_name() == Some(package))
            .cloned()
    }
}

fn rank(snapshot: &Snapshot, a: &Capability, b: &Capability) -> Ordering {
    let resolved = |c: &Capability| snapshot.is_resolved(c.resource());
    let version = |c: &Capability| -> Option<Version> {
        c.version()
            .cloned()
            .or_else(|| snapshot.resource(c.resource()).map(|r| r.version().clone()))
    };
    resolved(b)
        .cmp(&resolved(a))
        .then_with(|| version(b).cmp(&version(a)))
        .then_with(|| a.resource().cmp(&b.resource()))
}
