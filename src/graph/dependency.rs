//! Dependency edges between entities
//!
//! An edge `from -> to` says that `to` depends on `from`. Check edges drive
//! unreachability and dependency checks; action edges drive problem/impact
//! propagation and notification suppression.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::model::{CheckableEntity, EntityId, EntityKind, Registry, Status, TimeWindows};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyPurpose {
    Check,
    Action,
}

/// Parent states under which a dependency counts as failed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCriteria {
    states: BTreeSet<Status>,
    pending: bool,
}

impl FailureCriteria {
    pub fn new(states: impl IntoIterator<Item = Status>) -> Self {
        Self {
            states: states.into_iter().collect(),
            pending: false,
        }
    }

    /// DOWN or UNREACHABLE: the implicit host-parent criteria
    pub fn down_or_unreachable() -> Self {
        Self::new([Status::Critical, Status::Unreachable])
    }

    /// Parse the letter form (`"d,u"`, `"w,c"`, `"n"`) for a parent kind
    pub fn parse(text: &str, parent: EntityKind) -> Result<Self, GraphError> {
        let mut criteria = Self::default();
        for letter in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let status = match (parent, letter) {
                (_, "n") => continue,
                (_, "p") => {
                    criteria.pending = true;
                    continue;
                }
                (_, "o") => Status::Ok,
                (EntityKind::Host, "d") => Status::Critical,
                (EntityKind::Host, "u") => Status::Unreachable,
                (EntityKind::Service, "w") => Status::Warning,
                (EntityKind::Service, "c") => Status::Critical,
                (EntityKind::Service, "u") => Status::Unknown,
                _ => return Err(GraphError::InvalidCriteria(text.to_string())),
            };
            criteria.states.insert(status);
        }
        Ok(criteria)
    }

    pub fn matches(&self, parent: &CheckableEntity) -> bool {
        if !parent.has_been_checked {
            return self.pending;
        }
        self.states.contains(&parent.state)
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty() && !self.pending
    }
}

/// Directed dependency `from -> to`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// The entity depended upon
    pub from: EntityId,
    /// The dependent entity
    pub to: EntityId,
    pub criteria: FailureCriteria,
    pub window: Option<String>,
    /// Also failed when `from` itself has failed dependencies
    pub inherits_parent: bool,
    pub purpose: DependencyPurpose,
    /// Host parent link: suppresses only when every network parent failed
    pub network: bool,
}

/// What an impacted entity is forced to while its problems last
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImpactPolicy {
    pub change_state: bool,
    pub host_state: Status,
    pub service_state: Status,
}

impl Default for ImpactPolicy {
    fn default() -> Self {
        Self {
            change_state: true,
            host_state: Status::Unreachable,
            service_state: Status::Unknown,
        }
    }
}

impl ImpactPolicy {
    pub fn state_for(&self, kind: EntityKind) -> Status {
        match kind {
            EntityKind::Host => self.host_state,
            EntityKind::Service => self.service_state,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: Vec<DependencyEdge>,
    /// Edges where the key is the dependent
    upstream: HashMap<(EntityId, DependencyPurpose), Vec<usize>>,
    /// Edges where the key is the entity depended upon
    downstream: HashMap<(EntityId, DependencyPurpose), Vec<usize>>,
    pub(crate) policy: ImpactPolicy,
}

impl DependencyGraph {
    pub fn new(policy: ImpactPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    pub fn policy(&self) -> ImpactPolicy {
        self.policy
    }

    /// Add an edge, rejecting self-dependencies and cycles within the same
    /// purpose. Duplicate edges are ignored.
    pub fn link(&mut self, edge: DependencyEdge, registry: &Registry) -> Result<(), GraphError> {
        for id in [edge.from, edge.to] {
            if registry.get(id).is_none() {
                return Err(GraphError::UnknownEntity(id));
            }
        }
        if edge.from == edge.to {
            return Err(GraphError::SelfDependency(edge.from));
        }
        if self
            .parent_edges(edge.to, edge.purpose)
            .any(|e| e.from == edge.from)
        {
            return Ok(());
        }
        if self.reaches(edge.to, edge.from, edge.purpose) {
            return Err(GraphError::Cycle {
                from: edge.from,
                to: edge.to,
                purpose: edge.purpose,
            });
        }

        let index = self.edges.len();
        self.upstream
            .entry((edge.to, edge.purpose))
            .or_default()
            .push(index);
        self.downstream
            .entry((edge.from, edge.purpose))
            .or_default()
            .push(index);
        self.edges.push(edge);
        Ok(())
    }

    /// Whether `target` is downstream of `start`
    fn reaches(&self, start: EntityId, target: EntityId, purpose: DependencyPurpose) -> bool {
        let mut stack = vec![start];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            stack.extend(self.child_edges(current, purpose).map(|e| e.to));
        }
        false
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Edges on which `id` depends
    pub fn parent_edges(
        &self,
        id: EntityId,
        purpose: DependencyPurpose,
    ) -> impl Iterator<Item = &DependencyEdge> {
        self.upstream
            .get(&(id, purpose))
            .into_iter()
            .flatten()
            .map(|i| &self.edges[*i])
    }

    /// Edges depending on `id`
    pub fn child_edges(
        &self,
        id: EntityId,
        purpose: DependencyPurpose,
    ) -> impl Iterator<Item = &DependencyEdge> {
        self.downstream
            .get(&(id, purpose))
            .into_iter()
            .flatten()
            .map(|i| &self.edges[*i])
    }

    /// An edge is failed when its window is open and the parent matches the
    /// criteria, or inherits a failure from the parent's own dependencies.
    pub fn is_edge_failed(
        &self,
        edge: &DependencyEdge,
        registry: &Registry,
        windows: &TimeWindows,
        now: i64,
    ) -> bool {
        if !windows.is_valid(edge.window.as_deref(), now) {
            return false;
        }
        let Some(parent) = registry.get(edge.from) else {
            return false;
        };
        if edge.criteria.matches(parent) {
            return true;
        }
        edge.inherits_parent
            && self
                .parent_edges(edge.from, edge.purpose)
                .any(|e| self.is_edge_failed(e, registry, windows, now))
    }

    /// True when the entity has check parents and every one of them is
    /// DOWN or UNREACHABLE.
    pub fn is_unreachable(&self, id: EntityId, registry: &Registry) -> bool {
        let mut parents = self.parent_edges(id, DependencyPurpose::Check).peekable();
        if parents.peek().is_none() {
            return false;
        }
        parents.all(|edge| {
            registry
                .get(edge.from)
                .map_or(false, |p| p.has_been_checked && p.state.is_down_like())
        })
    }

    /// Check parents whose last result is older than `horizon` seconds, that
    /// run active checks and are not already being checked. A non-OK result
    /// of `id` waits for these before it is applied.
    pub fn unchecked_critical_dependencies(
        &self,
        id: EntityId,
        registry: &Registry,
        windows: &TimeWindows,
        horizon: i64,
        now: i64,
    ) -> Vec<EntityId> {
        let mut out: Vec<EntityId> = self
            .parent_edges(id, DependencyPurpose::Check)
            .filter(|edge| windows.is_valid(edge.window.as_deref(), now))
            .filter_map(|edge| registry.get(edge.from))
            .filter(|parent| {
                parent.last_state_update < now - horizon
                    && parent.settings.active_checks_enabled
                    && !parent.in_checking
                    && !parent.is_business_rule()
            })
            .map(|parent| parent.id)
            .collect();
        out.dedup();
        out
    }

    pub fn has_unchecked_critical_dependency(
        &self,
        id: EntityId,
        registry: &Registry,
        windows: &TimeWindows,
        horizon: i64,
        now: i64,
    ) -> bool {
        !self
            .unchecked_critical_dependencies(id, registry, windows, horizon, now)
            .is_empty()
    }

    /// Whether notifications and problem registration should be withheld:
    /// any failed logical action dependency, or every network parent failed.
    pub fn is_action_suppressed(
        &self,
        id: EntityId,
        registry: &Registry,
        windows: &TimeWindows,
        now: i64,
    ) -> bool {
        let mut network = Vec::new();
        for edge in self.parent_edges(id, DependencyPurpose::Action) {
            let failed = self.is_edge_failed(edge, registry, windows, now);
            if edge.network {
                network.push(failed);
            } else if failed {
                return true;
            }
        }
        !network.is_empty() && network.iter().all(|failed| *failed)
    }
}

/// Dependency graph errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("Unknown entity: {0}")]
    UnknownEntity(EntityId),

    #[error("Entity {0} cannot depend on itself")]
    SelfDependency(EntityId),

    #[error("Dependency {from} -> {to} would create a {purpose:?} cycle")]
    Cycle {
        from: EntityId,
        to: EntityId,
        purpose: DependencyPurpose,
    },

    #[error("Invalid failure criteria: {0}")]
    InvalidCriteria(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CheckSettings;

    pub(crate) fn edge(from: EntityId, to: EntityId, purpose: DependencyPurpose) -> DependencyEdge {
        DependencyEdge {
            from,
            to,
            criteria: FailureCriteria::down_or_unreachable(),
            window: None,
            inherits_parent: false,
            purpose,
            network: true,
        }
    }

    fn set_state(registry: &mut Registry, id: EntityId, state: Status) {
        let entity = registry.get_mut(id).unwrap();
        entity.state = state;
        entity.has_been_checked = true;
    }

    #[test]
    fn test_parse_criteria() {
        let host = FailureCriteria::parse("d,u", EntityKind::Host).unwrap();
        assert_eq!(host, FailureCriteria::down_or_unreachable());

        let service = FailureCriteria::parse("w, c", EntityKind::Service).unwrap();
        assert_eq!(service, FailureCriteria::new([Status::Warning, Status::Critical]));

        assert!(FailureCriteria::parse("n", EntityKind::Host).unwrap().is_empty());
        assert!(FailureCriteria::parse("d", EntityKind::Service).is_err());
    }

    #[test]
    fn test_cycles_are_rejected() {
        let mut registry = Registry::new();
        let a = registry.add_host("a", CheckSettings::default());
        let b = registry.add_host("b", CheckSettings::default());
        let c = registry.add_host("c", CheckSettings::default());

        let mut graph = DependencyGraph::default();
        graph.link(edge(a, b, DependencyPurpose::Action), &registry).unwrap();
        graph.link(edge(b, c, DependencyPurpose::Action), &registry).unwrap();

        assert!(matches!(
            graph.link(edge(c, a, DependencyPurpose::Action), &registry),
            Err(GraphError::Cycle { .. })
        ));
        // a different purpose is a different graph
        assert!(graph.link(edge(c, a, DependencyPurpose::Check), &registry).is_ok());
        assert!(matches!(
            graph.link(edge(a, a, DependencyPurpose::Check), &registry),
            Err(GraphError::SelfDependency(_))
        ));
    }

    #[test]
    fn test_is_unreachable_requires_all_parents_down() {
        let mut registry = Registry::new();
        let router1 = registry.add_host("router1", CheckSettings::default());
        let router2 = registry.add_host("router2", CheckSettings::default());
        let server = registry.add_host("server", CheckSettings::default());

        let mut graph = DependencyGraph::default();
        graph.link(edge(router1, server, DependencyPurpose::Check), &registry).unwrap();
        graph.link(edge(router2, server, DependencyPurpose::Check), &registry).unwrap();

        assert!(!graph.is_unreachable(server, &registry));
        set_state(&mut registry, router1, Status::Critical);
        set_state(&mut registry, router2, Status::Ok);
        assert!(!graph.is_unreachable(server, &registry));
        set_state(&mut registry, router2, Status::Unreachable);
        assert!(graph.is_unreachable(server, &registry));
        assert!(!graph.is_unreachable(router1, &registry));
    }

    #[test]
    fn test_unchecked_dependencies() {
        let mut registry = Registry::new();
        let router = registry.add_host("router", CheckSettings::default());
        let server = registry.add_host("server", CheckSettings::default());
        let mut graph = DependencyGraph::default();
        graph.link(edge(router, server, DependencyPurpose::Check), &registry).unwrap();
        let windows = TimeWindows::new();

        registry.get_mut(router).unwrap().last_state_update = 900;
        assert_eq!(
            graph.unchecked_critical_dependencies(server, &registry, &windows, 30, 1000),
            vec![router]
        );

        registry.get_mut(router).unwrap().last_state_update = 990;
        assert!(!graph.has_unchecked_critical_dependency(server, &registry, &windows, 30, 1000));

        registry.get_mut(router).unwrap().last_state_update = 900;
        registry.get_mut(router).unwrap().in_checking = true;
        assert!(!graph.has_unchecked_critical_dependency(server, &registry, &windows, 30, 1000));
    }

    #[test]
    fn test_action_suppression() {
        let mut registry = Registry::new();
        let router = registry.add_host("router", CheckSettings::default());
        let backup = registry.add_host("backup", CheckSettings::default());
        let server = registry.add_host("server", CheckSettings::default());
        let host = registry.add_host("app", CheckSettings::default());
        let svc = registry.add_service(host, "db", CheckSettings::default()).unwrap();
        let windows = TimeWindows::new();

        let mut graph = DependencyGraph::default();
        graph.link(edge(router, server, DependencyPurpose::Action), &registry).unwrap();
        graph.link(edge(backup, server, DependencyPurpose::Action), &registry).unwrap();
        let mut logical = edge(host, svc, DependencyPurpose::Action);
        logical.network = false;
        graph.link(logical, &registry).unwrap();

        set_state(&mut registry, router, Status::Critical);
        assert!(!graph.is_action_suppressed(server, &registry, &windows, 0));
        set_state(&mut registry, backup, Status::Critical);
        assert!(graph.is_action_suppressed(server, &registry, &windows, 0));

        assert!(!graph.is_action_suppressed(svc, &registry, &windows, 0));
        set_state(&mut registry, host, Status::Critical);
        assert!(graph.is_action_suppressed(svc, &registry, &windows, 0));
    }

    #[test]
    fn test_inherited_failure() {
        let mut registry = Registry::new();
        let core = registry.add_host("core", CheckSettings::default());
        let switch = registry.add_host("switch", CheckSettings::default());
        let server = registry.add_host("server", CheckSettings::default());
        let windows = TimeWindows::new();

        let mut graph = DependencyGraph::default();
        graph.link(edge(core, switch, DependencyPurpose::Action), &registry).unwrap();
        let mut inherited = edge(switch, server, DependencyPurpose::Action);
        inherited.inherits_parent = true;
        graph.link(inherited.clone(), &registry).unwrap();

        set_state(&mut registry, switch, Status::Ok);
        set_state(&mut registry, core, Status::Critical);
        assert!(graph.is_edge_failed(&inherited, &registry, &windows, 0));

        inherited.inherits_parent = false;
        assert!(!graph.is_edge_failed(&inherited, &registry, &windows, 0));
    }
}
