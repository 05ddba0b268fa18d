//! Problem/impact propagation over action dependencies
//!
//! `is_problem`, `impacts`, `is_impact` and `source_problems` are only ever
//! written here, which keeps `x in p.impacts <=> p in x.source_problems`.

use std::collections::HashSet;

use super::dependency::{DependencyGraph, DependencyPurpose};
use crate::model::{EntityId, Registry, TimeWindows};

impl DependencyGraph {
    /// Mark `problem` as a root problem and propagate impacts downstream.
    ///
    /// Returns the entities that newly gained `problem` as a source.
    pub fn register_problem(
        &self,
        registry: &mut Registry,
        windows: &TimeWindows,
        problem: EntityId,
        now: i64,
    ) -> Vec<EntityId> {
        if registry.get(problem).is_none() {
            return Vec::new();
        }

        let mut visited = HashSet::from([problem]);
        let mut impacted = Vec::new();
        self.propagate(registry, windows, problem, problem, now, &mut visited, &mut impacted);

        if let Some(entity) = registry.get_mut(problem) {
            entity.is_problem = true;
            entity.impacts.extend(impacted.iter().copied());
        }
        self.recompute_business_impact(registry, windows, problem, now);

        if !impacted.is_empty() {
            tracing::debug!(
                problem = %problem,
                impacts = impacted.len(),
                "Registered problem"
            );
        }
        debug_assert!(self.is_consistent(registry));
        impacted
    }

    #[allow(clippy::too_many_arguments)]
    fn propagate(
        &self,
        registry: &mut Registry,
        windows: &TimeWindows,
        root: EntityId,
        from: EntityId,
        now: i64,
        visited: &mut HashSet<EntityId>,
        impacted: &mut Vec<EntityId>,
    ) {
        let children: Vec<EntityId> = match registry.get(from) {
            Some(parent) => self
                .child_edges(from, DependencyPurpose::Action)
                .filter(|edge| edge.criteria.matches(parent))
                .filter(|edge| windows.is_valid(edge.window.as_deref(), now))
                .map(|edge| edge.to)
                .collect(),
            None => return,
        };

        for child in children {
            if !visited.insert(child) {
                continue;
            }

            // An impact is not its own problem any more
            if registry.get(child).map_or(false, |e| e.is_problem) {
                self.unregister_problem(registry, windows, child, now);
            }

            let policy = self.policy;
            let Some(entity) = registry.get_mut(child) else {
                continue;
            };
            if entity.source_problems.contains(&root) {
                continue;
            }
            if !entity.is_impact {
                entity.is_impact = true;
                entity.state_before_impact = Some(entity.state);
                entity.state_changed_since_impact = false;
                if policy.change_state {
                    entity.state = policy.state_for(entity.kind);
                }
            }
            entity.source_problems.insert(root);
            impacted.push(child);

            self.propagate(registry, windows, root, child, now, visited, impacted);
        }
    }

    /// Clear `problem`'s problem status and release each of its impacts.
    ///
    /// Returns the entities that stopped being impacts altogether.
    pub fn unregister_problem(
        &self,
        registry: &mut Registry,
        windows: &TimeWindows,
        problem: EntityId,
        now: i64,
    ) -> Vec<EntityId> {
        let impacts = match registry.get_mut(problem) {
            Some(entity) => {
                entity.is_problem = false;
                std::mem::take(&mut entity.impacts)
            }
            None => return Vec::new(),
        };

        let released: Vec<EntityId> = impacts
            .into_iter()
            .filter(|impact| self.release_impact(registry, problem, *impact))
            .collect();
        self.recompute_business_impact(registry, windows, problem, now);

        debug_assert!(self.is_consistent(registry));
        released
    }

    /// Drop `problem` from the impact's sources; when none remain the entity
    /// is no longer an impact and, unless a real result changed it since,
    /// returns to its pre-impact state.
    pub fn release_impact(&self, registry: &mut Registry, problem: EntityId, impact: EntityId) -> bool {
        let policy = self.policy;
        let Some(entity) = registry.get_mut(impact) else {
            return false;
        };
        entity.source_problems.remove(&problem);
        if !entity.source_problems.is_empty() || !entity.is_impact {
            return false;
        }

        entity.is_impact = false;
        let saved = entity.state_before_impact.take();
        if policy.change_state && !entity.state_changed_since_impact {
            if let Some(state) = saved {
                entity.state = state;
            }
        }
        entity.state_changed_since_impact = false;
        true
    }

    /// Effective business impact: the first active modulation wins;
    /// otherwise a problem carries the maximum of its own and its impacts'
    /// weights, and anything else falls back to its configured weight.
    pub fn recompute_business_impact(
        &self,
        registry: &mut Registry,
        windows: &TimeWindows,
        id: EntityId,
        now: i64,
    ) {
        let Some(entity) = registry.get(id) else {
            return;
        };

        let modulated = entity
            .settings
            .business_impact_modulations
            .iter()
            .find(|m| windows.is_valid(m.window.as_deref(), now))
            .map(|m| m.business_impact);
        let own = modulated.unwrap_or(entity.own_business_impact);

        let value = if entity.impacts.is_empty() {
            own
        } else {
            entity
                .impacts
                .iter()
                .filter_map(|i| registry.get(*i))
                .map(|i| i.business_impact)
                .fold(own, u8::max)
        };

        if let Some(entity) = registry.get_mut(id) {
            entity.business_impact = value;
        }
    }

    /// Bidirectional problem/impact bookkeeping holds for every entity
    pub fn is_consistent(&self, registry: &Registry) -> bool {
        registry.iter().all(|entity| {
            entity.impacts.iter().all(|i| {
                registry
                    .get(*i)
                    .map_or(false, |impact| impact.source_problems.contains(&entity.id))
            }) && entity.source_problems.iter().all(|p| {
                registry
                    .get(*p)
                    .map_or(false, |problem| problem.impacts.contains(&entity.id))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DependencyEdge, FailureCriteria, ImpactPolicy};
    use crate::model::{BusinessImpactModulation, CheckSettings, Status};

    fn action_edge(from: EntityId, to: EntityId) -> DependencyEdge {
        DependencyEdge {
            from,
            to,
            criteria: FailureCriteria::new([Status::Critical, Status::Unknown, Status::Unreachable]),
            window: None,
            inherits_parent: false,
            purpose: DependencyPurpose::Action,
            network: true,
        }
    }

    fn fail(registry: &mut Registry, id: EntityId) {
        let entity = registry.get_mut(id).unwrap();
        entity.state = Status::Critical;
        entity.has_been_checked = true;
    }

    /// router -> switch -> server, with server/http hanging off server
    fn chain() -> (Registry, DependencyGraph, [EntityId; 4]) {
        let mut registry = Registry::new();
        let router = registry.add_host("router", CheckSettings::default());
        let switch = registry.add_host("switch", CheckSettings::default());
        let server = registry.add_host("server", CheckSettings::default());
        let http = registry.add_service(server, "http", CheckSettings::default()).unwrap();
        for id in [router, switch, server, http] {
            registry.get_mut(id).unwrap().has_been_checked = true;
        }

        let mut graph = DependencyGraph::new(ImpactPolicy::default());
        graph.link(action_edge(router, switch), &registry).unwrap();
        graph.link(action_edge(switch, server), &registry).unwrap();
        graph.link(action_edge(server, http), &registry).unwrap();
        (registry, graph, [router, switch, server, http])
    }

    #[test]
    fn test_impacts_cascade_through_forced_states() {
        let (mut registry, graph, [router, switch, server, http]) = chain();
        let windows = TimeWindows::new();

        fail(&mut registry, router);
        let impacted = graph.register_problem(&mut registry, &windows, router, 0);
        assert_eq!(impacted, vec![switch, server, http]);

        assert_eq!(registry.get(switch).unwrap().state, Status::Unreachable);
        assert_eq!(registry.get(http).unwrap().state, Status::Unknown);
        assert!(registry.get(router).unwrap().is_problem);
        assert!(graph.is_consistent(&registry));

        let released = graph.unregister_problem(&mut registry, &windows, router, 0);
        assert_eq!(released.len(), 3);
        assert_eq!(registry.get(switch).unwrap().state, Status::Ok);
        assert_eq!(registry.get(http).unwrap().state, Status::Ok);
        assert!(!registry.get(http).unwrap().is_impact);
    }

    #[test]
    fn test_two_problems_share_an_impact() {
        let mut registry = Registry::new();
        let a = registry.add_host("a", CheckSettings::default());
        let b = registry.add_host("b", CheckSettings::default());
        let x = registry.add_host("x", CheckSettings::default());
        registry.get_mut(x).unwrap().has_been_checked = true;

        let mut graph = DependencyGraph::default();
        graph.link(action_edge(a, x), &registry).unwrap();
        graph.link(action_edge(b, x), &registry).unwrap();
        let windows = TimeWindows::new();

        fail(&mut registry, a);
        fail(&mut registry, b);
        graph.register_problem(&mut registry, &windows, a, 0);
        graph.register_problem(&mut registry, &windows, b, 0);
        assert_eq!(registry.get(x).unwrap().source_problems.len(), 2);

        assert!(graph.unregister_problem(&mut registry, &windows, a, 0).is_empty());
        let entity = registry.get(x).unwrap();
        assert!(entity.is_impact);
        assert_eq!(entity.state, Status::Unreachable);

        assert_eq!(graph.unregister_problem(&mut registry, &windows, b, 0), vec![x]);
        let entity = registry.get(x).unwrap();
        assert!(!entity.is_impact);
        assert_eq!(entity.state, Status::Ok);
        assert!(graph.is_consistent(&registry));
    }

    #[test]
    fn test_problem_fans_out_to_two_impacts() {
        let mut registry = Registry::new();
        let p = registry.add_host("p", CheckSettings::default());
        let x = registry.add_host("x", CheckSettings::default());
        let y = registry.add_host("y", CheckSettings::default());
        for id in [x, y] {
            registry.get_mut(id).unwrap().has_been_checked = true;
        }

        let mut graph = DependencyGraph::default();
        graph.link(action_edge(p, x), &registry).unwrap();
        graph.link(action_edge(p, y), &registry).unwrap();
        let windows = TimeWindows::new();

        fail(&mut registry, p);
        let mut impacted = graph.register_problem(&mut registry, &windows, p, 0);
        impacted.sort();
        assert_eq!(impacted, vec![x, y]);
        for id in [x, y] {
            let entity = registry.get(id).unwrap();
            assert!(entity.is_impact);
            assert_eq!(entity.state, Status::Unreachable);
        }

        let mut released = graph.unregister_problem(&mut registry, &windows, p, 0);
        released.sort();
        assert_eq!(released, vec![x, y]);
        for id in [x, y] {
            let entity = registry.get(id).unwrap();
            assert!(!entity.is_impact);
            assert_eq!(entity.state, Status::Ok);
            assert!(entity.source_problems.is_empty());
        }
        assert!(!registry.get(p).unwrap().is_problem);

        // a second release finds nothing left to restore
        assert!(graph.unregister_problem(&mut registry, &windows, p, 0).is_empty());
        assert_eq!(registry.get(x).unwrap().state, Status::Ok);
        assert!(graph.is_consistent(&registry));
    }

    #[test]
    fn test_real_result_survives_release() {
        let (mut registry, graph, [router, switch, ..]) = chain();
        let windows = TimeWindows::new();

        fail(&mut registry, router);
        graph.register_problem(&mut registry, &windows, router, 0);

        let entity = registry.get_mut(switch).unwrap();
        entity.state = Status::Critical;
        entity.state_changed_since_impact = true;

        graph.unregister_problem(&mut registry, &windows, router, 0);
        assert_eq!(registry.get(switch).unwrap().state, Status::Critical);
    }

    #[test]
    fn test_impact_loses_problem_status() {
        let (mut registry, graph, [router, switch, server, _]) = chain();
        let windows = TimeWindows::new();

        fail(&mut registry, switch);
        graph.register_problem(&mut registry, &windows, switch, 0);
        assert!(registry.get(server).unwrap().is_impact);

        fail(&mut registry, router);
        graph.register_problem(&mut registry, &windows, router, 0);
        let switch_entity = registry.get(switch).unwrap();
        assert!(!switch_entity.is_problem);
        assert!(switch_entity.is_impact);
        assert!(switch_entity.impacts.is_empty());
        assert_eq!(
            registry.get(server).unwrap().source_problems.iter().copied().collect::<Vec<_>>(),
            vec![router]
        );
        assert!(graph.is_consistent(&registry));
    }

    #[test]
    fn test_business_impact_follows_impacts() {
        let (mut registry, graph, [router, _, _, http]) = chain();
        let windows = TimeWindows::new();
        {
            let entity = registry.get_mut(http).unwrap();
            entity.business_impact = 5;
            entity.own_business_impact = 5;
        }

        fail(&mut registry, router);
        graph.register_problem(&mut registry, &windows, router, 0);
        assert_eq!(registry.get(router).unwrap().business_impact, 5);

        graph.unregister_problem(&mut registry, &windows, router, 0);
        assert_eq!(registry.get(router).unwrap().business_impact, 2);

        registry
            .get_mut(router)
            .unwrap()
            .settings
            .business_impact_modulations
            .push(BusinessImpactModulation {
                business_impact: 0,
                window: None,
            });
        graph.recompute_business_impact(&mut registry, &windows, router, 0);
        assert_eq!(registry.get(router).unwrap().business_impact, 0);
    }
}
