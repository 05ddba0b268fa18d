//! Business-rule evaluation over a read-only state snapshot

use std::collections::HashMap;

use super::node::RuleNode;
use crate::model::{EntityId, EntityKind, Registry, Status};

/// What the evaluator needs to know about a leaf entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafState {
    pub kind: EntityKind,
    pub hard_state: Status,
    pub acknowledged: bool,
    pub in_downtime: bool,
}

/// Consistent, immutable view of entity states
pub trait StateSnapshot {
    fn leaf_state(&self, id: EntityId) -> Option<LeafState>;
}

impl StateSnapshot for Registry {
    fn leaf_state(&self, id: EntityId) -> Option<LeafState> {
        self.get(id).map(|entity| LeafState {
            kind: entity.kind,
            hard_state: entity.last_hard_state,
            acknowledged: entity.is_acknowledged(),
            in_downtime: entity.in_downtime(),
        })
    }
}

impl StateSnapshot for HashMap<EntityId, LeafState> {
    fn leaf_state(&self, id: EntityId) -> Option<LeafState> {
        self.get(&id).copied()
    }
}

/// Service symmetry: OK and CRITICAL swap, WARNING and UNKNOWN stay
fn reverse_service_state(state: Status) -> Status {
    match state {
        Status::Ok => Status::Critical,
        Status::Critical => Status::Ok,
        other => other,
    }
}

/// Host symmetry: UP and DOWN swap
fn reverse_host_state(state: Status) -> Status {
    match state {
        Status::Ok => Status::Critical,
        Status::Critical => Status::Ok,
        other => other,
    }
}

/// Worst of a set of states, CRITICAL dominating UNKNOWN
fn worst_state(states: &[Status]) -> Status {
    if states.contains(&Status::Critical) {
        return Status::Critical;
    }
    states.iter().copied().max().unwrap_or(Status::Unknown)
}

fn leaf_value(snapshot: &dyn StateSnapshot, id: EntityId, negated: bool) -> Status {
    let Some(leaf) = snapshot.leaf_state(id) else {
        return Status::Unknown;
    };

    // Acknowledged or downtimed problems count as handled
    let state = if leaf.acknowledged || leaf.in_downtime {
        Status::Ok
    } else {
        match (leaf.kind, leaf.hard_state) {
            (EntityKind::Host, Status::Unreachable) => Status::Critical,
            (EntityKind::Service, Status::Unreachable) => Status::Unknown,
            (_, state) => state,
        }
    };

    match (negated, leaf.kind) {
        (false, _) => state,
        (true, EntityKind::Host) => reverse_host_state(state),
        (true, EntityKind::Service) => reverse_service_state(state),
    }
}

fn apply_negation(state: Status, negated: bool) -> Status {
    if negated {
        reverse_service_state(state)
    } else {
        state
    }
}

/// Aggregate severity of a rule tree: 0 OK, 1 WARNING, 2 CRITICAL, 3 UNKNOWN
pub fn evaluate(node: &RuleNode, snapshot: &dyn StateSnapshot) -> Status {
    match node {
        RuleNode::LeafHost { entity, negated } | RuleNode::LeafService { entity, negated } => {
            leaf_value(snapshot, *entity, *negated)
        }
        RuleNode::Or { children, negated } => {
            let best = children
                .iter()
                .map(|child| evaluate(child, snapshot))
                .min()
                .unwrap_or(Status::Unknown);
            apply_negation(best, *negated)
        }
        RuleNode::And { children, negated } => {
            let states: Vec<Status> = children.iter().map(|c| evaluate(c, snapshot)).collect();
            apply_negation(worst_state(&states), *negated)
        }
        RuleNode::Nof {
            children,
            thresholds,
            negated,
        } => {
            debug_assert!(thresholds.is_normalized(), "X-of-Y thresholds not normalized");
            let states: Vec<Status> = children.iter().map(|c| evaluate(c, snapshot)).collect();
            let total = states.len();
            let ok = states.iter().filter(|s| **s == Status::Ok).count();
            let warn = states.iter().filter(|s| **s == Status::Warning).count();
            let crit = states.iter().filter(|s| **s == Status::Critical).count();

            let state = if thresholds.crit.is_met(total, crit) {
                Status::Critical
            } else if thresholds.warn.is_met(total, warn + crit) {
                Status::Warning
            } else if thresholds.ok.is_met(total, ok) {
                Status::Ok
            } else if thresholds.multi {
                worst_state(&states)
            } else {
                Status::Ok
            };
            apply_negation(state, *negated)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::node::{NofThresholds, Threshold};

    fn service(state: Status) -> LeafState {
        LeafState {
            kind: EntityKind::Service,
            hard_state: state,
            acknowledged: false,
            in_downtime: false,
        }
    }

    fn snapshot(states: &[Status]) -> HashMap<EntityId, LeafState> {
        states
            .iter()
            .enumerate()
            .map(|(i, s)| (EntityId(i), service(*s)))
            .collect()
    }

    fn leaves(n: usize) -> Vec<RuleNode> {
        (0..n).map(|i| RuleNode::service(EntityId(i))).collect()
    }

    const ALL: [Status; 4] = [Status::Ok, Status::Warning, Status::Critical, Status::Unknown];

    #[test]
    fn test_or_is_min() {
        for x in ALL {
            for y in ALL {
                let snap = snapshot(&[x, y]);
                assert_eq!(evaluate(&RuleNode::or(leaves(2)), &snap), x.min(y));
            }
        }
    }

    #[test]
    fn test_and_is_max_with_critical_priority() {
        for x in ALL {
            for y in ALL {
                let snap = snapshot(&[x, y]);
                let expected = if x == Status::Critical || y == Status::Critical {
                    Status::Critical
                } else {
                    x.max(y)
                };
                assert_eq!(evaluate(&RuleNode::and(leaves(2)), &snap), expected);
            }
        }
    }

    #[test]
    fn test_double_negation_is_identity() {
        for x in ALL {
            for y in ALL {
                let snap = snapshot(&[x, y]);
                for node in [RuleNode::or(leaves(2)), RuleNode::and(leaves(2)), RuleNode::service(EntityId(0))] {
                    let twice = node.clone().negate().negate();
                    assert_eq!(evaluate(&twice, &snap), evaluate(&node, &snap));
                }
            }
        }
    }

    #[test]
    fn test_negated_service_symmetry() {
        let snap = snapshot(&[Status::Ok, Status::Warning, Status::Critical, Status::Unknown]);
        let negated = |i| RuleNode::service(EntityId(i)).negate();
        assert_eq!(evaluate(&negated(0), &snap), Status::Critical);
        assert_eq!(evaluate(&negated(1), &snap), Status::Warning);
        assert_eq!(evaluate(&negated(2), &snap), Status::Ok);
        assert_eq!(evaluate(&negated(3), &snap), Status::Unknown);
    }

    #[test]
    fn test_host_leaf_maps_unreachable_to_critical() {
        let mut snap = HashMap::new();
        snap.insert(
            EntityId(0),
            LeafState {
                kind: EntityKind::Host,
                hard_state: Status::Unreachable,
                acknowledged: false,
                in_downtime: false,
            },
        );
        assert_eq!(evaluate(&RuleNode::host(EntityId(0)), &snap), Status::Critical);
        assert_eq!(evaluate(&RuleNode::host(EntityId(0)).negate(), &snap), Status::Ok);
    }

    #[test]
    fn test_acknowledged_or_downtimed_child_counts_as_ok() {
        let mut snap = snapshot(&[Status::Critical, Status::Critical]);
        let rule = RuleNode::or(leaves(2));
        assert_eq!(evaluate(&rule, &snap), Status::Critical);

        snap.get_mut(&EntityId(0)).unwrap().acknowledged = true;
        assert_eq!(evaluate(&rule, &snap), Status::Ok);

        snap.get_mut(&EntityId(0)).unwrap().acknowledged = false;
        snap.get_mut(&EntityId(1)).unwrap().in_downtime = true;
        assert_eq!(evaluate(&rule, &snap), Status::Ok);
    }

    #[test]
    fn test_db_or_scenarios() {
        let rule = RuleNode::or(leaves(2));
        assert_eq!(evaluate(&rule, &snapshot(&[Status::Ok, Status::Ok])), Status::Ok);
        assert_eq!(
            evaluate(&rule, &snapshot(&[Status::Critical, Status::Critical])),
            Status::Critical
        );
        assert_eq!(
            evaluate(&rule, &snapshot(&[Status::Critical, Status::Warning])),
            Status::Warning
        );
    }

    #[test]
    fn test_and_scenarios() {
        let rule = RuleNode::and(leaves(2));
        assert_eq!(evaluate(&rule, &snapshot(&[Status::Ok, Status::Ok])), Status::Ok);
        assert_eq!(
            evaluate(&rule, &snapshot(&[Status::Ok, Status::Critical])),
            Status::Critical
        );
        assert_eq!(
            evaluate(&rule, &snapshot(&[Status::Warning, Status::Warning])),
            Status::Warning
        );
    }

    #[test]
    fn test_five_one_one_of() {
        let thresholds = NofThresholds::multi(
            Threshold::Count(5),
            Threshold::Count(1),
            Threshold::Count(1),
        );
        let rule = RuleNode::nof(leaves(5), thresholds);

        assert_eq!(evaluate(&rule, &snapshot(&[Status::Ok; 5])), Status::Ok);

        let mut states = [Status::Ok; 5];
        states[2] = Status::Critical;
        assert_eq!(evaluate(&rule, &snapshot(&states)), Status::Critical);

        let mut states = [Status::Ok; 5];
        states[0] = Status::Warning;
        states[4] = Status::Warning;
        assert_eq!(evaluate(&rule, &snapshot(&states)), Status::Warning);
    }

    #[test]
    fn test_nof_fallback_differs_between_single_and_multi() {
        // Nothing satisfied: 1 OK out of 3 with "2 of:" style thresholds and
        // no tier reaching "all children".
        let states = [Status::Ok, Status::Warning, Status::Unknown];

        let single = RuleNode::nof(leaves(3), NofThresholds::single(Threshold::Count(2)));
        assert_eq!(evaluate(&single, &snapshot(&states)), Status::Ok);

        let multi = RuleNode::nof(
            leaves(3),
            NofThresholds::multi(Threshold::Count(2), Threshold::Count(3), Threshold::Count(3)),
        );
        assert_eq!(evaluate(&multi, &snapshot(&states)), Status::Unknown);
    }

    #[test]
    fn test_single_of_reaches_critical_only_when_all_critical() {
        let rule = RuleNode::nof(leaves(3), NofThresholds::single(Threshold::Count(2)));
        let states = [Status::Critical, Status::Critical, Status::Ok];
        // 1 OK < 2 and only 2 of 3 critical: falls back to OK
        assert_eq!(evaluate(&rule, &snapshot(&states)), Status::Ok);
        assert_eq!(evaluate(&rule, &snapshot(&[Status::Critical; 3])), Status::Critical);
    }

    #[test]
    fn test_negated_nof() {
        let rule = RuleNode::nof(leaves(2), NofThresholds::single(Threshold::Count(1))).negate();
        assert_eq!(evaluate(&rule, &snapshot(&[Status::Ok, Status::Ok])), Status::Critical);
    }

    #[test]
    fn test_percent_thresholds() {
        let rule = RuleNode::nof(
            leaves(4),
            NofThresholds::multi(
                Threshold::Percent(100),
                Threshold::Percent(50),
                Threshold::Percent(50),
            ),
        );
        let states = [Status::Critical, Status::Critical, Status::Ok, Status::Ok];
        assert_eq!(evaluate(&rule, &snapshot(&states)), Status::Critical);
        let states = [Status::Critical, Status::Warning, Status::Ok, Status::Ok];
        assert_eq!(evaluate(&rule, &snapshot(&states)), Status::Warning);
    }

    #[test]
    fn test_missing_entity_is_unknown() {
        let snap: HashMap<EntityId, LeafState> = HashMap::new();
        assert_eq!(evaluate(&RuleNode::service(EntityId(9)), &snap), Status::Unknown);
        assert_eq!(evaluate(&RuleNode::and(Vec::new()), &snap), Status::Unknown);
    }
}
