//! Business-rule tree

use std::fmt;

use crate::model::EntityId;

/// One X-of-Y threshold: absolute count (negative counts from the total) or
/// a percentage of the children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threshold {
    Count(i64),
    Percent(i64),
}

impl Threshold {
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        match text.strip_suffix('%') {
            Some(number) => number.parse().ok().map(Threshold::Percent),
            None => text.parse().ok().map(Threshold::Count),
        }
    }

    /// Whether `count` children out of `total` meet this threshold
    pub fn is_met(self, total: usize, count: usize) -> bool {
        let total = total as i128;
        let count = count as i128;
        match self {
            Threshold::Count(n) => {
                let n = i128::from(n);
                let needed = if n < 0 { (total + n).max(0) } else { n };
                count >= needed
            }
            Threshold::Percent(p) => {
                let p = i128::from(p);
                let needed = if p < 0 { (100 + p).max(0) } else { p };
                count * 100 >= needed * total
            }
        }
    }

    /// Percentages are bounded to -100..=100
    pub fn is_in_range(self) -> bool {
        match self {
            Threshold::Count(_) => true,
            Threshold::Percent(p) => (-100..=100).contains(&p),
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Threshold::Count(n) => write!(f, "{}", n),
            Threshold::Percent(p) => write!(f, "{}%", p),
        }
    }
}

/// `(ok, warn, crit)` triple of an X-of-Y node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NofThresholds {
    pub ok: Threshold,
    pub warn: Threshold,
    pub crit: Threshold,
    /// `A,B,C of:` rather than `N of:`
    pub multi: bool,
    normalized: bool,
}

impl NofThresholds {
    /// `N of:`; warn and crit default to "all children"
    pub fn single(ok: Threshold) -> Self {
        Self {
            ok,
            warn: Threshold::Count(0),
            crit: Threshold::Count(0),
            multi: false,
            normalized: false,
        }
    }

    /// `A,B,C of:`
    pub fn multi(ok: Threshold, warn: Threshold, crit: Threshold) -> Self {
        Self {
            ok,
            warn,
            crit,
            multi: true,
            normalized: false,
        }
    }

    /// Two-value form: behaves like `N of:` with an explicit warn count
    pub fn partial(ok: Threshold, warn: Threshold) -> Self {
        Self {
            warn,
            ..Self::single(ok)
        }
    }

    /// Replace every absolute `0` with the number of children. Runs once;
    /// later calls are no-ops.
    pub fn normalize(&mut self, children: usize) {
        if self.normalized {
            return;
        }
        for threshold in [&mut self.ok, &mut self.warn, &mut self.crit] {
            if *threshold == Threshold::Count(0) {
                *threshold = Threshold::Count(children as i64);
            }
        }
        self.normalized = true;
    }

    pub fn is_normalized(&self) -> bool {
        self.normalized
    }
}

/// Node of a business-rule tree. Leaves hold arena ids.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleNode {
    LeafHost {
        entity: EntityId,
        negated: bool,
    },
    LeafService {
        entity: EntityId,
        negated: bool,
    },
    And {
        children: Vec<RuleNode>,
        negated: bool,
    },
    Or {
        children: Vec<RuleNode>,
        negated: bool,
    },
    Nof {
        children: Vec<RuleNode>,
        thresholds: NofThresholds,
        negated: bool,
    },
}

impl RuleNode {
    pub fn and(children: Vec<RuleNode>) -> Self {
        RuleNode::And {
            children,
            negated: false,
        }
    }

    pub fn or(children: Vec<RuleNode>) -> Self {
        RuleNode::Or {
            children,
            negated: false,
        }
    }

    /// X-of-Y node; zero thresholds are resolved against `children` here
    pub fn nof(children: Vec<RuleNode>, mut thresholds: NofThresholds) -> Self {
        thresholds.normalize(children.len());
        RuleNode::Nof {
            children,
            thresholds,
            negated: false,
        }
    }

    pub fn host(entity: EntityId) -> Self {
        RuleNode::LeafHost {
            entity,
            negated: false,
        }
    }

    pub fn service(entity: EntityId) -> Self {
        RuleNode::LeafService {
            entity,
            negated: false,
        }
    }

    pub fn is_negated(&self) -> bool {
        match self {
            RuleNode::LeafHost { negated, .. }
            | RuleNode::LeafService { negated, .. }
            | RuleNode::And { negated, .. }
            | RuleNode::Or { negated, .. }
            | RuleNode::Nof { negated, .. } => *negated,
        }
    }

    /// Flip the negation flag
    pub fn negate(mut self) -> Self {
        match &mut self {
            RuleNode::LeafHost { negated, .. }
            | RuleNode::LeafService { negated, .. }
            | RuleNode::And { negated, .. }
            | RuleNode::Or { negated, .. }
            | RuleNode::Nof { negated, .. } => *negated = !*negated,
        }
        self
    }

    pub fn children(&self) -> &[RuleNode] {
        match self {
            RuleNode::LeafHost { .. } | RuleNode::LeafService { .. } => &[],
            RuleNode::And { children, .. }
            | RuleNode::Or { children, .. }
            | RuleNode::Nof { children, .. } => children,
        }
    }

    /// Every entity referenced by a leaf, depth first
    pub fn leaf_entities(&self) -> Vec<EntityId> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves(&self, out: &mut Vec<EntityId>) {
        match self {
            RuleNode::LeafHost { entity, .. } | RuleNode::LeafService { entity, .. } => {
                out.push(*entity)
            }
            _ => {
                for child in self.children() {
                    child.collect_leaves(out);
                }
            }
        }
    }
}
