//! Dependency graph: unreachability, dependency checks, problem/impact
//! propagation and business impact

pub mod dependency;
pub mod impact;

pub use dependency::{
    DependencyEdge, DependencyGraph, DependencyPurpose, FailureCriteria, GraphError, ImpactPolicy,
};
