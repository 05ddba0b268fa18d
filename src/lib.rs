//! Vigil: host and service health-monitoring core
//!
//! Decides when each monitored entity is checked, turns check results into
//! validated SOFT/HARD alert states, propagates root problems and their
//! impacts across a dependency graph, correlates entities through boolean
//! business rules and schedules notifications with escalations.
//!
//! # Features
//!
//! - **Alert state machine**: attempts, SOFT/HARD, volatile services, hard
//!   unknown/unreachable phases, event and problem ids
//! - **Dependency graph**: check/action edges, unreachability, dependency
//!   checks, problem/impact propagation, business impact
//! - **Business rules**: `&`, `|`, `!`, `N of:` over host and service
//!   selectors (name, group, regex, label, tag)
//! - **Notifications**: windows, first delay, repeats, escalations, zombies
//! - **Flapping, freshness, acknowledgements, downtimes**
//!
//! Commands are never executed here: checks, notifications and event
//! handlers are queued as [`model::Action`]s for an external executor.
//!
//! # Example
//!
//! ```no_run
//! use vigil::config::EngineConfig;
//! use vigil::engine::Engine;
//! use vigil::model::{CheckResult, CheckSettings};
//!
//! let mut engine = Engine::new(EngineConfig::default());
//! let db1 = engine.add_host("db1", CheckSettings::default());
//! engine.add_host("db2", CheckSettings::default());
//!
//! engine.consume_result(db1, CheckResult::new(2, "DOWN"), 1_700_000_000).unwrap();
//! let state = engine.evaluate_rule("db1 | db2").unwrap();
//! println!("Cluster: {:?}", state);
//! ```

pub mod api;
pub mod config;
pub mod engine;
pub mod graph;
pub mod inventory;
pub mod model;
pub mod notify;
pub mod rules;
pub mod worker;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::{Engine, EngineError, TickReport};
pub use inventory::{Inventory, InventoryError};
pub use model::{CheckResult, CheckSettings, EntityId, StateType, Status};
