//! Data model: states, entities, check results, actions and time windows

pub mod check;
pub mod entity;
pub mod modulation;
pub mod registry;
pub mod state;
pub mod timewindow;

pub use check::{Action, ActionKind, CheckResult};
pub use entity::{Acknowledgement, CheckSettings, CheckableEntity, EntityId, HardUnknownPhase};
pub use modulation::{modulate_exit_code, BusinessImpactModulation, ResultModulation};
pub use registry::Registry;
pub use state::{EntityKind, StateType, Status};
pub use timewindow::{Always, Daily, Never, Ranges, TimeWindow, TimeWindows, WindowSpec};
