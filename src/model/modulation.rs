//! Result and business-impact modulations

use serde::{Deserialize, Serialize};

use super::timewindow::TimeWindows;

/// Rewrites selected exit codes while its window is active
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultModulation {
    /// Exit codes to rewrite; empty means every code
    #[serde(default)]
    pub exit_codes: Vec<i32>,
    pub replacement: i32,
    #[serde(default)]
    pub window: Option<String>,
}

impl ResultModulation {
    pub fn apply(&self, exit_code: i32, windows: &TimeWindows, now: i64) -> i32 {
        if !windows.is_valid(self.window.as_deref(), now) {
            return exit_code;
        }
        if self.exit_codes.is_empty() || self.exit_codes.contains(&exit_code) {
            self.replacement
        } else {
            exit_code
        }
    }
}

/// Apply every modulation in declaration order
pub fn modulate_exit_code(
    modulations: &[ResultModulation],
    exit_code: i32,
    windows: &TimeWindows,
    now: i64,
) -> i32 {
    modulations
        .iter()
        .fold(exit_code, |code, modulation| modulation.apply(code, windows, now))
}

/// Overrides an entity's business impact while its window is active
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessImpactModulation {
    pub business_impact: u8,
    #[serde(default)]
    pub window: Option<String>,
}
