//! Check results consumed by the engine and actions it hands out

use serde::{Deserialize, Serialize};

use super::entity::EntityId;
use crate::notify::NotificationKind;

/// Outcome of a check, active or passive
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Plugin exit code; 0..=3 for real plugins, any value for internal checks
    pub exit_code: i32,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub long_output: String,
    #[serde(default)]
    pub perf_data: String,
    /// Seconds the command ran
    #[serde(default)]
    pub execution_time: f64,
    /// Unix seconds at which the result was produced
    #[serde(default)]
    pub completion_time: i64,
    /// Unix seconds at which the check was meant to start
    #[serde(default)]
    pub scheduled_time: Option<i64>,
    /// Submitted from outside rather than launched by the scheduler
    #[serde(default)]
    pub passive: bool,
    /// Launched on behalf of a dependent entity's parked result
    #[serde(default)]
    pub dependency_check: bool,
    /// Synthesized by the freshness checker
    #[serde(default)]
    pub freshness_expired: bool,
}

impl CheckResult {
    pub fn new(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn at(mut self, completion_time: i64) -> Self {
        self.completion_time = completion_time;
        self
    }

    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    pub fn with_perf_data(mut self, perf_data: impl Into<String>) -> Self {
        self.perf_data = perf_data.into();
        self
    }

    pub fn with_long_output(mut self, long_output: impl Into<String>) -> Self {
        self.long_output = long_output.into();
        self
    }

    pub fn as_dependency_check(mut self) -> Self {
        self.dependency_check = true;
        self
    }
}

/// What an action asks the outside world to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Check,
    Notification,
    EventHandler,
}

/// Opaque work item; executed by an external worker and fed back as a
/// [`CheckResult`] or a notification completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: u64,
    pub kind: ActionKind,
    pub target: EntityId,
    pub command: String,
    /// Seconds
    pub timeout: u64,
    /// Unix seconds at which the action should run
    pub run_at: i64,
    /// Check requested for a parked dependent result
    #[serde(default)]
    pub dependency_check: bool,
    /// Contact to notify, for notifications
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub notification: Option<NotificationKind>,
    /// Id of the notification this action delivers
    #[serde(default)]
    pub notification_id: Option<u64>,
}

impl Action {
    pub fn check(id: u64, target: EntityId, command: impl Into<String>, timeout: u64, run_at: i64) -> Self {
        Self {
            id,
            kind: ActionKind::Check,
            target,
            command: command.into(),
            timeout,
            run_at,
            dependency_check: false,
            contact: None,
            notification: None,
            notification_id: None,
        }
    }

    pub fn event_handler(
        id: u64,
        target: EntityId,
        command: impl Into<String>,
        timeout: u64,
        run_at: i64,
    ) -> Self {
        Self {
            kind: ActionKind::EventHandler,
            ..Self::check(id, target, command, timeout, run_at)
        }
    }
}
