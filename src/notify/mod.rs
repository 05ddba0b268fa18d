//! Notifications: contacts, escalations and the scheduler that turns
//! state-machine emissions into per-contact notification actions

pub mod contact;
pub mod escalation;
pub mod scheduler;

pub use contact::{Contact, NotifyOptions};
pub use escalation::{Escalation, EscalationRange};
pub use scheduler::NotificationScheduler;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::Status;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationKind {
    Problem,
    Recovery,
    Acknowledgement,
    FlappingStart,
    FlappingStop,
    DowntimeStart,
    DowntimeEnd,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Problem => "PROBLEM",
            NotificationKind::Recovery => "RECOVERY",
            NotificationKind::Acknowledgement => "ACKNOWLEDGEMENT",
            NotificationKind::FlappingStart => "FLAPPINGSTART",
            NotificationKind::FlappingStop => "FLAPPINGSTOP",
            NotificationKind::DowntimeStart => "DOWNTIMESTART",
            NotificationKind::DowntimeEnd => "DOWNTIMEEND",
        }
    }

    pub fn is_flapping(&self) -> bool {
        matches!(self, NotificationKind::FlappingStart | NotificationKind::FlappingStop)
    }

    pub fn is_downtime(&self) -> bool {
        matches!(self, NotificationKind::DowntimeStart | NotificationKind::DowntimeEnd)
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    /// Waiting for `t_to_go`
    Scheduled,
    /// Handed to a worker as an action
    Sent,
    /// Superseded; dropped instead of sent
    Zombie,
}

/// A master notification (no contact) or one of its per-contact children
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub kind: NotificationKind,
    pub status: NotificationStatus,
    pub t_to_go: i64,
    pub creation_time: i64,
    /// Number this notification will carry once sent
    pub notif_nb: u32,
    /// Entity state when the notification was last refreshed
    pub state: Status,
    pub contact: Option<String>,
    pub escalated: bool,
}

impl Notification {
    pub fn is_master(&self) -> bool {
        self.contact.is_none()
    }
}
