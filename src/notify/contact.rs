//! Contacts and notification option flags

use std::fmt;

use serde::{Deserialize, Serialize};

use super::NotificationKind;
use crate::model::{EntityKind, Status, TimeWindows};

/// Which notification kinds and states are wanted.
///
/// Written as a comma separated letter list: `w,u,c` (warning, unknown,
/// critical), `d` (host down), `r` (recovery), `f` (flapping),
/// `s` (downtime), `n` (none). `d` and `c` both select the critical ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NotifyOptions {
    pub warning: bool,
    pub unknown: bool,
    pub critical: bool,
    pub recovery: bool,
    pub flapping: bool,
    pub downtime: bool,
}

impl NotifyOptions {
    pub fn all() -> Self {
        Self {
            warning: true,
            unknown: true,
            critical: true,
            recovery: true,
            flapping: true,
            downtime: true,
        }
    }

    pub fn none() -> Self {
        Self {
            warning: false,
            unknown: false,
            critical: false,
            recovery: false,
            flapping: false,
            downtime: false,
        }
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        let mut options = Self::none();
        for letter in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match letter {
                "w" => options.warning = true,
                "u" => options.unknown = true,
                "c" | "d" => options.critical = true,
                "r" => options.recovery = true,
                "f" => options.flapping = true,
                "s" => options.downtime = true,
                "n" => return Ok(Self::none()),
                other => return Err(format!("unknown notification option '{}'", other)),
            }
        }
        Ok(options)
    }

    pub fn is_none(&self) -> bool {
        *self == Self::none()
    }

    /// Whether a notification of `kind` raised while in `state` is wanted
    pub fn allows(&self, kind: NotificationKind, state: Status) -> bool {
        match kind {
            NotificationKind::Problem => self.allows_state(state),
            NotificationKind::Recovery => self.recovery,
            NotificationKind::FlappingStart | NotificationKind::FlappingStop => self.flapping,
            NotificationKind::DowntimeStart | NotificationKind::DowntimeEnd => self.downtime,
            NotificationKind::Acknowledgement => true,
        }
    }

    pub fn allows_state(&self, state: Status) -> bool {
        match state {
            Status::Ok => self.recovery,
            Status::Warning => self.warning,
            Status::Critical => self.critical,
            Status::Unknown | Status::Unreachable => self.unknown,
        }
    }
}

impl Default for NotifyOptions {
    fn default() -> Self {
        Self::all()
    }
}

impl TryFrom<String> for NotifyOptions {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NotifyOptions> for String {
    fn from(options: NotifyOptions) -> Self {
        options.to_string()
    }
}

impl fmt::Display for NotifyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letters: Vec<&str> = [
            (self.warning, "w"),
            (self.unknown, "u"),
            (self.critical, "c"),
            (self.recovery, "r"),
            (self.flapping, "f"),
            (self.downtime, "s"),
        ]
        .into_iter()
        .filter_map(|(on, letter)| on.then_some(letter))
        .collect();

        if letters.is_empty() {
            f.write_str("n")
        } else {
            f.write_str(&letters.join(","))
        }
    }
}

/// Someone (or something) that receives notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    /// Command handed to the notification worker
    pub command: String,
    #[serde(default)]
    pub window: Option<String>,
    #[serde(default)]
    pub host_options: NotifyOptions,
    #[serde(default)]
    pub service_options: NotifyOptions,
    /// Entities below this business impact are not notified
    #[serde(default)]
    pub min_business_impact: u8,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

fn enabled() -> bool {
    true
}

impl Contact {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            window: None,
            host_options: NotifyOptions::all(),
            service_options: NotifyOptions::all(),
            min_business_impact: 0,
            enabled: true,
        }
    }

    pub fn with_window(mut self, window: impl Into<String>) -> Self {
        self.window = Some(window.into());
        self
    }

    pub fn with_options(mut self, options: NotifyOptions) -> Self {
        self.host_options = options;
        self.service_options = options;
        self
    }

    /// Whether this contact wants a notification right now
    pub fn wants(
        &self,
        entity_kind: EntityKind,
        kind: NotificationKind,
        state: Status,
        business_impact: u8,
        windows: &TimeWindows,
        now: i64,
    ) -> bool {
        if !self.enabled || business_impact < self.min_business_impact {
            return false;
        }
        if !windows.is_valid(self.window.as_deref(), now) {
            return false;
        }
        let options = match entity_kind {
            EntityKind::Host => &self.host_options,
            EntityKind::Service => &self.service_options,
        };
        options.allows(kind, state)
    }
}
