//! Alert states shared by hosts and services

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of monitored entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Host,
    Service,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Host => write!(f, "host"),
            EntityKind::Service => write!(f, "service"),
        }
    }
}

/// Alert state ordinal.
///
/// Hosts reuse the service ordinals: UP is `Ok` and DOWN collapses onto
/// `Critical`. `Unreachable` is only ever assigned to hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok = 0,
    Warning = 1,
    Critical = 2,
    Unknown = 3,
    Unreachable = 4,
}

impl Status {
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_ordinal(value: u8) -> Option<Self> {
        match value {
            0 => Some(Status::Ok),
            1 => Some(Status::Warning),
            2 => Some(Status::Critical),
            3 => Some(Status::Unknown),
            4 => Some(Status::Unreachable),
            _ => None,
        }
    }

    /// Map a raw plugin exit code onto a state for the given entity kind.
    ///
    /// Services take 0..=3 verbatim and anything else as UNKNOWN. Hosts are
    /// either UP (0) or DOWN (everything else); UNREACHABLE is decided by the
    /// dependency graph, never by the exit code.
    pub fn from_exit_code(kind: EntityKind, code: i32) -> Self {
        match kind {
            EntityKind::Service => match code {
                0 => Status::Ok,
                1 => Status::Warning,
                2 => Status::Critical,
                _ => Status::Unknown,
            },
            EntityKind::Host => {
                if code == 0 {
                    Status::Ok
                } else {
                    Status::Critical
                }
            }
        }
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    /// DOWN or UNREACHABLE, the states a parent must be in for its children
    /// to be considered unreachable.
    pub fn is_down_like(self) -> bool {
        matches!(self, Status::Critical | Status::Unreachable)
    }

    /// Unknown-ish states that open a "hard unknown/unreachable phase".
    pub fn is_unknown_like(self) -> bool {
        matches!(self, Status::Unknown | Status::Unreachable)
    }

    /// Human label following the host or service vocabulary
    pub fn label(self, kind: EntityKind) -> &'static str {
        match (kind, self) {
            (EntityKind::Host, Status::Ok) => "UP",
            (EntityKind::Host, Status::Critical) => "DOWN",
            (EntityKind::Host, Status::Unreachable) => "UNREACHABLE",
            (_, Status::Ok) => "OK",
            (_, Status::Warning) => "WARNING",
            (_, Status::Critical) => "CRITICAL",
            (_, Status::Unknown) => "UNKNOWN",
            (EntityKind::Service, Status::Unreachable) => "UNREACHABLE",
        }
    }

    /// Single-letter code used by failure criteria and notification options
    pub fn short_code(self, kind: EntityKind) -> char {
        match (kind, self) {
            (_, Status::Ok) => 'o',
            (EntityKind::Host, Status::Critical) => 'd',
            (_, Status::Warning) => 'w',
            (_, Status::Critical) => 'c',
            (_, Status::Unknown) | (_, Status::Unreachable) => 'u',
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Ok
    }
}

/// SOFT while retrying, HARD once confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StateType {
    Soft,
    #[default]
    Hard,
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateType::Soft => write!(f, "SOFT"),
            StateType::Hard => write!(f, "HARD"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_exit_codes() {
        assert_eq!(Status::from_exit_code(EntityKind::Service, 0), Status::Ok);
        assert_eq!(Status::from_exit_code(EntityKind::Service, 1), Status::Warning);
        assert_eq!(Status::from_exit_code(EntityKind::Service, 2), Status::Critical);
        assert_eq!(Status::from_exit_code(EntityKind::Service, 3), Status::Unknown);
        assert_eq!(Status::from_exit_code(EntityKind::Service, 42), Status::Unknown);
        assert_eq!(Status::from_exit_code(EntityKind::Service, -1), Status::Unknown);
    }

    #[test]
    fn test_host_exit_codes_collapse_to_down() {
        assert_eq!(Status::from_exit_code(EntityKind::Host, 0), Status::Ok);
        for code in [1, 2, 3, 7] {
            assert_eq!(Status::from_exit_code(EntityKind::Host, code), Status::Critical);
        }
        assert_eq!(Status::Critical.label(EntityKind::Host), "DOWN");
        assert_eq!(Status::Ok.label(EntityKind::Host), "UP");
    }

    #[test]
    fn test_ordinals_round_trip() {
        for value in 0..=4 {
            let status = Status::from_ordinal(value).unwrap();
            assert_eq!(status.ordinal(), value);
        }
        assert!(Status::from_ordinal(5).is_none());
    }
}
