//! Notification escalations

use serde::{Deserialize, Serialize};

use super::{NotificationKind, NotifyOptions};
use crate::model::{Status, TimeWindows};

/// When an escalation applies: by notification number, or by time elapsed
/// since the first notification (both in interval units for time).
/// An upper bound of 0 means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "lowercase")]
pub enum EscalationRange {
    Number { first: u32, last: u32 },
    Time { first: u64, last: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub name: String,
    #[serde(flatten)]
    pub range: EscalationRange,
    /// Interval override in interval units; `None` keeps the entity's
    #[serde(default)]
    pub notification_interval: Option<u64>,
    #[serde(default)]
    pub window: Option<String>,
    /// States (and `r` for recoveries) the escalation covers
    #[serde(default)]
    pub options: NotifyOptions,
    #[serde(default)]
    pub contacts: Vec<String>,
}

impl Escalation {
    pub fn by_number(name: impl Into<String>, first: u32, last: u32) -> Self {
        Self::new(name, EscalationRange::Number { first, last })
    }

    pub fn by_time(name: impl Into<String>, first: u64, last: u64) -> Self {
        Self::new(name, EscalationRange::Time { first, last })
    }

    fn new(name: impl Into<String>, range: EscalationRange) -> Self {
        Self {
            name: name.into(),
            range,
            notification_interval: None,
            window: None,
            options: NotifyOptions::all(),
            contacts: Vec::new(),
        }
    }

    pub fn with_contacts<I, S>(mut self, contacts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.contacts = contacts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_interval(mut self, interval: u64) -> Self {
        self.notification_interval = Some(interval);
        self
    }

    pub fn is_time_based(&self) -> bool {
        matches!(self.range, EscalationRange::Time { .. })
    }

    /// `elapsed` is seconds since the master notification was created.
    #[allow(clippy::too_many_arguments)]
    pub fn is_eligible(
        &self,
        t: i64,
        kind: NotificationKind,
        state: Status,
        notif_nb: u32,
        elapsed: i64,
        interval_length: i64,
        windows: &TimeWindows,
    ) -> bool {
        match self.range {
            EscalationRange::Number { first, last } => {
                if notif_nb < first || (last != 0 && notif_nb > last) {
                    return false;
                }
            }
            EscalationRange::Time { first, last } => {
                if elapsed < first as i64 * interval_length
                    || (last != 0 && elapsed > last as i64 * interval_length)
                {
                    return false;
                }
            }
        }

        let covered = match kind {
            NotificationKind::Recovery => self.options.recovery,
            _ => self.options.allows_state(state),
        };
        covered && windows.is_valid(self.window.as_deref(), t)
    }

    /// Start of a time-based escalation for a notification created at
    /// `creation_time`
    pub fn start_time(&self, creation_time: i64, interval_length: i64) -> Option<i64> {
        match self.range {
            EscalationRange::Time { first, .. } => Some(creation_time + first as i64 * interval_length),
            EscalationRange::Number { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_based() {
        let windows = TimeWindows::new();
        let escalation = Escalation::by_number("level2", 2, 4);
        let eligible = |nb| escalation.is_eligible(0, NotificationKind::Problem, Status::Critical, nb, 0, 60, &windows);

        assert!(!eligible(1));
        assert!(eligible(2));
        assert!(eligible(4));
        assert!(!eligible(5));

        let open_ended = Escalation::by_number("level3", 5, 0);
        assert!(open_ended.is_eligible(0, NotificationKind::Problem, Status::Critical, 99, 0, 60, &windows));
    }

    #[test]
    fn test_time_based() {
        let windows = TimeWindows::new();
        let escalation = Escalation::by_time("after-an-hour", 60, 120);
        let eligible = |elapsed| {
            escalation.is_eligible(0, NotificationKind::Problem, Status::Critical, 1, elapsed, 60, &windows)
        };

        assert!(!eligible(3599));
        assert!(eligible(3600));
        assert!(eligible(7200));
        assert!(!eligible(7201));
        assert_eq!(escalation.start_time(1000, 60), Some(4600));
    }

    #[test]
    fn test_options_filter_states() {
        let windows = TimeWindows::new();
        let mut escalation = Escalation::by_number("crit-only", 1, 0);
        escalation.options = NotifyOptions::parse("c").unwrap();

        assert!(escalation.is_eligible(0, NotificationKind::Problem, Status::Critical, 1, 0, 60, &windows));
        assert!(!escalation.is_eligible(0, NotificationKind::Problem, Status::Warning, 1, 0, 60, &windows));
        assert!(!escalation.is_eligible(0, NotificationKind::Recovery, Status::Ok, 1, 0, 60, &windows));
    }
}
