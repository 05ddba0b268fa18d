//! Time windows
//!
//! Calendar arithmetic lives outside the core; the engine only ever asks a
//! window whether an instant is valid and when the next valid instant is.
//! The implementations here are deliberately simple ones used by the
//! inventory loader and the tests.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

const SECONDS_PER_DAY: i64 = 86_400;

/// Validity window consulted for checks, notifications, dependencies,
/// escalations and modulations. Timestamps are unix seconds.
pub trait TimeWindow: Send + Sync + Debug {
    fn is_valid(&self, timestamp: i64) -> bool;

    /// First valid instant at or after `timestamp`, `None` if the window
    /// never opens again.
    fn next_valid_time(&self, timestamp: i64) -> Option<i64>;
}

/// 24x7
#[derive(Debug, Clone, Copy, Default)]
pub struct Always;

impl TimeWindow for Always {
    fn is_valid(&self, _timestamp: i64) -> bool {
        true
    }

    fn next_valid_time(&self, timestamp: i64) -> Option<i64> {
        Some(timestamp)
    }
}

/// Never valid
#[derive(Debug, Clone, Copy, Default)]
pub struct Never;

impl TimeWindow for Never {
    fn is_valid(&self, _timestamp: i64) -> bool {
        false
    }

    fn next_valid_time(&self, _timestamp: i64) -> Option<i64> {
        None
    }
}

/// Same seconds-of-day range every day (UTC). `start > end` wraps midnight.
#[derive(Debug, Clone, Copy)]
pub struct Daily {
    start: i64,
    end: i64,
}

impl Daily {
    pub fn new(start_secs: i64, end_secs: i64) -> Self {
        Self {
            start: start_secs.rem_euclid(SECONDS_PER_DAY),
            end: end_secs.rem_euclid(SECONDS_PER_DAY),
        }
    }
}

impl TimeWindow for Daily {
    fn is_valid(&self, timestamp: i64) -> bool {
        let sod = timestamp.rem_euclid(SECONDS_PER_DAY);
        if self.start <= self.end {
            sod >= self.start && sod < self.end
        } else {
            sod >= self.start || sod < self.end
        }
    }

    fn next_valid_time(&self, timestamp: i64) -> Option<i64> {
        if self.start == self.end {
            return None;
        }
        if self.is_valid(timestamp) {
            return Some(timestamp);
        }
        let sod = timestamp.rem_euclid(SECONDS_PER_DAY);
        let day_start = timestamp - sod;
        if sod < self.start {
            Some(day_start + self.start)
        } else {
            Some(day_start + SECONDS_PER_DAY + self.start)
        }
    }
}

/// Explicit list of absolute `[start, end)` ranges
#[derive(Debug, Clone, Default)]
pub struct Ranges {
    ranges: Vec<(i64, i64)>,
}

impl Ranges {
    pub fn new(mut ranges: Vec<(i64, i64)>) -> Self {
        ranges.retain(|(start, end)| start < end);
        ranges.sort_unstable();
        Self { ranges }
    }
}

impl TimeWindow for Ranges {
    fn is_valid(&self, timestamp: i64) -> bool {
        self.ranges
            .iter()
            .any(|(start, end)| timestamp >= *start && timestamp < *end)
    }

    fn next_valid_time(&self, timestamp: i64) -> Option<i64> {
        self.ranges
            .iter()
            .find(|(_, end)| timestamp < *end)
            .map(|(start, _)| timestamp.max(*start))
    }
}

/// Serializable description of a window, as found in an inventory file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WindowSpec {
    Always,
    Never,
    Daily { start: i64, end: i64 },
    Ranges { ranges: Vec<(i64, i64)> },
}

impl WindowSpec {
    pub fn build(&self) -> Arc<dyn TimeWindow> {
        match self {
            WindowSpec::Always => Arc::new(Always),
            WindowSpec::Never => Arc::new(Never),
            WindowSpec::Daily { start, end } => Arc::new(Daily::new(*start, *end)),
            WindowSpec::Ranges { ranges } => Arc::new(Ranges::new(ranges.clone())),
        }
    }
}

/// Named windows referenced by entities, edges and escalations.
///
/// A missing reference (`None`) means "always valid".
#[derive(Debug, Clone, Default)]
pub struct TimeWindows {
    windows: HashMap<String, Arc<dyn TimeWindow>>,
}

impl TimeWindows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, window: Arc<dyn TimeWindow>) {
        self.windows.insert(name.into(), window);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn TimeWindow>> {
        self.windows.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.windows.contains_key(name)
    }

    pub fn is_valid(&self, name: Option<&str>, timestamp: i64) -> bool {
        match name.and_then(|n| self.windows.get(n)) {
            Some(window) => window.is_valid(timestamp),
            None => true,
        }
    }

    pub fn next_valid_time(&self, name: Option<&str>, timestamp: i64) -> Option<i64> {
        match name.and_then(|n| self.windows.get(n)) {
            Some(window) => window.next_valid_time(timestamp),
            None => Some(timestamp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daily_window() {
        // 08:00 - 18:00
        let window = Daily::new(8 * 3600, 18 * 3600);
        let midnight = 10 * SECONDS_PER_DAY;

        assert!(!window.is_valid(midnight + 3600));
        assert!(window.is_valid(midnight + 9 * 3600));
        assert!(!window.is_valid(midnight + 18 * 3600));

        assert_eq!(window.next_valid_time(midnight + 3600), Some(midnight + 8 * 3600));
        assert_eq!(
            window.next_valid_time(midnight + 20 * 3600),
            Some(midnight + SECONDS_PER_DAY + 8 * 3600)
        );
    }

    #[test]
    fn test_daily_window_wrapping_midnight() {
        let window = Daily::new(22 * 3600, 2 * 3600);
        let midnight = 3 * SECONDS_PER_DAY;
        assert!(window.is_valid(midnight + 23 * 3600));
        assert!(window.is_valid(midnight + 3600));
        assert!(!window.is_valid(midnight + 12 * 3600));
    }

    #[test]
    fn test_ranges_window() {
        let window = Ranges::new(vec![(200, 300), (100, 150)]);
        assert!(window.is_valid(120));
        assert!(!window.is_valid(150));
        assert_eq!(window.next_valid_time(160), Some(200));
        assert_eq!(window.next_valid_time(250), Some(250));
        assert_eq!(window.next_valid_time(300), None);
    }

    #[test]
    fn test_registry_defaults_to_always() {
        let mut windows = TimeWindows::new();
        windows.insert("never", Arc::new(Never));

        assert!(windows.is_valid(None, 5));
        assert!(windows.is_valid(Some("unknown"), 5));
        assert!(!windows.is_valid(Some("never"), 5));
        assert_eq!(windows.next_valid_time(Some("never"), 5), None);
        assert_eq!(windows.next_valid_time(None, 5), Some(5));
    }
}
