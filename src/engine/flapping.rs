//! Flap detection over a bounded history of state-change samples

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlapTransition {
    Started,
    Stopped,
}

#[derive(Debug, Clone, Default)]
pub struct FlapHistory {
    samples: VecDeque<bool>,
    percent: f64,
    flapping: bool,
}

/// Weighted percentage of state changes. Newer samples weigh more: the
/// i-th (1-based, oldest first) sample counts `i * 0.4 / size + 0.8`.
pub fn flap_percent<'a>(samples: impl IntoIterator<Item = &'a bool>, size: usize) -> f64 {
    if size == 0 {
        return 0.0;
    }
    let size = size as f64;
    let total: f64 = samples
        .into_iter()
        .enumerate()
        .filter(|(_, changed)| **changed)
        .map(|(index, _)| (index + 1) as f64 * (1.2 - 0.8) / size + 0.8)
        .sum();
    total / size * 100.0
}

impl FlapHistory {
    pub fn percent(&self) -> f64 {
        self.percent
    }

    pub fn is_flapping(&self) -> bool {
        self.flapping
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Append a sample, evicting the oldest beyond `size`, and recompute.
    ///
    /// Flapping only starts or stops once the history is full.
    pub fn record(&mut self, changed: bool, size: usize, low: f64, high: f64) -> Option<FlapTransition> {
        self.samples.push_back(changed);
        while self.samples.len() > size {
            self.samples.pop_front();
        }
        debug_assert!(self.samples.len() <= size);

        self.percent = flap_percent(&self.samples, size);
        let full = self.samples.len() >= size;
        if !full {
            return None;
        }

        if self.flapping && self.percent < low {
            self.flapping = false;
            return Some(FlapTransition::Stopped);
        }
        if !self.flapping && self.percent >= high {
            self.flapping = true;
            return Some(FlapTransition::Started);
        }
        None
    }

    /// Forget everything, e.g. when flap detection gets disabled
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_documented_constants() {
        let all_changed = vec![true; 20];
        assert!(approx(flap_percent(&all_changed, 20), 101.0));

        let mut newest_only = vec![false; 20];
        newest_only[19] = true;
        assert!(approx(flap_percent(&newest_only, 20), 6.0));

        let mut oldest_only = vec![false; 20];
        oldest_only[0] = true;
        assert!(approx(flap_percent(&oldest_only, 20), 4.1));

        assert!(approx(flap_percent(&[false; 20], 20), 0.0));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = FlapHistory::default();
        for i in 0..50 {
            history.record(i % 2 == 0, 20, 25.0, 50.0);
        }
        assert_eq!(history.len(), 20);
    }

    #[test]
    fn test_no_transition_until_full() {
        let mut history = FlapHistory::default();
        for _ in 0..19 {
            assert_eq!(history.record(true, 20, 25.0, 50.0), None);
        }
        assert!(!history.is_flapping());
        assert_eq!(history.record(true, 20, 25.0, 50.0), Some(FlapTransition::Started));
    }

    #[test]
    fn test_start_at_exactly_high_threshold() {
        let samples: Vec<bool> = (0..20).map(|i| i % 2 == 1).collect();
        let percent = flap_percent(&samples, 20);

        let mut history = FlapHistory::default();
        let transitions: Vec<_> = samples
            .iter()
            .filter_map(|s| history.record(*s, 20, 25.0, percent))
            .collect();
        assert_eq!(transitions, vec![FlapTransition::Started]);
        assert!(history.is_flapping());
        assert!(approx(history.percent(), percent));
    }

    #[test]
    fn test_stop_only_below_low_threshold() {
        let mut history = FlapHistory::default();
        for _ in 0..20 {
            history.record(true, 20, 25.0, 50.0);
        }
        assert!(history.is_flapping());

        // shift in quiet samples until the percentage drops to a known value
        let mut samples: Vec<bool> = vec![true; 20];
        for _ in 0..10 {
            samples.remove(0);
            samples.push(false);
        }
        let target = flap_percent(&samples, 20);

        let mut at_boundary = history.clone();
        for _ in 0..10 {
            assert_eq!(at_boundary.record(false, 20, target, 200.0), None);
        }
        // percent == low is not below low
        assert!(at_boundary.is_flapping());

        let mut above_boundary = history.clone();
        let transitions: Vec<_> = (0..10)
            .filter_map(|_| above_boundary.record(false, 20, target + 1e-6, 200.0))
            .collect();
        assert_eq!(transitions, vec![FlapTransition::Stopped]);
    }
}
