//! Run summary and its merge rule

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Aggregate metadata about a completed run.
///
/// `RunSummary::default()` (zero commits) is the identity of [`RunSummary::merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Earliest commit time, unix seconds
    pub begin_time: i64,
    /// Latest commit time, unix seconds
    pub end_time: i64,
    pub commits: u64,
    pub run_time: Duration,
    /// Wall-clock time spent in each component
    pub run_time_per_item: BTreeMap<String, Duration>,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account one processed commit
    pub fn record_commit(&mut self, time: i64) {
        if self.commits == 0 {
            self.begin_time = time;
            self.end_time = time;
        } else {
            self.begin_time = self.begin_time.min(time);
            self.end_time = self.end_time.max(time);
        }
        self.commits += 1;
    }

    pub fn record_item_time(&mut self, item: &str, elapsed: Duration) {
        *self
            .run_time_per_item
            .entry(item.to_string())
            .or_default() += elapsed;
    }

    pub fn is_empty(&self) -> bool {
        self.commits == 0
    }

    /// Fold `other` into `self`: counts and times add up, the time range
    /// becomes the union of both ranges.
    pub fn merge(&mut self, other: &RunSummary) {
        if other.commits == 0 {
            return;
        }
        if self.commits == 0 {
            *self = other.clone();
            return;
        }
        self.begin_time = self.begin_time.min(other.begin_time);
        self.end_time = self.end_time.max(other.end_time);
        self.commits += other.commits;
        self.run_time += other.run_time;
        for (item, elapsed) in &other.run_time_per_item {
            *self.run_time_per_item.entry(item.clone()).or_default() += *elapsed;
        }
    }

    pub fn merged(mut self, other: &RunSummary) -> Self {
        self.merge(other);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(begin: i64, end: i64, commits: u64, ms: u64) -> RunSummary {
        let mut s = RunSummary {
            begin_time: begin,
            end_time: end,
            commits,
            run_time: Duration::from_millis(ms),
            ..Default::default()
        };
        s.record_item_time("Devs", Duration::from_millis(ms / 2));
        s
    }

    #[test]
    fn test_identity() {
        let a = summary(100, 200, 5, 40);
        assert_eq!(a.clone().merged(&RunSummary::default()), a);
        assert_eq!(RunSummary::default().merged(&a), a);
    }

    #[test]
    fn test_associative_and_commutative() {
        let a = summary(100, 200, 5, 40);
        let b = summary(50, 150, 3, 10);
        let c = summary(300, 400, 7, 25);

        let left = a.clone().merged(&b).merged(&c);
        let right = a.clone().merged(&b.clone().merged(&c));
        let shuffled = c.clone().merged(&a).merged(&b);

        for merged in [&left, &right, &shuffled] {
            assert_eq!(merged.commits, 15);
            assert_eq!(merged.begin_time, 50);
            assert_eq!(merged.end_time, 400);
            assert_eq!(merged.run_time, Duration::from_millis(75));
            assert_eq!(merged.run_time_per_item["Devs"], Duration::from_millis(37));
        }
    }

    #[test]
    fn test_record_commit_tracks_range() {
        let mut s = RunSummary::new();
        s.record_commit(30);
        s.record_commit(10);
        s.record_commit(20);
        assert_eq!((s.begin_time, s.end_time, s.commits), (10, 30, 3));
    }
}
