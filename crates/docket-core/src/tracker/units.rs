//! Completed-unit set stored in job metadata.

use serde::{Deserialize, Serialize};

/// Set of completed work units (page numbers, chunk indexes) kept as sorted,
/// coalesced inclusive ranges.
///
/// Serialized as `[[start, end], ...]`. Growth is bounded by the number of
/// gaps, not the number of units: a fully recognized 10,000-page document is
/// a single range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitSet {
    ranges: Vec<(u64, u64)>,
}

impl UnitSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of units in the set.
    pub fn len(&self) -> u64 {
        self.ranges.iter().map(|(a, b)| b - a + 1).sum()
    }

    pub fn ranges(&self) -> &[(u64, u64)] {
        &self.ranges
    }

    pub fn contains(&self, unit: u64) -> bool {
        let idx = self.ranges.partition_point(|&(_, end)| end < unit);
        self.ranges
            .get(idx)
            .map(|&(start, _)| start <= unit)
            .unwrap_or(false)
    }

    pub fn insert(&mut self, unit: u64) {
        self.insert_range(unit, unit);
    }

    /// Insert the inclusive range `[start, end]`, merging with neighbours.
    pub fn insert_range(&mut self, start: u64, end: u64) {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        // First range that could touch [start, end] (its end + 1 >= start).
        let lo = self
            .ranges
            .partition_point(|&(_, e)| e.saturating_add(1) < start);
        let mut hi = lo;
        let mut new_start = start;
        let mut new_end = end;
        while hi < self.ranges.len() && self.ranges[hi].0 <= end.saturating_add(1) {
            new_start = new_start.min(self.ranges[hi].0);
            new_end = new_end.max(self.ranges[hi].1);
            hi += 1;
        }
        self.ranges.splice(lo..hi, std::iter::once((new_start, new_end)));
    }

    /// Add every unit of `other`. The set only grows.
    pub fn union_with(&mut self, other: &UnitSet) {
        for &(a, b) in &other.ranges {
            self.insert_range(a, b);
        }
    }

    /// Iterate over every unit in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.ranges.iter().flat_map(|&(a, b)| a..=b)
    }
}

impl FromIterator<u64> for UnitSet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        let mut set = UnitSet::new();
        for u in iter {
            set.insert(u);
        }
        set
    }
}
