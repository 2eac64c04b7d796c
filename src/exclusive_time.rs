//! Exclusive-time calculator: the time during which only a given interval
//! executed, excluding any child-interval overlap.
//!
//! Grounded in spec.md §4.2 (the original's `nr_exclusive_time.c` was not
//! available in the retrieved source pack; this rewrite follows the prose
//! contract literally). Maintains a sorted set of disjoint `[start, stop)`
//! intervals clamped to a parent interval; exclusive time is the parent's
//! duration minus the summed length of the merged child intervals.
use std::cmp::Ordering;

/// Accumulates child intervals against a single parent interval, clamping
/// each to `[parent_start, parent_stop]` and merging overlaps/adjacencies.
#[derive(Clone, Debug)]
pub struct ExclusiveTimeCalculator {
    parent_start: u64,
    parent_stop: u64,
    /// Disjoint, sorted, non-adjacent `[start, stop]` intervals.
    intervals: Vec<(u64, u64)>,
}

impl ExclusiveTimeCalculator {
    pub fn new(parent_start: u64, parent_stop: u64) -> Self {
        ExclusiveTimeCalculator {
            parent_start,
            parent_stop,
            intervals: Vec::new(),
        }
    }

    /// Adds a child interval, clamping it to the parent's bounds. No-op if
    /// the clamped interval is empty or the child doesn't overlap the
    /// parent at all. Any existing interval that overlaps or is adjacent to
    /// the new one is merged into it, keeping `intervals` sorted and
    /// disjoint.
    pub fn add_child(&mut self, start: u64, stop: u64) {
        let start = start.max(self.parent_start);
        let stop = stop.min(self.parent_stop);
        if stop <= start {
            return;
        }

        let mut new_start = start;
        let mut new_stop = stop;
        let mut remove_from = None;
        let mut remove_to = 0;
        for (idx, &(s, e)) in self.intervals.iter().enumerate() {
            if e < new_start {
                continue; // strictly before, no overlap or adjacency yet
            }
            if s > new_stop {
                break; // sorted by start: no further interval can overlap
            }
            if remove_from.is_none() {
                remove_from = Some(idx);
            }
            new_start = new_start.min(s);
            new_stop = new_stop.max(e);
            remove_to = idx + 1;
        }
        let remove_from =
            remove_from.unwrap_or_else(|| self.intervals.partition_point(|&(s, _)| s < new_start));
        self.intervals
            .splice(remove_from..remove_to, [(new_start, new_stop)]);
    }

    /// Total length of the merged, clamped child intervals.
    pub fn covered(&self) -> u64 {
        self.intervals.iter().map(|&(s, e)| e - s).sum()
    }

    /// `parent_duration - covered()`, i.e. the time only the parent (and no
    /// child on this async context) executed.
    pub fn exclusive_time(&self) -> u64 {
        let duration = self.parent_stop.saturating_sub(self.parent_start);
        duration.saturating_sub(self.covered())
    }

    pub fn parent_duration(&self) -> u64 {
        self.parent_stop.saturating_sub(self.parent_start)
    }
}
