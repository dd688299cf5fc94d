// SPDX-License-Identifier: MIT OR Apache-2.0
//! Exclusive-time computation.
//!
//! A segment's exclusive time is its duration minus the union of
//! same-context child intervals overlapping it. Accumulators only exist
//! during harvest (and during discards in the uncapped regime).

use axon_core::time::Ticks;

/// An exclusive-time accumulator for one segment.
#[derive(Debug, Clone)]
pub struct ExclusiveTime {
    start: Ticks,
    stop: Ticks,
    children: Vec<(Ticks, Ticks)>,
}

impl ExclusiveTime {
    /// An accumulator for a segment spanning `[start, stop)`, expecting
    /// around `expected_children` child intervals.
    pub fn new(expected_children: usize, start: Ticks, stop: Ticks) -> Self {
        Self {
            start,
            stop,
            children: Vec::with_capacity(expected_children),
        }
    }

    /// Add one child interval.
    pub fn add_child(&mut self, start: Ticks, stop: Ticks) {
        self.children.push((start, stop));
    }

    /// Compute the exclusive time: the window duration minus the merged
    /// child time overlapping the window.
    pub fn calculate(&self) -> Ticks {
        let duration = self.stop.saturating_sub(self.start);
        if self.children.is_empty() {
            return duration;
        }

        // Clamp children to the window, then merge overlaps.
        let mut clamped: Vec<(Ticks, Ticks)> = self
            .children
            .iter()
            .map(|&(start, stop)| (start.max(self.start), stop.min(self.stop)))
            .filter(|&(start, stop)| start < stop)
            .collect();
        clamped.sort_unstable();

        let mut covered: Ticks = 0;
        let mut current: Option<(Ticks, Ticks)> = None;
        for (start, stop) in clamped {
            match &mut current {
                Some((_, cur_stop)) if start <= *cur_stop => {
                    *cur_stop = (*cur_stop).max(stop);
                }
                _ => {
                    if let Some((cur_start, cur_stop)) = current {
                        covered += cur_stop - cur_start;
                    }
                    current = Some((start, stop));
                }
            }
        }
        if let Some((cur_start, cur_stop)) = current {
            covered += cur_stop - cur_start;
        }

        duration.saturating_sub(covered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_children_means_full_duration() {
        let et = ExclusiveTime::new(0, 1_000, 5_000);
        assert_eq!(4_000, et.calculate());
    }

    #[test]
    fn disjoint_children_subtract() {
        let mut et = ExclusiveTime::new(2, 0, 10_000);
        et.add_child(1_000, 2_000);
        et.add_child(4_000, 6_000);
        assert_eq!(7_000, et.calculate());
    }

    #[test]
    fn overlapping_children_count_once() {
        let mut et = ExclusiveTime::new(3, 0, 10_000);
        et.add_child(1_000, 5_000);
        et.add_child(3_000, 7_000);
        et.add_child(4_000, 4_500);
        assert_eq!(4_000, et.calculate());
    }

    #[test]
    fn children_are_clamped_to_the_window() {
        let mut et = ExclusiveTime::new(2, 2_000, 8_000);
        et.add_child(0, 3_000);
        et.add_child(7_000, 20_000);
        assert_eq!(4_000, et.calculate());
    }

    #[test]
    fn fully_covered_window_is_zero() {
        let mut et = ExclusiveTime::new(1, 1_000, 2_000);
        et.add_child(0, 10_000);
        assert_eq!(0, et.calculate());
    }

    #[test]
    fn child_outside_the_window_is_ignored() {
        let mut et = ExclusiveTime::new(1, 1_000, 2_000);
        et.add_child(5_000, 9_000);
        assert_eq!(1_000, et.calculate());
    }
}
