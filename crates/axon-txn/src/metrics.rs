// SPDX-License-Identifier: MIT OR Apache-2.0
//! Metric tables.
//!
//! All durations are integer microseconds internally; conversion to
//! seconds happens only when a table is exported for the wire.

use axon_core::time::Ticks;
use axon_proto::txndata::{MetricData, MetricWire};
use std::collections::HashMap;

const US_PER_SECOND_F: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy)]
enum Aggregate {
    Duration {
        count: u64,
        total: Ticks,
        exclusive: Ticks,
        min: Ticks,
        max: Ticks,
        sum_squares: f64,
    },
    Apdex {
        satisfying: u64,
        tolerating: u64,
        failing: u64,
        min_apdex: Ticks,
        max_apdex: Ticks,
    },
}

/// One named metric's aggregate.
#[derive(Debug, Clone, Copy)]
pub struct Metric {
    aggregate: Aggregate,
    forced: bool,
}

impl Metric {
    /// Call count, or total apdex observations.
    pub fn count(&self) -> u64 {
        match self.aggregate {
            Aggregate::Duration { count, .. } => count,
            Aggregate::Apdex {
                satisfying,
                tolerating,
                failing,
                ..
            } => satisfying + tolerating + failing,
        }
    }

    /// Total time in microseconds (zero for apdex metrics).
    pub fn total(&self) -> Ticks {
        match self.aggregate {
            Aggregate::Duration { total, .. } => total,
            Aggregate::Apdex { .. } => 0,
        }
    }

    /// Exclusive time in microseconds (zero for apdex metrics).
    pub fn exclusive(&self) -> Ticks {
        match self.aggregate {
            Aggregate::Duration { exclusive, .. } => exclusive,
            Aggregate::Apdex { .. } => 0,
        }
    }

    /// Whether the metric bypasses server-side filtering.
    pub fn is_forced(&self) -> bool {
        self.forced
    }
}

/// A table of named metrics, preserving first-add order.
#[derive(Debug, Default)]
pub struct MetricTable {
    names: Vec<String>,
    metrics: HashMap<String, Metric>,
}

impl MetricTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of metrics in the table.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when the table holds no metrics.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Look up a metric by name.
    pub fn get(&self, name: &str) -> Option<&Metric> {
        self.metrics.get(name)
    }

    /// Add one duration observation to `name`.
    pub fn add(&mut self, name: &str, duration: Ticks, exclusive: Ticks) {
        self.add_internal(name, duration, exclusive, false);
    }

    /// Add one duration observation to `name`, marking the metric forced.
    pub fn add_forced(&mut self, name: &str, duration: Ticks, exclusive: Ticks) {
        self.add_internal(name, duration, exclusive, true);
    }

    fn add_internal(&mut self, name: &str, duration: Ticks, exclusive: Ticks, forced: bool) {
        let duration_secs = duration as f64 / US_PER_SECOND_F;

        match self.metrics.get_mut(name) {
            Some(metric) => {
                metric.forced |= forced;
                if let Aggregate::Duration {
                    count,
                    total,
                    exclusive: excl,
                    min,
                    max,
                    sum_squares,
                } = &mut metric.aggregate
                {
                    *count += 1;
                    *total += duration;
                    *excl += exclusive;
                    *min = (*min).min(duration);
                    *max = (*max).max(duration);
                    *sum_squares += duration_secs * duration_secs;
                }
            }
            None => {
                self.names.push(name.to_owned());
                self.metrics.insert(
                    name.to_owned(),
                    Metric {
                        aggregate: Aggregate::Duration {
                            count: 1,
                            total: duration,
                            exclusive,
                            min: duration,
                            max: duration,
                            sum_squares: duration_secs * duration_secs,
                        },
                        forced,
                    },
                );
            }
        }
    }

    /// Add one apdex observation to `name`. Exactly one of the three
    /// counters should be 1.
    pub fn add_apdex(
        &mut self,
        name: &str,
        satisfying: u64,
        tolerating: u64,
        failing: u64,
        apdex_t: Ticks,
    ) {
        match self.metrics.get_mut(name) {
            Some(metric) => {
                if let Aggregate::Apdex {
                    satisfying: s,
                    tolerating: t,
                    failing: f,
                    min_apdex,
                    max_apdex,
                } = &mut metric.aggregate
                {
                    *s += satisfying;
                    *t += tolerating;
                    *f += failing;
                    *min_apdex = (*min_apdex).min(apdex_t);
                    *max_apdex = (*max_apdex).max(apdex_t);
                }
            }
            None => {
                self.names.push(name.to_owned());
                self.metrics.insert(
                    name.to_owned(),
                    Metric {
                        aggregate: Aggregate::Apdex {
                            satisfying,
                            tolerating,
                            failing,
                            min_apdex: apdex_t,
                            max_apdex: apdex_t,
                        },
                        forced: true,
                    },
                );
            }
        }
    }

    /// Export the table for the wire, converting durations to seconds.
    ///
    /// Apdex metrics reuse the six data slots as satisfying, tolerating,
    /// failing, min apdex-T, max apdex-T, and zero.
    pub fn to_wire(&self, scoped: bool) -> Vec<MetricWire> {
        self.names
            .iter()
            .map(|name| {
                let metric = &self.metrics[name];
                let data = match metric.aggregate {
                    Aggregate::Duration {
                        count,
                        total,
                        exclusive,
                        min,
                        max,
                        sum_squares,
                    } => MetricData {
                        count: count as f64,
                        total: total as f64 / US_PER_SECOND_F,
                        exclusive: exclusive as f64 / US_PER_SECOND_F,
                        min: min as f64 / US_PER_SECOND_F,
                        max: max as f64 / US_PER_SECOND_F,
                        sum_squares,
                        scoped,
                        forced: metric.forced,
                    },
                    Aggregate::Apdex {
                        satisfying,
                        tolerating,
                        failing,
                        min_apdex,
                        max_apdex,
                    } => MetricData {
                        count: satisfying as f64,
                        total: tolerating as f64,
                        exclusive: failing as f64,
                        min: min_apdex as f64 / US_PER_SECOND_F,
                        max: max_apdex as f64 / US_PER_SECOND_F,
                        sum_squares: 0.0,
                        scoped,
                        forced: metric.forced,
                    },
                };
                MetricWire {
                    name: name.clone(),
                    data,
                }
            })
            .collect()
    }
}
