// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bounded event buffers and the slow SQL log.

use axon_core::time::Ticks;
use axon_proto::txndata::SlowSqlWire;
use rand::Rng;
use rand::rngs::SmallRng;

/// A bounded buffer of pre-serialized JSON events with reservoir
/// replacement: once full, new events overwrite random existing slots so
/// every observed event has an equal chance of surviving.
#[derive(Debug, Default)]
pub struct EventBuffer {
    events: Vec<String>,
    capacity: usize,
    seen: usize,
}

impl EventBuffer {
    /// A buffer keeping at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Vec::new(),
            capacity,
            seen: 0,
        }
    }

    /// Offer one event.
    pub fn add(&mut self, json: String, rng: &mut SmallRng) {
        self.seen += 1;
        if self.capacity == 0 {
            return;
        }
        if self.events.len() < self.capacity {
            self.events.push(json);
            return;
        }
        let slot = rng.gen_range(0..self.seen);
        if slot < self.capacity {
            self.events[slot] = json;
        }
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when no events are retained.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events offered over the buffer's lifetime.
    pub fn seen(&self) -> usize {
        self.seen
    }

    /// The retained events, in slot order.
    pub fn events(&self) -> &[String] {
        &self.events
    }

    /// Consume the buffer, yielding the retained events.
    pub fn into_events(self) -> Vec<String> {
        self.events
    }
}

/// One aggregated slow SQL entry.
#[derive(Debug, Clone)]
pub struct SlowSql {
    /// Statement id; entries aggregate by id.
    pub id: u32,
    /// Number of calls aggregated into this entry.
    pub count: i32,
    /// Total time across calls.
    pub total: Ticks,
    /// Fastest call.
    pub min: Ticks,
    /// Slowest call.
    pub max: Ticks,
    /// Rollup metric name.
    pub metric: String,
    /// Query text from the slowest call.
    pub query: String,
    /// Parameters JSON from the slowest call.
    pub params_json: String,
}

/// The per-transaction slow SQL log, aggregated by statement id.
#[derive(Debug, Default)]
pub struct SlowSqls {
    entries: Vec<SlowSql>,
}

impl SlowSqls {
    /// An empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one slow statement execution. Entries with the same id
    /// aggregate; the query and parameters of the slowest execution win.
    pub fn add(&mut self, id: u32, duration: Ticks, metric: &str, query: &str, params_json: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
            entry.count += 1;
            entry.total += duration;
            entry.min = entry.min.min(duration);
            if duration > entry.max {
                entry.max = duration;
                entry.query = query.to_owned();
                entry.params_json = params_json.to_owned();
            }
            return;
        }

        self.entries.push(SlowSql {
            id,
            count: 1,
            total: duration,
            min: duration,
            max: duration,
            metric: metric.to_owned(),
            query: query.to_owned(),
            params_json: params_json.to_owned(),
        });
    }

    /// Number of distinct statements recorded.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no statements were recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The aggregated entries.
    pub fn entries(&self) -> &[SlowSql] {
        &self.entries
    }

    /// Export for the wire, converting times to whole microseconds.
    pub fn to_wire(&self) -> Vec<SlowSqlWire> {
        self.entries
            .iter()
            .map(|entry| SlowSqlWire {
                id: entry.id,
                count: entry.count,
                total_us: entry.total,
                min_us: entry.min,
                max_us: entry.max,
                metric: entry.metric.clone(),
                query: entry.query.clone(),
                params_json: entry.params_json.clone(),
            })
            .collect()
    }
}
