// SPDX-License-Identifier: MIT OR Apache-2.0
//! The transaction data command: the payload sent to the daemon at the end
//! of every transaction.

use crate::{MessageBody, finish_message};
use axon_flatbuf::{Builder, Table, read_f64, read_u8};

/// Transaction body field indices.
pub mod field {
    /// Full transaction metric name.
    pub const NAME: usize = 0;
    /// Request URI.
    pub const URI: usize = 1;
    /// Synthetics resource id, when present.
    pub const SYNTHETICS_RESOURCE_ID: usize = 2;
    /// Worker process id.
    pub const PID: usize = 3;
    /// The transaction event, wrapped as an Event table.
    pub const TXN_EVENT: usize = 4;
    /// Vector of Metric tables.
    pub const METRICS: usize = 5;
    /// Vector of Error tables (at most one element).
    pub const ERRORS: usize = 6;
    /// Vector of SlowSql tables.
    pub const SLOW_SQLS: usize = 7;
    /// Vector of custom Event tables.
    pub const CUSTOM_EVENTS: usize = 8;
    /// The transaction trace.
    pub const TRACE: usize = 9;
    /// Vector of error Event tables (at most one element).
    pub const ERROR_EVENTS: usize = 10;
    /// Distributed-trace sampling priority.
    pub const SAMPLING_PRIORITY: usize = 11;
    /// Vector of span Event tables.
    pub const SPAN_EVENTS: usize = 12;
    /// Vector of log Event tables.
    pub const LOG_EVENTS: usize = 13;
    /// Package inventory, wrapped as an Event table.
    pub const PHP_PACKAGES: usize = 14;
    /// Number of transaction body fields.
    pub const NUM_FIELDS: usize = 15;
}

/// Event table field indices.
pub mod event_field {
    /// Pre-serialized JSON payload.
    pub const DATA: usize = 0;
    /// Number of Event fields.
    pub const NUM_FIELDS: usize = 1;
}

/// Error table field indices.
pub mod error_field {
    /// Error priority.
    pub const PRIORITY: usize = 0;
    /// Pre-serialized JSON payload.
    pub const DATA: usize = 1;
    /// Number of Error fields.
    pub const NUM_FIELDS: usize = 2;
}

/// SlowSql table field indices.
pub mod slowsql_field {
    /// Statement id.
    pub const ID: usize = 0;
    /// Call count.
    pub const COUNT: usize = 1;
    /// Total time in microseconds.
    pub const TOTAL_MICROS: usize = 2;
    /// Minimum time in microseconds.
    pub const MIN_MICROS: usize = 3;
    /// Maximum time in microseconds.
    pub const MAX_MICROS: usize = 4;
    /// Rollup metric name.
    pub const METRIC: usize = 5;
    /// The (possibly obfuscated) query text.
    pub const QUERY: usize = 6;
    /// Query parameters as JSON.
    pub const PARAMS: usize = 7;
    /// Number of SlowSql fields.
    pub const NUM_FIELDS: usize = 8;
}

/// Trace table field indices.
pub mod trace_field {
    /// Transaction start in absolute milliseconds.
    pub const TIMESTAMP: usize = 0;
    /// Transaction duration in milliseconds.
    pub const DURATION: usize = 1;
    /// Transaction GUID.
    pub const GUID: usize = 2;
    /// Whether the trace must be kept regardless of sampling.
    pub const FORCE_PERSIST: usize = 3;
    /// The trace JSON.
    pub const DATA: usize = 4;
    /// Number of Trace fields.
    pub const NUM_FIELDS: usize = 5;
}

/// Metric table field indices.
pub mod metric_field {
    /// Metric name.
    pub const NAME: usize = 0;
    /// Inline MetricData struct.
    pub const DATA: usize = 1;
    /// Number of Metric fields.
    pub const NUM_FIELDS: usize = 2;
}

/// Size in bytes of the inline MetricData struct: six doubles plus two
/// flag bytes, padded to eight-byte alignment.
pub const METRIC_DATA_SIZE: usize = 56;

/// One metric's aggregate data, in seconds.
///
/// Apdex metrics reuse the first five slots as satisfying, tolerating,
/// failing, min and max, with `sum_squares` fixed at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricData {
    /// Call count (or satisfying count for apdex).
    pub count: f64,
    /// Total time (or tolerating count for apdex).
    pub total: f64,
    /// Exclusive time (or failing count for apdex).
    pub exclusive: f64,
    /// Minimum duration.
    pub min: f64,
    /// Maximum duration.
    pub max: f64,
    /// Sum of squared durations.
    pub sum_squares: f64,
    /// Whether the metric is scoped to the transaction name.
    pub scoped: bool,
    /// Whether the metric bypasses server-side filtering.
    pub forced: bool,
}

/// A named metric ready for the wire.
#[derive(Debug, Clone)]
pub struct MetricWire {
    /// Full metric name.
    pub name: String,
    /// Aggregate data.
    pub data: MetricData,
}

/// The captured error, pre-serialized by the error sink.
#[derive(Debug, Clone)]
pub struct ErrorWire {
    /// Priority used by the daemon when merging errors across workers.
    pub priority: i32,
    /// Error JSON.
    pub json: String,
}

/// One slow SQL entry.
#[derive(Debug, Clone)]
pub struct SlowSqlWire {
    /// Statement id (a hash of the metric name).
    pub id: u32,
    /// Number of calls aggregated into this entry.
    pub count: i32,
    /// Total time in microseconds.
    pub total_us: u64,
    /// Minimum time in microseconds.
    pub min_us: u64,
    /// Maximum time in microseconds.
    pub max_us: u64,
    /// Rollup metric name.
    pub metric: String,
    /// The query text.
    pub query: String,
    /// Parameters JSON.
    pub params_json: String,
}

/// The transaction trace artifact.
#[derive(Debug, Clone)]
pub struct TraceWire {
    /// Transaction start in absolute milliseconds.
    pub start_ms: f64,
    /// Transaction duration in milliseconds.
    pub duration_ms: f64,
    /// Transaction GUID.
    pub guid: String,
    /// Whether the trace must be kept regardless of sampling.
    pub force_persist: bool,
    /// The trace JSON.
    pub json: String,
}

/// Everything sent for one finished transaction.
#[derive(Debug, Clone, Default)]
pub struct TxnPayload {
    /// Agent run id for the envelope.
    pub agent_run_id: Option<String>,
    /// Full transaction metric name.
    pub name: String,
    /// Request URI; `"<unknown>"` is substituted when absent.
    pub request_uri: Option<String>,
    /// Synthetics resource id, when present.
    pub synthetics_resource_id: Option<String>,
    /// Worker process id.
    pub pid: i32,
    /// Transaction event JSON.
    pub txn_event_json: Option<String>,
    /// Metrics, scoped and unscoped.
    pub metrics: Vec<MetricWire>,
    /// The captured error, if any.
    pub error: Option<ErrorWire>,
    /// Slow SQL entries.
    pub slow_sqls: Vec<SlowSqlWire>,
    /// Custom event JSON payloads.
    pub custom_events_json: Vec<String>,
    /// Error event JSON, present iff an error was captured.
    pub error_event_json: Option<String>,
    /// The transaction trace, if one was selected.
    pub trace: Option<TraceWire>,
    /// Span event JSON payloads.
    pub span_events_json: Vec<String>,
    /// Log event JSON payloads.
    pub log_events_json: Vec<String>,
    /// Package inventory JSON.
    pub packages_json: Option<String>,
    /// Distributed-trace sampling priority.
    pub sampling_priority: f64,
    /// Span event cap from the application limits.
    pub span_limit: usize,
    /// Log event cap from the application limits.
    pub log_limit: usize,
}

fn prepend_event(fb: &mut Builder, json: &str) -> u32 {
    let data = fb.prepend_string(json);
    fb.object_begin(event_field::NUM_FIELDS);
    fb.object_prepend_uoffset(event_field::DATA, data, 0);
    fb.object_end()
}

fn prepend_event_bytes(fb: &mut Builder, json: &str) -> u32 {
    let data = fb.prepend_bytes(json.as_bytes());
    fb.object_begin(event_field::NUM_FIELDS);
    fb.object_prepend_uoffset(event_field::DATA, data, 0);
    fb.object_end()
}

/// Prepend a vector of offsets so that the finished element order matches
/// `offsets`.
fn prepend_offset_vector(fb: &mut Builder, offsets: &[u32]) -> u32 {
    fb.vector_begin(4, offsets.len(), 4);
    for &offset in offsets.iter().rev() {
        fb.prepend_uoffset(offset);
    }
    fb.vector_end(offsets.len())
}

fn prepend_custom_events(fb: &mut Builder, payload: &TxnPayload) -> u32 {
    if payload.custom_events_json.is_empty() {
        return 0;
    }
    let offsets: Vec<u32> = payload
        .custom_events_json
        .iter()
        .map(|json| prepend_event(fb, json))
        .collect();
    prepend_offset_vector(fb, &offsets)
}

fn prepend_span_events(fb: &mut Builder, payload: &TxnPayload) -> u32 {
    if payload.span_events_json.is_empty() || payload.span_limit == 0 {
        return 0;
    }
    let count = payload.span_events_json.len().min(payload.span_limit);
    let offsets: Vec<u32> = payload.span_events_json[..count]
        .iter()
        .map(|json| prepend_event_bytes(fb, json))
        .collect();
    prepend_offset_vector(fb, &offsets)
}

fn prepend_log_events(fb: &mut Builder, payload: &TxnPayload) -> u32 {
    if payload.log_events_json.is_empty() || payload.log_limit == 0 {
        return 0;
    }
    let count = payload.log_events_json.len().min(payload.log_limit);
    // Log events land on the wire in reverse storage order; the daemon
    // treats the vector as unordered.
    let offsets: Vec<u32> = payload.log_events_json[..count]
        .iter()
        .rev()
        .map(|json| prepend_event_bytes(fb, json))
        .collect();
    prepend_offset_vector(fb, &offsets)
}

fn prepend_error_events(fb: &mut Builder, payload: &TxnPayload) -> u32 {
    let Some(json) = payload.error_event_json.as_deref() else {
        return 0;
    };
    let offsets = [prepend_event(fb, json)];
    prepend_offset_vector(fb, &offsets)
}

fn prepend_errors(fb: &mut Builder, payload: &TxnPayload) -> u32 {
    let Some(error) = payload.error.as_ref() else {
        return 0;
    };

    let data = fb.prepend_string(&error.json);
    fb.object_begin(error_field::NUM_FIELDS);
    fb.object_prepend_uoffset(error_field::DATA, data, 0);
    fb.object_prepend_i32(error_field::PRIORITY, error.priority, 0);
    let entry = fb.object_end();

    prepend_offset_vector(fb, &[entry])
}

fn prepend_metric_data(fb: &mut Builder, data: &MetricData) -> u32 {
    fb.prep(8, METRIC_DATA_SIZE);
    fb.pad(6);
    fb.prepend_bool(data.forced);
    fb.prepend_bool(data.scoped);
    fb.prepend_f64(data.sum_squares);
    fb.prepend_f64(data.max);
    fb.prepend_f64(data.min);
    fb.prepend_f64(data.exclusive);
    fb.prepend_f64(data.total);
    fb.prepend_f64(data.count);
    fb.offset()
}

fn prepend_metrics(fb: &mut Builder, payload: &TxnPayload) -> u32 {
    if payload.metrics.is_empty() {
        return 0;
    }

    let offsets: Vec<u32> = payload
        .metrics
        .iter()
        .map(|metric| {
            let name = fb.prepend_string(&metric.name);
            fb.object_begin(metric_field::NUM_FIELDS);
            fb.object_prepend_uoffset(metric_field::NAME, name, 0);
            let data = prepend_metric_data(fb, &metric.data);
            fb.object_prepend_struct(metric_field::DATA, data, 0);
            fb.object_end()
        })
        .collect();

    prepend_offset_vector(fb, &offsets)
}

fn prepend_slow_sqls(fb: &mut Builder, payload: &TxnPayload) -> u32 {
    if payload.slow_sqls.is_empty() {
        return 0;
    }

    // Slow SQLs land on the wire in reverse storage order; the daemon
    // aggregates by id, so ordering carries no meaning.
    let offsets: Vec<u32> = payload
        .slow_sqls
        .iter()
        .rev()
        .map(|slow| {
            let params = fb.prepend_string(&slow.params_json);
            let query = fb.prepend_string(&slow.query);
            let metric = fb.prepend_string(&slow.metric);

            fb.object_begin(slowsql_field::NUM_FIELDS);
            fb.object_prepend_uoffset(slowsql_field::PARAMS, params, 0);
            fb.object_prepend_uoffset(slowsql_field::QUERY, query, 0);
            fb.object_prepend_uoffset(slowsql_field::METRIC, metric, 0);
            fb.object_prepend_u64(slowsql_field::MAX_MICROS, slow.max_us, 0);
            fb.object_prepend_u64(slowsql_field::MIN_MICROS, slow.min_us, 0);
            fb.object_prepend_u64(slowsql_field::TOTAL_MICROS, slow.total_us, 0);
            fb.object_prepend_i32(slowsql_field::COUNT, slow.count, 0);
            fb.object_prepend_u32(slowsql_field::ID, slow.id, 0);
            fb.object_end()
        })
        .collect();

    prepend_offset_vector(fb, &offsets)
}

fn prepend_trace(fb: &mut Builder, payload: &TxnPayload) -> u32 {
    let Some(trace) = payload.trace.as_ref() else {
        return 0;
    };

    let data = fb.prepend_string(&trace.json);
    let guid = fb.prepend_string(&trace.guid);

    fb.object_begin(trace_field::NUM_FIELDS);
    fb.object_prepend_uoffset(trace_field::DATA, data, 0);
    fb.object_prepend_uoffset(trace_field::GUID, guid, 0);
    fb.object_prepend_bool(trace_field::FORCE_PERSIST, trace.force_persist, false);
    fb.object_prepend_f64(trace_field::DURATION, trace.duration_ms, 0.0);
    fb.object_prepend_f64(trace_field::TIMESTAMP, trace.start_ms, 0.0);
    fb.object_end()
}

fn prepend_wrapped_event(fb: &mut Builder, json: Option<&str>) -> u32 {
    match json {
        Some(json) => prepend_event(fb, json),
        None => 0,
    }
}

/// Encode a complete transaction data message.
pub fn encode(payload: &TxnPayload) -> Builder {
    let mut fb = Builder::new(0);

    let trace = prepend_trace(&mut fb, payload);
    let span_events = prepend_span_events(&mut fb, payload);
    let log_events = prepend_log_events(&mut fb, payload);
    let error_events = prepend_error_events(&mut fb, payload);
    let custom_events = prepend_custom_events(&mut fb, payload);
    let slow_sqls = prepend_slow_sqls(&mut fb, payload);
    let errors = prepend_errors(&mut fb, payload);
    let metrics = prepend_metrics(&mut fb, payload);
    let packages = prepend_wrapped_event(&mut fb, payload.packages_json.as_deref());
    let txn_event = prepend_wrapped_event(&mut fb, payload.txn_event_json.as_deref());
    let resource_id = fb.prepend_opt_string(payload.synthetics_resource_id.as_deref());
    let request_uri = fb.prepend_string(payload.request_uri.as_deref().unwrap_or("<unknown>"));
    let name = fb.prepend_string(&payload.name);

    fb.object_begin(field::NUM_FIELDS);
    fb.object_prepend_f64(field::SAMPLING_PRIORITY, payload.sampling_priority, 0.0);
    fb.object_prepend_uoffset(field::ERROR_EVENTS, error_events, 0);
    fb.object_prepend_uoffset(field::TRACE, trace, 0);
    fb.object_prepend_uoffset(field::CUSTOM_EVENTS, custom_events, 0);
    fb.object_prepend_uoffset(field::SLOW_SQLS, slow_sqls, 0);
    fb.object_prepend_uoffset(field::ERRORS, errors, 0);
    fb.object_prepend_uoffset(field::METRICS, metrics, 0);
    fb.object_prepend_uoffset(field::TXN_EVENT, txn_event, 0);
    fb.object_prepend_i32(field::PID, payload.pid, 0);
    fb.object_prepend_uoffset(field::SYNTHETICS_RESOURCE_ID, resource_id, 0);
    fb.object_prepend_uoffset(field::URI, request_uri, 0);
    fb.object_prepend_uoffset(field::NAME, name, 0);
    fb.object_prepend_uoffset(field::SPAN_EVENTS, span_events, 0);
    fb.object_prepend_uoffset(field::LOG_EVENTS, log_events, 0);
    fb.object_prepend_uoffset(field::PHP_PACKAGES, packages, 0);
    let transaction = fb.object_end();

    finish_message(
        &mut fb,
        payload.agent_run_id.as_deref(),
        transaction,
        MessageBody::Txn,
    );
    fb
}

/// Decode one MetricData struct at an absolute buffer position.
pub fn read_metric_data(buf: &[u8], pos: usize) -> MetricData {
    MetricData {
        count: read_f64(buf, pos),
        total: read_f64(buf, pos + 8),
        exclusive: read_f64(buf, pos + 16),
        min: read_f64(buf, pos + 24),
        max: read_f64(buf, pos + 32),
        sum_squares: read_f64(buf, pos + 40),
        scoped: read_u8(buf, pos + 48) != 0,
        forced: read_u8(buf, pos + 49) != 0,
    }
}

/// Read the `idx`-th table out of a vector-of-tables field.
pub fn vector_table<'a>(parent: &Table<'a>, field: usize, idx: usize) -> Option<Table<'a>> {
    if idx >= parent.vector_len(field) as usize {
        return None;
    }
    let first = parent.vector_pos(field)?;
    let pos = first + idx * axon_flatbuf::SIZE_UOFFSET;
    Some(Table::at(
        parent.buffer(),
        axon_flatbuf::read_indirect(parent.buffer(), pos),
    ))
}
