// SPDX-License-Identifier: MIT OR Apache-2.0
//! The harvest selector.
//!
//! Two traversals over the finished segment tree. The first pass fills two
//! bounded heaps (trace candidates by duration, span candidates by
//! priority then duration), computes per-segment exclusive time, merges
//! segment metrics into the transaction tables, and accumulates the
//! transaction's total time. The second pass emits the trace JSON and the
//! span events for the heap survivors.

use crate::arena::SegmentId;
use crate::attrs::{DESTINATION_SPAN, DESTINATION_TXN_EVENT, DESTINATION_TXN_TRACE};
use crate::exclusive::ExclusiveTime;
use crate::heap::BoundedHeap;
use crate::segment::{SegmentType, TypedAttributes};
use crate::span::{SpanCategory, SpanEvent};
use crate::strings::StringPool;
use crate::txn::{Transaction, Visit};
use axon_core::limits::MAX_TRACE_SEGMENTS;
use axon_core::time::{self, Ticks};
use axon_core::warngate::WarnGate;
use std::collections::HashSet;
use tracing::warn;

static MISSING_SEGMENT_ID_GATE: WarnGate = WarnGate::with_backoff(60);

/// The transaction-trace threshold in force: four apdex-T when derived,
/// else the configured value.
fn effective_tt_threshold(txn: &Transaction) -> Ticks {
    if txn.options.tt_is_apdex_f {
        4 * txn.options.apdex_t
    } else {
        txn.options.tt_threshold
    }
}

/// Run both harvest passes and store the artifacts on the transaction.
pub(crate) fn harvest(txn: &mut Transaction) {
    let Some(root) = txn.segment_root else { return };
    let duration = txn
        .arena
        .get(root)
        .map(|segment| segment.duration())
        .unwrap_or(0);

    let create_trace = txn.options.tt_enabled
        && txn.segment_count > 0
        && duration > 0
        && duration >= effective_tt_threshold(txn);
    let create_spans = txn.should_create_span_events() && txn.segment_count > 0 && duration > 0;

    let span_bound = txn.options.effective_span_limit();
    let (total_time, trace_set, span_set) = heap_pass(txn, root, create_trace, create_spans, span_bound);
    txn.final_data.total_time = total_time;

    if !create_trace && !create_spans {
        return;
    }

    emit_pass(txn, root, duration, trace_set, span_set);
}

/// Pass 1: heaps, exclusive time, metric merge, total time.
#[allow(clippy::type_complexity)]
fn heap_pass(
    txn: &mut Transaction,
    root: SegmentId,
    create_trace: bool,
    create_spans: bool,
    span_bound: usize,
) -> (Ticks, Option<HashSet<SegmentId>>, Option<HashSet<SegmentId>>) {
    let mut trace_heap = create_trace.then(|| BoundedHeap::<Ticks>::new(MAX_TRACE_SEGMENTS));
    let mut span_heap = create_spans.then(|| BoundedHeap::<(u32, Ticks)>::new(span_bound));
    let mut total_time: Ticks = 0;

    let root_window = txn
        .arena
        .get(root)
        .map(|segment| (segment.start_time, segment.stop_time))
        .unwrap_or((0, 0));
    let mut main_context = txn
        .options
        .discount_main_context_blocking
        .then(|| ExclusiveTime::new(0, root_window.0, root_window.1));

    let order = txn.traversal_order(root);
    for visit in &order {
        match *visit {
            Visit::Pre(id) => {
                let (start, stop, context, parent, priority, dur, n_children) =
                    match txn.arena.get(id) {
                        Some(segment) => (
                            segment.start_time,
                            segment.stop_time,
                            segment.async_context,
                            segment.parent,
                            segment.priority,
                            segment.duration(),
                            segment.children.len(),
                        ),
                        None => continue,
                    };

                // Set up the accumulator so children can subtract from it.
                {
                    let segment = txn.arena.get_mut(id).expect("segment exists");
                    segment
                        .exclusive_time
                        .get_or_insert_with(|| ExclusiveTime::new(n_children, start, stop));
                }

                // Fold this segment into its same-context parent.
                if let Some(parent) = parent
                    && let Some(parent_segment) = txn.arena.get_mut(parent)
                    && parent_segment.async_context == context
                    && let Some(parent_exclusive) = parent_segment.exclusive_time.as_mut()
                {
                    parent_exclusive.add_child(start, stop);
                }

                // Asynchronous work blocks the main context when the
                // discount option is on.
                if context.is_some()
                    && let Some(main_context) = main_context.as_mut()
                {
                    main_context.add_child(start, stop);
                }

                if let Some(heap) = trace_heap.as_mut() {
                    heap.insert(dur, id);
                }
                if let Some(heap) = span_heap.as_mut() {
                    heap.insert((priority, dur), id);
                }
            }
            Visit::Post(id) => {
                let (dur, exclusive, metrics) = match txn.arena.get_mut(id) {
                    Some(segment) => {
                        let exclusive = segment
                            .exclusive_time
                            .as_ref()
                            .map(ExclusiveTime::calculate)
                            .unwrap_or(0);
                        // The root keeps its accumulator; it feeds the
                        // final transaction metrics.
                        if segment.parent.is_some() {
                            segment.exclusive_time = None;
                        }
                        (segment.duration(), exclusive, segment.metrics.clone())
                    }
                    None => continue,
                };

                total_time += exclusive;
                for metric in &metrics {
                    txn.merge_metric(metric, dur, exclusive);
                }
            }
        }
    }

    // With the discount in force, time the main context spent blocked on
    // asynchronous work comes back out of the total.
    if let Some(main_context) = main_context {
        let window = root_window.1.saturating_sub(root_window.0);
        let blocked = window.saturating_sub(main_context.calculate());
        total_time = total_time.saturating_sub(blocked);
    }

    (
        total_time,
        trace_heap.map(BoundedHeap::into_set),
        span_heap.map(BoundedHeap::into_set),
    )
}

/// Append `"key":value` to a JSON object under construction, prefixing a
/// comma unless the object is still empty.
fn push_kv(buf: &mut String, key: &str, value: &str, raw_json: bool) {
    if !buf.ends_with('{') {
        buf.push(',');
    }
    buf.push('"');
    buf.push_str(key);
    buf.push_str("\":");
    if raw_json {
        buf.push_str(value);
    } else {
        buf.push_str(&serde_json::Value::from(value).to_string());
    }
}

fn push_typed_attributes(buf: &mut String, txn: &Transaction, id: SegmentId) {
    let Some(segment) = txn.arena.get(id) else {
        return;
    };
    match segment.typed_attributes.as_deref() {
        Some(TypedAttributes::Datastore(data)) => {
            if let Some(host) = data.instance.host.as_deref() {
                push_kv(buf, "host", host, false);
            }
            if let Some(database_name) = data.instance.database_name.as_deref() {
                push_kv(buf, "database_name", database_name, false);
            }
            if let Some(port) = data.instance.port_path_or_id.as_deref() {
                push_kv(buf, "port_path_or_id", port, false);
            }
            if let Some(backtrace) = data.backtrace_json.as_deref() {
                push_kv(buf, "backtrace", backtrace, true);
            }
            if let Some(explain_plan) = data.explain_plan_json.as_deref() {
                push_kv(buf, "explain_plan", explain_plan, true);
            }
            if let Some(sql) = data.sql.as_deref() {
                push_kv(buf, "sql", sql, false);
            }
            if let Some(sql_obfuscated) = data.sql_obfuscated.as_deref() {
                push_kv(buf, "sql_obfuscated", sql_obfuscated, false);
            }
            if let Some(input_query) = data.input_query_json.as_deref() {
                push_kv(buf, "input_query", input_query, true);
            }
        }
        Some(TypedAttributes::External(ext)) => {
            if let Some(uri) = ext.uri.as_deref() {
                push_kv(buf, "uri", uri, false);
            }
            if let Some(library) = ext.library.as_deref() {
                push_kv(buf, "library", library, false);
            }
            if let Some(procedure) = ext.procedure.as_deref() {
                push_kv(buf, "procedure", procedure, false);
            }
            if let Some(guid) = ext.transaction_guid.as_deref() {
                push_kv(buf, "transaction_guid", guid, false);
            }
            push_kv(buf, "status", &ext.status.to_string(), true);
        }
        None => {}
    }
}

fn push_attribute_map(buf: &mut String, map: &serde_json::Map<String, serde_json::Value>) {
    for (key, value) in map {
        push_kv(buf, key, &value.to_string(), true);
    }
}

/// Build a span event from a finished segment.
///
/// Fails for active or time-inverted segments, and for transactions that
/// will not emit span events at all (no id can be generated then).
pub(crate) fn segment_to_span_event(txn: &mut Transaction, id: SegmentId) -> Option<SpanEvent> {
    let (start, stop) = {
        let segment = txn.arena.get(id)?;
        (segment.start_time, segment.stop_time)
    };

    if stop == 0 {
        warn!(target: "axon.txn", "cannot create a span event from an active segment");
        return None;
    }
    if start > stop {
        warn!(
            target: "axon.txn",
            start, stop, "cannot create a span event when the stop time is before the start time"
        );
        return None;
    }

    let Some(guid) = txn.ensure_segment_id(id) else {
        if MISSING_SEGMENT_ID_GATE.should_warn() {
            warn!(
                target: "axon.txn",
                "cannot create a span event when a segment id cannot be \
                 generated; is distributed tracing enabled?"
            );
        }
        return None;
    };

    let mut event = SpanEvent::new();
    event.set_intrinsic("guid", guid.into());
    event.set_intrinsic("traceId", txn.distributed_trace.trace_id.clone().into());
    event.set_intrinsic("transactionId", txn.distributed_trace.guid.clone().into());
    event.set_intrinsic(
        "timestamp",
        time::to_ms(txn.abs_start_time + start).into(),
    );
    event.set_intrinsic(
        "duration",
        time::to_secs_f64(stop.saturating_sub(start)).into(),
    );
    event.set_intrinsic("priority", txn.distributed_trace.priority.into());
    event.set_intrinsic("sampled", txn.distributed_trace.sampled.into());

    let segment = txn.arena.get(id)?;
    let name = segment
        .name
        .and_then(|name| txn.trace_strings.get(name))
        .unwrap_or("<unknown>");
    event.set_intrinsic("name", name.into());

    if let Some(error) = segment.error.as_ref() {
        if let Some(message) = error.message.as_deref() {
            event.set_error_message(message);
        }
        event.set_error_class(&error.class);
    }

    match segment.ty {
        SegmentType::Datastore => {
            event.set_category(SpanCategory::Datastore);
            if let Some(data) = segment.datastore() {
                event.set_intrinsic_str("component", data.component.as_deref());
                event.set_intrinsic_str("peer.hostname", data.instance.host.as_deref());
                let host = data.instance.host.as_deref().unwrap_or("unknown");
                let port = data.instance.port_path_or_id.as_deref().unwrap_or("unknown");
                event.set_intrinsic("peer.address", format!("{host}:{port}").into());
                event.set_intrinsic_str("db.instance", data.instance.database_name.as_deref());
                event.set_intrinsic_str(
                    "db.statement",
                    data.sql.as_deref().or(data.sql_obfuscated.as_deref()),
                );
            }
        }
        SegmentType::External => {
            event.set_category(SpanCategory::Http);
            if let Some(ext) = segment.external() {
                event.set_intrinsic_str("http.method", ext.procedure.as_deref());
                event.set_intrinsic_str("http.url", ext.uri.as_deref());
                event.set_intrinsic_str("component", ext.library.as_deref());
                event.set_intrinsic("http.statusCode", ext.status.into());
            }
        }
        SegmentType::Custom => {
            event.set_category(SpanCategory::Generic);
        }
    }

    if let Some(attributes) = segment.attributes.as_ref() {
        for (key, value) in attributes.user_to_map(DESTINATION_SPAN) {
            if event.user_len() >= crate::attrs::USER_ATTRIBUTE_LIMIT {
                break;
            }
            event.set_attribute_user(&key, value);
        }
        for (key, value) in attributes.agent_to_map(DESTINATION_SPAN) {
            event.set_attribute_agent(&key, value);
        }
    }
    if let Some(attributes) = segment.attributes_txn_event.as_ref() {
        for (key, value) in attributes.user_to_map(DESTINATION_SPAN) {
            if event.user_len() >= crate::attrs::USER_ATTRIBUTE_LIMIT {
                break;
            }
            event.set_attribute_user(&key, value);
        }
    }

    Some(event)
}

/// Pass 2: emit the trace JSON and the span events.
fn emit_pass(
    txn: &mut Transaction,
    root: SegmentId,
    duration: Ticks,
    trace_set: Option<HashSet<SegmentId>>,
    span_set: Option<HashSet<SegmentId>>,
) {
    let mut buf = trace_set.as_ref().map(|_| {
        let mut buf = String::with_capacity(8 * 4096);
        buf.push_str("[[0,{},{},[0,");
        buf.push_str(&time::to_ms(duration).to_string());
        buf.push_str(",\"ROOT\",{},[");
        buf
    });
    let mut segment_names = StringPool::new();
    let mut span_events: Vec<SpanEvent> = Vec::new();
    let mut success = true;

    // Nearest sampled ancestors for reattachment after pruning.
    let mut trace_path: Vec<SegmentId> = Vec::new();
    let mut ancestors_with_child: HashSet<SegmentId> = HashSet::new();
    let mut span_parent_ids: Vec<Option<String>> = Vec::new();

    let order = txn.traversal_order(root);
    for visit in &order {
        match *visit {
            Visit::Pre(id) => {
                let (start, stop, context, name_id) = match txn.arena.get(id) {
                    Some(segment) => (
                        segment.start_time,
                        segment.stop_time,
                        segment.async_context,
                        segment.name,
                    ),
                    None => continue,
                };

                // Zero-duration segments are skipped entirely; their
                // children reattach to the nearest emitted ancestor.
                if start == stop {
                    continue;
                }
                if start > stop {
                    let name = name_id
                        .and_then(|name| txn.trace_strings.get(name))
                        .unwrap_or("<unknown>");
                    warn!(
                        target: "axon.txn",
                        name, start, stop, "invalid segment: start time after stop time"
                    );
                    success = false;
                    continue;
                }

                if let Some(span_set) = span_set.as_ref()
                    && span_set.contains(&id)
                {
                    if let Some(mut event) = segment_to_span_event(txn, id) {
                        if id == root {
                            decorate_root_span(txn, &mut event);
                        } else if let Some(Some(parent_id)) = span_parent_ids.last() {
                            event.set_intrinsic("parentId", parent_id.clone().into());
                        }
                        span_events.push(event);
                    }
                    // The id joins the path even when conversion failed;
                    // the post pass pops unconditionally.
                    span_parent_ids.push(txn.arena.get(id).and_then(|s| s.id.clone()));
                }

                if let (Some(buf), Some(trace_set)) = (buf.as_mut(), trace_set.as_ref())
                    && trace_set.contains(&id)
                {
                    let parent = trace_path.last().copied();
                    if let Some(parent) = parent {
                        if ancestors_with_child.contains(&parent) {
                            buf.push(',');
                        }
                        ancestors_with_child.insert(parent);
                    }
                    trace_path.push(id);

                    let name = name_id
                        .and_then(|name| txn.trace_strings.get(name))
                        .unwrap_or("<unknown>");
                    let name_ix = segment_names.add(name).index();

                    let start_ms = time::to_ms(start);
                    let stop_ms = time::to_ms(stop).max(start_ms);

                    buf.push('[');
                    buf.push_str(&start_ms.to_string());
                    buf.push(',');
                    buf.push_str(&stop_ms.to_string());
                    buf.push_str(",\"`");
                    buf.push_str(&name_ix.to_string());
                    buf.push_str("\",{");

                    push_typed_attributes(buf, txn, id);

                    if let Some(context) = context {
                        let context_name = txn
                            .trace_strings
                            .get(context)
                            .unwrap_or("<unknown>");
                        let context_ix = segment_names.add(context_name).index();
                        push_kv(buf, "async_context", &format!("`{context_ix}"), false);
                    }

                    if let Some(attributes) =
                        txn.arena.get(id).and_then(|s| s.attributes.as_ref())
                    {
                        push_attribute_map(buf, &attributes.user_to_map(DESTINATION_TXN_TRACE));
                        push_attribute_map(buf, &attributes.agent_to_map(DESTINATION_TXN_TRACE));
                    }

                    buf.push_str("},[");
                }
            }
            Visit::Post(id) => {
                let (start, stop) = match txn.arena.get(id) {
                    Some(segment) => (segment.start_time, segment.stop_time),
                    None => continue,
                };
                if start == stop || start > stop {
                    continue;
                }

                if let Some(buf) = buf.as_mut()
                    && trace_path.last() == Some(&id)
                {
                    buf.push_str("]]");
                    trace_path.pop();
                }
                if let Some(span_set) = span_set.as_ref()
                    && span_set.contains(&id)
                {
                    span_parent_ids.pop();
                }
            }
        }
    }

    if !success {
        warn!(
            target: "axon.txn",
            "segment iteration failed; no trace or span events will be \
             generated for this transaction"
        );
        return;
    }

    if let Some(mut trace) = buf {
        trace.push_str("]]");
        trace.push(',');

        let mut attrs = serde_json::Map::new();
        let agent = txn.attributes.agent_to_map(DESTINATION_TXN_TRACE);
        if !agent.is_empty() {
            attrs.insert("agentAttributes".into(), agent.into());
        }
        let user = txn.attributes.user_to_map(DESTINATION_TXN_TRACE);
        if !user.is_empty() {
            attrs.insert("userAttributes".into(), user.into());
        }
        trace.push_str(&serde_json::Value::Object(attrs).to_string());

        trace.push(']');
        trace.push(',');
        trace.push_str(&segment_names.to_json());
        trace.push(']');

        txn.final_data.trace_json = Some(trace);
    }

    txn.final_data.span_events = span_events;
}

/// Root-span extras: the entry-point marker, the transaction name, and
/// the inbound distributed trace linkage.
fn decorate_root_span(txn: &Transaction, event: &mut SpanEvent) {
    event.set_intrinsic("nr.entryPoint", true.into());
    event.set_intrinsic("transaction.name", txn.name.clone().into());

    if let Some(inbound) = txn.distributed_trace.inbound.as_ref() {
        event.set_intrinsic_str("parentId", inbound.guid.as_deref());
        event.set_intrinsic_str("tracingVendors", inbound.tracing_vendors.as_deref());
        event.set_intrinsic_str("trustedParentId", inbound.trusted_parent_id.as_deref());

        if let Some(parent_type) = inbound.parent_type.as_deref() {
            event.set_attribute_agent("parent.type", parent_type.into());
        }
        if let Some(app_id) = inbound.app_id.as_deref() {
            event.set_attribute_agent("parent.app", app_id.into());
        }
        if let Some(account_id) = inbound.account_id.as_deref() {
            event.set_attribute_agent("parent.account", account_id.into());
        }
        if let Some(transport_type) = inbound.transport_type.as_deref() {
            event.set_attribute_agent("parent.transportType", transport_type.into());
        }
        if let Some(transport_duration) = inbound.transport_duration {
            event.set_attribute_agent(
                "parent.transportDuration",
                time::to_secs_f64(transport_duration).into(),
            );
        }
    }

    for (key, value) in txn.attributes.agent_to_map(DESTINATION_TXN_EVENT) {
        event.set_attribute_agent(&key, value);
    }
}
