// SPDX-License-Identifier: MIT OR Apache-2.0
//! Harvest tests: trace JSON assembly, span-event selection, and
//! exclusive-time accounting.

use axon_core::config::{EventLimits, TxnOptions};
use axon_txn::attrs::AttributeConfig;
use axon_txn::txn::Transaction;
use serde_json::Value;

const MS: u64 = 1_000;

fn trace_options() -> TxnOptions {
    TxnOptions {
        tt_is_apdex_f: false,
        tt_threshold: 0,
        ..TxnOptions::default()
    }
}

fn begin(options: TxnOptions) -> Transaction {
    let mut txn = Transaction::begin_with(
        options,
        AttributeConfig::default(),
        EventLimits::default(),
        false,
        Some("8675309".into()),
        23,
    );
    txn.set_name("WebTransaction/Action/checkout");
    txn
}

/// Root -> a -> b, with fixed timings.
fn simple_tree(txn: &mut Transaction) {
    let root = txn.root().unwrap();
    txn.set_segment_timing(root, 0, 10_000 * MS);

    let a = txn.start_segment(None, None).unwrap();
    txn.set_segment_name(a, "Custom/alpha");
    txn.set_segment_timing(a, 1_000 * MS, 6_000 * MS);

    let b = txn.start_segment(None, None).unwrap();
    txn.set_segment_name(b, "Custom/beta");
    txn.set_segment_timing(b, 2_000 * MS, 2_000 * MS);

    txn.end_segment(b);
    txn.end_segment(a);
}

fn parse_trace(txn: &Transaction) -> Value {
    let json = txn
        .final_data
        .trace_json
        .as_ref()
        .expect("trace should have been produced");
    serde_json::from_str(json).expect("trace JSON should parse")
}

#[test]
fn trace_json_has_the_expected_scaffolding() {
    let mut txn = begin(trace_options());
    simple_tree(&mut txn);
    assert!(txn.end());

    let trace = parse_trace(&txn);

    // [[0,{},{},[0,duration,"ROOT",{},[...]],{attrs}],[strings]]
    let outer = trace.as_array().expect("outer array");
    assert_eq!(2, outer.len());

    let first = outer[0].as_array().expect("first element");
    assert_eq!(0, first[0].as_i64().unwrap());
    assert!(first[1].is_object());
    assert!(first[2].is_object());

    let root_node = first[3].as_array().expect("root node");
    assert_eq!(0, root_node[0].as_i64().unwrap());
    assert_eq!(10_000, root_node[1].as_i64().unwrap(), "duration in ms");
    assert_eq!("ROOT", root_node[2].as_str().unwrap());

    let string_table = outer[1].as_array().expect("string table");
    assert!(!string_table.is_empty());
}

#[test]
fn trace_nodes_reference_the_string_table() {
    let mut txn = begin(trace_options());
    simple_tree(&mut txn);
    assert!(txn.end());

    let trace = parse_trace(&txn);
    let outer = trace.as_array().unwrap();
    let strings: Vec<&str> = outer[1]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s.as_str().unwrap())
        .collect();

    let root_children = outer[0].as_array().unwrap()[3].as_array().unwrap()[4]
        .as_array()
        .unwrap();
    // The root segment is unnamed, so it resolves to "<unknown>".
    let root_segment = root_children[0].as_array().unwrap();
    let root_name_ref = root_segment[2].as_str().unwrap();
    let root_ix: usize = root_name_ref
        .strip_prefix('`')
        .expect("names are back-tick table references")
        .parse()
        .unwrap();
    assert_eq!("<unknown>", strings[root_ix]);

    let alpha = root_segment[4].as_array().unwrap()[0].as_array().unwrap();
    assert_eq!(1_000, alpha[0].as_i64().unwrap());
    assert_eq!(7_000, alpha[1].as_i64().unwrap());
    let alpha_ix: usize = alpha[2]
        .as_str()
        .unwrap()
        .strip_prefix('`')
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!("Custom/alpha", strings[alpha_ix]);

    let beta = alpha[4].as_array().unwrap()[0].as_array().unwrap();
    assert_eq!(2_000, beta[0].as_i64().unwrap());
    assert_eq!(4_000, beta[1].as_i64().unwrap());
}

#[test]
fn zero_duration_segments_are_pruned_and_children_reattach() {
    let mut txn = begin(trace_options());
    let root = txn.root().unwrap();
    txn.set_segment_timing(root, 0, 10_000 * MS);

    let ghost = txn.start_segment(None, None).unwrap();
    txn.set_segment_name(ghost, "Custom/ghost");
    txn.set_segment_timing(ghost, 1_000 * MS, 0);

    let child = txn.start_segment(None, None).unwrap();
    txn.set_segment_name(child, "Custom/child");
    txn.set_segment_timing(child, 2_000 * MS, 3_000 * MS);

    txn.end_segment(child);
    txn.end_segment(ghost);
    assert!(txn.end());

    let trace = parse_trace(&txn);
    let outer = trace.as_array().unwrap();
    let strings: Vec<&str> = outer[1]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s.as_str().unwrap())
        .collect();
    assert!(
        !strings.contains(&"Custom/ghost"),
        "zero-duration segment never appears"
    );

    // The child hangs off the root segment, the ghost's nearest emitted
    // ancestor.
    let root_children = outer[0].as_array().unwrap()[3].as_array().unwrap()[4]
        .as_array()
        .unwrap();
    let root_segment = root_children[0].as_array().unwrap();
    let reattached = root_segment[4].as_array().unwrap()[0].as_array().unwrap();
    let ix: usize = reattached[2]
        .as_str()
        .unwrap()
        .strip_prefix('`')
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!("Custom/child", strings[ix]);
}

#[test]
fn traces_below_threshold_are_not_created() {
    let mut options = trace_options();
    options.tt_threshold = 60_000_000;
    let mut txn = begin(options);
    simple_tree(&mut txn);
    assert!(txn.end());

    assert!(txn.final_data.trace_json.is_none());
    // Spans are independent of the trace threshold.
    assert!(!txn.final_data.span_events.is_empty());
}

#[test]
fn span_events_link_to_their_parents() {
    let mut txn = begin(trace_options());
    simple_tree(&mut txn);
    assert!(txn.end());

    let spans = &txn.final_data.span_events;
    assert_eq!(3, spans.len(), "root, alpha, beta");

    let root_span = &spans[0];
    assert_eq!(
        Some(&Value::Bool(true)),
        root_span.intrinsic("nr.entryPoint")
    );
    assert_eq!(
        Some("WebTransaction/Action/checkout"),
        root_span
            .intrinsic("transaction.name")
            .and_then(Value::as_str)
    );
    assert!(root_span.intrinsic("parentId").is_none());

    let root_guid = root_span.intrinsic("guid").unwrap().as_str().unwrap();
    let alpha = &spans[1];
    assert_eq!(
        Some(root_guid),
        alpha.intrinsic("parentId").and_then(Value::as_str)
    );
    assert_eq!(
        Some("Custom/alpha"),
        alpha.intrinsic("name").and_then(Value::as_str)
    );
    assert_eq!(
        Some(6.0),
        alpha.intrinsic("duration").and_then(Value::as_f64)
    );

    let alpha_guid = alpha.intrinsic("guid").unwrap().as_str().unwrap();
    let beta = &spans[2];
    assert_eq!(
        Some(alpha_guid),
        beta.intrinsic("parentId").and_then(Value::as_str)
    );

    for span in spans {
        assert_eq!(
            Some("generic"),
            span.intrinsic("category").and_then(Value::as_str)
        );
        assert_eq!(
            Some(txn.distributed_trace.trace_id.as_str()),
            span.intrinsic("traceId").and_then(Value::as_str)
        );
    }
}

#[test]
fn root_span_carries_inbound_linkage() {
    let mut txn = begin(trace_options());
    txn.distributed_trace.accept_inbound(
        Some("87b1c9a429205b25e5b687d5d800f5bd".into()),
        axon_txn::InboundPayload {
            guid: Some("27856f70d3d314b7".into()),
            parent_type: Some("App".into()),
            app_id: Some("4741547".into()),
            account_id: Some("1441".into()),
            transport_type: Some("HTTP".into()),
            transport_duration: Some(200_000),
            ..axon_txn::InboundPayload::default()
        },
    );
    simple_tree(&mut txn);
    assert!(txn.end());

    let root_span = &txn.final_data.span_events[0];
    assert_eq!(
        Some("27856f70d3d314b7"),
        root_span.intrinsic("parentId").and_then(Value::as_str)
    );
    assert_eq!(
        Some("App"),
        root_span.attribute_agent("parent.type").and_then(Value::as_str)
    );
    assert_eq!(
        Some(0.2),
        root_span
            .attribute_agent("parent.transportDuration")
            .and_then(Value::as_f64)
    );
    assert_eq!(
        Some("87b1c9a429205b25e5b687d5d800f5bd"),
        root_span.intrinsic("traceId").and_then(Value::as_str)
    );
}

#[test]
fn span_heap_prefers_priority_then_duration() {
    let mut options = trace_options();
    options.span_events_max_samples_stored = 2;
    let mut txn = begin(options);

    let root = txn.root().unwrap();
    txn.set_segment_timing(root, 0, 10_000 * MS);

    let long = txn.start_segment(None, None).unwrap();
    txn.set_segment_name(long, "Custom/long");
    txn.set_segment_timing(long, 100 * MS, 8_000 * MS);
    txn.end_segment(long);

    let short = txn.start_segment(None, None).unwrap();
    txn.set_segment_name(short, "Custom/short");
    txn.set_segment_timing(short, 200 * MS, 100 * MS);
    txn.end_segment(short);

    assert!(txn.end());

    let names: Vec<&str> = txn
        .final_data
        .span_events
        .iter()
        .filter_map(|span| span.intrinsic("name").and_then(Value::as_str))
        .collect();

    assert_eq!(2, names.len());
    assert!(
        names.contains(&"<unknown>"),
        "the root always wins on priority"
    );
    assert!(names.contains(&"Custom/long"));
    assert!(!names.contains(&"Custom/short"));
}

#[test]
fn spans_disabled_produces_no_span_events() {
    let mut options = trace_options();
    options.span_events_enabled = false;
    let mut txn = begin(options);
    simple_tree(&mut txn);
    assert!(txn.end());

    assert!(txn.final_data.span_events.is_empty());
    assert!(txn.final_data.trace_json.is_some());
}

#[test]
fn total_time_sums_exclusive_times() {
    let mut txn = begin(trace_options());
    simple_tree(&mut txn);
    assert!(txn.end());

    // root exclusive 4 s (10 - alpha's 6), alpha 4 s (6 - beta's 2),
    // beta 2 s.
    assert_eq!(10_000_000, txn.final_data.total_time);
}

#[test]
fn async_children_do_not_reduce_parent_exclusive_time() {
    let mut txn = begin(trace_options());
    let root = txn.root().unwrap();
    txn.set_segment_timing(root, 0, 10_000 * MS);

    let worker = txn.start_segment(None, Some("worker")).unwrap();
    txn.set_segment_name(worker, "Custom/async");
    txn.set_segment_timing(worker, 1_000 * MS, 4_000 * MS);
    txn.end_segment(worker);

    assert!(txn.end());

    // The async child overlaps the root but runs on another context, so
    // the root keeps its full 10 s of exclusive time.
    assert_eq!(14_000_000, txn.final_data.total_time);
}

#[test]
fn discounting_main_context_blocking_reduces_total_time() {
    let mut options = trace_options();
    options.discount_main_context_blocking = true;
    let mut txn = begin(options);
    let root = txn.root().unwrap();
    txn.set_segment_timing(root, 0, 10_000 * MS);

    let worker = txn.start_segment(None, Some("worker")).unwrap();
    txn.set_segment_name(worker, "Custom/async");
    txn.set_segment_timing(worker, 1_000 * MS, 4_000 * MS);
    txn.end_segment(worker);

    assert!(txn.end());

    // 14 s raw, minus the 4 s the main context spent blocked.
    assert_eq!(10_000_000, txn.final_data.total_time);
}

#[test]
fn metrics_merge_at_harvest_with_exclusive_time() {
    let mut txn = begin(trace_options());
    let root = txn.root().unwrap();
    txn.set_segment_timing(root, 0, 10_000 * MS);

    let a = txn.start_segment(None, None).unwrap();
    txn.set_segment_name(a, "Custom/kept");
    txn.add_segment_metric(a, "Custom/kept", true);
    txn.set_segment_timing(a, 1_000 * MS, 6_000 * MS);

    let b = txn.start_segment(None, None).unwrap();
    txn.set_segment_timing(b, 2_000 * MS, 2_000 * MS);
    txn.end_segment(b);
    txn.end_segment(a);

    assert!(txn.end());

    let payload = axon_txn::build_txn_payload(&txn, 99);
    let kept = payload
        .metrics
        .iter()
        .find(|m| m.name == "Custom/kept")
        .expect("metric missing");
    assert_eq!(6.0, kept.data.total);
    assert_eq!(4.0, kept.data.exclusive);
    assert_eq!(99, payload.pid);
}
