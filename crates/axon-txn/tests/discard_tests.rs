// SPDX-License-Identifier: MIT OR Apache-2.0
//! Metric preservation across discards, in both the uncapped and the
//! capped segment-retention regimes.

use axon_core::config::{EventLimits, TxnOptions};
use axon_txn::attrs::AttributeConfig;
use axon_txn::txn::Transaction;

const MS: u64 = 1_000;

fn begin(options: TxnOptions) -> Transaction {
    Transaction::begin_with(
        options,
        AttributeConfig::default(),
        EventLimits::default(),
        false,
        None,
        11,
    )
}

#[test]
fn discard_merges_metrics_with_exclusive_time() {
    // Root -> b -> {c, d -> e}, durations in ms:
    //   root 12000, b 10000@+1000, c 4000@+2000, d 3000@+7000, e 2000@+8000
    let mut txn = begin(TxnOptions::default());
    let root = txn.root().unwrap();
    txn.set_segment_timing(root, 0, 12_000 * MS);

    let b = txn.start_segment(None, None).unwrap();
    txn.add_segment_metric(b, "b", true);
    txn.set_segment_timing(b, 1_000 * MS, 10_000 * MS);

    let c = txn.start_segment(None, None).unwrap();
    txn.add_segment_metric(c, "c", true);
    txn.set_segment_timing(c, 2_000 * MS, 4_000 * MS);
    txn.end_segment(c);

    let d = txn.start_segment(None, None).unwrap();
    txn.add_segment_metric(d, "d", true);
    txn.set_segment_timing(d, 7_000 * MS, 3_000 * MS);

    let e = txn.start_segment(None, None).unwrap();
    txn.add_segment_metric(e, "e", true);
    txn.set_segment_timing(e, 8_000 * MS, 2_000 * MS);

    txn.end_segment(e);
    txn.end_segment(d);
    txn.end_segment(b);

    assert!(txn.discard_segment(d));
    assert!(txn.discard_segment(b));
    assert!(txn.discard_segment(c));
    assert!(txn.discard_segment(e));

    // All four segments are gone, but their metric contributions are in
    // the transaction's scoped table with proper exclusive times.
    for id in [b, c, d, e] {
        assert!(txn.segment(id).is_none());
    }

    let payload = axon_txn::build_txn_payload(&txn, 1);
    let find = |name: &str| {
        payload
            .metrics
            .iter()
            .find(|m| m.name == name)
            .unwrap_or_else(|| panic!("metric {name} missing"))
            .data
    };

    let b_data = find("b");
    assert_eq!(10.0, b_data.total);
    assert_eq!(3.0, b_data.exclusive);
    assert!(b_data.scoped);

    let c_data = find("c");
    assert_eq!(4.0, c_data.total);
    assert_eq!(4.0, c_data.exclusive);

    let d_data = find("d");
    assert_eq!(3.0, d_data.total);
    assert_eq!(1.0, d_data.exclusive);

    let e_data = find("e");
    assert_eq!(2.0, e_data.total);
    assert_eq!(2.0, e_data.exclusive);
}

#[test]
fn capped_regime_merges_metrics_without_exclusive_time() {
    let mut options = TxnOptions::default();
    options.max_segments = 300;
    let mut txn = begin(options);

    let a = txn.start_segment(None, None).unwrap();
    txn.add_segment_metric(a, "a", false);
    txn.set_segment_timing(a, 1_000 * MS, 5_000 * MS);

    let b = txn.start_segment(None, None).unwrap();
    txn.set_segment_timing(b, 2_000 * MS, 1_000 * MS);
    txn.end_segment(b);
    txn.end_segment(a);

    assert!(txn.discard_segment(a));

    let payload = axon_txn::build_txn_payload(&txn, 1);
    let a_data = payload
        .metrics
        .iter()
        .find(|m| m.name == "a")
        .expect("metric a missing")
        .data;

    assert_eq!(5.0, a_data.total);
    assert_eq!(
        0.0, a_data.exclusive,
        "exclusive time is skipped under a segment cap"
    );
    assert!(!a_data.scoped);
}

#[test]
fn retention_heap_evicts_and_still_merges_metrics() {
    let mut options = TxnOptions::default();
    options.max_segments = 2;
    let mut txn = begin(options);

    // Three ended segments with distinct durations; the shortest loses.
    let mut ids = Vec::new();
    for (i, duration_ms) in [5_000u64, 1_000, 3_000].iter().enumerate() {
        let id = txn.start_segment(None, None).unwrap();
        txn.add_segment_metric(id, &format!("m{i}"), false);
        txn.set_segment_timing(id, 100 * MS, duration_ms * MS);
        txn.end_segment(id);
        ids.push(id);
    }

    assert!(txn.segment(ids[0]).is_some(), "5 s survives");
    assert!(txn.segment(ids[1]).is_none(), "1 s is evicted");
    assert!(txn.segment(ids[2]).is_some(), "3 s survives");

    assert_eq!(3, txn.segment_count, "ends are counted, not retained slots");

    // The evicted segment's metric made it into the tables regardless.
    let payload = axon_txn::build_txn_payload(&txn, 1);
    let m1 = payload
        .metrics
        .iter()
        .find(|m| m.name == "m1")
        .expect("metric of evicted segment missing")
        .data;
    assert_eq!(1.0, m1.total);
    assert_eq!(0.0, m1.exclusive);
}

#[test]
fn nested_starts_stack_under_one_another() {
    // The retention heap never interferes with live tree structure of
    // still-retained segments.
    let mut options = TxnOptions::default();
    options.max_segments = 2;
    let mut txn = begin(options);
    let root = txn.root().unwrap();

    let outer = txn.start_segment(None, None).unwrap();
    txn.set_segment_timing(outer, 0, 9_000 * MS);
    let inner = txn.start_segment(None, None).unwrap();
    txn.set_segment_timing(inner, 1_000 * MS, 8_000 * MS);

    txn.end_segment(inner);
    txn.end_segment(outer);

    assert_eq!(Some(outer), txn.segment(inner).unwrap().parent);
    assert_eq!(Some(root), txn.segment(outer).unwrap().parent);
}
