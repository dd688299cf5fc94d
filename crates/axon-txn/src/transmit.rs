// SPDX-License-Identifier: MIT OR Apache-2.0
//! Transmission of finished transactions and span batches to the daemon.

use crate::attrs::{DESTINATION_ERROR, DESTINATION_TXN_EVENT};
use crate::txn::Transaction;
use axon_core::time;
use axon_proto::txndata::{ErrorWire, TraceWire, TxnPayload};
use axon_proto::{is_frame_corrupt, span_batch};
use daemon_kit::DaemonConnection;
use serde_json::{Map, Value, json};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error};

/// Send deadline for transaction data. The request has already finished,
/// so this delays only the worker's availability, not its response.
pub const TXNDATA_SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// Send deadline for span batches.
pub const SPAN_BATCH_SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// Errors from transmitting finished transactions.
#[derive(Debug, Error)]
pub enum TransmitError {
    /// Transport failure talking to the daemon.
    #[error(transparent)]
    Daemon(#[from] daemon_kit::DaemonError),

    /// The encoded message failed its own framing self-check.
    #[error("refusing to send corrupt message, len={0}")]
    CorruptMessage(usize),

    /// The transaction is not in a sendable state.
    #[error("transaction has not ended")]
    NotEnded,
}

fn txn_event_json(txn: &Transaction) -> Option<String> {
    if !txn.options.analytics_events_enabled {
        return None;
    }

    let duration_secs = time::to_secs_f64(txn.duration());
    let mut intrinsics = Map::new();
    intrinsics.insert("type".into(), json!("Transaction"));
    intrinsics.insert("name".into(), json!(txn.name));
    intrinsics.insert("timestamp".into(), json!(time::to_ms(txn.abs_start_time)));
    intrinsics.insert("duration".into(), json!(duration_secs));
    intrinsics.insert(
        "totalTime".into(),
        json!(time::to_secs_f64(txn.final_data.total_time)),
    );
    intrinsics.insert("error".into(), json!(txn.error.is_some()));
    if txn.options.distributed_tracing_enabled {
        intrinsics.insert("guid".into(), json!(txn.distributed_trace.guid));
        intrinsics.insert("traceId".into(), json!(txn.distributed_trace.trace_id));
        intrinsics.insert("priority".into(), json!(txn.distributed_trace.priority));
        intrinsics.insert("sampled".into(), json!(txn.distributed_trace.sampled));
    }

    let user = txn.attributes.user_to_map(DESTINATION_TXN_EVENT);
    let agent = txn.attributes.agent_to_map(DESTINATION_TXN_EVENT);

    serde_json::to_string(&[
        Value::Object(intrinsics),
        Value::Object(user),
        Value::Object(agent),
    ])
    .ok()
}

fn error_json(txn: &Transaction) -> Option<String> {
    let err = txn.error.as_ref()?;

    let attributes = json!({
        "userAttributes": txn.attributes.user_to_map(DESTINATION_ERROR),
        "agentAttributes": txn.attributes.agent_to_map(DESTINATION_ERROR),
        "intrinsics": {},
        "request_uri": txn.request_uri.as_deref().unwrap_or(""),
    });

    serde_json::to_string(&json!([
        time::to_ms(txn.abs_start_time),
        txn.name,
        err.message,
        err.class,
        attributes,
    ]))
    .ok()
}

fn error_event_json(txn: &Transaction) -> Option<String> {
    if !txn.options.error_events_enabled {
        return None;
    }
    let err = txn.error.as_ref()?;

    let mut intrinsics = Map::new();
    intrinsics.insert("type".into(), json!("TransactionError"));
    intrinsics.insert("error.class".into(), json!(err.class));
    intrinsics.insert("error.message".into(), json!(err.message));
    intrinsics.insert("transactionName".into(), json!(txn.name));
    intrinsics.insert("timestamp".into(), json!(time::to_ms(txn.abs_start_time)));
    intrinsics.insert("duration".into(), json!(time::to_secs_f64(txn.duration())));
    if txn.options.distributed_tracing_enabled {
        intrinsics.insert("guid".into(), json!(txn.distributed_trace.guid));
        intrinsics.insert("traceId".into(), json!(txn.distributed_trace.trace_id));
        intrinsics.insert("priority".into(), json!(txn.distributed_trace.priority));
        intrinsics.insert("sampled".into(), json!(txn.distributed_trace.sampled));
    }

    serde_json::to_string(&[
        Value::Object(intrinsics),
        Value::Object(txn.attributes.user_to_map(DESTINATION_ERROR)),
        Value::Object(txn.attributes.agent_to_map(DESTINATION_ERROR)),
    ])
    .ok()
}

/// Whether the trace must be kept by the daemon regardless of its
/// sampling decisions.
fn should_force_persist(txn: &Transaction) -> bool {
    txn.synthetics_resource_id.is_some()
}

/// Assemble the wire payload for a finished transaction.
pub fn build_txn_payload(txn: &Transaction, pid: i32) -> TxnPayload {
    let mut metrics = txn.unscoped_metrics.to_wire(false);
    metrics.extend(txn.scoped_metrics.to_wire(true));

    let trace = txn.final_data.trace_json.as_ref().map(|json| TraceWire {
        start_ms: time::to_ms_f64(txn.abs_start_time),
        duration_ms: time::to_ms_f64(txn.duration()),
        guid: txn.distributed_trace.guid.clone(),
        force_persist: should_force_persist(txn),
        json: json.clone(),
    });

    TxnPayload {
        agent_run_id: txn.agent_run_id.clone(),
        name: txn.name.clone(),
        request_uri: txn.request_uri.clone(),
        synthetics_resource_id: txn.synthetics_resource_id.clone(),
        pid,
        txn_event_json: txn_event_json(txn),
        metrics,
        error: txn.error.as_ref().and_then(|err| {
            error_json(txn).map(|json| ErrorWire {
                priority: err.priority,
                json,
            })
        }),
        slow_sqls: txn.slow_sqls.to_wire(),
        custom_events_json: txn.custom_events.events().to_vec(),
        error_event_json: error_event_json(txn),
        trace,
        span_events_json: txn
            .final_data
            .span_events
            .iter()
            .map(crate::span::SpanEvent::to_json)
            .collect(),
        log_events_json: txn.log_events.events().to_vec(),
        packages_json: txn.packages_json.clone(),
        sampling_priority: txn.distributed_trace.priority,
        span_limit: txn.limits.span.max(0) as usize,
        log_limit: txn.limits.log.max(0) as usize,
    }
}

/// Send a finished transaction to the daemon.
pub fn send_txn_data(
    conn: &DaemonConnection,
    txn: &Transaction,
    pid: i32,
) -> Result<(), TransmitError> {
    if !txn.status.complete {
        return Err(TransmitError::NotEnded);
    }

    debug!(
        target: "axon.txn",
        name = %txn.name,
        run_id = txn.agent_run_id.as_deref().unwrap_or("<none>"),
        segment_count = txn.segment_count,
        duration = txn.duration(),
        priority = txn.distributed_trace.priority,
        "sending transaction"
    );

    let payload = build_txn_payload(txn, pid);
    let message = axon_proto::txndata::encode(&payload);
    let len = message.len();
    debug!(target: "axon.daemon", len, "sending transaction message");

    if is_frame_corrupt(message.data(), len) {
        return Err(TransmitError::CorruptMessage(len));
    }

    let deadline = Instant::now() + TXNDATA_SEND_TIMEOUT;
    if let Err(e) = conn.send(message.data(), deadline) {
        error!(target: "axon.daemon", len, error = %e, "transaction send failed");
        conn.invalidate();
        return Err(e.into());
    }

    Ok(())
}

/// Send an externally encoded span batch to the daemon.
///
/// Empty batches are quietly accepted and dropped.
pub fn send_span_batch(
    conn: &DaemonConnection,
    agent_run_id: &str,
    encoded: &[u8],
    span_count: u64,
) -> Result<(), TransmitError> {
    if encoded.is_empty() || span_count == 0 {
        return Ok(());
    }

    let message = span_batch::encode(agent_run_id, encoded, span_count);
    let len = message.len();
    debug!(target: "axon.daemon", len, "sending span batch message");

    if is_frame_corrupt(message.data(), len) {
        return Err(TransmitError::CorruptMessage(len));
    }

    let deadline = Instant::now() + SPAN_BATCH_SEND_TIMEOUT;
    if let Err(e) = conn.send(message.data(), deadline) {
        error!(target: "axon.daemon", len, error = %e, "span batch send failed");
        conn.invalidate();
        return Err(e.into());
    }

    Ok(())
}
