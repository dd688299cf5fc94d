// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration records inspected by the agent core.
//!
//! The embedding host owns configuration parsing; the core only consumes the
//! resulting records. Thresholds and timeouts are integer microseconds to
//! stay aligned with the wire format.

use crate::limits;
use serde::{Deserialize, Serialize};

/// How SQL statements are recorded in transaction traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSql {
    /// Never record SQL.
    #[default]
    None,
    /// Record raw SQL verbatim.
    Raw,
    /// Record SQL with literals obfuscated.
    Obfuscated,
}

/// Per-transaction options, copied from the application at transaction start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TxnOptions {
    /// Whether error recording is enabled at all.
    pub err_enabled: bool,
    /// Whether distributed tracing is enabled.
    pub distributed_tracing_enabled: bool,
    /// Whether span events are created.
    pub span_events_enabled: bool,
    /// Per-transaction span event cap. Zero selects the default limit.
    pub span_events_max_samples_stored: usize,
    /// Span queue size for batched span transport.
    pub span_queue_size: u64,
    /// Number of span events batched before transmission. Zero disables
    /// batching.
    pub span_queue_batch_size: usize,
    /// Span queue batch timeout in microseconds.
    pub span_queue_batch_timeout: u64,
    /// Whether transaction (analytics) events are recorded.
    pub analytics_events_enabled: bool,
    /// Whether custom events are recorded.
    pub custom_events_enabled: bool,
    /// Per-transaction custom event cap.
    pub custom_events_max_samples_stored: usize,
    /// Per-transaction log event cap.
    pub log_events_max_samples_stored: usize,
    /// Whether transaction traces are recorded.
    pub tt_enabled: bool,
    /// Transaction trace threshold in microseconds.
    pub tt_threshold: u64,
    /// Whether `tt_threshold` is derived as four times apdex-T.
    pub tt_is_apdex_f: bool,
    /// SQL recording mode for transaction traces.
    pub tt_recordsql: RecordSql,
    /// Whether the slow SQL feature is enabled.
    pub tt_slowsql: bool,
    /// Whether explain plans are requested.
    pub ep_enabled: bool,
    /// Explain plan threshold in microseconds.
    pub ep_threshold: u64,
    /// Slow SQL stack threshold in microseconds.
    pub ss_threshold: u64,
    /// Apdex-T in microseconds.
    pub apdex_t: u64,
    /// Whether raw exception messages may appear in error records.
    pub allow_raw_exception_messages: bool,
    /// Whether custom parameters (user attributes) are recorded.
    pub custom_parameters_enabled: bool,
    /// Whether auto-RUM is enabled.
    pub autorum_enabled: bool,
    /// Whether error events are recorded.
    pub error_events_enabled: bool,
    /// Whether Synthetics support is enabled.
    pub synthetics_enabled: bool,
    /// Cap on segments retained per transaction. Zero or one means uncapped.
    pub max_segments: usize,
    /// Treat the main context as blocked while async contexts execute, and
    /// discount the blocked time from the transaction total time.
    pub discount_main_context_blocking: bool,
    /// Whether datastore instance host and port are captured.
    pub instance_reporting_enabled: bool,
    /// Whether the database name is included in datastore instance data.
    pub database_name_reporting_enabled: bool,
    /// Master switch for all application logging features.
    pub logging_enabled: bool,
    /// Whether log decorating is enabled.
    pub log_decorating_enabled: bool,
    /// Whether log forwarding is enabled.
    pub log_forwarding_enabled: bool,
    /// Whether context data is forwarded with logs.
    pub log_forwarding_context_data_enabled: bool,
    /// Minimum log level to forward.
    pub log_forwarding_log_level: i32,
    /// Whether labels are forwarded with log events.
    pub log_forwarding_labels_enabled: bool,
    /// Whether log usage metrics are created.
    pub log_metrics_enabled: bool,
}

impl Default for TxnOptions {
    fn default() -> Self {
        Self {
            err_enabled: true,
            distributed_tracing_enabled: true,
            span_events_enabled: true,
            span_events_max_samples_stored: 0,
            span_queue_size: 0,
            span_queue_batch_size: 0,
            span_queue_batch_timeout: 0,
            analytics_events_enabled: true,
            custom_events_enabled: true,
            custom_events_max_samples_stored: limits::MAX_CUSTOM_EVENTS as usize,
            log_events_max_samples_stored: limits::LOG_EVENTS_DEFAULT_MAX_SAMPLES_STORED,
            tt_enabled: true,
            tt_threshold: 0,
            tt_is_apdex_f: true,
            tt_recordsql: RecordSql::Obfuscated,
            tt_slowsql: true,
            ep_enabled: false,
            ep_threshold: 500_000,
            ss_threshold: 500_000,
            apdex_t: 500_000,
            allow_raw_exception_messages: true,
            custom_parameters_enabled: true,
            autorum_enabled: false,
            error_events_enabled: true,
            synthetics_enabled: true,
            max_segments: 0,
            discount_main_context_blocking: false,
            instance_reporting_enabled: true,
            database_name_reporting_enabled: true,
            logging_enabled: false,
            log_decorating_enabled: false,
            log_forwarding_enabled: false,
            log_forwarding_context_data_enabled: false,
            log_forwarding_log_level: 0,
            log_forwarding_labels_enabled: false,
            log_metrics_enabled: false,
        }
    }
}

impl TxnOptions {
    /// The effective span event cap, substituting the default for zero.
    pub fn effective_span_limit(&self) -> usize {
        if self.span_events_max_samples_stored == 0 {
            limits::SPAN_EVENTS_DEFAULT_MAX_SAMPLES_STORED
        } else {
            self.span_events_max_samples_stored
        }
    }
}

/// Per-application event limits, either defaults or installed from the
/// daemon's connect reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLimits {
    /// Transaction (analytics) event limit per harvest.
    pub analytics: i64,
    /// Custom event limit per harvest.
    pub custom: i64,
    /// Error event limit per harvest.
    pub error: i64,
    /// Span event limit per harvest.
    pub span: i64,
    /// Log event limit per harvest.
    pub log: i64,
}

impl Default for EventLimits {
    fn default() -> Self {
        Self {
            analytics: limits::MAX_ANALYTIC_EVENTS,
            custom: limits::MAX_CUSTOM_EVENTS,
            error: limits::MAX_ERRORS,
            span: limits::SPAN_EVENTS_DEFAULT_MAX_SAMPLES_STORED as i64,
            log: limits::LOG_EVENTS_DEFAULT_MAX_SAMPLES_STORED as i64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_limit_substitutes_default_for_zero() {
        let mut opts = TxnOptions::default();
        assert_eq!(opts.effective_span_limit(), 2000);
        opts.span_events_max_samples_stored = 750;
        assert_eq!(opts.effective_span_limit(), 750);
    }

    #[test]
    fn options_round_trip_through_json() {
        let opts = TxnOptions {
            max_segments: 300,
            tt_recordsql: RecordSql::Raw,
            ..TxnOptions::default()
        };
        let json = serde_json::to_string(&opts).unwrap();
        let back: TxnOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_segments, 300);
        assert_eq!(back.tt_recordsql, RecordSql::Raw);
    }
}
