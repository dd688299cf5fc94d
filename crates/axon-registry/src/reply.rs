// SPDX-License-Identifier: MIT OR Apache-2.0
//! Processing of appinfo replies: state transitions, rule and limit
//! installation, and harvest timing.

use crate::app::{App, AppState, HarvestTiming, RuleSet};
use crate::RegistryError;
use axon_core::config::EventLimits;
use axon_core::limits::{
    MAX_ANALYTIC_EVENTS, MAX_CUSTOM_EVENTS, MAX_ERRORS, SPAN_EVENTS_DEFAULT_MAX_SAMPLES_STORED,
};
use axon_core::time;
use axon_proto::appinfo::{AppReply, AppStatus};
use serde_json::Value;
use tracing::{debug, error, info};

/// Look up an integer harvest limit. A key that is absent, or present with
/// a non-integer value (`null`, a string, a float), yields the default; an
/// integer value is used verbatim, including zero.
fn harvest_limit(limits: Option<&Value>, key: &str, default: i64) -> i64 {
    limits
        .and_then(|l| l.get(key))
        .and_then(Value::as_i64)
        .unwrap_or(default)
}

/// Compute per-event-type limits from a connect reply's
/// `event_harvest_config.harvest_limits` hash.
///
/// `span_default` is the configured per-transaction span cap, or the
/// protocol default when the configuration left it unset. The log limit is
/// not negotiated here and is left untouched by reply processing.
pub fn compute_event_limits(connect_reply: &Value, span_default: i64) -> EventLimits {
    let limits = connect_reply
        .get("event_harvest_config")
        .and_then(|config| config.get("harvest_limits"));

    EventLimits {
        analytics: harvest_limit(limits, "analytic_event_data", MAX_ANALYTIC_EVENTS),
        custom: harvest_limit(limits, "custom_event_data", MAX_CUSTOM_EVENTS),
        error: harvest_limit(limits, "error_event_data", MAX_ERRORS),
        span: harvest_limit(limits, "span_event_data", span_default),
        ..EventLimits::default()
    }
}

/// Apply an appinfo reply to an application.
///
/// Semantic rejections (`Disconnected`, `InvalidLicense`) are successes
/// from the protocol's perspective: the app transitions to
/// [`AppState::Invalid`] and stops attracting queries. Only a `Connected`
/// reply installs rules, limits, and harvest timing; `StillValid`
/// deliberately leaves the previously installed harvest timing alone.
pub fn process_reply(app: &mut App, reply: &AppReply) -> Result<(), RegistryError> {
    let appname = app.info.appname.clone();

    match reply.status {
        AppStatus::Unknown => {
            app.state = AppState::Unknown;
            debug!(target: "axon.registry", app = %appname, "appinfo reply: unknown app");
            return Ok(());
        }
        AppStatus::Disconnected => {
            app.state = AppState::Invalid;
            info!(target: "axon.registry", app = %appname, "appinfo reply: disconnected");
            return Ok(());
        }
        AppStatus::InvalidLicense => {
            app.state = AppState::Invalid;
            error!(
                target: "axon.registry",
                app = %appname,
                "appinfo reply: invalid license; please check your license key \
                 and restart your web server"
            );
            return Ok(());
        }
        AppStatus::StillValid => {
            app.state = AppState::Ok;
            debug!(target: "axon.registry", app = %appname,
                   "appinfo reply: agent run id still valid");
            return Ok(());
        }
        AppStatus::Connected => {
            debug!(target: "axon.registry", app = %appname, "appinfo reply: connected");
        }
    }

    // Connected: a full reply follows.
    let raw = reply.connect_reply.as_deref().unwrap_or_default();
    let connect_reply: Value = serde_json::from_slice(raw).map_err(|e| {
        error!(target: "axon.registry", app = %appname, len = raw.len(),
               "appinfo reply carried a bad connect reply");
        RegistryError::BadConnectReply(e)
    })?;

    app.agent_run_id = connect_reply
        .get("agent_run_id")
        .and_then(Value::as_str)
        .map(str::to_owned);
    app.entity_guid = connect_reply
        .get("entity_guid")
        .and_then(Value::as_str)
        .map(str::to_owned);
    app.url_rules = RuleSet::from_value(connect_reply.get("url_rules"));
    app.txn_rules = RuleSet::from_value(connect_reply.get("transaction_name_rules"));
    app.segment_terms = RuleSet::from_value(connect_reply.get("transaction_segment_terms"));

    app.security_policies = reply
        .security_policies
        .as_deref()
        .and_then(|raw| serde_json::from_slice(raw).ok());

    let span_default = if app.info.span_events_max_samples_stored == 0 {
        SPAN_EVENTS_DEFAULT_MAX_SAMPLES_STORED as i64
    } else {
        app.info.span_events_max_samples_stored as i64
    };
    let log_limit = app.limits.log;
    app.limits = compute_event_limits(&connect_reply, span_default);
    app.limits.log = log_limit;

    app.harvest = HarvestTiming::from_reply(
        reply.connect_timestamp,
        reply.harvest_frequency,
        reply.sampling_target,
        time::wall_clock_now(),
    );

    app.connect_reply = Some(connect_reply);
    app.state = AppState::Ok;

    debug!(target: "axon.registry", app = %appname,
           run_id = app.agent_run_id.as_deref().unwrap_or("<none>"),
           "appinfo reply: full connect installed");

    Ok(())
}
