// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-application state: identity, connection state, installed rules and
//! limits, and the daemon-query backoff bookkeeping.

use axon_core::config::EventLimits;
use axon_core::limits::{LICENSE_SIZE, PRINTABLE_LICENSE_WINDOW};
use axon_core::time::{self, Ticks};
use axon_proto::appinfo::AppInfo;
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::sync::Arc;

/// Backoff applied between daemon queries while an app is unknown, scaled
/// by the failure count.
pub const UNKNOWN_QUERY_BACKOFF_SECONDS: i64 = 2;

/// Upper bound on the unknown-state query backoff.
pub const UNKNOWN_QUERY_BACKOFF_LIMIT_SECONDS: i64 = 10;

/// How often a connected app re-queries the daemon to pick up new
/// collector settings after a daemon restart.
pub const REFRESH_QUERY_PERIOD_SECONDS: i64 = 20;

/// An application's connection state as last reported by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppState {
    /// Not yet connected, or awaiting a collector response.
    #[default]
    Unknown,
    /// The collector rejected the application; stop querying.
    Invalid,
    /// Connected and valid.
    Ok,
}

/// An installed, opaque rule list received from the collector.
///
/// The registry stores rules verbatim; evaluation happens elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSet {
    rules: Vec<Value>,
}

impl RuleSet {
    /// Build a rule set from a connect-reply array, `None` when the field
    /// is absent or not an array.
    pub fn from_value(value: Option<&Value>) -> Option<Self> {
        value.and_then(Value::as_array).map(|rules| Self {
            rules: rules.clone(),
        })
    }

    /// Number of installed rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True when no rules are installed.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The raw rule objects.
    pub fn rules(&self) -> &[Value] {
        &self.rules
    }
}

/// Harvest timing installed from a full connect reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarvestTiming {
    /// Collector connect timestamp in microseconds.
    pub connect_timestamp: Ticks,
    /// Harvest cycle length in microseconds.
    pub frequency: Ticks,
    /// Adaptive sampling target per cycle.
    pub sampling_target: u16,
}

impl Default for HarvestTiming {
    fn default() -> Self {
        Self {
            connect_timestamp: 0,
            frequency: 60 * time::US_PER_SECOND,
            sampling_target: 10,
        }
    }
}

impl HarvestTiming {
    /// Compute harvest timing from reply fields, substituting `now` for a
    /// missing connect timestamp and defaults for zero values.
    pub fn from_reply(
        connect_timestamp_secs: u64,
        harvest_frequency_secs: u16,
        sampling_target: u16,
        now: Ticks,
    ) -> Self {
        let connect_timestamp = if connect_timestamp_secs == 0 {
            now
        } else {
            connect_timestamp_secs * time::US_PER_SECOND
        };
        let frequency_secs = if harvest_frequency_secs == 0 {
            60
        } else {
            harvest_frequency_secs
        };
        let sampling_target = if sampling_target == 0 {
            10
        } else {
            sampling_target
        };

        Self {
            connect_timestamp,
            frequency: Ticks::from(frequency_secs) * time::US_PER_SECOND,
            sampling_target,
        }
    }
}

/// A shared, lockable application entry.
pub type AppHandle = Arc<Mutex<App>>;

/// One application tracked by the agent.
#[derive(Debug)]
pub struct App {
    /// Identity and connect-time information.
    pub info: AppInfo,
    /// Connection state.
    pub state: AppState,
    /// Obfuscated license for log lines.
    pub plicense: Option<String>,
    /// Primary application name: the rollup list up to the first `;`.
    pub entity_name: Option<String>,
    /// This host's name, sent with every query.
    pub host_name: Option<String>,
    /// Server-assigned run id; required on messages once connected.
    pub agent_run_id: Option<String>,
    /// Server-assigned entity GUID.
    pub entity_guid: Option<String>,
    /// The raw connect reply, kept for later inspection.
    pub connect_reply: Option<Value>,
    /// Security policies installed from the reply.
    pub security_policies: Option<Value>,
    /// URL rewrite rules.
    pub url_rules: Option<RuleSet>,
    /// Transaction name rewrite rules.
    pub txn_rules: Option<RuleSet>,
    /// Segment whitelist terms.
    pub segment_terms: Option<RuleSet>,
    /// Per-event-type limits.
    pub limits: EventLimits,
    /// Harvest timing.
    pub harvest: HarvestTiming,
    /// Unix seconds of the last daemon query.
    pub last_daemon_query: i64,
    /// Consecutive queries that did not yield a connected state.
    pub failed_daemon_query_count: u64,
    rng: SmallRng,
}

impl App {
    /// Create a fresh, unknown application for `info`.
    pub fn new(info: AppInfo) -> Self {
        let plicense = printable_license(&info.license);
        let entity_name = primary_app_name(&info.appname);
        Self {
            info,
            state: AppState::Unknown,
            plicense,
            entity_name,
            host_name: system_hostname(),
            agent_run_id: None,
            entity_guid: None,
            connect_reply: None,
            security_policies: None,
            url_rules: None,
            txn_rules: None,
            segment_terms: None,
            limits: EventLimits::default(),
            harvest: HarvestTiming::default(),
            last_daemon_query: 0,
            failed_daemon_query_count: 0,
            rng: SmallRng::from_entropy(),
        }
    }

    /// Whether this app matches an identity tuple: license, full rollup
    /// name, and trace observer endpoint must all agree. An unset observer
    /// host matches the empty string.
    pub fn matches(&self, info: &AppInfo) -> bool {
        self.info.license == info.license
            && self.info.appname == info.appname
            && self.info.trace_observer_host.as_deref().unwrap_or("")
                == info.trace_observer_host.as_deref().unwrap_or("")
            && self.info.trace_observer_port == info.trace_observer_port
    }

    /// Whether the daemon should be queried about this app at `now`.
    ///
    /// Queries are minimized: unknown apps back off linearly with the
    /// failure count up to a cap, connected apps refresh every
    /// [`REFRESH_QUERY_PERIOD_SECONDS`], and invalid apps never query. A
    /// last-query time in the future (a wall-clock step) also triggers a
    /// query to bring it back.
    pub fn should_query(&self, now: i64) -> bool {
        let period = match self.state {
            AppState::Invalid => return false,
            AppState::Unknown => ((1 + self.failed_daemon_query_count as i64)
                * UNKNOWN_QUERY_BACKOFF_SECONDS)
                .min(UNKNOWN_QUERY_BACKOFF_LIMIT_SECONDS),
            AppState::Ok => REFRESH_QUERY_PERIOD_SECONDS,
        };

        if now - self.last_daemon_query > period {
            return true;
        }
        self.last_daemon_query > now + REFRESH_QUERY_PERIOD_SECONDS
    }

    /// Draw a seed from this app's entropy source, used to seed
    /// per-transaction generators.
    pub fn rng_seed(&mut self) -> u64 {
        self.rng.r#gen()
    }
}

/// The printable form of a license: the first and last
/// [`PRINTABLE_LICENSE_WINDOW`] characters around an ellipsis. Returns
/// `None` unless the license has the exact expected length.
pub fn printable_license(license: &str) -> Option<String> {
    if license.len() != LICENSE_SIZE || !license.is_ascii() {
        return None;
    }
    Some(format!(
        "{}...{}",
        &license[..PRINTABLE_LICENSE_WINDOW],
        &license[LICENSE_SIZE - PRINTABLE_LICENSE_WINDOW..]
    ))
}

/// The primary application name: the rollup list up to the first `;`.
pub fn primary_app_name(appname: &str) -> Option<String> {
    if appname.is_empty() {
        return None;
    }
    match appname.split_once(';') {
        Some((primary, _)) => Some(primary.to_owned()),
        None => Some(appname.to_owned()),
    }
}

fn system_hostname() -> Option<String> {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|s| s.trim().to_owned())
        .ok()
        .or_else(|| std::env::var("HOSTNAME").ok())
}
