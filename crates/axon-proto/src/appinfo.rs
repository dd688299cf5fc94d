// SPDX-License-Identifier: MIT OR Apache-2.0
//! The appinfo command: agents query the daemon about the status of
//! applications, and the daemon replies with connection state and, on a
//! full connect, the collector's routing and limit configuration.

use crate::{Envelope, MessageBody, ProtoError, finish_message};
use axon_flatbuf::Builder;
use serde_json::Value;

/// App body field indices.
mod field {
    pub const LICENSE: usize = 0;
    pub const APPNAME: usize = 1;
    pub const AGENT_LANGUAGE: usize = 2;
    pub const AGENT_VERSION: usize = 3;
    pub const REDIRECT_COLLECTOR: usize = 4;
    pub const ENVIRONMENT: usize = 5;
    pub const SETTINGS: usize = 6;
    pub const HIGH_SECURITY: usize = 7;
    pub const LABELS: usize = 8;
    pub const DISPLAY_HOST: usize = 9;
    pub const SECURITY_POLICY_TOKEN: usize = 10;
    pub const SUPPORTED_SECURITY_POLICIES: usize = 11;
    pub const HOST: usize = 12;
    pub const TRACE_OBSERVER_HOST: usize = 13;
    pub const TRACE_OBSERVER_PORT: usize = 14;
    pub const SPAN_QUEUE_SIZE: usize = 15;
    pub const SPAN_EVENTS_MAX_SAMPLES_STORED: usize = 16;
    pub const METADATA: usize = 17;
    pub const NUM_FIELDS: usize = 18;
}

/// AppReply body field indices.
mod reply_field {
    pub const STATUS: usize = 0;
    pub const CONNECT_REPLY: usize = 1;
    pub const SECURITY_POLICIES: usize = 2;
    pub const CONNECT_TIMESTAMP: usize = 3;
    pub const HARVEST_FREQUENCY: usize = 4;
    pub const SAMPLING_TARGET: usize = 5;
    pub const NUM_FIELDS: usize = 6;
}

/// The identifying and descriptive information sent in an app query.
///
/// Only the license and names are required for identity; everything else
/// is forwarded opaquely to the collector on connect.
#[derive(Debug, Clone, Default)]
pub struct AppInfo {
    /// Full 40-character license key.
    pub license: String,
    /// Application name rollup list, `;`-separated.
    pub appname: String,
    /// Agent language tag.
    pub lang: String,
    /// Agent version string.
    pub version: String,
    /// Collector host used for the redirect step.
    pub redirect_collector: String,
    /// Application settings, forwarded as JSON.
    pub settings: Option<Value>,
    /// Environment description, forwarded as a JSON list of pairs.
    pub environment: Option<Value>,
    /// Labels, forwarded in the collector's `label_type`/`label_value`
    /// format.
    pub labels: Option<Value>,
    /// Deployment metadata, forwarded as JSON.
    pub metadata: Option<Value>,
    /// User-configured display host name.
    pub host_display_name: Option<String>,
    /// Whether high-security mode is enabled.
    pub high_security: bool,
    /// Security policies token; non-empty only for LASP accounts.
    pub security_policies_token: String,
    /// Supported security policies, forwarded as JSON.
    pub supported_security_policies: Option<Value>,
    /// Trace observer host, when configured.
    pub trace_observer_host: Option<String>,
    /// Trace observer port, when configured.
    pub trace_observer_port: u16,
    /// Span queue size for batched span transport.
    pub span_queue_size: u64,
    /// Per-transaction span event cap requested by configuration.
    pub span_events_max_samples_stored: u64,
}

/// Application connection states reported by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum AppStatus {
    /// The daemon has not yet heard back from the collector.
    Unknown = 0,
    /// The collector told the daemon to disconnect this application.
    Disconnected = 1,
    /// The license was rejected.
    InvalidLicense = 2,
    /// A full connect reply follows.
    Connected = 3,
    /// The previously issued agent run id is still valid.
    StillValid = 4,
}

/// A parsed appinfo reply.
#[derive(Debug, Clone)]
pub struct AppReply {
    /// The application's connection status.
    pub status: AppStatus,
    /// Raw connect-reply JSON; populated only for [`AppStatus::Connected`].
    pub connect_reply: Option<Vec<u8>>,
    /// Raw security-policies JSON, possibly empty.
    pub security_policies: Option<Vec<u8>>,
    /// Collector connect timestamp in seconds; zero when unknown.
    pub connect_timestamp: u64,
    /// Harvest frequency in seconds.
    pub harvest_frequency: u16,
    /// Sampling target for adaptive sampling.
    pub sampling_target: u16,
}

/// Reformat labels into the collector's connect format:
/// `[{"label_type": ..., "label_value": ...}, ...]`.
fn labels_connector_format(labels: &Value) -> Value {
    match labels {
        Value::Object(map) => Value::Array(
            map.iter()
                .map(|(k, v)| {
                    serde_json::json!({
                        "label_type": k,
                        "label_value": v,
                    })
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Reformat the environment hash into the collector's list-of-pairs form.
fn environment_connector_format(environment: &Value) -> Value {
    match environment {
        Value::Object(map) => Value::Array(
            map.iter()
                .map(|(k, v)| Value::Array(vec![Value::String(k.clone()), v.clone()]))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn prepend_json(fb: &mut Builder, value: Option<&Value>) -> u32 {
    match value {
        Some(v) => {
            let json = v.to_string();
            fb.prepend_string(&json)
        }
        None => 0,
    }
}

/// Build a complete appinfo query message for the given application.
pub fn build_app_query(
    agent_run_id: Option<&str>,
    system_host_name: Option<&str>,
    info: &AppInfo,
) -> Builder {
    let mut fb = Builder::new(0);

    let display_host = fb.prepend_opt_string(info.host_display_name.as_deref());
    let labels = prepend_json(&mut fb, info.labels.as_ref().map(labels_connector_format).as_ref());
    let settings = prepend_json(&mut fb, info.settings.as_ref());
    let env = prepend_json(
        &mut fb,
        info.environment
            .as_ref()
            .map(environment_connector_format)
            .as_ref(),
    );
    let collector = fb.prepend_string(&info.redirect_collector);
    let agent_version = fb.prepend_string(&info.version);
    let agent_lang = fb.prepend_string(&info.lang);
    let appname = fb.prepend_string(&info.appname);
    let license = fb.prepend_string(&info.license);
    let security_policy_token = fb.prepend_string(&info.security_policies_token);
    let host_name = fb.prepend_opt_string(system_host_name);
    let trace_observer_host = fb.prepend_opt_string(info.trace_observer_host.as_deref());
    let supported_security_policies =
        prepend_json(&mut fb, info.supported_security_policies.as_ref());
    let metadata = prepend_json(&mut fb, info.metadata.as_ref());

    fb.object_begin(field::NUM_FIELDS);
    fb.object_prepend_u64(field::SPAN_QUEUE_SIZE, info.span_queue_size, 0);
    fb.object_prepend_u64(
        field::SPAN_EVENTS_MAX_SAMPLES_STORED,
        info.span_events_max_samples_stored,
        0,
    );
    fb.object_prepend_u16(field::TRACE_OBSERVER_PORT, info.trace_observer_port, 0);
    fb.object_prepend_uoffset(field::TRACE_OBSERVER_HOST, trace_observer_host, 0);
    fb.object_prepend_uoffset(field::HOST, host_name, 0);
    fb.object_prepend_uoffset(
        field::SUPPORTED_SECURITY_POLICIES,
        supported_security_policies,
        0,
    );
    fb.object_prepend_uoffset(field::METADATA, metadata, 0);
    fb.object_prepend_uoffset(field::SECURITY_POLICY_TOKEN, security_policy_token, 0);
    fb.object_prepend_uoffset(field::DISPLAY_HOST, display_host, 0);
    fb.object_prepend_uoffset(field::LABELS, labels, 0);
    fb.object_prepend_uoffset(field::SETTINGS, settings, 0);
    fb.object_prepend_uoffset(field::ENVIRONMENT, env, 0);
    fb.object_prepend_uoffset(field::REDIRECT_COLLECTOR, collector, 0);
    fb.object_prepend_bool(field::HIGH_SECURITY, info.high_security, false);
    fb.object_prepend_uoffset(field::AGENT_VERSION, agent_version, 0);
    fb.object_prepend_uoffset(field::AGENT_LANGUAGE, agent_lang, 0);
    fb.object_prepend_uoffset(field::APPNAME, appname, 0);
    fb.object_prepend_uoffset(field::LICENSE, license, 0);
    let appinfo = fb.object_end();

    finish_message(&mut fb, agent_run_id, appinfo, MessageBody::App);
    fb
}

/// Read an [`AppInfo`] back out of a query message, mainly for tests and
/// diagnostics.
pub fn decode_app_query(data: &[u8]) -> Result<(Option<String>, AppInfo), ProtoError> {
    let envelope = Envelope::decode(data);
    let body = envelope.expect_body(MessageBody::App, "APPINFO")?;

    let parse_json = |i: usize| -> Option<Value> {
        body.read_str(i)
            .and_then(|s| serde_json::from_str(s).ok())
    };

    let info = AppInfo {
        license: body.read_str(field::LICENSE).unwrap_or_default().to_owned(),
        appname: body.read_str(field::APPNAME).unwrap_or_default().to_owned(),
        lang: body
            .read_str(field::AGENT_LANGUAGE)
            .unwrap_or_default()
            .to_owned(),
        version: body
            .read_str(field::AGENT_VERSION)
            .unwrap_or_default()
            .to_owned(),
        redirect_collector: body
            .read_str(field::REDIRECT_COLLECTOR)
            .unwrap_or_default()
            .to_owned(),
        settings: parse_json(field::SETTINGS),
        environment: parse_json(field::ENVIRONMENT),
        labels: parse_json(field::LABELS),
        metadata: parse_json(field::METADATA),
        host_display_name: body.read_str(field::DISPLAY_HOST).map(str::to_owned),
        high_security: body.read_bool(field::HIGH_SECURITY, false),
        security_policies_token: body
            .read_str(field::SECURITY_POLICY_TOKEN)
            .unwrap_or_default()
            .to_owned(),
        supported_security_policies: parse_json(field::SUPPORTED_SECURITY_POLICIES),
        trace_observer_host: body.read_str(field::TRACE_OBSERVER_HOST).map(str::to_owned),
        trace_observer_port: body.read_u16(field::TRACE_OBSERVER_PORT, 0),
        span_queue_size: body.read_u64(field::SPAN_QUEUE_SIZE, 0),
        span_events_max_samples_stored: body.read_u64(field::SPAN_EVENTS_MAX_SAMPLES_STORED, 0),
    };

    Ok((envelope.agent_run_id.map(str::to_owned), info))
}

/// Parse an appinfo reply message.
pub fn parse_app_reply(data: &[u8]) -> Result<AppReply, ProtoError> {
    let envelope = Envelope::decode(data);
    let reply = envelope.expect_body(MessageBody::AppReply, "APPINFO")?;

    let status = match reply.read_i8(reply_field::STATUS, AppStatus::Unknown as i8) {
        0 => AppStatus::Unknown,
        1 => AppStatus::Disconnected,
        2 => AppStatus::InvalidLicense,
        3 => AppStatus::Connected,
        4 => AppStatus::StillValid,
        other => return Err(ProtoError::UnknownStatus(other)),
    };

    Ok(AppReply {
        status,
        connect_reply: reply.read_bytes(reply_field::CONNECT_REPLY).map(<[u8]>::to_vec),
        security_policies: reply
            .read_bytes(reply_field::SECURITY_POLICIES)
            .map(<[u8]>::to_vec),
        connect_timestamp: reply.read_u64(reply_field::CONNECT_TIMESTAMP, 0),
        harvest_frequency: reply.read_u16(reply_field::HARVEST_FREQUENCY, 60),
        sampling_target: reply.read_u16(reply_field::SAMPLING_TARGET, 10),
    })
}

/// Build an appinfo reply message, used by the daemon side of tests.
pub fn build_app_reply(reply: &AppReply) -> Builder {
    let mut fb = Builder::new(0);

    let connect_reply = reply
        .connect_reply
        .as_deref()
        .map_or(0, |b| fb.prepend_bytes(b));
    let security_policies = reply
        .security_policies
        .as_deref()
        .map_or(0, |b| fb.prepend_bytes(b));

    fb.object_begin(reply_field::NUM_FIELDS);
    fb.object_prepend_u16(reply_field::SAMPLING_TARGET, reply.sampling_target, 10);
    fb.object_prepend_u16(reply_field::HARVEST_FREQUENCY, reply.harvest_frequency, 60);
    fb.object_prepend_u64(reply_field::CONNECT_TIMESTAMP, reply.connect_timestamp, 0);
    fb.object_prepend_uoffset(reply_field::SECURITY_POLICIES, security_policies, 0);
    fb.object_prepend_uoffset(reply_field::CONNECT_REPLY, connect_reply, 0);
    fb.object_prepend_i8(reply_field::STATUS, reply.status as i8, 0);
    let body = fb.object_end();

    finish_message(&mut fb, None, body, MessageBody::AppReply);
    fb
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> AppInfo {
        AppInfo {
            license: "0123456789012345678901234567890123456789".into(),
            appname: "Primary;Rollup".into(),
            lang: "rust".into(),
            version: "1.2.3".into(),
            redirect_collector: "collector.example.com".into(),
            settings: Some(serde_json::json!({"enabled": true})),
            environment: Some(serde_json::json!({"Dispatcher": "threaded"})),
            labels: Some(serde_json::json!({"region": "eu"})),
            metadata: None,
            host_display_name: Some("frontend-1".into()),
            high_security: false,
            security_policies_token: String::new(),
            supported_security_policies: None,
            trace_observer_host: None,
            trace_observer_port: 0,
            span_queue_size: 10_000,
            span_events_max_samples_stored: 1_000,
        }
    }

    #[test]
    fn query_round_trip() {
        let fb = build_app_query(Some("12345"), Some("worker-host"), &sample_info());
        let (run_id, info) = decode_app_query(fb.data()).expect("query should decode");

        assert_eq!(Some("12345".to_owned()), run_id);
        assert_eq!("Primary;Rollup", info.appname);
        assert_eq!("rust", info.lang);
        assert_eq!(10_000, info.span_queue_size);
        assert_eq!(1_000, info.span_events_max_samples_stored);
        assert_eq!(
            Some(serde_json::json!([["Dispatcher", "threaded"]])),
            info.environment
        );
        assert_eq!(
            Some(serde_json::json!([
                {"label_type": "region", "label_value": "eu"}
            ])),
            info.labels
        );
    }

    #[test]
    fn reply_round_trip_connected() {
        let reply = AppReply {
            status: AppStatus::Connected,
            connect_reply: Some(br#"{"agent_run_id":"346595271037263"}"#.to_vec()),
            security_policies: Some(b"{}".to_vec()),
            connect_timestamp: 1_417_180_214,
            harvest_frequency: 60,
            sampling_target: 10,
        };
        let fb = build_app_reply(&reply);
        let parsed = parse_app_reply(fb.data()).expect("reply should parse");

        assert_eq!(AppStatus::Connected, parsed.status);
        assert_eq!(reply.connect_reply, parsed.connect_reply);
        assert_eq!(1_417_180_214, parsed.connect_timestamp);
    }

    #[test]
    fn reply_defaults_apply_when_fields_absent() {
        let reply = AppReply {
            status: AppStatus::StillValid,
            connect_reply: None,
            security_policies: None,
            connect_timestamp: 0,
            harvest_frequency: 60,
            sampling_target: 10,
        };
        let fb = build_app_reply(&reply);
        let parsed = parse_app_reply(fb.data()).expect("reply should parse");

        assert_eq!(AppStatus::StillValid, parsed.status);
        assert_eq!(60, parsed.harvest_frequency);
        assert_eq!(10, parsed.sampling_target);
        assert!(parsed.connect_reply.is_none());
    }

    #[test]
    fn wrong_body_type_is_rejected() {
        let fb = build_app_query(None, None, &sample_info());
        let err = parse_app_reply(fb.data()).unwrap_err();
        assert!(matches!(err, ProtoError::UnexpectedBodyType(1)));
    }
}
