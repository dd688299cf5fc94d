// SPDX-License-Identifier: MIT OR Apache-2.0
//! Daemon queries for application state.

use crate::app::{App, AppState};
use crate::reply::process_reply;
use crate::RegistryError;
use axon_proto::appinfo::{build_app_query, parse_app_reply};
use axon_proto::is_frame_corrupt;
use daemon_kit::DaemonConnection;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Default deadline for an appinfo request/reply exchange.
pub const APPINFO_QUERY_TIMEOUT: Duration = Duration::from_millis(100);

/// Send one appinfo query for `app` and apply the reply.
///
/// The app is reset to [`AppState::Unknown`] for the duration of the
/// exchange; on any failure it stays unknown and the daemon connection is
/// invalidated so the next command reconnects.
pub fn query_app_state(
    conn: &DaemonConnection,
    app: &mut App,
    timeout: Duration,
) -> Result<(), RegistryError> {
    app.state = AppState::Unknown;
    debug!(target: "axon.daemon", app = %app.info.appname, "querying app state");

    let query = build_app_query(app.agent_run_id.as_deref(), app.host_name.as_deref(), &app.info);
    let len = query.len();
    debug!(target: "axon.daemon", len, "sending appinfo message");

    if is_frame_corrupt(query.data(), len) {
        return Err(RegistryError::CorruptQuery(len));
    }

    let deadline = Instant::now() + timeout;
    let result = conn
        .exchange(query.data(), deadline)
        .map_err(RegistryError::from)
        .and_then(|raw| parse_app_reply(&raw).map_err(RegistryError::from))
        .and_then(|reply| process_reply(app, &reply));

    if let Err(e) = &result {
        app.state = AppState::Unknown;
        error!(target: "axon.daemon", len, error = %e, "appinfo query failed");
        conn.invalidate();
    }

    result
}

/// Query the daemon about `app` if its backoff schedule allows it at
/// `now`, maintaining the failure counter.
///
/// Returns `true` only when a query was sent and succeeded.
pub fn consider_appinfo(conn: &DaemonConnection, app: &mut App, now: i64) -> bool {
    if !app.should_query(now) {
        return false;
    }

    app.last_daemon_query = now;
    let sent = query_app_state(conn, app, APPINFO_QUERY_TIMEOUT).is_ok();

    if app.state == AppState::Ok {
        app.failed_daemon_query_count = 0;
    } else {
        app.failed_daemon_query_count += 1;
    }

    sent
}
