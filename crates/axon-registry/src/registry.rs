// SPDX-License-Identifier: MIT OR Apache-2.0
//! The bounded application table.

use crate::app::{App, AppHandle, AppState};
use crate::query::consider_appinfo;
use axon_core::limits::MAX_APPS;
use axon_core::warngate::WarnGate;
use axon_proto::appinfo::AppInfo;
use daemon_kit::DaemonConnection;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error};

static MAX_APPS_GATE: WarnGate = WarnGate::new();
static HIGH_SECURITY_GATE: WarnGate = WarnGate::new();

/// Sleep between daemon re-queries in the blocking find-or-add loop.
const BLOCKING_RETRY_SLEEP: Duration = Duration::from_millis(50);

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn info_is_valid(info: &AppInfo) -> bool {
    !info.license.is_empty()
        && !info.appname.is_empty()
        && !info.lang.is_empty()
        && !info.version.is_empty()
        && !info.redirect_collector.is_empty()
}

/// An ordered list of up to [`MAX_APPS`] applications, guarded by one
/// lock. The list never shrinks during the life of the process.
#[derive(Debug, Default)]
pub struct Registry {
    apps: Mutex<Vec<AppHandle>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of applications currently tracked.
    pub fn len(&self) -> usize {
        self.apps.lock().len()
    }

    /// True when no applications are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Locate an application by identity tuple, adding it when absent and
    /// capacity remains.
    ///
    /// A found app whose high-security flag disagrees with `info` is
    /// rejected: the account either is or is not in high-security mode,
    /// so one of the two configurations must be wrong. Both the mismatch
    /// and the at-capacity condition warn at most once per backoff
    /// window.
    pub fn find_or_add(&self, info: &AppInfo) -> Option<AppHandle> {
        if !info_is_valid(info) {
            return None;
        }

        let mut apps = self.apps.lock();

        for handle in apps.iter() {
            let app = handle.lock();
            if !app.matches(info) {
                continue;
            }

            if app.info.high_security != info.high_security {
                if HIGH_SECURITY_GATE.should_warn() {
                    error!(
                        target: "axon.registry",
                        app = %info.appname,
                        "unable to add app: an app with the same name but a \
                         different high-security setting already exists; align \
                         the high-security setting across your configuration \
                         and restart your workers and the daemon"
                    );
                }
                return None;
            }

            drop(app);
            return Some(handle.clone());
        }

        if apps.len() >= MAX_APPS {
            if MAX_APPS_GATE.should_warn() {
                error!(
                    target: "axon.registry",
                    limit = MAX_APPS,
                    app = %info.appname,
                    "maximum number of applications reached; unable to add app"
                );
            }
            return None;
        }

        let app = App::new(info.clone());
        debug!(
            target: "axon.registry",
            app = %app.info.appname,
            license = app.plicense.as_deref().unwrap_or("<invalid>"),
            "added app"
        );

        let handle: AppHandle = Arc::new(Mutex::new(app));
        apps.push(handle.clone());
        Some(handle)
    }

    /// Find or add an application and wait until the daemon reports it
    /// connected.
    ///
    /// Installs `settings_fn`'s result as the app's settings when it has
    /// none, then polls the daemon every [`BLOCKING_RETRY_SLEEP`] until
    /// the app leaves the unknown state or `timeout` elapses. Returns the
    /// app only when connected.
    ///
    /// An info carrying both high security and a security policies token
    /// is rejected outright; the two are mutually exclusive.
    pub fn find_or_add_blocking(
        &self,
        conn: &DaemonConnection,
        info: &AppInfo,
        settings_fn: Option<&dyn Fn() -> Value>,
        timeout: Duration,
    ) -> Option<AppHandle> {
        if !info_is_valid(info) {
            return None;
        }

        if info.high_security && !info.security_policies_token.is_empty() {
            error!(
                target: "axon.registry",
                "security policies and high security mode cannot both be \
                 present in the agent configuration; if security policies are \
                 set for your account, keep the token and disable high \
                 security"
            );
            return None;
        }

        let handle = self.find_or_add(info)?;

        {
            let mut app = handle.lock();
            if app.info.settings.is_none()
                && let Some(settings_fn) = settings_fn
            {
                app.info.settings = Some(settings_fn());
            }
        }

        let start = Instant::now();
        loop {
            {
                let mut app = handle.lock();
                consider_appinfo(conn, &mut app, unix_now());

                match app.state {
                    AppState::Ok => return Some(handle.clone()),
                    AppState::Invalid => return None,
                    AppState::Unknown => {}
                }
            }

            if start.elapsed() >= timeout {
                return None;
            }
            std::thread::sleep(BLOCKING_RETRY_SLEEP);
        }
    }

    /// Linear scan for the connected application carrying `agent_run_id`.
    pub fn verify_id(&self, agent_run_id: &str) -> Option<AppHandle> {
        let apps = self.apps.lock();
        for handle in apps.iter() {
            let app = handle.lock();
            if app.state == AppState::Ok && app.agent_run_id.as_deref() == Some(agent_run_id) {
                drop(app);
                return Some(handle.clone());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str) -> AppInfo {
        AppInfo {
            license: "L".repeat(40),
            appname: name.into(),
            lang: "rust".into(),
            version: "1.0".into(),
            redirect_collector: "collector".into(),
            ..AppInfo::default()
        }
    }

    #[test]
    fn add_then_find_yields_the_same_app() {
        let registry = Registry::new();
        let first = registry.find_or_add(&info("app")).unwrap();
        let second = registry.find_or_add(&info("app")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(1, registry.len());
    }

    #[test]
    fn distinct_identities_get_distinct_entries() {
        let registry = Registry::new();
        registry.find_or_add(&info("one")).unwrap();
        registry.find_or_add(&info("two")).unwrap();

        let mut observed = info("one");
        observed.trace_observer_host = Some("observer".into());
        registry.find_or_add(&observed).unwrap();

        assert_eq!(3, registry.len());
    }

    #[test]
    fn invalid_info_is_rejected() {
        let registry = Registry::new();
        let mut bad = info("app");
        bad.license.clear();
        assert!(registry.find_or_add(&bad).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn high_security_mismatch_is_rejected() {
        let registry = Registry::new();
        registry.find_or_add(&info("app")).unwrap();

        let mut hsm = info("app");
        hsm.high_security = true;
        assert!(registry.find_or_add(&hsm).is_none());
        assert_eq!(1, registry.len());
    }

    #[test]
    fn capacity_is_bounded() {
        let registry = Registry::new();
        for i in 0..MAX_APPS {
            assert!(registry.find_or_add(&info(&format!("app-{i}"))).is_some());
        }
        assert!(registry.find_or_add(&info("one-too-many")).is_none());
        assert_eq!(MAX_APPS, registry.len());
    }

    #[test]
    fn verify_id_finds_connected_apps_only() {
        let registry = Registry::new();
        let handle = registry.find_or_add(&info("app")).unwrap();

        assert!(registry.verify_id("123").is_none());

        {
            let mut app = handle.lock();
            app.agent_run_id = Some("123".into());
            drop(app);
            assert!(registry.verify_id("123").is_none(), "unknown app is hidden");
            let mut app = handle.lock();
            app.state = AppState::Ok;
        }

        let found = registry.verify_id("123").unwrap();
        assert!(Arc::ptr_eq(&handle, &found));
        assert!(registry.verify_id("456").is_none());
    }

    #[test]
    fn blocking_rejects_high_security_with_policy_token() {
        let registry = Registry::new();
        let conn = DaemonConnection::new(daemon_kit::DaemonAddress::UnixPath(
            "/nonexistent/axon.sock".into(),
        ));

        let mut conflicted = info("app");
        conflicted.high_security = true;
        conflicted.security_policies_token = "ff...ff".into();

        assert!(
            registry
                .find_or_add_blocking(&conn, &conflicted, None, Duration::from_millis(10))
                .is_none()
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn blocking_times_out_without_a_daemon() {
        let registry = Registry::new();
        let conn = DaemonConnection::new(daemon_kit::DaemonAddress::UnixPath(
            "/nonexistent/axon.sock".into(),
        ));

        let started = Instant::now();
        let result =
            registry.find_or_add_blocking(&conn, &info("app"), None, Duration::from_millis(120));
        assert!(result.is_none());
        assert!(started.elapsed() >= Duration::from_millis(120));

        // The app was still added and can be found later.
        assert_eq!(1, registry.len());
    }

    #[test]
    fn blocking_installs_settings_once() {
        let registry = Registry::new();
        let conn = DaemonConnection::new(daemon_kit::DaemonAddress::UnixPath(
            "/nonexistent/axon.sock".into(),
        ));

        let settings = || serde_json::json!({"tt_enabled": true});
        registry.find_or_add_blocking(&conn, &info("app"), Some(&settings), Duration::ZERO);

        let handle = registry.find_or_add(&info("app")).unwrap();
        assert_eq!(
            Some(serde_json::json!({"tt_enabled": true})),
            handle.lock().info.settings
        );
    }
}
