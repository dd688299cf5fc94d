// SPDX-License-Identifier: MIT OR Apache-2.0
//! Daemon argument-vector construction.
//!
//! Flags are emitted only for provided options; utilization toggles are
//! always emitted with an explicit true/false value so the daemon never
//! falls back to its own defaults for them.

/// Cloud and container detection toggles forwarded to the daemon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UtilizationFlags {
    /// Detect AWS.
    pub aws: bool,
    /// Detect Azure.
    pub azure: bool,
    /// Detect Google Cloud Platform.
    pub gcp: bool,
    /// Detect Pivotal Cloud Foundry.
    pub pcf: bool,
    /// Detect Docker.
    pub docker: bool,
    /// Detect Kubernetes.
    pub kubernetes: bool,
}

/// Options for launching the daemon.
#[derive(Debug, Clone, Default)]
pub struct DaemonArgs {
    /// Daemon pid file path.
    pub pidfile: Option<String>,
    /// Daemon log file path.
    pub logfile: Option<String>,
    /// Daemon log level.
    pub loglevel: Option<String>,
    /// Audit log path.
    pub auditlog: Option<String>,
    /// Daemon listen address: a Unix path, an `@name` abstract socket, or
    /// a numeric port.
    pub daemon_address: Option<String>,
    /// TLS CA bundle file.
    pub tls_cafile: Option<String>,
    /// TLS CA directory.
    pub tls_capath: Option<String>,
    /// Forward proxy address.
    pub proxy: Option<String>,
    /// How long the agent waits for the daemon port to come up.
    pub start_timeout: Option<String>,
    /// Idle timeout before the daemon drops an application.
    pub app_timeout: Option<String>,
    /// Cloud detection toggles.
    pub utilization: UtilizationFlags,
    /// Integration (testing) mode; the flag is never emitted with an
    /// explicit false.
    pub integration_mode: bool,
}

fn push_flag(argv: &mut Vec<String>, flag: &str, value: Option<&str>) {
    if let Some(value) = value {
        argv.push(flag.to_owned());
        argv.push(value.to_owned());
    }
}

fn push_define(argv: &mut Vec<String>, key: &str, value: &str) {
    argv.push("--define".to_owned());
    argv.push(format!("{key}={value}"));
}

fn bool_str(v: bool) -> &'static str {
    if v { "true" } else { "false" }
}

/// Build the daemon argument vector.
///
/// The first element is the daemon binary name, followed by `--agent`, the
/// provided options, and the `--define` tunables. The exec layer appends
/// the terminating null when converting to a C argv.
pub fn daemon_args_to_argv(name: &str, args: Option<&DaemonArgs>) -> Vec<String> {
    let mut argv = vec![name.to_owned(), "--agent".to_owned()];

    let Some(args) = args else {
        return argv;
    };

    push_flag(&mut argv, "--pidfile", args.pidfile.as_deref());
    push_flag(&mut argv, "--logfile", args.logfile.as_deref());
    push_flag(&mut argv, "--loglevel", args.loglevel.as_deref());
    push_flag(&mut argv, "--auditlog", args.auditlog.as_deref());
    push_flag(&mut argv, "--port", args.daemon_address.as_deref());
    push_flag(&mut argv, "--cafile", args.tls_cafile.as_deref());
    push_flag(&mut argv, "--capath", args.tls_capath.as_deref());
    push_flag(&mut argv, "--proxy", args.proxy.as_deref());
    push_flag(&mut argv, "--wait-for-port", args.start_timeout.as_deref());

    if let Some(timeout) = args.app_timeout.as_deref()
        && !timeout.is_empty()
    {
        push_define(&mut argv, "app_timeout", timeout);
    }

    push_define(
        &mut argv,
        "utilization.detect_aws",
        bool_str(args.utilization.aws),
    );
    push_define(
        &mut argv,
        "utilization.detect_azure",
        bool_str(args.utilization.azure),
    );
    push_define(
        &mut argv,
        "utilization.detect_gcp",
        bool_str(args.utilization.gcp),
    );
    push_define(
        &mut argv,
        "utilization.detect_pcf",
        bool_str(args.utilization.pcf),
    );
    push_define(
        &mut argv,
        "utilization.detect_docker",
        bool_str(args.utilization.docker),
    );
    push_define(
        &mut argv,
        "utilization.detect_kubernetes",
        bool_str(args.utilization.kubernetes),
    );

    if args.integration_mode {
        argv.push("--integration".to_owned());
    }

    argv
}
