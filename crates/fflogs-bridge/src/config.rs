//! Bridge configuration.
//!
//! Defaults match the timings the parser bundle has been driven with; each
//! value can be overridden with a builder method or an environment variable.

use std::path::PathBuf;
use std::time::Duration;

use crate::sequencer::SettleDelays;
use crate::supervisor::DEFAULT_SEND_TIMEOUT;

/// File name of the parser bundle when no path is configured.
pub const DEFAULT_BUNDLE_NAME: &str = "fflogs_parser_bundle.js";

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Program that executes the bundle.
    pub runtime: PathBuf,
    /// Extra arguments placed before the bundle path.
    pub runtime_args: Vec<String>,
    pub bundle_path: PathBuf,
    /// How long to wait for all responses after the last command.
    pub collect_timeout: Duration,
    /// Longest a single command write may block on a worker that is not reading.
    pub send_timeout: Duration,
    pub settle: SettleDelays,
    /// Time the worker gets to exit after SIGTERM before it is killed.
    pub terminate_grace: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            runtime: PathBuf::from("node"),
            runtime_args: Vec::new(),
            bundle_path: default_bundle_path(),
            collect_timeout: Duration::from_secs(10),
            send_timeout: DEFAULT_SEND_TIMEOUT,
            settle: SettleDelays::default(),
            terminate_grace: Duration::from_secs(2),
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, overridden by `FFLOGS_*` environment variables.
    ///
    /// - `FFLOGS_WORKER_RUNTIME`: runtime program
    /// - `FFLOGS_WORKER_BUNDLE`: bundle path
    /// - `FFLOGS_COLLECT_TIMEOUT`: collection timeout in seconds
    /// - `FFLOGS_SEND_TIMEOUT`: per-command write timeout in seconds
    /// - `FFLOGS_SETTLE_INTERVAL`: pause between phases in seconds
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(runtime) = lookup("FFLOGS_WORKER_RUNTIME").filter(|s| !s.is_empty()) {
            config.runtime = PathBuf::from(runtime);
        }
        if let Some(bundle) = lookup("FFLOGS_WORKER_BUNDLE").filter(|s| !s.is_empty()) {
            config.bundle_path = PathBuf::from(bundle);
        }
        if let Some(timeout) = lookup("FFLOGS_COLLECT_TIMEOUT").and_then(|s| parse_seconds(&s)) {
            config.collect_timeout = timeout;
        }
        if let Some(timeout) = lookup("FFLOGS_SEND_TIMEOUT").and_then(|s| parse_seconds(&s)) {
            config.send_timeout = timeout;
        }
        if let Some(interval) = lookup("FFLOGS_SETTLE_INTERVAL").and_then(|s| parse_seconds(&s)) {
            config.settle.phase = interval;
        }
        config
    }

    pub fn with_runtime(mut self, runtime: impl Into<PathBuf>) -> Self {
        self.runtime = runtime.into();
        self
    }

    pub fn with_runtime_args(mut self, args: Vec<String>) -> Self {
        self.runtime_args = args;
        self
    }

    pub fn with_bundle_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.bundle_path = path.into();
        self
    }

    pub fn with_collect_timeout(mut self, timeout: Duration) -> Self {
        self.collect_timeout = timeout;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_settle(mut self, settle: SettleDelays) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }
}

/// Parse a non-negative, finite number of seconds.
pub fn parse_seconds(s: &str) -> Option<Duration> {
    let secs = s.trim().parse::<f64>().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

/// The bundle next to the running executable, or in the working directory.
fn default_bundle_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_BUNDLE_NAME)))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BUNDLE_NAME))
}
