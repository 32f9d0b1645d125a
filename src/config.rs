//! Harness configuration
//!
//! Loaded from environment variables (a `.env` file is honored by the binaries),
//! then overridden by command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::client::DEFAULT_TIMEOUT;
use crate::supervisor::{SupervisorConfig, WorkerCommand, DEFAULT_RECYCLE_AFTER};

/// Name of the worker executable, looked up next to the driver by default
pub const WORKER_BIN: &str = "harness-worker";

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Worker executable
    pub worker_path: PathBuf,
    /// Per-test deadline (default: 120s)
    pub timeout: Duration,
    /// Grants per worker before a preventive recycle (default: 10)
    pub recycle_after: u32,
    /// Independent worker slots (default: 1)
    pub slots: usize,
    /// Interpreter heap cap passed to the worker, in MB
    pub memory_limit_mb: Option<u64>,
    /// Grace period for `::exit::` before killing a worker
    pub shutdown_grace: Option<Duration>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            worker_path: default_worker_path(),
            timeout: DEFAULT_TIMEOUT,
            recycle_after: DEFAULT_RECYCLE_AFTER,
            slots: 1,
            memory_limit_mb: None,
            shutdown_grace: None,
        }
    }
}

impl HarnessConfig {
    /// Load configuration from `HARNESS_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = lookup("HARNESS_WORKER") {
            config.worker_path = PathBuf::from(path);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "HARNESS_TIMEOUT_SECS")? {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(count) = parse_var::<u32>(&lookup, "HARNESS_RECYCLE_AFTER")? {
            config.recycle_after = count;
        }
        if let Some(slots) = parse_var::<usize>(&lookup, "HARNESS_SLOTS")? {
            config.slots = slots;
        }
        config.memory_limit_mb = parse_var::<u64>(&lookup, "HARNESS_MEMORY_LIMIT_MB")?;
        config.shutdown_grace =
            parse_var::<u64>(&lookup, "HARNESS_SHUTDOWN_GRACE_MS")?.map(Duration::from_millis);

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.recycle_after == 0 {
            anyhow::bail!("recycle ceiling must be at least 1");
        }
        if self.slots == 0 {
            anyhow::bail!("at least one worker slot is required");
        }
        if self.timeout.is_zero() {
            anyhow::bail!("timeout must be positive");
        }
        Ok(())
    }

    /// Command line for starting one worker.
    pub fn worker_command(&self) -> WorkerCommand {
        let mut args = Vec::new();
        if let Some(mb) = self.memory_limit_mb {
            args.push("--memory-limit-mb".to_string());
            args.push(mb.to_string());
        }
        WorkerCommand::new(&self.worker_path).with_args(args)
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            recycle_after: self.recycle_after,
            shutdown_grace: self.shutdown_grace,
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("Invalid value for {}: {}", key, raw)),
        _ => Ok(None),
    }
}

/// `harness-worker` next to the running executable, or on `PATH`.
fn default_worker_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .map(|dir| dir.join(WORKER_BIN))
        .filter(|path| path.exists())
        .unwrap_or_else(|| PathBuf::from(WORKER_BIN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<HarnessConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        HarnessConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(120));
        assert_eq!(config.recycle_after, 10);
        assert_eq!(config.slots, 1);
        assert!(config.worker_command().args.is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let config = load(&[
            ("HARNESS_WORKER", "/opt/harness-worker"),
            ("HARNESS_TIMEOUT_SECS", "2"),
            ("HARNESS_RECYCLE_AFTER", "5"),
            ("HARNESS_SLOTS", "4"),
            ("HARNESS_MEMORY_LIMIT_MB", "64"),
            ("HARNESS_SHUTDOWN_GRACE_MS", "250"),
        ])
        .unwrap();
        assert_eq!(config.worker_path, PathBuf::from("/opt/harness-worker"));
        assert_eq!(config.timeout, Duration::from_secs(2));
        assert_eq!(config.supervisor_config().recycle_after, 5);
        assert_eq!(config.slots, 4);
        assert_eq!(config.shutdown_grace, Some(Duration::from_millis(250)));
        assert_eq!(config.worker_command().args, vec!["--memory-limit-mb", "64"]);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(load(&[("HARNESS_TIMEOUT_SECS", "soon")]).is_err());
        assert!(load(&[("HARNESS_RECYCLE_AFTER", "0")]).is_err());
        assert!(load(&[("HARNESS_SLOTS", "0")]).is_err());
    }
}
