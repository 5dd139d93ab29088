//! Controller configuration
//!
//! Every option can be given on the command line or through its environment
//! variable, so the same binary works from a shell and from a Deployment.

use std::time::Duration;

use clap::{Args, ValueEnum};

use crate::queue::BackoffConfig;
use crate::{Error, DEFAULT_MAX_ATTEMPTS};

/// Upper bound accepted for `--backoff-max-secs` (one day)
pub const MAX_BACKOFF_SECS: u64 = 86_400;

/// Output format of the log subscriber
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable lines
    Text,
}

/// Settings for the controller run loop
#[derive(Args, Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    /// Namespace to watch (all namespaces when unset)
    #[arg(long, env = "KUBEXPOSE_NAMESPACE")]
    pub namespace: Option<String>,

    /// Number of concurrent reconcile workers
    #[arg(long, env = "KUBEXPOSE_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Processing attempts per key before it is dropped and reported
    #[arg(long, env = "KUBEXPOSE_MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,

    /// Delay before the first retry of a failed key, in milliseconds
    #[arg(long, env = "KUBEXPOSE_BACKOFF_INITIAL_MS", default_value_t = 5)]
    pub backoff_initial_ms: u64,

    /// Upper bound on the retry delay, in seconds
    #[arg(long, env = "KUBEXPOSE_BACKOFF_MAX_SECS", default_value_t = 1000)]
    pub backoff_max_secs: u64,

    /// Server-side watch timeout in seconds (must stay below the client read timeout)
    #[arg(long, env = "KUBEXPOSE_WATCH_TIMEOUT_SECS", default_value_t = 25)]
    pub watch_timeout_secs: u32,

    /// Log output format
    #[arg(long, env = "KUBEXPOSE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// Install or update the Kubexpose CRD before starting
    #[arg(long, env = "KUBEXPOSE_INSTALL_CRD")]
    pub install_crd: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            workers: 1,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_initial_ms: 5,
            backoff_max_secs: 1000,
            watch_timeout_secs: 25,
            log_format: LogFormat::Json,
            install_crd: false,
        }
    }
}

impl ControllerConfig {
    /// Reject settings the controller cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.workers == 0 {
            return Err(Error::internal_with_context("config", "workers must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(Error::internal_with_context(
                "config",
                "max-attempts must be at least 1",
            ));
        }
        if self.backoff_max_secs > MAX_BACKOFF_SECS {
            return Err(Error::internal_with_context(
                "config",
                format!("backoff-max-secs must not exceed {MAX_BACKOFF_SECS}"),
            ));
        }
        if Duration::from_millis(self.backoff_initial_ms) > self.max_backoff() {
            return Err(Error::internal_with_context(
                "config",
                "backoff-initial-ms must not exceed backoff-max-secs",
            ));
        }
        Ok(())
    }

    fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    /// Requeue backoff derived from these settings
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(self.backoff_initial_ms),
            max_delay: self.max_backoff(),
            ..Default::default()
        }
    }
}
