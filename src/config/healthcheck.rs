// ABOUTME: Pool health check configuration.
// ABOUTME: Defaults to probing `/` every 10s with a 5s timeout.

use serde::Deserialize;
use std::time::Duration;

use crate::traffic::HealthCheckPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthcheckConfig {
    #[serde(default = "default_path")]
    pub path: String,

    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Answers slower than this count as failures.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HealthcheckConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            interval: default_interval(),
            timeout: default_timeout(),
        }
    }
}

impl HealthcheckConfig {
    pub fn policy(&self) -> HealthCheckPolicy {
        HealthCheckPolicy {
            path: self.path.clone(),
            interval: self.interval,
            timeout: self.timeout,
        }
    }
}

fn default_path() -> String {
    "/".to_string()
}

fn default_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}
