// ABOUTME: `deploy:` section: bind grace, verification, drain, tick, and shift strategy.
// ABOUTME: The strategy resolves to a validated TrafficShiftPlan.

use nonempty::NonEmpty;
use serde::Deserialize;
use std::time::Duration;

use super::deserialize::{StepEntry, deserialize_steps};
use crate::deploy::{ControllerSettings, PlanError, TrafficShiftPlan};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeployConfig {
    /// How long staged replicas get to report healthy.
    #[serde(default = "default_bind_timeout", with = "humantime_serde")]
    pub bind_timeout: Duration,

    #[serde(default = "default_deregistration_delay", with = "humantime_serde")]
    pub deregistration_delay: Duration,

    #[serde(default = "default_verify_probes")]
    pub verify_probes: u32,

    #[serde(default = "default_verify_interval", with = "humantime_serde")]
    pub verify_interval: Duration,

    #[serde(default = "default_tick", with = "humantime_serde")]
    pub tick: Duration,

    #[serde(default)]
    pub strategy: StrategyConfig,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            bind_timeout: default_bind_timeout(),
            deregistration_delay: default_deregistration_delay(),
            verify_probes: default_verify_probes(),
            verify_interval: default_verify_interval(),
            tick: default_tick(),
            strategy: StrategyConfig::default(),
        }
    }
}

impl DeployConfig {
    pub fn controller_settings(&self) -> Result<ControllerSettings, PlanError> {
        Ok(ControllerSettings {
            plan: self.strategy.plan()?,
            verify_probes: self.verify_probes,
            verify_interval: self.verify_interval,
            deregistration_delay: self.deregistration_delay,
        })
    }
}

/// How traffic moves to the standby pool.
///
/// ```yaml
/// strategy:
///   canary: { percent: 10, interval: 5m }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyConfig {
    Linear {
        percent: u32,
        #[serde(with = "humantime_serde")]
        interval: Duration,
    },
    Canary {
        percent: u32,
        #[serde(with = "humantime_serde")]
        interval: Duration,
    },
    AllAtOnce {
        #[serde(with = "humantime_serde")]
        hold: Duration,
    },
    Steps(#[serde(deserialize_with = "deserialize_steps")] NonEmpty<StepEntry>),
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig::Linear {
            percent: 10,
            interval: Duration::from_secs(60),
        }
    }
}

impl StrategyConfig {
    pub fn plan(&self) -> Result<TrafficShiftPlan, PlanError> {
        match self {
            StrategyConfig::Linear { percent, interval } => {
                TrafficShiftPlan::linear(*percent, *interval)
            }
            StrategyConfig::Canary { percent, interval } => {
                TrafficShiftPlan::canary(*percent, *interval)
            }
            StrategyConfig::AllAtOnce { hold } => Ok(TrafficShiftPlan::all_at_once(*hold)),
            StrategyConfig::Steps(steps) => {
                let pairs: Vec<(u32, Duration)> =
                    steps.iter().map(|s| (s.weight, s.hold)).collect();
                TrafficShiftPlan::from_pairs(&pairs)
            }
        }
    }
}

fn default_bind_timeout() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_deregistration_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_verify_probes() -> u32 {
    3
}

fn default_verify_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_tick() -> Duration {
    Duration::from_secs(1)
}
