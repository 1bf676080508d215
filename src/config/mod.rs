// ABOUTME: Configuration types and parsing for cutover.yml.
// ABOUTME: Handles YAML parsing, defaults, env var interpolation, and runtime wiring.

mod deploy;
mod deserialize;
mod env_value;
mod error;
mod healthcheck;
mod init;

pub use deploy::{DeployConfig, StrategyConfig};
pub use deserialize::StepEntry;
pub use env_value::{EnvValue, resolve_env_map};
pub use error::{Error, Result};
pub use healthcheck::HealthcheckConfig;
pub use init::init_config;

use serde::Deserialize;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::deploy::ControllerSettings;
use crate::pipeline::PipelineSettings;
use crate::service::CommandSpec;
use crate::traffic::{Route, Slot, TrafficPool};
use crate::types::{PoolId, ServiceName};
use deserialize::{deserialize_command, deserialize_command_option};

pub const CONFIG_FILENAME: &str = "cutover.yml";
pub const CONFIG_FILENAME_ALT: &str = "cutover.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".cutover/config.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceName,

    #[serde(default = "default_replicas")]
    pub replicas: usize,

    /// Relative paths resolve against the directory the config was loaded from.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub pools: PoolsConfig,

    #[serde(default)]
    pub healthcheck: HealthcheckConfig,

    #[serde(default)]
    pub deploy: DeployConfig,

    #[serde(default)]
    pub approval: ApprovalConfig,

    #[serde(default)]
    pub source: Option<SourceConfig>,

    #[serde(default, deserialize_with = "deserialize_command_option")]
    pub build: Option<CommandSpec>,

    #[serde(default)]
    pub scheduler: Option<SchedulerConfig>,

    #[serde(default)]
    pub env: HashMap<String, EnvValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    #[serde(default = "default_production_port")]
    pub production_port: u16,
    #[serde(default = "default_test_port")]
    pub test_port: u16,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            production_port: default_production_port(),
            test_port: default_test_port(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PoolsConfig {
    #[serde(default = "default_blue")]
    pub blue: PoolConfig,
    #[serde(default = "default_green")]
    pub green: PoolConfig,
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            blue: default_blue(),
            green: default_green(),
        }
    }
}

impl PoolsConfig {
    pub fn get(&self, slot: Slot) -> &PoolConfig {
        match slot {
            Slot::Blue => &self.blue,
            Slot::Green => &self.green,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PoolConfig {
    pub listener_port: u16,
    /// Replaces the top-level `healthcheck` for this pool.
    #[serde(default)]
    pub healthcheck: Option<HealthcheckConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceConfig {
    pub command: String,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    /// Trigger a run whenever the resolved revision changes.
    #[serde(default, with = "humantime_serde")]
    pub poll_interval: Option<Duration>,
}

impl SourceConfig {
    pub fn spec(&self) -> CommandSpec {
        CommandSpec {
            command: self.command.clone(),
            timeout: self.timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SchedulerConfig {
    #[serde(deserialize_with = "deserialize_command")]
    pub launch: CommandSpec,
    #[serde(deserialize_with = "deserialize_command")]
    pub stop: CommandSpec,
}

/// The sections `serve` cannot run without.
#[derive(Debug, Clone, Copy)]
pub struct DaemonCommands<'a> {
    pub source: &'a SourceConfig,
    pub build: &'a CommandSpec,
    pub scheduler: &'a SchedulerConfig,
}

fn default_replicas() -> usize {
    1
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".cutover")
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_production_port() -> u16 {
    80
}

fn default_test_port() -> u16 {
    8080
}

fn default_blue() -> PoolConfig {
    PoolConfig {
        listener_port: 9001,
        healthcheck: None,
    }
}

fn default_green() -> PoolConfig {
    PoolConfig {
        listener_port: 9002,
        healthcheck: None,
    }
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, resolving a relative `state_dir` against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;
        if config.state_dir.is_relative()
            && let Some(dir) = path.parent()
        {
            config.state_dir = dir.join(&config.state_dir);
        }
        Ok(config)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                // `.cutover/config.yml` sits inside the default state dir;
                // anchor relative paths at the project directory instead.
                let mut config = Self::from_yaml(&std::fs::read_to_string(path)?)?;
                if config.state_dir.is_relative() {
                    config.state_dir = dir.join(&config.state_dir);
                }
                return Ok(config);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    fn validate(&self) -> Result<()> {
        if self.replicas == 0 {
            return Err(Error::InvalidConfig(
                "replicas must be at least 1".to_string(),
            ));
        }

        let ports = [
            ("router.production_port", self.router.production_port),
            ("router.test_port", self.router.test_port),
            ("pools.blue.listener_port", self.pools.blue.listener_port),
            ("pools.green.listener_port", self.pools.green.listener_port),
        ];
        for (i, (name, port)) in ports.iter().enumerate() {
            if *port == 0 {
                continue;
            }
            if let Some((other, _)) = ports[..i].iter().find(|(_, p)| p == port) {
                return Err(Error::InvalidConfig(format!(
                    "{name} and {other} both use port {port}"
                )));
            }
        }

        for check in self.healthchecks() {
            if check.interval.is_zero() || check.timeout.is_zero() {
                return Err(Error::InvalidConfig(
                    "healthcheck interval and timeout must be non-zero".to_string(),
                ));
            }
        }

        self.deploy.strategy.plan()?;
        Ok(())
    }

    fn healthchecks(&self) -> impl Iterator<Item = &HealthcheckConfig> {
        std::iter::once(&self.healthcheck).chain(
            Slot::ALL
                .into_iter()
                .filter_map(|slot| self.pools.get(slot).healthcheck.as_ref()),
        )
    }

    pub fn pool_id(&self, slot: Slot) -> PoolId {
        PoolId::new(format!("{}-{}", self.service, slot))
    }

    /// Build the blue and green pools, empty.
    pub fn build_pools(&self) -> (TrafficPool, TrafficPool) {
        let build = |slot: Slot| {
            let pool = self.pools.get(slot);
            let check = pool.healthcheck.as_ref().unwrap_or(&self.healthcheck);
            TrafficPool::new(self.pool_id(slot), pool.listener_port, check.policy())
        };
        (build(Slot::Blue), build(Slot::Green))
    }

    /// Every proxy listener and the port it binds.
    pub fn listeners(&self) -> Vec<(Route, u16)> {
        vec![
            (Route::Production, self.router.production_port),
            (Route::Test, self.router.test_port),
            (Route::Pool(Slot::Blue), self.pools.blue.listener_port),
            (Route::Pool(Slot::Green), self.pools.green.listener_port),
        ]
    }

    pub fn controller_settings(&self) -> Result<ControllerSettings> {
        Ok(self.deploy.controller_settings()?)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            approval_timeout: self.approval.timeout,
        }
    }

    pub fn resolved_env(&self) -> Result<HashMap<String, String>> {
        let mut env = resolve_env_map(&self.env)?;
        env.insert("CUTOVER_SERVICE".to_string(), self.service.to_string());
        Ok(env)
    }

    pub fn daemon_commands(&self) -> Result<DaemonCommands<'_>> {
        Ok(DaemonCommands {
            source: self
                .source
                .as_ref()
                .ok_or(Error::MissingSection("source.command"))?,
            build: self
                .build
                .as_ref()
                .ok_or(Error::MissingSection("build.command"))?,
            scheduler: self
                .scheduler
                .as_ref()
                .ok_or(Error::MissingSection("scheduler"))?,
        })
    }

    pub fn build_log_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    pub fn template(service: ServiceName) -> Self {
        Config {
            service,
            replicas: default_replicas(),
            state_dir: default_state_dir(),
            router: RouterConfig::default(),
            pools: PoolsConfig::default(),
            healthcheck: HealthcheckConfig::default(),
            deploy: DeployConfig::default(),
            approval: ApprovalConfig::default(),
            source: None,
            build: None,
            scheduler: None,
            env: HashMap::new(),
        }
    }
}
