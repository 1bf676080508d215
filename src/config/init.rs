// ABOUTME: Config scaffolding for new projects.
// ABOUTME: Creates cutover.yml template files.

use std::path::{Path, PathBuf};

use super::error::{Error, Result};
use super::{CONFIG_FILENAME, Config};
use crate::types::ServiceName;

/// Write a template `cutover.yml` into `dir`. Returns the path written.
pub fn init_config(dir: &Path, service: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    let service = ServiceName::new(service.unwrap_or("my-app"))
        .map_err(|e| Error::InvalidConfig(e.to_string()))?;
    let config = Config::template(service);

    std::fs::write(&config_path, generate_template_yaml(&config))?;
    Ok(config_path)
}

fn generate_template_yaml(config: &Config) -> String {
    format!(
        r#"service: {service}
replicas: {replicas}

router:
  production_port: {production}
  test_port: {test}

pools:
  blue:
    listener_port: {blue}
  green:
    listener_port: {green}

healthcheck:
  path: {path}
  interval: 10s
  timeout: 5s

deploy:
  bind_timeout: 1h
  deregistration_delay: 30s
  verify_probes: 3
  verify_interval: 10s
  strategy:
    linear: {{ percent: 10, interval: 1m }}

# approval:
#   timeout: 24h

source:
  command: git -C . rev-parse "${{CUTOVER_REQUESTED_REVISION:-HEAD}}"
  # poll_interval: 1m

# Last line of output is the artifact reference.
build: ./build.sh "$CUTOVER_REVISION"

scheduler:
  # Last line of output is the replica's host:port.
  launch: ./launch.sh
  stop: ./stop.sh
"#,
        service = config.service,
        replicas = config.replicas,
        production = config.router.production_port,
        test = config.router.test_port,
        blue = config.pools.blue.listener_port,
        green = config.pools.green.listener_port,
        path = config.healthcheck.path,
    )
}
