// ABOUTME: The `env:` map handed to source, build, and scheduler commands.
// ABOUTME: Entries are literal or copied from the daemon's environment; CUTOVER_* keys are reserved.

use serde::Deserialize;
use std::collections::HashMap;

use super::error::{Error, Result};

/// Prefix of the variables the daemon sets on every operator command
/// (`CUTOVER_SERVICE`, `CUTOVER_REVISION`, `CUTOVER_POOL`, ...).
pub const RESERVED_PREFIX: &str = "CUTOVER_";

/// One entry of the `env:` map.
///
/// A plain string is passed through. `{ env: NAME, default: ... }` copies
/// `NAME` from the daemon's own environment once, when the configuration
/// is resolved at startup, so per-command variables such as
/// `CUTOVER_REVISION` never reach it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Literal(String),
    Inherited {
        #[serde(rename = "env")]
        var: String,
        #[serde(default)]
        default: Option<String>,
    },
}

impl EnvValue {
    fn resolve_with(&self, lookup: &dyn Fn(&str) -> Option<String>) -> Result<String> {
        match self {
            EnvValue::Literal(value) => Ok(value.clone()),
            EnvValue::Inherited { var, default } => lookup(var)
                .or_else(|| default.clone())
                .ok_or_else(|| Error::MissingEnvVar(var.clone())),
        }
    }
}

/// Resolve every entry. Keys with the reserved prefix are refused because
/// the daemon would overwrite them on each command.
pub fn resolve_env_map(map: &HashMap<String, EnvValue>) -> Result<HashMap<String, String>> {
    resolve_map_with(map, &|var: &str| std::env::var(var).ok())
}

fn resolve_map_with(
    map: &HashMap<String, EnvValue>,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<HashMap<String, String>> {
    let mut resolved = HashMap::with_capacity(map.len());
    for (key, value) in map {
        if key.starts_with(RESERVED_PREFIX) {
            return Err(Error::ReservedEnvVar(key.clone()));
        }
        resolved.insert(key.clone(), value.resolve_with(lookup)?);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn daemon_env(var: &str) -> Option<String> {
        match var {
            "REGISTRY_TOKEN" => Some("s3cret".to_string()),
            // Set in the daemon's own environment, e.g. by a wrapper script.
            "CUTOVER_REGION" => Some("eu-west-1".to_string()),
            _ => None,
        }
    }

    fn entries(yaml: &str) -> HashMap<String, EnvValue> {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn literal_and_inherited_forms() {
        let map = entries(
            "RAILS_ENV: production\nTOKEN: { env: REGISTRY_TOKEN }\nLEVEL: { env: LOG_LEVEL, default: info }\n",
        );
        let env = resolve_map_with(&map, &daemon_env).unwrap();
        assert_eq!(env["RAILS_ENV"], "production");
        assert_eq!(env["TOKEN"], "s3cret");
        assert_eq!(env["LEVEL"], "info");
    }

    #[test]
    fn reserved_names_can_be_read_but_not_defined() {
        let map = entries("REGION: { env: CUTOVER_REGION }\n");
        assert_eq!(resolve_map_with(&map, &daemon_env).unwrap()["REGION"], "eu-west-1");

        let map = entries("CUTOVER_SERVICE: api\n");
        let err = resolve_map_with(&map, &daemon_env).unwrap_err();
        assert!(matches!(err, Error::ReservedEnvVar(key) if key == "CUTOVER_SERVICE"));
    }

    #[test]
    fn per_command_variables_fall_back_to_the_default() {
        let map = entries("BUILT_FROM: { env: CUTOVER_REVISION, default: unknown }\n");
        assert_eq!(resolve_map_with(&map, &daemon_env).unwrap()["BUILT_FROM"], "unknown");

        let map = entries("BUILT_FROM: { env: CUTOVER_REVISION }\n");
        let err = resolve_map_with(&map, &daemon_env).unwrap_err();
        assert!(matches!(err, Error::MissingEnvVar(var) if var == "CUTOVER_REVISION"));
    }
}
