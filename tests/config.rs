// ABOUTME: Integration tests for configuration discovery, loading, and interpolation.
// ABOUTME: Environment-dependent cases run under temp-env so they do not leak.

use cutover::config::*;
use cutover::traffic::{Route, Slot};
use std::collections::HashMap;
use std::time::Duration;

const MINIMAL: &str = "service: web\n";

mod discovery {
    use super::*;

    #[test]
    fn finds_primary_file_and_anchors_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILENAME), MINIMAL).unwrap();

        let config = Config::discover(dir.path()).unwrap();
        assert_eq!(config.service.as_str(), "web");
        assert_eq!(config.state_dir, dir.path().join(".cutover"));
    }

    #[test]
    fn falls_back_to_yaml_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILENAME_ALT), "service: api\n").unwrap();

        let config = Config::discover(dir.path()).unwrap();
        assert_eq!(config.service.as_str(), "api");
    }

    #[test]
    fn config_inside_state_dir_resolves_against_project() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".cutover")).unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILENAME_DIR),
            "service: web\nstate_dir: var/state\n",
        )
        .unwrap();

        let config = Config::discover(dir.path()).unwrap();
        assert_eq!(config.state_dir, dir.path().join("var/state"));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::discover(dir.path()),
            Err(Error::ConfigNotFound(_))
        ));
    }

    #[test]
    fn explicit_path_resolves_relative_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("deploy");
        std::fs::create_dir(&nested).unwrap();
        let path = nested.join("production.yml");
        std::fs::write(&path, "service: web\nstate_dir: state\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.state_dir, nested.join("state"));

        std::fs::write(&path, "service: web\nstate_dir: /var/lib/cutover\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.state_dir, std::path::PathBuf::from("/var/lib/cutover"));
    }
}

mod interpolation {
    use super::*;

    fn env_of(yaml: &str) -> Result<HashMap<String, String>> {
        Config::from_yaml(yaml)?.resolved_env()
    }

    const WITH_ENV: &str = r#"
service: web
env:
  RAILS_ENV: production
  REGISTRY_TOKEN:
    env: CUTOVER_TEST_REGISTRY_TOKEN
  REGION:
    env: CUTOVER_TEST_REGION
    default: eu-west-1
"#;

    #[test]
    fn reads_variables_at_resolution_time() {
        temp_env::with_vars(
            [
                ("CUTOVER_TEST_REGISTRY_TOKEN", Some("s3cret")),
                ("CUTOVER_TEST_REGION", None),
            ],
            || {
                let env = env_of(WITH_ENV).unwrap();
                assert_eq!(env["RAILS_ENV"], "production");
                assert_eq!(env["REGISTRY_TOKEN"], "s3cret");
                assert_eq!(env["REGION"], "eu-west-1");
                assert_eq!(env["CUTOVER_SERVICE"], "web");
            },
        );
    }

    #[test]
    fn set_variable_beats_default() {
        temp_env::with_vars(
            [
                ("CUTOVER_TEST_REGISTRY_TOKEN", Some("t")),
                ("CUTOVER_TEST_REGION", Some("us-east-2")),
            ],
            || {
                assert_eq!(env_of(WITH_ENV).unwrap()["REGION"], "us-east-2");
            },
        );
    }

    #[test]
    fn daemon_variables_cannot_be_overridden() {
        let yaml = "service: web\nenv:\n  CUTOVER_SERVICE: api\n";
        let err = env_of(yaml).unwrap_err();
        assert!(matches!(&err, Error::ReservedEnvVar(key) if key == "CUTOVER_SERVICE"));
    }

    #[test]
    fn missing_variable_without_default_fails() {
        temp_env::with_var_unset("CUTOVER_TEST_REGISTRY_TOKEN", || {
            let err = env_of(WITH_ENV).unwrap_err();
            assert!(
                matches!(&err, Error::MissingEnvVar(var) if var == "CUTOVER_TEST_REGISTRY_TOKEN")
            );
        });
    }
}

mod settings {
    use super::*;

    #[test]
    fn full_config_maps_onto_runtime_settings() {
        let yaml = r#"
service: web
replicas: 3
router:
  bind: 127.0.0.1
  production_port: 8000
  test_port: 8001
pools:
  blue:
    listener_port: 8101
  green:
    listener_port: 8102
    healthcheck:
      path: /ready
      interval: 2s
      timeout: 1s
healthcheck:
  path: /healthz
deploy:
  verify_probes: 5
  verify_interval: 3s
  deregistration_delay: 10s
  strategy:
    canary: { percent: 5, interval: 10m }
approval:
  timeout: 2h
source:
  command: git rev-parse HEAD
  poll_interval: 30s
build: ./build.sh
scheduler:
  launch: ./launch.sh
  stop:
    command: ./stop.sh
    timeout: 20s
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.replicas, 3);
        assert_eq!(
            config.listeners(),
            vec![
                (Route::Production, 8000),
                (Route::Test, 8001),
                (Route::Pool(Slot::Blue), 8101),
                (Route::Pool(Slot::Green), 8102),
            ]
        );

        let controller = config.controller_settings().unwrap();
        assert_eq!(controller.verify_probes, 5);
        assert_eq!(controller.verify_interval, Duration::from_secs(3));
        assert_eq!(controller.deregistration_delay, Duration::from_secs(10));
        assert_eq!(controller.plan.len(), 2);
        assert_eq!(
            config.pipeline_settings().approval_timeout,
            Some(Duration::from_secs(7200))
        );

        let (blue, green) = config.build_pools();
        assert_eq!(blue.id().as_str(), "web-blue");
        assert_eq!(green.id().as_str(), "web-green");

        let commands = config.daemon_commands().unwrap();
        assert_eq!(
            commands.source.poll_interval,
            Some(Duration::from_secs(30))
        );
        assert_eq!(commands.build.command, "./build.sh");
        assert_eq!(commands.scheduler.stop.timeout, Some(Duration::from_secs(20)));
        assert_eq!(config.build_log_dir(), config.state_dir.join("logs"));
    }

    #[test]
    fn zero_replicas_are_rejected() {
        let err = Config::from_yaml("service: web\nreplicas: 0\n").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn zero_healthcheck_timeout_is_rejected() {
        let yaml = "service: web\nhealthcheck:\n  timeout: 0s\n";
        assert!(matches!(
            Config::from_yaml(yaml),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn unknown_strategy_is_a_parse_error() {
        let yaml = "service: web\ndeploy:\n  strategy:\n    big_bang: {}\n";
        assert!(matches!(Config::from_yaml(yaml), Err(Error::Yaml(_))));
    }
}

mod scaffolding {
    use super::*;

    #[test]
    fn init_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = init_config(dir.path(), Some("checkout"), false).unwrap();
        assert_eq!(path, dir.path().join(CONFIG_FILENAME));

        let config = Config::discover(dir.path()).unwrap();
        assert_eq!(config.service.as_str(), "checkout");
    }

    #[test]
    fn init_refuses_to_overwrite_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        init_config(dir.path(), None, false).unwrap();
        assert!(matches!(
            init_config(dir.path(), None, false),
            Err(Error::AlreadyExists(_))
        ));
        init_config(dir.path(), Some("api"), true).unwrap();
        assert_eq!(
            Config::discover(dir.path()).unwrap().service.as_str(),
            "api"
        );
    }

    #[test]
    fn invalid_service_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(init_config(dir.path(), Some("Not A Name"), false).is_err());
    }
}
