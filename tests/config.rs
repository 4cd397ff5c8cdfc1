// ABOUTME: Integration tests for configuration parsing and validation.
// ABOUTME: Tests YAML parsing, env var interpolation, catalog building and overrides.

use slipway::config::*;
use slipway::error::Error;
use slipway::integrations::RegistryCredentials;
use slipway::model::{ServiceSource, VolumeKind};
use std::time::Duration;

const FULL: &str = r#"
state_dir: /srv/slipway

runtime:
  runtime: podman
  socket: /run/podman/podman.sock

ports:
  start: 21000
  end: 21999
  check_host_bind: false

probe:
  interval: 500ms
  timeout: 1s
  down_threshold: 5

pull:
  max_attempts: 6
  initial_backoff: 1s
  max_backoff: 20s

stop_grace: 15s

routing:
  file: /etc/caddy/routes.json

registries:
  ghcr.io:
    username: deploy-bot
    password: { env: SLIPWAY_TEST_GHCR, default: dev-token }

installations:
  acme: { env: SLIPWAY_TEST_ACME_TOKEN }

projects:
  shop:
    env:
      LOG_LEVEL: info
      REGION: eu-west
    environments:
      production:
        env:
          LOG_LEVEL: warn
        services:
          web:
            image: ghcr.io/acme/web:2.4.1
            port: 3000
            replicas: 3
            domains: [shop.example.com, www.shop.example.com]
            health_check:
              path: /healthz
              timeout: 45s
            env:
              APP_MODE: web
          worker:
            repository:
              url: https://github.com/acme/worker.git
              branch: release
              dockerfile: docker/Dockerfile.worker
              context: services/worker
              installation: acme
            port: 9000
            stop:
              timeout: 30s
              drain_delay: 5s
      staging:
        services:
          web:
            image: ghcr.io/acme/web:edge
            port: 3000
"#;

mod parsing {
    use super::*;

    #[test]
    fn parse_full_config() {
        let config = Config::from_yaml(FULL).unwrap();

        assert_eq!(config.state_dir, std::path::PathBuf::from("/srv/slipway"));
        assert_eq!(config.ports.start, 21000);
        assert!(!config.ports.check_host_bind);
        assert_eq!(config.probe.interval, Duration::from_millis(500));
        assert_eq!(config.probe.down_threshold, 5);
        assert_eq!(config.pull.max_attempts, 6);
        assert_eq!(config.pull.max_backoff, Duration::from_secs(20));
        assert_eq!(config.stop_grace, Duration::from_secs(15));
        assert_eq!(
            config.routes_path(),
            Some(std::path::PathBuf::from("/etc/caddy/routes.json"))
        );

        let production = &config.projects["shop"].environments["production"];
        assert_eq!(production.services.len(), 2);
        assert_eq!(production.services["web"].replicas, 3);
    }

    #[test]
    fn engine_settings_follow_config() {
        let config = Config::from_yaml(FULL).unwrap();
        let settings = config.engine_settings();

        assert_eq!(settings.port_range, 21000..=21999);
        assert!(!settings.check_host_bind);
        assert_eq!(settings.probe_timeout, Duration::from_secs(1));
        assert_eq!(settings.pull_retry.initial_backoff, Duration::from_secs(1));
        assert_eq!(settings.stop_grace, Duration::from_secs(15));
    }

    #[test]
    fn command_is_an_argument_list() {
        let base = r#"
projects:
  shop:
    environments:
      prod:
        services:
          web:
            image: nginx
            port: 80
"#;
        let as_list = format!("{base}            command: [nginx, -g, \"daemon off;\"]\n");
        let catalog = Config::from_yaml(&as_list).unwrap().catalog().unwrap();
        let command = catalog.services[0].command.clone().unwrap();
        assert_eq!(command, vec!["nginx", "-g", "daemon off;"]);

        let as_string = format!("{base}            command: \"nginx -g 'daemon off;'\"\n");
        assert!(Config::from_yaml(&as_string).is_err());
    }
}

mod validation {
    use super::*;

    fn service_yaml(body: &str) -> String {
        format!(
            "projects:\n  shop:\n    environments:\n      prod:\n        services:\n          web:\n{body}"
        )
    }

    #[test]
    fn missing_source_is_rejected() {
        let yaml = service_yaml("            port: 80\n");
        assert!(matches!(
            Config::from_yaml(&yaml),
            Err(Error::InvalidConfig(msg)) if msg.contains("shop/prod/web")
        ));
    }

    #[test]
    fn zero_replicas_is_rejected() {
        let yaml = service_yaml("            image: nginx\n            port: 80\n            replicas: 0\n");
        assert!(matches!(
            Config::from_yaml(&yaml),
            Err(Error::InvalidConfig(msg)) if msg.contains("replicas")
        ));
    }

    #[test]
    fn inverted_port_range_is_rejected() {
        let yaml = format!("ports: {{ start: 30000, end: 20000 }}\n{}", service_yaml("            image: nginx\n            port: 80\n"));
        assert!(matches!(
            Config::from_yaml(&yaml),
            Err(Error::InvalidConfig(msg)) if msg.contains("port range")
        ));
    }

    #[test]
    fn empty_image_is_rejected() {
        let yaml = service_yaml("            image: \"\"\n            port: 80\n");
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn unknown_yaml_is_a_parse_error() {
        assert!(matches!(
            Config::from_yaml("projects: [not, a, map]"),
            Err(Error::Yaml(_))
        ));
    }
}

mod discovery {
    use super::*;

    #[test]
    fn discovers_primary_and_alternate_names() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::discover(dir.path()),
            Err(Error::ConfigNotFound(_))
        ));

        std::fs::write(dir.path().join(CONFIG_FILENAME_ALT), "projects: {}\n").unwrap();
        assert!(Config::discover(dir.path()).unwrap().projects.is_empty());
    }

    #[test]
    fn init_template_is_discoverable() {
        let dir = tempfile::tempdir().unwrap();
        let path = init_config(dir.path(), false).unwrap();
        assert_eq!(path, dir.path().join(CONFIG_FILENAME));
        let config = Config::discover(dir.path()).unwrap();
        assert!(!config.projects.is_empty());
    }
}

mod catalog {
    use super::*;

    #[test]
    fn catalog_ids_are_derived_from_names() {
        let config = temp_env::with_var("SLIPWAY_TEST_GHCR", None::<&str>, || {
            Config::from_yaml(FULL).unwrap()
        });
        let catalog = config.catalog().unwrap();

        let ids: Vec<&str> = catalog.services.iter().map(|s| s.id.as_str()).collect();
        assert!(ids.contains(&"shop-production-web"));
        assert!(ids.contains(&"shop-production-worker"));
        assert!(ids.contains(&"shop-staging-web"));
        assert_eq!(
            service_id("shop", "production", "web").as_str(),
            "shop-production-web"
        );
        assert_eq!(
            environment_id("shop", "staging").as_str(),
            "shop-staging"
        );

        let web = catalog
            .services
            .iter()
            .find(|s| s.id.as_str() == "shop-production-web")
            .unwrap();
        assert_eq!(web.network, "slipway-shop-production");
        assert_eq!(web.domains.len(), 2);
        assert_eq!(web.health_check.timeout, Duration::from_secs(45));
        assert_eq!(web.env["APP_MODE"], "web");

        let worker = catalog
            .services
            .iter()
            .find(|s| s.id.as_str() == "shop-production-worker")
            .unwrap();
        assert_eq!(worker.drain_delay, Some(Duration::from_secs(5)));
        assert_eq!(worker.stop_timeout, Duration::from_secs(30));
        assert!(matches!(
            &worker.source,
            ServiceSource::Repository { branch, context, installation, .. }
                if branch == "release" && context == "services/worker" && installation.as_deref() == Some("acme")
        ));
    }

    #[test]
    fn registry_password_resolves_from_host_env() {
        let config = Config::from_yaml(FULL).unwrap();

        temp_env::with_var("SLIPWAY_TEST_GHCR", Some("s3cret"), || {
            let registries = config.registry_credentials().unwrap();
            let auth = registries.credentials_for("ghcr.io").unwrap();
            assert_eq!(auth.password, "s3cret");
        });
        temp_env::with_var_unset("SLIPWAY_TEST_GHCR", || {
            let registries = config.registry_credentials().unwrap();
            assert_eq!(
                registries.credentials_for("ghcr.io").unwrap().password,
                "dev-token"
            );
        });
    }

    #[test]
    fn unresolvable_installation_tokens_are_skipped() {
        let config = Config::from_yaml(FULL).unwrap();

        temp_env::with_var_unset("SLIPWAY_TEST_ACME_TOKEN", || {
            assert!(config.installation_tokens().is_empty());
        });
        temp_env::with_var("SLIPWAY_TEST_ACME_TOKEN", Some("ghs_abc"), || {
            assert_eq!(config.installation_tokens()["acme"], "ghs_abc");
        });
    }

    #[test]
    fn missing_env_reference_fails_catalog() {
        let yaml = r#"
projects:
  shop:
    env:
      DATABASE_URL: { env: SLIPWAY_TEST_DATABASE_URL }
    environments:
      prod:
        services:
          web: { image: nginx, port: 80 }
"#;
        let config = Config::from_yaml(yaml).unwrap();
        temp_env::with_var_unset("SLIPWAY_TEST_DATABASE_URL", || {
            assert!(matches!(
                config.catalog(),
                Err(Error::MissingEnvVar(var)) if var == "SLIPWAY_TEST_DATABASE_URL"
            ));
        });
    }

    #[test]
    fn bind_volumes_keep_host_path() {
        let yaml = r#"
projects:
  shop:
    environments:
      prod:
        services:
          db:
            image: postgres:16
            port: 5432
            volumes:
              - { name: data, target: /var/lib/postgresql/data }
              - { name: backups, target: /backups, host_path: /srv/backups, read_only: true }
"#;
        let catalog = Config::from_yaml(yaml).unwrap().catalog().unwrap();
        let db = &catalog.services[0];
        assert_eq!(db.volumes[0].kind, VolumeKind::Named);
        assert!(matches!(
            &db.volumes[1].kind,
            VolumeKind::Bind { host_path } if host_path == std::path::Path::new("/srv/backups")
        ));
        assert!(db.volumes[1].read_only);
    }
}

mod overrides {
    use super::*;

    #[test]
    fn override_rejects_unknown_keys() {
        assert!(RepoOverride::from_yaml("image: nginx\n").is_err());
    }

    #[test]
    fn override_parses_known_keys() {
        let parsed = RepoOverride::from_yaml(
            "port: 8081\nreplicas: 2\nhealth_check: { path: /ready }\nstop: { timeout: 5s }\n",
        )
        .unwrap();
        assert_eq!(parsed.port, Some(8081));
        assert_eq!(parsed.replicas, Some(2));
        assert_eq!(
            parsed.health_check.unwrap().path.as_deref(),
            Some("/ready")
        );
    }

    #[tokio::test]
    async fn loader_reads_override_from_checkout() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RepoOverrides.load(dir.path()).await.unwrap().is_none());

        std::fs::write(dir.path().join(OVERRIDE_FILENAME), "port: 7000\n").unwrap();
        let loaded = RepoOverrides.load(dir.path()).await.unwrap().unwrap();
        assert_eq!(loaded.port, Some(7000));
    }
}
