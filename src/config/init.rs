// ABOUTME: Config scaffolding for new hosts.
// ABOUTME: Writes a commented slipway.yml template.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

use super::CONFIG_FILENAME;

const TEMPLATE: &str = r#"# Where deployment state, build checkouts and TLS material live.
state_dir: /var/lib/slipway

# Container runtime (auto-detected when omitted).
# runtime:
#   runtime: podman
#   socket: /run/podman/podman.sock

# Host ports handed to replicas.
ports:
  start: 20000
  end: 29999

# Route table for the reverse proxy, relative to state_dir.
# routing:
#   file: routes.json

# registries:
#   ghcr.io:
#     username: deploy-bot
#     password: { env: GHCR_TOKEN }

projects:
  my-project:
    environments:
      production:
        services:
          web:
            image: nginx:1.27
            port: 80
            replicas: 1
            health_check:
              path: /
              timeout: 60s
            # domains: [www.example.com]
"#;

/// Write the template into `dir`, refusing to replace an existing file
/// unless `force` is set.
pub fn init_config(dir: &Path, force: bool) -> Result<PathBuf> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    std::fs::write(&config_path, TEMPLATE)?;
    Ok(config_path)
}
