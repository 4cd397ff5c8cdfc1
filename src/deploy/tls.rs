// ABOUTME: Self-signed TLS material for managed Postgres services.
// ABOUTME: Generated once per service with openssl and reused across deployments.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::DeployError;
use crate::model::Service;
use crate::runtime::{MountKind, VolumeMount};

/// Where the material is mounted inside the container.
pub(crate) const TLS_MOUNT: &str = "/slipway-tls";

const CERT_FILE: &str = "server.crt";
const KEY_FILE: &str = "server.key";

#[derive(Debug, Clone)]
pub(crate) struct TlsMaterial {
    pub(crate) dir: PathBuf,
}

impl TlsMaterial {
    pub(crate) fn mount(&self) -> VolumeMount {
        VolumeMount {
            source: self.dir.display().to_string(),
            target: TLS_MOUNT.to_string(),
            read_only: true,
            kind: MountKind::Bind,
        }
    }
}

/// Make sure `<certs_root>/<service>/server.{crt,key}` exist.
pub(crate) async fn ensure_postgres_tls(
    certs_root: &Path,
    service: &Service,
) -> Result<TlsMaterial, DeployError> {
    let dir = certs_root.join(service.id.as_str());
    let cert = dir.join(CERT_FILE);
    let key = dir.join(KEY_FILE);
    let tls_err = |reason: String| DeployError::Tls {
        service: service.id.clone(),
        reason,
    };

    if present(&cert).await && present(&key).await {
        debug!(service = %service.id, "reusing TLS material");
        return Ok(TlsMaterial { dir });
    }

    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| tls_err(e.to_string()))?;

    let output = Command::new("openssl")
        .args(["req", "-new", "-x509", "-nodes", "-days", "3650"])
        .arg("-subj")
        .arg(format!("/CN={}", service.name))
        .arg("-keyout")
        .arg(&key)
        .arg("-out")
        .arg(&cert)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| tls_err(format!("could not run openssl: {e}")))?;
    if !output.status.success() {
        return Err(tls_err(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    tokio::fs::set_permissions(&key, std::fs::Permissions::from_mode(0o600))
        .await
        .map_err(|e| tls_err(e.to_string()))?;

    debug!(service = %service.id, dir = %dir.display(), "generated TLS material");
    Ok(TlsMaterial { dir })
}

/// Entrypoint that copies the mounted key where postgres accepts its owner
/// and mode, then starts the server with TLS on.
pub(crate) fn postgres_command() -> Vec<String> {
    let script = format!(
        "cp {TLS_MOUNT}/{CERT_FILE} {TLS_MOUNT}/{KEY_FILE} /var/lib/postgresql/ \
         && chown postgres:postgres /var/lib/postgresql/{CERT_FILE} /var/lib/postgresql/{KEY_FILE} \
         && chmod 600 /var/lib/postgresql/{KEY_FILE} \
         && exec docker-entrypoint.sh postgres -c ssl=on \
         -c ssl_cert_file=/var/lib/postgresql/{CERT_FILE} \
         -c ssl_key_file=/var/lib/postgresql/{KEY_FILE}"
    );
    vec!["sh".to_string(), "-c".to_string(), script]
}

async fn present(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_enables_ssl_with_copied_key() {
        let command = postgres_command();
        assert_eq!(command[0], "sh");
        assert!(command[2].contains("ssl=on"));
        assert!(command[2].contains("chmod 600 /var/lib/postgresql/server.key"));
    }

    #[tokio::test]
    async fn existing_material_is_reused() {
        use crate::model::{HealthCheck, Resources, ServiceSource};
        use crate::types::{EnvironmentId, ProjectId, ServiceId, ServiceName};

        let service = Service {
            id: ServiceId::new("shop-production-db"),
            name: ServiceName::new("db").unwrap(),
            project_id: ProjectId::new("shop"),
            environment_id: EnvironmentId::new("shop-production"),
            source: ServiceSource::Image {
                image: "postgres:16".to_string(),
            },
            container_port: 5432,
            health_check: HealthCheck::default(),
            replicas: 1,
            env: Default::default(),
            volumes: vec![],
            resources: Resources::default(),
            command: None,
            drain_delay: None,
            stop_timeout: std::time::Duration::from_secs(10),
            domains: vec![],
            network: "slipway-shop-production".to_string(),
            current_deployment_id: None,
        };
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("shop-production-db");
        assert!(!present(&dir.join(CERT_FILE)).await);

        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(CERT_FILE), "cert").unwrap();
        std::fs::write(dir.join(KEY_FILE), "key").unwrap();

        let material = ensure_postgres_tls(root.path(), &service).await.unwrap();
        assert_eq!(material.dir, dir);
        assert_eq!(std::fs::read_to_string(dir.join(CERT_FILE)).unwrap(), "cert");
    }

    #[test]
    fn mount_is_read_only_bind() {
        let material = TlsMaterial {
            dir: PathBuf::from("/var/lib/slipway/certs/shop-production-db"),
        };
        let mount = material.mount();
        assert_eq!(mount.kind, MountKind::Bind);
        assert!(mount.read_only);
        assert_eq!(mount.target, TLS_MOUNT);
    }
}
