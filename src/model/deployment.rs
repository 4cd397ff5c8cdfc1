// ABOUTME: Deployment record and its status vocabulary.
// ABOUTME: One attempt to run a service at a specific artifact version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::VolumeSpec;
use crate::types::{ContainerId, DeploymentId, EnvironmentId, ServiceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Cloning,
    Pulling,
    Building,
    Deploying,
    Running,
    Failed,
    Stopped,
    Cancelled,
}

impl DeploymentStatus {
    /// Statuses a newer deploy for the same service cancels.
    pub const IN_PROGRESS: [DeploymentStatus; 5] = [
        DeploymentStatus::Pending,
        DeploymentStatus::Cloning,
        DeploymentStatus::Pulling,
        DeploymentStatus::Building,
        DeploymentStatus::Deploying,
    ];

    /// Whether the pipeline for this deployment is still working.
    pub fn is_in_progress(self) -> bool {
        Self::IN_PROGRESS.contains(&self)
    }

    /// No further transitions are possible from here.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeploymentStatus::Failed | DeploymentStatus::Stopped | DeploymentStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Cloning => "cloning",
            DeploymentStatus::Pulling => "pulling",
            DeploymentStatus::Building => "building",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Stopped => "stopped",
            DeploymentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeploymentStatus::Pending),
            "cloning" => Ok(DeploymentStatus::Cloning),
            "pulling" => Ok(DeploymentStatus::Pulling),
            "building" => Ok(DeploymentStatus::Building),
            "deploying" => Ok(DeploymentStatus::Deploying),
            "running" => Ok(DeploymentStatus::Running),
            "failed" => Ok(DeploymentStatus::Failed),
            "stopped" => Ok(DeploymentStatus::Stopped),
            "cancelled" => Ok(DeploymentStatus::Cancelled),
            other => Err(format!("unknown deployment status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Manual,
    Git,
    Rollback,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Trigger::Manual => "manual",
            Trigger::Git => "git",
            Trigger::Rollback => "rollback",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub service_id: ServiceId,
    pub environment_id: EnvironmentId,

    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    pub image_name: Option<String>,
    pub git_commit_sha: Option<String>,
    pub git_branch: Option<String>,

    pub status: DeploymentStatus,

    pub container_port: u16,
    pub health_check_path: Option<String>,
    #[serde(with = "humantime_serde")]
    pub health_check_timeout: Duration,
    pub env_vars_snapshot: BTreeMap<String, String>,
    pub volumes_snapshot: Vec<VolumeSpec>,
    pub replica_count: u32,

    pub container_id: Option<ContainerId>,
    pub host_port: Option<u16>,
    pub build_log: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    pub rollback_eligible: bool,
    pub rollback_source_id: Option<DeploymentId>,

    pub trigger: Trigger,
    pub triggered_by: Option<String>,
}

/// Fields supplied by the controller when inserting a new row.
#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub service_id: ServiceId,
    pub environment_id: EnvironmentId,
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    pub image_name: Option<String>,
    pub container_port: u16,
    pub health_check_path: Option<String>,
    pub health_check_timeout: Duration,
    pub env_vars_snapshot: BTreeMap<String, String>,
    pub volumes_snapshot: Vec<VolumeSpec>,
    pub replica_count: u32,
    pub rollback_source_id: Option<DeploymentId>,
    pub trigger: Trigger,
    pub triggered_by: Option<String>,
}

impl NewDeployment {
    pub fn into_deployment(self, id: DeploymentId, created_at: DateTime<Utc>) -> Deployment {
        Deployment {
            id,
            service_id: self.service_id,
            environment_id: self.environment_id,
            commit_sha: self.commit_sha,
            commit_message: self.commit_message,
            image_name: self.image_name,
            git_commit_sha: None,
            git_branch: None,
            status: DeploymentStatus::Pending,
            container_port: self.container_port,
            health_check_path: self.health_check_path,
            health_check_timeout: self.health_check_timeout,
            env_vars_snapshot: self.env_vars_snapshot,
            volumes_snapshot: self.volumes_snapshot,
            replica_count: self.replica_count,
            container_id: None,
            host_port: None,
            build_log: String::new(),
            error_message: None,
            created_at,
            finished_at: None,
            rollback_eligible: false,
            rollback_source_id: self.rollback_source_id,
            trigger: self.trigger,
            triggered_by: self.triggered_by,
        }
    }
}

/// Partial update applied to a deployment row.
///
/// `None` leaves a field untouched. Status changes go through
/// `Store::transition` instead so they can be conditional.
#[derive(Debug, Clone, Default)]
pub struct DeploymentUpdate {
    pub image_name: Option<String>,
    pub git_commit_sha: Option<String>,
    pub git_branch: Option<String>,
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    pub container_port: Option<u16>,
    pub health_check_path: Option<String>,
    pub health_check_timeout: Option<Duration>,
    pub env_vars_snapshot: Option<BTreeMap<String, String>>,
    pub replica_count: Option<u32>,
    pub container_id: Option<ContainerId>,
    pub host_port: Option<u16>,
    pub error_message: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
    pub rollback_eligible: Option<bool>,
}

impl DeploymentUpdate {
    pub fn apply(self, deployment: &mut Deployment) {
        macro_rules! set {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = self.$field { deployment.$field = value; })*
            };
        }
        macro_rules! set_opt {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = self.$field { deployment.$field = Some(value); })*
            };
        }
        set!(
            container_port,
            health_check_timeout,
            env_vars_snapshot,
            replica_count,
            rollback_eligible,
        );
        set_opt!(
            image_name,
            git_commit_sha,
            git_branch,
            commit_sha,
            commit_message,
            health_check_path,
            container_id,
            host_port,
            error_message,
            finished_at,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            DeploymentStatus::Pending,
            DeploymentStatus::Running,
            DeploymentStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<DeploymentStatus>(), Ok(status));
        }
        assert!("sleeping".parse::<DeploymentStatus>().is_err());
    }

    #[test]
    fn running_is_neither_in_progress_nor_terminal() {
        assert!(!DeploymentStatus::Running.is_in_progress());
        assert!(!DeploymentStatus::Running.is_terminal());
        assert!(DeploymentStatus::Deploying.is_in_progress());
        assert!(DeploymentStatus::Stopped.is_terminal());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&DeploymentStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }
}
