// ABOUTME: Deployment orchestration using the type state pattern.
// ABOUTME: Controller entry points, the pipeline, replica management and cutover.

mod cancel;
mod context;
mod controller;
mod cutover;
mod eligibility;
mod error;
mod lock;
mod orphans;
mod pipeline;
mod provision;
mod replicas;
mod state;
mod supervisor;
mod tls;
mod transitions;

pub use cancel::CancelToken;
pub use context::ControllerSettings;
pub use controller::{Controller, DeployOptions};
pub use eligibility::{ROLLBACK_WINDOW, compute_rollback_eligibility, refresh_rollback_eligibility};
pub use error::{DeployError, DeployErrorKind};
pub use lock::ServiceLocks;
pub use orphans::detect_orphans;
pub use pipeline::Pipeline;
pub use provision::{
    LABEL_DEPLOYMENT, LABEL_MANAGED, LABEL_REPLICA, LABEL_SERVICE, REPLICA_INDEX_VAR, merge_env,
    service_labels,
};
pub use state::{ArtifactReady, Healthy, Pending, Provisioned, Published, ReplicasStarted};
pub use supervisor::PipelineOutcome;
pub use transitions::TransitionResult;
