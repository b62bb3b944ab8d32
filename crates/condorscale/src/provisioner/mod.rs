//! Load-based autoscaling of the worker pool: a background process that
//! watches the scheduler's queue and pool state and starts or kills worker
//! containers in response.
//!
//! Two control tasks run concurrently over one shared registry of managed
//! containers: scale-up launches a worker when an architecture's load ratio
//! (idle jobs per idle worker) exceeds the configured threshold, scale-down
//! kills workers that have been idle past the idle timeout.

pub mod config;
pub mod estimator;
pub mod monitor;
pub mod process;
pub mod state;

pub type ProvisionResult<T> = anyhow::Result<T>;

pub use estimator::LoadEstimate;
pub use process::{ProvisionerCtx, ProvisionerSettings, provisioner_process};
pub use state::{ContainerId, ManagedContainer, ProvisionerState};
