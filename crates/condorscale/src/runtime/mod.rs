//! Interface to the container runtime that hosts worker containers. Starting
//! and killing containers is all this tool needs; everything else about the
//! containers' lifetime belongs to the runtime.

pub mod docker;

pub use docker::DockerRuntime;

use std::future::Future;
use std::pin::Pin;

pub type RuntimeResult<T> = anyhow::Result<T>;

/// Parameters for launching one worker container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub image: String,
    /// Name the container runs under; also used as its hostname so that the
    /// worker's slot name can be tied back to the container.
    pub name: String,
    pub volumes: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// Handle to a container started by this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    /// Runtime-assigned container id.
    pub container_id: String,
    pub name: String,
}

/// Handler that can start and kill worker containers.
pub trait ContainerRuntime {
    /// Launch a detached worker container.
    fn start_worker(
        &self,
        spec: WorkerSpec,
    ) -> Pin<Box<dyn Future<Output = RuntimeResult<ContainerHandle>>>>;

    /// Deliver `signal` to a container. Best-effort: returns once the signal
    /// was issued, container exit is not awaited.
    fn kill(
        &self,
        handle: &ContainerHandle,
        signal: &str,
    ) -> Pin<Box<dyn Future<Output = RuntimeResult<()>>>>;
}
