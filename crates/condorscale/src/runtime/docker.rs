use std::future::Future;
use std::pin::Pin;

use anyhow::Context;
use bstr::ByteSlice;

use crate::common::cmdutils::{check_command_output, create_command};
use crate::runtime::{ContainerHandle, ContainerRuntime, RuntimeResult, WorkerSpec};

/// Runs worker containers through the `docker` command-line client.
#[derive(Default)]
pub struct DockerRuntime;

impl DockerRuntime {
    pub fn new() -> Self {
        DockerRuntime
    }
}

fn run_arguments(spec: &WorkerSpec) -> Vec<String> {
    let mut arguments = vec![
        "docker".to_string(),
        "run".to_string(),
        "--detach".to_string(),
        "--rm".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "--hostname".to_string(),
        spec.name.clone(),
    ];
    for volume in &spec.volumes {
        arguments.push("--volume".to_string());
        arguments.push(volume.clone());
    }
    for (key, value) in &spec.env {
        arguments.push("--env".to_string());
        arguments.push(format!("{key}={value}"));
    }
    arguments.push(spec.image.clone());
    arguments
}

impl ContainerRuntime for DockerRuntime {
    fn start_worker(
        &self,
        spec: WorkerSpec,
    ) -> Pin<Box<dyn Future<Output = RuntimeResult<ContainerHandle>>>> {
        let arguments = run_arguments(&spec);
        log::debug!("Running runtime command `{}`", arguments.join(" "));
        let mut command = create_command(arguments);

        Box::pin(async move {
            let output = command.output().await.context("docker run start failed")?;
            let output = check_command_output(output).context("docker run execution failed")?;
            let container_id = output
                .stdout
                .to_str()
                .map_err(|e| anyhow::anyhow!("Invalid UTF-8 docker run output: {:?}", e))?
                .trim()
                .to_string();
            Ok(ContainerHandle {
                container_id,
                name: spec.name,
            })
        })
    }

    fn kill(
        &self,
        handle: &ContainerHandle,
        signal: &str,
    ) -> Pin<Box<dyn Future<Output = RuntimeResult<()>>>> {
        let arguments = vec![
            "docker".to_string(),
            "kill".to_string(),
            "--signal".to_string(),
            signal.to_string(),
            handle.name.clone(),
        ];
        log::debug!("Running runtime command `{}`", arguments.join(" "));
        let mut command = create_command(arguments);

        Box::pin(async move {
            let output = command.output().await.context("docker kill start failed")?;
            check_command_output(output).context("docker kill execution failed")?;
            Ok(())
        })
    }
}
