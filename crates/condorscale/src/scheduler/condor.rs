use std::future::Future;
use std::pin::Pin;

use anyhow::Context;

use crate::common::cmdutils::{check_command_output, create_command, parse_json_records};
use crate::scheduler::pool::SlotRecord;
use crate::scheduler::queue::JobRecord;
use crate::scheduler::{POOL_MEMBER_ATTR, REQUIRED_ARCH_ATTR};

/// Handler that can query the external scheduler for the current pool and
/// queue state.
pub trait SchedulerClient {
    /// Query the startd slots belonging to the provisioned pool.
    fn pool_status(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<SlotRecord>>>>>;

    /// Query the jobs currently in the queue.
    fn queue_status(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<JobRecord>>>>>;
}

/// Queries HTCondor through its command-line tools, using their JSON output
/// mode.
#[derive(Default)]
pub struct CondorClient;

impl CondorClient {
    pub fn new() -> Self {
        CondorClient
    }
}

fn pool_query_arguments() -> Vec<String> {
    vec![
        "condor_status".to_string(),
        "-json".to_string(),
        "-attributes".to_string(),
        "Name,Arch,State,Activity".to_string(),
        "-constraint".to_string(),
        format!("{POOL_MEMBER_ATTR} =?= true"),
    ]
}

fn queue_query_arguments() -> Vec<String> {
    vec![
        "condor_q".to_string(),
        "-json".to_string(),
        "-attributes".to_string(),
        format!("ClusterId,ProcId,JobStatus,{REQUIRED_ARCH_ATTR}"),
    ]
}

impl SchedulerClient for CondorClient {
    fn pool_status(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<SlotRecord>>>>> {
        let arguments = pool_query_arguments();
        log::debug!("Running scheduler command `{}`", arguments.join(" "));
        let mut command = create_command(arguments);

        Box::pin(async move {
            let output = command
                .output()
                .await
                .context("condor_status start failed")?;
            let output =
                check_command_output(output).context("condor_status execution failed")?;
            parse_json_records(&output.stdout)
        })
    }

    fn queue_status(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<JobRecord>>>>> {
        let arguments = queue_query_arguments();
        log::debug!("Running scheduler command `{}`", arguments.join(" "));
        let mut command = create_command(arguments);

        Box::pin(async move {
            let output = command.output().await.context("condor_q start failed")?;
            let output = check_command_output(output).context("condor_q execution failed")?;
            parse_json_records(&output.stdout)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{pool_query_arguments, queue_query_arguments};

    #[test]
    fn pool_query_is_constrained_to_provisioned_workers() {
        let arguments = pool_query_arguments();
        assert_eq!(arguments[0], "condor_status");
        assert!(arguments.contains(&"ProvisionedWorker =?= true".to_string()));
    }

    #[test]
    fn queue_query_projects_required_attributes() {
        let arguments = queue_query_arguments();
        assert_eq!(arguments[0], "condor_q");
        assert!(
            arguments.contains(&"ClusterId,ProcId,JobStatus,RequiredArch".to_string())
        );
    }
}
