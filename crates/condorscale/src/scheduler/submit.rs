use std::fmt::Write;
use std::path::Path;

use anyhow::Context;

use crate::common::cmdutils::{check_command_output, create_command};
use crate::scheduler::{Arch, REQUIRED_ARCH_ATTR};

const DAG_FILE_NAME: &str = "workflow.dag";
const NODE_SUBMIT_FILE_NAME: &str = "sleep-job.sub";

/// A fork-join test workflow: layers of sleep jobs, where odd layers fan out
/// to `layer_width` independent jobs and even layers join back to a single
/// job.
#[derive(Debug, Clone)]
pub struct WorkflowSpec {
    pub num_layers: u32,
    pub layer_width: u32,
    /// Seconds each job sleeps for.
    pub job_duration: u32,
    /// Architecture advertised by every job in the workflow.
    pub arch: Arch,
}

/// Submit description shared by all workflow nodes.
fn build_node_submit(spec: &WorkflowSpec) -> String {
    format!(
        r##"executable = /bin/sleep
arguments = {duration}
+{arch_attr} = "{arch}"
queue
"##,
        duration = spec.job_duration,
        arch_attr = REQUIRED_ARCH_ATTR,
        arch = spec.arch,
    )
}

/// DAGMan description of the workflow. Layer 0 is the single `top` node;
/// each following layer depends on the whole previous one.
fn build_dag(spec: &WorkflowSpec) -> String {
    let mut dag = String::new();
    let mut edges = String::new();

    writeln!(dag, "JOB top {NODE_SUBMIT_FILE_NAME}").unwrap();
    let mut prev_layer = vec!["top".to_string()];

    for i in 1..spec.num_layers {
        // odd layer is of width layer_width, even layer is of width 1
        let width = if i % 2 != 0 { spec.layer_width } else { 1 };
        let layer: Vec<String> = (0..width).map(|x| format!("layer_{i}_{x}")).collect();

        for node in &layer {
            writeln!(dag, "JOB {node} {NODE_SUBMIT_FILE_NAME}").unwrap();
        }
        writeln!(
            edges,
            "PARENT {} CHILD {}",
            prev_layer.join(" "),
            layer.join(" ")
        )
        .unwrap();

        prev_layer = layer;
    }

    dag.push_str(&edges);
    dag
}

/// Writes the DAG and node submit files into `dag_dir`, blowing away whatever
/// a previous submit left there. Returns the path of the DAG file.
pub fn write_workflow_files(
    spec: &WorkflowSpec,
    dag_dir: &Path,
) -> anyhow::Result<std::path::PathBuf> {
    if dag_dir.exists() {
        std::fs::remove_dir_all(dag_dir)
            .with_context(|| format!("Cannot remove old DAG directory {}", dag_dir.display()))?;
    }
    std::fs::create_dir_all(dag_dir)
        .with_context(|| format!("Cannot create DAG directory {}", dag_dir.display()))?;

    std::fs::write(dag_dir.join(NODE_SUBMIT_FILE_NAME), build_node_submit(spec))
        .context("Cannot write node submit description")?;

    let dag_path = dag_dir.join(DAG_FILE_NAME);
    std::fs::write(&dag_path, build_dag(spec)).context("Cannot write DAG file")?;

    Ok(dag_path)
}

/// Generates the workflow files and submits them through `condor_submit_dag`.
/// Returns the cluster id of the DAGMan scheduler job.
pub async fn submit_workflow(spec: &WorkflowSpec, dag_dir: &Path) -> anyhow::Result<u64> {
    let dag_path = write_workflow_files(spec, dag_dir)?;

    let arguments = vec![
        "condor_submit_dag".to_string(),
        "-f".to_string(),
        DAG_FILE_NAME.to_string(),
    ];
    log::debug!("Running scheduler command `{}`", arguments.join(" "));
    let mut command = create_command(arguments);
    command.current_dir(dag_dir);

    let output = command
        .output()
        .await
        .context("condor_submit_dag start failed")?;
    let output = check_command_output(output).context("condor_submit_dag execution failed")?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let cluster_id = parse_dagman_cluster_id(&stdout)?;
    log::debug!("Submitted workflow {} as cluster {cluster_id}", dag_path.display());
    Ok(cluster_id)
}

/// Picks the DAGMan cluster id out of `condor_submit_dag` output
/// (`... 1 job(s) submitted to cluster 42.`).
fn parse_dagman_cluster_id(output: &str) -> anyhow::Result<u64> {
    output
        .lines()
        .filter_map(|line| {
            let (_, rest) = line.split_once("submitted to cluster")?;
            rest.trim().trim_end_matches('.').parse::<u64>().ok()
        })
        .next()
        .ok_or_else(|| anyhow::anyhow!("Cannot find cluster id in condor_submit_dag output"))
}
