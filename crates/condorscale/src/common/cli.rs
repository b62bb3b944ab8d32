use std::path::PathBuf;

use clap::Parser;

use crate::common::timeutils::ArgDuration;
use crate::scheduler::Arch;

// Common CLI options
#[derive(Parser)]
pub struct CommonOpts {
    /// Enables more detailed log output
    #[arg(
        long,
        env = "CONDORSCALE_DEBUG",
        global = true,
        help_heading("GLOBAL OPTIONS")
    )]
    pub debug: bool,
}

// Root CLI options
#[derive(Parser)]
#[command(author, about, version, disable_help_subcommand(true), help_expected(true))]
pub struct RootOptions {
    #[clap(flatten)]
    pub common: CommonOpts,

    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Parser)]
pub enum SubCommand {
    /// Periodically print the state of the worker pool and the job queue
    Monitor(MonitorOpts),
    /// Run the autoscaling control loop
    Provision(ProvisionOpts),
    /// Generate and submit a fork-join test workflow
    Submit(SubmitOpts),
}

#[derive(Parser)]
pub struct MonitorOpts {
    /// How often to refresh the snapshot (e.g. `3s`)
    #[arg(value_name = "INTERVAL")]
    pub interval: ArgDuration,
}

#[derive(Parser)]
pub struct ProvisionOpts {
    /// How often the control tasks poll the scheduler (e.g. `5s`)
    #[arg(value_name = "INTERVAL")]
    pub interval: ArgDuration,

    /// Idle jobs per idle worker above which another worker is started
    #[arg(value_name = "LOAD-THRESHOLD")]
    pub load_threshold: f64,

    /// How long a worker may stay idle before its container is killed
    #[arg(long)]
    pub idle_timeout: Option<ArgDuration>,

    /// Time after startup during which a container is exempt from idle
    /// accounting
    #[arg(long)]
    pub grace_period: Option<ArgDuration>,

    /// Address of the HTCondor central manager handed to the workers.
    /// Defaults to the local hostname.
    #[arg(long, env = "CONDOR_HOST")]
    pub condor_host: Option<String>,

    /// Worker image for an architecture, e.g. `X86_64=condor9-x86_64-worker`.
    /// May be passed multiple times.
    #[arg(long = "image", value_name = "ARCH=IMAGE", value_parser = parse_image_mapping)]
    pub images: Vec<(Arch, String)>,

    /// Volume mounted into every worker container (`host-path:path[:ro]`).
    /// May be passed multiple times.
    #[arg(long = "volume", value_name = "SPEC")]
    pub volumes: Vec<String>,
}

#[derive(Parser)]
pub struct SubmitOpts {
    /// Number of layers in the workflow
    #[arg(value_name = "NUM-LAYERS", value_parser = clap::value_parser!(u32).range(1..=100))]
    pub num_layers: u32,

    /// Number of independent jobs in each odd-numbered layer
    #[arg(value_name = "LAYER-WIDTH", value_parser = clap::value_parser!(u32).range(1..=100))]
    pub layer_width: u32,

    /// Duration in seconds that each job will sleep for
    #[arg(value_name = "JOB-DURATION", value_parser = clap::value_parser!(u32).range(1..=300))]
    pub job_duration: u32,

    /// Architecture required by the generated jobs
    #[arg(long, default_value = "X86_64")]
    pub arch: Arch,

    /// Directory where the DAG files are generated
    #[arg(long, default_value = "condorscale-dag")]
    pub dag_dir: PathBuf,
}

fn parse_image_mapping(value: &str) -> anyhow::Result<(Arch, String)> {
    let (arch, image) = value
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Expected ARCH=IMAGE, got {value:?}"))?;
    if image.is_empty() {
        return Err(anyhow::anyhow!("Empty image name in {value:?}"));
    }
    Ok((arch.parse()?, image.to_string()))
}

#[cfg(test)]
mod tests {
    use super::parse_image_mapping;
    use crate::scheduler::Arch;

    #[test]
    fn parse_image_mappings() {
        assert_eq!(
            parse_image_mapping("X86_64=condor9-x86_64-worker").unwrap(),
            (Arch::X86_64, "condor9-x86_64-worker".to_string())
        );
        assert!(parse_image_mapping("X86_64").is_err());
        assert!(parse_image_mapping("X86_64=").is_err());
        assert!(parse_image_mapping("sparc=image").is_err());
    }
}
