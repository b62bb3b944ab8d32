use clap::Parser;
use tokio_util::sync::CancellationToken;

use condorscale::common::cli::{
    MonitorOpts, ProvisionOpts, RootOptions, SubCommand, SubmitOpts,
};
use condorscale::common::setup::setup_logging;
use condorscale::provisioner::config::{
    DEFAULT_X86_64_IMAGE, default_grace_period, default_idle_timeout,
};
use condorscale::provisioner::monitor::monitor_process;
use condorscale::provisioner::{ProvisionerCtx, ProvisionerSettings, provisioner_process};
use condorscale::runtime::DockerRuntime;
use condorscale::scheduler::submit::{WorkflowSpec, submit_workflow};
use condorscale::scheduler::{Arch, CondorClient};
use condorscale::Map;

async fn command_monitor(opts: MonitorOpts) -> anyhow::Result<()> {
    let scheduler = CondorClient::new();
    monitor_process(&scheduler, opts.interval.unpack()).await?;
    Ok(())
}

async fn command_provision(opts: ProvisionOpts) -> anyhow::Result<()> {
    let settings = make_settings(opts);
    let ctx = ProvisionerCtx::new(
        Box::new(CondorClient::new()),
        Box::new(DockerRuntime::new()),
        settings,
    );

    let stop = CancellationToken::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Received SIGINT, attempting to stop");
                stop.cancel();
            }
        });
    }

    provisioner_process(&ctx, &stop).await;
    Ok(())
}

fn make_settings(opts: ProvisionOpts) -> ProvisionerSettings {
    let condor_host = opts.condor_host.unwrap_or_else(|| {
        gethostname::gethostname().to_string_lossy().into_owned()
    });

    let mut images: Map<Arch, String> = opts.images.into_iter().collect();
    if images.is_empty() {
        images.insert(Arch::X86_64, DEFAULT_X86_64_IMAGE.to_string());
    }

    ProvisionerSettings {
        poll_interval: opts.interval.unpack(),
        load_threshold: opts.load_threshold,
        idle_timeout: opts
            .idle_timeout
            .map(|timeout| timeout.unpack())
            .unwrap_or_else(default_idle_timeout),
        grace_period: opts
            .grace_period
            .map(|grace| grace.unpack())
            .unwrap_or_else(default_grace_period),
        condor_host,
        images,
        volumes: opts.volumes,
    }
}

async fn command_submit(opts: SubmitOpts) -> anyhow::Result<()> {
    let spec = WorkflowSpec {
        num_layers: opts.num_layers,
        layer_width: opts.layer_width,
        job_duration: opts.job_duration,
        arch: opts.arch,
    };
    let cluster_id = submit_workflow(&spec, &opts.dag_dir).await?;
    log::info!("DAGMan job cluster is {cluster_id}");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let top_opts = RootOptions::parse();
    setup_logging(top_opts.common.debug);

    let result = match top_opts.subcmd {
        SubCommand::Monitor(opts) => command_monitor(opts).await,
        SubCommand::Provision(opts) => command_provision(opts).await,
        SubCommand::Submit(opts) => command_submit(opts).await,
    };

    if let Err(error) = result {
        log::error!("{error:?}");
        std::process::exit(1);
    }
}
