use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::common::Map;
use crate::common::WrappedRcRefCell;
use crate::common::error::ScaleError;
use crate::provisioner::ProvisionResult;
use crate::provisioner::config::{CONTAINER_NAME_PREFIX, KILL_SIGNAL};
use crate::provisioner::estimator::LoadEstimate;
use crate::provisioner::state::{ManagedContainer, ProvisionerState};
use crate::runtime::{ContainerRuntime, WorkerSpec};
use crate::scheduler::{Arch, PoolState, QueueState, SchedulerClient, idle_worker_hosts};

/// Tuning of the provisioning loops.
#[derive(Debug, Clone)]
pub struct ProvisionerSettings {
    /// How often both control tasks poll the scheduler.
    pub poll_interval: Duration,
    /// Load ratio above which a scale-up is triggered.
    pub load_threshold: f64,
    /// How long a worker may stay idle before its container is killed.
    pub idle_timeout: Duration,
    /// Time after container start during which it is exempt from idle
    /// accounting.
    pub grace_period: Duration,
    /// Central manager address handed to worker containers.
    pub condor_host: String,
    /// Worker image per supported architecture.
    pub images: Map<Arch, String>,
    /// Volumes mounted into every worker container.
    pub volumes: Vec<String>,
}

/// Everything the control tasks share: the external clients, the tuning, and
/// the registry of managed containers.
pub struct ProvisionerCtx {
    pub scheduler: Box<dyn SchedulerClient>,
    pub runtime: Box<dyn ContainerRuntime>,
    pub settings: ProvisionerSettings,
    pub state: WrappedRcRefCell<ProvisionerState>,
}

impl ProvisionerCtx {
    pub fn new(
        scheduler: Box<dyn SchedulerClient>,
        runtime: Box<dyn ContainerRuntime>,
        settings: ProvisionerSettings,
    ) -> Self {
        Self {
            scheduler,
            runtime,
            settings,
            state: WrappedRcRefCell::wrap(ProvisionerState::new()),
        }
    }
}

/// This is the main provisioning loop: it runs the scale-up and scale-down
/// tasks concurrently until `stop` is cancelled (or a fatal error cancels it
/// from within), then unconditionally kills every container the registry
/// still tracks.
pub async fn provisioner_process(ctx: &ProvisionerCtx, stop: &CancellationToken) {
    log::info!(
        "Starting provisioning: poll interval {}, load threshold {}",
        humantime::format_duration(ctx.settings.poll_interval),
        ctx.settings.load_threshold
    );
    tokio::join!(scale_up_loop(ctx, stop), scale_down_loop(ctx, stop));

    log::debug!("Control tasks finished, stopping all managed containers");
    shutdown_all_containers(ctx).await;
}

async fn scale_up_loop(ctx: &ProvisionerCtx, stop: &CancellationToken) {
    while !stop.is_cancelled() {
        if let Err(error) = scale_up_tick(ctx).await {
            log::error!("Provisioning failed: {error}");
            stop.cancel();
            break;
        }
        wait_for_next_poll(ctx.settings.poll_interval, stop).await;
    }
}

async fn scale_down_loop(ctx: &ProvisionerCtx, stop: &CancellationToken) {
    while !stop.is_cancelled() {
        scale_down_tick(ctx).await;
        wait_for_next_poll(ctx.settings.poll_interval, stop).await;
    }
}

async fn wait_for_next_poll(interval: Duration, stop: &CancellationToken) {
    tokio::select! {
        _ = tokio::time::sleep(interval) => {}
        _ = stop.cancelled() => {}
    }
}

/// One scale-up pass: recompute the load estimate and start a worker for
/// every architecture above the threshold.
///
/// Scheduler query failures are transient and only skip the pass; a
/// classification failure (unknown architecture) is returned and stops the
/// whole process.
async fn scale_up_tick(ctx: &ProvisionerCtx) -> crate::Result<()> {
    let slots = match ctx.scheduler.pool_status().await {
        Ok(slots) => slots,
        Err(error) => {
            log::error!("Cannot query pool state: {error:?}");
            return Ok(());
        }
    };
    let jobs = match ctx.scheduler.queue_status().await {
        Ok(jobs) => jobs,
        Err(error) => {
            log::error!("Cannot query queue state: {error:?}");
            return Ok(());
        }
    };

    let pool = PoolState::from_slots(&slots)?;
    let queue = QueueState::from_jobs(&jobs)?;
    let estimate = LoadEstimate::compute(&pool, &queue);

    for arch in estimate.overloaded(ctx.settings.load_threshold) {
        log::info!(
            "Load of {arch} is {} (threshold {}), starting another worker",
            format_load(estimate.load(arch)),
            ctx.settings.load_threshold
        );
        if let Err(error) = start_worker(ctx, arch).await {
            // an architecture without an image fails only its own branch
            log::error!("Cannot start {arch} worker: {error:?}");
        }
    }
    Ok(())
}

pub(crate) fn format_load(load: f64) -> String {
    if load.is_infinite() {
        "inf".to_string()
    } else {
        format!("{load:.2}")
    }
}

async fn start_worker(ctx: &ProvisionerCtx, arch: Arch) -> ProvisionResult<()> {
    let settings = &ctx.settings;
    let image = settings
        .images
        .get(&arch)
        .ok_or(ScaleError::UnsupportedArchitecture(arch))?
        .clone();

    let id = ctx.state.get_mut().create_id();
    let name = format!("{CONTAINER_NAME_PREFIX}-{id}");
    let spec = WorkerSpec {
        image,
        name: name.clone(),
        volumes: settings.volumes.clone(),
        env: vec![("CONDOR_HOST".to_string(), settings.condor_host.clone())],
    };

    let handle = ctx.runtime.start_worker(spec).await?;
    log::info!(
        "Started {arch} worker {name} in container {}",
        handle.container_id
    );
    ctx.state
        .get_mut()
        .add_container(ManagedContainer::new(id, handle, arch));
    Ok(())
}

/// One scale-down pass: refresh the idle worker set, reset the timers of busy
/// workers and kill the containers that have been idle past the timeout.
async fn scale_down_tick(ctx: &ProvisionerCtx) {
    if ctx.state.get().container_count() == 0 {
        return;
    }

    let slots = match ctx.scheduler.pool_status().await {
        Ok(slots) => slots,
        Err(error) => {
            log::error!("Cannot query pool state: {error:?}");
            return;
        }
    };
    let idle_hosts = idle_worker_hosts(&slots);

    let expired: Vec<ManagedContainer> = {
        let mut state = ctx.state.get_mut();
        // A worker that is not idle-available right now (busy, or not yet
        // registered with the pool) keeps its kill timer reset.
        for name in state.names() {
            if !idle_hosts.contains(&name) {
                state.observe_busy(&name);
            }
        }
        let expired_names = state.expired(ctx.settings.idle_timeout, ctx.settings.grace_period);
        expired_names
            .iter()
            .filter_map(|name| state.remove_container(name))
            .collect()
    };

    for container in expired {
        log::info!(
            "Worker {} was idle for over {}, killing container {}",
            container.handle.name,
            humantime::format_duration(ctx.settings.idle_timeout),
            container.handle.container_id
        );
        if let Err(error) = ctx.runtime.kill(&container.handle, KILL_SIGNAL).await {
            log::error!(
                "Failed to kill container {}: {error:?}",
                container.handle.name
            );
        }
    }
}

/// Kills every container the registry still tracks, exactly once each.
/// Best-effort: failures are logged, container exit is not awaited.
async fn shutdown_all_containers(ctx: &ProvisionerCtx) {
    let containers = ctx.state.get_mut().drain();
    if containers.is_empty() {
        return;
    }
    log::info!("Killing {} managed container(s)", containers.len());

    let kills = containers
        .iter()
        .map(|container| ctx.runtime.kill(&container.handle, KILL_SIGNAL));
    for (result, container) in futures::future::join_all(kills)
        .await
        .into_iter()
        .zip(&containers)
    {
        match result {
            Ok(()) => log::info!("Container {} was killed", container.handle.name),
            Err(error) => log::error!(
                "Failed to kill container {}: {error:?}",
                container.handle.name
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::time::{Duration, Instant};

    use derive_builder::Builder;
    use tokio_util::sync::CancellationToken;

    use super::{
        ProvisionerCtx, ProvisionerSettings, provisioner_process, scale_down_tick, scale_up_tick,
        shutdown_all_containers,
    };
    use crate::common::WrappedRcRefCell;
    use crate::common::error::ScaleError;
    use crate::common::timeutils::mock_time::MockTime;
    use crate::provisioner::state::ManagedContainer;
    use crate::runtime::{ContainerHandle, ContainerRuntime, RuntimeResult, WorkerSpec};
    use crate::scheduler::queue::JobStatus;
    use crate::scheduler::{Arch, JobRecord, SchedulerClient, SlotRecord};

    #[derive(Default)]
    struct SchedulerState {
        slots: Vec<SlotRecord>,
        jobs: Vec<JobRecord>,
        fail_pool: bool,
        fail_queue: bool,
    }

    struct StubScheduler {
        state: WrappedRcRefCell<SchedulerState>,
    }

    impl SchedulerClient for StubScheduler {
        fn pool_status(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<SlotRecord>>>>> {
            let state = self.state.clone();
            Box::pin(async move {
                let state = state.get();
                if state.fail_pool {
                    return Err(anyhow::anyhow!("pool query failed"));
                }
                Ok(state.slots.clone())
            })
        }

        fn queue_status(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<JobRecord>>>>> {
            let state = self.state.clone();
            Box::pin(async move {
                let state = state.get();
                if state.fail_queue {
                    return Err(anyhow::anyhow!("queue query failed"));
                }
                Ok(state.jobs.clone())
            })
        }
    }

    #[derive(Default)]
    struct RuntimeLog {
        started: Vec<WorkerSpec>,
        killed: Vec<(String, String)>,
        fail_kill: bool,
        container_counter: u64,
    }

    struct StubRuntime {
        log: WrappedRcRefCell<RuntimeLog>,
    }

    impl ContainerRuntime for StubRuntime {
        fn start_worker(
            &self,
            spec: WorkerSpec,
        ) -> Pin<Box<dyn Future<Output = RuntimeResult<ContainerHandle>>>> {
            let log = self.log.clone();
            Box::pin(async move {
                let mut log = log.get_mut();
                log.container_counter += 1;
                let container_id = format!("container-{}", log.container_counter);
                log.started.push(spec.clone());
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
            let log = self.log.clone();
            let name = handle.name.clone();
            let signal = signal.to_string();
            Box::pin(async move {
                let mut log = log.get_mut();
                log.killed.push((name, signal));
                if log.fail_kill {
                    return Err(anyhow::anyhow!("kill failed"));
                }
                Ok(())
            })
        }
    }

    #[derive(Builder)]
    #[builder(pattern = "owned", build_fn(name = "finish"))]
    struct Settings {
        #[builder(default = "Duration::from_millis(10)")]
        poll_interval: Duration,
        #[builder(default = "1.0")]
        load_threshold: f64,
        #[builder(default = "Duration::from_secs(10)")]
        idle_timeout: Duration,
        #[builder(default = "Duration::ZERO")]
        grace_period: Duration,
        #[builder(default = "vec![(Arch::X86_64, \"x86-image\".to_string())]")]
        images: Vec<(Arch, String)>,
    }

    impl SettingsBuilder {
        fn build(self) -> ProvisionerSettings {
            let Settings {
                poll_interval,
                load_threshold,
                idle_timeout,
                grace_period,
                images,
            } = self.finish().unwrap();
            ProvisionerSettings {
                poll_interval,
                load_threshold,
                idle_timeout,
                grace_period,
                condor_host: "cm.test".to_string(),
                images: images.into_iter().collect(),
                volumes: vec![],
            }
        }
    }

    struct TestCtx {
        ctx: ProvisionerCtx,
        scheduler: WrappedRcRefCell<SchedulerState>,
        runtime: WrappedRcRefCell<RuntimeLog>,
    }

    fn create_ctx(settings: SettingsBuilder) -> TestCtx {
        let scheduler = WrappedRcRefCell::wrap(SchedulerState::default());
        let runtime = WrappedRcRefCell::wrap(RuntimeLog::default());
        let ctx = ProvisionerCtx::new(
            Box::new(StubScheduler {
                state: scheduler.clone(),
            }),
            Box::new(StubRuntime {
                log: runtime.clone(),
            }),
            settings.build(),
        );
        TestCtx {
            ctx,
            scheduler,
            runtime,
        }
    }

    fn idle_slot(host: &str, arch: &str) -> SlotRecord {
        SlotRecord {
            name: format!("slot1@{host}"),
            arch: arch.to_string(),
            state: "Unclaimed".to_string(),
            activity: "Idle".to_string(),
        }
    }

    fn busy_slot(host: &str, arch: &str) -> SlotRecord {
        SlotRecord {
            name: format!("slot1@{host}"),
            arch: arch.to_string(),
            state: "Claimed".to_string(),
            activity: "Busy".to_string(),
        }
    }

    fn idle_job(proc_id: u64, arch: &str) -> JobRecord {
        JobRecord {
            cluster_id: 1,
            proc_id,
            status: JobStatus::Idle,
            required_arch: Some(arch.to_string()),
        }
    }

    fn add_managed(ctx: &ProvisionerCtx, name: &str) {
        let mut state = ctx.state.get_mut();
        let id = state.create_id();
        state.add_container(ManagedContainer::new(
            id,
            ContainerHandle {
                container_id: format!("container-{id}"),
                name: name.to_string(),
            },
            Arch::X86_64,
        ));
    }

    #[tokio::test]
    async fn scale_up_fires_for_overloaded_architecture() {
        let t = create_ctx(SettingsBuilder::default());
        {
            let mut scheduler = t.scheduler.get_mut();
            scheduler.slots = vec![
                idle_slot("other-1", "X86_64"),
                idle_slot("other-2", "X86_64"),
            ];
            scheduler.jobs = (0..4).map(|i| idle_job(i, "X86_64")).collect();
        }

        scale_up_tick(&t.ctx).await.unwrap();

        let log = t.runtime.get();
        assert_eq!(log.started.len(), 1);
        let spec = &log.started[0];
        assert_eq!(spec.image, "x86-image");
        assert_eq!(spec.name, "csworker-1");
        assert!(
            spec.env
                .contains(&("CONDOR_HOST".to_string(), "cm.test".to_string()))
        );
        assert_eq!(t.ctx.state.get().container_count(), 1);
    }

    #[tokio::test]
    async fn no_scale_up_below_threshold() {
        let t = create_ctx(SettingsBuilder::default());
        {
            let mut scheduler = t.scheduler.get_mut();
            scheduler.slots = (0..4)
                .map(|i| idle_slot(&format!("other-{i}"), "X86_64"))
                .collect();
            scheduler.jobs = (0..3).map(|i| idle_job(i, "X86_64")).collect();
        }

        scale_up_tick(&t.ctx).await.unwrap();

        assert!(t.runtime.get().started.is_empty());
        assert_eq!(t.ctx.state.get().container_count(), 0);
    }

    #[tokio::test]
    async fn unmet_demand_scales_up_without_any_workers() {
        let t = create_ctx(SettingsBuilder::default());
        t.scheduler.get_mut().jobs = vec![idle_job(0, "X86_64")];

        scale_up_tick(&t.ctx).await.unwrap();

        assert_eq!(t.runtime.get().started.len(), 1);
    }

    #[tokio::test]
    async fn unsupported_architecture_fails_only_its_branch() {
        let t = create_ctx(SettingsBuilder::default());
        t.scheduler.get_mut().jobs = vec![idle_job(0, "X86_64"), idle_job(1, "aarch64")];

        // no aarch64 image is configured, but the x86_64 branch still runs
        scale_up_tick(&t.ctx).await.unwrap();

        let log = t.runtime.get();
        assert_eq!(log.started.len(), 1);
        assert_eq!(log.started[0].image, "x86-image");
    }

    #[tokio::test]
    async fn unexpected_architecture_is_fatal() {
        let t = create_ctx(SettingsBuilder::default());
        t.scheduler.get_mut().slots = vec![idle_slot("other-1", "SPARC")];

        let error = scale_up_tick(&t.ctx).await.unwrap_err();
        assert!(matches!(error, ScaleError::UnexpectedArchitecture(_)));
    }

    #[tokio::test]
    async fn scheduler_failure_skips_the_pass() {
        let t = create_ctx(SettingsBuilder::default());
        {
            let mut scheduler = t.scheduler.get_mut();
            scheduler.jobs = vec![idle_job(0, "X86_64")];
            scheduler.fail_pool = true;
        }

        scale_up_tick(&t.ctx).await.unwrap();
        assert!(t.runtime.get().started.is_empty());
    }

    #[tokio::test]
    async fn idle_container_is_killed_and_removed() {
        let t = create_ctx(SettingsBuilder::default());
        let t0 = Instant::now();
        {
            let _mock = MockTime::mock(t0);
            add_managed(&t.ctx, "csworker-1");
        }
        t.scheduler.get_mut().slots = vec![idle_slot("csworker-1", "X86_64")];

        {
            let _mock = MockTime::mock(t0 + Duration::from_secs(11));
            scale_down_tick(&t.ctx).await;
        }

        let log = t.runtime.get();
        assert_eq!(
            log.killed,
            vec![("csworker-1".to_string(), "SIGINT".to_string())]
        );
        assert_eq!(t.ctx.state.get().container_count(), 0);
    }

    #[tokio::test]
    async fn container_below_idle_timeout_is_spared() {
        let t = create_ctx(SettingsBuilder::default());
        let t0 = Instant::now();
        {
            let _mock = MockTime::mock(t0);
            add_managed(&t.ctx, "csworker-1");
        }
        t.scheduler.get_mut().slots = vec![idle_slot("csworker-1", "X86_64")];

        {
            let _mock = MockTime::mock(t0 + Duration::from_secs(9));
            scale_down_tick(&t.ctx).await;
        }

        assert!(t.runtime.get().killed.is_empty());
        assert_eq!(t.ctx.state.get().container_count(), 1);
    }

    #[tokio::test]
    async fn busy_worker_resets_its_idle_timer() {
        let t = create_ctx(SettingsBuilder::default());
        let t0 = Instant::now();
        {
            let _mock = MockTime::mock(t0);
            add_managed(&t.ctx, "csworker-1");
        }

        // claimed by a job at t0+11: the timer restarts instead of expiring
        t.scheduler.get_mut().slots = vec![busy_slot("csworker-1", "X86_64")];
        {
            let _mock = MockTime::mock(t0 + Duration::from_secs(11));
            scale_down_tick(&t.ctx).await;
        }
        assert!(t.runtime.get().killed.is_empty());

        // idle again, but only for 9s since the busy observation
        t.scheduler.get_mut().slots = vec![idle_slot("csworker-1", "X86_64")];
        {
            let _mock = MockTime::mock(t0 + Duration::from_secs(20));
            scale_down_tick(&t.ctx).await;
        }
        assert!(t.runtime.get().killed.is_empty());

        {
            let _mock = MockTime::mock(t0 + Duration::from_secs(22));
            scale_down_tick(&t.ctx).await;
        }
        assert_eq!(t.runtime.get().killed.len(), 1);
    }

    #[tokio::test]
    async fn worker_missing_from_pool_is_treated_as_busy() {
        let t = create_ctx(SettingsBuilder::default());
        let t0 = Instant::now();
        {
            let _mock = MockTime::mock(t0);
            add_managed(&t.ctx, "csworker-1");
        }

        // the worker never registered with the pool; it must not be killed
        {
            let _mock = MockTime::mock(t0 + Duration::from_secs(60));
            scale_down_tick(&t.ctx).await;
        }
        assert!(t.runtime.get().killed.is_empty());
        assert_eq!(t.ctx.state.get().container_count(), 1);
    }

    #[tokio::test]
    async fn grace_period_spares_a_fresh_container() {
        let t = create_ctx(
            SettingsBuilder::default().grace_period(Duration::from_secs(60)),
        );
        let t0 = Instant::now();
        {
            let _mock = MockTime::mock(t0);
            add_managed(&t.ctx, "csworker-1");
        }
        t.scheduler.get_mut().slots = vec![idle_slot("csworker-1", "X86_64")];

        {
            let _mock = MockTime::mock(t0 + Duration::from_secs(11));
            scale_down_tick(&t.ctx).await;
        }

        assert!(t.runtime.get().killed.is_empty());
        assert_eq!(t.ctx.state.get().container_count(), 1);
    }

    #[tokio::test]
    async fn kill_failure_does_not_keep_the_container_managed() {
        let t = create_ctx(SettingsBuilder::default());
        let t0 = Instant::now();
        {
            let _mock = MockTime::mock(t0);
            add_managed(&t.ctx, "csworker-1");
        }
        {
            let mut scheduler = t.scheduler.get_mut();
            scheduler.slots = vec![idle_slot("csworker-1", "X86_64")];
        }
        t.runtime.get_mut().fail_kill = true;

        {
            let _mock = MockTime::mock(t0 + Duration::from_secs(11));
            scale_down_tick(&t.ctx).await;
        }

        // the kill was attempted exactly once and the entry is gone
        assert_eq!(t.runtime.get().killed.len(), 1);
        assert_eq!(t.ctx.state.get().container_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_kills_every_container_exactly_once() {
        let t = create_ctx(SettingsBuilder::default());
        for i in 1..=3 {
            add_managed(&t.ctx, &format!("csworker-{i}"));
        }

        shutdown_all_containers(&t.ctx).await;

        let log = t.runtime.get();
        assert_eq!(log.killed.len(), 3);
        let mut killed: Vec<_> = log.killed.iter().map(|(name, _)| name.clone()).collect();
        killed.sort();
        assert_eq!(killed, vec!["csworker-1", "csworker-2", "csworker-3"]);
        assert!(log.killed.iter().all(|(_, signal)| signal == "SIGINT"));
        assert_eq!(t.ctx.state.get().container_count(), 0);
    }

    #[tokio::test]
    async fn process_kills_all_containers_on_stop() {
        let t = create_ctx(SettingsBuilder::default());
        add_managed(&t.ctx, "csworker-1");
        add_managed(&t.ctx, "csworker-2");

        let stop = CancellationToken::new();
        stop.cancel();
        provisioner_process(&t.ctx, &stop).await;

        assert_eq!(t.runtime.get().killed.len(), 2);
        assert_eq!(t.ctx.state.get().container_count(), 0);
    }

    #[tokio::test]
    async fn fatal_error_stops_the_process_and_cleans_up() {
        let t = create_ctx(SettingsBuilder::default());
        add_managed(&t.ctx, "csworker-1");
        t.scheduler.get_mut().slots = vec![idle_slot("other-1", "SPARC")];

        let stop = CancellationToken::new();
        provisioner_process(&t.ctx, &stop).await;

        assert!(stop.is_cancelled());
        assert_eq!(t.ctx.state.get().container_count(), 0);
        assert_eq!(t.runtime.get().killed.len(), 1);
    }
}
