use std::time::Duration;

use cli_table::{Cell, CellStruct, Style, Table, print_stdout};

use crate::common::Set;
use crate::provisioner::estimator::LoadEstimate;
use crate::provisioner::process::format_load;
use crate::scheduler::{Arch, PoolState, QueueState, SchedulerClient};

/// Periodically prints the pool and queue state. Presentation only: an
/// alternative mode to provisioning, with no effect on any scheduler or
/// runtime state.
pub async fn monitor_process(
    scheduler: &dyn SchedulerClient,
    interval: Duration,
) -> crate::Result<()> {
    loop {
        monitor_tick(scheduler).await?;

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                log::info!("Received SIGINT, stopping monitor");
                return Ok(());
            }
        }
    }
}

async fn monitor_tick(scheduler: &dyn SchedulerClient) -> crate::Result<()> {
    let slots = match scheduler.pool_status().await {
        Ok(slots) => slots,
        Err(error) => {
            log::error!("Cannot query pool state: {error:?}");
            return Ok(());
        }
    };
    let jobs = match scheduler.queue_status().await {
        Ok(jobs) => jobs,
        Err(error) => {
            log::error!("Cannot query queue state: {error:?}");
            return Ok(());
        }
    };

    let pool = PoolState::from_slots(&slots)?;
    let queue = QueueState::from_jobs(&jobs)?;
    let estimate = LoadEstimate::compute(&pool, &queue);
    render_snapshot(&pool, &queue, &estimate);
    Ok(())
}

fn render_snapshot(pool: &PoolState, queue: &QueueState, estimate: &LoadEstimate) {
    println!(
        "Snapshot at {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );

    let mut architectures: Vec<Arch> = pool
        .architectures()
        .chain(queue.architectures())
        .collect::<Set<Arch>>()
        .into_iter()
        .collect();
    architectures.sort_by_key(|arch| arch.to_string());

    let rows: Vec<Vec<CellStruct>> = architectures
        .into_iter()
        .map(|arch| {
            let counts = queue.counts(arch);
            vec![
                arch.cell(),
                pool.idle_available(arch).cell(),
                counts.idle.cell(),
                counts.running.cell(),
                format_load(estimate.load(arch)).cell(),
            ]
        })
        .collect();

    let table = rows.table().title(vec![
        "Architecture".cell().bold(true),
        "Idle workers".cell().bold(true),
        "Idle jobs".cell().bold(true),
        "Running jobs".cell().bold(true),
        "Load".cell().bold(true),
    ]);
    if let Err(e) = print_stdout(table) {
        log::error!("Cannot print table to stdout: {e:?}");
    }
    println!("Unavailable slots: {}", pool.unavailable());
}
