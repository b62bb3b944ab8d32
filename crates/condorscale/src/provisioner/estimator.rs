use crate::common::{Map, Set};
use crate::scheduler::{Arch, PoolState, QueueState};

/// Per-architecture scale-up signal: idle jobs per idle-available worker.
///
/// A ratio rather than an absolute job count drives the scaling decision, so
/// the threshold is dimensionless and comparable across architectures with
/// differently sized pools.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LoadEstimate {
    load: Map<Arch, f64>,
}

impl LoadEstimate {
    /// Per architecture: no idle jobs means load 0 (even with no workers);
    /// idle jobs without any idle worker mean unmet demand, load +inf;
    /// otherwise the exact quotient.
    pub fn compute(pool: &PoolState, queue: &QueueState) -> LoadEstimate {
        let architectures: Set<Arch> =
            pool.architectures().chain(queue.architectures()).collect();

        let mut load = Map::default();
        for arch in architectures {
            let idle_jobs = queue.idle_jobs(arch);
            let idle_workers = pool.idle_available(arch);
            let ratio = if idle_jobs == 0 {
                0.0
            } else if idle_workers == 0 {
                f64::INFINITY
            } else {
                idle_jobs as f64 / idle_workers as f64
            };
            load.insert(arch, ratio);
        }
        LoadEstimate { load }
    }

    pub fn load(&self, arch: Arch) -> f64 {
        self.load.get(&arch).copied().unwrap_or(0.0)
    }

    /// Architectures whose load exceeds `threshold`.
    pub fn overloaded(&self, threshold: f64) -> impl Iterator<Item = Arch> + '_ {
        self.load
            .iter()
            .filter(move |(_, load)| **load > threshold)
            .map(|(arch, _)| *arch)
    }

    pub fn architectures(&self) -> impl Iterator<Item = Arch> + '_ {
        self.load.keys().copied()
    }
}
