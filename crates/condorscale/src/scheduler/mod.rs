//! Interface to the external HTCondor scheduler: pool (startd slot) and queue
//! (job) queries, classification of their results into per-architecture
//! counts, and submission of test workflows.
//!
//! The scheduler itself is an external collaborator; everything here goes
//! through its command-line query tools.

pub mod condor;
pub mod pool;
pub mod queue;
pub mod submit;

pub use condor::{CondorClient, SchedulerClient};
pub use pool::{PoolState, SlotRecord, idle_worker_hosts};
pub use queue::{JobRecord, JobStatus, QueueState};

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::common::error::ScaleError;

/// Boolean ClassAd attribute that worker images advertise on their slots.
/// Pool queries are constrained to it so that only workers provisioned by
/// this tool are counted.
pub const POOL_MEMBER_ATTR: &str = "ProvisionedWorker";

/// Job ClassAd attribute naming the architecture a job has to run on.
/// Carried as a custom attribute because a requirements expression cannot be
/// queried back cheaply.
pub const REQUIRED_ARCH_ATTR: &str = "RequiredArch";

/// CPU instruction-set tag used to match jobs to compatible workers.
///
/// The string forms follow the values HTCondor reports in the `Arch` slot
/// attribute.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86_64,
    Aarch64,
}

impl Display for Arch {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Arch::X86_64 => f.write_str("X86_64"),
            Arch::Aarch64 => f.write_str("aarch64"),
        }
    }
}

impl FromStr for Arch {
    type Err = ScaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "X86_64" | "x86_64" => Ok(Arch::X86_64),
            "aarch64" | "AARCH64" => Ok(Arch::Aarch64),
            _ => Err(ScaleError::UnexpectedArchitecture(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Arch;
    use crate::common::error::ScaleError;

    #[test]
    fn parse_known_architectures() {
        assert_eq!("X86_64".parse::<Arch>().unwrap(), Arch::X86_64);
        assert_eq!("aarch64".parse::<Arch>().unwrap(), Arch::Aarch64);
    }

    #[test]
    fn parse_unknown_architecture() {
        let error = "riscv64".parse::<Arch>().unwrap_err();
        assert!(matches!(
            error,
            ScaleError::UnexpectedArchitecture(arch) if arch == "riscv64"
        ));
    }
}
