use serde::Deserialize;

use crate::common::Map;
use crate::scheduler::Arch;

/// Job status codes used in job ClassAds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum JobStatus {
    Unexpanded,
    Idle,
    Running,
    Removed,
    Completed,
    Held,
    SubmissionError,
}

impl TryFrom<u8> for JobStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(JobStatus::Unexpanded),
            1 => Ok(JobStatus::Idle),
            2 => Ok(JobStatus::Running),
            3 => Ok(JobStatus::Removed),
            4 => Ok(JobStatus::Completed),
            5 => Ok(JobStatus::Held),
            6 => Ok(JobStatus::SubmissionError),
            _ => Err(format!("Unknown job status code {value}")),
        }
    }
}

/// A single job as reported by the queue query.
#[derive(Debug, Clone, Deserialize)]
pub struct JobRecord {
    #[serde(rename = "ClusterId")]
    pub cluster_id: u64,
    #[serde(rename = "ProcId")]
    pub proc_id: u64,
    #[serde(rename = "JobStatus")]
    pub status: JobStatus,
    /// Value of the custom attribute naming the required architecture.
    /// Jobs without it (e.g. the DAGMan scheduler job itself) cannot be
    /// matched to a worker and are not counted.
    #[serde(rename = "RequiredArch", default)]
    pub required_arch: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JobCounts {
    pub idle: u64,
    pub running: u64,
}

/// Per-architecture counts of idle and running jobs. Recomputed on every
/// poll; all other job statuses are ignored.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct QueueState {
    jobs: Map<Arch, JobCounts>,
}

impl QueueState {
    /// Classifies queried jobs. Fails on an architecture value this tool does
    /// not know about.
    pub fn from_jobs(jobs: &[JobRecord]) -> crate::Result<QueueState> {
        let mut state = QueueState::default();
        for job in jobs {
            let Some(arch) = &job.required_arch else {
                continue;
            };
            let arch: Arch = arch.parse()?;
            let counts = state.jobs.entry(arch).or_default();
            match job.status {
                JobStatus::Idle => counts.idle += 1,
                JobStatus::Running => counts.running += 1,
                _ => {}
            }
        }
        Ok(state)
    }

    pub fn counts(&self, arch: Arch) -> JobCounts {
        self.jobs.get(&arch).copied().unwrap_or_default()
    }

    pub fn idle_jobs(&self, arch: Arch) -> u64 {
        self.counts(arch).idle
    }

    pub fn architectures(&self) -> impl Iterator<Item = Arch> + '_ {
        self.jobs.keys().copied()
    }
}
