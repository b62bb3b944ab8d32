use std::time::Duration;

/// Signal delivered to a worker container when it is retired; the worker
/// image traps it and deregisters from the pool before exiting.
pub const KILL_SIGNAL: &str = "SIGINT";

/// Prefix of the names (and hostnames) of containers started by this tool.
pub const CONTAINER_NAME_PREFIX: &str = "csworker";

/// Worker image used for x86_64 when none is configured on the command line.
pub const DEFAULT_X86_64_IMAGE: &str = "ryantanaka/condor9-x86_64-isi-demo-worker";

/// How long a worker may sit idle before its container is killed, unless
/// overridden on the command line.
pub fn default_idle_timeout() -> Duration {
    get_duration_from_env("CONDORSCALE_IDLE_TIMEOUT_MS").unwrap_or_else(|| Duration::from_secs(10))
}

/// Time after startup during which a container is exempt from idle
/// accounting, so that a just-started worker is not killed before it has
/// registered with the pool.
pub fn default_grace_period() -> Duration {
    get_duration_from_env("CONDORSCALE_GRACE_PERIOD_MS").unwrap_or_else(|| Duration::from_secs(30))
}

fn get_duration_from_env(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
}
