use std::str::FromStr;
use std::time::Duration;

/// Allows specifying a [`Duration`] in humantime format (2h, 3m, 10s, ...) on
/// the command line.
#[derive(Clone, Debug)]
pub struct ArgDuration(Duration);

impl ArgDuration {
    pub fn unpack(self) -> Duration {
        self.0
    }
}

impl FromStr for ArgDuration {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(humantime::parse_duration(s)?))
    }
}

impl From<ArgDuration> for Duration {
    fn from(x: ArgDuration) -> Self {
        x.0
    }
}

#[cfg(not(test))]
pub fn now_monotonic() -> std::time::Instant {
    std::time::Instant::now()
}

#[cfg(test)]
pub use mock_time::now_monotonic;
