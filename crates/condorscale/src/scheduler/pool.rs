use serde::Deserialize;

use crate::common::{Map, Set};
use crate::scheduler::Arch;

/// A single startd slot as reported by the pool query.
#[derive(Debug, Clone, Deserialize)]
pub struct SlotRecord {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Arch")]
    pub arch: String,
    #[serde(rename = "State")]
    pub state: String,
    #[serde(rename = "Activity")]
    pub activity: String,
}

impl SlotRecord {
    /// The slot is ready to accept work.
    pub fn is_idle_available(&self) -> bool {
        self.state == "Unclaimed" && self.activity == "Idle"
    }

    /// Host part of the slot name (`slot1@csworker-3` -> `csworker-3`).
    ///
    /// Worker containers run with their container name as hostname, so this
    /// is what ties a slot back to a managed container.
    pub fn hostname(&self) -> &str {
        self.name.rsplit('@').next().unwrap_or(&self.name)
    }
}

/// Counts of idle-available slots per architecture, plus the number of slots
/// that are unavailable (claimed, draining, ...). Recomputed on every poll.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PoolState {
    idle_available: Map<Arch, u64>,
    unavailable: u64,
}

impl PoolState {
    /// Classifies queried slots. Fails on an architecture value this tool
    /// does not know about.
    pub fn from_slots(slots: &[SlotRecord]) -> crate::Result<PoolState> {
        let mut state = PoolState::default();
        for slot in slots {
            let arch: Arch = slot.arch.parse()?;
            if slot.is_idle_available() {
                *state.idle_available.entry(arch).or_default() += 1;
            } else {
                state.unavailable += 1;
            }
        }
        Ok(state)
    }

    pub fn idle_available(&self, arch: Arch) -> u64 {
        self.idle_available.get(&arch).copied().unwrap_or(0)
    }

    pub fn unavailable(&self) -> u64 {
        self.unavailable
    }

    pub fn total(&self) -> u64 {
        self.idle_available.values().sum::<u64>() + self.unavailable
    }

    pub fn architectures(&self) -> impl Iterator<Item = Arch> + '_ {
        self.idle_available.keys().copied()
    }
}

/// Hostnames of the slots that are currently ready to accept work.
pub fn idle_worker_hosts(slots: &[SlotRecord]) -> Set<String> {
    slots
        .iter()
        .filter(|slot| slot.is_idle_available())
        .map(|slot| slot.hostname().to_string())
        .collect()
}
