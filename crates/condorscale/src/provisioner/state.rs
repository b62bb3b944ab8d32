use std::time::{Duration, Instant};

use crate::common::Map;
use crate::common::idcounter::IdCounter;
use crate::common::timeutils::now_monotonic;
use crate::runtime::ContainerHandle;
use crate::scheduler::Arch;

pub type ContainerId = u64;

/// A worker container whose lifecycle this process owns.
#[derive(Debug, Clone)]
pub struct ManagedContainer {
    pub id: ContainerId,
    pub handle: ContainerHandle,
    pub arch: Arch,
    started: Instant,
    last_busy: Instant,
}

impl ManagedContainer {
    pub fn new(id: ContainerId, handle: ContainerHandle, arch: Arch) -> Self {
        let now = now_monotonic();
        Self {
            id,
            handle,
            arch,
            started: now,
            last_busy: now,
        }
    }

    /// How long the worker has been observed idle.
    pub fn idle_for(&self) -> Duration {
        now_monotonic().duration_since(self.last_busy)
    }

    /// A container younger than `grace` is exempt from idle accounting; its
    /// worker may not have registered with the pool yet.
    pub fn in_grace_period(&self, grace: Duration) -> bool {
        now_monotonic().duration_since(self.started) < grace
    }
}

/// Registry of managed containers: exactly the set of containers this process
/// has started and not yet killed, keyed by container name. Access from the
/// control tasks is serialized by the surrounding
/// [`WrappedRcRefCell`](crate::common::WrappedRcRefCell) borrow.
#[derive(Default)]
pub struct ProvisionerState {
    containers: Map<String, ManagedContainer>,
    id_counter: IdCounter,
}

impl ProvisionerState {
    pub fn new() -> Self {
        Self {
            containers: Default::default(),
            id_counter: IdCounter::new(1),
        }
    }

    pub fn create_id(&mut self) -> ContainerId {
        self.id_counter.increment()
    }

    pub fn add_container(&mut self, container: ManagedContainer) {
        let name = container.handle.name.clone();
        if self.containers.insert(name, container).is_some() {
            log::warn!("Duplicate managed container detected");
        }
    }

    pub fn remove_container(&mut self, name: &str) -> Option<ManagedContainer> {
        let removed = self.containers.remove(name);
        if removed.is_none() {
            log::warn!("Trying to remove non-managed container {name}");
        }
        removed
    }

    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    pub fn containers(&self) -> impl Iterator<Item = &ManagedContainer> {
        self.containers.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.containers.keys().cloned().collect()
    }

    /// The worker was observed not idle-available: treat it as busy and
    /// cancel any running idle timer.
    pub fn observe_busy(&mut self, name: &str) {
        if let Some(container) = self.containers.get_mut(name) {
            container.last_busy = now_monotonic();
        }
    }

    /// Names of containers whose idle duration has exceeded `idle_timeout`
    /// and whose grace period has passed.
    pub fn expired(&self, idle_timeout: Duration, grace: Duration) -> Vec<String> {
        self.containers
            .iter()
            .filter(|(_, container)| {
                !container.in_grace_period(grace) && container.idle_for() > idle_timeout
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Removes and returns every entry; used by the shutdown path.
    pub fn drain(&mut self) -> Vec<ManagedContainer> {
        self.containers.drain().map(|(_, container)| container).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{ManagedContainer, ProvisionerState};
    use crate::common::timeutils::mock_time::MockTime;
    use crate::runtime::ContainerHandle;
    use crate::scheduler::Arch;

    fn container(state: &mut ProvisionerState, name: &str) -> ManagedContainer {
        let id = state.create_id();
        ManagedContainer::new(
            id,
            ContainerHandle {
                container_id: format!("container-{id}"),
                name: name.to_string(),
            },
            Arch::X86_64,
        )
    }

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[test]
    fn container_below_idle_timeout_is_not_expired() {
        let t0 = Instant::now();
        let mut state = ProvisionerState::new();
        {
            let _mock = MockTime::mock(t0);
            let c = container(&mut state, "csworker-1");
            state.add_container(c);
        }

        let _mock = MockTime::mock(t0 + Duration::from_secs(9));
        assert!(state.expired(TIMEOUT, Duration::ZERO).is_empty());
    }

    #[test]
    fn container_past_idle_timeout_is_expired_and_removed_once() {
        let t0 = Instant::now();
        let mut state = ProvisionerState::new();
        {
            let _mock = MockTime::mock(t0);
            let c = container(&mut state, "csworker-1");
            state.add_container(c);
        }

        let _mock = MockTime::mock(t0 + Duration::from_secs(11));
        let expired = state.expired(TIMEOUT, Duration::ZERO);
        assert_eq!(expired, vec!["csworker-1".to_string()]);

        assert!(state.remove_container("csworker-1").is_some());
        assert_eq!(state.container_count(), 0);
        // a second removal finds nothing
        assert!(state.remove_container("csworker-1").is_none());
    }

    #[test]
    fn busy_observation_resets_idle_timer() {
        let t0 = Instant::now();
        let mut state = ProvisionerState::new();
        {
            let _mock = MockTime::mock(t0);
            let c = container(&mut state, "csworker-1");
            state.add_container(c);
        }

        {
            let _mock = MockTime::mock(t0 + Duration::from_secs(8));
            state.observe_busy("csworker-1");
        }

        // 11s after start, but only 3s after the busy observation
        let _mock = MockTime::mock(t0 + Duration::from_secs(11));
        assert!(state.expired(TIMEOUT, Duration::ZERO).is_empty());
    }

    #[test]
    fn grace_period_blocks_expiry() {
        let t0 = Instant::now();
        let mut state = ProvisionerState::new();
        {
            let _mock = MockTime::mock(t0);
            let c = container(&mut state, "csworker-1");
            state.add_container(c);
        }

        let _mock = MockTime::mock(t0 + Duration::from_secs(11));
        assert!(state.expired(TIMEOUT, Duration::from_secs(60)).is_empty());
        assert_eq!(
            state.expired(TIMEOUT, Duration::from_secs(5)),
            vec!["csworker-1".to_string()]
        );
    }

    #[test]
    fn drain_empties_the_registry() {
        let mut state = ProvisionerState::new();
        for i in 1..=3 {
            let c = container(&mut state, &format!("csworker-{i}"));
            state.add_container(c);
        }
        let drained = state.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(state.container_count(), 0);
        assert!(state.drain().is_empty());
    }
}
