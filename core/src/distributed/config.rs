use super::{CollectiveError, Result};

/// How a rank waits for its peers at a barrier.
///
/// Both strategies busy-wait and never block in the kernel; they differ only in how hard they
/// hammer the shared flag while doing so.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitStrategy {
    /// Tight loop with [`std::hint::spin_loop`] between reads.
    ///
    /// Lowest wake-up latency. Use it when every rank has a core of its own.
    #[default]
    Spin,
    /// Exponential spinning that degrades to [`std::thread::yield_now`]
    /// (via [`crossbeam::utils::Backoff`]).
    ///
    /// Use it when ranks are oversubscribed on fewer cores, where a pure spin would
    /// starve the very peer it is waiting for.
    Backoff,
}

/// Configuration for a group of [`CpuBackend`](super::CpuBackend)s.
///
/// # Example
///
/// ```rust
/// use spincomm::distributed::{CommConfig, WaitStrategy};
///
/// let config = CommConfig::new(8).with_wait_strategy(WaitStrategy::Backoff);
/// assert_eq!(config.world_size(), 8);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommConfig {
    world_size: usize,
    wait: WaitStrategy,
}

impl CommConfig {
    pub fn new(world_size: usize) -> Self {
        Self {
            world_size,
            wait: WaitStrategy::default(),
        }
    }

    pub fn with_wait_strategy(mut self, wait: WaitStrategy) -> Self {
        self.wait = wait;
        self
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    pub fn wait_strategy(&self) -> WaitStrategy {
        self.wait
    }

    /// Checks the configuration before any shared state is allocated.
    pub fn validate(&self) -> Result<()> {
        if self.world_size == 0 {
            return Err(CollectiveError::InvalidWorldSize {
                world_size: self.world_size,
            });
        }
        Ok(())
    }
}
