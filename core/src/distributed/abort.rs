use super::barrier::SenseBarrier;
use std::sync::Arc;

/// Cooperative cancellation for a communicator group.
///
/// A cheap, cloneable handle that a supervising thread can hold while the ranks are busy.
/// Aborting releases every rank spinning at a barrier of the group and makes every later
/// collective on the group fail fast with [`CollectiveError::Aborted`](super::CollectiveError).
/// There is no resume: an aborted group should be dropped.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    barrier: Arc<SenseBarrier>,
}

impl AbortHandle {
    pub(crate) fn new(barrier: Arc<SenseBarrier>) -> Self {
        Self { barrier }
    }

    /// Aborts the group. Returns `true` if this call was the one that aborted it.
    pub fn abort(&self) -> bool {
        self.barrier.abort()
    }

    pub fn is_aborted(&self) -> bool {
        self.barrier.is_aborted()
    }
}

/// Aborts the group if the owning thread unwinds while the guard is alive.
///
/// Hold one in every rank thread so that a panicking rank cannot leave its peers spinning
/// forever at the next barrier.
///
/// ```rust
/// use spincomm::distributed::{AbortOnPanic, CollectiveBackend, CpuBackend};
///
/// let ranks = CpuBackend::<f32>::new_group(2).unwrap();
/// let handle = ranks[0].abort_handle();
///
/// let result = std::thread::spawn(move || {
///     let _guard = AbortOnPanic::new(handle);
///     panic!("rank failed");
/// })
/// .join();
///
/// assert!(result.is_err());
/// assert!(ranks[1].is_aborted());
/// ```
#[derive(Debug)]
#[must_use = "the guard only protects the scope it is alive in"]
pub struct AbortOnPanic {
    handle: AbortHandle,
}

impl AbortOnPanic {
    pub fn new(handle: AbortHandle) -> Self {
        Self { handle }
    }
}

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::debug!("rank panicked, aborting communicator group");
            self.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::config::WaitStrategy;
    use std::num::NonZeroUsize;

    fn handle() -> AbortHandle {
        AbortHandle::new(Arc::new(SenseBarrier::new(
            NonZeroUsize::new(2).unwrap(),
            WaitStrategy::Spin,
        )))
    }

    #[test]
    fn test_clones_share_state() {
        let a = handle();
        let b = a.clone();
        assert!(!b.is_aborted());
        assert!(a.abort());
        assert!(b.is_aborted());
        assert!(!b.abort());
    }

    #[test]
    fn test_guard_is_silent_without_panic() {
        let h = handle();
        {
            let _guard = AbortOnPanic::new(h.clone());
        }
        assert!(!h.is_aborted());
    }

    #[test]
    fn test_guard_aborts_on_panic() {
        let h = handle();
        let guarded = h.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = AbortOnPanic::new(guarded);
            panic!("boom");
        }));
        assert!(result.is_err());
        assert!(h.is_aborted());
    }
}
