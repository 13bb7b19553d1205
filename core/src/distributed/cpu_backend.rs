use super::abort::AbortHandle;
use super::backend::CollectiveBackend;
use super::barrier::{LocalSense, SenseBarrier};
use super::config::CommConfig;
use super::registry::HandleRegistry;
use super::{CollectiveError, Result};
use spincomm_kernels::{KernelElem, ReduceOp, cpu_copy, cpu_reduce_into};
use std::num::NonZeroUsize;
use std::sync::Arc;

/// A shared-memory collective backend for worker threads of one process.
///
/// Each rank gets its own `CpuBackend`, created together by [`CpuBackend::group`], and moves it
/// into the thread that plays that rank. The backend spawns no threads and never blocks in the
/// kernel: peers meet at a [`SenseBarrier`] and read each other's buffers in place through a
/// [`HandleRegistry`].
///
/// Every collective runs the same two-phase protocol:
///
/// 1.  Publish this rank's buffer and arrive at the barrier (phase 1).
/// 2.  Read the peers' buffers and compute the result into private storage.
/// 3.  Arrive at the barrier again (phase 2). Past this point no peer reads our buffer.
/// 4.  Write the result into our own buffer.
///
/// Configuration errors (size mismatch, invalid root) are detected between the two phases, and
/// the failing call still performs phase 2 before returning, so a bad call never leaves peers
/// stranded at a barrier.
///
/// If the group is aborted while phase 2 is pending, the call returns only after every peer has
/// dropped its read access for this call, so the caller may reuse or free the buffer at once.
#[derive(Debug)]
pub struct CpuBackend<T: KernelElem = f32> {
    rank: usize,
    barrier: Arc<SenseBarrier>,
    registry: Arc<HandleRegistry<T>>,
    sense: LocalSense,
    scratch: Vec<T>,
}

impl<T: KernelElem> CpuBackend<T> {
    /// Creates the backends for every rank of a new group, in rank order.
    pub fn group(config: CommConfig) -> Result<Vec<Self>> {
        config.validate()?;
        let world_size =
            NonZeroUsize::new(config.world_size()).ok_or(CollectiveError::InvalidWorldSize {
                world_size: config.world_size(),
            })?;

        let barrier = Arc::new(SenseBarrier::new(world_size, config.wait_strategy()));
        let registry = Arc::new(HandleRegistry::new(world_size.get()));

        tracing::debug!(
            world_size = world_size.get(),
            wait = ?config.wait_strategy(),
            "created communicator group"
        );

        Ok((0..world_size.get())
            .map(|rank| Self {
                rank,
                sense: barrier.participant(),
                barrier: Arc::clone(&barrier),
                registry: Arc::clone(&registry),
                scratch: Vec::new(),
            })
            .collect())
    }

    /// Shorthand for [`group`](Self::group) with the default configuration.
    pub fn new_group(world_size: usize) -> Result<Vec<Self>> {
        Self::group(CommConfig::new(world_size))
    }

    /// Returns a handle that can abort this backend's group from any thread.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle::new(Arc::clone(&self.barrier))
    }

    /// Publishes `buffer` and waits for everyone else to publish theirs (phase 1).
    ///
    /// On `Ok` the caller must open exactly one [`PublishedView`](super::registry::PublishedView)
    /// and drop it before calling [`leave`](Self::leave).
    fn enter(&mut self, buffer: &[T]) -> Result<()> {
        if self.barrier.is_aborted() {
            tracing::debug!(rank = self.rank, "collective refused, group already aborted");
            return Err(CollectiveError::Aborted);
        }
        self.registry.publish(self.rank, buffer);

        let registry = &self.registry;
        let entered = self
            .barrier
            .arrive_with(&mut self.sense, || registry.open_read_window());
        if entered.is_err() {
            tracing::debug!(rank = self.rank, "collective aborted before publishing completed");
        }
        entered
    }

    /// Waits until no peer reads our buffer any more (phase 2).
    fn leave(&mut self) -> Result<()> {
        match self.barrier.arrive(&mut self.sense) {
            Ok(()) => Ok(()),
            Err(err) => {
                // Peers released by phase 1 may still be reading our buffer.
                self.registry.wait_for_readers();
                tracing::debug!(rank = self.rank, "collective aborted while peers were reading");
                Err(err)
            }
        }
    }

    fn sync(&mut self) -> Result<()> {
        match self.barrier.arrive(&mut self.sense) {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::debug!(rank = self.rank, "barrier aborted");
                Err(err)
            }
        }
    }
}

impl<T: KernelElem> CollectiveBackend<T> for CpuBackend<T> {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.registry.world_size()
    }

    fn barrier(&mut self) -> Result<()> {
        self.sync()
    }

    fn all_reduce(&mut self, buffer: &mut [T], op: ReduceOp) -> Result<()> {
        let len = buffer.len();
        self.enter(buffer)?;

        let outcome = {
            // SAFETY: phase 1 completed in `enter`; this is the call's only view and it is
            // dropped at the end of this block, before phase 2.
            let view = unsafe { self.registry.view() };
            match view.find_len_mismatch(len) {
                Some((rank, got)) => Err(CollectiveError::SizeMismatch {
                    rank,
                    expected: len,
                    got,
                }),
                None => {
                    self.scratch.clear();
                    self.scratch.resize(len, T::zero());
                    cpu_reduce_into(&mut self.scratch, view.slots(), op)
                        .map_err(CollectiveError::from)
                }
            }
        };

        // Peers may still be reading `buffer` until this returns.
        self.leave()?;
        outcome?;

        buffer.copy_from_slice(&self.scratch);
        Ok(())
    }

    fn broadcast(&mut self, buffer: &mut [T], root: usize) -> Result<()> {
        let world_size = self.world_size();
        let len = buffer.len();
        self.enter(buffer)?;

        let outcome = {
            // SAFETY: phase 1 completed in `enter`; this is the call's only view and it is
            // dropped at the end of this block, before phase 2.
            let view = unsafe { self.registry.view() };
            // Every rank checks every length, so a mismatch fails the call on all ranks alike.
            if root >= world_size {
                Err(CollectiveError::InvalidRoot { root, world_size })
            } else if let Some((rank, got)) = view.find_len_mismatch(len) {
                Err(CollectiveError::SizeMismatch {
                    rank,
                    expected: len,
                    got,
                })
            } else if self.rank != root {
                // Only the root's data is ever read, so overwriting our own buffer is safe here.
                cpu_copy(buffer, view.slot(root)).map_err(CollectiveError::from)
            } else {
                Ok(())
            }
        };

        self.leave()?;
        outcome
    }

    fn all_gather(&mut self, input: &[T], output: &mut [T]) -> Result<()> {
        let world_size = self.world_size();
        let len = input.len();
        self.enter(input)?;

        let outcome = {
            // SAFETY: phase 1 completed in `enter`; this is the call's only view and it is
            // dropped at the end of this block, before phase 2.
            let view = unsafe { self.registry.view() };
            if output.len() != world_size * len {
                Err(CollectiveError::SizeMismatch {
                    rank: self.rank,
                    expected: world_size * len,
                    got: output.len(),
                })
            } else {
                match view.find_len_mismatch(len) {
                    Some((rank, got)) => Err(CollectiveError::SizeMismatch {
                        rank,
                        expected: len,
                        got,
                    }),
                    None if len == 0 => Ok(()),
                    None => {
                        for (chunk, peer) in output.chunks_exact_mut(len).zip(view.slots()) {
                            chunk.copy_from_slice(peer);
                        }
                        Ok(())
                    }
                }
            }
        };

        self.leave()?;
        outcome
    }

    fn abort(&self) -> bool {
        self.barrier.abort()
    }

    fn is_aborted(&self) -> bool {
        self.barrier.is_aborted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::config::WaitStrategy;

    #[test]
    fn test_group_ranks_in_order() {
        let ranks = CpuBackend::<f32>::new_group(3).unwrap();
        assert_eq!(ranks.len(), 3);
        for (i, backend) in ranks.iter().enumerate() {
            assert_eq!(backend.rank(), i);
            assert_eq!(backend.world_size(), 3);
        }
    }

    #[test]
    fn test_zero_world_size() {
        let err = CpuBackend::<f32>::new_group(0).unwrap_err();
        assert_eq!(err, CollectiveError::InvalidWorldSize { world_size: 0 });
    }

    #[test]
    fn test_single_rank_collectives() {
        let config = CommConfig::new(1).with_wait_strategy(WaitStrategy::Backoff);
        let mut backend = CpuBackend::<f64>::group(config).unwrap().remove(0);

        let mut buffer = vec![1.5, -2.0];
        backend.all_reduce_sum(&mut buffer).unwrap();
        assert_eq!(buffer, vec![1.5, -2.0]);

        backend.broadcast(&mut buffer, 0).unwrap();
        assert_eq!(buffer, vec![1.5, -2.0]);

        let mut gathered = vec![0.0; 2];
        backend.all_gather(&buffer, &mut gathered).unwrap();
        assert_eq!(gathered, buffer);

        backend.barrier().unwrap();
    }

    #[test]
    fn test_single_rank_errors_keep_backend_usable() {
        let mut backend = CpuBackend::<f32>::new_group(1).unwrap().remove(0);

        let mut buffer = vec![3.0f32];
        assert_eq!(
            backend.broadcast(&mut buffer, 1),
            Err(CollectiveError::InvalidRoot {
                root: 1,
                world_size: 1
            })
        );

        let mut too_small = vec![0.0f32; 0];
        assert_eq!(
            backend.all_gather(&buffer, &mut too_small),
            Err(CollectiveError::SizeMismatch {
                rank: 0,
                expected: 1,
                got: 0
            })
        );

        // Both failed calls completed both barrier phases, so the rank is still in step.
        backend.all_reduce(&mut buffer, ReduceOp::Mean).unwrap();
        assert_eq!(buffer, vec![3.0]);
    }

    #[test]
    fn test_aborted_backend_fails_fast() {
        let mut ranks = CpuBackend::<f32>::new_group(2).unwrap();
        let handle = ranks[1].abort_handle();
        assert!(handle.abort());

        let mut buffer = vec![1.0f32];
        assert_eq!(
            ranks[0].all_reduce_sum(&mut buffer),
            Err(CollectiveError::Aborted)
        );
        assert_eq!(ranks[0].barrier(), Err(CollectiveError::Aborted));
        assert!(ranks[0].is_aborted());
        assert_eq!(buffer, vec![1.0]);
    }
}
