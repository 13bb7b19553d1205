use super::Result;
use spincomm_kernels::{KernelElem, ReduceOp};

/// Abstraction for a collective communication backend.
///
/// One value of the implementing type exists per rank, and each is driven by exactly one worker
/// thread (hence `&mut self` on the collectives). Every rank of a group must call the same
/// collectives in the same order; at most one collective is in flight per group.
///
/// A failed collective leaves the caller's buffer contents indeterminate.
pub trait CollectiveBackend<T: KernelElem>: Send {
    /// Returns the rank of the calling participant, in `0..world_size()`.
    fn rank(&self) -> usize;

    /// Returns the total number of participants.
    fn world_size(&self) -> usize;

    /// Waits until every rank has reached this point.
    fn barrier(&mut self) -> Result<()>;

    /// Combines `buffer` elementwise across all ranks with `op`; every rank ends up holding the
    /// result in place.
    ///
    /// Inputs are combined in ascending rank order, so all ranks get bit-identical results and
    /// repeated runs over the same inputs are reproducible.
    fn all_reduce(&mut self, buffer: &mut [T], op: ReduceOp) -> Result<()>;

    /// Performs an All-Reduce sum on `buffer`.
    fn all_reduce_sum(&mut self, buffer: &mut [T]) -> Result<()> {
        self.all_reduce(buffer, ReduceOp::Sum)
    }

    /// Copies `root`'s buffer into every other rank's buffer. The root's buffer is left untouched.
    ///
    /// Every rank must pass a buffer of the same length. A mismatch, or a `root` outside the
    /// group, fails the call on every rank, the root included, and no buffer is modified.
    fn broadcast(&mut self, buffer: &mut [T], root: usize) -> Result<()>;

    /// Concatenates every rank's `input` into `output` in rank order.
    ///
    /// `output.len()` must be `world_size() * input.len()`.
    fn all_gather(&mut self, input: &[T], output: &mut [T]) -> Result<()>;

    /// Aborts the whole group. Returns `true` if this call was the one that aborted it.
    fn abort(&self) -> bool;

    /// Whether the group has been aborted.
    fn is_aborted(&self) -> bool;
}
