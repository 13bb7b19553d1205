use num_traits::{FromPrimitive, Num, NumAssign, ToPrimitive};
use std::fmt::Debug;
use thiserror::Error;

pub mod cpu_reduce;

pub use cpu_reduce::{ReduceOp, cpu_copy, cpu_reduce_into};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// A reduction was asked to combine zero inputs.
    #[error("Reduction over an empty set of inputs")]
    EmptyReduction,
    /// The element type cannot represent a value the kernel needs (e.g. the divisor of a mean).
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, KernelError>;

/// Trait bound for elements that can be processed by kernels.
///
/// `Send + Sync` is what allows a buffer of these elements to be read by peer
/// threads while its owner is parked at a barrier.
pub trait KernelElem:
    Num + NumAssign + Copy + Clone + Debug + Send + Sync + FromPrimitive + ToPrimitive + PartialOrd
{
}

impl<T> KernelElem for T where
    T: Num
        + NumAssign
        + Copy
        + Clone
        + Debug
        + Send
        + Sync
        + FromPrimitive
        + ToPrimitive
        + PartialOrd
{
}
