//! # In-Process Collective Communication
//!
//! This module lets a group of worker threads that live in one process behave like the ranks
//! of a distributed data-parallel job. Every worker owns a private buffer (usually its local
//! gradients) and, at each synchronization point of a training step, all of them call the same
//! collective at the same time.
//!
//! ## 🎓 How it works
//!
//! Instead of sending bytes through channels, each rank *publishes* a pointer to its buffer in a
//! shared [`HandleRegistry`](registry::HandleRegistry), and peers read it in place:
//!
//! 1.  **Publish**: rank `r` writes `(ptr, len)` into slot `r`.
//! 2.  **Phase 1 barrier**: nobody reads until everybody has published.
//! 3.  **Read**: each rank reads whatever slots the collective needs (all of them for
//!     all-reduce, only the root for broadcast) and computes its private result.
//! 4.  **Phase 2 barrier**: nobody touches its buffer again until everybody has finished reading.
//!
//! Both barriers are passes of one [`SenseBarrier`](barrier::SenseBarrier): a spin barrier that
//! flips a shared flag once per pass and lets each participant remember, locally, which value it
//! is waiting for next. That is what makes it reusable back-to-back with no reset step.
//!
//! ## 📦 Module Contents
//!
//! *   [`CollectiveBackend`](backend::CollectiveBackend): the interface a training loop talks to.
//! *   [`CpuBackend`](cpu_backend::CpuBackend): the per-rank shared-memory implementation.
//! *   [`AbortHandle`](abort::AbortHandle): cooperative cancellation for a supervising thread.
//! *   [`run_ranks`](launch::run_ranks): runs one closure per rank on scoped threads.
//!
//! ## 🚀 Quick Start
//!
//! ```rust
//! use spincomm::distributed::{CommConfig, CollectiveBackend, run_ranks};
//!
//! let sums = run_ranks::<f32, _, _>(CommConfig::new(4), |mut backend| {
//!     let mut grads = vec![(backend.rank() + 1) as f32; 3];
//!     backend.all_reduce_sum(&mut grads).unwrap();
//!     grads
//! })
//! .unwrap();
//!
//! assert!(sums.iter().all(|g| g == &vec![10.0; 3]));
//! ```

use spincomm_kernels::KernelError;
use thiserror::Error;

pub mod abort;
pub mod backend;
pub mod barrier;
pub mod config;
pub mod cpu_backend;
pub mod launch;
pub mod registry;

pub use abort::{AbortHandle, AbortOnPanic};
pub use backend::CollectiveBackend;
pub use barrier::{LocalSense, SenseBarrier};
pub use config::{CommConfig, WaitStrategy};
pub use cpu_backend::CpuBackend;
pub use launch::run_ranks;
pub use registry::{HandleRegistry, PublishedView};

/// Error type for collective operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollectiveError {
    /// A group must have at least one participant.
    #[error("Invalid world size: {world_size}")]
    InvalidWorldSize { world_size: usize },
    /// The broadcast root is not a rank of the group.
    #[error("Invalid root rank {root} for world size {world_size}")]
    InvalidRoot { root: usize, world_size: usize },
    /// A peer published a buffer whose length disagrees with the caller's.
    #[error("Size mismatch at rank {rank}: expected {expected}, got {got}")]
    SizeMismatch {
        rank: usize,
        expected: usize,
        got: usize,
    },
    /// The group was aborted. Buffer contents are indeterminate after this error.
    #[error("Collective aborted")]
    Aborted,
    /// A reduction kernel rejected its inputs.
    #[error(transparent)]
    Kernel(#[from] KernelError),
}

pub type Result<T> = std::result::Result<T, CollectiveError>;
