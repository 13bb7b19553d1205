//! # spincomm
//!
//! `spincomm` is an in-process, thread-based collective communication layer. It lets the worker
//! threads of a single process emulate the ranks of a synchronous data-parallel training job:
//! each thread owns a private buffer and, at every synchronization point, all of them combine
//! their buffers (all-reduce), copy one rank's buffer to the others (broadcast) or concatenate
//! them (all-gather).
//!
//! There is no transport. Ranks read each other's memory in place, and the only synchronization
//! is a sense-reversing spin barrier built on two atomics, so a collective adds no kernel
//! round-trips to a training step.
//!
//! ## Modules
//!
//! - [`distributed`]: the barrier, the handle registry, the per-rank [`CpuBackend`] and the
//!   [`CollectiveBackend`] trait training code is written against.
//!
//! The elementwise kernels live in the companion `spincomm-kernels` crate and are re-exported
//! here.
//!
//! ## Example
//!
//! ```rust
//! use spincomm::{CollectiveBackend, CpuBackend};
//! use std::thread;
//!
//! let handles: Vec<_> = CpuBackend::<f32>::new_group(4)
//!     .unwrap()
//!     .into_iter()
//!     .map(|mut backend| {
//!         thread::spawn(move || {
//!             let mut grad = vec![(backend.rank() + 1) as f32];
//!             backend.all_reduce_sum(&mut grad).unwrap();
//!             grad[0]
//!         })
//!     })
//!     .collect();
//!
//! for handle in handles {
//!     assert_eq!(handle.join().unwrap(), 10.0);
//! }
//! ```

pub mod distributed;

pub use distributed::{
    AbortHandle, AbortOnPanic, CollectiveBackend, CollectiveError, CommConfig, CpuBackend,
    Result, WaitStrategy, run_ranks,
};
pub use spincomm_kernels::{KernelElem, ReduceOp};
