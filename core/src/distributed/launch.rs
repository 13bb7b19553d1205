use super::abort::AbortOnPanic;
use super::config::CommConfig;
use super::cpu_backend::CpuBackend;
use super::Result;
use spincomm_kernels::KernelElem;
use std::thread;

/// Runs `f` once per rank, each on its own scoped thread, and returns the results in rank order.
///
/// The threads belong to this call, not to the backends. Each thread holds an [`AbortOnPanic`]
/// guard, so a rank that panics aborts the group and its peers return
/// [`CollectiveError::Aborted`](super::CollectiveError::Aborted) from whatever collective they
/// were in instead of spinning forever. Once every thread has finished, the first panic (in rank
/// order) is propagated to the caller.
///
/// # Errors
///
/// Returns an error only if the group cannot be created (e.g. a world size of zero).
///
/// # Example
///
/// ```rust
/// use spincomm::distributed::{CollectiveBackend, CommConfig, run_ranks};
///
/// let params = run_ranks::<f64, _, _>(CommConfig::new(3), |mut backend| {
///     let mut weights = if backend.rank() == 0 { vec![0.5, 0.25] } else { vec![0.0; 2] };
///     backend.broadcast(&mut weights, 0).unwrap();
///     weights
/// })
/// .unwrap();
///
/// assert_eq!(params, vec![vec![0.5, 0.25]; 3]);
/// ```
pub fn run_ranks<T, R, F>(config: CommConfig, f: F) -> Result<Vec<R>>
where
    T: KernelElem,
    R: Send,
    F: Fn(CpuBackend<T>) -> R + Sync,
{
    let backends = CpuBackend::<T>::group(config)?;
    let f = &f;

    let joined: Vec<thread::Result<R>> = thread::scope(|scope| {
        let handles: Vec<_> = backends
            .into_iter()
            .map(|backend| {
                scope.spawn(move || {
                    let _guard = AbortOnPanic::new(backend.abort_handle());
                    f(backend)
                })
            })
            .collect();

        handles.into_iter().map(|handle| handle.join()).collect()
    });

    let mut results = Vec::with_capacity(joined.len());
    for outcome in joined {
        match outcome {
            Ok(value) => results.push(value),
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::{CollectiveBackend, CollectiveError};
    use std::panic::AssertUnwindSafe;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_results_in_rank_order() {
        let ranks = run_ranks::<f32, _, _>(CommConfig::new(5), |backend| backend.rank()).unwrap();
        assert_eq!(ranks, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_invalid_config() {
        let result = run_ranks::<f32, _, _>(CommConfig::new(0), |backend| backend.rank());
        assert_eq!(
            result.unwrap_err(),
            CollectiveError::InvalidWorldSize { world_size: 0 }
        );
    }

    #[test]
    fn test_panicking_rank_releases_peers() {
        let aborted = AtomicUsize::new(0);
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
            run_ranks::<f32, _, _>(CommConfig::new(3), |mut backend| {
                if backend.rank() == 1 {
                    panic!("rank 1 failed before the collective");
                }
                let mut grads = vec![1.0f32; 4];
                if backend.all_reduce_sum(&mut grads) == Err(CollectiveError::Aborted) {
                    aborted.fetch_add(1, Ordering::SeqCst);
                }
            })
        }));
        assert!(outcome.is_err());
        assert_eq!(aborted.load(Ordering::SeqCst), 2);
    }
}
