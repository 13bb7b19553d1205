//! Sense-reversing spin barrier.
//!
//! A classic centralized barrier: one shared arrival counter and one shared boolean "sense".
//! Every participant keeps a private copy of the sense it expects next and flips it on each
//! arrival. The last arriver resets the counter and publishes the new sense; everyone else
//! spins until the shared sense matches their private one.
//!
//! Because the expectation lives with the participant, a thread that races ahead into the next
//! pass is waiting for the *opposite* value and cannot mistake the previous flip for its own.
//! That is the whole reuse story: no generation counters, no reset between passes.
//!
//! The sense and the abort flag share one atomic byte. The last arriver publishes the new sense
//! with a compare-exchange that fails once the abort bit is set, so every pass is decided exactly
//! once: either all participants are released, or all of them observe the abort.
//!
//! ```text
//!  pass k   : local = !local ─► fetch_add ─► last? ── yes ─► count = 0, CAS sense = local
//!                                               └──── no ──► spin until sense == local
//! ```

use super::config::WaitStrategy;
use super::{CollectiveError, Result};
use crossbeam::utils::{Backoff, CachePadded};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

const SENSE: u8 = 0b01;
const ABORTED: u8 = 0b10;

#[inline]
fn sense_bits(sense: bool) -> u8 {
    if sense { SENSE } else { 0 }
}

/// A participant's private view of the barrier sense.
///
/// Obtained from [`SenseBarrier::participant`]; exactly one per participating thread.
#[derive(Debug)]
pub struct LocalSense(bool);

/// A reusable barrier for a fixed number of participants that never blocks in the kernel.
///
/// The barrier also carries the group's abort flag. Once [`abort`](Self::abort) is called every
/// pass that has not been released yet, and every future [`arrive`](Self::arrive), returns
/// [`CollectiveError::Aborted`] instead of waiting.
#[derive(Debug)]
pub struct SenseBarrier {
    parties: usize,
    wait: WaitStrategy,
    count: CachePadded<AtomicUsize>,
    /// `SENSE | ABORTED` bits.
    state: CachePadded<AtomicU8>,
}

impl SenseBarrier {
    pub fn new(parties: NonZeroUsize, wait: WaitStrategy) -> Self {
        Self {
            parties: parties.get(),
            wait,
            count: CachePadded::new(AtomicUsize::new(0)),
            state: CachePadded::new(AtomicU8::new(0)),
        }
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Creates the private sense for one participant.
    ///
    /// All participants must be created while no pass is in progress (in practice: before the
    /// first call to [`arrive`](Self::arrive)).
    pub fn participant(&self) -> LocalSense {
        LocalSense(self.state.load(Ordering::Acquire) & SENSE != 0)
    }

    /// Arrives at the barrier and waits for the remaining participants.
    ///
    /// Every write made by any participant before its `arrive` is visible to every participant
    /// after its `arrive` returns `Ok`.
    ///
    /// # Errors
    ///
    /// [`CollectiveError::Aborted`] if the barrier is, or becomes, aborted before this pass is
    /// released. A pass is released for all participants or for none. After an error `local` is
    /// out of step with its peers; the barrier must not be used for synchronization again.
    pub fn arrive(&self, local: &mut LocalSense) -> Result<()> {
        self.arrive_with(local, || {})
    }

    /// Like [`arrive`](Self::arrive), but the last arriver runs `on_release` once every
    /// participant has arrived and before any of them is released.
    ///
    /// Whatever `on_release` writes is visible to every participant that returns `Ok` from this
    /// pass. It may still run for a pass that ends up aborted.
    pub fn arrive_with<F: FnOnce()>(&self, local: &mut LocalSense, on_release: F) -> Result<()> {
        if self.is_aborted() {
            return Err(CollectiveError::Aborted);
        }

        local.0 = !local.0;
        let target = local.0;

        // AcqRel: the last arriver must acquire every earlier arrival's writes before it
        // releases them all through the sense flip.
        let arrived = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        debug_assert!(arrived <= self.parties, "more arrivals than parties");

        if arrived == self.parties {
            // The reset must land before the flip: a released peer may arrive again at once.
            self.count.store(0, Ordering::Relaxed);
            on_release();
            return self
                .state
                .compare_exchange(
                    sense_bits(!target),
                    sense_bits(target),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .map(|_| ())
                .map_err(|_| CollectiveError::Aborted);
        }

        self.wait_for(target)
    }

    fn wait_for(&self, target: bool) -> Result<()> {
        match self.wait {
            WaitStrategy::Spin => loop {
                if let Some(outcome) = self.poll(target) {
                    return outcome;
                }
                std::hint::spin_loop();
            },
            WaitStrategy::Backoff => {
                let backoff = Backoff::new();
                loop {
                    if let Some(outcome) = self.poll(target) {
                        return outcome;
                    }
                    backoff.snooze();
                }
            }
        }
    }

    /// Reads the shared state once. A published sense wins over an abort that came after it.
    #[inline]
    fn poll(&self, target: bool) -> Option<Result<()>> {
        let state = self.state.load(Ordering::Acquire);
        if state & SENSE == sense_bits(target) {
            Some(Ok(()))
        } else if state & ABORTED != 0 {
            Some(Err(CollectiveError::Aborted))
        } else {
            None
        }
    }

    /// Sets the abort flag. Returns `true` for the call that actually made the transition.
    ///
    /// The flag is sticky: there is no way to clear it.
    pub fn abort(&self) -> bool {
        let first = self.state.fetch_or(ABORTED, Ordering::AcqRel) & ABORTED == 0;
        if first {
            tracing::debug!(parties = self.parties, "barrier aborted");
        }
        first
    }

    pub fn is_aborted(&self) -> bool {
        self.state.load(Ordering::Acquire) & ABORTED != 0
    }
}
