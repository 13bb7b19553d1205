//! Shared handle registry.
//!
//! One slot per rank. During a collective call each rank writes the location of its buffer into
//! its own slot, and after the phase-1 barrier any rank may read any slot in place. The registry
//! never owns the memory behind a slot; it only remembers where a caller's buffer lives for the
//! duration of one call.
//!
//! Reads go through a [`PublishedView`], which can only be created by a caller that has
//! completed the phase-1 barrier of the current call. The slices a view hands out borrow the
//! view, so the borrow checker guarantees they are gone before the phase-2 barrier is entered.
//!
//! The registry also counts the ranks still inside the read window. The window is opened for all
//! ranks at once by the last phase-1 arriver and each view closes its own share when dropped. A
//! rank whose phase-2 wait is aborted calls [`HandleRegistry::wait_for_readers`] before handing
//! its buffer back to the caller, so no peer can still be reading it.

use crossbeam::utils::{Backoff, CachePadded};
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

#[derive(Debug)]
struct Slot<T> {
    ptr: AtomicPtr<T>,
    len: AtomicUsize,
}

impl<T> Slot<T> {
    fn empty() -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
            len: AtomicUsize::new(0),
        }
    }
}

/// Per-rank buffer locations for the collective call in flight.
///
/// Slot accesses are `Relaxed`: the barrier passes around them provide all the ordering.
#[derive(Debug)]
pub struct HandleRegistry<T> {
    slots: Box<[CachePadded<Slot<T>>]>,
    readers: CachePadded<AtomicUsize>,
}

impl<T: Sync> HandleRegistry<T> {
    pub fn new(world_size: usize) -> Self {
        Self {
            slots: (0..world_size)
                .map(|_| CachePadded::new(Slot::empty()))
                .collect(),
            readers: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    pub fn world_size(&self) -> usize {
        self.slots.len()
    }

    /// Records where `rank`'s buffer lives for the current call.
    ///
    /// Must be called only by the thread that owns `rank`, before its phase-1 arrival, and
    /// the buffer must stay alive and unmodified by its owner until its phase-2 arrival.
    ///
    /// # Panics
    ///
    /// Panics if `rank >= world_size`.
    pub fn publish(&self, rank: usize, buffer: &[T]) {
        let slot = &self.slots[rank];
        slot.ptr.store(buffer.as_ptr().cast_mut(), Ordering::Relaxed);
        slot.len.store(buffer.len(), Ordering::Relaxed);
    }

    /// Marks every rank as inside the read window.
    ///
    /// Called once per collective call by the last phase-1 arriver, before it releases the others.
    pub fn open_read_window(&self) {
        self.readers.store(self.world_size(), Ordering::Relaxed);
    }

    /// Number of ranks that have not yet dropped their view for the current call.
    pub fn readers(&self) -> usize {
        self.readers.load(Ordering::Acquire)
    }

    /// Spins until every rank has left the read window.
    ///
    /// Only meaningful after the read window of the current call was opened. Bounded: readers run
    /// no user code between phase 1 and dropping their view.
    pub fn wait_for_readers(&self) {
        let backoff = Backoff::new();
        while self.readers() != 0 {
            backoff.snooze();
        }
    }

    /// Opens the registry for reading.
    ///
    /// # Safety
    ///
    /// The caller must have completed (with `Ok`) the phase-1 barrier pass of the current call,
    /// whose last arriver called [`open_read_window`](Self::open_read_window). Each rank must
    /// create exactly one view per such call and drop it before arriving at the phase-2 barrier.
    /// Every rank must have published during this call.
    pub unsafe fn view(&self) -> PublishedView<'_, T> {
        PublishedView {
            registry: self,
            _not_send: PhantomData,
        }
    }
}

/// Read access to every published slot, valid between the two barrier passes of one call.
///
/// Dropping the view (also during unwinding) leaves the read window.
#[derive(Debug)]
pub struct PublishedView<'a, T> {
    registry: &'a HandleRegistry<T>,
    // Views are tied to the phase the creating thread is in; they must not leave it.
    _not_send: PhantomData<*const ()>,
}

impl<T: Sync> PublishedView<'_, T> {
    pub fn world_size(&self) -> usize {
        self.registry.world_size()
    }

    /// Length of the buffer published by `rank`.
    pub fn len_of(&self, rank: usize) -> usize {
        self.registry.slots[rank].len.load(Ordering::Relaxed)
    }

    /// The buffer published by `rank`, read in place.
    pub fn slot(&self, rank: usize) -> &[T] {
        let slot = &self.registry.slots[rank];
        let ptr = slot.ptr.load(Ordering::Relaxed);
        let len = slot.len.load(Ordering::Relaxed);
        if ptr.is_null() {
            return &[];
        }
        // SAFETY: the view exists only between phase 1 and phase 2 of a call, so the owner
        // published `ptr`/`len` from a live slice and will not write to it or free it until it
        // arrives at phase 2, which cannot complete while this borrow of the view is alive. An
        // aborted phase 2 returns only after every view, this one included, has been dropped.
        unsafe { std::slice::from_raw_parts(ptr, len) }
    }

    /// Every published buffer in ascending rank order.
    pub fn slots(&self) -> impl Iterator<Item = &[T]> + '_ {
        (0..self.world_size()).map(move |rank| self.slot(rank))
    }

    /// Returns the first rank whose buffer length differs from `expected`.
    pub fn find_len_mismatch(&self, expected: usize) -> Option<(usize, usize)> {
        (0..self.world_size())
            .map(|rank| (rank, self.len_of(rank)))
            .find(|&(_, len)| len != expected)
    }
}

impl<T> Drop for PublishedView<'_, T> {
    fn drop(&mut self) {
        // Release: our reads of peer buffers happen-before a waiter observing the decrement.
        let previous = self.registry.readers.fetch_sub(1, Ordering::Release);
        debug_assert!(previous > 0, "read window closed more times than opened");
    }
}
