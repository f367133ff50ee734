//! Hazard-pointer safe memory reclamation substrate shared by the lock-free
//! queues ([`crate::BLQueue`], [`crate::LLQueue`]).
//!
//! Each participating thread registers a dense id in `[0, num_threads)`
//! once (via [`register`]) before touching any queue. A [`HazardPointer<N>`]
//! then gives that thread a single slot to announce "I am currently
//! dereferencing this node; do not free it" (`protect`/`clear`), plus a
//! private retired list that gets swept (`scan`) once it grows past
//! [`RETIRED_THRESHOLD`].

use std::cell::{Cell, UnsafeCell};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crossbeam_utils::CachePadded;

/// Upper bound on concurrently registered threads.
pub const MAX_THREADS: usize = 128;

/// Retired-list length at which a thread's next `retire` triggers a scan.
pub const RETIRED_THRESHOLD: usize = MAX_THREADS;

#[derive(Clone, Copy)]
struct ThreadContext {
    thread_id: usize,
    num_threads: usize,
}

thread_local! {
    static THREAD_CONTEXT: Cell<Option<ThreadContext>> = const { Cell::new(None) };
}

/// Associates the calling thread with `thread_id` for the lifetime of the
/// thread. Must be called exactly once per participating thread before it
/// calls `protect`/`clear`/`retire` on any [`HazardPointer`].
pub fn register(thread_id: usize, num_threads: usize) {
    assert!(
        thread_id < num_threads,
        "hazard::register: thread_id {thread_id} must be < num_threads {num_threads}"
    );
    assert!(
        num_threads <= MAX_THREADS,
        "hazard::register: num_threads {num_threads} exceeds MAX_THREADS {MAX_THREADS}"
    );
    THREAD_CONTEXT.with(|cell| {
        cell.set(Some(ThreadContext {
            thread_id,
            num_threads,
        }))
    });
}

fn current_context() -> ThreadContext {
    THREAD_CONTEXT.with(|cell| {
        cell.get()
            .expect("hazard: thread touched a queue without calling hazard::register first")
    })
}

/// Per-queue hazard-pointer registry protecting pointers to nodes of type
/// `N`. Each queue embeds its own instance, matching the source's one
/// `HazardPointer` field per queue struct.
pub struct HazardPointer<N> {
    protected: Box<[CachePadded<AtomicPtr<N>>]>,
    // SAFETY invariant relied on throughout this module: `retired[i]` is
    // written only by the thread registered with id `i`. Other threads only
    // ever read `protected[i]` (never `retired[i]`), so the `UnsafeCell`
    // here never has two live mutable borrows from different threads.
    retired: Box<[UnsafeCell<Vec<*mut N>>]>,
}

// SAFETY: see the field comment on `retired` above. `protected` is a plain
// array of atomics, always safe to share.
unsafe impl<N> Send for HazardPointer<N> {}
unsafe impl<N> Sync for HazardPointer<N> {}

impl<N> HazardPointer<N> {
    /// Allocates a fresh hazard-pointer registry with `MAX_THREADS` empty
    /// slots and `MAX_THREADS` empty retired lists.
    pub fn new() -> Self {
        let protected = (0..MAX_THREADS)
            .map(|_| CachePadded::new(AtomicPtr::new(ptr::null_mut())))
            .collect();
        let retired = (0..MAX_THREADS).map(|_| UnsafeCell::new(Vec::new())).collect();
        HazardPointer { protected, retired }
    }

    /// Stabilizes the pointer currently stored in `source`: loads it,
    /// announces it in this thread's slot, then re-loads `source` and
    /// retries until the two reads agree. On return, the result will not be
    /// freed by any retirer until this thread clears or overwrites its slot.
    pub fn protect(&self, source: &AtomicPtr<N>) -> *mut N {
        let thread_id = current_context().thread_id;
        loop {
            let candidate = source.load(Ordering::Acquire);
            self.protected[thread_id].store(candidate, Ordering::SeqCst);
            if source.load(Ordering::Acquire) == candidate {
                return candidate;
            }
        }
    }

    /// Releases this thread's hazard slot.
    pub fn clear(&self) {
        let thread_id = current_context().thread_id;
        self.protected[thread_id].store(ptr::null_mut(), Ordering::Release);
    }

    /// Appends `ptr` to this thread's retired list. `ptr` must be uniquely
    /// owned by the caller: each node may be retired at most once across
    /// all threads. Triggers a scan once the list reaches
    /// [`RETIRED_THRESHOLD`].
    pub fn retire(&self, ptr: *mut N) {
        let thread_id = current_context().thread_id;
        // SAFETY: only this thread ever mutates `retired[thread_id]`.
        let list = unsafe { &mut *self.retired[thread_id].get() };
        list.push(ptr);
        if list.len() >= RETIRED_THRESHOLD {
            self.scan(thread_id);
        }
    }

    /// Walks this thread's retired list; frees every entry not currently
    /// protected by any registered thread's hazard slot, keeps the rest.
    /// O(retired_size * num_threads).
    fn scan(&self, thread_id: usize) {
        let num_threads = current_context().num_threads;
        // SAFETY: only this thread ever mutates `retired[thread_id]`.
        let list = unsafe { &mut *self.retired[thread_id].get() };
        let mut still_retired = Vec::with_capacity(list.len());
        for ptr in list.drain(..) {
            let hazardous = (0..num_threads)
                .any(|j| self.protected[j].load(Ordering::Acquire) == ptr);
            if hazardous {
                still_retired.push(ptr);
            } else {
                // SAFETY: not protected by any thread, and retired at most
                // once (caller contract of `retire`), so this is the unique
                // owner reclaiming it.
                unsafe {
                    drop(Box::from_raw(ptr));
                }
            }
        }
        *list = still_retired;
    }
}

impl<N> Default for HazardPointer<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl<N> HazardPointer<N> {
    /// Test-only introspection: length of the calling thread's retired list.
    pub(crate) fn retired_len_for_current_thread(&self) -> usize {
        let thread_id = current_context().thread_id;
        // SAFETY: test-only, single-threaded call sites.
        unsafe { &*self.retired[thread_id].get() }.len()
    }
}

/// Finalizes the registry: frees every pointer still on every thread's
/// retired list unconditionally. Callers (queue `Drop` impls) must ensure
/// no concurrent activity remains by this point.
impl<N> Drop for HazardPointer<N> {
    fn drop(&mut self) {
        for slot in self.retired.iter() {
            // SAFETY: queue teardown is quiescent; no other thread can be
            // concurrently retiring into or scanning this list.
            let list = unsafe { &mut *slot.get() };
            for ptr in list.drain(..) {
                unsafe {
                    drop(Box::from_raw(ptr));
                }
            }
        }
    }
}
