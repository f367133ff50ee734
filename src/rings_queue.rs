//! Mutex-guarded linked list of fixed-capacity ring buffers (`RingsQueue`).
//!
//! A comparison baseline against the lock-free queues. `push_mtx` serializes
//! producers and `pop_mtx` serializes consumers independently; the two
//! never block each other, bridged only by each node's atomic `free_slots`
//! counter, matching the source's two-mutex design exactly (bundling
//! head/tail behind one shared lock would remove the very concurrency this
//! queue exists to contrast against the single-lock [`crate::SimpleQueue`]).

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::queue::ConcurrentQueue;
use crate::value::{is_reserved, Value, EMPTY_VALUE};

/// Default per-node ring capacity.
pub const DEFAULT_RING_SIZE: usize = 1024;

struct RingsQueueNode<const RING_SIZE: usize> {
    next: AtomicPtr<RingsQueueNode<RING_SIZE>>,
    buffer: [Value; RING_SIZE],
    push_idx: usize,
    pop_idx: usize,
    free_slots: AtomicUsize,
}

impl<const RING_SIZE: usize> RingsQueueNode<RING_SIZE> {
    fn new() -> *mut Self {
        Box::into_raw(Box::new(RingsQueueNode {
            next: AtomicPtr::new(ptr::null_mut()),
            buffer: [EMPTY_VALUE; RING_SIZE],
            push_idx: 0,
            pop_idx: 0,
            free_slots: AtomicUsize::new(RING_SIZE),
        }))
    }

    fn new_with_value(value: Value) -> *mut Self {
        let mut buffer = [EMPTY_VALUE; RING_SIZE];
        buffer[0] = value;
        Box::into_raw(Box::new(RingsQueueNode {
            next: AtomicPtr::new(ptr::null_mut()),
            buffer,
            push_idx: 1,
            pop_idx: 0,
            free_slots: AtomicUsize::new(RING_SIZE - 1),
        }))
    }

    /// Writes `value` into the next push slot. Only ever called by the
    /// `push_mtx` holder.
    fn push_value(&mut self, value: Value) {
        self.buffer[self.push_idx] = value;
        self.push_idx = (self.push_idx + 1) % RING_SIZE;
        self.free_slots.fetch_sub(1, Ordering::AcqRel);
    }

    /// Reads the next pop slot. Only ever called by the `pop_mtx` holder.
    fn pop_value(&mut self) -> Value {
        let value = self.buffer[self.pop_idx];
        self.pop_idx = (self.pop_idx + 1) % RING_SIZE;
        self.free_slots.fetch_add(1, Ordering::AcqRel);
        value
    }
}

/// Mutex-based MPMC queue: linked list of fixed `RING_SIZE` ring buffers.
pub struct RingsQueue<const RING_SIZE: usize = DEFAULT_RING_SIZE> {
    head: Mutex<*mut RingsQueueNode<RING_SIZE>>,
    tail: Mutex<*mut RingsQueueNode<RING_SIZE>>,
}

// SAFETY: `head` is only ever read/written by whoever holds `head`'s mutex,
// `tail` only by whoever holds `tail`'s mutex. The two sides only share a
// node's `free_slots` (atomic) and `next` (atomic) fields, and every other
// field a given node exposes is touched by exactly one of the two lock
// holders (push_idx/buffer writes under push_mtx, pop_idx/buffer reads
// under pop_mtx), the same division of labor as the two-mutex source.
unsafe impl<const RING_SIZE: usize> Send for RingsQueue<RING_SIZE> {}
unsafe impl<const RING_SIZE: usize> Sync for RingsQueue<RING_SIZE> {}

impl<const RING_SIZE: usize> RingsQueue<RING_SIZE> {
    /// Creates an empty queue with a single ring-buffer node.
    pub fn new() -> Self {
        let node = RingsQueueNode::new();
        RingsQueue {
            head: Mutex::new(node),
            tail: Mutex::new(node),
        }
    }

    /// Pushes `value`. `value` must not be `EMPTY_VALUE`/`TAKEN_VALUE`.
    pub fn push(&self, value: Value) {
        debug_assert!(
            !is_reserved(value),
            "RingsQueue::push: value must not be a reserved sentinel"
        );
        let mut tail = self.tail.lock().expect("RingsQueue push_mtx poisoned");
        // SAFETY: only the `tail` lock holder ever dereferences `*tail`
        // mutably, and this node is never freed while it can still be tail
        // (only `pop` frees nodes, and only ones strictly before the tail).
        let tail_ref = unsafe { &mut **tail };

        if tail_ref.free_slots.load(Ordering::Acquire) > 0 {
            tail_ref.push_value(value);
        } else {
            let new_tail = RingsQueueNode::new_with_value(value);
            tail_ref.next.store(new_tail, Ordering::Release);
            *tail = new_tail;
        }
    }

    /// Pops a value, or `EMPTY_VALUE` if the queue was observed empty.
    pub fn pop(&self) -> Value {
        let mut head = self.head.lock().expect("RingsQueue pop_mtx poisoned");
        // SAFETY: only the `head` lock holder ever dereferences `*head`.
        let head_ref = unsafe { &mut **head };

        let next = head_ref.next.load(Ordering::Acquire);
        if !next.is_null() && head_ref.free_slots.load(Ordering::Acquire) == RING_SIZE {
            // SAFETY: `head_ref` is fully drained and has a successor; no
            // one else holds a reference to it (the tail side never points
            // back at a non-tail node), so we may free it and advance.
            unsafe {
                drop(Box::from_raw(*head));
            }
            *head = next;
            let new_head_ref = unsafe { &mut **head };
            new_head_ref.pop_value()
        } else if head_ref.free_slots.load(Ordering::Acquire) < RING_SIZE {
            head_ref.pop_value()
        } else {
            EMPTY_VALUE
        }
    }

    /// Heuristic emptiness check; not linearizable with concurrent `pop`.
    pub fn is_empty(&self) -> bool {
        let head = self.head.lock().expect("RingsQueue pop_mtx poisoned");
        // SAFETY: held under the pop-side lock, same access pattern as `pop`.
        let head_ref = unsafe { &**head };
        head_ref.free_slots.load(Ordering::Acquire) == RING_SIZE
            && head_ref.next.load(Ordering::Acquire).is_null()
    }
}

impl<const RING_SIZE: usize> ConcurrentQueue for RingsQueue<RING_SIZE> {
    fn push(&self, value: Value) {
        RingsQueue::push(self, value)
    }

    fn pop(&self) -> Value {
        RingsQueue::pop(self)
    }

    fn is_empty(&self) -> bool {
        RingsQueue::is_empty(self)
    }
}

impl<const RING_SIZE: usize> Default for RingsQueue<RING_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const RING_SIZE: usize> Drop for RingsQueue<RING_SIZE> {
    fn drop(&mut self) {
        // Caller guarantees quiescence; both locks are irrelevant here, we
        // own the only references left.
        let mut current = *self.head.get_mut().expect("RingsQueue pop_mtx poisoned");
        while !current.is_null() {
            // SAFETY: teardown, no concurrent access, each node owned once.
            let node = unsafe { Box::from_raw(current) };
            current = node.next.load(Ordering::Acquire);
        }
    }
}
