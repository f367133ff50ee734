//! Lock-free one-value-per-node linked queue (`LLQueue`).
//!
//! Sentinel-headed singly linked list. A pop takes the value out of the
//! current head's node via `exchange`, then best-effort advances `head` to
//! the next node so the taken node can be retired.

use std::ptr;
use std::sync::atomic::{AtomicI64, AtomicPtr, Ordering};

use crate::hazard::HazardPointer;
use crate::queue::ConcurrentQueue;
use crate::value::{is_reserved, Value, EMPTY_VALUE};

struct LLNode {
    next: AtomicPtr<LLNode>,
    item: AtomicI64,
}

impl LLNode {
    fn new(item: Value) -> *mut Self {
        Box::into_raw(Box::new(LLNode {
            next: AtomicPtr::new(ptr::null_mut()),
            item: AtomicI64::new(item),
        }))
    }
}

/// Lock-free MPMC queue: one value per node, dummy sentinel head.
pub struct LLQueue {
    head: AtomicPtr<LLNode>,
    tail: AtomicPtr<LLNode>,
    hp: HazardPointer<LLNode>,
}

// SAFETY: all shared mutation goes through atomics and the hazard-pointer
// protocol; `Value` is `Copy` and carries no borrowed data.
unsafe impl Send for LLQueue {}
unsafe impl Sync for LLQueue {}

impl LLQueue {
    /// Creates an empty queue with a dummy sentinel node.
    pub fn new() -> Self {
        let node = LLNode::new(EMPTY_VALUE);
        LLQueue {
            head: AtomicPtr::new(node),
            tail: AtomicPtr::new(node),
            hp: HazardPointer::new(),
        }
    }

    /// Pushes `value`. `value` must not be `EMPTY_VALUE`/`TAKEN_VALUE`.
    pub fn push(&self, value: Value) {
        debug_assert!(
            !is_reserved(value),
            "LLQueue::push: value must not be a reserved sentinel"
        );
        let new_node = LLNode::new(value);
        loop {
            let expected_tail = self.hp.protect(&self.tail);
            match self.tail.compare_exchange(
                expected_tail,
                new_node,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    // SAFETY: `expected_tail` was just confirmed as the old
                    // tail and is still protected by our hazard slot.
                    unsafe { &*expected_tail }
                        .next
                        .store(new_node, Ordering::Release);
                    break;
                }
                Err(_) => continue,
            }
        }
        self.hp.clear();
    }

    /// Pops a value, or `EMPTY_VALUE` if the queue was observed empty.
    pub fn pop(&self) -> Value {
        let mut value = EMPTY_VALUE;
        loop {
            value = EMPTY_VALUE;
            let expected_head = self.hp.protect(&self.head);
            if expected_head != self.head.load(Ordering::Acquire) {
                continue;
            }
            // SAFETY: protected by the hazard pointer above.
            let head_ref = unsafe { &*expected_head };

            value = head_ref.item.swap(EMPTY_VALUE, Ordering::AcqRel);

            let next = head_ref.next.load(Ordering::Acquire);
            if !next.is_null() {
                if self
                    .head
                    .compare_exchange(expected_head, next, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.hp.retire(expected_head);
                }
                if value != EMPTY_VALUE {
                    break;
                }
                // Otherwise the cell we just swapped out was already empty;
                // keep going, there may be more nodes.
            } else {
                break;
            }
        }
        self.hp.clear();
        value
    }

    /// Heuristic emptiness check; not linearizable with concurrent `pop`.
    pub fn is_empty(&self) -> bool {
        loop {
            let expected_head = self.hp.protect(&self.head);
            if expected_head != self.head.load(Ordering::Acquire) {
                continue;
            }
            // SAFETY: protected by the hazard pointer above.
            let head_ref = unsafe { &*expected_head };

            let value = head_ref.item.load(Ordering::Acquire);
            if value != EMPTY_VALUE {
                self.hp.clear();
                return false;
            }

            let next = head_ref.next.load(Ordering::Acquire);
            if next.is_null() {
                self.hp.clear();
                return true;
            }
            if self
                .head
                .compare_exchange(expected_head, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.hp.retire(expected_head);
            }
        }
    }
}

impl ConcurrentQueue for LLQueue {
    fn push(&self, value: Value) {
        LLQueue::push(self, value)
    }

    fn pop(&self) -> Value {
        LLQueue::pop(self)
    }

    fn is_empty(&self) -> bool {
        LLQueue::is_empty(self)
    }
}

impl Default for LLQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LLQueue {
    fn drop(&mut self) {
        let mut current = *self.head.get_mut();
        while !current.is_null() {
            // SAFETY: queue is being torn down, caller guarantees
            // quiescence, so this is the last reference to each node.
            let node = unsafe { Box::from_raw(current) };
            current = *node.next.get_mut();
        }
    }
}
