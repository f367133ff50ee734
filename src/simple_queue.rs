//! Mutex-guarded two-lock Michael-Scott queue (`SimpleQueue`).
//!
//! The simplest of the four comparison baselines: a sentinel-headed linked
//! list with `head_mtx` and `tail_mtx` guarding head and tail independently,
//! so a push and a pop never contend on the same lock.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Mutex;

use crate::queue::ConcurrentQueue;
use crate::value::{is_reserved, Value, EMPTY_VALUE};

struct SimpleQueueNode {
    next: AtomicPtr<SimpleQueueNode>,
    item: Value,
}

impl SimpleQueueNode {
    fn new(item: Value) -> *mut Self {
        Box::into_raw(Box::new(SimpleQueueNode {
            next: AtomicPtr::new(ptr::null_mut()),
            item,
        }))
    }
}

/// Mutex-based MPMC queue: sentinel-headed linked list, independent
/// head/tail locks.
pub struct SimpleQueue {
    head: Mutex<*mut SimpleQueueNode>,
    tail: Mutex<*mut SimpleQueueNode>,
}

// SAFETY: `head` is only read/written by whoever holds `head_mtx`, `tail`
// only by whoever holds `tail_mtx`. The two sides share a node only via its
// atomic `next` field, written once (under `tail_mtx`, by the push that
// appends the node after it) and read under `head_mtx`.
unsafe impl Send for SimpleQueue {}
unsafe impl Sync for SimpleQueue {}

impl SimpleQueue {
    /// Creates an empty queue with a dummy sentinel node.
    pub fn new() -> Self {
        let node = SimpleQueueNode::new(EMPTY_VALUE);
        SimpleQueue {
            head: Mutex::new(node),
            tail: Mutex::new(node),
        }
    }

    /// Pushes `value`. `value` must not be `EMPTY_VALUE`/`TAKEN_VALUE`.
    pub fn push(&self, value: Value) {
        debug_assert!(
            !is_reserved(value),
            "SimpleQueue::push: value must not be a reserved sentinel"
        );
        let new_node = SimpleQueueNode::new(value);

        let mut tail = self.tail.lock().expect("SimpleQueue tail_mtx poisoned");
        // SAFETY: only the `tail_mtx` holder ever stores into `(*tail).next`.
        unsafe { &**tail }.next.store(new_node, Ordering::Release);
        *tail = new_node;
    }

    /// Pops a value, or `EMPTY_VALUE` if the queue was observed empty.
    pub fn pop(&self) -> Value {
        let mut head = self.head.lock().expect("SimpleQueue head_mtx poisoned");
        let old_head = *head;
        // SAFETY: `old_head` is protected by `head_mtx`; its `next` is the
        // one field the push side publishes with `Release`.
        let new_head = unsafe { &*old_head }.next.load(Ordering::Acquire);

        if new_head.is_null() {
            return EMPTY_VALUE;
        }

        // SAFETY: `new_head` was just linked by a push and is never freed
        // while reachable from `head`.
        let value = unsafe { &*new_head }.item;
        *head = new_head;
        drop(head);

        // SAFETY: `old_head` is no longer reachable from `head` or `tail`
        // (the old sentinel is replaced above, and a node is only ever
        // `tail` if it is also reachable forward from `head`), and no other
        // thread holds a raw pointer to it, so we may free it.
        unsafe {
            drop(Box::from_raw(old_head));
        }
        value
    }

    /// Heuristic emptiness check; not linearizable with concurrent `pop`.
    pub fn is_empty(&self) -> bool {
        let head = self.head.lock().expect("SimpleQueue head_mtx poisoned");
        // SAFETY: protected by `head_mtx`, same access pattern as `pop`.
        unsafe { &**head }.next.load(Ordering::Acquire).is_null()
    }
}

impl ConcurrentQueue for SimpleQueue {
    fn push(&self, value: Value) {
        SimpleQueue::push(self, value)
    }

    fn pop(&self) -> Value {
        SimpleQueue::pop(self)
    }

    fn is_empty(&self) -> bool {
        SimpleQueue::is_empty(self)
    }
}

impl Default for SimpleQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SimpleQueue {
    fn drop(&mut self) {
        // Caller guarantees quiescence; both locks are irrelevant here, we
        // own the only references left.
        let mut current = *self.head.get_mut().expect("SimpleQueue head_mtx poisoned");
        while !current.is_null() {
            // SAFETY: teardown, no concurrent access, each node owned once.
            let node = unsafe { Box::from_raw(current) };
            current = node.next.load(Ordering::Acquire);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn s1_single_thread_fifo() {
        let queue = SimpleQueue::new();
        for v in 1..=5 {
            queue.push(v);
        }
        for v in 1..=5 {
            assert_eq!(queue.pop(), v);
        }
        assert_eq!(queue.pop(), EMPTY_VALUE);
        assert!(queue.is_empty());
    }

    #[test]
    fn s2_interleaved_spsc() {
        let queue = SimpleQueue::new();
        for v in 10..10_010 {
            queue.push(v);
        }
        let mut popped = Vec::new();
        while popped.len() < 10_000 {
            let v = queue.pop();
            if v != EMPTY_VALUE {
                popped.push(v);
            }
        }
        let expected: Vec<Value> = (10..10_010).collect();
        assert_eq!(popped, expected);
    }

    #[test]
    fn is_empty_soundness() {
        let queue = SimpleQueue::new();
        assert!(queue.is_empty());
        queue.push(1);
        assert!(!queue.is_empty());
        assert_eq!(queue.pop(), 1);
        assert!(queue.is_empty());
        assert_eq!(queue.pop(), EMPTY_VALUE);
    }

    #[test]
    fn s3_mpmc_conservation() {
        const PRODUCERS: i64 = 4;
        const PER_PRODUCER: i64 = 2_500;
        const CONSUMERS: usize = 4;
        const TOTAL: usize = (PRODUCERS as usize) * (PER_PRODUCER as usize);

        let queue = Arc::new(SimpleQueue::new());

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    let base = p * PER_PRODUCER;
                    for i in 0..PER_PRODUCER {
                        queue.push(base + i);
                    }
                })
            })
            .collect();

        let popped: Arc<std::sync::Mutex<Vec<Value>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let popped = Arc::clone(&popped);
                std::thread::spawn(move || loop {
                    if popped.lock().unwrap().len() >= TOTAL {
                        return;
                    }
                    let v = queue.pop();
                    if v != EMPTY_VALUE {
                        popped.lock().unwrap().push(v);
                    }
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        for c in consumers {
            c.join().unwrap();
        }

        let popped = popped.lock().unwrap();
        assert_eq!(popped.len(), TOTAL);
        let unique: HashSet<Value> = popped.iter().copied().collect();
        assert_eq!(unique.len(), TOTAL, "no duplicates expected");
    }

    #[test]
    fn s4_empty_under_contention() {
        use std::sync::atomic::AtomicBool;
        use std::time::{Duration, Instant};

        const THREADS: usize = 8;
        let queue = Arc::new(SimpleQueue::new());
        let stop = Arc::new(AtomicBool::new(false));

        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let stop = Arc::clone(&stop);
                std::thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        queue.push(1);
                        let _ = queue.pop();
                    }
                })
            })
            .collect();

        // Scaled down from spec.md's 1s to keep the suite fast; long enough
        // to put all 8 threads in tight contention on the same value.
        let deadline = Instant::now() + Duration::from_millis(200);
        while Instant::now() < deadline {
            std::thread::yield_now();
        }
        stop.store(true, Ordering::Relaxed);
        for w in workers {
            w.join().unwrap();
        }

        // Quiescent now: once `is_empty` observes true, a pop must return
        // EMPTY_VALUE until another push happens. No thread is pushing
        // anymore, so this exercises property 4 directly.
        while !queue.is_empty() {
            queue.pop();
        }
        assert!(queue.is_empty());
        assert_eq!(queue.pop(), EMPTY_VALUE);
    }
}
