//! Common shape shared by all four queues, so the CLI demo, benches, and
//! cross-queue property tests can be generic over which implementation they
//! drive instead of four copy-pasted call sites.

use crate::value::Value;

/// The operations every queue in this crate exposes identically.
///
/// `new()` and teardown are intentionally not part of this trait: `new()`'s
/// const-generic parameters (`BUFFER_SIZE`, `RING_SIZE`) differ per queue
/// type, and teardown is just `Drop`.
pub trait ConcurrentQueue: Send + Sync {
    /// Pushes `value`. `value` must not be a reserved sentinel.
    fn push(&self, value: Value);

    /// Pops and returns a value, or `EMPTY_VALUE` if the queue was observed
    /// empty.
    fn pop(&self) -> Value;

    /// Heuristic emptiness check; not linearizable with concurrent `pop`.
    fn is_empty(&self) -> bool;
}
