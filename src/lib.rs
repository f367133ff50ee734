//! Four concurrent MPMC FIFO queues over a shared `Value = i64` alphabet,
//! plus the hazard-pointer safe memory reclamation substrate the two
//! lock-free variants depend on.
//!
//! | Queue | Discipline |
//! |---|---|
//! | [`BLQueue`] | lock-free, linked list of fixed-size buffer nodes |
//! | [`LLQueue`] | lock-free, one value per linked node |
//! | [`RingsQueue`] | mutex-guarded, linked list of fixed-capacity rings |
//! | [`SimpleQueue`] | mutex-guarded, two-lock Michael-Scott queue |
//!
//! `BLQueue` and `LLQueue` reclaim nodes through [`hazard`]; a thread must
//! call [`hazard::register`] once before it touches either of them.
//! `RingsQueue` and `SimpleQueue` need no such registration.

pub mod bl_queue;
pub mod hazard;
pub mod ll_queue;
pub mod queue;
pub mod rings_queue;
pub mod simple_queue;
pub mod value;

pub use bl_queue::BLQueue;
pub use ll_queue::LLQueue;
pub use queue::ConcurrentQueue;
pub use rings_queue::RingsQueue;
pub use simple_queue::SimpleQueue;
pub use value::{is_reserved, Value, EMPTY_VALUE, TAKEN_VALUE};
