//! Concurrency and memory primitives for the ember deferred command pipeline.
//!
//! Everything in this crate is graphics-agnostic: a fixed-capacity block pool
//! with a lock-free free list, a multi-producer/single-consumer intrusive
//! queue that allocates its nodes from that pool, a counting semaphore used
//! for frame-in-flight backpressure, and a small stopwatch for per-frame
//! timing.

mod pool;
mod queue;
mod semaphore;
mod stopwatch;

pub use pool::{BlockPool, PooledBlock};
pub use queue::{MpscQueue, PopError, PushError};
pub use semaphore::Semaphore;
pub use stopwatch::Stopwatch;
