//! Intrusive multi-producer/single-consumer FIFO queue.
//!
//! Vyukov-style: a stub node plus atomically swapped head/tail pointers. A
//! producer exchanges itself in as the new tail and then links the previous
//! tail's `next`, so the consumer only ever follows fully linked nodes. In
//! the window between the swap and the link a node is "in flight"; the
//! consumer reports that as [`PopError::Inconsistent`] ("try again"), which
//! is distinct from a truly empty queue.
//!
//! Nodes come from a [`BlockPool`] so steady-state push/pop never touches the
//! global allocator. A popped node goes straight back to the pool.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};
use std::sync::Arc;

use crate::pool::BlockPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    /// The backing node pool has no free blocks.
    #[error("submission queue node pool exhausted")]
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PopError {
    /// The queue is empty.
    #[error("submission queue is empty")]
    Empty,
    /// A producer is mid-push; the value will be visible shortly.
    #[error("submission queue push in flight, retry")]
    Inconsistent,
}

struct Node<T> {
    next: AtomicPtr<Node<T>>,
    /// Slot index in the backing pool, fixed at pool construction.
    pool_index: u32,
    value: Option<T>,
}

/// Unbounded-in-shape FIFO queue, bounded in practice by its node pool.
///
/// Any number of threads may call [`push`](Self::push) concurrently. Exactly
/// one thread may call [`pop`](Self::pop); the pipeline enforces this by
/// keeping the consumer side private to the render thread.
pub struct MpscQueue<T> {
    pool: Arc<BlockPool<Node<T>>>,
    /// Current stub; only the consumer advances it.
    head: AtomicPtr<Node<T>>,
    tail: AtomicPtr<Node<T>>,
    len: AtomicU32,
}

unsafe impl<T: Send> Send for MpscQueue<T> {}
unsafe impl<T: Send> Sync for MpscQueue<T> {}

impl<T> MpscQueue<T> {
    /// Creates a queue able to hold `capacity` values at once.
    ///
    /// One extra pool block is reserved internally for the stub node.
    pub fn new(capacity: u32) -> Self {
        let pool = Arc::new(BlockPool::new(capacity + 1, |i| Node {
            next: AtomicPtr::new(ptr::null_mut()),
            pool_index: i,
            value: None,
        }));

        let stub = pool
            .allocate()
            .expect("freshly built node pool cannot be exhausted");
        let (_, stub_index) = stub.into_raw();
        let stub_ptr = pool.slot_ptr(stub_index);
        unsafe {
            (*stub_ptr).next.store(ptr::null_mut(), Ordering::Relaxed);
            (*stub_ptr).value = None;
        }

        Self {
            pool,
            head: AtomicPtr::new(stub_ptr),
            tail: AtomicPtr::new(stub_ptr),
            len: AtomicU32::new(0),
        }
    }

    /// Enqueues `value`. Fails only when the node pool is exhausted, which
    /// callers treat as backpressure.
    pub fn push(&self, value: T) -> Result<(), PushError> {
        let Some(block) = self.pool.allocate() else {
            return Err(PushError::Exhausted);
        };
        let (_, index) = block.into_raw();
        let node = self.pool.slot_ptr(index);

        // The node is exclusively ours until the `next` store below makes it
        // reachable from the previous tail.
        unsafe {
            (*node).value = Some(value);
            (*node).next.store(ptr::null_mut(), Ordering::Relaxed);
        }

        let prev = self.tail.swap(node, Ordering::AcqRel);
        unsafe { (*prev).next.store(node, Ordering::Release) };

        self.len.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Dequeues the oldest value.
    ///
    /// Must only be called from the single consumer thread. A result of
    /// [`PopError::Inconsistent`] means a producer has swapped the tail but
    /// not yet linked its node; the consumer should retry rather than sleep.
    pub fn pop(&self) -> Result<T, PopError> {
        let head = self.head.load(Ordering::Relaxed);
        let next = unsafe { (*head).next.load(Ordering::Acquire) };

        if next.is_null() {
            return if head == self.tail.load(Ordering::Acquire) {
                Err(PopError::Empty)
            } else {
                Err(PopError::Inconsistent)
            };
        }

        // `next` is fully linked; it becomes the new stub and its value moves
        // out. The old stub goes back to the pool.
        let value = unsafe { (*next).value.take() };
        self.head.store(next, Ordering::Release);

        let old_index = unsafe { (*head).pool_index };
        unsafe { self.pool.reclaim(old_index) };
        self.len.fetch_sub(1, Ordering::Relaxed);

        Ok(value.expect("linked queue node published without a value"))
    }

    /// Number of queued values. Approximate under concurrent pushes.
    pub fn len_approx(&self) -> u32 {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty_approx(&self) -> bool {
        self.len_approx() == 0
    }
}

impl<T> Drop for MpscQueue<T> {
    fn drop(&mut self) {
        // No producers can be alive here (we hold `&mut self`), so drain
        // until genuinely empty and then retire the stub.
        while let Ok(value) = self.pop() {
            drop(value);
        }
        let stub = self.head.load(Ordering::Relaxed);
        unsafe { self.pool.reclaim((*stub).pool_index) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_within_a_single_producer() {
        let queue = MpscQueue::new(8);
        for i in 0..5u32 {
            queue.push(i).unwrap();
        }
        for i in 0..5u32 {
            assert_eq!(queue.pop(), Ok(i));
        }
        assert_eq!(queue.pop(), Err(PopError::Empty));
    }

    #[test]
    fn exhausted_pool_rejects_push_until_a_pop() {
        let queue = MpscQueue::new(2);
        queue.push(1u32).unwrap();
        queue.push(2u32).unwrap();
        assert_eq!(queue.push(3u32), Err(PushError::Exhausted));

        assert_eq!(queue.pop(), Ok(1));
        queue.push(3u32).unwrap();
        assert_eq!(queue.pop(), Ok(2));
        assert_eq!(queue.pop(), Ok(3));
    }

    #[test]
    fn values_survive_many_drain_cycles() {
        let queue = MpscQueue::new(4);
        for round in 0..100u32 {
            queue.push(round).unwrap();
            queue.push(round + 1).unwrap();
            assert_eq!(queue.pop(), Ok(round));
            assert_eq!(queue.pop(), Ok(round + 1));
        }
        assert!(queue.is_empty_approx());
    }

    #[test]
    fn per_producer_order_is_preserved_across_threads() {
        const PRODUCERS: u32 = 4;
        const PER_PRODUCER: u32 = 500;

        let queue = Arc::new(MpscQueue::new(PRODUCERS * PER_PRODUCER + 1));
        let mut threads = Vec::new();
        for p in 0..PRODUCERS {
            let queue = Arc::clone(&queue);
            threads.push(std::thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    queue.push(p * 100_000 + i).unwrap();
                }
            }));
        }
        for t in threads {
            t.join().expect("producer join");
        }

        let mut last_seen = vec![None::<u32>; PRODUCERS as usize];
        let mut total = 0;
        loop {
            match queue.pop() {
                Ok(value) => {
                    let producer = (value / 100_000) as usize;
                    let sequence = value % 100_000;
                    if let Some(prev) = last_seen[producer] {
                        assert!(sequence > prev, "producer {producer} reordered");
                    }
                    last_seen[producer] = Some(sequence);
                    total += 1;
                }
                Err(PopError::Inconsistent) => std::hint::spin_loop(),
                Err(PopError::Empty) => break,
            }
        }
        assert_eq!(total, PRODUCERS * PER_PRODUCER);
    }

    #[test]
    fn dropping_a_loaded_queue_releases_everything() {
        let queue = MpscQueue::new(4);
        queue.push(String::from("a")).unwrap();
        queue.push(String::from("b")).unwrap();
        drop(queue);
    }
}
