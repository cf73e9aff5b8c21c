//! Fixed-capacity block pool with a lock-free free list.
//!
//! All blocks are created up front; steady-state allocate/free never touches
//! the global allocator. The free list is a Treiber stack of slot indices.
//! The head packs a generation counter next to the index so a pop is a single
//! compare-exchange without the ABA problem.
//!
//! Blocks are handed out as owning [`PooledBlock`] handles that return the
//! slot to the free list on drop. Ownership makes double-free and freeing a
//! foreign block unrepresentable, which is the job pointer validation did in
//! less fortunate languages.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Sentinel index marking the end of the free list.
const NIL: u32 = u32::MAX;

struct Slot<T> {
    /// Next slot in the free list. Only meaningful while the slot is free.
    next_free: AtomicU32,
    value: UnsafeCell<T>,
}

/// A pool of `capacity` preallocated blocks of `T`.
///
/// `allocate` may be called from any thread; blocks may be freed (dropped)
/// from any thread. The pool is always used behind an [`Arc`] so an
/// outstanding block can outlive the scope that allocated it.
pub struct BlockPool<T> {
    slots: Box<[Slot<T>]>,
    /// Packed `{generation:u32, head_index:u32}`.
    head: AtomicU64,
    allocated: AtomicU32,
}

// Slots are only ever accessed by the unique owner of their `PooledBlock`,
// so the pool is as thread-safe as `T` is sendable.
unsafe impl<T: Send> Send for BlockPool<T> {}
unsafe impl<T: Send> Sync for BlockPool<T> {}

impl<T> BlockPool<T> {
    /// Creates a pool of `capacity` blocks, initializing each slot with
    /// `init(slot_index)`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0 or does not fit the index encoding.
    pub fn new(capacity: u32, mut init: impl FnMut(u32) -> T) -> Self {
        assert!(capacity > 0, "block pool needs at least one block");
        assert!(capacity < NIL, "block pool capacity out of range");

        let slots: Box<[Slot<T>]> = (0..capacity)
            .map(|i| Slot {
                // Thread every slot onto the free list: 0 -> 1 -> .. -> NIL.
                next_free: AtomicU32::new(if i + 1 == capacity { NIL } else { i + 1 }),
                value: UnsafeCell::new(init(i)),
            })
            .collect();

        Self {
            slots,
            head: AtomicU64::new(pack(0, 0)),
            allocated: AtomicU32::new(0),
        }
    }

    /// Pops a free block, or `None` when the pool is exhausted.
    ///
    /// Exhaustion is backpressure, not an error: callers poll or retry once a
    /// block has been returned.
    pub fn allocate(self: &Arc<Self>) -> Option<PooledBlock<T>> {
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            let (generation, index) = unpack(head);
            if index == NIL {
                return None;
            }

            let next = self.slots[index as usize].next_free.load(Ordering::Acquire);
            let new_head = pack(generation.wrapping_add(1), next);
            match self
                .head
                .compare_exchange_weak(head, new_head, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    self.allocated.fetch_add(1, Ordering::Relaxed);
                    return Some(PooledBlock {
                        pool: Arc::clone(self),
                        index,
                    });
                }
                Err(current) => head = current,
            }
        }
    }

    /// Number of blocks currently handed out.
    pub fn blocks_allocated(&self) -> u32 {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Total number of blocks the pool was built with.
    pub fn block_capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn is_exhausted(&self) -> bool {
        let (_, index) = unpack(self.head.load(Ordering::Acquire));
        index == NIL
    }

    /// Raw pointer to the value in `index`. The caller must own the slot.
    pub(crate) fn slot_ptr(&self, index: u32) -> *mut T {
        self.slots[index as usize].value.get()
    }

    /// Links `index` back onto the free list.
    ///
    /// # Safety
    ///
    /// `index` must have been obtained from `allocate` on this pool and must
    /// not be used again after this call.
    pub(crate) unsafe fn reclaim(&self, index: u32) {
        debug_assert!((index as usize) < self.slots.len());

        let mut head = self.head.load(Ordering::Acquire);
        loop {
            let (generation, current) = unpack(head);
            self.slots[index as usize]
                .next_free
                .store(current, Ordering::Relaxed);
            let new_head = pack(generation.wrapping_add(1), index);
            match self
                .head
                .compare_exchange_weak(head, new_head, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(current) => head = current,
            }
        }
        self.allocated.fetch_sub(1, Ordering::Relaxed);
    }
}

fn pack(generation: u32, index: u32) -> u64 {
    (u64::from(generation) << 32) | u64::from(index)
}

fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

/// Owning handle to one allocated block. Returns the block to the pool on
/// drop.
pub struct PooledBlock<T> {
    pool: Arc<BlockPool<T>>,
    index: u32,
}

unsafe impl<T: Send> Send for PooledBlock<T> {}
unsafe impl<T: Send + Sync> Sync for PooledBlock<T> {}

impl<T> PooledBlock<T> {
    /// Slot index inside the owning pool.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Releases ownership without freeing the slot, returning the pool and
    /// slot index. Pair with [`PooledBlock::from_raw`] or
    /// [`BlockPool::reclaim`] to avoid leaking the block.
    pub(crate) fn into_raw(self) -> (Arc<BlockPool<T>>, u32) {
        let pool = Arc::clone(&self.pool);
        let index = self.index;
        std::mem::forget(self);
        (pool, index)
    }

    /// Reassembles a handle from parts produced by [`PooledBlock::into_raw`].
    ///
    /// # Safety
    ///
    /// `index` must denote a currently allocated slot of `pool` with no other
    /// live handle.
    pub(crate) unsafe fn from_raw(pool: Arc<BlockPool<T>>, index: u32) -> Self {
        Self { pool, index }
    }
}

impl<T> Deref for PooledBlock<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // The handle is the unique owner of the slot.
        unsafe { &*self.pool.slot_ptr(self.index) }
    }
}

impl<T> DerefMut for PooledBlock<T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.pool.slot_ptr(self.index) }
    }
}

impl<T> Drop for PooledBlock<T> {
    fn drop(&mut self) {
        unsafe { self.pool.reclaim(self.index) };
    }
}
