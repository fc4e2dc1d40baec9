// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel's global allocators: one fixed-block pool and one heap.
//!
//! The mechanisms live in the `pool` and `heap` crates as plain `&mut`
//! structures; this module owns the single instance of each, backed by
//! named statics, and brackets every operation with the interrupt guard so
//! tasks and (hypothetically) handlers can't interleave a list splice.
//!
//! Contract, not enforced at compile time: timer callbacks and peripheral
//! hooks must **not** allocate. The guard makes a violation survivable but
//! the latency cost is real.
//!
//! Freeing a pointer that was never allocated here is an invariant
//! violation, not an error: the allocator leaves its state untouched and
//! one line goes to the log sink.

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use heap::{Heap, HeapError};
use pool::{NoBlock, Pool};

use crate::arch::InterruptGuard;
use crate::cell::KCell;
use crate::config::{HEAP_SIZE, POOL_BLOCK_COUNT, POOL_BLOCK_SIZE};

/// Backing stores, as named statics so they're easy to find in a dump.
struct Backing<const N: usize>(UnsafeCell<[u8; N]>);

// Safety: handed out exactly once, at init, under the init contract.
unsafe impl<const N: usize> Sync for Backing<N> {}

static POOL_MEMORY: Backing<{ POOL_BLOCK_SIZE * POOL_BLOCK_COUNT }> =
    Backing(UnsafeCell::new([0; POOL_BLOCK_SIZE * POOL_BLOCK_COUNT]));
static HEAP_MEMORY: Backing<HEAP_SIZE> =
    Backing(UnsafeCell::new([0; HEAP_SIZE]));

struct Allocators {
    pool: Option<Pool<'static, POOL_BLOCK_SIZE>>,
    heap: Option<Heap<'static>>,
}

static ALLOCATORS: KCell<Allocators> = KCell::new(Allocators {
    pool: None,
    heap: None,
});

/// Wires the pool free list and writes the heap's initial header. Must run
/// once, before tasks exist, per the init sequence in the crate docs.
pub fn init() {
    let _guard = InterruptGuard::acquire();
    let mut a = ALLOCATORS.borrow_mut();
    // Safety: this is the one place the backing statics are borrowed, and
    // the resulting allocators live for the rest of time.
    unsafe {
        a.pool = Some(Pool::new(&mut *POOL_MEMORY.0.get()));
        a.heap = Some(Heap::new(&mut *HEAP_MEMORY.0.get()));
    }
    klog!(
        "mem: pool {}x{}B, heap {}B",
        POOL_BLOCK_COUNT,
        POOL_BLOCK_SIZE,
        HEAP_SIZE
    );
}

/// Takes one zeroed pool block. O(1).
pub fn pool_alloc() -> Result<NonNull<u8>, NoBlock> {
    let _guard = InterruptGuard::acquire();
    match ALLOCATORS.borrow_mut().pool.as_mut() {
        Some(p) => p.alloc(),
        None => Err(NoBlock),
    }
}

/// Returns a pool block. O(1).
pub fn pool_free(ptr: NonNull<u8>) {
    let _guard = InterruptGuard::acquire();
    if let Some(p) = ALLOCATORS.borrow_mut().pool.as_mut() {
        p.free(ptr, |addr| klog!("pool: bad free {addr:#010x}"));
    }
}

/// (free, used) block counts. The pair may be momentarily inconsistent
/// with reality by the time the caller reads it; it is internally
/// consistent.
pub fn pool_stats() -> (u32, u32) {
    let _guard = InterruptGuard::acquire();
    match ALLOCATORS.borrow_mut().pool.as_ref() {
        Some(p) => (p.free_count(), p.used_count()),
        None => (0, 0),
    }
}

/// Allocates `size` bytes from the heap. First-fit, O(blocks).
pub fn heap_alloc(size: usize) -> Result<NonNull<u8>, HeapError> {
    let _guard = InterruptGuard::acquire();
    match ALLOCATORS.borrow_mut().heap.as_mut() {
        Some(h) => h.alloc(size),
        None => Err(HeapError::OutOfMemory),
    }
}

/// Frees a heap allocation and merges forward.
pub fn heap_free(ptr: NonNull<u8>) {
    let _guard = InterruptGuard::acquire();
    if let Some(h) = ALLOCATORS.borrow_mut().heap.as_mut() {
        h.free(ptr, |addr| klog!("heap: bad free {addr:#010x}"));
    }
}

/// Heap diagnostics, each a linear scan.
pub struct HeapStats {
    pub free_total: usize,
    pub used_total: usize,
    pub largest_free: usize,
    pub fragment_count: usize,
}

pub fn heap_stats() -> HeapStats {
    let _guard = InterruptGuard::acquire();
    match ALLOCATORS.borrow_mut().heap.as_ref() {
        Some(h) => HeapStats {
            free_total: h.free_total(),
            used_total: h.used_total(),
            largest_free: h.largest_free(),
            fragment_count: h.fragment_count(),
        },
        None => HeapStats {
            free_total: 0,
            used_total: 0,
            largest_free: 0,
            fragment_count: 0,
        },
    }
}
