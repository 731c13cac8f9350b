use std::{
    alloc::{self, Layout},
    cell::Cell,
    ptr::{self, NonNull},
};

use serde::Serialize;

use crate::runtime::error::{FatalError, fatal_error};

/// Every allocation is preceded by a word holding its total size, so `free`
/// and `realloc` only need the block pointer.
const SIZE_PREFIX: usize = 8;
/// Block alignment. Keeps bit 0 of every block address clear for boxing.
pub const BLOCK_ALIGN: usize = 8;
/// Requests up to this size are considered small-object allocations.
pub const SMALL_SIZE_MAX: usize = 1024;

/// Allocation counters for one thread's heap.
///
/// A thread-shared block is freed by whichever thread drops it last, and the
/// free is counted by that thread's heap. Counters of threads that exchange
/// shared blocks are therefore only meaningful summed together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeapStats {
    pub allocations: usize,
    pub frees: usize,
    pub reallocs: usize,
    pub live_bytes: usize,
    pub peak_bytes: usize,
}

/// Per-thread allocation handle.
///
/// Memory comes from the global allocator. The handle only keeps counters,
/// in `Cell`s, since a heap is never shared between threads.
#[derive(Debug, Default)]
pub struct Heap {
    allocations: Cell<usize>,
    frees: Cell<usize>,
    reallocs: Cell<usize>,
    live_bytes: Cell<usize>,
    peak_bytes: Cell<usize>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocation for the hot constructor path.
    #[inline]
    pub fn malloc_small(&self, size: usize) -> NonNull<u8> {
        debug_assert!(size <= SMALL_SIZE_MAX, "small allocation of {size} bytes");
        self.malloc(size)
    }

    /// Allocates `size` uninitialized bytes, aligned to [`BLOCK_ALIGN`].
    pub fn malloc(&self, size: usize) -> NonNull<u8> {
        let layout = layout_for(size);
        let base = unsafe { alloc::alloc(layout) };
        self.finish_alloc(base, layout)
    }

    /// Allocates `size` zeroed bytes.
    pub fn zalloc(&self, size: usize) -> NonNull<u8> {
        let layout = layout_for(size);
        let base = unsafe { alloc::alloc_zeroed(layout) };
        self.finish_alloc(base, layout)
    }

    /// Resizes an allocation made by any heap, preserving its contents.
    ///
    /// # Safety
    /// `p` must come from [`Heap::malloc`] (or a sibling) and not be freed.
    pub unsafe fn realloc(&self, p: NonNull<u8>, size: usize) -> NonNull<u8> {
        let old_total = unsafe { total_size(p) };
        let old_layout = unsafe { Layout::from_size_align_unchecked(old_total, BLOCK_ALIGN) };
        let new_layout = layout_for(size);
        let base = unsafe { p.as_ptr().sub(SIZE_PREFIX) };
        let base = unsafe { alloc::realloc(base, old_layout, new_layout.size()) };
        let Some(base) = NonNull::new(base) else {
            tracing::error!(size, "reallocation failed");
            alloc::handle_alloc_error(new_layout);
        };
        unsafe { base.cast::<usize>().write(new_layout.size()) };

        self.reallocs.set(self.reallocs.get() + 1);
        let live = self.live_bytes.get().saturating_sub(old_total) + new_layout.size();
        self.set_live(live);
        unsafe { NonNull::new_unchecked(base.as_ptr().add(SIZE_PREFIX)) }
    }

    /// Returns an allocation to the global allocator.
    ///
    /// # Safety
    /// `p` must come from [`Heap::malloc`] (or a sibling) and not be freed.
    pub unsafe fn free(&self, p: NonNull<u8>) {
        let total = unsafe { total_size(p) };
        let layout = unsafe { Layout::from_size_align_unchecked(total, BLOCK_ALIGN) };
        unsafe { alloc::dealloc(p.as_ptr().sub(SIZE_PREFIX), layout) };
        self.frees.set(self.frees.get() + 1);
        self.live_bytes.set(self.live_bytes.get().saturating_sub(total));
    }

    /// Bytes available to the caller at `p`.
    ///
    /// # Safety
    /// `p` must be a live allocation made by a `Heap`.
    pub unsafe fn usable_size(p: NonNull<u8>) -> usize {
        unsafe { total_size(p) - SIZE_PREFIX }
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            allocations: self.allocations.get(),
            frees: self.frees.get(),
            reallocs: self.reallocs.get(),
            live_bytes: self.live_bytes.get(),
            peak_bytes: self.peak_bytes.get(),
        }
    }

    fn finish_alloc(&self, base: *mut u8, layout: Layout) -> NonNull<u8> {
        let Some(base) = NonNull::new(base) else {
            tracing::error!(size = layout.size(), "allocation failed");
            alloc::handle_alloc_error(layout);
        };
        unsafe { base.cast::<usize>().write(layout.size()) };
        self.allocations.set(self.allocations.get() + 1);
        self.set_live(self.live_bytes.get() + layout.size());
        unsafe { NonNull::new_unchecked(base.as_ptr().add(SIZE_PREFIX)) }
    }

    fn set_live(&self, live: usize) {
        self.live_bytes.set(live);
        if live > self.peak_bytes.get() {
            self.peak_bytes.set(live);
        }
    }
}

fn layout_for(size: usize) -> Layout {
    let total = size.checked_add(SIZE_PREFIX).map(|n| n.max(SIZE_PREFIX + 8));
    match total.and_then(|n| Layout::from_size_align(n, BLOCK_ALIGN).ok()) {
        Some(layout) => layout,
        None => fatal_error(FatalError::OutOfMemory { size }),
    }
}

unsafe fn total_size(p: NonNull<u8>) -> usize {
    unsafe { ptr::read(p.as_ptr().sub(SIZE_PREFIX).cast::<usize>()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malloc_is_block_aligned() {
        let heap = Heap::new();
        for size in [1, 8, 24, 100, 4096] {
            let p = heap.malloc(size);
            assert_eq!(p.as_ptr() as usize % BLOCK_ALIGN, 0);
            assert!(unsafe { Heap::usable_size(p) } >= size);
            unsafe { heap.free(p) };
        }
        let stats = heap.stats();
        assert_eq!(stats.allocations, 5);
        assert_eq!(stats.frees, 5);
        assert_eq!(stats.live_bytes, 0);
    }

    #[test]
    fn test_zalloc_zeroes() {
        let heap = Heap::new();
        let p = heap.zalloc(64);
        let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));
        unsafe { heap.free(p) };
    }

    #[test]
    fn test_realloc_preserves_contents() {
        let heap = Heap::new();
        let p = heap.malloc(16);
        unsafe { p.as_ptr().cast::<u64>().write(0xdead_beef) };
        let q = unsafe { heap.realloc(p, 256) };
        assert_eq!(unsafe { q.as_ptr().cast::<u64>().read() }, 0xdead_beef);
        assert!(unsafe { Heap::usable_size(q) } >= 256);
        unsafe { heap.free(q) };

        let stats = heap.stats();
        assert_eq!(stats.reallocs, 1);
        assert_eq!(stats.live_bytes, 0);
        assert!(stats.peak_bytes >= 256);
    }
}
