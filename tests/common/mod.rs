#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use aether::runtime::{Context, value::Boxed, value::CPtr};

/// Hands out field values whose release is counted.
///
/// Each value is a foreign-pointer block whose destructor bumps the shared
/// counter, so a test can check that an owned field was released exactly
/// once.
#[derive(Clone, Default)]
pub struct DropCounter(Arc<AtomicUsize>);

impl DropCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(&self, ctx: &mut Context) -> Boxed {
        let data = Arc::into_raw(self.0.clone()).cast_mut().cast::<u8>();
        let ptr = unsafe { CPtr::new(data, Some(release_counter), ctx) };
        Boxed::from_block(ptr.into_block())
    }

    pub fn released(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

unsafe fn release_counter(data: *mut u8, _len: usize) {
    let counter = unsafe { Arc::from_raw(data.cast::<AtomicUsize>().cast_const()) };
    counter.fetch_add(1, Ordering::SeqCst);
}

pub fn assert_heap_empty(ctx: &Context) {
    let stats = ctx.heap().stats();
    assert_eq!(
        stats.live_bytes, 0,
        "heap still holds {} bytes ({} allocations, {} frees)",
        stats.live_bytes, stats.allocations, stats.frees
    );
}
