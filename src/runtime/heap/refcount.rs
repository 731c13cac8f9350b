//! Duplicate and drop.
//!
//! The stored count is a `u32` whose top bit separates plain counts from the
//! ones needing care:
//!
//! ```text
//! 0                          unique: the caller is the only owner
//! 1 ..= 0x7FFF_FFFF          plain local count, relaxed load + store
//! 0x8000_0000 .. RC_STICKY   thread-shared (flag set): atomic CAS,
//!                            or a local count that just overflowed
//! RC_STICKY ..               sticky: never changes, never freed
//! ```
//!
//! The inlined fast paths test the count as an `i32`; anything negative, and
//! a drop of an exact zero, goes to the out-of-line slow path.

use std::sync::atomic::{Ordering, fence};

use crate::runtime::{
    context::Context,
    heap::{
        block::Block,
        header::{RC_SHARED, RC_STICKY, Tag},
    },
};

impl Block {
    /// Adds an owner and returns the new handle.
    #[inline]
    pub fn dup(&self) -> Block {
        let rc = self.header().refcount();
        if (rc as i32) >= 0 {
            self.header().rc().store(rc + 1, Ordering::Relaxed);
            self.alias()
        } else {
            dup_check(self, rc)
        }
    }

    /// Gives up this owner. The last owner releases every scanned field and
    /// frees the storage.
    #[inline]
    pub fn drop(self, ctx: &mut Context) {
        let rc = self.header().refcount();
        if (rc as i32) > 0 {
            self.header().rc().store(rc - 1, Ordering::Relaxed);
        } else {
            check_free(self, rc, ctx);
        }
    }

    /// Drop for callers that already know another owner exists.
    #[inline]
    pub fn decref(self, ctx: &mut Context) {
        let rc = self.header().refcount();
        debug_assert!(rc != 0, "decref of a unique block");
        if (rc as i32) > 0 {
            self.header().rc().store(rc - 1, Ordering::Relaxed);
        } else {
            check_free(self, rc, ctx);
        }
    }

    /// Drop with a statically known scan count, checked in debug builds.
    #[inline]
    pub fn drop_n(self, scan_fsize: usize, ctx: &mut Context) {
        debug_assert_eq!(self.scan_fsize(), scan_fsize);
        self.drop(ctx);
    }

    #[inline]
    pub fn dup_assert(&self, tag: Tag) -> Block {
        debug_assert_eq!(self.tag(), tag);
        self.dup()
    }

    #[inline]
    pub fn drop_assert(self, tag: Tag, ctx: &mut Context) {
        debug_assert_eq!(self.tag(), tag);
        self.drop(ctx);
    }
}

#[cold]
#[inline(never)]
fn dup_check(b: &Block, rc: u32) -> Block {
    if rc >= RC_STICKY {
        // immortal
    } else if b.is_thread_shared() {
        shared_increment(b);
    } else {
        tracing::trace!(addr = b.addr(), tag = %b.tag(), "local refcount overflow, block is now sticky");
        b.header().rc().store(RC_STICKY, Ordering::Relaxed);
    }
    b.alias()
}

/// Slow path of [`Block::drop`]: the count is zero, shared, or sticky.
#[cold]
#[inline(never)]
pub(crate) fn check_free(b: Block, rc: u32, ctx: &mut Context) {
    if rc == 0 {
        free_block(b, ctx);
    } else if rc >= RC_STICKY {
        // immortal
    } else if b.is_thread_shared() {
        if shared_decrement(&b) {
            free_block(b, ctx);
        }
    } else {
        tracing::trace!(addr = b.addr(), tag = %b.tag(), "drop of an overflowed count, block is now sticky");
        b.header().rc().store(RC_STICKY, Ordering::Relaxed);
    }
}

/// Atomically adds an owner to a thread-shared block, saturating at sticky.
fn shared_increment(b: &Block) {
    let rc = b.header().rc();
    let mut current = rc.load(Ordering::Relaxed);
    loop {
        if current >= RC_STICKY {
            return;
        }
        match rc.compare_exchange_weak(current, current + 1, Ordering::Relaxed, Ordering::Relaxed)
        {
            Ok(_) => return,
            Err(actual) => current = actual,
        }
    }
}

/// Atomically removes an owner from a thread-shared block. Returns `true`
/// when the caller was the last owner and must release the block.
pub(crate) fn shared_decrement(b: &Block) -> bool {
    let rc = b.header().rc();
    let mut current = rc.load(Ordering::Relaxed);
    loop {
        if current >= RC_STICKY {
            return false;
        }
        if current == RC_SHARED {
            // Sole owner: nobody else can observe or add to the count.
            fence(Ordering::Acquire);
            return true;
        }
        match rc.compare_exchange_weak(current, current - 1, Ordering::Release, Ordering::Relaxed)
        {
            Ok(_) => return false,
            Err(actual) => current = actual,
        }
    }
}

/// Releases every owned field of `b` and frees its storage.
///
/// Recursion through the fields is bounded by the context's
/// `max_release_depth`; past it, blocks are parked on the deferred-free list
/// and drained by the outermost call.
pub(crate) fn free_block(b: Block, ctx: &mut Context) {
    if ctx.release_depth >= ctx.config().max_release_depth {
        ctx.delay_free(b);
        return;
    }
    ctx.release_depth += 1;
    release_fields(&b, ctx);
    unsafe { ctx.heap().free(b.into_raw().cast()) };
    ctx.release_depth -= 1;

    if ctx.release_depth == 0 && !ctx.draining {
        ctx.draining = true;
        while let Some(next) = ctx.take_delayed() {
            free_block(next, ctx);
        }
        ctx.draining = false;
    }
}

/// Drops each scanned field, or runs the stored destructor of a raw block.
pub(crate) fn release_fields(b: &Block, ctx: &mut Context) {
    if b.tag().is_raw() {
        let payload = *b.raw_payload();
        if let Some(free) = payload.free {
            unsafe { free(payload.data, payload.len) };
        }
        return;
    }
    let scan_fsize = b.scan_fsize();
    for i in 0..scan_fsize {
        let field = unsafe { b.take_field(i) };
        field.drop(ctx);
    }
}
