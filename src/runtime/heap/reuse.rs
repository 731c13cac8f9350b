//! Reuse of uniquely owned storage.
//!
//! When a match arm takes apart a constructor it is about to rebuild, the
//! storage of a unique value can be handed straight to the new value. A
//! [`Reuse`] is the proof that this is allowed: it is only produced when the
//! call that created it has just observed unique ownership, and it is
//! consumed by exactly one [`Block::alloc_at`] / [`Block::new_at`] or given
//! back with [`Reuse::free`].

use std::{fmt, ptr::NonNull};

use crate::runtime::{
    context::Context,
    heap::{
        arena::Heap,
        block::Block,
        header::{Header, RC_STICKY},
        refcount::{check_free, release_fields, shared_decrement},
    },
    value::boxed::Boxed,
};

/// Storage of a released block, ready to be reinitialized.
///
/// The owned fields have already been released; only the raw memory is left.
#[must_use = "reusable storage leaks unless it is passed to `alloc_at` or freed"]
pub struct Reuse(NonNull<Header>);

impl Reuse {
    /// Wraps storage whose fields have all been released or moved out.
    ///
    /// # Safety
    /// `b` must be uniquely owned and no field may be read through it again.
    pub(crate) unsafe fn from_released(b: Block) -> Reuse {
        let p = b.into_raw();
        unsafe { p.as_ref() }.rc().store(0, std::sync::atomic::Ordering::Relaxed);
        Reuse(p)
    }

    pub(crate) fn into_storage(self) -> NonNull<Header> {
        self.0
    }

    pub fn addr(&self) -> usize {
        self.0.as_ptr() as usize
    }

    /// Bytes available for the block built in this storage.
    pub fn usable_size(&self) -> usize {
        unsafe { Heap::usable_size(self.0.cast()) }
    }

    /// Returns the storage to the allocator.
    pub fn free(self, ctx: &mut Context) {
        unsafe { ctx.heap().free(self.0.cast()) };
    }
}

impl fmt::Debug for Reuse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reuse({:#x})", self.addr())
    }
}

impl Block {
    /// Drops this owner; if it was the last one, releases the fields and
    /// returns the storage instead of freeing it.
    ///
    /// Returns `None` whenever another owner remains.
    #[inline]
    pub fn drop_reuse(self, ctx: &mut Context) -> Option<Reuse> {
        let rc = self.header().refcount();
        if rc == 0 {
            release_fields(&self, ctx);
            return Some(unsafe { Reuse::from_released(self) });
        }
        if (rc as i32) > 0 {
            self.header().rc().store(rc - 1, std::sync::atomic::Ordering::Relaxed);
            return None;
        }
        check_reuse(self, rc, ctx)
    }

    /// [`Block::drop_reuse`] with a statically known scan count, checked in
    /// debug builds against the header.
    #[inline]
    pub fn drop_reuse_n(self, scan_fsize: usize, ctx: &mut Context) -> Option<Reuse> {
        debug_assert_eq!(self.scan_fsize(), scan_fsize);
        let rc = self.header().refcount();
        if rc == 0 {
            if self.tag().is_raw() {
                release_fields(&self, ctx);
            } else {
                for i in 0..scan_fsize {
                    unsafe { self.take_field(i) }.drop(ctx);
                }
            }
            return Some(unsafe { Reuse::from_released(self) });
        }
        if (rc as i32) > 0 {
            self.header().rc().store(rc - 1, std::sync::atomic::Ordering::Relaxed);
            return None;
        }
        check_reuse(self, rc, ctx)
    }

    /// Frees the storage of a unique block without visiting its fields.
    ///
    /// # Safety
    /// The block must be unique and its fields must already be released or
    /// moved out.
    pub unsafe fn free_storage(self, ctx: &mut Context) {
        debug_assert!(self.is_unique());
        unsafe { ctx.heap().free(self.into_raw().cast()) };
    }
}

/// Slow path of the reuse drops: thread-shared or sticky.
#[cold]
#[inline(never)]
fn check_reuse(b: Block, rc: u32, ctx: &mut Context) -> Option<Reuse> {
    if rc >= RC_STICKY || !b.is_thread_shared() {
        check_free(b, rc, ctx);
        return None;
    }
    if shared_decrement(&b) {
        // Last owner of a shared block: its storage is ours now.
        release_fields(&b, ctx);
        return Some(unsafe { Reuse::from_released(b) });
    }
    None
}

/// Match arm that keeps the matched value alive: the used fields are
/// duplicated and the constructor stays with the caller.
pub fn keep_match<const N: usize>(con: &Block, used: [usize; N]) -> [Boxed; N] {
    used.map(|i| con.field(i).dup())
}

/// Match arm that consumes the matched value without reusing it.
///
/// A unique constructor gives up its used fields by move, its unused fields
/// are dropped and the storage is freed. A shared one has its used fields
/// duplicated and is then dropped as a whole.
pub fn drop_match<const N: usize>(con: Block, used: [usize; N], ctx: &mut Context) -> [Boxed; N] {
    let (reuse, fields) = reuse_match(con, used, ctx);
    if let Some(reuse) = reuse {
        reuse.free(ctx);
    }
    fields
}

/// Match arm that consumes the matched value and may reuse its storage.
///
/// Like [`drop_match`], but a unique constructor's storage is returned for
/// the arm's new value instead of being freed.
pub fn reuse_match<const N: usize>(
    con: Block,
    used: [usize; N],
    ctx: &mut Context,
) -> (Option<Reuse>, [Boxed; N]) {
    if con.is_unique() {
        if con.tag().is_raw() {
            debug_assert!(N == 0, "a raw block has no fields to match");
            release_fields(&con, ctx);
            let fields = used.map(|_| Boxed::unit());
            return (Some(unsafe { Reuse::from_released(con) }), fields);
        }
        let scan_fsize = con.scan_fsize();
        let first = usize::from(con.is_large());
        for i in first..scan_fsize {
            if !used.contains(&i) {
                unsafe { con.take_field(i) }.drop(ctx);
            }
        }
        let fields = used.map(|i| unsafe { con.take_field(i) });
        (Some(unsafe { Reuse::from_released(con) }), fields)
    } else {
        let fields = keep_match(&con, used);
        con.drop(ctx);
        (None, fields)
    }
}
