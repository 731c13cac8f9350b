//! Handing blocks across threads.
//!
//! A block becomes thread-shared by setting the header flag and adding
//! [`RC_SHARED`] to its count. From then on every duplicate and drop goes
//! through the atomic slow path. Everything reachable through the scanned
//! fields is marked too, since it becomes reachable from the other thread.

use std::{ops::Deref, ptr::NonNull, sync::atomic::Ordering};

use crate::runtime::{
    context::Context,
    heap::{
        arena::Heap,
        block::{Block, block_size},
        header::{Header, RC_SHARED, RC_STICKY, Tag},
    },
    value::boxed::Boxed,
};

impl Block {
    /// Marks this block and its reachable graph thread-shared.
    ///
    /// Blocks that are already shared or sticky are not visited again, so
    /// the walk stops at subgraphs marked by an earlier call.
    pub fn into_shared(self) -> SharedBlock {
        mark_shared(self.0);
        SharedBlock(self)
    }

    /// Marks the reachable graph thread-shared and pins this block's count
    /// at sticky. The handle may be duplicated and dropped freely afterwards;
    /// the block itself is never freed.
    pub fn into_immortal(self) -> SharedBlock {
        mark_shared(self.0);
        self.header().rc().store(RC_STICKY, Ordering::Release);
        SharedBlock(self)
    }

    /// Builds an immortal block from the global allocator, outside any
    /// thread's heap accounting. Used for process-wide singletons.
    pub(crate) fn new_immortal<const N: usize>(tag: Tag, fields: [Boxed; N]) -> SharedBlock {
        let p = Heap::new().malloc(block_size(N, 0)).cast::<Header>();
        unsafe { p.write(Header::new(N as u8, tag)) };
        let b = Block(p);
        for (i, field) in fields.into_iter().enumerate() {
            unsafe { b.init_field(i, field) };
        }
        b.into_immortal()
    }
}

impl Boxed {
    /// Marks the block behind a pointer box thread-shared. Inline values are
    /// returned unchanged.
    pub fn into_shared(self) -> Boxed {
        if let Some(b) = self.as_block() {
            mark_shared(b.0);
        }
        self
    }
}

fn mark_shared(root: NonNull<Header>) {
    let mut pending = vec![root];
    while let Some(p) = pending.pop() {
        let b = Block(p);
        let header = b.header();
        if header.is_thread_shared() || header.refcount() >= RC_STICKY {
            let _ = b.into_raw();
            continue;
        }
        let rc = header.refcount();
        let shared = if rc < RC_SHARED { rc + RC_SHARED } else { RC_STICKY };
        header.rc().store(shared, Ordering::Relaxed);
        header.set_thread_shared();
        tracing::trace!(addr = b.addr(), tag = %b.tag(), "block marked thread-shared");

        if !b.tag().is_raw() {
            for i in 0..b.scan_fsize() {
                if let Some(child) = b.field(i).as_block() {
                    pending.push(child.0);
                }
            }
        }
        let _ = b.into_raw();
    }
    // Publish the marking before the handle leaves this thread.
    std::sync::atomic::fence(Ordering::Release);
}

/// A block handle that may cross threads.
///
/// The block and everything it reaches is thread-shared, so reference
/// counting on it is atomic. Convert back with [`SharedBlock::into_block`]
/// on the receiving side to use the ordinary API.
#[repr(transparent)]
#[must_use = "a shared block handle owns a reference; release it with `drop`"]
pub struct SharedBlock(Block);

unsafe impl Send for SharedBlock {}
unsafe impl Sync for SharedBlock {}

impl SharedBlock {
    /// Wraps a block that is already thread-shared.
    ///
    /// Returns the block unchanged when it is not.
    pub fn from_block(b: Block) -> Result<SharedBlock, Block> {
        if b.is_thread_shared() {
            Ok(SharedBlock(b))
        } else {
            Err(b)
        }
    }

    pub fn into_block(self) -> Block {
        self.0
    }

    pub fn dup(&self) -> SharedBlock {
        SharedBlock(self.0.dup())
    }

    pub fn drop(self, ctx: &mut Context) {
        self.0.drop(ctx);
    }
}

impl Deref for SharedBlock {
    type Target = Block;

    fn deref(&self) -> &Block {
        &self.0
    }
}

impl std::fmt::Debug for SharedBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SharedBlock").field(&self.0).finish()
    }
}
