use std::ptr::NonNull;

use crate::runtime::{
    context::Context,
    heap::{
        arena::{Heap, SMALL_SIZE_MAX},
        block::{Block, HEADER_SIZE, block_size},
        header::{Header, SCAN_FSIZE_MAX, Tag},
        reuse::Reuse,
    },
    value::boxed::Boxed,
};

#[inline]
unsafe fn init_header(p: NonNull<u8>, scan_fsize: usize, tag: Tag) -> Block {
    debug_assert!(scan_fsize < SCAN_FSIZE_MAX, "scan_fsize {scan_fsize} needs a large block");
    let header = p.cast::<Header>();
    unsafe { header.write(Header::new(scan_fsize as u8, tag)) };
    Block(header)
}

/// Allocation primitives.
///
/// Except for [`Block::alloc_large`], `scan_fsize` must be below
/// [`SCAN_FSIZE_MAX`]. All of these initialize the header only. The scanned fields are left
/// uninitialized (except by [`Block::alloc_zeroed`], and even zeroed fields
/// are not valid boxes), so callers must write every scanned field with
/// [`Block::init_field`] before the block is dropped or its fields are read.
impl Block {
    /// Allocates a small block from the context's heap.
    ///
    /// # Safety
    /// See the type-level note: scanned fields must be initialized.
    #[inline]
    pub unsafe fn alloc(size: usize, scan_fsize: usize, tag: Tag, ctx: &mut Context) -> Block {
        debug_assert!(size >= block_size(scan_fsize, 0));
        let p = if size <= SMALL_SIZE_MAX {
            ctx.heap().malloc_small(size)
        } else {
            ctx.heap().malloc(size)
        };
        unsafe { init_header(p, scan_fsize, tag) }
    }

    /// Allocates a block of any size.
    ///
    /// # Safety
    /// See the type-level note: scanned fields must be initialized.
    pub unsafe fn alloc_any(size: usize, scan_fsize: usize, tag: Tag, ctx: &mut Context) -> Block {
        debug_assert!(size >= block_size(scan_fsize, 0));
        let p = ctx.heap().malloc(size);
        unsafe { init_header(p, scan_fsize, tag) }
    }

    /// Allocates a block whose payload is zero-filled.
    ///
    /// # Safety
    /// See the type-level note: scanned fields must be initialized.
    pub unsafe fn alloc_zeroed(
        size: usize,
        scan_fsize: usize,
        tag: Tag,
        ctx: &mut Context,
    ) -> Block {
        debug_assert!(size >= block_size(scan_fsize, 0));
        let p = ctx.heap().zalloc(size);
        unsafe { init_header(p, scan_fsize, tag) }
    }

    /// Initializes a block in reused storage, or allocates when there is none.
    ///
    /// Reuse performs no allocator call at all: the header is rewritten in
    /// place, which also clears any thread-shared flag of the old block.
    ///
    /// # Safety
    /// See the type-level note: scanned fields must be initialized.
    #[inline]
    pub unsafe fn alloc_at(
        reuse: Option<Reuse>,
        size: usize,
        scan_fsize: usize,
        tag: Tag,
        ctx: &mut Context,
    ) -> Block {
        match reuse {
            None => unsafe { Block::alloc(size, scan_fsize, tag, ctx) },
            Some(reuse) => {
                let p = reuse.into_storage();
                debug_assert!(
                    unsafe { p.as_ref() }.refcount() == 0,
                    "reused storage must be unique"
                );
                debug_assert!(
                    unsafe { Heap::usable_size(p.cast()) } >= size,
                    "reused storage too small for {size} bytes"
                );
                unsafe { init_header(p.cast(), scan_fsize, tag) }
            }
        }
    }

    /// Allocates a large block whose scanned-field count is stored boxed in
    /// field 0. `scan_fsize` includes that count field; `size` covers the
    /// header, the count field and everything after it.
    ///
    /// # Safety
    /// Fields `1..scan_fsize` must be initialized.
    pub unsafe fn alloc_large(
        size: usize,
        scan_fsize: usize,
        tag: Tag,
        ctx: &mut Context,
    ) -> Block {
        debug_assert!(scan_fsize >= 1);
        debug_assert!(size >= block_size(scan_fsize, 0));
        let p = ctx.heap().malloc(size).cast::<Header>();
        unsafe { p.write(Header::new(SCAN_FSIZE_MAX as u8, tag)) };
        let b = Block(p);
        unsafe { b.init_field(0, Boxed::from_enum(scan_fsize)) };
        b
    }

    /// Grows or shrinks a unique block. The header and the first
    /// `min(old, new)` bytes are preserved.
    ///
    /// # Safety
    /// The block must be uniquely owned and every scanned field must still
    /// fit in the new size.
    pub unsafe fn realloc(self, size: usize, ctx: &mut Context) -> Block {
        debug_assert!(self.is_unique(), "realloc of a shared block");
        debug_assert!(size >= HEADER_SIZE);
        let p = unsafe { ctx.heap().realloc(self.0.cast(), size) };
        Block(p.cast())
    }

    /// Allocates a small block holding exactly `fields`.
    ///
    /// `N` must stay below [`SCAN_FSIZE_MAX`]; wider blocks are large blocks
    /// and go through [`Block::alloc_large`]. This is checked at compile time.
    pub fn new<const N: usize>(tag: Tag, fields: [Boxed; N], ctx: &mut Context) -> Block {
        Block::new_at(None, tag, fields, ctx)
    }

    /// Like [`Block::new`], reusing `reuse` when present.
    pub fn new_at<const N: usize>(
        reuse: Option<Reuse>,
        tag: Tag,
        fields: [Boxed; N],
        ctx: &mut Context,
    ) -> Block {
        const { assert!(N < SCAN_FSIZE_MAX, "too many fields for a small block") };
        let b = unsafe { Block::alloc_at(reuse, block_size(N, 0), N, tag, ctx) };
        for (i, field) in fields.into_iter().enumerate() {
            unsafe { b.init_field(i, field) };
        }
        b
    }
}
