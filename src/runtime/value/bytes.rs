use std::{fmt, ptr, slice};

use crate::runtime::{
    context::Context,
    heap::{
        block::{Block, FreeFn, RawPayload, block_size},
        header::Tag,
    },
};

const LEN_SIZE: usize = size_of::<usize>();

/// A byte buffer. Small buffers are copied into the block (`BYTES`);
/// foreign buffers are referenced with a destructor (`BYTES_RAW`).
#[repr(transparent)]
#[must_use = "a byte buffer owns a reference; release it with `drop`"]
pub struct Bytes(Block);

impl Bytes {
    pub fn from_slice(data: &[u8], ctx: &mut Context) -> Bytes {
        let b = unsafe { Block::alloc(block_size(0, LEN_SIZE + data.len()), 0, Tag::BYTES, ctx) };
        unsafe {
            let raw = b.raw_ptr();
            raw.cast::<usize>().write(data.len());
            ptr::copy_nonoverlapping(data.as_ptr(), raw.add(LEN_SIZE), data.len());
        }
        Bytes(b)
    }

    /// Wraps a foreign buffer. `free` runs with `data` and `len` when the
    /// last owner drops.
    ///
    /// # Safety
    /// `data` must stay valid for `len` bytes until `free` is called.
    pub unsafe fn from_raw_parts(
        data: *mut u8,
        len: usize,
        free: Option<FreeFn>,
        ctx: &mut Context,
    ) -> Bytes {
        Bytes(alloc_raw(Tag::BYTES_RAW, RawPayload { free, data, len }, ctx))
    }

    pub fn into_block(self) -> Block {
        self.0
    }

    pub fn is_raw(&self) -> bool {
        self.0.has_tag(Tag::BYTES_RAW)
    }

    pub fn len(&self) -> usize {
        if self.is_raw() {
            self.0.raw_payload().len
        } else {
            unsafe { self.0.raw_ptr().cast::<usize>().read() }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        if self.is_raw() {
            let payload = self.0.raw_payload();
            if payload.data.is_null() {
                return &[];
            }
            unsafe { slice::from_raw_parts(payload.data, payload.len) }
        } else {
            unsafe { slice::from_raw_parts(self.0.raw_ptr().add(LEN_SIZE), self.len()) }
        }
    }

    pub fn dup(&self) -> Bytes {
        Bytes(self.0.dup())
    }

    pub fn drop(self, ctx: &mut Context) {
        self.0.drop(ctx);
    }
}

impl fmt::Debug for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bytes")
            .field("raw", &self.is_raw())
            .field("len", &self.len())
            .finish()
    }
}

/// An opaque foreign pointer released through its destructor.
#[repr(transparent)]
#[must_use = "a foreign pointer owns a reference; release it with `drop`"]
pub struct CPtr(Block);

impl CPtr {
    /// # Safety
    /// `free`, if given, must accept `data` (with length 0) exactly once.
    pub unsafe fn new(data: *mut u8, free: Option<FreeFn>, ctx: &mut Context) -> CPtr {
        CPtr(alloc_raw(Tag::CPTR_RAW, RawPayload { free, data, len: 0 }, ctx))
    }

    pub fn get(&self) -> *mut u8 {
        self.0.raw_payload().data
    }

    pub fn into_block(self) -> Block {
        self.0
    }

    pub fn as_block(&self) -> &Block {
        &self.0
    }

    pub fn dup(&self) -> CPtr {
        CPtr(self.0.dup())
    }

    pub fn drop(self, ctx: &mut Context) {
        self.0.drop(ctx);
    }
}

impl fmt::Debug for CPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPtr({:p})", self.get())
    }
}

fn alloc_raw(tag: Tag, payload: RawPayload, ctx: &mut Context) -> Block {
    debug_assert!(tag.is_raw());
    let b = unsafe { Block::alloc(block_size(0, size_of::<RawPayload>()), 0, tag, ctx) };
    unsafe { b.raw_ptr().cast::<RawPayload>().write(payload) };
    b
}
