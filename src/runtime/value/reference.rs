use std::{
    hint,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::runtime::{
    context::Context,
    heap::{block::Block, header::Tag},
    value::boxed::Boxed,
};

/// Slot value while a thread holds the cell. No box is ever the zero word.
const LOCKED: usize = 0;

/// A mutable reference cell holding one boxed value.
///
/// Cells reachable from several threads are thread-shared blocks; those
/// serialize `get`, `set` and `swap` by swapping the slot with [`LOCKED`]
/// and spinning while another thread holds it.
#[repr(transparent)]
#[must_use = "a reference cell owns a reference; release it with `drop`"]
pub struct Ref(Block);

impl Ref {
    pub fn new(value: Boxed, ctx: &mut Context) -> Ref {
        Ref(Block::new(Tag::REF, [value], ctx))
    }

    /// # Safety
    /// `b` must be a `REF` block with one scanned field.
    pub unsafe fn from_block(b: Block) -> Ref {
        debug_assert_eq!(b.tag(), Tag::REF);
        Ref(b)
    }

    pub fn into_block(self) -> Block {
        self.0
    }

    pub fn as_block(&self) -> &Block {
        &self.0
    }

    /// Returns a new owner of the current value.
    pub fn get(&self) -> Boxed {
        if !self.0.is_thread_shared() {
            return self.0.field(0).dup();
        }
        let slot = self.slot();
        let word = lock(slot);
        let value = unsafe { Boxed::from_raw(word) };
        let result = value.dup();
        slot.store(value.into_raw(), Ordering::Release);
        result
    }

    /// Installs `value` and releases the previous one.
    pub fn set(&self, value: Boxed, ctx: &mut Context) {
        self.swap(value).drop(ctx);
    }

    /// Installs `value` and returns the previous one to the caller.
    pub fn swap(&self, value: Boxed) -> Boxed {
        if !self.0.is_thread_shared() {
            return unsafe { self.0.replace_field(0, value) };
        }
        let value = value.into_shared();
        let slot = self.slot();
        let old = lock(slot);
        slot.store(value.into_raw(), Ordering::Release);
        unsafe { Boxed::from_raw(old) }
    }

    pub fn dup(&self) -> Ref {
        Ref(self.0.dup())
    }

    pub fn drop(self, ctx: &mut Context) {
        self.0.drop(ctx);
    }

    fn slot(&self) -> &AtomicUsize {
        unsafe { AtomicUsize::from_ptr(self.0.fields_ptr().cast::<usize>()) }
    }
}

fn lock(slot: &AtomicUsize) -> usize {
    loop {
        let word = slot.swap(LOCKED, Ordering::Acquire);
        if word != LOCKED {
            return word;
        }
        hint::spin_loop();
    }
}
