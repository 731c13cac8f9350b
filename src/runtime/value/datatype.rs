use std::{fmt, ptr::NonNull};

use crate::runtime::{
    context::Context,
    heap::{block::Block, header::Tag, reuse::Reuse},
    value::boxed::Boxed,
};

/// Value of an algebraic datatype.
///
/// Constructors with fields live in a block; nullary constructors are inline
/// singletons `(tag << 2) | 1` and never allocate.
#[repr(transparent)]
#[must_use = "a datatype value may own a block reference; release it with `drop`"]
pub struct Datatype(usize);

impl Datatype {
    #[inline]
    pub const fn from_tag(tag: Tag) -> Datatype {
        Datatype(((tag.raw() as usize) << 2) | 1)
    }

    #[inline]
    pub fn from_block(b: Block) -> Datatype {
        Datatype(b.into_raw().as_ptr() as usize)
    }

    #[inline]
    pub fn is_ptr(&self) -> bool {
        self.0 & 1 == 0
    }

    #[inline]
    pub fn is_singleton(&self) -> bool {
        self.0 & 1 == 1
    }

    #[inline]
    pub fn as_block(&self) -> Option<&Block> {
        if self.is_ptr() {
            Some(unsafe { &*(self as *const Datatype).cast::<Block>() })
        } else {
            None
        }
    }

    #[inline]
    pub fn into_block(self) -> Option<Block> {
        if self.is_ptr() {
            Some(unsafe { Block::from_raw(NonNull::new_unchecked(self.0 as *mut _)) })
        } else {
            None
        }
    }

    #[inline]
    pub fn tag(&self) -> Tag {
        match self.as_block() {
            Some(b) => b.tag(),
            None => Tag::new((self.0 >> 2) as u16),
        }
    }

    #[inline]
    pub fn has_tag(&self, tag: Tag) -> bool {
        match self.as_block() {
            Some(b) => b.has_tag(tag),
            None => self.0 == Datatype::from_tag(tag).0,
        }
    }

    #[inline]
    pub fn is_unique(&self) -> bool {
        self.as_block().is_some_and(Block::is_unique)
    }

    #[inline]
    pub fn dup(&self) -> Datatype {
        match self.as_block() {
            Some(b) => Datatype::from_block(b.dup()),
            None => Datatype(self.0),
        }
    }

    #[inline]
    pub fn drop(self, ctx: &mut Context) {
        if let Some(b) = self.into_block() {
            b.drop(ctx);
        }
    }

    pub fn dup_assert(&self, tag: Tag) -> Datatype {
        debug_assert!(self.has_tag(tag), "expected {tag}, found {}", self.tag());
        self.dup()
    }

    pub fn drop_assert(self, tag: Tag, ctx: &mut Context) {
        debug_assert!(self.has_tag(tag), "expected {tag}, found {}", self.tag());
        self.drop(ctx);
    }

    /// Drop for values known to have another owner.
    pub fn decref(self, ctx: &mut Context) {
        if let Some(b) = self.into_block() {
            b.decref(ctx);
        }
    }

    /// Frees the storage of a unique constructor without visiting its fields.
    ///
    /// # Safety
    /// The fields must already be released or moved out.
    pub unsafe fn free(self, ctx: &mut Context) {
        if let Some(b) = self.into_block() {
            unsafe { b.free_storage(ctx) };
        }
    }

    /// Singletons never yield storage.
    pub fn drop_reuse(self, ctx: &mut Context) -> Option<Reuse> {
        self.into_block().and_then(|b| b.drop_reuse(ctx))
    }

    pub fn drop_reuse_n(self, scan_fsize: usize, ctx: &mut Context) -> Option<Reuse> {
        self.into_block().and_then(|b| b.drop_reuse_n(scan_fsize, ctx))
    }

    #[inline]
    pub fn into_boxed(self) -> Boxed {
        unsafe { Boxed::from_raw(self.0) }
    }

    /// Reinterprets a box holding a datatype value.
    #[inline]
    pub fn from_boxed(b: Boxed) -> Datatype {
        debug_assert!(b.is_ptr() || b.as_raw() & 0b10 == 0, "box is not a datatype value");
        Datatype(b.into_raw())
    }
}

impl fmt::Debug for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_block() {
            Some(b) => write!(f, "Datatype({:#x}: {})", b.addr(), b.tag()),
            None => write!(f, "Datatype(singleton {})", self.tag()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NIL: Tag = Tag::new(1);
    const CONS: Tag = Tag::new(2);

    #[test]
    fn test_singleton_needs_no_allocation() {
        let mut ctx = Context::new();
        let nil = Datatype::from_tag(NIL);
        assert!(nil.is_singleton());
        assert!(nil.has_tag(NIL));
        assert!(!nil.has_tag(CONS));
        let again = nil.dup();
        again.drop(&mut ctx);
        nil.drop(&mut ctx);
        assert_eq!(ctx.heap().stats().allocations, 0);
    }

    #[test]
    fn test_pointer_case_forwards_to_refcount() {
        let mut ctx = Context::new();
        let nil = Datatype::from_tag(NIL).into_boxed();
        let cons = Datatype::from_block(Block::new(CONS, [Boxed::from_enum(1), nil], &mut ctx));
        assert!(cons.has_tag(CONS));
        assert_eq!(cons.tag(), CONS);

        let other = cons.dup_assert(CONS);
        assert!(!cons.is_unique());
        other.decref(&mut ctx);
        assert!(cons.is_unique());

        let reuse = cons.drop_reuse_n(2, &mut ctx);
        assert!(reuse.is_some());
        if let Some(reuse) = reuse {
            reuse.free(&mut ctx);
        }
        assert_eq!(ctx.heap().stats().live_bytes, 0);
    }

    #[test]
    fn test_singleton_drop_reuse_yields_nothing() {
        let mut ctx = Context::new();
        assert!(Datatype::from_tag(NIL).drop_reuse(&mut ctx).is_none());
    }
}
