use std::{fmt, slice};

use crate::runtime::{
    context::Context,
    error::warning_message,
    heap::{
        block::{Block, StaticBlock, block_size},
        header::Tag,
    },
    value::boxed::Boxed,
};

/// The one empty vector. Field 0 is the boxed self-inclusive count, 1.
static EMPTY: StaticBlock<1> = StaticBlock::new_large(Tag::VECTOR, [(1 << 1) | 1]);

/// A vector of boxed values.
///
/// Always a large block, so elements start at field 1 whatever the length.
#[repr(transparent)]
#[must_use = "a vector owns a reference; release it with `drop`"]
pub struct Vector(Block);

impl Vector {
    /// The shared empty vector. Never allocates.
    pub fn empty() -> Vector {
        Vector(EMPTY.block())
    }

    /// A vector of `len` copies of `elem`.
    pub fn from_elem(len: usize, elem: Boxed, ctx: &mut Context) -> Vector {
        if len == 0 {
            elem.drop(ctx);
            return Vector::empty();
        }
        let b = alloc_vector(len, ctx);
        for i in 1..len {
            unsafe { b.init_field(i, elem.dup()) };
        }
        unsafe { b.init_field(len, elem) };
        Vector(b)
    }

    /// Builds a vector from an iterator that reports its exact length.
    ///
    /// At most the reported number of elements is taken. Slots the iterator
    /// fails to fill hold unit, so the vector is always fully initialized.
    pub fn from_iter_exact<I>(elems: I, ctx: &mut Context) -> Vector
    where
        I: IntoIterator<Item = Boxed>,
        I::IntoIter: ExactSizeIterator,
    {
        let elems = elems.into_iter();
        let len = elems.len();
        if len == 0 {
            return Vector::empty();
        }
        let b = alloc_vector(len, ctx);
        let mut elems = elems.fuse();
        let mut short = false;
        for i in 1..=len {
            let elem = elems.next().unwrap_or_else(|| {
                short = true;
                Boxed::unit()
            });
            unsafe { b.init_field(i, elem) };
        }
        if short {
            warning_message(format_args!("iterator reported length {len} for a vector but ran out early"));
        }
        Vector(b)
    }

    /// # Safety
    /// `b` must be a `VECTOR` block laid out as a large block.
    pub unsafe fn from_block(b: Block) -> Vector {
        debug_assert!(b.has_tag(Tag::VECTOR) && b.is_large());
        Vector(b)
    }

    pub fn into_block(self) -> Block {
        self.0
    }

    pub fn as_block(&self) -> &Block {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.scan_fsize() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[Boxed] {
        unsafe { slice::from_raw_parts(self.0.fields_ptr().add(1), self.len()) }
    }

    pub fn at(&self, index: usize) -> Option<&Boxed> {
        self.as_slice().get(index)
    }

    pub fn iter(&self) -> slice::Iter<'_, Boxed> {
        self.as_slice().iter()
    }

    pub fn is_shared_empty(&self) -> bool {
        self.0.ptr_eq(&EMPTY.block())
    }

    pub fn dup(&self) -> Vector {
        Vector(self.0.dup())
    }

    pub fn drop(self, ctx: &mut Context) {
        self.0.drop(ctx);
    }
}

impl<'a> IntoIterator for &'a Vector {
    type Item = &'a Boxed;
    type IntoIter = slice::Iter<'a, Boxed>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Debug for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

fn alloc_vector(len: usize, ctx: &mut Context) -> Block {
    unsafe { Block::alloc_large(block_size(len + 1, 0), len + 1, Tag::VECTOR, ctx) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_vector_is_static() {
        let mut ctx = Context::new();
        let a = Vector::from_elem(0, Boxed::unit(), &mut ctx);
        let b = Vector::empty();
        assert!(a.as_block().ptr_eq(b.as_block()));
        assert!(a.is_empty());
        a.drop(&mut ctx);
        b.drop(&mut ctx);
        assert_eq!(ctx.heap().stats().allocations, 0);
    }

    #[test]
    fn test_from_elem_shares_the_element() {
        let mut ctx = Context::new();
        let elem = Block::new(Tag::new(1), [], &mut ctx);
        let watch = elem.dup();
        let v = Vector::from_elem(3, Boxed::from_block(elem), &mut ctx);
        assert_eq!(v.len(), 3);
        assert_eq!(watch.refcount(), 3);
        v.drop(&mut ctx);
        assert_eq!(watch.refcount(), 0);
        watch.drop(&mut ctx);
        assert_eq!(ctx.heap().stats().live_bytes, 0);
    }

    /// Claims more elements than it yields.
    struct Overstated(Option<Boxed>);

    impl Iterator for Overstated {
        type Item = Boxed;

        fn next(&mut self) -> Option<Boxed> {
            self.0.take()
        }
    }

    impl ExactSizeIterator for Overstated {
        fn len(&self) -> usize {
            3
        }
    }

    #[test]
    fn test_from_iter_exact_fills_missing_slots_with_unit() {
        let mut ctx = Context::new();
        let elem = Block::new(Tag::new(1), [], &mut ctx);
        let watch = elem.dup();
        let v = Vector::from_iter_exact(Overstated(Some(Boxed::from_block(elem))), &mut ctx);
        assert_eq!(v.len(), 3);
        assert!(v.at(0).and_then(Boxed::as_block).is_some_and(|b| b.ptr_eq(&watch)));
        assert_eq!(v.at(1).map(Boxed::as_raw), Some(Boxed::unit().as_raw()));
        assert_eq!(v.at(2).map(Boxed::as_raw), Some(Boxed::unit().as_raw()));
        v.drop(&mut ctx);
        assert_eq!(watch.refcount(), 0);
        watch.drop(&mut ctx);
        assert_eq!(ctx.heap().stats().live_bytes, 0);
    }

    #[test]
    fn test_from_iter_exact_keeps_order() {
        let mut ctx = Context::new();
        let v = Vector::from_iter_exact((0..5).map(Boxed::from_enum), &mut ctx);
        let values: Vec<usize> = v.iter().map(Boxed::as_enum).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        assert_eq!(v.at(4).map(Boxed::as_enum), Some(4));
        assert!(v.at(5).is_none());
        v.drop(&mut ctx);
    }
}
