use std::{fmt, mem};

use crate::runtime::{
    context::Context,
    heap::{
        block::{Block, block_size},
        header::Tag,
    },
};

/// Smallest integer that boxes without allocating.
pub const SMALL_INT_MIN: i64 = (isize::MIN >> 1) as i64;
/// Largest integer that boxes without allocating.
pub const SMALL_INT_MAX: i64 = (isize::MAX >> 1) as i64;

/// A uniformly represented value: one machine word.
///
/// ```text
/// ...xxxx0   pointer to a block (blocks are 8-byte aligned)
/// ...xxxx1   inline value, recovered by an arithmetic shift right
/// ```
///
/// A pointer box owns one reference to its block, so `Boxed` is not `Copy`:
/// [`Boxed::dup`] and [`Boxed::drop`] manage it like a [`Block`].
#[repr(transparent)]
#[must_use = "a boxed value may own a block reference; release it with `drop`"]
pub struct Boxed(usize);

/// Result of inspecting a box.
#[derive(Debug)]
pub enum Unboxed<'a> {
    Ptr(&'a Block),
    Value(isize),
}

impl Boxed {
    /// Boxes an enumeration value or other non-negative inline word.
    #[inline]
    pub const fn from_enum(value: usize) -> Boxed {
        Boxed((value << 1) | 1)
    }

    #[inline]
    pub const fn from_small_int(value: isize) -> Boxed {
        Boxed(((value << 1) | 1) as usize)
    }

    /// The unit value, boxed as enumeration 0.
    #[inline]
    pub const fn unit() -> Boxed {
        Boxed::from_enum(0)
    }

    #[inline]
    pub fn from_block(b: Block) -> Boxed {
        let addr = b.into_raw().as_ptr() as usize;
        debug_assert!(addr & 1 == 0, "misaligned block {addr:#x}");
        Boxed(addr)
    }

    /// Reinterprets a raw word.
    ///
    /// # Safety
    /// A word with bit 0 clear must be a block pointer carrying one reference
    /// that the new box takes over.
    #[inline]
    pub const unsafe fn from_raw(word: usize) -> Boxed {
        Boxed(word)
    }

    /// Gives up the box without touching any count.
    #[inline]
    pub fn into_raw(self) -> usize {
        self.0
    }

    #[inline]
    pub fn as_raw(&self) -> usize {
        self.0
    }

    #[inline]
    pub fn is_ptr(&self) -> bool {
        self.0 & 1 == 0
    }

    #[inline]
    pub fn is_value(&self) -> bool {
        self.0 & 1 == 1
    }

    #[inline]
    pub fn as_enum(&self) -> usize {
        debug_assert!(self.is_value());
        self.0 >> 1
    }

    #[inline]
    pub fn as_small_int(&self) -> isize {
        debug_assert!(self.is_value());
        (self.0 as isize) >> 1
    }

    /// Borrows the block behind a pointer box.
    #[inline]
    pub fn as_block(&self) -> Option<&Block> {
        if self.is_ptr() && self.0 != 0 {
            // Boxed and Block are both a single transparent word.
            Some(unsafe { &*(self as *const Boxed).cast::<Block>() })
        } else {
            None
        }
    }

    /// Takes the block out of a pointer box. Inline values need no release
    /// and are discarded.
    #[inline]
    pub fn into_block(self) -> Option<Block> {
        if self.is_ptr() && self.0 != 0 {
            Some(unsafe { Block::from_raw(std::ptr::NonNull::new_unchecked(self.0 as *mut _)) })
        } else {
            None
        }
    }

    pub fn unbox(&self) -> Unboxed<'_> {
        match self.as_block() {
            Some(b) => Unboxed::Ptr(b),
            None => Unboxed::Value(self.as_small_int()),
        }
    }

    #[inline]
    pub fn dup(&self) -> Boxed {
        match self.as_block() {
            Some(b) => Boxed::from_block(b.dup()),
            None => Boxed(self.0),
        }
    }

    #[inline]
    pub fn drop(self, ctx: &mut Context) {
        if let Some(b) = self.into_block() {
            b.drop(ctx);
        }
    }

    /// Boxes an `i64`, allocating an `INT64` block outside the small range.
    pub fn from_i64(value: i64, ctx: &mut Context) -> Boxed {
        if (SMALL_INT_MIN..=SMALL_INT_MAX).contains(&value) {
            return Boxed::from_small_int(value as isize);
        }
        let b = unsafe { Block::alloc(block_size(0, 8), 0, Tag::INT64, ctx) };
        unsafe { b.raw_ptr().cast::<i64>().write(value) };
        Boxed::from_block(b)
    }

    pub fn to_i64(&self) -> i64 {
        match self.as_block() {
            Some(b) => {
                debug_assert_eq!(b.tag(), Tag::INT64);
                unsafe { b.raw_ptr().cast::<i64>().read() }
            }
            None => self.as_small_int() as i64,
        }
    }

    /// Boxes an `f64` in a `DOUBLE` block.
    pub fn from_f64(value: f64, ctx: &mut Context) -> Boxed {
        let b = unsafe { Block::alloc(block_size(0, 8), 0, Tag::DOUBLE, ctx) };
        unsafe { b.raw_ptr().cast::<f64>().write(value) };
        Boxed::from_block(b)
    }

    pub fn to_f64(&self) -> f64 {
        match self.as_block() {
            Some(b) => {
                debug_assert_eq!(b.tag(), Tag::DOUBLE);
                unsafe { b.raw_ptr().cast::<f64>().read() }
            }
            None => {
                crate::runtime::error::warning_message(format_args!(
                    "unboxing an inline value {:#x} as a double",
                    self.0
                ));
                self.as_small_int() as f64
            }
        }
    }
}

impl fmt::Debug for Boxed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unbox() {
            Unboxed::Ptr(b) => write!(f, "Boxed({:#x}: {})", b.addr(), b.tag()),
            Unboxed::Value(v) => write!(f, "Boxed({v})"),
        }
    }
}

const _: () = assert!(mem::size_of::<Boxed>() == mem::size_of::<Block>());
