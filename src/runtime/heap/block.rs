use std::{fmt, mem, ptr::NonNull};

use crate::runtime::{
    heap::header::{Header, RC_SHARED, RC_STICKY, SCAN_FSIZE_MAX, Tag},
    value::boxed::Boxed,
};

/// Size of one scanned field.
pub const FIELD_SIZE: usize = mem::size_of::<Boxed>();
pub const HEADER_SIZE: usize = mem::size_of::<Header>();

/// Bytes needed for a block with `scan_fsize` fields followed by `raw_bytes`.
pub const fn block_size(scan_fsize: usize, raw_bytes: usize) -> usize {
    HEADER_SIZE + scan_fsize * FIELD_SIZE + raw_bytes
}

/// Destructor stored in raw blocks, called with the payload pointer and length.
pub type FreeFn = unsafe fn(data: *mut u8, len: usize);

/// Trailing layout shared by every raw-tagged block.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawPayload {
    pub free: Option<FreeFn>,
    pub data: *mut u8,
    pub len: usize,
}

/// Owning handle to a heap block.
///
/// A `Block` stands for one unit of ownership: [`Block::dup`] produces
/// another owner and [`Block::drop`] gives one up. There is no `Drop` impl
/// because releasing needs the thread context; a forgotten handle leaks.
/// The pointer is never null, so the refcount paths skip null checks.
#[repr(transparent)]
#[must_use = "a block handle owns a reference; release it with `drop`"]
pub struct Block(pub(crate) NonNull<Header>);

impl Block {
    /// Wraps a raw block pointer, taking over one unit of ownership.
    ///
    /// # Safety
    /// `ptr` must point to an initialized block and the caller must own the
    /// reference being handed over.
    #[inline]
    pub unsafe fn from_raw(ptr: NonNull<Header>) -> Block {
        Block(ptr)
    }

    /// Gives up the handle without touching the count.
    #[inline]
    pub fn into_raw(self) -> NonNull<Header> {
        self.0
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut Header {
        self.0.as_ptr()
    }

    #[inline]
    pub fn addr(&self) -> usize {
        self.0.as_ptr() as usize
    }

    #[inline]
    pub fn ptr_eq(&self, other: &Block) -> bool {
        self.0 == other.0
    }

    #[inline]
    pub fn header(&self) -> &Header {
        unsafe { self.0.as_ref() }
    }

    #[inline]
    pub fn tag(&self) -> Tag {
        self.header().tag()
    }

    #[inline]
    pub fn has_tag(&self, tag: Tag) -> bool {
        self.tag() == tag
    }

    #[inline]
    pub fn is_large(&self) -> bool {
        self.header().scan_fsize_byte() as usize == SCAN_FSIZE_MAX
    }

    /// Number of leading owned fields. For large blocks this reads the boxed
    /// count in field 0, which counts itself.
    #[inline]
    pub fn scan_fsize(&self) -> usize {
        let sfsize = self.header().scan_fsize_byte() as usize;
        if sfsize != SCAN_FSIZE_MAX {
            return sfsize;
        }
        unsafe { (*self.fields_ptr()).as_enum() }
    }

    /// Logical owner count minus one: 0 for a unique block. The shared
    /// offset is removed for thread-shared blocks; sticky counts are
    /// reported as stored.
    #[inline]
    pub fn refcount(&self) -> u32 {
        let rc = self.header().refcount();
        if self.is_thread_shared() && rc < RC_STICKY {
            rc - RC_SHARED
        } else {
            rc
        }
    }

    #[inline]
    pub fn raw_refcount(&self) -> u32 {
        self.header().refcount()
    }

    #[inline]
    pub fn is_unique(&self) -> bool {
        self.header().refcount() == 0
    }

    #[inline]
    pub fn is_thread_shared(&self) -> bool {
        self.header().is_thread_shared()
    }

    #[inline]
    pub fn is_sticky(&self) -> bool {
        self.header().refcount() >= RC_STICKY
    }

    /// Borrows scanned field `index`.
    #[inline]
    pub fn field(&self, index: usize) -> &Boxed {
        debug_assert!(
            index < self.scan_fsize(),
            "field {index} out of range for {} with {} scanned fields",
            self.tag(),
            self.scan_fsize()
        );
        unsafe { &*self.fields_ptr().add(index) }
    }

    /// Writes field `index` of a block under construction without reading
    /// the previous contents.
    ///
    /// # Safety
    /// The block must be uniquely owned by the caller and the slot must not
    /// hold a live value (it would leak).
    #[inline]
    pub unsafe fn init_field(&self, index: usize, value: Boxed) {
        unsafe { self.fields_ptr().add(index).write(value) }
    }

    /// Moves field `index` out, leaving the slot logically uninitialized.
    ///
    /// # Safety
    /// The slot must be initialized and must not be read again before it is
    /// re-initialized or the storage is released without a field scan.
    #[inline]
    pub(crate) unsafe fn take_field(&self, index: usize) -> Boxed {
        unsafe { self.fields_ptr().add(index).read() }
    }

    /// Swaps the value in field `index`, returning the old owner.
    ///
    /// # Safety
    /// No borrow of the field obtained through [`Block::field`] may be alive,
    /// and no other thread may access the field concurrently.
    #[inline]
    pub(crate) unsafe fn replace_field(&self, index: usize, value: Boxed) -> Boxed {
        unsafe { self.fields_ptr().add(index).replace(value) }
    }

    #[inline]
    pub(crate) fn fields_ptr(&self) -> *mut Boxed {
        unsafe { self.0.as_ptr().add(1).cast::<Boxed>() }
    }

    /// Start of the raw bytes that follow the scanned fields.
    #[inline]
    pub fn raw_ptr(&self) -> *mut u8 {
        unsafe { self.fields_ptr().add(self.scan_fsize()).cast::<u8>() }
    }

    /// Raw payload of a raw-tagged block.
    pub fn raw_payload(&self) -> &RawPayload {
        debug_assert!(self.tag().is_raw(), "{} is not a raw block", self.tag());
        unsafe { &*self.raw_ptr().cast::<RawPayload>() }
    }

    /// Shares this handle's pointer without changing the count. Used by
    /// release code that has already accounted for ownership.
    #[inline]
    pub(crate) fn alias(&self) -> Block {
        Block(self.0)
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("tag", &self.tag())
            .field("scan_fsize", &self.scan_fsize())
            .field("refcount", &self.refcount())
            .field("thread_shared", &self.is_thread_shared())
            .finish()
    }
}

/// A block with static storage duration.
///
/// Static headers are sticky and thread-shared (see [`Header::new_static`]),
/// so duplicating or dropping a handle to one never writes to it and it can
/// be reached from every thread.
#[repr(C, align(8))]
pub struct StaticBlock<const N: usize> {
    header: Header,
    fields: [usize; N],
}

impl<const N: usize> StaticBlock<N> {
    /// A small static block with `N` scanned fields given as raw box words.
    /// Pointer fields must reference other static blocks.
    pub const fn new(tag: Tag, fields: [usize; N]) -> Self {
        assert!(N < SCAN_FSIZE_MAX);
        StaticBlock {
            header: Header::new_static(N as u8, tag),
            fields,
        }
    }

    /// A large static block. `fields[0]` must be the boxed count `N`.
    pub const fn new_large(tag: Tag, fields: [usize; N]) -> Self {
        assert!(N >= 1 && fields[0] == (N << 1) | 1);
        StaticBlock {
            header: Header::new_static(SCAN_FSIZE_MAX as u8, tag),
            fields,
        }
    }

    pub fn block(&'static self) -> Block {
        Block(NonNull::from(self).cast::<Header>())
    }
}
