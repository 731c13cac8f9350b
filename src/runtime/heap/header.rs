use std::{
    fmt,
    sync::atomic::{AtomicU8, AtomicU32, Ordering},
};

/// Largest scan-field count that fits in the header byte. A header holding
/// this value keeps the real count boxed in the block's first field.
pub const SCAN_FSIZE_MAX: usize = 0xFF;

/// Offset added to the count of a block once it becomes thread-shared.
///
/// Setting the top bit routes every duplicate/drop of a shared block to the
/// atomic slow path. The logical count of a shared block is `raw - RC_SHARED`.
///
/// A local count can reach exactly this value by overflowing past
/// `i32::MAX`. The thread-shared flag, not the count, selects the atomic
/// path, so such a block is pinned to [`RC_STICKY`] on its next slow-path
/// visit instead of being treated as shared.
pub const RC_SHARED: u32 = 0x8000_0000;

/// Counts at or above this value are sticky: never incremented, never
/// decremented, and the block is never freed.
pub const RC_STICKY: u32 = 0xC000_0000;

const FLAG_THREAD_SHARED: u8 = 0x01;

/// Runtime shape of a heap block.
///
/// `MIN..=MAX` is reserved for user-defined constructors. The built-in tags
/// follow, and the raw-payload tags are contiguous at the very top so that
/// [`Tag::is_raw`] is a single comparison.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(u16);

impl Tag {
    pub const INVALID: Tag = Tag(0);
    pub const MIN: Tag = Tag(1);
    pub const MAX: Tag = Tag(65000);
    /// Open (extensible) datatype; field 0 holds the boxed open tag.
    pub const OPEN: Tag = Tag(65001);
    /// Boxed value type.
    pub const BOX: Tag = Tag(65002);
    /// Mutable reference cell.
    pub const REF: Tag = Tag(65003);
    /// Function with its free variables.
    pub const FUNCTION: Tag = Tag(65004);
    pub const BIGINT: Tag = Tag(65005);
    /// UTF-8 string of at most 7 bytes.
    pub const STRING_SMALL: Tag = Tag(65006);
    pub const STRING: Tag = Tag(65007);
    /// In-place byte buffer.
    pub const BYTES: Tag = Tag(65008);
    /// Vector of boxed values, always a large block.
    pub const VECTOR: Tag = Tag(65009);
    pub const INT64: Tag = Tag(65010);
    pub const DOUBLE: Tag = Tag(65011);
    pub const INT32: Tag = Tag(65012);
    pub const FLOAT: Tag = Tag(65013);
    pub const CFUNPTR: Tag = Tag(65014);
    /// Foreign pointer with a destructor. Must stay the first raw tag.
    pub const CPTR_RAW: Tag = Tag(65015);
    pub const STRING_RAW: Tag = Tag(65016);
    pub const BYTES_RAW: Tag = Tag(65017);
    pub const LAST: Tag = Tag(65018);

    pub const fn new(raw: u16) -> Tag {
        Tag(raw)
    }

    /// Returns the user constructor tag `n`, or `None` outside `MIN..=MAX`.
    pub const fn user(n: u16) -> Option<Tag> {
        if n >= Tag::MIN.0 && n <= Tag::MAX.0 {
            Some(Tag(n))
        } else {
            None
        }
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn is_user(self) -> bool {
        self.0 >= Tag::MIN.0 && self.0 <= Tag::MAX.0
    }

    /// Raw blocks own an external payload released through a stored
    /// destructor instead of a field scan.
    pub const fn is_raw(self) -> bool {
        self.0 >= Tag::CPTR_RAW.0
    }

    /// Label used in diagnostics. User constructors are reported as `user`.
    pub fn label(self) -> &'static str {
        match self {
            Tag::INVALID => "invalid",
            Tag::OPEN => "open",
            Tag::BOX => "box",
            Tag::REF => "ref",
            Tag::FUNCTION => "function",
            Tag::BIGINT => "bigint",
            Tag::STRING_SMALL => "string-small",
            Tag::STRING => "string",
            Tag::BYTES => "bytes",
            Tag::VECTOR => "vector",
            Tag::INT64 => "int64",
            Tag::DOUBLE => "double",
            Tag::INT32 => "int32",
            Tag::FLOAT => "float",
            Tag::CFUNPTR => "cfunptr",
            Tag::CPTR_RAW => "cptr-raw",
            Tag::STRING_RAW => "string-raw",
            Tag::BYTES_RAW => "bytes-raw",
            t if t.is_user() => "user",
            _ => "reserved",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_user() {
            write!(f, "user({})", self.0)
        } else {
            f.write_str(self.label())
        }
    }
}

/// The 8-byte header in front of every heap block.
///
/// ```text
/// byte 0      scan_fsize (0xFF: see the boxed count in field 0)
/// byte 1      flags      (bit 0: thread-shared)
/// bytes 2..4  tag
/// bytes 4..8  refcount   (0 = unique owner)
/// ```
///
/// The count is stored in an `AtomicU32` so the thread-shared slow path can
/// use read-modify-write operations on it. The unshared fast path only ever
/// issues relaxed loads and stores, which compile to plain moves.
#[repr(C)]
pub struct Header {
    scan_fsize: u8,
    flags: AtomicU8,
    tag: u16,
    refcount: AtomicU32,
}

impl Header {
    /// Header of a freshly allocated block: unique, not shared.
    pub const fn new(scan_fsize: u8, tag: Tag) -> Header {
        Header {
            scan_fsize,
            flags: AtomicU8::new(0),
            tag: tag.0,
            refcount: AtomicU32::new(0),
        }
    }

    /// Header of a statically allocated block. Static blocks are sticky and
    /// thread-shared from the start so nothing ever writes to them.
    pub const fn new_static(scan_fsize: u8, tag: Tag) -> Header {
        Header {
            scan_fsize,
            flags: AtomicU8::new(FLAG_THREAD_SHARED),
            tag: tag.0,
            refcount: AtomicU32::new(RC_STICKY),
        }
    }

    #[inline]
    pub fn tag(&self) -> Tag {
        Tag(self.tag)
    }

    /// The inline scan-field byte; `SCAN_FSIZE_MAX` for large blocks.
    #[inline]
    pub fn scan_fsize_byte(&self) -> u8 {
        self.scan_fsize
    }

    #[inline]
    pub fn is_thread_shared(&self) -> bool {
        self.flags.load(Ordering::Relaxed) & FLAG_THREAD_SHARED != 0
    }

    /// Raw stored count, including the shared offset.
    #[inline]
    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn rc(&self) -> &AtomicU32 {
        &self.refcount
    }

    pub(crate) fn set_thread_shared(&self) {
        self.flags.fetch_or(FLAG_THREAD_SHARED, Ordering::Relaxed);
    }

    /// Packs the header into the little-endian word it occupies in memory.
    pub fn pack(&self) -> u64 {
        u64::from(self.scan_fsize)
            | (u64::from(self.flags.load(Ordering::Relaxed)) << 8)
            | (u64::from(self.tag) << 16)
            | (u64::from(self.refcount()) << 32)
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("scan_fsize", &self.scan_fsize)
            .field("thread_shared", &self.is_thread_shared())
            .field("tag", &self.tag())
            .field("refcount", &format_args!("{:#x}", self.refcount()))
            .finish()
    }
}
