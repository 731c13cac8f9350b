//! Header-prefixed heap blocks and their reference counts.

pub mod alloc;
pub mod arena;
pub mod block;
pub mod header;
pub mod refcount;
pub mod reuse;
pub mod shared;

pub use arena::{Heap, HeapStats};
pub use block::{Block, FreeFn, RawPayload, StaticBlock, block_size};
pub use header::{Header, RC_SHARED, RC_STICKY, SCAN_FSIZE_MAX, Tag};
pub use reuse::{Reuse, drop_match, keep_match, reuse_match};
pub use shared::SharedBlock;
