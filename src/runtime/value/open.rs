//! Open (extensible) datatypes.
//!
//! Constructors of an open type are not known when the type is declared, so
//! they cannot be given a fixed [`Tag`]. Each one is instead identified by a
//! name, and the process-wide registry assigns it an [`OpenTag`] the first
//! time the name is seen. The registry sits behind a lock and is never
//! touched by allocation or reference counting.

use std::{
    collections::HashMap,
    fmt,
    sync::{Mutex, OnceLock},
};

use crate::runtime::{
    context::Context,
    heap::{
        block::{Block, block_size},
        header::{SCAN_FSIZE_MAX, Tag},
    },
    value::boxed::Boxed,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpenTag(u32);

#[derive(Default)]
struct Registry {
    ids: HashMap<String, OpenTag>,
    names: Vec<String>,
}

fn registry() -> &'static Mutex<Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(Mutex::default)
}

impl OpenTag {
    /// Returns the tag for `name`, assigning the next free id on first use.
    pub fn intern(name: &str) -> OpenTag {
        let mut reg = registry().lock().unwrap_or_else(|e| e.into_inner());
        if let Some(&tag) = reg.ids.get(name) {
            return tag;
        }
        let tag = OpenTag(reg.names.len() as u32 + 1);
        reg.names.push(name.to_string());
        reg.ids.insert(name.to_string(), tag);
        tracing::debug!(name, id = tag.0, "registered open constructor");
        tag
    }

    pub fn id(self) -> u32 {
        self.0
    }

    pub fn name(self) -> Option<String> {
        let reg = registry().lock().unwrap_or_else(|e| e.into_inner());
        reg.names.get(self.0 as usize - 1).cloned()
    }
}

impl fmt::Display for OpenTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "open#{}", self.0),
        }
    }
}

/// An open tag that can sit in a `static` before its id is known.
pub struct LazyOpenTag {
    name: &'static str,
    tag: OnceLock<OpenTag>,
}

impl LazyOpenTag {
    pub const fn new(name: &'static str) -> LazyOpenTag {
        LazyOpenTag {
            name,
            tag: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self) -> OpenTag {
        *self.tag.get_or_init(|| OpenTag::intern(self.name))
    }
}

impl Block {
    /// Allocates an `OPEN` block: the boxed open tag in field 0, then `fields`.
    pub fn new_open<const N: usize>(tag: OpenTag, fields: [Boxed; N], ctx: &mut Context) -> Block {
        const { assert!(N + 1 < SCAN_FSIZE_MAX, "too many fields for an open block") };
        let b = unsafe { Block::alloc(block_size(N + 1, 0), N + 1, Tag::OPEN, ctx) };
        unsafe { b.init_field(0, Boxed::from_enum(tag.0 as usize)) };
        for (i, field) in fields.into_iter().enumerate() {
            unsafe { b.init_field(i + 1, field) };
        }
        b
    }

    pub fn open_tag(&self) -> Option<OpenTag> {
        if self.has_tag(Tag::OPEN) {
            Some(OpenTag(self.field(0).as_enum() as u32))
        } else {
            None
        }
    }
}
