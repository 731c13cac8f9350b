use std::{fmt, sync::OnceLock};

use crate::runtime::{
    context::Context,
    error::{FatalError, fatal_error},
    heap::{
        block::{Block, block_size},
        header::{SCAN_FSIZE_MAX, Tag},
        shared::SharedBlock,
    },
    value::boxed::Boxed,
};

/// Code of a function value. It receives ownership of the function itself
/// (to read and release its captures) and of the argument.
pub type FunCode = fn(Function, Boxed, &mut Context) -> Boxed;

/// A function value: a `FUNCTION` block whose field 0 is the code pointer,
/// boxed as an inline value, followed by the captured free variables.
#[repr(transparent)]
#[must_use = "a function value owns a reference; release it with `drop`"]
pub struct Function(Block);

impl Function {
    pub fn new<const N: usize>(code: FunCode, captures: [Boxed; N], ctx: &mut Context) -> Function {
        const { assert!(N + 1 < SCAN_FSIZE_MAX, "too many captures") };
        let b = unsafe { Block::alloc(block_size(N + 1, 0), N + 1, Tag::FUNCTION, ctx) };
        unsafe { b.init_field(0, box_code(code)) };
        for (i, capture) in captures.into_iter().enumerate() {
            unsafe { b.init_field(i + 1, capture) };
        }
        Function(b)
    }

    /// # Safety
    /// `b` must be a block built by [`Function::new`] or an equivalent layout.
    pub unsafe fn from_block(b: Block) -> Function {
        debug_assert_eq!(b.tag(), Tag::FUNCTION);
        Function(b)
    }

    /// Reinterprets a box holding a function.
    ///
    /// # Safety
    /// `b` must be a pointer box to a function block.
    pub unsafe fn from_boxed(b: Boxed) -> Function {
        match b.into_block() {
            Some(block) => unsafe { Function::from_block(block) },
            None => fatal_error(FatalError::Internal("inline value used as a function".into())),
        }
    }

    pub fn into_block(self) -> Block {
        self.0
    }

    pub fn into_boxed(self) -> Boxed {
        Boxed::from_block(self.0)
    }

    pub fn as_block(&self) -> &Block {
        &self.0
    }

    pub fn code(&self) -> FunCode {
        let addr = self.0.field(0).as_enum();
        // SAFETY: field 0 only ever holds an address boxed by `box_code`.
        unsafe { std::mem::transmute::<usize, FunCode>(addr) }
    }

    pub fn capture_count(&self) -> usize {
        self.0.scan_fsize() - 1
    }

    pub fn capture(&self, index: usize) -> &Boxed {
        self.0.field(index + 1)
    }

    /// Applies the function, consuming it.
    pub fn call(self, arg: Boxed, ctx: &mut Context) -> Boxed {
        let code = self.code();
        code(self, arg, ctx)
    }

    pub fn dup(&self) -> Function {
        Function(self.0.dup())
    }

    pub fn drop(self, ctx: &mut Context) {
        self.0.drop(ctx);
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        self.0.ptr_eq(&other.0)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("addr", &format_args!("{:#x}", self.0.addr()))
            .field("captures", &self.capture_count())
            .finish()
    }
}

fn box_code(code: FunCode) -> Boxed {
    Boxed::from_enum(code as usize)
}

fn id_code(f: Function, arg: Boxed, ctx: &mut Context) -> Boxed {
    f.drop(ctx);
    arg
}

fn null_code(f: Function, arg: Boxed, ctx: &mut Context) -> Boxed {
    f.drop(ctx);
    arg.drop(ctx);
    fatal_error(FatalError::Unsupported("call of a null function".into()))
}

fn singleton(cell: &'static OnceLock<SharedBlock>, code: FunCode) -> Function {
    let shared = cell.get_or_init(|| Block::new_immortal(Tag::FUNCTION, [box_code(code)]));
    Function(shared.dup().into_block())
}

/// The identity function. Process-wide and never freed.
pub fn function_id() -> Function {
    static ID: OnceLock<SharedBlock> = OnceLock::new();
    singleton(&ID, id_code)
}

/// A placeholder function that is a fatal error to call.
pub fn function_null() -> Function {
    static NULL: OnceLock<SharedBlock> = OnceLock::new();
    singleton(&NULL, null_code)
}
