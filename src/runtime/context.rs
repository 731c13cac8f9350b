//! The per-thread execution context.
//!
//! Every operation that can allocate or free takes a `&mut Context`. A
//! context owns the thread's heap handle and counters and is never shared or
//! moved to another thread. It holds block handles, so it is neither `Send`
//! nor `Sync`.

use std::{
    cell::RefCell,
    fmt, mem,
    sync::atomic::{AtomicUsize, Ordering},
};

use num_bigint::BigInt;

use crate::runtime::{
    config::RuntimeConfig,
    error::{FatalError, fatal_error, warning_message},
    heap::{arena::Heap, block::Block, refcount::free_block},
    value::{boxed::Boxed, function::Function, vector::Vector},
};

/// Continuations kept in place before spilling to the overflow chain.
pub const YIELD_CONT_MAX: usize = 8;

static NEXT_THREAD_ID: AtomicUsize = AtomicUsize::new(1);

/// Whether the thread is unwinding to an effect handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Yielding {
    #[default]
    None,
    Normal,
    /// The handler will not resume; continuations are not collected.
    Final,
}

#[derive(Default)]
struct YieldState {
    marker: i32,
    clause: Option<Function>,
    conts: [Option<Function>; YIELD_CONT_MAX],
    conts_count: usize,
    /// Spilled continuations, newest chunk first. Each chunk is a vector
    /// whose element 0 links to the next older chunk (or is unit).
    overflow: Option<Vector>,
}

/// A completed yield handed to the handler.
#[derive(Debug)]
pub struct YieldRequest {
    pub marker: i32,
    pub clause: Function,
    /// Captured continuations, oldest first.
    pub conts: Vec<Function>,
    pub is_final: bool,
}

impl YieldRequest {
    pub fn drop(self, ctx: &mut Context) {
        self.clause.drop(ctx);
        for k in self.conts {
            k.drop(ctx);
        }
    }
}

pub struct Context {
    yielding: Yielding,
    heap: Heap,
    evv: Vector,
    yield_state: YieldState,
    marker_unique: i32,
    delayed_free: Vec<Block>,
    pub(crate) release_depth: usize,
    pub(crate) draining: bool,
    unique: BigInt,
    thread_id: usize,
    config: RuntimeConfig,
}

impl Context {
    /// A context using the process-wide configuration.
    pub fn new() -> Context {
        Context::with_config(RuntimeConfig::global().clone())
    }

    pub fn with_config(config: RuntimeConfig) -> Context {
        let thread_id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(thread_id, ?config, "thread context created");
        Context {
            yielding: Yielding::None,
            heap: Heap::new(),
            evv: Vector::empty(),
            yield_state: YieldState::default(),
            marker_unique: 1,
            delayed_free: Vec::with_capacity(config.delayed_free_capacity),
            release_depth: 0,
            draining: false,
            unique: BigInt::from(1),
            thread_id,
            config,
        }
    }

    #[inline]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn thread_id(&self) -> usize {
        self.thread_id
    }

    pub(crate) fn delay_free(&mut self, b: Block) {
        self.delayed_free.push(b);
    }

    pub(crate) fn take_delayed(&mut self) -> Option<Block> {
        self.delayed_free.pop()
    }

    pub fn delayed_free_len(&self) -> usize {
        self.delayed_free.len()
    }

    /// A fresh effect-handler marker. Never 0; wraps back to 1 before
    /// overflowing.
    pub fn marker_unique(&mut self) -> i32 {
        self.marker_unique += 1;
        let m = self.marker_unique;
        if m == i32::MAX {
            self.marker_unique = 1;
        }
        m
    }

    /// A process-lifetime unique id for this thread. Unbounded, never wraps.
    pub fn gen_unique(&mut self) -> BigInt {
        let next = &self.unique + 1;
        mem::replace(&mut self.unique, next)
    }

    pub fn evv(&self) -> &Vector {
        &self.evv
    }

    /// Installs a new evidence vector, returning the previous one.
    pub fn swap_evv(&mut self, evv: Vector) -> Vector {
        mem::replace(&mut self.evv, evv)
    }

    #[inline]
    pub fn is_yielding(&self) -> bool {
        self.yielding != Yielding::None
    }

    #[inline]
    pub fn yielding_non_final(&self) -> bool {
        self.yielding == Yielding::Normal
    }

    #[inline]
    pub fn yielding_final(&self) -> bool {
        self.yielding == Yielding::Final
    }

    /// Starts unwinding to the handler identified by `marker`.
    pub fn yield_to(&mut self, kind: Yielding, marker: i32, clause: Function) {
        if kind == Yielding::None {
            fatal_error(FatalError::Internal("yield without a yield kind".into()));
        }
        debug_assert!(!self.is_yielding(), "already yielding");
        debug_assert!(marker != 0, "marker 0 is never valid");
        self.yielding = kind;
        self.yield_state.marker = marker;
        if let Some(old) = self.yield_state.clause.replace(clause) {
            old.drop(self);
        }
    }

    /// Records a continuation captured while unwinding.
    pub fn yield_push_cont(&mut self, k: Function) {
        debug_assert!(self.yielding_non_final(), "continuation pushed outside a resumable yield");
        if self.yield_state.conts_count == YIELD_CONT_MAX {
            self.spill_conts();
        }
        let i = self.yield_state.conts_count;
        self.yield_state.conts[i] = Some(k);
        self.yield_state.conts_count = i + 1;
    }

    fn spill_conts(&mut self) {
        let link = match self.yield_state.overflow.take() {
            Some(chunk) => Boxed::from_block(chunk.into_block()),
            None => Boxed::unit(),
        };
        let conts = mem::take(&mut self.yield_state.conts);
        let mut elems = Vec::with_capacity(YIELD_CONT_MAX + 1);
        elems.push(link);
        elems.extend(conts.into_iter().flatten().map(Function::into_boxed));
        let chunk = Vector::from_iter_exact(elems, self);
        tracing::trace!(thread_id = self.thread_id, "yield continuations spilled");
        self.yield_state.overflow = Some(chunk);
        self.yield_state.conts_count = 0;
    }

    /// Ends the yield and hands its state to the handler.
    pub fn yield_take(&mut self) -> Option<YieldRequest> {
        if !self.is_yielding() {
            return None;
        }
        let is_final = self.yielding == Yielding::Final;
        self.yielding = Yielding::None;
        let state = mem::take(&mut self.yield_state);
        let clause = match state.clause {
            Some(clause) => clause,
            None => fatal_error(FatalError::Internal("yield without a clause".into())),
        };

        let mut chunks = Vec::new();
        let mut link = state.overflow;
        while let Some(chunk) = link {
            let mut elems = chunk.iter();
            link = elems
                .next()
                .and_then(Boxed::as_block)
                .map(|b| unsafe { Vector::from_block(b.dup()) });
            let group: Vec<Function> = elems.map(|k| unsafe { Function::from_boxed(k.dup()) }).collect();
            chunks.push(group);
            chunk.drop(self);
        }
        let mut conts: Vec<Function> = chunks.into_iter().rev().flatten().collect();
        conts.extend(state.conts.into_iter().take(state.conts_count).flatten());

        Some(YieldRequest {
            marker: state.marker,
            clause,
            conts,
            is_final,
        })
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("thread_id", &self.thread_id)
            .field("yielding", &self.yielding)
            .field("marker_unique", &self.marker_unique)
            .field("unique", &self.unique)
            .field("heap", &self.heap.stats())
            .finish()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if self.is_yielding() {
            warning_message(format_args!(
                "thread context {} dropped while yielding",
                self.thread_id
            ));
        }
        if let Some(request) = self.yield_take() {
            request.drop(self);
        }
        let evv = self.swap_evv(Vector::empty());
        evv.drop(self);
        while let Some(b) = self.take_delayed() {
            free_block(b, self);
        }

        let stats = self.heap.stats();
        tracing::debug!(
            thread_id = self.thread_id,
            allocations = stats.allocations,
            frees = stats.frees,
            live_bytes = stats.live_bytes,
            peak_bytes = stats.peak_bytes,
            "thread context torn down"
        );
        if self.config.warn_on_leak && stats.live_bytes > 0 {
            warning_message(format_args!(
                "thread context {} leaked {} bytes in {} blocks",
                self.thread_id,
                stats.live_bytes,
                stats.allocations - stats.frees
            ));
        }
    }
}

thread_local! {
    static CONTEXT: RefCell<Context> = RefCell::new(Context::new());
}

/// Runs `f` with the calling thread's context, creating it on first use.
///
/// The context is dropped at thread exit. Calls may not nest.
pub fn with_context<R>(f: impl FnOnce(&mut Context) -> R) -> R {
    CONTEXT.with_borrow_mut(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::value::function::function_id;

    fn tagged_cont(f: Function, arg: Boxed, ctx: &mut Context) -> Boxed {
        let tag = f.capture(0).as_small_int();
        f.drop(ctx);
        arg.drop(ctx);
        Boxed::from_small_int(tag)
    }

    fn cont(n: isize, ctx: &mut Context) -> Function {
        Function::new(tagged_cont, [Boxed::from_small_int(n)], ctx)
    }

    #[test]
    fn test_marker_unique_skips_zero() {
        let mut ctx = Context::new();
        assert_eq!(ctx.marker_unique(), 2);
        ctx.marker_unique = i32::MAX - 1;
        assert_eq!(ctx.marker_unique(), i32::MAX);
        assert_eq!(ctx.marker_unique(), 2);
    }

    #[test]
    fn test_gen_unique_counts_from_one() {
        let mut ctx = Context::new();
        assert_eq!(ctx.gen_unique(), BigInt::from(1));
        assert_eq!(ctx.gen_unique(), BigInt::from(2));
    }

    #[test]
    fn test_yield_keeps_continuation_order_across_spills() {
        let mut ctx = Context::new();
        let marker = ctx.marker_unique();
        ctx.yield_to(Yielding::Normal, marker, function_id());
        for n in 0..20 {
            let k = cont(n, &mut ctx);
            ctx.yield_push_cont(k);
        }
        let request = ctx.yield_take().expect("yielding");
        assert!(!ctx.is_yielding());
        assert_eq!(request.marker, marker);
        let order: Vec<isize> = request.conts.iter().map(|k| k.capture(0).as_small_int()).collect();
        assert_eq!(order, (0..20).collect::<Vec<isize>>());
        request.drop(&mut ctx);
        assert_eq!(ctx.heap().stats().live_bytes, 0);
    }

    #[test]
    fn test_final_yield_has_no_continuations() {
        let mut ctx = Context::new();
        ctx.yield_to(Yielding::Final, 3, function_id());
        assert!(ctx.yielding_final());
        let request = ctx.yield_take().expect("yielding");
        assert!(request.is_final);
        assert!(request.conts.is_empty());
        request.drop(&mut ctx);
        assert!(ctx.yield_take().is_none());
    }

    #[test]
    fn test_swap_evv_returns_previous() {
        let mut ctx = Context::new();
        let evv = Vector::from_elem(2, Boxed::unit(), &mut ctx);
        let old = ctx.swap_evv(evv);
        assert!(old.is_shared_empty());
        assert_eq!(ctx.evv().len(), 2);
        old.drop(&mut ctx);
    }

    #[test]
    fn test_thread_ids_are_distinct() {
        let a = Context::new();
        let b = Context::new();
        assert_ne!(a.thread_id(), b.thread_id());
        with_context(|ctx| assert!(ctx.thread_id() > 0));
    }
}
