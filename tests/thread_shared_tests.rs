mod common;

use aether::runtime::{
    Context,
    heap::{Block, Tag},
    value::{Boxed, Ref, function_id},
    with_context,
};
use common::{DropCounter, assert_heap_empty};

const THREADS: usize = 8;
const PAIRS: usize = 10_000;

#[test]
fn test_concurrent_dup_drop_is_balanced() {
    let mut ctx = Context::new();
    let counter = DropCounter::new();
    let field = counter.field(&mut ctx);
    let b = Block::new(Tag::new(500), [field], &mut ctx);
    let extra = b.dup();
    assert_eq!(b.refcount(), 1);

    let shared = b.into_shared();
    assert_eq!(shared.refcount(), 1);

    rayon::scope(|s| {
        for _ in 0..THREADS {
            let handle = &shared;
            s.spawn(move |_| {
                with_context(|ctx| {
                    for _ in 0..PAIRS {
                        let d = handle.dup();
                        d.drop(ctx);
                    }
                });
            });
        }
    });

    assert_eq!(shared.refcount(), 1);
    assert_eq!(counter.released(), 0);

    extra.drop(&mut ctx);
    assert_eq!(shared.refcount(), 0);
    assert_eq!(counter.released(), 0);

    shared.drop(&mut ctx);
    assert_eq!(counter.released(), 1);
    assert_heap_empty(&ctx);
}

#[test]
fn test_last_drop_on_another_thread_frees_once() {
    let mut ctx = Context::new();
    let counter = DropCounter::new();
    let field = counter.field(&mut ctx);
    let shared = Block::new(Tag::new(7), [field], &mut ctx).into_shared();
    let handles: Vec<_> = (0..THREADS).map(|_| shared.dup()).collect();
    shared.drop(&mut ctx);

    rayon::scope(|s| {
        for handle in handles {
            s.spawn(move |_| with_context(|ctx| handle.drop(ctx)));
        }
    });
    assert_eq!(counter.released(), 1);
}

#[test]
fn test_shared_ref_cell_across_threads() {
    let mut ctx = Context::new();
    let cell = Ref::new(Boxed::from_small_int(0), &mut ctx);
    let shared = cell.into_block().into_shared();

    rayon::scope(|s| {
        for t in 0..THREADS {
            let handle = &shared;
            s.spawn(move |_| {
                with_context(|ctx| {
                    let cell = unsafe { Ref::from_block(handle.dup().into_block()) };
                    let value = Block::new(Tag::new(3), [Boxed::from_small_int(t as isize)], ctx);
                    cell.set(Boxed::from_block(value), ctx);
                    let seen = cell.get();
                    assert!(seen.as_block().is_some_and(Block::is_thread_shared));
                    seen.drop(ctx);
                    cell.drop(ctx);
                });
            });
        }
    });

    let cell = unsafe { Ref::from_block(shared.into_block()) };
    let last = cell.get();
    let winner = last.as_block().map(|b| b.field(0).as_small_int());
    assert!(winner.is_some_and(|t| (0..THREADS as isize).contains(&t)));
    last.drop(&mut ctx);
    cell.drop(&mut ctx);
}

#[test]
fn test_function_id_is_usable_from_every_thread() {
    rayon::scope(|s| {
        for t in 0..THREADS {
            s.spawn(move |_| {
                with_context(|ctx| {
                    let out = function_id().call(Boxed::from_small_int(t as isize), ctx);
                    assert_eq!(out.as_small_int(), t as isize);
                });
            });
        }
    });
}

#[test]
fn test_drop_reuse_of_shared_block_waits_for_the_last_owner() {
    let mut ctx = Context::new();
    let counter = DropCounter::new();
    let field = counter.field(&mut ctx);
    let shared = Block::new(Tag::new(12), [field], &mut ctx).into_shared();
    let addr = shared.addr();
    let other = shared.dup();

    assert!(shared.into_block().drop_reuse(&mut ctx).is_none());
    assert_eq!(other.refcount(), 0);
    assert_eq!(counter.released(), 0);

    let reuse = other.into_block().drop_reuse(&mut ctx);
    assert_eq!(counter.released(), 1);
    let rebuilt = Block::new_at(reuse, Tag::new(13), [Boxed::from_enum(4)], &mut ctx);
    assert_eq!(rebuilt.addr(), addr);
    assert!(!rebuilt.is_thread_shared());
    assert!(rebuilt.is_unique());
    rebuilt.drop(&mut ctx);
    assert_heap_empty(&ctx);
}

#[test]
fn test_shared_block_is_freed_by_the_releasing_heap() {
    let mut ctx = Context::new();
    let shared = Block::new(Tag::new(14), [Boxed::from_enum(1)], &mut ctx).into_shared();
    let live = ctx.heap().stats().live_bytes;
    assert!(live > 0);

    std::thread::scope(|s| {
        s.spawn(|| {
            let mut remote = Context::new();
            shared.drop(&mut remote);
            let stats = remote.heap().stats();
            assert_eq!(stats.frees, 1);
            assert_eq!(stats.live_bytes, 0);
        });
    });

    let stats = ctx.heap().stats();
    assert_eq!(stats.frees, 0);
    assert_eq!(stats.live_bytes, live);
}
