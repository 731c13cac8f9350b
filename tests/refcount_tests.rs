mod common;

use aether::runtime::{
    Context,
    heap::{Block, Tag},
    value::Boxed,
};
use common::{DropCounter, assert_heap_empty};

#[test]
fn test_dup_then_drop_is_a_no_op() {
    let mut ctx = Context::new();
    let b = Block::new(Tag::new(3), [Boxed::from_enum(1)], &mut ctx);
    for _ in 0..100 {
        let d = b.dup();
        d.drop(&mut ctx);
    }
    assert!(b.is_unique());
    assert_eq!(ctx.heap().stats().frees, 0);
    b.drop(&mut ctx);
    assert_heap_empty(&ctx);
}

#[test]
fn test_two_field_block_released_on_last_drop() {
    let mut ctx = Context::new();
    let counter = DropCounter::new();
    let child = counter.field(&mut ctx);
    let b = Block::new(Tag::new(500), [Boxed::from_enum(7), child], &mut ctx);
    assert_eq!(b.scan_fsize(), 2);

    let d1 = b.dup();
    let d2 = b.dup();
    assert_eq!(b.refcount(), 2);

    let frees = ctx.heap().stats().frees;
    d1.drop(&mut ctx);
    d2.drop(&mut ctx);
    assert_eq!(ctx.heap().stats().frees, frees);
    assert_eq!(counter.released(), 0);

    b.drop(&mut ctx);
    assert_eq!(counter.released(), 1);
    // the block and the child's foreign-pointer block
    assert_eq!(ctx.heap().stats().frees, frees + 2);
    assert_heap_empty(&ctx);
}

#[test]
fn test_every_field_released_once() {
    let mut ctx = Context::new();
    let counter = DropCounter::new();
    let fields = [(); 6].map(|_| counter.field(&mut ctx));
    let b = Block::new(Tag::new(42), fields, &mut ctx);
    b.drop_n(6, &mut ctx);
    assert_eq!(counter.released(), 6);
    assert_heap_empty(&ctx);
}

#[test]
fn test_shared_field_outlives_parent() {
    let mut ctx = Context::new();
    let counter = DropCounter::new();
    let child = counter.field(&mut ctx);
    let keep = child.dup();
    let parent = Block::new(Tag::new(2), [child], &mut ctx);

    parent.drop(&mut ctx);
    assert_eq!(counter.released(), 0);
    keep.drop(&mut ctx);
    assert_eq!(counter.released(), 1);
    assert_heap_empty(&ctx);
}

#[test]
fn test_deep_chain_release() {
    let mut ctx = Context::new();
    let mut chain = Boxed::unit();
    for i in 0..100_000 {
        chain = Boxed::from_block(Block::new(Tag::new(9), [Boxed::from_enum(i), chain], &mut ctx));
    }
    chain.drop(&mut ctx);
    assert_eq!(ctx.heap().stats().frees, 100_000);
    assert_eq!(ctx.delayed_free_len(), 0);
    assert_heap_empty(&ctx);
}

#[test]
fn test_tag_checked_variants() {
    let mut ctx = Context::new();
    let tag = Tag::user(17).expect("user tag");
    let b = Block::new(tag, [], &mut ctx);
    let d = b.dup_assert(tag);
    d.drop_assert(tag, &mut ctx);
    b.drop(&mut ctx);
    assert_heap_empty(&ctx);
}
