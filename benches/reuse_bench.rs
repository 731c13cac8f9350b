use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use aether::runtime::{
    Context,
    heap::{Block, Tag, drop_match, reuse_match},
    value::Datatype,
};

const LEAF: Tag = Tag::new(1);
const NODE: Tag = Tag::new(2);

fn tree(depth: u32, ctx: &mut Context) -> Datatype {
    if depth == 0 {
        return Datatype::from_tag(LEAF);
    }
    let l = tree(depth - 1, ctx).into_boxed();
    let r = tree(depth - 1, ctx).into_boxed();
    Datatype::from_block(Block::new(NODE, [l, r], ctx))
}

fn mirror_reuse(t: Datatype, ctx: &mut Context) -> Datatype {
    let Some(node) = t.into_block() else {
        return Datatype::from_tag(LEAF);
    };
    let (reuse, [l, r]) = reuse_match(node, [0, 1], ctx);
    let l = mirror_reuse(Datatype::from_boxed(l), ctx).into_boxed();
    let r = mirror_reuse(Datatype::from_boxed(r), ctx).into_boxed();
    Datatype::from_block(Block::new_at(reuse, NODE, [r, l], ctx))
}

fn mirror_fresh(t: Datatype, ctx: &mut Context) -> Datatype {
    let Some(node) = t.into_block() else {
        return Datatype::from_tag(LEAF);
    };
    let [l, r] = drop_match(node, [0, 1], ctx);
    let l = mirror_fresh(Datatype::from_boxed(l), ctx).into_boxed();
    let r = mirror_fresh(Datatype::from_boxed(r), ctx).into_boxed();
    Datatype::from_block(Block::new(NODE, [r, l], ctx))
}

fn bench_mirror(c: &mut Criterion) {
    let mut group = c.benchmark_group("reuse/mirror");

    for &depth in &[8u32, 14] {
        group.bench_with_input(BenchmarkId::new("reuse", depth), &depth, |b, &d| {
            let mut ctx = Context::new();
            let mut t = Some(tree(d, &mut ctx));
            b.iter(|| {
                if let Some(cur) = t.take() {
                    t = Some(mirror_reuse(cur, &mut ctx));
                }
            });
            if let Some(t) = t {
                t.drop(&mut ctx);
            }
        });
        group.bench_with_input(BenchmarkId::new("fresh", depth), &depth, |b, &d| {
            let mut ctx = Context::new();
            let mut t = Some(tree(d, &mut ctx));
            b.iter(|| {
                if let Some(cur) = t.take() {
                    t = Some(mirror_fresh(cur, &mut ctx));
                }
            });
            if let Some(t) = t {
                t.drop(&mut ctx);
            }
        });
    }

    group.finish();
}

criterion_group!(benches, bench_mirror);
criterion_main!(benches);
