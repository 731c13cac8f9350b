use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use aether::runtime::{
    Context,
    heap::{Block, Tag},
    value::{Boxed, Vector},
};

fn bench_dup_drop(c: &mut Criterion) {
    let mut group = c.benchmark_group("refcount/dup_drop");
    let mut ctx = Context::new();

    let local = Block::new(Tag::new(1), [Boxed::from_enum(1)], &mut ctx);
    group.bench_function("local", |b| {
        b.iter(|| {
            let d = black_box(&local).dup();
            d.drop(&mut ctx);
        });
    });

    let shared = Block::new(Tag::new(1), [Boxed::from_enum(1)], &mut ctx).into_shared();
    group.bench_function("thread_shared", |b| {
        b.iter(|| {
            let d = black_box(&shared).dup();
            d.drop(&mut ctx);
        });
    });

    group.finish();
    local.drop(&mut ctx);
    shared.drop(&mut ctx);
}

fn bench_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("refcount/release_list");

    for &len in &[100usize, 10_000] {
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, &n| {
            let mut ctx = Context::new();
            b.iter(|| {
                let mut list = Boxed::unit();
                for i in 0..n {
                    list = Boxed::from_block(Block::new(Tag::new(2), [Boxed::from_enum(i), list], &mut ctx));
                }
                list.drop(&mut ctx);
            });
        });
    }

    group.finish();
}

fn bench_vector(c: &mut Criterion) {
    let mut group = c.benchmark_group("vector/from_elem");

    for &len in &[0usize, 16, 1_024] {
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, &n| {
            let mut ctx = Context::new();
            b.iter(|| {
                let v = Vector::from_elem(n, Boxed::from_enum(7), &mut ctx);
                black_box(v.len());
                v.drop(&mut ctx);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_dup_drop, bench_release, bench_vector);
criterion_main!(benches);
