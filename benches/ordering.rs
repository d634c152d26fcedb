//! 有序属性的插入基准
//!
//! 头部插入每次都要在最小排序键之前腾出位置，对比尾部追加与随机位置插入。

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use graphene::{Database, DatabaseConfig, Node};
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

const SIZES: [usize; 3] = [64, 256, 1024];

fn setup() -> (Database, Node) {
    let mut db = Database::open(DatabaseConfig::in_memory().unfrozen()).expect("open");
    db.begin().expect("begin");
    let node = db.create("Queue", &[]).expect("node");
    (db, node)
}

fn fill(count: usize, mut insert: impl FnMut(&mut Database, &Node, usize)) {
    let (mut db, node) = setup();
    for i in 0..count {
        insert(&mut db, &node, i);
    }
    black_box(db.node(&node).expect("node").prop("items").expect("prop").count().expect("count"));
    db.rollback().expect("rollback");
}

fn ordering(c: &mut Criterion) {
    let mut group = c.benchmark_group("ordering/insert");
    group.sample_size(10);

    for &size in &SIZES {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("append", size), &size, |b, &size| {
            b.iter(|| {
                fill(size, |db, node, i| {
                    db.node(node).expect("node").prop("items").expect("prop")
                        .append(i as i64).expect("append");
                })
            });
        });

        group.bench_with_input(BenchmarkId::new("head", size), &size, |b, &size| {
            b.iter(|| {
                fill(size, |db, node, i| {
                    db.node(node).expect("node").prop("items").expect("prop")
                        .prepend(i as i64, 0).expect("prepend");
                })
            });
        });

        group.bench_with_input(BenchmarkId::new("random", size), &size, |b, &size| {
            let mut rng = StdRng::seed_from_u64(0xC0FFEE);
            b.iter(|| {
                fill(size, |db, node, i| {
                    let at = rng.gen_range(0..=i);
                    db.node(node).expect("node").prop("items").expect("prop")
                        .prepend(i as i64, at).expect("prepend");
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, ordering);
criterion_main!(benches);
