use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use knowgraph::{
    merge_graphs, shortest_path, Entity, EntityType, ExtractionSettings, KnowledgeGraph, Relation, RelationType,
    SourceText, StandardGraphBuilder,
};

fn corpus(units: usize) -> Vec<SourceText> {
    (0..units)
        .map(|i| {
            SourceText::with_id(
                format!("doc-{}", i),
                format!(
                    "Campus{} University is located in City{}. City{} is the capital of Country{}.",
                    i,
                    i % 50,
                    i % 50,
                    i % 5
                ),
            )
        })
        .collect()
}

/// Chain of `size` entities with a shortcut every ten hops
fn chain(size: usize) -> KnowledgeGraph {
    let mut graph = KnowledgeGraph::new("chain");
    let ty = EntityType::new("node").unwrap();
    let next = RelationType::new("next").unwrap();
    let skip = RelationType::new("skip").unwrap();
    let ids: Vec<_> = (0..size)
        .map(|i| {
            let e = Entity::new(format!("n{}", i), ty.clone());
            let id = e.id.clone();
            graph.upsert_entity(e);
            id
        })
        .collect();
    for i in 1..size {
        graph
            .upsert_relation(Relation::new(ids[i - 1].clone(), ids[i].clone(), next.clone()))
            .unwrap();
        if i >= 10 && i % 10 == 0 {
            graph
                .upsert_relation(Relation::new(ids[i - 10].clone(), ids[i].clone(), skip.clone()))
                .unwrap();
        }
    }
    graph
}

/// Benchmark text-to-graph build throughput
fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    let builder = StandardGraphBuilder::new(&ExtractionSettings::default()).unwrap();

    for size in [10, 100, 1000].iter() {
        let texts = corpus(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let built = builder.build(&texts, None, "bench").unwrap();
                criterion::black_box(built.graph.entity_count());
            });
        });
    }
    group.finish();
}

/// Benchmark merging a rebuilt graph into an existing one
fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_graphs");
    let builder = StandardGraphBuilder::new(&ExtractionSettings::default()).unwrap();

    for size in [100, 1000].iter() {
        let base = builder.build(&corpus(*size), None, "base").unwrap().graph;
        let delta = builder.build(&corpus(*size / 2), None, "delta").unwrap().graph;
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut target = base.clone();
                criterion::black_box(merge_graphs(&mut target, &delta, 1.0));
            });
        });
    }
    group.finish();
}

/// Benchmark shortest path over long chains
fn bench_shortest_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("shortest_path");

    for size in [100, 1000, 10_000].iter() {
        let graph = chain(*size);
        let from = graph.find_by_name("n0")[0].id.clone();
        let to = graph.find_by_name(&format!("n{}", size - 1))[0].id.clone();
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let outcome = shortest_path(&graph, &from, &to).unwrap();
                criterion::black_box(outcome.hops());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build, bench_merge, bench_shortest_path);
criterion_main!(benches);
