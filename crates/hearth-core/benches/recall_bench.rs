//! Recall pipeline benchmarks.
//!
//! Run with: cargo bench -p hearth-core

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hearth_core::embedding::cosine_similarity;
use hearth_core::recall::fusion::reciprocal_rank_fusion;
use hearth_core::recall::hyde::{classify_intent, expand_query};

fn bench_classify_intent(c: &mut Criterion) {
    let queries = [
        "What is a fact store?",
        "how to configure embeddings",
        "why does confidence decay",
        "fn main()",
        "theme preference",
    ];

    c.bench_function("classify_intent", |b| {
        b.iter(|| {
            for q in &queries {
                black_box(classify_intent(q));
            }
        })
    });
}

fn bench_expand_query(c: &mut Criterion) {
    c.bench_function("expand_query", |b| {
        b.iter(|| {
            black_box(expand_query("What is tier compaction and how does it work?"));
        })
    });
}

fn bench_rrf_fusion(c: &mut Criterion) {
    let fts: Vec<(String, f32)> = (0..50).map(|i| (format!("fact-{i}"), 1.0 - i as f32 / 50.0)).collect();
    let vector: Vec<(String, f32)> = (0..50).map(|i| (format!("fact-{}", 25 + i), 1.0 - i as f32 / 50.0)).collect();
    let entity: Vec<(String, f32)> = (0..10).map(|i| (format!("fact-{}", 40 + i), 1.0)).collect();

    c.bench_function("rrf_fusion_3_branches_50x50x10", |b| {
        b.iter(|| {
            black_box(reciprocal_rank_fusion(&[&fts, &vector, &entity], 60.0));
        })
    });
}

fn bench_cosine_similarity(c: &mut Criterion) {
    let a: Vec<f32> = (0..1536).map(|i| (i as f32).sin()).collect();
    let b: Vec<f32> = (0..1536).map(|i| (i as f32).cos()).collect();

    c.bench_function("cosine_similarity_1536d", |bench| {
        bench.iter(|| {
            black_box(cosine_similarity(&a, &b));
        })
    });
}

criterion_group!(
    benches,
    bench_classify_intent,
    bench_expand_query,
    bench_rrf_fusion,
    bench_cosine_similarity,
);
criterion_main!(benches);
