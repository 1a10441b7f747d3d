use criterion::{criterion_group, criterion_main, Criterion};
use index_core::tokenizer::{normalize_terms, tokenize};

fn bench_tokenize(c: &mut Criterion) {
    let text = "Crème brûlée, façade and a naïve café; São Paulo's 42 pages link to Zürich. ".repeat(2_000);
    c.bench_function("tokenize_page", |b| b.iter(|| tokenize(&text)));
    c.bench_function("normalize_query", |b| {
        b.iter(|| normalize_terms(["Café", "  Zürich ", "brûlée", "x"]))
    });
}

criterion_group!(benches, bench_tokenize);
criterion_main!(benches);
