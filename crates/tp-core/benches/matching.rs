use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use tp_core::{BlocklistMatcher, MemoryStore, PublicSuffix, SafelistStore, TrackerIndex};

fn matcher() -> BlocklistMatcher {
    let psl = Arc::new(PublicSuffix::fallback());
    let safelist = Arc::new(SafelistStore::load(Arc::new(MemoryStore::new()), psl.clone()));
    let domains = (0..20_000).map(|i| format!("tracker{}.com", i));
    let index = Arc::new(TrackerIndex::from_domains(domains));
    BlocklistMatcher::new(index, safelist, psl)
}

fn bench_is_blocked(c: &mut Criterion) {
    let matcher = matcher();

    c.bench_function("is_blocked_hit", |b| {
        b.iter(|| {
            matcher.is_blocked(
                black_box("https://cdn.pixel.tracker12345.com/p.gif?x=1"),
                black_box("https://www.news.example.com/article"),
            )
        })
    });

    c.bench_function("is_blocked_miss", |b| {
        b.iter(|| {
            matcher.is_blocked(
                black_box("https://static.example.org/app.js"),
                black_box("https://www.news.example.com/article"),
            )
        })
    });

    c.bench_function("is_blocked_first_party", |b| {
        b.iter(|| {
            matcher.is_blocked(
                black_box("https://img.example.com/logo.png"),
                black_box("https://www.example.com/"),
            )
        })
    });
}

criterion_group!(benches, bench_is_blocked);
criterion_main!(benches);
