use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use springlet::*;
use std::sync::Arc;

trait Handler: Send + Sync {
    fn id(&self) -> usize;
}

struct Route(usize);

impl Handler for Route {
    fn id(&self) -> usize {
        self.0
    }
}

struct Router {
    routes: Vec<Arc<dyn Handler>>,
    prefix: String,
}

fn registry(n: usize) -> Registry {
    let mut r = Registry::new();
    for i in 0..n {
        r.provide_fn(move || Route(i), vec![])
            .name(format!("route{}", i))
            .condition(on_property("router.enabled").match_if_missing())
            .export(|h| h as Arc<dyn Handler>);
    }
    r.provide_fn(
        |routes: Vec<Arc<dyn Handler>>, prefix: String| Router { routes, prefix },
        vec![Arg::tag("*"), Arg::tag("${router.prefix:=/api}")],
    )
    .root();
    r
}

// ===== Refresh =====

fn bench_refresh(c: &mut Criterion) {
    let mut group = c.benchmark_group("refresh");
    for n in [10usize, 100, 1000] {
        let r = registry(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter_batched(
                || Container::with_registry(r.clone()),
                |mut c| {
                    c.refresh(Properties::new()).unwrap();
                    black_box(c.creation_order().len());
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

// ===== Lookup =====

fn bench_get(c: &mut Criterion) {
    let mut container = Container::with_registry(registry(100));
    container.refresh(Properties::new()).unwrap();

    c.bench_function("get_by_type", |b| {
        b.iter(|| {
            let router = container.get::<Router>("").unwrap();
            black_box(router.routes.len() + router.prefix.len());
        })
    });

    c.bench_function("get_trait_by_name", |b| {
        b.iter(|| {
            let h = container.get::<dyn Handler>("route42").unwrap();
            black_box(h.id());
        })
    });
}

// ===== Properties =====

fn bench_resolve(c: &mut Criterion) {
    let p = Properties::from_pairs([
        ("host", "localhost"),
        ("port", "8080"),
        ("url", "http://${host}:${port}"),
    ])
    .unwrap();

    c.bench_function("resolve_nested", |b| {
        b.iter(|| black_box(p.resolve("${url}/${path:=${missing:=v1}}").unwrap()))
    });
}

criterion_group!(benches, bench_refresh, bench_get, bench_resolve);
criterion_main!(benches);
