//! Intercepted heap call benchmarks.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rldebug_core::{Debugger, LogEmitter, LogFormat, Settings, Severity, SourceLocation};

const SITE: SourceLocation = SourceLocation::new("bench.c", 1);

fn quiet_debugger() -> Debugger {
    let settings = Settings {
        severity: Severity::Quiet,
        ..Settings::default()
    };
    let (log, _) = LogEmitter::to_buffer("bench", LogFormat::Text);
    Debugger::with_log(settings, log)
}

fn bench_malloc_free_cycle(c: &mut Criterion) {
    let sizes: &[usize] = &[16, 256, 4096, 32768];
    let mut group = c.benchmark_group("malloc_free_cycle");

    for &size in sizes {
        group.bench_with_input(BenchmarkId::new("debugger", size), &size, |b, &sz| {
            let mut dbg = quiet_debugger();
            b.iter(|| {
                let block = dbg.malloc(sz, SITE);
                dbg.free(criterion::black_box(block), SITE);
            });
        });
        group.bench_with_input(BenchmarkId::new("system", size), &size, |b, &sz| {
            b.iter(|| {
                let v = vec![0u8; sz];
                criterion::black_box(v);
            });
        });
    }
    group.finish();
}

fn bench_realloc_growth(c: &mut Criterion) {
    let mut group = c.benchmark_group("realloc_growth");

    group.bench_function("16B_to_16KiB", |b| {
        let mut dbg = quiet_debugger();
        b.iter(|| {
            let mut block = dbg.malloc(16, SITE);
            let mut size = 16;
            while size < 16 * 1024 {
                size *= 2;
                block = dbg.realloc(block, size, SITE);
            }
            dbg.free(criterion::black_box(block), SITE);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_malloc_free_cycle, bench_realloc_growth);
criterion_main!(benches);
