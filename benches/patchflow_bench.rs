use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use patchflow::normalize::{normalize, MAX_COMPOSITE_DEPTH};
use patchflow::patch::Patch;
use patchflow::*;

// KPI-aligned benchmark scenarios. All compile against the standard registry.
fn scenarios() -> [(&'static str, Patch); 3] {
    [
        ("dots16", demos::dots(16)),
        ("ring64", demos::ring(64)),
        ("delay_loop", demos::delay_loop()),
    ]
}

fn registry() -> registry::BlockRegistry {
    stdlib::standard_registry().expect("standard registry")
}

// KPI: full compile latency (normalize -> types -> cycles -> lower -> schedule).
fn bench_kpi_full_compile_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/full_compile_latency");
    let reg = registry();

    for (name, patch) in scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), &patch, |b, patch| {
            b.iter(|| {
                let program = compile(black_box(patch), &reg).expect("scenario compiles");
                black_box(program.schedule.steps.len());
            });
        });
    }

    group.finish();
}

// KPI: normalization alone, composites included.
fn bench_kpi_normalize_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/phase_latency/normalize");
    let reg = registry();
    let patch = demos::ring(64);
    group.bench_function("ring64", |b| {
        b.iter(|| {
            let r = normalize(black_box(&patch), &reg, MAX_COMPOSITE_DEPTH);
            black_box(r.graph.blocks.len());
        });
    });
    group.finish();
}

// KPI: steady-state frame time vs element count.
fn bench_kpi_frame_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/frame_scaling");
    let reg = registry();

    for count in [16_u32, 256, 4096] {
        let program = compile(&demos::dots(count), &reg).expect("dots compiles");
        group.bench_with_input(BenchmarkId::from_parameter(count), &program, |b, program| {
            let mut state = RuntimeState::new(program);
            let mut pool = BufferPool::new();
            let inputs = ExternalInputs::new();
            let mut wall_ms = 0.0;
            b.iter(|| {
                wall_ms += 16.0;
                let out = execute_frame(program, &mut state, &mut pool, wall_ms, &inputs)
                    .expect("frame executes");
                black_box(out.draw.len());
            });
        });
    }

    group.finish();
}

// KPI: hot swap plus the first frame after it (domain remap and regauge).
fn bench_kpi_hot_swap(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/hot_swap");
    let reg = registry();
    let before = compile(&demos::dots(256), &reg).expect("dots compiles");
    let after = compile(&demos::dots(300), &reg).expect("dots compiles");

    group.bench_function("dots256_to_300", |b| {
        b.iter_batched(
            || {
                let mut state = RuntimeState::new(&before);
                let mut pool = BufferPool::new();
                execute_frame(&before, &mut state, &mut pool, 0.0, &ExternalInputs::new())
                    .expect("frame executes");
                (state, pool)
            },
            |(mut state, mut pool)| {
                let report = state.hot_swap(&before, &after);
                let out = execute_frame(&after, &mut state, &mut pool, 16.0, &ExternalInputs::new())
                    .expect("frame executes");
                black_box((report.carried.len(), out.draw.len()));
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_kpi_full_compile_latency,
    bench_kpi_normalize_latency,
    bench_kpi_frame_scaling,
    bench_kpi_hot_swap,
);
criterion_main!(benches);
