use criterion::{Criterion, criterion_group, criterion_main};
use spincomm_kernels::{ReduceOp, cpu_copy, cpu_reduce_into};
use std::hint::black_box;

fn benchmark_reduce(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduce_sum");
    let sizes = [1024, 16 * 1024, 256 * 1024];
    let world_size = 4;

    for &size in &sizes {
        let inputs: Vec<Vec<f32>> = (0..world_size).map(|r| vec![r as f32; size]).collect();
        let mut out = vec![0.0f32; size];

        group.bench_function(format!("{}x{}", world_size, size), |b| {
            b.iter(|| {
                cpu_reduce_into(
                    black_box(&mut out),
                    inputs.iter().map(|v| v.as_slice()),
                    black_box(ReduceOp::Sum),
                )
                .unwrap()
            })
        });
    }
    group.finish();
}

fn benchmark_copy(c: &mut Criterion) {
    let mut group = c.benchmark_group("copy");
    let sizes = [1024, 16 * 1024, 256 * 1024];

    for &size in &sizes {
        let src = vec![1.0f32; size];
        let mut dst = vec![0.0f32; size];

        group.bench_function(format!("{}", size), |b| {
            b.iter(|| cpu_copy(black_box(&mut dst), black_box(&src)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_reduce, benchmark_copy);
criterion_main!(benches);
