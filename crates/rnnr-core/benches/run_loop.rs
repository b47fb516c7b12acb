//! Host backend run loop benchmarks
//!
//! Measures a full `Model::run` (input upload, statement replay, output
//! readback) for chains of element-wise statements of increasing length.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rnnr_backends::HostBackend;
use rnnr_core::{Model, Program, WeightStore, WeightWriter};

fn chain_program(elements: usize, statements: usize) -> Program {
    let statements: Vec<_> = (0..statements)
        .map(|_| {
            serde_json::json!({
                "kernel": "axpy",
                "args": ["outputs", "input", "bias"],
                "global_size": [elements / 64],
                "local_size": [64],
            })
        })
        .collect();
    let json = serde_json::json!({
        "backend": "GPU",
        "input_size": elements,
        "output_size": elements,
        "functions": {"axpy": "__kernel void axpy(...)"},
        "statements": statements,
        "buffers": {"bias": {"size": elements, "dtype": "float", "id": "bias"}},
    });
    Program::from_json(json.to_string().as_bytes()).unwrap()
}

fn ready_model(elements: usize, statements: usize) -> Model {
    let backend = HostBackend::new().with_kernel("axpy", |item, args| {
        let i = item.global_id(0);
        let value = 0.5 * args.arg(1)[i] + args.arg(2)[i];
        args.arg_mut(0)[i] = value;
    });
    let bias: Vec<f32> = (0..elements).map(|i| i as f32 * 0.01).collect();
    let weights = WeightStore::from_bytes(
        WeightWriter::new()
            .add_f32("bias", &[elements as u64], &bias)
            .to_bytes()
            .unwrap(),
    )
    .unwrap();

    let mut model = Model::new(Box::new(backend), chain_program(elements, statements));
    model.setup(&weights).unwrap();
    model
}

fn benchmark_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("model_run");

    for elements in [1_024, 16_384, 262_144] {
        for statements in [1, 8] {
            let mut model = ready_model(elements, statements);
            let input: Vec<f32> = (0..elements).map(|i| i as f32).collect();
            group.bench_with_input(
                BenchmarkId::new(format!("{statements}_statements"), elements),
                &input,
                |b, input| {
                    b.iter(|| black_box(model.run(input).unwrap()));
                },
            );
        }
    }

    group.finish();
}

fn benchmark_weight_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("weight_decode");

    for elements in [1_024, 262_144] {
        let values: Vec<f32> = (0..elements).map(|i| i as f32).collect();
        let bytes = WeightWriter::new()
            .add_f32("w", &[elements as u64], &values)
            .to_bytes()
            .unwrap();
        // a fresh store each iteration so the decode cache never hits
        group.bench_with_input(BenchmarkId::new("parse_and_get", elements), &bytes, |b, bytes| {
            b.iter(|| {
                let store = WeightStore::from_bytes(bytes.clone()).unwrap();
                black_box(store.get("w").unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_run, benchmark_weight_decode);
criterion_main!(benches);
