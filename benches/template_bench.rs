// benches/template_bench.rs
//! Template compile and per-iteration evaluation cost

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use jobmesh_engine::template::{compile, CompiledParams, EvalContext};
use serde_json::json;

fn bench_compile(c: &mut Criterion) {
    let source = r#"/item/{{ counter }}?q={{ random_alphanum 12 | base64_encode }}&t={{ now_unix_ms }}"#;
    c.bench_function("compile_mixed_template", |b| {
        b.iter(|| compile(black_box(source)).unwrap())
    });
}

fn bench_evaluate(c: &mut Criterion) {
    let literal = compile("GET / HTTP/1.1").unwrap();
    let mixed = compile(r#"id-{{ counter }}-{{ random_hex 16 }}"#).unwrap();
    let mut ctx = EvalContext::with_seed(42);

    c.bench_function("evaluate_literal", |b| b.iter(|| literal.evaluate(&mut ctx).unwrap()));
    c.bench_function("evaluate_counter_random", |b| b.iter(|| mixed.evaluate(&mut ctx).unwrap()));
}

fn bench_params(c: &mut Criterion) {
    let params = CompiledParams::compile(&json!({
        "path": "/api/{{ random_int 1 1000 }}",
        "headers": {"x-request-id": "{{ random_uuid }}", "accept": "*/*"},
        "body": "{{ random_alphanum 256 }}",
    }))
    .unwrap();
    let mut ctx = EvalContext::with_seed(7);

    c.bench_function("evaluate_param_tree", |b| b.iter(|| params.evaluate(&mut ctx).unwrap()));
}

criterion_group!(benches, bench_compile, bench_evaluate, bench_params);
criterion_main!(benches);
