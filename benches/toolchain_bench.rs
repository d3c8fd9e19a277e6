use atlkit::*;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::path::Path;

// Latency of the per-invocation work: header parsing, binding plus harness
// synthesis, and allocation rewriting, each at a few input sizes.

/// Header with `n` generated routine declarations, plus the usual guards.
fn generate_header(n: usize) -> String {
    let mut h = String::from("#pragma once\n#ifdef __cplusplus\nextern \"C\" {\n#endif\n\n");
    for i in 0..n {
        h.push_str(&format!(
            "void kernel_{}(float* x, int M, int N, float* w, float* output);\n",
            i
        ));
    }
    h.push_str("\n#ifdef __cplusplus\n}\n#endif\n");
    h
}

/// Routine body with `n` nested calloc/free pairs.
fn generate_source(n: usize) -> String {
    let mut s = String::from("#include <stdlib.h>\n\nvoid k(int M, int N, float* output) {\n");
    for i in 0..n {
        let indent = "    ".repeat(i + 1);
        s.push_str(&format!(
            "{}float *t{} = calloc((M * N) - (0), sizeof(float));\n",
            indent, i
        ));
        s.push_str(&format!("{}for (int j = 0; j < M * N; j++) t{}[j] = j;\n", indent, i));
        s.push_str(&format!("{}{{\n", indent));
    }
    for i in (0..n).rev() {
        let indent = "    ".repeat(i + 1);
        s.push_str(&format!("{}}}\n", indent));
        s.push_str(&format!("{}output[0] += t{}[0];\n", indent, i));
        s.push_str(&format!("{}free(t{});\n", indent, i));
    }
    s.push_str("}\n");
    s
}

fn bench_registry_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry/parse_header");
    for n in [1_usize, 16, 128] {
        let header = generate_header(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &header, |b, header| {
            b.iter(|| {
                let mut reg = registry::Registry::new();
                reg.load_source(black_box(header), Path::new("k.h"), decl::OutputRule::Strict);
                black_box(reg.len());
            });
        });
    }
    group.finish();
}

fn bench_bind_and_synthesize(c: &mut Criterion) {
    let mut group = c.benchmark_group("harness/bind_synthesize");
    let mut reg = registry::Registry::new();
    reg.load_source(&generate_header(1), Path::new("k.h"), decl::OutputRule::Strict);

    for elems in [16_usize, 1024, 16384] {
        let values: Vec<f64> = (0..elems).map(|i| i as f64 * 0.25).collect();
        let buffer = loader::NumericBuffer::from_values(values);
        group.bench_with_input(BenchmarkId::from_parameter(elems), &buffer, |b, buffer| {
            b.iter(|| {
                let decl = reg.lookup("kernel_0").expect("kernel_0 must parse");
                let binding = bind::bind_with(
                    decl,
                    &["4", "@x.json", "5", "@w.json"],
                    Some(20),
                    |_: &Path| Ok(buffer.clone()),
                )
                .expect("benchmark binding must succeed");
                black_box(harness::synthesize(&binding));
            });
        });
    }
    group.finish();
}

fn bench_load_nested(c: &mut Criterion) {
    let mut group = c.benchmark_group("loader/flatten");
    for rows in [4_usize, 64, 512] {
        let json = serde_json::to_string(
            &(0..rows)
                .map(|r| (0..64).map(|c| (r * 64 + c) as f64).collect::<Vec<_>>())
                .collect::<Vec<_>>(),
        )
        .expect("matrix serializes");
        group.bench_with_input(BenchmarkId::from_parameter(rows), &json, |b, json| {
            b.iter(|| black_box(loader::load_str(black_box(json), Path::new("m.json"))));
        });
    }
    group.finish();
}

fn bench_rewrite(c: &mut Criterion) {
    let mut group = c.benchmark_group("rewrite/pairs");
    for n in [1_usize, 8, 32] {
        let source = generate_source(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &source, |b, source| {
            b.iter(|| {
                let out = rewrite::Rewriter::new()
                    .simplify(true)
                    .rewrite(black_box(source))
                    .expect("benchmark source must lex");
                assert_eq!(out.rewrite_count, n);
                black_box(out.text);
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_registry_parse,
    bench_bind_and_synthesize,
    bench_load_nested,
    bench_rewrite,
);
criterion_main!(benches);
