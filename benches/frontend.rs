mod common;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use coil::parser::{self, Mode};
use coil::{ast, compiler, lexer};

fn bench_frontend(c: &mut Criterion) {
    for (label, source) in common::workloads() {
        c.bench_function(&format!("frontend_tokenize_{label}"), |b| {
            b.iter(|| {
                let out = lexer::tokenize(black_box(&source), "bench.py").expect("tokenize");
                black_box(out);
            })
        });

        c.bench_function(&format!("frontend_parse_{label}"), |b| {
            b.iter(|| {
                let out = parser::parse(black_box(&source), "bench.py", Mode::Exec).expect("parse");
                black_box(out);
            })
        });

        c.bench_function(&format!("frontend_build_ast_{label}"), |b| {
            b.iter(|| {
                let out = ast::build_source(black_box(&source), "bench.py", Mode::Exec).expect("ast");
                black_box(out);
            })
        });

        c.bench_function(&format!("frontend_compile_{label}"), |b| {
            b.iter(|| {
                let out = compiler::compile_source(black_box(&source), "bench.py", Mode::Exec)
                    .expect("compile");
                black_box(out);
            })
        });
    }
}

criterion_group!(benches, bench_frontend);
criterion_main!(benches);
