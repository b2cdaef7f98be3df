mod common;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use coil::{BufferHost, Engine, EngineConfig, run_to_completion};

fn bench_vm(c: &mut Criterion) {
    for (label, source) in common::workloads() {
        c.bench_function(&format!("vm_total_{label}"), |b| {
            b.iter(|| {
                let mut engine = common::engine();
                common::run(&mut engine, black_box(&source));
            })
        });

        c.bench_function(&format!("vm_time_sliced_{label}"), |b| {
            let config = EngineConfig {
                yield_interval_ms: Some(1),
                ..EngineConfig::default()
            };
            b.iter(|| {
                let mut engine = Engine::new(config.clone(), Box::new(BufferHost::new()));
                let completion = engine.run_source(black_box(&source), "bench.py").expect("start");
                let value = run_to_completion(&mut engine, completion).expect("run");
                black_box(value);
            })
        });
    }
}

criterion_group!(benches, bench_vm);
criterion_main!(benches);
