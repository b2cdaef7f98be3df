#![allow(dead_code)]
use std::path::Path;

use coil::{BufferHost, Engine, EngineConfig, run_to_completion};
use test_support::load_cases;

/// `(case name, source)` for every fixture with benchmarking enabled.
pub fn workloads() -> Vec<(String, String)> {
    let cases = load_cases(Path::new("tests/programs")).unwrap_or_else(|err| panic!("load cases: {err}"));
    cases
        .into_iter()
        .filter(|case| case.spec.bench.enabled)
        .map(|case| {
            let source = case.program().unwrap_or_else(|err| panic!("read {}: {err}", case.name));
            (case.name, source)
        })
        .collect()
}

/// A fresh engine that discards its output and never time-slices.
pub fn engine() -> Engine {
    Engine::new(EngineConfig::without_time_slicing(), Box::new(BufferHost::new()))
}

pub fn run(engine: &mut Engine, source: &str) {
    let completion = engine.run_source(source, "bench.py").expect("start");
    run_to_completion(engine, completion).expect("run");
}
