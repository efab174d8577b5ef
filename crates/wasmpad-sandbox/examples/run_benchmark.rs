//! Execution Host Benchmarks
//!
//! Run with: cargo run -p wasmpad-sandbox --example run_benchmark --release

use std::time::Instant;
use wasmpad_sandbox::{NoInput, OutputSink, ScriptedInput, WasmConfig, WasmSandbox};

const HELLO: &str = include_str!("../tests/fixtures/hello.wat");
const ECHO: &str = include_str!("../tests/fixtures/echo.wat");

/// Calls fd_write `$n` times with a one-byte iovec.
const WRITE_LOOP: &str = r#"(module
  (import "wasi_snapshot_preview1" "fd_write"
    (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 64) ".")
  (func (export "_start")
    (local $i i32)
    (i32.store (i32.const 0) (i32.const 64))
    (i32.store (i32.const 4) (i32.const 1))
    (loop $again
      (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 16)))
      (local.set $i (i32.add (local.get $i) (i32.const 1)))
      (br_if $again (i32.lt_u (local.get $i) (i32.const 10000))))))
"#;

fn main() {
    println!("=== Execution Host Benchmarks ===\n");

    bench_module_loading();
    bench_full_run();
    bench_syscall_overhead();
    bench_stdin_round_trip();
    bench_with_fuel_metering();

    println!("\n=== Benchmark Complete ===");
}

fn bench_module_loading() {
    println!("## Module Loading");

    let sandbox = WasmSandbox::new(WasmConfig::default()).unwrap();
    let _ = sandbox.load_module_bytes(HELLO.as_bytes()).unwrap();

    let mut times = Vec::new();
    for _ in 0..100 {
        let start = Instant::now();
        let _ = sandbox.load_module_bytes(HELLO.as_bytes()).unwrap();
        times.push(start.elapsed().as_micros() as u64);
    }

    print_stats("load_module_bytes", &times);
    println!();
}

fn bench_full_run() {
    println!("## Instantiate + Run (precompiled)");

    let sandbox = WasmSandbox::new(WasmConfig::default()).unwrap();
    let module = sandbox.load_module_bytes(HELLO.as_bytes()).unwrap();
    let sink = OutputSink::new();

    let mut times = Vec::new();
    for _ in 0..100 {
        let start = Instant::now();
        sandbox.run_module(&module, &sink, NoInput).unwrap();
        times.push(start.elapsed().as_micros() as u64);
    }

    print_stats("run_module", &times);
    println!();
}

fn bench_syscall_overhead() {
    println!("## fd_write Overhead");

    let sandbox = WasmSandbox::new(WasmConfig::default()).unwrap();
    let module = sandbox.load_module_bytes(WRITE_LOOP.as_bytes()).unwrap();

    let mut times = Vec::new();
    for _ in 0..20 {
        let sink = OutputSink::new();
        let report = sandbox.run_module(&module, &sink, NoInput).unwrap();
        assert_eq!(sink.len(), 10_000);
        times.push(report.execution_time_us);
    }

    print_stats("10k fd_write calls", &times);
    let mean = times.iter().sum::<u64>() as f64 / times.len() as f64;
    println!("  per call: {:.3}us", mean / 10_000.0);
    println!();
}

fn bench_stdin_round_trip() {
    println!("## fd_read + fd_write Round Trip");

    let sandbox = WasmSandbox::new(WasmConfig::default()).unwrap();
    let module = sandbox.load_module_bytes(ECHO.as_bytes()).unwrap();
    let sink = OutputSink::new();

    let mut times = Vec::new();
    for i in 0..100 {
        let input = ScriptedInput::new([format!("line {}", i)]);
        let report = sandbox.run_module(&module, &sink, input).unwrap();
        times.push(report.execution_time_us);
    }

    print_stats("echo one line", &times);
    println!();
}

fn bench_with_fuel_metering() {
    println!("## Fuel Metering Overhead");

    let sandbox_no_fuel = WasmSandbox::new(WasmConfig::default()).unwrap();
    let sandbox_fuel = WasmSandbox::new(WasmConfig::default().fuel_limit(u64::MAX)).unwrap();
    let module_no_fuel = sandbox_no_fuel.load_module_bytes(WRITE_LOOP.as_bytes()).unwrap();
    let module_fuel = sandbox_fuel.load_module_bytes(WRITE_LOOP.as_bytes()).unwrap();

    let mut no_fuel = Vec::new();
    let mut fuel = Vec::new();
    let mut fuel_consumed = 0u64;
    for _ in 0..20 {
        let sink = OutputSink::new();
        no_fuel.push(sandbox_no_fuel.run_module(&module_no_fuel, &sink, NoInput).unwrap().execution_time_us);

        let sink = OutputSink::new();
        let report = sandbox_fuel.run_module(&module_fuel, &sink, NoInput).unwrap();
        fuel.push(report.execution_time_us);
        fuel_consumed += report.fuel_consumed.unwrap_or(0);
    }

    print_stats("without fuel metering", &no_fuel);
    print_stats("with fuel metering", &fuel);
    println!("  avg fuel per run: {}", fuel_consumed / 20);
}

fn print_stats(name: &str, times: &[u64]) {
    if times.is_empty() {
        println!("  {}: no samples", name);
        return;
    }

    let mut sorted = times.to_vec();
    sorted.sort();

    let min = sorted[0];
    let max = sorted[sorted.len() - 1];
    let mean = times.iter().sum::<u64>() as f64 / times.len() as f64;
    let p50 = sorted[sorted.len() / 2];
    let p99 = sorted[(sorted.len() * 99) / 100];

    println!("  {}: n={} min={}us mean={:.1}us p50={}us p99={}us max={}us",
             name, times.len(), min, mean, p50, p99, max);
}
