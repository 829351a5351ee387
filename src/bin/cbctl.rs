//! Command-line driver for the benchmark harness, ported from
//! `original_source/examples/bench_inference.c`.
//!
//! Runs a deterministic mock inference function (the original's XOR
//! transform) through [`certifiable_bench::runner`], prints a summary,
//! and optionally writes JSON/CSV reports or compares against a prior
//! result.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use certifiable_bench::report;
use certifiable_bench::runner::{run_benchmark, Config};

const INPUT_SIZE: usize = 1024;

#[derive(Parser)]
#[command(name = "cbctl")]
#[command(about = "Certifiable inference benchmark harness")]
struct Args {
    /// Measurement iterations
    #[arg(long, default_value_t = 1_000)]
    iterations: u32,

    /// Warmup iterations
    #[arg(long, default_value_t = 100)]
    warmup: u32,

    /// Batch size
    #[arg(long, default_value_t = 1)]
    batch: u32,

    /// Output JSON path
    #[arg(long)]
    output: Option<PathBuf>,

    /// Output CSV path
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Compare with a previously written JSON result
    #[arg(long)]
    compare: Option<PathBuf>,
}

/// Deterministic transformation standing in for a real inference call:
/// XOR each byte with its position, then offset by `0x5A`.
fn mock_inference(input: &[u8], output: &mut [u8]) -> certifiable_bench::error::Result<()> {
    for i in 0..INPUT_SIZE {
        output[i] = input[i] ^ (i as u8).wrapping_add(0x5A);
    }
    Ok(())
}

/// Groups digits in threes with commas, the way `format_number` does.
fn format_number(value: u64) -> String {
    let digits = value.to_string();
    let bytes = digits.as_bytes();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 && (bytes.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(*b as char);
    }
    out
}

fn print_summary(result: &certifiable_bench::runner::BenchResult) {
    println!("══════════════════════════════════════════════════════════════════");
    println!("  Benchmark Summary");
    println!("══════════════════════════════════════════════════════════════════\n");

    println!("Platform:    {}", result.platform);
    println!("CPU Model:   {}", result.cpu_model);
    println!("CPU Freq:    {} MHz", result.cpu_freq_mhz);
    println!(
        "Iterations:  {} warmup, {} measure (batch={})\n",
        result.warmup_iterations, result.measure_iterations, result.batch_size
    );

    println!("Latency:");
    println!("  Min:       {} ns", format_number(result.latency.min_ns));
    println!("  Max:       {} ns", format_number(result.latency.max_ns));
    println!("  Mean:      {} ns", format_number(result.latency.mean_ns));
    println!("  Median:    {} ns", format_number(result.latency.median_ns));
    println!("  P95:       {} ns", format_number(result.latency.p95_ns));
    println!("  P99:       {} ns", format_number(result.latency.p99_ns));
    println!("  StdDev:    {} ns", format_number(result.latency.stddev_ns));
    println!(
        "  WCET Bound: {} ns\n",
        format_number(result.latency.wcet_bound_ns)
    );

    println!("Throughput:");
    println!(
        "  Inferences/sec:  {}",
        format_number(result.throughput.inferences_per_sec)
    );
    println!(
        "  Samples/sec:     {}\n",
        format_number(result.throughput.samples_per_sec)
    );

    println!("Verification:");
    println!(
        "  Determinism:     {}",
        if result.determinism_verified { "VERIFIED" } else { "FAILED" }
    );
    println!("  Failures:        {}", result.verification_failures);
    println!("  Output Hash:     {}\n", result.output_hash);

    println!("Faults:");
    let faults = &result.faults;
    if faults.has_hard_fault() {
        if faults.overflow {
            println!("  - OVERFLOW");
        }
        if faults.underflow {
            println!("  - UNDERFLOW");
        }
        if faults.div_zero {
            println!("  - DIV_ZERO");
        }
        if faults.timer_error {
            println!("  - TIMER_ERROR");
        }
        if faults.verify_fail {
            println!("  - VERIFY_FAIL");
        }
    } else {
        println!("  None");
    }
    if faults.thermal_drift {
        println!("  Warning: THERMAL_DRIFT");
    }

    println!("\nEnvironment:");
    println!("  Stable:          {}", if result.env_stable { "Yes" } else { "No" });
    println!(
        "  Duration:        {} ms",
        format_number(result.benchmark_duration_ns / 1_000_000)
    );

    println!("══════════════════════════════════════════════════════════════════");
}

fn print_comparison(comparison: &report::Comparison) {
    println!("══════════════════════════════════════════════════════════════════");
    println!("  Cross-Platform Performance Comparison");
    println!(
        "  Reference: {:<12}  Target: {}",
        comparison.platform_a, comparison.platform_b
    );
    println!("══════════════════════════════════════════════════════════════════\n");

    if !comparison.outputs_identical {
        println!("Bit Identity:  FAILED (outputs differ)");
        println!("\n  *** Performance comparison not meaningful ***\n");
        println!("══════════════════════════════════════════════════════════════════");
        return;
    }
    println!("Bit Identity:  VERIFIED (outputs identical)\n");

    if !comparison.comparable {
        println!("  Results not comparable.");
        println!("══════════════════════════════════════════════════════════════════");
        return;
    }

    println!("Latency (p99):");
    let sign = if comparison.latency_diff_ns >= 0 { "+" } else { "-" };
    println!(
        "  Diff:    {}{} ns",
        sign,
        format_number(comparison.latency_diff_ns.unsigned_abs())
    );
    let ratio_int = comparison.latency_ratio_q16 >> 16;
    let ratio_frac = ((comparison.latency_ratio_q16 & 0xFFFF) as u64 * 100) >> 16;
    let trend = match comparison.latency_diff_ns {
        d if d > 0 => "slower",
        d if d < 0 => "faster",
        _ => "(equal)",
    };
    println!("  Ratio:   {ratio_int}.{ratio_frac:02}x {trend}");

    println!("\nThroughput:");
    let sign = if comparison.throughput_diff >= 0 { "+" } else { "-" };
    println!(
        "  Diff:    {}{} inferences/sec",
        sign,
        format_number(comparison.throughput_diff.unsigned_abs())
    );
    let ratio_int = comparison.throughput_ratio_q16 >> 16;
    let ratio_frac = ((comparison.throughput_ratio_q16 & 0xFFFF) as u64 * 100) >> 16;
    println!("  Ratio:   {ratio_int}.{ratio_frac:02}x");

    println!("\n══════════════════════════════════════════════════════════════════");
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let mut config = Config::default();
    config.warmup_iterations = args.warmup;
    config.measure_iterations = args.iterations;
    config.batch_size = args.batch;

    println!("══════════════════════════════════════════════════════════════════");
    println!("  certifiable-bench v1.0.0");
    println!("══════════════════════════════════════════════════════════════════\n");

    let mut input = [0u8; INPUT_SIZE];
    for (j, byte) in input.iter_mut().enumerate() {
        *byte = (j & 0xFF) as u8;
    }
    let mut output = [0u8; INPUT_SIZE];

    log::info!("starting benchmark: {} warmup, {} measure", args.warmup, args.iterations);
    println!("Running benchmark...");
    let result = match run_benchmark(config, mock_inference, &input, &mut output) {
        Ok(r) => r,
        Err(e) => {
            log::error!("benchmark failed: {e}");
            eprintln!("Benchmark failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!();
    print_summary(&result);

    let mut had_io_failure = false;

    if let Some(path) = &args.output {
        match report::write_json(&result, path) {
            Ok(()) => println!("\nJSON written to: {}", path.display()),
            Err(e) => {
                log::warn!("failed to write JSON to {}: {e}", path.display());
                eprintln!("Failed to write JSON: {e}");
                had_io_failure = true;
            }
        }
    }

    if let Some(path) = &args.csv {
        match report::write_csv(&result, path) {
            Ok(()) => println!("CSV written to: {}", path.display()),
            Err(e) => {
                log::warn!("failed to write CSV to {}: {e}", path.display());
                eprintln!("Failed to write CSV: {e}");
                had_io_failure = true;
            }
        }
    }

    if let Some(path) = &args.compare {
        match report::load_result(path) {
            Ok(baseline) => {
                let comparison = report::compare(&baseline, &result);
                println!();
                print_comparison(&comparison);
            }
            Err(e) => {
                log::warn!("failed to load baseline {}: {e}", path.display());
                eprintln!("Failed to load baseline: {e}");
                had_io_failure = true;
            }
        }
    }

    if result.is_valid() && !had_io_failure {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
