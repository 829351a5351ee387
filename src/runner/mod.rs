//! Benchmark configuration and the execution state machine, ported from
//! `original_source/src/runner/runner.c`.
//!
//! The critical loop (`Runner::execute`) keeps the non-interference
//! invariant from `CB-MATH-001 §7.2`: nothing runs between the two timer
//! reads except the caller's inference call. Verification hashing,
//! fault bookkeeping and sample storage all happen strictly after
//! `t_end` is captured.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::env::{self, EnvSnapshot, EnvStats, HwCounterHandle, HwCounters};
use crate::error::{Error, Result};
use crate::metrics::{self, Histogram, LatencyStats, Throughput};
use crate::timer::{Timer, TimerSource};
use crate::types::{FaultFlags, Hash};
use crate::verify::{self, VerifyCtx};

/// Benchmark configuration (spec.md §3 `Config`). Field defaults match
/// `cb_config_init`.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    pub warmup_iterations: u32,
    pub measure_iterations: u32,
    pub batch_size: u32,
    pub timer_source: TimerSource,
    pub verify_outputs: bool,
    pub collect_histogram: bool,
    pub histogram_bins: u32,
    pub histogram_min_ns: u64,
    pub histogram_max_ns: u64,
    pub monitor_environment: bool,
    pub collect_hw_counters: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            warmup_iterations: 100,
            measure_iterations: 1_000,
            batch_size: 1,
            timer_source: TimerSource::Auto,
            verify_outputs: true,
            collect_histogram: false,
            histogram_bins: 100,
            histogram_min_ns: 0,
            histogram_max_ns: 10 * (crate::timer::NS_PER_SEC / 1_000), // 10 ms
            monitor_environment: true,
            collect_hw_counters: false,
        }
    }
}

impl Config {
    /// Checks invariants `cb_config_validate` enforces: positive iteration
    /// counts bounded by [`metrics::MAX_SAMPLES`], and (if histograms are
    /// requested) a sane bin count and non-empty range.
    pub fn validate(&self) -> Result<()> {
        if self.measure_iterations == 0 {
            return Err(Error::InvalidConfig("measure_iterations must be > 0"));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be > 0"));
        }
        if self.measure_iterations as usize > metrics::MAX_SAMPLES {
            return Err(Error::InvalidConfig("measure_iterations exceeds MAX_SAMPLES"));
        }
        if self.collect_histogram {
            if self.histogram_bins == 0 || self.histogram_bins as usize > metrics::MAX_HISTOGRAM_BINS {
                return Err(Error::InvalidConfig("histogram_bins out of range"));
            }
            if self.histogram_max_ns <= self.histogram_min_ns {
                return Err(Error::InvalidConfig("histogram range must be non-empty"));
            }
        }
        Ok(())
    }

    /// A deterministic digest of the fields that affect measurement
    /// semantics, folded into the result-binding commitment
    /// (spec.md §4.2) so two results computed under different
    /// configurations can never collide. The original always passes `0`
    /// here with a note that it "could be computed" — this crate computes
    /// it, since an unused field in a certification commitment is a gap,
    /// not a feature.
    pub fn config_hash(&self) -> u64 {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&self.warmup_iterations.to_le_bytes());
        buf.extend_from_slice(&self.measure_iterations.to_le_bytes());
        buf.extend_from_slice(&self.batch_size.to_le_bytes());
        buf.push(self.verify_outputs as u8);
        buf.push(self.collect_histogram as u8);
        buf.extend_from_slice(&self.histogram_bins.to_le_bytes());
        buf.extend_from_slice(&self.histogram_min_ns.to_le_bytes());
        buf.extend_from_slice(&self.histogram_max_ns.to_le_bytes());
        buf.push(self.monitor_environment as u8);
        let digest = verify::compute_hash(&buf);
        let mut le = [0u8; 8];
        le.copy_from_slice(&digest.0[..8]);
        u64::from_le_bytes(le)
    }
}

/// Complete benchmark result (spec.md §3 `Result`, renamed here to avoid
/// colliding with [`std::result::Result`] / [`crate::error::Result`]).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BenchResult {
    pub platform: arrayvec::ArrayString<32>,
    pub cpu_model: arrayvec::ArrayString<128>,
    pub cpu_freq_mhz: u32,
    pub warmup_iterations: u32,
    pub measure_iterations: u32,
    pub batch_size: u32,
    pub latency: LatencyStats,
    pub throughput: Throughput,
    pub hwcounters: Option<HwCounters>,
    pub environment: EnvStats,
    pub env_stable: bool,
    pub histogram: Option<Histogram>,
    pub determinism_verified: bool,
    pub verification_failures: u32,
    pub output_hash: Hash,
    pub result_hash: Hash,
    pub benchmark_start_ns: u64,
    pub benchmark_end_ns: u64,
    pub benchmark_duration_ns: u64,
    pub timestamp_unix: u64,
    pub faults: FaultFlags,
}

impl BenchResult {
    /// `true` if this result carries no hard fault and can be used as
    /// certification evidence (`cb_result_is_valid`).
    pub fn is_valid(&self) -> bool {
        !self.faults.has_hard_fault()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Uninit,
    Ready,
    WarmedUp,
    Executed,
}

/// The inference function signature every benchmark run drives: reads
/// `input`, writes to `output`, and reports whether the call itself
/// succeeded. Errors inside the critical loop are recorded as a
/// `verify_fail` fault rather than aborting the run, matching
/// `RUNNER-F-074` — partial timing data is still useful evidence.
pub trait InferenceFn: FnMut(&[u8], &mut [u8]) -> Result<()> {}
impl<F: FnMut(&[u8], &mut [u8]) -> Result<()>> InferenceFn for F {}

/// Drives warmup and measurement for one caller-supplied inference
/// function over a caller-owned sample buffer (spec.md §2 `Runner`).
///
/// No heap allocation happens inside [`Runner::execute`]'s critical
/// loop: `samples` is sized once at [`Runner::init`] and never resized.
pub struct Runner {
    config: Config,
    timer: Timer,
    samples: Vec<u64>,
    faults: FaultFlags,
    verify_ctx: Option<VerifyCtx>,
    env_start: Option<EnvSnapshot>,
    hw_handle: Option<HwCounterHandle>,
    benchmark_start_ns: u64,
    state: State,
}

impl Runner {
    /// Validates `config`, selects and calibrates a timer, and reserves a
    /// sample buffer sized to `config.measure_iterations`.
    pub fn init(config: Config) -> Result<Runner> {
        config.validate()?;

        let timer = Timer::init(config.timer_source);
        if timer.faults().timer_error {
            return Err(Error::TimerInit);
        }

        let verify_ctx = config.verify_outputs.then(VerifyCtx::new);
        let samples = Vec::with_capacity(config.measure_iterations as usize);

        Ok(Runner {
            config,
            timer,
            samples,
            faults: FaultFlags::default(),
            verify_ctx,
            env_start: None,
            hw_handle: None,
            benchmark_start_ns: 0,
            state: State::Ready,
        })
    }

    /// Runs `warmup_iterations` calls through `fn`, discarding timing
    /// data, then snapshots the starting environment and arms hardware
    /// counters. A warmup failure aborts the benchmark (`RUNNER-F-033`).
    pub fn warmup(&mut self, mut f: impl InferenceFn, input: &[u8], output: &mut [u8]) -> Result<()> {
        if self.state != State::Ready {
            return Err(Error::InvalidConfig("warmup called out of sequence"));
        }

        for _ in 0..self.config.warmup_iterations {
            f(input, output)?;
        }

        if self.config.monitor_environment {
            self.env_start = Some(EnvSnapshot::capture(&mut self.timer));
        }

        if self.config.collect_hw_counters {
            if let Ok(handle) = HwCounterHandle::open() {
                let _ = handle.start();
                self.hw_handle = Some(handle);
            }
        }

        self.benchmark_start_ns = self.timer.now_ns();
        self.state = State::WarmedUp;
        Ok(())
    }

    /// The critical timed loop. Runs warmup first if it hasn't already
    /// run. Per iteration: read the timer, call `f`, read the timer
    /// again — verification hashing and fault bookkeeping happen only
    /// after the second read.
    pub fn execute(&mut self, mut f: impl InferenceFn, input: &[u8], output: &mut [u8]) -> Result<()> {
        if self.state == State::Ready {
            self.warmup(&mut f, input, output)?;
        }
        if self.state != State::WarmedUp {
            return Err(Error::InvalidConfig("execute called out of sequence"));
        }

        for _ in 0..self.config.measure_iterations {
            let t_start = self.timer.now_ns();
            let call_result = f(input, output);
            let t_end = self.timer.now_ns();

            self.samples.push(t_end.wrapping_sub(t_start));
            if t_end < t_start {
                self.faults.timer_error = true;
            }

            if let Some(ctx) = self.verify_ctx.as_mut() {
                if !output.is_empty() {
                    ctx.update(output);
                }
            }

            if call_result.is_err() {
                self.faults.verify_fail = true;
            }
        }

        self.state = State::Executed;
        Ok(())
    }

    /// Assembles the final [`BenchResult`]: statistics, throughput,
    /// environment stability, optional histogram/hardware-counter data,
    /// and the cryptographic result binding.
    pub fn get_result(&mut self) -> Result<BenchResult> {
        if self.state != State::Executed || self.samples.is_empty() {
            return Err(Error::InvalidConfig("get_result called before execute"));
        }

        let platform = arrayvec::ArrayString::<32>::from(env::platform_name())
            .unwrap_or_else(|_| arrayvec::ArrayString::<32>::new());
        let cpu_model = env::cpu_model();
        let cpu_freq_mhz = env::cpu_freq_mhz();

        let mut stats_faults = FaultFlags::default();
        let mut samples = std::mem::take(&mut self.samples);
        let latency = metrics::compute_stats(&mut samples, &mut stats_faults)?;

        let total_latency_ns: u64 = samples.iter().fold(0u64, |acc, &x| acc.saturating_add(x));
        let throughput = Throughput::compute(
            total_latency_ns,
            samples.len() as u64,
            self.config.batch_size,
            0,
        );

        let histogram = if self.config.collect_histogram {
            let mut hist = Histogram::init(
                self.config.histogram_bins as usize,
                self.config.histogram_min_ns,
                self.config.histogram_max_ns,
            )?;
            hist.build(&samples);
            Some(hist)
        } else {
            None
        };

        let (environment, env_stable) = if let Some(start) = self.env_start {
            let end = EnvSnapshot::capture(&mut self.timer);
            let stats = EnvStats::compute(start, end);
            let stable = env::check_stable(&stats);
            (stats, stable)
        } else {
            (EnvStats::default(), true)
        };
        if !env_stable {
            self.faults.thermal_drift = true;
        }

        let hwcounters = self.hw_handle.take().map(HwCounterHandle::stop);

        let benchmark_end_ns = self.timer.now_ns();
        let benchmark_duration_ns = benchmark_end_ns.saturating_sub(self.benchmark_start_ns);

        let timestamp_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let (output_hash, result_hash, determinism_verified, verification_failures) =
            if let Some(ctx) = self.verify_ctx.clone() {
                let output_hash = ctx.finish();
                let verification_failures = if self.faults.verify_fail { 1 } else { 0 };
                let result_hash = verify::result_binding(
                    &output_hash,
                    &platform,
                    self.config.config_hash(),
                    latency.min_ns,
                    latency.max_ns,
                    latency.mean_ns,
                    latency.p99_ns,
                    timestamp_unix,
                );
                (output_hash, result_hash, !self.faults.verify_fail, verification_failures)
            } else {
                (Hash::ZERO, Hash::ZERO, false, 0)
            };

        let mut faults = self.faults;
        faults.merge(&stats_faults);

        Ok(BenchResult {
            platform,
            cpu_model,
            cpu_freq_mhz,
            warmup_iterations: self.config.warmup_iterations,
            measure_iterations: self.config.measure_iterations,
            batch_size: self.config.batch_size,
            latency,
            throughput,
            hwcounters,
            environment,
            env_stable,
            histogram,
            determinism_verified,
            verification_failures,
            output_hash,
            result_hash,
            benchmark_start_ns: self.benchmark_start_ns,
            benchmark_end_ns,
            benchmark_duration_ns,
            timestamp_unix,
            faults,
        })
    }

    /// Releases the runner's state, ready to be dropped or re-initialised.
    /// The original documents this as "does not free the sample buffer —
    /// caller owns it"; here the buffer is just `Runner`-owned `Vec`
    /// storage, so cleanup only resets bookkeeping fields.
    pub fn cleanup(&mut self) {
        self.samples.clear();
        self.state = State::Uninit;
        self.hw_handle = None;
    }
}

/// Runs one complete benchmark (init → warmup → execute → get_result →
/// cleanup) and guarantees cleanup happens even if an earlier step fails.
pub fn run_benchmark(
    config: Config,
    mut f: impl InferenceFn,
    input: &[u8],
    output: &mut [u8],
) -> Result<BenchResult> {
    let mut runner = Runner::init(config)?;
    let outcome = runner
        .warmup(&mut f, input, output)
        .and_then(|_| runner.execute(&mut f, input, output))
        .and_then(|_| runner.get_result());
    runner.cleanup();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(_input: &[u8], output: &mut [u8]) -> Result<()> {
        output.fill(0x42);
        Ok(())
    }

    #[test]
    fn config_default_matches_original_defaults() {
        let c = Config::default();
        assert_eq!(c.warmup_iterations, 100);
        assert_eq!(c.measure_iterations, 1_000);
        assert_eq!(c.batch_size, 1);
        assert!(c.verify_outputs);
        assert!(c.monitor_environment);
        assert_eq!(c.histogram_max_ns, 10 * 1_000_000);
    }

    #[test]
    fn config_rejects_zero_iterations() {
        let mut c = Config::default();
        c.measure_iterations = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn config_rejects_oversized_iterations() {
        let mut c = Config::default();
        c.measure_iterations = (metrics::MAX_SAMPLES + 1) as u32;
        assert!(c.validate().is_err());
    }

    #[test]
    fn config_hash_is_sensitive_to_fields() {
        let a = Config::default();
        let mut b = Config::default();
        b.batch_size = 2;
        assert_ne!(a.config_hash(), b.config_hash());
    }

    #[test]
    fn run_benchmark_end_to_end() {
        let mut config = Config::default();
        config.warmup_iterations = 2;
        config.measure_iterations = 10;
        config.monitor_environment = false;

        let input = [0u8; 4];
        let mut output = [0u8; 4];
        let result = run_benchmark(config, identity, &input, &mut output).unwrap();

        assert_eq!(result.measure_iterations, 10);
        assert_eq!(result.latency.sample_count, 10);
        assert!(result.determinism_verified);
        assert!(result.is_valid());
    }

    #[test]
    fn failing_inference_sets_verify_fail_but_keeps_timing() {
        let mut config = Config::default();
        config.warmup_iterations = 0;
        config.measure_iterations = 5;
        config.monitor_environment = false;

        let input = [0u8; 1];
        let mut output = [0u8; 1];
        let mut calls = 0u32;
        let result = run_benchmark(
            config,
            |_input: &[u8], out: &mut [u8]| {
                calls += 1;
                out.fill(1);
                if calls == 3 {
                    Err(Error::Verification)
                } else {
                    Ok(())
                }
            },
            &input,
            &mut output,
        )
        .unwrap();

        assert_eq!(result.latency.sample_count, 5);
        assert!(result.faults.verify_fail);
        assert!(!result.is_valid());
    }

    #[test]
    fn get_result_before_execute_fails() {
        let config = Config::default();
        let mut runner = Runner::init(config).unwrap();
        assert!(runner.get_result().is_err());
    }
}
