//! Result serialisation (JSON, CSV) and cross-platform comparison, ported
//! from `original_source/src/report/report.c`.
//!
//! JSON key order matches the original's field order exactly — achieved
//! here simply by declaring struct fields in that order and letting
//! `serde_json` serialise a struct in declaration order, rather than the
//! original's manual `fprintf` sequence.

use std::io::Write;
use std::path::Path;

use crate::env::{EnvSnapshot, EnvStats, HwCounters};
use crate::error::{Error, Result};
use crate::metrics::{Histogram, HistogramBin, LatencyStats, Throughput};
use crate::runner::BenchResult;
use crate::types::Hash;
use crate::verify;

/// Result of comparing two benchmark results (spec.md §3 `Comparison`,
/// `CB-MATH-001 §8.3`: two results are only performance-comparable if
/// their output hashes match).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Comparison {
    pub platform_a: arrayvec::ArrayString<32>,
    pub platform_b: arrayvec::ArrayString<32>,
    pub outputs_identical: bool,
    pub comparable: bool,
    pub latency_diff_ns: i64,
    pub latency_ratio_q16: u32,
    pub throughput_diff: i64,
    pub throughput_ratio_q16: u32,
    pub wcet_diff_ns: i64,
    pub wcet_ratio_q16: u32,
}

fn q16_ratio(numerator: u64, denominator: u64) -> u32 {
    if denominator == 0 {
        return 0;
    }
    (((numerator as u128) << 16) / denominator as u128) as u32
}

/// Compares two results. If their output hashes differ, every
/// performance field is zeroed and `comparable` is `false` — comparing
/// timings across non-identical outputs would compare apples to oranges
/// (`REPORT-F-043`, `REPORT-F-044`).
pub fn compare(a: &BenchResult, b: &BenchResult) -> Comparison {
    let outputs_identical = verify::hash_equal(&a.output_hash, &b.output_hash);

    let mut comparison = Comparison {
        platform_a: a.platform,
        platform_b: b.platform,
        outputs_identical,
        comparable: outputs_identical,
        latency_diff_ns: 0,
        latency_ratio_q16: 0,
        throughput_diff: 0,
        throughput_ratio_q16: 0,
        wcet_diff_ns: 0,
        wcet_ratio_q16: 0,
    };

    if !comparison.comparable {
        return comparison;
    }

    comparison.latency_diff_ns = b.latency.p99_ns as i64 - a.latency.p99_ns as i64;
    comparison.latency_ratio_q16 = q16_ratio(b.latency.p99_ns, a.latency.p99_ns);

    comparison.throughput_diff =
        b.throughput.inferences_per_sec as i64 - a.throughput.inferences_per_sec as i64;
    comparison.throughput_ratio_q16 =
        q16_ratio(b.throughput.inferences_per_sec, a.throughput.inferences_per_sec);

    comparison.wcet_diff_ns = b.latency.wcet_bound_ns as i64 - a.latency.wcet_bound_ns as i64;
    comparison.wcet_ratio_q16 = q16_ratio(b.latency.wcet_bound_ns, a.latency.wcet_bound_ns);

    comparison
}

/// A JSON projection of [`BenchResult`] whose field order exactly matches
/// the original's `fprintf` sequence. Kept separate from `BenchResult`
/// itself so the in-memory type can evolve independently of the
/// persisted wire format.
#[derive(serde::Serialize, serde::Deserialize)]
struct JsonReport {
    version: &'static str,
    platform: String,
    cpu_model: String,
    cpu_freq_mhz: u32,
    config: JsonConfig,
    latency: JsonLatency,
    throughput: JsonThroughput,
    verification: JsonVerification,
    environment: JsonEnvironment,
    histogram: JsonHistogram,
    faults: JsonFaults,
    benchmark_start_ns: u64,
    benchmark_end_ns: u64,
    benchmark_duration_ns: u64,
    timestamp_unix: u64,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct JsonConfig {
    warmup_iterations: u32,
    measure_iterations: u32,
    batch_size: u32,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct JsonLatency {
    min_ns: u64,
    max_ns: u64,
    mean_ns: u64,
    median_ns: u64,
    p95_ns: u64,
    p99_ns: u64,
    stddev_ns: u64,
    variance_ns2: u64,
    sample_count: u32,
    outlier_count: u32,
    wcet_observed_ns: u64,
    wcet_bound_ns: u64,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct JsonThroughput {
    inferences_per_sec: u64,
    samples_per_sec: u64,
    bytes_per_sec: u64,
    batch_size: u32,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct JsonVerification {
    determinism_verified: bool,
    verification_failures: u32,
    output_hash: String,
    result_hash: String,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct JsonEnvironment {
    stable: bool,
    start_freq_hz: u64,
    end_freq_hz: u64,
    min_freq_hz: u64,
    max_freq_hz: u64,
    #[serde(rename = "start_temp_mC")]
    start_temp_mc: i32,
    #[serde(rename = "end_temp_mC")]
    end_temp_mc: i32,
    #[serde(rename = "min_temp_mC")]
    min_temp_mc: i32,
    #[serde(rename = "max_temp_mC")]
    max_temp_mc: i32,
    throttle_events: u32,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct JsonHistogram {
    valid: bool,
    range_min_ns: u64,
    range_max_ns: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    bin_width_ns: Option<u64>,
    num_bins: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    overflow_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    underflow_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bins: Option<Vec<u32>>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct JsonFaults {
    overflow: bool,
    underflow: bool,
    div_zero: bool,
    timer_error: bool,
    verify_fail: bool,
    thermal_drift: bool,
}

impl From<&BenchResult> for JsonReport {
    fn from(r: &BenchResult) -> JsonReport {
        let histogram = match &r.histogram {
            Some(h) => JsonHistogram {
                valid: true,
                range_min_ns: h.range_min_ns,
                range_max_ns: h.range_max_ns,
                bin_width_ns: Some(h.bin_width_ns),
                num_bins: h.bins.len() as u32,
                overflow_count: Some(h.overflow_count),
                underflow_count: Some(h.underflow_count),
                bins: Some(h.bins.iter().map(|b| b.count).collect()),
            },
            None => JsonHistogram {
                valid: false,
                range_min_ns: 0,
                range_max_ns: 0,
                bin_width_ns: None,
                num_bins: 0,
                overflow_count: None,
                underflow_count: None,
                bins: None,
            },
        };

        JsonReport {
            version: "1.0",
            platform: r.platform.to_string(),
            cpu_model: r.cpu_model.to_string(),
            cpu_freq_mhz: r.cpu_freq_mhz,
            config: JsonConfig {
                warmup_iterations: r.warmup_iterations,
                measure_iterations: r.measure_iterations,
                batch_size: r.batch_size,
            },
            latency: JsonLatency {
                min_ns: r.latency.min_ns,
                max_ns: r.latency.max_ns,
                mean_ns: r.latency.mean_ns,
                median_ns: r.latency.median_ns,
                p95_ns: r.latency.p95_ns,
                p99_ns: r.latency.p99_ns,
                stddev_ns: r.latency.stddev_ns,
                variance_ns2: r.latency.variance_ns2,
                sample_count: r.latency.sample_count,
                outlier_count: r.latency.outlier_count,
                wcet_observed_ns: r.latency.wcet_observed_ns,
                wcet_bound_ns: r.latency.wcet_bound_ns,
            },
            throughput: JsonThroughput {
                inferences_per_sec: r.throughput.inferences_per_sec,
                samples_per_sec: r.throughput.samples_per_sec,
                bytes_per_sec: r.throughput.bytes_per_sec,
                batch_size: r.throughput.batch_size,
            },
            verification: JsonVerification {
                determinism_verified: r.determinism_verified,
                verification_failures: r.verification_failures,
                output_hash: r.output_hash.to_hex().to_string(),
                result_hash: r.result_hash.to_hex().to_string(),
            },
            environment: JsonEnvironment {
                stable: r.env_stable,
                start_freq_hz: r.environment.start.cpu_freq_hz,
                end_freq_hz: r.environment.end.cpu_freq_hz,
                min_freq_hz: r.environment.min_freq_hz,
                max_freq_hz: r.environment.max_freq_hz,
                start_temp_mc: r.environment.start.cpu_temp_mc,
                end_temp_mc: r.environment.end.cpu_temp_mc,
                min_temp_mc: r.environment.min_temp_mc,
                max_temp_mc: r.environment.max_temp_mc,
                throttle_events: r.environment.total_throttle_events,
            },
            histogram,
            faults: JsonFaults {
                overflow: r.faults.overflow,
                underflow: r.faults.underflow,
                div_zero: r.faults.div_zero,
                timer_error: r.faults.timer_error,
                verify_fail: r.faults.verify_fail,
                thermal_drift: r.faults.thermal_drift,
            },
            benchmark_start_ns: r.benchmark_start_ns,
            benchmark_end_ns: r.benchmark_end_ns,
            benchmark_duration_ns: r.benchmark_duration_ns,
            timestamp_unix: r.timestamp_unix,
        }
    }
}

/// Serialises `result` to pretty-printed, 2-space-indented JSON with a
/// fixed key order, matching byte-for-byte across runs on the same
/// platform with the same result.
pub fn to_json_string(result: &BenchResult) -> Result<String> {
    let report = JsonReport::from(result);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"  ");
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    serde::Serialize::serialize(&report, &mut ser).map_err(|e| Error::DataLoad(e.to_string()))?;
    Ok(String::from_utf8(buf).expect("serde_json always emits valid UTF-8"))
}

/// Writes `result` as JSON to `path`, creating or truncating the file.
pub fn write_json(result: &BenchResult, path: impl AsRef<Path>) -> Result<()> {
    let json = to_json_string(result)?;
    std::fs::write(path, json)?;
    Ok(())
}

const CSV_HEADER: &str = "platform,cpu_model,min_ns,max_ns,mean_ns,median_ns,p95_ns,p99_ns,\
stddev_ns,inferences_per_sec,determinism_verified,output_hash,timestamp_unix";

fn csv_row(result: &BenchResult) -> String {
    format!(
        "{},\"{}\",{},{},{},{},{},{},{},{},{},{},{}",
        result.platform,
        result.cpu_model,
        result.latency.min_ns,
        result.latency.max_ns,
        result.latency.mean_ns,
        result.latency.median_ns,
        result.latency.p95_ns,
        result.latency.p99_ns,
        result.latency.stddev_ns,
        result.throughput.inferences_per_sec,
        result.determinism_verified,
        result.output_hash.to_hex(),
        result.timestamp_unix,
    )
}

/// Writes `result` as a CSV file with a header row, overwriting `path`.
pub fn write_csv(result: &BenchResult, path: impl AsRef<Path>) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    writeln!(file, "{CSV_HEADER}")?;
    writeln!(file, "{}", csv_row(result))?;
    Ok(())
}

/// Appends `result` as a CSV data row (no header) to `path`, creating it
/// if it doesn't exist.
pub fn append_csv(result: &BenchResult, path: impl AsRef<Path>) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{}", csv_row(result))?;
    Ok(())
}

/// The `cb_golden_ref` file format (spec.md §6 "Golden reference file"):
/// a standalone, minimal record distinct from a full JSON report, carrying
/// just enough to re-verify a run's determinism against a prior baseline.
#[derive(serde::Serialize, serde::Deserialize)]
struct GoldenFile {
    version: &'static str,
    format: &'static str,
    output_hash: String,
    sample_count: u32,
    output_size: u32,
    platform: String,
}

const GOLDEN_FORMAT_TAG: &str = "cb_golden_ref";

/// Writes `golden` to `path` in the `cb_golden_ref` format, pretty-printed
/// the same way [`write_json`] is.
pub fn write_golden(golden: &verify::GoldenRef, path: impl AsRef<Path>) -> Result<()> {
    let file = GoldenFile {
        version: "1.0",
        format: GOLDEN_FORMAT_TAG,
        output_hash: golden.output_hash.to_hex().to_string(),
        sample_count: golden.sample_count,
        output_size: golden.output_size,
        platform: golden.platform.to_string(),
    };
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"  ");
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    serde::Serialize::serialize(&file, &mut ser).map_err(|e| Error::GoldenLoad(e.to_string()))?;
    std::fs::write(path, buf)?;
    Ok(())
}

/// Loads a `cb_golden_ref` file written by [`write_golden`]. Fails if
/// `format` isn't `"cb_golden_ref"` or `output_hash` isn't valid hex — a
/// golden reference silently accepted from the wrong file would make
/// `golden_verify` meaningless.
pub fn load_golden(path: impl AsRef<Path>) -> Result<verify::GoldenRef> {
    let content = std::fs::read_to_string(path)?;
    let file: GoldenFile =
        serde_json::from_str(&content).map_err(|e| Error::GoldenLoad(e.to_string()))?;
    if file.format != GOLDEN_FORMAT_TAG {
        return Err(Error::GoldenLoad(format!(
            "unexpected format tag: {}",
            file.format
        )));
    }
    let output_hash = Hash::from_hex(&file.output_hash)
        .ok_or_else(|| Error::GoldenLoad("malformed output_hash".to_string()))?;
    let platform = arrayvec::ArrayString::<32>::from(file.platform.as_str())
        .unwrap_or_else(|_| arrayvec::ArrayString::<32>::new());
    Ok(verify::GoldenRef {
        output_hash,
        sample_count: file.sample_count,
        output_size: file.output_size,
        platform,
    })
}

fn result_from_json(report: &JsonReport) -> Result<BenchResult> {
    let platform = arrayvec::ArrayString::<32>::from(report.platform.as_str())
        .unwrap_or_else(|_| arrayvec::ArrayString::<32>::new());
    let cpu_model = arrayvec::ArrayString::<128>::from(report.cpu_model.as_str())
        .unwrap_or_else(|_| arrayvec::ArrayString::<128>::new());
    let output_hash = Hash::from_hex(&report.verification.output_hash)
        .ok_or_else(|| Error::DataLoad("malformed output_hash".to_string()))?;
    let result_hash = Hash::from_hex(&report.verification.result_hash)
        .ok_or_else(|| Error::DataLoad("malformed result_hash".to_string()))?;

    // The JSON wire format never carried per-snapshot timestamps or
    // hardware-counter values (see JsonEnvironment/JsonReport), so a
    // round-tripped EnvStats/HwCounters can only be as complete as what
    // was persisted — same limitation the original's own `cb_load_json`
    // has against its own writer.
    let environment = EnvStats {
        start: EnvSnapshot {
            timestamp_ns: 0,
            cpu_freq_hz: report.environment.start_freq_hz,
            cpu_temp_mc: report.environment.start_temp_mc,
            throttle_count: 0,
        },
        end: EnvSnapshot {
            timestamp_ns: 0,
            cpu_freq_hz: report.environment.end_freq_hz,
            cpu_temp_mc: report.environment.end_temp_mc,
            throttle_count: report.environment.throttle_events,
        },
        min_freq_hz: report.environment.min_freq_hz,
        max_freq_hz: report.environment.max_freq_hz,
        min_temp_mc: report.environment.min_temp_mc,
        max_temp_mc: report.environment.max_temp_mc,
        total_throttle_events: report.environment.throttle_events,
    };

    let histogram = if report.histogram.valid {
        let bin_width_ns = report.histogram.bin_width_ns.unwrap_or(1);
        let bins = report
            .histogram
            .bins
            .as_ref()
            .map(|counts| {
                counts
                    .iter()
                    .enumerate()
                    .map(|(i, &count)| {
                        let min_ns = report.histogram.range_min_ns + i as u64 * bin_width_ns;
                        HistogramBin {
                            min_ns,
                            max_ns: min_ns + bin_width_ns,
                            count,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        Some(Histogram {
            range_min_ns: report.histogram.range_min_ns,
            range_max_ns: report.histogram.range_max_ns,
            bin_width_ns,
            overflow_count: report.histogram.overflow_count.unwrap_or(0),
            underflow_count: report.histogram.underflow_count.unwrap_or(0),
            bins,
        })
    } else {
        None
    };

    Ok(BenchResult {
        platform,
        cpu_model,
        cpu_freq_mhz: report.cpu_freq_mhz,
        warmup_iterations: report.config.warmup_iterations,
        measure_iterations: report.config.measure_iterations,
        batch_size: report.config.batch_size,
        latency: LatencyStats {
            min_ns: report.latency.min_ns,
            max_ns: report.latency.max_ns,
            mean_ns: report.latency.mean_ns,
            median_ns: report.latency.median_ns,
            p95_ns: report.latency.p95_ns,
            p99_ns: report.latency.p99_ns,
            stddev_ns: report.latency.stddev_ns,
            variance_ns2: report.latency.variance_ns2,
            sample_count: report.latency.sample_count,
            outlier_count: report.latency.outlier_count,
            wcet_observed_ns: report.latency.wcet_observed_ns,
            wcet_bound_ns: report.latency.wcet_bound_ns,
        },
        throughput: Throughput {
            inferences_per_sec: report.throughput.inferences_per_sec,
            samples_per_sec: report.throughput.samples_per_sec,
            bytes_per_sec: report.throughput.bytes_per_sec,
            batch_size: report.throughput.batch_size,
        },
        hwcounters: None as Option<HwCounters>,
        environment,
        env_stable: report.environment.stable,
        histogram,
        determinism_verified: report.verification.determinism_verified,
        verification_failures: report.verification.verification_failures,
        output_hash,
        result_hash,
        benchmark_start_ns: report.benchmark_start_ns,
        benchmark_end_ns: report.benchmark_end_ns,
        benchmark_duration_ns: report.benchmark_duration_ns,
        timestamp_unix: report.timestamp_unix,
        faults: crate::types::FaultFlags {
            overflow: report.faults.overflow,
            underflow: report.faults.underflow,
            div_zero: report.faults.div_zero,
            timer_error: report.faults.timer_error,
            verify_fail: report.faults.verify_fail,
            thermal_drift: report.faults.thermal_drift,
        },
    })
}

/// Reconstructs a full [`BenchResult`] from a previously written JSON
/// report, the way `cb_load_json` rebuilds a `cb_result_t` for
/// [`compare`] against a freshly measured baseline.
pub fn load_result(path: impl AsRef<Path>) -> Result<BenchResult> {
    let content = std::fs::read_to_string(path)?;
    let report: JsonReport =
        serde_json::from_str(&content).map_err(|e| Error::DataLoad(e.to_string()))?;
    result_from_json(&report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{run_benchmark, Config};

    fn sample_result() -> BenchResult {
        let mut config = Config::default();
        config.warmup_iterations = 1;
        config.measure_iterations = 5;
        config.monitor_environment = false;
        let input = [0u8; 2];
        let mut output = [0u8; 2];
        run_benchmark(
            config,
            |_input: &[u8], out: &mut [u8]| {
                out.fill(7);
                Ok(())
            },
            &input,
            &mut output,
        )
        .unwrap()
    }

    #[test]
    fn json_report_has_expected_shape() {
        let result = sample_result();
        let json = to_json_string(&result).unwrap();
        assert!(json.starts_with('{'));
        assert!(json.contains("\"version\": \"1.0\""));
        assert!(json.contains("  \"platform\""));
    }

    #[test]
    fn golden_ref_round_trips() {
        let result = sample_result();
        let golden = verify::GoldenRef {
            output_hash: result.output_hash,
            sample_count: result.latency.sample_count,
            output_size: 2,
            platform: result.platform,
        };

        let dir = std::env::temp_dir();
        let path = dir.join(format!("cbctl-golden-test-{:p}.json", &dir));
        write_golden(&golden, &path).unwrap();

        let loaded = load_golden(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert!(verify::hash_equal(&loaded.output_hash, &golden.output_hash));
        assert_eq!(loaded.sample_count, golden.sample_count);
        assert_eq!(loaded.output_size, golden.output_size);
        assert_eq!(loaded.platform.as_str(), golden.platform.as_str());
        assert!(verify::golden_verify(&result.output_hash, &loaded));
    }

    #[test]
    fn load_golden_rejects_wrong_format_tag() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("cbctl-golden-bad-{:p}.json", &dir));
        std::fs::write(
            &path,
            r#"{"version":"1.0","format":"not_a_golden_ref","output_hash":"00","sample_count":1,"output_size":1,"platform":"x86_64"}"#,
        )
        .unwrap();
        let err = load_golden(&path);
        std::fs::remove_file(&path).ok();
        assert!(err.is_err());
    }

    #[test]
    fn csv_row_quotes_cpu_model() {
        let result = sample_result();
        let row = csv_row(&result);
        assert!(row.contains(&format!("\"{}\"", result.cpu_model)));
    }

    #[test]
    fn compare_identical_outputs_is_comparable() {
        let a = sample_result();
        let b = sample_result();
        let cmp = compare(&a, &b);
        assert!(cmp.outputs_identical);
        assert!(cmp.comparable);
    }

    #[test]
    fn compare_different_outputs_is_not_comparable() {
        let a = sample_result();
        let mut b = sample_result();
        b.output_hash = Hash([0xffu8; 32]);
        let cmp = compare(&a, &b);
        assert!(!cmp.outputs_identical);
        assert!(!cmp.comparable);
        assert_eq!(cmp.latency_diff_ns, 0);
        assert_eq!(cmp.latency_ratio_q16, 0);
    }

    #[test]
    fn q16_ratio_handles_zero_denominator() {
        assert_eq!(q16_ratio(100, 0), 0);
        assert_eq!(q16_ratio(0, 100), 0);
    }

    #[test]
    fn load_result_round_trips_latency_and_hashes() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("cbctl-test-{:p}.json", &dir));
        let original = sample_result();
        write_json(&original, &path).unwrap();

        let loaded = load_result(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.platform.as_str(), original.platform.as_str());
        assert_eq!(loaded.latency.p99_ns, original.latency.p99_ns);
        assert!(verify::hash_equal(&loaded.output_hash, &original.output_hash));

        let cmp = compare(&original, &loaded);
        assert!(cmp.outputs_identical);
        assert!(cmp.comparable);
    }
}
