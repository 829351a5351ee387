//! Platform identification and environmental stability monitoring, ported
//! from `original_source/src/platform/platform.c`.
//!
//! Every sysfs read degrades to `0` (or `"unknown"`) on failure rather
//! than erroring — a benchmark run on a container without thermal sysfs
//! entries, or on a non-Linux host, should still produce a result; it
//! simply can't claim environmental stability evidence.

mod perf;

use crate::timer::Timer;

#[cfg(target_os = "linux")]
const CPUINFO_PATH: &str = "/proc/cpuinfo";
#[cfg(target_os = "linux")]
const CPU_FREQ_PATH: &str = "/sys/devices/system/cpu/cpu0/cpufreq/scaling_cur_freq";
#[cfg(target_os = "linux")]
const CPU_TEMP_PATH: &str = "/sys/class/thermal/thermal_zone0/temp";
#[cfg(target_os = "linux")]
const THROTTLE_PATH: &str = "/sys/devices/system/cpu/cpu0/thermal_throttle/core_throttle_count";

#[cfg(target_os = "linux")]
fn read_sysfs_int(path: &str) -> Option<i64> {
    let content = std::fs::read_to_string(path).ok()?;
    content.trim().parse::<i64>().ok()
}

/// The running platform's architecture tag (spec.md §3 `platform_name`).
pub fn platform_name() -> &'static str {
    if cfg!(target_arch = "x86_64") {
        "x86_64"
    } else if cfg!(target_arch = "aarch64") {
        "aarch64"
    } else if cfg!(all(target_arch = "riscv64")) {
        "riscv64"
    } else if cfg!(target_arch = "riscv32") {
        "riscv32"
    } else if cfg!(target_arch = "x86") {
        "i386"
    } else if cfg!(target_arch = "arm") {
        "arm"
    } else {
        "unknown"
    }
}

/// Best-effort CPU model string, read from `/proc/cpuinfo` on Linux.
/// `"unknown"` on any other platform, or if the file can't be parsed.
pub fn cpu_model() -> arrayvec::ArrayString<128> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(content) = std::fs::read_to_string(CPUINFO_PATH) {
            for line in content.lines() {
                if line.starts_with("model name") || line.starts_with("Model") {
                    if let Some(colon) = line.find(':') {
                        let value = line[colon + 1..].trim();
                        let mut out = arrayvec::ArrayString::<128>::new();
                        let n = value.len().min(out.capacity());
                        out.push_str(&value[..n]);
                        return out;
                    }
                }
            }
        }
    }
    arrayvec::ArrayString::from("unknown").unwrap()
}

/// Current CPU frequency in MHz, `0` if unavailable (spec.md §3
/// `cpu_freq_mhz`).
pub fn cpu_freq_mhz() -> u32 {
    #[cfg(target_os = "linux")]
    {
        if let Some(khz) = read_sysfs_int(CPU_FREQ_PATH) {
            return (khz / 1000).max(0) as u32;
        }
        if let Ok(content) = std::fs::read_to_string(CPUINFO_PATH) {
            for line in content.lines() {
                if line.starts_with("cpu MHz") {
                    if let Some(colon) = line.find(':') {
                        if let Ok(mhz) = line[colon + 1..].trim().parse::<f64>() {
                            return mhz as u32;
                        }
                    }
                }
            }
        }
    }
    0
}

fn read_cpu_freq_hz() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Some(khz) = read_sysfs_int(CPU_FREQ_PATH) {
            return (khz.max(0) as u64) * 1_000;
        }
    }
    0
}

fn read_cpu_temp_mc() -> i32 {
    #[cfg(target_os = "linux")]
    {
        if let Some(t) = read_sysfs_int(CPU_TEMP_PATH) {
            return t as i32;
        }
    }
    0
}

fn read_throttle_count() -> u32 {
    #[cfg(target_os = "linux")]
    {
        if let Some(c) = read_sysfs_int(THROTTLE_PATH) {
            return c.max(0) as u32;
        }
    }
    0
}

/// A point-in-time environmental reading (spec.md §3 `EnvSnapshot`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnvSnapshot {
    pub timestamp_ns: u64,
    pub cpu_freq_hz: u64,
    pub cpu_temp_mc: i32,
    pub throttle_count: u32,
}

impl EnvSnapshot {
    /// Captures frequency, temperature and throttle count, timestamped
    /// against `timer`.
    pub fn capture(timer: &mut Timer) -> EnvSnapshot {
        EnvSnapshot {
            timestamp_ns: timer.now_ns(),
            cpu_freq_hz: read_cpu_freq_hz(),
            cpu_temp_mc: read_cpu_temp_mc(),
            throttle_count: read_throttle_count(),
        }
    }
}

/// Environmental statistics derived from a start/end snapshot pair
/// (spec.md §3 `EnvStats`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnvStats {
    pub start: EnvSnapshot,
    pub end: EnvSnapshot,
    pub min_freq_hz: u64,
    pub max_freq_hz: u64,
    pub min_temp_mc: i32,
    pub max_temp_mc: i32,
    pub total_throttle_events: u32,
}

impl EnvStats {
    pub fn compute(start: EnvSnapshot, end: EnvSnapshot) -> EnvStats {
        EnvStats {
            start,
            end,
            min_freq_hz: start.cpu_freq_hz.min(end.cpu_freq_hz),
            max_freq_hz: start.cpu_freq_hz.max(end.cpu_freq_hz),
            min_temp_mc: start.cpu_temp_mc.min(end.cpu_temp_mc),
            max_temp_mc: start.cpu_temp_mc.max(end.cpu_temp_mc),
            total_throttle_events: end.throttle_count.saturating_sub(start.throttle_count),
        }
    }
}

/// `true` iff the environment was stable across the run: frequency did
/// not drop more than 5% and no throttle events were observed
/// (`CB-MATH-001 §9.3`). Degrades to `true` if no frequency data is
/// available at all — an absent sensor isn't evidence of instability.
pub fn check_stable(stats: &EnvStats) -> bool {
    if stats.start.cpu_freq_hz == 0 {
        return true;
    }

    let end_scaled = stats.end.cpu_freq_hz * 100;
    let threshold = stats.start.cpu_freq_hz * 95;
    if end_scaled < threshold {
        return false;
    }

    stats.total_throttle_events == 0
}

/// Hardware performance counters sampled across the critical region
/// (spec.md §3 `HwCounters`). `ipc_q16` and `cache_miss_rate_q16` are
/// Q16.16 fixed-point ratios, `0` when the denominator is `0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HwCounters {
    pub available: bool,
    pub cycles: u64,
    pub instructions: u64,
    pub cache_refs: u64,
    pub cache_misses: u64,
    pub branch_refs: u64,
    pub branch_misses: u64,
    pub ipc_q16: u32,
    pub cache_miss_rate_q16: u32,
}

/// An armed but not-yet-started set of hardware counters.
pub struct HwCounterHandle {
    set: perf::HwCounterSet,
}

impl HwCounterHandle {
    /// Opens all six tracked hardware events. `Err` if any single event is
    /// unavailable (no perf_event_open support, or denied by
    /// `perf_event_paranoid`).
    pub fn open() -> crate::error::Result<HwCounterHandle> {
        Ok(HwCounterHandle {
            set: perf::HwCounterSet::open()?,
        })
    }

    /// Resets and enables every counter.
    pub fn start(&self) -> crate::error::Result<()> {
        self.set.start()
    }

    /// Disables every counter, reads final values, and derives IPC and
    /// cache-miss-rate in Q16.16.
    pub fn stop(self) -> HwCounters {
        let values = self.set.stop();
        let cycles = values[0];
        let instructions = values[1];
        let cache_refs = values[2];
        let cache_misses = values[3];
        let branch_refs = values[4];
        let branch_misses = values[5];

        let ipc_q16 = if cycles > 0 {
            ((instructions << 16) / cycles) as u32
        } else {
            0
        };
        let cache_miss_rate_q16 = if cache_refs > 0 {
            ((cache_misses << 16) / cache_refs) as u32
        } else {
            0
        };

        HwCounters {
            available: true,
            cycles,
            instructions,
            cache_refs,
            cache_misses,
            branch_refs,
            branch_misses,
            ipc_q16,
            cache_miss_rate_q16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_name_is_nonempty() {
        assert!(!platform_name().is_empty());
    }

    #[test]
    fn check_stable_with_no_frequency_data_is_stable() {
        let stats = EnvStats::default();
        assert!(check_stable(&stats));
    }

    #[test]
    fn check_stable_flags_large_frequency_drop() {
        let start = EnvSnapshot {
            cpu_freq_hz: 3_000_000_000,
            ..Default::default()
        };
        let end = EnvSnapshot {
            cpu_freq_hz: 2_000_000_000,
            ..Default::default()
        };
        let stats = EnvStats::compute(start, end);
        assert!(!check_stable(&stats));
    }

    #[test]
    fn check_stable_tolerates_small_frequency_drop() {
        let start = EnvSnapshot {
            cpu_freq_hz: 3_000_000_000,
            ..Default::default()
        };
        let end = EnvSnapshot {
            cpu_freq_hz: 2_910_000_000,
            ..Default::default()
        };
        let stats = EnvStats::compute(start, end);
        assert!(check_stable(&stats));
    }

    #[test]
    fn check_stable_flags_throttle_events() {
        let start = EnvSnapshot {
            cpu_freq_hz: 1_000,
            throttle_count: 0,
            ..Default::default()
        };
        let end = EnvSnapshot {
            cpu_freq_hz: 1_000,
            throttle_count: 3,
            ..Default::default()
        };
        let stats = EnvStats::compute(start, end);
        assert_eq!(stats.total_throttle_events, 3);
        assert!(!check_stable(&stats));
    }

    #[test]
    fn env_stats_handles_wrapped_throttle_counter() {
        let start = EnvSnapshot {
            throttle_count: 10,
            ..Default::default()
        };
        let end = EnvSnapshot {
            throttle_count: 2,
            ..Default::default()
        };
        let stats = EnvStats::compute(start, end);
        assert_eq!(stats.total_throttle_events, 0);
    }
}
