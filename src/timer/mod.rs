//! Monotonic timing backends, calibration and cycle-to-nanosecond
//! conversion, ported from `original_source/src/timer/timer.c`.
//!
//! Unlike the original's single set of process globals, state here is
//! owned by a [`Timer`] value — several timers (e.g. one per benchmark
//! run in a test harness) can coexist without interfering.

use crate::types::FaultFlags;

/// Nanoseconds per second.
pub const NS_PER_SEC: u64 = 1_000_000_000;

const CALIBRATION_ITERATIONS: u32 = 1_000;

/// Selects which clock backend a [`Timer`] should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimerSource {
    /// Pick the best available backend for the current platform.
    #[default]
    Auto,
    /// `clock_gettime(CLOCK_MONOTONIC)`.
    Posix,
    /// x86_64 invariant TSC. Falls back to [`TimerSource::Posix`] until a
    /// CPUID invariant-TSC check is implemented.
    Rdtsc,
    /// ARM64 `CNTVCT_EL0`. Falls back to [`TimerSource::Posix`].
    Cntvct,
    /// RISC-V `cycle` CSR. Falls back to [`TimerSource::Posix`].
    RiscVCycle,
}

impl TimerSource {
    fn name(self) -> &'static str {
        match self {
            TimerSource::Auto => "auto",
            TimerSource::Posix => "posix (CLOCK_MONOTONIC)",
            TimerSource::Rdtsc => "x86_64 (RDTSC)",
            TimerSource::Cntvct => "arm64 (CNTVCT_EL0)",
            TimerSource::RiscVCycle => "risc-v (cycle CSR)",
        }
    }

    fn available(self) -> bool {
        match self {
            // No invariant-TSC / CNTVCT / cycle-CSR backend is wired up
            // yet; every cycle-counter source currently reports
            // unavailable so selection always falls back to POSIX.
            TimerSource::Rdtsc | TimerSource::Cntvct | TimerSource::RiscVCycle => false,
            TimerSource::Auto | TimerSource::Posix => true,
        }
    }
}

fn posix_now_ns(faults: &mut FaultFlags) -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        faults.timer_error = true;
        return 0;
    }
    (ts.tv_sec as u64).wrapping_mul(NS_PER_SEC) + ts.tv_nsec as u64
}

fn posix_resolution_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let rc = unsafe { libc::clock_getres(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return 1;
    }
    let res = (ts.tv_sec as u64).wrapping_mul(NS_PER_SEC) + ts.tv_nsec as u64;
    if res > 0 {
        res
    } else {
        1
    }
}

fn calibrate_overhead(faults: &mut FaultFlags) -> u64 {
    let mut min_overhead = u64::MAX;
    for _ in 0..CALIBRATION_ITERATIONS {
        let start = posix_now_ns(faults);
        let end = posix_now_ns(faults);
        if start == 0 || end == 0 {
            continue;
        }
        let delta = end - start;
        if delta < min_overhead {
            min_overhead = delta;
        }
    }
    if min_overhead == u64::MAX {
        0
    } else {
        min_overhead
    }
}

/// A calibrated monotonic timer (spec.md §2 `Timer`).
#[derive(Debug, Clone)]
pub struct Timer {
    source: TimerSource,
    resolution_ns: u64,
    calibration_ns: u64,
    freq_hz: u64,
    faults: FaultFlags,
}

impl Timer {
    /// Selects a backend and calibrates overhead. `requested` names the
    /// backend the caller wants; [`TimerSource::Auto`] picks the highest
    /// priority backend available on this platform (a cycle counter, else
    /// POSIX), and an unavailable explicit request silently falls back to
    /// POSIX, same as the original.
    pub fn init(requested: TimerSource) -> Timer {
        let selected = match requested {
            TimerSource::Auto => {
                if TimerSource::Rdtsc.available() {
                    TimerSource::Rdtsc
                } else if TimerSource::Cntvct.available() {
                    TimerSource::Cntvct
                } else if TimerSource::RiscVCycle.available() {
                    TimerSource::RiscVCycle
                } else {
                    TimerSource::Posix
                }
            }
            other if other.available() => other,
            _ => TimerSource::Posix,
        };

        let mut faults = FaultFlags::default();

        let probe = posix_now_ns(&mut faults);
        if probe == 0 {
            faults.timer_error = true;
        }

        let resolution_ns = posix_resolution_ns();
        let calibration_ns = calibrate_overhead(&mut faults);

        Timer {
            source: selected,
            resolution_ns,
            calibration_ns,
            freq_hz: 0,
            faults,
        }
    }

    /// Reads the current monotonic timestamp in nanoseconds. Every backend
    /// currently resolves to the POSIX clock; `0` on failure, with
    /// `timer_error` set in [`Timer::faults`].
    pub fn now_ns(&mut self) -> u64 {
        match self.source {
            TimerSource::Posix
            | TimerSource::Rdtsc
            | TimerSource::Cntvct
            | TimerSource::RiscVCycle => posix_now_ns(&mut self.faults),
            TimerSource::Auto => {
                self.faults.timer_error = true;
                0
            }
        }
    }

    pub fn resolution_ns(&self) -> u64 {
        self.resolution_ns
    }

    pub fn calibration_ns(&self) -> u64 {
        self.calibration_ns
    }

    pub fn source(&self) -> TimerSource {
        self.source
    }

    pub fn name(&self) -> &'static str {
        self.source.name()
    }

    pub fn faults(&self) -> FaultFlags {
        self.faults
    }

    /// Converts a raw cycle count to nanoseconds. On the POSIX backend
    /// (`freq_hz == 0`) cycles already are nanoseconds. Otherwise splits
    /// the conversion into whole-second and remainder terms to avoid
    /// overflowing the multiply, saturating to `u64::MAX` (and raising
    /// `overflow`) if it still doesn't fit.
    pub fn cycles_to_ns(&mut self, cycles: u64) -> u64 {
        if self.freq_hz == 0 {
            return cycles;
        }

        let whole_secs = cycles / self.freq_hz;
        let remainder = cycles % self.freq_hz;

        if whole_secs > u64::MAX / NS_PER_SEC {
            self.faults.overflow = true;
            return u64::MAX;
        }
        let ns_from_whole = whole_secs * NS_PER_SEC;
        let ns_from_remainder = (remainder * NS_PER_SEC) / self.freq_hz;

        match ns_from_whole.checked_add(ns_from_remainder) {
            Some(v) => v,
            None => {
                self.faults.overflow = true;
                u64::MAX
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_selects_posix_when_no_cycle_counter() {
        let timer = Timer::init(TimerSource::Auto);
        assert_eq!(timer.source(), TimerSource::Posix);
        assert_eq!(timer.name(), "posix (CLOCK_MONOTONIC)");
    }

    #[test]
    fn explicit_rdtsc_request_falls_back_to_posix() {
        let timer = Timer::init(TimerSource::Rdtsc);
        assert_eq!(timer.source(), TimerSource::Posix);
    }

    #[test]
    fn now_ns_is_monotonic_and_nonzero() {
        let mut timer = Timer::init(TimerSource::Auto);
        let a = timer.now_ns();
        let b = timer.now_ns();
        assert!(a > 0);
        assert!(b >= a);
        assert!(!timer.faults().timer_error);
    }

    #[test]
    fn resolution_and_calibration_are_populated() {
        let timer = Timer::init(TimerSource::Auto);
        assert!(timer.resolution_ns() > 0);
        // Calibration can legitimately be 0 on an extremely fast clock,
        // but must never be u64::MAX (the "all reads failed" sentinel).
        assert_ne!(timer.calibration_ns(), u64::MAX);
    }

    #[test]
    fn cycles_to_ns_identity_on_posix_backend() {
        let mut timer = Timer::init(TimerSource::Posix);
        assert_eq!(timer.cycles_to_ns(12_345), 12_345);
    }

    #[test]
    fn cycles_to_ns_converts_with_frequency() {
        let mut timer = Timer::init(TimerSource::Posix);
        timer.freq_hz = 1_000_000_000;
        assert_eq!(timer.cycles_to_ns(5_000_000_000), 5 * NS_PER_SEC);
    }

    #[test]
    fn cycles_to_ns_saturates_on_overflow() {
        let mut timer = Timer::init(TimerSource::Posix);
        timer.freq_hz = 1;
        let result = timer.cycles_to_ns(u64::MAX);
        assert_eq!(result, u64::MAX);
        assert!(timer.faults().overflow);
    }
}
