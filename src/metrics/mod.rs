//! Integer-only latency statistics, percentiles, histograms and outlier
//! detection, ported from `original_source/src/metrics/metrics.c`.
//!
//! No floating point appears anywhere in this module: every ratio is
//! either an integer division or a fixed-point (Q16.16) value, matching
//! the "Integer Statistical Invariant" the original enforces throughout.

use crate::types::FaultFlags;

/// Maximum number of samples a single benchmark run may collect
/// (`CB_MAX_SAMPLES`). [`detect_outliers`] and [`compute_stats`] use this
/// as the ceiling for their caller-owned scratch buffers.
pub const MAX_SAMPLES: usize = 1_000_000;

/// Maximum number of histogram bins (`CB_MAX_HISTOGRAM`).
pub const MAX_HISTOGRAM_BINS: usize = 256;

const SORT_THRESHOLD: usize = 64;
const OUTLIER_THRESH_SCALED: u64 = 35_000;
const MAD_SCALE_FACTOR: u64 = 6_745;
const WCET_SIGMA: u64 = 6;

/// Integer square root via binary search (`CB-MATH-001 §6.3`).
///
/// Uses `mid <= n / mid` rather than `mid * mid <= n` so no intermediate
/// product can overflow `u64`.
pub fn isqrt(n: u64) -> u64 {
    if n == 0 {
        return 0;
    }
    let mut lo: u64 = 1;
    let mut hi: u64 = n;
    while lo < hi {
        let mid = lo + (hi - lo + 1) / 2;
        if mid <= n / mid {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    lo
}

fn insertion_sort(arr: &mut [u64]) {
    for i in 1..arr.len() {
        let key = arr[i];
        let mut j = i;
        while j > 0 && arr[j - 1] > key {
            arr[j] = arr[j - 1];
            j -= 1;
        }
        arr[j] = key;
    }
}

fn heapify(arr: &mut [u64], count: usize, i: usize) {
    let mut largest = i;
    let left = 2 * i + 1;
    let right = 2 * i + 2;

    if left < count && arr[left] > arr[largest] {
        largest = left;
    }
    if right < count && arr[right] > arr[largest] {
        largest = right;
    }
    if largest != i {
        arr.swap(i, largest);
        heapify(arr, count, largest);
    }
}

fn heapsort(arr: &mut [u64]) {
    let count = arr.len();
    for i in (0..count / 2).rev() {
        heapify(arr, count, i);
    }
    for i in (1..count).rev() {
        arr.swap(0, i);
        heapify(arr, i, 0);
    }
}

/// Sorts `arr` in place, deterministically: insertion sort at or below
/// [`SORT_THRESHOLD`] elements, heapsort above. Quicksort is never used —
/// its worst-case behaviour and pivot-dependent comparison count are
/// unacceptable for certification evidence that must reproduce bit-for-bit
/// run to run.
pub fn sort(arr: &mut [u64]) {
    if arr.len() <= 1 {
        return;
    }
    if arr.len() <= SORT_THRESHOLD {
        insertion_sort(arr);
    } else {
        heapsort(arr);
    }
}

/// Computes the `percentile`-th percentile of `sorted` (already sorted
/// ascending) by linear interpolation between the two bracketing ranks
/// (`CB-MATH-001 §6.4`). `percentile` is clamped to `[0, 100]`.
pub fn percentile(sorted: &[u64], percentile: u32) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let percentile = percentile.min(100) as u64;
    if sorted.len() == 1 {
        return sorted[0];
    }

    let count = sorted.len() as u64;
    let rank_scaled = percentile * (count - 1);
    let rank = (rank_scaled / 100) as usize;
    let frac = rank_scaled % 100;

    let lower = sorted[rank];
    let upper = if rank + 1 < sorted.len() {
        sorted[rank + 1]
    } else {
        lower
    };

    if upper >= lower {
        lower + ((upper - lower) * frac) / 100
    } else {
        lower
    }
}

/// Full latency statistics for one sample set (spec.md §3 `LatencyStats`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LatencyStats {
    pub min_ns: u64,
    pub max_ns: u64,
    pub mean_ns: u64,
    pub median_ns: u64,
    pub p95_ns: u64,
    pub p99_ns: u64,
    pub stddev_ns: u64,
    pub variance_ns2: u64,
    pub sample_count: u32,
    pub outlier_count: u32,
    pub wcet_observed_ns: u64,
    pub wcet_bound_ns: u64,
}

/// Throughput derived from a batch run (spec.md §3 `Throughput`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Throughput {
    pub inferences_per_sec: u64,
    pub samples_per_sec: u64,
    pub bytes_per_sec: u64,
    pub batch_size: u32,
}

impl Throughput {
    /// Derives throughput from a total wall time and batch geometry.
    /// `0` in any rate field if `total_ns` is `0` (no faulting: the
    /// caller already owns a non-empty, positive-duration run by the
    /// time it reaches here).
    pub fn compute(total_ns: u64, iterations: u64, batch_size: u32, bytes_per_output: u64) -> Self {
        if total_ns == 0 {
            return Throughput {
                batch_size,
                ..Default::default()
            };
        }
        let inferences_per_sec = iterations.saturating_mul(crate::timer::NS_PER_SEC) / total_ns;
        let samples_per_sec = inferences_per_sec.saturating_mul(batch_size.max(1) as u64);
        let bytes_per_sec = samples_per_sec.saturating_mul(bytes_per_output);
        Throughput {
            inferences_per_sec,
            samples_per_sec,
            bytes_per_sec,
            batch_size,
        }
    }
}

/// One histogram bucket (spec.md §3 `HistogramBin`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HistogramBin {
    pub min_ns: u64,
    pub max_ns: u64,
    pub count: u32,
}

/// A latency histogram over a caller-sized bin array.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Histogram {
    pub range_min_ns: u64,
    pub range_max_ns: u64,
    pub bin_width_ns: u64,
    pub overflow_count: u32,
    pub underflow_count: u32,
    pub bins: Vec<HistogramBin>,
}

impl Histogram {
    /// Initialises `num_bins` equal-width bins spanning `[min_ns, max_ns)`.
    /// The final bin is widened if necessary so its upper edge is exactly
    /// `max_ns`. Fails if `num_bins` is zero, exceeds
    /// [`MAX_HISTOGRAM_BINS`], or the range is empty/inverted.
    pub fn init(num_bins: usize, min_ns: u64, max_ns: u64) -> crate::error::Result<Self> {
        if num_bins == 0 || num_bins > MAX_HISTOGRAM_BINS {
            return Err(crate::error::Error::InvalidConfig("num_bins out of range"));
        }
        if min_ns >= max_ns {
            return Err(crate::error::Error::InvalidConfig(
                "histogram range must be non-empty",
            ));
        }

        let mut bin_width = (max_ns - min_ns) / num_bins as u64;
        if bin_width == 0 {
            bin_width = 1;
        }

        let mut bins = Vec::with_capacity(num_bins);
        let mut current_min = min_ns;
        for _ in 0..num_bins {
            bins.push(HistogramBin {
                min_ns: current_min,
                max_ns: current_min + bin_width,
                count: 0,
            });
            current_min += bin_width;
        }
        bins.last_mut().unwrap().max_ns = max_ns;

        Ok(Histogram {
            range_min_ns: min_ns,
            range_max_ns: max_ns,
            bin_width_ns: bin_width,
            overflow_count: 0,
            underflow_count: 0,
            bins,
        })
    }

    /// Bins every sample in `samples`, resetting all counts first.
    pub fn build(&mut self, samples: &[u64]) {
        self.overflow_count = 0;
        self.underflow_count = 0;
        for bin in &mut self.bins {
            bin.count = 0;
        }

        let num_bins = self.bins.len();
        for &sample in samples {
            if sample < self.range_min_ns {
                self.underflow_count += 1;
            } else if sample >= self.range_max_ns {
                self.overflow_count += 1;
            } else {
                let mut idx = ((sample - self.range_min_ns) / self.bin_width_ns) as usize;
                if idx >= num_bins {
                    idx = num_bins - 1;
                }
                self.bins[idx].count += 1;
            }
        }
    }
}

/// Computes [`LatencyStats`] over `samples`, sorting them in place as a
/// side effect (percentiles require sorted order, and the original does
/// the same in-place sort rather than pay for a second buffer).
///
/// Any per-sample fault observed (sum overflow, WCET-bound overflow) is
/// folded into `faults` via [`FaultFlags::merge`] semantics — bits already
/// set are left untouched.
pub fn compute_stats(samples: &mut [u64], faults: &mut FaultFlags) -> crate::error::Result<LatencyStats> {
    if samples.is_empty() {
        faults.div_zero = true;
        return Err(crate::error::Error::Overflow);
    }

    let count = samples.len() as u64;
    let mut sum: u64 = 0;
    let mut overflow_detected = false;
    let mut min_val = samples[0];
    let mut max_val = samples[0];

    // Welford's algorithm, signed deltas as the original does.
    let mut m: i64 = 0;
    let mut s: i64 = 0;

    for (i, &x) in samples.iter().enumerate() {
        match sum.checked_add(x) {
            Some(v) => sum = v,
            None => {
                overflow_detected = true;
                faults.overflow = true;
            }
        }

        if x < min_val {
            min_val = x;
        }
        if x > max_val {
            max_val = x;
        }

        let delta = x as i64 - m;
        m += delta / (i as i64 + 1);
        let delta2 = x as i64 - m;
        s += delta * delta2;
    }

    let mean = if !overflow_detected { sum / count } else { m as u64 };

    let (variance, stddev) = if samples.len() > 1 {
        let variance = (s / (samples.len() as i64 - 1)) as u64;
        (variance, isqrt(variance))
    } else {
        (0, 0)
    };

    sort(samples);

    let median_ns = percentile(samples, 50);
    let p95_ns = percentile(samples, 95);
    let p99_ns = percentile(samples, 99);

    let wcet_observed_ns = max_val;
    let wcet_bound_ns = if stddev <= (u64::MAX - max_val) / WCET_SIGMA {
        max_val + WCET_SIGMA * stddev
    } else {
        faults.overflow = true;
        max_val
    };

    let mut outlier_count = 0u32;
    if stddev > 0 {
        let outlier_thresh = mean + 3 * stddev;
        outlier_count = samples.iter().filter(|&&x| x > outlier_thresh).count() as u32;
    }

    let stats = LatencyStats {
        min_ns: min_val,
        max_ns: max_val,
        mean_ns: mean,
        median_ns,
        p95_ns,
        p99_ns,
        stddev_ns: stddev,
        variance_ns2: variance,
        sample_count: samples.len() as u32,
        outlier_count,
        wcet_observed_ns,
        wcet_bound_ns,
    };

    if overflow_detected {
        Err(crate::error::Error::Overflow)
    } else {
        Ok(stats)
    }
}

/// Flags samples whose modified Z-score (scaled ×10000, MAD-based) exceeds
/// 3.5, matching `CB-MATH-001 §6.5`. `samples.len()` must not exceed
/// [`MAX_SAMPLES`] — this mirrors the original's static scratch-buffer
/// ceiling (see the Open Question resolution in `DESIGN.md`).
///
/// Returns a `Vec<bool>` parallel to `samples`.
pub fn detect_outliers(samples: &[u64]) -> crate::error::Result<Vec<bool>> {
    if samples.is_empty() {
        return Ok(Vec::new());
    }
    if samples.len() > MAX_SAMPLES {
        return Err(crate::error::Error::OutOfMemory {
            requested: samples.len(),
            ceiling: MAX_SAMPLES,
        });
    }

    let mut sorted_copy = samples.to_vec();
    sort(&mut sorted_copy);
    let median = percentile(&sorted_copy, 50);

    let mut deviations: Vec<u64> = samples
        .iter()
        .map(|&x| if x >= median { x - median } else { median - x })
        .collect();
    sort(&mut deviations);
    let mad = percentile(&deviations, 50);

    if mad == 0 {
        return Ok(vec![false; samples.len()]);
    }

    let flags = samples
        .iter()
        .map(|&x| {
            let deviation = if x >= median { x - median } else { median - x };
            let modified_z_scaled = (MAD_SCALE_FACTOR * deviation) / mad;
            modified_z_scaled > OUTLIER_THRESH_SCALED
        })
        .collect();

    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isqrt_exact_squares() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(1), 1);
        assert_eq!(isqrt(4), 2);
        assert_eq!(isqrt(144), 12);
        assert_eq!(isqrt(u64::MAX), 4_294_967_295);
    }

    #[test]
    fn isqrt_rounds_down() {
        assert_eq!(isqrt(3), 1);
        assert_eq!(isqrt(8), 2);
        assert_eq!(isqrt(24), 4);
    }

    #[test]
    fn sort_small_uses_insertion_path() {
        let mut v: Vec<u64> = vec![5, 3, 1, 4, 2];
        sort(&mut v);
        assert_eq!(v, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn sort_large_uses_heap_path() {
        let mut v: Vec<u64> = (0..200).rev().collect();
        sort(&mut v);
        assert!(v.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn percentile_single_sample() {
        assert_eq!(percentile(&[42], 50), 42);
        assert_eq!(percentile(&[42], 99), 42);
    }

    #[test]
    fn percentile_p100_is_max() {
        let sorted = vec![1, 2, 3, 4, 5];
        assert_eq!(percentile(&sorted, 100), 5);
        assert_eq!(percentile(&sorted, 0), 1);
    }

    #[test]
    fn percentile_interpolates() {
        let sorted: Vec<u64> = (1..=101).collect();
        assert_eq!(percentile(&sorted, 50), 51);
    }

    #[test]
    fn compute_stats_basic() {
        let mut samples = vec![10u64, 20, 30, 40, 50];
        let mut faults = FaultFlags::default();
        let stats = compute_stats(&mut samples, &mut faults).unwrap();
        assert_eq!(stats.min_ns, 10);
        assert_eq!(stats.max_ns, 50);
        assert_eq!(stats.mean_ns, 30);
        assert_eq!(stats.sample_count, 5);
        assert!(!faults.has_hard_fault());
    }

    #[test]
    fn compute_stats_rejects_empty() {
        let mut samples: Vec<u64> = Vec::new();
        let mut faults = FaultFlags::default();
        assert!(compute_stats(&mut samples, &mut faults).is_err());
        assert!(faults.div_zero);
    }

    #[test]
    fn histogram_conserves_total_count() {
        let samples: Vec<u64> = vec![1, 5, 10, 15, 20, 25, 30, 99];
        let mut hist = Histogram::init(4, 0, 100).unwrap();
        hist.build(&samples);
        let total: u32 = hist.bins.iter().map(|b| b.count).sum::<u32>()
            + hist.overflow_count
            + hist.underflow_count;
        assert_eq!(total as usize, samples.len());
    }

    #[test]
    fn histogram_rejects_empty_range() {
        assert!(Histogram::init(4, 100, 100).is_err());
        assert!(Histogram::init(0, 0, 100).is_err());
    }

    #[test]
    fn outlier_detection_flags_extreme_value() {
        let mut samples = vec![100u64; 20];
        samples[0] = 100_000;
        let flags = detect_outliers(&samples).unwrap();
        assert!(flags[0]);
        assert!(flags[1..].iter().all(|&f| !f));
    }

    #[test]
    fn outlier_detection_zero_mad_flags_nothing() {
        let samples = vec![7u64; 10];
        let flags = detect_outliers(&samples).unwrap();
        assert!(flags.iter().all(|&f| !f));
    }

    #[test]
    fn outlier_detection_rejects_oversized_input() {
        let samples = vec![0u64; MAX_SAMPLES + 1];
        let err = detect_outliers(&samples).unwrap_err();
        match err {
            crate::error::Error::OutOfMemory { requested, ceiling } => {
                assert_eq!(requested, MAX_SAMPLES + 1);
                assert_eq!(ceiling, MAX_SAMPLES);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    proptest::proptest! {
        /// `isqrt(n)` is the floor of the true square root for every `n`.
        #[test]
        fn isqrt_is_floor_of_true_root(n in 0u64..=u64::MAX) {
            let r = isqrt(n);
            proptest::prop_assert!(r.checked_mul(r).map_or(false, |sq| sq <= n));
            proptest::prop_assert!((r + 1).checked_mul(r + 1).map_or(true, |sq| sq > n));
        }

        /// `sort` always produces a permutation of the input in
        /// non-decreasing order, whichever of the two code paths runs.
        #[test]
        fn sort_produces_sorted_permutation(mut v in proptest::collection::vec(0u64..10_000, 0..150)) {
            let mut expected = v.clone();
            expected.sort_unstable();
            sort(&mut v);
            proptest::prop_assert_eq!(v, expected);
        }
    }
}
