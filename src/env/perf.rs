//! `perf_event_open`-based hardware counters.
//!
//! Grounded directly on `ffi/syscall.rs`'s `unsafe { libc::syscall(...) };
//! check for -1; map to last_os_error` idiom — this module is built the
//! same way the teacher's own counters are, just against a fixed set of
//! six hardware events instead of a caller-chosen one.

use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd};

use crate::error::{Error, Result};

// perf_event_attr.type values (linux/perf_event.h enum perf_type_id).
const PERF_TYPE_HARDWARE: u32 = 0;

// perf_event_attr.config values when type == PERF_TYPE_HARDWARE
// (enum perf_hw_id). Stable uapi values, never renumbered.
const PERF_COUNT_HW_CPU_CYCLES: u64 = 0;
const PERF_COUNT_HW_INSTRUCTIONS: u64 = 1;
const PERF_COUNT_HW_CACHE_REFERENCES: u64 = 2;
const PERF_COUNT_HW_CACHE_MISSES: u64 = 3;
const PERF_COUNT_HW_BRANCH_INSTRUCTIONS: u64 = 4;
const PERF_COUNT_HW_BRANCH_MISSES: u64 = 5;

const NUM_COUNTERS: usize = 6;
const COUNTER_CONFIGS: [u64; NUM_COUNTERS] = [
    PERF_COUNT_HW_CPU_CYCLES,
    PERF_COUNT_HW_INSTRUCTIONS,
    PERF_COUNT_HW_CACHE_REFERENCES,
    PERF_COUNT_HW_CACHE_MISSES,
    PERF_COUNT_HW_BRANCH_INSTRUCTIONS,
    PERF_COUNT_HW_BRANCH_MISSES,
];

// disabled | exclude_kernel | exclude_hv, packed the way the kernel's
// bitfield lays them out on a little-endian target (bit 0, bit 5, bit 6).
const ATTR_FLAGS: u64 = (1 << 0) | (1 << 5) | (1 << 6);

// _IO('$', nr) ioctl request numbers from linux/perf_event.h.
const PERF_EVENT_IOC_ENABLE: u64 = 0x2400;
const PERF_EVENT_IOC_DISABLE: u64 = 0x2401;
const PERF_EVENT_IOC_RESET: u64 = 0x2403;

/// Binary layout of `struct perf_event_attr` up to and including the
/// fields this module actually sets. Declaring the struct this large (the
/// real kernel struct runs longer, with branch/bp/aux fields this crate
/// never touches) lets the kernel zero-extend everything past `size`
/// itself rather than this module tracking every reserved field by hand.
#[repr(C)]
#[derive(Clone, Copy)]
struct RawAttr {
    type_: u32,
    size: u32,
    config: u64,
    sample_period_or_freq: u64,
    sample_type: u64,
    read_format: u64,
    flags: u64,
}

fn perf_event_open(attr: &RawAttr, pid: i32, cpu: i32, group_fd: i32, flags: u64) -> io::Result<File> {
    let fd = unsafe {
        libc::syscall(
            libc::SYS_perf_event_open,
            attr as *const RawAttr,
            pid,
            cpu,
            group_fd,
            flags,
        )
    };
    if fd != -1 {
        Ok(unsafe { File::from_raw_fd(fd as _) })
    } else {
        Err(io::Error::last_os_error())
    }
}

fn ioctl_arg(file: &File, op: u64, arg: u64) -> io::Result<i32> {
    let result = unsafe { libc::ioctl(file.as_raw_fd(), op as _, arg) };
    if result != -1 {
        Ok(result)
    } else {
        Err(io::Error::last_os_error())
    }
}

fn read_u64(file: &File) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    let bytes = unsafe { libc::read(file.as_raw_fd(), buf.as_mut_ptr() as *mut _, 8) };
    if bytes == 8 {
        Ok(u64::from_ne_bytes(buf))
    } else if bytes != -1 {
        Ok(0)
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Six open but disabled perf-event file descriptors, one per hardware
/// event this crate tracks.
pub struct HwCounterSet {
    files: [File; NUM_COUNTERS],
}

impl HwCounterSet {
    /// Opens all six counters. Fails (and closes whatever was already
    /// opened) if any single counter is unavailable — partial hardware
    /// counter coverage is strictly worse than reporting none at all.
    pub fn open() -> Result<HwCounterSet> {
        let mut files: Vec<File> = Vec::with_capacity(NUM_COUNTERS);
        for &config in &COUNTER_CONFIGS {
            let attr = RawAttr {
                type_: PERF_TYPE_HARDWARE,
                size: std::mem::size_of::<RawAttr>() as u32,
                config,
                sample_period_or_freq: 0,
                sample_type: 0,
                read_format: 0,
                flags: ATTR_FLAGS,
            };
            match perf_event_open(&attr, 0, -1, -1, 0) {
                Ok(f) => files.push(f),
                Err(_) => return Err(Error::HwCounters),
            }
        }
        let files: [File; NUM_COUNTERS] = files
            .try_into()
            .unwrap_or_else(|_| unreachable!("exactly NUM_COUNTERS pushed above"));
        Ok(HwCounterSet { files })
    }

    /// Resets and enables every counter.
    pub fn start(&self) -> Result<()> {
        for file in &self.files {
            ioctl_arg(file, PERF_EVENT_IOC_RESET, 0).map_err(|_| Error::HwCounters)?;
            ioctl_arg(file, PERF_EVENT_IOC_ENABLE, 0).map_err(|_| Error::HwCounters)?;
        }
        Ok(())
    }

    /// Disables every counter and reads its final value. A failed read on
    /// any single counter degrades that counter's value to `0` rather than
    /// failing the whole set — the original's behaviour exactly.
    pub fn stop(self) -> [u64; NUM_COUNTERS] {
        let mut values = [0u64; NUM_COUNTERS];
        for (i, file) in self.files.iter().enumerate() {
            let _ = ioctl_arg(file, PERF_EVENT_IOC_DISABLE, 0);
            values[i] = read_u64(file).unwrap_or(0);
        }
        values
    }
}
