//! The fallback kludge: a last-resort entropy source for platforms or
//! sandboxes where every proper source above it failed or is unavailable.
//!
//! Grounded on `original_source/src/otterylite_entropy.h`'s
//! `ottery_getentropy_fallback_kludge`, which gathers pid, hostid, clock
//! readings, a slice of `/proc`, and memory-layout timing into one buffer
//! and compresses it with BLAKE2b. None of these individually carry much
//! entropy; the source is flagged `WEAK | AVOID` and the dispatcher in
//! `entropy::collect` only reaches it when nothing better answered.

use super::{CHUNK, SourceOutcome};
use crate::blake2b;
use std::io::Read;
use std::time::{SystemTime, UNIX_EPOCH};

const PROC_PROBE_BUDGET: usize = 16 * 1024;
const PROC_PROBES: &[&str] = &["/proc/self/stat", "/proc/self/maps", "/proc/stat"];

pub fn collect(out: &mut [u8; CHUNK]) -> SourceOutcome {
    let mut pool = Vec::with_capacity(512);

    pool.extend_from_slice(&process_id().to_le_bytes());

    if let Ok(now) = SystemTime::now().duration_since(UNIX_EPOCH) {
        pool.extend_from_slice(&now.as_nanos().to_le_bytes());
    }

    collect_clocks(&mut pool);

    for path in PROC_PROBES {
        if let Ok(mut f) = std::fs::File::open(path) {
            let mut buf = vec![0u8; PROC_PROBE_BUDGET];
            if let Ok(n) = f.read(&mut buf) {
                pool.extend_from_slice(&buf[..n]);
            }
        }
    }

    probe_memory_layout(&mut pool);

    if pool.is_empty() {
        return SourceOutcome::Unavailable;
    }

    let digest = blake2b::digest(&pool);
    out.copy_from_slice(&digest[..CHUNK]);
    SourceOutcome::Full(*out)
}

#[cfg(unix)]
fn process_id() -> i32 {
    // SAFETY: getpid has no preconditions.
    unsafe { libc::getpid() }
}

#[cfg(windows)]
fn process_id() -> u32 {
    // SAFETY: GetCurrentProcessId has no preconditions.
    unsafe { winapi::um::processthreadsapi::GetCurrentProcessId() }
}

#[cfg(unix)]
fn collect_clocks(pool: &mut Vec<u8>) {
    for clock_id in [libc::CLOCK_MONOTONIC, libc::CLOCK_REALTIME] {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: ts is a valid out-param for clock_gettime.
        if unsafe { libc::clock_gettime(clock_id, &mut ts) } == 0 {
            pool.extend_from_slice(&ts.tv_sec.to_le_bytes());
            pool.extend_from_slice(&ts.tv_nsec.to_le_bytes());
        }
    }
}

#[cfg(windows)]
fn collect_clocks(pool: &mut Vec<u8>) {
    // `Instant` is backed by `QueryPerformanceCounter` on this platform;
    // no need to call into winapi directly for a monotonic reading.
    let marker = std::time::Instant::now();
    pool.extend_from_slice(&(marker.elapsed().as_nanos()).to_le_bytes());
}

/// Touches a handful of freshly-allocated pages of prime-multiple sizes and
/// records their addresses and access timing. Address layout and scheduling
/// jitter under ASLR contribute a little noise; nowhere near as much as a
/// real source, hence this source's `WEAK` flag.
fn probe_memory_layout(pool: &mut Vec<u8>) {
    for factor in [4099usize, 8191, 16411] {
        let block = vec![0u8; factor];
        let addr = block.as_ptr() as usize;
        pool.extend_from_slice(&addr.to_le_bytes());

        let start = std::time::Instant::now();
        let sum: u64 = block.iter().map(|&b| b as u64).sum();
        let elapsed = start.elapsed().as_nanos();

        pool.extend_from_slice(&sum.to_le_bytes());
        pool.extend_from_slice(&elapsed.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_produces_a_full_chunk() {
        let mut out = [0u8; CHUNK];
        match collect(&mut out) {
            SourceOutcome::Full(bytes) => assert_ne!(bytes, [0u8; CHUNK]),
            other => panic!("fallback kludge should never fail outright: {other:?}"),
        }
    }

    #[test]
    fn successive_calls_differ() {
        let mut a = [0u8; CHUNK];
        let mut b = [0u8; CHUNK];
        collect(&mut a);
        collect(&mut b);
        assert_ne!(a, b);
    }
}
