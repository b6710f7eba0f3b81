//! Monotonic timebase.
//!
//! All measurement timestamps come from [`now_ns`]: nanoseconds since an
//! arbitrary origin (first use in this process), backed by
//! `std::time::Instant`. The value never goes backwards and is immune to
//! wall-clock adjustment.

use std::sync::OnceLock;
use std::time::Instant;

/// Warn when a mean score falls below this multiple of the clock granularity.
pub const GRANULARITY_WARN_FACTOR: u64 = 20;

static ORIGIN: OnceLock<Instant> = OnceLock::new();
static GRANULARITY: OnceLock<u64> = OnceLock::new();
static OVERHEAD: OnceLock<u64> = OnceLock::new();

/// Nanoseconds since the process-local monotonic origin.
#[inline]
pub fn now_ns() -> u64 {
    ORIGIN.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// Smallest observable tick of the clock, estimated once per process.
///
/// Samples successive readings until they differ and takes the median of the
/// observed deltas. At least 1 ns.
pub fn granularity_ns() -> u64 {
    *GRANULARITY.get_or_init(|| {
        let mut deltas = Vec::with_capacity(64);
        for _ in 0..64 {
            let a = now_ns();
            let mut b = now_ns();
            while b == a {
                b = now_ns();
            }
            deltas.push(b - a);
        }
        deltas.sort_unstable();
        deltas[deltas.len() / 2].max(1)
    })
}

/// Mean cost of one `now_ns` call, estimated once per process.
///
/// The sample-time driver uses this to pick a sampling stride that keeps
/// timing overhead under 1% of the measured work.
pub fn timer_overhead_ns() -> u64 {
    *OVERHEAD.get_or_init(|| {
        const CALLS: u64 = 10_000;
        let start = now_ns();
        for _ in 0..CALLS {
            std::hint::black_box(now_ns());
        }
        ((now_ns() - start) / CALLS).max(1)
    })
}
