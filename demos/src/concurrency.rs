//! Contended-memory demonstrations.
//!
//! Two asymmetric groups pit a reading role against a writing role over a
//! pair of counters: one pair shares a cache line, the other pads each
//! counter to its own line. The padded group should read dramatically
//! faster under the same write load.
//!
//! A second pair of benchmarks compares snapshot publication strategies:
//! cloning an `Arc` out of a mutex versus reading the value while holding
//! the lock.

use oxmark::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Both counters on one cache line.
pub struct HotPair {
    pub read_side: AtomicU64,
    pub write_side: AtomicU64,
}

impl State for HotPair {}

fn build_hot_pair(_: &FixtureCtx) -> Box<dyn SharedState> {
    Box::new(HotPair {
        read_side: AtomicU64::new(1),
        write_side: AtomicU64::new(1),
    })
}

oxmark::fixture! {
    FixtureDef::group_scoped("hot_pair", build_hot_pair)
}

#[repr(align(64))]
pub struct PaddedCell(pub AtomicU64);

/// One cache line per counter.
pub struct PaddedPair {
    pub read_side: PaddedCell,
    pub write_side: PaddedCell,
}

impl State for PaddedPair {}

fn build_padded_pair(_: &FixtureCtx) -> Box<dyn SharedState> {
    Box::new(PaddedPair {
        read_side: PaddedCell(AtomicU64::new(1)),
        write_side: PaddedCell(AtomicU64::new(1)),
    })
}

oxmark::fixture! {
    FixtureDef::group_scoped("padded_pair", build_padded_pair)
}

fn hot_read(ctx: &mut BodyCtx<'_>) {
    let pair = ctx.shared::<HotPair>("hot_pair");
    ctx.sink().put_u64(pair.read_side.load(Ordering::Relaxed));
}

fn hot_write(ctx: &mut BodyCtx<'_>) {
    let pair = ctx.shared::<HotPair>("hot_pair");
    ctx.sink()
        .put_u64(pair.write_side.fetch_add(1, Ordering::Relaxed));
}

fn padded_read(ctx: &mut BodyCtx<'_>) {
    let pair = ctx.shared::<PaddedPair>("padded_pair");
    ctx.sink().put_u64(pair.read_side.0.load(Ordering::Relaxed));
}

fn padded_write(ctx: &mut BodyCtx<'_>) {
    let pair = ctx.shared::<PaddedPair>("padded_pair");
    ctx.sink()
        .put_u64(pair.write_side.0.fetch_add(1, Ordering::Relaxed));
}

oxmark::benchmark! {
    BenchmarkDef::new("hot_read", hot_read)
        .group("false_sharing", "read")
        .ratio(3)
        .threads(4)
        .fixtures(&["hot_pair"])
        .mode(Mode::Throughput)
        .unit(TimeUnit::Micros)
}

oxmark::benchmark! {
    BenchmarkDef::new("hot_write", hot_write)
        .group("false_sharing", "write")
        .ratio(1)
        .threads(4)
        .fixtures(&["hot_pair"])
        .mode(Mode::Throughput)
        .unit(TimeUnit::Micros)
}

oxmark::benchmark! {
    BenchmarkDef::new("padded_read", padded_read)
        .group("padded_sharing", "read")
        .ratio(3)
        .threads(4)
        .fixtures(&["padded_pair"])
        .mode(Mode::Throughput)
        .unit(TimeUnit::Micros)
}

oxmark::benchmark! {
    BenchmarkDef::new("padded_write", padded_write)
        .group("padded_sharing", "write")
        .ratio(1)
        .threads(4)
        .fixtures(&["padded_pair"])
        .mode(Mode::Throughput)
        .unit(TimeUnit::Micros)
}

#[derive(Debug)]
pub struct Snapshot {
    pub version: u64,
    pub payload: [u64; 8],
}

/// Mutex-guarded published snapshot, replaced occasionally by writers.
pub struct Published {
    pub slot: Mutex<Arc<Snapshot>>,
}

impl State for Published {}

fn build_published(_: &FixtureCtx) -> Box<dyn SharedState> {
    Box::new(Published {
        slot: Mutex::new(Arc::new(Snapshot {
            version: 1,
            payload: [7; 8],
        })),
    })
}

oxmark::fixture! {
    FixtureDef::benchmark_scoped("published", build_published)
}

fn snapshot_clone(ctx: &mut BodyCtx<'_>) {
    let published = ctx.shared::<Published>("published");
    let snapshot = Arc::clone(&published.slot.lock().expect("snapshot lock"));
    // Lock released; the read happens on the private clone.
    let sum: u64 = snapshot.payload.iter().sum();
    ctx.sink().put_u64(snapshot.version.wrapping_add(sum));
}

fn snapshot_locked_read(ctx: &mut BodyCtx<'_>) {
    let published = ctx.shared::<Published>("published");
    let guard = published.slot.lock().expect("snapshot lock");
    let sum: u64 = guard.payload.iter().sum();
    ctx.sink().put_u64(guard.version.wrapping_add(sum));
}

oxmark::benchmark! {
    BenchmarkDef::new("snapshot_clone", snapshot_clone)
        .fixtures(&["published"])
        .threads(4)
        .mode(Mode::Throughput)
}

oxmark::benchmark! {
    BenchmarkDef::new("snapshot_locked_read", snapshot_locked_read)
        .fixtures(&["published"])
        .threads(4)
        .mode(Mode::Throughput)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_counters_sit_on_distinct_cache_lines() {
        assert_eq!(std::mem::align_of::<PaddedCell>(), 64);
        let pair = PaddedPair {
            read_side: PaddedCell(AtomicU64::new(0)),
            write_side: PaddedCell(AtomicU64::new(0)),
        };
        let a = &pair.read_side as *const PaddedCell as usize;
        let b = &pair.write_side as *const PaddedCell as usize;
        assert!(a.abs_diff(b) >= 64);
    }

    #[test]
    fn hot_counters_share_a_cache_line() {
        let pair = HotPair {
            read_side: AtomicU64::new(0),
            write_side: AtomicU64::new(0),
        };
        let a = &pair.read_side as *const AtomicU64 as usize;
        let b = &pair.write_side as *const AtomicU64 as usize;
        assert!(a.abs_diff(b) < 64);
    }
}
