//! End-to-end harness tests: macro registration through trial execution,
//! in-process (no fork children).
//!
//! Registrations are binary-global, so every name here carries an `hx_`
//! prefix and no test asserts an exact catalog size.

use oxmark::prelude::*;
use oxmark::{
    run_trial, Catalog, ExecutionUnit, IterationFrame, StateRegistry, TrialError, TrialSettings,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

fn fast_settings(warmup: u32, measurement: u32) -> TrialSettings {
    TrialSettings {
        warmup_iterations: warmup,
        warmup_time_ns: 5_000_000,
        measurement_iterations: measurement,
        measurement_time_ns: 5_000_000,
        threads: 0,
        mode: None,
        seed: 42,
    }
}

fn run_unit(
    unit: &ExecutionUnit,
    settings: &TrialSettings,
) -> (
    Result<oxmark::TrialOutcome, TrialError>,
    Vec<IterationFrame>,
) {
    let mut states = StateRegistry::from_inventory(settings.seed).unwrap();
    let cancel = AtomicBool::new(false);
    let mut frames = Vec::new();
    let result = run_trial(unit, &mut states, settings, &cancel, &mut |frame| {
        frames.push(frame.clone());
        Ok(())
    });
    (result, frames)
}

fn resolve(name: &str) -> ExecutionUnit {
    Catalog::from_inventory()
        .resolve_unit(name)
        .unwrap_or_else(|| panic!("unit `{name}` not registered"))
}

// -- registered suite ------------------------------------------------------

fn hx_checksum(ctx: &mut BodyCtx<'_>) {
    let mut acc = 0u64;
    for i in 0..256u64 {
        acc = acc.rotate_left(7) ^ i;
    }
    ctx.sink().put_u64(acc);
}

oxmark::benchmark! {
    BenchmarkDef::new("hx_checksum", hx_checksum)
}

static HX_TAPE_BUILDS: AtomicU32 = AtomicU32::new(0);

struct HxTape {
    position: u64,
}

impl State for HxTape {
    fn setup(&mut self) -> Result<(), String> {
        self.position = 1;
        Ok(())
    }
}

fn build_hx_tape(_: &FixtureCtx) -> Box<dyn State> {
    HX_TAPE_BUILDS.fetch_add(1, Ordering::SeqCst);
    Box::new(HxTape { position: 0 })
}

oxmark::fixture! {
    FixtureDef::thread_scoped("hx_tape", build_hx_tape)
}

fn hx_advance(ctx: &mut BodyCtx<'_>) {
    let tape: &mut HxTape = ctx.local("hx_tape");
    tape.position = tape.position.wrapping_mul(6364136223846793005);
    let position = tape.position;
    ctx.sink().put_u64(position);
}

oxmark::benchmark! {
    BenchmarkDef::new("hx_advance", hx_advance)
        .fixtures(&["hx_tape"])
        .threads(2)
}

fn hx_duo_read(ctx: &mut BodyCtx<'_>) {
    ctx.sink().put_u64(ctx.worker_index() as u64);
}

fn hx_duo_write(ctx: &mut BodyCtx<'_>) {
    ctx.sink().put_u64(u64::MAX - ctx.worker_index() as u64);
}

oxmark::benchmark! {
    BenchmarkDef::new("hx_duo_read", hx_duo_read)
        .group("hx_duo", "read")
        .threads(4)
        .ratio(1)
}

oxmark::benchmark! {
    BenchmarkDef::new("hx_duo_write", hx_duo_write)
        .group("hx_duo", "write")
        .threads(4)
        .ratio(1)
}

fn hx_panics(_: &mut BodyCtx<'_>) {
    panic!("deliberate harness test failure");
}

oxmark::benchmark! {
    BenchmarkDef::new("hx_panics", hx_panics)
}

// -- tests -----------------------------------------------------------------

#[test]
fn registration_is_visible_in_the_catalog() {
    let catalog = Catalog::from_inventory();
    let matched = catalog.find(&["hx_".to_string()]);
    assert!(matched.len() >= 5);
    assert!(matched.iter().any(|d| d.id == "hx_checksum"));

    // Selecting one member schedules the whole group.
    let unit = resolve("hx_duo_read");
    assert_eq!(unit.name, "hx_duo");
    assert_eq!(unit.members.len(), 2);
}

#[test]
fn catalog_validates_against_registered_fixtures() {
    let catalog = Catalog::from_inventory();
    let states = StateRegistry::from_inventory(42).unwrap();
    catalog.validate(&states).unwrap();
}

#[test]
fn trial_collects_one_score_per_measurement_iteration() {
    let unit = resolve("hx_checksum");
    let (result, frames) = run_unit(&unit, &fast_settings(1, 4));
    let outcome = result.unwrap();
    assert_eq!(outcome.members.len(), 1);
    assert_eq!(outcome.members[0].scores.len(), 4);
    assert_eq!(frames.len(), 5);
}

#[test]
fn sink_consumption_is_lossless() {
    let unit = resolve("hx_checksum");
    let (_, frames) = run_unit(&unit, &fast_settings(0, 2));
    // The body consumes exactly once per invocation.
    assert!(frames.iter().all(|f| f.sink_ops == f.ops));
    assert!(frames.iter().all(|f| f.ops >= 1));
}

#[test]
fn thread_fixtures_build_once_per_worker() {
    let unit = resolve("hx_advance");
    let before = HX_TAPE_BUILDS.load(Ordering::SeqCst);
    let (result, _) = run_unit(&unit, &fast_settings(1, 3));
    result.unwrap();
    // Two workers, four iterations, two instances.
    assert_eq!(HX_TAPE_BUILDS.load(Ordering::SeqCst) - before, 2);
}

#[test]
fn group_splits_threads_between_roles() {
    let unit = resolve("hx_duo");
    let (result, frames) = run_unit(&unit, &fast_settings(0, 2));
    let outcome = result.unwrap();
    assert_eq!(outcome.members.len(), 2);
    assert!(outcome.members.iter().all(|m| m.workers == 2));
    let names: Vec<&str> = outcome.members.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, ["hx_duo:read", "hx_duo:write"]);
    assert!(frames.iter().all(|f| f.workers == 2));
}

#[test]
fn panicking_benchmark_invalidates_every_iteration() {
    let unit = resolve("hx_panics");
    let (result, frames) = run_unit(&unit, &fast_settings(0, 3));
    let outcome = result.unwrap();
    assert!(outcome.members[0].scores.is_empty());
    assert_eq!(outcome.members[0].invalid_iterations, 3);
    assert!(frames
        .iter()
        .all(|f| f.invalid && f.message.as_deref().unwrap().contains("deliberate")));
}

#[test]
fn thread_override_changes_worker_count() {
    let unit = resolve("hx_checksum");
    let mut settings = fast_settings(0, 1);
    settings.threads = 3;
    let (result, _) = run_unit(&unit, &settings);
    assert_eq!(result.unwrap().members[0].workers, 3);
}

#[test]
fn runaway_body_is_abandoned_not_awaited() {
    fn hx_stall(_: &mut BodyCtx<'_>) {
        std::thread::sleep(Duration::from_millis(300));
    }
    oxmark::benchmark! {
        BenchmarkDef::new("hx_stall", hx_stall)
    }

    let unit = resolve("hx_stall");
    let mut settings = fast_settings(0, 1);
    settings.measurement_time_ns = 10_000_000;
    let started = std::time::Instant::now();
    let (result, _) = run_unit(&unit, &settings);
    assert!(matches!(result, Err(TrialError::Timeout)));
    // 10x the 10 ms budget plus slack, nowhere near the 300 ms body.
    assert!(started.elapsed() < Duration::from_millis(290));
}
