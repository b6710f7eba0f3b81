//! One trial: the warmup and measurement phases of a single fork.
//!
//! `run_trial` resolves the thread plan, wires fixtures to workers, runs the
//! configured warmup iterations (reported, discarded) and measurement
//! iterations (reported, kept), and hands every iteration to an observer
//! callback as it completes. In a fork child the observer streams frames to
//! the supervisor; in-process callers (tests) collect them directly.
//!
//! Fixture release order is Thread, then Group, then Benchmark, and runs
//! whether or not the phases succeeded.

use crate::clock;
use crate::driver::{self, DriverError, IterationKind, IterationOutcome, WorkerTask};
use crate::registry::ExecutionUnit;
use crate::state::{Scope, SharedState, StateError, StateRegistry};
use crate::BodyFn;
use oxmark_ipc::{IterationFrame, Mode, PhaseKind, TrialSettings};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Sampling stride used when no warmup iteration produced an estimate.
const DEFAULT_SAMPLE_STRIDE: u64 = 64;

/// Stride targets timing overhead at or below 1% of measured work. A sampled
/// invocation takes two clock readings, so the budget covers both.
const TIMER_OVERHEAD_BUDGET: u64 = 200;

/// Trial-level failures.
#[derive(Debug, Error)]
pub enum TrialError {
    #[error("invalid trial configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Fixture(#[from] StateError),

    #[error(transparent)]
    Driver(DriverError),

    #[error("iteration exceeded its hard timeout")]
    Timeout,

    #[error("trial interrupted")]
    Interrupted,

    #[error("result stream failed: {0}")]
    Io(#[from] std::io::Error),
}

/// One member's accumulated measurement results for one trial.
#[derive(Debug)]
pub struct MemberTrial {
    /// Display name (`group:role` for group members).
    pub name: String,
    pub mode: Mode,
    pub workers: u32,
    /// One score per valid measurement iteration. Nanoseconds per op for the
    /// time modes, ops per nanosecond for throughput.
    pub scores: Vec<f64>,
    pub invalid_iterations: u32,
    /// Pooled per-invocation samples (sample mode only).
    pub samples: Vec<u64>,
}

/// Result of one completed trial.
#[derive(Debug)]
pub struct TrialOutcome {
    pub members: Vec<MemberTrial>,
    pub invalid_iterations: u32,
}

struct MemberPlan {
    name: String,
    body: BodyFn,
    shared: Vec<(&'static str, Arc<dyn SharedState>)>,
    thread_fixtures: Vec<&'static str>,
    workers: Range<u32>,
}

/// Run one trial of `unit` under `settings`, reporting every iteration to
/// `observer`.
///
/// `cancel` is polled between iterations; setting it aborts the trial with
/// [`TrialError::Interrupted`].
pub fn run_trial(
    unit: &ExecutionUnit,
    states: &mut StateRegistry,
    settings: &TrialSettings,
    cancel: &AtomicBool,
    observer: &mut dyn FnMut(&IterationFrame) -> std::io::Result<()>,
) -> Result<TrialOutcome, TrialError> {
    settings.validate().map_err(TrialError::Config)?;
    let mode = settings.mode.unwrap_or_else(|| unit.mode());

    // Single-shot measures one cold invocation per member; concurrency would
    // only measure scheduler noise.
    let member_counts = if mode == Mode::SingleShot {
        vec![1u32; unit.members.len()]
    } else {
        let total = if settings.threads == 0 {
            unit.total_threads()
        } else {
            settings.threads
        };
        let counts = unit.member_threads(total);
        if counts.iter().any(|&c| c == 0) {
            return Err(TrialError::Config(format!(
                "unit `{}` has fewer threads ({total}) than members ({})",
                unit.name,
                unit.members.len()
            )));
        }
        counts
    };

    let result = run_phases(unit, states, settings, mode, &member_counts, cancel, observer);
    let released = release_all(states);
    match result {
        Err(e) => Err(e),
        Ok(outcome) => {
            released?;
            Ok(outcome)
        }
    }
}

fn release_all(states: &mut StateRegistry) -> Result<(), StateError> {
    let results = [
        states.release(Scope::Thread),
        states.release(Scope::Group),
        states.release(Scope::Benchmark),
    ];
    for result in results {
        result?;
    }
    Ok(())
}

fn run_phases(
    unit: &ExecutionUnit,
    states: &mut StateRegistry,
    settings: &TrialSettings,
    mode: Mode,
    member_counts: &[u32],
    cancel: &AtomicBool,
    observer: &mut dyn FnMut(&IterationFrame) -> std::io::Result<()>,
) -> Result<TrialOutcome, TrialError> {
    let mut plans = Vec::with_capacity(unit.members.len());
    let mut next_worker = 0u32;
    for (def, &count) in unit.members.iter().zip(member_counts) {
        let mut shared = Vec::new();
        let mut thread_fixtures = Vec::new();
        for &fixture in def.fixtures {
            match states.scope_of(fixture) {
                Some(Scope::Thread) => thread_fixtures.push(fixture),
                Some(_) => shared.push((fixture, states.acquire_shared(fixture)?)),
                None => {
                    return Err(TrialError::Config(format!(
                        "benchmark `{}` requires unknown fixture `{fixture}`",
                        def.id
                    )))
                }
            }
        }
        plans.push(MemberPlan {
            name: def.display_name(),
            body: def.body,
            shared,
            thread_fixtures,
            workers: next_worker..next_worker + count,
        });
        next_worker += count;
    }

    let mut accum: Vec<MemberTrial> = plans
        .iter()
        .map(|p| MemberTrial {
            name: p.name.clone(),
            mode,
            workers: p.workers.end - p.workers.start,
            scores: Vec::new(),
            invalid_iterations: 0,
            samples: Vec::new(),
        })
        .collect();

    let mut kind = match mode {
        Mode::AverageTime | Mode::Throughput => IterationKind::Timed,
        Mode::SingleShot => IterationKind::SingleShot,
        Mode::SampleTime => IterationKind::Sampled {
            stride: DEFAULT_SAMPLE_STRIDE,
        },
    };

    let warmup_budget = Duration::from_nanos(settings.warmup_time_ns);
    let mut op_estimate_ns = 0f64;
    for index in 0..settings.warmup_iterations {
        if cancel.load(Ordering::Acquire) {
            return Err(TrialError::Interrupted);
        }
        let outcome = run_one(&plans, states, kind, warmup_budget)?;
        for (plan, member) in plans.iter().zip(outcome.members) {
            if member.ops > 0 {
                op_estimate_ns = member.elapsed_ns as f64 / member.ops as f64;
            }
            let score = score_of(mode, &member);
            observer(&IterationFrame {
                member: plan.name.clone(),
                phase: PhaseKind::Warmup,
                index,
                elapsed_ns: member.elapsed_ns,
                ops: member.ops,
                workers: member.workers,
                sink_ops: member.sink_ops,
                score,
                invalid: member.invalid,
                message: member.panic,
                samples: Vec::new(),
            })?;
        }
    }

    // Warmup told us roughly how long one invocation takes; re-derive the
    // sampling stride from it so timing stays cheap relative to the work.
    if matches!(kind, IterationKind::Sampled { .. }) && op_estimate_ns > 0.0 {
        kind = IterationKind::Sampled {
            stride: sample_stride(op_estimate_ns),
        };
    }

    let measurement_budget = Duration::from_nanos(settings.measurement_time_ns);
    let mut total_invalid = 0u32;
    for index in 0..settings.measurement_iterations {
        if cancel.load(Ordering::Acquire) {
            return Err(TrialError::Interrupted);
        }
        let outcome = run_one(&plans, states, kind, measurement_budget)?;
        for (slot, (plan, member)) in accum.iter_mut().zip(plans.iter().zip(outcome.members)) {
            let score = score_of(mode, &member);
            if member.invalid {
                slot.invalid_iterations += 1;
                total_invalid += 1;
            } else {
                slot.scores.push(score);
                slot.samples.extend_from_slice(&member.samples);
            }
            observer(&IterationFrame {
                member: plan.name.clone(),
                phase: PhaseKind::Measurement,
                index,
                elapsed_ns: member.elapsed_ns,
                ops: member.ops,
                workers: member.workers,
                sink_ops: member.sink_ops,
                score,
                invalid: member.invalid,
                message: member.panic,
                samples: member.samples,
            })?;
        }
    }

    Ok(TrialOutcome {
        members: accum,
        invalid_iterations: total_invalid,
    })
}

/// Build the worker tasks for one iteration, run it, and put the
/// thread-scoped fixtures back.
fn run_one(
    plans: &[MemberPlan],
    states: &mut StateRegistry,
    kind: IterationKind,
    budget: Duration,
) -> Result<IterationOutcome, TrialError> {
    let mut tasks = Vec::new();
    for (member_index, plan) in plans.iter().enumerate() {
        for worker in plan.workers.clone() {
            let mut local = Vec::with_capacity(plan.thread_fixtures.len());
            for &name in &plan.thread_fixtures {
                local.push((name, states.take_thread(name, worker)?));
            }
            tasks.push(WorkerTask {
                member_index,
                worker_index: worker,
                body: plan.body,
                shared: plan.shared.clone(),
                local,
            });
        }
    }

    let mut outcome =
        driver::run_iteration(tasks, plans.len(), budget, kind).map_err(|e| match e {
            DriverError::IterationTimeout { .. } => TrialError::Timeout,
            other => TrialError::Driver(other),
        })?;
    for (worker, locals) in outcome.locals.drain(..) {
        for (name, state) in locals {
            states.restore_thread(name, worker, state);
        }
    }
    Ok(outcome)
}

/// Invocations between two sampled timings, from the warmup's
/// per-invocation estimate.
fn sample_stride(op_estimate_ns: f64) -> u64 {
    let overhead = (TIMER_OVERHEAD_BUDGET * clock::timer_overhead_ns()) as f64;
    let stride = (overhead / op_estimate_ns).ceil() as u64;
    stride.max(1)
}

/// Iteration score in the mode's native units: nanoseconds per op for the
/// time modes, ops per nanosecond for throughput.
fn score_of(mode: Mode, member: &driver::MemberIteration) -> f64 {
    if member.ops == 0 || member.elapsed_ns == 0 {
        return 0.0;
    }
    match mode {
        Mode::AverageTime | Mode::SingleShot => member.elapsed_ns as f64 / member.ops as f64,
        Mode::Throughput => {
            // Total ops over mean per-worker wall time.
            member.ops as f64 * member.workers.max(1) as f64 / member.elapsed_ns as f64
        }
        Mode::SampleTime => {
            if member.samples.is_empty() {
                member.elapsed_ns as f64 / member.ops as f64
            } else {
                let sum: u64 = member.samples.iter().sum();
                sum as f64 / member.samples.len() as f64
            }
        }
    }
}
