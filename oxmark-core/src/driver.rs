//! Invocation driver: one timed iteration across worker threads.
//!
//! The driver spawns one OS thread per worker, lines everyone up on a start
//! barrier, lets the operation bodies hot-spin against a shared stop flag
//! (release store by the driver, acquire loads by the workers), and collects
//! per-worker `(elapsed, ops)` over a channel. The measurement loop never
//! yields; all coordination sits outside it.
//!
//! An invocation in flight when the flag trips still counts. A body that
//! outlives the whole wall-time budget still contributes one invocation.
//! Workers that fail to report within [`HARD_TIMEOUT_FACTOR`] budgets are
//! abandoned and the iteration is declared lost.

use crate::clock;
use crate::sink::Sink;
use crate::state::{SharedState, State};
use crate::BodyFn;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Hard-cancel multiplier over the iteration wall-time budget.
pub const HARD_TIMEOUT_FACTOR: u32 = 10;

/// Bound on buffered per-invocation samples per worker; reaching it halves
/// the buffer and doubles the sampling stride.
pub const SAMPLE_BUFFER_CAP: usize = 4096;

/// Driver-level failures.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("worker thread spawn failed: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("iteration failed to stop within {HARD_TIMEOUT_FACTOR}x its {budget_ms} ms budget")]
    IterationTimeout { budget_ms: u64 },

    #[error("worker channel closed unexpectedly")]
    ChannelClosed,
}

/// How the measurement loop runs.
#[derive(Debug, Clone, Copy)]
pub enum IterationKind {
    /// Hot loop until the stop flag trips (average-time, throughput).
    Timed,
    /// Exactly one timed invocation on one worker.
    SingleShot,
    /// Hot loop timing every `stride`-th invocation.
    Sampled { stride: u64 },
}

/// Invocation context handed to operation bodies.
pub struct BodyCtx<'a> {
    shared: &'a [(&'static str, Arc<dyn SharedState>)],
    local: &'a mut Vec<(&'static str, Box<dyn State>)>,
    sink: &'a Sink,
    worker_index: u32,
}

impl<'a> BodyCtx<'a> {
    /// Build a context directly; tests and the driver use this.
    pub fn new(
        shared: &'a [(&'static str, Arc<dyn SharedState>)],
        local: &'a mut Vec<(&'static str, Box<dyn State>)>,
        sink: &'a Sink,
        worker_index: u32,
    ) -> Self {
        Self {
            shared,
            local,
            sink,
            worker_index,
        }
    }

    pub fn sink(&self) -> &'a Sink {
        self.sink
    }

    pub fn worker_index(&self) -> u32 {
        self.worker_index
    }

    /// Borrow a Benchmark- or Group-scoped fixture.
    ///
    /// Panics on a missing name or type mismatch; that surfaces as an
    /// invocation failure, which is what a mis-declared benchmark is.
    pub fn shared<T: 'static>(&self, name: &str) -> &'a T {
        for (n, state) in self.shared {
            if *n == name {
                let any: &'a dyn Any = &**state;
                return any
                    .downcast_ref::<T>()
                    .unwrap_or_else(|| panic!("shared fixture `{name}` has a different type"));
            }
        }
        panic!("shared fixture `{name}` not bound to this benchmark");
    }

    /// Borrow this worker's Thread-scoped fixture mutably.
    ///
    /// Panics on a missing name or type mismatch, like [`shared`](Self::shared).
    pub fn local<T: 'static>(&mut self, name: &str) -> &mut T {
        for (n, state) in self.local.iter_mut() {
            if *n == name {
                let any: &mut dyn Any = state.as_mut();
                return any
                    .downcast_mut::<T>()
                    .unwrap_or_else(|| panic!("thread fixture `{name}` has a different type"));
            }
        }
        panic!("thread fixture `{name}` not bound to this benchmark");
    }
}

/// Everything one worker needs for one iteration.
pub struct WorkerTask {
    pub member_index: usize,
    pub worker_index: u32,
    pub body: BodyFn,
    pub shared: Vec<(&'static str, Arc<dyn SharedState>)>,
    pub local: Vec<(&'static str, Box<dyn State>)>,
}

struct WorkerReport {
    member_index: usize,
    worker_index: u32,
    elapsed_ns: u64,
    ops: u64,
    sink_ops: u64,
    samples: Vec<u64>,
    panic: Option<String>,
    local: Vec<(&'static str, Box<dyn State>)>,
}

/// One member's aggregated result for one iteration.
#[derive(Debug, Default)]
pub struct MemberIteration {
    /// Sum of per-worker elapsed wall time.
    pub elapsed_ns: u64,
    pub ops: u64,
    pub workers: u32,
    pub sink_ops: u64,
    pub samples: Vec<u64>,
    pub invalid: bool,
    pub panic: Option<String>,
}

/// Result of one driver run.
#[derive(Debug)]
pub struct IterationOutcome {
    pub members: Vec<MemberIteration>,
    /// Thread-scoped fixtures handed back for the next iteration, keyed by
    /// worker index.
    pub locals: Vec<(u32, Vec<(&'static str, Box<dyn State>)>)>,
}

/// Run one iteration of `budget` wall time over the given worker tasks.
pub fn run_iteration(
    tasks: Vec<WorkerTask>,
    member_count: usize,
    budget: Duration,
    kind: IterationKind,
) -> Result<IterationOutcome, DriverError> {
    let worker_count = tasks.len();
    let stop = Arc::new(AtomicBool::new(false));
    let barrier = Arc::new(Barrier::new(worker_count + 1));
    let (tx, rx) = mpsc::channel::<WorkerReport>();

    let mut handles = Vec::with_capacity(worker_count);
    for task in tasks {
        let stop = Arc::clone(&stop);
        let barrier = Arc::clone(&barrier);
        let tx = tx.clone();
        let handle = std::thread::Builder::new()
            .name(format!("oxmark-worker-{}", task.worker_index))
            .spawn(move || run_worker(task, kind, &barrier, &stop, &tx))?;
        handles.push(handle);
    }
    drop(tx);

    barrier.wait();
    let started = Instant::now();
    if !matches!(kind, IterationKind::SingleShot) {
        std::thread::sleep(budget);
        stop.store(true, Ordering::Release);
    }

    let deadline = started + budget.saturating_mul(HARD_TIMEOUT_FACTOR);
    let mut reports = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(report) => reports.push(report),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // Stragglers are abandoned; dropping the handles detaches them.
                return Err(DriverError::IterationTimeout {
                    budget_ms: budget.as_millis() as u64,
                });
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => return Err(DriverError::ChannelClosed),
        }
    }
    for handle in handles {
        let _ = handle.join();
    }

    let mut members: Vec<MemberIteration> = Vec::with_capacity(member_count);
    members.resize_with(member_count, MemberIteration::default);
    let mut locals = Vec::with_capacity(worker_count);
    for report in reports {
        let member = &mut members[report.member_index];
        member.elapsed_ns += report.elapsed_ns;
        member.ops += report.ops;
        member.workers += 1;
        member.sink_ops += report.sink_ops;
        member.samples.extend(report.samples);
        if let Some(message) = report.panic {
            member.invalid = true;
            member.panic.get_or_insert(message);
        }
        locals.push((report.worker_index, report.local));
    }

    Ok(IterationOutcome { members, locals })
}

fn run_worker(
    mut task: WorkerTask,
    kind: IterationKind,
    barrier: &Barrier,
    stop: &AtomicBool,
    tx: &mpsc::Sender<WorkerReport>,
) {
    let sink = Sink::new();
    barrier.wait();
    let result = catch_unwind(AssertUnwindSafe(|| {
        let mut ctx = BodyCtx::new(&task.shared, &mut task.local, &sink, task.worker_index);
        measure(task.body, &mut ctx, kind, stop)
    }));
    let report = match result {
        Ok((elapsed_ns, ops, samples)) => WorkerReport {
            member_index: task.member_index,
            worker_index: task.worker_index,
            elapsed_ns,
            ops,
            sink_ops: sink.consumed(),
            samples,
            panic: None,
            local: task.local,
        },
        Err(payload) => WorkerReport {
            member_index: task.member_index,
            worker_index: task.worker_index,
            elapsed_ns: 0,
            ops: 0,
            sink_ops: sink.consumed(),
            samples: Vec::new(),
            panic: Some(panic_message(payload)),
            local: task.local,
        },
    };
    let _ = tx.send(report);
}

fn measure(
    body: BodyFn,
    ctx: &mut BodyCtx<'_>,
    kind: IterationKind,
    stop: &AtomicBool,
) -> (u64, u64, Vec<u64>) {
    match kind {
        IterationKind::SingleShot => {
            let t0 = clock::now_ns();
            body(ctx);
            (clock::now_ns() - t0, 1, Vec::new())
        }
        IterationKind::Timed => {
            let mut ops = 0u64;
            let t0 = clock::now_ns();
            loop {
                body(ctx);
                ops += 1;
                if stop.load(Ordering::Acquire) {
                    break;
                }
            }
            (clock::now_ns() - t0, ops, Vec::new())
        }
        IterationKind::Sampled { stride } => {
            let mut stride = stride.max(1);
            let mut until_sample = 0u64;
            let mut ops = 0u64;
            let mut samples = Vec::with_capacity(SAMPLE_BUFFER_CAP);
            let t0 = clock::now_ns();
            loop {
                if until_sample == 0 {
                    let s = clock::now_ns();
                    body(ctx);
                    samples.push(clock::now_ns() - s);
                    until_sample = stride - 1;
                    if samples.len() >= SAMPLE_BUFFER_CAP {
                        decimate(&mut samples);
                        stride = stride.saturating_mul(2);
                    }
                } else {
                    body(ctx);
                    until_sample -= 1;
                }
                ops += 1;
                if stop.load(Ordering::Acquire) {
                    break;
                }
            }
            (clock::now_ns() - t0, ops, samples)
        }
    }
}

fn decimate(samples: &mut Vec<u64>) {
    let mut keep = false;
    samples.retain(|_| {
        keep = !keep;
        keep
    });
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut BodyCtx<'_>) {}

    fn consume_two(ctx: &mut BodyCtx<'_>) {
        ctx.sink().put_u64(1);
        ctx.sink().put_u64(2);
    }

    fn slow(_: &mut BodyCtx<'_>) {
        std::thread::sleep(Duration::from_millis(30));
    }

    fn very_slow(_: &mut BodyCtx<'_>) {
        std::thread::sleep(Duration::from_millis(300));
    }

    fn panicking(_: &mut BodyCtx<'_>) {
        panic!("body fault");
    }

    fn task(member: usize, worker: u32, body: BodyFn) -> WorkerTask {
        WorkerTask {
            member_index: member,
            worker_index: worker,
            body,
            shared: Vec::new(),
            local: Vec::new(),
        }
    }

    #[test]
    fn timed_iteration_counts_invocations() {
        let outcome = run_iteration(
            vec![task(0, 0, noop)],
            1,
            Duration::from_millis(20),
            IterationKind::Timed,
        )
        .unwrap();
        let member = &outcome.members[0];
        assert!(member.ops >= 1);
        assert!(member.elapsed_ns >= 15_000_000);
        assert_eq!(member.workers, 1);
        assert!(!member.invalid);
    }

    #[test]
    fn body_longer_than_budget_counts_one_invocation() {
        let outcome = run_iteration(
            vec![task(0, 0, slow)],
            1,
            Duration::from_millis(5),
            IterationKind::Timed,
        )
        .unwrap();
        assert_eq!(outcome.members[0].ops, 1);
    }

    #[test]
    fn single_shot_runs_exactly_once() {
        let outcome = run_iteration(
            vec![task(0, 0, consume_two)],
            1,
            Duration::from_millis(100),
            IterationKind::SingleShot,
        )
        .unwrap();
        let member = &outcome.members[0];
        assert_eq!(member.ops, 1);
        assert_eq!(member.sink_ops, 2);
    }

    #[test]
    fn sink_consumption_matches_ops() {
        let outcome = run_iteration(
            vec![task(0, 0, consume_two)],
            1,
            Duration::from_millis(10),
            IterationKind::Timed,
        )
        .unwrap();
        let member = &outcome.members[0];
        assert_eq!(member.sink_ops, 2 * member.ops);
    }

    #[test]
    fn workers_split_across_members() {
        let tasks = vec![
            task(0, 0, noop),
            task(0, 1, noop),
            task(1, 2, noop),
            task(1, 3, noop),
        ];
        let outcome =
            run_iteration(tasks, 2, Duration::from_millis(10), IterationKind::Timed).unwrap();
        assert_eq!(outcome.members[0].workers, 2);
        assert_eq!(outcome.members[1].workers, 2);
        assert_eq!(outcome.locals.len(), 4);
    }

    #[test]
    fn panicking_body_marks_member_invalid() {
        let outcome = run_iteration(
            vec![task(0, 0, panicking), task(0, 1, noop)],
            1,
            Duration::from_millis(10),
            IterationKind::Timed,
        )
        .unwrap();
        let member = &outcome.members[0];
        assert!(member.invalid);
        assert!(member.panic.as_deref().unwrap().contains("body fault"));
        // The healthy worker still reported.
        assert_eq!(member.workers, 2);
        assert!(member.ops >= 1);
    }

    #[test]
    fn runaway_body_trips_hard_timeout() {
        let err = run_iteration(
            vec![task(0, 0, very_slow)],
            1,
            Duration::from_millis(10),
            IterationKind::Timed,
        )
        .unwrap_err();
        assert!(matches!(err, DriverError::IterationTimeout { .. }));
    }

    #[test]
    fn sampled_iteration_collects_bounded_samples() {
        let outcome = run_iteration(
            vec![task(0, 0, noop)],
            1,
            Duration::from_millis(20),
            IterationKind::Sampled { stride: 1 },
        )
        .unwrap();
        let member = &outcome.members[0];
        assert!(!member.samples.is_empty());
        assert!(member.samples.len() <= SAMPLE_BUFFER_CAP);
        assert!(member.ops >= member.samples.len() as u64);
    }

    #[test]
    fn decimate_halves_and_keeps_alternates() {
        let mut samples = vec![1, 2, 3, 4, 5, 6];
        decimate(&mut samples);
        assert_eq!(samples, vec![1, 3, 5]);
    }
}
