//! Run controller: selection, fork scheduling, aggregation, reporting.
//!
//! For every execution unit the controller spawns the configured number of
//! fork children, streams their iteration frames, and pools the measurement
//! scores into one sample per member (forks x measurement iterations). A
//! fork lost to the hard timeout is dropped from the sample and the run
//! continues; a fixture or configuration failure skips the unit's remaining
//! forks and fails the whole run.

use crate::supervisor::{ForkHandle, SupervisorError};
use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use oxmark_core::clock;
use oxmark_core::driver::HARD_TIMEOUT_FACTOR;
use oxmark_core::{Catalog, ExecutionUnit, Mode, StateRegistry, TimeUnit};
use oxmark_ipc::{FailureKind, ForkCommand, ForkMessage, FrameError, IterationFrame, PhaseKind, TrialSettings};
use oxmark_report::{format_table, scale_score, write_tsv, ResultRow, RowFlag};
use oxmark_stats::percentiles::percentile_sorted;
use rayon::prelude::*;
use std::path::PathBuf;
use std::time::Duration;

pub const EXIT_OK: i32 = 0;
/// Invalid configuration: bad descriptors, bad flags, or nothing selected.
pub const EXIT_CONFIG: i32 = 1;
/// At least one benchmark failed, was invalid, or stayed incomplete.
pub const EXIT_FAILURE: i32 = 2;
/// Platform failure: process spawn, pipes, or the result file.
pub const EXIT_PLATFORM: i32 = 3;

/// Extra slack on top of the child's own hard timeout before the supervisor
/// declares it stalled.
const SUPERVISOR_SLACK: Duration = Duration::from_secs(5);

const SAMPLE_PERCENTILES: [(&str, f64); 5] = [
    ("p50", 50.0),
    ("p90", 90.0),
    ("p99", 99.0),
    ("p99.9", 99.9),
    ("p100", 100.0),
];

/// Fully layered run options (CLI over config over descriptor defaults;
/// `None` falls through to the descriptor).
#[derive(Debug, Default)]
pub struct RunOptions {
    pub patterns: Vec<String>,
    pub forks: Option<u32>,
    pub warmup_iterations: Option<u32>,
    pub warmup_time: Option<Duration>,
    pub measurement_iterations: Option<u32>,
    pub measurement_time: Option<Duration>,
    pub threads: Option<u32>,
    pub mode: Option<Mode>,
    pub output_unit: Option<TimeUnit>,
    pub result_path: Option<PathBuf>,
    pub seed: u64,
}

/// Run the selected benchmarks and return the process exit code.
pub fn run(options: &RunOptions) -> anyhow::Result<i32> {
    let catalog = Catalog::from_inventory();
    let states = match StateRegistry::from_inventory(options.seed) {
        Ok(states) => states,
        Err(e) => {
            eprintln!("invalid fixture registry: {e}");
            return Ok(EXIT_CONFIG);
        }
    };
    if let Err(e) = catalog.validate(&states) {
        eprintln!("invalid benchmark catalog: {e}");
        return Ok(EXIT_CONFIG);
    }

    let selected = catalog.find(&options.patterns);
    if selected.is_empty() {
        eprintln!("no benchmarks match the given patterns");
        return Ok(EXIT_CONFIG);
    }
    let units = catalog.execution_units(selected);

    // Settings problems are configuration errors; reject them all before the
    // first fork spawns.
    for unit in &units {
        if let Err(e) = resolve_settings(unit, options).validate() {
            eprintln!("invalid settings for {}: {e}", unit.name);
            return Ok(EXIT_CONFIG);
        }
    }

    println!(
        "# oxmark {} starting at {} ({} execution units)",
        env!("CARGO_PKG_VERSION"),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        units.len()
    );

    let mut rows = Vec::new();
    let mut failed = false;
    for unit in &units {
        let (unit_rows, unit_failed) = run_unit(unit, options)?;
        failed |= unit_failed;
        rows.extend(unit_rows);
    }

    println!();
    print!("{}", format_table(&rows));

    if let Some(path) = &options.result_path {
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("cannot create result file {}", path.display()))?;
        write_tsv(&mut file, &rows)
            .with_context(|| format!("cannot write result file {}", path.display()))?;
        tracing::info!(path = %path.display(), "results written");
    }

    Ok(if failed { EXIT_FAILURE } else { EXIT_OK })
}

fn resolve_settings(unit: &ExecutionUnit, options: &RunOptions) -> TrialSettings {
    TrialSettings {
        warmup_iterations: options
            .warmup_iterations
            .unwrap_or(unit.warmup().iterations),
        warmup_time_ns: options
            .warmup_time
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_else(|| unit.warmup().time_ns()),
        measurement_iterations: options
            .measurement_iterations
            .unwrap_or(unit.measurement().iterations),
        measurement_time_ns: options
            .measurement_time
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_else(|| unit.measurement().time_ns()),
        threads: options.threads.unwrap_or(0),
        mode: options.mode,
        seed: options.seed,
    }
}

fn run_unit(unit: &ExecutionUnit, options: &RunOptions) -> anyhow::Result<(Vec<ResultRow>, bool)> {
    let settings = resolve_settings(unit, options);
    let forks = options.forks.unwrap_or_else(|| unit.forks());
    let mode = settings.mode.unwrap_or_else(|| unit.mode());
    let output_unit = options.output_unit.unwrap_or_else(|| unit.unit());
    let threads = if settings.threads == 0 {
        unit.total_threads()
    } else {
        settings.threads
    };

    println!(
        "# Benchmark: {} ({} fork(s), {} thread(s), {} mode)",
        unit.name,
        forks,
        threads,
        mode.label()
    );

    let mut collector = UnitCollector::new(unit, mode);
    let iterations_per_fork =
        (settings.warmup_iterations + settings.measurement_iterations) as u64 * unit.members.len() as u64;
    let progress = ProgressBar::new(forks as u64 * iterations_per_fork);
    progress.set_style(
        ProgressStyle::with_template("{msg} [{bar:30}] {pos}/{len}")
            .expect("static template")
            .progress_chars("=> "),
    );

    let mut complete_forks = 0u32;
    let mut lost_forks = 0u32;
    let mut fatal: Option<String> = None;

    for fork_index in 0..forks {
        progress.set_message(format!("{} fork {}/{}", unit.name, fork_index + 1, forks));
        match run_fork(&unit.name, &settings, &mut collector, &progress) {
            Ok(ForkOutcome::Complete) => {
                collector.commit_fork();
                complete_forks += 1;
            }
            Ok(ForkOutcome::Lost { reason }) => {
                collector.discard_fork();
                lost_forks += 1;
                tracing::warn!(unit = %unit.name, reason, "fork aborted; run continues");
            }
            Ok(ForkOutcome::Failed {
                kind,
                message,
                backtrace,
            }) => {
                collector.discard_fork();
                tracing::error!(unit = %unit.name, ?kind, message, "benchmark failed");
                if let Some(backtrace) = backtrace {
                    tracing::debug!(%backtrace, "child backtrace");
                }
                fatal = Some(message);
                break;
            }
            Err(e) => {
                progress.finish_and_clear();
                return Err(e).context("fork supervision failed");
            }
        }
    }
    progress.finish_and_clear();
    tracing::debug!(
        unit = %unit.name,
        complete_forks,
        lost_forks,
        "fork loop finished"
    );

    let rows = collector.into_rows(output_unit, lost_forks > 0 || fatal.is_some());
    // Any marked row means the run did not complete cleanly.
    let failed = fatal.is_some() || rows.iter().any(|r| r.flag != RowFlag::None);
    Ok((rows, failed))
}

enum ForkOutcome {
    Complete,
    /// The fork's partial results were dropped; remaining forks still run.
    Lost { reason: String },
    /// The unit cannot produce a score; remaining forks are skipped.
    Failed {
        kind: FailureKind,
        message: String,
        backtrace: Option<String>,
    },
}

fn run_fork(
    unit_name: &str,
    settings: &TrialSettings,
    collector: &mut UnitCollector,
    progress: &ProgressBar,
) -> Result<ForkOutcome, SupervisorError> {
    let mut handle = ForkHandle::spawn()?;
    tracing::debug!(pid = handle.pid, unit = unit_name, "fork child started");
    handle.send(&ForkCommand::RunTrial {
        unit: unit_name.to_string(),
        settings: settings.clone(),
    })?;

    // The child aborts runaway iterations itself; this deadline only catches
    // a child that stopped responding altogether.
    let budget = Duration::from_nanos(settings.measurement_time_ns.max(settings.warmup_time_ns));
    let deadline = budget.saturating_mul(HARD_TIMEOUT_FACTOR) + SUPERVISOR_SLACK;

    loop {
        match handle.recv(deadline) {
            Ok(ForkMessage::Iteration(frame)) => {
                collector.observe(&frame);
                progress.inc(1);
            }
            Ok(ForkMessage::TrialComplete { .. }) => {
                handle.shutdown();
                return Ok(ForkOutcome::Complete);
            }
            Ok(ForkMessage::TrialFailed {
                kind: FailureKind::Timeout,
                message,
                ..
            }) => {
                handle.shutdown();
                return Ok(ForkOutcome::Lost { reason: message });
            }
            Ok(ForkMessage::TrialFailed {
                kind,
                message,
                backtrace,
            }) => {
                handle.shutdown();
                return Ok(ForkOutcome::Failed {
                    kind,
                    message,
                    backtrace,
                });
            }
            Ok(_) => {
                handle.terminate();
                return Err(SupervisorError::UnexpectedMessage);
            }
            Err(SupervisorError::ChildTimeout) => {
                handle.terminate();
                return Ok(ForkOutcome::Lost {
                    reason: "child stalled past its deadline".to_string(),
                });
            }
            Err(SupervisorError::Frame(FrameError::EndOfStream)) => {
                return Ok(ForkOutcome::Lost {
                    reason: "child exited mid-trial".to_string(),
                });
            }
            Err(e) => {
                handle.terminate();
                return Err(e);
            }
        }
    }
}

#[derive(Clone)]
struct MemberAgg {
    name: String,
    scores: Vec<f64>,
    samples: Vec<u64>,
    invalid: u32,
}

impl MemberAgg {
    fn empty(name: String) -> Self {
        Self {
            name,
            scores: Vec::new(),
            samples: Vec::new(),
            invalid: 0,
        }
    }
}

/// Pools measurement frames per member across a unit's forks. Frames land in
/// a pending buffer first and only count once their fork completes, so a
/// lost fork contributes nothing.
struct UnitCollector {
    unit_name: String,
    is_group: bool,
    mode: Mode,
    members: Vec<MemberAgg>,
    pending: Vec<MemberAgg>,
}

impl UnitCollector {
    fn new(unit: &ExecutionUnit, mode: Mode) -> Self {
        let make = || -> Vec<MemberAgg> {
            unit.members
                .iter()
                .map(|m| MemberAgg::empty(m.display_name()))
                .collect()
        };
        Self {
            unit_name: unit.name.clone(),
            is_group: unit.is_group(),
            mode,
            members: make(),
            pending: make(),
        }
    }

    fn observe(&mut self, frame: &IterationFrame) {
        tracing::debug!(
            member = %frame.member,
            phase = ?frame.phase,
            index = frame.index,
            score = frame.score,
            ops = frame.ops,
            invalid = frame.invalid,
            "iteration"
        );
        if frame.phase != PhaseKind::Measurement {
            return;
        }
        let Some(agg) = self.pending.iter_mut().find(|m| m.name == frame.member) else {
            tracing::warn!(member = %frame.member, "frame for unknown member ignored");
            return;
        };
        if frame.invalid {
            agg.invalid += 1;
        } else {
            agg.scores.push(frame.score);
            agg.samples.extend_from_slice(&frame.samples);
        }
    }

    fn commit_fork(&mut self) {
        for (committed, pending) in self.members.iter_mut().zip(&mut self.pending) {
            committed.scores.append(&mut pending.scores);
            committed.samples.append(&mut pending.samples);
            committed.invalid += std::mem::take(&mut pending.invalid);
        }
    }

    fn discard_fork(&mut self) {
        for pending in &mut self.pending {
            pending.scores.clear();
            pending.samples.clear();
            pending.invalid = 0;
        }
    }

    fn into_rows(self, output_unit: TimeUnit, incomplete: bool) -> Vec<ResultRow> {
        let is_rate = self.mode.is_rate();
        let label = self.mode.label().to_string();
        let unit_label = output_unit.score_label(self.mode);
        let nanos = output_unit.nanos();

        let mut rows: Vec<ResultRow> = self
            .members
            .par_iter()
            .map(|agg| {
                let Some(summary) = oxmark_stats::summarize(&agg.scores) else {
                    return ResultRow {
                        name: agg.name.clone(),
                        mode: label.clone(),
                        samples: 0,
                        score: None,
                        error: None,
                        unit: unit_label.clone(),
                        flag: RowFlag::Skipped,
                    };
                };
                if !is_rate {
                    let floor = clock::GRANULARITY_WARN_FACTOR * clock::granularity_ns();
                    if summary.mean < floor as f64 {
                        tracing::warn!(
                            member = %agg.name,
                            mean_ns = summary.mean,
                            granularity_ns = clock::granularity_ns(),
                            "score is within 20x of timer granularity; treat with suspicion"
                        );
                    }
                }
                let flag = if incomplete {
                    RowFlag::Incomplete
                } else if agg.invalid > 0 {
                    RowFlag::InvalidIterations(agg.invalid)
                } else {
                    RowFlag::None
                };
                ResultRow {
                    name: agg.name.clone(),
                    mode: label.clone(),
                    samples: summary.n as u32,
                    score: Some(scale_score(summary.mean, is_rate, nanos)),
                    error: summary.error.map(|e| scale_score(e, is_rate, nanos)),
                    unit: unit_label.clone(),
                    flag,
                }
            })
            .collect();

        // Group summary line: combined throughput, or mean latency over the
        // members, from the same per-iteration pooling.
        if self.is_group && rows.iter().all(|r| r.score.is_some()) {
            let scores: Vec<f64> = rows.iter().filter_map(|r| r.score).collect();
            let combined = if is_rate {
                scores.iter().sum()
            } else {
                scores.iter().sum::<f64>() / scores.len() as f64
            };
            rows.insert(
                0,
                ResultRow {
                    name: self.unit_name.clone(),
                    mode: label.clone(),
                    samples: rows[0].samples,
                    score: Some(combined),
                    error: None,
                    unit: unit_label.clone(),
                    flag: if incomplete {
                        RowFlag::Incomplete
                    } else {
                        RowFlag::None
                    },
                },
            );
        }

        if self.mode == Mode::SampleTime {
            for agg in &self.members {
                if agg.samples.is_empty() {
                    continue;
                }
                let mut sorted: Vec<f64> = agg.samples.iter().map(|&s| s as f64).collect();
                sorted.par_sort_unstable_by(f64::total_cmp);
                for (tag, p) in SAMPLE_PERCENTILES {
                    let value = percentile_sorted(&sorted, p);
                    rows.push(ResultRow {
                        name: format!("{}:{tag}", agg.name),
                        mode: label.clone(),
                        samples: sorted.len() as u32,
                        score: Some(scale_score(value, false, nanos)),
                        error: None,
                        unit: unit_label.clone(),
                        flag: RowFlag::None,
                    });
                }
            }
        }

        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxmark_core::driver::BodyCtx;
    use oxmark_core::BenchmarkDef;

    fn noop(_: &mut BodyCtx<'_>) {}

    static SOLO: BenchmarkDef = BenchmarkDef::new("ctl_solo", noop);
    static PAIR_A: BenchmarkDef = BenchmarkDef::new("ctl_pair_a", noop)
        .group("ctl_pair", "read")
        .threads(2);
    static PAIR_B: BenchmarkDef = BenchmarkDef::new("ctl_pair_b", noop)
        .group("ctl_pair", "write")
        .threads(2);

    fn frame(member: &str, phase: PhaseKind, score: f64, invalid: bool) -> IterationFrame {
        IterationFrame {
            member: member.to_string(),
            phase,
            index: 0,
            elapsed_ns: 1_000_000,
            ops: 1000,
            workers: 1,
            sink_ops: 1000,
            score,
            invalid,
            message: invalid.then(|| "boom".to_string()),
            samples: Vec::new(),
        }
    }

    fn solo_unit() -> ExecutionUnit {
        ExecutionUnit {
            name: "ctl_solo".to_string(),
            members: vec![&SOLO],
        }
    }

    #[test]
    fn committed_forks_pool_scores() {
        let mut collector = UnitCollector::new(&solo_unit(), Mode::AverageTime);
        for _ in 0..3 {
            collector.observe(&frame("ctl_solo", PhaseKind::Measurement, 100.0, false));
        }
        collector.commit_fork();
        for _ in 0..3 {
            collector.observe(&frame("ctl_solo", PhaseKind::Measurement, 200.0, false));
        }
        collector.commit_fork();

        let rows = collector.into_rows(TimeUnit::Nanos, false);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].samples, 6);
        assert_eq!(rows[0].score, Some(150.0));
        assert_eq!(rows[0].flag, RowFlag::None);
    }

    #[test]
    fn lost_fork_contributes_nothing() {
        let mut collector = UnitCollector::new(&solo_unit(), Mode::AverageTime);
        collector.observe(&frame("ctl_solo", PhaseKind::Measurement, 100.0, false));
        collector.commit_fork();
        collector.observe(&frame("ctl_solo", PhaseKind::Measurement, 9999.0, false));
        collector.discard_fork();

        let rows = collector.into_rows(TimeUnit::Nanos, true);
        assert_eq!(rows[0].samples, 1);
        assert_eq!(rows[0].score, Some(100.0));
        assert_eq!(rows[0].flag, RowFlag::Incomplete);
    }

    #[test]
    fn warmup_frames_are_discarded() {
        let mut collector = UnitCollector::new(&solo_unit(), Mode::AverageTime);
        collector.observe(&frame("ctl_solo", PhaseKind::Warmup, 5.0, false));
        collector.observe(&frame("ctl_solo", PhaseKind::Measurement, 100.0, false));
        collector.commit_fork();
        let rows = collector.into_rows(TimeUnit::Nanos, false);
        assert_eq!(rows[0].samples, 1);
        assert_eq!(rows[0].score, Some(100.0));
    }

    #[test]
    fn invalid_iterations_flag_the_row() {
        let mut collector = UnitCollector::new(&solo_unit(), Mode::AverageTime);
        collector.observe(&frame("ctl_solo", PhaseKind::Measurement, 100.0, false));
        collector.observe(&frame("ctl_solo", PhaseKind::Measurement, 0.0, true));
        collector.commit_fork();
        let rows = collector.into_rows(TimeUnit::Nanos, false);
        assert_eq!(rows[0].samples, 1);
        assert_eq!(rows[0].flag, RowFlag::InvalidIterations(1));
    }

    #[test]
    fn all_invalid_yields_skipped_row() {
        let mut collector = UnitCollector::new(&solo_unit(), Mode::AverageTime);
        collector.observe(&frame("ctl_solo", PhaseKind::Measurement, 0.0, true));
        collector.commit_fork();
        let rows = collector.into_rows(TimeUnit::Nanos, false);
        assert_eq!(rows[0].score, None);
        assert_eq!(rows[0].flag, RowFlag::Skipped);
    }

    #[test]
    fn group_summary_sums_throughputs() {
        let unit = ExecutionUnit {
            name: "ctl_pair".to_string(),
            members: vec![&PAIR_A, &PAIR_B],
        };
        let mut collector = UnitCollector::new(&unit, Mode::Throughput);
        // ops/ns scores.
        for _ in 0..3 {
            collector.observe(&frame("ctl_pair:read", PhaseKind::Measurement, 2.0, false));
            collector.observe(&frame("ctl_pair:write", PhaseKind::Measurement, 1.0, false));
        }
        collector.commit_fork();
        let rows = collector.into_rows(TimeUnit::Nanos, false);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].name, "ctl_pair");
        assert_eq!(rows[0].score, Some(3.0));
        assert_eq!(rows[1].name, "ctl_pair:read");
    }

    #[test]
    fn sample_mode_appends_percentile_rows() {
        let mut collector = UnitCollector::new(&solo_unit(), Mode::SampleTime);
        let mut f = frame("ctl_solo", PhaseKind::Measurement, 50.0, false);
        f.samples = (1..=100).collect();
        collector.observe(&f);
        collector.commit_fork();
        let rows = collector.into_rows(TimeUnit::Nanos, false);
        // Base row plus five percentile rows.
        assert_eq!(rows.len(), 1 + SAMPLE_PERCENTILES.len());
        let p50 = rows.iter().find(|r| r.name == "ctl_solo:p50").unwrap();
        assert_eq!(p50.score, Some(50.5));
        let p100 = rows.iter().find(|r| r.name == "ctl_solo:p100").unwrap();
        assert_eq!(p100.score, Some(100.0));
    }

    #[test]
    fn zero_measurement_time_fails_validation() {
        let options = RunOptions {
            measurement_time: Some(Duration::ZERO),
            ..Default::default()
        };
        let settings = resolve_settings(&solo_unit(), &options);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn settings_layering_prefers_explicit_options() {
        let unit = solo_unit();
        let options = RunOptions {
            measurement_iterations: Some(7),
            measurement_time: Some(Duration::from_millis(250)),
            seed: 9,
            ..Default::default()
        };
        let settings = resolve_settings(&unit, &options);
        assert_eq!(settings.measurement_iterations, 7);
        assert_eq!(settings.measurement_time_ns, 250_000_000);
        // Warmup falls through to the descriptor default.
        assert_eq!(settings.warmup_iterations, 5);
        assert_eq!(settings.seed, 9);
        assert_eq!(settings.threads, 0);
    }
}
