//! Oxmark core - measurement runtime
//!
//! This crate provides everything that runs inside a fork child:
//! - benchmark descriptors and the process-wide registration catalog
//! - the state-fixture registry with Benchmark/Group/Thread scopes
//! - the invocation driver (worker threads, start barrier, stop flag)
//! - the trial runner orchestrating warmup and measurement iterations
//! - the fork-child IPC entry point

pub mod clock;
pub mod driver;
pub mod fork;
pub mod registry;
pub mod sink;
pub mod state;
pub mod trial;

pub use driver::{BodyCtx, DriverError};
pub use fork::fork_child_main;
pub use oxmark_ipc::{Mode, PhaseKind, TrialSettings};
pub use registry::{Catalog, CatalogError, ExecutionUnit};
pub use sink::Sink;
pub use state::{FixtureCtx, FixtureDef, Scope, State, StateError, StateRegistry};
pub use trial::{run_trial, MemberTrial, TrialError, TrialOutcome};

// Doubles as the re-export the registration macros path through.
pub use inventory;

use std::time::Duration;

/// Output time unit for reported scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Nanos,
    Micros,
    Millis,
    Seconds,
}

impl TimeUnit {
    /// Nanoseconds per one of this unit.
    pub const fn nanos(self) -> u64 {
        match self {
            TimeUnit::Nanos => 1,
            TimeUnit::Micros => 1_000,
            TimeUnit::Millis => 1_000_000,
            TimeUnit::Seconds => 1_000_000_000,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            TimeUnit::Nanos => "ns",
            TimeUnit::Micros => "us",
            TimeUnit::Millis => "ms",
            TimeUnit::Seconds => "s",
        }
    }

    /// Unit column text for a score in the given mode, e.g. `ns/op` for
    /// average time or `ops/ms` for throughput.
    pub fn score_label(self, mode: Mode) -> String {
        if mode.is_rate() {
            format!("ops/{}", self.suffix())
        } else {
            format!("{}/op", self.suffix())
        }
    }
}

/// Iteration count and per-iteration wall-time budget for one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseSpec {
    pub iterations: u32,
    pub time: Duration,
}

impl PhaseSpec {
    pub const fn new(iterations: u32, time: Duration) -> Self {
        Self { iterations, time }
    }

    pub const fn time_ns(&self) -> u64 {
        self.time.as_nanos() as u64
    }
}

/// Operation body signature: fixtures and sink are reached through the
/// invocation context.
pub type BodyFn = fn(&mut BodyCtx<'_>);

/// A registered benchmark descriptor.
///
/// Built with a const chain so it can sit in an `inventory::submit!` block:
///
/// ```ignore
/// oxmark_core::benchmark! {
///     BenchmarkDef::new("sum_indexed", sum_indexed)
///         .fixtures(&["loop_arrays"])
///         .warmup(5, Duration::from_secs(1))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct BenchmarkDef {
    /// Unique identifier; also the default report name.
    pub id: &'static str,
    /// Operation body.
    pub body: BodyFn,
    /// Names of required fixtures, any scope.
    pub fixtures: &'static [&'static str],
    pub mode: Mode,
    pub unit: TimeUnit,
    /// Fresh process incarnations; each contributes `measurement.iterations`
    /// scores to the sample.
    pub forks: u32,
    pub warmup: PhaseSpec,
    pub measurement: PhaseSpec,
    /// Total worker threads for the execution unit this descriptor belongs
    /// to. Group members must agree on this value.
    pub threads: u32,
    /// Group tag; members sharing a tag are co-scheduled.
    pub group: Option<&'static str>,
    /// Role name within the group, e.g. `read`.
    pub role: Option<&'static str>,
    /// Relative share of the unit's threads this member receives.
    pub ratio: u32,
    /// Source location captured by the registration macro.
    pub file: &'static str,
    pub line: u32,
}

impl BenchmarkDef {
    /// Descriptor with harness defaults: average-time mode, nanoseconds,
    /// 1 fork, 5x1s warmup, 5x1s measurement, 1 thread.
    pub const fn new(id: &'static str, body: BodyFn) -> Self {
        Self {
            id,
            body,
            fixtures: &[],
            mode: Mode::AverageTime,
            unit: TimeUnit::Nanos,
            forks: 1,
            warmup: PhaseSpec::new(5, Duration::from_secs(1)),
            measurement: PhaseSpec::new(5, Duration::from_secs(1)),
            threads: 1,
            group: None,
            role: None,
            ratio: 1,
            file: "",
            line: 0,
        }
    }

    pub const fn fixtures(mut self, names: &'static [&'static str]) -> Self {
        self.fixtures = names;
        self
    }

    pub const fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub const fn unit(mut self, unit: TimeUnit) -> Self {
        self.unit = unit;
        self
    }

    pub const fn forks(mut self, forks: u32) -> Self {
        self.forks = forks;
        self
    }

    pub const fn warmup(mut self, iterations: u32, time: Duration) -> Self {
        self.warmup = PhaseSpec::new(iterations, time);
        self
    }

    pub const fn measurement(mut self, iterations: u32, time: Duration) -> Self {
        self.measurement = PhaseSpec::new(iterations, time);
        self
    }

    pub const fn threads(mut self, threads: u32) -> Self {
        self.threads = threads;
        self
    }

    /// Attach this descriptor to a group under the given role.
    pub const fn group(mut self, tag: &'static str, role: &'static str) -> Self {
        self.group = Some(tag);
        self.role = Some(role);
        self
    }

    pub const fn ratio(mut self, ratio: u32) -> Self {
        self.ratio = ratio;
        self
    }

    #[doc(hidden)]
    pub const fn at(mut self, file: &'static str, line: u32) -> Self {
        self.file = file;
        self.line = line;
        self
    }

    /// Report name: `id` for plain benchmarks, `group:role` for members.
    pub fn display_name(&self) -> String {
        match (self.group, self.role) {
            (Some(tag), Some(role)) => format!("{tag}:{role}"),
            _ => self.id.to_string(),
        }
    }
}

inventory::collect!(BenchmarkDef);
inventory::collect!(FixtureDef);

/// Anchor to prevent LTO from stripping inventory entries.
#[used]
#[doc(hidden)]
pub static REGISTRY_ANCHOR: fn() = || {
    for _ in inventory::iter::<BenchmarkDef> {}
    for _ in inventory::iter::<FixtureDef> {}
};

/// Register a benchmark descriptor, capturing its source location.
#[macro_export]
macro_rules! benchmark {
    ($def:expr) => {
        $crate::inventory::submit! {
            ($def).at(::core::file!(), ::core::line!())
        }
    };
}

/// Register a fixture definition, capturing its source location.
#[macro_export]
macro_rules! fixture {
    ($def:expr) => {
        $crate::inventory::submit! {
            ($def).at(::core::file!(), ::core::line!())
        }
    };
}
