//! JMH-flavored micro-benchmark harness.
//!
//! A benchmark suite is a binary crate: register operations and fixtures
//! with the [`benchmark!`] and [`fixture!`] macros, then hand `main` to
//! [`run`].
//!
//! ```ignore
//! use oxmark::prelude::*;
//!
//! fn sum_iterator(ctx: &mut BodyCtx<'_>) {
//!     let total: i64 = (0..10_000).sum();
//!     ctx.sink().put_i64(total);
//! }
//!
//! oxmark::benchmark! {
//!     BenchmarkDef::new("sum_iterator", sum_iterator)
//!         .warmup(5, Duration::from_secs(1))
//!         .measurement(5, Duration::from_secs(1))
//! }
//!
//! fn main() {
//!     std::process::exit(oxmark::run());
//! }
//! ```

pub use oxmark_core::{
    benchmark, fixture, run_trial, BenchmarkDef, BodyCtx, Catalog, CatalogError, DriverError,
    ExecutionUnit, FixtureCtx, FixtureDef, MemberTrial, Mode, PhaseKind, Scope, Sink, State,
    StateError, StateRegistry, TimeUnit, TrialError, TrialOutcome,
};
pub use oxmark_ipc::{IterationFrame, TrialSettings};

pub use oxmark_cli as cli;

/// Everything a benchmark suite usually needs.
pub mod prelude {
    pub use crate::{benchmark, fixture};
    pub use oxmark_core::state::{FixtureCtx, FixtureDef, Scope, SharedState, State};
    pub use oxmark_core::{BenchmarkDef, BodyCtx, Mode, TimeUnit};
    pub use std::time::Duration;
}

/// Parse the command line and run the registered benchmarks; returns the
/// process exit code.
pub fn run() -> i32 {
    oxmark_cli::run()
}
