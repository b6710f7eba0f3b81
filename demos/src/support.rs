//! Shared fixtures for the demo suite.

use oxmark::prelude::*;
use rand::rngs::SmallRng;
use rand::SeedableRng;

/// Per-worker deterministic RNG. Every worker derives its stream from the
/// run's root seed, so two runs with the same seed see the same values.
pub struct WorkerRng {
    pub rng: SmallRng,
}

impl State for WorkerRng {}

fn build_worker_rng(ctx: &FixtureCtx) -> Box<dyn State> {
    Box::new(WorkerRng {
        rng: SmallRng::seed_from_u64(ctx.worker_seed()),
    })
}

oxmark::fixture! {
    FixtureDef::thread_scoped("worker_rng", build_worker_rng)
}
