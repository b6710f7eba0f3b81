//! Narrow versus wide integer arithmetic on random operands below 10^6,
//! fed from the per-worker deterministic RNG.

use crate::support::WorkerRng;
use oxmark::prelude::*;
use rand::Rng;

fn mul_i32(ctx: &mut BodyCtx<'_>) {
    let (a, b) = {
        let rng = &mut ctx.local::<WorkerRng>("worker_rng").rng;
        (rng.gen_range(0..1_000_000i32), rng.gen_range(0..1_000_000i32))
    };
    ctx.sink().put_i64(a.wrapping_mul(b) as i64);
}

fn mul_i64(ctx: &mut BodyCtx<'_>) {
    let (a, b) = {
        let rng = &mut ctx.local::<WorkerRng>("worker_rng").rng;
        (rng.gen_range(0..1_000_000i64), rng.gen_range(0..1_000_000i64))
    };
    ctx.sink().put_i64(a * b);
}

oxmark::benchmark! {
    BenchmarkDef::new("mul_i32", mul_i32).fixtures(&["worker_rng"])
}

oxmark::benchmark! {
    BenchmarkDef::new("mul_i64", mul_i64).fixtures(&["worker_rng"])
}
