//! Integer exponentiation strategies. Runs two forks: tiny arithmetic
//! kernels are exactly where run-to-run compilation and layout jitter shows.

use oxmark::prelude::*;

const BASE: u64 = 1_664_525;
const EXPONENT: u32 = 17;

fn pow_loop(base: u64, exp: u32) -> u64 {
    let mut acc = 1u64;
    for _ in 0..exp {
        acc = acc.wrapping_mul(base);
    }
    acc
}

fn pow_recursive(base: u64, exp: u32) -> u64 {
    match exp {
        0 => 1,
        _ => base.wrapping_mul(pow_recursive(base, exp - 1)),
    }
}

fn pow_square_multiply(base: u64, mut exp: u32) -> u64 {
    let mut acc = 1u64;
    let mut square = base;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = acc.wrapping_mul(square);
        }
        square = square.wrapping_mul(square);
        exp >>= 1;
    }
    acc
}

fn bench_pow_loop(ctx: &mut BodyCtx<'_>) {
    ctx.sink().put_u64(pow_loop(BASE, EXPONENT));
}

fn bench_pow_recursive(ctx: &mut BodyCtx<'_>) {
    ctx.sink().put_u64(pow_recursive(BASE, EXPONENT));
}

fn bench_pow_square_multiply(ctx: &mut BodyCtx<'_>) {
    ctx.sink().put_u64(pow_square_multiply(BASE, EXPONENT));
}

fn bench_pow_f64(ctx: &mut BodyCtx<'_>) {
    ctx.sink().put_f64((BASE as f64).powi(EXPONENT as i32));
}

oxmark::benchmark! {
    BenchmarkDef::new("pow_loop", bench_pow_loop)
        .forks(2)
        .warmup(10, Duration::from_secs(1))
        .measurement(10, Duration::from_secs(1))
}

oxmark::benchmark! {
    BenchmarkDef::new("pow_recursive", bench_pow_recursive)
        .forks(2)
        .warmup(10, Duration::from_secs(1))
        .measurement(10, Duration::from_secs(1))
}

oxmark::benchmark! {
    BenchmarkDef::new("pow_square_multiply", bench_pow_square_multiply)
        .forks(2)
        .warmup(10, Duration::from_secs(1))
        .measurement(10, Duration::from_secs(1))
}

oxmark::benchmark! {
    BenchmarkDef::new("pow_f64", bench_pow_f64)
        .forks(2)
        .warmup(10, Duration::from_secs(1))
        .measurement(10, Duration::from_secs(1))
}
