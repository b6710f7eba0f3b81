//! Demonstration benchmark suite.
//!
//! Each module registers a family of benchmarks through the `benchmark!`
//! and `fixture!` macros; `main` just hands over to the harness.
//!
//! Run everything: `oxmark-demos`
//! Select by substring: `oxmark-demos matmul`
//! Quick pass: `oxmark-demos -f 1 --warmup-iterations 1 --warmup-time 100ms -i 3 --measurement-time 100ms`

mod collection;
mod concurrency;
mod errors;
mod iteration;
mod math;
mod matrix;
mod numbers;
mod string;
mod support;

fn main() {
    std::process::exit(oxmark::run());
}
