//! Loop-shape comparisons over a shared array.
//!
//! Indexed loops, iterator chains and folds compile to nearly the same
//! machine code here; the interesting part is proving that with numbers
//! instead of folklore.

use oxmark::prelude::*;

pub struct LoopArrays {
    pub values: Vec<i32>,
}

impl State for LoopArrays {
    fn setup(&mut self) -> Result<(), String> {
        self.values = (0..10_000).map(|i| (i * 31 % 1024) as i32).collect();
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), String> {
        self.values.clear();
        Ok(())
    }
}

fn build_loop_arrays(_: &FixtureCtx) -> Box<dyn SharedState> {
    Box::new(LoopArrays { values: Vec::new() })
}

oxmark::fixture! {
    FixtureDef::benchmark_scoped("loop_arrays", build_loop_arrays)
}

fn sum_indexed(ctx: &mut BodyCtx<'_>) {
    let data = ctx.shared::<LoopArrays>("loop_arrays");
    let mut total = 0i64;
    for i in 0..data.values.len() {
        total += data.values[i] as i64;
    }
    ctx.sink().put_i64(total);
}

fn sum_iterator(ctx: &mut BodyCtx<'_>) {
    let data = ctx.shared::<LoopArrays>("loop_arrays");
    let total: i64 = data.values.iter().map(|&v| v as i64).sum();
    ctx.sink().put_i64(total);
}

fn sum_fold(ctx: &mut BodyCtx<'_>) {
    let data = ctx.shared::<LoopArrays>("loop_arrays");
    let total = data
        .values
        .iter()
        .fold(0i64, |acc, &v| acc.wrapping_add(v as i64));
    ctx.sink().put_i64(total);
}

oxmark::benchmark! {
    BenchmarkDef::new("sum_indexed", sum_indexed).fixtures(&["loop_arrays"])
}

oxmark::benchmark! {
    BenchmarkDef::new("sum_iterator", sum_iterator).fixtures(&["loop_arrays"])
}

oxmark::benchmark! {
    BenchmarkDef::new("sum_fold", sum_fold).fixtures(&["loop_arrays"])
}
