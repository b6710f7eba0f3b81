//! Cost of failure paths: a plain `Result` error value versus capturing a
//! backtrace at the failure site. One invocation attempts 1000 parses with
//! every third one failing.

use oxmark::prelude::*;
use std::backtrace::Backtrace;

const ATTEMPTS: u32 = 1_000;

#[derive(Debug, PartialEq, Eq)]
pub struct ParseFail {
    pub offset: u32,
}

fn parse(input: u32) -> Result<u32, ParseFail> {
    if input % 3 == 2 {
        Err(ParseFail { offset: input })
    } else {
        Ok(input.wrapping_mul(2_654_435_761))
    }
}

fn result_error_value(ctx: &mut BodyCtx<'_>) {
    let mut ok = 0u64;
    let mut failed = 0u64;
    for i in 0..ATTEMPTS {
        match parse(i) {
            Ok(v) => ok = ok.wrapping_add(v as u64),
            Err(e) => failed += e.offset as u64 & 1,
        }
    }
    ctx.sink().put_u64(ok.wrapping_add(failed));
}

fn result_with_backtrace(ctx: &mut BodyCtx<'_>) {
    let mut ok = 0u64;
    let mut trace_bytes = 0u64;
    for i in 0..ATTEMPTS {
        match parse(i) {
            Ok(v) => ok = ok.wrapping_add(v as u64),
            Err(_) => {
                // What an exception-style failure pays for: the stack walk.
                let trace = Backtrace::force_capture();
                trace_bytes += trace.to_string().len() as u64;
            }
        }
    }
    ctx.sink().put_u64(ok.wrapping_add(trace_bytes));
}

oxmark::benchmark! {
    BenchmarkDef::new("result_error_value", result_error_value)
        .unit(TimeUnit::Micros)
}

oxmark::benchmark! {
    BenchmarkDef::new("result_with_backtrace", result_with_backtrace)
        .unit(TimeUnit::Micros)
        .measurement(3, Duration::from_secs(1))
}
