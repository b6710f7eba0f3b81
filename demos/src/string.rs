//! String assembly strategies: formatting machinery versus plain pushes
//! versus pushes into a pre-sized buffer.

use oxmark::prelude::*;

const HOST: &str = "db-replica-07";
const REGION: &str = "eu-central-1";
const STATUS: &str = "healthy";

fn concat_format(ctx: &mut BodyCtx<'_>) {
    let line = format!("{HOST}.{REGION}: {STATUS}");
    ctx.sink().put_ref(line.as_str());
}

fn concat_push(ctx: &mut BodyCtx<'_>) {
    let mut line = String::new();
    line.push_str(HOST);
    line.push('.');
    line.push_str(REGION);
    line.push_str(": ");
    line.push_str(STATUS);
    ctx.sink().put_ref(line.as_str());
}

fn concat_prealloc(ctx: &mut BodyCtx<'_>) {
    let mut line = String::with_capacity(64);
    line.push_str(HOST);
    line.push('.');
    line.push_str(REGION);
    line.push_str(": ");
    line.push_str(STATUS);
    ctx.sink().put_ref(line.as_str());
}

oxmark::benchmark! {
    BenchmarkDef::new("concat_format", concat_format)
}

oxmark::benchmark! {
    BenchmarkDef::new("concat_push", concat_push)
}

oxmark::benchmark! {
    BenchmarkDef::new("concat_prealloc", concat_prealloc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_variants_build_the_same_line() {
        let formatted = format!("{HOST}.{REGION}: {STATUS}");
        let mut pushed = String::with_capacity(64);
        pushed.push_str(HOST);
        pushed.push('.');
        pushed.push_str(REGION);
        pushed.push_str(": ");
        pushed.push_str(STATUS);
        assert_eq!(formatted, pushed);
        assert!(pushed.len() <= 64);
    }
}
