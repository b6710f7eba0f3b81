//! Dense matrix multiplication: loop order against the cache.
//!
//! The classic ijk order strides the right-hand matrix column-wise; ikj and
//! an explicit transpose keep the inner loop sequential.

use oxmark::prelude::*;

pub const N: usize = 128;

pub struct Matrices {
    pub a: Vec<f64>,
    pub b: Vec<f64>,
}

impl State for Matrices {
    fn setup(&mut self) -> Result<(), String> {
        self.a = (0..N * N).map(|i| ((i % 97) as f64) * 0.25 + 1.0).collect();
        self.b = (0..N * N).map(|i| ((i % 89) as f64) * 0.5 - 3.0).collect();
        Ok(())
    }
}

fn build_matrices(_: &FixtureCtx) -> Box<dyn SharedState> {
    Box::new(Matrices {
        a: Vec::new(),
        b: Vec::new(),
    })
}

oxmark::fixture! {
    FixtureDef::benchmark_scoped("matrices", build_matrices)
}

pub fn multiply_ijk(a: &[f64], b: &[f64], out: &mut [f64]) {
    for i in 0..N {
        for j in 0..N {
            let mut acc = 0.0;
            for k in 0..N {
                acc += a[i * N + k] * b[k * N + j];
            }
            out[i * N + j] = acc;
        }
    }
}

pub fn multiply_ikj(a: &[f64], b: &[f64], out: &mut [f64]) {
    out.fill(0.0);
    for i in 0..N {
        for k in 0..N {
            let aik = a[i * N + k];
            for j in 0..N {
                out[i * N + j] += aik * b[k * N + j];
            }
        }
    }
}

pub fn multiply_transposed(a: &[f64], b: &[f64], out: &mut [f64]) {
    let mut bt = vec![0.0; N * N];
    for k in 0..N {
        for j in 0..N {
            bt[j * N + k] = b[k * N + j];
        }
    }
    for i in 0..N {
        for j in 0..N {
            let mut acc = 0.0;
            for k in 0..N {
                acc += a[i * N + k] * bt[j * N + k];
            }
            out[i * N + j] = acc;
        }
    }
}

fn matmul_ijk(ctx: &mut BodyCtx<'_>) {
    let m = ctx.shared::<Matrices>("matrices");
    let mut out = vec![0.0; N * N];
    multiply_ijk(&m.a, &m.b, &mut out);
    ctx.sink().put_f64(out[N * N - 1]);
}

fn matmul_ikj(ctx: &mut BodyCtx<'_>) {
    let m = ctx.shared::<Matrices>("matrices");
    let mut out = vec![0.0; N * N];
    multiply_ikj(&m.a, &m.b, &mut out);
    ctx.sink().put_f64(out[N * N - 1]);
}

fn matmul_transposed(ctx: &mut BodyCtx<'_>) {
    let m = ctx.shared::<Matrices>("matrices");
    let mut out = vec![0.0; N * N];
    multiply_transposed(&m.a, &m.b, &mut out);
    ctx.sink().put_f64(out[N * N - 1]);
}

oxmark::benchmark! {
    BenchmarkDef::new("matmul_ijk", matmul_ijk)
        .fixtures(&["matrices"])
        .unit(TimeUnit::Micros)
}

oxmark::benchmark! {
    BenchmarkDef::new("matmul_ikj", matmul_ikj)
        .fixtures(&["matrices"])
        .unit(TimeUnit::Micros)
}

oxmark::benchmark! {
    BenchmarkDef::new("matmul_transposed", matmul_transposed)
        .fixtures(&["matrices"])
        .unit(TimeUnit::Micros)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_orders_agree() {
        let mut m = Matrices {
            a: Vec::new(),
            b: Vec::new(),
        };
        m.setup().unwrap();
        let mut ijk = vec![0.0; N * N];
        let mut ikj = vec![0.0; N * N];
        let mut transposed = vec![0.0; N * N];
        multiply_ijk(&m.a, &m.b, &mut ijk);
        multiply_ikj(&m.a, &m.b, &mut ikj);
        multiply_transposed(&m.a, &m.b, &mut transposed);
        for i in 0..N * N {
            assert!((ijk[i] - ikj[i]).abs() < 1e-9, "ikj differs at {i}");
            assert!((ijk[i] - transposed[i]).abs() < 1e-9, "transposed differs at {i}");
        }
    }
}
