//! Command-line front end.
//!
//! A benchmark binary hands control to [`run`] from its `main`. The same
//! binary doubles as the fork worker: when spawned with the hidden
//! `--fork-worker` flag it serves the supervisor over the inherited pipes
//! instead of parsing a run.

pub mod config;
pub mod controller;
pub mod supervisor;

use clap::{Parser, ValueEnum};
use config::OxmarkConfig;
use controller::{RunOptions, EXIT_CONFIG, EXIT_OK, EXIT_PLATFORM};
use oxmark_core::{Catalog, Mode, TimeUnit};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "oxmark", version, about = "Micro-benchmark harness", long_about = None)]
pub struct Cli {
    /// Substring patterns selecting benchmarks; no patterns selects all.
    pub patterns: Vec<String>,

    /// Number of fresh child processes per benchmark.
    #[arg(short = 'f', long, value_name = "N")]
    pub forks: Option<u32>,

    /// Warmup iterations per fork (0 skips warmup).
    #[arg(long, value_name = "N")]
    pub warmup_iterations: Option<u32>,

    /// Wall-time budget of one warmup iteration, e.g. "500ms".
    #[arg(long, value_name = "DUR", value_parser = config::parse_duration)]
    pub warmup_time: Option<Duration>,

    /// Measurement iterations per fork.
    #[arg(short = 'i', long, value_name = "N")]
    pub measurement_iterations: Option<u32>,

    /// Wall-time budget of one measurement iteration, e.g. "1s".
    #[arg(long, value_name = "DUR", value_parser = config::parse_duration)]
    pub measurement_time: Option<Duration>,

    /// Worker threads per execution unit.
    #[arg(short = 't', long, value_name = "N")]
    pub threads: Option<u32>,

    /// Measurement mode override.
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Output time unit for scores.
    #[arg(long, value_enum)]
    pub output_unit: Option<UnitArg>,

    /// List matching benchmarks instead of running them.
    #[arg(long)]
    pub list: bool,

    /// Write a tab-separated result file.
    #[arg(long, value_name = "FILE")]
    pub result: Option<PathBuf>,

    /// Increase log verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[arg(long, hide = true)]
    pub fork_worker: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Avg,
    Thrpt,
    Ss,
    Sample,
}

impl From<ModeArg> for Mode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Avg => Mode::AverageTime,
            ModeArg::Thrpt => Mode::Throughput,
            ModeArg::Ss => Mode::SingleShot,
            ModeArg::Sample => Mode::SampleTime,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum UnitArg {
    Ns,
    Us,
    Ms,
    S,
}

impl From<UnitArg> for TimeUnit {
    fn from(arg: UnitArg) -> Self {
        match arg {
            UnitArg::Ns => TimeUnit::Nanos,
            UnitArg::Us => TimeUnit::Micros,
            UnitArg::Ms => TimeUnit::Millis,
            UnitArg::S => TimeUnit::Seconds,
        }
    }
}

fn parse_output_unit(text: &str) -> Option<TimeUnit> {
    match text {
        "ns" => Some(TimeUnit::Nanos),
        "us" => Some(TimeUnit::Micros),
        "ms" => Some(TimeUnit::Millis),
        "s" => Some(TimeUnit::Seconds),
        _ => None,
    }
}

fn init_tracing(verbose: u8) {
    let default = if verbose == 0 { "info" } else { "debug" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Parse arguments and run; returns the process exit code.
pub fn run() -> i32 {
    let cli = Cli::parse();

    if cli.fork_worker {
        init_tracing(cli.verbose);
        return oxmark_core::fork_child_main();
    }

    init_tracing(cli.verbose);
    match execute(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = ?e, "run failed");
            eprintln!("error: {e:#}");
            EXIT_PLATFORM
        }
    }
}

fn execute(cli: Cli) -> anyhow::Result<i32> {
    let config = match OxmarkConfig::discover() {
        Ok(Some((path, config))) => {
            tracing::debug!(path = %path.display(), "config loaded");
            config
        }
        Ok(None) => OxmarkConfig::default(),
        // An unreadable or malformed config file is a configuration error,
        // not a platform one.
        Err(e) => {
            eprintln!("{e:#}");
            return Ok(EXIT_CONFIG);
        }
    };

    if cli.list {
        return list(&cli.patterns);
    }

    let output_unit = match cli.output_unit {
        Some(arg) => Some(arg.into()),
        None => match &config.output.unit {
            Some(text) => match parse_output_unit(text) {
                Some(unit) => Some(unit),
                None => {
                    eprintln!("output.unit: unknown unit `{text}` (expected ns/us/ms/s)");
                    return Ok(EXIT_CONFIG);
                }
            },
            None => None,
        },
    };

    let warmup_time = match cli.warmup_time {
        Some(d) => Some(d),
        None => match config.warmup_time() {
            Ok(d) => d,
            Err(e) => {
                eprintln!("{e:#}");
                return Ok(EXIT_CONFIG);
            }
        },
    };
    let measurement_time = match cli.measurement_time {
        Some(d) => Some(d),
        None => match config.measurement_time() {
            Ok(d) => d,
            Err(e) => {
                eprintln!("{e:#}");
                return Ok(EXIT_CONFIG);
            }
        },
    };

    let options = RunOptions {
        patterns: cli.patterns,
        forks: cli.forks.or(config.runner.forks),
        warmup_iterations: cli.warmup_iterations.or(config.runner.warmup_iterations),
        warmup_time,
        measurement_iterations: cli
            .measurement_iterations
            .or(config.runner.measurement_iterations),
        measurement_time,
        threads: cli.threads.or(config.runner.threads),
        mode: cli.mode.map(Into::into),
        output_unit,
        result_path: cli.result.or(config.output.result),
        seed: config.runner.seed,
    };

    controller::run(&options)
}

fn list(patterns: &[String]) -> anyhow::Result<i32> {
    let catalog = Catalog::from_inventory();
    let matched = catalog.find(patterns);
    if matched.is_empty() {
        eprintln!("no benchmarks match the given patterns");
        return Ok(EXIT_CONFIG);
    }
    for def in matched {
        println!("{}", def.display_name());
    }
    Ok(EXIT_OK)
}
