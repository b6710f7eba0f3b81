//! IPC message types.
//!
//! All messages are serialized with rkyv and validated on receipt.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};

/// Measurement mode of a benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum Mode {
    /// Average time per invocation (ns/op scaled to the output unit).
    AverageTime,
    /// Invocations per unit of time.
    Throughput,
    /// One timed invocation on a single thread.
    SingleShot,
    /// Per-invocation duration distribution, subsampled.
    SampleTime,
}

impl Mode {
    /// Short label used in reports and result files.
    pub fn label(self) -> &'static str {
        match self {
            Mode::AverageTime => "avgt",
            Mode::Throughput => "thrpt",
            Mode::SingleShot => "ss",
            Mode::SampleTime => "sample",
        }
    }

    /// Whether scores of this mode are rates (higher is better) rather than
    /// durations.
    pub fn is_rate(self) -> bool {
        matches!(self, Mode::Throughput)
    }
}

/// Which phase an iteration frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum PhaseKind {
    Warmup,
    Measurement,
}

/// Categories of trial failures reported by a fork child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum FailureKind {
    /// Fixture setup or teardown failed.
    Fixture,
    /// An iteration failed to stop within 10x its budget.
    Timeout,
    /// Settings rejected by the child.
    Config,
    /// Anything else (internal invariant violation).
    Internal,
}

/// Effective settings for one fork's trial, after CLI/config/descriptor
/// layering on the supervisor side.
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct TrialSettings {
    /// Warmup iteration count (0 skips warmup entirely).
    pub warmup_iterations: u32,
    /// Wall-time budget of one warmup iteration in nanoseconds.
    pub warmup_time_ns: u64,
    /// Measurement iteration count.
    pub measurement_iterations: u32,
    /// Wall-time budget of one measurement iteration in nanoseconds.
    pub measurement_time_ns: u64,
    /// Total worker threads for the execution unit (0 = descriptor default).
    pub threads: u32,
    /// Mode override (None = descriptor default).
    pub mode: Option<Mode>,
    /// Root seed handed to fixture factories.
    pub seed: u64,
}

impl Default for TrialSettings {
    fn default() -> Self {
        Self {
            warmup_iterations: 5,
            warmup_time_ns: 1_000_000_000,
            measurement_iterations: 5,
            measurement_time_ns: 1_000_000_000,
            threads: 0,
            mode: None,
            seed: 42,
        }
    }
}

impl TrialSettings {
    /// Validate settings, returning a description of the first error found.
    pub fn validate(&self) -> Result<(), String> {
        if self.measurement_iterations == 0 {
            return Err("measurement_iterations must be > 0".to_string());
        }
        if self.measurement_time_ns == 0 {
            return Err("measurement_time_ns must be > 0".to_string());
        }
        if self.warmup_iterations > 0 && self.warmup_time_ns == 0 {
            return Err("warmup_time_ns must be > 0 when warmup iterations are requested".to_string());
        }
        Ok(())
    }
}

/// One member's result for one iteration, streamed child → supervisor.
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct IterationFrame {
    /// Display name of the member (`id` or `group:role`).
    pub member: String,
    pub phase: PhaseKind,
    /// Iteration index within its phase, starting at 0.
    pub index: u32,
    /// Sum of per-worker elapsed wall time in nanoseconds.
    pub elapsed_ns: u64,
    /// Total invocations across the member's workers.
    pub ops: u64,
    /// Worker threads that ran this member.
    pub workers: u32,
    /// Total sink consumptions observed across the member's workers.
    pub sink_ops: u64,
    /// Per-invocation score for this iteration (ns/op, or ops/ns for
    /// throughput mode). Meaningless when `invalid` is set.
    pub score: f64,
    /// Set when any worker's operation body panicked.
    pub invalid: bool,
    /// First panic message, if any.
    pub message: Option<String>,
    /// Sampled per-invocation durations (sample-time measurement only).
    pub samples: Vec<u64>,
}

/// Commands sent from the supervisor to a fork child.
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum ForkCommand {
    /// Run one trial of the named execution unit.
    RunTrial {
        /// Unit name: a benchmark id or a group tag.
        unit: String,
        settings: TrialSettings,
    },
    /// Health check.
    Ping,
    /// Graceful exit.
    Shutdown,
}

/// Messages sent from a fork child to the supervisor.
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum ForkMessage {
    /// Initial handshake.
    Hello { protocol_version: u32, pid: u32 },
    /// One member-iteration result.
    Iteration(IterationFrame),
    /// Trial finished; all frames have been sent.
    TrialComplete { invalid_iterations: u32 },
    /// Trial aborted; no further frames will follow.
    TrialFailed {
        kind: FailureKind,
        message: String,
        backtrace: Option<String>,
    },
    /// Reply to `Ping`.
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        assert!(TrialSettings::default().validate().is_ok());
    }

    #[test]
    fn zero_measurement_iterations_rejected() {
        let settings = TrialSettings {
            measurement_iterations: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_measurement_time_rejected() {
        let settings = TrialSettings {
            measurement_time_ns: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_warmup_iterations_allowed() {
        let settings = TrialSettings {
            warmup_iterations: 0,
            warmup_time_ns: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn warmup_iterations_without_time_rejected() {
        let settings = TrialSettings {
            warmup_iterations: 3,
            warmup_time_ns: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn mode_labels() {
        assert_eq!(Mode::AverageTime.label(), "avgt");
        assert_eq!(Mode::Throughput.label(), "thrpt");
        assert_eq!(Mode::SingleShot.label(), "ss");
        assert_eq!(Mode::SampleTime.label(), "sample");
        assert!(Mode::Throughput.is_rate());
        assert!(!Mode::AverageTime.is_rate());
    }
}
