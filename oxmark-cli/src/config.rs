//! `oxmark.toml` discovery and parsing.
//!
//! The config file supplies run defaults below CLI flags and above
//! descriptor values. Discovery walks upward from the working directory so a
//! workspace-level file covers every member crate.
//!
//! ```toml
//! [runner]
//! forks = 2
//! measurement_time = "500ms"
//! seed = 7
//!
//! [output]
//! unit = "us"
//! result = "target/oxmark.tsv"
//! ```

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "oxmark.toml";

fn default_seed() -> u64 {
    42
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OxmarkConfig {
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    pub forks: Option<u32>,
    pub warmup_iterations: Option<u32>,
    /// Duration string, e.g. `"1s"`, `"500ms"`.
    pub warmup_time: Option<String>,
    pub measurement_iterations: Option<u32>,
    pub measurement_time: Option<String>,
    pub threads: Option<u32>,
    /// Root seed for fixture randomness.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            forks: None,
            warmup_iterations: None,
            warmup_time: None,
            measurement_iterations: None,
            measurement_time: None,
            threads: None,
            seed: default_seed(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Output time unit: `ns`, `us`, `ms` or `s`.
    pub unit: Option<String>,
    /// Path of the TSV result file.
    pub result: Option<PathBuf>,
}

impl OxmarkConfig {
    /// Find and load the nearest `oxmark.toml` at or above the working
    /// directory. Absence is not an error.
    pub fn discover() -> anyhow::Result<Option<(PathBuf, Self)>> {
        let cwd = std::env::current_dir().context("cannot resolve working directory")?;
        for dir in cwd.ancestors() {
            let candidate = dir.join(CONFIG_FILE);
            if candidate.is_file() {
                let config = Self::load(&candidate)?;
                return Ok(Some((candidate, config)));
            }
        }
        Ok(None)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("cannot parse {}", path.display()))
    }

    pub fn warmup_time(&self) -> anyhow::Result<Option<Duration>> {
        self.parsed_duration(self.runner.warmup_time.as_deref(), "runner.warmup_time")
    }

    pub fn measurement_time(&self) -> anyhow::Result<Option<Duration>> {
        self.parsed_duration(
            self.runner.measurement_time.as_deref(),
            "runner.measurement_time",
        )
    }

    fn parsed_duration(&self, text: Option<&str>, key: &str) -> anyhow::Result<Option<Duration>> {
        text.map(|t| parse_duration(t).map_err(|e| anyhow::anyhow!("{key}: {e}")))
            .transpose()
    }
}

/// Parse a duration with a unit suffix: `ns`, `us`, `ms`, `s` or `m`.
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .ok_or_else(|| format!("`{text}` is missing a unit suffix (ns/us/ms/s/m)"))?;
    let (number, suffix) = text.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| format!("`{number}` is not a number"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("`{text}` is not a valid duration"));
    }
    let nanos = match suffix.trim() {
        "ns" => value,
        "us" => value * 1e3,
        "ms" => value * 1e6,
        "s" => value * 1e9,
        "m" => value * 60e9,
        other => return Err(format!("unknown duration unit `{other}`")),
    };
    Ok(Duration::from_nanos(nanos as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_suffixes() {
        assert_eq!(parse_duration("100ns").unwrap(), Duration::from_nanos(100));
        assert_eq!(parse_duration("250us").unwrap(), Duration::from_micros(250));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration(" 10 ms ").unwrap(), Duration::from_millis(10));
    }

    #[test]
    fn bad_durations_rejected() {
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("ms").is_err());
        assert!(parse_duration("10h").is_err());
        assert!(parse_duration("-5s").is_err());
    }

    #[test]
    fn full_config_parses() {
        let config: OxmarkConfig = toml::from_str(
            r#"
            [runner]
            forks = 2
            warmup_iterations = 3
            warmup_time = "500ms"
            measurement_iterations = 10
            measurement_time = "1s"
            threads = 8
            seed = 7

            [output]
            unit = "us"
            result = "target/oxmark.tsv"
            "#,
        )
        .unwrap();
        assert_eq!(config.runner.forks, Some(2));
        assert_eq!(config.runner.seed, 7);
        assert_eq!(
            config.warmup_time().unwrap(),
            Some(Duration::from_millis(500))
        );
        assert_eq!(config.output.unit.as_deref(), Some("us"));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: OxmarkConfig = toml::from_str("").unwrap();
        assert_eq!(config.runner.forks, None);
        assert_eq!(config.runner.seed, 42);
        assert!(config.output.result.is_none());
    }

    #[test]
    fn unknown_keys_rejected() {
        let result: Result<OxmarkConfig, _> = toml::from_str("[runner]\nfork = 2\n");
        assert!(result.is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[runner]\nforks = 3\n").unwrap();
        let config = OxmarkConfig::load(&path).unwrap();
        assert_eq!(config.runner.forks, Some(3));
    }
}
