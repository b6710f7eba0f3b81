//! Benchmark catalog and execution-unit planning.
//!
//! Descriptors registered through `benchmark!` are collected into a
//! [`Catalog`] preserving registration order (stable across runs). Selection
//! is substring matching; descriptors sharing a group tag are clustered into
//! one [`ExecutionUnit`] because group members can only run co-scheduled.

use crate::state::StateRegistry;
use crate::{BenchmarkDef, Mode, PhaseSpec, TimeUnit};
use fxhash::FxHashSet;
use thiserror::Error;

/// Descriptor validation errors. All of these are configuration errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("duplicate benchmark id `{0}`")]
    DuplicateId(String),

    #[error("benchmark `{bench}` requires unknown fixture `{fixture}`")]
    UnknownFixture { bench: String, fixture: String },

    #[error("benchmark `{0}` has zero threads")]
    ZeroThreads(String),

    #[error("benchmark `{0}` has zero forks")]
    ZeroForks(String),

    #[error("benchmark `{0}` has a zero-time or zero-iteration measurement phase")]
    EmptyMeasurement(String),

    #[error("benchmark `{0}` requests warmup iterations with a zero wall-time budget")]
    ZeroWarmupTime(String),

    #[error("group `{0}` has only one member")]
    SingletonGroup(String),

    #[error("group member `{0}` is missing a role")]
    MissingRole(String),

    #[error("group `{group}` declares role `{role}` twice")]
    DuplicateRole { group: String, role: String },

    #[error("group `{group}` members disagree on {what}")]
    InconsistentGroup { group: String, what: &'static str },

    #[error("group member `{0}` has a zero thread ratio")]
    ZeroRatio(String),
}

/// Ordered catalog of registered benchmark descriptors.
pub struct Catalog {
    entries: Vec<&'static BenchmarkDef>,
}

impl Catalog {
    /// Catalog over every descriptor registered in the binary, in
    /// registration order.
    pub fn from_inventory() -> Self {
        Self {
            entries: inventory::iter::<BenchmarkDef>.into_iter().collect(),
        }
    }

    /// Catalog over an explicit entry list (tests, embedding).
    pub fn with_entries(entries: Vec<&'static BenchmarkDef>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static BenchmarkDef> + '_ {
        self.entries.iter().copied()
    }

    /// Descriptors whose id, group tag, or display name contains any of the
    /// patterns. An empty pattern list matches everything. Catalog order is
    /// preserved.
    pub fn find(&self, patterns: &[String]) -> Vec<&'static BenchmarkDef> {
        self.entries
            .iter()
            .copied()
            .filter(|def| {
                if patterns.is_empty() {
                    return true;
                }
                let display = def.display_name();
                patterns.iter().any(|p| {
                    def.id.contains(p.as_str())
                        || display.contains(p.as_str())
                        || def.group.is_some_and(|g| g.contains(p.as_str()))
                })
            })
            .collect()
    }

    /// Check every descriptor against the harness invariants and the fixture
    /// registry.
    pub fn validate(&self, states: &StateRegistry) -> Result<(), CatalogError> {
        let mut seen = FxHashSet::default();
        for def in &self.entries {
            if !seen.insert(def.id) {
                return Err(CatalogError::DuplicateId(def.id.to_string()));
            }
            for fixture in def.fixtures {
                if states.scope_of(fixture).is_none() {
                    return Err(CatalogError::UnknownFixture {
                        bench: def.id.to_string(),
                        fixture: fixture.to_string(),
                    });
                }
            }
            if def.threads == 0 {
                return Err(CatalogError::ZeroThreads(def.id.to_string()));
            }
            if def.forks == 0 {
                return Err(CatalogError::ZeroForks(def.id.to_string()));
            }
            if def.measurement.iterations == 0 || def.measurement.time_ns() == 0 {
                return Err(CatalogError::EmptyMeasurement(def.id.to_string()));
            }
            if def.warmup.iterations > 0 && def.warmup.time_ns() == 0 {
                return Err(CatalogError::ZeroWarmupTime(def.id.to_string()));
            }
            if def.group.is_some() {
                if def.role.is_none() {
                    return Err(CatalogError::MissingRole(def.id.to_string()));
                }
                if def.ratio == 0 {
                    return Err(CatalogError::ZeroRatio(def.id.to_string()));
                }
            }
        }

        for unit in self.execution_units(self.entries.clone()) {
            let Some(tag) = unit.members[0].group else {
                continue;
            };
            if unit.members.len() < 2 {
                return Err(CatalogError::SingletonGroup(tag.to_string()));
            }
            let mut roles = FxHashSet::default();
            for member in &unit.members {
                if let Some(role) = member.role {
                    if !roles.insert(role) {
                        return Err(CatalogError::DuplicateRole {
                            group: tag.to_string(),
                            role: role.to_string(),
                        });
                    }
                }
            }
            let first = unit.members[0];
            for member in &unit.members[1..] {
                let what = if member.mode != first.mode {
                    Some("mode")
                } else if member.unit != first.unit {
                    Some("output unit")
                } else if member.threads != first.threads {
                    Some("thread count")
                } else if member.forks != first.forks {
                    Some("fork count")
                } else if member.warmup != first.warmup {
                    Some("warmup spec")
                } else if member.measurement != first.measurement {
                    Some("measurement spec")
                } else {
                    None
                };
                if let Some(what) = what {
                    return Err(CatalogError::InconsistentGroup {
                        group: tag.to_string(),
                        what,
                    });
                }
            }
        }
        Ok(())
    }

    /// Cluster selected descriptors into execution units, pulling in every
    /// member of a matched group. Unit order follows first appearance in the
    /// selection.
    pub fn execution_units(&self, selected: Vec<&'static BenchmarkDef>) -> Vec<ExecutionUnit> {
        let mut units: Vec<ExecutionUnit> = Vec::new();
        let mut seen_groups = FxHashSet::default();
        for def in selected {
            match def.group {
                None => units.push(ExecutionUnit {
                    name: def.id.to_string(),
                    members: vec![def],
                }),
                Some(tag) => {
                    if !seen_groups.insert(tag) {
                        continue;
                    }
                    // The whole group runs together, matched or not.
                    let members: Vec<_> = self
                        .entries
                        .iter()
                        .copied()
                        .filter(|d| d.group == Some(tag))
                        .collect();
                    units.push(ExecutionUnit {
                        name: tag.to_string(),
                        members,
                    });
                }
            }
        }
        units
    }

    /// Resolve a unit by name (benchmark id or group tag); used by the fork
    /// child to find what the supervisor asked for.
    pub fn resolve_unit(&self, name: &str) -> Option<ExecutionUnit> {
        if let Some(def) = self
            .entries
            .iter()
            .copied()
            .find(|d| d.group.is_none() && d.id == name)
        {
            return Some(ExecutionUnit {
                name: def.id.to_string(),
                members: vec![def],
            });
        }
        let members: Vec<_> = self
            .entries
            .iter()
            .copied()
            .filter(|d| d.group == Some(name) || (d.group.is_some() && d.id == name))
            .collect();
        if members.is_empty() {
            return None;
        }
        let tag = members[0].group.unwrap_or(name);
        let members: Vec<_> = self
            .entries
            .iter()
            .copied()
            .filter(|d| d.group == Some(tag))
            .collect();
        Some(ExecutionUnit {
            name: tag.to_string(),
            members,
        })
    }
}

/// One schedulable unit: a plain benchmark, or a whole group.
#[derive(Debug, Clone)]
pub struct ExecutionUnit {
    /// Benchmark id, or group tag for groups.
    pub name: String,
    pub members: Vec<&'static BenchmarkDef>,
}

impl ExecutionUnit {
    pub fn is_group(&self) -> bool {
        self.members.len() > 1 || self.members[0].group.is_some()
    }

    pub fn mode(&self) -> Mode {
        self.members[0].mode
    }

    pub fn unit(&self) -> TimeUnit {
        self.members[0].unit
    }

    pub fn forks(&self) -> u32 {
        self.members[0].forks
    }

    pub fn warmup(&self) -> PhaseSpec {
        self.members[0].warmup
    }

    pub fn measurement(&self) -> PhaseSpec {
        self.members[0].measurement
    }

    /// Total worker threads for the unit.
    pub fn total_threads(&self) -> u32 {
        self.members[0].threads
    }

    /// Per-member worker counts for `total` threads, split proportionally to
    /// the declared ratios.
    pub fn member_threads(&self, total: u32) -> Vec<u32> {
        let ratios: Vec<u32> = self.members.iter().map(|m| m.ratio).collect();
        partition_threads(total, &ratios)
    }
}

/// Partition `total` threads across members proportionally to `ratios`.
///
/// Rounds down, then hands leftover threads to the largest fractional
/// remainders (earlier members win ties). When `total >= ratios.len()`,
/// every member receives at least one thread.
pub fn partition_threads(total: u32, ratios: &[u32]) -> Vec<u32> {
    if ratios.is_empty() {
        return Vec::new();
    }
    let weight: u64 = ratios.iter().map(|&r| r as u64).sum();
    if weight == 0 {
        return vec![0; ratios.len()];
    }

    let mut counts: Vec<u32> = Vec::with_capacity(ratios.len());
    let mut remainders: Vec<(usize, u64)> = Vec::with_capacity(ratios.len());
    let mut assigned: u32 = 0;
    for (i, &r) in ratios.iter().enumerate() {
        let exact = total as u64 * r as u64;
        let base = (exact / weight) as u32;
        counts.push(base);
        remainders.push((i, exact % weight));
        assigned += base;
    }

    remainders.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let mut leftover = total - assigned;
    let mut next = 0;
    while leftover > 0 {
        let (i, _) = remainders[next % remainders.len()];
        counts[i] += 1;
        leftover -= 1;
        next += 1;
    }

    // Every member gets a worker when there are enough to go around.
    if total as usize >= counts.len() {
        loop {
            let Some(zero) = counts.iter().position(|&c| c == 0) else {
                break;
            };
            let (max_idx, _) = counts
                .iter()
                .enumerate()
                .max_by_key(|&(_, &c)| c)
                .expect("non-empty counts");
            counts[max_idx] -= 1;
            counts[zero] += 1;
        }
    }
    counts
}
