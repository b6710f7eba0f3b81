//! State fixtures and their lifecycle registry.
//!
//! A fixture is a named, scoped state object handed to operation bodies:
//!
//! - `Benchmark` scope: one instance per trial, shared by every worker.
//! - `Group` scope: one instance per group instance per trial, shared by the
//!   group's workers.
//! - `Thread` scope: one instance per worker per trial, exclusively owned.
//!
//! Shared fixtures are published through `Arc`; the driver's start barrier
//! provides the happens-before edge from setup to the first worker read.
//! Mutation of shared fixtures is the author's business (atomics, locks);
//! the harness takes no locks inside the measurement loop.

use fxhash::FxHashMap;
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;

/// Fixture lifetime scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Benchmark,
    Group,
    Thread,
}

/// Lifecycle hooks for a fixture. `setup` runs after construction, before
/// the instance is visible to any operation body; `teardown` runs after the
/// last invocation in the scope.
pub trait State: Any + Send {
    fn setup(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), String> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn State")
    }
}

/// Marker for fixtures that may be shared across workers.
pub trait SharedState: State + Sync {}

impl<T: State + Sync> SharedState for T {}

impl std::fmt::Debug for dyn SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn SharedState")
    }
}

/// Context handed to fixture factories.
#[derive(Debug, Clone, Copy)]
pub struct FixtureCtx {
    /// Index of the worker this instance is built for; 0 for shared scopes.
    pub worker_index: u32,
    /// Root seed of the run.
    pub seed: u64,
}

impl FixtureCtx {
    /// Deterministic per-worker seed derived from the root seed, for
    /// Thread-scoped RNG fixtures.
    pub fn worker_seed(&self) -> u64 {
        self.seed ^ (self.worker_index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }
}

/// Factory for a fixture instance. Shared scopes require `Sync` state.
#[derive(Clone, Copy)]
pub enum StateFactory {
    Shared(fn(&FixtureCtx) -> Box<dyn SharedState>),
    PerThread(fn(&FixtureCtx) -> Box<dyn State>),
}

impl std::fmt::Debug for StateFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateFactory::Shared(_) => f.write_str("StateFactory::Shared"),
            StateFactory::PerThread(_) => f.write_str("StateFactory::PerThread"),
        }
    }
}

/// A registered fixture definition.
#[derive(Debug, Clone)]
pub struct FixtureDef {
    pub name: &'static str,
    pub scope: Scope,
    pub factory: StateFactory,
    pub file: &'static str,
    pub line: u32,
}

impl FixtureDef {
    pub const fn benchmark_scoped(
        name: &'static str,
        factory: fn(&FixtureCtx) -> Box<dyn SharedState>,
    ) -> Self {
        Self {
            name,
            scope: Scope::Benchmark,
            factory: StateFactory::Shared(factory),
            file: "",
            line: 0,
        }
    }

    pub const fn group_scoped(
        name: &'static str,
        factory: fn(&FixtureCtx) -> Box<dyn SharedState>,
    ) -> Self {
        Self {
            name,
            scope: Scope::Group,
            factory: StateFactory::Shared(factory),
            file: "",
            line: 0,
        }
    }

    pub const fn thread_scoped(
        name: &'static str,
        factory: fn(&FixtureCtx) -> Box<dyn State>,
    ) -> Self {
        Self {
            name,
            scope: Scope::Thread,
            factory: StateFactory::PerThread(factory),
            file: "",
            line: 0,
        }
    }

    #[doc(hidden)]
    pub const fn at(mut self, file: &'static str, line: u32) -> Self {
        self.file = file;
        self.line = line;
        self
    }
}

/// Fixture lifecycle errors.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("unknown fixture `{0}`")]
    Unknown(String),

    #[error("fixture `{fixture}` setup failed: {message}")]
    Setup { fixture: String, message: String },

    #[error("fixture `{fixture}` teardown failed: {message}")]
    Teardown { fixture: String, message: String },

    #[error("fixture `{0}` registered twice")]
    Duplicate(String),
}

struct SharedSlot {
    name: &'static str,
    scope: Scope,
    state: Arc<dyn SharedState>,
}

/// Lifecycle manager for all fixtures of one trial.
///
/// Shared instances are cached on first acquisition; Thread instances are
/// keyed by worker index, taken out for each iteration and restored
/// afterwards so they persist across the trial's iterations.
pub struct StateRegistry {
    defs: FxHashMap<&'static str, &'static FixtureDef>,
    shared: Vec<SharedSlot>,
    thread: FxHashMap<(&'static str, u32), Box<dyn State>>,
    seed: u64,
}

impl StateRegistry {
    /// Registry over every fixture registered in the binary.
    pub fn from_inventory(seed: u64) -> Result<Self, StateError> {
        Self::with_defs(inventory::iter::<FixtureDef>.into_iter(), seed)
    }

    /// Registry over an explicit definition set (tests, embedding).
    pub fn with_defs(
        defs: impl IntoIterator<Item = &'static FixtureDef>,
        seed: u64,
    ) -> Result<Self, StateError> {
        let mut map = FxHashMap::default();
        for def in defs {
            if map.insert(def.name, def).is_some() {
                return Err(StateError::Duplicate(def.name.to_string()));
            }
        }
        Ok(Self {
            defs: map,
            shared: Vec::new(),
            thread: FxHashMap::default(),
            seed,
        })
    }

    pub fn scope_of(&self, name: &str) -> Option<Scope> {
        self.defs.get(name).map(|d| d.scope)
    }

    /// Acquire a Benchmark- or Group-scoped fixture, constructing and
    /// setting it up on first use.
    pub fn acquire_shared(&mut self, name: &str) -> Result<Arc<dyn SharedState>, StateError> {
        if let Some(slot) = self.shared.iter().find(|s| s.name == name) {
            return Ok(Arc::clone(&slot.state));
        }
        let def = *self
            .defs
            .get(name)
            .ok_or_else(|| StateError::Unknown(name.to_string()))?;
        let StateFactory::Shared(factory) = def.factory else {
            return Err(StateError::Setup {
                fixture: name.to_string(),
                message: "thread-scoped fixture acquired as shared".to_string(),
            });
        };
        let ctx = FixtureCtx {
            worker_index: 0,
            seed: self.seed,
        };
        let mut state = factory(&ctx);
        state.setup().map_err(|message| StateError::Setup {
            fixture: name.to_string(),
            message,
        })?;
        let state: Arc<dyn SharedState> = Arc::from(state);
        self.shared.push(SharedSlot {
            name: def.name,
            scope: def.scope,
            state: Arc::clone(&state),
        });
        Ok(state)
    }

    /// Take the Thread-scoped instance for `worker`, constructing and
    /// setting it up on first use. The caller must restore it after the
    /// iteration via [`restore_thread`](Self::restore_thread).
    pub fn take_thread(&mut self, name: &str, worker: u32) -> Result<Box<dyn State>, StateError> {
        let def = *self
            .defs
            .get(name)
            .ok_or_else(|| StateError::Unknown(name.to_string()))?;
        if let Some(state) = self.thread.remove(&(def.name, worker)) {
            return Ok(state);
        }
        let StateFactory::PerThread(factory) = def.factory else {
            return Err(StateError::Setup {
                fixture: name.to_string(),
                message: "shared fixture acquired as thread-scoped".to_string(),
            });
        };
        let ctx = FixtureCtx {
            worker_index: worker,
            seed: self.seed,
        };
        let mut state = factory(&ctx);
        state.setup().map_err(|message| StateError::Setup {
            fixture: name.to_string(),
            message,
        })?;
        Ok(state)
    }

    pub fn restore_thread(&mut self, name: &'static str, worker: u32, state: Box<dyn State>) {
        self.thread.insert((name, worker), state);
    }

    /// Tear down and drop every fixture at `scope`. Shared fixtures are torn
    /// down in reverse acquisition order. Teardown runs for all fixtures even
    /// if one fails; the first error is returned.
    pub fn release(&mut self, scope: Scope) -> Result<(), StateError> {
        let mut first_error = None;
        match scope {
            Scope::Thread => {
                let keys: Vec<_> = self.thread.keys().copied().collect();
                for key in keys {
                    if let Some(mut state) = self.thread.remove(&key) {
                        if let Err(message) = state.teardown() {
                            first_error.get_or_insert(StateError::Teardown {
                                fixture: key.0.to_string(),
                                message,
                            });
                        }
                    }
                }
            }
            shared_scope => {
                let mut kept = Vec::with_capacity(self.shared.len());
                for slot in std::mem::take(&mut self.shared).into_iter().rev() {
                    if slot.scope != shared_scope {
                        kept.push(slot);
                        continue;
                    }
                    let mut state = slot.state;
                    match Arc::get_mut(&mut state) {
                        Some(inner) => {
                            if let Err(message) = inner.teardown() {
                                first_error.get_or_insert(StateError::Teardown {
                                    fixture: slot.name.to_string(),
                                    message,
                                });
                            }
                        }
                        None => {
                            // A worker still holds a reference; skip teardown
                            // rather than run it concurrently with readers.
                            tracing::warn!(
                                fixture = slot.name,
                                "fixture still shared at release, teardown skipped"
                            );
                        }
                    }
                }
                kept.reverse();
                self.shared = kept;
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
