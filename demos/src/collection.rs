//! Collection access patterns: scanning with a whitelist, and appending to
//! an owned vector versus a lock-shared one.

use oxmark::prelude::*;
use std::sync::Mutex;

pub struct Wordlist {
    pub words: Vec<String>,
    pub allow: Vec<String>,
}

impl State for Wordlist {
    fn setup(&mut self) -> Result<(), String> {
        self.words = (0..2_000).map(|i| format!("word{:04}", i % 500)).collect();
        self.allow = (0..50).map(|i| format!("word{:04}", i * 10)).collect();
        Ok(())
    }
}

fn build_wordlist(_: &FixtureCtx) -> Box<dyn SharedState> {
    Box::new(Wordlist {
        words: Vec::new(),
        allow: Vec::new(),
    })
}

oxmark::fixture! {
    FixtureDef::benchmark_scoped("wordlist", build_wordlist)
}

/// Size of the subset extracted from the scan.
pub const SUBSET_LEN: usize = 5;

/// First `SUBSET_LEN` allowed words, indexed-loop style. The insertion
/// index advances per retained word, so the subset really fills up.
pub fn subset_indexed<'a>(words: &'a [String], allow: &[String]) -> Vec<&'a str> {
    let mut subset = Vec::with_capacity(SUBSET_LEN);
    let mut next = 0;
    for i in 0..words.len() {
        if next == SUBSET_LEN {
            break;
        }
        if allow.contains(&words[i]) {
            subset.push(words[i].as_str());
            next += 1;
        }
    }
    subset
}

pub fn subset_filtered<'a>(words: &'a [String], allow: &[String]) -> Vec<&'a str> {
    words
        .iter()
        .filter(|w| allow.contains(w))
        .take(SUBSET_LEN)
        .map(String::as_str)
        .collect()
}

fn whitelist_scan(ctx: &mut BodyCtx<'_>) {
    let list = ctx.shared::<Wordlist>("wordlist");
    let subset = subset_indexed(&list.words, &list.allow);
    ctx.sink().put_usize(subset.len());
    ctx.sink().put_ref(subset.as_slice());
}

fn whitelist_iter(ctx: &mut BodyCtx<'_>) {
    let list = ctx.shared::<Wordlist>("wordlist");
    let subset = subset_filtered(&list.words, &list.allow);
    ctx.sink().put_usize(subset.len());
    ctx.sink().put_ref(subset.as_slice());
}

oxmark::benchmark! {
    BenchmarkDef::new("whitelist_scan", whitelist_scan)
        .fixtures(&["wordlist"])
        .unit(TimeUnit::Micros)
}

oxmark::benchmark! {
    BenchmarkDef::new("whitelist_iter", whitelist_iter)
        .fixtures(&["wordlist"])
        .unit(TimeUnit::Micros)
}

/// Owned, per-worker append buffer.
pub struct AppendBuffer {
    pub items: Vec<u64>,
}

impl State for AppendBuffer {}

fn build_append_buffer(_: &FixtureCtx) -> Box<dyn State> {
    Box::new(AppendBuffer {
        items: Vec::with_capacity(1024),
    })
}

oxmark::fixture! {
    FixtureDef::thread_scoped("append_buffer", build_append_buffer)
}

/// One lock-guarded buffer shared by all workers of the benchmark.
pub struct SharedBuffer {
    pub items: Mutex<Vec<u64>>,
}

impl State for SharedBuffer {}

fn build_shared_buffer(_: &FixtureCtx) -> Box<dyn SharedState> {
    Box::new(SharedBuffer {
        items: Mutex::new(Vec::with_capacity(1024)),
    })
}

oxmark::fixture! {
    FixtureDef::benchmark_scoped("shared_buffer", build_shared_buffer)
}

fn vec_append(ctx: &mut BodyCtx<'_>) {
    let len = {
        let buffer: &mut AppendBuffer = ctx.local("append_buffer");
        buffer.items.push(buffer.items.len() as u64);
        if buffer.items.len() >= 1024 {
            buffer.items.clear();
        }
        buffer.items.len()
    };
    ctx.sink().put_usize(len);
}

fn append_locked(buffer: &SharedBuffer) -> usize {
    let mut items = buffer.items.lock().expect("buffer lock");
    let next = items.len() as u64;
    items.push(next);
    if items.len() >= 1024 {
        items.clear();
    }
    items.len()
}

fn locked_vec_append(ctx: &mut BodyCtx<'_>) {
    let buffer = ctx.shared::<SharedBuffer>("shared_buffer");
    ctx.sink().put_usize(append_locked(buffer));
}

oxmark::benchmark! {
    BenchmarkDef::new("vec_append", vec_append)
        .fixtures(&["append_buffer"])
        .threads(4)
}

oxmark::benchmark! {
    BenchmarkDef::new("locked_vec_append", locked_vec_append)
        .fixtures(&["shared_buffer"])
        .threads(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelist_variants_agree() {
        let mut list = Wordlist {
            words: Vec::new(),
            allow: Vec::new(),
        };
        list.setup().unwrap();
        let indexed = subset_indexed(&list.words, &list.allow);
        let filtered = subset_filtered(&list.words, &list.allow);
        assert_eq!(indexed, filtered);
    }

    #[test]
    fn locked_append_grows_then_wraps() {
        let buffer = SharedBuffer {
            items: Mutex::new(Vec::with_capacity(1024)),
        };
        assert_eq!(append_locked(&buffer), 1);
        assert_eq!(append_locked(&buffer), 2);
        for _ in 0..1021 {
            append_locked(&buffer);
        }
        assert_eq!(buffer.items.lock().unwrap().last().copied(), Some(1022));
        // The 1024th append fills the buffer and resets it.
        assert_eq!(append_locked(&buffer), 0);
    }

    #[test]
    fn subset_fills_with_distinct_entries() {
        let mut list = Wordlist {
            words: Vec::new(),
            allow: Vec::new(),
        };
        list.setup().unwrap();
        let subset = subset_indexed(&list.words, &list.allow);
        assert_eq!(subset.len(), SUBSET_LEN);
        for (i, word) in subset.iter().enumerate() {
            assert!(!subset[..i].contains(word));
        }
    }
}
