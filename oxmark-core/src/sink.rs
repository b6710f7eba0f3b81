//! Dead-code-elimination sink.
//!
//! Every consume operation routes the exact bit pattern of its argument
//! through `std::hint::black_box` into a sequentially consistent atomic
//! store, so the optimizer must treat the value as externally observable.
//! A per-sink counter makes consumption countable by the driver and tests.
//!
//! Each worker thread owns its own `Sink`; the struct is cache-line aligned
//! (two lines, to defeat adjacent-line prefetching) so neighboring workers'
//! stores do not false-share.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Opaque value consumer handed to operation bodies.
#[derive(Debug, Default)]
#[repr(align(128))]
pub struct Sink {
    value: AtomicU64,
    addr: AtomicUsize,
    consumed: AtomicU64,
}

impl Sink {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn consume_bits(&self, bits: u64) {
        self.value.store(std::hint::black_box(bits), Ordering::SeqCst);
        self.consumed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn put_u64(&self, v: u64) {
        self.consume_bits(v);
    }

    #[inline]
    pub fn put_i64(&self, v: i64) {
        self.consume_bits(v as u64);
    }

    #[inline]
    pub fn put_f64(&self, v: f64) {
        self.consume_bits(v.to_bits());
    }

    #[inline]
    pub fn put_usize(&self, v: usize) {
        self.consume_bits(v as u64);
    }

    /// Consume a reference. The referent's address becomes observable, which
    /// forces the referent itself to exist.
    #[inline]
    pub fn put_ref<T: ?Sized>(&self, v: &T) {
        let addr = (v as *const T).cast::<()>() as usize;
        self.addr
            .store(std::hint::black_box(addr), Ordering::SeqCst);
        self.consumed.fetch_add(1, Ordering::Relaxed);
    }

    /// Total consumptions since construction.
    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn last_bits(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumption_is_counted() {
        let sink = Sink::new();
        sink.put_u64(1);
        sink.put_i64(-1);
        sink.put_f64(3.5);
        sink.put_usize(7);
        sink.put_ref(&[1u8, 2, 3]);
        assert_eq!(sink.consumed(), 5);
    }

    #[test]
    fn exact_bit_pattern_stored() {
        let sink = Sink::new();
        sink.put_f64(-0.0);
        assert_eq!(sink.last_bits(), (-0.0f64).to_bits());
        sink.put_i64(-2);
        assert_eq!(sink.last_bits(), (-2i64) as u64);
    }

    #[test]
    fn cache_line_aligned() {
        assert_eq!(std::mem::align_of::<Sink>(), 128);
        let sinks = [Sink::new(), Sink::new()];
        let a = &sinks[0] as *const Sink as usize;
        let b = &sinks[1] as *const Sink as usize;
        assert!(b.abs_diff(a) >= 128);
    }

    #[test]
    fn concurrent_consumption_tolerated() {
        let sink = std::sync::Arc::new(Sink::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    for i in 0..1000u64 {
                        sink.put_u64(t * 1000 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(sink.consumed(), 4000);
    }
}
