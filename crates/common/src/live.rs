//! Outstanding-resource accounting.
//!
//! GPU-backed frames must all be released when a pipeline is torn down. A
//! [`LiveCounter`] hands out [`LiveToken`]s that decrement the count when
//! dropped; attaching a token as a frame keepalive makes leaks observable.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Counts {
    live: AtomicUsize,
    created: AtomicUsize,
    peak: AtomicUsize,
}

#[derive(Clone, Debug, Default)]
pub struct LiveCounter {
    counts: Arc<Counts>,
}

impl LiveCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one live resource.
    pub fn token(&self) -> LiveToken {
        let now = self.counts.live.fetch_add(1, Ordering::AcqRel) + 1;
        self.counts.created.fetch_add(1, Ordering::Relaxed);
        self.counts.peak.fetch_max(now, Ordering::AcqRel);
        LiveToken {
            counts: self.counts.clone(),
        }
    }

    /// Tokens currently alive.
    pub fn live(&self) -> usize {
        self.counts.live.load(Ordering::Acquire)
    }

    /// Tokens handed out so far.
    pub fn created(&self) -> usize {
        self.counts.created.load(Ordering::Relaxed)
    }

    /// Highest simultaneous live count observed.
    pub fn peak(&self) -> usize {
        self.counts.peak.load(Ordering::Acquire)
    }
}

/// Decrements its counter exactly once, on drop.
#[derive(Debug)]
pub struct LiveToken {
    counts: Arc<Counts>,
}

impl Drop for LiveToken {
    fn drop(&mut self) {
        self.counts.live.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_track_live_and_peak() {
        let counter = LiveCounter::new();
        let a = counter.token();
        let b = counter.token();
        assert_eq!(counter.live(), 2);
        drop(a);
        assert_eq!(counter.live(), 1);
        let c = counter.token();
        drop(b);
        drop(c);
        assert_eq!(counter.live(), 0);
        assert_eq!(counter.created(), 3);
        assert_eq!(counter.peak(), 2);
    }

    #[test]
    fn tokens_cross_threads() {
        let counter = LiveCounter::new();
        let token = counter.token();
        std::thread::spawn(move || drop(token)).join().unwrap();
        assert_eq!(counter.live(), 0);
    }
}
