//! One-frame rendezvous handoff.
//!
//! A publish → acquire → release cycle is the unit of mutual exclusion: the
//! decode thread parks inside `publish` until the render thread has drawn
//! and released the frame, so the engine can never recycle a GPU resource
//! the renderer still samples from. A stalled renderer stalls the decoder,
//! which caps GPU memory at one in-flight frame.

use std::time::{Duration, Instant};

use bb_common::{FrameBuffer, RelayStrategy, TextureId};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::relay::{Acquire, FrameNotifier, FrameRelay, Publish, RelayStats};

struct Slot {
    open: bool,
    /// Bumped on every shutdown so publishers parked before the shutdown
    /// notice it even if the relay is reopened before they wake.
    epoch: u64,
    pending: Option<FrameBuffer>,
    /// Texture and sequence of the frame the render thread acquired in this
    /// epoch and has not released yet. A pinned texture is never reissued,
    /// so the pair identifies the frame.
    held: Option<(TextureId, u64)>,
    /// Frames acquired before the last shutdown and not released since.
    /// They no longer block publishers: their keepalive pins the resource.
    stale_held: usize,
    /// A publisher is inside its publish → release cycle.
    in_cycle: bool,
    /// How the current cycle ended, collected by its publisher.
    outcome: Option<Publish>,
    notifier: Option<FrameNotifier>,
    stats: RelayStats,
}

pub struct RendezvousRelay {
    slot: Mutex<Slot>,
    changed: Condvar,
}

impl Default for RendezvousRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl RendezvousRelay {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                open: false,
                epoch: 0,
                pending: None,
                held: None,
                stale_held: 0,
                in_cycle: false,
                outcome: None,
                notifier: None,
                stats: RelayStats::default(),
            }),
            changed: Condvar::new(),
        }
    }

    /// Frames currently owned by the relay or the render thread (0 or 1).
    pub fn in_flight(&self) -> usize {
        let slot = self.slot.lock();
        usize::from(slot.pending.is_some() || slot.held.is_some())
    }
}

impl FrameRelay for RendezvousRelay {
    fn strategy(&self) -> RelayStrategy {
        RelayStrategy::Rendezvous
    }

    fn publish(&self, frame: FrameBuffer) -> Publish {
        let mut slot = self.slot.lock();
        if !slot.open {
            slot.stats.rejected += 1;
            drop(slot);
            trace!(sequence = frame.sequence(), "rendezvous closed, frame rejected");
            return Publish::Rejected;
        }

        let epoch = slot.epoch;
        while slot.epoch == epoch && (slot.in_cycle || slot.held.is_some()) {
            self.changed.wait(&mut slot);
        }
        if slot.epoch != epoch {
            slot.stats.rejected += 1;
            return Publish::Cancelled;
        }

        let sequence = frame.sequence();
        slot.in_cycle = true;
        slot.outcome = None;
        slot.pending = Some(frame);
        slot.stats.published += 1;
        if let Some(notify) = &slot.notifier {
            notify(sequence);
        }
        self.changed.notify_all();
        trace!(sequence, "frame pending in rendezvous");

        let outcome = loop {
            if let Some(outcome) = slot.outcome.take() {
                break outcome;
            }
            self.changed.wait(&mut slot);
        };
        slot.in_cycle = false;
        drop(slot);
        self.changed.notify_all();
        outcome
    }

    fn acquire_latest(&self, timeout: Option<Duration>) -> Acquire {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slot = self.slot.lock();
        loop {
            if !slot.open {
                return Acquire::Closed;
            }
            if let Some(frame) = slot.pending.take() {
                slot.held = Some((frame.texture(), frame.sequence()));
                slot.stats.delivered += 1;
                drop(slot);
                self.changed.notify_all();
                return Acquire::Frame(frame);
            }
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut slot, deadline).timed_out()
                        && slot.open
                        && slot.pending.is_none()
                    {
                        return Acquire::TimedOut;
                    }
                }
                None => self.changed.wait(&mut slot),
            }
        }
    }

    fn release_after_draw(&self, frame: FrameBuffer) {
        let key = (frame.texture(), frame.sequence());
        let sequence = key.1;
        // The GPU resource goes back to the engine before the publisher wakes.
        drop(frame);

        let mut slot = self.slot.lock();
        if slot.held == Some(key) {
            slot.held = None;
            slot.stats.drawn += 1;
            if slot.in_cycle && slot.outcome.is_none() {
                slot.outcome = Some(Publish::Delivered);
            }
        } else if slot.stale_held > 0 {
            slot.stale_held -= 1;
            slot.stats.drawn += 1;
        } else {
            drop(slot);
            debug!(sequence, "released frame was never acquired from this relay");
            return;
        }
        drop(slot);
        self.changed.notify_all();
        trace!(sequence, "rendezvous frame drawn");
    }

    fn shutdown(&self) -> usize {
        let mut slot = self.slot.lock();
        slot.open = false;
        slot.epoch += 1;
        let pending = slot.pending.take();
        if slot.held.take().is_some() {
            slot.stale_held += 1;
        }
        if slot.in_cycle && slot.outcome.is_none() {
            slot.outcome = Some(Publish::Cancelled);
        }
        let released = usize::from(pending.is_some());
        slot.stats.released_on_shutdown += released as u64;
        drop(slot);
        drop(pending);
        self.changed.notify_all();
        debug!(released, "rendezvous relay shut down");
        released
    }

    fn drain(&self, timeout: Duration) -> bool {
        // Frames are announced as they are published; only an unfinished
        // cycle can still be waiting.
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        while slot.open && slot.pending.is_some() {
            if self.changed.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        !slot.open || slot.pending.is_none()
    }

    fn reopen(&self) {
        self.slot.lock().open = true;
    }

    fn is_open(&self) -> bool {
        self.slot.lock().open
    }

    fn stats(&self) -> RelayStats {
        self.slot.lock().stats
    }

    fn set_notifier(&self, notifier: FrameNotifier) {
        self.slot.lock().notifier = Some(notifier);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bb_common::{FrameMeta, LiveCounter, PixelFormat, TextureId, VideoGeometry};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn frame(sequence: u64, live: &LiveCounter) -> FrameBuffer {
        let meta = FrameMeta {
            texture: TextureId(1 + sequence as u32 % 4),
            format: PixelFormat::Rgba,
            geometry: VideoGeometry::new(64, 36),
            sequence,
        };
        FrameBuffer::with_keepalive(meta, live.token())
    }

    #[test]
    fn publish_to_closed_relay_is_rejected() {
        let live = LiveCounter::new();
        let relay = RendezvousRelay::new();
        assert_eq!(relay.publish(frame(0, &live)), Publish::Rejected);
        assert_eq!(live.live(), 0);
        assert_eq!(relay.stats().rejected, 1);
    }

    #[test]
    fn publish_returns_after_release() {
        let live = LiveCounter::new();
        let relay = Arc::new(RendezvousRelay::new());
        relay.reopen();

        let producer = {
            let relay = relay.clone();
            let live = live.clone();
            thread::spawn(move || relay.publish(frame(0, &live)))
        };

        let got = relay
            .acquire_latest(Some(Duration::from_secs(5)))
            .into_frame()
            .expect("frame");
        assert_eq!(got.sequence(), 0);
        assert_eq!(relay.in_flight(), 1);
        assert!(!producer.is_finished());

        relay.release_after_draw(got);
        assert_eq!(producer.join().unwrap(), Publish::Delivered);
        assert_eq!(relay.in_flight(), 0);
        assert_eq!(live.live(), 0);
    }

    #[test]
    fn notifier_sees_every_frame() {
        let live = LiveCounter::new();
        let relay = Arc::new(RendezvousRelay::new());
        let seen = Arc::new(AtomicU64::new(0));
        {
            let seen = seen.clone();
            relay.set_notifier(Arc::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }));
        }
        relay.reopen();

        let producer = {
            let relay = relay.clone();
            let live = live.clone();
            thread::spawn(move || {
                for seq in 0..3 {
                    relay.publish(frame(seq, &live));
                }
            })
        };
        for _ in 0..3 {
            let f = relay.acquire_latest(Some(Duration::from_secs(5))).into_frame().unwrap();
            relay.release_after_draw(f);
        }
        producer.join().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert_eq!(relay.stats().drawn, 3);
    }

    #[test]
    fn shutdown_cancels_parked_publisher() {
        let live = LiveCounter::new();
        let relay = Arc::new(RendezvousRelay::new());
        relay.reopen();

        let producer = {
            let relay = relay.clone();
            let live = live.clone();
            thread::spawn(move || relay.publish(frame(0, &live)))
        };
        while relay.in_flight() == 0 {
            thread::yield_now();
        }
        assert_eq!(relay.shutdown(), 1);
        assert_eq!(producer.join().unwrap(), Publish::Cancelled);
        assert_eq!(live.live(), 0);
    }

    #[test]
    fn acquire_times_out_without_frames() {
        let relay = RendezvousRelay::new();
        relay.reopen();
        assert!(matches!(
            relay.acquire_latest(Some(Duration::from_millis(10))),
            Acquire::TimedOut
        ));
        relay.shutdown();
        assert!(matches!(relay.acquire_latest(None), Acquire::Closed));
    }

    #[test]
    fn dropped_frame_does_not_block_next_source() {
        let live = LiveCounter::new();
        let relay = Arc::new(RendezvousRelay::new());
        relay.reopen();

        let first = {
            let relay = relay.clone();
            let live = live.clone();
            thread::spawn(move || relay.publish(frame(0, &live)))
        };
        let got = relay
            .acquire_latest(Some(Duration::from_secs(5)))
            .into_frame()
            .expect("frame");
        // Render side loses the frame instead of releasing it.
        drop(got);
        relay.shutdown();
        assert_eq!(first.join().unwrap(), Publish::Cancelled);

        relay.reopen();
        let second = {
            let relay = relay.clone();
            let live = live.clone();
            thread::spawn(move || relay.publish(frame(1, &live)))
        };
        let got = relay
            .acquire_latest(Some(Duration::from_secs(5)))
            .into_frame()
            .expect("publisher of the new source was blocked");
        assert_eq!(got.sequence(), 1);
        relay.release_after_draw(got);
        assert_eq!(second.join().unwrap(), Publish::Delivered);
        assert_eq!(relay.in_flight(), 0);
        assert_eq!(live.live(), 0);
    }

    #[test]
    fn frame_held_across_shutdown_is_released_later() {
        let live = LiveCounter::new();
        let relay = Arc::new(RendezvousRelay::new());
        relay.reopen();

        let first = {
            let relay = relay.clone();
            let live = live.clone();
            thread::spawn(move || relay.publish(frame(0, &live)))
        };
        let old = relay
            .acquire_latest(Some(Duration::from_secs(5)))
            .into_frame()
            .expect("frame");
        relay.shutdown();
        assert_eq!(first.join().unwrap(), Publish::Cancelled);
        assert_eq!(live.live(), 1);

        relay.reopen();
        let second = {
            let relay = relay.clone();
            let live = live.clone();
            thread::spawn(move || relay.publish(frame(1, &live)))
        };
        let fresh = relay
            .acquire_latest(Some(Duration::from_secs(5)))
            .into_frame()
            .expect("frame");

        // The late release of the old frame must not complete the new cycle.
        relay.release_after_draw(old);
        assert!(!second.is_finished());
        assert_eq!(relay.in_flight(), 1);

        relay.release_after_draw(fresh);
        assert_eq!(second.join().unwrap(), Publish::Delivered);
        assert_eq!(live.live(), 0);
        assert_eq!(relay.stats().drawn, 2);
    }
}
