//! Watermark-bounded handoff over two queues.
//!
//! Decoded frames go into `incoming`; drawn frames come back through
//! `outgoing`. The decode side releases drawn frames while `outgoing` is
//! deeper than the watermark and evicts the oldest undrawn frame while
//! `incoming` is, so each queue stays at most one above the watermark and
//! at most `2 * watermark + 2` frames are alive at once.
//! The render thread is only notified once `incoming` exceeds the watermark,
//! which separates "a frame exists" from "redraw now".

use std::thread;
use std::time::{Duration, Instant};

use bb_common::{FrameBuffer, RelayStrategy};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::queue::{Dequeue, HandoffQueue};
use crate::relay::{Acquire, FrameNotifier, FrameRelay, Publish, RelayStats};

/// Poll interval while waiting for the render thread to drain `incoming`.
const DRAIN_POLL: Duration = Duration::from_millis(2);

struct Gate {
    notifier: Option<FrameNotifier>,
    last_sequence: u64,
    stats: RelayStats,
}

pub struct WatermarkRelay {
    watermark: usize,
    incoming: HandoffQueue<FrameBuffer>,
    outgoing: HandoffQueue<FrameBuffer>,
    /// Serializes publish against shutdown/reopen and guards the counters.
    gate: Mutex<Gate>,
}

impl WatermarkRelay {
    /// `watermark` is clamped to at least 1.
    pub fn new(watermark: usize) -> Self {
        Self {
            watermark: watermark.max(1),
            incoming: HandoffQueue::closed(),
            outgoing: HandoffQueue::closed(),
            gate: Mutex::new(Gate {
                notifier: None,
                last_sequence: 0,
                stats: RelayStats::default(),
            }),
        }
    }

    pub fn watermark(&self) -> usize {
        self.watermark
    }

    pub fn incoming_depth(&self) -> usize {
        self.incoming.len()
    }

    pub fn outgoing_depth(&self) -> usize {
        self.outgoing.len()
    }

    /// Releases the oldest drawn frames until `outgoing` is back at `limit`.
    fn trim_outgoing(&self, limit: usize) -> u64 {
        let mut released = 0;
        while self.outgoing.len() > limit {
            match self.outgoing.try_get() {
                Dequeue::Item(frame) => {
                    trace!(sequence = frame.sequence(), "recycling drawn frame");
                    drop(frame);
                    released += 1;
                }
                Dequeue::Empty | Dequeue::Closed => break,
            }
        }
        released
    }
}

impl FrameRelay for WatermarkRelay {
    fn strategy(&self) -> RelayStrategy {
        RelayStrategy::Watermark
    }

    fn publish(&self, frame: FrameBuffer) -> Publish {
        let mut gate = self.gate.lock();
        if self.incoming.is_closed() {
            gate.stats.rejected += 1;
            drop(gate);
            trace!(sequence = frame.sequence(), "watermark relay closed, frame rejected");
            return Publish::Rejected;
        }

        gate.stats.recycled += self.trim_outgoing(self.watermark);

        while self.incoming.len() > self.watermark {
            match self.incoming.try_get() {
                Dequeue::Item(stale) => {
                    trace!(sequence = stale.sequence(), "evicting undrawn frame");
                    gate.stats.dropped += 1;
                }
                Dequeue::Empty | Dequeue::Closed => break,
            }
        }

        let sequence = frame.sequence();
        if self.incoming.put(frame).is_err() {
            // Only shutdown closes the queue and it needs the gate first.
            gate.stats.rejected += 1;
            return Publish::Rejected;
        }
        gate.stats.published += 1;
        gate.last_sequence = sequence;

        let depth = self.incoming.len();
        gate.stats.max_incoming_depth = gate.stats.max_incoming_depth.max(depth);
        debug_assert!(
            depth <= self.watermark + 1,
            "incoming depth {depth} above watermark {}",
            self.watermark
        );

        if depth > self.watermark {
            if let Some(notify) = &gate.notifier {
                notify(sequence);
            }
        }
        Publish::Queued
    }

    fn acquire_latest(&self, timeout: Option<Duration>) -> Acquire {
        let taken = match timeout {
            Some(timeout) => self.incoming.get_timeout(timeout),
            None => match self.incoming.get() {
                Some(frame) => Dequeue::Item(frame),
                None => Dequeue::Closed,
            },
        };
        match taken {
            Dequeue::Item(frame) => {
                self.gate.lock().stats.delivered += 1;
                Acquire::Frame(frame)
            }
            Dequeue::Empty => Acquire::TimedOut,
            Dequeue::Closed => Acquire::Closed,
        }
    }

    fn release_after_draw(&self, frame: FrameBuffer) {
        let sequence = frame.sequence();
        let mut gate = self.gate.lock();
        gate.stats.drawn += 1;
        if let Err(frame) = self.outgoing.put(frame) {
            // Relay already shut down: nobody will recycle it later.
            drop(frame);
            gate.stats.released_on_shutdown += 1;
            return;
        }
        // Cap the backlog if the decoder has stalled.
        gate.stats.recycled += self.trim_outgoing(self.watermark + 1);
        let depth = self.outgoing.len();
        gate.stats.max_outgoing_depth = gate.stats.max_outgoing_depth.max(depth);
        trace!(sequence, outgoing = depth, "frame returned for recycling");
    }

    fn shutdown(&self) -> usize {
        let mut gate = self.gate.lock();
        let undrawn = self.incoming.close();
        let drawn = self.outgoing.close();
        let released = undrawn.len() + drawn.len();
        gate.stats.released_on_shutdown += released as u64;
        drop(gate);
        drop(undrawn);
        drop(drawn);
        debug!(released, "watermark relay shut down");
        released
    }

    fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut announced = None;
        loop {
            {
                let gate = self.gate.lock();
                if self.incoming.is_closed() {
                    return self.incoming.is_empty();
                }
                let depth = self.incoming.len();
                if depth == 0 {
                    return true;
                }
                // Below the watermark nothing told the renderer about these.
                if announced != Some(depth) {
                    announced = Some(depth);
                    if let Some(notify) = &gate.notifier {
                        notify(gate.last_sequence);
                    }
                }
            }
            if Instant::now() >= deadline {
                debug!(left = self.incoming.len(), "watermark drain timed out");
                return false;
            }
            thread::sleep(DRAIN_POLL);
        }
    }

    fn reopen(&self) {
        let _gate = self.gate.lock();
        self.outgoing.reopen();
        self.incoming.reopen();
    }

    fn is_open(&self) -> bool {
        !self.incoming.is_closed()
    }

    fn stats(&self) -> RelayStats {
        self.gate.lock().stats
    }

    fn set_notifier(&self, notifier: FrameNotifier) {
        self.gate.lock().notifier = Some(notifier);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bb_common::{FrameMeta, LiveCounter, PixelFormat, TextureId, VideoGeometry};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn frame(sequence: u64, live: &LiveCounter) -> FrameBuffer {
        let meta = FrameMeta {
            texture: TextureId(sequence as u32),
            format: PixelFormat::Rgba,
            geometry: VideoGeometry::new(32, 32),
            sequence,
        };
        FrameBuffer::with_keepalive(meta, live.token())
    }

    #[test]
    fn publish_never_blocks_and_evicts_oldest() {
        let live = LiveCounter::new();
        let relay = WatermarkRelay::new(3);
        relay.reopen();

        for seq in 0..10 {
            assert_eq!(relay.publish(frame(seq, &live)), Publish::Queued);
            assert!(relay.incoming_depth() <= 4);
        }
        assert_eq!(relay.incoming_depth(), 4);
        assert_eq!(live.live(), 4);
        assert_eq!(relay.stats().dropped, 6);

        // Survivors are the newest frames, still in production order.
        let first = relay.acquire_latest(Some(Duration::ZERO)).into_frame().unwrap();
        assert_eq!(first.sequence(), 6);
    }

    #[test]
    fn notifies_only_above_watermark() {
        let live = LiveCounter::new();
        let relay = WatermarkRelay::new(2);
        let notified = Arc::new(AtomicU64::new(0));
        {
            let notified = notified.clone();
            relay.set_notifier(Arc::new(move |_| {
                notified.fetch_add(1, Ordering::SeqCst);
            }));
        }
        relay.reopen();

        relay.publish(frame(0, &live));
        relay.publish(frame(1, &live));
        assert_eq!(notified.load(Ordering::SeqCst), 0);
        relay.publish(frame(2, &live));
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drawn_frames_recycled_by_publisher() {
        let live = LiveCounter::new();
        let relay = WatermarkRelay::new(1);
        relay.reopen();

        for seq in 0..2 {
            relay.publish(frame(seq, &live));
        }
        for _ in 0..2 {
            let f = relay.acquire_latest(Some(Duration::ZERO)).into_frame().unwrap();
            relay.release_after_draw(f);
        }
        assert_eq!(relay.outgoing_depth(), 2);

        relay.publish(frame(2, &live));
        assert_eq!(relay.outgoing_depth(), 1);
        assert_eq!(relay.stats().recycled, 1);
        assert_eq!(live.live(), 2);
    }

    #[test]
    fn shutdown_releases_both_queues() {
        let live = LiveCounter::new();
        let relay = WatermarkRelay::new(3);
        relay.reopen();
        for seq in 0..3 {
            relay.publish(frame(seq, &live));
        }
        let drawn = relay.acquire_latest(None).into_frame().unwrap();
        relay.release_after_draw(drawn);
        let held = relay.acquire_latest(None).into_frame().unwrap();

        assert_eq!(relay.shutdown(), 2);
        assert!(matches!(relay.acquire_latest(None), Acquire::Closed));
        assert_eq!(live.live(), 1);

        relay.release_after_draw(held);
        assert_eq!(live.live(), 0);
        assert_eq!(relay.publish(frame(9, &live)), Publish::Rejected);
        assert_eq!(live.live(), 0);
    }

    #[test]
    fn zero_watermark_clamped() {
        assert_eq!(WatermarkRelay::new(0).watermark(), 1);
    }

    #[test]
    fn drain_announces_frames_left_below_watermark() {
        let live = LiveCounter::new();
        let relay = Arc::new(WatermarkRelay::new(3));
        let (tx, rx) = crossbeam::channel::unbounded();
        relay.set_notifier(Arc::new(move |seq| {
            let _ = tx.send(seq);
        }));
        relay.reopen();
        for seq in 0..3 {
            relay.publish(frame(seq, &live));
        }
        assert!(rx.try_recv().is_err());

        let renderer = {
            let relay = relay.clone();
            std::thread::spawn(move || {
                let mut drawn = Vec::new();
                while drawn.len() < 3 {
                    rx.recv_timeout(Duration::from_secs(5)).expect("drain never announced");
                    if let Acquire::Frame(f) = relay.acquire_latest(Some(Duration::from_secs(1))) {
                        drawn.push(f.sequence());
                        relay.release_after_draw(f);
                    }
                }
                drawn
            })
        };

        assert!(relay.drain(Duration::from_secs(5)));
        assert_eq!(renderer.join().unwrap(), vec![0, 1, 2]);
        assert_eq!(relay.incoming_depth(), 0);
    }

    #[test]
    fn drain_gives_up_without_a_renderer() {
        let live = LiveCounter::new();
        let relay = WatermarkRelay::new(3);
        relay.reopen();
        relay.publish(frame(0, &live));
        assert!(!relay.drain(Duration::from_millis(20)));
        assert_eq!(relay.incoming_depth(), 1);

        relay.shutdown();
        assert!(relay.drain(Duration::from_millis(20)));
    }
}
