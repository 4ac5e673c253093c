//! The frame relay contract shared by both handoff strategies.

use std::sync::Arc;
use std::time::Duration;

use bb_common::{FrameBuffer, RelayConfig, RelayStrategy};

use crate::rendezvous::RendezvousRelay;
use crate::watermark::WatermarkRelay;

/// Called with the sequence number of a freshly available frame.
///
/// Invoked on the publishing (decode) thread while the relay holds its lock,
/// so it must not call back into the relay. Sending on a channel is fine.
pub type FrameNotifier = Arc<dyn Fn(u64) + Send + Sync>;

/// Outcome of [`FrameRelay::publish`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Publish {
    /// Rendezvous: drawn and released by the render thread.
    Delivered,
    /// Watermark: enqueued for the render thread.
    Queued,
    /// The relay was closed on entry; the frame was released immediately.
    Rejected,
    /// The relay shut down while the frame was pending; it was released.
    Cancelled,
}

/// Outcome of [`FrameRelay::acquire_latest`].
#[derive(Debug)]
pub enum Acquire {
    Frame(FrameBuffer),
    TimedOut,
    Closed,
}

impl Acquire {
    pub fn into_frame(self) -> Option<FrameBuffer> {
        match self {
            Self::Frame(frame) => Some(frame),
            Self::TimedOut | Self::Closed => None,
        }
    }
}

/// Counters accumulated over the relay's lifetime (not reset by reopen).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub published: u64,
    pub delivered: u64,
    pub drawn: u64,
    /// Undrawn frames evicted to keep the incoming queue bounded.
    pub dropped: u64,
    /// Drawn frames released by the decode side.
    pub recycled: u64,
    pub rejected: u64,
    pub released_on_shutdown: u64,
    pub max_incoming_depth: usize,
    pub max_outgoing_depth: usize,
}

/// Synchronization point between the decode engine and the render loop.
///
/// `publish` is called from decode-owned threads; `acquire_latest` and
/// `release_after_draw` from the render thread; `shutdown`/`reopen` from
/// the pipeline controller. A relay starts closed.
pub trait FrameRelay: Send + Sync {
    /// The handoff discipline this relay implements.
    fn strategy(&self) -> RelayStrategy;

    /// Hands a decoded frame to the render side. Rejects (and drops) the
    /// frame when the relay is closed; see [`Publish`] for the outcomes.
    fn publish(&self, frame: FrameBuffer) -> Publish;

    /// Takes the next frame, waiting at most `timeout` (`None` = until one
    /// arrives or the relay closes).
    fn acquire_latest(&self, timeout: Option<Duration>) -> Acquire;

    /// Returns a frame obtained from `acquire_latest` once it has been drawn.
    fn release_after_draw(&self, frame: FrameBuffer);

    /// Closes the relay, wakes every blocked caller and releases all frames
    /// still held inside it. Returns how many were released.
    fn shutdown(&self) -> usize;

    /// Gives the render thread up to `timeout` to take every frame still
    /// waiting in the relay, announcing them through the notifier. Called at
    /// end of stream, before shutdown. Returns false if frames were left.
    fn drain(&self, timeout: Duration) -> bool;

    /// Accepts frames again after [`FrameRelay::shutdown`].
    fn reopen(&self);

    /// False between [`FrameRelay::shutdown`] and [`FrameRelay::reopen`].
    fn is_open(&self) -> bool;

    /// Counters accumulated since construction, across reopens.
    fn stats(&self) -> RelayStats;

    /// Installs the callback fired when the render thread should acquire.
    /// It runs on the publishing thread under the relay's lock and must not
    /// call back into the relay.
    fn set_notifier(&self, notifier: FrameNotifier);
}

/// Builds the relay selected by `config`. The config is assumed validated.
pub fn build_relay(config: &RelayConfig) -> Arc<dyn FrameRelay> {
    match config.strategy {
        RelayStrategy::Rendezvous => Arc::new(RendezvousRelay::new()),
        RelayStrategy::Watermark => Arc::new(WatermarkRelay::new(config.watermark)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_relay_honours_strategy() {
        let a = build_relay(&RelayConfig::rendezvous());
        assert_eq!(a.strategy(), RelayStrategy::Rendezvous);
        let b = build_relay(&RelayConfig::watermark(4));
        assert_eq!(b.strategy(), RelayStrategy::Watermark);
    }

    #[test]
    fn relays_start_closed() {
        for config in [RelayConfig::rendezvous(), RelayConfig::watermark(3)] {
            let relay = build_relay(&config);
            assert!(!relay.is_open(), "{} relay should start closed", config.strategy);
            relay.reopen();
            assert!(relay.is_open());
        }
    }
}
