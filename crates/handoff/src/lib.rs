//! `bb-handoff`: Moving decoded frames from decode threads to the render thread.
//!
//! The decode engine calls [`FrameRelay::publish`] from its own threads; the
//! render loop calls [`FrameRelay::acquire_latest`], draws, and hands the frame
//! back through [`FrameRelay::release_after_draw`]. Two disciplines implement
//! the same trait:
//!
//! - [`RendezvousRelay`]: one frame in flight, `publish` blocks until drawn
//! - [`WatermarkRelay`]: incoming/outgoing [`HandoffQueue`]s bounded by a
//!   watermark, `publish` never blocks
//!
//! [`build_relay`] picks one from a [`RelayConfig`](bb_common::RelayConfig).

pub mod queue;
pub mod relay;
pub mod rendezvous;
pub mod watermark;

pub use queue::{Dequeue, HandoffQueue};
pub use relay::{build_relay, Acquire, FrameNotifier, FrameRelay, Publish, RelayStats};
pub use rendezvous::RendezvousRelay;
pub use watermark::WatermarkRelay;
