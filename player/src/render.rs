//! The render-thread side of the frame handoff.
//!
//! Headless: "drawing" a frame means binding its texture to the current
//! display quad and recording it. The handoff protocol is the real one.

use std::sync::Arc;
use std::time::Duration;

use bb_common::VideoGeometry;
use bb_handoff::{Acquire, FrameRelay};

use crate::config::Viewport;

/// Aspect-preserving fit of the video into the viewport.
///
/// One axis always spans the full viewport; the other is shrunk, leaving
/// letterbox (top/bottom) or pillarbox (left/right) bars.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayTransform {
    pub scale_x: f64,
    pub scale_y: f64,
}

impl Default for DisplayTransform {
    fn default() -> Self {
        Self {
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }
}

impl DisplayTransform {
    pub fn fit(viewport: Viewport, video: VideoGeometry) -> Self {
        if video.is_empty() || viewport.width == 0 || viewport.height == 0 {
            return Self::default();
        }
        let (vw, vh) = (viewport.width as f64, viewport.height as f64);
        let (sw, sh) = (video.width as f64, video.height as f64);
        let scaled_width = vw / sw;
        let scaled_height = vh / sh;

        if scaled_width < scaled_height {
            // Width-bound: bars above and below.
            Self {
                scale_x: 1.0,
                scale_y: (sh * vw / sw) / vh,
            }
        } else if scaled_width > scaled_height {
            Self {
                scale_x: (sw * vh / sh) / vw,
                scale_y: 1.0,
            }
        } else {
            Self::default()
        }
    }

    /// Pixel rectangle `(x, y, width, height)` the video covers.
    pub fn pixel_rect(&self, viewport: Viewport) -> (u32, u32, u32, u32) {
        let w = (viewport.width as f64 * self.scale_x).round() as u32;
        let h = (viewport.height as f64 * self.scale_y).round() as u32;
        ((viewport.width - w) / 2, (viewport.height - h) / 2, w, h)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub frames_drawn: u64,
    pub empty_polls: u64,
    pub out_of_order: u64,
    /// Frames released without drawing: no sampling path for their format.
    pub unsupported_format: u64,
}

/// Single-threaded consumer of the frame relay.
pub struct RenderConsumer {
    relay: Arc<dyn FrameRelay>,
    viewport: Viewport,
    transform: DisplayTransform,
    last_sequence: Option<u64>,
    stats: RenderStats,
}

impl RenderConsumer {
    pub fn new(relay: Arc<dyn FrameRelay>, viewport: Viewport) -> Self {
        Self {
            relay,
            viewport,
            transform: DisplayTransform::default(),
            last_sequence: None,
            stats: RenderStats::default(),
        }
    }

    /// New source: recompute the quad and restart sequence tracking.
    pub fn on_geometry(&mut self, geometry: VideoGeometry) {
        self.transform = DisplayTransform::fit(self.viewport, geometry);
        self.last_sequence = None;
        let (x, y, w, h) = self.transform.pixel_rect(self.viewport);
        tracing::debug!(
            video = %geometry,
            x, y, w, h,
            "display transform updated"
        );
    }

    /// Acquires, draws and releases one frame. Returns the drawn sequence.
    pub fn draw_next(&mut self, timeout: Duration) -> Option<u64> {
        let frame = match self.relay.acquire_latest(Some(timeout)) {
            Acquire::Frame(frame) => frame,
            Acquire::TimedOut | Acquire::Closed => {
                self.stats.empty_polls += 1;
                return None;
            }
        };

        let sequence = frame.sequence();
        if self.last_sequence.is_some_and(|last| sequence <= last) {
            self.stats.out_of_order += 1;
            tracing::warn!(sequence, last = ?self.last_sequence, "frame out of order");
        }
        self.last_sequence = Some(sequence);

        if frame.format().is_packed_rgb() {
            self.stats.frames_drawn += 1;
            tracing::trace!(sequence, texture = %frame.texture(), "frame drawn");
        } else {
            self.stats.unsupported_format += 1;
            tracing::warn!(sequence, format = ?frame.format(), "no sampling path for frame format");
        }

        self.relay.release_after_draw(frame);
        Some(sequence)
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bb_common::{FrameBuffer, FrameMeta, PixelFormat, RelayConfig, TextureId};
    use bb_handoff::{build_relay, Publish};

    const HD: Viewport = Viewport {
        width: 1920,
        height: 1080,
    };

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn same_aspect_fills_viewport() {
        let t = DisplayTransform::fit(HD, VideoGeometry::new(1280, 720));
        assert_eq!(t, DisplayTransform::default());
        assert_eq!(t.pixel_rect(HD), (0, 0, 1920, 1080));
    }

    #[test]
    fn four_by_three_is_pillarboxed() {
        let t = DisplayTransform::fit(HD, VideoGeometry::new(640, 480));
        assert!(close(t.scale_y, 1.0));
        assert!(close(t.scale_x, 1440.0 / 1920.0));
        assert_eq!(t.pixel_rect(HD), (240, 0, 1440, 1080));
    }

    #[test]
    fn portrait_viewport_is_letterboxed() {
        let portrait = Viewport {
            width: 1080,
            height: 1920,
        };
        let t = DisplayTransform::fit(portrait, VideoGeometry::new(1920, 1080));
        assert!(close(t.scale_x, 1.0));
        assert!(close(t.scale_y, 607.5 / 1920.0));
    }

    #[test]
    fn draw_on_closed_relay_is_empty_poll() {
        let relay = build_relay(&RelayConfig::watermark(3));
        let mut consumer = RenderConsumer::new(relay, HD);
        assert_eq!(consumer.draw_next(Duration::from_millis(1)), None);
        assert_eq!(consumer.stats().empty_polls, 1);
    }

    #[test]
    fn planar_frame_released_without_drawing() {
        let relay = build_relay(&RelayConfig::watermark(3));
        relay.reopen();
        let frame = FrameBuffer::new(FrameMeta {
            texture: TextureId(5),
            format: PixelFormat::Nv12,
            geometry: VideoGeometry::new(640, 480),
            sequence: 0,
        });
        assert_eq!(relay.publish(frame), Publish::Queued);

        let mut consumer = RenderConsumer::new(relay.clone(), HD);
        assert_eq!(consumer.draw_next(Duration::from_millis(100)), Some(0));
        assert_eq!(consumer.stats().frames_drawn, 0);
        assert_eq!(consumer.stats().unsupported_format, 1);
        assert_eq!(relay.stats().drawn, 1);
    }
}
