//! The signage loop: walks the playlist, holds images, plays videos through
//! the pipeline controller and draws their frames.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use bb_common::{FinishReason, PlayerEvent};
use bb_handoff::build_relay;
use bb_pipeline::{DecodeEngine, GraphicsContextBridge, PipelineController};
use crossbeam::channel::{self, Receiver, RecvTimeoutError};

use crate::config::PlayerConfig;
use crate::playlist::{EntryKind, Playlist, PlaylistEntry};
use crate::render::RenderConsumer;

/// How long the render side waits for a frame after a notification.
const FRAME_WAIT: Duration = Duration::from_millis(50);

/// Redraw cadence when no event arrives. Picks up frames queued below the
/// watermark, which raise no notification.
const REPAINT_INTERVAL: Duration = Duration::from_millis(16);

/// Quiet period that ends the discard of a stopped video's late events.
const SETTLE: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaybackSummary {
    pub videos_completed: u32,
    pub failures: u32,
    pub stalls: u32,
    pub images_shown: u32,
    pub frames_drawn: u64,
}

#[derive(Debug, PartialEq, Eq)]
enum VideoOutcome {
    Finished(FinishReason),
    Stalled,
}

pub struct SignageApp {
    config: PlayerConfig,
    playlist: Playlist,
    controller: PipelineController,
    events: Receiver<PlayerEvent>,
    consumer: RenderConsumer,
    summary: PlaybackSummary,
}

impl SignageApp {
    pub fn new(
        config: PlayerConfig,
        playlist: Playlist,
        engine: Box<dyn DecodeEngine>,
        bridge: Option<Arc<GraphicsContextBridge>>,
    ) -> anyhow::Result<Self> {
        let relay = build_relay(&config.relay);
        let (events_tx, events) = channel::unbounded();
        let controller = PipelineController::spawn(engine, relay.clone(), bridge, events_tx)
            .context("failed to start pipeline controller")?;
        let consumer = RenderConsumer::new(relay, config.viewport);

        tracing::info!(
            strategy = %config.relay.strategy,
            watermark = config.relay.watermark,
            entries = playlist.len(),
            "signage app ready"
        );

        Ok(Self {
            config,
            playlist,
            controller,
            events,
            consumer,
            summary: PlaybackSummary::default(),
        })
    }

    /// Cycles the playlist. With `loops`, returns after that many full passes;
    /// otherwise runs until an unrecoverable error.
    pub fn run(mut self, loops: Option<u32>) -> anyhow::Result<PlaybackSummary> {
        loop {
            let entry = self.playlist.next().clone();
            if loops.is_some_and(|max| self.playlist.passes() >= max) {
                break;
            }
            match entry.kind {
                EntryKind::Image => self.show_image(&entry),
                EntryKind::Video => self.play_video(&entry)?,
            }
        }

        self.controller.stop()?;
        self.summary.frames_drawn = self.consumer.stats().frames_drawn;
        let relay_stats = self.controller.relay().stats();
        tracing::info!(
            passes = self.playlist.passes(),
            videos = self.summary.videos_completed,
            failures = self.summary.failures,
            stalls = self.summary.stalls,
            images = self.summary.images_shown,
            frames_drawn = self.summary.frames_drawn,
            frames_dropped = relay_stats.dropped,
            "playback finished"
        );
        Ok(self.summary)
    }

    fn show_image(&mut self, entry: &PlaylistEntry) {
        let hold = entry
            .duration
            .unwrap_or_else(|| self.config.default_image_duration());
        tracing::info!(path = %entry.path, ?hold, "showing image");
        std::thread::sleep(hold);
        self.summary.images_shown += 1;
    }

    fn play_video(&mut self, entry: &PlaylistEntry) -> anyhow::Result<()> {
        tracing::info!(path = %entry.path, "playing video");
        self.controller.open(entry.path.as_str())?;

        match self.pump_until_finished()? {
            VideoOutcome::Finished(FinishReason::Completed) => {
                self.summary.videos_completed += 1;
            }
            VideoOutcome::Finished(FinishReason::Failed(reason)) => {
                tracing::warn!(path = %entry.path, %reason, "video failed");
                self.summary.failures += 1;
                std::thread::sleep(self.config.error_hold());
            }
            VideoOutcome::Stalled => {
                tracing::warn!(
                    path = %entry.path,
                    timeout = ?self.config.stall_timeout(),
                    "video stalled, stopping"
                );
                self.controller.stop()?;
                let discarded = self.discard_late_events();
                tracing::debug!(discarded, "dropped events of the stalled video");
                self.summary.stalls += 1;
                self.summary.failures += 1;
                std::thread::sleep(self.config.error_hold());
            }
        }
        Ok(())
    }

    /// Render loop for one video: draws on every frame notification until
    /// the controller reports the source finished.
    fn pump_until_finished(&mut self) -> anyhow::Result<VideoOutcome> {
        let stall_timeout = self.config.stall_timeout();
        let mut last_activity = Instant::now();

        loop {
            let remaining = stall_timeout.saturating_sub(last_activity.elapsed());
            if remaining.is_zero() {
                return Ok(VideoOutcome::Stalled);
            }
            let event = match self.events.recv_timeout(remaining.min(REPAINT_INTERVAL)) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => {
                    self.consumer.draw_next(Duration::ZERO);
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => bail!("pipeline controller went away"),
            };
            last_activity = Instant::now();

            match event {
                PlayerEvent::StateChanged(state) => tracing::debug!(%state, "pipeline state"),
                PlayerEvent::GeometryKnown(geometry) => self.consumer.on_geometry(geometry),
                PlayerEvent::FrameReady { .. } => {
                    self.consumer.draw_next(FRAME_WAIT);
                }
                PlayerEvent::Finished(reason) => return Ok(VideoOutcome::Finished(reason)),
            }
        }
    }

    /// Throws away whatever the stopped video still had in flight, including
    /// a `Finished` raced in just before the stop, so it cannot be credited
    /// to the next entry. Returns how many events were dropped.
    fn discard_late_events(&mut self) -> usize {
        let mut discarded = 0;
        while self.events.recv_timeout(SETTLE).is_ok() {
            discarded += 1;
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bb_common::RelayConfig;
    use bb_pipeline::{SyntheticClip, SyntheticEngine};

    fn config(relay: RelayConfig) -> PlayerConfig {
        PlayerConfig {
            relay,
            error_hold_ms: 0,
            stall_timeout_ms: 5_000,
            ..PlayerConfig::default()
        }
    }

    fn engine() -> Box<dyn DecodeEngine> {
        Box::new(SyntheticEngine::with_clip(SyntheticClip {
            width: 640,
            height: 480,
            frames: 10,
            fps: 0,
            ..SyntheticClip::default()
        }))
    }

    #[test]
    fn one_pass_over_mixed_playlist() {
        for relay in [RelayConfig::rendezvous(), RelayConfig::watermark(2)] {
            let playlist = Playlist::from_json(
                r#"{ "entries": [
                    { "type": "video", "path": "a.mp4" },
                    { "type": "image", "path": "b.png", "durationMillis": 1 },
                    { "type": "video", "path": "c.mp4?error_after=3" },
                    { "type": "video", "path": "d.mp4?fail=build" }
                ] }"#,
            )
            .unwrap();
            let app = SignageApp::new(config(relay), playlist, engine(), None).unwrap();
            let summary = app.run(Some(1)).unwrap();

            assert_eq!(summary.videos_completed, 1);
            assert_eq!(summary.failures, 2);
            assert_eq!(summary.stalls, 0);
            assert_eq!(summary.images_shown, 1);
            assert!(summary.frames_drawn > 0);
        }
    }

    #[test]
    fn rendezvous_draws_every_frame_of_each_pass() {
        let playlist =
            Playlist::from_json(r#"{ "entries": [ { "type": "video", "path": "a.mp4" } ] }"#)
                .unwrap();
        let app =
            SignageApp::new(config(RelayConfig::rendezvous()), playlist, engine(), None).unwrap();
        let summary = app.run(Some(3)).unwrap();

        assert_eq!(summary.videos_completed, 3);
        assert_eq!(summary.frames_drawn, 30);
    }

    #[test]
    fn watermark_draws_clip_shorter_than_watermark() {
        let playlist = Playlist::from_json(
            r#"{ "entries": [ { "type": "video", "path": "a.mp4?frames=3" } ] }"#,
        )
        .unwrap();
        let app =
            SignageApp::new(config(RelayConfig::watermark(3)), playlist, engine(), None).unwrap();
        let summary = app.run(Some(2)).unwrap();

        assert_eq!(summary.videos_completed, 2);
        assert_eq!(summary.frames_drawn, 6);
    }

    #[test]
    fn stalled_video_is_stopped_and_next_entry_plays() {
        for relay in [RelayConfig::rendezvous(), RelayConfig::watermark(2)] {
            let playlist = Playlist::from_json(
                r#"{ "entries": [
                    { "type": "video", "path": "slow.mp4?fps=2&frames=4" },
                    { "type": "video", "path": "fast.mp4" }
                ] }"#,
            )
            .unwrap();
            let config = PlayerConfig {
                stall_timeout_ms: 150,
                ..config(relay)
            };
            let app = SignageApp::new(config, playlist, engine(), None).unwrap();
            let summary = app.run(Some(1)).unwrap();

            assert_eq!(summary.stalls, 1);
            assert_eq!(summary.failures, 1);
            assert_eq!(summary.videos_completed, 1);
        }
    }
}
