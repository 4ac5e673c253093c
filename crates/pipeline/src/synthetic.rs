//! In-process decode engine producing tagged test frames.
//!
//! Stands in for a real decoder wherever no media stack is available: smoke
//! runs of the player, and the controller's state-machine tests. Frames come
//! from a recycled texture-id pool whose slots are only returned when the
//! frame is dropped, so a leaked frame shows up as pool growth.
//!
//! Per-source overrides ride on the locator's query string:
//! `clip.mp4?width=640&height=360&frames=30&fps=0&error_after=10&fail=pause`.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bb_common::{
    FrameBuffer, FrameMeta, LiveCounter, LiveToken, PipelineError, PixelFormat, TextureId,
    VideoGeometry,
};
use bb_handoff::{FrameRelay, Publish};
use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::engine::{ContextKind, DecodeEngine, EngineBus, EngineContext, EnginePipeline, PipelineEvent};

const PREROLL_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Clip description
// ---------------------------------------------------------------------------

/// Where a synthetic pipeline should fail on purpose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailPoint {
    Build,
    Pause,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticClip {
    pub width: u32,
    pub height: u32,
    pub frames: u64,
    /// Production rate. 0 publishes as fast as the relay accepts.
    pub fps: u32,
    /// Raise a bus error instead of producing frame `n`.
    pub error_after: Option<u64>,
    pub fail: Option<FailPoint>,
}

impl Default for SyntheticClip {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frames: 120,
            fps: 60,
            error_after: None,
            fail: None,
        }
    }
}

impl SyntheticClip {
    /// Applies `key=value` overrides from the locator's query string.
    pub fn with_locator(&self, locator: &str) -> Result<Self, PipelineError> {
        let mut clip = self.clone();
        let Some((_, query)) = locator.split_once('?') else {
            return Ok(clip);
        };

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let bad = |what: &str| PipelineError::build(locator, format!("bad {what} '{value}'"));
            match key {
                "width" => clip.width = value.parse().map_err(|_| bad("width"))?,
                "height" => clip.height = value.parse().map_err(|_| bad("height"))?,
                "frames" => clip.frames = value.parse().map_err(|_| bad("frame count"))?,
                "fps" => clip.fps = value.parse().map_err(|_| bad("fps"))?,
                "error_after" => {
                    clip.error_after = Some(value.parse().map_err(|_| bad("error_after"))?)
                }
                "fail" => {
                    clip.fail = Some(match value {
                        "build" => FailPoint::Build,
                        "pause" => FailPoint::Pause,
                        _ => return Err(bad("fail point")),
                    })
                }
                other => tracing::warn!(locator, key = other, "ignoring unknown synthetic parameter"),
            }
        }
        Ok(clip)
    }

    pub fn geometry(&self) -> VideoGeometry {
        VideoGeometry::new(self.width, self.height)
    }

    fn frame_interval(&self) -> Option<Duration> {
        (self.fps > 0).then(|| Duration::from_secs_f64(1.0 / self.fps as f64))
    }
}

// ---------------------------------------------------------------------------
// Texture pool
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PoolInner {
    free: Vec<u32>,
    allocated: u32,
}

/// Hands out texture ids and takes them back when the holding frame drops.
#[derive(Clone, Default)]
struct TexturePool {
    inner: Arc<Mutex<PoolInner>>,
}

impl TexturePool {
    fn checkout(&self, live: Option<LiveToken>) -> PooledTexture {
        let mut inner = self.inner.lock();
        let id = match inner.free.pop() {
            Some(id) => id,
            None => {
                inner.allocated += 1;
                inner.allocated
            }
        };
        PooledTexture {
            id,
            pool: self.clone(),
            _live: live,
        }
    }

    fn allocated(&self) -> u32 {
        self.inner.lock().allocated
    }
}

/// Frame keepalive: returns its texture id to the pool on drop.
struct PooledTexture {
    id: u32,
    pool: TexturePool,
    _live: Option<LiveToken>,
}

impl Drop for PooledTexture {
    fn drop(&mut self) {
        self.pool.inner.lock().free.push(self.id);
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SyntheticEngine {
    defaults: SyntheticClip,
    pool: TexturePool,
    live: Option<LiveCounter>,
}

impl Default for SyntheticEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticEngine {
    pub fn new() -> Self {
        Self::with_clip(SyntheticClip::default())
    }

    pub fn with_clip(defaults: SyntheticClip) -> Self {
        Self {
            defaults,
            pool: TexturePool::default(),
            live: None,
        }
    }

    /// Attaches a token from `counter` to every produced frame.
    pub fn with_live_counter(mut self, counter: LiveCounter) -> Self {
        self.live = Some(counter);
        self
    }

    /// Reports how many distinct texture ids the engine has created, still
    /// readable after the engine moved into a controller.
    pub fn texture_counter(&self) -> impl Fn() -> u32 + Send + Sync + 'static {
        let pool = self.pool.clone();
        move || pool.allocated()
    }
}

impl DecodeEngine for SyntheticEngine {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn build(
        &mut self,
        locator: &str,
        ctx: EngineContext,
    ) -> Result<Box<dyn EnginePipeline>, PipelineError> {
        let clip = self.defaults.with_locator(locator)?;
        if clip.fail == Some(FailPoint::Build) {
            return Err(PipelineError::build(locator, "synthetic construction failure"));
        }
        tracing::debug!(
            locator,
            width = clip.width,
            height = clip.height,
            frames = clip.frames,
            fps = clip.fps,
            "synthetic pipeline built"
        );
        Ok(Box::new(SyntheticPipeline {
            clip,
            ctx,
            pool: self.pool.clone(),
            live: self.live.clone(),
            cmd_tx: None,
            worker: None,
        }))
    }
}

enum ProducerCommand {
    Play,
    Stop,
}

struct SyntheticPipeline {
    clip: SyntheticClip,
    ctx: EngineContext,
    pool: TexturePool,
    live: Option<LiveCounter>,
    cmd_tx: Option<Sender<ProducerCommand>>,
    worker: Option<JoinHandle<()>>,
}

impl EnginePipeline for SyntheticPipeline {
    fn pause(&mut self) -> Result<VideoGeometry, PipelineError> {
        if self.clip.fail == Some(FailPoint::Pause) {
            return Err(PipelineError::state_change("Paused", "synthetic preroll failure"));
        }

        let (cmd_tx, cmd_rx) = channel::unbounded();
        let (preroll_tx, preroll_rx) = channel::bounded(1);
        let producer = Producer {
            clip: self.clip.clone(),
            relay: self.ctx.relay.clone(),
            bus: self.ctx.bus.clone(),
            pool: self.pool.clone(),
            live: self.live.clone(),
        };

        let handle = thread::Builder::new()
            .name("synthetic-decode".to_string())
            .spawn(move || producer.run(preroll_tx, cmd_rx))
            .map_err(|e| PipelineError::Engine(format!("failed to spawn decode thread: {e}")))?;
        self.cmd_tx = Some(cmd_tx);
        self.worker = Some(handle);

        preroll_rx
            .recv_timeout(PREROLL_TIMEOUT)
            .map_err(|_| PipelineError::state_change("Paused", "preroll timed out"))
    }

    fn play(&mut self) -> Result<(), PipelineError> {
        let tx = self
            .cmd_tx
            .as_ref()
            .ok_or_else(|| PipelineError::state_change("Playing", "pipeline not prerolled"))?;
        tx.send(ProducerCommand::Play)
            .map_err(|_| PipelineError::Engine("synthetic decode thread exited".into()))
    }

    fn teardown(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(ProducerCommand::Stop);
        }
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::error!("synthetic decode thread panicked");
            }
        }
    }
}

impl Drop for SyntheticPipeline {
    fn drop(&mut self) {
        self.teardown();
    }
}

// ---------------------------------------------------------------------------
// Decode thread
// ---------------------------------------------------------------------------

struct Producer {
    clip: SyntheticClip,
    relay: Arc<dyn FrameRelay>,
    bus: EngineBus,
    pool: TexturePool,
    live: Option<LiveCounter>,
}

impl Producer {
    fn run(self, preroll_tx: Sender<VideoGeometry>, cmd_rx: Receiver<ProducerCommand>) {
        if self.bus.has_bridge() {
            for kind in [ContextKind::Display, ContextKind::Application] {
                let answer = self.bus.dispatch(PipelineEvent::ContextRequested(kind.clone()));
                tracing::debug!(%kind, shared = answer.is_some(), "synthetic context request");
            }
        }

        if preroll_tx.send(self.clip.geometry()).is_err() {
            return;
        }

        match cmd_rx.recv() {
            Ok(ProducerCommand::Play) => tracing::debug!("synthetic decode: play"),
            Ok(ProducerCommand::Stop) | Err(_) => {
                tracing::debug!("synthetic decode: stopped before play");
                return;
            }
        }

        let interval = self.clip.frame_interval();
        for sequence in 0..self.clip.frames {
            match cmd_rx.try_recv() {
                Ok(ProducerCommand::Stop) | Err(TryRecvError::Disconnected) => {
                    tracing::debug!(sequence, "synthetic decode: stop command received");
                    return;
                }
                Ok(ProducerCommand::Play) | Err(TryRecvError::Empty) => {}
            }

            if self.clip.error_after == Some(sequence) {
                self.bus
                    .error(format!("synthetic decode error at frame {sequence}"));
                return;
            }

            let texture = self.pool.checkout(self.live.as_ref().map(LiveCounter::token));
            let meta = FrameMeta {
                texture: TextureId(texture.id),
                format: PixelFormat::Rgba,
                geometry: self.clip.geometry(),
                sequence,
            };
            match self.relay.publish(FrameBuffer::with_keepalive(meta, texture)) {
                Publish::Delivered | Publish::Queued => {}
                Publish::Rejected | Publish::Cancelled => {
                    tracing::debug!(sequence, "relay closed, synthetic decode exiting");
                    return;
                }
            }
            if sequence == 0 {
                tracing::info!(
                    "synthetic decode: first frame sent ({}x{})",
                    self.clip.width,
                    self.clip.height
                );
            }

            if let Some(interval) = interval {
                thread::sleep(interval);
            }
        }

        tracing::debug!(frames = self.clip.frames, "synthetic decode: end of stream");
        self.bus.end_of_stream();
    }
}
