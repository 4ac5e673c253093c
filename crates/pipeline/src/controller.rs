//! Pipeline controller: owns the lifecycle state machine.
//!
//! ```text
//!            open ok                 play ok
//! STOPPED ──────────────► PAUSED ──────────────► PLAYING
//!    ▲   (geometry emitted here)                    │
//!    └──── stop / EOS (+finished) / error (+failed) ┘
//! ```
//!
//! All transitions run on the `pipeline-controller` thread. `open`/`stop`
//! only enqueue a command; bus events from engine threads arrive on the same
//! channel, so the state machine never sees concurrent mutation.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bb_common::{
    FinishReason, PipelineCommand, PipelineError, PipelineState, PlayerEvent, SharedState,
};
use bb_handoff::FrameRelay;
use crossbeam::channel::{self, Receiver, Sender};

use crate::bridge::GraphicsContextBridge;
use crate::engine::{DecodeEngine, EngineBus, EngineContext, EnginePipeline, PipelineEvent};

/// How long end of stream waits for the renderer to take queued frames.
const EOS_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Everything the controller thread reacts to.
#[derive(Debug)]
pub(crate) enum ControlMsg {
    Command(PipelineCommand),
    Bus { generation: u64, event: PipelineEvent },
    Shutdown,
}

// ---------------------------------------------------------------------------
// Public handle
// ---------------------------------------------------------------------------

/// Handle to the pipeline-owning thread.
///
/// Dropping it stops any active pipeline and joins the thread.
pub struct PipelineController {
    cmd_tx: Sender<ControlMsg>,
    state: SharedState,
    relay: Arc<dyn FrameRelay>,
    worker: Option<JoinHandle<()>>,
}

impl PipelineController {
    /// Starts the controller thread.
    ///
    /// Outward notifications are sent on `events`. The relay's frame
    /// notifier is wired to emit [`PlayerEvent::FrameReady`] on it.
    pub fn spawn(
        engine: Box<dyn DecodeEngine>,
        relay: Arc<dyn FrameRelay>,
        bridge: Option<Arc<GraphicsContextBridge>>,
        events: Sender<PlayerEvent>,
    ) -> Result<Self, PipelineError> {
        let (cmd_tx, cmd_rx) = channel::unbounded::<ControlMsg>();
        let state = SharedState::new();

        {
            let events = events.clone();
            relay.set_notifier(Arc::new(move |sequence| {
                let _ = events.send(PlayerEvent::FrameReady { sequence });
            }));
        }

        let worker = Worker {
            engine,
            relay: relay.clone(),
            bridge,
            events,
            state: state.clone(),
            bus_tx: cmd_tx.clone(),
            generation: 0,
            active: None,
        };

        let handle = thread::Builder::new()
            .name("pipeline-controller".to_string())
            .spawn(move || worker.run(cmd_rx))
            .map_err(|e| PipelineError::Engine(format!("failed to spawn controller thread: {e}")))?;

        Ok(Self {
            cmd_tx,
            state,
            relay,
            worker: Some(handle),
        })
    }

    /// Requests that `locator` be opened. Returns once the request is queued.
    pub fn open(&self, locator: impl Into<String>) -> Result<(), PipelineError> {
        self.send(PipelineCommand::Open(locator.into()))
    }

    /// Requests a stop. A no-op if nothing is playing.
    pub fn stop(&self) -> Result<(), PipelineError> {
        self.send(PipelineCommand::Stop)
    }

    pub fn state(&self) -> PipelineState {
        self.state.load()
    }

    pub fn relay(&self) -> &Arc<dyn FrameRelay> {
        &self.relay
    }

    fn send(&self, command: PipelineCommand) -> Result<(), PipelineError> {
        self.cmd_tx
            .send(ControlMsg::Command(command))
            .map_err(|_| PipelineError::ControllerGone)
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(ControlMsg::Shutdown);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::error!("pipeline controller thread panicked");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Controller thread
// ---------------------------------------------------------------------------

struct Worker {
    engine: Box<dyn DecodeEngine>,
    relay: Arc<dyn FrameRelay>,
    bridge: Option<Arc<GraphicsContextBridge>>,
    events: Sender<PlayerEvent>,
    state: SharedState,
    /// Cloned into every pipeline's [`EngineBus`].
    bus_tx: Sender<ControlMsg>,
    generation: u64,
    active: Option<Box<dyn EnginePipeline>>,
}

impl Worker {
    fn run(mut self, rx: Receiver<ControlMsg>) {
        tracing::info!(
            engine = self.engine.name(),
            strategy = %self.relay.strategy(),
            "pipeline controller started"
        );
        while let Ok(msg) = rx.recv() {
            match msg {
                ControlMsg::Command(PipelineCommand::Open(locator)) => self.open(&locator),
                ControlMsg::Command(PipelineCommand::Stop) => {
                    if !self.stop() {
                        tracing::debug!("stop requested while stopped");
                    }
                }
                ControlMsg::Bus { generation, event } => self.on_bus(generation, event),
                ControlMsg::Shutdown => break,
            }
        }
        self.stop();
        tracing::info!("pipeline controller exiting");
    }

    fn open(&mut self, locator: &str) {
        if self.stop() {
            tracing::debug!(locator, "stopped previous pipeline before open");
        }

        self.generation += 1;
        let generation = self.generation;
        tracing::info!(generation, locator, "opening source");

        let ctx = EngineContext {
            relay: self.relay.clone(),
            bus: EngineBus::new(generation, self.bus_tx.clone(), self.bridge.clone()),
        };

        let mut pipeline = match self.engine.build(locator, ctx) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                tracing::error!(generation, "pipeline construction failed: {e}");
                self.emit(PlayerEvent::Finished(FinishReason::Failed(e.to_string())));
                return;
            }
        };

        let geometry = match pipeline.pause() {
            Ok(geometry) if !geometry.is_empty() => geometry,
            Ok(geometry) => {
                pipeline.teardown();
                let e = PipelineError::state_change(
                    PipelineState::Paused.label(),
                    format!("no usable geometry negotiated ({geometry})"),
                );
                tracing::error!(generation, "{e}");
                self.emit(PlayerEvent::Finished(FinishReason::Failed(e.to_string())));
                return;
            }
            Err(e) => {
                pipeline.teardown();
                tracing::error!(generation, "pipeline failed to preroll: {e}");
                self.emit(PlayerEvent::Finished(FinishReason::Failed(e.to_string())));
                return;
            }
        };

        self.active = Some(pipeline);
        self.set_state(PipelineState::Paused);
        tracing::info!(
            generation,
            width = geometry.width,
            height = geometry.height,
            "stream geometry known"
        );
        self.emit(PlayerEvent::GeometryKnown(geometry));

        // Frames may flow only once the geometry is out.
        self.relay.reopen();

        let played = match self.active.as_mut() {
            Some(pipeline) => pipeline.play(),
            None => return,
        };
        match played {
            Ok(()) => self.set_state(PipelineState::Playing),
            Err(e) => {
                tracing::error!(generation, "pipeline failed to start playing: {e}");
                self.stop();
                self.emit(PlayerEvent::Finished(FinishReason::Failed(e.to_string())));
            }
        }
    }

    /// Tears the active pipeline down. Returns false if there was none.
    fn stop(&mut self) -> bool {
        let Some(mut pipeline) = self.active.take() else {
            return false;
        };

        // Wake any publisher or acquirer first, then free the engine, then
        // release whatever the engine pushed while winding down.
        let released = self.relay.shutdown();
        pipeline.teardown();
        let late = self.relay.shutdown();

        self.set_state(PipelineState::Stopped);
        tracing::info!(
            generation = self.generation,
            released = released + late,
            "pipeline stopped"
        );
        true
    }

    fn on_bus(&mut self, generation: u64, event: PipelineEvent) {
        if generation != self.generation || self.active.is_none() {
            tracing::debug!(generation, current = self.generation, ?event, "stale bus message dropped");
            return;
        }
        match event {
            PipelineEvent::EndOfStream => {
                tracing::info!(generation, "end of stream");
                if !self.relay.drain(EOS_DRAIN_TIMEOUT) {
                    tracing::warn!(generation, "renderer left frames undrawn at end of stream");
                }
                self.stop();
                self.emit(PlayerEvent::Finished(FinishReason::Completed));
            }
            PipelineEvent::Error(message) => {
                tracing::error!(generation, "decode error: {message}");
                self.stop();
                self.emit(PlayerEvent::Finished(FinishReason::Failed(message)));
            }
            PipelineEvent::ContextRequested(kind) => {
                // EngineBus answers these inline; nothing to do here.
                tracing::warn!(generation, %kind, "context request reached the controller");
            }
        }
    }

    fn set_state(&mut self, next: PipelineState) {
        let previous = self.state.store(next);
        if previous != next {
            tracing::debug!(from = previous.label(), to = next.label(), "pipeline state");
            self.emit(PlayerEvent::StateChanged(next));
        }
    }

    fn emit(&self, event: PlayerEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("event receiver gone");
        }
    }
}
