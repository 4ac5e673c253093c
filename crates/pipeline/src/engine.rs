//! The seam between the controller and a decode engine.
//!
//! A [`DecodeEngine`] builds one [`EnginePipeline`] per opened source. The
//! pipeline publishes frames into the relay from its own threads and reports
//! bus events through the [`EngineBus`] it was built with.

use std::fmt;
use std::sync::Arc;

use bb_common::{PipelineError, VideoGeometry};
use bb_handoff::FrameRelay;
use crossbeam::channel::Sender;

use crate::bridge::{ContextAnswer, GraphicsContextBridge};
use crate::controller::ControlMsg;

/// Context type names used by GL-capable decode engines.
pub const GL_DISPLAY_CONTEXT_TYPE: &str = "gst.gl.GLDisplay";
pub const GL_APP_CONTEXT_TYPE: &str = "gst.gl.app_context";

/// Which shared graphics object the engine is asking for.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ContextKind {
    Display,
    Application,
    Other(String),
}

impl ContextKind {
    pub fn from_type_name(name: &str) -> Self {
        match name {
            GL_DISPLAY_CONTEXT_TYPE => Self::Display,
            GL_APP_CONTEXT_TYPE => Self::Application,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Self::Display => GL_DISPLAY_CONTEXT_TYPE,
            Self::Application => GL_APP_CONTEXT_TYPE,
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Event raised on the decode engine's bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineEvent {
    EndOfStream,
    Error(String),
    ContextRequested(ContextKind),
}

/// Per-pipeline handle to the controller, cloned into engine threads.
///
/// Stamped with the generation of the `open` that created it, so events
/// from a pipeline that has since been torn down are discarded.
#[derive(Clone)]
pub struct EngineBus {
    generation: u64,
    tx: Sender<ControlMsg>,
    bridge: Option<Arc<GraphicsContextBridge>>,
}

impl EngineBus {
    pub(crate) fn new(
        generation: u64,
        tx: Sender<ControlMsg>,
        bridge: Option<Arc<GraphicsContextBridge>>,
    ) -> Self {
        Self {
            generation,
            tx,
            bridge,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_bridge(&self) -> bool {
        self.bridge.is_some()
    }

    /// Delivers one bus event.
    ///
    /// Context requests are answered right here on the calling thread, since
    /// the engine blocks until it has an answer. Everything else is queued to
    /// the controller thread and `None` is returned.
    pub fn dispatch(&self, event: PipelineEvent) -> Option<ContextAnswer> {
        match event {
            PipelineEvent::ContextRequested(kind) => {
                let answer = self.bridge.as_ref().and_then(|bridge| bridge.answer(&kind));
                match &answer {
                    Some(_) => tracing::debug!(
                        generation = self.generation,
                        kind = %kind,
                        "answered context request"
                    ),
                    None => tracing::debug!(
                        generation = self.generation,
                        kind = %kind,
                        "no shared context for request"
                    ),
                }
                answer
            }
            event => {
                let msg = ControlMsg::Bus {
                    generation: self.generation,
                    event,
                };
                if self.tx.send(msg).is_err() {
                    tracing::debug!(generation = self.generation, "controller gone, bus event dropped");
                }
                None
            }
        }
    }

    pub fn end_of_stream(&self) {
        self.dispatch(PipelineEvent::EndOfStream);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.dispatch(PipelineEvent::Error(message.into()));
    }
}

impl fmt::Debug for EngineBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBus")
            .field("generation", &self.generation)
            .field("bridge", &self.bridge.is_some())
            .finish()
    }
}

/// Everything a pipeline needs from the controller.
#[derive(Clone)]
pub struct EngineContext {
    pub relay: Arc<dyn FrameRelay>,
    pub bus: EngineBus,
}

/// Builds decode pipelines. Owned by the controller thread.
pub trait DecodeEngine: Send {
    fn name(&self) -> &'static str;

    /// Constructs (but does not start) a pipeline for `locator`.
    fn build(
        &mut self,
        locator: &str,
        ctx: EngineContext,
    ) -> Result<Box<dyn EnginePipeline>, PipelineError>;
}

/// One constructed decode pipeline.
pub trait EnginePipeline: Send {
    /// Brings the pipeline to a stable paused state and returns the
    /// negotiated geometry. Blocks until prerolled.
    fn pause(&mut self) -> Result<VideoGeometry, PipelineError>;

    fn play(&mut self) -> Result<(), PipelineError>;

    /// Releases every engine resource and joins engine threads. The relay
    /// has been shut down before this is called. Must be idempotent.
    fn teardown(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{GlApi, NativeContext};
    use crossbeam::channel;

    #[test]
    fn context_kind_type_names() {
        assert_eq!(ContextKind::from_type_name("gst.gl.GLDisplay"), ContextKind::Display);
        assert_eq!(ContextKind::from_type_name("gst.gl.app_context"), ContextKind::Application);
        let other = ContextKind::from_type_name("gst.vaapi.Display");
        assert_eq!(other, ContextKind::Other("gst.vaapi.Display".into()));
        assert_eq!(other.type_name(), "gst.vaapi.Display");
    }

    #[test]
    fn context_requests_answered_inline() {
        let (tx, rx) = channel::unbounded();
        let bridge = GraphicsContextBridge::new(
            NativeContext::Glx {
                display: 1,
                context: 2,
            },
            GlApi::OpenGl,
        )
        .unwrap();
        let bus = EngineBus::new(4, tx, Some(Arc::new(bridge)));

        let answer = bus.dispatch(PipelineEvent::ContextRequested(ContextKind::Display));
        assert!(answer.is_some());
        assert!(rx.try_recv().is_err(), "context requests never reach the controller");
    }

    #[test]
    fn other_events_forwarded_with_generation() {
        let (tx, rx) = channel::unbounded();
        let bus = EngineBus::new(7, tx, None);
        assert_eq!(bus.dispatch(PipelineEvent::ContextRequested(ContextKind::Display)), None);

        bus.error("boom");
        match rx.try_recv().unwrap() {
            ControlMsg::Bus { generation, event } => {
                assert_eq!(generation, 7);
                assert_eq!(event, PipelineEvent::Error("boom".into()));
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
}
