//! `bb-pipeline`: Pipeline lifecycle for the Billboard playback core.
//!
//! ```text
//! caller (render thread)        controller thread            engine threads
//! ┌────────────────┐  command  ┌──────────────────┐  build  ┌──────────────┐
//! │ open / stop    │──────────►│ state machine    │────────►│ decode       │
//! │                │◄──────────│ STOPPED/PAUSED/  │◄────────│ publish ─────┼──► FrameRelay
//! │ PlayerEvent rx │  events   │ PLAYING          │  bus    │ bus events   │
//! └────────────────┘           └──────────────────┘         └──────────────┘
//! ```
//!
//! Context requests raised by the engine are answered on the engine's own
//! thread through the installed [`GraphicsContextBridge`]; only end-of-stream
//! and errors travel to the controller thread.

pub mod bridge;
pub mod controller;
pub mod engine;
pub mod synthetic;

#[cfg(feature = "gstreamer")]
pub mod gst_engine;

pub use bridge::{ContextAnswer, GlApi, GraphicsContextBridge, NativeContext, Platform};
pub use controller::PipelineController;
pub use engine::{ContextKind, DecodeEngine, EngineBus, EngineContext, EnginePipeline, PipelineEvent};
pub use synthetic::{FailPoint, SyntheticClip, SyntheticEngine};

#[cfg(feature = "gstreamer")]
pub use gst_engine::GstEngine;
