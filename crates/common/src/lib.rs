//! `bb-common`: Shared types for the Billboard playback core.
//!
//! Everything that crosses a crate boundary lives here:
//!
//! - **Frames**: [`FrameBuffer`], the move-only handle to one decoded,
//!   GPU-resident video frame, and its [`FrameMeta`]
//! - **Lifecycle**: [`PipelineState`] and the outward [`PlayerEvent`]s
//! - **Configuration**: [`RelayConfig`] / [`RelayStrategy`]
//! - **Errors**: [`PipelineError`], [`BridgeError`], [`ConfigError`]
//! - **Diagnostics**: [`LiveCounter`] for tracking outstanding buffers

pub mod config;
pub mod error;
pub mod event;
pub mod frame;
pub mod live;
pub mod state;

pub use config::{RelayConfig, RelayStrategy, DEFAULT_WATERMARK};
pub use error::{BridgeError, ConfigError, PipelineError};
pub use event::{FinishReason, PipelineCommand, PlayerEvent};
pub use frame::{FrameBuffer, FrameMeta, PixelFormat, TextureId, VideoGeometry};
pub use live::{LiveCounter, LiveToken};
pub use state::{PipelineState, SharedState};
