//! Commands into the controller and notifications out of it.

use std::fmt;

use crate::frame::VideoGeometry;
use crate::state::PipelineState;

/// Asynchronous request queued onto the pipeline-owning thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineCommand {
    Open(String),
    Stop,
}

/// Why a source stopped playing on its own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FinishReason {
    /// End of stream. The playlist should advance.
    Completed,
    /// Construction failure or runtime decode error.
    Failed(String),
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Failed(msg) => write!(f, "failed: {msg}"),
        }
    }
}

/// Outward notification delivered to the render consumer, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlayerEvent {
    StateChanged(PipelineState),
    /// Emitted once per open, before any frame of that source.
    GeometryKnown(VideoGeometry),
    /// A fresh frame can be acquired from the relay.
    FrameReady { sequence: u64 },
    Finished(FinishReason),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_display() {
        assert_eq!(FinishReason::Completed.to_string(), "completed");
        let failed = FinishReason::Failed("no decoder".into());
        assert_eq!(failed.to_string(), "failed: no decoder");
    }
}
