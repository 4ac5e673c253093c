//! Pipeline lifecycle state.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle of one decode pipeline.
///
/// `Stopped` is both the initial state and the state every teardown lands in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum PipelineState {
    #[default]
    Stopped,
    Paused,
    Playing,
}

impl PipelineState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::Paused => "Paused",
            Self::Playing => "Playing",
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Paused => 1,
            Self::Playing => 2,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Paused,
            2 => Self::Playing,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Atomically readable pipeline state.
///
/// Cloning shares the same cell. Only the controller's worker calls
/// [`SharedState::store`]; any thread may [`SharedState::load`].
#[derive(Clone, Debug, Default)]
pub struct SharedState(Arc<AtomicU8>);

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> PipelineState {
        PipelineState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Stores `next` and returns the previous state.
    pub fn store(&self, next: PipelineState) -> PipelineState {
        PipelineState::from_u8(self.0.swap(next.as_u8(), Ordering::AcqRel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_stopped() {
        assert_eq!(PipelineState::default(), PipelineState::Stopped);
        assert_eq!(SharedState::new().load(), PipelineState::Stopped);
    }

    #[test]
    fn store_returns_previous() {
        let state = SharedState::new();
        assert_eq!(state.store(PipelineState::Paused), PipelineState::Stopped);
        assert_eq!(state.store(PipelineState::Playing), PipelineState::Paused);
        assert_eq!(state.load(), PipelineState::Playing);
    }

    #[test]
    fn clones_share_the_cell() {
        let writer = SharedState::new();
        let reader = writer.clone();
        writer.store(PipelineState::Paused);
        assert_eq!(reader.load(), PipelineState::Paused);
    }

    #[test]
    fn default_is_stopped() {
        assert_eq!(PipelineState::default(), PipelineState::Stopped);
        assert_eq!(PipelineState::Playing.to_string(), "Playing");
    }
}
