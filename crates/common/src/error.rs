use thiserror::Error;

/// Failures of the decode pipeline and its controller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("failed to build pipeline for {locator}: {reason}")]
    Build { locator: String, reason: String },

    #[error("state change to {target} failed: {reason}")]
    StateChange { target: &'static str, reason: String },

    #[error("decode engine fault: {0}")]
    Engine(String),

    #[error("pipeline controller is no longer running")]
    ControllerGone,
}

impl PipelineError {
    pub fn build(locator: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Build {
            locator: locator.into(),
            reason: reason.into(),
        }
    }

    pub fn state_change(target: &'static str, reason: impl Into<String>) -> Self {
        Self::StateChange {
            target,
            reason: reason.into(),
        }
    }
}

/// Failures setting up the shared graphics context.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("native {field} handle is null")]
    NullHandle { field: &'static str },

    #[error("a different graphics context bridge is already installed")]
    AlreadyInstalled,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("watermark must be at least 1, got {0}")]
    InvalidWatermark(usize),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to parse {what}: {reason}")]
    Parse { what: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_error_message() {
        let err = PipelineError::build("clip.mp4", "no element \"decodebin\"");
        assert_eq!(
            err.to_string(),
            "failed to build pipeline for clip.mp4: no element \"decodebin\""
        );
    }

    #[test]
    fn state_change_message() {
        let err = PipelineError::state_change("Paused", "preroll timed out");
        assert_eq!(err.to_string(), "state change to Paused failed: preroll timed out");
    }

    #[test]
    fn config_error_message() {
        assert_eq!(
            ConfigError::InvalidWatermark(0).to_string(),
            "watermark must be at least 1, got 0"
        );
    }
}
