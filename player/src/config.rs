//! Player configuration: JSON file, then command-line overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use bb_common::{ConfigError, RelayConfig};
use bb_pipeline::SyntheticClip;
use serde::{Deserialize, Serialize};

/// Which decode engine backs video entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Synthetic,
    Gstreamer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlayerConfig {
    pub playlist: Option<PathBuf>,
    pub engine: EngineKind,
    pub relay: RelayConfig,
    pub viewport: Viewport,
    /// Pause before advancing past a failed entry.
    pub error_hold_ms: u64,
    /// Display time for images without `durationMillis`.
    pub default_image_ms: u64,
    /// Give up on a video that produces no events for this long.
    pub stall_timeout_ms: u64,
    pub synthetic: SyntheticClip,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            playlist: None,
            engine: EngineKind::default(),
            relay: RelayConfig::default(),
            viewport: Viewport::default(),
            error_hold_ms: 2_000,
            default_image_ms: 10_000,
            stall_timeout_ms: 30_000,
            synthetic: SyntheticClip::default(),
        }
    }
}

impl PlayerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse {
            what: "player config".into(),
            reason: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.relay.validate()?;
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(ConfigError::Invalid {
                field: "viewport",
                reason: format!("{}x{} has no area", self.viewport.width, self.viewport.height),
            });
        }
        if self.stall_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "stallTimeoutMs",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }

    pub fn error_hold(&self) -> Duration {
        Duration::from_millis(self.error_hold_ms)
    }

    pub fn default_image_duration(&self) -> Duration {
        Duration::from_millis(self.default_image_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bb_common::RelayStrategy;

    #[test]
    fn empty_file_gives_defaults() {
        let config = PlayerConfig::from_json("{}").unwrap();
        assert_eq!(config, PlayerConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn nested_fields_parse() {
        let config = PlayerConfig::from_json(
            r#"{
                "playlist": "/srv/signage/playlist.json",
                "relay": { "strategy": "watermark", "watermark": 5 },
                "viewport": { "width": 1080, "height": 1920 },
                "errorHoldMs": 500,
                "synthetic": { "frames": 30, "fps": 0 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.relay.strategy, RelayStrategy::Watermark);
        assert_eq!(config.relay.watermark, 5);
        assert_eq!(config.viewport.height, 1920);
        assert_eq!(config.error_hold(), Duration::from_millis(500));
        assert_eq!(config.synthetic.frames, 30);
        assert_eq!(config.default_image_ms, 10_000);
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut config = PlayerConfig::default();
        config.relay.watermark = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidWatermark(0))));

        let mut config = PlayerConfig::default();
        config.viewport.width = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "viewport", .. })
        ));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = PlayerConfig::from_json("{ relay: ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
