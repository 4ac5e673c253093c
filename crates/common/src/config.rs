//! Frame relay configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Queue depth that triggers a redraw signal or a recycle in the
/// watermark strategy.
pub const DEFAULT_WATERMARK: usize = 3;

/// Which frame handoff discipline connects decoder and renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayStrategy {
    /// One frame in flight; `publish` blocks until the frame is drawn.
    #[default]
    Rendezvous,
    /// Incoming/outgoing queues bounded by the watermark; `publish` never blocks.
    Watermark,
}

impl RelayStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Rendezvous => "rendezvous",
            Self::Watermark => "watermark",
        }
    }
}

impl fmt::Display for RelayStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RelayStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rendezvous" | "a" => Ok(Self::Rendezvous),
            "watermark" | "queue" | "b" => Ok(Self::Watermark),
            other => Err(ConfigError::Parse {
                what: "relay strategy".into(),
                reason: format!("unknown strategy '{other}' (expected rendezvous or watermark)"),
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub strategy: RelayStrategy,
    /// Only consulted by [`RelayStrategy::Watermark`].
    pub watermark: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            strategy: RelayStrategy::default(),
            watermark: DEFAULT_WATERMARK,
        }
    }
}

impl RelayConfig {
    pub fn rendezvous() -> Self {
        Self {
            strategy: RelayStrategy::Rendezvous,
            ..Self::default()
        }
    }

    pub fn watermark(watermark: usize) -> Self {
        Self {
            strategy: RelayStrategy::Watermark,
            watermark,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watermark == 0 {
            return Err(ConfigError::InvalidWatermark(self.watermark));
        }
        Ok(())
    }
}
