//! Local playlist: an ordered list of video and image entries, cycled forever.
//!
//! File format:
//!
//! ```json
//! { "entries": [
//!     { "type": "video", "path": "/srv/media/intro.mp4" },
//!     { "type": "image", "path": "/srv/media/menu.png", "durationMillis": 15000 }
//! ] }
//! ```
//!
//! Entries with an unknown `type` or no `path` are skipped with a warning.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Video,
    Image,
}

impl EntryKind {
    fn parse(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("video") {
            Some(Self::Video)
        } else if raw.eq_ignore_ascii_case("image") {
            Some(Self::Image)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub kind: EntryKind,
    /// File path or URI handed to the decode engine.
    pub path: String,
    pub duration: Option<Duration>,
}

#[derive(Deserialize)]
struct PlaylistFile {
    #[serde(default)]
    entries: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    duration_millis: Option<u64>,
}

#[derive(Debug)]
pub struct Playlist {
    entries: Vec<PlaylistEntry>,
    cursor: Option<usize>,
    passes: u32,
}

impl Playlist {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read playlist {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("invalid playlist {}", path.display()))
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let file: PlaylistFile = serde_json::from_str(text).context("playlist is not valid JSON")?;

        let mut entries = Vec::with_capacity(file.entries.len());
        for value in file.entries {
            let raw: RawEntry = match serde_json::from_value(value.clone()) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(entry = %value, "garbage in playlist, skipping entry: {e}");
                    continue;
                }
            };
            let Some(kind) = EntryKind::parse(&raw.kind) else {
                tracing::warn!(entry = %value, "unknown entry type '{}', skipping entry", raw.kind);
                continue;
            };
            entries.push(PlaylistEntry {
                kind,
                path: raw.path,
                duration: raw.duration_millis.map(Duration::from_millis),
            });
        }

        if entries.is_empty() {
            bail!("playlist has no playable entries");
        }
        tracing::info!(entries = entries.len(), "playlist loaded");
        Ok(Self {
            entries,
            cursor: None,
            passes: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[PlaylistEntry] {
        &self.entries
    }

    /// Advances to the next entry, wrapping to the first after the last.
    pub fn next(&mut self) -> &PlaylistEntry {
        let index = match self.cursor {
            None => 0,
            Some(i) if i + 1 >= self.entries.len() => {
                self.passes += 1;
                0
            }
            Some(i) => i + 1,
        };
        self.cursor = Some(index);
        &self.entries[index]
    }

    /// Full passes completed so far (counted when the cursor wraps).
    pub fn passes(&self) -> u32 {
        self.passes
    }
}
