//! Decoded frame handles.
//!
//! A [`FrameBuffer`] is the unit of ownership that moves between the decode
//! engine, the frame relay and the render consumer. It is deliberately not
//! `Clone`: exactly one component holds a given frame at any time, and the
//! underlying GPU resource is released when the holder drops it.

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Texture / format / geometry
// ---------------------------------------------------------------------------

/// Renderer-native texture name (a GL texture id for the GL engines).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tex#{}", self.0)
    }
}

/// Pixel layout of a decoded frame as negotiated with the decode engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgba,
    Bgra,
    Nv12,
    I420,
    /// Anything the engine produced that the renderer has no path for.
    Unknown,
}

impl PixelFormat {
    /// Returns true for packed single-plane formats that can be sampled directly.
    pub fn is_packed_rgb(self) -> bool {
        matches!(self, Self::Rgba | Self::Bgra)
    }
}

/// Negotiated width/height of the decoded stream.
///
/// Discovered once per opened source and immutable afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoGeometry {
    pub width: u32,
    pub height: u32,
}

impl VideoGeometry {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when either dimension is zero (caps not negotiated yet).
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for VideoGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ---------------------------------------------------------------------------
// FrameBuffer
// ---------------------------------------------------------------------------

/// Metadata carried by every decoded frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameMeta {
    pub texture: TextureId,
    pub format: PixelFormat,
    pub geometry: VideoGeometry,
    /// Monotonic production index within one opened source.
    pub sequence: u64,
}

/// One decoded video frame, owned by exactly one component.
///
/// The optional keepalive pins whatever engine object backs the texture
/// (a mapped GL video frame, a pooled texture slot, ...). It is dropped
/// together with the `FrameBuffer`, which is the moment the engine may
/// recycle the GPU resource.
pub struct FrameBuffer {
    meta: FrameMeta,
    keepalive: Option<Box<dyn Any + Send>>,
}

impl FrameBuffer {
    /// A frame with no engine-side resource attached.
    pub fn new(meta: FrameMeta) -> Self {
        Self {
            meta,
            keepalive: None,
        }
    }

    /// A frame whose GPU resource stays pinned until this buffer is dropped.
    pub fn with_keepalive<K: Any + Send>(meta: FrameMeta, keepalive: K) -> Self {
        Self {
            meta,
            keepalive: Some(Box::new(keepalive)),
        }
    }

    pub fn meta(&self) -> &FrameMeta {
        &self.meta
    }

    pub fn texture(&self) -> TextureId {
        self.meta.texture
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    pub fn geometry(&self) -> VideoGeometry {
        self.meta.geometry
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("texture", &self.meta.texture)
            .field("format", &self.meta.format)
            .field("geometry", &format_args!("{}", self.meta.geometry))
            .field("sequence", &self.meta.sequence)
            .field("pinned", &self.keepalive.is_some())
            .finish()
    }
}
