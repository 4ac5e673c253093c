//! Sharing the host render context with the decode engine.
//!
//! Set up once per process, before any pipeline is opened. The render
//! thread hands over its native display and GL context handles; decode
//! engines ask for them through `ContextRequested` bus events so they can
//! create textures in a context shared with the renderer (zero-copy).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use bb_common::BridgeError;

use crate::engine::ContextKind;

static INSTALLED: OnceLock<Arc<GraphicsContextBridge>> = OnceLock::new();

/// Windowing backend the native handles belong to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Platform {
    Glx,
    Egl,
    Wgl,
    Headless,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum GlApi {
    #[default]
    OpenGl,
    Gles2,
}

/// Native context handles, one variant per windowing backend.
///
/// Handles are raw platform pointers carried as `usize`; they are never
/// dereferenced here, only passed on to the decode engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NativeContext {
    /// X11 `Display*` and `GLXContext`.
    Glx { display: usize, context: usize },
    /// `EGLDisplay` and `EGLContext`.
    Egl { display: usize, context: usize },
    /// `HGLRC`. The display is implicit on Windows.
    Wgl { context: usize },
    /// No render context: the engine must create its own.
    Headless,
}

impl NativeContext {
    pub fn platform(&self) -> Platform {
        match self {
            Self::Glx { .. } => Platform::Glx,
            Self::Egl { .. } => Platform::Egl,
            Self::Wgl { .. } => Platform::Wgl,
            Self::Headless => Platform::Headless,
        }
    }

    pub fn display_handle(&self) -> Option<usize> {
        match *self {
            Self::Glx { display, .. } | Self::Egl { display, .. } => Some(display),
            Self::Wgl { .. } | Self::Headless => None,
        }
    }

    pub fn context_handle(&self) -> Option<usize> {
        match *self {
            Self::Glx { context, .. } | Self::Egl { context, .. } | Self::Wgl { context } => {
                Some(context)
            }
            Self::Headless => None,
        }
    }

    fn validate(&self) -> Result<(), BridgeError> {
        if self.display_handle() == Some(0) {
            return Err(BridgeError::NullHandle { field: "display" });
        }
        if self.context_handle() == Some(0) {
            return Err(BridgeError::NullHandle { field: "context" });
        }
        Ok(())
    }
}

/// What the bridge hands back for a context request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextAnswer {
    Display {
        platform: Platform,
        handle: usize,
    },
    Application {
        platform: Platform,
        context: usize,
        api: GlApi,
    },
}

#[derive(Debug)]
pub struct GraphicsContextBridge {
    native: NativeContext,
    api: GlApi,
    served: AtomicU64,
}

impl GraphicsContextBridge {
    pub fn new(native: NativeContext, api: GlApi) -> Result<Self, BridgeError> {
        native.validate()?;
        Ok(Self {
            native,
            api,
            served: AtomicU64::new(0),
        })
    }

    pub fn headless() -> Self {
        Self {
            native: NativeContext::Headless,
            api: GlApi::default(),
            served: AtomicU64::new(0),
        }
    }

    /// Stores `bridge` as the process-wide bridge.
    ///
    /// Installing the same handles again returns the existing bridge; any
    /// other second installation is refused.
    pub fn install(bridge: GraphicsContextBridge) -> Result<Arc<Self>, BridgeError> {
        Self::install_into(&INSTALLED, bridge).map(|(installed, _)| installed)
    }

    /// Returns the bridge held by `slot` and whether this call stored it.
    fn install_into(
        slot: &OnceLock<Arc<Self>>,
        bridge: GraphicsContextBridge,
    ) -> Result<(Arc<Self>, bool), BridgeError> {
        let (native, api) = (bridge.native, bridge.api);
        let mut stored = false;
        let installed = slot.get_or_init(|| {
            stored = true;
            Arc::new(bridge)
        });
        if stored {
            tracing::info!(platform = ?native.platform(), api = ?api, "graphics context bridge installed");
        }
        if installed.native == native && installed.api == api {
            Ok((installed.clone(), stored))
        } else {
            Err(BridgeError::AlreadyInstalled)
        }
    }

    pub fn installed() -> Option<Arc<Self>> {
        INSTALLED.get().cloned()
    }

    pub fn native(&self) -> NativeContext {
        self.native
    }

    pub fn api(&self) -> GlApi {
        self.api
    }

    /// Answers a context request, or `None` if this bridge has nothing for it.
    pub fn answer(&self, kind: &ContextKind) -> Option<ContextAnswer> {
        let platform = self.native.platform();
        let answer = match kind {
            ContextKind::Display => self
                .native
                .display_handle()
                .map(|handle| ContextAnswer::Display { platform, handle }),
            ContextKind::Application => {
                self.native
                    .context_handle()
                    .map(|context| ContextAnswer::Application {
                        platform,
                        context,
                        api: self.api,
                    })
            }
            ContextKind::Other(_) => None,
        };
        if answer.is_some() {
            self.served.fetch_add(1, Ordering::Relaxed);
        }
        answer
    }

    /// Context requests answered so far.
    pub fn served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }
}
