//! GStreamer/GL decode engine.
//!
//! Decodes into GL memory in a context shared with the renderer and hands
//! each sample over as a texture id. The mapped GL frame rides along as the
//! frame's keepalive, so GStreamer cannot reuse the texture until the render
//! thread drops the frame.
//!
//! All bus traffic is handled in the bus sync handler on the posting
//! thread: context requests are answered in place, EOS and errors are
//! forwarded to the controller.

use std::sync::Arc;

use bb_common::{
    FrameBuffer, FrameMeta, PipelineError, PixelFormat, TextureId, VideoGeometry,
};
use bb_handoff::{FrameRelay, Publish};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_gl as gst_gl;
use gstreamer_gl::prelude::*;
use gstreamer_video as gst_video;
use parking_lot::Mutex;

use crate::bridge::{ContextAnswer, GlApi, Platform};
use crate::engine::{ContextKind, DecodeEngine, EngineBus, EngineContext, EnginePipeline, PipelineEvent};

const PREROLL_TIMEOUT_SECS: u64 = 10;

pub struct GstEngine;

impl GstEngine {
    pub fn new() -> Result<Self, PipelineError> {
        gst::init().map_err(|e| PipelineError::Engine(format!("gstreamer init failed: {e}")))?;
        tracing::info!(version = %gst::version_string(), "gstreamer initialized");
        Ok(Self)
    }
}

fn describe(locator: &str) -> String {
    let source = if locator.contains("://") {
        format!("uridecodebin uri=\"{locator}\"")
    } else {
        format!("filesrc location=\"{}\" ! decodebin", locator.replace('"', "\\\""))
    };
    format!(
        "{source} ! glupload ! glcolorconvert ! \
         video/x-raw(memory:GLMemory),format=RGBA,texture-target=2D ! \
         appsink name=sink sync=true max-buffers=1"
    )
}

impl DecodeEngine for GstEngine {
    fn name(&self) -> &'static str {
        "gstreamer"
    }

    fn build(
        &mut self,
        locator: &str,
        ctx: EngineContext,
    ) -> Result<Box<dyn EnginePipeline>, PipelineError> {
        let description = describe(locator);
        tracing::debug!(%description, "building gstreamer pipeline");

        let pipeline = gst::parse::launch(&description)
            .map_err(|e| PipelineError::build(locator, e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| PipelineError::build(locator, "top-level element is not a pipeline"))?;

        let appsink = pipeline
            .by_name("sink")
            .and_then(|e| e.downcast::<gst_app::AppSink>().ok())
            .ok_or_else(|| PipelineError::build(locator, "appsink missing"))?;

        let bus = pipeline
            .bus()
            .ok_or_else(|| PipelineError::build(locator, "pipeline has no bus"))?;

        install_sample_callback(&appsink, ctx.relay.clone());
        install_sync_handler(&bus, ctx.bus.clone());

        Ok(Box::new(GstPipeline {
            pipeline,
            appsink,
            bus,
            torn_down: false,
        }))
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

struct GstPipeline {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    bus: gst::Bus,
    torn_down: bool,
}

impl GstPipeline {
    fn negotiated_geometry(&self) -> Option<VideoGeometry> {
        let caps = self.appsink.static_pad("sink")?.current_caps()?;
        let info = gst_video::VideoInfo::from_caps(&caps).ok()?;
        Some(VideoGeometry::new(info.width(), info.height()))
    }
}

impl EnginePipeline for GstPipeline {
    fn pause(&mut self) -> Result<VideoGeometry, PipelineError> {
        self.pipeline
            .set_state(gst::State::Paused)
            .map_err(|e| PipelineError::state_change("Paused", e.to_string()))?;
        let (result, _, _) = self
            .pipeline
            .state(gst::ClockTime::from_seconds(PREROLL_TIMEOUT_SECS));
        result.map_err(|e| PipelineError::state_change("Paused", e.to_string()))?;

        self.negotiated_geometry()
            .ok_or_else(|| PipelineError::state_change("Paused", "no caps negotiated on appsink"))
    }

    fn play(&mut self) -> Result<(), PipelineError> {
        self.pipeline
            .set_state(gst::State::Playing)
            .map(|_| ())
            .map_err(|e| PipelineError::state_change("Playing", e.to_string()))
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            tracing::warn!("failed to set pipeline to NULL: {e}");
        }
        self.bus.unset_sync_handler();
    }
}

impl Drop for GstPipeline {
    fn drop(&mut self) {
        self.teardown();
    }
}

// ---------------------------------------------------------------------------
// Samples
// ---------------------------------------------------------------------------

/// Keeps a sample mapped as GL memory until the render thread drops it.
struct MappedGlFrame(#[allow(dead_code)] gst_gl::GLVideoFrame<gst_video::video_frame::Readable>);

// SAFETY: the mapping is only created and dropped, never accessed, on the
// thread holding it; GL buffers are reference counted by GStreamer and may
// be released from any thread.
unsafe impl Send for MappedGlFrame {}

fn pixel_format(format: gst_video::VideoFormat) -> PixelFormat {
    match format {
        gst_video::VideoFormat::Rgba => PixelFormat::Rgba,
        gst_video::VideoFormat::Bgra => PixelFormat::Bgra,
        gst_video::VideoFormat::Nv12 => PixelFormat::Nv12,
        gst_video::VideoFormat::I420 => PixelFormat::I420,
        _ => PixelFormat::Unknown,
    }
}

fn install_sample_callback(appsink: &gst_app::AppSink, relay: Arc<dyn FrameRelay>) {
    let mut sequence: u64 = 0;
    appsink.set_callbacks(
        gst_app::AppSinkCallbacks::builder()
            .new_sample(move |sink| {
                let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                let Some(buffer) = sample.buffer_owned() else {
                    return Ok(gst::FlowSuccess::Ok);
                };
                let Some(info) = sample
                    .caps()
                    .and_then(|caps| gst_video::VideoInfo::from_caps(caps).ok())
                else {
                    tracing::warn!("sample without video caps");
                    return Ok(gst::FlowSuccess::Ok);
                };

                let frame = match gst_gl::GLVideoFrame::from_buffer_readable(buffer, &info) {
                    Ok(frame) => frame,
                    Err(_) => {
                        tracing::warn!("failed to map sample as GL memory");
                        return Ok(gst::FlowSuccess::Ok);
                    }
                };
                let texture = match frame.texture_id(0) {
                    Ok(id) => id,
                    Err(e) => {
                        tracing::warn!("mapped frame has no texture: {e}");
                        return Ok(gst::FlowSuccess::Ok);
                    }
                };

                let meta = FrameMeta {
                    texture: TextureId(texture),
                    format: pixel_format(info.format()),
                    geometry: VideoGeometry::new(info.width(), info.height()),
                    sequence,
                };
                sequence += 1;

                match relay.publish(FrameBuffer::with_keepalive(meta, MappedGlFrame(frame))) {
                    Publish::Delivered | Publish::Queued => Ok(gst::FlowSuccess::Ok),
                    Publish::Rejected | Publish::Cancelled => Err(gst::FlowError::Flushing),
                }
            })
            .build(),
    );
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// GL objects wrapped around the bridge's raw handles, built on first use.
#[derive(Default)]
struct GlShare {
    display: Option<gst_gl::GLDisplay>,
}

impl GlShare {
    fn context_for(&mut self, answer: ContextAnswer) -> Option<gst::Context> {
        match answer {
            ContextAnswer::Display { platform, handle } => {
                let display = wrap_display(platform, handle)?;
                let context = gst::Context::new(gst_gl::GL_DISPLAY_CONTEXT_TYPE, true);
                context.set_gl_display(&display);
                self.display = Some(display);
                Some(context)
            }
            ContextAnswer::Application {
                platform,
                context,
                api,
            } => {
                let display = match &self.display {
                    Some(display) => display.clone(),
                    None => gst_gl::GLDisplay::new(),
                };
                // SAFETY: `context` is the live native GL context the render
                // thread registered with the bridge; it outlives every pipeline.
                let gl_context = unsafe {
                    gst_gl::GLContext::new_wrapped(
                        &display,
                        context,
                        gl_platform(platform)?,
                        gl_api(api),
                    )
                }?;
                let mut app_context = gst::Context::new("gst.gl.app_context", true);
                app_context
                    .get_mut()?
                    .structure_mut()
                    .set("context", &gl_context);
                Some(app_context)
            }
        }
    }
}

fn wrap_display(platform: Platform, handle: usize) -> Option<gst_gl::GLDisplay> {
    match platform {
        // SAFETY: the handle is the renderer's live EGLDisplay.
        Platform::Egl => unsafe { gstreamer_gl_egl::GLDisplayEGL::with_egl_display(handle) }
            .ok()
            .map(|d| d.upcast()),
        // SAFETY: the handle is the renderer's open X11 Display.
        Platform::Glx => unsafe { gstreamer_gl_x11::GLDisplayX11::with_display(handle) }
            .ok()
            .map(|d| d.upcast()),
        Platform::Wgl => Some(gst_gl::GLDisplay::new()),
        Platform::Headless => None,
    }
}

fn gl_platform(platform: Platform) -> Option<gst_gl::GLPlatform> {
    match platform {
        Platform::Glx => Some(gst_gl::GLPlatform::GLX),
        Platform::Egl => Some(gst_gl::GLPlatform::EGL),
        Platform::Wgl => Some(gst_gl::GLPlatform::WGL),
        Platform::Headless => None,
    }
}

fn gl_api(api: GlApi) -> gst_gl::GLAPI {
    match api {
        GlApi::OpenGl => gst_gl::GLAPI::OPENGL,
        GlApi::Gles2 => gst_gl::GLAPI::GLES2,
    }
}

fn install_sync_handler(bus: &gst::Bus, engine_bus: EngineBus) {
    let share = Mutex::new(GlShare::default());
    bus.set_sync_handler(move |_, msg| match msg.view() {
        gst::MessageView::NeedContext(need) => {
            let kind = ContextKind::from_type_name(need.context_type());
            let Some(answer) = engine_bus.dispatch(PipelineEvent::ContextRequested(kind)) else {
                return gst::BusSyncReply::Pass;
            };
            let context = share.lock().context_for(answer);
            let element = msg.src().and_then(|src| src.downcast_ref::<gst::Element>());
            match (context, element) {
                (Some(context), Some(element)) => {
                    element.set_context(&context);
                    gst::BusSyncReply::Drop
                }
                _ => gst::BusSyncReply::Pass,
            }
        }
        gst::MessageView::Eos(_) => {
            engine_bus.end_of_stream();
            gst::BusSyncReply::Drop
        }
        gst::MessageView::Error(err) => {
            let debug = err.debug().map(|d| d.to_string()).unwrap_or_default();
            engine_bus.error(format!("{} ({debug})", err.error()));
            gst::BusSyncReply::Drop
        }
        _ => gst::BusSyncReply::Pass,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_locator_uses_filesrc() {
        let desc = describe("/media/clip.mp4");
        assert!(desc.starts_with("filesrc location=\"/media/clip.mp4\" ! decodebin"));
        assert!(desc.contains("appsink name=sink"));
    }

    #[test]
    fn uri_locator_uses_uridecodebin() {
        let desc = describe("https://example.com/a.mp4");
        assert!(desc.starts_with("uridecodebin uri=\"https://example.com/a.mp4\""));
    }
}
