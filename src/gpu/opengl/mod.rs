use glow::HasContext;
use log::{debug, error, info, log_enabled, warn};
use std::ffi::c_void;
use std::sync::{Condvar, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use thiserror::Error;

use crate::gpu::GlslDialect;

pub type MakeCurrentCallback = dyn Fn() -> bool + Send + Sync;
pub type ReleaseCurrentCallback = dyn Fn() + Send + Sync;

#[derive(Debug, Error)]
pub enum GlError {
    #[error("failed making the OpenGL context current on the calling thread")]
    MakeCurrentFailed,

    #[error("no OpenGL version detected")]
    NoVersion,

    #[error("context is a software rasterizer, but software devices were not allowed")]
    SoftwareRasterizer,
}

/// Options for adopting a caller-created OpenGL/EGL context.
///
/// The context itself stays externally owned; this layer only binds it,
/// probes its capabilities, and serializes access to it.
pub struct OpenGLInfo {
    /// Symbol loader for the bound context.
    pub get_proc_address: Box<dyn Fn(&str) -> *const c_void + Send + Sync>,
    /// Binds the native context to the calling thread. Invoked only on the
    /// 0→1 transition of the recursive current-lock.
    pub make_current: Option<Box<MakeCurrentCallback>>,
    /// Releases the native binding again; invoked only on the 1→0
    /// transition.
    pub release_current: Option<Box<ReleaseCurrentCallback>>,
    pub allow_software: bool,
    pub debug: bool,
    /// Ceiling on the advertised GLSL dialect; 0 means none.
    pub max_glsl_version: u32,
}

#[derive(Default)]
struct CurrentState {
    owner: Option<ThreadId>,
    depth: u32,
}

/// Reference-counted recursive lock serializing make-current/release pairs.
///
/// OpenGL binds a context to one thread at a time, so every use must happen
/// between a bind and a release. Nested acquisitions on the owning thread
/// only bump the depth; the native callbacks fire exclusively on the 0→1 and
/// 1→0 transitions.
struct CurrentLock {
    state: Mutex<CurrentState>,
    cond: Condvar,
}

impl CurrentLock {
    fn new() -> Self {
        Self {
            state: Mutex::new(CurrentState::default()),
            cond: Condvar::new(),
        }
    }

    fn acquire(&self, bind: &dyn Fn() -> bool) -> Result<(), GlError> {
        let me = thread::current().id();
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        while state.owner.map_or(false, |owner| owner != me) {
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        if state.depth == 0 {
            if !bind() {
                self.cond.notify_one();
                return Err(GlError::MakeCurrentFailed);
            }
            state.owner = Some(me);
        }
        state.depth += 1;
        Ok(())
    }

    fn release(&self, unbind: &dyn Fn()) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            unbind();
            state.owner = None;
            self.cond.notify_one();
        }
    }
}

/// Renderer strings that identify software rasterizers.
fn is_software_renderer(renderer: &str) -> bool {
    let renderer = renderer.to_ascii_lowercase();
    renderer.contains("llvmpipe")
        || renderer.contains("softpipe")
        || renderer.contains("swrast")
        || renderer.contains("software rasterizer")
        || renderer.contains("apple software renderer")
}

/// Parse a `GL_SHADING_LANGUAGE_VERSION` style string ("4.60 NVIDIA",
/// "OpenGL ES GLSL ES 3.00") into the numeric dialect version.
fn parse_glsl_version(version: &str) -> Option<u32> {
    let start = version.find(|c: char| c.is_ascii_digit())?;
    let mut parts = version[start..]
        .split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty());
    let major: u32 = parts.next()?.parse().ok()?;
    let minor_raw = parts.next().unwrap_or("0");
    let minor: u32 = minor_raw.parse().ok()?;
    // "4.6" and "4.60" both mean GLSL 460.
    let minor = if minor_raw.len() == 1 { minor * 10 } else { minor };
    Some(major * 100 + minor.min(99))
}

fn gl_debug_callback(_source: u32, _gltype: u32, _id: u32, severity: u32, message: &str) {
    let level = match severity {
        glow::DEBUG_SEVERITY_HIGH => log::Level::Error,
        glow::DEBUG_SEVERITY_MEDIUM => log::Level::Warn,
        glow::DEBUG_SEVERITY_LOW => log::Level::Info,
        glow::DEBUG_SEVERITY_NOTIFICATION => log::Level::Debug,
        _ => log::Level::Error,
    };
    log::log!(level, "GL: {}", message);
}

/// An adopted OpenGL context, usable from any thread through
/// [`GlContext::make_current`].
pub struct GlContext {
    gl: glow::Context,
    make_current_cb: Option<Box<MakeCurrentCallback>>,
    release_current_cb: Option<Box<ReleaseCurrentCallback>>,
    current: CurrentLock,
    is_debug: bool,
    glsl: GlslDialect,
}

impl GlContext {
    /// Bind the caller's context, probe its version, vendor, and extension
    /// set, gate on software rasterizers, and install the debug callback
    /// when requested and available. The context is released again before
    /// returning, on success and failure alike.
    pub fn new(info: OpenGLInfo) -> Result<GlContext, GlError> {
        let OpenGLInfo {
            get_proc_address,
            make_current,
            release_current,
            allow_software,
            debug: want_debug,
            max_glsl_version,
        } = info;

        if let Some(bind) = &make_current {
            if !bind() {
                error!("Failed making OpenGL context current on calling thread!");
                return Err(GlError::MakeCurrentFailed);
            }
        }

        let probe = || -> Result<(glow::Context, bool, GlslDialect), GlError> {
            let mut gl =
                unsafe { glow::Context::from_loader_function(|name| get_proc_address(name)) };

            let version = unsafe { gl.get_parameter_string(glow::VERSION) };
            if version.is_empty() {
                error!(
                    "No OpenGL version detected - make sure an OpenGL context is bound to \
                     the current thread!"
                );
                return Err(GlError::NoVersion);
            }

            let vendor = unsafe { gl.get_parameter_string(glow::VENDOR) };
            let renderer = unsafe { gl.get_parameter_string(glow::RENDERER) };
            info!("Detected OpenGL version strings:");
            info!("    GL_VERSION:  {}", version);
            info!("    GL_VENDOR:   {}", vendor);
            info!("    GL_RENDERER: {}", renderer);

            if log_enabled!(log::Level::Debug) {
                debug!("    GL_EXTENSIONS:");
                for ext in gl.supported_extensions() {
                    debug!("        {}", ext);
                }
            }

            if !allow_software && is_software_renderer(&renderer) {
                error!(
                    "OpenGL context is suspected to be a software rasterizer, but \
                     `allow_software` is false."
                );
                return Err(GlError::SoftwareRasterizer);
            }

            let mut is_debug = false;
            if want_debug {
                if gl.supported_extensions().contains("GL_KHR_debug") {
                    unsafe {
                        gl.debug_message_callback(gl_debug_callback);
                        gl.enable(glow::DEBUG_OUTPUT);
                    }
                    is_debug = true;
                } else {
                    warn!("OpenGL debugging requested, but GL_KHR_debug is not available... ignoring!");
                }
            }

            let glsl_string =
                unsafe { gl.get_parameter_string(glow::SHADING_LANGUAGE_VERSION) };
            let mut glsl = GlslDialect {
                version: parse_glsl_version(&glsl_string).unwrap_or(130),
                vulkan: false,
            };
            if max_glsl_version != 0 {
                glsl.clamp(max_glsl_version);
                info!(
                    "Restricting GLSL version to {}... new version is {}",
                    max_glsl_version, glsl.version
                );
            }

            Ok((gl, is_debug, glsl))
        };

        let probed = probe();
        if let Some(unbind) = &release_current {
            unbind();
        }
        let (gl, is_debug, glsl) = probed?;

        Ok(GlContext {
            gl,
            make_current_cb: make_current,
            release_current_cb: release_current,
            current: CurrentLock::new(),
            is_debug,
            glsl,
        })
    }

    /// Bind the context to the calling thread and return a guard exposing
    /// the GL API. Re-entrant on the owning thread; other threads block
    /// until the depth returns to zero. The native bind callback fires only
    /// on the 0→1 transition.
    pub fn make_current(&self) -> Result<CurrentGuard<'_>, GlError> {
        let bind = || match &self.make_current_cb {
            Some(bind) => bind(),
            None => true,
        };
        match self.current.acquire(&bind) {
            Ok(()) => Ok(CurrentGuard { ctx: self }),
            Err(err) => {
                error!("Failed making OpenGL context current on calling thread!");
                Err(err)
            }
        }
    }

    fn release_current(&self) {
        let unbind = || {
            if let Some(unbind) = &self.release_current_cb {
                unbind();
            }
        };
        self.current.release(&unbind);
    }

    pub fn glsl(&self) -> GlslDialect {
        self.glsl
    }

    pub fn debug_enabled(&self) -> bool {
        self.is_debug
    }
}

impl Drop for GlContext {
    fn drop(&mut self) {
        // The context is externally owned; all that is checked here is that
        // it can still be bound. If not, leak rather than touch state whose
        // ownership is unknown.
        match self.current.acquire(&|| match &self.make_current_cb {
            Some(bind) => bind(),
            None => true,
        }) {
            Ok(()) => self.release_current(),
            Err(_) => {
                warn!("Failed uninitializing OpenGL context, leaking resources!");
            }
        }
    }
}

/// Proof that the context is current on this thread. GL calls are only
/// reachable through this guard.
pub struct CurrentGuard<'a> {
    ctx: &'a GlContext,
}

impl CurrentGuard<'_> {
    pub fn gl(&self) -> &glow::Context {
        &self.ctx.gl
    }
}

impl Drop for CurrentGuard<'_> {
    fn drop(&mut self) {
        self.ctx.release_current();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn nested_acquires_bind_and_release_once() {
        let binds = AtomicU32::new(0);
        let unbinds = AtomicU32::new(0);
        let lock = CurrentLock::new();

        let bind = || {
            binds.fetch_add(1, Ordering::SeqCst);
            true
        };
        let unbind = || {
            unbinds.fetch_add(1, Ordering::SeqCst);
        };

        lock.acquire(&bind).unwrap();
        lock.acquire(&bind).unwrap();
        lock.acquire(&bind).unwrap();
        assert_eq!(binds.load(Ordering::SeqCst), 1);

        lock.release(&unbind);
        lock.release(&unbind);
        assert_eq!(unbinds.load(Ordering::SeqCst), 0);

        lock.release(&unbind);
        assert_eq!(unbinds.load(Ordering::SeqCst), 1);

        // A fresh cycle binds again.
        lock.acquire(&bind).unwrap();
        assert_eq!(binds.load(Ordering::SeqCst), 2);
        lock.release(&unbind);
    }

    #[test]
    fn failed_bind_surfaces_as_an_error_and_leaves_the_lock_free() {
        let lock = CurrentLock::new();
        assert!(matches!(
            lock.acquire(&|| false),
            Err(GlError::MakeCurrentFailed)
        ));

        // The failure must not leave a phantom owner behind.
        lock.acquire(&|| true).unwrap();
        lock.release(&|| {});
    }

    #[test]
    fn software_renderers_are_recognized() {
        assert!(is_software_renderer("llvmpipe (LLVM 15.0.7, 256 bits)"));
        assert!(is_software_renderer("Software Rasterizer"));
        assert!(is_software_renderer("softpipe"));
        assert!(!is_software_renderer("NVIDIA GeForce RTX 3080/PCIe/SSE2"));
        assert!(!is_software_renderer("AMD Radeon RX 6800 XT"));
    }

    #[test]
    fn glsl_version_strings_parse() {
        assert_eq!(parse_glsl_version("4.60 NVIDIA"), Some(460));
        assert_eq!(parse_glsl_version("4.6"), Some(460));
        assert_eq!(parse_glsl_version("1.30"), Some(130));
        assert_eq!(parse_glsl_version("OpenGL ES GLSL ES 3.00"), Some(300));
        assert_eq!(parse_glsl_version("no digits"), None);
    }
}
