use std::fmt;
use thiserror::Error;

#[cfg(feature = "roux-shaderc")]
mod shaderc;
#[cfg(feature = "roux-shaderc")]
pub use self::shaderc::ShaderCompiler;

/// Shader stages accepted at the compiler boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

/// Structured result of a failed compilation: counts plus the compiler's
/// human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileDiagnostic {
    pub errors: u32,
    pub warnings: u32,
    pub message: String,
}

impl fmt::Display for CompileDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} error(s), {} warning(s): {}",
            self.errors,
            self.warnings,
            self.message.trim_end()
        )
    }
}

#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("failed initializing the shader compiler")]
    Init,

    #[error("shader compilation failed: {0}")]
    Compile(CompileDiagnostic),
}

/// Numeric-locale pinning for the duration of a compile call.
///
/// The underlying compiler parses floating-point literals with
/// locale-dependent C routines; a comma-decimal locale silently corrupts
/// shader constants. The guard switches `LC_NUMERIC` to the neutral "C"
/// locale and restores the previous one on drop, error paths included.
#[cfg(unix)]
pub(crate) mod locale {
    use libc::{freelocale, locale_t, newlocale, uselocale, LC_NUMERIC_MASK};

    pub(crate) struct CLocale {
        loc: locale_t,
    }

    impl CLocale {
        pub(crate) fn new() -> Option<Self> {
            let loc = unsafe {
                newlocale(
                    LC_NUMERIC_MASK,
                    b"C\0".as_ptr() as *const libc::c_char,
                    std::ptr::null_mut(),
                )
            };
            if loc.is_null() {
                None
            } else {
                Some(Self { loc })
            }
        }

        pub(crate) fn activate(&self) -> ActiveLocale {
            let prev = unsafe { uselocale(self.loc) };
            ActiveLocale { prev }
        }
    }

    impl Drop for CLocale {
        fn drop(&mut self) {
            unsafe { freelocale(self.loc) };
        }
    }

    pub(crate) struct ActiveLocale {
        prev: locale_t,
    }

    impl Drop for ActiveLocale {
        fn drop(&mut self) {
            unsafe { uselocale(self.prev) };
        }
    }
}

#[cfg(not(unix))]
pub(crate) mod locale {
    /// Per-thread locale control is unavailable here; the guard is a no-op.
    pub(crate) struct CLocale;

    impl CLocale {
        pub(crate) fn new() -> Option<Self> {
            Some(Self)
        }

        pub(crate) fn activate(&self) -> ActiveLocale {
            ActiveLocale
        }
    }

    pub(crate) struct ActiveLocale;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn diagnostics_format_compactly() {
        let diag = CompileDiagnostic {
            errors: 2,
            warnings: 1,
            message: "input:3: 'foo' : undeclared identifier\n".to_string(),
        };
        assert_eq!(
            diag.to_string(),
            "2 error(s), 1 warning(s): input:3: 'foo' : undeclared identifier"
        );
    }

    // The locale is process-global state.
    #[test]
    #[serial]
    fn locale_guard_round_trips() {
        let cloc = locale::CLocale::new().expect("C locale must exist");
        {
            let _active = cloc.activate();
            // Nested activation must also restore cleanly.
            let _nested = cloc.activate();
        }
        let _again = cloc.activate();
    }
}
