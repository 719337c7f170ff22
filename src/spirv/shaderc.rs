use log::{error, log_enabled, trace};

use crate::gpu::GlslDialect;

use super::locale::CLocale;
use super::{CompileDiagnostic, CompilerError, ShaderStage};

/// Offline GLSL→SPIR-V compiler.
///
/// One instance owns the underlying compiler, its options, and the pinned
/// "C" numeric locale used around every call. A failed compilation is a
/// per-call diagnostic; it never invalidates the compiler or any context.
pub struct ShaderCompiler {
    compiler: shaderc::Compiler,
    options: shaderc::CompileOptions<'static>,
    cloc: CLocale,
    glsl: GlslDialect,
}

fn shader_kind(stage: ShaderStage) -> shaderc::ShaderKind {
    match stage {
        ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
        ShaderStage::Fragment => shaderc::ShaderKind::Fragment,
        ShaderStage::Compute => shaderc::ShaderKind::Compute,
    }
}

fn status_label(err: &shaderc::Error) -> &'static str {
    match err {
        shaderc::Error::CompilationError(..) => "error",
        shaderc::Error::InternalError(_) => "internal error",
        shaderc::Error::InvalidStage(_) => "invalid stage",
        shaderc::Error::InvalidAssembly(_) => "invalid assembly",
        shaderc::Error::NullResultObject(_) => "no result",
    }
}

fn diagnostic_from_error(err: &shaderc::Error) -> CompileDiagnostic {
    match err {
        shaderc::Error::CompilationError(errors, message) => CompileDiagnostic {
            errors: *errors,
            warnings: 0,
            message: message.clone(),
        },
        other => CompileDiagnostic {
            errors: 1,
            warnings: 0,
            message: other.to_string(),
        },
    }
}

impl ShaderCompiler {
    pub fn new() -> Result<Self, CompilerError> {
        let Some(cloc) = CLocale::new() else {
            error!("Failed initializing C locale?!");
            return Err(CompilerError::Init);
        };

        let compiler = shaderc::Compiler::new().ok_or(CompilerError::Init)?;
        let mut options = shaderc::CompileOptions::new().ok_or(CompilerError::Init)?;
        options.set_optimization_level(shaderc::OptimizationLevel::Size);
        options.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_1 as u32,
        );

        Ok(Self {
            compiler,
            options,
            cloc,
            // Impossible to query from the compiler, so hard-code it.
            glsl: GlslDialect {
                version: 450,
                vulkan: true,
            },
        })
    }

    /// The GLSL dialect this compiler accepts.
    pub fn glsl(&self) -> GlslDialect {
        self.glsl
    }

    /// Compile `source` for `stage` into a SPIR-V word stream.
    ///
    /// Diagnostics are reported through the log boundary at a severity
    /// derived from the outcome (errors → error, warnings → info, clean →
    /// debug). When trace logging is enabled the shader is compiled a
    /// second time in assembly mode purely so the disassembly can be
    /// logged.
    pub fn compile(&self, stage: ShaderStage, source: &str) -> Result<Vec<u32>, CompilerError> {
        let _locale = self.cloc.activate();

        let result = self.compiler.compile_into_spirv(
            source,
            shader_kind(stage),
            "input",
            "main",
            Some(&self.options),
        );

        match result {
            Ok(artifact) => {
                let warnings = artifact.get_num_warnings();
                let level = if warnings > 0 {
                    log::Level::Info
                } else {
                    log::Level::Debug
                };

                let messages = artifact.get_warning_messages();
                if !messages.is_empty() {
                    log::log!(level, "shaderc output:\n{}", messages);
                }
                log::log!(
                    level,
                    "shaderc compile status 'success' (0 errors, {} warnings)",
                    warnings
                );

                if log_enabled!(log::Level::Trace) {
                    self.log_disassembly(stage, source);
                }

                Ok(artifact.as_binary().to_vec())
            }
            Err(err) => {
                let diagnostic = diagnostic_from_error(&err);
                if !diagnostic.message.is_empty() {
                    error!("shaderc output:\n{}", diagnostic.message);
                }
                error!(
                    "shaderc compile status '{}' ({} errors, {} warnings)",
                    status_label(&err),
                    diagnostic.errors,
                    diagnostic.warnings
                );
                Err(CompilerError::Compile(diagnostic))
            }
        }
    }

    fn log_disassembly(&self, stage: ShaderStage, source: &str) {
        // There is no way to get the disassembly out of the primary result,
        // so the shader is compiled a second time in assembly mode.
        let disassembly = self.compiler.compile_into_spirv_assembly(
            source,
            shader_kind(stage),
            "input",
            "main",
            Some(&self.options),
        );
        if let Ok(disassembly) = disassembly {
            trace!("Generated SPIR-V:\n{}", disassembly.as_text());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIVIAL_VERTEX: &str = r#"
        #version 450
        void main() {
            gl_Position = vec4(0.5, 0.25, 0.0, 1.0);
        }
    "#;

    #[test]
    fn trivial_shader_compiles_to_spirv() {
        let compiler = ShaderCompiler::new().unwrap();
        let words = compiler.compile(ShaderStage::Vertex, TRIVIAL_VERTEX).unwrap();
        // SPIR-V streams start with the magic word.
        assert_eq!(words[0], 0x0723_0203);
    }

    #[test]
    fn broken_shader_yields_a_diagnostic_with_error_counts() {
        let compiler = ShaderCompiler::new().unwrap();
        let err = compiler
            .compile(ShaderStage::Fragment, "#version 450\nvoid main() { bogus; }")
            .unwrap_err();
        match err {
            CompilerError::Compile(diag) => {
                assert!(diag.errors > 0);
                assert!(!diag.message.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn dialect_is_vulkan_glsl_450() {
        let compiler = ShaderCompiler::new().unwrap();
        let glsl = compiler.glsl();
        assert_eq!(glsl.version, 450);
        assert!(glsl.vulkan);
    }
}
