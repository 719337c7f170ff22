pub mod gpu;
pub mod spirv;

pub use gpu::*;
pub use spirv::{CompileDiagnostic, CompilerError, ShaderStage};
#[cfg(feature = "roux-shaderc")]
pub use spirv::ShaderCompiler;

#[cfg(all(not(feature = "roux-vulkan"), not(feature = "roux-opengl")))]
compile_error!("no backend selected; enable at least one of `roux-vulkan` or `roux-opengl`");
