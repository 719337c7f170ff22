use crate::gpu::QueueType;
use ash::vk;
use std::fmt;
use thiserror::Error;

/// A packed Vulkan API version, kept only so errors and logs can print it
/// as `major.minor.patch` instead of a raw word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ApiVersion(pub u32);

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            vk::api_version_major(self.0),
            vk::api_version_minor(self.0),
            vk::api_version_patch(self.0)
        )
    }
}

#[derive(Debug, Error)]
pub enum GPUError {
    #[error("vulkan call failed: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("failed loading the vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("mandatory entry point `{0}` could not be resolved")]
    MissingEntryPoint(&'static str),

    #[error("API version {found} is below the minimum supported version {min}")]
    ApiVersionTooLow { found: ApiVersion, min: ApiVersion },

    #[error("no suitable physical device found")]
    NoSuitableDevice,

    #[error("device does not support timeline semaphores")]
    TimelineSemaphoresUnsupported,

    #[error("no queue family usable for {0:?} work")]
    NoQueueFamily(QueueType),

    #[error("selected queue family cannot present to the requested surface")]
    SurfacePresentUnsupported,
}

/// Convenient crate-wide result type.
pub type Result<T, E = GPUError> = std::result::Result<T, E>;
