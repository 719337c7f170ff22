pub mod device_selector;
pub mod features;
pub mod queue_family;
pub mod structs;

pub use device_selector::*;
pub use features::*;
pub use queue_family::*;
pub use structs::*;

#[cfg(feature = "roux-opengl")]
pub mod opengl;
#[cfg(feature = "roux-vulkan")]
pub mod vulkan;

#[cfg(feature = "roux-vulkan")]
pub use vulkan::*;
