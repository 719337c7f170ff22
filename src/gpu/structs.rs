use crate::gpu::device_selector::UUID_SIZE;

/// Which hardware queue role an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    Graphics,
    Compute,
    Transfer,
}

/// How the caller wants the physical device picked.
///
/// The variants are evaluated in this order of precedence: an explicit
/// UUID pin only ever accepts an exact match, a name pin only an exact
/// string match, and `Any` falls back to scoring by device type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DeviceSelection {
    #[default]
    Any,
    Uuid([u8; UUID_SIZE]),
    Name(String),
}

/// The GLSL dialect a finalized context can consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlslDialect {
    /// GLSL `#version` the backend accepts.
    pub version: u32,
    /// Whether the dialect is the Vulkan flavor (`GL_KHR_vulkan_glsl`).
    pub vulkan: bool,
}

impl GlslDialect {
    /// Restrict the dialect to at most `max_version`.
    ///
    /// A `max_version` of 0 means no ceiling. Vulkan GLSL is floored at
    /// version 140, the minimum `GL_KHR_vulkan_glsl` supports.
    pub fn clamp(&mut self, max_version: u32) {
        if max_version == 0 {
            return;
        }

        self.version = self.version.min(max_version);
        if self.vulkan {
            self.version = self.version.max(140);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_restricts_and_floors_vulkan_glsl() {
        let mut glsl = GlslDialect {
            version: 450,
            vulkan: true,
        };
        glsl.clamp(330);
        assert_eq!(glsl.version, 330);

        glsl.clamp(100);
        assert_eq!(glsl.version, 140);

        let mut gl = GlslDialect {
            version: 460,
            vulkan: false,
        };
        gl.clamp(100);
        assert_eq!(gl.version, 100);
    }

    #[test]
    fn clamp_zero_is_a_no_op() {
        let mut glsl = GlslDialect {
            version: 450,
            vulkan: true,
        };
        glsl.clamp(0);
        assert_eq!(glsl.version, 450);
    }
}
