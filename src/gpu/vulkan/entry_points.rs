use ash::vk;
use std::ffi::{c_void, CStr, CString};

use super::{GPUError, Result};

const fn cstr(bytes: &'static [u8]) -> &'static CStr {
    unsafe { CStr::from_bytes_with_nul_unchecked(bytes) }
}

/// Suffixes reserved for extensions. Functions promoted to core lose them,
/// so resolution retries once with the suffix stripped.
pub(crate) const EXT_SUFFIXES: [&str; 2] = ["KHR", "EXT"];

/// Resolve `name` through `lookup`, falling back once to the same name with
/// a known extension suffix stripped. Never retries more than once.
pub(crate) fn resolve(
    name: &CStr,
    mut lookup: impl FnMut(&CStr) -> *const c_void,
) -> *const c_void {
    let direct = lookup(name);
    if !direct.is_null() {
        return direct;
    }

    let bytes = name.to_bytes();
    for suffix in EXT_SUFFIXES {
        if let Some(stripped) = bytes.strip_suffix(suffix.as_bytes()) {
            let stripped = match CString::new(stripped) {
                Ok(stripped) => stripped,
                Err(_) => break,
            };
            return lookup(&stripped);
        }
    }

    std::ptr::null()
}

/// Instance-level entry points whose absence is fatal. Everything else the
/// backend touches is optional and checked for presence before use.
///
/// `vkGetPhysicalDeviceFeatures2KHR` is deliberately listed with its suffix:
/// on 1.1+ drivers that dropped the alias, resolution succeeds through the
/// suffix-stripped retry.
const MANDATORY_INSTANCE_FNS: &[&str] = &[
    "vkCreateDevice",
    "vkEnumerateDeviceExtensionProperties",
    "vkGetDeviceProcAddr",
    "vkGetPhysicalDeviceFeatures2KHR",
    "vkGetPhysicalDeviceFormatProperties",
    "vkGetPhysicalDeviceMemoryProperties",
    "vkGetPhysicalDeviceProperties2",
    "vkGetPhysicalDeviceQueueFamilyProperties",
];

/// Verify that every mandatory instance-level entry point resolves.
pub(crate) fn check_mandatory_instance_fns(
    mut lookup: impl FnMut(&CStr) -> *const c_void,
) -> Result<()> {
    for &name in MANDATORY_INSTANCE_FNS {
        let cname = match CString::new(name) {
            Ok(cname) => cname,
            Err(_) => continue,
        };
        if resolve(&cname, &mut lookup).is_null() {
            return Err(GPUError::MissingEntryPoint(name));
        }
    }
    Ok(())
}

/// One optional extension: its name, the core version that subsumes it
/// (0 when never promoted), and the device-level entry points it unlocks.
#[derive(Debug, Clone, Copy)]
pub struct ExtensionSpec {
    pub name: &'static CStr,
    pub core_version: u32,
    pub entry_points: &'static [&'static CStr],
}

impl ExtensionSpec {
    /// Whether the active API version alone provides this capability,
    /// with no need to list the extension at device creation.
    pub fn implied_by_core(&self, api_version: u32) -> bool {
        self.core_version != 0 && api_version >= self.core_version
    }
}

pub const KHR_SURFACE: &CStr = cstr(b"VK_KHR_surface\0");
pub const EXT_SWAPCHAIN_COLOR_SPACE: &CStr = cstr(b"VK_EXT_swapchain_colorspace\0");
pub const KHR_EXTERNAL_MEMORY_CAPABILITIES: &CStr =
    cstr(b"VK_KHR_external_memory_capabilities\0");
pub const KHR_EXTERNAL_SEMAPHORE_CAPABILITIES: &CStr =
    cstr(b"VK_KHR_external_semaphore_capabilities\0");
pub const KHR_GET_PHYSICAL_DEVICE_PROPERTIES_2: &CStr =
    cstr(b"VK_KHR_get_physical_device_properties2\0");
pub const KHR_PORTABILITY_ENUMERATION: &CStr = cstr(b"VK_KHR_portability_enumeration\0");
pub const EXT_DEBUG_UTILS: &CStr = cstr(b"VK_EXT_debug_utils\0");
pub const EXT_VALIDATION_FEATURES: &CStr = cstr(b"VK_EXT_validation_features\0");

pub const KHR_SWAPCHAIN: &CStr = cstr(b"VK_KHR_swapchain\0");
pub const KHR_PUSH_DESCRIPTOR: &CStr = cstr(b"VK_KHR_push_descriptor\0");
pub const KHR_EXTERNAL_MEMORY_FD: &CStr = cstr(b"VK_KHR_external_memory_fd\0");
pub const EXT_EXTERNAL_MEMORY_DMA_BUF: &CStr = cstr(b"VK_EXT_external_memory_dma_buf\0");
pub const EXT_EXTERNAL_MEMORY_HOST: &CStr = cstr(b"VK_EXT_external_memory_host\0");
pub const KHR_EXTERNAL_SEMAPHORE_FD: &CStr = cstr(b"VK_KHR_external_semaphore_fd\0");
pub const EXT_PCI_BUS_INFO: &CStr = cstr(b"VK_EXT_pci_bus_info\0");
pub const EXT_HDR_METADATA: &CStr = cstr(b"VK_EXT_hdr_metadata\0");
pub const EXT_HOST_QUERY_RESET: &CStr = cstr(b"VK_EXT_host_query_reset\0");
pub const KHR_IMAGE_FORMAT_LIST: &CStr = cstr(b"VK_KHR_image_format_list\0");
pub const EXT_IMAGE_DRM_FORMAT_MODIFIER: &CStr = cstr(b"VK_EXT_image_drm_format_modifier\0");
pub const KHR_TIMELINE_SEMAPHORE: &CStr = cstr(b"VK_KHR_timeline_semaphore\0");
pub const KHR_PORTABILITY_SUBSET: &CStr = cstr(b"VK_KHR_portability_subset\0");

/// Debug meta-layers, sorted by priority.
pub const DEBUG_LAYERS: &[&CStr] = &[
    cstr(b"VK_LAYER_KHRONOS_validation\0"),
    cstr(b"VK_LAYER_LUNARG_standard_validation\0"),
];

/// Optional instance extensions enabled whenever the platform advertises
/// them.
pub const INSTANCE_EXTENSIONS: &[&CStr] = &[
    KHR_SURFACE,
    EXT_SWAPCHAIN_COLOR_SPACE,
    KHR_EXTERNAL_MEMORY_CAPABILITIES,
    KHR_EXTERNAL_SEMAPHORE_CAPABILITIES,
];

/// Optional device extensions, the core versions subsuming them, and the
/// entry points each one unlocks.
pub const DEVICE_EXTENSIONS: &[ExtensionSpec] = &[
    ExtensionSpec {
        name: KHR_SWAPCHAIN,
        core_version: 0,
        entry_points: &[
            cstr(b"vkAcquireNextImageKHR\0"),
            cstr(b"vkCreateSwapchainKHR\0"),
            cstr(b"vkDestroySwapchainKHR\0"),
            cstr(b"vkGetSwapchainImagesKHR\0"),
            cstr(b"vkQueuePresentKHR\0"),
        ],
    },
    ExtensionSpec {
        name: KHR_PUSH_DESCRIPTOR,
        core_version: 0,
        entry_points: &[cstr(b"vkCmdPushDescriptorSetKHR\0")],
    },
    ExtensionSpec {
        name: KHR_EXTERNAL_MEMORY_FD,
        core_version: 0,
        entry_points: &[cstr(b"vkGetMemoryFdKHR\0")],
    },
    ExtensionSpec {
        name: EXT_EXTERNAL_MEMORY_DMA_BUF,
        core_version: 0,
        entry_points: &[cstr(b"vkGetMemoryFdPropertiesKHR\0")],
    },
    ExtensionSpec {
        name: EXT_EXTERNAL_MEMORY_HOST,
        core_version: 0,
        entry_points: &[cstr(b"vkGetMemoryHostPointerPropertiesEXT\0")],
    },
    ExtensionSpec {
        name: KHR_EXTERNAL_SEMAPHORE_FD,
        core_version: 0,
        entry_points: &[cstr(b"vkGetSemaphoreFdKHR\0")],
    },
    ExtensionSpec {
        name: EXT_PCI_BUS_INFO,
        core_version: 0,
        entry_points: &[],
    },
    ExtensionSpec {
        name: EXT_HDR_METADATA,
        core_version: 0,
        entry_points: &[cstr(b"vkSetHdrMetadataEXT\0")],
    },
    ExtensionSpec {
        name: EXT_HOST_QUERY_RESET,
        core_version: vk::API_VERSION_1_2,
        entry_points: &[cstr(b"vkResetQueryPoolEXT\0")],
    },
    ExtensionSpec {
        name: KHR_IMAGE_FORMAT_LIST,
        core_version: vk::API_VERSION_1_2,
        entry_points: &[],
    },
    ExtensionSpec {
        name: EXT_IMAGE_DRM_FORMAT_MODIFIER,
        core_version: 0,
        entry_points: &[cstr(b"vkGetImageDrmFormatModifierPropertiesEXT\0")],
    },
    ExtensionSpec {
        name: KHR_TIMELINE_SEMAPHORE,
        core_version: vk::API_VERSION_1_2,
        entry_points: &[cstr(b"vkWaitSemaphoresKHR\0")],
    },
    ExtensionSpec {
        name: KHR_PORTABILITY_SUBSET,
        core_version: 0,
        entry_points: &[],
    },
];

/// Device extensions worth requesting for any context; swapchain is left out
/// since it is only pulled in when a surface is involved.
pub fn recommended_device_extensions() -> impl Iterator<Item = &'static CStr> {
    DEVICE_EXTENSIONS
        .iter()
        .map(|spec| spec.name)
        .filter(|&name| name != KHR_SWAPCHAIN)
}

/// Whether a capability is usable at `api_version` given the explicitly
/// enabled extension list: either the extension was enabled, or a catalog
/// entry says the core version subsumes it.
pub fn extension_available(api_version: u32, enabled: &[CString], name: &CStr) -> bool {
    if enabled.iter().any(|e| e.as_c_str() == name) {
        return true;
    }
    DEVICE_EXTENSIONS
        .iter()
        .any(|spec| spec.name == name && spec.implied_by_core(api_version))
}

/// Instance-level partition of the entry-point table. Entries stay `None`
/// when the matching extension is neither enabled nor implied by core.
#[derive(Default, Clone)]
pub struct InstanceFns {
    pub surface: Option<vk::KhrSurfaceFn>,
    pub get_physical_device_properties2: Option<vk::KhrGetPhysicalDeviceProperties2Fn>,
    pub external_memory_capabilities: Option<vk::KhrExternalMemoryCapabilitiesFn>,
    pub external_semaphore_capabilities: Option<vk::KhrExternalSemaphoreCapabilitiesFn>,
}

pub(crate) fn load_instance_fns(
    enabled: &[CString],
    mut lookup: impl FnMut(&CStr) -> *const c_void,
) -> InstanceFns {
    let mut fns = InstanceFns::default();
    let enabled = |name: &CStr| enabled.iter().any(|e| e.as_c_str() == name);

    if enabled(KHR_SURFACE) {
        fns.surface = Some(vk::KhrSurfaceFn::load(|name| resolve(name, &mut lookup)));
    }
    if enabled(KHR_GET_PHYSICAL_DEVICE_PROPERTIES_2) {
        fns.get_physical_device_properties2 = Some(vk::KhrGetPhysicalDeviceProperties2Fn::load(
            |name| resolve(name, &mut lookup),
        ));
    }
    if enabled(KHR_EXTERNAL_MEMORY_CAPABILITIES) {
        fns.external_memory_capabilities = Some(vk::KhrExternalMemoryCapabilitiesFn::load(
            |name| resolve(name, &mut lookup),
        ));
    }
    if enabled(KHR_EXTERNAL_SEMAPHORE_CAPABILITIES) {
        fns.external_semaphore_capabilities = Some(vk::KhrExternalSemaphoreCapabilitiesFn::load(
            |name| resolve(name, &mut lookup),
        ));
    }

    fns
}

/// Device-level partition of the entry-point table.
#[derive(Default, Clone)]
pub struct DeviceFns {
    pub swapchain: Option<vk::KhrSwapchainFn>,
    pub push_descriptor: Option<vk::KhrPushDescriptorFn>,
    pub external_memory_fd: Option<vk::KhrExternalMemoryFdFn>,
    pub external_memory_dma_buf: Option<vk::ExtExternalMemoryDmaBufFn>,
    pub external_memory_host: Option<vk::ExtExternalMemoryHostFn>,
    pub external_semaphore_fd: Option<vk::KhrExternalSemaphoreFdFn>,
    pub hdr_metadata: Option<vk::ExtHdrMetadataFn>,
    pub host_query_reset: Option<vk::ExtHostQueryResetFn>,
    pub image_drm_format_modifier: Option<vk::ExtImageDrmFormatModifierFn>,
    pub timeline_semaphore: Option<vk::KhrTimelineSemaphoreFn>,
}

/// Populate the device-level table for every catalog extension that is
/// either on the enabled list or implied by the active API version.
pub(crate) fn load_device_fns(
    api_version: u32,
    enabled: &[CString],
    mut lookup: impl FnMut(&CStr) -> *const c_void,
) -> DeviceFns {
    let mut fns = DeviceFns::default();

    for spec in DEVICE_EXTENSIONS {
        let available = spec.implied_by_core(api_version)
            || enabled.iter().any(|e| e.as_c_str() == spec.name);
        if !available {
            continue;
        }

        let mut load = |name: &CStr| resolve(name, &mut lookup);
        if spec.name == KHR_SWAPCHAIN {
            fns.swapchain = Some(vk::KhrSwapchainFn::load(&mut load));
        } else if spec.name == KHR_PUSH_DESCRIPTOR {
            fns.push_descriptor = Some(vk::KhrPushDescriptorFn::load(&mut load));
        } else if spec.name == KHR_EXTERNAL_MEMORY_FD {
            fns.external_memory_fd = Some(vk::KhrExternalMemoryFdFn::load(&mut load));
        } else if spec.name == EXT_EXTERNAL_MEMORY_DMA_BUF {
            fns.external_memory_dma_buf = Some(vk::ExtExternalMemoryDmaBufFn::load(&mut load));
        } else if spec.name == EXT_EXTERNAL_MEMORY_HOST {
            fns.external_memory_host = Some(vk::ExtExternalMemoryHostFn::load(&mut load));
        } else if spec.name == KHR_EXTERNAL_SEMAPHORE_FD {
            fns.external_semaphore_fd = Some(vk::KhrExternalSemaphoreFdFn::load(&mut load));
        } else if spec.name == EXT_HDR_METADATA {
            fns.hdr_metadata = Some(vk::ExtHdrMetadataFn::load(&mut load));
        } else if spec.name == EXT_HOST_QUERY_RESET {
            fns.host_query_reset = Some(vk::ExtHostQueryResetFn::load(&mut load));
        } else if spec.name == EXT_IMAGE_DRM_FORMAT_MODIFIER {
            fns.image_drm_format_modifier =
                Some(vk::ExtImageDrmFormatModifierFn::load(&mut load));
        } else if spec.name == KHR_TIMELINE_SEMAPHORE {
            fns.timeline_semaphore = Some(vk::KhrTimelineSemaphoreFn::load(&mut load));
        }
    }

    fns
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    // Non-null marker for fake lookup tables.
    static MARKER: u8 = 0;

    fn marker() -> *const c_void {
        &MARKER as *const u8 as *const c_void
    }

    fn table_lookup<'a>(
        table: &'a HashMap<&'static str, *const c_void>,
    ) -> impl FnMut(&CStr) -> *const c_void + 'a {
        |name: &CStr| {
            name.to_str()
                .ok()
                .and_then(|name| table.get(name).copied())
                .unwrap_or(std::ptr::null())
        }
    }

    #[test]
    fn direct_hits_skip_the_suffix_fallback() {
        let mut table = HashMap::new();
        table.insert("vkWaitSemaphoresKHR", marker());
        let ptr = resolve(cstr(b"vkWaitSemaphoresKHR\0"), table_lookup(&table));
        assert!(!ptr.is_null());
    }

    #[test]
    fn suffixed_names_fall_back_to_the_core_spelling() {
        let mut table = HashMap::new();
        table.insert("vkWaitSemaphores", marker());
        let ptr = resolve(cstr(b"vkWaitSemaphoresKHR\0"), table_lookup(&table));
        assert!(!ptr.is_null());

        table.clear();
        table.insert("vkResetQueryPool", marker());
        let ptr = resolve(cstr(b"vkResetQueryPoolEXT\0"), table_lookup(&table));
        assert!(!ptr.is_null());
    }

    #[test]
    fn unknown_suffix_resolves_to_null_without_retry() {
        let mut calls = 0;
        let ptr = resolve(cstr(b"vkSomethingNV\0"), |_| {
            calls += 1;
            std::ptr::null()
        });
        assert!(ptr.is_null());
        assert_eq!(calls, 1);
    }

    #[test]
    fn fallback_retries_exactly_once() {
        let mut calls = 0;
        let ptr = resolve(cstr(b"vkWaitSemaphoresKHR\0"), |_| {
            calls += 1;
            std::ptr::null()
        });
        assert!(ptr.is_null());
        assert_eq!(calls, 2);
    }

    #[test]
    fn missing_mandatory_entry_point_is_fatal() {
        let err = check_mandatory_instance_fns(|_| std::ptr::null());
        assert!(matches!(err, Err(GPUError::MissingEntryPoint(_))));

        let ok = check_mandatory_instance_fns(|_| marker());
        assert!(ok.is_ok());
    }

    #[test]
    fn core_version_implies_the_capability_without_the_extension() {
        // Nothing on the enabled list, API 1.2: promoted extensions load
        // anyway, never-promoted ones stay absent.
        let fns = load_device_fns(vk::API_VERSION_1_2, &[], |_| marker());
        assert!(fns.timeline_semaphore.is_some());
        assert!(fns.host_query_reset.is_some());
        assert!(fns.hdr_metadata.is_none());
        assert!(fns.swapchain.is_none());
    }

    #[test]
    fn enabled_list_loads_only_the_named_extensions() {
        let enabled = [CString::new("VK_EXT_hdr_metadata").unwrap()];
        let fns = load_device_fns(vk::API_VERSION_1_1, &enabled, |_| marker());
        assert!(fns.hdr_metadata.is_some());
        // Unrelated table entries stay untouched.
        assert!(fns.timeline_semaphore.is_none());
        assert!(fns.push_descriptor.is_none());
        assert!(fns.external_memory_fd.is_none());
    }

    #[test]
    fn catalog_core_versions_are_sane() {
        for spec in DEVICE_EXTENSIONS {
            assert!(spec.core_version == 0 || spec.core_version >= vk::API_VERSION_1_1);
            assert!(!spec.implied_by_core(vk::API_VERSION_1_0));
            if spec.core_version != 0 {
                assert!(spec.implied_by_core(spec.core_version));
            }
        }
    }

    #[test]
    fn core_version_implies_availability_without_enablement() {
        // The invariant from the capability catalog: active API version at
        // or above the descriptor's core version makes the capability
        // available even when the extension list never mentions it.
        for spec in DEVICE_EXTENSIONS {
            if spec.core_version == 0 {
                assert!(!extension_available(vk::API_VERSION_1_3, &[], spec.name));
            } else {
                assert!(extension_available(spec.core_version, &[], spec.name));
                assert!(!extension_available(vk::API_VERSION_1_1, &[], spec.name));
            }
        }

        let enabled = [CString::new("VK_EXT_hdr_metadata").unwrap()];
        assert!(extension_available(vk::API_VERSION_1_1, &enabled, EXT_HDR_METADATA));
    }

    #[test]
    fn recommended_extensions_exclude_swapchain() {
        assert!(recommended_device_extensions().all(|name| name != KHR_SWAPCHAIN));
        assert_eq!(
            recommended_device_extensions().count(),
            DEVICE_EXTENSIONS.len() - 1
        );
    }
}
