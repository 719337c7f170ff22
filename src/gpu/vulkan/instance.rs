use ash::{extensions::ext, vk};
use log::{debug, error, info, warn};
use std::ffi::{c_char, c_void, CStr, CString};

use super::entry_points::{
    load_instance_fns, InstanceFns, DEBUG_LAYERS, EXT_DEBUG_UTILS, INSTANCE_EXTENSIONS,
    KHR_GET_PHYSICAL_DEVICE_PROPERTIES_2, KHR_PORTABILITY_ENUMERATION,
};
use super::{ApiVersion, GPUError, Result};

/// Lowest instance API version the backend supports.
pub const MIN_API_VERSION: u32 = vk::API_VERSION_1_1;

/// Environment toggle: abort the process on validation errors caught by the
/// debug messenger.
const DEBUG_ABORT_ENV: &str = "ROUX_DEBUG_ABORT";

/// Options for creating the top-level instance handle.
#[derive(Default)]
pub struct InstanceInfo {
    /// Enable the validation meta-layer and the debug messenger. Degrades
    /// to a warning when the platform has neither.
    pub debug: bool,
    /// Additionally request GPU-assisted validation.
    pub debug_extra: bool,
    /// Ceiling on the negotiated API version; 0 means none.
    pub max_api_version: u32,
    /// Extensions the caller requires. Trusted as-is: they are enabled
    /// without probing, and creation fails if the driver rejects them.
    pub extensions: Vec<String>,
    /// Extensions enabled only when the platform advertises them.
    pub opt_extensions: Vec<String>,
    /// Layers the caller requires.
    pub layers: Vec<String>,
    /// Layers enabled only when present.
    pub opt_layers: Vec<String>,
    /// Externally supplied loader; falls back to the platform loader.
    pub get_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
}

/// An owned `VkInstance` plus everything resolved while creating it.
pub struct Instance {
    entry: ash::Entry,
    instance: ash::Instance,
    api_version: u32,
    extensions: Vec<CString>,
    layers: Vec<CString>,
    fns: InstanceFns,
    debug: Option<DebugMessenger>,
}

struct DebugCallbackState {
    abort_on_error: bool,
}

/// Keeps the messenger and the callback state alive for as long as the
/// instance. The state box backs the `user_data` pointer handed to the
/// driver and must therefore outlive the messenger.
pub struct DebugMessenger {
    debug_utils: ext::DebugUtils,
    messenger: vk::DebugUtilsMessengerEXT,
    _state: Box<DebugCallbackState>,
}

impl Drop for DebugMessenger {
    fn drop(&mut self) {
        unsafe {
            self.debug_utils
                .destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}

/// Known-false-positive diagnostics that are dropped before logging.
fn is_denied(message_id: i32, message: &str) -> bool {
    match message_id as u32 {
        // VUID-VkSwapchainCreateInfoKHR-imageExtent-01274
        0x7cd0911d => true,
        // UNASSIGNED-BestPractices-NonSuccess-Result
        0x8928392f => true,
        // UNASSIGNED-BestPractices-vkAllocateMemory-small-allocation
        0xdc18ad6b => true,
        // UNASSIGNED-BestPractices-vkBindMemory-small-dedicated-allocation
        0xb3d4346b => true,
        // VUID-vkMapMemory-memory-00683, validation layers bug
        0xc05b3a9d => true,
        // UNASSIGNED-BestPractices-Error-Result
        0x5f379b89 => message.contains("VK_ERROR_FORMAT_NOT_SUPPORTED"),
        _ => false,
    }
}

fn level_for_severity(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Debug
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE) {
        log::Level::Trace
    } else {
        log::Level::Info
    }
}

unsafe extern "system" fn debug_utils_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    user_data: *mut c_void,
) -> vk::Bool32 {
    if callback_data.is_null() {
        return vk::FALSE;
    }
    let data = &*callback_data;

    let message = if data.p_message.is_null() {
        String::new()
    } else {
        CStr::from_ptr(data.p_message).to_string_lossy().into_owned()
    };

    if is_denied(data.message_id_number, &message) {
        return vk::FALSE;
    }

    let level = level_for_severity(severity);
    log::log!(level, "vk {}", message);

    if !data.p_queue_labels.is_null() {
        for i in 0..data.queue_label_count as usize {
            let label = &*data.p_queue_labels.add(i);
            if !label.p_label_name.is_null() {
                let name = CStr::from_ptr(label.p_label_name).to_string_lossy();
                log::log!(level, "    during {}", name);
            }
        }
    }
    if !data.p_cmd_buf_labels.is_null() {
        for i in 0..data.cmd_buf_label_count as usize {
            let label = &*data.p_cmd_buf_labels.add(i);
            if !label.p_label_name.is_null() {
                let name = CStr::from_ptr(label.p_label_name).to_string_lossy();
                log::log!(level, "    inside {}", name);
            }
        }
    }
    if !data.p_objects.is_null() {
        for i in 0..data.object_count as usize {
            let object = &*data.p_objects.add(i);
            let name = if object.p_object_name.is_null() {
                "anon".into()
            } else {
                CStr::from_ptr(object.p_object_name).to_string_lossy()
            };
            log::log!(
                level,
                "    using {:?}: {} ({:#x})",
                object.object_type,
                name,
                object.object_handle
            );
        }
    }

    // Abort the offending call for validation errors, and nothing else:
    // performance or informational messages must never break execution.
    let is_error = severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR)
        && message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION);
    if is_error {
        let state = (user_data as *const DebugCallbackState).as_ref();
        if state.map_or(false, |state| state.abort_on_error) {
            std::process::abort();
        }
        return vk::TRUE;
    }

    vk::FALSE
}

impl DebugMessenger {
    fn install(entry: &ash::Entry, instance: &ash::Instance) -> Result<Self> {
        let abort_on_error = std::env::var(DEBUG_ABORT_ENV)
            .map(|v| v == "1")
            .unwrap_or(false);
        let state = Box::new(DebugCallbackState { abort_on_error });

        let debug_utils = ext::DebugUtils::new(entry, instance);
        let messenger_ci = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_utils_callback))
            .user_data(&*state as *const DebugCallbackState as *mut c_void);

        let messenger =
            unsafe { debug_utils.create_debug_utils_messenger(&messenger_ci, None) }?;

        Ok(Self {
            debug_utils,
            messenger,
            _state: state,
        })
    }
}

fn to_cstring(name: &str, what: &str) -> Option<CString> {
    match CString::new(name) {
        Ok(name) => Some(name),
        Err(_) => {
            warn!("ignoring {} name with an embedded NUL: {:?}", what, name);
            None
        }
    }
}

pub(crate) fn prop_name(raw: &[c_char]) -> &CStr {
    unsafe { CStr::from_ptr(raw.as_ptr()) }
}

pub(crate) fn advertised(available: &[vk::ExtensionProperties], name: &CStr) -> bool {
    available
        .iter()
        .any(|ext| prop_name(&ext.extension_name) == name)
}

impl Instance {
    /// Create the top-level instance handle.
    ///
    /// Resolves the entry-point loader, clamps the reported API version
    /// against the caller's ceiling, enables the debug meta-layer and the
    /// optional extension allow-list where the platform advertises them, and
    /// installs the filtering debug messenger when debugging stayed enabled.
    pub fn new(info: &InstanceInfo) -> Result<Instance> {
        let entry = match info.get_proc_addr {
            Some(get_instance_proc_addr) => unsafe {
                ash::Entry::from_static_fn(vk::StaticFn {
                    get_instance_proc_addr,
                })
            },
            None => unsafe { ash::Entry::load() }?,
        };

        let mut api_version = entry
            .try_enumerate_instance_version()?
            .unwrap_or(vk::API_VERSION_1_0);
        debug!("Available instance version: {}", ApiVersion(api_version));

        if info.max_api_version != 0 {
            api_version = api_version.min(info.max_api_version);
            info!(
                "Restricting API version to {}... new version {}",
                ApiVersion(info.max_api_version),
                ApiVersion(api_version)
            );
        }

        if api_version < MIN_API_VERSION {
            error!(
                "Instance API version {} is lower than the minimum required version {}, cannot proceed!",
                ApiVersion(api_version),
                ApiVersion(MIN_API_VERSION)
            );
            return Err(GPUError::ApiVersionTooLow {
                found: ApiVersion(api_version),
                min: ApiVersion(MIN_API_VERSION),
            });
        }

        // Layers first: the debug meta-layer has to be picked before
        // extensions, since layers can expose extra extensions.
        let layers_avail = entry.enumerate_instance_layer_properties()?;
        debug!("Available layers:");
        for layer in &layers_avail {
            debug!(
                "    {} (v{})",
                prop_name(&layer.layer_name).to_string_lossy(),
                ApiVersion(layer.spec_version)
            );
        }

        let layer_available =
            |name: &CStr| layers_avail.iter().any(|l| prop_name(&l.layer_name) == name);

        let mut debug_enabled = info.debug;
        let mut layers: Vec<CString> = Vec::new();

        if debug_enabled {
            match DEBUG_LAYERS.iter().find(|&layer| layer_available(layer)) {
                Some(&layer) => {
                    info!("Enabling debug meta layer: {}", layer.to_string_lossy());
                    layers.push(layer.into());
                }
                None => {
                    warn!("API debugging requested but no debug meta layers present... ignoring");
                    debug_enabled = false;
                }
            }
        }

        for name in &info.layers {
            if let Some(name) = to_cstring(name, "layer") {
                layers.push(name);
            }
        }
        for name in &info.opt_layers {
            if let Some(name) = to_cstring(name, "layer") {
                if layer_available(&name) {
                    layers.push(name);
                }
            }
        }

        // Extensions: globally advertised ones plus whatever the available
        // layers expose on top.
        let exts_avail = entry.enumerate_instance_extension_properties(None)?;
        let mut layer_exts: Vec<(CString, Vec<CString>)> = Vec::new();
        for layer in &layers_avail {
            let layer_name: CString = prop_name(&layer.layer_name).into();
            let exts = entry
                .enumerate_instance_extension_properties(Some(layer_name.as_c_str()))?
                .iter()
                .map(|ext| prop_name(&ext.extension_name))
                .filter(|name| !advertised(&exts_avail, name))
                .map(CString::from)
                .collect::<Vec<_>>();
            layer_exts.push((layer_name, exts));
        }

        debug!("Available instance extensions:");
        for ext in &exts_avail {
            debug!("    {}", prop_name(&ext.extension_name).to_string_lossy());
        }
        for (layer, exts) in &layer_exts {
            for ext in exts {
                debug!(
                    "    {} (via {})",
                    ext.to_string_lossy(),
                    layer.to_string_lossy()
                );
            }
        }

        let mut flags = vk::InstanceCreateFlags::empty();
        let mut exts: Vec<CString> = Vec::new();

        // The one mandatory extension.
        exts.push(KHR_GET_PHYSICAL_DEVICE_PROPERTIES_2.into());

        // Optional allow-list.
        for &ext in INSTANCE_EXTENSIONS {
            if advertised(&exts_avail, ext) {
                exts.push(ext.into());
            }
        }

        // Required for MoltenVK style drivers that only enumerate behind
        // the portability flag.
        if advertised(&exts_avail, KHR_PORTABILITY_ENUMERATION) {
            exts.push(KHR_PORTABILITY_ENUMERATION.into());
            flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        }

        // Caller-required extensions are trusted as-is, but may need their
        // providing layer enabled alongside.
        for name in &info.extensions {
            let Some(name) = to_cstring(name, "extension") else {
                continue;
            };
            if let Some((layer, _)) = layer_exts
                .iter()
                .find(|(_, exts)| exts.iter().any(|e| e == &name))
            {
                layers.push(layer.clone());
            }
            exts.push(name);
        }

        // Caller-optional extensions only when advertised, globally or via
        // a layer.
        for name in &info.opt_extensions {
            let Some(name) = to_cstring(name, "extension") else {
                continue;
            };
            if advertised(&exts_avail, &name) {
                exts.push(name);
            } else if let Some((layer, _)) = layer_exts
                .iter()
                .find(|(_, exts)| exts.iter().any(|e| e == &name))
            {
                layers.push(layer.clone());
                exts.push(name);
            }
        }

        if debug_enabled {
            if advertised(&exts_avail, EXT_DEBUG_UTILS) {
                info!(
                    "Enabling debug report extension: {}",
                    EXT_DEBUG_UTILS.to_string_lossy()
                );
                exts.push(EXT_DEBUG_UTILS.into());
            } else {
                warn!(
                    "API debug layers enabled but no debug report extension found... ignoring. \
                     Debug messages may be spilling to stdout/stderr!"
                );
                debug_enabled = false;
            }
        }

        dedup_names(&mut exts);
        dedup_names(&mut layers);

        info!(
            "Creating vulkan instance{}",
            if exts.is_empty() { "" } else { " with extensions:" }
        );
        for ext in &exts {
            info!("    {}", ext.to_string_lossy());
        }
        if !layers.is_empty() {
            info!("  and layers:");
            for layer in &layers {
                info!("    {}", layer.to_string_lossy());
            }
        }

        let app_info = vk::ApplicationInfo::builder()
            .api_version(api_version)
            .build();
        let ext_ptrs: Vec<*const c_char> = exts.iter().map(|e| e.as_ptr()).collect();
        let layer_ptrs: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

        let validation_features = [
            vk::ValidationFeatureEnableEXT::GPU_ASSISTED,
            vk::ValidationFeatureEnableEXT::GPU_ASSISTED_RESERVE_BINDING_SLOT,
            vk::ValidationFeatureEnableEXT::BEST_PRACTICES,
        ];
        let mut extra_validation = vk::ValidationFeaturesEXT::builder()
            .enabled_validation_features(&validation_features)
            .build();

        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&ext_ptrs)
            .enabled_layer_names(&layer_ptrs)
            .flags(flags);
        if info.debug_extra {
            // Ignored by drivers without VK_EXT_validation_features support.
            create_info = create_info.push_next(&mut extra_validation);
        }

        let instance = match unsafe { entry.create_instance(&create_info, None) } {
            Ok(instance) => instance,
            Err(res) => {
                error!("Failed creating instance: {}", res);
                return Err(res.into());
            }
        };

        let instance_handle = instance.handle();
        let fns = load_instance_fns(&exts, |name| {
            match unsafe { entry.get_instance_proc_addr(instance_handle, name.as_ptr()) } {
                Some(f) => f as *const c_void,
                None => std::ptr::null(),
            }
        });

        // Assemble first so a messenger failure still tears the instance
        // down through Drop.
        let mut created = Instance {
            entry,
            instance,
            api_version,
            extensions: exts,
            layers,
            fns,
            debug: None,
        };

        if debug_enabled {
            created.debug = Some(DebugMessenger::install(&created.entry, &created.instance)?);
        }

        Ok(created)
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    pub fn extensions(&self) -> &[CString] {
        &self.extensions
    }

    pub fn layers(&self) -> &[CString] {
        &self.layers
    }

    pub fn fns(&self) -> &InstanceFns {
        &self.fns
    }

    pub fn has_extension(&self, name: &CStr) -> bool {
        self.extensions.iter().any(|e| e.as_c_str() == name)
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug.is_some()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        // The messenger has to go before the instance it was created from.
        self.debug = None;
        unsafe { self.instance.destroy_instance(None) };
    }
}

fn dedup_names(names: &mut Vec<CString>) {
    let mut seen = std::collections::HashSet::new();
    names.retain(|name| seen.insert(name.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_list_filters_known_false_positives() {
        assert!(is_denied(0x7cd0911du32 as i32, ""));
        assert!(is_denied(0xc05b3a9du32 as i32, ""));
        assert!(!is_denied(0x12345678, ""));
    }

    #[test]
    fn format_not_supported_is_denied_only_with_matching_text() {
        let id = 0x5f379b89u32 as i32;
        assert!(is_denied(id, "error was VK_ERROR_FORMAT_NOT_SUPPORTED"));
        assert!(!is_denied(id, "some other best-practices complaint"));
    }

    #[test]
    fn severities_map_onto_the_shared_log_levels() {
        assert_eq!(
            level_for_severity(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR),
            log::Level::Error
        );
        assert_eq!(
            level_for_severity(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING),
            log::Level::Warn
        );
        assert_eq!(
            level_for_severity(vk::DebugUtilsMessageSeverityFlagsEXT::INFO),
            log::Level::Debug
        );
        assert_eq!(
            level_for_severity(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE),
            log::Level::Trace
        );
    }

    #[test]
    fn duplicate_names_collapse_to_the_first_occurrence() {
        let mut names = vec![
            CString::new("a").unwrap(),
            CString::new("b").unwrap(),
            CString::new("a").unwrap(),
        ];
        dedup_names(&mut names);
        assert_eq!(names.len(), 2);
        assert_eq!(names[0].to_str().unwrap(), "a");
    }
}
