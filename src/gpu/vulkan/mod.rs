mod error;
pub use error::*;

pub mod entry_points;
pub use entry_points::{
    extension_available, recommended_device_extensions, DeviceFns, ExtensionSpec, InstanceFns,
    DEVICE_EXTENSIONS, INSTANCE_EXTENSIONS,
};

pub mod device_selector;
pub use device_selector::{choose_device, DeviceQuery};

mod features;
pub mod instance;
pub use instance::{Instance, InstanceInfo, MIN_API_VERSION};

pub mod queues;
pub use queues::{QueueGuard, QueueLock, QueuePool};

use ash::{extensions::khr, vk};
use log::{debug, error, info};
use std::ffi::{c_char, c_void, CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::Arc;

use crate::gpu::device_selector::{format_uuid, UUID_SIZE};
use crate::gpu::features::{FeatureBlock, FeatureChain, FeatureTag, TimelineSemaphoreFeatures};
use crate::gpu::queue_family::{plan_queues, PlannedPool, QueueCaps, QueueFamily};
use crate::gpu::{DeviceSelection, GlslDialect, QueueType};

use entry_points::{
    check_mandatory_instance_fns, load_device_fns, KHR_SWAPCHAIN, KHR_TIMELINE_SEMAPHORE,
};
use instance::{advertised, prop_name};

/// Options for constructing a [`Context`].
pub struct ContextInfo {
    /// Instance-level options: layers, instance extensions, debug toggles,
    /// the API version ceiling, and an optional external loader.
    pub instance: InstanceInfo,
    /// How to pick the physical device, unless `physical_device` is set.
    pub device: DeviceSelection,
    /// Use this physical device instead of running selection.
    pub physical_device: Option<vk::PhysicalDevice>,
    pub allow_software: bool,
    /// Only consider devices that can present here, and require the graphics
    /// queue family to support it.
    pub surface: Option<vk::SurfaceKHR>,
    /// Device extensions the caller requires. Trusted as-is.
    pub required_extensions: Vec<String>,
    /// Device extensions enabled only when the device advertises them.
    pub optional_extensions: Vec<String>,
    /// Caller feature wishlist, merged over the library's recommended chain.
    pub features: FeatureChain,
    /// Queues requested per pool; 0 takes every queue the family exposes.
    pub queue_count: u32,
    pub async_compute: bool,
    pub async_transfer: bool,
    /// Ceiling on the advertised GLSL dialect; 0 means none.
    pub max_glsl_version: u32,
    /// External queue locking. When set, no internal queue mutexes exist.
    pub lock: Option<Arc<dyn QueueLock>>,
}

impl Default for ContextInfo {
    fn default() -> Self {
        Self {
            instance: InstanceInfo::default(),
            device: DeviceSelection::default(),
            physical_device: None,
            allow_software: false,
            surface: None,
            required_extensions: Vec::new(),
            optional_extensions: Vec::new(),
            features: FeatureChain::new(),
            queue_count: 1,
            async_compute: true,
            async_transfer: true,
            max_glsl_version: 0,
            lock: None,
        }
    }
}

/// Queues of an externally created device made available to [`Context::import`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueAssignment {
    pub family: u32,
    pub count: u32,
}

/// Options for adopting an externally owned instance/device pair. The
/// handles are never destroyed by the resulting context.
pub struct ImportInfo {
    pub instance: vk::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: vk::Device,
    pub get_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
    /// Device extensions the device was created with.
    pub extensions: Vec<String>,
    /// Features the device was created with.
    pub features: FeatureChain,
    pub max_api_version: u32,
    pub max_glsl_version: u32,
    pub queue_graphics: Option<QueueAssignment>,
    pub queue_compute: Option<QueueAssignment>,
    pub queue_transfer: Option<QueueAssignment>,
    pub lock: Option<Arc<dyn QueueLock>>,
}

enum InstanceOwner {
    Owned(Instance),
    Imported {
        entry: ash::Entry,
        instance: ash::Instance,
    },
}

impl InstanceOwner {
    fn entry(&self) -> &ash::Entry {
        match self {
            InstanceOwner::Owned(instance) => instance.entry(),
            InstanceOwner::Imported { entry, .. } => entry,
        }
    }

    fn handle(&self) -> &ash::Instance {
        match self {
            InstanceOwner::Owned(instance) => instance.handle(),
            InstanceOwner::Imported { instance, .. } => instance,
        }
    }
}

/// Destroys a freshly created device unless defused; keeps the failure
/// paths of the bootstrap chain from leaking it.
struct DeviceGuard {
    device: Option<ash::Device>,
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        if let Some(device) = self.device.take() {
            unsafe {
                let _ = device.device_wait_idle();
                device.destroy_device(None);
            }
        }
    }
}

fn queue_caps_from_vk(flags: vk::QueueFlags) -> QueueCaps {
    let mut caps = QueueCaps::empty();
    if flags.contains(vk::QueueFlags::GRAPHICS) {
        caps |= QueueCaps::GRAPHICS;
    }
    if flags.contains(vk::QueueFlags::COMPUTE) {
        caps |= QueueCaps::COMPUTE;
    }
    if flags.contains(vk::QueueFlags::TRANSFER) {
        caps |= QueueCaps::TRANSFER;
    }
    if flags.contains(vk::QueueFlags::SPARSE_BINDING) {
        caps |= QueueCaps::SPARSE_BINDING;
    }
    if flags.contains(vk::QueueFlags::PROTECTED) {
        caps |= QueueCaps::PROTECTED;
    }
    caps
}

fn raw_instance_lookup<'a>(
    entry: &'a ash::Entry,
    instance: vk::Instance,
) -> impl FnMut(&CStr) -> *const c_void + 'a {
    move |name| match unsafe { entry.get_instance_proc_addr(instance, name.as_ptr()) } {
        Some(f) => f as *const c_void,
        None => std::ptr::null(),
    }
}

fn raw_device_lookup<'a>(
    instance: &'a ash::Instance,
    device: vk::Device,
) -> impl FnMut(&CStr) -> *const c_void + 'a {
    move |name| match unsafe { instance.get_device_proc_addr(device, name.as_ptr()) } {
        Some(f) => f as *const c_void,
        None => std::ptr::null(),
    }
}

/// A fully negotiated Vulkan execution context.
///
/// Owns the instance (unless imported), the logical device, the negotiated
/// feature chain, the optional-extension entry-point tables, the allocator
/// backing GPU memory, and one command pool per distinct queue family.
/// Everything is read-only after construction except queue access, which
/// goes through [`Context::lock_queue`].
pub struct Context {
    instance: InstanceOwner,
    pdevice: vk::PhysicalDevice,
    device: ash::Device,
    imported: bool,
    api_version: u32,
    properties: vk::PhysicalDeviceProperties,
    device_uuid: [u8; UUID_SIZE],
    extensions: Vec<CString>,
    features: FeatureChain,
    device_fns: DeviceFns,
    allocator: ManuallyDrop<vk_mem::Allocator>,
    pools: Vec<Arc<QueuePool>>,
    graphics: usize,
    compute: usize,
    transfer: usize,
    lock: Option<Arc<dyn QueueLock>>,
    glsl: GlslDialect,
}

impl Context {
    /// Run the full bootstrap chain: create an instance, pick a device,
    /// negotiate features and extensions, create the logical device and its
    /// queue pools, and attach the allocator.
    ///
    /// On any failure everything constructed so far is torn down, in
    /// reverse construction order, before the error is returned.
    pub fn new(info: &ContextInfo) -> Result<Self> {
        let owner = InstanceOwner::Owned(Instance::new(&info.instance)?);
        Self::init(owner, info)
    }

    fn init(owner: InstanceOwner, info: &ContextInfo) -> Result<Self> {
        let entry = owner.entry().clone();
        let instance = owner.handle().clone();

        check_mandatory_instance_fns(raw_instance_lookup(&entry, instance.handle()))?;

        // Choose the physical device.
        let pdevice = match info.physical_device {
            Some(pdevice) => {
                debug!("Using caller-specified physical device");
                pdevice
            }
            None => {
                let query = DeviceQuery {
                    selection: info.device.clone(),
                    allow_software: info.allow_software,
                    surface: info.surface,
                };
                match choose_device(&entry, &instance, &query)? {
                    Some(pdevice) => pdevice,
                    None => {
                        error!("Found no suitable device, giving up.");
                        return Err(GPUError::NoSuitableDevice);
                    }
                }
            }
        };

        let mut id_props = vk::PhysicalDeviceIDProperties::default();
        let mut props2 = vk::PhysicalDeviceProperties2::builder()
            .push_next(&mut id_props)
            .build();
        unsafe { instance.get_physical_device_properties2(pdevice, &mut props2) };
        let properties = props2.properties;

        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        info!("Vulkan device properties:");
        info!("    Device Name: {}", device_name.to_string_lossy());
        info!(
            "    Device ID: {:x}:{:x}",
            properties.vendor_id, properties.device_id
        );
        info!("    Device UUID: {}", format_uuid(&id_props.device_uuid));
        info!("    Driver version: {}", properties.driver_version);
        info!("    API version: {}", ApiVersion(properties.api_version));

        let mut api_version = properties.api_version;
        if info.instance.max_api_version != 0 {
            api_version = api_version.min(info.instance.max_api_version);
            info!(
                "Restricting API version to {}... new version {}",
                ApiVersion(info.instance.max_api_version),
                ApiVersion(api_version)
            );
        }

        if api_version < MIN_API_VERSION {
            error!(
                "Device API version {} is lower than the minimum required version {}, cannot proceed!",
                ApiVersion(api_version),
                ApiVersion(MIN_API_VERSION)
            );
            return Err(GPUError::ApiVersionTooLow {
                found: ApiVersion(api_version),
                min: ApiVersion(MIN_API_VERSION),
            });
        }

        // Classify the queue families and resolve the three roles.
        let family_props =
            unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
        let families: Vec<QueueFamily> = family_props
            .iter()
            .enumerate()
            .map(|(index, props)| QueueFamily {
                index: index as u32,
                caps: queue_caps_from_vk(props.queue_flags),
                queue_count: props.queue_count,
            })
            .collect();

        let plan = plan_queues(
            &families,
            info.async_compute,
            info.async_transfer,
            info.queue_count,
        )
        .ok_or(GPUError::NoQueueFamily(QueueType::Graphics))?;

        // The graphics family must be able to present to the surface.
        if let Some(surface) = info.surface {
            let surface_loader = khr::Surface::new(&entry, &instance);
            let gfx_family = plan.pools[plan.graphics].family;
            let supported = unsafe {
                surface_loader.get_physical_device_surface_support(pdevice, gfx_family, surface)
            }?;
            if !supported {
                error!("Queue family does not support surface presentation!");
                return Err(GPUError::SurfacePresentUnsupported);
            }
        }

        // Collect the device extensions to enable.
        let exts_avail =
            unsafe { instance.enumerate_device_extension_properties(pdevice) }?;
        debug!("Available device extensions:");
        for ext in &exts_avail {
            debug!("    {}", prop_name(&ext.extension_name).to_string_lossy());
        }

        let mut exts: Vec<CString> = Vec::new();
        if info.surface.is_some() {
            exts.push(KHR_SWAPCHAIN.into());
        }
        if api_version < vk::API_VERSION_1_2 {
            // Timeline semaphores are load-bearing; below 1.2 they only
            // exist behind the extension.
            exts.push(KHR_TIMELINE_SEMAPHORE.into());
        }

        for spec in DEVICE_EXTENSIONS {
            if spec.implied_by_core(api_version) {
                continue;
            }
            if advertised(&exts_avail, spec.name) {
                exts.push(spec.name.into());
            }
        }

        for name in &info.required_extensions {
            if let Ok(name) = CString::new(name.as_str()) {
                exts.push(name);
            }
        }
        for name in &info.optional_extensions {
            if let Ok(name) = CString::new(name.as_str()) {
                if advertised(&exts_avail, &name) {
                    exts.push(name);
                }
            }
        }
        dedup_extensions(&mut exts);

        // Negotiate features: recommended ∪ caller, masked by what the
        // device reports for the identical tag structure.
        let mut negotiated = FeatureChain::recommended();
        negotiated.merge(&info.features);
        let supported = features::query_supported(&instance, pdevice, &negotiated);
        negotiated.mask(&supported);

        // Checked after masking so a silent downgrade cannot slip through.
        if !negotiated.contains(FeatureBlock::TimelineSemaphore(
            TimelineSemaphoreFeatures::TIMELINE_SEMAPHORE,
        )) {
            error!("Selected vulkan device does not support timeline semaphores!");
            return Err(GPUError::TimelineSemaphoresUnsupported);
        }

        // Create the logical device.
        let priorities: Vec<Vec<f32>> = plan
            .pools
            .iter()
            .map(|pool| vec![1.0; pool.queue_count as usize])
            .collect();
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = plan
            .pools
            .iter()
            .zip(&priorities)
            .map(|(pool, priorities)| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(pool.family)
                    .queue_priorities(priorities)
                    .build()
            })
            .collect();

        let core = match negotiated.get(FeatureTag::Core) {
            Some(FeatureBlock::Core(bits)) => features::core_to_vk(bits),
            _ => vk::PhysicalDeviceFeatures::default(),
        };
        let mut timeline = match negotiated.get(FeatureTag::TimelineSemaphore) {
            Some(FeatureBlock::TimelineSemaphore(bits)) => features::timeline_to_vk(bits),
            _ => vk::PhysicalDeviceTimelineSemaphoreFeatures::default(),
        };
        let mut host_query_reset = match negotiated.get(FeatureTag::HostQueryReset) {
            Some(FeatureBlock::HostQueryReset(bits)) => features::host_query_reset_to_vk(bits),
            _ => vk::PhysicalDeviceHostQueryResetFeatures::default(),
        };
        let mut descriptor_indexing = match negotiated.get(FeatureTag::DescriptorIndexing) {
            Some(FeatureBlock::DescriptorIndexing(bits)) => {
                features::descriptor_indexing_to_vk(bits)
            }
            _ => vk::PhysicalDeviceDescriptorIndexingFeatures::default(),
        };

        let mut features2 = vk::PhysicalDeviceFeatures2::builder().features(core);
        if negotiated.get(FeatureTag::TimelineSemaphore).is_some() {
            features2 = features2.push_next(&mut timeline);
        }
        if negotiated.get(FeatureTag::HostQueryReset).is_some() {
            features2 = features2.push_next(&mut host_query_reset);
        }
        if negotiated.get(FeatureTag::DescriptorIndexing).is_some() {
            features2 = features2.push_next(&mut descriptor_indexing);
        }
        let mut features2 = features2.build();

        let ext_ptrs: Vec<*const c_char> = exts.iter().map(|e| e.as_ptr()).collect();
        let device_ci = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&ext_ptrs)
            .push_next(&mut features2);

        info!(
            "Creating vulkan device{}",
            if exts.is_empty() { "" } else { " with extensions:" }
        );
        for ext in &exts {
            info!("    {}", ext.to_string_lossy());
        }

        let device = match unsafe { instance.create_device(pdevice, &device_ci, None) } {
            Ok(device) => device,
            Err(res) => {
                error!("Failed creating logical device: {}", res);
                return Err(res.into());
            }
        };
        let mut device_guard = DeviceGuard {
            device: Some(device.clone()),
        };

        let device_fns = load_device_fns(
            api_version,
            &exts,
            raw_device_lookup(&instance, device.handle()),
        );

        // One pool per distinct family; roles may alias.
        let external_lock = info.lock.is_some();
        let mut pools: Vec<Arc<QueuePool>> = Vec::new();
        for planned in &plan.pools {
            pools.push(Arc::new(QueuePool::new(&device, planned, external_lock)?));
        }

        let allocator = vk_mem::Allocator::new(vk_mem::AllocatorCreateInfo::new(
            &instance, &device, pdevice,
        ))?;

        let mut glsl = GlslDialect {
            version: 450,
            vulkan: true,
        };
        if info.max_glsl_version != 0 {
            glsl.clamp(info.max_glsl_version);
            info!(
                "Restricting GLSL version to {}... new version is {}",
                info.max_glsl_version, glsl.version
            );
        }

        device_guard.device = None;
        Ok(Context {
            instance: owner,
            pdevice,
            device,
            imported: false,
            api_version,
            properties,
            device_uuid: id_props.device_uuid,
            extensions: exts,
            features: negotiated,
            device_fns,
            allocator: ManuallyDrop::new(allocator),
            pools,
            graphics: plan.graphics,
            compute: plan.compute,
            transfer: plan.transfer,
            lock: info.lock.clone(),
            glsl,
        })
    }

    /// Adopt an externally owned instance/device pair.
    ///
    /// The caller declares which extensions, features, and queues the device
    /// was created with; they are trusted, re-validated only where cheap
    /// (version floor, timeline semaphores). The imported handles are never
    /// destroyed: teardown releases only what this context created itself
    /// (command pools, allocator).
    ///
    /// # Safety
    ///
    /// The raw handles must be valid, created against each other, and must
    /// outlive the returned context.
    pub unsafe fn import(info: &ImportInfo) -> Result<Self> {
        let entry = match info.get_proc_addr {
            Some(get_instance_proc_addr) => ash::Entry::from_static_fn(vk::StaticFn {
                get_instance_proc_addr,
            }),
            None => ash::Entry::load()?,
        };
        let instance = ash::Instance::load(entry.static_fn(), info.instance);

        check_mandatory_instance_fns(raw_instance_lookup(&entry, instance.handle()))?;

        let pdevice = info.physical_device;
        let device = ash::Device::load(instance.fp_v1_0(), info.device);

        let mut id_props = vk::PhysicalDeviceIDProperties::default();
        let mut props2 = vk::PhysicalDeviceProperties2::builder()
            .push_next(&mut id_props)
            .build();
        instance.get_physical_device_properties2(pdevice, &mut props2);
        let properties = props2.properties;

        let device_name = CStr::from_ptr(properties.device_name.as_ptr());
        info!("Imported vulkan device properties:");
        info!("    Device Name: {}", device_name.to_string_lossy());
        info!(
            "    Device ID: {:x}:{:x}",
            properties.vendor_id, properties.device_id
        );
        info!("    Device UUID: {}", format_uuid(&id_props.device_uuid));
        info!("    Driver version: {}", properties.driver_version);
        info!("    API version: {}", ApiVersion(properties.api_version));

        let mut api_version = properties.api_version;
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
                "Device API version {} is lower than the minimum required version {}, cannot proceed!",
                ApiVersion(api_version),
                ApiVersion(MIN_API_VERSION)
            );
            return Err(GPUError::ApiVersionTooLow {
                found: ApiVersion(api_version),
                min: ApiVersion(MIN_API_VERSION),
            });
        }

        let features = info.features.clone();
        if !features.contains(FeatureBlock::TimelineSemaphore(
            TimelineSemaphoreFeatures::TIMELINE_SEMAPHORE,
        )) {
            error!(
                "Imported vulkan device does not support timeline semaphores. \
                 Please enable this device feature."
            );
            return Err(GPUError::TimelineSemaphoresUnsupported);
        }

        let exts: Vec<CString> = info
            .extensions
            .iter()
            .filter_map(|name| CString::new(name.as_str()).ok())
            .collect();
        let device_fns = load_device_fns(
            api_version,
            &exts,
            raw_device_lookup(&instance, device.handle()),
        );

        let family_props = instance.get_physical_device_queue_family_properties(pdevice);
        let external_lock = info.lock.is_some();

        // Create a pool for every explicitly assigned role, deduplicated
        // by family index.
        let assignments = [
            (QueueType::Graphics, info.queue_graphics),
            (QueueType::Compute, info.queue_compute),
            (QueueType::Transfer, info.queue_transfer),
        ];
        let mut pools: Vec<Arc<QueuePool>> = Vec::new();
        let mut roles: [Option<usize>; 3] = [None; 3];
        for (slot, (role, assignment)) in assignments.iter().enumerate() {
            let Some(assignment) = assignment else {
                continue;
            };
            if assignment.count == 0 {
                continue;
            }
            let family = family_props
                .get(assignment.family as usize)
                .ok_or(GPUError::NoQueueFamily(*role))?;

            if let Some(existing) = pools
                .iter()
                .position(|pool| pool.family() == assignment.family)
            {
                roles[slot] = Some(existing);
                continue;
            }

            let planned = PlannedPool {
                family: assignment.family,
                caps: queue_caps_from_vk(family.queue_flags),
                queue_count: assignment.count.min(family.queue_count).max(1),
            };
            pools.push(Arc::new(QueuePool::new(&device, &planned, external_lock)?));
            roles[slot] = Some(pools.len() - 1);
        }

        // Unassigned roles fall back to the first pool whose family covers
        // them; transfer accepts any of the three capabilities.
        let fallback = |caps: QueueCaps, pools: &[Arc<QueuePool>]| {
            pools.iter().position(|pool| pool.caps().intersects(caps))
        };
        if roles[1].is_none() {
            roles[1] = fallback(QueueCaps::COMPUTE, &pools);
        }
        if roles[2].is_none() {
            roles[2] = fallback(
                QueueCaps::TRANSFER | QueueCaps::GRAPHICS | QueueCaps::COMPUTE,
                &pools,
            );
        }

        let graphics = match roles[0] {
            Some(graphics) => graphics,
            None => {
                error!("No valid queues provided?");
                return Err(GPUError::NoQueueFamily(QueueType::Graphics));
            }
        };
        let compute = roles[1].unwrap_or(graphics);
        let transfer = roles[2].unwrap_or(compute);

        let allocator = vk_mem::Allocator::new(vk_mem::AllocatorCreateInfo::new(
            &instance, &device, pdevice,
        ))?;

        let mut glsl = GlslDialect {
            version: 450,
            vulkan: true,
        };
        if info.max_glsl_version != 0 {
            glsl.clamp(info.max_glsl_version);
            info!(
                "Restricting GLSL version to {}... new version is {}",
                info.max_glsl_version, glsl.version
            );
        }

        Ok(Context {
            instance: InstanceOwner::Imported { entry, instance },
            pdevice,
            device,
            imported: true,
            api_version,
            properties,
            device_uuid: id_props.device_uuid,
            extensions: exts,
            features,
            device_fns,
            allocator: ManuallyDrop::new(allocator),
            pools,
            graphics,
            compute,
            transfer,
            lock: info.lock.clone(),
            glsl,
        })
    }

    pub fn instance(&self) -> &ash::Instance {
        self.instance.handle()
    }

    pub fn entry(&self) -> &ash::Entry {
        self.instance.entry()
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.pdevice
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn is_imported(&self) -> bool {
        self.imported
    }

    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn device_uuid(&self) -> [u8; UUID_SIZE] {
        self.device_uuid
    }

    /// Device extensions that were explicitly enabled.
    pub fn extensions(&self) -> &[CString] {
        &self.extensions
    }

    /// Whether a catalog capability is usable: either its extension was
    /// enabled, or the active API version subsumes it.
    pub fn has_capability(&self, name: &CStr) -> bool {
        entry_points::extension_available(self.api_version, &self.extensions, name)
    }

    /// The negotiated feature chain. Every set bit was requested by the
    /// library or the caller *and* reported supported by the device.
    pub fn features(&self) -> &FeatureChain {
        &self.features
    }

    pub fn device_fns(&self) -> &DeviceFns {
        &self.device_fns
    }

    /// Instance-level optional entry points. Imported contexts carry an
    /// empty table, since their enabled instance extensions are unknown.
    pub fn instance_fns(&self) -> Option<&InstanceFns> {
        match &self.instance {
            InstanceOwner::Owned(instance) => Some(instance.fns()),
            InstanceOwner::Imported { .. } => None,
        }
    }

    pub fn allocator(&self) -> &vk_mem::Allocator {
        &self.allocator
    }

    pub fn glsl(&self) -> GlslDialect {
        self.glsl
    }

    pub fn queue_pool(&self, role: QueueType) -> &QueuePool {
        let idx = match role {
            QueueType::Graphics => self.graphics,
            QueueType::Compute => self.compute,
            QueueType::Transfer => self.transfer,
        };
        &self.pools[idx]
    }

    pub fn queue_family(&self, role: QueueType) -> u32 {
        self.queue_pool(role).family()
    }

    /// Acquire exclusive access to the queue at `(family, index)`.
    ///
    /// Submissions to that queue are only safe while the guard lives. With
    /// external locking installed, the caller's callbacks bracket the guard
    /// instead of an internal mutex. Returns `None` for an unknown family
    /// or an out-of-range index.
    pub fn lock_queue(&self, family: u32, index: usize) -> Option<QueueGuard<'_>> {
        let pool = self.pools.iter().find(|pool| pool.family() == family)?;
        let queue = pool.queue(index)?;

        match &self.lock {
            Some(lock) => Some(QueueGuard::external(
                queue,
                family,
                index as u32,
                lock.as_ref(),
            )),
            None => {
                let guard = pool.lock_index(index)?;
                Some(QueueGuard::internal(queue, family, index as u32, guard))
            }
        }
    }

    /// Tear the context down, releasing everything it owns. Imported native
    /// handles are left untouched.
    pub fn destroy(self) {}
}

impl Drop for Context {
    fn drop(&mut self) {
        // Reverse construction order: allocator, pools, device, instance.
        unsafe { ManuallyDrop::drop(&mut self.allocator) };
        self.pools.clear();

        if !self.imported {
            debug!("Waiting for remaining commands...");
            unsafe {
                let _ = self.device.device_wait_idle();
                self.device.destroy_device(None);
            }
        }
        // The instance owner drops last; imported instances are not ours to
        // destroy.
    }
}

fn dedup_extensions(names: &mut Vec<CString>) {
    let mut seen = std::collections::HashSet::new();
    names.retain(|name| seen.insert(name.clone()));
}
