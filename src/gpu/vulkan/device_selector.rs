use ash::{extensions::khr, vk};
use log::debug;
use std::ffi::CStr;

use crate::gpu::device_selector::{pick_device, DeviceCandidate, DeviceConstraints, DeviceType};
use crate::gpu::DeviceSelection;

use super::instance::MIN_API_VERSION;
use super::Result;

impl From<vk::PhysicalDeviceType> for DeviceType {
    fn from(value: vk::PhysicalDeviceType) -> Self {
        match value {
            vk::PhysicalDeviceType::DISCRETE_GPU => DeviceType::Dedicated,
            vk::PhysicalDeviceType::INTEGRATED_GPU => DeviceType::Integrated,
            vk::PhysicalDeviceType::VIRTUAL_GPU => DeviceType::Virtual,
            vk::PhysicalDeviceType::CPU => DeviceType::Software,
            _ => DeviceType::Other,
        }
    }
}

/// Constraints for [`choose_device`].
#[derive(Default)]
pub struct DeviceQuery {
    pub selection: DeviceSelection,
    pub allow_software: bool,
    /// When set, only devices that can present to this surface are
    /// considered.
    pub surface: Option<vk::SurfaceKHR>,
}

fn supports_surface(
    surface_loader: &khr::Surface,
    instance: &ash::Instance,
    pdevice: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> bool {
    let family_count =
        unsafe { instance.get_physical_device_queue_family_properties(pdevice) }.len();
    for family in 0..family_count as u32 {
        let supported = unsafe {
            surface_loader.get_physical_device_surface_support(pdevice, family, surface)
        };
        if supported.unwrap_or(false) {
            return true;
        }
    }
    false
}

/// Read the identifying properties of every enumerated physical device.
pub(crate) fn enumerate_candidates(
    entry: &ash::Entry,
    instance: &ash::Instance,
    surface: Option<vk::SurfaceKHR>,
) -> Result<Vec<(vk::PhysicalDevice, DeviceCandidate)>> {
    let surface_loader = surface.map(|_| khr::Surface::new(entry, instance));

    let mut candidates = Vec::new();
    for pdevice in unsafe { instance.enumerate_physical_devices() }? {
        let mut id_props = vk::PhysicalDeviceIDProperties::default();
        let mut props = vk::PhysicalDeviceProperties2::builder()
            .push_next(&mut id_props)
            .build();
        unsafe { instance.get_physical_device_properties2(pdevice, &mut props) };
        let props = props.properties;

        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
            .to_str()
            .unwrap_or("UNKNOWN")
            .to_string();

        let supports_surface = match (&surface_loader, surface) {
            (Some(loader), Some(surface)) => {
                supports_surface(loader, instance, pdevice, surface)
            }
            _ => true,
        };

        candidates.push((
            pdevice,
            DeviceCandidate {
                name,
                uuid: id_props.device_uuid,
                vendor_id: props.vendor_id,
                device_id: props.device_id,
                kind: props.device_type.into(),
                api_version: props.api_version,
                supports_surface,
            },
        ));
    }

    Ok(candidates)
}

/// Pick a physical device for the given constraints, without building a
/// full context. Returns `Ok(None)` when nothing survives filtering; only
/// the enumeration itself can error.
pub fn choose_device(
    entry: &ash::Entry,
    instance: &ash::Instance,
    query: &DeviceQuery,
) -> Result<Option<vk::PhysicalDevice>> {
    let candidates = enumerate_candidates(entry, instance, query.surface)?;

    let constraints = DeviceConstraints {
        uuid: match query.selection {
            DeviceSelection::Uuid(uuid) => Some(uuid),
            _ => None,
        },
        name: match &query.selection {
            DeviceSelection::Name(name) => Some(name.clone()),
            _ => None,
        },
        allow_software: query.allow_software,
        min_api_version: MIN_API_VERSION,
    };

    let infos: Vec<DeviceCandidate> = candidates.iter().map(|(_, c)| c.clone()).collect();
    let picked = pick_device(&infos, &constraints);
    if picked.is_none() {
        debug!("No physical device survived selection");
    }

    Ok(picked.map(|idx| candidates[idx].0))
}
