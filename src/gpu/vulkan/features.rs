use ash::vk;

use crate::gpu::features::{
    CoreFeatures, DescriptorIndexingFeatures, FeatureBlock, FeatureChain, FeatureTag,
    HostQueryResetFeatures, TimelineSemaphoreFeatures,
};

fn flag(set: bool) -> vk::Bool32 {
    if set {
        vk::TRUE
    } else {
        vk::FALSE
    }
}

pub(crate) fn core_to_vk(features: CoreFeatures) -> vk::PhysicalDeviceFeatures {
    vk::PhysicalDeviceFeatures {
        shader_image_gather_extended: flag(
            features.contains(CoreFeatures::SHADER_IMAGE_GATHER_EXTENDED),
        ),
        shader_storage_image_read_without_format: flag(
            features.contains(CoreFeatures::STORAGE_IMAGE_READ_WITHOUT_FORMAT),
        ),
        shader_storage_image_write_without_format: flag(
            features.contains(CoreFeatures::STORAGE_IMAGE_WRITE_WITHOUT_FORMAT),
        ),
        fragment_stores_and_atomics: flag(
            features.contains(CoreFeatures::FRAGMENT_STORES_AND_ATOMICS),
        ),
        vertex_pipeline_stores_and_atomics: flag(
            features.contains(CoreFeatures::VERTEX_PIPELINE_STORES_AND_ATOMICS),
        ),
        shader_int64: flag(features.contains(CoreFeatures::SHADER_INT64)),
        ..Default::default()
    }
}

pub(crate) fn core_from_vk(features: &vk::PhysicalDeviceFeatures) -> CoreFeatures {
    let mut out = CoreFeatures::empty();
    if features.shader_image_gather_extended == vk::TRUE {
        out |= CoreFeatures::SHADER_IMAGE_GATHER_EXTENDED;
    }
    if features.shader_storage_image_read_without_format == vk::TRUE {
        out |= CoreFeatures::STORAGE_IMAGE_READ_WITHOUT_FORMAT;
    }
    if features.shader_storage_image_write_without_format == vk::TRUE {
        out |= CoreFeatures::STORAGE_IMAGE_WRITE_WITHOUT_FORMAT;
    }
    if features.fragment_stores_and_atomics == vk::TRUE {
        out |= CoreFeatures::FRAGMENT_STORES_AND_ATOMICS;
    }
    if features.vertex_pipeline_stores_and_atomics == vk::TRUE {
        out |= CoreFeatures::VERTEX_PIPELINE_STORES_AND_ATOMICS;
    }
    if features.shader_int64 == vk::TRUE {
        out |= CoreFeatures::SHADER_INT64;
    }
    out
}

pub(crate) fn timeline_to_vk(
    features: TimelineSemaphoreFeatures,
) -> vk::PhysicalDeviceTimelineSemaphoreFeatures {
    vk::PhysicalDeviceTimelineSemaphoreFeatures {
        timeline_semaphore: flag(features.contains(TimelineSemaphoreFeatures::TIMELINE_SEMAPHORE)),
        ..Default::default()
    }
}

pub(crate) fn timeline_from_vk(
    features: &vk::PhysicalDeviceTimelineSemaphoreFeatures,
) -> TimelineSemaphoreFeatures {
    if features.timeline_semaphore == vk::TRUE {
        TimelineSemaphoreFeatures::TIMELINE_SEMAPHORE
    } else {
        TimelineSemaphoreFeatures::empty()
    }
}

pub(crate) fn host_query_reset_to_vk(
    features: HostQueryResetFeatures,
) -> vk::PhysicalDeviceHostQueryResetFeatures {
    vk::PhysicalDeviceHostQueryResetFeatures {
        host_query_reset: flag(features.contains(HostQueryResetFeatures::HOST_QUERY_RESET)),
        ..Default::default()
    }
}

pub(crate) fn host_query_reset_from_vk(
    features: &vk::PhysicalDeviceHostQueryResetFeatures,
) -> HostQueryResetFeatures {
    if features.host_query_reset == vk::TRUE {
        HostQueryResetFeatures::HOST_QUERY_RESET
    } else {
        HostQueryResetFeatures::empty()
    }
}

pub(crate) fn descriptor_indexing_to_vk(
    features: DescriptorIndexingFeatures,
) -> vk::PhysicalDeviceDescriptorIndexingFeatures {
    vk::PhysicalDeviceDescriptorIndexingFeatures {
        descriptor_binding_partially_bound: flag(
            features.contains(DescriptorIndexingFeatures::PARTIALLY_BOUND),
        ),
        descriptor_binding_sampled_image_update_after_bind: flag(
            features.contains(DescriptorIndexingFeatures::SAMPLED_IMAGE_UPDATE_AFTER_BIND),
        ),
        descriptor_binding_uniform_buffer_update_after_bind: flag(
            features.contains(DescriptorIndexingFeatures::UNIFORM_BUFFER_UPDATE_AFTER_BIND),
        ),
        descriptor_binding_storage_buffer_update_after_bind: flag(
            features.contains(DescriptorIndexingFeatures::STORAGE_BUFFER_UPDATE_AFTER_BIND),
        ),
        descriptor_binding_storage_image_update_after_bind: flag(
            features.contains(DescriptorIndexingFeatures::STORAGE_IMAGE_UPDATE_AFTER_BIND),
        ),
        shader_sampled_image_array_non_uniform_indexing: flag(
            features.contains(DescriptorIndexingFeatures::SAMPLED_IMAGE_NON_UNIFORM_INDEXING),
        ),
        shader_uniform_buffer_array_non_uniform_indexing: flag(
            features.contains(DescriptorIndexingFeatures::UNIFORM_BUFFER_NON_UNIFORM_INDEXING),
        ),
        shader_storage_buffer_array_non_uniform_indexing: flag(
            features.contains(DescriptorIndexingFeatures::STORAGE_BUFFER_NON_UNIFORM_INDEXING),
        ),
        ..Default::default()
    }
}

pub(crate) fn descriptor_indexing_from_vk(
    features: &vk::PhysicalDeviceDescriptorIndexingFeatures,
) -> DescriptorIndexingFeatures {
    let mut out = DescriptorIndexingFeatures::empty();
    if features.descriptor_binding_partially_bound == vk::TRUE {
        out |= DescriptorIndexingFeatures::PARTIALLY_BOUND;
    }
    if features.descriptor_binding_sampled_image_update_after_bind == vk::TRUE {
        out |= DescriptorIndexingFeatures::SAMPLED_IMAGE_UPDATE_AFTER_BIND;
    }
    if features.descriptor_binding_uniform_buffer_update_after_bind == vk::TRUE {
        out |= DescriptorIndexingFeatures::UNIFORM_BUFFER_UPDATE_AFTER_BIND;
    }
    if features.descriptor_binding_storage_buffer_update_after_bind == vk::TRUE {
        out |= DescriptorIndexingFeatures::STORAGE_BUFFER_UPDATE_AFTER_BIND;
    }
    if features.descriptor_binding_storage_image_update_after_bind == vk::TRUE {
        out |= DescriptorIndexingFeatures::STORAGE_IMAGE_UPDATE_AFTER_BIND;
    }
    if features.shader_sampled_image_array_non_uniform_indexing == vk::TRUE {
        out |= DescriptorIndexingFeatures::SAMPLED_IMAGE_NON_UNIFORM_INDEXING;
    }
    if features.shader_uniform_buffer_array_non_uniform_indexing == vk::TRUE {
        out |= DescriptorIndexingFeatures::UNIFORM_BUFFER_NON_UNIFORM_INDEXING;
    }
    if features.shader_storage_buffer_array_non_uniform_indexing == vk::TRUE {
        out |= DescriptorIndexingFeatures::STORAGE_BUFFER_NON_UNIFORM_INDEXING;
    }
    out
}

/// Query the device for the features in `request`, using the identical tag
/// structure, and report what it supports as a chain of the same shape.
pub(crate) fn query_supported(
    instance: &ash::Instance,
    pdevice: vk::PhysicalDevice,
    request: &FeatureChain,
) -> FeatureChain {
    let mut timeline = vk::PhysicalDeviceTimelineSemaphoreFeatures::default();
    let mut host_query_reset = vk::PhysicalDeviceHostQueryResetFeatures::default();
    let mut descriptor_indexing = vk::PhysicalDeviceDescriptorIndexingFeatures::default();

    let mut builder = vk::PhysicalDeviceFeatures2::builder();
    if request.get(FeatureTag::TimelineSemaphore).is_some() {
        builder = builder.push_next(&mut timeline);
    }
    if request.get(FeatureTag::HostQueryReset).is_some() {
        builder = builder.push_next(&mut host_query_reset);
    }
    if request.get(FeatureTag::DescriptorIndexing).is_some() {
        builder = builder.push_next(&mut descriptor_indexing);
    }
    let mut features2 = builder.build();

    unsafe { instance.get_physical_device_features2(pdevice, &mut features2) };

    let mut supported = FeatureChain::new();
    if request.get(FeatureTag::Core).is_some() {
        supported.push(FeatureBlock::Core(core_from_vk(&features2.features)));
    }
    if request.get(FeatureTag::TimelineSemaphore).is_some() {
        supported.push(FeatureBlock::TimelineSemaphore(timeline_from_vk(&timeline)));
    }
    if request.get(FeatureTag::HostQueryReset).is_some() {
        supported.push(FeatureBlock::HostQueryReset(host_query_reset_from_vk(
            &host_query_reset,
        )));
    }
    if request.get(FeatureTag::DescriptorIndexing).is_some() {
        supported.push(FeatureBlock::DescriptorIndexing(
            descriptor_indexing_from_vk(&descriptor_indexing),
        ));
    }

    supported
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_bits_round_trip_through_vk() {
        let bits = CoreFeatures::SHADER_INT64 | CoreFeatures::FRAGMENT_STORES_AND_ATOMICS;
        assert_eq!(core_from_vk(&core_to_vk(bits)), bits);
        assert_eq!(core_from_vk(&core_to_vk(CoreFeatures::all())), CoreFeatures::all());
        assert_eq!(
            core_from_vk(&vk::PhysicalDeviceFeatures::default()),
            CoreFeatures::empty()
        );
    }

    #[test]
    fn descriptor_indexing_bits_round_trip_through_vk() {
        let bits = DescriptorIndexingFeatures::PARTIALLY_BOUND
            | DescriptorIndexingFeatures::STORAGE_BUFFER_NON_UNIFORM_INDEXING;
        assert_eq!(descriptor_indexing_from_vk(&descriptor_indexing_to_vk(bits)), bits);
    }

    #[test]
    fn timeline_flag_maps_to_a_single_bool() {
        let enabled = timeline_to_vk(TimelineSemaphoreFeatures::TIMELINE_SEMAPHORE);
        assert_eq!(enabled.timeline_semaphore, vk::TRUE);
        assert_eq!(
            timeline_from_vk(&enabled),
            TimelineSemaphoreFeatures::TIMELINE_SEMAPHORE
        );
        assert_eq!(
            timeline_from_vk(&vk::PhysicalDeviceTimelineSemaphoreFeatures::default()),
            TimelineSemaphoreFeatures::empty()
        );
    }
}
