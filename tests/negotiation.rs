use roux::{
    pick_device, plan_queues, CoreFeatures, DeviceCandidate, DeviceConstraints, DeviceType,
    FeatureBlock, FeatureChain, FeatureTag, QueueCaps, QueueFamily, TimelineSemaphoreFeatures,
};

fn candidate(name: &str, kind: DeviceType, uuid_byte: u8) -> DeviceCandidate {
    DeviceCandidate {
        name: name.to_string(),
        uuid: [uuid_byte; 16],
        kind,
        api_version: u32::MAX,
        supports_surface: true,
        ..Default::default()
    }
}

#[test]
fn negotiation_never_enables_what_the_device_lacks() {
    // Caller asks for everything; the device supports a sliver.
    let mut caller = FeatureChain::new();
    caller.push(FeatureBlock::Core(CoreFeatures::all()));
    caller.push(FeatureBlock::TimelineSemaphore(
        TimelineSemaphoreFeatures::all(),
    ));

    let mut requested = FeatureChain::recommended();
    requested.merge(&caller);

    let mut supported = FeatureChain::new();
    supported.push(FeatureBlock::Core(CoreFeatures::SHADER_INT64));
    supported.push(FeatureBlock::TimelineSemaphore(
        TimelineSemaphoreFeatures::all(),
    ));

    requested.mask(&supported);

    for block in requested.blocks() {
        assert!(supported.contains(block));
    }
    assert!(requested.contains(FeatureBlock::TimelineSemaphore(
        TimelineSemaphoreFeatures::TIMELINE_SEMAPHORE
    )));
    assert!(!requested.contains(FeatureBlock::Core(
        CoreFeatures::FRAGMENT_STORES_AND_ATOMICS
    )));
}

#[test]
fn caller_blocks_never_displace_library_blocks() {
    let mut chain = FeatureChain::recommended();
    let before = chain.get(FeatureTag::Core);

    // A duplicate core block from the caller is ignored outright.
    assert!(!chain.push(FeatureBlock::Core(CoreFeatures::empty())));
    assert_eq!(chain.get(FeatureTag::Core), before);
}

#[test]
fn uuid_pin_beats_name_and_scoring() {
    let candidates = [
        candidate("GPU", DeviceType::Dedicated, 1),
        candidate("GPU", DeviceType::Integrated, 2),
    ];

    // Pin the weaker device by UUID; scoring would have preferred index 0.
    let constraints = DeviceConstraints {
        uuid: Some([2; 16]),
        name: Some("GPU".to_string()),
        ..Default::default()
    };
    assert_eq!(pick_device(&candidates, &constraints), Some(1));

    // A UUID that matches nothing selects nothing, same-named candidates
    // notwithstanding.
    let constraints = DeviceConstraints {
        uuid: Some([9; 16]),
        name: Some("GPU".to_string()),
        ..Default::default()
    };
    assert_eq!(pick_device(&candidates, &constraints), None);
}

#[test]
fn selection_is_reproducible() {
    let candidates = [
        candidate("a", DeviceType::Other, 1),
        candidate("b", DeviceType::Virtual, 2),
        candidate("c", DeviceType::Virtual, 3),
        candidate("d", DeviceType::Integrated, 4),
    ];
    let constraints = DeviceConstraints::default();
    let expected = pick_device(&candidates, &constraints);
    assert_eq!(expected, Some(3));
    for _ in 0..16 {
        assert_eq!(pick_device(&candidates, &constraints), expected);
    }
}

#[test]
fn compute_and_transfer_share_one_pool_when_the_family_is_shared() {
    let families = [
        QueueFamily {
            index: 0,
            caps: QueueCaps::GRAPHICS | QueueCaps::COMPUTE | QueueCaps::TRANSFER,
            queue_count: 8,
        },
        QueueFamily {
            index: 1,
            caps: QueueCaps::COMPUTE | QueueCaps::TRANSFER,
            queue_count: 2,
        },
    ];

    let plan = plan_queues(&families, true, true, 1).expect("graphics family exists");
    assert_eq!(plan.pools.len(), 2);
    assert_eq!(
        plan.compute, plan.transfer,
        "both roles must alias one pool, not get independent pools"
    );
}

mod catalog {
    use ash::vk;
    use roux::{extension_available, DEVICE_EXTENSIONS};

    #[test]
    fn implied_capabilities_need_no_extension_listing() {
        for spec in DEVICE_EXTENSIONS {
            if spec.core_version != 0 {
                assert!(extension_available(spec.core_version, &[], spec.name));
            }
        }
        // And nothing becomes available below its core version without
        // being enabled.
        for spec in DEVICE_EXTENSIONS {
            assert!(
                !extension_available(vk::API_VERSION_1_1, &[], spec.name)
                    || spec.core_version == vk::API_VERSION_1_1
            );
        }
    }
}
