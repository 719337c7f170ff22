use log::{debug, info};

/// Size of a driver-reported device UUID in bytes.
pub const UUID_SIZE: usize = 16;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Dedicated,
    Integrated,
    Virtual,
    Software,
    #[default]
    Other,
}

impl DeviceType {
    /// Selection priority when the caller pinned neither UUID nor name.
    fn priority(self) -> i32 {
        match self {
            DeviceType::Dedicated => 5,
            DeviceType::Integrated => 4,
            DeviceType::Virtual => 3,
            DeviceType::Software => 2,
            DeviceType::Other => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DeviceType::Dedicated => "discrete",
            DeviceType::Integrated => "integrated",
            DeviceType::Virtual => "virtual",
            DeviceType::Software => "software",
            DeviceType::Other => "other",
        }
    }
}

/// A physical device as seen during selection. Transient: candidates are
/// built, scored, and discarded; only the winning handle survives.
#[derive(Debug, Default, Clone)]
pub struct DeviceCandidate {
    pub name: String,
    pub uuid: [u8; UUID_SIZE],
    pub vendor_id: u32,
    pub device_id: u32,
    pub kind: DeviceType,
    pub api_version: u32,
    /// Whether the device can present to the caller's surface. Stays `true`
    /// when no surface was requested.
    pub supports_surface: bool,
}

/// Filters applied while picking a physical device.
#[derive(Debug, Default, Clone)]
pub struct DeviceConstraints {
    /// Exact-match UUID pin. Takes precedence over everything else.
    pub uuid: Option<[u8; UUID_SIZE]>,
    /// Exact-match name pin, consulted only when no UUID is pinned.
    pub name: Option<String>,
    pub allow_software: bool,
    pub min_api_version: u32,
}

pub(crate) fn format_uuid(uuid: &[u8; UUID_SIZE]) -> String {
    let mut out = String::with_capacity(UUID_SIZE * 2 + 4);
    for (i, byte) in uuid.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            out.push('-');
        }
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Pick the best candidate index, or `None` when nothing survives filtering.
///
/// Precedence: UUID pin (exact match only, non-matches skipped entirely),
/// then name pin (exact string match only), then type-priority scoring over
/// candidates that pass the surface / software / API-version filters. Ties on
/// priority go to the first-enumerated candidate, preserving the driver's
/// reported order.
pub fn pick_device(
    candidates: &[DeviceCandidate],
    constraints: &DeviceConstraints,
) -> Option<usize> {
    info!("Probing {} device candidate(s):", candidates.len());

    let mut best = -1;
    let mut chosen = None;
    for (idx, candidate) in candidates.iter().enumerate() {
        info!(
            "    GPU {}: {} ({})",
            idx,
            candidate.name,
            candidate.kind.label()
        );
        info!("           uuid: {}", format_uuid(&candidate.uuid));

        if !candidate.supports_surface {
            debug!("      -> excluding due to lack of surface support");
            continue;
        }

        if let Some(uuid) = constraints.uuid {
            if candidate.uuid == uuid {
                chosen = Some(idx);
            } else {
                debug!("      -> excluding due to UUID mismatch");
            }
            continue;
        }

        if let Some(name) = constraints.name.as_deref().filter(|n| !n.is_empty()) {
            if candidate.name == name {
                chosen = Some(idx);
            } else {
                debug!("      -> excluding due to name mismatch");
            }
            continue;
        }

        if !constraints.allow_software && candidate.kind == DeviceType::Software {
            debug!("      -> excluding because software devices are not allowed");
            continue;
        }

        if candidate.api_version < constraints.min_api_version {
            debug!("      -> excluding due to too low API version");
            continue;
        }

        let priority = candidate.kind.priority();
        if priority > best {
            best = priority;
            chosen = Some(idx);
        }
    }

    chosen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, kind: DeviceType) -> DeviceCandidate {
        DeviceCandidate {
            name: name.to_string(),
            kind,
            api_version: u32::MAX,
            supports_surface: true,
            ..Default::default()
        }
    }

    #[test]
    fn prefers_discrete_over_integrated() {
        let candidates = [
            candidate("iGPU", DeviceType::Integrated),
            candidate("dGPU", DeviceType::Dedicated),
            candidate("other", DeviceType::Other),
        ];
        let picked = pick_device(&candidates, &DeviceConstraints::default());
        assert_eq!(picked, Some(1));
    }

    #[test]
    fn first_enumerated_wins_priority_ties() {
        let candidates = [
            candidate("dGPU 0", DeviceType::Dedicated),
            candidate("dGPU 1", DeviceType::Dedicated),
        ];
        let picked = pick_device(&candidates, &DeviceConstraints::default());
        assert_eq!(picked, Some(0));
    }

    #[test]
    fn selection_is_deterministic_over_reruns() {
        let candidates = [
            candidate("a", DeviceType::Integrated),
            candidate("b", DeviceType::Dedicated),
            candidate("c", DeviceType::Dedicated),
        ];
        let constraints = DeviceConstraints::default();
        let first = pick_device(&candidates, &constraints);
        for _ in 0..8 {
            assert_eq!(pick_device(&candidates, &constraints), first);
        }
    }

    #[test]
    fn software_devices_need_explicit_permission() {
        let candidates = [candidate("llvmpipe", DeviceType::Software)];
        assert_eq!(pick_device(&candidates, &DeviceConstraints::default()), None);

        let constraints = DeviceConstraints {
            allow_software: true,
            ..Default::default()
        };
        assert_eq!(pick_device(&candidates, &constraints), Some(0));
    }

    #[test]
    fn uuid_pin_ignores_name_matches() {
        let mut named = candidate("Radeon", DeviceType::Dedicated);
        named.uuid = [1; UUID_SIZE];

        let constraints = DeviceConstraints {
            uuid: Some([2; UUID_SIZE]),
            name: Some("Radeon".to_string()),
            ..Default::default()
        };

        // A same-named candidate must not satisfy a UUID pin.
        assert_eq!(pick_device(&[named.clone()], &constraints), None);

        let mut pinned = named.clone();
        pinned.uuid = [2; UUID_SIZE];
        assert_eq!(pick_device(&[named, pinned], &constraints), Some(1));
    }

    #[test]
    fn name_pin_is_exact_match_only() {
        let candidates = [
            candidate("Radeon RX", DeviceType::Dedicated),
            candidate("Radeon", DeviceType::Integrated),
        ];
        let constraints = DeviceConstraints {
            name: Some("Radeon".to_string()),
            ..Default::default()
        };
        assert_eq!(pick_device(&candidates, &constraints), Some(1));
    }

    #[test]
    fn surface_and_version_filters_apply_before_scoring() {
        let mut no_surface = candidate("dGPU", DeviceType::Dedicated);
        no_surface.supports_surface = false;

        let mut old = candidate("old dGPU", DeviceType::Dedicated);
        old.api_version = 1;

        let candidates = [no_surface, old, candidate("iGPU", DeviceType::Integrated)];
        let constraints = DeviceConstraints {
            min_api_version: 2,
            ..Default::default()
        };
        assert_eq!(pick_device(&candidates, &constraints), Some(2));
    }

    #[test]
    fn uuid_formatting_is_stable() {
        let mut uuid = [0u8; UUID_SIZE];
        uuid[0] = 0xab;
        uuid[15] = 0x01;
        assert_eq!(
            format_uuid(&uuid),
            "ab000000-0000-0000-0000-000000000001"
        );
    }
}
