use bitflags::bitflags;
use log::{debug, info};

bitflags! {
    /// Capability flags of a queue family.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct QueueCaps: u32 {
        const GRAPHICS       = 0x1;
        const COMPUTE        = 0x2;
        const TRANSFER       = 0x4;
        const SPARSE_BINDING = 0x8;
        const PROTECTED      = 0x10;
    }
}

/// A queue family as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamily {
    pub index: u32,
    pub caps: QueueCaps,
    pub queue_count: u32,
}

/// One command pool to be created, plus how many queues it takes from the
/// family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedPool {
    pub family: u32,
    pub caps: QueueCaps,
    pub queue_count: u32,
}

/// Resolved queue roles. Multiple roles may point at the same pool when the
/// device lacks separate families; `pools` holds exactly one entry per
/// distinct family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePlan {
    pub pools: Vec<PlannedPool>,
    pub graphics: usize,
    pub compute: usize,
    pub transfer: usize,
}

/// Find the most specialized family supporting `required`.
///
/// Specialization counts only the graphics/compute/transfer bits: the family
/// with the fewest of them set wins, and equal specialization is broken by
/// the family exposing more queues. Remaining ties keep the first family
/// scanned.
pub fn find_family(families: &[QueueFamily], required: QueueCaps) -> Option<usize> {
    const MASK: QueueCaps = QueueCaps::GRAPHICS
        .union(QueueCaps::COMPUTE)
        .union(QueueCaps::TRANSFER);

    let mut best: Option<usize> = None;
    for (idx, family) in families.iter().enumerate() {
        if !family.caps.contains(required) {
            continue;
        }

        let specialization = (family.caps & MASK).bits().count_ones();
        best = match best {
            None => Some(idx),
            Some(current) => {
                let current_spec = (families[current].caps & MASK).bits().count_ones();
                if specialization < current_spec
                    || (specialization == current_spec
                        && family.queue_count > families[current].queue_count)
                {
                    Some(idx)
                } else {
                    Some(current)
                }
            }
        };
    }

    best
}

/// Assign families to the three queue roles and deduplicate them into pools.
///
/// `queue_count` is the caller-requested queues per pool (0 = as many as the
/// family exposes), clamped to family capacity. Disabling async compute or
/// transfer reuses the graphics family for that role. A device without a
/// graphics-capable family yields `None`.
pub fn plan_queues(
    families: &[QueueFamily],
    async_compute: bool,
    async_transfer: bool,
    queue_count: u32,
) -> Option<QueuePlan> {
    debug!("Queue families supported by device:");
    for family in families {
        debug!(
            "    {}: flags {:#x} num {}",
            family.index,
            family.caps.bits(),
            family.queue_count
        );
    }

    let mut gfx_caps = QueueCaps::GRAPHICS;
    if !async_compute {
        gfx_caps |= QueueCaps::COMPUTE;
    }

    let gfx = find_family(families, gfx_caps)?;
    let mut compute = find_family(families, QueueCaps::COMPUTE)?;
    let mut transfer = find_family(families, QueueCaps::TRANSFER).unwrap_or(compute);

    if !async_compute {
        compute = gfx;
    }
    if !async_transfer {
        transfer = gfx;
    }

    debug!("Using graphics queue family {}", families[gfx].index);
    if transfer != gfx {
        info!("Using async transfer (family {})", families[transfer].index);
    }
    if compute != gfx {
        info!("Using async compute (family {})", families[compute].index);
    }

    let mut pools: Vec<PlannedPool> = Vec::new();
    let mut role_slot = |family_idx: usize| -> usize {
        let family = &families[family_idx];
        if let Some(existing) = pools.iter().position(|p| p.family == family.index) {
            return existing;
        }

        let count = if queue_count == 0 {
            family.queue_count
        } else {
            queue_count.min(family.queue_count)
        };
        pools.push(PlannedPool {
            family: family.index,
            caps: family.caps,
            queue_count: count.max(1),
        });
        pools.len() - 1
    };

    let graphics = role_slot(gfx);
    let compute = role_slot(compute);
    let transfer = role_slot(transfer);

    Some(QueuePlan {
        pools,
        graphics,
        compute,
        transfer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(index: u32, caps: QueueCaps, queue_count: u32) -> QueueFamily {
        QueueFamily {
            index,
            caps,
            queue_count,
        }
    }

    #[test]
    fn specialization_beats_queue_count() {
        let families = [
            family(
                0,
                QueueCaps::GRAPHICS | QueueCaps::COMPUTE | QueueCaps::TRANSFER,
                16,
            ),
            family(1, QueueCaps::TRANSFER, 1),
        ];
        assert_eq!(find_family(&families, QueueCaps::TRANSFER), Some(1));
    }

    #[test]
    fn equal_specialization_prefers_more_queues() {
        let families = [
            family(0, QueueCaps::COMPUTE | QueueCaps::TRANSFER, 2),
            family(1, QueueCaps::COMPUTE | QueueCaps::TRANSFER, 8),
        ];
        assert_eq!(find_family(&families, QueueCaps::COMPUTE), Some(1));
    }

    #[test]
    fn exact_ties_keep_the_first_family() {
        let families = [
            family(0, QueueCaps::COMPUTE, 4),
            family(1, QueueCaps::COMPUTE, 4),
        ];
        assert_eq!(find_family(&families, QueueCaps::COMPUTE), Some(0));
    }

    #[test]
    fn sparse_binding_does_not_count_against_specialization() {
        let families = [
            family(0, QueueCaps::TRANSFER | QueueCaps::SPARSE_BINDING, 1),
            family(1, QueueCaps::TRANSFER | QueueCaps::COMPUTE, 4),
        ];
        assert_eq!(find_family(&families, QueueCaps::TRANSFER), Some(0));
    }

    #[test]
    fn shared_family_yields_one_pool_for_both_roles() {
        let families = [
            family(0, QueueCaps::GRAPHICS | QueueCaps::COMPUTE | QueueCaps::TRANSFER, 4),
            family(1, QueueCaps::COMPUTE | QueueCaps::TRANSFER, 2),
        ];
        let plan = plan_queues(&families, true, true, 1).unwrap();

        // Compute and transfer both resolve to family 1: one pool, two roles.
        assert_eq!(plan.pools.len(), 2);
        assert_eq!(plan.compute, plan.transfer);
        assert_ne!(plan.graphics, plan.compute);
        assert_eq!(plan.pools[plan.compute].family, 1);
    }

    #[test]
    fn disabling_async_roles_reuses_the_graphics_family() {
        let families = [
            family(0, QueueCaps::GRAPHICS | QueueCaps::COMPUTE | QueueCaps::TRANSFER, 4),
            family(1, QueueCaps::COMPUTE, 2),
            family(2, QueueCaps::TRANSFER, 2),
        ];
        let plan = plan_queues(&families, false, false, 1).unwrap();
        assert_eq!(plan.pools.len(), 1);
        assert_eq!(plan.graphics, plan.compute);
        assert_eq!(plan.graphics, plan.transfer);
    }

    #[test]
    fn transfer_only_device_role_falls_back_to_compute() {
        let families = [
            family(0, QueueCaps::GRAPHICS | QueueCaps::COMPUTE, 4),
            family(1, QueueCaps::COMPUTE, 2),
        ];
        // No family advertises transfer at all: the transfer role must land
        // on the compute pick, not vanish.
        let plan = plan_queues(&families, true, true, 1).unwrap();
        assert_eq!(plan.pools[plan.transfer].family, 1);
        assert_eq!(plan.transfer, plan.compute);
    }

    #[test]
    fn queue_count_is_clamped_to_family_capacity() {
        let families = [family(0, QueueCaps::GRAPHICS | QueueCaps::COMPUTE | QueueCaps::TRANSFER, 2)];
        let plan = plan_queues(&families, false, false, 8).unwrap();
        assert_eq!(plan.pools[0].queue_count, 2);

        let plan = plan_queues(&families, false, false, 0).unwrap();
        assert_eq!(plan.pools[0].queue_count, 2);
    }

    #[test]
    fn no_graphics_family_means_no_plan() {
        let families = [family(0, QueueCaps::COMPUTE | QueueCaps::TRANSFER, 2)];
        assert!(plan_queues(&families, true, true, 1).is_none());
    }
}
