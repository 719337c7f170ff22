use bitflags::bitflags;
use std::collections::BTreeMap;

/// Type tag identifying a feature block within a request chain.
///
/// A chain holds at most one block per tag; merging and masking operate
/// per-tag on the block's sub-feature bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureTag {
    Core,
    TimelineSemaphore,
    HostQueryReset,
    DescriptorIndexing,
}

bitflags! {
    /// Baseline device features negotiated for every context.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CoreFeatures: u64 {
        const SHADER_IMAGE_GATHER_EXTENDED        = 0x1;
        const STORAGE_IMAGE_READ_WITHOUT_FORMAT   = 0x2;
        const STORAGE_IMAGE_WRITE_WITHOUT_FORMAT  = 0x4;
        const FRAGMENT_STORES_AND_ATOMICS         = 0x8;
        const VERTEX_PIPELINE_STORES_AND_ATOMICS  = 0x10;
        const SHADER_INT64                        = 0x20;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TimelineSemaphoreFeatures: u64 {
        const TIMELINE_SEMAPHORE = 0x1;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HostQueryResetFeatures: u64 {
        const HOST_QUERY_RESET = 0x1;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DescriptorIndexingFeatures: u64 {
        const PARTIALLY_BOUND                        = 0x1;
        const SAMPLED_IMAGE_UPDATE_AFTER_BIND        = 0x2;
        const UNIFORM_BUFFER_UPDATE_AFTER_BIND       = 0x4;
        const STORAGE_BUFFER_UPDATE_AFTER_BIND       = 0x8;
        const STORAGE_IMAGE_UPDATE_AFTER_BIND        = 0x10;
        const SAMPLED_IMAGE_NON_UNIFORM_INDEXING     = 0x20;
        const UNIFORM_BUFFER_NON_UNIFORM_INDEXING    = 0x40;
        const STORAGE_BUFFER_NON_UNIFORM_INDEXING    = 0x80;
    }
}

/// A single typed feature block: one tag, one bitset of sub-features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureBlock {
    Core(CoreFeatures),
    TimelineSemaphore(TimelineSemaphoreFeatures),
    HostQueryReset(HostQueryResetFeatures),
    DescriptorIndexing(DescriptorIndexingFeatures),
}

impl FeatureBlock {
    pub fn tag(&self) -> FeatureTag {
        match self {
            FeatureBlock::Core(_) => FeatureTag::Core,
            FeatureBlock::TimelineSemaphore(_) => FeatureTag::TimelineSemaphore,
            FeatureBlock::HostQueryReset(_) => FeatureTag::HostQueryReset,
            FeatureBlock::DescriptorIndexing(_) => FeatureTag::DescriptorIndexing,
        }
    }

    pub(crate) fn bits(&self) -> u64 {
        match self {
            FeatureBlock::Core(f) => f.bits(),
            FeatureBlock::TimelineSemaphore(f) => f.bits(),
            FeatureBlock::HostQueryReset(f) => f.bits(),
            FeatureBlock::DescriptorIndexing(f) => f.bits(),
        }
    }

    pub(crate) fn from_bits(tag: FeatureTag, bits: u64) -> FeatureBlock {
        match tag {
            FeatureTag::Core => FeatureBlock::Core(CoreFeatures::from_bits_truncate(bits)),
            FeatureTag::TimelineSemaphore => {
                FeatureBlock::TimelineSemaphore(TimelineSemaphoreFeatures::from_bits_truncate(bits))
            }
            FeatureTag::HostQueryReset => {
                FeatureBlock::HostQueryReset(HostQueryResetFeatures::from_bits_truncate(bits))
            }
            FeatureTag::DescriptorIndexing => FeatureBlock::DescriptorIndexing(
                DescriptorIndexingFeatures::from_bits_truncate(bits),
            ),
        }
    }
}

/// An extensible request (or report) of device features, keyed by type tag.
///
/// Each tag appears at most once. The negotiation pipeline builds the
/// library-recommended chain, merges the caller's chain into it, queries the
/// device with the identical tag structure, and masks the merged request down
/// to what the device actually reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureChain {
    blocks: BTreeMap<FeatureTag, u64>,
}

impl FeatureChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// The feature set this library asks for on behalf of every caller.
    ///
    /// Everything here is still masked against device support; only the
    /// timeline semaphore bit is load-bearing afterwards.
    pub fn recommended() -> Self {
        let mut chain = FeatureChain::new();
        chain.push(FeatureBlock::Core(
            CoreFeatures::SHADER_IMAGE_GATHER_EXTENDED
                | CoreFeatures::STORAGE_IMAGE_READ_WITHOUT_FORMAT
                | CoreFeatures::STORAGE_IMAGE_WRITE_WITHOUT_FORMAT
                | CoreFeatures::FRAGMENT_STORES_AND_ATOMICS
                | CoreFeatures::VERTEX_PIPELINE_STORES_AND_ATOMICS
                | CoreFeatures::SHADER_INT64,
        ));
        chain.push(FeatureBlock::HostQueryReset(HostQueryResetFeatures::all()));
        chain.push(FeatureBlock::TimelineSemaphore(
            TimelineSemaphoreFeatures::all(),
        ));
        chain.push(FeatureBlock::DescriptorIndexing(
            DescriptorIndexingFeatures::all(),
        ));
        chain
    }

    /// Append a block. If a block with the same tag is already present the
    /// existing one wins and `false` is returned.
    pub fn push(&mut self, block: FeatureBlock) -> bool {
        match self.blocks.entry(block.tag()) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(block.bits());
                true
            }
        }
    }

    /// Merge `other` into `self`: tags unique to either side are kept, and
    /// where both sides carry the same tag the sub-feature bits are unioned.
    pub fn merge(&mut self, other: &FeatureChain) {
        for (&tag, &bits) in &other.blocks {
            *self.blocks.entry(tag).or_insert(0) |= bits;
        }
    }

    /// Mask every sub-feature down to `requested AND supported`.
    ///
    /// Tags absent from `supported` lose all their bits; the block itself
    /// stays so callers can still observe the (empty) negotiation result.
    pub fn mask(&mut self, supported: &FeatureChain) {
        for (tag, bits) in self.blocks.iter_mut() {
            *bits &= supported.blocks.get(tag).copied().unwrap_or(0);
        }
    }

    pub fn get(&self, tag: FeatureTag) -> Option<FeatureBlock> {
        self.blocks
            .get(&tag)
            .map(|&bits| FeatureBlock::from_bits(tag, bits))
    }

    /// Whether every sub-feature bit of `block` is enabled in this chain.
    pub fn contains(&self, block: FeatureBlock) -> bool {
        let have = self.blocks.get(&block.tag()).copied().unwrap_or(0);
        have & block.bits() == block.bits()
    }

    pub fn blocks(&self) -> impl Iterator<Item = FeatureBlock> + '_ {
        self.blocks
            .iter()
            .map(|(&tag, &bits)| FeatureBlock::from_bits(tag, bits))
    }

    pub fn tags(&self) -> impl Iterator<Item = FeatureTag> + '_ {
        self.blocks.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_rejects_duplicate_tags() {
        let mut chain = FeatureChain::new();
        assert!(chain.push(FeatureBlock::Core(CoreFeatures::SHADER_INT64)));
        assert!(!chain.push(FeatureBlock::Core(CoreFeatures::all())));

        // The first occurrence must survive untouched.
        assert_eq!(
            chain.get(FeatureTag::Core),
            Some(FeatureBlock::Core(CoreFeatures::SHADER_INT64))
        );
    }

    #[test]
    fn merge_unions_bits_and_keeps_unique_tags() {
        let mut a = FeatureChain::new();
        a.push(FeatureBlock::Core(CoreFeatures::SHADER_INT64));

        let mut b = FeatureChain::new();
        b.push(FeatureBlock::Core(CoreFeatures::FRAGMENT_STORES_AND_ATOMICS));
        b.push(FeatureBlock::TimelineSemaphore(
            TimelineSemaphoreFeatures::all(),
        ));

        a.merge(&b);
        assert!(a.contains(FeatureBlock::Core(
            CoreFeatures::SHADER_INT64 | CoreFeatures::FRAGMENT_STORES_AND_ATOMICS
        )));
        assert!(a.contains(FeatureBlock::TimelineSemaphore(
            TimelineSemaphoreFeatures::all()
        )));
    }

    #[test]
    fn mask_never_leaves_unsupported_bits() {
        let mut requested = FeatureChain::recommended();
        let mut supported = FeatureChain::new();
        supported.push(FeatureBlock::Core(
            CoreFeatures::SHADER_INT64 | CoreFeatures::SHADER_IMAGE_GATHER_EXTENDED,
        ));

        requested.mask(&supported);

        assert_eq!(
            requested.get(FeatureTag::Core),
            Some(FeatureBlock::Core(
                CoreFeatures::SHADER_INT64 | CoreFeatures::SHADER_IMAGE_GATHER_EXTENDED
            ))
        );
        // Tags the device never reported end up empty, not absent.
        assert_eq!(
            requested.get(FeatureTag::TimelineSemaphore),
            Some(FeatureBlock::TimelineSemaphore(
                TimelineSemaphoreFeatures::empty()
            ))
        );
    }

    #[test]
    fn masked_bits_are_a_subset_of_supported_for_arbitrary_chains() {
        // Deterministic xorshift; no randomness source needed.
        let mut state = 0x9e3779b97f4a7c15u64;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        for _ in 0..256 {
            let mut requested = FeatureChain::new();
            let mut caller = FeatureChain::new();
            let mut supported = FeatureChain::new();
            for tag in [
                FeatureTag::Core,
                FeatureTag::TimelineSemaphore,
                FeatureTag::HostQueryReset,
                FeatureTag::DescriptorIndexing,
            ] {
                if next() & 1 == 0 {
                    requested.push(FeatureBlock::from_bits(tag, next()));
                }
                if next() & 1 == 0 {
                    caller.push(FeatureBlock::from_bits(tag, next()));
                }
                if next() & 1 == 0 {
                    supported.push(FeatureBlock::from_bits(tag, next()));
                }
            }

            requested.merge(&caller);
            requested.mask(&supported);

            for block in requested.blocks() {
                assert!(
                    supported.contains(block),
                    "negotiated {:?} exceeds device support",
                    block
                );
            }
        }
    }
}
