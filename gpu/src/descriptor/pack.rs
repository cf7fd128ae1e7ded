//! Rotating group of descriptor sets.

use crate::backend::DescriptorSetHandle;

/// Number of sets in a pack.
pub const DESCRIPTOR_PACK_SIZE: usize = 6;

/// Six descriptor sets handed out in turn.
///
/// The same draw object can then be recorded into several in-flight frames
/// without rewriting a set the GPU may still be reading. The cursor moves
/// exactly once per [`next`](Self::next).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSetPack {
    sets: [DescriptorSetHandle; DESCRIPTOR_PACK_SIZE],
    cursor: usize,
}

impl DescriptorSetPack {
    /// Build a pack from freshly allocated sets.
    pub fn new(sets: [DescriptorSetHandle; DESCRIPTOR_PACK_SIZE]) -> Self {
        Self { sets, cursor: 0 }
    }

    /// Hand out the set under the cursor and advance it.
    pub fn next(&mut self) -> DescriptorSetHandle {
        let set = self.sets[self.cursor];
        self.cursor = (self.cursor + 1) % DESCRIPTOR_PACK_SIZE;
        set
    }

    /// Set handed out by the latest [`next`](Self::next).
    pub fn last(&self) -> DescriptorSetHandle {
        self.sets[(self.cursor + DESCRIPTOR_PACK_SIZE - 1) % DESCRIPTOR_PACK_SIZE]
    }

    /// All sets of the pack.
    pub fn sets(&self) -> &[DescriptorSetHandle; DESCRIPTOR_PACK_SIZE] {
        &self.sets
    }

    /// Rewind the cursor, used when a pack is recycled for another object.
    pub(crate) fn rewind(&mut self) {
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack() -> DescriptorSetPack {
        DescriptorSetPack::new(std::array::from_fn(|i| DescriptorSetHandle::Dummy(i as u64 + 10)))
    }

    #[test]
    fn test_period_is_six() {
        let mut pack = pack();
        let first = pack.next();
        for _ in 1..DESCRIPTOR_PACK_SIZE {
            assert_ne!(pack.next(), first);
        }
        assert_eq!(pack.next(), first);
    }

    #[test]
    fn test_last_tracks_next() {
        let mut pack = pack();
        let handed = pack.next();
        assert_eq!(pack.last(), handed);
        let handed = pack.next();
        assert_eq!(pack.last(), handed);
    }
}
