//! Per-object descriptor set cache.

use std::collections::HashMap;

use crate::backend::{DescriptorSetHandle, DescriptorSetLayoutHandle};
use crate::error::{GraphicsError, GraphicsResult};

use super::{DESCRIPTOR_PACK_SIZE, DescriptorPool, DescriptorSetPack};

/// Identity of a draw object: object id in the high half, sub-mesh index in
/// the low half.
pub fn object_identity(object_id: u32, sub_mesh: u32) -> u64 {
    (u64::from(object_id) << 32) | u64::from(sub_mesh)
}

/// Descriptor-set packs keyed by draw object identity.
///
/// Packs live in the map while their object is alive and move to a free
/// list on [`free`](Self::free). Sets are never returned to the native pool;
/// a freed pack is handed to the next new identity instead.
#[derive(Debug)]
pub struct DescriptorSetCache {
    layout: DescriptorSetLayoutHandle,
    packs: HashMap<u64, DescriptorSetPack>,
    free: Vec<DescriptorSetPack>,
}

impl DescriptorSetCache {
    /// Create an empty cache for sets of `layout`.
    pub fn new(layout: DescriptorSetLayoutHandle) -> Self {
        Self {
            layout,
            packs: HashMap::new(),
            free: Vec::new(),
        }
    }

    /// Next set for `identity`.
    ///
    /// A known identity rotates through its pack. A new identity takes a
    /// recycled pack or allocates six sets from `pool`.
    pub fn allocate(
        &mut self,
        identity: u64,
        pool: &mut DescriptorPool,
    ) -> GraphicsResult<DescriptorSetHandle> {
        if let Some(pack) = self.packs.get_mut(&identity) {
            return Ok(pack.next());
        }
        let pack = match self.free.pop() {
            Some(mut pack) => {
                pack.rewind();
                pack
            }
            None => {
                let sets = pool.allocate(&[self.layout; DESCRIPTOR_PACK_SIZE])?;
                let sets: [DescriptorSetHandle; DESCRIPTOR_PACK_SIZE] =
                    sets.try_into().map_err(|sets: Vec<_>| {
                        GraphicsError::Internal(format!(
                            "expected {} descriptor sets, got {}",
                            DESCRIPTOR_PACK_SIZE,
                            sets.len()
                        ))
                    })?;
                DescriptorSetPack::new(sets)
            }
        };
        Ok(self.packs.entry(identity).or_insert(pack).next())
    }

    /// Set most recently handed out for `identity`.
    pub fn current(&self, identity: u64) -> Option<DescriptorSetHandle> {
        self.packs.get(&identity).map(DescriptorSetPack::last)
    }

    /// Release the pack of `identity` for reuse. Returns whether it existed.
    pub fn free(&mut self, identity: u64) -> bool {
        match self.packs.remove(&identity) {
            Some(pack) => {
                self.free.push(pack);
                true
            }
            None => false,
        }
    }

    /// Layout of the cached sets.
    pub fn layout(&self) -> DescriptorSetLayoutHandle {
        self.layout
    }

    /// Number of identities with a pack.
    pub fn len(&self) -> usize {
        self.packs.len()
    }

    /// Whether no identity has a pack.
    pub fn is_empty(&self) -> bool {
        self.packs.is_empty()
    }

    /// Number of packs waiting for reuse.
    pub fn free_len(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::{DummyBackend, RenderBackend};
    use crate::descriptor::{DescriptorBinding, DescriptorPoolSize, DescriptorType};
    use crate::types::ShaderStages;

    fn setup() -> (DescriptorSetCache, DescriptorPool) {
        let backend: Arc<dyn RenderBackend> = Arc::new(DummyBackend::new());
        let layout = backend
            .create_descriptor_set_layout(&[DescriptorBinding::new(
                0,
                "albedo",
                DescriptorType::CombinedImageSampler,
                ShaderStages::FRAGMENT,
            )])
            .unwrap();
        let pool = DescriptorPool::new(backend, 64, DescriptorPoolSize::default_sizes()).unwrap();
        (DescriptorSetCache::new(layout), pool)
    }

    #[test]
    fn test_identity_packing() {
        assert_eq!(object_identity(1, 2), 0x0000_0001_0000_0002);
        assert_eq!(object_identity(u32::MAX, 0) >> 32, u64::from(u32::MAX));
    }

    #[test]
    fn test_seventh_allocation_matches_first() {
        let (mut cache, mut pool) = setup();
        let id = object_identity(7, 0);
        let handed: Vec<_> = (0..7).map(|_| cache.allocate(id, &mut pool).unwrap()).collect();
        assert_eq!(handed[6], handed[0]);
        assert_eq!(cache.current(id), Some(handed[6]));
        assert_eq!(pool.total_allocated(), 6);
    }

    #[test]
    fn test_freed_pack_is_recycled() {
        let (mut cache, mut pool) = setup();
        let first = cache.allocate(object_identity(1, 0), &mut pool).unwrap();
        assert!(cache.free(object_identity(1, 0)));
        assert!(!cache.free(object_identity(1, 0)));
        assert_eq!(cache.free_len(), 1);

        let reused = cache.allocate(object_identity(2, 0), &mut pool).unwrap();
        assert_eq!(reused, first);
        assert_eq!(cache.free_len(), 0);
        assert_eq!(pool.total_allocated(), 6);
    }

    #[test]
    fn test_distinct_identities_get_distinct_sets() {
        let (mut cache, mut pool) = setup();
        let a = cache.allocate(object_identity(1, 0), &mut pool).unwrap();
        let b = cache.allocate(object_identity(1, 1), &mut pool).unwrap();
        assert_ne!(a, b);
        assert_eq!(cache.len(), 2);
    }
}
