//! Chained descriptor pool.

use std::sync::Arc;

use crate::backend::{
    DescriptorPoolHandle, DescriptorSetHandle, DescriptorSetLayoutHandle, RenderBackend,
};
use crate::error::{GraphicsError, GraphicsResult};

use super::DescriptorPoolSize;

/// A chain of fixed-capacity native descriptor pools.
///
/// Only the last link is allocated from. When it cannot hold a request, the
/// remainder goes into a newly appended link, so exhaustion is handled by
/// growth rather than failure. Links are never compacted or released before
/// the pool itself is dropped.
pub struct DescriptorPool {
    backend: Arc<dyn RenderBackend>,
    max_sets_per_pool: u32,
    sizes: Vec<DescriptorPoolSize>,
    chain: Vec<DescriptorPoolHandle>,
    allocated: u32,
    total_allocated: u64,
}

impl DescriptorPool {
    /// Create a pool with one link of `max_sets_per_pool` sets.
    pub fn new(
        backend: Arc<dyn RenderBackend>,
        max_sets_per_pool: u32,
        sizes: Vec<DescriptorPoolSize>,
    ) -> GraphicsResult<Self> {
        if max_sets_per_pool == 0 {
            return Err(GraphicsError::InvalidParameter(
                "descriptor pool capacity must be at least 1".to_string(),
            ));
        }
        let first = backend.create_descriptor_pool(max_sets_per_pool, &sizes)?;
        Ok(Self {
            backend,
            max_sets_per_pool,
            sizes,
            chain: vec![first],
            allocated: 0,
            total_allocated: 0,
        })
    }

    fn grow(&mut self) -> GraphicsResult<()> {
        let link = self
            .backend
            .create_descriptor_pool(self.max_sets_per_pool, &self.sizes)?;
        self.chain.push(link);
        self.allocated = 0;
        log::debug!(
            "Descriptor pool grew to {} links ({} sets each)",
            self.chain.len(),
            self.max_sets_per_pool
        );
        Ok(())
    }

    /// Allocate one set per entry of `layouts`.
    ///
    /// Takes what the current link still holds, then appends links for the
    /// remainder.
    pub fn allocate(
        &mut self,
        layouts: &[DescriptorSetLayoutHandle],
    ) -> GraphicsResult<Vec<DescriptorSetHandle>> {
        let mut sets = Vec::with_capacity(layouts.len());
        let mut remaining = layouts;
        while !remaining.is_empty() {
            let free = self.max_sets_per_pool - self.allocated;
            if free == 0 {
                self.grow()?;
                continue;
            }
            let take = remaining.len().min(free as usize);
            let (chunk, rest) = remaining.split_at(take);
            let link = self.current_link();
            let allocated = match self.backend.allocate_descriptor_sets(link, chunk) {
                Ok(allocated) => allocated,
                // Per-type descriptor counts ran out before the set count did.
                Err(GraphicsError::OutOfMemory) if self.allocated > 0 => {
                    self.grow()?;
                    continue;
                }
                Err(e) => return Err(e),
            };
            sets.extend(allocated);
            self.allocated += take as u32;
            self.total_allocated += take as u64;
            remaining = rest;
        }
        Ok(sets)
    }

    fn current_link(&self) -> DescriptorPoolHandle {
        self.chain[self.chain.len() - 1]
    }

    /// Number of native pools in the chain.
    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    /// Sets per chain link.
    pub fn max_sets_per_pool(&self) -> u32 {
        self.max_sets_per_pool
    }

    /// Sets allocated from the current link.
    pub fn allocated_in_current(&self) -> u32 {
        self.allocated
    }

    /// Sets allocated over the pool's lifetime.
    pub fn total_allocated(&self) -> u64 {
        self.total_allocated
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        for link in self.chain.drain(..) {
            self.backend.destroy_descriptor_pool(link);
        }
    }
}

impl std::fmt::Debug for DescriptorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorPool")
            .field("max_sets_per_pool", &self.max_sets_per_pool)
            .field("chain_len", &self.chain.len())
            .field("allocated", &self.allocated)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::backend::DummyBackend;
    use crate::descriptor::{DescriptorBinding, DescriptorType};
    use crate::types::ShaderStages;

    fn setup(capacity: u32) -> (DescriptorPool, DescriptorSetLayoutHandle) {
        let backend: Arc<dyn RenderBackend> = Arc::new(DummyBackend::new());
        let layout = backend
            .create_descriptor_set_layout(&[DescriptorBinding::new(
                0,
                "globals",
                DescriptorType::UniformBuffer,
                ShaderStages::VERTEX,
            )])
            .unwrap();
        let pool =
            DescriptorPool::new(backend, capacity, DescriptorPoolSize::default_sizes()).unwrap();
        (pool, layout)
    }

    #[test]
    fn test_split_across_links() {
        let (mut pool, layout) = setup(16);
        let sets = pool.allocate(&[layout; 20]).unwrap();
        assert_eq!(sets.len(), 20);
        assert_eq!(pool.chain_len(), 2);
        assert_eq!(pool.allocated_in_current(), 4);
        let unique: HashSet<_> = sets.iter().collect();
        assert_eq!(unique.len(), 20);
    }

    #[test]
    fn test_exact_fit_does_not_grow() {
        let (mut pool, layout) = setup(8);
        pool.allocate(&[layout; 8]).unwrap();
        assert_eq!(pool.chain_len(), 1);
        pool.allocate(&[layout]).unwrap();
        assert_eq!(pool.chain_len(), 2);
    }

    #[test]
    fn test_large_request_spans_many_links() {
        let (mut pool, layout) = setup(4);
        let sets = pool.allocate(&[layout; 10]).unwrap();
        assert_eq!(sets.len(), 10);
        assert_eq!(pool.chain_len(), 3);
        assert_eq!(pool.total_allocated(), 10);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let backend: Arc<dyn RenderBackend> = Arc::new(DummyBackend::new());
        assert!(DescriptorPool::new(backend, 0, Vec::new()).is_err());
    }
}
