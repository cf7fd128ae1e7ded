//! Fence pool.

use std::sync::Arc;

use crate::backend::{FenceHandle, RenderBackend};
use crate::error::{GraphicsError, GraphicsResult};

/// Pool of reusable fences.
///
/// Requested fences join the active set; [`wait`](Self::wait) and
/// [`reset`](Self::reset) operate on that set only. A discarded fence is reset
/// and parked on the free list for the next request.
pub struct FencePool {
    backend: Arc<dyn RenderBackend>,
    free: Vec<FenceHandle>,
    active: Vec<FenceHandle>,
    created: usize,
}

impl FencePool {
    /// Create an empty pool.
    pub fn new(backend: Arc<dyn RenderBackend>) -> Self {
        Self {
            backend,
            free: Vec::new(),
            active: Vec::new(),
            created: 0,
        }
    }

    /// Get an unsignaled fence, reusing a free one when possible.
    pub fn request(&mut self) -> GraphicsResult<FenceHandle> {
        let fence = match self.free.pop() {
            Some(fence) => fence,
            None => {
                let fence = self.backend.create_fence(false)?;
                self.created += 1;
                log::trace!("FencePool: created fence #{}", self.created);
                fence
            }
        };
        self.active.push(fence);
        Ok(fence)
    }

    /// Reset `fence` and return it to the free list.
    ///
    /// Fails with `InvalidParameter` if `fence` is not an active fence of this
    /// pool, so a double discard cannot park it twice.
    pub fn discard(&mut self, fence: FenceHandle) -> GraphicsResult<()> {
        let Some(position) = self.active.iter().position(|active| *active == fence) else {
            return Err(GraphicsError::InvalidParameter(format!(
                "fence {:?} is not active in this pool",
                fence
            )));
        };
        self.active.swap_remove(position);
        self.backend.reset_fences(&[fence])?;
        self.free.push(fence);
        Ok(())
    }

    /// Wait for every active fence. Returns `false` on timeout.
    pub fn wait(&self, timeout_ns: u64) -> GraphicsResult<bool> {
        if self.active.is_empty() {
            return Ok(true);
        }
        self.backend.wait_fences(&self.active, timeout_ns)
    }

    /// Reset every active fence. They stay active.
    pub fn reset(&self) -> GraphicsResult<()> {
        if self.active.is_empty() {
            return Ok(());
        }
        self.backend.reset_fences(&self.active)
    }

    /// Wait for every active fence, then reset them.
    pub fn wait_and_reset(&self, timeout_ns: u64) -> GraphicsResult<bool> {
        if !self.wait(timeout_ns)? {
            return Ok(false);
        }
        self.reset()?;
        Ok(true)
    }

    /// Wait for one fence, then reset it. Returns `false` on timeout.
    pub fn wait_fence_and_reset(&self, fence: FenceHandle, timeout_ns: u64) -> GraphicsResult<bool> {
        if !self.backend.wait_fences(&[fence], timeout_ns)? {
            return Ok(false);
        }
        self.backend.reset_fences(&[fence])?;
        Ok(true)
    }

    /// Number of fences in the active set.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Number of fences ready for reuse.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Total fences this pool has created.
    pub fn created_count(&self) -> usize {
        self.created
    }
}

impl Drop for FencePool {
    fn drop(&mut self) {
        for fence in self.free.drain(..).chain(self.active.drain(..)) {
            self.backend.destroy_fence(fence);
        }
    }
}

impl std::fmt::Debug for FencePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FencePool")
            .field("active", &self.active.len())
            .field("free", &self.free.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    fn pool() -> FencePool {
        FencePool::new(Arc::new(DummyBackend::new()))
    }

    #[test]
    fn test_discarded_fence_is_reused() {
        let mut pool = pool();
        let first = pool.request().unwrap();
        pool.discard(first).unwrap();
        let second = pool.request().unwrap();
        assert_eq!(first, second);
        assert_eq!(pool.created_count(), 1);
    }

    #[test]
    fn test_active_set_tracking() {
        let mut pool = pool();
        let a = pool.request().unwrap();
        let _b = pool.request().unwrap();
        assert_eq!(pool.active_count(), 2);
        pool.discard(a).unwrap();
        assert_eq!(pool.active_count(), 1);
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn test_double_discard_rejected() {
        let mut pool = pool();
        let fence = pool.request().unwrap();
        pool.discard(fence).unwrap();
        assert!(matches!(
            pool.discard(fence),
            Err(GraphicsError::InvalidParameter(_))
        ));
        assert_eq!(pool.free_count(), 1);

        let a = pool.request().unwrap();
        let b = pool.request().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_foreign_fence_rejected() {
        let backend = Arc::new(DummyBackend::new());
        let mut pool = FencePool::new(backend.clone());
        let foreign = backend.create_fence(false).unwrap();
        assert!(pool.discard(foreign).is_err());
        assert_eq!(pool.free_count(), 0);
        backend.destroy_fence(foreign);
    }

    #[test]
    fn test_wait_on_empty_set() {
        let pool = pool();
        assert!(pool.wait(0).unwrap());
    }

    #[test]
    fn test_unsubmitted_fence_times_out() {
        let mut pool = pool();
        pool.request().unwrap();
        assert!(!pool.wait(0).unwrap());
    }
}
