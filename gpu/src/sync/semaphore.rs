//! Semaphore pool and timeline semaphores.

use std::sync::Arc;

use crate::backend::{RenderBackend, SemaphoreHandle};
use crate::error::{GraphicsError, GraphicsResult};

use super::SemaphoreKind;

/// Pool of reusable binary semaphores.
pub struct SemaphorePool {
    backend: Arc<dyn RenderBackend>,
    free: Vec<SemaphoreHandle>,
    active: Vec<SemaphoreHandle>,
}

impl SemaphorePool {
    /// Create an empty pool.
    pub fn new(backend: Arc<dyn RenderBackend>) -> Self {
        Self {
            backend,
            free: Vec::new(),
            active: Vec::new(),
        }
    }

    /// Get a binary semaphore, reusing a free one when possible.
    pub fn request(&mut self) -> GraphicsResult<SemaphoreHandle> {
        let semaphore = match self.free.pop() {
            Some(semaphore) => semaphore,
            None => self.backend.create_semaphore(SemaphoreKind::Binary)?,
        };
        self.active.push(semaphore);
        Ok(semaphore)
    }

    /// Return a binary semaphore to the free list.
    ///
    /// The semaphore must have no pending signal or wait. Handles that are not
    /// active in this pool are rejected.
    pub fn discard(&mut self, semaphore: SemaphoreHandle) -> GraphicsResult<()> {
        let Some(position) = self.active.iter().position(|active| *active == semaphore) else {
            return Err(GraphicsError::InvalidParameter(format!(
                "semaphore {:?} is not active in this pool",
                semaphore
            )));
        };
        self.active.swap_remove(position);
        self.free.push(semaphore);
        Ok(())
    }

    /// Create a timeline semaphore starting at `initial`.
    pub fn create_timeline(&self, initial: u64) -> GraphicsResult<Timeline> {
        Timeline::new(self.backend.clone(), initial)
    }

    /// Number of semaphores handed out and not yet discarded.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Number of semaphores ready for reuse.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}

impl Drop for SemaphorePool {
    fn drop(&mut self) {
        for semaphore in self.free.drain(..).chain(self.active.drain(..)) {
            self.backend.destroy_semaphore(semaphore);
        }
    }
}

impl std::fmt::Debug for SemaphorePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemaphorePool")
            .field("active", &self.active.len())
            .field("free", &self.free.len())
            .finish()
    }
}

/// A timeline semaphore.
///
/// The CPU side hands out increasing target values with
/// [`next_value`](Self::next_value); GPU submissions signal them, and
/// [`completed_value`](Self::completed_value) reports how far the GPU got.
pub struct Timeline {
    backend: Arc<dyn RenderBackend>,
    handle: SemaphoreHandle,
    last_value: u64,
}

impl Timeline {
    /// Create a timeline semaphore starting at `initial`.
    pub fn new(backend: Arc<dyn RenderBackend>, initial: u64) -> GraphicsResult<Self> {
        let handle = backend.create_semaphore(SemaphoreKind::Timeline { initial })?;
        Ok(Self {
            backend,
            handle,
            last_value: initial,
        })
    }

    /// Native semaphore handle.
    pub fn handle(&self) -> SemaphoreHandle {
        self.handle
    }

    /// Reserve the next value to signal.
    pub fn next_value(&mut self) -> u64 {
        self.last_value += 1;
        self.last_value
    }

    /// Most recently reserved value.
    pub fn last_value(&self) -> u64 {
        self.last_value
    }

    /// Value the GPU has reached.
    pub fn completed_value(&self) -> GraphicsResult<u64> {
        self.backend.semaphore_value(self.handle)
    }

    /// Block until the counter reaches `value`. Returns `false` on timeout.
    pub fn wait(&self, value: u64, timeout_ns: u64) -> GraphicsResult<bool> {
        self.backend.wait_semaphore(self.handle, value, timeout_ns)
    }

    /// Signal `value` from the host, reserving it if it is ahead.
    pub fn signal(&mut self, value: u64) -> GraphicsResult<()> {
        self.backend.signal_semaphore(self.handle, value)?;
        self.last_value = self.last_value.max(value);
        Ok(())
    }
}

impl Drop for Timeline {
    fn drop(&mut self) {
        self.backend.destroy_semaphore(self.handle);
    }
}

impl std::fmt::Debug for Timeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timeline")
            .field("handle", &self.handle)
            .field("last_value", &self.last_value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    #[test]
    fn test_semaphore_reuse() {
        let mut pool = SemaphorePool::new(Arc::new(DummyBackend::new()));
        let a = pool.request().unwrap();
        pool.discard(a).unwrap();
        assert_eq!(pool.request().unwrap(), a);
        assert_eq!(pool.active_count(), 1);
    }

    #[test]
    fn test_double_discard_rejected() {
        let mut pool = SemaphorePool::new(Arc::new(DummyBackend::new()));
        let semaphore = pool.request().unwrap();
        pool.discard(semaphore).unwrap();
        assert!(matches!(
            pool.discard(semaphore),
            Err(GraphicsError::InvalidParameter(_))
        ));
        assert_eq!(pool.free_count(), 1);

        let a = pool.request().unwrap();
        let b = pool.request().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_timeline_values() {
        let pool = SemaphorePool::new(Arc::new(DummyBackend::new()));
        let mut timeline = pool.create_timeline(5).unwrap();
        assert_eq!(timeline.completed_value().unwrap(), 5);
        assert_eq!(timeline.next_value(), 6);
        assert!(!timeline.wait(6, 0).unwrap());
        timeline.signal(6).unwrap();
        assert!(timeline.wait(6, 0).unwrap());
        assert_eq!(timeline.completed_value().unwrap(), 6);
    }
}
