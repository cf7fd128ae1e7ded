//! Per-frame synchronization for the swapchain loop.

use std::sync::Arc;

use crate::backend::{FenceHandle, RenderBackend, SemaphoreHandle};
use crate::error::{GraphicsError, GraphicsResult};

use super::SemaphoreKind;

/// Synchronization objects owned by one frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSyncObjects {
    /// Signaled when the acquired swapchain image is ready.
    pub image_acquired: SemaphoreHandle,
    /// Signaled when rendering into the image has finished.
    pub render_complete: SemaphoreHandle,
    /// Signaled when the frame's submission has completed.
    pub in_flight: FenceHandle,
}

/// Ring of `N` frame slots.
///
/// The slot index advances as `sync = (sync + 1) % N` after each submission,
/// so the CPU blocks on a fence only once it is `N` frames ahead.
pub struct FrameSync {
    backend: Arc<dyn RenderBackend>,
    frames: Vec<FrameSyncObjects>,
    current: usize,
}

impl FrameSync {
    /// Create `frame_count` slots. Fences start signaled so the first wait
    /// on each slot returns immediately.
    pub fn new(backend: Arc<dyn RenderBackend>, frame_count: u32) -> GraphicsResult<Self> {
        if frame_count == 0 {
            return Err(GraphicsError::InvalidParameter(
                "frame count must be at least 1".to_string(),
            ));
        }
        let mut frames = Vec::with_capacity(frame_count as usize);
        for _ in 0..frame_count {
            frames.push(FrameSyncObjects {
                image_acquired: backend.create_semaphore(SemaphoreKind::Binary)?,
                render_complete: backend.create_semaphore(SemaphoreKind::Binary)?,
                in_flight: backend.create_fence(true)?,
            });
        }
        Ok(Self {
            backend,
            frames,
            current: 0,
        })
    }

    /// Objects of the current slot.
    pub fn current(&self) -> FrameSyncObjects {
        self.frames[self.current]
    }

    /// Index of the current slot.
    pub fn index(&self) -> usize {
        self.current
    }

    /// Number of slots.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Wait until the current slot's previous submission has completed.
    pub fn wait_current(&self, timeout_ns: u64) -> GraphicsResult<bool> {
        let fence = self.frames[self.current].in_flight;
        self.backend.wait_fences(&[fence], timeout_ns)
    }

    /// Reset the current slot's fence before it is submitted again.
    pub fn reset_current(&self) -> GraphicsResult<()> {
        let fence = self.frames[self.current].in_flight;
        self.backend.reset_fences(&[fence])
    }

    /// Move to the next slot.
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.frames.len();
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        for frame in self.frames.drain(..) {
            self.backend.destroy_semaphore(frame.image_acquired);
            self.backend.destroy_semaphore(frame.render_complete);
            self.backend.destroy_fence(frame.in_flight);
        }
    }
}

impl std::fmt::Debug for FrameSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSync")
            .field("frames", &self.frames.len())
            .field("current", &self.current)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    #[test]
    fn test_index_wraps() {
        let mut sync = FrameSync::new(Arc::new(DummyBackend::new()), 3).unwrap();
        let first = sync.current();
        for expected in [1, 2, 0, 1] {
            sync.advance();
            assert_eq!(sync.index(), expected);
        }
        sync.advance();
        sync.advance();
        assert_eq!(sync.current(), first);
    }

    #[test]
    fn test_fences_start_signaled() {
        let sync = FrameSync::new(Arc::new(DummyBackend::new()), 2).unwrap();
        assert!(sync.wait_current(0).unwrap());
        sync.reset_current().unwrap();
        assert!(!sync.wait_current(0).unwrap());
    }

    #[test]
    fn test_zero_frames_rejected() {
        assert!(FrameSync::new(Arc::new(DummyBackend::new()), 0).is_err());
    }

    #[test]
    fn test_objects_destroyed_on_drop() {
        let backend = Arc::new(DummyBackend::new());
        let sync = FrameSync::new(backend.clone(), 2).unwrap();
        assert_eq!(backend.live_object_count(), 6);
        drop(sync);
        assert_eq!(backend.live_object_count(), 0);
    }
}
