//! GPU synchronization primitives and their pools.
//!
//! - [`FencePool`]: CPU-GPU fences with free-list reuse and an active wait-set
//! - [`SemaphorePool`]: GPU-GPU binary semaphores with free-list reuse
//! - [`Timeline`]: monotonic timeline semaphore for cross-queue ordering
//! - [`FrameSync`]: per-frame acquire/render semaphores and fences
//!
//! Pools are not internally synchronized; the device wraps them in a mutex.

mod fence;
mod frame;
mod semaphore;

pub use fence::FencePool;
pub use frame::{FrameSync, FrameSyncObjects};
pub use semaphore::{SemaphorePool, Timeline};

/// Kind of semaphore to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SemaphoreKind {
    /// Binary semaphore, signaled and waited once per use.
    #[default]
    Binary,
    /// Timeline semaphore with a monotonically increasing counter.
    Timeline {
        /// Counter value at creation.
        initial: u64,
    },
}
