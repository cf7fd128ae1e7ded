//! Command pools, command buffers and submission.
//!
//! A [`CommandPool`] hands out [`CommandBuffer`]s by index and takes them back
//! for reuse. Each buffer follows the recording state machine
//!
//! ```text
//! Initial --begin--> Recording --end--> Executable --submit--> Pending --reset--> Initial
//! ```
//!
//! [`TimelineCommandBuffer`] layers automatic splitting and completion-based
//! recycling on top of a pool, and [`Submission`] collects the buffers and
//! semaphores of one queue submit.

mod buffer;
mod pool;
mod submission;
mod timeline;

pub use buffer::CommandBuffer;
pub use pool::CommandPool;
pub use submission::{SemaphoreSignal, SemaphoreWait, Submission};
pub use timeline::TimelineCommandBuffer;

use crate::backend::{FramebufferHandle, RenderPassHandle};
use crate::types::{ClearValue, Extent2d};

/// Primary buffers are submitted to queues; secondary buffers are executed
/// from primaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommandBufferLevel {
    /// Submitted directly to a queue.
    #[default]
    Primary,
    /// Executed from a primary buffer.
    Secondary,
}

impl CommandBufferLevel {
    pub(crate) fn index(self) -> usize {
        match self {
            Self::Primary => 0,
            Self::Secondary => 1,
        }
    }
}

/// Usage hint passed when recording begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommandBufferUsage {
    /// Submitted once, then reset.
    #[default]
    OneTimeSubmit,
    /// Secondary buffer executed entirely inside a render pass.
    RenderPassContinue,
    /// May be pending on several submissions at once.
    SimultaneousUse,
}

/// How buffers of a pool return to the initial state.
///
/// Fixed when the pool is created; every discard follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResetMode {
    /// Buffers are reset together by resetting the whole pool.
    #[default]
    ResetPool,
    /// Each discarded buffer is reset on its own.
    ResetIndividually,
    /// Each discarded buffer is freed; every request allocates a new one.
    AlwaysAllocated,
}

impl ResetMode {
    /// Whether the native pool needs the per-buffer reset flag.
    pub fn resets_individually(self) -> bool {
        matches!(self, Self::ResetIndividually | Self::AlwaysAllocated)
    }
}

/// Recording state of a command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandBufferState {
    /// Ready to begin recording.
    Initial,
    /// Between begin and end.
    Recording,
    /// Recorded and ready for submission.
    Executable,
    /// Submitted; must not be touched until the GPU is done.
    Pending,
}

/// Parameters for beginning a render pass instance.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassBegin {
    /// Render pass to begin.
    pub render_pass: RenderPassHandle,
    /// Framebuffer with the attachments.
    pub framebuffer: FramebufferHandle,
    /// Render area, starting at the origin.
    pub extent: Extent2d,
    /// One clear value per attachment, colors first.
    pub clear_values: Vec<ClearValue>,
}
