//! Queue submission builder.

use crate::backend::{CommandBufferHandle, SemaphoreHandle};
use crate::error::GraphicsResult;
use crate::types::PipelineStages;

use super::CommandBuffer;

/// A semaphore the submission waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreWait {
    /// Semaphore to wait on.
    pub semaphore: SemaphoreHandle,
    /// Stages that must not start before the wait completes.
    pub stage: PipelineStages,
    /// Timeline value to wait for; ignored for binary semaphores.
    pub value: u64,
}

/// A semaphore the submission signals on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreSignal {
    /// Semaphore to signal.
    pub semaphore: SemaphoreHandle,
    /// Timeline value to signal; ignored for binary semaphores.
    pub value: u64,
}

/// Everything one queue submit needs.
///
/// # Example
///
/// ```ignore
/// let mut submission = Submission::new()
///     .wait(acquired, PipelineStages::COLOR_ATTACHMENT_OUTPUT)
///     .signal(render_complete);
/// submission.push(&mut cmd)?;
/// device.submit(QueueRole::Graphics, &submission, Some(fence))?;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Submission {
    waits: Vec<SemaphoreWait>,
    signals: Vec<SemaphoreSignal>,
    command_buffers: Vec<CommandBufferHandle>,
}

impl Submission {
    /// Create an empty submission.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait on a binary semaphore before `stage`.
    pub fn wait(mut self, semaphore: SemaphoreHandle, stage: PipelineStages) -> Self {
        self.waits.push(SemaphoreWait {
            semaphore,
            stage,
            value: 0,
        });
        self
    }

    /// Wait for a timeline semaphore to reach `value` before `stage`.
    pub fn wait_timeline(
        mut self,
        semaphore: SemaphoreHandle,
        stage: PipelineStages,
        value: u64,
    ) -> Self {
        self.waits.push(SemaphoreWait {
            semaphore,
            stage,
            value,
        });
        self
    }

    /// Signal a binary semaphore on completion.
    pub fn signal(mut self, semaphore: SemaphoreHandle) -> Self {
        self.signals.push(SemaphoreSignal {
            semaphore,
            value: 0,
        });
        self
    }

    /// Signal a timeline semaphore to `value` on completion.
    pub fn signal_timeline(mut self, semaphore: SemaphoreHandle, value: u64) -> Self {
        self.signals.push(SemaphoreSignal { semaphore, value });
        self
    }

    /// Add an executable command buffer. It is considered pending from here on.
    pub fn push(&mut self, buffer: &mut CommandBuffer) -> GraphicsResult<()> {
        buffer.mark_pending()?;
        self.command_buffers.push(buffer.handle());
        Ok(())
    }

    /// Semaphores to wait on.
    pub fn waits(&self) -> &[SemaphoreWait] {
        &self.waits
    }

    /// Semaphores to signal.
    pub fn signals(&self) -> &[SemaphoreSignal] {
        &self.signals
    }

    /// Command buffers in submission order.
    pub fn command_buffers(&self) -> &[CommandBufferHandle] {
        &self.command_buffers
    }

    /// Whether any wait or signal carries a timeline value.
    pub fn has_timeline_values(&self) -> bool {
        self.waits.iter().any(|w| w.value != 0) || self.signals.iter().any(|s| s.value != 0)
    }

    /// Whether the submission carries no command buffers.
    pub fn is_empty(&self) -> bool {
        self.command_buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::{DummyBackend, RenderBackend};
    use crate::command::{CommandBufferLevel, CommandBufferState, CommandBufferUsage, CommandPool, ResetMode};

    #[test]
    fn test_push_requires_executable() {
        let backend: Arc<dyn RenderBackend> = Arc::new(DummyBackend::new());
        let mut pool = CommandPool::new(backend, 0, ResetMode::ResetIndividually).unwrap();
        let mut cmd = pool.request(CommandBufferLevel::Primary).unwrap();
        let mut submission = Submission::new();
        assert!(submission.push(&mut cmd).is_err());

        cmd.begin(CommandBufferUsage::OneTimeSubmit).unwrap();
        cmd.end().unwrap();
        submission.push(&mut cmd).unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Pending);
        assert_eq!(submission.command_buffers(), &[cmd.handle()]);
        pool.discard(cmd).unwrap();
    }

    #[test]
    fn test_timeline_detection() {
        let binary = Submission::new()
            .wait(SemaphoreHandle::Dummy(1), PipelineStages::TRANSFER)
            .signal(SemaphoreHandle::Dummy(2));
        assert!(!binary.has_timeline_values());
        let timeline = binary.signal_timeline(SemaphoreHandle::Dummy(3), 7);
        assert!(timeline.has_timeline_values());
        assert_eq!(timeline.signals().len(), 2);
    }
}
