//! Command recording keyed by timeline semaphore values.

use crate::error::GraphicsResult;

use super::{CommandBuffer, CommandBufferLevel, CommandBufferUsage, CommandPool, Submission};

/// Records into a chain of primary buffers from its own pool.
///
/// Recording goes through [`record`](Self::record); once the open buffer
/// holds `max_commands` commands it is ended and a fresh one started, so a
/// long frame never piles everything into one huge buffer.
/// [`flush`](Self::flush) moves the recorded buffers into a submission and
/// keeps them cached under the timeline value that submission will signal;
/// [`discard_completed`](Self::discard_completed) returns them to the pool
/// once the GPU has reached that value.
pub struct TimelineCommandBuffer {
    pool: CommandPool,
    max_commands: u32,
    current: Option<CommandBuffer>,
    recorded: Vec<CommandBuffer>,
    in_flight: Vec<(u64, Vec<CommandBuffer>)>,
}

impl TimelineCommandBuffer {
    /// Wrap `pool`, splitting buffers at `max_commands`.
    pub fn new(pool: CommandPool, max_commands: u32) -> Self {
        Self {
            pool,
            max_commands: max_commands.max(1),
            current: None,
            recorded: Vec::new(),
            in_flight: Vec::new(),
        }
    }

    /// Record into the open buffer, starting or splitting as needed.
    pub fn record<R>(&mut self, f: impl FnOnce(&mut CommandBuffer) -> R) -> GraphicsResult<R> {
        if let Some(full) = self
            .current
            .take_if(|cmd| cmd.recorded_commands() >= self.max_commands)
        {
            self.close(full)?;
        }
        let cmd = match self.current.take() {
            Some(cmd) => cmd,
            None => {
                let mut cmd = self.pool.request(CommandBufferLevel::Primary)?;
                cmd.begin(CommandBufferUsage::OneTimeSubmit)?;
                cmd
            }
        };
        let cmd = self.current.insert(cmd);
        Ok(f(cmd))
    }

    fn close(&mut self, mut cmd: CommandBuffer) -> GraphicsResult<()> {
        log::trace!(
            "TimelineCommandBuffer: closing buffer {} after {} commands",
            cmd.index(),
            cmd.recorded_commands()
        );
        cmd.end()?;
        self.recorded.push(cmd);
        Ok(())
    }

    /// End recording and add every recorded buffer to `submission`.
    ///
    /// The buffers stay cached under `timeline_value`. Returns how many
    /// buffers were added.
    pub fn flush(&mut self, submission: &mut Submission, timeline_value: u64) -> GraphicsResult<usize> {
        if let Some(cmd) = self.current.take() {
            self.close(cmd)?;
        }
        let mut buffers = std::mem::take(&mut self.recorded);
        for cmd in &mut buffers {
            submission.push(cmd)?;
        }
        let count = buffers.len();
        if count > 0 {
            self.in_flight.push((timeline_value, buffers));
        }
        Ok(count)
    }

    /// Return buffers whose timeline value is at most `completed` to the pool.
    ///
    /// Every completed buffer is offered back even if one is rejected; the
    /// first failure is returned.
    pub fn discard_completed(&mut self, completed: u64) -> GraphicsResult<()> {
        let (done, still_running): (Vec<_>, Vec<_>) = std::mem::take(&mut self.in_flight)
            .into_iter()
            .partition(|(value, _)| *value <= completed);
        self.in_flight = still_running;
        let mut first_error = None;
        for cmd in done.into_iter().flat_map(|(_, buffers)| buffers) {
            if let Err(e) = self.pool.discard(cmd) {
                log::warn!("Failed to return command buffer to pool: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Buffers recorded and closed but not yet flushed, plus the open one.
    pub fn recorded_len(&self) -> usize {
        self.recorded.len() + usize::from(self.current.is_some())
    }

    /// Number of timeline values with buffers still cached.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// The underlying pool.
    pub fn pool(&self) -> &CommandPool {
        &self.pool
    }
}

impl Drop for TimelineCommandBuffer {
    fn drop(&mut self) {
        let leases = self
            .current
            .take()
            .into_iter()
            .chain(self.recorded.drain(..))
            .chain(self.in_flight.drain(..).flat_map(|(_, buffers)| buffers));
        for cmd in leases {
            if let Err(e) = self.pool.discard(cmd) {
                log::warn!("Failed to return command buffer to pool: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for TimelineCommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelineCommandBuffer")
            .field("max_commands", &self.max_commands)
            .field("recorded", &self.recorded_len())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::{DummyBackend, RenderBackend};
    use crate::command::ResetMode;

    fn timeline(max_commands: u32) -> TimelineCommandBuffer {
        let backend: Arc<dyn RenderBackend> = Arc::new(DummyBackend::new());
        let pool = CommandPool::new(backend, 0, ResetMode::ResetIndividually).unwrap();
        TimelineCommandBuffer::new(pool, max_commands)
    }

    #[test]
    fn test_splits_at_ceiling() {
        let mut timeline = timeline(4);
        for _ in 0..10 {
            timeline.record(|cmd| cmd.dispatch(1, 1, 1)).unwrap();
        }
        // 4 + 4 + 2
        assert_eq!(timeline.recorded_len(), 3);
        let mut submission = Submission::new();
        assert_eq!(timeline.flush(&mut submission, 1).unwrap(), 3);
        assert_eq!(submission.command_buffers().len(), 3);
    }

    #[test]
    fn test_discard_by_completed_value() {
        let mut timeline = timeline(16);
        for value in 1..=3 {
            timeline.record(|cmd| cmd.draw(3, 1, 0, 0)).unwrap();
            timeline.flush(&mut Submission::new(), value).unwrap();
        }
        assert_eq!(timeline.in_flight_len(), 3);
        timeline.discard_completed(2).unwrap();
        assert_eq!(timeline.in_flight_len(), 1);
        assert_eq!(timeline.pool().active_count(CommandBufferLevel::Primary), 1);
        timeline.discard_completed(3).unwrap();
        assert_eq!(timeline.pool().active_count(CommandBufferLevel::Primary), 0);
    }

    #[test]
    fn test_rejected_buffer_does_not_strand_the_rest() {
        let backend: Arc<dyn RenderBackend> = Arc::new(DummyBackend::new());
        let pool = CommandPool::new(backend.clone(), 0, ResetMode::ResetIndividually).unwrap();
        let mut timeline = TimelineCommandBuffer::new(pool, 1);
        for _ in 0..3 {
            timeline.record(|cmd| cmd.dispatch(1, 1, 1)).unwrap();
        }
        timeline.flush(&mut Submission::new(), 1).unwrap();
        assert_eq!(timeline.pool().active_count(CommandBufferLevel::Primary), 3);

        let mut other = CommandPool::new(backend, 0, ResetMode::ResetIndividually).unwrap();
        let stray = other.request(CommandBufferLevel::Primary).unwrap();
        timeline.in_flight[0].1.insert(1, stray);

        assert!(timeline.discard_completed(1).is_err());
        assert_eq!(timeline.in_flight_len(), 0);
        assert_eq!(timeline.pool().active_count(CommandBufferLevel::Primary), 0);
    }

    #[test]
    fn test_flush_without_recording() {
        let mut timeline = timeline(16);
        assert_eq!(timeline.flush(&mut Submission::new(), 1).unwrap(), 0);
        assert_eq!(timeline.in_flight_len(), 0);
    }

    #[test]
    fn test_recycled_buffers_are_reused() {
        let mut timeline = timeline(16);
        timeline.record(|cmd| cmd.dispatch(1, 1, 1)).unwrap();
        timeline.flush(&mut Submission::new(), 1).unwrap();
        timeline.discard_completed(1).unwrap();
        timeline.record(|cmd| cmd.dispatch(1, 1, 1)).unwrap();
        timeline.flush(&mut Submission::new(), 2).unwrap();
        assert_eq!(timeline.pool().allocated_count(CommandBufferLevel::Primary), 1);
    }
}
