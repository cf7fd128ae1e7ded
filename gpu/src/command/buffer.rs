//! Recordable command buffer.

use std::sync::Arc;

use crate::backend::{
    BufferHandle, CommandBufferHandle, CommandPoolHandle, DescriptorSetHandle, ImageHandle,
    PipelineHandle, PipelineLayoutHandle, RenderBackend,
};
use crate::error::{GraphicsError, GraphicsResult};
use crate::pipeline::{ImageBarrier, PipelineBindPoint};
use crate::types::{
    BufferCopy, Extent3d, IndexType, ScissorRect, ShaderStages, TextureFormat, Viewport,
};

use super::{CommandBufferLevel, CommandBufferState, CommandBufferUsage, RenderPassBegin};

/// A command buffer handed out by a [`CommandPool`](super::CommandPool).
///
/// The pool keeps ownership of the native buffer; this value is a lease that
/// must be given back with [`CommandPool::discard`](super::CommandPool::discard).
/// Every recording call increments [`recorded_commands`](Self::recorded_commands).
/// Recording outside the `Recording` state logs a warning and does nothing.
pub struct CommandBuffer {
    backend: Arc<dyn RenderBackend>,
    pool: CommandPoolHandle,
    handle: CommandBufferHandle,
    level: CommandBufferLevel,
    index: usize,
    state: CommandBufferState,
    recorded: u32,
}

impl CommandBuffer {
    pub(crate) fn new(
        backend: Arc<dyn RenderBackend>,
        pool: CommandPoolHandle,
        handle: CommandBufferHandle,
        level: CommandBufferLevel,
        index: usize,
    ) -> Self {
        Self {
            backend,
            pool,
            handle,
            level,
            index,
            state: CommandBufferState::Initial,
            recorded: 0,
        }
    }

    /// Native handle.
    pub fn handle(&self) -> CommandBufferHandle {
        self.handle
    }

    /// Pool the buffer belongs to.
    pub fn pool(&self) -> CommandPoolHandle {
        self.pool
    }

    /// Primary or secondary.
    pub fn level(&self) -> CommandBufferLevel {
        self.level
    }

    /// Slot index inside the owning pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Current recording state.
    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    /// Commands recorded since the last begin.
    pub fn recorded_commands(&self) -> u32 {
        self.recorded
    }

    /// Start recording.
    ///
    /// Fails with [`GraphicsError::NotReady`] if the buffer is already
    /// recording or still pending; nothing is recorded in that case.
    pub fn begin(&mut self, usage: CommandBufferUsage) -> GraphicsResult<()> {
        if matches!(
            self.state,
            CommandBufferState::Recording | CommandBufferState::Pending
        ) {
            log::warn!(
                "Command buffer {} cannot begin in state {:?}",
                self.index,
                self.state
            );
            return Err(GraphicsError::NotReady(format!(
                "command buffer {} is {:?}",
                self.index, self.state
            )));
        }
        self.backend.begin_command_buffer(self.handle, usage)?;
        self.state = CommandBufferState::Recording;
        self.recorded = 0;
        Ok(())
    }

    /// Finish recording.
    pub fn end(&mut self) -> GraphicsResult<()> {
        if self.state != CommandBufferState::Recording {
            return Err(GraphicsError::NotReady(format!(
                "command buffer {} is not recording ({:?})",
                self.index, self.state
            )));
        }
        self.backend.end_command_buffer(self.handle)?;
        self.state = CommandBufferState::Executable;
        Ok(())
    }

    /// Mark the buffer as submitted.
    pub(crate) fn mark_pending(&mut self) -> GraphicsResult<()> {
        if self.state != CommandBufferState::Executable {
            return Err(GraphicsError::NotReady(format!(
                "command buffer {} is not executable ({:?})",
                self.index, self.state
            )));
        }
        self.state = CommandBufferState::Pending;
        Ok(())
    }

    /// Record that the buffer went back to the initial state.
    pub(crate) fn mark_initial(&mut self) {
        self.state = CommandBufferState::Initial;
        self.recorded = 0;
    }

    fn recording(&mut self, command: &str) -> Option<CommandBufferHandle> {
        if self.state != CommandBufferState::Recording {
            log::warn!(
                "Ignoring {} on command buffer {} in state {:?}",
                command,
                self.index,
                self.state
            );
            return None;
        }
        self.recorded += 1;
        Some(self.handle)
    }

    /// Record image layout transitions.
    pub fn pipeline_barrier(&mut self, barriers: &[ImageBarrier]) {
        if barriers.is_empty() {
            return;
        }
        if let Some(handle) = self.recording("pipeline_barrier") {
            self.backend.cmd_pipeline_barrier(handle, barriers);
        }
    }

    /// Begin a render pass instance.
    pub fn begin_render_pass(&mut self, begin: &RenderPassBegin) {
        if let Some(handle) = self.recording("begin_render_pass") {
            self.backend.cmd_begin_render_pass(handle, begin);
        }
    }

    /// End the current render pass instance.
    pub fn end_render_pass(&mut self) {
        if let Some(handle) = self.recording("end_render_pass") {
            self.backend.cmd_end_render_pass(handle);
        }
    }

    /// Bind a pipeline.
    pub fn bind_pipeline(&mut self, bind_point: PipelineBindPoint, pipeline: PipelineHandle) {
        if let Some(handle) = self.recording("bind_pipeline") {
            self.backend.cmd_bind_pipeline(handle, bind_point, pipeline);
        }
    }

    /// Bind a descriptor set.
    pub fn bind_descriptor_set(
        &mut self,
        bind_point: PipelineBindPoint,
        layout: PipelineLayoutHandle,
        set_index: u32,
        set: DescriptorSetHandle,
    ) {
        if let Some(handle) = self.recording("bind_descriptor_set") {
            self.backend
                .cmd_bind_descriptor_set(handle, bind_point, layout, set_index, set);
        }
    }

    /// Update push constants.
    pub fn push_constants(
        &mut self,
        layout: PipelineLayoutHandle,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    ) {
        if let Some(handle) = self.recording("push_constants") {
            self.backend
                .cmd_push_constants(handle, layout, stages, offset, data);
        }
    }

    /// Bind a vertex buffer.
    pub fn bind_vertex_buffer(&mut self, buffer: BufferHandle, offset: u64) {
        if let Some(handle) = self.recording("bind_vertex_buffer") {
            self.backend.cmd_bind_vertex_buffer(handle, buffer, offset);
        }
    }

    /// Bind an index buffer.
    pub fn bind_index_buffer(&mut self, buffer: BufferHandle, offset: u64, index_type: IndexType) {
        if let Some(handle) = self.recording("bind_index_buffer") {
            self.backend
                .cmd_bind_index_buffer(handle, buffer, offset, index_type);
        }
    }

    /// Set the viewport.
    pub fn set_viewport(&mut self, viewport: &Viewport) {
        if let Some(handle) = self.recording("set_viewport") {
            self.backend.cmd_set_viewport(handle, viewport);
        }
    }

    /// Set the scissor rectangle.
    pub fn set_scissor(&mut self, scissor: &ScissorRect) {
        if let Some(handle) = self.recording("set_scissor") {
            self.backend.cmd_set_scissor(handle, scissor);
        }
    }

    /// Draw non-indexed primitives.
    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        if let Some(handle) = self.recording("draw") {
            self.backend
                .cmd_draw(handle, vertex_count, instance_count, first_vertex, first_instance);
        }
    }

    /// Draw indexed primitives.
    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        if let Some(handle) = self.recording("draw_indexed") {
            self.backend.cmd_draw_indexed(
                handle,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    /// Dispatch compute work groups.
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        if let Some(handle) = self.recording("dispatch") {
            self.backend.cmd_dispatch(handle, x, y, z);
        }
    }

    /// Copy regions between buffers.
    pub fn copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle, regions: &[BufferCopy]) {
        if let Some(handle) = self.recording("copy_buffer") {
            self.backend.cmd_copy_buffer(handle, src, dst, regions);
        }
    }

    /// Copy tightly packed buffer data into an image in `TransferDst` layout.
    pub fn copy_buffer_to_image(
        &mut self,
        src: BufferHandle,
        dst: ImageHandle,
        format: TextureFormat,
        extent: Extent3d,
        array_layers: u32,
    ) {
        if let Some(handle) = self.recording("copy_buffer_to_image") {
            self.backend
                .cmd_copy_buffer_to_image(handle, src, dst, format, extent, array_layers);
        }
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("handle", &self.handle)
            .field("level", &self.level)
            .field("index", &self.index)
            .field("state", &self.state)
            .field("recorded", &self.recorded)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::command::{CommandPool, ResetMode};

    fn pool() -> CommandPool {
        let backend: Arc<dyn RenderBackend> = Arc::new(DummyBackend::new());
        CommandPool::new(backend, 0, ResetMode::ResetIndividually).unwrap()
    }

    #[test]
    fn test_state_machine() {
        let mut pool = pool();
        let mut cmd = pool.request(CommandBufferLevel::Primary).unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Initial);
        cmd.begin(CommandBufferUsage::OneTimeSubmit).unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Recording);
        cmd.end().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Executable);
        cmd.mark_pending().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Pending);
        pool.discard(cmd).unwrap();
    }

    #[test]
    fn test_begin_while_recording_is_not_ready() {
        let mut pool = pool();
        let mut cmd = pool.request(CommandBufferLevel::Primary).unwrap();
        cmd.begin(CommandBufferUsage::OneTimeSubmit).unwrap();
        cmd.draw(3, 1, 0, 0);
        let err = cmd.begin(CommandBufferUsage::OneTimeSubmit).unwrap_err();
        assert!(matches!(err, GraphicsError::NotReady(_)));
        assert_eq!(cmd.state(), CommandBufferState::Recording);
        assert_eq!(cmd.recorded_commands(), 1);
        pool.discard(cmd).unwrap();
    }

    #[test]
    fn test_recording_outside_begin_is_ignored() {
        let mut pool = pool();
        let mut cmd = pool.request(CommandBufferLevel::Primary).unwrap();
        cmd.dispatch(1, 1, 1);
        assert_eq!(cmd.recorded_commands(), 0);
        cmd.begin(CommandBufferUsage::OneTimeSubmit).unwrap();
        cmd.dispatch(1, 1, 1);
        cmd.dispatch(2, 1, 1);
        assert_eq!(cmd.recorded_commands(), 2);
        pool.discard(cmd).unwrap();
    }

    #[test]
    fn test_end_requires_recording() {
        let mut pool = pool();
        let mut cmd = pool.request(CommandBufferLevel::Primary).unwrap();
        assert!(cmd.end().is_err());
        pool.discard(cmd).unwrap();
    }
}
