//! Compute pipeline with storage-image transitions.

use std::sync::Arc;

use crate::backend::{DescriptorSetHandle, PipelineHandle, PipelineLayoutHandle};
use crate::command::CommandBuffer;
use crate::device::GraphicsDevice;
use crate::error::{GraphicsError, GraphicsResult};
use crate::resources::{Buffer, Sampler, Texture};
use crate::types::{ShaderStages, TextureLayout};

use super::base::PipelineBase;
use super::{BarrierBatch, ImageBarrier, PipelineBindPoint, Shader};

/// A compute pipeline.
///
/// Binding a storage image queues a transition from the texture's current
/// layout to `General`. [`dispatch`](Self::dispatch) records those
/// transitions, the dispatch, and then the same barriers swapped, so the
/// texture ends up back in the layout it was sampled from.
pub struct ComputePipeline {
    base: PipelineBase,
    storage_barriers: BarrierBatch,
}

impl ComputePipeline {
    /// Build a compute pipeline from a program with a compute stage.
    pub fn new(device: &Arc<GraphicsDevice>, shader: &Shader) -> GraphicsResult<Self> {
        let stage = shader.stage(ShaderStages::COMPUTE).ok_or_else(|| {
            GraphicsError::InvalidParameter("compute pipeline needs a compute stage".to_string())
        })?;
        let entry_point = stage.entry_point.clone();
        let base = PipelineBase::new(device, shader, PipelineBindPoint::Compute, |parts| {
            let module = parts
                .stages
                .iter()
                .find(|s| s.stage == ShaderStages::COMPUTE)
                .map(|s| s.module)
                .ok_or_else(|| GraphicsError::Internal("compute module missing".to_string()))?;
            device.checked(
                "create_compute_pipeline",
                device
                    .backend()
                    .create_compute_pipeline(parts.layout, module, &entry_point),
            )
        })?;
        Ok(Self {
            base,
            storage_barriers: BarrierBatch::new(),
        })
    }

    /// Native pipeline.
    pub fn handle(&self) -> PipelineHandle {
        self.base.handle()
    }

    /// Pipeline layout.
    pub fn layout(&self) -> PipelineLayoutHandle {
        self.base.layout()
    }

    /// Barriers queued for the next dispatch.
    pub fn pending_barriers(&self) -> &BarrierBatch {
        &self.storage_barriers
    }

    /// Bind a whole buffer to `slot`.
    pub fn bind_buffer(&mut self, slot: u32, buffer: &Buffer) -> GraphicsResult<()> {
        self.base.bind_buffer(slot, buffer)
    }

    /// Bind a whole buffer to the binding called `name`.
    pub fn bind_buffer_by_name(&mut self, name: &str, buffer: &Buffer) -> GraphicsResult<()> {
        self.base.bind_buffer_by_name(name, buffer)
    }

    /// Bind a sampled texture to `slot`.
    pub fn bind_texture(&mut self, slot: u32, texture: &Texture, sampler: Option<&Sampler>) -> GraphicsResult<()> {
        self.base.bind_texture(slot, texture, sampler)
    }

    /// Bind a texture for shader writes to `slot`.
    pub fn bind_storage_texture(&mut self, slot: u32, texture: &Texture) -> GraphicsResult<()> {
        self.base
            .writes_mut()
            .bind_image(slot, texture.view(), None, TextureLayout::General)?;
        self.storage_barriers.push(ImageBarrier::storage_write(
            texture.image(),
            texture.format(),
            texture.layout(),
        ));
        Ok(())
    }

    /// Next descriptor set of `identity`, rotating through its pack.
    pub fn allocate_descriptor_set(&mut self, identity: u64) -> GraphicsResult<DescriptorSetHandle> {
        self.base.allocate_descriptor_set(identity)
    }

    /// Release the pack of `identity`. Returns whether it existed.
    pub fn free_descriptor_set(&mut self, identity: u64) -> bool {
        self.base.free_descriptor_set(identity)
    }

    /// Record a push-constant update inside a declared range.
    pub fn push_constants(&self, cmd: &mut CommandBuffer, offset: u32, data: &[u8]) -> GraphicsResult<()> {
        self.base
            .push_constants(cmd, ShaderStages::COMPUTE, offset, data)
    }

    /// Record barriers, bind, dispatch and restore barriers.
    ///
    /// Returns `false` and records nothing if a descriptor slot is unbound.
    /// Queued storage transitions are consumed by a successful dispatch.
    pub fn dispatch(&mut self, cmd: &mut CommandBuffer, identity: u64, x: u32, y: u32, z: u32) -> GraphicsResult<bool> {
        if !self.base.writes().bindings().is_empty() && !self.base.writes().ready() {
            return Ok(false);
        }
        self.storage_barriers.record(cmd);
        self.base.bind(cmd);
        self.base.bind_descriptors(cmd, identity)?;
        cmd.dispatch(x, y, z);
        self.storage_barriers.swapped().record(cmd);
        self.storage_barriers.clear();
        Ok(true)
    }
}

impl std::fmt::Debug for ComputePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputePipeline")
            .field("label", &self.base.label())
            .field("handle", &self.base.handle())
            .field("pending_barriers", &self.storage_barriers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, DummyCommand};
    use crate::config::DeviceParameters;
    use crate::descriptor::{DescriptorBinding, DescriptorType, object_identity};
    use crate::error::CheckPolicy;
    use crate::types::{TextureDescriptor, TextureFormat, TextureUsage};

    fn device() -> (Arc<DummyBackend>, Arc<GraphicsDevice>) {
        let backend = Arc::new(DummyBackend::new());
        let device = GraphicsDevice::new(
            backend.clone(),
            DeviceParameters::new().with_check_policy(CheckPolicy::Propagate),
        )
        .unwrap();
        (backend, device)
    }

    fn storage_image_shader() -> Shader {
        Shader::new()
            .with_label("blur")
            .with_stage(ShaderStages::COMPUTE, vec![0x0723_0203])
            .with_binding(DescriptorBinding::new(
                0,
                "target",
                DescriptorType::StorageImage,
                ShaderStages::COMPUTE,
            ))
    }

    #[test]
    fn test_storage_texture_round_trips_through_general() {
        let (backend, device) = device();
        let mut pipeline = ComputePipeline::new(&device, &storage_image_shader()).unwrap();
        let texture = device
            .create_texture(
                &TextureDescriptor::new_2d(16, 16, TextureFormat::Rgba8Unorm, TextureUsage::STORAGE_BINDING),
                None,
            )
            .unwrap();
        assert_eq!(texture.layout(), TextureLayout::ShaderReadOnly);
        let before = backend.image_transitions(texture.image()).len();

        pipeline.bind_storage_texture(0, &texture).unwrap();
        assert_eq!(pipeline.pending_barriers().len(), 1);

        let dispatched = device
            .compute(|cmd| pipeline.dispatch(cmd, object_identity(7, 0), 2, 2, 1))
            .unwrap();
        assert!(dispatched);
        assert!(pipeline.pending_barriers().is_empty());

        let transitions = backend.image_transitions(texture.image());
        assert_eq!(
            &transitions[before..],
            &[
                (TextureLayout::ShaderReadOnly, TextureLayout::General),
                (TextureLayout::General, TextureLayout::ShaderReadOnly),
            ]
        );
        assert!(backend
            .executed_commands()
            .iter()
            .any(|cmd| matches!(cmd, DummyCommand::Dispatch { x: 2, y: 2, z: 1 })));
    }

    #[test]
    fn test_second_dispatch_issues_no_transitions() {
        let (backend, device) = device();
        let mut pipeline = ComputePipeline::new(&device, &storage_image_shader()).unwrap();
        let texture = device
            .create_texture(
                &TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm, TextureUsage::STORAGE_BINDING),
                None,
            )
            .unwrap();
        pipeline.bind_storage_texture(0, &texture).unwrap();

        device
            .compute(|cmd| pipeline.dispatch(cmd, object_identity(3, 0), 1, 1, 1))
            .unwrap();
        let after_first = backend.image_transitions(texture.image()).len();

        let dispatched = device
            .compute(|cmd| pipeline.dispatch(cmd, object_identity(3, 0), 1, 1, 1))
            .unwrap();
        assert!(dispatched);
        assert_eq!(backend.image_transitions(texture.image()).len(), after_first);
    }
}
