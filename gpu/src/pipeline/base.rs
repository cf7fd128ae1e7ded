//! State shared by graphics and compute pipelines.

use std::sync::Arc;

use crate::backend::{
    DescriptorSetHandle, DescriptorSetLayoutHandle, PipelineHandle, PipelineLayoutHandle,
};
use crate::command::CommandBuffer;
use crate::descriptor::{DescriptorPool, DescriptorSetCache, DescriptorWrites};
use crate::device::GraphicsDevice;
use crate::error::{GraphicsError, GraphicsResult};
use crate::render_target::SampledImage;
use crate::resources::{Buffer, Sampler, Texture};
use crate::types::{ShaderStages, TextureLayout};

use super::{PipelineBindPoint, PipelineShaderStage, PushConstantRange, Shader};

/// Native objects a pipeline is built from, handed to the creation closure.
pub(crate) struct PipelineParts<'a> {
    pub layout: PipelineLayoutHandle,
    pub stages: &'a [PipelineShaderStage],
}

pub(crate) struct PipelineBase {
    device: Arc<GraphicsDevice>,
    label: Option<String>,
    bind_point: PipelineBindPoint,
    stages: Vec<PipelineShaderStage>,
    set_layout: DescriptorSetLayoutHandle,
    layout: PipelineLayoutHandle,
    pipeline: PipelineHandle,
    push_constants: Vec<PushConstantRange>,
    writes: DescriptorWrites,
    cache: DescriptorSetCache,
    pool: Option<DescriptorPool>,
}

impl PipelineBase {
    /// Create modules and layouts for `shader`, then the pipeline itself
    /// through `create`.
    pub fn new(
        device: &Arc<GraphicsDevice>,
        shader: &Shader,
        bind_point: PipelineBindPoint,
        create: impl FnOnce(&PipelineParts<'_>) -> GraphicsResult<PipelineHandle>,
    ) -> GraphicsResult<Self> {
        shader.validate()?;
        let push_constants = shader.merged_push_constants()?;
        let backend = device.backend();

        let mut stages = Vec::with_capacity(shader.stages.len());
        let mut cleanup = Cleanup::new(device);
        for source in &shader.stages {
            let module = device.checked(
                "create_shader_module",
                backend.create_shader_module(&source.spirv),
            )?;
            cleanup.modules.push(module);
            stages.push(PipelineShaderStage {
                stage: source.stage,
                module,
                entry_point: source.entry_point.clone(),
            });
        }

        let set_layout = device.checked(
            "create_descriptor_set_layout",
            backend.create_descriptor_set_layout(&shader.bindings),
        )?;
        cleanup.set_layout = Some(set_layout);
        let layout = device.checked(
            "create_pipeline_layout",
            backend.create_pipeline_layout(&[set_layout], &push_constants),
        )?;
        cleanup.layout = Some(layout);

        let pool = device.new_descriptor_pool()?;
        let pipeline = create(&PipelineParts {
            layout,
            stages: &stages,
        })?;
        cleanup.disarm();

        log::debug!(
            "Created {:?} pipeline {:?} ({} bindings, {} push constant ranges)",
            bind_point,
            shader.label,
            shader.bindings.len(),
            push_constants.len()
        );

        Ok(Self {
            device: device.clone(),
            label: shader.label.clone(),
            bind_point,
            stages,
            set_layout,
            layout,
            pipeline,
            push_constants,
            writes: DescriptorWrites::new(shader.bindings.clone()),
            cache: DescriptorSetCache::new(set_layout),
            pool: Some(pool),
        })
    }

    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn handle(&self) -> PipelineHandle {
        self.pipeline
    }

    pub fn layout(&self) -> PipelineLayoutHandle {
        self.layout
    }

    pub fn set_layout(&self) -> DescriptorSetLayoutHandle {
        self.set_layout
    }

    pub fn push_constant_ranges(&self) -> &[PushConstantRange] {
        &self.push_constants
    }

    pub fn writes(&self) -> &DescriptorWrites {
        &self.writes
    }

    pub fn writes_mut(&mut self) -> &mut DescriptorWrites {
        &mut self.writes
    }

    pub fn cache(&self) -> &DescriptorSetCache {
        &self.cache
    }

    pub fn bind(&self, cmd: &mut CommandBuffer) {
        cmd.bind_pipeline(self.bind_point, self.pipeline);
    }

    pub fn bind_buffer(&mut self, slot: u32, buffer: &Buffer) -> GraphicsResult<()> {
        self.writes
            .bind_buffer(slot, buffer.handle(), 0, buffer.size())
    }

    pub fn bind_buffer_by_name(&mut self, name: &str, buffer: &Buffer) -> GraphicsResult<()> {
        self.writes
            .bind_buffer_by_name(name, buffer.handle(), 0, buffer.size())
    }

    pub fn bind_texture(&mut self, slot: u32, texture: &Texture, sampler: Option<&Sampler>) -> GraphicsResult<()> {
        self.writes.bind_image(
            slot,
            texture.view(),
            sampler.map(Sampler::handle),
            TextureLayout::ShaderReadOnly,
        )
    }

    pub fn bind_texture_by_name(
        &mut self,
        name: &str,
        texture: &Texture,
        sampler: Option<&Sampler>,
    ) -> GraphicsResult<()> {
        self.writes.bind_image_by_name(
            name,
            texture.view(),
            sampler.map(Sampler::handle),
            TextureLayout::ShaderReadOnly,
        )
    }

    pub fn bind_sampled_image(&mut self, slot: u32, image: &SampledImage) -> GraphicsResult<()> {
        self.writes
            .bind_image(slot, image.view, Some(image.sampler), image.layout)
    }

    pub fn allocate_descriptor_set(&mut self, identity: u64) -> GraphicsResult<DescriptorSetHandle> {
        let pool = self
            .pool
            .as_mut()
            .ok_or_else(|| GraphicsError::Internal("pipeline descriptor pool released".to_string()))?;
        self.cache.allocate(identity, pool)
    }

    pub fn free_descriptor_set(&mut self, identity: u64) -> bool {
        self.cache.free(identity)
    }

    /// Write the bound resources into the next set of `identity` and bind it.
    ///
    /// Returns `false` without touching the command buffer when a slot is
    /// unbound.
    pub fn bind_descriptors(&mut self, cmd: &mut CommandBuffer, identity: u64) -> GraphicsResult<bool> {
        if self.writes.bindings().is_empty() {
            return Ok(true);
        }
        if !self.writes.ready() {
            return Ok(false);
        }
        let set = self.allocate_descriptor_set(identity)?;
        self.writes.apply(self.device.backend().as_ref(), set);
        cmd.bind_descriptor_set(self.bind_point, self.layout, 0, set);
        Ok(true)
    }

    pub fn push_constants(
        &self,
        cmd: &mut CommandBuffer,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    ) -> GraphicsResult<()> {
        let len = data.len() as u32;
        let covered = self
            .push_constants
            .iter()
            .any(|range| range.stages.contains(stages) && range.contains(offset, len));
        if !covered {
            log::warn!(
                "Push constant write {:?} [{}..{}] is outside the pipeline's ranges",
                stages,
                offset,
                offset + len
            );
            return Err(GraphicsError::InvalidParameter(format!(
                "push constant range {:?} {}+{} not declared",
                stages, offset, len
            )));
        }
        cmd.push_constants(self.layout, stages, offset, data);
        Ok(())
    }
}

impl Drop for PipelineBase {
    fn drop(&mut self) {
        self.device.destroy_async(self.pipeline);
        self.device.destroy_async(self.layout);
        self.device.destroy_async(self.set_layout);
        for stage in &self.stages {
            self.device.destroy_async(stage.module);
        }
        if let Some(pool) = self.pool.take() {
            self.device.defer(move || drop(pool));
        }
    }
}

/// Destroys partially created objects when pipeline creation fails.
struct Cleanup<'a> {
    device: &'a GraphicsDevice,
    modules: Vec<crate::backend::ShaderModuleHandle>,
    set_layout: Option<DescriptorSetLayoutHandle>,
    layout: Option<PipelineLayoutHandle>,
    armed: bool,
}

impl<'a> Cleanup<'a> {
    fn new(device: &'a GraphicsDevice) -> Self {
        Self {
            device,
            modules: Vec::new(),
            set_layout: None,
            layout: None,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for Cleanup<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let backend = self.device.backend();
        if let Some(layout) = self.layout {
            backend.destroy_pipeline_layout(layout);
        }
        if let Some(set_layout) = self.set_layout {
            backend.destroy_descriptor_set_layout(set_layout);
        }
        for module in self.modules.drain(..) {
            backend.destroy_shader_module(module);
        }
    }
}
