//! Graphics pipeline.

use std::sync::Arc;

use crate::backend::{DescriptorSetHandle, PipelineHandle, PipelineLayoutHandle};
use crate::command::CommandBuffer;
use crate::device::GraphicsDevice;
use crate::error::{GraphicsError, GraphicsResult};
use crate::render_target::SampledImage;
use crate::resources::{Buffer, Sampler, Texture};
use crate::types::ShaderStages;

use super::base::PipelineBase;
use super::{
    FixedFunctionDescriptor, FixedFunctionState, GraphicsPipelineState, PassInfo,
    PipelineBindPoint, PushConstantRange, Shader, VertexElement, VertexLayout,
};

/// What a graphics pipeline is built from besides its shader.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipelineDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Fixed-function settings.
    pub fixed_function: FixedFunctionDescriptor,
    /// Vertex elements in location order.
    pub vertex_elements: Vec<VertexElement>,
}

impl PipelineDescriptor {
    /// Opaque triangles with the given vertex elements.
    pub fn new(vertex_elements: Vec<VertexElement>) -> Self {
        Self {
            label: None,
            fixed_function: FixedFunctionDescriptor::opaque(),
            vertex_elements,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Replace the fixed-function settings.
    pub fn with_fixed_function(mut self, fixed_function: FixedFunctionDescriptor) -> Self {
        self.fixed_function = fixed_function;
        self
    }
}

/// A graphics pipeline with its descriptor-set cache.
///
/// # Example
///
/// ```ignore
/// let mut pipeline = device.create_graphics_pipeline(&shader, &descriptor, target.pass_info())?;
/// pipeline.bind_texture(1, &albedo, Some(&sampler))?;
/// pipeline.bind(cmd);
/// if pipeline.bind_descriptors(cmd, object_identity(entity, 0))? {
///     cmd.draw(3, 1, 0, 0);
/// }
/// ```
pub struct GraphicsPipeline {
    base: PipelineBase,
    vertex_layout: VertexLayout,
    fixed_function: FixedFunctionState,
    pass: PassInfo,
}

impl GraphicsPipeline {
    /// Build a pipeline for render passes shaped like `pass`.
    pub fn new(
        device: &Arc<GraphicsDevice>,
        shader: &Shader,
        descriptor: &PipelineDescriptor,
        pass: PassInfo,
    ) -> GraphicsResult<Self> {
        if shader.is_compute() {
            return Err(GraphicsError::InvalidParameter(
                "compute shader passed to a graphics pipeline".to_string(),
            ));
        }
        let vertex_layout = VertexLayout::from_elements(&descriptor.vertex_elements);
        let fixed_function = FixedFunctionState::new(
            &descriptor.fixed_function,
            pass.color_attachment_count,
            pass.has_depth,
        );
        let base = PipelineBase::new(device, shader, PipelineBindPoint::Graphics, |parts| {
            device.checked(
                "create_graphics_pipeline",
                device
                    .backend()
                    .create_graphics_pipeline(&GraphicsPipelineState {
                        layout: parts.layout,
                        pass,
                        stages: parts.stages,
                        vertex_layout: &vertex_layout,
                        fixed_function: &fixed_function,
                    }),
            )
        })?;
        Ok(Self {
            base,
            vertex_layout,
            fixed_function,
            pass,
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

    /// Debug label of the shader.
    pub fn label(&self) -> Option<&str> {
        self.base.label()
    }

    /// Derived vertex input layout.
    pub fn vertex_layout(&self) -> &VertexLayout {
        &self.vertex_layout
    }

    /// Expanded fixed-function state.
    pub fn fixed_function(&self) -> &FixedFunctionState {
        &self.fixed_function
    }

    /// Pass shape the pipeline was built for.
    pub fn pass(&self) -> PassInfo {
        self.pass
    }

    /// Merged push-constant ranges.
    pub fn push_constant_ranges(&self) -> &[PushConstantRange] {
        self.base.push_constant_ranges()
    }

    /// Bind the pipeline.
    pub fn bind(&self, cmd: &mut CommandBuffer) {
        self.base.bind(cmd);
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

    /// Bind a sampled texture to the binding called `name`.
    pub fn bind_texture_by_name(&mut self, name: &str, texture: &Texture, sampler: Option<&Sampler>) -> GraphicsResult<()> {
        self.base.bind_texture_by_name(name, texture, sampler)
    }

    /// Bind a render target's sampled image to `slot`.
    pub fn bind_sampled_image(&mut self, slot: u32, image: &SampledImage) -> GraphicsResult<()> {
        self.base.bind_sampled_image(slot, image)
    }

    /// Next descriptor set of `identity`, rotating through its pack.
    pub fn allocate_descriptor_set(&mut self, identity: u64) -> GraphicsResult<DescriptorSetHandle> {
        self.base.allocate_descriptor_set(identity)
    }

    /// Release the pack of `identity`. Returns whether it existed.
    pub fn free_descriptor_set(&mut self, identity: u64) -> bool {
        self.base.free_descriptor_set(identity)
    }

    /// Number of identities holding a pack.
    pub fn cached_identities(&self) -> usize {
        self.base.cache().len()
    }

    /// Update and bind the next descriptor set of `identity`.
    ///
    /// Returns `false` if a slot is unbound; the draw should then be skipped.
    pub fn bind_descriptors(&mut self, cmd: &mut CommandBuffer, identity: u64) -> GraphicsResult<bool> {
        self.base.bind_descriptors(cmd, identity)
    }

    /// Record a push-constant update inside a declared range.
    pub fn push_constants(&self, cmd: &mut CommandBuffer, stages: ShaderStages, offset: u32, data: &[u8]) -> GraphicsResult<()> {
        self.base.push_constants(cmd, stages, offset, data)
    }
}

impl std::fmt::Debug for GraphicsPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsPipeline")
            .field("label", &self.base.label())
            .field("handle", &self.base.handle())
            .field("pass", &self.pass)
            .finish()
    }
}
