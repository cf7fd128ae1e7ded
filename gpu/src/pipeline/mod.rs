//! Graphics and compute pipelines.
//!
//! A pipeline owns its shader modules, descriptor set layout, pipeline layout
//! and the per-draw-object descriptor-set cache. Fixed-function state is
//! expanded from a [`FixedFunctionDescriptor`] for the render pass the
//! pipeline targets, and the vertex input layout from a list of
//! [`VertexElement`]s.

mod barrier;
mod base;
mod compute;
mod graphics;
mod shader;
mod state;
mod vertex;

pub use barrier::{BarrierBatch, ImageBarrier};
pub use compute::ComputePipeline;
pub use graphics::{GraphicsPipeline, PipelineDescriptor};
pub use shader::{PUSH_CONSTANT_MAX_SIZE, PushConstantRange, Shader, ShaderStageSource};
pub use state::{
    BlendMode, CullMode, DepthState, FixedFunctionDescriptor, FixedFunctionState, FrontFace,
    PolygonMode, PrimitiveTopology,
};
pub use vertex::{
    VertexAttribute, VertexElement, VertexFormat, VertexLayout, VertexSemantic, VertexStepMode,
};

use crate::backend::{PipelineLayoutHandle, RenderPassHandle, ShaderModuleHandle};
use crate::types::ShaderStages;

/// Which pipeline slot a bind targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineBindPoint {
    /// Graphics pipeline.
    Graphics,
    /// Compute pipeline.
    Compute,
}

/// A compiled stage ready for pipeline creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineShaderStage {
    /// Stage.
    pub stage: ShaderStages,
    /// Module.
    pub module: ShaderModuleHandle,
    /// Entry point.
    pub entry_point: String,
}

/// Render pass a graphics pipeline is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassInfo {
    /// Render pass (or any compatible one).
    pub render_pass: RenderPassHandle,
    /// Number of color attachments.
    pub color_attachment_count: u32,
    /// Whether the pass has a depth attachment.
    pub has_depth: bool,
}

/// Everything the backend needs to create a graphics pipeline.
#[derive(Debug, Clone, Copy)]
pub struct GraphicsPipelineState<'a> {
    /// Pipeline layout.
    pub layout: PipelineLayoutHandle,
    /// Target pass.
    pub pass: PassInfo,
    /// Shader stages.
    pub stages: &'a [PipelineShaderStage],
    /// Vertex input.
    pub vertex_layout: &'a VertexLayout,
    /// Fixed-function state.
    pub fixed_function: &'a FixedFunctionState,
}
