//! Fixed-function pipeline state.

use crate::types::CompareFunction;

/// Primitive assembly topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    /// Separate points.
    PointList,
    /// Separate lines.
    LineList,
    /// Connected lines.
    LineStrip,
    /// Separate triangles.
    #[default]
    TriangleList,
    /// Connected triangles.
    TriangleStrip,
}

/// Face culling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    /// No culling.
    None,
    /// Cull front faces.
    Front,
    /// Cull back faces.
    #[default]
    Back,
}

/// Winding that counts as front-facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrontFace {
    /// Counter-clockwise.
    #[default]
    CounterClockwise,
    /// Clockwise.
    Clockwise,
}

/// Polygon rasterization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PolygonMode {
    /// Filled.
    #[default]
    Fill,
    /// Wireframe.
    Line,
}

/// Color blending applied to every color attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    /// Overwrite.
    #[default]
    Opaque,
    /// Source-over alpha blending.
    Alpha,
    /// Additive blending.
    Additive,
}

/// Depth test configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthState {
    /// Write depth.
    pub write: bool,
    /// Comparison against the stored depth.
    pub compare: CompareFunction,
}

impl Default for DepthState {
    fn default() -> Self {
        Self {
            write: true,
            compare: CompareFunction::Less,
        }
    }
}

/// Small user-facing description of the fixed-function state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FixedFunctionDescriptor {
    /// Topology.
    pub topology: PrimitiveTopology,
    /// Culling.
    pub cull_mode: CullMode,
    /// Front face winding.
    pub front_face: FrontFace,
    /// Polygon mode.
    pub polygon_mode: PolygonMode,
    /// Blending.
    pub blend: BlendMode,
    /// Depth test; `None` disables it.
    pub depth: Option<DepthState>,
    /// Samples per pixel.
    pub sample_count: u32,
}

impl FixedFunctionDescriptor {
    /// Opaque triangles with back-face culling and depth testing.
    pub fn opaque() -> Self {
        Self {
            depth: Some(DepthState::default()),
            sample_count: 1,
            ..Default::default()
        }
    }

    /// Set the blend mode.
    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    /// Set the cull mode.
    pub fn with_cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    /// Set or disable the depth test.
    pub fn with_depth(mut self, depth: Option<DepthState>) -> Self {
        self.depth = depth;
        self
    }

    /// Set the topology.
    pub fn with_topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }
}

/// Full fixed-function state for one render pass shape.
///
/// Viewport and scissor are always dynamic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FixedFunctionState {
    /// Topology.
    pub topology: PrimitiveTopology,
    /// Culling.
    pub cull_mode: CullMode,
    /// Front face winding.
    pub front_face: FrontFace,
    /// Polygon mode.
    pub polygon_mode: PolygonMode,
    /// One blend state per color attachment.
    pub color_blend: Vec<BlendMode>,
    /// Depth test, only when the pass has a depth attachment.
    pub depth: Option<DepthState>,
    /// Samples per pixel.
    pub sample_count: u32,
}

impl FixedFunctionState {
    /// Expand `descriptor` for a pass with `color_attachments` color
    /// attachments and optionally a depth attachment.
    pub fn new(descriptor: &FixedFunctionDescriptor, color_attachments: u32, has_depth: bool) -> Self {
        Self {
            topology: descriptor.topology,
            cull_mode: descriptor.cull_mode,
            front_face: descriptor.front_face,
            polygon_mode: descriptor.polygon_mode,
            color_blend: vec![descriptor.blend; color_attachments as usize],
            depth: if has_depth { descriptor.depth } else { None },
            sample_count: descriptor.sample_count.max(1),
        }
    }
}
