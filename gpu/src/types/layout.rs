//! Image layouts, memory access masks and pipeline stages.
//!
//! These are backend-neutral mirrors of the native enums. Barrier builders in
//! [`crate::pipeline::barrier`] combine them; the Vulkan backend converts them
//! in its `conversion` module.

use bitflags::bitflags;

/// Layout an image can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureLayout {
    /// Initial state, contents undefined.
    #[default]
    Undefined,
    /// Optimal for color attachment writes.
    ColorAttachment,
    /// Optimal for depth/stencil attachment writes.
    DepthStencilAttachment,
    /// Optimal for shader sampling.
    ShaderReadOnly,
    /// Optimal for transfer source operations.
    TransferSrc,
    /// Optimal for transfer destination operations.
    TransferDst,
    /// Optimal for presentation.
    PresentSrc,
    /// General layout, required for storage image access.
    General,
}

impl TextureLayout {
    /// Pipeline stages that last touch an image in this layout.
    pub fn stage(self) -> PipelineStages {
        match self {
            Self::Undefined => PipelineStages::TOP_OF_PIPE,
            Self::ColorAttachment => PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            Self::DepthStencilAttachment => PipelineStages::FRAGMENT_TESTS,
            Self::ShaderReadOnly => PipelineStages::FRAGMENT_SHADER,
            Self::TransferSrc | Self::TransferDst => PipelineStages::TRANSFER,
            Self::PresentSrc => PipelineStages::BOTTOM_OF_PIPE,
            Self::General => PipelineStages::COMPUTE_SHADER,
        }
    }

    /// Memory access performed on an image in this layout.
    pub fn access(self) -> AccessFlags {
        match self {
            Self::Undefined | Self::PresentSrc => AccessFlags::empty(),
            Self::ColorAttachment => AccessFlags::COLOR_ATTACHMENT_WRITE,
            Self::DepthStencilAttachment => AccessFlags::DEPTH_STENCIL_WRITE,
            Self::ShaderReadOnly => AccessFlags::SHADER_READ,
            Self::TransferSrc => AccessFlags::TRANSFER_READ,
            Self::TransferDst => AccessFlags::TRANSFER_WRITE,
            Self::General => AccessFlags::SHADER_READ | AccessFlags::SHADER_WRITE,
        }
    }
}

bitflags! {
    /// Memory access types for barriers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u32 {
        const SHADER_READ = 1 << 0;
        const SHADER_WRITE = 1 << 1;
        const COLOR_ATTACHMENT_WRITE = 1 << 2;
        const DEPTH_STENCIL_WRITE = 1 << 3;
        const TRANSFER_READ = 1 << 4;
        const TRANSFER_WRITE = 1 << 5;
        const HOST_WRITE = 1 << 6;
    }
}

bitflags! {
    /// Pipeline stages for barriers and semaphore waits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const VERTEX_SHADER = 1 << 1;
        const FRAGMENT_SHADER = 1 << 2;
        const FRAGMENT_TESTS = 1 << 3;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 4;
        const COMPUTE_SHADER = 1 << 5;
        const TRANSFER = 1 << 6;
        const BOTTOM_OF_PIPE = 1 << 7;
        const ALL_COMMANDS = 1 << 8;
    }
}

bitflags! {
    /// Shader stages a binding or push-constant range is visible to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE = 1 << 2;
        const ALL_GRAPHICS = Self::VERTEX.bits() | Self::FRAGMENT.bits();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_general_layout_is_read_write() {
        let access = TextureLayout::General.access();
        assert!(access.contains(AccessFlags::SHADER_READ));
        assert!(access.contains(AccessFlags::SHADER_WRITE));
        assert_eq!(
            TextureLayout::General.stage(),
            PipelineStages::COMPUTE_SHADER
        );
    }

    #[test]
    fn test_undefined_has_no_access() {
        assert!(TextureLayout::Undefined.access().is_empty());
    }
}
