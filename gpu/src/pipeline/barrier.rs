//! Image layout transitions.
//!
//! Barriers are collected into a [`BarrierBatch`] and recorded as a single
//! pipeline barrier command.

use crate::backend::ImageHandle;
use crate::command::CommandBuffer;
use crate::types::{AccessFlags, PipelineStages, TextureFormat, TextureLayout};

/// One image memory barrier covering all mips and layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    /// Image to transition.
    pub image: ImageHandle,
    /// Format, used to pick the aspect.
    pub format: TextureFormat,
    /// Layout before the barrier.
    pub old_layout: TextureLayout,
    /// Layout after the barrier.
    pub new_layout: TextureLayout,
    /// Accesses that must complete before the barrier.
    pub src_access: AccessFlags,
    /// Accesses that wait for the barrier.
    pub dst_access: AccessFlags,
    /// Stages that must complete before the barrier.
    pub src_stage: PipelineStages,
    /// Stages that wait for the barrier.
    pub dst_stage: PipelineStages,
}

impl ImageBarrier {
    /// Transition between two layouts, deriving access and stages from them.
    pub fn transition(
        image: ImageHandle,
        format: TextureFormat,
        old_layout: TextureLayout,
        new_layout: TextureLayout,
    ) -> Self {
        Self {
            image,
            format,
            old_layout,
            new_layout,
            src_access: old_layout.access(),
            dst_access: new_layout.access(),
            src_stage: old_layout.stage(),
            dst_stage: new_layout.stage(),
        }
    }

    /// Move an image into `General` for compute shader writes.
    pub fn storage_write(image: ImageHandle, format: TextureFormat, old_layout: TextureLayout) -> Self {
        Self {
            image,
            format,
            old_layout,
            new_layout: TextureLayout::General,
            src_access: AccessFlags::empty(),
            dst_access: AccessFlags::SHADER_WRITE,
            src_stage: old_layout.stage(),
            dst_stage: PipelineStages::COMPUTE_SHADER,
        }
    }

    /// The reverse transition: layouts, accesses and stages swapped.
    pub fn swapped(&self) -> Self {
        Self {
            image: self.image,
            format: self.format,
            old_layout: self.new_layout,
            new_layout: self.old_layout,
            src_access: self.dst_access,
            dst_access: self.src_access,
            src_stage: self.dst_stage,
            dst_stage: self.src_stage,
        }
    }

    /// Whether the barrier changes nothing.
    pub fn is_noop(&self) -> bool {
        self.old_layout == self.new_layout && self.src_access == self.dst_access
    }
}

/// Barriers to record together.
///
/// A second barrier for the same image replaces the first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BarrierBatch {
    barriers: Vec<ImageBarrier>,
}

impl BarrierBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a barrier, skipping no-ops.
    pub fn push(&mut self, barrier: ImageBarrier) {
        if barrier.is_noop() {
            return;
        }
        match self.barriers.iter_mut().find(|b| b.image == barrier.image) {
            Some(existing) => *existing = barrier,
            None => self.barriers.push(barrier),
        }
    }

    /// Barriers in insertion order.
    pub fn barriers(&self) -> &[ImageBarrier] {
        &self.barriers
    }

    /// Batch with every barrier reversed.
    pub fn swapped(&self) -> Self {
        Self {
            barriers: self.barriers.iter().map(ImageBarrier::swapped).collect(),
        }
    }

    /// Record all barriers as one command. Does nothing when empty.
    pub fn record(&self, cmd: &mut CommandBuffer) {
        cmd.pipeline_barrier(&self.barriers);
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }

    /// Number of barriers.
    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    /// Remove every barrier.
    pub fn clear(&mut self) {
        self.barriers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_write_barrier() {
        let barrier = ImageBarrier::storage_write(
            ImageHandle::Dummy(1),
            TextureFormat::Rgba8Unorm,
            TextureLayout::ShaderReadOnly,
        );
        assert_eq!(barrier.new_layout, TextureLayout::General);
        assert!(barrier.src_access.is_empty());
        assert_eq!(barrier.dst_access, AccessFlags::SHADER_WRITE);

        let back = barrier.swapped();
        assert_eq!(back.old_layout, TextureLayout::General);
        assert_eq!(back.new_layout, TextureLayout::ShaderReadOnly);
        assert_eq!(back.src_access, AccessFlags::SHADER_WRITE);
        assert!(back.dst_access.is_empty());
        assert_eq!(back.swapped(), barrier);
    }

    #[test]
    fn test_batch_replaces_same_image() {
        let mut batch = BarrierBatch::new();
        let image = ImageHandle::Dummy(4);
        batch.push(ImageBarrier::transition(
            image,
            TextureFormat::Rgba8Unorm,
            TextureLayout::Undefined,
            TextureLayout::TransferDst,
        ));
        batch.push(ImageBarrier::transition(
            image,
            TextureFormat::Rgba8Unorm,
            TextureLayout::TransferDst,
            TextureLayout::ShaderReadOnly,
        ));
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.barriers()[0].new_layout, TextureLayout::ShaderReadOnly);
    }

    #[test]
    fn test_noop_skipped() {
        let mut batch = BarrierBatch::new();
        batch.push(ImageBarrier::transition(
            ImageHandle::Dummy(1),
            TextureFormat::Rgba8Unorm,
            TextureLayout::ShaderReadOnly,
            TextureLayout::ShaderReadOnly,
        ));
        assert!(batch.is_empty());
    }
}
