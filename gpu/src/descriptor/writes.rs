//! Resource bindings of a pipeline's descriptor set.

use crate::backend::{
    BufferHandle, DescriptorSetHandle, ImageViewHandle, RenderBackend, SamplerHandle,
};
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::TextureLayout;

use super::{DescriptorBinding, DescriptorResource, DescriptorWrite};

/// What is currently bound to each slot of a descriptor set layout.
///
/// Bindings are addressed by slot or by the shader variable name. Resource
/// type compatibility is not checked here; a mismatch surfaces in the API's
/// validation layer.
#[derive(Debug, Clone)]
pub struct DescriptorWrites {
    bindings: Vec<DescriptorBinding>,
    bound: Vec<Option<DescriptorResource>>,
}

impl DescriptorWrites {
    /// Start with every slot of `bindings` unbound.
    pub fn new(bindings: Vec<DescriptorBinding>) -> Self {
        let bound = vec![None; bindings.len()];
        Self { bindings, bound }
    }

    /// Layout bindings.
    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }

    fn position_of_slot(&self, slot: u32) -> GraphicsResult<usize> {
        self.bindings
            .iter()
            .position(|b| b.binding == slot)
            .ok_or_else(|| {
                log::warn!("No descriptor binding at slot {}", slot);
                GraphicsError::InvalidParameter(format!("no descriptor binding at slot {slot}"))
            })
    }

    fn position_of_name(&self, name: &str) -> GraphicsResult<usize> {
        self.bindings
            .iter()
            .position(|b| b.name == name)
            .ok_or_else(|| {
                log::warn!("No descriptor binding named {}", name);
                GraphicsError::InvalidParameter(format!("no descriptor binding named {name}"))
            })
    }

    /// Bind a buffer range to `slot`.
    pub fn bind_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64, range: u64) -> GraphicsResult<()> {
        let position = self.position_of_slot(slot)?;
        self.bound[position] = Some(DescriptorResource::Buffer {
            buffer,
            offset,
            range,
        });
        Ok(())
    }

    /// Bind an image view, with an optional sampler, to `slot`.
    pub fn bind_image(
        &mut self,
        slot: u32,
        view: ImageViewHandle,
        sampler: Option<SamplerHandle>,
        layout: TextureLayout,
    ) -> GraphicsResult<()> {
        let position = self.position_of_slot(slot)?;
        self.bound[position] = Some(DescriptorResource::Image {
            view,
            sampler,
            layout,
        });
        Ok(())
    }

    /// Bind a buffer range to the binding called `name`.
    pub fn bind_buffer_by_name(&mut self, name: &str, buffer: BufferHandle, offset: u64, range: u64) -> GraphicsResult<()> {
        let slot = self.bindings[self.position_of_name(name)?].binding;
        self.bind_buffer(slot, buffer, offset, range)
    }

    /// Bind an image view to the binding called `name`.
    pub fn bind_image_by_name(
        &mut self,
        name: &str,
        view: ImageViewHandle,
        sampler: Option<SamplerHandle>,
        layout: TextureLayout,
    ) -> GraphicsResult<()> {
        let slot = self.bindings[self.position_of_name(name)?].binding;
        self.bind_image(slot, view, sampler, layout)
    }

    /// Clear the resource bound at `slot`.
    pub fn unbind(&mut self, slot: u32) {
        if let Some(position) = self.bindings.iter().position(|b| b.binding == slot) {
            self.bound[position] = None;
        }
    }

    /// Whether every slot has a resource.
    ///
    /// Logs a warning naming each unbound slot and the kind of resource it
    /// expects.
    pub fn ready(&self) -> bool {
        let mut ready = true;
        for (binding, bound) in self.bindings.iter().zip(&self.bound) {
            if bound.is_none() {
                log::warn!(
                    "Descriptor slot {} ({}) has no {} bound",
                    binding.binding,
                    binding.name,
                    binding.ty.kind_name()
                );
                ready = false;
            }
        }
        ready
    }

    /// Writes for every bound slot.
    pub fn writes(&self) -> Vec<DescriptorWrite> {
        self.bindings
            .iter()
            .zip(&self.bound)
            .filter_map(|(binding, bound)| {
                bound.map(|resource| DescriptorWrite {
                    binding: binding.binding,
                    ty: binding.ty,
                    resource,
                })
            })
            .collect()
    }

    /// Update `set` if every slot is bound. Returns `false` and skips the
    /// update otherwise.
    pub fn apply(&self, backend: &dyn RenderBackend, set: DescriptorSetHandle) -> bool {
        if !self.ready() {
            return false;
        }
        if !self.bindings.is_empty() {
            backend.update_descriptor_set(set, &self.writes());
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::descriptor::DescriptorType;
    use crate::types::ShaderStages;

    fn writes() -> DescriptorWrites {
        DescriptorWrites::new(vec![
            DescriptorBinding::new(0, "camera", DescriptorType::UniformBuffer, ShaderStages::VERTEX),
            DescriptorBinding::new(
                2,
                "albedo",
                DescriptorType::CombinedImageSampler,
                ShaderStages::FRAGMENT,
            ),
        ])
    }

    #[test]
    fn test_not_ready_until_all_bound() {
        let mut writes = writes();
        assert!(!writes.ready());
        writes
            .bind_buffer(0, BufferHandle::Dummy(1), 0, 64)
            .unwrap();
        assert!(!writes.ready());
        writes
            .bind_image(
                2,
                ImageViewHandle::Dummy(2),
                Some(SamplerHandle::Dummy(3)),
                TextureLayout::ShaderReadOnly,
            )
            .unwrap();
        assert!(writes.ready());
        assert_eq!(writes.writes().len(), 2);
    }

    #[test]
    fn test_bind_by_name() {
        let mut writes = writes();
        writes
            .bind_image_by_name("albedo", ImageViewHandle::Dummy(5), None, TextureLayout::ShaderReadOnly)
            .unwrap();
        let bound = writes.writes();
        assert_eq!(bound.len(), 1);
        assert_eq!(bound[0].binding, 2);
        assert!(writes.bind_buffer_by_name("missing", BufferHandle::Dummy(1), 0, 4).is_err());
    }

    #[test]
    fn test_unknown_slot_rejected() {
        let mut writes = writes();
        assert!(writes.bind_buffer(1, BufferHandle::Dummy(1), 0, 4).is_err());
    }

    #[test]
    fn test_apply_skips_when_unbound() {
        let backend = DummyBackend::new();
        let mut writes = writes();
        assert!(!writes.apply(&backend, DescriptorSetHandle::Dummy(99)));
        writes.bind_buffer(0, BufferHandle::Dummy(1), 0, 64).unwrap();
        writes.unbind(0);
        assert!(!writes.ready());
    }
}
