//! Texture sampler resource.

use std::sync::Arc;

use crate::backend::SamplerHandle;
use crate::device::GraphicsDevice;
use crate::error::GraphicsResult;
use crate::types::SamplerDescriptor;

/// A texture sampler.
///
/// Samplers are created by [`GraphicsDevice::create_sampler`].
pub struct Sampler {
    device: Arc<GraphicsDevice>,
    handle: SamplerHandle,
    descriptor: SamplerDescriptor,
}

impl Sampler {
    pub(crate) fn new(device: &Arc<GraphicsDevice>, descriptor: &SamplerDescriptor) -> GraphicsResult<Self> {
        let handle = device.checked(
            "create_sampler",
            device.backend().create_sampler(descriptor),
        )?;
        Ok(Self {
            device: device.clone(),
            handle,
            descriptor: descriptor.clone(),
        })
    }

    /// Native handle.
    pub fn handle(&self) -> SamplerHandle {
        self.handle
    }

    /// Get the sampler descriptor.
    pub fn descriptor(&self) -> &SamplerDescriptor {
        &self.descriptor
    }

    /// Get the sampler label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.device.destroy_async(self.handle);
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("handle", &self.handle)
            .field("mag_filter", &self.descriptor.mag_filter)
            .field("min_filter", &self.descriptor.min_filter)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Sampler: Send, Sync);
