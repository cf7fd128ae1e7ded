//! Render targets: color and depth attachments with their render pass.
//!
//! A [`RenderTarget`] owns up to N color attachments and at most one depth
//! attachment, the render pass describing how they are written and the
//! framebuffer binding them. After the pass, color attachments are left in
//! `ShaderReadOnly` so the first one can be sampled through
//! [`RenderTarget::sampled_image`].
//!
//! # Example
//!
//! ```ignore
//! let mut target = device.create_render_target(
//!     &RenderTargetDescriptor::color(Extent2d::new(800, 600), TextureFormat::Rgba8Unorm)
//!         .with_depth(TextureFormat::Depth32Float),
//! )?;
//! context.begin(&target, &[ClearValue::color(0.0, 0.0, 0.0, 1.0)])?;
//! // draw...
//! context.end()?;
//!
//! target.resize(Extent2d::new(1920, 1080))?;
//! ```

use std::sync::Arc;

use crate::backend::{
    FramebufferHandle, ImageHandle, ImageViewHandle, RenderPassHandle, SamplerHandle,
};
use crate::command::RenderPassBegin;
use crate::device::{DeferredResource, GraphicsDevice};
use crate::error::{GraphicsError, GraphicsResult};
use crate::pipeline::PassInfo;
use crate::types::{
    ClearValue, Extent2d, SamplerDescriptor, TextureDescriptor, TextureFormat, TextureLayout,
    TextureUsage,
};

/// What happens to attachment contents when a pass begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadOp {
    /// Clear to the pass's clear values.
    #[default]
    Clear,
    /// Keep the previous contents.
    Load,
    /// Contents are undefined.
    DontCare,
}

/// Attachment formats and layouts a render pass is created from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderPassLayout {
    /// Color attachment formats, in attachment order.
    pub color_formats: Vec<TextureFormat>,
    /// Depth attachment format, if any.
    pub depth_format: Option<TextureFormat>,
    /// Layout color attachments are left in after the pass.
    pub final_color_layout: TextureLayout,
    /// Load operation for every attachment.
    pub load_op: LoadOp,
}

impl RenderPassLayout {
    /// Layout color attachments are expected in when the pass begins.
    pub fn initial_color_layout(&self) -> TextureLayout {
        match self.load_op {
            LoadOp::Load => self.final_color_layout,
            LoadOp::Clear | LoadOp::DontCare => TextureLayout::Undefined,
        }
    }

    /// Total attachment count, depth included.
    pub fn attachment_count(&self) -> usize {
        self.color_formats.len() + usize::from(self.depth_format.is_some())
    }
}

/// Description of a render target.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderTargetDescriptor {
    pub label: Option<String>,
    pub extent: Extent2d,
    pub color_formats: Vec<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
    pub load_op: LoadOp,
    /// Sampler used by [`RenderTarget::sampled_image`].
    pub sampler: SamplerDescriptor,
}

impl RenderTargetDescriptor {
    /// One color attachment of `format`.
    pub fn color(extent: Extent2d, format: TextureFormat) -> Self {
        Self {
            label: None,
            extent,
            color_formats: vec![format],
            depth_format: None,
            load_op: LoadOp::Clear,
            sampler: SamplerDescriptor::linear(),
        }
    }

    /// Depth-only target.
    pub fn depth_only(extent: Extent2d, format: TextureFormat) -> Self {
        Self {
            color_formats: Vec::new(),
            depth_format: Some(format),
            ..Self::color(extent, format)
        }
    }

    /// Add another color attachment.
    pub fn with_color(mut self, format: TextureFormat) -> Self {
        self.color_formats.push(format);
        self
    }

    /// Add a depth attachment.
    pub fn with_depth(mut self, format: TextureFormat) -> Self {
        self.depth_format = Some(format);
        self
    }

    /// Set the load operation.
    pub fn with_load_op(mut self, load_op: LoadOp) -> Self {
        self.load_op = load_op;
        self
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    fn pass_layout(&self) -> RenderPassLayout {
        RenderPassLayout {
            color_formats: self.color_formats.clone(),
            depth_format: self.depth_format,
            final_color_layout: TextureLayout::ShaderReadOnly,
            load_op: self.load_op,
        }
    }

    fn validate(&self) -> GraphicsResult<()> {
        if self.extent.is_empty() {
            return Err(GraphicsError::InvalidParameter(format!(
                "render target extent {}x{} is empty",
                self.extent.width, self.extent.height
            )));
        }
        if self.color_formats.is_empty() && self.depth_format.is_none() {
            return Err(GraphicsError::InvalidParameter(
                "render target has no attachments".to_string(),
            ));
        }
        if let Some(format) = self.color_formats.iter().find(|f| f.is_depth_stencil()) {
            return Err(GraphicsError::InvalidParameter(format!(
                "{:?} cannot be a color attachment",
                format
            )));
        }
        if let Some(format) = self.depth_format.filter(|f| !f.is_depth_stencil()) {
            return Err(GraphicsError::InvalidParameter(format!(
                "{:?} cannot be a depth attachment",
                format
            )));
        }
        Ok(())
    }
}

/// One attachment image and its view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachment {
    pub image: ImageHandle,
    pub view: ImageViewHandle,
    pub format: TextureFormat,
}

/// Texture-style access to a render target's first color attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampledImage {
    pub view: ImageViewHandle,
    pub sampler: SamplerHandle,
    pub layout: TextureLayout,
    pub extent: Extent2d,
}

struct Parts {
    colors: Vec<Attachment>,
    depth: Option<Attachment>,
    render_pass: RenderPassHandle,
    framebuffer: FramebufferHandle,
}

impl Parts {
    fn resources(&self) -> Vec<DeferredResource> {
        let mut resources = vec![self.framebuffer.into(), self.render_pass.into()];
        for attachment in self.colors.iter().chain(&self.depth) {
            resources.push(attachment.view.into());
            resources.push(attachment.image.into());
        }
        resources
    }
}

/// Color and depth attachments with their render pass and framebuffer.
pub struct RenderTarget {
    device: Arc<GraphicsDevice>,
    descriptor: RenderTargetDescriptor,
    parts: Parts,
    sampler: SamplerHandle,
    sampled: Option<SampledImage>,
}

impl RenderTarget {
    /// Create every attachment, the render pass and the framebuffer.
    pub fn new(device: &Arc<GraphicsDevice>, descriptor: &RenderTargetDescriptor) -> GraphicsResult<Self> {
        descriptor.validate()?;
        let sampler = device.checked(
            "create_sampler",
            device.backend().create_sampler(&descriptor.sampler),
        )?;
        let parts = match Self::build(device, descriptor) {
            Ok(parts) => parts,
            Err(e) => {
                device.backend().destroy_sampler(sampler);
                return Err(e);
            }
        };
        let mut target = Self {
            device: device.clone(),
            descriptor: descriptor.clone(),
            parts,
            sampler,
            sampled: None,
        };
        target.sampled = target.derive_sampled_image();
        log::debug!(
            "Created render target {:?}: {}x{}, {} color, depth {:?}",
            descriptor.label,
            descriptor.extent.width,
            descriptor.extent.height,
            descriptor.color_formats.len(),
            descriptor.depth_format
        );
        Ok(target)
    }

    fn build(device: &GraphicsDevice, descriptor: &RenderTargetDescriptor) -> GraphicsResult<Parts> {
        let mut created: Vec<DeferredResource> = Vec::new();
        let result = Self::build_into(device, descriptor, &mut created);
        if result.is_err() {
            for resource in created.into_iter().rev() {
                resource.destroy(device.backend().as_ref());
            }
        }
        result
    }

    fn build_into(
        device: &GraphicsDevice,
        descriptor: &RenderTargetDescriptor,
        created: &mut Vec<DeferredResource>,
    ) -> GraphicsResult<Parts> {
        let mut attachment = |format: TextureFormat, usage: TextureUsage| -> GraphicsResult<Attachment> {
            let mut texture =
                TextureDescriptor::new_2d(descriptor.extent.width, descriptor.extent.height, format, usage);
            texture.label = descriptor.label.clone();
            let image = device.checked("create_image", device.backend().create_image(&texture))?;
            created.push(image.into());
            let view = device.checked(
                "create_image_view",
                device.backend().create_image_view(image, format, 1),
            )?;
            created.push(view.into());
            Ok(Attachment {
                image,
                view,
                format,
            })
        };

        let color_usage =
            TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_SRC;
        let colors = descriptor
            .color_formats
            .iter()
            .map(|format| attachment(*format, color_usage))
            .collect::<GraphicsResult<Vec<_>>>()?;
        let depth = descriptor
            .depth_format
            .map(|format| attachment(format, TextureUsage::RENDER_ATTACHMENT))
            .transpose()?;

        let render_pass = device.checked(
            "create_render_pass",
            device.backend().create_render_pass(&descriptor.pass_layout()),
        )?;
        created.push(render_pass.into());

        let views: Vec<ImageViewHandle> = colors.iter().chain(&depth).map(|a| a.view).collect();
        let framebuffer = device.checked(
            "create_framebuffer",
            device
                .backend()
                .create_framebuffer(render_pass, &views, descriptor.extent),
        )?;
        created.push(framebuffer.into());

        Ok(Parts {
            colors,
            depth,
            render_pass,
            framebuffer,
        })
    }

    fn derive_sampled_image(&self) -> Option<SampledImage> {
        self.parts.colors.first().map(|color| SampledImage {
            view: color.view,
            sampler: self.sampler,
            layout: TextureLayout::ShaderReadOnly,
            extent: self.descriptor.extent,
        })
    }

    /// Rebuild everything at `extent`.
    ///
    /// Old attachments, views, render pass and framebuffer go through deferred
    /// destruction, so frames still in flight keep valid references. Returns
    /// `false` if the extent did not change.
    pub fn resize(&mut self, extent: Extent2d) -> GraphicsResult<bool> {
        if extent == self.descriptor.extent {
            return Ok(false);
        }
        let mut descriptor = self.descriptor.clone();
        descriptor.extent = extent;
        descriptor.validate()?;

        let parts = Self::build(&self.device, &descriptor)?;
        let old = std::mem::replace(&mut self.parts, parts);
        for resource in old.resources() {
            self.device.destroy_async(resource);
        }
        log::debug!(
            "Resized render target {:?}: {}x{} -> {}x{}",
            self.descriptor.label,
            self.descriptor.extent.width,
            self.descriptor.extent.height,
            extent.width,
            extent.height
        );
        self.descriptor = descriptor;
        self.sampled = self.derive_sampled_image();
        Ok(true)
    }

    /// Current extent.
    pub fn extent(&self) -> Extent2d {
        self.descriptor.extent
    }

    /// The descriptor the target was last built from.
    pub fn descriptor(&self) -> &RenderTargetDescriptor {
        &self.descriptor
    }

    /// Color attachments.
    pub fn color_attachments(&self) -> &[Attachment] {
        &self.parts.colors
    }

    /// Depth attachment.
    pub fn depth_attachment(&self) -> Option<&Attachment> {
        self.parts.depth.as_ref()
    }

    /// Render pass.
    pub fn render_pass(&self) -> RenderPassHandle {
        self.parts.render_pass
    }

    /// Framebuffer.
    pub fn framebuffer(&self) -> FramebufferHandle {
        self.parts.framebuffer
    }

    /// Pass shape for pipeline creation.
    pub fn pass_info(&self) -> PassInfo {
        PassInfo {
            render_pass: self.parts.render_pass,
            color_attachment_count: self.parts.colors.len() as u32,
            has_depth: self.parts.depth.is_some(),
        }
    }

    /// Sampled-image descriptor of the first color attachment.
    pub fn sampled_image(&self) -> Option<SampledImage> {
        self.sampled
    }

    /// Begin info with one clear value per attachment.
    ///
    /// Missing entries default to opaque black and depth 1.0.
    pub fn begin_info(&self, clears: &[ClearValue]) -> RenderPassBegin {
        let defaults = self
            .parts
            .colors
            .iter()
            .map(|_| ClearValue::color(0.0, 0.0, 0.0, 1.0))
            .chain(self.parts.depth.iter().map(|_| ClearValue::depth(1.0)));
        let clear_values = defaults
            .enumerate()
            .map(|(i, default)| clears.get(i).copied().unwrap_or(default))
            .collect();
        RenderPassBegin {
            render_pass: self.parts.render_pass,
            framebuffer: self.parts.framebuffer,
            extent: self.descriptor.extent,
            clear_values,
        }
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        for resource in self.parts.resources() {
            self.device.destroy_async(resource);
        }
        self.device.destroy_async(self.sampler);
    }
}

impl std::fmt::Debug for RenderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTarget")
            .field("label", &self.descriptor.label)
            .field("extent", &self.descriptor.extent)
            .field("colors", &self.parts.colors.len())
            .field("depth", &self.parts.depth.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::config::DeviceParameters;
    use crate::error::CheckPolicy;

    fn device() -> (Arc<DummyBackend>, Arc<GraphicsDevice>) {
        let backend = Arc::new(DummyBackend::new());
        let device = GraphicsDevice::new(
            backend.clone(),
            DeviceParameters::new().with_check_policy(CheckPolicy::Propagate),
        )
        .unwrap();
        (backend, device)
    }

    #[test]
    fn test_descriptor_validation() {
        let extent = Extent2d::new(64, 64);
        assert!(RenderTargetDescriptor::color(Extent2d::new(0, 64), TextureFormat::Rgba8Unorm)
            .validate()
            .is_err());
        assert!(RenderTargetDescriptor::color(extent, TextureFormat::Depth32Float)
            .validate()
            .is_err());
        assert!(RenderTargetDescriptor::color(extent, TextureFormat::Rgba8Unorm)
            .with_depth(TextureFormat::Rgba8Unorm)
            .validate()
            .is_err());
        assert!(RenderTargetDescriptor::depth_only(extent, TextureFormat::Depth32Float)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_begin_info_fills_clear_values() {
        let (_backend, device) = device();
        let target = device
            .create_render_target(
                &RenderTargetDescriptor::color(Extent2d::new(32, 32), TextureFormat::Rgba8Unorm)
                    .with_color(TextureFormat::Rgba16Float)
                    .with_depth(TextureFormat::Depth32Float),
            )
            .unwrap();
        let red = ClearValue::color(1.0, 0.0, 0.0, 1.0);
        let begin = target.begin_info(&[red]);
        assert_eq!(
            begin.clear_values,
            vec![
                red,
                ClearValue::color(0.0, 0.0, 0.0, 1.0),
                ClearValue::depth(1.0)
            ]
        );
        assert_eq!(target.pass_info().color_attachment_count, 2);
        assert!(target.pass_info().has_depth);
    }

    #[test]
    fn test_resize_rebuilds_everything() {
        let (backend, device) = device();
        let mut target = device
            .create_render_target(
                &RenderTargetDescriptor::color(Extent2d::new(800, 600), TextureFormat::Rgba8Unorm)
                    .with_depth(TextureFormat::Depth32Float),
            )
            .unwrap();
        let old_color = target.color_attachments()[0];
        let old_depth = *target.depth_attachment().unwrap();
        let old_pass = target.render_pass();
        let old_framebuffer = target.framebuffer();
        let old_sampled = target.sampled_image().unwrap();

        assert!(target.resize(Extent2d::new(1920, 1080)).unwrap());
        assert!(!target.resize(Extent2d::new(1920, 1080)).unwrap());

        assert_eq!(target.extent(), Extent2d::new(1920, 1080));
        assert_ne!(target.color_attachments()[0], old_color);
        assert_ne!(*target.depth_attachment().unwrap(), old_depth);
        assert_ne!(target.render_pass(), old_pass);
        assert_ne!(target.framebuffer(), old_framebuffer);
        let sampled = target.sampled_image().unwrap();
        assert_eq!(sampled.extent, Extent2d::new(1920, 1080));
        assert_eq!(sampled.view, target.color_attachments()[0].view);
        assert_ne!(sampled.view, old_sampled.view);
        assert_eq!(sampled.sampler, old_sampled.sampler);
        assert_eq!(
            backend.image_extent(target.color_attachments()[0].image),
            Some(Extent2d::new(1920, 1080))
        );

        let frames = device.parameters().frames_in_flight;
        for _ in 1..frames {
            device.advance_frame();
            assert!(backend.is_alive(old_color.image.raw()));
            assert!(backend.is_alive(old_framebuffer.raw()));
        }
        device.advance_frame();
        for raw in [
            old_color.image.raw(),
            old_color.view.raw(),
            old_depth.image.raw(),
            old_pass.raw(),
            old_framebuffer.raw(),
        ] {
            assert!(!backend.is_alive(raw));
        }
    }
}
