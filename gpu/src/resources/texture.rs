//! GPU texture resource.

use std::sync::Arc;

use crate::backend::{ImageHandle, ImageViewHandle};
use crate::device::{GraphicsDevice, QueueRole};
use crate::error::{GraphicsError, GraphicsResult};
use crate::pipeline::ImageBarrier;
use crate::types::{Extent3d, TextureDescriptor, TextureFormat, TextureLayout, TextureUsage};

/// A GPU texture with a view covering every layer.
///
/// Textures are created by [`GraphicsDevice::create_texture`]. Initial data is
/// uploaded through a staging buffer with the transitions
/// `Undefined -> TransferDst -> ShaderReadOnly`; textures created without data
/// but meant for shader access are moved to `ShaderReadOnly` right away, so
/// every texture a pipeline can bind starts in a known layout.
///
/// # Example
///
/// ```ignore
/// let texture = device.create_texture(
///     &TextureDescriptor::new_2d(256, 256, TextureFormat::Rgba8UnormSrgb, TextureUsage::TEXTURE_BINDING),
///     Some(&pixels),
/// )?;
/// pipeline.bind_texture(1, &texture, Some(&sampler))?;
/// ```
pub struct Texture {
    device: Arc<GraphicsDevice>,
    image: ImageHandle,
    view: ImageViewHandle,
    descriptor: TextureDescriptor,
    layout: TextureLayout,
}

impl Texture {
    pub(crate) fn new(
        device: &Arc<GraphicsDevice>,
        descriptor: &TextureDescriptor,
        data: Option<&[u8]>,
    ) -> GraphicsResult<Self> {
        if descriptor.size.width == 0 || descriptor.size.height == 0 {
            return Err(GraphicsError::InvalidParameter(
                "texture dimensions must be non-zero".to_string(),
            ));
        }
        if let Some(data) = data
            && data.len() as u64 != descriptor.base_level_size()
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture data is {} bytes, expected {}",
                data.len(),
                descriptor.base_level_size()
            )));
        }

        let mut descriptor = descriptor.clone();
        if data.is_some() {
            descriptor.usage |= TextureUsage::COPY_DST;
        }

        let backend = device.backend();
        let image = device.checked("create_image", backend.create_image(&descriptor))?;
        let view = match device.checked(
            "create_image_view",
            backend.create_image_view(image, descriptor.format, descriptor.array_layers),
        ) {
            Ok(view) => view,
            Err(e) => {
                backend.destroy_image(image);
                return Err(e);
            }
        };
        let mut texture = Self {
            device: device.clone(),
            image,
            view,
            descriptor,
            layout: TextureLayout::Undefined,
        };

        match data {
            Some(data) => texture.upload(data)?,
            None if texture.is_shader_visible() => {
                let barrier = ImageBarrier::transition(
                    image,
                    texture.descriptor.format,
                    TextureLayout::Undefined,
                    TextureLayout::ShaderReadOnly,
                );
                device.submit_once(QueueRole::Graphics, |cmd| {
                    cmd.pipeline_barrier(&[barrier]);
                    Ok(())
                })?;
                texture.layout = TextureLayout::ShaderReadOnly;
            }
            None => {}
        }

        log::trace!(
            "Created texture {:?} ({}x{}, {:?}, {:?})",
            texture.descriptor.label,
            texture.descriptor.size.width,
            texture.descriptor.size.height,
            texture.descriptor.format,
            texture.layout
        );
        Ok(texture)
    }

    /// Decode an image file into an `Rgba8UnormSrgb` texture.
    #[cfg(feature = "image-loading")]
    pub(crate) fn from_path(device: &Arc<GraphicsDevice>, path: &std::path::Path) -> GraphicsResult<Self> {
        let decoded = image::open(path)
            .map_err(|e| {
                GraphicsError::ResourceCreationFailed(format!(
                    "Failed to load texture {}: {}",
                    path.display(),
                    e
                ))
            })?
            .to_rgba8();
        let (width, height) = decoded.dimensions();
        let descriptor = TextureDescriptor::new_2d(
            width,
            height,
            TextureFormat::Rgba8UnormSrgb,
            TextureUsage::TEXTURE_BINDING,
        )
        .with_label(path.display().to_string());
        log::debug!("Loaded {} ({}x{})", path.display(), width, height);
        Self::new(device, &descriptor, Some(decoded.as_raw()))
    }

    fn is_shader_visible(&self) -> bool {
        !self.descriptor.format.is_depth_stencil()
            && self
                .descriptor
                .usage
                .intersects(TextureUsage::TEXTURE_BINDING | TextureUsage::STORAGE_BINDING)
    }

    fn upload(&mut self, data: &[u8]) -> GraphicsResult<()> {
        let to_transfer = ImageBarrier::transition(
            self.image,
            self.descriptor.format,
            self.layout,
            TextureLayout::TransferDst,
        );
        let to_shader = ImageBarrier::transition(
            self.image,
            self.descriptor.format,
            TextureLayout::TransferDst,
            TextureLayout::ShaderReadOnly,
        );
        let (image, format, extent, layers) = (
            self.image,
            self.descriptor.format,
            self.descriptor.size,
            self.descriptor.array_layers,
        );
        self.device
            .upload_via_staging(QueueRole::Graphics, data, |cmd, staging| {
                cmd.pipeline_barrier(&[to_transfer]);
                cmd.copy_buffer_to_image(staging, image, format, extent, layers);
                cmd.pipeline_barrier(&[to_shader]);
            })?;
        self.layout = TextureLayout::ShaderReadOnly;
        Ok(())
    }

    /// Native image.
    pub fn image(&self) -> ImageHandle {
        self.image
    }

    /// View over every layer.
    pub fn view(&self) -> ImageViewHandle {
        self.view
    }

    /// Layout the texture is left in between passes.
    pub fn layout(&self) -> TextureLayout {
        self.layout
    }

    /// Get the parent device.
    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    /// Get the texture descriptor.
    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    /// Get the texture format.
    pub fn format(&self) -> TextureFormat {
        self.descriptor.format
    }

    /// Get the texture size.
    pub fn size(&self) -> Extent3d {
        self.descriptor.size
    }

    /// Get the texture label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.device.destroy_async(self.view);
        self.device.destroy_async(self.image);
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("image", &self.image)
            .field("size", &self.descriptor.size)
            .field("format", &self.descriptor.format)
            .field("layout", &self.layout)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Texture: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, DummyCommand};
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
    fn test_upload_transitions_layouts() {
        let (backend, device) = device();
        let descriptor = TextureDescriptor::new_2d(
            2,
            2,
            TextureFormat::Rgba8Unorm,
            TextureUsage::TEXTURE_BINDING,
        );
        let texture = device.create_texture(&descriptor, Some(&[0u8; 16])).unwrap();
        assert_eq!(texture.layout(), TextureLayout::ShaderReadOnly);
        assert!(texture.descriptor().usage.contains(TextureUsage::COPY_DST));

        assert_eq!(
            backend.image_transitions(texture.image()),
            vec![
                (TextureLayout::Undefined, TextureLayout::TransferDst),
                (TextureLayout::TransferDst, TextureLayout::ShaderReadOnly),
            ]
        );
        assert!(backend.executed_commands().iter().any(|cmd| matches!(
            cmd,
            DummyCommand::CopyBufferToImage { image, .. } if *image == texture.image()
        )));
    }

    #[test]
    fn test_sampled_texture_without_data_starts_readable() {
        let (_backend, device) = device();
        let texture = device
            .create_texture(
                &TextureDescriptor::new_2d(8, 8, TextureFormat::Rgba8Unorm, TextureUsage::STORAGE_BINDING),
                None,
            )
            .unwrap();
        assert_eq!(texture.layout(), TextureLayout::ShaderReadOnly);

        let attachment = device
            .create_texture(
                &TextureDescriptor::new_2d(8, 8, TextureFormat::Depth32Float, TextureUsage::RENDER_ATTACHMENT),
                None,
            )
            .unwrap();
        assert_eq!(attachment.layout(), TextureLayout::Undefined);
    }

    #[test]
    fn test_data_size_mismatch_rejected() {
        let (_backend, device) = device();
        let descriptor = TextureDescriptor::new_2d(
            4,
            4,
            TextureFormat::Rgba8Unorm,
            TextureUsage::TEXTURE_BINDING,
        );
        assert!(matches!(
            device.create_texture(&descriptor, Some(&[0u8; 3])),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }
}
