//! Presentation surfaces and swapchains.
//!
//! # Overview
//!
//! - [`SurfaceCapabilities`], [`SurfaceFormat`], [`PresentMode`] - what a surface advertises
//! - [`negotiate`] - clamps a [`SwapchainConfig`] against those capabilities
//! - [`Swapchain`] - the negotiated ring of presentable images and their views
//! - [`PresentStatus`] - acquire/present outcome; `OutOfDate` asks for [`Swapchain::recreate`]
//!
//! # Example
//!
//! ```ignore
//! let surface = instance.create_surface(&window)?;
//! let mut swapchain = Swapchain::new(&device, surface.handle(), SwapchainConfig::new())?;
//!
//! let (index, status) = swapchain.acquire_next_image(image_acquired, u64::MAX)?;
//! if status.needs_recreate() {
//!     swapchain.recreate(window_extent)?;
//! }
//! ```

mod negotiate;

pub use negotiate::{
    SurfaceSupport, choose_composite_alpha, choose_extent, choose_image_count,
    choose_image_usage, choose_present_mode, choose_surface_format, choose_transform, negotiate,
};

use std::sync::Arc;

use bitflags::bitflags;

use crate::backend::{ImageHandle, ImageViewHandle, SemaphoreHandle, SurfaceHandle, SwapchainHandle};
use crate::config::SwapchainConfig;
use crate::device::{GraphicsDevice, QueueRole};
use crate::error::GraphicsResult;
use crate::types::{Extent2d, TextureFormat, TextureUsage};

/// Presentation mode for the swapchain.
///
/// Controls how frames are synchronized with the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PresentMode {
    /// No synchronization. May cause tearing but has lowest latency.
    Immediate,
    /// Triple buffering. Low latency without tearing.
    Mailbox,
    /// VSync enabled. No tearing, but may have higher latency.
    #[default]
    Fifo,
    /// VSync with relaxed timing. May tear if a frame is late.
    FifoRelaxed,
}

/// Outcome of acquiring or presenting a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PresentStatus {
    /// The swapchain matches the surface.
    #[default]
    Optimal,
    /// Presentation works but the swapchain no longer matches the surface exactly.
    Suboptimal,
    /// The swapchain can no longer present and must be recreated.
    OutOfDate,
}

impl PresentStatus {
    /// Returns true if the swapchain should be recreated.
    pub fn needs_recreate(self) -> bool {
        self != Self::Optimal
    }
}

/// Color space of a surface format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorSpace {
    /// Non-linear sRGB.
    #[default]
    SrgbNonlinear,
    /// Non-linear Display P3.
    DisplayP3Nonlinear,
    /// Linear extended sRGB.
    ExtendedSrgbLinear,
}

/// A format/color-space pair a surface can present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SurfaceFormat {
    /// Pixel format.
    pub format: TextureFormat,
    /// Color space.
    pub color_space: ColorSpace,
}

impl SurfaceFormat {
    /// Create a surface format.
    pub const fn new(format: TextureFormat, color_space: ColorSpace) -> Self {
        Self {
            format,
            color_space,
        }
    }
}

/// Transform applied to images before presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SurfaceTransform {
    #[default]
    Identity,
    Rotate90,
    Rotate180,
    Rotate270,
    HorizontalMirror,
    HorizontalMirrorRotate90,
    HorizontalMirrorRotate180,
    HorizontalMirrorRotate270,
    Inherit,
}

impl SurfaceTransform {
    /// The capability bit for this transform.
    pub fn flag(self) -> SurfaceTransforms {
        match self {
            Self::Identity => SurfaceTransforms::IDENTITY,
            Self::Rotate90 => SurfaceTransforms::ROTATE_90,
            Self::Rotate180 => SurfaceTransforms::ROTATE_180,
            Self::Rotate270 => SurfaceTransforms::ROTATE_270,
            Self::HorizontalMirror => SurfaceTransforms::HORIZONTAL_MIRROR,
            Self::HorizontalMirrorRotate90 => SurfaceTransforms::HORIZONTAL_MIRROR_ROTATE_90,
            Self::HorizontalMirrorRotate180 => SurfaceTransforms::HORIZONTAL_MIRROR_ROTATE_180,
            Self::HorizontalMirrorRotate270 => SurfaceTransforms::HORIZONTAL_MIRROR_ROTATE_270,
            Self::Inherit => SurfaceTransforms::INHERIT,
        }
    }

    /// Returns true for 90° and 270° rotations, which swap width and height.
    pub fn is_rotated_quarter(self) -> bool {
        matches!(
            self,
            Self::Rotate90
                | Self::Rotate270
                | Self::HorizontalMirrorRotate90
                | Self::HorizontalMirrorRotate270
        )
    }
}

bitflags! {
    /// Set of transforms a surface supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SurfaceTransforms: u32 {
        const IDENTITY = 1 << 0;
        const ROTATE_90 = 1 << 1;
        const ROTATE_180 = 1 << 2;
        const ROTATE_270 = 1 << 3;
        const HORIZONTAL_MIRROR = 1 << 4;
        const HORIZONTAL_MIRROR_ROTATE_90 = 1 << 5;
        const HORIZONTAL_MIRROR_ROTATE_180 = 1 << 6;
        const HORIZONTAL_MIRROR_ROTATE_270 = 1 << 7;
        const INHERIT = 1 << 8;
    }
}

/// How presented alpha is composited with other windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompositeAlpha {
    #[default]
    Opaque,
    PreMultiplied,
    PostMultiplied,
    Inherit,
}

impl CompositeAlpha {
    /// Fallback order when the requested mode is unsupported.
    pub const PRIORITY: [Self; 4] = [
        Self::Opaque,
        Self::PreMultiplied,
        Self::PostMultiplied,
        Self::Inherit,
    ];

    /// The capability bit for this mode.
    pub fn flag(self) -> CompositeAlphaModes {
        match self {
            Self::Opaque => CompositeAlphaModes::OPAQUE,
            Self::PreMultiplied => CompositeAlphaModes::PRE_MULTIPLIED,
            Self::PostMultiplied => CompositeAlphaModes::POST_MULTIPLIED,
            Self::Inherit => CompositeAlphaModes::INHERIT,
        }
    }
}

bitflags! {
    /// Set of composite alpha modes a surface supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CompositeAlphaModes: u32 {
        const OPAQUE = 1 << 0;
        const PRE_MULTIPLIED = 1 << 1;
        const POST_MULTIPLIED = 1 << 2;
        const INHERIT = 1 << 3;
    }
}

/// Capabilities a surface reports for swapchain creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceCapabilities {
    /// Minimum number of images.
    pub min_image_count: u32,
    /// Maximum number of images; 0 means unbounded.
    pub max_image_count: u32,
    /// Current surface size; `u32::MAX` in both dimensions if the swapchain decides.
    pub current_extent: Extent2d,
    /// Smallest supported extent.
    pub min_extent: Extent2d,
    /// Largest supported extent.
    pub max_extent: Extent2d,
    /// Maximum image array layers.
    pub max_array_layers: u32,
    /// Supported pre-transforms.
    pub supported_transforms: SurfaceTransforms,
    /// Transform currently applied by the compositor.
    pub current_transform: SurfaceTransform,
    /// Supported composite alpha modes.
    pub supported_composite_alpha: CompositeAlphaModes,
    /// Supported image usage.
    pub supported_usage: TextureUsage,
}

/// The result of negotiation: what the swapchain is actually created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapchainProperties {
    pub image_count: u32,
    pub extent: Extent2d,
    pub surface_format: SurfaceFormat,
    pub array_layers: u32,
    pub image_usage: TextureUsage,
    pub pre_transform: SurfaceTransform,
    pub composite_alpha: CompositeAlpha,
    pub present_mode: PresentMode,
    /// Swapchain being replaced, passed to the driver as a recreation hint.
    pub old_swapchain: Option<SwapchainHandle>,
}

/// A negotiated swapchain with one view per image.
///
/// The surface is borrowed by handle; whoever created it keeps ownership.
pub struct Swapchain {
    device: Arc<GraphicsDevice>,
    surface: SurfaceHandle,
    config: SwapchainConfig,
    handle: SwapchainHandle,
    properties: SwapchainProperties,
    images: Vec<ImageHandle>,
    views: Vec<ImageViewHandle>,
}

impl Swapchain {
    /// Negotiate `config` against `surface` and create the swapchain.
    pub fn new(
        device: &Arc<GraphicsDevice>,
        surface: SurfaceHandle,
        config: SwapchainConfig,
    ) -> GraphicsResult<Self> {
        let (handle, properties, images, views) = Self::build(device, surface, &config, None)?;
        log::info!(
            "Created swapchain: {} images, {}x{}, {:?}, {:?}",
            properties.image_count,
            properties.extent.width,
            properties.extent.height,
            properties.surface_format,
            properties.present_mode
        );
        Ok(Self {
            device: device.clone(),
            surface,
            config,
            handle,
            properties,
            images,
            views,
        })
    }

    fn build(
        device: &Arc<GraphicsDevice>,
        surface: SurfaceHandle,
        config: &SwapchainConfig,
        old: Option<SwapchainHandle>,
    ) -> GraphicsResult<(
        SwapchainHandle,
        SwapchainProperties,
        Vec<ImageHandle>,
        Vec<ImageViewHandle>,
    )> {
        let backend = device.backend();
        let support = SurfaceSupport {
            capabilities: backend.surface_capabilities(surface)?,
            formats: backend.surface_formats(surface)?,
            present_modes: backend.surface_present_modes(surface)?,
        };
        let mut properties =
            negotiate(config, &support, |format| backend.format_features(format.format))?;
        properties.old_swapchain = old;

        let handle = device.checked(
            "create_swapchain",
            backend.create_swapchain(surface, &properties, old),
        )?;
        let images = device.checked("swapchain_images", backend.swapchain_images(handle))?;
        let mut views = Vec::with_capacity(images.len());
        for image in &images {
            let view = backend.create_image_view(
                *image,
                properties.surface_format.format,
                properties.array_layers,
            );
            match device.checked("create_image_view", view) {
                Ok(view) => views.push(view),
                Err(e) => {
                    for view in views {
                        backend.destroy_image_view(view);
                    }
                    backend.destroy_swapchain(handle);
                    return Err(e);
                }
            }
        }
        properties.image_count = images.len() as u32;
        Ok((handle, properties, images, views))
    }

    /// Rebuild for a new extent, keeping the negotiated format.
    ///
    /// The old swapchain is passed as a hint and released through deferred
    /// destruction together with its views.
    pub fn recreate(&mut self, extent: Extent2d) -> GraphicsResult<()> {
        let mut config = self.config.clone();
        config.extent = extent;
        config.format = self.properties.surface_format;
        config.present_mode = self.properties.present_mode;
        config.image_count = self.properties.image_count;

        let (handle, properties, images, views) =
            Self::build(&self.device, self.surface, &config, Some(self.handle))?;

        let old_views = std::mem::replace(&mut self.views, views);
        for view in old_views {
            self.device.destroy_async(view);
        }
        let old = std::mem::replace(&mut self.handle, handle);
        self.device.destroy_async(old);
        self.images = images;
        self.properties = properties;

        log::info!(
            "Recreated swapchain: {}x{}, {:?}",
            properties.extent.width,
            properties.extent.height,
            properties.surface_format
        );
        Ok(())
    }

    /// Acquire the next image, signaling `signal` when it can be written.
    pub fn acquire_next_image(
        &self,
        signal: SemaphoreHandle,
        timeout_ns: u64,
    ) -> GraphicsResult<(u32, PresentStatus)> {
        crate::profile_scope!("swapchain_acquire");
        self.device
            .backend()
            .acquire_next_image(self.handle, signal, timeout_ns)
    }

    /// Present `image_index` on the graphics queue once `wait` has signaled.
    pub fn present(&self, image_index: u32, wait: &[SemaphoreHandle]) -> GraphicsResult<PresentStatus> {
        crate::profile_scope!("swapchain_present");
        let queue = self.device.queue(QueueRole::Graphics).handle;
        self.device
            .backend()
            .present(queue, self.handle, image_index, wait)
    }

    /// Native swapchain.
    pub fn handle(&self) -> SwapchainHandle {
        self.handle
    }

    /// Surface presented to.
    pub fn surface(&self) -> SurfaceHandle {
        self.surface
    }

    /// Negotiated properties.
    pub fn properties(&self) -> &SwapchainProperties {
        &self.properties
    }

    /// The request the swapchain was negotiated from.
    pub fn config(&self) -> &SwapchainConfig {
        &self.config
    }

    /// Presentable images.
    pub fn images(&self) -> &[ImageHandle] {
        &self.images
    }

    /// One view per image.
    pub fn views(&self) -> &[ImageViewHandle] {
        &self.views
    }

    /// Number of images.
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Image extent.
    pub fn extent(&self) -> Extent2d {
        self.properties.extent
    }

    /// Negotiated surface format.
    pub fn surface_format(&self) -> SurfaceFormat {
        self.properties.surface_format
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        for view in self.views.drain(..) {
            self.device.destroy_async(view);
        }
        self.device.destroy_async(self.handle);
    }
}

impl std::fmt::Debug for Swapchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swapchain")
            .field("handle", &self.handle)
            .field("properties", &self.properties)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, RenderBackend};
    use crate::config::DeviceParameters;
    use crate::error::CheckPolicy;
    use raw_window_handle::{
        RawDisplayHandle, RawWindowHandle, WebDisplayHandle, WebWindowHandle,
    };

    fn setup() -> (Arc<DummyBackend>, Arc<GraphicsDevice>, SurfaceHandle) {
        let backend = Arc::new(DummyBackend::new());
        let device = GraphicsDevice::new(
            backend.clone(),
            DeviceParameters::new().with_check_policy(CheckPolicy::Propagate),
        )
        .unwrap();
        let surface = backend
            .create_surface(
                RawDisplayHandle::Web(WebDisplayHandle::new()),
                RawWindowHandle::Web(WebWindowHandle::new(1)),
            )
            .unwrap();
        (backend, device, surface)
    }

    #[test]
    fn test_present_status_needs_recreate() {
        assert!(!PresentStatus::Optimal.needs_recreate());
        assert!(PresentStatus::Suboptimal.needs_recreate());
        assert!(PresentStatus::OutOfDate.needs_recreate());
    }

    #[test]
    fn test_create_swapchain_with_views() {
        let (_backend, device, surface) = setup();
        let swapchain = Swapchain::new(&device, surface, SwapchainConfig::new()).unwrap();
        assert_eq!(swapchain.image_count(), 3);
        assert_eq!(swapchain.views().len(), 3);
        assert_eq!(swapchain.properties().present_mode, PresentMode::Fifo);
    }

    #[test]
    fn test_out_of_date_recreate_keeps_format() {
        let (backend, device, surface) = setup();
        let mut swapchain = Swapchain::new(&device, surface, SwapchainConfig::new()).unwrap();
        let format = swapchain.surface_format();
        let old = swapchain.handle();

        backend.set_out_of_date(true);
        let semaphore = backend
            .create_semaphore(crate::sync::SemaphoreKind::Binary)
            .unwrap();
        let (_, status) = swapchain.acquire_next_image(semaphore, u64::MAX).unwrap();
        assert_eq!(status, PresentStatus::OutOfDate);

        swapchain.recreate(Extent2d::new(1920, 1080)).unwrap();
        assert_eq!(swapchain.surface_format(), format);
        assert_eq!(swapchain.properties().old_swapchain, Some(old));
        assert_eq!(swapchain.extent(), Extent2d::new(1920, 1080));
        assert!(backend.is_alive(old.raw()));

        let (_, status) = swapchain.acquire_next_image(semaphore, u64::MAX).unwrap();
        assert_eq!(status, PresentStatus::Optimal);
        backend.destroy_semaphore(semaphore);
    }
}
