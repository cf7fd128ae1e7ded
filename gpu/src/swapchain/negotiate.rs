//! Swapchain property negotiation.
//!
//! Each step clamps one requested value against what the surface advertises
//! and falls back to a priority list on mismatch, logging the substitution.
//! All functions are pure so they can be exercised without a surface.

use crate::config::SwapchainConfig;
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{Extent2d, FormatFeatures, TextureUsage};

use super::{
    CompositeAlpha, PresentMode, SurfaceCapabilities, SurfaceFormat, SurfaceTransform,
    SwapchainProperties,
};

/// Step 1: clamp the image count to the surface's range.
pub fn choose_image_count(requested: u32, caps: &SurfaceCapabilities) -> u32 {
    let max = if caps.max_image_count == 0 {
        u32::MAX
    } else {
        caps.max_image_count
    };
    let chosen = requested.clamp(caps.min_image_count, max.max(caps.min_image_count));
    if chosen != requested {
        log::warn!(
            "Swapchain image count {} not supported, using {}",
            requested,
            chosen
        );
    }
    chosen
}

/// Step 2: use the requested extent, or the surface's when a dimension is 0.
///
/// A usable request is clamped to the surface's min/max extent. When the
/// surface leaves its current extent undefined and the request is unusable,
/// the minimum extent is used.
pub fn choose_extent(requested: Extent2d, caps: &SurfaceCapabilities) -> Extent2d {
    if requested.width < 1 || requested.height < 1 {
        if caps.current_extent.width == u32::MAX {
            return caps.min_extent;
        }
        return caps.current_extent;
    }
    let chosen = Extent2d::new(
        requested
            .width
            .clamp(caps.min_extent.width, caps.max_extent.width.max(caps.min_extent.width)),
        requested
            .height
            .clamp(caps.min_extent.height, caps.max_extent.height.max(caps.min_extent.height)),
    );
    if chosen != requested {
        log::warn!(
            "Swapchain extent {}x{} outside surface limits, using {}x{}",
            requested.width,
            requested.height,
            chosen.width,
            chosen.height
        );
    }
    chosen
}

/// Step 3: exact match, else first available entry of `priority`, else the
/// first available format.
pub fn choose_surface_format(
    requested: SurfaceFormat,
    available: &[SurfaceFormat],
    priority: &[SurfaceFormat],
) -> GraphicsResult<SurfaceFormat> {
    if available.contains(&requested) {
        return Ok(requested);
    }
    if let Some(format) = priority.iter().find(|f| available.contains(f)) {
        log::warn!(
            "Surface format {:?} not supported, using {:?} from the priority list",
            requested,
            format
        );
        return Ok(*format);
    }
    let format = available.first().copied().ok_or_else(|| {
        GraphicsError::InitializationFailed("surface reports no formats".to_string())
    })?;
    log::warn!(
        "Surface format {:?} not supported and no priority match, using {:?}",
        requested,
        format
    );
    Ok(format)
}

/// Step 4: requested usage the surface supports; if none, a default set.
///
/// The default is color attachment, sampled and transfer destination, plus
/// storage when the surface format supports storage.
pub fn choose_image_usage(
    requested: TextureUsage,
    supported: TextureUsage,
    format_features: FormatFeatures,
) -> TextureUsage {
    let chosen = requested & supported;
    if !chosen.is_empty() {
        if chosen != requested {
            log::warn!(
                "Swapchain usage {:?} partially supported, using {:?}",
                requested,
                chosen
            );
        }
        return chosen;
    }
    let mut fallback =
        TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST;
    if format_features.contains(FormatFeatures::STORAGE) {
        fallback |= TextureUsage::STORAGE_BINDING;
    }
    let fallback = fallback & supported;
    log::warn!(
        "Swapchain usage {:?} not supported, using {:?}",
        requested,
        fallback
    );
    fallback
}

/// Step 5: the requested transform if supported, else the current one.
pub fn choose_transform(requested: SurfaceTransform, caps: &SurfaceCapabilities) -> SurfaceTransform {
    if caps.supported_transforms.contains(requested.flag()) {
        return requested;
    }
    log::warn!(
        "Surface transform {:?} not supported, using current {:?}",
        requested,
        caps.current_transform
    );
    caps.current_transform
}

/// Step 6: the requested alpha mode if supported, else the first supported of
/// opaque, pre-multiplied, post-multiplied, inherit.
pub fn choose_composite_alpha(requested: CompositeAlpha, caps: &SurfaceCapabilities) -> CompositeAlpha {
    if caps.supported_composite_alpha.contains(requested.flag()) {
        return requested;
    }
    let chosen = CompositeAlpha::PRIORITY
        .into_iter()
        .find(|mode| caps.supported_composite_alpha.contains(mode.flag()))
        .unwrap_or(CompositeAlpha::Opaque);
    log::warn!(
        "Composite alpha {:?} not supported, using {:?}",
        requested,
        chosen
    );
    chosen
}

/// Step 7: the requested mode if available, else the first available entry
/// of `priority`, else FIFO.
pub fn choose_present_mode(
    requested: PresentMode,
    available: &[PresentMode],
    priority: &[PresentMode],
) -> PresentMode {
    if available.contains(&requested) {
        return requested;
    }
    let chosen = priority
        .iter()
        .copied()
        .find(|mode| available.contains(mode))
        .unwrap_or(PresentMode::Fifo);
    log::warn!(
        "Present mode {:?} not available, using {:?}",
        requested,
        chosen
    );
    chosen
}

/// Everything a surface reports, gathered for negotiation.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceSupport {
    /// Capabilities.
    pub capabilities: SurfaceCapabilities,
    /// Supported formats.
    pub formats: Vec<SurfaceFormat>,
    /// Supported present modes.
    pub present_modes: Vec<PresentMode>,
}

/// Run all seven steps.
///
/// `format_features` reports the optimal-tiling features of a format, used
/// by the usage fallback. A 90° or 270° pre-transform swaps the extent.
pub fn negotiate(
    config: &SwapchainConfig,
    support: &SurfaceSupport,
    format_features: impl Fn(SurfaceFormat) -> FormatFeatures,
) -> GraphicsResult<SwapchainProperties> {
    let caps = &support.capabilities;
    let image_count = choose_image_count(config.image_count, caps);
    let mut extent = choose_extent(config.extent, caps);
    let surface_format =
        choose_surface_format(config.format, &support.formats, &config.format_priority)?;
    let image_usage = choose_image_usage(
        config.image_usage,
        caps.supported_usage,
        format_features(surface_format),
    );
    let pre_transform = choose_transform(config.transform, caps);
    if pre_transform.is_rotated_quarter() {
        extent = extent.transposed();
    }
    let composite_alpha = choose_composite_alpha(config.composite_alpha, caps);
    let present_mode = choose_present_mode(
        config.present_mode,
        &support.present_modes,
        &config.present_mode_priority,
    );
    let array_layers = config.array_layers.clamp(1, caps.max_array_layers.max(1));

    Ok(SwapchainProperties {
        image_count,
        extent,
        surface_format,
        array_layers,
        image_usage,
        pre_transform,
        composite_alpha,
        present_mode,
        old_swapchain: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swapchain::{ColorSpace, CompositeAlphaModes, SurfaceTransforms};
    use crate::types::TextureFormat;

    fn caps() -> SurfaceCapabilities {
        SurfaceCapabilities {
            min_image_count: 2,
            max_image_count: 4,
            current_extent: Extent2d::new(800, 600),
            min_extent: Extent2d::new(1, 1),
            max_extent: Extent2d::new(4096, 4096),
            max_array_layers: 1,
            supported_transforms: SurfaceTransforms::IDENTITY | SurfaceTransforms::ROTATE_90,
            current_transform: SurfaceTransform::Identity,
            supported_composite_alpha: CompositeAlphaModes::OPAQUE,
            supported_usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_DST,
        }
    }

    fn bgra_srgb() -> SurfaceFormat {
        SurfaceFormat::new(TextureFormat::Bgra8UnormSrgb, ColorSpace::SrgbNonlinear)
    }

    #[test]
    fn test_image_count_clamped() {
        assert_eq!(choose_image_count(1, &caps()), 2);
        assert_eq!(choose_image_count(3, &caps()), 3);
        assert_eq!(choose_image_count(8, &caps()), 4);
        let unbounded = SurfaceCapabilities {
            max_image_count: 0,
            ..caps()
        };
        assert_eq!(choose_image_count(8, &unbounded), 8);
    }

    #[test]
    fn test_zero_extent_uses_current() {
        assert_eq!(
            choose_extent(Extent2d::new(0, 720), &caps()),
            Extent2d::new(800, 600)
        );
        assert_eq!(
            choose_extent(Extent2d::new(1280, 720), &caps()),
            Extent2d::new(1280, 720)
        );
        assert_eq!(
            choose_extent(Extent2d::new(9000, 720), &caps()),
            Extent2d::new(4096, 720)
        );
    }

    #[test]
    fn test_format_exact_match_unchanged() {
        let available = [
            SurfaceFormat::new(TextureFormat::Rgba8Unorm, ColorSpace::SrgbNonlinear),
            bgra_srgb(),
        ];
        assert_eq!(
            choose_surface_format(bgra_srgb(), &available, &[]).unwrap(),
            bgra_srgb()
        );
    }

    #[test]
    fn test_format_priority_then_first() {
        let rgba = SurfaceFormat::new(TextureFormat::Rgba8Unorm, ColorSpace::SrgbNonlinear);
        let rgb10 = SurfaceFormat::new(TextureFormat::Rgb10a2Unorm, ColorSpace::SrgbNonlinear);
        let available = [rgb10, rgba];
        assert_eq!(
            choose_surface_format(bgra_srgb(), &available, &[bgra_srgb(), rgba]).unwrap(),
            rgba
        );
        assert_eq!(
            choose_surface_format(bgra_srgb(), &available, &[bgra_srgb()]).unwrap(),
            rgb10
        );
        assert!(choose_surface_format(bgra_srgb(), &[], &[]).is_err());
    }

    #[test]
    fn test_usage_fallback() {
        let supported = TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_DST;
        assert_eq!(
            choose_image_usage(TextureUsage::RENDER_ATTACHMENT, supported, FormatFeatures::empty()),
            TextureUsage::RENDER_ATTACHMENT
        );
        assert_eq!(
            choose_image_usage(TextureUsage::STORAGE_BINDING, supported, FormatFeatures::STORAGE),
            supported
        );
        let with_storage = supported | TextureUsage::STORAGE_BINDING;
        assert_eq!(
            choose_image_usage(TextureUsage::COPY_SRC, with_storage, FormatFeatures::STORAGE),
            with_storage
        );
        assert_eq!(
            choose_image_usage(TextureUsage::COPY_SRC, with_storage, FormatFeatures::SAMPLED),
            supported
        );
    }

    #[test]
    fn test_transform_and_alpha_fallbacks() {
        assert_eq!(
            choose_transform(SurfaceTransform::Rotate180, &caps()),
            SurfaceTransform::Identity
        );
        assert_eq!(
            choose_transform(SurfaceTransform::Rotate90, &caps()),
            SurfaceTransform::Rotate90
        );
        assert_eq!(
            choose_composite_alpha(CompositeAlpha::Inherit, &caps()),
            CompositeAlpha::Opaque
        );
    }

    #[test]
    fn test_present_mode_fallback() {
        let available = [PresentMode::Fifo, PresentMode::Immediate];
        let priority = [PresentMode::Mailbox, PresentMode::Immediate, PresentMode::Fifo];
        assert_eq!(
            choose_present_mode(PresentMode::Immediate, &available, &priority),
            PresentMode::Immediate
        );
        assert_eq!(
            choose_present_mode(PresentMode::Mailbox, &available, &priority),
            PresentMode::Immediate
        );
        assert_eq!(
            choose_present_mode(PresentMode::Mailbox, &[PresentMode::Fifo], &[PresentMode::Mailbox]),
            PresentMode::Fifo
        );
        assert_eq!(
            choose_present_mode(PresentMode::FifoRelaxed, &[], &[]),
            PresentMode::Fifo
        );
    }

    #[test]
    fn test_rotation_swaps_extent() {
        let support = SurfaceSupport {
            capabilities: caps(),
            formats: vec![bgra_srgb()],
            present_modes: vec![PresentMode::Fifo],
        };
        let config = SwapchainConfig::default()
            .with_extent(800, 600)
            .with_transform(SurfaceTransform::Rotate90);
        let properties = negotiate(&config, &support, |_| FormatFeatures::empty()).unwrap();
        assert_eq!(properties.extent, Extent2d::new(600, 800));
        assert_eq!(properties.pre_transform, SurfaceTransform::Rotate90);
    }

    #[test]
    fn test_negotiation_is_idempotent() {
        let support = SurfaceSupport {
            capabilities: caps(),
            formats: vec![bgra_srgb()],
            present_modes: vec![PresentMode::Fifo, PresentMode::Mailbox],
        };
        let config = SwapchainConfig::default()
            .with_extent(1024, 768)
            .with_present_mode(PresentMode::Mailbox);
        let first = negotiate(&config, &support, |_| FormatFeatures::empty()).unwrap();
        let again = SwapchainConfig {
            image_count: first.image_count,
            extent: first.extent,
            format: first.surface_format,
            present_mode: first.present_mode,
            image_usage: first.image_usage,
            ..config
        };
        let second = negotiate(&again, &support, |_| FormatFeatures::empty()).unwrap();
        assert_eq!(first, second);
        assert_eq!(second.surface_format, bgra_srgb());
        assert_eq!(second.present_mode, PresentMode::Mailbox);
    }
}
