//! Surface queries and swapchain objects.
//!
//! Negotiation of the swapchain properties happens above the backend; this
//! module only translates the negotiated values and maps presentation
//! results to [`PresentStatus`].

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::error::{GraphicsError, GraphicsResult};
use crate::swapchain::{
    PresentMode, PresentStatus, SurfaceCapabilities, SurfaceFormat, SwapchainProperties,
};
use crate::types::Extent2d;

use super::conversion::{
    color_space_from_vk, composite_alpha_from_vk, convert_color_space, convert_composite_alpha,
    convert_present_mode, convert_texture_format, convert_texture_usage, convert_transform,
    present_mode_from_vk, texture_format_from_vk, texture_usage_from_vk, transform_from_vk,
    transforms_from_vk,
};

/// Loaders for the surface and swapchain extensions.
pub struct PresentLoaders {
    pub surface: ash::khr::surface::Instance,
    pub swapchain: ash::khr::swapchain::Device,
}

impl PresentLoaders {
    pub fn new(entry: &ash::Entry, instance: &ash::Instance, device: &ash::Device) -> Self {
        Self {
            surface: ash::khr::surface::Instance::new(entry, instance),
            swapchain: ash::khr::swapchain::Device::new(instance, device),
        }
    }

    pub fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> GraphicsResult<vk::SurfaceKHR> {
        unsafe { ash_window::create_surface(entry, instance, display, window, None) }.map_err(
            |e| GraphicsError::ResourceCreationFailed(format!("Failed to create surface: {:?}", e)),
        )
    }

    pub fn destroy_surface(&self, surface: vk::SurfaceKHR) {
        unsafe { self.surface.destroy_surface(surface, None) };
    }

    /// Whether `family` can present to `surface`.
    pub fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        family: u32,
        surface: vk::SurfaceKHR,
    ) -> GraphicsResult<bool> {
        unsafe {
            self.surface
                .get_physical_device_surface_support(physical_device, family, surface)
        }
        .map_err(surface_error)
    }

    pub fn capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> GraphicsResult<SurfaceCapabilities> {
        let caps = unsafe {
            self.surface
                .get_physical_device_surface_capabilities(physical_device, surface)
        }
        .map_err(surface_error)?;

        Ok(SurfaceCapabilities {
            min_image_count: caps.min_image_count,
            max_image_count: caps.max_image_count,
            current_extent: extent_from_vk(caps.current_extent),
            min_extent: extent_from_vk(caps.min_image_extent),
            max_extent: extent_from_vk(caps.max_image_extent),
            max_array_layers: caps.max_image_array_layers,
            supported_transforms: transforms_from_vk(caps.supported_transforms),
            current_transform: transform_from_vk(caps.current_transform),
            supported_composite_alpha: composite_alpha_from_vk(caps.supported_composite_alpha),
            supported_usage: texture_usage_from_vk(caps.supported_usage_flags),
        })
    }

    /// Supported formats the crate can describe. Others are dropped with a
    /// trace message.
    pub fn formats(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> GraphicsResult<Vec<SurfaceFormat>> {
        let formats = unsafe {
            self.surface
                .get_physical_device_surface_formats(physical_device, surface)
        }
        .map_err(surface_error)?;

        Ok(formats
            .iter()
            .filter_map(|f| {
                let format = texture_format_from_vk(f.format);
                let color_space = color_space_from_vk(f.color_space);
                if format.is_none() || color_space.is_none() {
                    log::trace!("Ignoring surface format {:?}/{:?}", f.format, f.color_space);
                }
                Some(SurfaceFormat::new(format?, color_space?))
            })
            .collect())
    }

    pub fn present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> GraphicsResult<Vec<PresentMode>> {
        let modes = unsafe {
            self.surface
                .get_physical_device_surface_present_modes(physical_device, surface)
        }
        .map_err(surface_error)?;
        Ok(modes.into_iter().filter_map(present_mode_from_vk).collect())
    }

    pub fn create_swapchain(
        &self,
        surface: vk::SurfaceKHR,
        properties: &SwapchainProperties,
        old_swapchain: vk::SwapchainKHR,
    ) -> GraphicsResult<vk::SwapchainKHR> {
        let format = properties.surface_format.format;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(properties.image_count)
            .image_format(convert_texture_format(format))
            .image_color_space(convert_color_space(properties.surface_format.color_space))
            .image_extent(vk::Extent2D {
                width: properties.extent.width,
                height: properties.extent.height,
            })
            .image_array_layers(properties.array_layers)
            .image_usage(convert_texture_usage(properties.image_usage, format))
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(convert_transform(properties.pre_transform))
            .composite_alpha(convert_composite_alpha(properties.composite_alpha))
            .present_mode(convert_present_mode(properties.present_mode))
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.swapchain.create_swapchain(&create_info, None) }
            .map_err(|e| match e {
                vk::Result::ERROR_SURFACE_LOST_KHR => GraphicsError::SurfaceLost,
                vk::Result::ERROR_OUT_OF_DATE_KHR => GraphicsError::SurfaceOutdated,
                other => GraphicsError::ResourceCreationFailed(format!(
                    "Failed to create swapchain: {:?}",
                    other
                )),
            })?;

        log::info!(
            "Created Vulkan swapchain: {}x{}, {} images, {:?}",
            properties.extent.width,
            properties.extent.height,
            properties.image_count,
            properties.present_mode
        );
        Ok(swapchain)
    }

    pub fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain.destroy_swapchain(swapchain, None) };
    }

    pub fn images(&self, swapchain: vk::SwapchainKHR) -> GraphicsResult<Vec<vk::Image>> {
        unsafe { self.swapchain.get_swapchain_images(swapchain) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!(
                "Failed to get swapchain images: {:?}",
                e
            ))
        })
    }

    pub fn acquire(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
        timeout_ns: u64,
    ) -> GraphicsResult<(u32, PresentStatus)> {
        let result = unsafe {
            self.swapchain
                .acquire_next_image(swapchain, timeout_ns, signal, vk::Fence::null())
        };
        match result {
            Ok((index, false)) => Ok((index, PresentStatus::Optimal)),
            Ok((index, true)) => Ok((index, PresentStatus::Suboptimal)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok((0, PresentStatus::OutOfDate)),
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => Err(GraphicsError::Timeout),
            Err(e) => Err(present_error("acquire swapchain image", e)),
        }
    }

    pub fn present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: &[vk::Semaphore],
    ) -> GraphicsResult<PresentStatus> {
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.swapchain.queue_present(queue, &present_info) } {
            Ok(false) => Ok(PresentStatus::Optimal),
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Swapchain out of date at present");
                Ok(PresentStatus::OutOfDate)
            }
            Err(e) => Err(present_error("present swapchain image", e)),
        }
    }
}

fn extent_from_vk(extent: vk::Extent2D) -> Extent2d {
    Extent2d::new(extent.width, extent.height)
}

fn surface_error(e: vk::Result) -> GraphicsError {
    match e {
        vk::Result::ERROR_SURFACE_LOST_KHR => GraphicsError::SurfaceLost,
        other => GraphicsError::Internal(format!("Surface query failed: {:?}", other)),
    }
}

fn present_error(what: &str, e: vk::Result) -> GraphicsError {
    match e {
        vk::Result::ERROR_SURFACE_LOST_KHR => GraphicsError::SurfaceLost,
        vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
        other => GraphicsError::Internal(format!("Failed to {}: {:?}", what, other)),
    }
}
