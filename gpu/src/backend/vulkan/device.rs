//! Vulkan physical and logical device management.

use std::ffi::c_char;

use ash::vk;

use crate::config::InstanceParameters;
use crate::device::{ExtensionRequests, QueueFamilies, QueueFamilyInfo};
use crate::error::{GraphicsError, GraphicsResult};
use crate::instance::AdapterInfo;

use super::conversion::{adapter_type_from_vk, queue_flags_from_vk};
use super::instance::{name_of, to_cstrings};

/// A physical device that passed selection.
pub struct SelectedAdapter {
    pub physical_device: vk::PhysicalDevice,
    pub info: AdapterInfo,
    pub families: Vec<QueueFamilyInfo>,
    pub queue_families: QueueFamilies,
}

/// Select the best physical device for rendering.
///
/// Adapters without a graphics queue family or without sampler anisotropy are
/// skipped; the rest are ranked by [`AdapterInfo::score`].
pub fn select_physical_device(instance: &ash::Instance) -> GraphicsResult<SelectedAdapter> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        GraphicsError::InitializationFailed(format!(
            "Failed to enumerate physical devices: {:?}",
            e
        ))
    })?;

    if devices.is_empty() {
        return Err(GraphicsError::InitializationFailed(
            "No Vulkan-capable GPU found".to_string(),
        ));
    }

    let mut best: Option<(u64, SelectedAdapter)> = None;
    for physical_device in devices {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let features = unsafe { instance.get_physical_device_features(physical_device) };

        let info = AdapterInfo {
            name: properties
                .device_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            vendor_id: properties.vendor_id,
            device_id: properties.device_id,
            device_type: adapter_type_from_vk(properties.device_type),
            max_image_dimension_2d: properties.limits.max_image_dimension2_d,
        };

        if features.sampler_anisotropy == vk::FALSE {
            log::info!("Skipping GPU {}: no sampler anisotropy", info.name);
            continue;
        }

        let families = query_queue_families(instance, physical_device);
        let Some(queue_families) = QueueFamilies::resolve(&families) else {
            log::info!("Skipping GPU {}: no graphics queue family", info.name);
            continue;
        };

        let score = info.score();
        log::info!(
            "Found GPU: {} (type: {:?}, score: {})",
            info.name,
            info.device_type,
            score
        );

        if best.as_ref().is_none_or(|(best_score, _)| score > *best_score) {
            best = Some((
                score,
                SelectedAdapter {
                    physical_device,
                    info,
                    families,
                    queue_families,
                },
            ));
        }
    }

    best.map(|(_, adapter)| adapter)
        .ok_or_else(|| GraphicsError::InitializationFailed("No suitable GPU found".to_string()))
}

fn query_queue_families(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Vec<QueueFamilyInfo> {
    let properties =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    properties
        .iter()
        .enumerate()
        .map(|(index, family)| {
            QueueFamilyInfo::new(
                index as u32,
                queue_flags_from_vk(family.queue_flags),
                family.queue_count,
            )
        })
        .collect()
}

/// Device extension requests: the caller's plus what the crate itself needs.
pub fn device_requests(params: &InstanceParameters) -> ExtensionRequests {
    let mut requests = params.device_extensions.clone();
    requests.insert(name_of(ash::khr::swapchain::NAME).to_string(), false);
    // Must be enabled whenever the driver exposes it.
    requests.insert(name_of(ash::khr::portability_subset::NAME).to_string(), true);
    requests
}

pub fn available_device_extensions(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> GraphicsResult<Vec<String>> {
    let properties =
        unsafe { instance.enumerate_device_extension_properties(physical_device) }.map_err(|e| {
            GraphicsError::InitializationFailed(format!(
                "Failed to enumerate device extensions: {:?}",
                e
            ))
        })?;
    Ok(properties
        .iter()
        .filter_map(|p| p.extension_name_as_c_str().ok())
        .map(|name| name.to_string_lossy().into_owned())
        .collect())
}

/// Create a logical device with one queue per distinct family.
pub fn create_logical_device(
    instance: &ash::Instance,
    adapter: &SelectedAdapter,
    extensions: &[String],
) -> GraphicsResult<ash::Device> {
    let queue_priorities = [1.0f32];
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo<'_>> = adapter
        .queue_families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&queue_priorities)
        })
        .collect();

    let extension_names = to_cstrings(extensions)?;
    let extension_ptrs: Vec<*const c_char> = extension_names.iter().map(|n| n.as_ptr()).collect();

    let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);
    let mut vulkan_12_features =
        vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_ptrs)
        .enabled_features(&features)
        .push_next(&mut vulkan_12_features);

    unsafe { instance.create_device(adapter.physical_device, &create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create logical device: {:?}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swapchain_always_required() {
        let params = InstanceParameters::new();
        let requests = device_requests(&params);
        let err = requests.resolve(&["VK_KHR_portability_subset"]).unwrap_err();
        assert_eq!(
            err,
            GraphicsError::ExtensionMissing("VK_KHR_swapchain".to_string())
        );
        let enabled = requests.resolve(&["VK_KHR_swapchain"]).unwrap();
        assert_eq!(enabled, vec!["VK_KHR_swapchain".to_string()]);
    }
}
