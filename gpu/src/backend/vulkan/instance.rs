//! Vulkan instance creation and configuration.

use std::ffi::{CStr, CString, c_char};

use ash::vk;

use crate::config::InstanceParameters;
use crate::device::ExtensionRequests;
use crate::error::{GraphicsError, GraphicsResult};

use super::debug;

/// Required Vulkan API version.
/// On macOS with MoltenVK, only Vulkan 1.2 is supported.
#[cfg(target_os = "macos")]
const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 2, 0);

#[cfg(not(target_os = "macos"))]
const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 3, 0);

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

const ENGINE_NAME: &CStr = c"RedLilium";

/// A created instance together with its optional debug messenger.
pub struct InstanceBundle {
    pub instance: ash::Instance,
    pub debug: Option<debug::DebugMessenger>,
    pub extensions: Vec<String>,
}

/// Create a Vulkan instance for `params`.
///
/// Surface extensions for every windowing system of the platform are
/// requested optionally, so a headless machine still gets an instance.
pub fn create_instance(
    entry: &ash::Entry,
    params: &InstanceParameters,
) -> GraphicsResult<InstanceBundle> {
    let validation = params.validation && check_validation_layer_support(entry);
    if params.validation && !validation {
        log::warn!("Validation layers requested but not available");
    }

    let requests = instance_requests(params, validation);
    let available = available_instance_extensions(entry)?;
    let extensions = requests.resolve(&available)?;
    log::debug!("Enabling instance extensions: {:?}", extensions);

    let extension_names = to_cstrings(&extensions)?;
    let extension_ptrs: Vec<*const c_char> = extension_names.iter().map(|n| n.as_ptr()).collect();

    let app_name = CString::new(params.application_name.as_str()).map_err(|_| {
        GraphicsError::InvalidParameter("application name contains a NUL byte".to_string())
    })?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(ENGINE_NAME)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    let layer_names: Vec<*const c_char> = if validation {
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        vec![]
    };

    let mut create_flags = vk::InstanceCreateFlags::empty();
    if extensions
        .iter()
        .any(|e| e.as_str() == name_of(ash::khr::portability_enumeration::NAME))
    {
        create_flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    let create_info = vk::InstanceCreateInfo::default()
        .flags(create_flags)
        .application_info(&app_info)
        .enabled_extension_names(&extension_ptrs)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create Vulkan instance: {:?}", e))
    })?;

    let debug_enabled = extensions
        .iter()
        .any(|e| e.as_str() == name_of(ash::ext::debug_utils::NAME));
    let debug = if debug_enabled {
        match debug::DebugMessenger::new(entry, &instance) {
            Ok(messenger) => Some(messenger),
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        }
    } else {
        None
    };

    Ok(InstanceBundle {
        instance,
        debug,
        extensions,
    })
}

fn instance_requests(params: &InstanceParameters, validation: bool) -> ExtensionRequests {
    let mut requests = params.instance_extensions.clone();
    requests.insert(name_of(ash::khr::surface::NAME).to_string(), false);
    for name in platform_surface_extensions() {
        requests.insert(name_of(name).to_string(), true);
    }
    if validation {
        requests.insert(name_of(ash::ext::debug_utils::NAME).to_string(), true);
    }
    if cfg!(target_os = "macos") {
        requests.insert(
            name_of(ash::khr::portability_enumeration::NAME).to_string(),
            true,
        );
    }
    requests
}

fn platform_surface_extensions() -> Vec<&'static CStr> {
    #[allow(unused_mut)]
    let mut names = Vec::new();
    #[cfg(target_os = "windows")]
    names.push(ash::khr::win32_surface::NAME);
    #[cfg(all(unix, not(target_os = "macos"), not(target_os = "android")))]
    {
        names.push(ash::khr::xlib_surface::NAME);
        names.push(ash::khr::xcb_surface::NAME);
        names.push(ash::khr::wayland_surface::NAME);
    }
    #[cfg(target_os = "android")]
    names.push(ash::khr::android_surface::NAME);
    #[cfg(target_os = "macos")]
    names.push(ash::ext::metal_surface::NAME);
    names
}

fn available_instance_extensions(entry: &ash::Entry) -> GraphicsResult<Vec<String>> {
    let properties = unsafe { entry.enumerate_instance_extension_properties(None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!(
            "Failed to enumerate instance extensions: {:?}",
            e
        ))
    })?;
    Ok(properties
        .iter()
        .filter_map(|p| p.extension_name_as_c_str().ok())
        .map(|name| name.to_string_lossy().into_owned())
        .collect())
}

fn check_validation_layer_support(entry: &ash::Entry) -> bool {
    let Ok(layers) = (unsafe { entry.enumerate_instance_layer_properties() }) else {
        return false;
    };
    layers
        .iter()
        .any(|layer| layer.layer_name_as_c_str().is_ok_and(|n| n == VALIDATION_LAYER_NAME))
}

pub(super) fn name_of(name: &'static CStr) -> &'static str {
    name.to_str().unwrap_or_default()
}

pub(super) fn to_cstrings(names: &[String]) -> GraphicsResult<Vec<CString>> {
    names
        .iter()
        .map(|name| {
            CString::new(name.as_str()).map_err(|_| {
                GraphicsError::InvalidParameter(format!("invalid extension name {:?}", name))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_extension_is_required() {
        let params = InstanceParameters::new();
        let requests = instance_requests(&params, false);
        let enabled = requests.resolve(&["VK_KHR_surface"]).unwrap();
        assert_eq!(enabled, vec!["VK_KHR_surface".to_string()]);
        assert!(requests.resolve::<&str>(&[]).is_err());
    }

    #[test]
    fn test_debug_utils_only_with_validation() {
        let params = InstanceParameters::new();
        assert!(!instance_requests(&params, false).contains("VK_EXT_debug_utils"));
        assert!(instance_requests(&params, true).contains("VK_EXT_debug_utils"));
    }
}
