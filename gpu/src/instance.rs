//! Graphics instance.
//!
//! The [`GraphicsInstance`] is the top-level entry point. It selects the
//! backend once from [`InstanceParameters`], creates [`GraphicsDevice`]s on it
//! and wraps native windows into presentation [`Surface`]s.

use std::sync::Arc;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::backend::{self, RenderBackend, SurfaceHandle};
use crate::config::{DeviceParameters, InstanceParameters};
use crate::device::GraphicsDevice;
use crate::error::{GraphicsError, GraphicsResult};

/// Information about a graphics adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    /// Adapter name.
    pub name: String,
    /// PCI vendor id.
    pub vendor_id: u32,
    /// PCI device id.
    pub device_id: u32,
    /// Device type (discrete, integrated, etc.).
    pub device_type: AdapterType,
    /// Largest supported 2D image dimension.
    pub max_image_dimension_2d: u32,
}

impl AdapterInfo {
    /// Preference score used when several adapters are available.
    ///
    /// Discrete beats integrated beats everything else; the maximum 2D image
    /// size breaks ties.
    pub fn score(&self) -> u64 {
        let type_score = match self.device_type {
            AdapterType::Discrete => 1000,
            AdapterType::Integrated => 100,
            AdapterType::Virtual | AdapterType::Software | AdapterType::Unknown => 0,
        };
        type_score + u64::from(self.max_image_dimension_2d / 1024)
    }
}

/// Type of graphics adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterType {
    /// Discrete GPU (dedicated graphics card).
    Discrete,
    /// Integrated GPU (shared with CPU).
    Integrated,
    /// Virtualized GPU.
    Virtual,
    /// Software renderer.
    Software,
    /// Unknown adapter type.
    Unknown,
}

/// A presentation surface for a native window.
///
/// Destroyed when dropped; every swapchain created for it must be released
/// first. [`RenderContext`](crate::context::RenderContext) takes care of that
/// ordering for the surface it owns.
pub struct Surface {
    backend: Arc<dyn RenderBackend>,
    handle: SurfaceHandle,
}

impl Surface {
    /// Native handle.
    pub fn handle(&self) -> SurfaceHandle {
        self.handle
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        self.backend.destroy_surface(self.handle);
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface").field("handle", &self.handle).finish()
    }
}

/// The graphics instance owns the backend.
///
/// # Thread Safety
///
/// `GraphicsInstance` is `Send + Sync` and can be safely shared across threads.
///
/// # Example
///
/// ```ignore
/// let instance = GraphicsInstance::new(InstanceParameters::new())?;
/// let device = instance.create_device(DeviceParameters::new())?;
/// let surface = instance.create_surface(&window)?;
/// ```
pub struct GraphicsInstance {
    backend: Arc<dyn RenderBackend>,
    params: InstanceParameters,
}

impl GraphicsInstance {
    /// Create the backend selected by `params`.
    ///
    /// # Errors
    ///
    /// Fails if the requested backend cannot be brought up or a required
    /// extension is missing.
    pub fn new(params: InstanceParameters) -> GraphicsResult<Self> {
        log::info!(
            "Creating GraphicsInstance for '{}' ({:?})",
            params.application_name,
            params.backend
        );
        let backend = backend::create_backend(&params).inspect_err(|e| {
            log::error!("Failed to initialize graphics backend: {}", e);
        })?;
        Ok(Self::with_backend(backend, params))
    }

    /// Wrap an already created backend.
    pub fn with_backend(backend: Arc<dyn RenderBackend>, params: InstanceParameters) -> Self {
        let adapter = backend.adapter_info();
        log::info!(
            "Using adapter {} ({:?}, score {})",
            adapter.name,
            adapter.device_type,
            adapter.score()
        );
        Self { backend, params }
    }

    /// The backend.
    pub fn backend(&self) -> &Arc<dyn RenderBackend> {
        &self.backend
    }

    /// Parameters the instance was created with.
    pub fn parameters(&self) -> &InstanceParameters {
        &self.params
    }

    /// Adapter the backend selected.
    pub fn adapter_info(&self) -> AdapterInfo {
        self.backend.adapter_info()
    }

    /// Create a device.
    pub fn create_device(&self, params: DeviceParameters) -> GraphicsResult<Arc<GraphicsDevice>> {
        GraphicsDevice::new(self.backend.clone(), params)
    }

    /// Create a surface for `window`.
    ///
    /// # Errors
    ///
    /// Fails if the window handles are unavailable or the backend cannot
    /// present to them.
    pub fn create_surface<W>(&self, window: &W) -> GraphicsResult<Surface>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GraphicsError::InitializationFailed(format!("Failed to get display handle: {}", e)))?;
        let window = window
            .window_handle()
            .map_err(|e| GraphicsError::InitializationFailed(format!("Failed to get window handle: {}", e)))?;
        let handle = self
            .backend
            .create_surface(display.as_raw(), window.as_raw())
            .inspect_err(|e| log::error!("Failed to create surface: {}", e))?;
        Ok(Surface {
            backend: self.backend.clone(),
            handle,
        })
    }
}

impl std::fmt::Debug for GraphicsInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsInstance")
            .field("backend", &self.backend.name())
            .field("application_name", &self.params.application_name)
            .finish()
    }
}

static_assertions::assert_impl_all!(GraphicsInstance: Send, Sync);
static_assertions::assert_impl_all!(Surface: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendType;

    fn dummy_instance() -> GraphicsInstance {
        GraphicsInstance::new(InstanceParameters::new().with_backend(BackendType::Dummy)).unwrap()
    }

    #[test]
    fn test_instance_creation() {
        let instance = dummy_instance();
        assert_eq!(instance.backend().name(), "Dummy");
        assert_eq!(instance.parameters().backend, BackendType::Dummy);
    }

    #[test]
    fn test_create_device() {
        let instance = dummy_instance();
        let device = instance.create_device(DeviceParameters::new()).unwrap();
        assert_eq!(device.adapter_info().name, "Dummy Adapter");
    }

    #[test]
    fn test_adapter_score_prefers_discrete() {
        let adapter = |device_type, max_image_dimension_2d| AdapterInfo {
            name: String::new(),
            vendor_id: 0,
            device_id: 0,
            device_type,
            max_image_dimension_2d,
        };
        let discrete = adapter(AdapterType::Discrete, 8192);
        let integrated = adapter(AdapterType::Integrated, 16384);
        let software = adapter(AdapterType::Software, 65536);
        assert_eq!(discrete.score(), 1008);
        assert_eq!(integrated.score(), 116);
        assert!(discrete.score() > integrated.score());
        assert!(integrated.score() > software.score());
    }

    #[test]
    fn test_missing_required_extension_fails() {
        let params = InstanceParameters::new()
            .with_backend(BackendType::Dummy)
            .with_device_extensions(
                crate::config::ExtensionRequests::new().require("VK_KHR_not_a_real_extension"),
            );
        assert!(matches!(
            GraphicsInstance::new(params),
            Err(GraphicsError::ExtensionMissing(_))
        ));
    }
}
