//! Common utilities for GPU integration tests.
//!
//! Tests are parameterized over [`Backend`]. The dummy backend is always
//! available; Vulkan cases are skipped when no driver or GPU is present.

#![allow(dead_code)]

use std::sync::Arc;

use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, RawDisplayHandle,
    RawWindowHandle, WebDisplayHandle, WebWindowHandle, WindowHandle,
};
use redlilium_gpu::{
    BackendType, Buffer, BufferDescriptor, BufferUsage, CheckPolicy, DeviceParameters,
    DummyBackend, GraphicsDevice, GraphicsInstance, InstanceParameters, RenderBackend, Shader,
    Surface,
};
use redlilium_gpu::descriptor::DescriptorBinding;
use redlilium_gpu::descriptor::DescriptorType;
use redlilium_gpu::types::ShaderStages;

/// Magic number that opens every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Available GPU backends for testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Dummy backend (no actual GPU operations).
    Dummy,
    /// Vulkan backend (native via ash).
    Vulkan,
}

impl Backend {
    /// Check if this backend is compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            Backend::Dummy => true,
            Backend::Vulkan => cfg!(feature = "vulkan-backend"),
        }
    }

    /// Get the backend name for display.
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Dummy => "dummy",
            Backend::Vulkan => "vulkan",
        }
    }

    /// Convert to InstanceParameters for creating a GraphicsInstance.
    pub fn to_instance_parameters(self) -> InstanceParameters {
        let backend = match self {
            Backend::Dummy => BackendType::Dummy,
            Backend::Vulkan => BackendType::Vulkan,
        };
        InstanceParameters::new()
            .with_backend(backend)
            .with_application_name("redlilium-gpu-tests")
    }
}

// ============================================================================
// Test Context
// ============================================================================

/// Test context holding the instance and device for a backend.
///
/// For the dummy backend the concrete [`DummyBackend`] is kept as well so
/// tests can inspect live objects and executed commands.
pub struct TestContext {
    pub backend: Backend,
    pub instance: GraphicsInstance,
    pub device: Arc<GraphicsDevice>,
    pub dummy: Option<Arc<DummyBackend>>,
}

impl TestContext {
    /// Create a context with default device parameters.
    pub fn new(backend: Backend) -> Option<Self> {
        Self::with_params(backend, device_parameters(2))
    }

    /// Create a context, or `None` if the backend cannot be created here.
    pub fn with_params(backend: Backend, params: DeviceParameters) -> Option<Self> {
        init_logging();
        if !backend.is_available() {
            return None;
        }

        let (instance, dummy) = match backend {
            Backend::Dummy => {
                let dummy = Arc::new(DummyBackend::new());
                let instance =
                    GraphicsInstance::with_backend(dummy.clone(), backend.to_instance_parameters());
                (instance, Some(dummy))
            }
            Backend::Vulkan => match GraphicsInstance::new(backend.to_instance_parameters()) {
                Ok(instance) => (instance, None),
                Err(e) => {
                    log::warn!("Vulkan instance unavailable: {}", e);
                    return None;
                }
            },
        };

        let device = match instance.create_device(params) {
            Ok(device) => device,
            Err(e) => {
                log::warn!("{} device unavailable: {}", backend.name(), e);
                return None;
            }
        };

        Some(Self {
            backend,
            instance,
            device,
            dummy,
        })
    }

    /// The backend behind the device.
    pub fn raw(&self) -> &Arc<dyn RenderBackend> {
        self.device.backend()
    }

    /// Create a host-writable buffer.
    pub fn create_host_buffer(&self, size: u64, usage: BufferUsage) -> Buffer {
        self.device
            .create_buffer(
                &BufferDescriptor::new(size, usage | BufferUsage::MAP_WRITE).with_label("host"),
                None,
            )
            .expect("Failed to create host buffer")
    }

    /// Read back a host-visible buffer.
    pub fn read(&self, buffer: &Buffer) -> Vec<u8> {
        self.raw()
            .read_buffer(buffer.handle(), 0, buffer.size())
            .expect("Failed to read buffer")
    }

    /// Number of native objects still alive. Dummy backend only.
    pub fn live_objects(&self) -> Option<usize> {
        self.dummy.as_ref().map(|d| d.live_object_count())
    }

    /// A surface for a fake window. Dummy backend only.
    pub fn fake_surface(&self) -> Option<Surface> {
        self.dummy.as_ref()?;
        Some(
            self.instance
                .create_surface(&FakeWindow)
                .expect("Failed to create surface"),
        )
    }
}

/// Device parameters used by most tests.
pub fn device_parameters(frames_in_flight: u32) -> DeviceParameters {
    DeviceParameters::new()
        .with_frames_in_flight(frames_in_flight)
        .with_check_policy(CheckPolicy::Propagate)
}

/// Route `log` output through env_logger once per test binary.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Windows and Shaders
// ============================================================================

/// A window the dummy backend can build a surface for.
pub struct FakeWindow;

impl HasWindowHandle for FakeWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        let raw = RawWindowHandle::Web(WebWindowHandle::new(1));
        // SAFETY: the dummy backend never dereferences window handles.
        Ok(unsafe { WindowHandle::borrow_raw(raw) })
    }
}

impl HasDisplayHandle for FakeWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        let raw = RawDisplayHandle::Web(WebDisplayHandle::new());
        // SAFETY: as above.
        Ok(unsafe { DisplayHandle::borrow_raw(raw) })
    }
}

/// Vertex + fragment program with one uniform buffer and one texture.
///
/// The code words are placeholders; only the dummy backend accepts them.
pub fn textured_shader() -> Shader {
    Shader::new()
        .with_label("textured")
        .with_stage(ShaderStages::VERTEX, vec![SPIRV_MAGIC])
        .with_stage(ShaderStages::FRAGMENT, vec![SPIRV_MAGIC])
        .with_binding(DescriptorBinding::new(
            0,
            "camera",
            DescriptorType::UniformBuffer,
            ShaderStages::VERTEX,
        ))
        .with_binding(DescriptorBinding::new(
            1,
            "albedo",
            DescriptorType::CombinedImageSampler,
            ShaderStages::FRAGMENT,
        ))
}

/// Compute program with one storage buffer.
pub fn storage_compute_shader() -> Shader {
    Shader::new()
        .with_label("fill")
        .with_stage(ShaderStages::COMPUTE, vec![SPIRV_MAGIC])
        .with_binding(DescriptorBinding::new(
            0,
            "data",
            DescriptorType::StorageBuffer,
            ShaderStages::COMPUTE,
        ))
}

/// A byte pattern of `len` bytes.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}
