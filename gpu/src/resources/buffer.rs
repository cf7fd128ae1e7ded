//! GPU buffer resource.

use std::sync::Arc;

use crate::backend::BufferHandle;
use crate::device::{GraphicsDevice, QueueRole};
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{BufferCopy, BufferDescriptor, BufferUsage};

/// A GPU buffer resource.
///
/// Buffers are created by [`GraphicsDevice::create_buffer`]. Host-visible
/// buffers (`MAP_WRITE`) are written directly; all others are filled through
/// a staging buffer and a one-shot transfer.
///
/// # Example
///
/// ```ignore
/// let buffer = device.create_buffer(
///     &BufferDescriptor::new(1024, BufferUsage::VERTEX),
///     Some(&vertex_bytes),
/// )?;
/// println!("Buffer size: {}", buffer.size());
/// ```
pub struct Buffer {
    device: Arc<GraphicsDevice>,
    handle: BufferHandle,
    descriptor: BufferDescriptor,
}

impl Buffer {
    pub(crate) fn new(
        device: &Arc<GraphicsDevice>,
        descriptor: &BufferDescriptor,
        data: Option<&[u8]>,
    ) -> GraphicsResult<Self> {
        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "buffer size must be non-zero".to_string(),
            ));
        }
        let mut descriptor = descriptor.clone();
        if data.is_some() && !descriptor.usage.is_host_visible() {
            descriptor.usage |= BufferUsage::COPY_DST;
        }

        let handle = device.checked(
            "create_buffer",
            device.backend().create_buffer(&descriptor),
        )?;
        let buffer = Self {
            device: device.clone(),
            handle,
            descriptor,
        };
        if let Some(data) = data {
            buffer.write(0, data)?;
        }
        log::trace!(
            "Created buffer {:?} ({} bytes, {:?})",
            buffer.descriptor.label,
            buffer.descriptor.size,
            buffer.descriptor.usage
        );
        Ok(buffer)
    }

    /// Write `data` at `offset`.
    ///
    /// Device-local buffers block until the staging copy has completed.
    pub fn write(&self, offset: u64, data: &[u8]) -> GraphicsResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let end = offset.checked_add(data.len() as u64);
        if end.is_none_or(|end| end > self.descriptor.size) {
            return Err(GraphicsError::InvalidParameter(format!(
                "write of {} bytes at {} overflows buffer of {} bytes",
                data.len(),
                offset,
                self.descriptor.size
            )));
        }

        if self.descriptor.usage.is_host_visible() {
            return self.device.check(
                "write_buffer",
                self.device.backend().write_buffer(self.handle, offset, data),
            );
        }
        let dst = self.handle;
        self.device
            .upload_via_staging(QueueRole::Transfer, data, |cmd, staging| {
                cmd.copy_buffer(
                    staging,
                    dst,
                    &[BufferCopy {
                        src_offset: 0,
                        dst_offset: offset,
                        size: data.len() as u64,
                    }],
                );
            })
    }

    /// Native handle.
    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    /// Get the parent device.
    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    /// Get the buffer descriptor.
    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// Get the buffer size in bytes.
    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    /// Get the buffer usage.
    pub fn usage(&self) -> BufferUsage {
        self.descriptor.usage
    }

    /// Get the buffer label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.device.destroy_async(self.handle);
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("handle", &self.handle)
            .field("size", &self.descriptor.size)
            .field("usage", &self.descriptor.usage)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Buffer: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, RenderBackend};
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
    fn test_buffer_debug() {
        let (_backend, device) = device();
        let buffer = device
            .create_buffer(&BufferDescriptor::new(1024, BufferUsage::VERTEX), None)
            .unwrap();
        let debug = format!("{:?}", buffer);
        assert!(debug.contains("Buffer"));
        assert!(debug.contains("1024"));
    }

    #[test]
    fn test_host_visible_write() {
        let (backend, device) = device();
        let buffer = device
            .create_buffer(
                &BufferDescriptor::new(8, BufferUsage::UNIFORM | BufferUsage::MAP_WRITE),
                Some(&[1, 2, 3, 4]),
            )
            .unwrap();
        buffer.write(4, &[5, 6, 7, 8]).unwrap();
        assert_eq!(
            backend.read_buffer(buffer.handle(), 0, 8).unwrap(),
            vec![1, 2, 3, 4, 5, 6, 7, 8]
        );
    }

    #[test]
    fn test_device_local_upload_goes_through_staging() {
        let (backend, device) = device();
        let before = backend.live_object_count();
        let buffer = device
            .create_buffer(
                &BufferDescriptor::new(4, BufferUsage::VERTEX),
                Some(&[9, 8, 7, 6]),
            )
            .unwrap();
        assert!(buffer.usage().contains(BufferUsage::COPY_DST));
        assert_eq!(
            backend.read_buffer(buffer.handle(), 0, 4).unwrap(),
            vec![9, 8, 7, 6]
        );
        // buffer + pooled fence + pooled command buffer; staging is gone
        assert_eq!(backend.live_object_count(), before + 3);
    }

    #[test]
    fn test_out_of_bounds_write_rejected() {
        let (_backend, device) = device();
        let buffer = device
            .create_buffer(&BufferDescriptor::new(4, BufferUsage::MAP_WRITE), None)
            .unwrap();
        assert!(matches!(
            buffer.write(2, &[0; 4]),
            Err(GraphicsError::InvalidParameter(_))
        ));
        assert!(device
            .create_buffer(&BufferDescriptor::new(0, BufferUsage::VERTEX), None)
            .is_err());
    }

    #[test]
    fn test_drop_defers_destruction() {
        let (backend, device) = device();
        let buffer = device
            .create_buffer(&BufferDescriptor::new(16, BufferUsage::STORAGE), None)
            .unwrap();
        let raw = buffer.handle().raw();
        drop(buffer);
        assert!(backend.is_alive(raw));
        for _ in 0..device.parameters().frames_in_flight {
            device.advance_frame();
        }
        assert!(!backend.is_alive(raw));
    }
}
