//! GPU resources.
//!
//! This module contains the owning wrappers created by [`GraphicsDevice`]:
//! - [`Buffer`] - GPU memory buffer
//! - [`Texture`] - GPU image with a full view
//! - [`Sampler`] - Texture sampler
//!
//! Each wrapper holds an `Arc` to its device. Dropping a wrapper hands its
//! native objects to the device's deferred destruction, so command buffers
//! recorded earlier in the frame stay valid.
//!
//! [`GraphicsDevice`]: crate::GraphicsDevice

mod buffer;
mod sampler;
mod texture;

pub use buffer::Buffer;
pub use sampler::Sampler;
pub use texture::Texture;
