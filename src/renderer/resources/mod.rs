//! GPU resource primitives: device-memory buffers and images, plus the
//! one-shot transfer context that moves bytes into them.

pub mod buffer;
pub mod image;
pub mod upload;