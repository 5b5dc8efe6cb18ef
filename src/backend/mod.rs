//! Backend abstraction layer
//!
//! Provides the capability traits the upload pipeline records against, plus
//! an in-memory backend and optional Vulkan and wgpu implementations.

pub mod dummy;
pub mod traits;
pub mod types;

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

pub use traits::*;
pub use types::*;
