//! Meshlet Asset - loader and GPU uploader for meshlet mesh containers
//!
//! A container holds one or more meshes described by accessor and buffer
//! view tables over a single raw byte buffer. Loading resolves those tables
//! into validated stream views, builds vertex input layouts, and computes
//! bounding spheres. Uploading copies every stream into device-local GPU
//! buffers through staging buffers and blocks on a fence until the copy
//! has finished.
//!
//! # Backends
//! - **Dummy**: host-memory simulation, always available
//! - **Vulkan**: direct Vulkan API via ash (feature `vulkan-backend`)
//! - **wgpu**: cross-platform GPU abstraction (feature `wgpu-backend`)
//!
//! # Example
//! ```no_run
//! use meshlet_asset::{DummyBackend, Model, ModelConfig};
//!
//! let config = ModelConfig::default();
//! let mut model = Model::load_from_file("bunny.bin", &config)?;
//!
//! let backend = DummyBackend::new();
//! let mut device = backend.device();
//! let mut queue = backend.queue();
//! let mut allocator = backend.command_allocator();
//! let mut list = backend.command_list();
//! model.upload(&mut device, &mut queue, &mut allocator, &mut list, &config)?;
//! # Ok::<(), meshlet_asset::ModelError>(())
//! ```

pub mod backend;
pub mod bounds;
pub mod config;
pub mod error;
pub mod format;
pub mod resources;
pub mod upload;

pub use backend::dummy::DummyBackend;
pub use bounds::BoundingSphere;
pub use config::ModelConfig;
pub use error::{ModelError, ModelResult};
pub use resources::{Mesh, MeshRef, Model, Prim, RawMeshDesc};
pub use upload::{UploadPipeline, UploadStage};

#[cfg(feature = "vulkan-backend")]
pub use backend::vulkan::VulkanBackend;

#[cfg(feature = "wgpu-backend")]
pub use backend::wgpu_backend::WgpuBackend;
