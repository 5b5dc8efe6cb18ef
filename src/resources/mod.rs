//! Resource management
//!
//! Resolves container tables into meshes over a single raw buffer.

mod assemble;
mod buffer;
mod layout;
mod mesh;
mod model;
mod resolve;

pub use assemble::{InputElementDesc, RawMeshDesc};
pub use buffer::*;
pub use layout::*;
pub use mesh::*;
pub use model::*;
