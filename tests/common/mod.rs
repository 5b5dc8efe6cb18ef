//! Common utilities for loader and upload integration tests.
//!
//! Containers are assembled in memory with [`ContainerBuilder`] so every
//! test controls the exact bytes the loader sees.

#![allow(dead_code)]

use meshlet_asset::backend::{CommandList, CommandQueue, GpuDevice};
use meshlet_asset::format::{
    Accessor, Attribute, BufferView, FileHeader, MeshHeader, CURRENT_VERSION, PROLOG,
};
use meshlet_asset::resources::{CullData, Meshlet, PackedTriangle, Subset};
use meshlet_asset::{DummyBackend, Model, ModelConfig, ModelResult};

// ============================================================================
// Container Builder
// ============================================================================

/// Writes containers in the on-disk layout: header, mesh table, accessor
/// table, buffer view table, raw buffer.
#[derive(Debug, Clone)]
pub struct ContainerBuilder {
    version: u32,
    meshes: Vec<MeshHeader>,
    accessors: Vec<Accessor>,
    buffer_views: Vec<BufferView>,
    buffer: Vec<u8>,
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self {
            version: CURRENT_VERSION,
            meshes: Vec::new(),
            accessors: Vec::new(),
            buffer_views: Vec::new(),
            buffer: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Append `bytes` as a new 4-byte aligned buffer view. Returns the view index.
    pub fn push_view(&mut self, bytes: &[u8]) -> u32 {
        while self.buffer.len() % 4 != 0 {
            self.buffer.push(0);
        }
        let offset = self.buffer.len() as u32;
        self.buffer.extend_from_slice(bytes);
        self.buffer_views.push(BufferView {
            offset,
            size: bytes.len() as u32,
        });
        self.buffer_views.len() as u32 - 1
    }

    /// Append `bytes` as a new buffer view directly after the previous one, without padding.
    pub fn push_packed_view(&mut self, bytes: &[u8]) -> u32 {
        let offset = self.buffer.len() as u32;
        self.buffer.extend_from_slice(bytes);
        self.buffer_views.push(BufferView {
            offset,
            size: bytes.len() as u32,
        });
        self.buffer_views.len() as u32 - 1
    }

    /// Add an accessor over an existing view. Returns the accessor index.
    pub fn push_accessor(&mut self, buffer_view: u32, size: u32, stride: u32, count: u32) -> u32 {
        self.accessors.push(Accessor {
            buffer_view,
            offset: 0,
            size,
            stride,
            count,
        });
        self.accessors.len() as u32 - 1
    }

    /// Append a view holding `elements` and an accessor covering all of them.
    pub fn push_elements<T: bytemuck::Pod>(&mut self, elements: &[T]) -> u32 {
        let size = std::mem::size_of::<T>() as u32;
        let view = self.push_view(bytemuck::cast_slice(elements));
        self.push_accessor(view, size, size, elements.len() as u32)
    }

    pub fn push_mesh(&mut self, header: MeshHeader) -> &mut Self {
        self.meshes.push(header);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let header = FileHeader {
            prolog: PROLOG,
            version: self.version,
            mesh_count: self.meshes.len() as u32,
            accessor_count: self.accessors.len() as u32,
            buffer_view_count: self.buffer_views.len() as u32,
            buffer_size: self.buffer.len() as u32,
        };

        let mut bytes = Vec::new();
        bytes.extend_from_slice(bytemuck::bytes_of(&header));
        for mesh in &self.meshes {
            bytes.extend_from_slice(bytemuck::bytes_of(&mesh.to_record()));
        }
        bytes.extend_from_slice(bytemuck::cast_slice(&self.accessors));
        bytes.extend_from_slice(bytemuck::cast_slice(&self.buffer_views));
        bytes.extend_from_slice(&self.buffer);
        bytes
    }
}

// ============================================================================
// Fixture Meshes
// ============================================================================

/// Interleaved position + texcoord vertex of the quad fixture
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PosUv {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

pub const QUAD_VERTICES: [PosUv; 4] = [
    PosUv { position: [-1.0, -1.0, 0.0], uv: [0.0, 0.0] },
    PosUv { position: [1.0, -1.0, 0.0], uv: [1.0, 0.0] },
    PosUv { position: [1.0, 1.0, 0.0], uv: [1.0, 1.0] },
    PosUv { position: [-1.0, 1.0, 0.0], uv: [0.0, 1.0] },
];

pub const QUAD_NORMALS: [[f32; 3]; 4] = [[0.0, 0.0, 1.0]; 4];

pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

pub fn quad_meshlets() -> [Meshlet; 2] {
    [
        Meshlet {
            vert_count: 3,
            vert_offset: 0,
            prim_count: 1,
            prim_offset: 0,
        },
        Meshlet {
            vert_count: 3,
            vert_offset: 3,
            prim_count: 1,
            prim_offset: 1,
        },
    ]
}

pub fn quad_cull_data() -> [CullData; 2] {
    [
        CullData {
            bounding_sphere: [0.3, -0.3, 0.0, 1.0],
            normal_cone: [127, 127, 255, 0],
            apex_offset: 0.0,
        },
        CullData {
            bounding_sphere: [-0.3, 0.3, 0.0, 1.0],
            normal_cone: [127, 127, 255, 0],
            apex_offset: 0.0,
        },
    ]
}

/// Push the quad's streams into `builder` and return its header.
///
/// Positions and texcoords share one interleaved view; normals have their
/// own. Indices, unique vertex indices and the meshlet streams are all
/// present.
pub fn push_quad_mesh(builder: &mut ContainerBuilder) -> MeshHeader {
    let interleaved = builder.push_view(bytemuck::cast_slice(&QUAD_VERTICES));
    let stride = std::mem::size_of::<PosUv>() as u32;
    let position = builder.push_accessor(interleaved, stride * 4, stride, 4);
    let texcoord = builder.push_accessor(interleaved, stride * 4, stride, 4);
    let normal = builder.push_elements(&QUAD_NORMALS);

    let indices = builder.push_elements(&QUAD_INDICES);
    let index_subsets = builder.push_elements(&[Subset { offset: 0, count: 6 }]);
    let meshlets = builder.push_elements(&quad_meshlets());
    let meshlet_subsets = builder.push_elements(&[Subset { offset: 0, count: 2 }]);
    let unique_vertex_indices = builder.push_elements::<u16>(&[0, 1, 2, 0, 2, 3]);
    let primitive_indices = builder.push_elements(&[
        PackedTriangle::new(0, 1, 2),
        PackedTriangle::new(0, 1, 2),
    ]);
    let cull_data = builder.push_elements(&quad_cull_data());

    let mut header = MeshHeader {
        indices: Some(indices),
        index_subsets: Some(index_subsets),
        meshlets: Some(meshlets),
        meshlet_subsets: Some(meshlet_subsets),
        unique_vertex_indices: Some(unique_vertex_indices),
        primitive_indices: Some(primitive_indices),
        cull_data: Some(cull_data),
        ..Default::default()
    };
    header.attributes[Attribute::Position.index()] = Some(position);
    header.attributes[Attribute::TexCoord.index()] = Some(texcoord);
    header.attributes[Attribute::Normal.index()] = Some(normal);
    header
}

/// A bare triangle: positions and 32-bit indices, no meshlet streams.
pub fn push_triangle_mesh(builder: &mut ContainerBuilder, offset: [f32; 3]) -> MeshHeader {
    let positions: Vec<[f32; 3]> = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]
        .iter()
        .map(|p| [p[0] + offset[0], p[1] + offset[1], p[2] + offset[2]])
        .collect();
    let position = builder.push_elements(&positions);
    let indices = builder.push_elements::<u32>(&[0, 1, 2]);

    let mut header = MeshHeader {
        indices: Some(indices),
        ..Default::default()
    };
    header.attributes[Attribute::Position.index()] = Some(position);
    header
}

/// Container holding the quad followed by a triangle far away from it.
pub fn two_mesh_container() -> Vec<u8> {
    let mut builder = ContainerBuilder::new();
    let quad = push_quad_mesh(&mut builder);
    let triangle = push_triangle_mesh(&mut builder, [10.0, 0.0, 0.0]);
    builder.push_mesh(quad).push_mesh(triangle);
    builder.build()
}

pub fn load(bytes: &[u8]) -> ModelResult<Model> {
    Model::from_bytes(bytes, &ModelConfig::default())
}

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Available GPU backends for testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Host-memory simulation.
    Dummy,
    /// Vulkan backend (native via ash).
    Vulkan,
    /// wgpu backend.
    WebGpu,
}

impl Backend {
    /// Check if this backend is compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            Backend::Dummy => true,
            #[cfg(feature = "vulkan-backend")]
            Backend::Vulkan => true,
            #[cfg(not(feature = "vulkan-backend"))]
            Backend::Vulkan => false,
            #[cfg(feature = "wgpu-backend")]
            Backend::WebGpu => true,
            #[cfg(not(feature = "wgpu-backend"))]
            Backend::WebGpu => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Dummy => "dummy",
            Backend::Vulkan => "vulkan",
            Backend::WebGpu => "webgpu",
        }
    }

    /// Upload `model`, check every GPU view exists, then release it.
    ///
    /// Returns `None` when the backend is not compiled in or no device could
    /// be created on this machine.
    pub fn upload_and_release(self, model: &mut Model, config: &ModelConfig) -> Option<ModelResult<()>> {
        if !self.is_available() {
            return None;
        }
        match self {
            Backend::Dummy => {
                let backend = DummyBackend::new();
                let result = upload_cycle(
                    &mut backend.device(),
                    &mut backend.queue(),
                    &mut backend.command_allocator(),
                    &mut backend.command_list(),
                    model,
                    config,
                );
                assert_eq!(backend.live_buffer_count(), 0, "buffers leaked");
                Some(result)
            }
            #[cfg(feature = "vulkan-backend")]
            Backend::Vulkan => {
                let backend = match meshlet_asset::VulkanBackend::new() {
                    Ok(backend) => backend,
                    Err(e) => {
                        eprintln!("Vulkan device unavailable: {e}");
                        return None;
                    }
                };
                let mut allocator = match backend.command_allocator() {
                    Ok(allocator) => allocator,
                    Err(e) => return Some(Err(e.into())),
                };
                Some(upload_cycle(
                    &mut backend.device(),
                    &mut backend.queue(),
                    &mut allocator,
                    &mut backend.command_list(),
                    model,
                    config,
                ))
            }
            #[cfg(feature = "wgpu-backend")]
            Backend::WebGpu => {
                let backend = match meshlet_asset::WgpuBackend::new() {
                    Ok(backend) => backend,
                    Err(e) => {
                        eprintln!("wgpu device unavailable: {e}");
                        return None;
                    }
                };
                Some(upload_cycle(
                    &mut backend.device(),
                    &mut backend.queue(),
                    &mut backend.command_allocator(),
                    &mut backend.command_list(),
                    model,
                    config,
                ))
            }
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }
}

fn upload_cycle<D, Q>(
    device: &mut D,
    queue: &mut Q,
    allocator: &mut <Q::List as CommandList>::Allocator,
    list: &mut Q::List,
    model: &mut Model,
    config: &ModelConfig,
) -> ModelResult<()>
where
    D: GpuDevice,
    Q: CommandQueue,
{
    model.upload(device, queue, allocator, list, config)?;
    assert!(model.is_uploaded());
    for mesh in model.meshes() {
        let gpu = mesh.gpu.as_ref().expect("mesh has GPU resources");
        assert_eq!(gpu.vertex_views.len(), mesh.vertex_slots.len());
        assert_eq!(gpu.index_view.is_some(), mesh.index_count > 0);
    }
    model.release_gpu_resources(device);
    assert!(!model.is_uploaded());
    Ok(())
}
