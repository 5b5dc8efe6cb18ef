//! Mesh data structures and meshlet element formats

use std::borrow::Cow;
use std::ops::Deref;

use bytemuck::{Pod, Zeroable};

use super::{RawBuffer, StreamView, VertexLayout};
use crate::backend::{BufferHandle, IndexBufferView, IndexFormat, VertexBufferView};
use crate::bounds::BoundingSphere;

/// A range of elements in another stream
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct Subset {
    pub offset: u32,
    pub count: u32,
}

/// A small cluster of triangles with its own vertex and primitive ranges
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct Meshlet {
    pub vert_count: u32,
    pub vert_offset: u32,
    pub prim_count: u32,
    pub prim_offset: u32,
}

/// Three 10-bit meshlet-local vertex indices packed into 32 bits.
///
/// `i0` occupies bits 0-9, `i1` bits 10-19, `i2` bits 20-29. The top two
/// bits are unused.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct PackedTriangle(pub u32);

impl PackedTriangle {
    const MASK: u32 = 0x3FF;

    /// Pack three indices; each is truncated to 10 bits.
    pub fn new(i0: u32, i1: u32, i2: u32) -> Self {
        Self((i0 & Self::MASK) | ((i1 & Self::MASK) << 10) | ((i2 & Self::MASK) << 20))
    }

    pub fn indices(self) -> [u32; 3] {
        [
            self.0 & Self::MASK,
            (self.0 >> 10) & Self::MASK,
            (self.0 >> 20) & Self::MASK,
        ]
    }
}

/// Per-meshlet culling data
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct CullData {
    /// xyz = center, w = radius
    pub bounding_sphere: [f32; 4],
    /// xyz = axis, w = -cos(a + 90), each quantized to 8 bits
    pub normal_cone: [u8; 4],
    /// apex = center - axis * offset
    pub apex_offset: f32,
}

/// Per-mesh constants consumed by meshlet shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct MeshInfo {
    pub index_size: u32,
    pub meshlet_count: u32,
    pub last_meshlet_vert_count: u32,
    pub last_meshlet_prim_count: u32,
}

/// One deduplicated vertex buffer of a mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexSlot {
    /// Buffer view the slot was created from
    pub buffer_view: u32,
    pub view: StreamView,
    pub stride: u32,
}

/// GPU buffers created for a mesh by an upload
#[derive(Debug, Clone, PartialEq)]
pub struct MeshGpuResources {
    pub vertex_buffers: Vec<BufferHandle>,
    /// Indexed by vertex slot; `None` for a slot whose stream was empty
    pub vertex_views: Vec<Option<VertexBufferView>>,
    pub index_buffer: Option<BufferHandle>,
    pub index_view: Option<IndexBufferView>,
    pub meshlet_buffer: Option<BufferHandle>,
    pub unique_vertex_index_buffer: Option<BufferHandle>,
    pub primitive_index_buffer: Option<BufferHandle>,
    pub cull_data_buffer: Option<BufferHandle>,
    pub mesh_info_buffer: Option<BufferHandle>,
}

impl MeshGpuResources {
    pub fn buffers(&self) -> impl Iterator<Item = BufferHandle> + '_ {
        self.vertex_buffers.iter().copied().chain(
            [
                self.index_buffer,
                self.meshlet_buffer,
                self.unique_vertex_index_buffer,
                self.primitive_index_buffer,
                self.cull_data_buffer,
                self.mesh_info_buffer,
            ]
            .into_iter()
            .flatten(),
        )
    }
}

/// A resolved mesh: validated views into the model's raw buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub layout: VertexLayout,
    pub vertex_slots: Vec<VertexSlot>,
    pub vertex_count: u32,
    pub bounding_sphere: BoundingSphere,

    pub indices: StreamView,
    /// Bytes per index: 2, 4, or 0 when the mesh has no index stream
    pub index_size: u32,
    pub index_count: u32,
    pub index_subsets: StreamView,

    pub meshlets: StreamView,
    pub meshlet_subsets: StreamView,
    pub unique_vertex_indices: StreamView,
    pub primitive_indices: StreamView,
    pub cull_data: StreamView,

    pub gpu: Option<MeshGpuResources>,
}

impl Mesh {
    pub fn index_format(&self) -> Option<IndexFormat> {
        IndexFormat::from_size(self.index_size)
    }

    pub fn meshlet_count(&self) -> u32 {
        self.meshlets.count
    }
}

/// A mesh together with the raw buffer its views point into.
#[derive(Debug, Clone, Copy)]
pub struct MeshRef<'a> {
    mesh: &'a Mesh,
    buffer: &'a RawBuffer,
}

impl<'a> Deref for MeshRef<'a> {
    type Target = Mesh;

    fn deref(&self) -> &Mesh {
        self.mesh
    }
}

impl<'a> MeshRef<'a> {
    pub(crate) fn new(mesh: &'a Mesh, buffer: &'a RawBuffer) -> Self {
        Self { mesh, buffer }
    }

    pub fn mesh(&self) -> &'a Mesh {
        self.mesh
    }

    pub fn index_bytes(&self) -> &'a [u8] {
        self.buffer.slice(&self.mesh.indices)
    }

    pub fn vertex_bytes(&self, slot: usize) -> Option<&'a [u8]> {
        let slot = self.mesh.vertex_slots.get(slot)?;
        Some(self.buffer.slice(&slot.view))
    }

    pub fn index_subsets(&self) -> Cow<'a, [Subset]> {
        self.buffer.typed(&self.mesh.index_subsets)
    }

    pub fn meshlets(&self) -> Cow<'a, [Meshlet]> {
        self.buffer.typed(&self.mesh.meshlets)
    }

    pub fn meshlet_subsets(&self) -> Cow<'a, [Subset]> {
        self.buffer.typed(&self.mesh.meshlet_subsets)
    }

    pub fn unique_vertex_index_bytes(&self) -> &'a [u8] {
        self.buffer.slice(&self.mesh.unique_vertex_indices)
    }

    pub fn primitive_indices(&self) -> Cow<'a, [PackedTriangle]> {
        self.buffer.typed(&self.mesh.primitive_indices)
    }

    pub fn cull_data(&self) -> Cow<'a, [CullData]> {
        self.buffer.typed(&self.mesh.cull_data)
    }

    /// The three meshlet-local vertex indices of primitive `index`.
    pub fn primitive(&self, index: usize) -> Option<[u32; 3]> {
        self.primitive_indices().get(index).map(|p| p.indices())
    }

    /// Absolute vertex index stored at `index` in the unique-vertex-index stream.
    pub fn vertex_index(&self, index: usize) -> Option<u32> {
        let bytes = self.unique_vertex_index_bytes();
        let size = self.mesh.index_size as usize;
        let start = index.checked_mul(size)?;
        let entry = bytes.get(start..start.checked_add(size)?)?;
        match self.mesh.index_format()? {
            IndexFormat::Uint32 => Some(u32::from_ne_bytes([entry[0], entry[1], entry[2], entry[3]])),
            IndexFormat::Uint16 => Some(u16::from_ne_bytes([entry[0], entry[1]]) as u32),
        }
    }

    /// How many copies of the last meshlet in subset `subset_index` fit in one
    /// work group with the given vertex and primitive capacity.
    ///
    /// Returns 0 when the mesh has no meshlets, the subset does not exist or
    /// is empty, or the last meshlet is empty.
    pub fn last_meshlet_pack_count(&self, subset_index: usize, max_verts: u32, max_prims: u32) -> u32 {
        let meshlets = self.meshlets();
        if meshlets.is_empty() {
            return 0;
        }
        let Some(subset) = self.meshlet_subsets().get(subset_index).copied() else {
            return 0;
        };
        if subset.count == 0 {
            return 0;
        }
        let last = subset.offset as usize + subset.count as usize - 1;
        let Some(meshlet) = meshlets.get(last) else {
            return 0;
        };
        if meshlet.vert_count == 0 || meshlet.prim_count == 0 {
            return 0;
        }
        (max_verts / meshlet.vert_count).min(max_prims / meshlet.prim_count)
    }

    /// Shader constants describing this mesh's meshlet streams.
    pub fn mesh_info(&self) -> MeshInfo {
        let last = self.meshlets().last().copied().unwrap_or_default();
        MeshInfo {
            index_size: self.mesh.index_size,
            meshlet_count: self.mesh.meshlets.count,
            last_meshlet_vert_count: last.vert_count,
            last_meshlet_prim_count: last.prim_count,
        }
    }
}

/// GPU buffers created for a [`Prim`] by an upload
#[derive(Debug, Clone, PartialEq)]
pub struct PrimGpuResources {
    pub vertex_buffer: Option<BufferHandle>,
    pub vertex_view: Option<VertexBufferView>,
    pub index_buffer: Option<BufferHandle>,
    pub index_view: Option<IndexBufferView>,
}

impl PrimGpuResources {
    pub fn buffers(&self) -> impl Iterator<Item = BufferHandle> {
        [self.vertex_buffer, self.index_buffer].into_iter().flatten()
    }
}

/// Single-stream primitive built from flat vertex and index buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct Prim {
    pub layout: VertexLayout,
    pub vertices: StreamView,
    pub vertex_stride: u32,
    pub vertex_count: u32,
    pub indices: StreamView,
    pub index_format: IndexFormat,
    pub index_count: u32,
    pub bounding_sphere: BoundingSphere,
    pub gpu: Option<PrimGpuResources>,
}
