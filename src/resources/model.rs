//! Model loading and queries

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use glam::Vec4;

use super::assemble::{assemble, InputElementDesc, RawMeshDesc};
use super::resolve::{resolve_meshes, Tables};
use super::{Mesh, MeshRef, Prim, RawBuffer};
use crate::backend::{GpuDevice, IndexFormat, VertexFormat};
use crate::bounds::BoundingSphere;
use crate::config::ModelConfig;
use crate::error::{ModelError, ModelResult};
use crate::format::{read_container, Accessor, BufferView, Container, MeshHeader};

/// A loaded mesh container: one raw buffer and the meshes resolved over it.
///
/// Models built from flat vertex and index buffers hold a single [`Prim`]
/// instead and report a mesh count of zero.
#[derive(Debug, Clone, Default)]
pub struct Model {
    buffer: RawBuffer,
    meshes: Vec<Mesh>,
    prim: Option<Prim>,
    bounding_sphere: BoundingSphere,
}

impl Model {
    /// Load a container file.
    pub fn load_from_file(path: impl AsRef<Path>, config: &ModelConfig) -> ModelResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ModelError::Argument {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Loading model {:?}", path);
        Self::from_reader(&mut BufReader::new(file), config)
    }

    pub fn from_reader<R: Read>(reader: &mut R, config: &ModelConfig) -> ModelResult<Self> {
        let container = read_container(reader, config)?;
        Self::from_container(container)
    }

    pub fn from_bytes(bytes: &[u8], config: &ModelConfig) -> ModelResult<Self> {
        let mut reader = bytes;
        Self::from_reader(&mut reader, config)
    }

    pub fn from_container(container: Container) -> ModelResult<Self> {
        Self::from_tables(
            &container.meshes,
            &container.accessors,
            &container.buffer_views,
            container.buffer,
        )
    }

    /// Build a model from descriptor tables already held in memory.
    pub fn from_tables(
        meshes: &[MeshHeader],
        accessors: &[Accessor],
        buffer_views: &[BufferView],
        buffer: RawBuffer,
    ) -> ModelResult<Self> {
        let tables = Tables {
            accessors,
            buffer_views,
            buffer: &buffer,
        };
        let meshes = resolve_meshes(meshes, &tables)?;
        let bounding_sphere = merged_bounds(meshes.iter().map(|m| m.bounding_sphere));

        Ok(Self {
            buffer,
            meshes,
            prim: None,
            bounding_sphere,
        })
    }

    /// Build a single-primitive model from flat vertex and index buffers.
    pub fn from_raw_buffers(desc: &RawMeshDesc<'_>) -> ModelResult<Self> {
        let assembled = assemble(desc)?;
        let tables = Tables {
            accessors: &assembled.accessors,
            buffer_views: &assembled.buffer_views,
            buffer: &assembled.buffer,
        };
        let mesh = resolve_meshes(&[assembled.header], &tables)?
            .pop()
            .ok_or_else(|| ModelError::corrupt("assembled tables resolved to no mesh"))?;

        let (vertices, vertex_stride) = mesh
            .vertex_slots
            .first()
            .map(|slot| (slot.view, slot.stride))
            .unwrap_or_default();
        let index_format = mesh
            .index_format()
            .ok_or_else(|| ModelError::UnsupportedFormat(format!("{}-byte indices", mesh.index_size)))?;

        let prim = Prim {
            layout: mesh.layout,
            vertices,
            vertex_stride,
            vertex_count: mesh.vertex_count,
            indices: mesh.indices,
            index_format,
            index_count: mesh.index_count,
            bounding_sphere: mesh.bounding_sphere,
            gpu: None,
        };
        log::debug!(
            "Assembled primitive: {} vertices, {} indices",
            prim.vertex_count,
            prim.index_count
        );

        Ok(Self {
            buffer: assembled.buffer,
            meshes: Vec::new(),
            bounding_sphere: prim.bounding_sphere,
            prim: Some(prim),
        })
    }

    /// Build a position-only primitive with one sequential index per vertex.
    pub fn from_positions(positions: &[Vec4]) -> ModelResult<Self> {
        let count = u32::try_from(positions.len())
            .map_err(|_| ModelError::corrupt("too many positions"))?;
        let indices: Vec<u32> = (0..count).collect();
        let layout = [InputElementDesc::new("POSITION", VertexFormat::Float32x4)];

        Self::from_raw_buffers(&RawMeshDesc {
            vertices: bytemuck::cast_slice(positions),
            indices: bytemuck::cast_slice(&indices),
            vertex_stride: std::mem::size_of::<Vec4>() as u32,
            vertex_count: count,
            index_count: count,
            index_format: IndexFormat::Uint32,
            input_layout: &layout,
        })
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn mesh(&self, index: usize) -> Option<MeshRef<'_>> {
        self.meshes
            .get(index)
            .map(|mesh| MeshRef::new(mesh, &self.buffer))
    }

    pub fn meshes(&self) -> impl Iterator<Item = MeshRef<'_>> {
        self.meshes
            .iter()
            .map(|mesh| MeshRef::new(mesh, &self.buffer))
    }

    /// Sphere enclosing every mesh (or the primitive).
    pub fn bounding_sphere(&self) -> BoundingSphere {
        self.bounding_sphere
    }

    pub fn prim(&self) -> Option<&Prim> {
        self.prim.as_ref()
    }

    pub fn prim_vertex_bytes(&self) -> Option<&[u8]> {
        self.prim.as_ref().map(|p| self.buffer.slice(&p.vertices))
    }

    pub fn prim_index_bytes(&self) -> Option<&[u8]> {
        self.prim.as_ref().map(|p| self.buffer.slice(&p.indices))
    }

    pub fn buffer(&self) -> &RawBuffer {
        &self.buffer
    }

    /// True once an upload has completed and GPU views are available.
    pub fn is_uploaded(&self) -> bool {
        self.meshes.iter().all(|m| m.gpu.is_some())
            && self.prim.as_ref().map_or(true, |p| p.gpu.is_some())
            && (self.prim.is_some() || !self.meshes.is_empty())
    }

    /// Destroy every GPU buffer created by a previous upload.
    pub fn release_gpu_resources<D: GpuDevice>(&mut self, device: &mut D) {
        for mesh in &mut self.meshes {
            if let Some(gpu) = mesh.gpu.take() {
                gpu.buffers().for_each(|buffer| device.destroy_buffer(buffer));
            }
        }
        if let Some(gpu) = self.prim.as_mut().and_then(|p| p.gpu.take()) {
            gpu.buffers().for_each(|buffer| device.destroy_buffer(buffer));
        }
    }

    pub(crate) fn parts_mut(&mut self) -> (&RawBuffer, &mut [Mesh], Option<&mut Prim>) {
        (&self.buffer, &mut self.meshes, self.prim.as_mut())
    }
}

/// Seed with the first sphere and merge the rest in order.
fn merged_bounds(spheres: impl IntoIterator<Item = BoundingSphere>) -> BoundingSphere {
    let mut spheres = spheres.into_iter();
    let Some(first) = spheres.next() else {
        return BoundingSphere::default();
    };
    spheres.fold(first, |acc, sphere| acc.merge(&sphere))
}
