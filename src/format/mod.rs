//! On-disk descriptor records for the meshlet mesh container
//!
//! All records are fixed-size, native-endian `u32` structs read with
//! `bytemuck`. Table entries refer to each other by index: a mesh header
//! names accessors, an accessor names a buffer view, a buffer view names a
//! byte range in the raw buffer.

mod reader;

pub use reader::*;

use crate::backend::VertexFormat;
use crate::error::{ModelError, ModelResult};
use bytemuck::{Pod, Zeroable};

/// Four-character code at the start of every container, as a multi-character constant.
pub const PROLOG: u32 = u32::from_be_bytes(*b"MSHL");

/// The only container version this loader understands.
pub const CURRENT_VERSION: u32 = 0;

/// Serialized marker for an absent accessor reference.
pub const ABSENT_INDEX: u32 = u32::MAX;

/// Vertex attribute taxonomy, in mesh-header slot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Position,
    Normal,
    TexCoord,
    Tangent,
    Bitangent,
}

impl Attribute {
    pub const COUNT: usize = 5;

    pub const ALL: [Attribute; Self::COUNT] = [
        Attribute::Position,
        Attribute::Normal,
        Attribute::TexCoord,
        Attribute::Tangent,
        Attribute::Bitangent,
    ];

    pub fn semantic_name(self) -> &'static str {
        match self {
            Attribute::Position => "POSITION",
            Attribute::Normal => "NORMAL",
            Attribute::TexCoord => "TEXCOORD",
            Attribute::Tangent => "TANGENT",
            Attribute::Bitangent => "BITANGENT",
        }
    }

    /// Element format used when the attribute comes from a container.
    pub fn format(self) -> VertexFormat {
        match self {
            Attribute::TexCoord => VertexFormat::Float32x2,
            _ => VertexFormat::Float32x3,
        }
    }

    /// Case-insensitive lookup by semantic name.
    pub fn from_semantic(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|attr| attr.semantic_name().eq_ignore_ascii_case(name))
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Container file header
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct FileHeader {
    pub prolog: u32,
    pub version: u32,
    pub mesh_count: u32,
    pub accessor_count: u32,
    pub buffer_view_count: u32,
    pub buffer_size: u32,
}

/// Serialized mesh header; every field is an accessor index or [`ABSENT_INDEX`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct MeshHeaderRecord {
    pub indices: u32,
    pub index_subsets: u32,
    pub attributes: [u32; Attribute::COUNT],
    pub meshlets: u32,
    pub meshlet_subsets: u32,
    pub unique_vertex_indices: u32,
    pub primitive_indices: u32,
    pub cull_data: u32,
}

/// A contiguous byte range of the raw buffer
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct BufferView {
    pub offset: u32,
    pub size: u32,
}

/// Typed interpretation of a buffer view
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct Accessor {
    pub buffer_view: u32,
    pub offset: u32,
    pub size: u32,
    pub stride: u32,
    pub count: u32,
}

/// In-memory mesh header with explicit absence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeshHeader {
    pub indices: Option<u32>,
    pub index_subsets: Option<u32>,
    pub attributes: [Option<u32>; Attribute::COUNT],
    pub meshlets: Option<u32>,
    pub meshlet_subsets: Option<u32>,
    pub unique_vertex_indices: Option<u32>,
    pub primitive_indices: Option<u32>,
    pub cull_data: Option<u32>,
}

impl MeshHeader {
    /// Convert a serialized record, rejecting indices that are neither valid nor the absent marker.
    pub fn from_record(record: &MeshHeaderRecord, accessor_count: u32) -> ModelResult<Self> {
        let field = |name: &str, raw: u32| -> ModelResult<Option<u32>> {
            match raw {
                ABSENT_INDEX => Ok(None),
                index if index < accessor_count => Ok(Some(index)),
                index => Err(ModelError::corrupt(format!(
                    "{name} accessor index {index} out of range ({accessor_count} accessors)"
                ))),
            }
        };

        let mut attributes = [None; Attribute::COUNT];
        for attr in Attribute::ALL {
            attributes[attr.index()] =
                field(attr.semantic_name(), record.attributes[attr.index()])?;
        }

        Ok(Self {
            indices: field("index", record.indices)?,
            index_subsets: field("index subset", record.index_subsets)?,
            attributes,
            meshlets: field("meshlet", record.meshlets)?,
            meshlet_subsets: field("meshlet subset", record.meshlet_subsets)?,
            unique_vertex_indices: field("unique vertex index", record.unique_vertex_indices)?,
            primitive_indices: field("primitive index", record.primitive_indices)?,
            cull_data: field("cull data", record.cull_data)?,
        })
    }

    pub fn to_record(&self) -> MeshHeaderRecord {
        let raw = |index: Option<u32>| index.unwrap_or(ABSENT_INDEX);
        MeshHeaderRecord {
            indices: raw(self.indices),
            index_subsets: raw(self.index_subsets),
            attributes: self.attributes.map(raw),
            meshlets: raw(self.meshlets),
            meshlet_subsets: raw(self.meshlet_subsets),
            unique_vertex_indices: raw(self.unique_vertex_indices),
            primitive_indices: raw(self.primitive_indices),
            cull_data: raw(self.cull_data),
        }
    }

    pub fn attribute(&self, attr: Attribute) -> Option<u32> {
        self.attributes[attr.index()]
    }
}
