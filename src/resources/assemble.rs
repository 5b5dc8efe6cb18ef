//! Descriptor tables synthesized from flat vertex and index buffers

use super::RawBuffer;
use crate::backend::{IndexFormat, VertexFormat};
use crate::error::{ModelError, ModelResult};
use crate::format::{Accessor, Attribute, BufferView, MeshHeader};

/// One entry of a caller-provided vertex input layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputElementDesc<'a> {
    pub semantic: &'a str,
    pub format: VertexFormat,
}

impl<'a> InputElementDesc<'a> {
    pub fn new(semantic: &'a str, format: VertexFormat) -> Self {
        Self { semantic, format }
    }
}

/// Flat, single-stream geometry supplied by the caller
#[derive(Debug, Clone, Copy)]
pub struct RawMeshDesc<'a> {
    pub vertices: &'a [u8],
    pub indices: &'a [u8],
    pub vertex_stride: u32,
    pub vertex_count: u32,
    pub index_count: u32,
    pub index_format: IndexFormat,
    pub input_layout: &'a [InputElementDesc<'a>],
}

/// Tables equivalent to a one-mesh container.
#[derive(Debug)]
pub(crate) struct AssembledTables {
    pub header: MeshHeader,
    pub accessors: Vec<Accessor>,
    pub buffer_views: Vec<BufferView>,
    pub buffer: RawBuffer,
}

const VERTEX_ACCESSOR: u32 = 0;
const INDEX_ACCESSOR: u32 = 1;

/// Lay the vertex bytes and then the index bytes into one buffer and
/// describe them with two buffer views and two accessors.
///
/// Layout entries are matched to attributes by case-insensitive semantic
/// name; unmatched entries are ignored. Every matched attribute reads the
/// single vertex accessor. Meshlet and subset streams are absent.
pub(crate) fn assemble(desc: &RawMeshDesc<'_>) -> ModelResult<AssembledTables> {
    let vertex_len = u32::try_from(desc.vertices.len())
        .map_err(|_| ModelError::corrupt("vertex buffer exceeds 4 GiB"))?;
    let index_len = u32::try_from(desc.indices.len())
        .map_err(|_| ModelError::corrupt("index buffer exceeds 4 GiB"))?;
    vertex_len
        .checked_add(index_len)
        .ok_or_else(|| ModelError::corrupt("combined buffer exceeds 4 GiB"))?;

    let mut header = MeshHeader {
        indices: Some(INDEX_ACCESSOR),
        ..Default::default()
    };
    for element in desc.input_layout {
        let Some(attr) = Attribute::from_semantic(element.semantic) else {
            log::debug!("Ignoring unknown vertex semantic {:?}", element.semantic);
            continue;
        };
        if element.format.float_size().is_none() {
            return Err(ModelError::UnsupportedFormat(format!(
                "{:?} for {}",
                element.format, element.semantic
            )));
        }
        header.attributes[attr.index()] = Some(VERTEX_ACCESSOR);
    }

    let buffer_views = vec![
        BufferView {
            offset: 0,
            size: vertex_len,
        },
        BufferView {
            offset: vertex_len,
            size: index_len,
        },
    ];

    let index_size = desc.index_format.size();
    let accessors = vec![
        Accessor {
            buffer_view: 0,
            offset: 0,
            size: vertex_len,
            stride: desc.vertex_stride,
            count: desc.vertex_count,
        },
        Accessor {
            buffer_view: 1,
            offset: 0,
            size: index_size,
            stride: index_size,
            count: desc.index_count,
        },
    ];

    let mut combined = Vec::with_capacity(desc.vertices.len() + desc.indices.len());
    combined.extend_from_slice(desc.vertices);
    combined.extend_from_slice(desc.indices);

    Ok(AssembledTables {
        header,
        accessors,
        buffer_views,
        buffer: RawBuffer::from_bytes(&combined),
    })
}
