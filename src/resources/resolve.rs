//! Resolution of descriptor tables into mesh stream views
//!
//! Every accessor and buffer-view index is checked against its table and
//! every resulting byte range against the raw buffer, so the views stored in
//! a [`Mesh`] can be sliced without further checks.

use bytemuck::Pod;

use super::{CullData, Mesh, Meshlet, PackedTriangle, RawBuffer, StreamView, Subset, VertexLayout, VertexSlot};
use crate::bounds::BoundingSphere;
use crate::error::{ModelError, ModelResult};
use crate::format::{Accessor, Attribute, BufferView, MeshHeader};

/// Borrowed descriptor tables plus the buffer they describe.
pub(crate) struct Tables<'a> {
    pub accessors: &'a [Accessor],
    pub buffer_views: &'a [BufferView],
    pub buffer: &'a RawBuffer,
}

impl<'a> Tables<'a> {
    fn accessor(&self, index: u32, what: &str) -> ModelResult<&'a Accessor> {
        self.accessors.get(index as usize).ok_or_else(|| {
            ModelError::corrupt(format!(
                "{what} accessor {index} out of range ({} accessors)",
                self.accessors.len()
            ))
        })
    }

    fn buffer_view(&self, accessor: &Accessor, what: &str) -> ModelResult<&'a BufferView> {
        self.buffer_views
            .get(accessor.buffer_view as usize)
            .ok_or_else(|| {
                ModelError::corrupt(format!(
                    "{what} buffer view {} out of range ({} views)",
                    accessor.buffer_view,
                    self.buffer_views.len()
                ))
            })
    }

    /// The accessor's whole buffer view as a byte stream.
    fn whole_view(&self, index: u32, what: &str) -> ModelResult<(&'a Accessor, StreamView)> {
        let accessor = self.accessor(index, what)?;
        let view = self.buffer_view(accessor, what)?;
        let stream = StreamView::bytes(
            view.offset as usize,
            view.size as usize,
            accessor.stride,
            accessor.count,
            self.buffer.len(),
            what,
        )?;
        Ok((accessor, stream))
    }

    /// `accessor.count` elements of `T` from the start of the accessor's buffer view.
    ///
    /// The accessor's own offset is not applied.
    fn typed<T: Pod>(&self, index: Option<u32>, what: &str) -> ModelResult<StreamView> {
        let Some(index) = index else {
            return Ok(StreamView::EMPTY);
        };
        let accessor = self.accessor(index, what)?;
        let view = self.buffer_view(accessor, what)?;
        let stream = StreamView::typed::<T>(
            view.offset as usize,
            accessor.count,
            self.buffer.len(),
            what,
        )?;
        if stream.len > view.size as usize {
            return Err(ModelError::corrupt(format!(
                "{what} stream of {} bytes exceeds its {} byte buffer view",
                stream.len, view.size
            )));
        }
        Ok(stream)
    }
}

/// Reject an accessor whose `count` elements of `element_size` bytes overrun `view_len`.
fn check_fits(accessor: &Accessor, element_size: u32, view_len: usize, what: &str) -> ModelResult<()> {
    if u64::from(accessor.count) * u64::from(element_size) > view_len as u64 {
        return Err(ModelError::corrupt(format!(
            "{} {what} elements of {} bytes do not fit their {} byte buffer view",
            accessor.count, element_size, view_len
        )));
    }
    Ok(())
}

/// Resolve every mesh header against the tables.
pub(crate) fn resolve_meshes(headers: &[MeshHeader], tables: &Tables<'_>) -> ModelResult<Vec<Mesh>> {
    headers
        .iter()
        .enumerate()
        .map(|(i, header)| {
            let mesh = resolve_mesh(header, tables)?;
            log::trace!(
                "Mesh {}: {} vertices in {} slots, {} indices, {} meshlets",
                i,
                mesh.vertex_count,
                mesh.vertex_slots.len(),
                mesh.index_count,
                mesh.meshlets.count
            );
            Ok(mesh)
        })
        .collect()
}

fn resolve_mesh(header: &MeshHeader, tables: &Tables<'_>) -> ModelResult<Mesh> {
    let (indices, index_size, index_count) = match header.indices {
        Some(index) => {
            let (accessor, stream) = tables.whole_view(index, "index")?;
            if accessor.size != 2 && accessor.size != 4 {
                return Err(ModelError::UnsupportedFormat(format!(
                    "{}-byte indices",
                    accessor.size
                )));
            }
            check_fits(accessor, accessor.size, stream.len, "index")?;
            (stream, accessor.size, accessor.count)
        }
        None => (StreamView::EMPTY, 0, 0),
    };

    let index_subsets = tables.typed::<Subset>(header.index_subsets, "index subset")?;

    // Deduplicate vertex buffers by buffer view, in attribute order.
    let mut vertex_slots: Vec<VertexSlot> = Vec::new();
    let mut vertex_count = 0;
    for attr in Attribute::ALL {
        let Some(index) = header.attribute(attr) else {
            continue;
        };
        let accessor = tables.accessor(index, attr.semantic_name())?;
        let view = tables.buffer_view(accessor, attr.semantic_name())?;
        check_fits(accessor, accessor.stride, view.size as usize, attr.semantic_name())?;
        if vertex_slots
            .iter()
            .any(|slot| slot.buffer_view == accessor.buffer_view)
        {
            continue;
        }

        let (_, view) = tables.whole_view(index, attr.semantic_name())?;
        if accessor.stride == 0 {
            return Err(ModelError::corrupt(format!(
                "{} vertex stream has zero stride",
                attr.semantic_name()
            )));
        }
        // Each new slot overrides the count; streams are assumed to agree.
        vertex_count = view.len as u32 / accessor.stride;
        vertex_slots.push(VertexSlot {
            buffer_view: accessor.buffer_view,
            view,
            stride: accessor.stride,
        });
    }

    let mut layout = VertexLayout::new();
    for attr in Attribute::ALL {
        let Some(index) = header.attribute(attr) else {
            continue;
        };
        let accessor = tables.accessor(index, attr.semantic_name())?;
        let slot = vertex_slots
            .iter()
            .position(|slot| slot.buffer_view == accessor.buffer_view)
            .ok_or_else(|| ModelError::corrupt("vertex slot missing for present attribute"))?;
        layout.push(attr, attr.format(), slot as u32);
    }

    let meshlets = tables.typed::<Meshlet>(header.meshlets, "meshlet")?;
    let meshlet_subsets = tables.typed::<Subset>(header.meshlet_subsets, "meshlet subset")?;
    let primitive_indices = tables.typed::<PackedTriangle>(header.primitive_indices, "primitive index")?;
    let cull_data = tables.typed::<CullData>(header.cull_data, "cull data")?;

    let unique_vertex_indices = match header.unique_vertex_indices {
        Some(index) => {
            if index_size == 0 {
                return Err(ModelError::corrupt(
                    "unique vertex indices without an index stream to size them",
                ));
            }
            let (accessor, mut stream) = tables.whole_view(index, "unique vertex index")?;
            check_fits(accessor, index_size, stream.len, "unique vertex index")?;
            stream.stride = index_size;
            stream.count = (stream.len / index_size as usize) as u32;
            stream
        }
        None => StreamView::EMPTY,
    };

    let bounding_sphere = mesh_bounds(&layout, &vertex_slots, vertex_count, tables.buffer)?;

    Ok(Mesh {
        layout,
        vertex_slots,
        vertex_count,
        bounding_sphere,
        indices,
        index_size,
        index_count,
        index_subsets,
        meshlets,
        meshlet_subsets,
        unique_vertex_indices,
        primitive_indices,
        cull_data,
        gpu: None,
    })
}

/// Bounding sphere over a mesh's positions.
///
/// A mesh without a position attribute gets the empty sphere.
pub(crate) fn mesh_bounds(
    layout: &VertexLayout,
    slots: &[VertexSlot],
    vertex_count: u32,
    buffer: &RawBuffer,
) -> ModelResult<BoundingSphere> {
    if layout.element(Attribute::Position).is_none() {
        log::warn!("Mesh has no POSITION attribute, using an empty bounding sphere");
        return Ok(BoundingSphere::default());
    }

    let slot_index = layout.position_slot();
    let Some(slot) = slots.get(slot_index as usize) else {
        log::warn!("Position slot {} has no vertex buffer", slot_index);
        return Ok(BoundingSphere::default());
    };
    let offset = layout.position_offset(slot_index)?;

    BoundingSphere::from_strided(
        buffer.slice(&slot.view),
        offset as usize,
        slot.stride as usize,
        vertex_count as usize,
    )
}
