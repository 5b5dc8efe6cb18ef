//! Container loading integration tests.
//!
//! Every container is built in memory with `ContainerBuilder`, loaded through
//! the public API, and checked against the fixture data it was built from.

mod common;

use common::{
    load, push_quad_mesh, push_triangle_mesh, quad_cull_data, quad_meshlets, two_mesh_container,
    ContainerBuilder, QUAD_INDICES, QUAD_NORMALS, QUAD_VERTICES,
};
use glam::{Vec3, Vec4};
use meshlet_asset::backend::{IndexFormat, VertexFormat};
use meshlet_asset::format::{Attribute, MeshHeader};
use meshlet_asset::resources::{InputElementDesc, Meshlet, Subset};
use meshlet_asset::{BoundingSphere, Model, ModelConfig, ModelError, RawMeshDesc};
use rstest::rstest;

// ============================================================================
// Container Structure
// ============================================================================

#[test]
fn test_mesh_count_and_views_in_bounds() {
    let model = load(&two_mesh_container()).unwrap();
    assert_eq!(model.mesh_count(), 2);
    assert!(model.prim().is_none());

    let buffer_len = model.buffer().len();
    for mesh in model.meshes() {
        let views = [
            mesh.indices,
            mesh.index_subsets,
            mesh.meshlets,
            mesh.meshlet_subsets,
            mesh.unique_vertex_indices,
            mesh.primitive_indices,
            mesh.cull_data,
        ];
        for view in views.iter().chain(mesh.vertex_slots.iter().map(|s| &s.view)) {
            assert!(view.range().end <= buffer_len);
        }
    }
}

#[test]
fn test_quad_streams_match_fixture() {
    let model = load(&two_mesh_container()).unwrap();
    let quad = model.mesh(0).unwrap();

    assert_eq!(quad.index_size, 2);
    assert_eq!(quad.index_count, 6);
    assert_eq!(quad.index_format(), Some(IndexFormat::Uint16));
    assert_eq!(quad.index_bytes(), bytemuck::cast_slice::<u16, u8>(&QUAD_INDICES));
    assert_eq!(*quad.index_subsets(), [Subset { offset: 0, count: 6 }]);

    assert_eq!(quad.meshlet_count(), 2);
    assert_eq!(*quad.meshlets(), quad_meshlets());
    assert_eq!(*quad.meshlet_subsets(), [Subset { offset: 0, count: 2 }]);
    assert_eq!(*quad.cull_data(), quad_cull_data());

    assert_eq!(quad.primitive(1), Some([0, 1, 2]));
    assert_eq!(quad.primitive(2), None);
    assert_eq!(quad.vertex_index(4), Some(2));
    assert_eq!(quad.vertex_index(5), Some(3));
    assert_eq!(quad.vertex_index(6), None);
}

#[test]
fn test_shared_view_attributes_share_a_slot() {
    let model = load(&two_mesh_container()).unwrap();
    let quad = model.mesh(0).unwrap();

    // Position and texcoord read one interleaved view; normals have their own.
    assert_eq!(quad.vertex_slots.len(), 2);
    assert_eq!(quad.layout.len(), 3);
    let slot_of = |attr| quad.layout.element(attr).map(|e| e.slot);
    assert_eq!(slot_of(Attribute::Position), Some(0));
    assert_eq!(slot_of(Attribute::Normal), Some(1));
    assert_eq!(slot_of(Attribute::TexCoord), Some(0));
    assert_eq!(
        quad.layout.element(Attribute::TexCoord).map(|e| e.format),
        Some(VertexFormat::Float32x2)
    );

    assert_eq!(quad.vertex_slots[0].stride, 20);
    assert_eq!(
        quad.vertex_bytes(0).unwrap(),
        bytemuck::cast_slice::<_, u8>(&QUAD_VERTICES)
    );
    assert_eq!(
        quad.vertex_bytes(1).unwrap(),
        bytemuck::cast_slice::<_, u8>(&QUAD_NORMALS)
    );
    assert_eq!(quad.vertex_count, 4);
}

#[test]
fn test_absent_streams_are_empty() {
    let model = load(&two_mesh_container()).unwrap();
    let triangle = model.mesh(1).unwrap();

    assert_eq!(triangle.index_format(), Some(IndexFormat::Uint32));
    assert_eq!(triangle.meshlet_count(), 0);
    assert!(triangle.meshlets().is_empty());
    assert!(triangle.cull_data().is_empty());
    assert!(triangle.unique_vertex_index_bytes().is_empty());
    assert!(triangle.index_subsets().is_empty());
    assert_eq!(triangle.last_meshlet_pack_count(0, 64, 126), 0);
    assert!(triangle.layout.element(Attribute::Normal).is_none());
}

#[test]
fn test_mesh_without_indices() {
    let mut builder = ContainerBuilder::new();
    let position = builder.push_elements(&[[0.0f32, 0.0, 0.0], [2.0, 0.0, 0.0]]);
    let mut header = MeshHeader::default();
    header.attributes[Attribute::Position.index()] = Some(position);
    builder.push_mesh(header);

    let model = load(&builder.build()).unwrap();
    let mesh = model.mesh(0).unwrap();
    assert_eq!(mesh.index_size, 0);
    assert_eq!(mesh.index_count, 0);
    assert!(mesh.index_bytes().is_empty());
    assert_eq!(mesh.vertex_count, 2);
}

/// One vertex slot per distinct buffer view, numbered in attribute order.
///
/// Each entry pairs an attribute with the view group it reads from;
/// attributes in the same group share one interleaved view.
#[rstest]
#[case::position_only(&[(Attribute::Position, 0)], &[0], 1)]
#[case::separate_views(&[(Attribute::Position, 0), (Attribute::Normal, 1)], &[0, 1], 2)]
#[case::interleaved(&[(Attribute::Position, 0), (Attribute::TexCoord, 0)], &[0, 0], 1)]
#[case::gap_in_attributes(&[(Attribute::Position, 0), (Attribute::TexCoord, 1)], &[0, 1], 2)]
#[case::shared_after_new(
    &[(Attribute::Position, 0), (Attribute::Normal, 1), (Attribute::Tangent, 0)],
    &[0, 1, 0],
    2
)]
fn test_vertex_slots_follow_views(
    #[case] attributes: &[(Attribute, usize)],
    #[case] expected_slots: &[u32],
    #[case] expected_slot_count: usize,
) {
    let mut builder = ContainerBuilder::new();
    let group_count = attributes.iter().map(|&(_, group)| group + 1).max().unwrap_or(0);
    let views: Vec<u32> = (0..group_count)
        .map(|_| builder.push_view(bytemuck::cast_slice(&[[1.0f32; 6]; 3])))
        .collect();

    let mut header = MeshHeader::default();
    for &(attr, group) in attributes {
        let accessor = builder.push_accessor(views[group], 72, 24, 3);
        header.attributes[attr.index()] = Some(accessor);
    }
    builder.push_mesh(header);

    let model = load(&builder.build()).unwrap();
    let mesh = model.mesh(0).unwrap();
    assert_eq!(mesh.vertex_slots.len(), expected_slot_count);
    assert_eq!(mesh.layout.len(), attributes.len());
    for (&(attr, _), &slot) in attributes.iter().zip(expected_slots) {
        assert_eq!(mesh.layout.element(attr).map(|e| e.slot), Some(slot), "{attr:?}");
    }
    for absent in Attribute::ALL.iter().filter(|a| !attributes.iter().any(|(p, _)| p == *a)) {
        assert!(mesh.layout.element(*absent).is_none());
    }
    assert_eq!(mesh.vertex_count, 3);
}

#[test]
fn test_unaligned_typed_streams() {
    let mut builder = ContainerBuilder::new();
    let mut header = push_triangle_mesh(&mut builder, [0.0; 3]);
    // Three u16 indices leave the next stream at a 2-byte offset.
    let index_view = builder.push_view(bytemuck::cast_slice::<u16, u8>(&[0, 1, 2]));
    header.indices = Some(builder.push_accessor(index_view, 2, 2, 3));

    let meshlet_view = builder.push_packed_view(bytemuck::cast_slice(&quad_meshlets()));
    header.meshlets = Some(builder.push_accessor(meshlet_view, 16, 16, 2));
    let subsets = [Subset { offset: 0, count: 2 }];
    let subset_view = builder.push_packed_view(bytemuck::cast_slice(&subsets));
    header.meshlet_subsets = Some(builder.push_accessor(subset_view, 8, 8, 1));
    let cull_view = builder.push_packed_view(bytemuck::cast_slice(&quad_cull_data()));
    header.cull_data = Some(builder.push_accessor(cull_view, 24, 24, 2));
    builder.push_mesh(header);

    let model = load(&builder.build()).unwrap();
    let mesh = model.mesh(0).unwrap();
    assert_eq!(mesh.meshlets.offset % 4, 2);
    assert_eq!(*mesh.meshlets(), quad_meshlets());
    assert_eq!(*mesh.meshlet_subsets(), subsets);
    assert_eq!(*mesh.cull_data(), quad_cull_data());
    assert_eq!(mesh.last_meshlet_pack_count(0, 64, 126), 21);
    assert_eq!(mesh.mesh_info().meshlet_count, 2);
}

// ============================================================================
// Bounds
// ============================================================================

#[test]
fn test_bounding_spheres_contain_their_vertices() {
    let model = load(&two_mesh_container()).unwrap();

    let quad = model.mesh(0).unwrap();
    for vertex in QUAD_VERTICES {
        assert!(quad.bounding_sphere.contains_point(Vec3::from(vertex.position), 1e-4));
    }

    let triangle = model.mesh(1).unwrap();
    for p in [Vec3::new(10.0, 0.0, 0.0), Vec3::new(11.0, 0.0, 0.0), Vec3::new(10.0, 1.0, 0.0)] {
        assert!(triangle.bounding_sphere.contains_point(p, 1e-4));
    }

    let total = model.bounding_sphere();
    assert!(total.contains_sphere(&quad.bounding_sphere, 1e-3));
    assert!(total.contains_sphere(&triangle.bounding_sphere, 1e-3));
}

#[test]
fn test_mesh_without_position_gets_default_sphere() {
    let mut builder = ContainerBuilder::new();
    let normal = builder.push_elements(&QUAD_NORMALS);
    let mut header = MeshHeader::default();
    header.attributes[Attribute::Normal.index()] = Some(normal);
    builder.push_mesh(header);

    let model = load(&builder.build()).unwrap();
    assert_eq!(model.mesh(0).unwrap().bounding_sphere, BoundingSphere::default());
}

// ============================================================================
// Meshlet Queries
// ============================================================================

#[test]
fn test_last_meshlet_pack_count() {
    let mut builder = ContainerBuilder::new();
    let position = builder.push_elements(&[[0.0f32; 3]; 3]);
    let meshlets = builder.push_elements(&[
        Meshlet {
            vert_count: 64,
            vert_offset: 0,
            prim_count: 126,
            prim_offset: 0,
        },
        Meshlet {
            vert_count: 30,
            vert_offset: 64,
            prim_count: 60,
            prim_offset: 126,
        },
    ]);
    let subsets = builder.push_elements(&[
        Subset { offset: 0, count: 2 },
        Subset { offset: 0, count: 1 },
        Subset { offset: 2, count: 0 },
    ]);
    let mut header = MeshHeader {
        meshlets: Some(meshlets),
        meshlet_subsets: Some(subsets),
        ..Default::default()
    };
    header.attributes[Attribute::Position.index()] = Some(position);
    builder.push_mesh(header);

    let model = load(&builder.build()).unwrap();
    let mesh = model.mesh(0).unwrap();
    assert_eq!(mesh.last_meshlet_pack_count(0, 64, 126), 2);
    assert_eq!(mesh.last_meshlet_pack_count(1, 64, 126), 1);
    assert_eq!(mesh.last_meshlet_pack_count(2, 64, 126), 0);
    assert_eq!(mesh.last_meshlet_pack_count(3, 64, 126), 0);

    let info = mesh.mesh_info();
    assert_eq!(info.meshlet_count, 2);
    assert_eq!(info.last_meshlet_vert_count, 30);
    assert_eq!(info.last_meshlet_prim_count, 60);
}

#[rstest]
#[case::half_group(64, 32, 128, 64, 2)]
#[case::vertex_bound(30, 10, 64, 126, 2)]
#[case::primitive_bound(10, 60, 64, 126, 2)]
#[case::exact_fit(64, 126, 64, 126, 1)]
#[case::too_large(100, 10, 64, 126, 0)]
fn test_pack_count_of_single_meshlet(
    #[case] vert_count: u32,
    #[case] prim_count: u32,
    #[case] max_verts: u32,
    #[case] max_prims: u32,
    #[case] expected: u32,
) {
    let mut builder = ContainerBuilder::new();
    let position = builder.push_elements(&[[0.0f32; 3]; 3]);
    let meshlets = builder.push_elements(&[Meshlet {
        vert_count,
        vert_offset: 0,
        prim_count,
        prim_offset: 0,
    }]);
    let subsets = builder.push_elements(&[Subset { offset: 0, count: 1 }]);
    let mut header = MeshHeader {
        meshlets: Some(meshlets),
        meshlet_subsets: Some(subsets),
        ..Default::default()
    };
    header.attributes[Attribute::Position.index()] = Some(position);
    builder.push_mesh(header);

    let model = load(&builder.build()).unwrap();
    assert_eq!(
        model.mesh(0).unwrap().last_meshlet_pack_count(0, max_verts, max_prims),
        expected
    );
}

// ============================================================================
// Rejected Containers
// ============================================================================

#[test]
fn test_version_mismatch() {
    let mut builder = ContainerBuilder::new().with_version(7);
    let quad = push_quad_mesh(&mut builder);
    builder.push_mesh(quad);

    let err = load(&builder.build()).unwrap_err();
    assert!(matches!(err, ModelError::Version { found: 7, expected: 0 }));
}

#[test]
fn test_truncated_inputs() {
    let bytes = two_mesh_container();
    // Cut inside the header, inside the tables, and inside the raw buffer.
    for len in [10, 40, bytes.len() - 1] {
        let err = load(&bytes[..len]).unwrap_err();
        assert!(
            matches!(err, ModelError::Truncated { .. }),
            "length {len} gave {err:?}"
        );
    }
}

#[test]
fn test_accessor_index_out_of_range() {
    let mut builder = ContainerBuilder::new();
    let mut header = push_triangle_mesh(&mut builder, [0.0; 3]);
    header.cull_data = Some(99);
    builder.push_mesh(header);

    assert!(matches!(load(&builder.build()), Err(ModelError::Corrupt(_))));
}

#[test]
fn test_unsupported_index_size() {
    let mut builder = ContainerBuilder::new();
    let mut header = push_triangle_mesh(&mut builder, [0.0; 3]);
    let view = builder.push_view(&[0u8; 3]);
    header.indices = Some(builder.push_accessor(view, 1, 1, 3));
    builder.push_mesh(header);

    assert!(matches!(
        load(&builder.build()),
        Err(ModelError::UnsupportedFormat(_))
    ));
}

#[test]
fn test_vertex_count_past_view_end() {
    let mut builder = ContainerBuilder::new();
    let mut header = push_triangle_mesh(&mut builder, [0.0; 3]);
    // Four 12-byte vertices claimed over a view holding three.
    let view = builder.push_view(bytemuck::cast_slice(&QUAD_NORMALS[..3]));
    header.attributes[Attribute::Normal.index()] = Some(builder.push_accessor(view, 12, 12, 4));
    builder.push_mesh(header);

    assert!(matches!(load(&builder.build()), Err(ModelError::Corrupt(_))));
}

#[test]
fn test_unique_vertex_indices_past_view_end() {
    let mut builder = ContainerBuilder::new();
    let mut header = push_triangle_mesh(&mut builder, [0.0; 3]);
    // The mesh has 4-byte indices, so eight entries need 32 bytes.
    let view = builder.push_view(bytemuck::cast_slice::<u32, u8>(&[0, 1, 2]));
    header.unique_vertex_indices = Some(builder.push_accessor(view, 4, 4, 8));
    builder.push_mesh(header);

    assert!(matches!(load(&builder.build()), Err(ModelError::Corrupt(_))));
}

#[test]
fn test_buffer_size_limit() {
    let config = ModelConfig::default().with_max_buffer_size(16);
    let err = Model::from_bytes(&two_mesh_container(), &config).unwrap_err();
    assert!(matches!(err, ModelError::Corrupt(_)));
}

#[test]
fn test_load_from_file() {
    let path = std::env::temp_dir().join(format!("meshlet-asset-{}.bin", std::process::id()));
    std::fs::write(&path, two_mesh_container()).unwrap();
    let model = Model::load_from_file(&path, &ModelConfig::default());
    std::fs::remove_file(&path).unwrap();
    assert_eq!(model.unwrap().mesh_count(), 2);
}

// ============================================================================
// Raw Buffers
// ============================================================================

#[test]
fn test_raw_buffer_round_trip() {
    let vertices: [[f32; 6]; 3] = [
        [0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
        [1.0, 0.0, 0.0, 0.0, 0.0, 1.0],
        [0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
    ];
    let indices: [u16; 3] = [0, 1, 2];
    let layout = [
        InputElementDesc::new("POSITION", VertexFormat::Float32x3),
        InputElementDesc::new("NORMAL", VertexFormat::Float32x3),
        InputElementDesc::new("BLENDWEIGHT", VertexFormat::Float32x4),
    ];

    let model = Model::from_raw_buffers(&RawMeshDesc {
        vertices: bytemuck::cast_slice(&vertices),
        indices: bytemuck::cast_slice(&indices),
        vertex_stride: 24,
        vertex_count: 3,
        index_count: 3,
        index_format: IndexFormat::Uint16,
        input_layout: &layout,
    })
    .unwrap();

    assert_eq!(model.mesh_count(), 0);
    let prim = model.prim().unwrap();
    assert_eq!(prim.vertex_count, 3);
    assert_eq!(prim.index_count, 3);
    assert_eq!(prim.index_format, IndexFormat::Uint16);
    assert_eq!(prim.layout.len(), 2);
    assert_eq!(model.prim_vertex_bytes().unwrap(), bytemuck::cast_slice::<_, u8>(&vertices));
    assert_eq!(model.prim_index_bytes().unwrap(), bytemuck::cast_slice::<_, u8>(&indices));
    assert!(model
        .bounding_sphere()
        .contains_point(Vec3::new(1.0, 0.0, 0.0), 1e-4));
}

#[test]
fn test_from_positions() {
    let positions = [
        Vec4::new(-2.0, 0.0, 0.0, 1.0),
        Vec4::new(2.0, 0.0, 0.0, 1.0),
        Vec4::new(0.0, 3.0, 0.0, 1.0),
        Vec4::new(0.0, 0.0, -1.0, 1.0),
    ];
    let model = Model::from_positions(&positions).unwrap();
    let prim = model.prim().unwrap();

    assert_eq!(prim.vertex_count, 4);
    assert_eq!(prim.index_count, 4);
    assert_eq!(prim.vertex_stride, 16);
    for p in positions {
        assert!(model.bounding_sphere().contains_point(p.truncate(), 1e-4));
    }
}
