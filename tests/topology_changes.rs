use fvmesh_distribute::algs::duplicate_points::duplicate_points;
use fvmesh_distribute::algs::meshgen::block_mesh;
use fvmesh_distribute::algs::point_region::LocalPointRegion;
use fvmesh_distribute::data::field::Field;
use fvmesh_distribute::data::field_map::{ExposedFacePolicy, MapPolicy, map_field};
use fvmesh_distribute::data::value::Dimensions;
use fvmesh_distribute::mesh_error::MeshError;
use fvmesh_distribute::topology::baffles::create_baffles;
use fvmesh_distribute::topology::remove_cells::remove_cells;
use fvmesh_distribute::topology::topo_change::TopoChange;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn removing_cells_keeps_a_consistent_mesh(mask in proptest::collection::vec(any::<bool>(), 12)) {
        let mesh = block_mesh([3, 2, 2], [3.0, 2.0, 2.0]).unwrap();
        let removed: Vec<usize> = (0..12).filter(|&c| mask[c]).collect();
        prop_assume!(!removed.is_empty() && removed.len() < 12);

        let (out, map) = remove_cells(&mesh, &removed, "exposed").unwrap();
        out.check().unwrap();
        prop_assert_eq!(out.n_cells(), 12 - removed.len());

        // maps agree in both directions
        for (new, old) in map.cell_map.iter().enumerate() {
            let old = old.unwrap();
            prop_assert!(!removed.contains(&old));
            prop_assert_eq!(map.reverse_cell_map[old], Some(new));
        }
        for &old in &removed {
            prop_assert_eq!(map.reverse_cell_map[old], None);
        }

        // one exposed face per internal face with exactly one side removed
        let cut = (0..mesh.n_internal_faces())
            .filter(|&f| removed.contains(&mesh.owner()[f]) != removed.contains(&mesh.neighbour()[f]))
            .count();
        prop_assert_eq!(map.exposed_faces.len(), cut);
        let exposed = out.find_patch("exposed").unwrap();
        prop_assert_eq!(out.patches()[exposed].size, cut);

        // cell values follow their cells, exposed faces see their owner
        let values: Vec<f64> = (0..12).map(|c| c as f64).collect();
        let t = Field::volume("T", Dimensions::DIMLESS, &mesh, values).unwrap();
        let mapped = map_field(&t, &mesh, &out, &map, &MapPolicy::default()).unwrap();
        mapped.check(&out).unwrap();
        for c in 0..out.n_cells() {
            prop_assert_eq!(mapped.values()[c], map.cell_map[c].unwrap() as f64);
        }
        let patch = &out.patches()[exposed];
        for (k, f) in patch.range().enumerate() {
            prop_assert_eq!(mapped.boundary()[exposed].values[k], mapped.values()[out.owner()[f]]);
        }
    }
}

#[test]
fn interior_cell_must_be_repatched_before_removal() {
    let mesh = block_mesh([3, 3, 3], [3.0, 3.0, 3.0]).unwrap();
    let mut tc = TopoChange::new(&mesh);
    tc.remove_cell(13);
    assert!(matches!(tc.commit(), Err(MeshError::DanglingFace { cell: 13, .. })));

    // the repatching path exposes the six faces of the hole with owner values
    let (out, map) = remove_cells(&mesh, &[13], "hole").unwrap();
    out.check().unwrap();
    assert_eq!(map.exposed_faces.len(), 6);
    let values: Vec<f64> = (0..27).map(|c| c as f64).collect();
    let t = Field::volume("T", Dimensions::DIMLESS, &mesh, values).unwrap();
    let mapped = map_field(&t, &mesh, &out, &map, &MapPolicy::default()).unwrap();
    let hole = out.find_patch("hole").unwrap();
    let patch = &out.patches()[hole];
    assert_eq!(patch.size, 6);
    for (k, f) in patch.range().enumerate() {
        assert_eq!(mapped.boundary()[hole].values[k], mapped.values()[out.owner()[f]]);
    }
}

#[test]
fn exposed_face_value_can_be_fixed() {
    let mesh = block_mesh([2, 1, 1], [2.0, 1.0, 1.0]).unwrap();
    let (out, map) = remove_cells(&mesh, &[0], "cut").unwrap();
    let t = Field::volume("T", Dimensions::DIMLESS, &mesh, vec![1.0, 2.0]).unwrap();
    let policy = MapPolicy {
        exposed_face: ExposedFacePolicy::Value(-5.0),
        ..MapPolicy::default()
    };
    let mapped = map_field(&t, &mesh, &out, &map, &policy).unwrap();
    let cut = out.find_patch("cut").unwrap();
    assert_eq!(mapped.values(), &[2.0]);
    assert_eq!(mapped.boundary()[cut].values, vec![-5.0]);
}

#[test]
fn baffled_block_splits_into_two_point_regions() {
    let mesh = block_mesh([2, 2, 1], [2.0, 2.0, 1.0]).unwrap();
    // both internal faces on the plane x = 1
    let plane: Vec<usize> = (0..mesh.n_internal_faces())
        .filter(|&f| mesh.faces()[f].iter().all(|&p| (mesh.points()[p][0] - 1.0).abs() < 1e-12))
        .collect();
    assert_eq!(plane.len(), 2);

    let (baffled, bmap) = create_baffles(&mesh, &plane, "wallA", "wallB").unwrap();
    baffled.check().unwrap();
    assert_eq!(baffled.n_internal_faces(), mesh.n_internal_faces() - 2);
    assert_eq!(baffled.n_points(), mesh.n_points());
    assert_eq!(bmap.added_face_map.len(), 2);

    let regions = LocalPointRegion::new(&baffled);
    // the 6 points of the x = 1 plane touch cells on both sides of the baffle
    assert_eq!(regions.split_points.len(), 6);
    assert!(regions.split_points.iter().all(|sp| sp.n_regions == 2));
    let (split, map, dups) = duplicate_points(&baffled, &regions).unwrap();
    split.check().unwrap();
    assert_eq!(split.n_points(), mesh.n_points() + 6);
    assert_eq!(dups.len(), 6);
    for (orig, copies) in dups.iter() {
        assert_eq!(copies.len(), 2);
        assert_eq!(copies[0], orig);
        for &c in copies {
            assert_eq!(split.points()[c], baffled.points()[orig]);
            assert_eq!(map.point_source(c), Some(orig));
        }
    }

    // a second pass finds nothing left to split
    let again = LocalPointRegion::new(&split);
    assert!(again.is_empty());
}
