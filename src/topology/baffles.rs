//! Zero-thickness baffles: internal faces split into two coincident boundary faces.

use crate::mesh_error::MeshError;
use crate::topology::map::MapPolyMesh;
use crate::topology::mesh::{PolyMesh, reverse_face};
use crate::topology::patch::PatchKind;
use crate::topology::topo_change::{FaceEdit, TopoChange};

/// Turn each internal face in `faces` into a boundary face of its owner on
/// `owner_patch` plus a new reversed face of its neighbour on `neighbour_patch`.
/// Patches are created as ordinary patches when missing. Points stay shared;
/// see [`crate::algs::point_region`] for splitting them.
pub fn create_baffles(
    mesh: &PolyMesh,
    faces: &[usize],
    owner_patch: &str,
    neighbour_patch: &str,
) -> Result<(PolyMesh, MapPolyMesh), MeshError> {
    let mut tc = TopoChange::new(mesh);
    let a = patch_id(&mut tc, owner_patch);
    let b = if neighbour_patch == owner_patch {
        a
    } else {
        patch_id(&mut tc, neighbour_patch)
    };

    for (i, &face) in faces.iter().enumerate() {
        let Some(nbr) = mesh.face_neighbour(face) else {
            return Err(MeshError::InvalidTopoEdit {
                action: i,
                detail: format!("face {face} is not an internal face"),
            });
        };
        let pts = &mesh.faces()[face];
        tc.modify_face(face, FaceEdit::boundary(pts.clone(), mesh.owner()[face], a));
        tc.add_face(
            FaceEdit::boundary(reverse_face(pts), nbr, b).flipped(true),
            Some(face),
        );
    }
    tc.commit()
}

fn patch_id(tc: &mut TopoChange<'_>, name: &str) -> usize {
    match tc.mesh().find_patch(name) {
        Some(p) => p,
        None => tc.add_patch(name, PatchKind::Ordinary),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::meshgen::block_mesh;

    #[test]
    fn baffle_keeps_points_shared() {
        let mesh = block_mesh([2, 1, 1], [2.0, 1.0, 1.0]).unwrap();
        let (out, map) = create_baffles(&mesh, &[0], "baffleA", "baffleB").unwrap();
        out.check().unwrap();
        assert_eq!(out.n_internal_faces(), 0);
        assert_eq!(out.n_faces(), mesh.n_faces() + 1);
        assert_eq!(out.n_points(), mesh.n_points());
        let added = map.face_map.iter().position(Option::is_none).unwrap();
        assert_eq!(map.face_masters[added], Some(0));
        assert!(map.flip_face_flux[added]);
    }

    #[test]
    fn boundary_face_cannot_become_a_baffle() {
        let mesh = block_mesh([2, 1, 1], [2.0, 1.0, 1.0]).unwrap();
        let res = create_baffles(&mesh, &[mesh.n_internal_faces()], "a", "b");
        assert!(matches!(res, Err(MeshError::InvalidTopoEdit { .. })));
    }
}
