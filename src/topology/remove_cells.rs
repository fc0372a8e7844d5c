//! Remove cells and expose the faces they shared with surviving cells.

use hashbrown::HashSet;

use crate::mesh_error::MeshError;
use crate::topology::map::MapPolyMesh;
use crate::topology::mesh::{PolyMesh, reverse_face};
use crate::topology::patch::PatchKind;
use crate::topology::topo_change::{FaceEdit, TopoChange};

/// Record the removal of `cells` into `tc`. Faces between a removed and a
/// surviving cell move to `exposed_patch` (an existing or new ordinary patch)
/// with the surviving cell as owner. Faces of removed cells only are removed.
pub fn set_refinement(
    tc: &mut TopoChange<'_>,
    cells: &[usize],
    exposed_patch: &str,
) -> Result<(), MeshError> {
    let mesh = tc.mesh();
    let removed: HashSet<usize> = cells.iter().copied().collect();
    if removed.is_empty() {
        return Ok(());
    }
    let patch = match mesh.find_patch(exposed_patch) {
        Some(p) if mesh.patches()[p].is_coupled() => {
            return Err(MeshError::PatchLayout(format!(
                "cannot expose faces into coupled patch `{exposed_patch}`"
            )));
        }
        Some(p) => p,
        None => tc.add_patch(exposed_patch, PatchKind::Ordinary),
    };

    let mesh = tc.mesh();
    let mut edits = Vec::new();
    let mut dropped = Vec::new();
    for face in 0..mesh.n_faces() {
        let own = mesh.owner()[face];
        let own_gone = removed.contains(&own);
        match mesh.face_neighbour(face) {
            Some(nbr) => match (own_gone, removed.contains(&nbr)) {
                (true, true) => dropped.push(face),
                (true, false) => edits.push((
                    face,
                    FaceEdit::boundary(reverse_face(&mesh.faces()[face]), nbr, patch).flipped(true),
                )),
                (false, true) => {
                    edits.push((face, FaceEdit::boundary(mesh.faces()[face].clone(), own, patch)))
                }
                (false, false) => {}
            },
            None if own_gone => dropped.push(face),
            None => {}
        }
    }
    for (face, edit) in edits {
        tc.modify_face(face, edit);
    }
    for face in dropped {
        tc.remove_face(face);
    }
    let mut sorted: Vec<usize> = removed.into_iter().collect();
    sorted.sort_unstable();
    for cell in sorted {
        tc.remove_cell(cell);
    }
    Ok(())
}

/// Remove `cells` from `mesh`, exposing the uncovered faces as `exposed_patch`.
pub fn remove_cells(
    mesh: &PolyMesh,
    cells: &[usize],
    exposed_patch: &str,
) -> Result<(PolyMesh, MapPolyMesh), MeshError> {
    let mut tc = TopoChange::new(mesh);
    set_refinement(&mut tc, cells, exposed_patch)?;
    tc.commit()
}
