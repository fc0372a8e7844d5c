//! Cell subsets of a mesh.

use crate::mesh_error::MeshError;
use crate::topology::map::MapPolyMesh;
use crate::topology::mesh::PolyMesh;
use crate::topology::remove_cells::remove_cells;

/// The part of `mesh` made of the cells for which `keep` holds.
///
/// Faces between kept and dropped cells end up on `exposed_patch`, owned by
/// the kept cell. Kept cells, faces and points stay in their original
/// relative order; the returned map relates the subset to `mesh`.
pub fn subset_mesh(
    mesh: &PolyMesh,
    keep: impl Fn(usize) -> bool,
    exposed_patch: &str,
) -> Result<(PolyMesh, MapPolyMesh), MeshError> {
    let dropped: Vec<usize> = (0..mesh.n_cells()).filter(|&c| !keep(c)).collect();
    if dropped.is_empty() {
        return Ok((mesh.clone(), MapPolyMesh::identity(mesh)));
    }
    remove_cells(mesh, &dropped, exposed_patch)
}
