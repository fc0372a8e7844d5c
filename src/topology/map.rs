//! `MapPolyMesh`: old <-> new index translation produced by a topology commit.
//!
//! Forward maps are indexed by *new* entity and name the old entity it was
//! carried over from (`None` for entities created by the change). Reverse maps
//! are indexed by *old* entity (`None` for removed entities). Created entities
//! may name a master old entity to take values from.

use serde::{Deserialize, Serialize};

use crate::topology::mesh::PolyMesh;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapPolyMesh {
    pub n_old_points: usize,
    pub n_old_faces: usize,
    pub n_old_cells: usize,
    /// Internal face count of the old mesh.
    pub n_old_internal_faces: usize,

    pub point_map: Vec<Option<usize>>,
    pub face_map: Vec<Option<usize>>,
    pub cell_map: Vec<Option<usize>>,

    pub reverse_point_map: Vec<Option<usize>>,
    pub reverse_face_map: Vec<Option<usize>>,
    pub reverse_cell_map: Vec<Option<usize>>,

    /// Per new entity: old entity to interpolate from when it has no direct predecessor.
    pub point_masters: Vec<Option<usize>>,
    pub face_masters: Vec<Option<usize>>,
    pub cell_masters: Vec<Option<usize>>,

    /// Per new face: orientation reversed relative to its old face (flux changes sign).
    pub flip_face_flux: Vec<bool>,

    /// Per new patch: old patch index (`None` for added patches).
    pub patch_map: Vec<Option<usize>>,

    /// New boundary faces that were internal faces of the old mesh.
    pub exposed_faces: Vec<usize>,

    /// New index of the k-th entity added by the change (`None` if dropped again).
    pub added_point_map: Vec<Option<usize>>,
    pub added_face_map: Vec<Option<usize>>,
    pub added_cell_map: Vec<Option<usize>>,
}

impl MapPolyMesh {
    /// Map of a mesh onto itself.
    pub fn identity(mesh: &PolyMesh) -> Self {
        let ident = |n: usize| (0..n).map(Some).collect::<Vec<_>>();
        Self {
            n_old_points: mesh.n_points(),
            n_old_faces: mesh.n_faces(),
            n_old_cells: mesh.n_cells(),
            n_old_internal_faces: mesh.n_internal_faces(),
            point_map: ident(mesh.n_points()),
            face_map: ident(mesh.n_faces()),
            cell_map: ident(mesh.n_cells()),
            reverse_point_map: ident(mesh.n_points()),
            reverse_face_map: ident(mesh.n_faces()),
            reverse_cell_map: ident(mesh.n_cells()),
            point_masters: vec![None; mesh.n_points()],
            face_masters: vec![None; mesh.n_faces()],
            cell_masters: vec![None; mesh.n_cells()],
            flip_face_flux: vec![false; mesh.n_faces()],
            patch_map: ident(mesh.patches().len()),
            exposed_faces: Vec::new(),
            added_point_map: Vec::new(),
            added_face_map: Vec::new(),
            added_cell_map: Vec::new(),
        }
    }

    pub fn n_points(&self) -> usize {
        self.point_map.len()
    }

    pub fn n_faces(&self) -> usize {
        self.face_map.len()
    }

    pub fn n_cells(&self) -> usize {
        self.cell_map.len()
    }

    /// Every forward map is `old == new` and nothing was added, removed or flipped.
    pub fn is_identity(&self) -> bool {
        fn ident(m: &[Option<usize>], n_old: usize) -> bool {
            m.len() == n_old && m.iter().enumerate().all(|(i, &o)| o == Some(i))
        }
        ident(&self.point_map, self.n_old_points)
            && ident(&self.face_map, self.n_old_faces)
            && ident(&self.cell_map, self.n_old_cells)
            && self.flip_face_flux.iter().all(|f| !f)
    }

    /// Old cell a new cell takes its value from: its predecessor, else its master.
    pub fn cell_source(&self, new: usize) -> Option<usize> {
        self.cell_map[new].or(self.cell_masters[new])
    }

    pub fn face_source(&self, new: usize) -> Option<usize> {
        self.face_map[new].or(self.face_masters[new])
    }

    pub fn point_source(&self, new: usize) -> Option<usize> {
        self.point_map[new].or(self.point_masters[new])
    }

    /// New index of a point as numbered while the change was recorded.
    pub fn renumber_point(&self, provisional: usize) -> Option<usize> {
        renumber(provisional, &self.reverse_point_map, &self.added_point_map)
    }

    pub fn is_exposed(&self, new_face: usize) -> bool {
        self.exposed_faces.binary_search(&new_face).is_ok()
    }
}

fn renumber(provisional: usize, reverse: &[Option<usize>], added: &[Option<usize>]) -> Option<usize> {
    match reverse.get(provisional) {
        Some(&new) => new,
        None => added.get(provisional - reverse.len()).copied().flatten(),
    }
}
