//! `PolyMesh`: face-based unstructured polyhedral mesh.
//!
//! Faces are ordered point lists (right-hand rule gives the normal). The first
//! `n_internal_faces` faces have both an owner and a neighbour cell; the rest
//! are boundary faces grouped contiguously by patch, with processor patches
//! trailing all other patches. Face normals point from owner to neighbour.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::mesh_error::MeshError;
use crate::topology::patch::Patch;
use crate::topology::zones::ZoneSet;

/// 3-D coordinate.
pub type Point = [f64; 3];
/// Ordered point labels of one face.
pub type Face = Vec<usize>;

/// Reverse a face keeping its first point: `[a, b, c, d] -> [a, d, c, b]`.
///
/// This is the orientation the neighbour side of a coupled interface sees, so
/// point `i` of one side pairs with point `(n - i) % n` of the other.
pub fn reverse_face(face: &[usize]) -> Face {
    let mut out = Vec::with_capacity(face.len());
    if let Some((&first, rest)) = face.split_first() {
        out.push(first);
        out.extend(rest.iter().rev());
    }
    out
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PolyMesh {
    points: Vec<Point>,
    faces: Vec<Face>,
    owner: Vec<usize>,
    neighbour: Vec<usize>,
    patches: Vec<Patch>,
    zones: ZoneSet,
    n_cells: usize,
}

impl PolyMesh {
    /// Build a mesh from raw addressing and check its structure.
    ///
    /// `neighbour.len()` is the number of internal faces. The cell count is
    /// derived from the largest owner/neighbour label.
    pub fn new(
        points: Vec<Point>,
        faces: Vec<Face>,
        owner: Vec<usize>,
        neighbour: Vec<usize>,
        patches: Vec<Patch>,
    ) -> Result<Self, MeshError> {
        let n_cells = owner
            .iter()
            .chain(neighbour.iter())
            .copied()
            .max()
            .map_or(0, |m| m + 1);
        Self::with_cells(points, faces, owner, neighbour, patches, n_cells)
    }

    /// Like [`PolyMesh::new`] but with an explicit cell count.
    pub fn with_cells(
        points: Vec<Point>,
        faces: Vec<Face>,
        owner: Vec<usize>,
        neighbour: Vec<usize>,
        patches: Vec<Patch>,
        n_cells: usize,
    ) -> Result<Self, MeshError> {
        let mesh = Self {
            points,
            faces,
            owner,
            neighbour,
            patches,
            zones: ZoneSet::default(),
            n_cells,
        };
        mesh.check_addressing()?;
        Ok(mesh)
    }

    /// Attach zones (checked against the mesh sizes).
    pub fn with_zones(mut self, zones: ZoneSet) -> Result<Self, MeshError> {
        self.zones = zones;
        self.check_zones()?;
        Ok(self)
    }

    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    pub fn n_faces(&self) -> usize {
        self.faces.len()
    }

    pub fn n_internal_faces(&self) -> usize {
        self.neighbour.len()
    }

    pub fn n_boundary_faces(&self) -> usize {
        self.faces.len() - self.neighbour.len()
    }

    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn faces(&self) -> &[Face] {
        &self.faces
    }

    pub fn owner(&self) -> &[usize] {
        &self.owner
    }

    pub fn neighbour(&self) -> &[usize] {
        &self.neighbour
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    pub fn zones(&self) -> &ZoneSet {
        &self.zones
    }

    pub fn zones_mut(&mut self) -> &mut ZoneSet {
        &mut self.zones
    }

    pub fn is_internal_face(&self, face: usize) -> bool {
        face < self.neighbour.len()
    }

    /// Neighbour cell of an internal face.
    pub fn face_neighbour(&self, face: usize) -> Option<usize> {
        self.neighbour.get(face).copied()
    }

    /// Patch holding boundary face `face`.
    pub fn which_patch(&self, face: usize) -> Option<usize> {
        if self.is_internal_face(face) {
            return None;
        }
        self.patches
            .iter()
            .position(|p| p.size > 0 && p.range().contains(&face))
    }

    /// Patch index per boundary face (`face - n_internal_faces`).
    pub fn boundary_patch_ids(&self) -> Vec<usize> {
        let mut ids = vec![usize::MAX; self.n_boundary_faces()];
        let n_internal = self.n_internal_faces();
        for (patch_id, patch) in self.patches.iter().enumerate() {
            for face in patch.range() {
                ids[face - n_internal] = patch_id;
            }
        }
        ids
    }

    pub fn find_patch(&self, name: &str) -> Option<usize> {
        self.patches.iter().position(|p| p.name == name)
    }

    /// Face labels per cell.
    pub fn cells(&self) -> Vec<Vec<usize>> {
        let mut cells = vec![Vec::new(); self.n_cells];
        for (face, &own) in self.owner.iter().enumerate() {
            cells[own].push(face);
        }
        for (face, &nbr) in self.neighbour.iter().enumerate() {
            cells[nbr].push(face);
        }
        cells
    }

    /// Face labels using each point.
    pub fn point_faces(&self) -> Vec<Vec<usize>> {
        let mut pf = vec![Vec::new(); self.points.len()];
        for (face, pts) in self.faces.iter().enumerate() {
            for &p in pts {
                pf[p].push(face);
            }
        }
        pf
    }

    // ----- geometry --------------------------------------------------------

    /// Arithmetic mean of the face points.
    pub fn face_centre(&self, face: usize) -> Point {
        centroid(self.faces[face].iter().map(|&p| self.points[p]))
    }

    /// Area-weighted normal (magnitude = face area), fan-triangulated about the centre.
    pub fn face_area_vector(&self, face: usize) -> Point {
        let pts = &self.faces[face];
        let c = self.face_centre(face);
        let mut s = [0.0; 3];
        for i in 0..pts.len() {
            let a = sub(self.points[pts[i]], c);
            let b = sub(self.points[pts[(i + 1) % pts.len()]], c);
            let n = cross(a, b);
            for k in 0..3 {
                s[k] += 0.5 * n[k];
            }
        }
        s
    }

    /// Mean of the face centres of each cell.
    pub fn cell_centres(&self) -> Vec<Point> {
        self.cells()
            .iter()
            .map(|faces| centroid(faces.iter().map(|&f| self.face_centre(f))))
            .collect()
    }

    /// Half-space test against every face plane of a (convex) cell.
    pub fn point_in_cell(&self, p: Point, cell: usize, cell_faces: &[usize]) -> bool {
        let tol = 1e-10;
        cell_faces.iter().all(|&f| {
            let mut n = self.face_area_vector(f);
            if self.owner[f] != cell {
                n = [-n[0], -n[1], -n[2]];
            }
            let d = sub(p, self.face_centre(f));
            dot(d, n) <= tol * norm(n).max(1.0)
        })
    }

    /// Cell containing `p`; if none does (point on or just outside the
    /// boundary), the cell with the nearest centre. `None` for a mesh without cells.
    pub fn find_cell(&self, p: Point) -> Option<usize> {
        let cells = self.cells();
        if let Some(c) = (0..self.n_cells).find(|&c| self.point_in_cell(p, c, &cells[c])) {
            return Some(c);
        }
        self.cell_centres()
            .iter()
            .enumerate()
            .map(|(c, centre)| (c, norm(sub(p, *centre))))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(c, _)| c)
    }

    // ----- checks ----------------------------------------------------------

    /// Full structural check: addressing, patches, zones and closed cells.
    pub fn check(&self) -> Result<(), MeshError> {
        self.check_addressing()?;
        self.check_zones()?;
        self.check_closed()
    }

    fn check_addressing(&self) -> Result<(), MeshError> {
        if self.owner.len() != self.faces.len() {
            return Err(MeshError::AddressingSize(format!(
                "{} owners for {} faces",
                self.owner.len(),
                self.faces.len()
            )));
        }
        if self.neighbour.len() > self.faces.len() {
            return Err(MeshError::AddressingSize(format!(
                "{} neighbours for {} faces",
                self.neighbour.len(),
                self.faces.len()
            )));
        }
        let n_points = self.points.len();
        for (face, pts) in self.faces.iter().enumerate() {
            if pts.len() < 3 {
                return Err(MeshError::DegenerateFace {
                    face,
                    len: pts.len(),
                });
            }
            if let Some(&point) = pts.iter().find(|&&p| p >= n_points) {
                return Err(MeshError::PointOutOfRange {
                    face,
                    point,
                    n_points,
                });
            }
        }
        for (face, &cell) in self.owner.iter().enumerate() {
            if cell >= self.n_cells {
                return Err(MeshError::CellOutOfRange {
                    face,
                    cell,
                    n_cells: self.n_cells,
                });
            }
        }
        for (face, &cell) in self.neighbour.iter().enumerate() {
            if cell >= self.n_cells {
                return Err(MeshError::CellOutOfRange {
                    face,
                    cell,
                    n_cells: self.n_cells,
                });
            }
            if cell == self.owner[face] {
                return Err(MeshError::SelfNeighbour { face, cell });
            }
        }
        self.check_patches()
    }

    /// Patches tile the boundary faces in order; processor patches trail.
    pub fn check_patches(&self) -> Result<(), MeshError> {
        let mut next = self.n_internal_faces();
        let mut seen_processor = false;
        for (i, patch) in self.patches.iter().enumerate() {
            if patch.start != next {
                return Err(MeshError::PatchLayout(format!(
                    "patch {i} `{}` starts at face {}, expected {next}",
                    patch.name, patch.start
                )));
            }
            next = next.checked_add(patch.size).ok_or_else(|| {
                MeshError::PatchLayout(format!("patch {i} `{}` has size {}", patch.name, patch.size))
            })?;
            if let Some(partner) = patch.kind.partner_patch() {
                if partner >= self.patches.len() {
                    return Err(MeshError::PatchLayout(format!(
                        "patch {i} `{}` refers to patch {partner}, mesh has {}",
                        patch.name,
                        self.patches.len()
                    )));
                }
            }
            if patch.is_processor() {
                seen_processor = true;
            } else if seen_processor {
                return Err(MeshError::PatchLayout(format!(
                    "non-processor patch {i} `{}` follows a processor patch",
                    patch.name
                )));
            }
        }
        if next != self.faces.len() {
            return Err(MeshError::PatchLayout(format!(
                "patches cover faces up to {next}, mesh has {}",
                self.faces.len()
            )));
        }
        Ok(())
    }

    fn check_zones(&self) -> Result<(), MeshError> {
        let limits = [
            (&self.zones.cell_zones, self.n_cells, "cell"),
            (&self.zones.face_zones, self.faces.len(), "face"),
            (&self.zones.point_zones, self.points.len(), "point"),
        ];
        for (zones, limit, what) in limits {
            for zone in zones {
                if let Some(&bad) = zone.indices.iter().find(|&&i| i >= limit) {
                    return Err(MeshError::AddressingSize(format!(
                        "{what} zone `{}` holds {bad}, mesh has {limit} {what}s",
                        zone.name
                    )));
                }
                if let Some(flips) = &zone.flip_map {
                    if flips.len() != zone.indices.len() {
                        return Err(MeshError::AddressingSize(format!(
                            "face zone `{}` has {} flips for {} faces",
                            zone.name,
                            flips.len(),
                            zone.indices.len()
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Every edge of every cell must be shared by exactly two of its faces.
    pub fn check_closed(&self) -> Result<(), MeshError> {
        let cells = self.cells();
        let mut edges: HashMap<(usize, usize), usize> = HashMap::new();
        for (cell, faces) in cells.iter().enumerate() {
            edges.clear();
            for &f in faces {
                let pts = &self.faces[f];
                for i in 0..pts.len() {
                    let (a, b) = (pts[i], pts[(i + 1) % pts.len()]);
                    *edges.entry((a.min(b), a.max(b))).or_insert(0) += 1;
                }
            }
            if let Some((&(a, b), &count)) = edges.iter().find(|(_, c)| **c != 2) {
                return Err(MeshError::OpenCell { cell, a, b, count });
            }
        }
        Ok(())
    }

    /// Decompose into raw parts.
    pub fn into_parts(self) -> MeshParts {
        MeshParts {
            points: self.points,
            faces: self.faces,
            owner: self.owner,
            neighbour: self.neighbour,
            patches: self.patches,
            zones: self.zones,
            n_cells: self.n_cells,
        }
    }
}

/// Owned raw parts of a [`PolyMesh`].
#[derive(Clone, Debug, Default)]
pub struct MeshParts {
    pub points: Vec<Point>,
    pub faces: Vec<Face>,
    pub owner: Vec<usize>,
    pub neighbour: Vec<usize>,
    pub patches: Vec<Patch>,
    pub zones: ZoneSet,
    pub n_cells: usize,
}

impl MeshParts {
    pub fn build(self) -> Result<PolyMesh, MeshError> {
        PolyMesh::with_cells(
            self.points,
            self.faces,
            self.owner,
            self.neighbour,
            self.patches,
            self.n_cells,
        )?
        .with_zones(self.zones)
    }
}

pub(crate) fn centroid(pts: impl Iterator<Item = Point>) -> Point {
    let mut s = [0.0; 3];
    let mut n = 0usize;
    for p in pts {
        for k in 0..3 {
            s[k] += p[k];
        }
        n += 1;
    }
    if n > 0 {
        let inv = 1.0 / n as f64;
        for v in &mut s {
            *v *= inv;
        }
    }
    s
}

fn sub(a: Point, b: Point) -> Point {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn cross(a: Point, b: Point) -> Point {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn dot(a: Point, b: Point) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn norm(a: Point) -> f64 {
    dot(a, a).sqrt()
}
