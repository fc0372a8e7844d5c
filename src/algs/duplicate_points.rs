//! Split every multi-region point into one point per region.

use std::collections::BTreeMap;

use crate::algs::point_region::LocalPointRegion;
use crate::mesh_error::MeshError;
use crate::topology::map::MapPolyMesh;
use crate::topology::mesh::PolyMesh;
use crate::topology::topo_change::{FaceEdit, TopoChange};

/// Original point -> `[original, duplicate for region 1, ...]`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DuplicatePoints {
    duplicates: BTreeMap<usize, Vec<usize>>,
}

impl DuplicatePoints {
    /// Record the point additions and face modifications into `tc`.
    /// Indices are those of the uncommitted change until [`Self::update_mesh`].
    pub fn set_refinement(regions: &LocalPointRegion, tc: &mut TopoChange<'_>) -> Self {
        let mesh = tc.mesh();
        let mut duplicates = BTreeMap::new();
        for sp in &regions.split_points {
            let coord = mesh.points()[sp.point];
            let mut copies = Vec::with_capacity(sp.n_regions);
            copies.push(sp.point);
            for _ in 1..sp.n_regions {
                copies.push(tc.add_point(coord, Some(sp.point), None, true));
            }
            duplicates.insert(sp.point, copies);
        }

        for (&face, corners) in &regions.face_regions {
            let points = mesh.faces()[face]
                .iter()
                .zip(corners)
                .map(|(&p, &region)| match duplicates.get(&p) {
                    Some(copies) if region > 0 => copies[region],
                    _ => p,
                })
                .collect();
            let edit = match mesh.face_neighbour(face) {
                Some(nbr) => FaceEdit::internal(points, mesh.owner()[face], nbr),
                None => FaceEdit {
                    points,
                    owner: mesh.owner()[face],
                    neighbour: None,
                    patch: mesh.which_patch(face),
                    flip_flux: false,
                    zone: None,
                },
            };
            tc.modify_face(face, edit);
        }
        Self { duplicates }
    }

    /// Renumber into the committed mesh.
    pub fn update_mesh(&mut self, map: &MapPolyMesh) {
        for copies in self.duplicates.values_mut() {
            for p in copies.iter_mut() {
                if let Some(new) = map.renumber_point(*p) {
                    *p = new;
                }
            }
        }
    }

    pub fn get(&self, original: usize) -> Option<&[usize]> {
        self.duplicates.get(&original).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.duplicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.duplicates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &[usize])> {
        self.duplicates.iter().map(|(&p, c)| (p, c.as_slice()))
    }
}

/// Analyse, duplicate and commit in one go.
pub fn duplicate_points(
    mesh: &PolyMesh,
    regions: &LocalPointRegion,
) -> Result<(PolyMesh, MapPolyMesh, DuplicatePoints), MeshError> {
    let mut tc = TopoChange::new(mesh);
    let mut dups = DuplicatePoints::set_refinement(regions, &mut tc);
    let (out, map) = tc.commit()?;
    dups.update_mesh(&map);
    Ok((out, map, dups))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::meshgen::block_mesh;
    use crate::topology::baffles::create_baffles;

    fn mid_plane_faces(mesh: &PolyMesh) -> Vec<usize> {
        (0..mesh.n_internal_faces())
            .filter(|&f| mesh.faces()[f].iter().all(|&p| (mesh.points()[p][0] - 2.0).abs() < 1e-12))
            .collect()
    }

    #[test]
    fn baffle_plane_points_are_split_consistently() {
        let mesh = block_mesh([4, 2, 2], [4.0, 2.0, 2.0]).unwrap();
        let plane = mid_plane_faces(&mesh);
        assert_eq!(plane.len(), 4);
        let (baffled, _) = create_baffles(&mesh, &plane, "left", "right").unwrap();
        let regions = LocalPointRegion::new(&baffled);
        let (split, map, dups) = duplicate_points(&baffled, &regions).unwrap();
        split.check().unwrap();

        assert_eq!(dups.len(), 9);
        assert_eq!(split.n_points(), baffled.n_points() + 9);
        for (orig, copies) in dups.iter() {
            assert_eq!(copies.len(), 2);
            assert_eq!(copies[0], orig);
            assert_ne!(copies[0], copies[1]);
            assert_eq!(map.point_source(copies[1]), Some(orig));
        }

        // each side of the baffle uses only its own copy
        let left = split.find_patch("left").unwrap();
        let right = split.find_patch("right").unwrap();
        let uses = |patch: usize| {
            let mut pts: Vec<usize> = split.patches()[patch]
                .range()
                .flat_map(|f| split.faces()[f].clone())
                .collect();
            pts.sort_unstable();
            pts.dedup();
            pts
        };
        let (l, r) = (uses(left), uses(right));
        assert_eq!(l.len(), 9);
        assert_eq!(r.len(), 9);
        assert!(l.iter().all(|p| !r.contains(p)));
    }

    #[test]
    fn nothing_to_split_is_a_no_op() {
        let mesh = block_mesh([2, 2, 1], [1.0, 1.0, 1.0]).unwrap();
        let regions = LocalPointRegion::new(&mesh);
        let (out, map, dups) = duplicate_points(&mesh, &regions).unwrap();
        assert!(dups.is_empty());
        assert!(map.is_identity());
        assert_eq!(out, mesh);
    }
}
