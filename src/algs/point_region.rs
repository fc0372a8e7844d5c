//! Local point regions: points shared by cell groups that are not connected
//! through faces around that point (for example both sides of a baffle).
//!
//! For every candidate point the cells using it are merged across internal
//! faces that also use the point, with a union-find and an explicit worklist.
//! Each resulting component is one region; region 0 is the component holding
//! the lowest cell and keeps the original point.

use std::collections::BTreeMap;

use crate::topology::mesh::PolyMesh;

/// Disjoint-set forest with path halving and union by smaller root.
#[derive(Clone, Debug)]
pub struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Merge the sets of `a` and `b`; the smaller root survives. Returns
    /// whether anything changed.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[hi] = lo;
        true
    }
}

/// A point split between more than one region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitPoint {
    pub point: usize,
    pub n_regions: usize,
    /// `(cell, region)` for every cell using the point, sorted by cell.
    pub cell_regions: Vec<(usize, usize)>,
}

impl SplitPoint {
    pub fn region_of(&self, cell: usize) -> Option<usize> {
        self.cell_regions
            .binary_search_by_key(&cell, |e| e.0)
            .ok()
            .map(|i| self.cell_regions[i].1)
    }
}

/// Region analysis of a mesh.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalPointRegion {
    /// Points with more than one region, ascending by point.
    pub split_points: Vec<SplitPoint>,
    /// For every face using a split point: region per face corner (0 elsewhere).
    pub face_regions: BTreeMap<usize, Vec<usize>>,
}

impl LocalPointRegion {
    /// Analyse every point that lies on a boundary face.
    pub fn new(mesh: &PolyMesh) -> Self {
        let mut candidate = vec![false; mesh.n_points()];
        for face in mesh.n_internal_faces()..mesh.n_faces() {
            for &p in &mesh.faces()[face] {
                candidate[p] = true;
            }
        }
        let points: Vec<usize> = (0..mesh.n_points()).filter(|&p| candidate[p]).collect();
        Self::with_candidates(mesh, &points)
    }

    /// Analyse the given candidate points only.
    pub fn with_candidates(mesh: &PolyMesh, candidates: &[usize]) -> Self {
        let point_faces = mesh.point_faces();
        let mut split_points = Vec::new();
        let mut sorted: Vec<usize> = candidates.iter().copied().filter(|&p| p < mesh.n_points()).collect();
        sorted.sort_unstable();
        sorted.dedup();

        for point in sorted {
            let faces = &point_faces[point];
            let mut cells: Vec<usize> = faces
                .iter()
                .flat_map(|&f| std::iter::once(mesh.owner()[f]).chain(mesh.face_neighbour(f)))
                .collect();
            cells.sort_unstable();
            cells.dedup();
            if cells.len() < 2 {
                continue;
            }
            let local = |c: usize| cells.binary_search(&c).unwrap_or_default();

            let mut uf = UnionFind::new(cells.len());
            let mut worklist: Vec<usize> = faces.iter().copied().filter(|&f| mesh.is_internal_face(f)).collect();
            while let Some(f) = worklist.pop() {
                uf.union(local(mesh.owner()[f]), local(mesh.neighbour()[f]));
            }

            // roots are the smallest member, so ascending roots number the regions by lowest cell
            let mut roots: Vec<usize> = (0..cells.len()).map(|i| uf.find(i)).collect();
            let mut distinct = roots.clone();
            distinct.sort_unstable();
            distinct.dedup();
            if distinct.len() < 2 {
                continue;
            }
            for r in &mut roots {
                *r = distinct.binary_search(r).unwrap_or_default();
            }
            split_points.push(SplitPoint {
                point,
                n_regions: distinct.len(),
                cell_regions: cells.iter().copied().zip(roots).collect(),
            });
        }

        let mut face_regions: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for sp in &split_points {
            for &f in &point_faces[sp.point] {
                let region = sp.region_of(mesh.owner()[f]).unwrap_or_default();
                if region == 0 {
                    continue;
                }
                let pts = &mesh.faces()[f];
                let corners = face_regions.entry(f).or_insert_with(|| vec![0; pts.len()]);
                for (k, &p) in pts.iter().enumerate() {
                    if p == sp.point {
                        corners[k] = region;
                    }
                }
            }
        }

        Self {
            split_points,
            face_regions,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.split_points.is_empty()
    }

    pub fn find(&self, point: usize) -> Option<&SplitPoint> {
        self.split_points
            .binary_search_by_key(&point, |sp| sp.point)
            .ok()
            .map(|i| &self.split_points[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::meshgen::block_mesh;
    use crate::topology::baffles::create_baffles;

    #[test]
    fn union_find_keeps_smallest_root() {
        let mut uf = UnionFind::new(5);
        assert!(uf.union(3, 4));
        assert!(uf.union(4, 1));
        assert!(!uf.union(3, 1));
        assert_eq!(uf.find(4), 1);
        assert_eq!(uf.find(0), 0);
    }

    #[test]
    fn connected_block_has_no_split_points() {
        let mesh = block_mesh([2, 2, 2], [1.0, 1.0, 1.0]).unwrap();
        assert!(LocalPointRegion::new(&mesh).is_empty());
    }

    #[test]
    fn single_baffle_splits_its_four_points() {
        let mesh = block_mesh([2, 1, 1], [2.0, 1.0, 1.0]).unwrap();
        let (baffled, _) = create_baffles(&mesh, &[0], "a", "b").unwrap();
        let regions = LocalPointRegion::new(&baffled);
        assert_eq!(regions.split_points.len(), 4);
        assert!(regions.split_points.iter().all(|sp| sp.n_regions == 2));
        // region 0 holds cell 0
        assert!(regions.split_points.iter().all(|sp| sp.region_of(0) == Some(0)));
        assert!(regions.split_points.iter().all(|sp| sp.region_of(1) == Some(1)));
    }
}
