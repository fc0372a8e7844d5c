//! Basic mesh generators: structured hex blocks, 1-D chains and a splitter
//! that decomposes a global mesh into per-rank meshes with processor patches.

use crate::mesh_error::MeshError;
use crate::topology::mesh::{Face, PolyMesh, reverse_face};
use crate::topology::patch::{CyclicTransform, Patch, PatchKind, processor_patch_name};
use crate::topology::zones::{Zone, ZoneSet};

/// Names of the six block patches, in patch order.
pub const BLOCK_PATCHES: [&str; 6] = ["xmin", "xmax", "ymin", "ymax", "zmin", "zmax"];

fn invalid_block(message: impl Into<String>) -> MeshError {
    MeshError::AddressingSize(message.into())
}

struct Block {
    n: [usize; 3],
}

impl Block {
    fn point(&self, i: usize, j: usize, k: usize) -> usize {
        i + (self.n[0] + 1) * (j + (self.n[1] + 1) * k)
    }

    fn cell(&self, i: usize, j: usize, k: usize) -> usize {
        i + self.n[0] * (j + self.n[1] * k)
    }

    /// Face at `x = i` with normal +x.
    fn x_face(&self, i: usize, j: usize, k: usize) -> Face {
        vec![
            self.point(i, j, k),
            self.point(i, j + 1, k),
            self.point(i, j + 1, k + 1),
            self.point(i, j, k + 1),
        ]
    }

    /// Face at `y = j` with normal +y.
    fn y_face(&self, i: usize, j: usize, k: usize) -> Face {
        vec![
            self.point(i, j, k),
            self.point(i, j, k + 1),
            self.point(i + 1, j, k + 1),
            self.point(i + 1, j, k),
        ]
    }

    /// Face at `z = k` with normal +z.
    fn z_face(&self, i: usize, j: usize, k: usize) -> Face {
        vec![
            self.point(i, j, k),
            self.point(i + 1, j, k),
            self.point(i + 1, j + 1, k),
            self.point(i, j + 1, k),
        ]
    }
}

/// Structured `n[0] x n[1] x n[2]` hex block spanning `[0, size]` with the
/// six patches of [`BLOCK_PATCHES`]. Internal faces are upper-triangular.
pub fn block_mesh(n: [usize; 3], size: [f64; 3]) -> Result<PolyMesh, MeshError> {
    let kinds = std::array::from_fn(|_| PatchKind::Ordinary);
    build_block(n, size, kinds)
}

/// Like [`block_mesh`] but `xmin`/`xmax` form a translational cyclic pair.
pub fn cyclic_block_mesh(n: [usize; 3], size: [f64; 3]) -> Result<PolyMesh, MeshError> {
    let mut kinds: [PatchKind; 6] = std::array::from_fn(|_| PatchKind::Ordinary);
    kinds[0] = PatchKind::Cyclic {
        neighbour_patch: 1,
        transform: CyclicTransform::Translational([size[0], 0.0, 0.0]),
    };
    kinds[1] = PatchKind::Cyclic {
        neighbour_patch: 0,
        transform: CyclicTransform::Translational([-size[0], 0.0, 0.0]),
    };
    build_block(n, size, kinds)
}

/// `n_cells` hexes in a row along x.
pub fn chain_mesh(n_cells: usize, length: f64) -> Result<PolyMesh, MeshError> {
    block_mesh([n_cells, 1, 1], [length, 1.0, 1.0])
}

fn build_block(n: [usize; 3], size: [f64; 3], kinds: [PatchKind; 6]) -> Result<PolyMesh, MeshError> {
    if n.contains(&0) {
        return Err(invalid_block(format!("block divisions {n:?} must be non-zero")));
    }
    if size.iter().any(|&s| !(s > 0.0)) {
        return Err(invalid_block(format!("block size {size:?} must be positive")));
    }
    let b = Block { n };
    let [nx, ny, nz] = n;

    let mut points = Vec::with_capacity((nx + 1) * (ny + 1) * (nz + 1));
    for k in 0..=nz {
        for j in 0..=ny {
            for i in 0..=nx {
                points.push([
                    size[0] * i as f64 / nx as f64,
                    size[1] * j as f64 / ny as f64,
                    size[2] * k as f64 / nz as f64,
                ]);
            }
        }
    }

    let mut faces = Vec::new();
    let mut owner = Vec::new();
    let mut neighbour = Vec::new();
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let c = b.cell(i, j, k);
                if i + 1 < nx {
                    faces.push(b.x_face(i + 1, j, k));
                    owner.push(c);
                    neighbour.push(b.cell(i + 1, j, k));
                }
                if j + 1 < ny {
                    faces.push(b.y_face(i, j + 1, k));
                    owner.push(c);
                    neighbour.push(b.cell(i, j + 1, k));
                }
                if k + 1 < nz {
                    faces.push(b.z_face(i, j, k + 1));
                    owner.push(c);
                    neighbour.push(b.cell(i, j, k + 1));
                }
            }
        }
    }

    let mut patches = Vec::with_capacity(6);
    let mut push_patch = |faces: &mut Vec<Face>, owner: &mut Vec<usize>, id: usize, list: Vec<(Face, usize)>| {
        let start = faces.len();
        let size = list.len();
        for (f, c) in list {
            faces.push(f);
            owner.push(c);
        }
        patches.push(Patch::new(BLOCK_PATCHES[id], kinds[id].clone(), start, size));
    };

    let mut xmin = Vec::new();
    let mut xmax = Vec::new();
    for k in 0..nz {
        for j in 0..ny {
            xmin.push((reverse_face(&b.x_face(0, j, k)), b.cell(0, j, k)));
            xmax.push((b.x_face(nx, j, k), b.cell(nx - 1, j, k)));
        }
    }
    let mut ymin = Vec::new();
    let mut ymax = Vec::new();
    for k in 0..nz {
        for i in 0..nx {
            ymin.push((reverse_face(&b.y_face(i, 0, k)), b.cell(i, 0, k)));
            ymax.push((b.y_face(i, ny, k), b.cell(i, ny - 1, k)));
        }
    }
    let mut zmin = Vec::new();
    let mut zmax = Vec::new();
    for j in 0..ny {
        for i in 0..nx {
            zmin.push((reverse_face(&b.z_face(i, j, 0)), b.cell(i, j, 0)));
            zmax.push((b.z_face(i, j, nz), b.cell(i, j, nz - 1)));
        }
    }
    for (id, list) in [xmin, xmax, ymin, ymax, zmin, zmax].into_iter().enumerate() {
        push_patch(&mut faces, &mut owner, id, list);
    }

    PolyMesh::with_cells(points, faces, owner, neighbour, patches, nx * ny * nz)
}

/// One rank's share of a decomposed mesh.
#[derive(Clone, Debug)]
pub struct Decomposed {
    pub mesh: PolyMesh,
    /// Global cell per local cell.
    pub cell_ids: Vec<usize>,
    /// Global face per local face.
    pub face_ids: Vec<usize>,
    /// Global point per local point.
    pub point_ids: Vec<usize>,
}

/// Split `global` into `n_ranks` meshes following `cell_rank`.
///
/// Faces cut by the split become processor patches, oriented so the local
/// cell owns them. Cyclic faces whose partner lands on another rank become
/// processor patches referring to their cyclic patch. Ranks without cells get
/// an empty mesh that still carries every non-processor patch.
pub fn decompose(global: &PolyMesh, cell_rank: &[usize], n_ranks: usize) -> Result<Vec<Decomposed>, MeshError> {
    if cell_rank.len() != global.n_cells() {
        return Err(MeshError::DestinationSize {
            expected: global.n_cells(),
            got: cell_rank.len(),
        });
    }
    if let Some((cell, &rank)) = cell_rank.iter().enumerate().find(|(_, r)| **r >= n_ranks) {
        return Err(MeshError::InvalidRank {
            cell,
            rank,
            size: n_ranks,
        });
    }
    (0..n_ranks)
        .map(|rank| decompose_one(global, cell_rank, rank))
        .collect()
}

/// Local boundary face before patch assembly.
struct CutFace {
    /// Target patch: `Ok(non-processor patch)` or `Err((neighbour rank, referred patch))`.
    target: Result<usize, (usize, Option<usize>)>,
    key: usize,
    global: usize,
    points: Face,
    owner: usize,
}

fn decompose_one(global: &PolyMesh, cell_rank: &[usize], rank: usize) -> Result<Decomposed, MeshError> {
    let cell_ids: Vec<usize> = (0..global.n_cells()).filter(|&c| cell_rank[c] == rank).collect();
    let mut local_cell = vec![usize::MAX; global.n_cells()];
    for (l, &g) in cell_ids.iter().enumerate() {
        local_cell[g] = l;
    }

    let mut internal: Vec<(usize, Face, usize, usize)> = Vec::new();
    let mut boundary: Vec<CutFace> = Vec::new();
    for f in 0..global.n_internal_faces() {
        let own = global.owner()[f];
        let nbr = global.neighbour()[f];
        let (ro, rn) = (cell_rank[own], cell_rank[nbr]);
        let pts = &global.faces()[f];
        if ro == rank && rn == rank {
            internal.push((f, pts.clone(), local_cell[own], local_cell[nbr]));
        } else if ro == rank {
            boundary.push(CutFace {
                target: Err((rn, None)),
                key: f,
                global: f,
                points: pts.clone(),
                owner: local_cell[own],
            });
        } else if rn == rank {
            boundary.push(CutFace {
                target: Err((ro, None)),
                key: f,
                global: f,
                points: reverse_face(pts),
                owner: local_cell[nbr],
            });
        }
    }
    for (patch_id, patch) in global.patches().iter().enumerate() {
        for f in patch.range() {
            let own = global.owner()[f];
            if cell_rank[own] != rank {
                continue;
            }
            let (target, key) = match &patch.kind {
                PatchKind::Cyclic { neighbour_patch, .. } => {
                    let partner = global.patches()[*neighbour_patch].start + (f - patch.start);
                    let partner_rank = cell_rank[global.owner()[partner]];
                    if partner_rank == rank {
                        (Ok(patch_id), f)
                    } else {
                        (Err((partner_rank, Some(patch_id))), f.min(partner))
                    }
                }
                PatchKind::Processor { .. } => {
                    return Err(MeshError::PatchLayout(format!(
                        "cannot decompose a mesh that already has processor patch `{}`",
                        patch.name
                    )));
                }
                _ => (Ok(patch_id), f),
            };
            boundary.push(CutFace {
                target,
                key,
                global: f,
                points: global.faces()[f].clone(),
                owner: local_cell[own],
            });
        }
    }

    // patch table: every non-processor patch, then processor patches by (neighbour, referred)
    let mut proc_keys: Vec<(usize, Option<usize>)> = boundary.iter().filter_map(|b| b.target.err()).collect();
    proc_keys.sort_unstable();
    proc_keys.dedup();
    let n_plain = global.patches().len();
    boundary.sort_by_key(|b| {
        let bucket = match b.target {
            Ok(p) => p,
            Err(k) => n_plain + proc_keys.binary_search(&k).unwrap_or_default(),
        };
        (bucket, b.key)
    });

    // points in ascending global order
    let mut used = vec![false; global.n_points()];
    for pts in internal.iter().map(|i| &i.1).chain(boundary.iter().map(|b| &b.points)) {
        for &p in pts {
            used[p] = true;
        }
    }
    let point_ids: Vec<usize> = (0..global.n_points()).filter(|&p| used[p]).collect();
    let mut local_point = vec![usize::MAX; global.n_points()];
    for (l, &g) in point_ids.iter().enumerate() {
        local_point[g] = l;
    }
    let renumber = |pts: &Face| pts.iter().map(|&p| local_point[p]).collect::<Face>();

    let mut faces = Vec::with_capacity(internal.len() + boundary.len());
    let mut owner = Vec::with_capacity(faces.capacity());
    let mut neighbour = Vec::with_capacity(internal.len());
    let mut face_ids = Vec::with_capacity(faces.capacity());
    for (g, pts, o, n) in &internal {
        faces.push(renumber(pts));
        owner.push(*o);
        neighbour.push(*n);
        face_ids.push(*g);
    }
    let mut sizes = vec![0usize; n_plain + proc_keys.len()];
    for b in &boundary {
        faces.push(renumber(&b.points));
        owner.push(b.owner);
        face_ids.push(b.global);
        let bucket = match b.target {
            Ok(p) => p,
            Err(k) => n_plain + proc_keys.binary_search(&k).unwrap_or_default(),
        };
        sizes[bucket] += 1;
    }

    let mut patches = Vec::with_capacity(sizes.len());
    let mut start = neighbour.len();
    for (i, patch) in global.patches().iter().enumerate() {
        patches.push(Patch::new(patch.name.clone(), patch.kind.clone(), start, sizes[i]));
        start += sizes[i];
    }
    for (k, &(nbr, referred)) in proc_keys.iter().enumerate() {
        let through = referred.map(|p| global.patches()[p].name.as_str());
        let size = sizes[n_plain + k];
        patches.push(Patch::new(
            processor_patch_name(rank, nbr, through),
            PatchKind::Processor {
                my_proc: rank,
                neighb_proc: nbr,
                referred_patch: referred,
            },
            start,
            size,
        ));
        start += size;
    }

    let points = point_ids.iter().map(|&p| global.points()[p]).collect();
    let mesh = PolyMesh::with_cells(points, faces, owner, neighbour, patches, cell_ids.len())?;

    let mut local_face = vec![None; global.n_faces()];
    for (l, &g) in face_ids.iter().enumerate() {
        local_face[g] = Some(l);
    }
    let gz = global.zones();
    let zones = ZoneSet {
        cell_zones: gz
            .cell_zones
            .iter()
            .map(|z| z.renumbered(|c| (cell_rank[c] == rank).then(|| local_cell[c])))
            .collect(),
        face_zones: gz
            .face_zones
            .iter()
            .map(|z| z.renumbered(|f| local_face[f]))
            .collect::<Vec<Zone>>(),
        point_zones: gz
            .point_zones
            .iter()
            .map(|z| z.renumbered(|p| used[p].then(|| local_point[p])))
            .collect(),
    };
    let mesh = mesh.with_zones(zones)?;

    Ok(Decomposed {
        mesh,
        cell_ids,
        face_ids,
        point_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_counts_and_closedness() {
        let mesh = block_mesh([3, 2, 2], [3.0, 2.0, 2.0]).unwrap();
        assert_eq!(mesh.n_cells(), 12);
        assert_eq!(mesh.n_points(), 4 * 3 * 3);
        // internal: x 2*2*2 + y 3*1*2 + z 3*2*1
        assert_eq!(mesh.n_internal_faces(), 8 + 6 + 6);
        assert_eq!(mesh.n_boundary_faces(), 2 * (4 + 6 + 6));
        mesh.check().unwrap();
    }

    #[test]
    fn zero_divisions_rejected() {
        assert!(block_mesh([0, 1, 1], [1.0, 1.0, 1.0]).is_err());
    }

    #[test]
    fn decompose_chain_in_two() {
        let global = chain_mesh(4, 4.0).unwrap();
        let parts = decompose(&global, &[0, 0, 1, 1], 2).unwrap();
        for (rank, part) in parts.iter().enumerate() {
            part.mesh.check().unwrap();
            assert_eq!(part.mesh.n_cells(), 2);
            let proc = part.mesh.patches().last().unwrap();
            assert_eq!(proc.neighb_proc(), Some(1 - rank));
            assert_eq!(proc.size, 1);
        }
        // the cut face is reversed on the neighbour side, first point kept
        let a = &parts[0].mesh;
        let b = &parts[1].mesh;
        let fa = &a.faces()[a.patches().last().unwrap().start];
        let fb = &b.faces()[b.patches().last().unwrap().start];
        let ga: Vec<usize> = fa.iter().map(|&p| parts[0].point_ids[p]).collect();
        let gb: Vec<usize> = fb.iter().map(|&p| parts[1].point_ids[p]).collect();
        assert_eq!(gb, reverse_face(&ga));
    }

    #[test]
    fn split_cyclic_becomes_processor_cyclic() {
        let global = cyclic_block_mesh([2, 1, 1], [2.0, 1.0, 1.0]).unwrap();
        let parts = decompose(&global, &[0, 1], 2).unwrap();
        let names: Vec<&str> = parts[0].mesh.patches().iter().map(|p| p.name.as_str()).collect();
        assert!(names.contains(&"procBoundary0to1"));
        assert!(names.contains(&"procBoundary0to1throughxmin"));
        parts[0].mesh.check().unwrap();
    }

    #[test]
    fn empty_rank_keeps_plain_patches() {
        let global = chain_mesh(3, 3.0).unwrap();
        let parts = decompose(&global, &[0, 0, 0], 2).unwrap();
        let empty = &parts[1].mesh;
        assert_eq!(empty.n_cells(), 0);
        assert_eq!(empty.patches().len(), 6);
        assert!(empty.patches().iter().all(|p| p.size == 0));
    }
}
