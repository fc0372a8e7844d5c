//! Stitching received mesh pieces into one local mesh.
//!
//! Cells are concatenated by ascending source rank. Points sharing a global
//! key become one point. Boundary faces are sorted out by their descriptors:
//!
//! | origin patch | cell across   | becomes                              |
//! |--------------|---------------|--------------------------------------|
//! | none         | on this rank  | internal face (the two copies merge) |
//! | none         | rank `r`      | processor patch to `r`               |
//! | `c`          | none          | patch `c`                            |
//! | `c`          | on this rank  | cyclic patch `c`                     |
//! | `c`          | rank `r`      | processor patch to `r` through `c`   |
//!
//! Coupled faces are ordered by key on every rank, so both sides of a
//! processor or cyclic interface list their faces in the same order.

use std::collections::BTreeMap;

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use log::debug;

use crate::algs::coupling::GlobalKey;
use crate::algs::transfer::{FaceDescriptor, MeshPiece};
use crate::data::map_distribute::MapDistribute;
use crate::mesh_error::MeshError;
use crate::topology::mesh::{Face, MeshParts, Point, PolyMesh};
use crate::topology::patch::{Patch, PatchKind, processor_patch_name};
use crate::topology::zones::{Zone, ZoneKind, ZoneSet};

/// The stitched mesh and, per source rank, where each entity of its piece
/// ended up. The `sub_map`s of the returned maps are left empty; they belong
/// to the senders.
#[derive(Clone, Debug)]
pub struct Stitched {
    pub mesh: PolyMesh,
    pub cells: MapDistribute,
    pub faces: MapDistribute,
    pub points: MapDistribute,
    /// Per new patch: the non-processor patch it continues.
    pub patch_origin: Vec<Option<usize>>,
    /// Per source rank and piece face: the new face, also for the dropped
    /// copy of a merged face.
    pub face_targets: Vec<Vec<Option<usize>>>,
    /// Per source rank and piece point: the new point, also for duplicates.
    pub point_targets: Vec<Vec<usize>>,
}

#[derive(Clone, Debug)]
struct NewFace {
    points: Face,
    owner: usize,
    neighbour: Option<usize>,
    src: usize,
    face: usize,
    key: GlobalKey,
    flipped: bool,
    /// Rank and face the face started from.
    origin: (usize, usize),
}

/// Where a boundary face goes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Slot {
    Patch(usize),
    Processor { nbr: usize, referred: Option<usize> },
}

fn empty_construct(n_procs: usize) -> MapDistribute {
    MapDistribute {
        construct_size: 0,
        sub_map: vec![Vec::new(); n_procs],
        construct_map: vec![Vec::new(); n_procs],
        construct_flip: vec![Vec::new(); n_procs],
    }
}

fn slot_for(me: usize, d: &FaceDescriptor, n_plain: usize) -> Result<Option<Slot>, MeshError> {
    if let Some(c) = d.origin_patch {
        if c >= n_plain {
            return Err(MeshError::PatchMismatch {
                rank: d.origin_proc,
                detail: format!("face {} refers to patch {c}, only {n_plain} non-processor patches", d.origin_face),
            });
        }
    }
    Ok(match (d.origin_patch, d.nbr_dest) {
        (None, Some(r)) if r == me => None,
        (None, Some(r)) => Some(Slot::Processor { nbr: r, referred: None }),
        (Some(c), None) => Some(Slot::Patch(c)),
        (Some(c), Some(r)) if r == me => Some(Slot::Patch(c)),
        (Some(c), Some(r)) => Some(Slot::Processor { nbr: r, referred: Some(c) }),
        (None, None) => {
            return Err(MeshError::UnmatchedFace {
                origin_proc: d.origin_proc,
                origin_face: d.origin_face,
                detail: "boundary face with neither a patch nor a neighbour".into(),
            });
        }
    })
}

/// Stitch the pieces received by rank `me` (indexed by source rank).
///
/// `plain_patches` is the agreed non-processor patch table and `own_zones`
/// the zones of this rank's current mesh; zones keep their names and come
/// first in the result, followed by zones only the pieces know.
pub fn stitch(
    me: usize,
    plain_patches: &[Patch],
    own_zones: &ZoneSet,
    pieces: &[Option<MeshPiece>],
) -> Result<Stitched, MeshError> {
    let n_procs = pieces.len();
    let n_plain = plain_patches.len();

    // cells
    let mut cell_offset = vec![0usize; n_procs];
    let mut cells = empty_construct(n_procs);
    let mut n_cells = 0;
    for (src, piece) in pieces.iter().enumerate() {
        cell_offset[src] = n_cells;
        if let Some(piece) = piece {
            let n = piece.mesh.n_cells();
            cells.construct_map[src] = (n_cells..n_cells + n).map(Some).collect();
            n_cells += n;
        }
    }
    cells.construct_size = n_cells;

    // points: one per key, first occurrence wins
    let mut points: Vec<Point> = Vec::new();
    let mut by_key: HashMap<GlobalKey, usize> = HashMap::new();
    let mut point_index: Vec<Vec<usize>> = vec![Vec::new(); n_procs];
    let mut point_construct = empty_construct(n_procs);
    for (src, piece) in pieces.iter().enumerate() {
        let Some(piece) = piece else { continue };
        let (index, slots): (Vec<usize>, Vec<Option<usize>>) = piece
            .point_keys
            .iter()
            .zip(piece.mesh.points())
            .map(|(key, x)| match by_key.get(key) {
                Some(&p) => (p, None),
                None => {
                    let p = points.len();
                    points.push(*x);
                    by_key.insert(*key, p);
                    (p, Some(p))
                }
            })
            .unzip();
        point_index[src] = index;
        point_construct.construct_map[src] = slots;
    }
    point_construct.construct_size = points.len();

    // faces
    let mut internal: Vec<NewFace> = Vec::new();
    let mut boundary: BTreeMap<Slot, Vec<NewFace>> = (0..n_plain).map(|c| (Slot::Patch(c), Vec::new())).collect();
    let mut halves: HashMap<GlobalKey, Vec<NewFace>> = HashMap::new();
    for (src, piece) in pieces.iter().enumerate() {
        let Some(piece) = piece else { continue };
        let mesh = &piece.mesh;
        let map_face = |f: usize| -> Face { mesh.faces()[f].iter().map(|&p| point_index[src][p]).collect() };
        for f in 0..mesh.n_internal_faces() {
            internal.push(NewFace {
                points: map_face(f),
                owner: cell_offset[src] + mesh.owner()[f],
                neighbour: Some(cell_offset[src] + mesh.neighbour()[f]),
                src,
                face: f,
                key: [src as u64, f as u64],
                flipped: false,
                origin: (src, f),
            });
        }
        for (k, d) in piece.faces.iter().enumerate() {
            let f = mesh.n_internal_faces() + k;
            let face = NewFace {
                points: map_face(f),
                owner: cell_offset[src] + mesh.owner()[f],
                neighbour: None,
                src,
                face: f,
                key: d.key,
                flipped: d.flipped,
                origin: (d.origin_proc, d.origin_face),
            };
            match slot_for(me, d, n_plain)? {
                None => halves.entry(d.key).or_default().push(face),
                Some(slot) => boundary.entry(slot).or_default().push(face),
            }
        }
    }

    let mut face_construct = empty_construct(n_procs);
    for (src, piece) in pieces.iter().enumerate() {
        if let Some(piece) = piece {
            face_construct.construct_map[src] = vec![None; piece.mesh.n_faces()];
            face_construct.construct_flip[src] = vec![false; piece.mesh.n_faces()];
        }
    }

    // merge the two copies of every face whose cells both land here
    let mut dropped = Vec::new();
    for key in halves.keys().copied().sorted() {
        let copies = &halves[&key];
        let [a, b] = copies.as_slice() else {
            let (origin_proc, origin_face) = copies[0].origin;
            return Err(MeshError::UnmatchedFace {
                origin_proc,
                origin_face,
                detail: format!("{} copies of an interface face arrived on rank {me}", copies.len()),
            });
        };
        let (keep, other) = if a.owner < b.owner { (a, b) } else { (b, a) };
        internal.push(NewFace {
            neighbour: Some(other.owner),
            ..keep.clone()
        });
        dropped.push(((other.src, other.face), (keep.src, keep.face)));
    }

    internal.sort_by_key(|f| (f.owner, f.neighbour, f.src, f.face));
    let n_internal = internal.len();
    let mut faces: Vec<NewFace> = internal;
    let mut patches: Vec<Patch> = Vec::with_capacity(boundary.len());
    let mut patch_origin = Vec::with_capacity(boundary.len());
    for (slot, mut list) in boundary {
        list.sort_by_key(|f| (f.key, f.src, f.face));
        let start = faces.len();
        let size = list.len();
        faces.extend(list);
        match slot {
            Slot::Patch(c) => {
                let p = &plain_patches[c];
                patches.push(Patch::new(p.name.clone(), p.kind.clone(), start, size));
                patch_origin.push(Some(c));
            }
            Slot::Processor { nbr, referred } => {
                let through = referred.map(|c| plain_patches[c].name.as_str());
                patches.push(Patch::new(
                    processor_patch_name(me, nbr, through),
                    PatchKind::Processor {
                        my_proc: me,
                        neighb_proc: nbr,
                        referred_patch: referred,
                    },
                    start,
                    size,
                ));
                patch_origin.push(None);
            }
        }
    }
    for (new, f) in faces.iter().enumerate() {
        face_construct.construct_map[f.src][f.face] = Some(new);
        face_construct.construct_flip[f.src][f.face] = f.flipped;
    }
    face_construct.construct_size = faces.len();
    let mut face_targets = face_construct.construct_map.clone();
    let reversed: HashSet<(usize, usize)> = dropped.iter().map(|(d, _)| *d).collect();
    for ((src, face), (keep_src, keep_face)) in dropped {
        face_targets[src][face] = face_construct.construct_map[keep_src][keep_face];
    }

    let zones = merge_zones(own_zones, pieces, &cell_offset, &point_index, &face_targets, &reversed);

    let (face_points, (owner, neighbour)): (Vec<Face>, (Vec<usize>, Vec<Option<usize>>)) =
        faces.into_iter().map(|f| (f.points, (f.owner, f.neighbour))).unzip();
    let mesh = MeshParts {
        points,
        faces: face_points,
        owner,
        neighbour: neighbour.into_iter().take(n_internal).flatten().collect(),
        patches,
        zones,
        n_cells,
    }
    .build()?;
    mesh.check()?;
    debug!(
        "rank {me}: stitched {} cells, {} faces ({n_internal} internal), {} points from {} pieces",
        mesh.n_cells(),
        mesh.n_faces(),
        mesh.n_points(),
        pieces.iter().flatten().count()
    );
    Ok(Stitched {
        mesh,
        cells,
        faces: face_construct,
        points: point_construct,
        patch_origin,
        face_targets,
        point_targets: point_index,
    })
}

fn merge_zones(
    own: &ZoneSet,
    pieces: &[Option<MeshPiece>],
    cell_offset: &[usize],
    point_index: &[Vec<usize>],
    face_targets: &[Vec<Option<usize>>],
    reversed: &HashSet<(usize, usize)>,
) -> ZoneSet {
    let mut out = ZoneSet::default();
    for kind in [ZoneKind::Cell, ZoneKind::Face, ZoneKind::Point] {
        let mut merged: Vec<(String, Vec<(usize, bool)>)> =
            own.zones(kind).iter().map(|z| (z.name.clone(), Vec::new())).collect();
        for (src, piece) in pieces.iter().enumerate() {
            let Some(piece) = piece else { continue };
            for zone in piece.mesh.zones().zones(kind) {
                let slot = match merged.iter().position(|(n, _)| *n == zone.name) {
                    Some(i) => i,
                    None => {
                        merged.push((zone.name.clone(), Vec::new()));
                        merged.len() - 1
                    }
                };
                let entries = &mut merged[slot].1;
                for (k, &i) in zone.indices.iter().enumerate() {
                    let new = match kind {
                        ZoneKind::Cell => Some(cell_offset[src] + i),
                        ZoneKind::Point => Some(point_index[src][i]),
                        ZoneKind::Face => face_targets[src][i],
                    };
                    if let Some(new) = new {
                        let turned = kind == ZoneKind::Face && reversed.contains(&(src, i));
                        entries.push((new, zone.flip(k) != turned));
                    }
                }
            }
        }
        let list = out.zones_mut(kind);
        for (name, entries) in merged {
            let mut seen = HashSet::new();
            let entries: Vec<(usize, bool)> = entries
                .into_iter()
                .filter(|(i, _)| seen.insert(*i))
                .sorted_by_key(|(i, _)| *i)
                .collect();
            let (indices, flips): (Vec<usize>, Vec<bool>) = entries.into_iter().unzip();
            list.push(match kind {
                ZoneKind::Face => Zone::with_flips(name, indices, flips),
                _ => Zone::new(name, indices),
            });
        }
    }
    out
}
