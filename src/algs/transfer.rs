//! Mesh transfer: the piece of a mesh bound for one rank, its coupling
//! descriptors, and the self-describing record it travels in.
//!
//! Layout of a `MESH_PIECE` record after the header:
//!
//! ```text
//! points        [f64; 3] x n
//! n_cells
//! faces         n, then one index list per face
//! owner         index list
//! neighbour     index list
//! patches       n, then name, kind, start, size per patch
//! zones         cell, face and point zones by name
//! descriptors   one WireFace per boundary face
//! point keys    [u64; 2] per point
//! ```

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::size_of;

use crate::algs::classify::Classification;
use crate::algs::coupling::GlobalKey;
use crate::algs::subset::subset_mesh;
use crate::algs::wire::{WireReader, WireWriter, kind};
use crate::mesh_error::MeshError;
use crate::topology::map::MapPolyMesh;
use crate::topology::mesh::{MeshParts, Point, PolyMesh};
use crate::topology::patch::{CyclicTransform, Patch, PatchKind};
use crate::topology::zones::{Zone, ZoneKind, ZoneSet};

/// Where a boundary face of a piece came from and what it couples to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FaceDescriptor {
    /// Rank that sent the piece.
    pub origin_proc: usize,
    /// Face on the sending rank's mesh.
    pub origin_face: usize,
    /// Non-processor patch the face belonged to (`None` for cut internal
    /// faces and plain processor faces).
    pub origin_patch: Option<usize>,
    /// Destination of the cell across the face (`None` for uncoupled faces).
    pub nbr_dest: Option<usize>,
    /// Identity shared with the other copy of the face.
    pub key: GlobalKey,
    /// The face is reversed relative to the sender's face.
    pub flipped: bool,
}

/// Fixed-width wire form of a [`FaceDescriptor`].
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireFace {
    pub origin_proc_le: u64,
    pub origin_face_le: u64,
    pub origin_patch_le: i64, // -1 = none
    pub nbr_dest_le: i64,     // -1 = none
    pub key_le: [u64; 2],
    pub flipped_le: u64,
}

const_assert_eq!(size_of::<WireFace>(), 56);

fn opt_to_wire(v: Option<usize>) -> i64 {
    v.map_or(-1, |x| x as i64).to_le()
}

fn opt_from_wire(v: i64) -> Result<Option<usize>, MeshError> {
    match i64::from_le(v) {
        -1 => Ok(None),
        x if x >= 0 => Ok(Some(x as usize)),
        x => Err(MeshError::Wire(format!("invalid optional index {x}"))),
    }
}

impl From<&FaceDescriptor> for WireFace {
    fn from(d: &FaceDescriptor) -> Self {
        Self {
            origin_proc_le: (d.origin_proc as u64).to_le(),
            origin_face_le: (d.origin_face as u64).to_le(),
            origin_patch_le: opt_to_wire(d.origin_patch),
            nbr_dest_le: opt_to_wire(d.nbr_dest),
            key_le: d.key.map(u64::to_le),
            flipped_le: u64::from(d.flipped).to_le(),
        }
    }
}

impl TryFrom<WireFace> for FaceDescriptor {
    type Error = MeshError;

    fn try_from(w: WireFace) -> Result<Self, MeshError> {
        Ok(Self {
            origin_proc: u64::from_le(w.origin_proc_le) as usize,
            origin_face: u64::from_le(w.origin_face_le) as usize,
            origin_patch: opt_from_wire(w.origin_patch_le)?,
            nbr_dest: opt_from_wire(w.nbr_dest_le)?,
            key: w.key_le.map(u64::from_le),
            flipped: match u64::from_le(w.flipped_le) {
                0 => false,
                1 => true,
                x => return Err(MeshError::Wire(format!("invalid flip flag {x}"))),
            },
        })
    }
}

/// The cells of one rank's mesh bound for one destination.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshPiece {
    pub mesh: PolyMesh,
    /// One per boundary face of `mesh`, in face order.
    pub faces: Vec<FaceDescriptor>,
    /// Global identity of every point of `mesh`.
    pub point_keys: Vec<GlobalKey>,
}

impl MeshPiece {
    pub fn descriptor(&self, face: usize) -> Option<&FaceDescriptor> {
        face.checked_sub(self.mesh.n_internal_faces())
            .and_then(|k| self.faces.get(k))
    }
}

/// Cut out the cells of `mesh` going to `to` and describe their boundary.
///
/// Returns the piece and the map from `mesh` to the piece mesh.
#[allow(clippy::too_many_arguments)]
pub fn extract_piece(
    mesh: &PolyMesh,
    me: usize,
    to: usize,
    dest: &[usize],
    classes: &Classification,
    face_keys: &[GlobalKey],
    point_keys: &[GlobalKey],
    exposed_patch: &str,
) -> Result<(MeshPiece, MapPolyMesh), MeshError> {
    let (piece, map) = subset_mesh(mesh, |c| dest[c] == to, exposed_patch)?;
    let faces = (piece.n_internal_faces()..piece.n_faces())
        .map(|f| {
            let old = map.face_map[f].ok_or_else(|| {
                MeshError::Wire(format!("piece face {f} for rank {to} has no source face"))
            })?;
            Ok(FaceDescriptor {
                origin_proc: me,
                origin_face: old,
                origin_patch: classes.origin_patch(mesh, old),
                nbr_dest: classes.nbr_dest(old, to),
                key: face_keys[old],
                flipped: map.flip_face_flux[f],
            })
        })
        .collect::<Result<Vec<_>, MeshError>>()?;
    let point_keys = map
        .point_map
        .iter()
        .enumerate()
        .map(|(p, old)| {
            old.map(|o| point_keys[o])
                .ok_or_else(|| MeshError::Wire(format!("piece point {p} for rank {to} has no source point")))
        })
        .collect::<Result<Vec<_>, MeshError>>()?;
    Ok((
        MeshPiece {
            mesh: piece,
            faces,
            point_keys,
        },
        map,
    ))
}

fn write_patch(w: &mut WireWriter, patch: &Patch) {
    w.put_str(&patch.name);
    match &patch.kind {
        PatchKind::Ordinary => w.put_u8(0),
        PatchKind::Empty => w.put_u8(1),
        PatchKind::Processor {
            my_proc,
            neighb_proc,
            referred_patch,
        } => {
            w.put_u8(2);
            w.put_usize(*my_proc);
            w.put_usize(*neighb_proc);
            w.put_opt(*referred_patch);
        }
        PatchKind::Cyclic {
            neighbour_patch,
            transform,
        } => {
            w.put_u8(3);
            w.put_usize(*neighbour_patch);
            match transform {
                CyclicTransform::None => w.put_u8(0),
                CyclicTransform::Translational(v) => {
                    w.put_u8(1);
                    w.put_pod(v);
                }
            }
        }
    }
    w.put_usize(patch.start);
    w.put_usize(patch.size);
}

fn read_patch(r: &mut WireReader<'_>) -> Result<Patch, MeshError> {
    let name = r.get_str()?;
    let kind = match r.get_u8()? {
        0 => PatchKind::Ordinary,
        1 => PatchKind::Empty,
        2 => PatchKind::Processor {
            my_proc: r.get_usize()?,
            neighb_proc: r.get_usize()?,
            referred_patch: r.get_opt()?,
        },
        3 => {
            let neighbour_patch = r.get_usize()?;
            let transform = match r.get_u8()? {
                0 => CyclicTransform::None,
                1 => CyclicTransform::Translational(r.get_pod()?),
                t => return Err(MeshError::Wire(format!("unknown cyclic transform {t}"))),
            };
            PatchKind::Cyclic {
                neighbour_patch,
                transform,
            }
        }
        t => return Err(MeshError::Wire(format!("unknown patch kind {t} for `{name}`"))),
    };
    let start = r.get_usize()?;
    let size = r.get_usize()?;
    Ok(Patch::new(name, kind, start, size))
}

const ZONE_KINDS: [ZoneKind; 3] = [ZoneKind::Cell, ZoneKind::Face, ZoneKind::Point];

fn write_zones(w: &mut WireWriter, zones: &ZoneSet) {
    for kind in ZONE_KINDS {
        let list = zones.zones(kind);
        w.put_u8(kind.to_wire());
        w.put_usize(list.len());
        for z in list {
            w.put_str(&z.name);
            w.put_usizes(&z.indices);
            match &z.flip_map {
                Some(flips) => {
                    w.put_bool(true);
                    w.put_bools(flips);
                }
                None => w.put_bool(false),
            }
        }
    }
}

fn read_zones(r: &mut WireReader<'_>) -> Result<ZoneSet, MeshError> {
    let mut zones = ZoneSet::default();
    for expected in ZONE_KINDS {
        let kind = ZoneKind::from_wire(r.get_u8()?)
            .filter(|k| *k == expected)
            .ok_or_else(|| MeshError::Wire(format!("zone block out of order, expected {expected:?}")))?;
        let n = r.get_count(17, "zones")?;
        for _ in 0..n {
            let name = r.get_str()?;
            let indices = r.get_usizes()?;
            let zone = if r.get_bool()? {
                Zone::with_flips(name, indices, r.get_bools()?)
            } else {
                Zone::new(name, indices)
            };
            zones.zones_mut(kind).push(zone);
        }
    }
    Ok(zones)
}

/// Encode a piece as a `MESH_PIECE` record.
pub fn send_mesh(piece: &MeshPiece) -> Vec<u8> {
    let mesh = &piece.mesh;
    let mut w = WireWriter::new(kind::MESH_PIECE);
    w.put_pods(mesh.points());
    w.put_usize(mesh.n_cells());
    w.put_usize(mesh.n_faces());
    for face in mesh.faces() {
        w.put_usizes(face);
    }
    w.put_usizes(mesh.owner());
    w.put_usizes(mesh.neighbour());
    w.put_usize(mesh.patches().len());
    for patch in mesh.patches() {
        write_patch(&mut w, patch);
    }
    write_zones(&mut w, mesh.zones());
    let wire: Vec<WireFace> = piece.faces.iter().map(WireFace::from).collect();
    w.put_pods(&wire);
    w.put_pods(&piece.point_keys);
    w.finish()
}

/// Decode a `MESH_PIECE` record; the mesh is checked as it is rebuilt.
pub fn receive_mesh(bytes: &[u8]) -> Result<MeshPiece, MeshError> {
    let mut r = WireReader::open(bytes, kind::MESH_PIECE)?;
    let points: Vec<Point> = r.get_pods()?;
    let n_cells = r.get_usize()?;
    let n_faces = r.get_count(8, "faces")?;
    let faces = (0..n_faces).map(|_| r.get_usizes()).collect::<Result<Vec<_>, _>>()?;
    let owner = r.get_usizes()?;
    let neighbour = r.get_usizes()?;
    let n_patches = r.get_count(8, "patches")?;
    let patches = (0..n_patches).map(|_| read_patch(&mut r)).collect::<Result<Vec<_>, _>>()?;
    let zones = read_zones(&mut r)?;
    let wire: Vec<WireFace> = r.get_pods()?;
    let point_keys: Vec<GlobalKey> = r.get_pods()?;
    r.finish()?;

    let mesh = MeshParts {
        points,
        faces,
        owner,
        neighbour,
        patches,
        zones,
        n_cells,
    }
    .build()?;
    if wire.len() != mesh.n_boundary_faces() {
        return Err(MeshError::Wire(format!(
            "{} face descriptors for {} boundary faces",
            wire.len(),
            mesh.n_boundary_faces()
        )));
    }
    if point_keys.len() != mesh.n_points() {
        return Err(MeshError::Wire(format!(
            "{} point keys for {} points",
            point_keys.len(),
            mesh.n_points()
        )));
    }
    let faces = wire
        .into_iter()
        .map(FaceDescriptor::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(MeshPiece {
        mesh,
        faces,
        point_keys,
    })
}
