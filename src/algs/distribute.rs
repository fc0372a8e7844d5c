//! Redistribution of a decomposed mesh, its fields and its particle clouds.
//!
//! One call to [`Distributor::distribute`] walks every rank through the same
//! sequence of stages:
//!
//! ```text
//! Idle -> Classified -> Resolved -> Transferred -> FieldsMigrated -> Finalized
//! ```
//!
//! Each stage does its local, fallible work first and then agrees on the
//! outcome with every other rank, so a failure anywhere aborts the stage
//! everywhere before the next collective starts. The caller's
//! [`MeshContext`] is only replaced once every rank reached `Finalized`; on
//! error it is left exactly as it was.

use std::fmt;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::algs::classify::{check_destination, check_patch_agreement, classify};
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::coupling::{correct_processor_values, face_keys, point_masters};
use crate::algs::exchange::{agree, all_reduce_or, all_reduce_sum, all_to_allv};
use crate::algs::stitch::{Stitched, stitch};
use crate::algs::transfer::{MeshPiece, extract_piece, receive_mesh, send_mesh};
use crate::algs::wire::{WireReader, WireWriter, kind};
use crate::data::cloud::{Cloud, pack_clouds, unpack_clouds};
use crate::data::field::{Field, FieldLocation};
use crate::data::field_store::FieldStore;
use crate::data::field_transfer::{
    Incoming, Outgoing, SourceFaces, agree_field_names, correct_coupled_boundaries, pack_fields, unpack_fields,
};
use crate::data::map_distribute::MapDistribute;
use crate::data::value::FieldValue;
use crate::mesh_error::MeshError;
use crate::topology::map::MapPolyMesh;
use crate::topology::mesh::PolyMesh;

/// Stages of one redistribution, in order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Idle,
    /// Preconditions checked, every face classified.
    Classified,
    /// Face and point identities resolved, pieces cut out.
    Resolved,
    /// Pieces exchanged and stitched into the new local mesh.
    Transferred,
    /// Fields and clouds rebuilt on the new mesh.
    FieldsMigrated,
    /// New mesh swapped in.
    Finalized,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Idle => "idle",
            Stage::Classified => "classification",
            Stage::Resolved => "coupling resolution",
            Stage::Transferred => "mesh transfer",
            Stage::FieldsMigrated => "field migration",
            Stage::Finalized => "finalization",
        })
    }
}

/// What to do with a non-required field that some ranks do not have.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingFieldPolicy {
    #[default]
    Fail,
    SkipWithWarning,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributeConfig {
    /// Cap on point-master passes; `None` means `comm.size() + 1`.
    pub max_point_sync_iterations: Option<usize>,
    pub missing_field_policy: MissingFieldPolicy,
    /// Patch the sender's cut faces are parked on while a piece is in flight.
    pub exposed_patch_name: String,
    /// First message tag; a redistribution uses a few dozen tags from here.
    pub base_tag: u16,
}

impl Default for DistributeConfig {
    fn default() -> Self {
        Self {
            max_point_sync_iterations: None,
            missing_field_policy: MissingFieldPolicy::default(),
            exposed_patch_name: "oldInternalFaces".into(),
            base_tag: 0x4000,
        }
    }
}

/// The mesh of one rank and everything that lives on it.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshContext {
    pub mesh: PolyMesh,
    pub fields: FieldStore,
    pub clouds: Vec<Cloud>,
}

impl MeshContext {
    pub fn new(mesh: PolyMesh) -> Self {
        Self {
            mesh,
            fields: FieldStore::new(),
            clouds: Vec::new(),
        }
    }

    pub fn with_fields(mut self, fields: FieldStore) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_clouds(mut self, clouds: Vec<Cloud>) -> Self {
        self.clouds = clouds;
        self
    }

    /// Total particle count over all clouds.
    pub fn n_particles(&self) -> usize {
        self.clouds.iter().map(Cloud::len).sum()
    }
}

/// Hands out tags so that no two collectives of one redistribution share one.
struct TagSeq {
    next: CommTag,
}

impl TagSeq {
    /// Tags per collective; `point_masters` uses four.
    const STRIDE: u16 = 4;

    fn new(base: u16) -> Self {
        Self {
            next: CommTag::new(base),
        }
    }

    fn take(&mut self) -> CommTag {
        let tag = self.next;
        self.next = tag.offset(Self::STRIDE);
        tag
    }
}

/// Old-to-new translation of a redistribution, seen from one rank.
///
/// The three [`MapDistribute`]s hold this rank's sub maps (which old entities
/// went where) and construct maps (where received entities landed). The
/// `old_*_targets` give, per old entity, every `(rank, new index)` it became;
/// faces cut by the distribution have two.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RedistributionMap {
    rank: usize,
    pub cells: MapDistribute,
    pub faces: MapDistribute,
    pub points: MapDistribute,
    /// Per new patch: the non-processor patch it continues.
    pub patch_origin: Vec<Option<usize>>,
    pub old_cell_targets: Vec<(usize, usize)>,
    pub old_face_targets: Vec<Vec<(usize, usize)>>,
    pub old_point_targets: Vec<Vec<(usize, usize)>>,
    source_faces: SourceFaces,
}

impl RedistributionMap {
    /// Every entity of `mesh` stays where it is.
    pub fn identity(mesh: &PolyMesh, rank: usize, n_procs: usize) -> Self {
        Self {
            rank,
            cells: MapDistribute::identity(mesh.n_cells(), rank, n_procs),
            faces: MapDistribute::identity(mesh.n_faces(), rank, n_procs),
            points: MapDistribute::identity(mesh.n_points(), rank, n_procs),
            patch_origin: mesh
                .patches()
                .iter()
                .enumerate()
                .map(|(p, patch)| (!patch.is_processor()).then_some(p))
                .collect(),
            old_cell_targets: (0..mesh.n_cells()).map(|c| (rank, c)).collect(),
            old_face_targets: (0..mesh.n_faces()).map(|f| vec![(rank, f)]).collect(),
            old_point_targets: (0..mesh.n_points()).map(|p| vec![(rank, p)]).collect(),
            source_faces: SourceFaces::of(mesh),
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Nothing moved and nothing was renumbered on this rank.
    pub fn is_identity(&self) -> bool {
        let same = |(i, &(r, n)): (usize, &(usize, usize))| r == self.rank && n == i;
        let same_all = |targets: &[Vec<(usize, usize)>]| {
            targets
                .iter()
                .enumerate()
                .all(|(i, t)| t.len() == 1 && same((i, &t[0])))
        };
        self.old_cell_targets.iter().enumerate().all(same)
            && same_all(&self.old_face_targets)
            && same_all(&self.old_point_targets)
            && self.cells.construct_size == self.old_cell_targets.len()
    }

    fn map_for(&self, location: FieldLocation) -> &MapDistribute {
        match location {
            FieldLocation::Volume => &self.cells,
            FieldLocation::Surface => &self.faces,
            FieldLocation::Point => &self.points,
        }
    }

    fn cell_dest(&self) -> Vec<usize> {
        self.old_cell_targets.iter().map(|&(r, _)| r).collect()
    }

    /// Collective: move a plain array indexed by old cell, face or point.
    /// `oriented` face values change sign where the face was reversed.
    pub fn distribute_values<T, C>(
        &self,
        comm: &C,
        tag: CommTag,
        location: FieldLocation,
        values: &[T],
        oriented: bool,
    ) -> Result<Vec<T>, MeshError>
    where
        T: FieldValue,
        C: Communicator,
    {
        let map = self.map_for(location);
        let local = map.pack(values).map(|_| ());
        agree(comm, tag, Stage::FieldsMigrated, local)?;
        map.distribute(comm, tag.offset(2), values, oriented)
    }

    /// Collective: rebuild `field`, defined on the old mesh, on `new_mesh`.
    /// Uses eight consecutive tags starting at `tag`.
    pub fn distribute_field<T, C>(
        &self,
        comm: &C,
        tag: CommTag,
        new_mesh: &PolyMesh,
        field: &Field<T>,
    ) -> Result<Field<T>, MeshError>
    where
        T: FieldValue,
        C: Communicator,
    {
        let cell_dest = self.cell_dest();
        let out = Outgoing {
            faces_of: &self.source_faces,
            cell_dest: &cell_dest,
            cells: &self.cells,
            faces: &self.faces,
            points: &self.points,
        };
        let sends = (0..self.cells.n_procs())
            .map(|to| {
                if self.cells.sub_map[to].is_empty() {
                    Ok(Vec::new())
                } else {
                    out.pack(field, to)
                }
            })
            .collect::<Result<Vec<_>, MeshError>>();
        let sends = agree(comm, tag, Stage::FieldsMigrated, sends)?;
        let received = all_to_allv(comm, tag.offset(2), sends)?;
        let slices: Vec<&[u8]> = received.iter().map(Vec::as_slice).collect();
        let incoming = Incoming {
            mesh: new_mesh,
            cells: &self.cells,
            faces: &self.faces,
            points: &self.points,
            patch_origin: &self.patch_origin,
        };
        let mut rebuilt = agree(comm, tag.offset(4), Stage::FieldsMigrated, incoming.unpack(field, &slices))?;
        correct_processor_values(comm, tag.offset(6), new_mesh, &mut rebuilt)?;
        Ok(rebuilt)
    }

    /// Collective: send the particles of `cloud`, located on the old mesh,
    /// to the ranks their cells went to.
    pub fn distribute_lagrangian<C: Communicator>(
        &self,
        comm: &C,
        tag: CommTag,
        new_mesh: &PolyMesh,
        cloud: &Cloud,
    ) -> Result<Cloud, MeshError> {
        let packed = pack_clouds(std::slice::from_ref(cloud), comm.size(), |cell| {
            self.old_cell_targets
                .get(cell)
                .copied()
                .ok_or_else(|| MeshError::ParticleCell {
                    cell,
                    n_cells: self.old_cell_targets.len(),
                })
        });
        let packed = agree(comm, tag, Stage::FieldsMigrated, packed)?;
        let received = all_to_allv(comm, tag.offset(2), packed)?;
        let slices: Vec<&[u8]> = received.iter().map(Vec::as_slice).collect();
        let mut clouds = unpack_clouds(std::slice::from_ref(cloud), &slices, new_mesh, |_, h| Some(h))?;
        Ok(clouds.swap_remove(0))
    }
}

/// Drives redistributions over one communicator.
pub struct Distributor<'a, C: Communicator> {
    comm: &'a C,
    config: DistributeConfig,
}

/// Sender-side results of the `Resolved` stage.
struct Outbound {
    pieces: Vec<Option<MeshPiece>>,
    cells: MapDistribute,
    faces: MapDistribute,
    points: MapDistribute,
}

fn sources(map: &[Option<usize>], what: &str, to: usize) -> Result<Vec<usize>, MeshError> {
    map.iter()
        .enumerate()
        .map(|(i, old)| old.ok_or_else(|| MeshError::Wire(format!("{what} {i} of the piece for rank {to} has no source"))))
        .collect()
}

fn sub_maps(maps: &[Option<MapPolyMesh>]) -> Result<[MapDistribute; 3], MeshError> {
    let n_procs = maps.len();
    let mut out: [MapDistribute; 3] = std::array::from_fn(|_| MapDistribute {
        construct_size: 0,
        sub_map: vec![Vec::new(); n_procs],
        construct_map: vec![Vec::new(); n_procs],
        construct_flip: vec![Vec::new(); n_procs],
    });
    for (to, map) in maps.iter().enumerate() {
        let Some(map) = map else { continue };
        out[0].sub_map[to] = sources(&map.cell_map, "cell", to)?;
        out[1].sub_map[to] = sources(&map.face_map, "face", to)?;
        out[2].sub_map[to] = sources(&map.point_map, "point", to)?;
    }
    Ok(out)
}

fn with_construct(mut sub: MapDistribute, construct: MapDistribute) -> MapDistribute {
    sub.construct_size = construct.construct_size;
    sub.construct_map = construct.construct_map;
    sub.construct_flip = construct.construct_flip;
    sub
}

/// One parcel: a mesh piece, its field values and its particles.
fn write_parcel(piece: &MeshPiece, fields: &[u8], clouds: &[u8]) -> Vec<u8> {
    let mut w = WireWriter::new(kind::PARCEL);
    w.put_bytes(&send_mesh(piece));
    w.put_bytes(fields);
    w.put_bytes(clouds);
    w.finish()
}

fn read_parcel(bytes: &[u8]) -> Result<(MeshPiece, &[u8], &[u8]), MeshError> {
    let mut r = WireReader::open(bytes, kind::PARCEL)?;
    let piece = receive_mesh(r.get_bytes()?)?;
    let fields = r.get_bytes()?;
    let clouds = r.get_bytes()?;
    r.finish()?;
    Ok((piece, fields, clouds))
}

/// Where every entity of a piece ended up on its receiver: all copies of a
/// point and both copies of a merged face are resolved.
fn write_construct(st: &Stitched, src: usize) -> Vec<u8> {
    let mut w = WireWriter::new(kind::CONSTRUCT);
    let cells: Vec<usize> = st.cells.construct_map[src].iter().flatten().copied().collect();
    w.put_usizes(&cells);
    w.put_usize(st.face_targets[src].len());
    for &f in &st.face_targets[src] {
        w.put_opt(f);
    }
    w.put_usizes(&st.point_targets[src]);
    w.finish()
}

type Targets = (Vec<(usize, usize)>, Vec<Vec<(usize, usize)>>, Vec<Vec<(usize, usize)>>);

fn read_constructs(
    received: &[Vec<u8>],
    cells: &MapDistribute,
    faces: &MapDistribute,
    points: &MapDistribute,
    n_old: (usize, usize, usize),
) -> Result<Targets, MeshError> {
    let mut cell_targets = vec![None; n_old.0];
    let mut face_targets = vec![Vec::new(); n_old.1];
    let mut point_targets = vec![Vec::new(); n_old.2];
    for (to, bytes) in received.iter().enumerate() {
        if cells.sub_map[to].is_empty() {
            continue;
        }
        let mut r = WireReader::open(bytes, kind::CONSTRUCT)?;
        let new_cells = r.get_usizes()?;
        let n_faces = r.get_count(8, "face targets")?;
        let new_faces = (0..n_faces).map(|_| r.get_opt()).collect::<Result<Vec<_>, _>>()?;
        let new_points = r.get_usizes()?;
        r.finish()?;
        let lens = [
            (new_cells.len(), cells.sub_map[to].len()),
            (new_faces.len(), faces.sub_map[to].len()),
            (new_points.len(), points.sub_map[to].len()),
        ];
        if let Some((got, expected)) = lens.into_iter().find(|(a, b)| a != b) {
            return Err(MeshError::Wire(format!(
                "rank {to} returned {got} targets for {expected} sent entities"
            )));
        }
        for (&old, &new) in cells.sub_map[to].iter().zip(&new_cells) {
            cell_targets[old] = Some((to, new));
        }
        for (&old, new) in faces.sub_map[to].iter().zip(&new_faces) {
            if let Some(new) = *new {
                face_targets[old].push((to, new));
            }
        }
        for (&old, &new) in points.sub_map[to].iter().zip(&new_points) {
            point_targets[old].push((to, new));
        }
    }
    let cell_targets = cell_targets
        .into_iter()
        .enumerate()
        .map(|(c, t)| t.ok_or_else(|| MeshError::Wire(format!("old cell {c} has no target"))))
        .collect::<Result<Vec<_>, _>>()?;
    for t in face_targets.iter_mut().chain(point_targets.iter_mut()) {
        t.sort_unstable();
        t.dedup();
    }
    Ok((cell_targets, face_targets, point_targets))
}

impl<'a, C: Communicator> Distributor<'a, C> {
    pub fn new(comm: &'a C, config: DistributeConfig) -> Self {
        Self { comm, config }
    }

    pub fn config(&self) -> &DistributeConfig {
        &self.config
    }

    /// Collective: move every cell `c` of `ctx.mesh` to rank `destination[c]`
    /// together with its faces, points, field values and particles.
    ///
    /// On success `ctx` holds the new local mesh and the returned map relates
    /// it to the old one. On failure every rank returns an error naming the
    /// stage that failed and `ctx` is unchanged.
    pub fn distribute(&self, ctx: &mut MeshContext, destination: &[usize]) -> Result<RedistributionMap, MeshError> {
        let comm = self.comm;
        let me = comm.rank();
        let n_procs = comm.size();
        let mut tags = TagSeq::new(self.config.base_tag);

        // ---- Classified ----------------------------------------------------
        let stage = Stage::Classified;
        let local = check_destination(&ctx.mesh, destination, n_procs)
            .and_then(|_| ctx.mesh.check_patches())
            .and_then(|_| ctx.fields.check(&ctx.mesh));
        agree(comm, tags.take(), stage, local).map_err(|e| e.at(stage))?;
        check_patch_agreement(comm, tags.take(), &ctx.mesh).map_err(|e| e.at(stage))?;
        let names = agree_field_names(comm, tags.take(), &ctx.fields, self.config.missing_field_policy)
            .map_err(|e| e.at(stage))?;

        let moving = destination.iter().any(|&d| d != me);
        if !all_reduce_or(comm, tags.take(), moving).map_err(|e| e.at(stage))? {
            info!("rank {me}: every cell stays, redistribution is a no-op");
            let skipped: Vec<String> = ctx
                .fields
                .names()
                .filter(|n| !names.iter().any(|a| a.as_str() == *n))
                .map(str::to_owned)
                .collect();
            for name in &skipped {
                ctx.fields.remove(name);
            }
            return Ok(RedistributionMap::identity(&ctx.mesh, me, n_procs));
        }
        let classes = classify(comm, tags.take(), &ctx.mesh, destination);
        let classes = agree(comm, tags.take(), stage, classes).map_err(|e| e.at(stage))?;

        // ---- Resolved ------------------------------------------------------
        let stage = Stage::Resolved;
        let keys = face_keys(comm, tags.take(), &ctx.mesh).map_err(|e| e.at(stage))?;
        let max_passes = self.config.max_point_sync_iterations.unwrap_or(n_procs + 1);
        let point_keys = point_masters(comm, tags.take(), &ctx.mesh, max_passes).map_err(|e| e.at(stage))?;
        let local = (|| -> Result<_, MeshError> {
            let mut pieces = Vec::with_capacity(n_procs);
            let mut maps = Vec::with_capacity(n_procs);
            for to in 0..n_procs {
                if classes.cells_per_rank[to] == 0 {
                    pieces.push(None);
                    maps.push(None);
                    continue;
                }
                let (piece, map) = extract_piece(
                    &ctx.mesh,
                    me,
                    to,
                    destination,
                    &classes,
                    &keys,
                    &point_keys,
                    &self.config.exposed_patch_name,
                )?;
                pieces.push(Some(piece));
                maps.push(Some(map));
            }
            let [cells, faces, points] = sub_maps(&maps)?;
            Ok(Outbound {
                pieces,
                cells,
                faces,
                points,
            })
        })();
        let outbound = agree(comm, tags.take(), stage, local).map_err(|e| e.at(stage))?;
        debug!(
            "rank {me}: {} pieces cut, {} cells leave",
            outbound.pieces.iter().flatten().count(),
            classes.n_moving
        );

        // ---- Transferred ---------------------------------------------------
        let stage = Stage::Transferred;
        let source_faces = SourceFaces::of(&ctx.mesh);
        let local = (|| -> Result<_, MeshError> {
            let out = Outgoing {
                faces_of: &source_faces,
                cell_dest: destination,
                cells: &outbound.cells,
                faces: &outbound.faces,
                points: &outbound.points,
            };
            let fields = pack_fields(&ctx.fields, &names, &out)?;
            let mut piece_index = vec![0usize; ctx.mesh.n_cells()];
            for list in &outbound.cells.sub_map {
                for (k, &old) in list.iter().enumerate() {
                    piece_index[old] = k;
                }
            }
            let clouds = pack_clouds(&ctx.clouds, n_procs, |cell| {
                match (destination.get(cell), piece_index.get(cell)) {
                    (Some(&to), Some(&k)) => Ok((to, k)),
                    _ => Err(MeshError::ParticleCell {
                        cell,
                        n_cells: ctx.mesh.n_cells(),
                    }),
                }
            })?;
            Ok(outbound
                .pieces
                .iter()
                .zip(fields.iter().zip(&clouds))
                .map(|(piece, (f, c))| piece.as_ref().map_or_else(Vec::new, |p| write_parcel(p, f, c)))
                .collect::<Vec<_>>())
        })();
        let parcels = agree(comm, tags.take(), stage, local).map_err(|e| e.at(stage))?;
        let received = all_to_allv(comm, tags.take(), parcels).map_err(|e| e.at(stage))?;
        let local = (|| -> Result<_, MeshError> {
            let mut pieces = Vec::with_capacity(n_procs);
            let mut field_blobs: Vec<&[u8]> = Vec::with_capacity(n_procs);
            let mut cloud_blobs: Vec<&[u8]> = Vec::with_capacity(n_procs);
            for bytes in &received {
                if bytes.is_empty() {
                    pieces.push(None);
                    field_blobs.push(&[]);
                    cloud_blobs.push(&[]);
                    continue;
                }
                let (piece, f, c) = read_parcel(bytes)?;
                pieces.push(Some(piece));
                field_blobs.push(f);
                cloud_blobs.push(c);
            }
            let plain: Vec<_> = ctx.mesh.patches().iter().filter(|p| !p.is_processor()).cloned().collect();
            let stitched = stitch(me, &plain, ctx.mesh.zones(), &pieces)?;
            Ok((stitched, field_blobs, cloud_blobs))
        })();
        let (stitched, field_blobs, cloud_blobs) = agree(comm, tags.take(), stage, local).map_err(|e| e.at(stage))?;

        // ---- FieldsMigrated ------------------------------------------------
        let stage = Stage::FieldsMigrated;
        let local = (|| -> Result<_, MeshError> {
            let incoming = Incoming {
                mesh: &stitched.mesh,
                cells: &stitched.cells,
                faces: &stitched.faces,
                points: &stitched.points,
                patch_origin: &stitched.patch_origin,
            };
            let fields = unpack_fields(&ctx.fields, &names, &incoming, &field_blobs)?;
            let clouds = unpack_clouds(&ctx.clouds, &cloud_blobs, &stitched.mesh, |src, h| {
                stitched.cells.construct_map.get(src)?.get(h).copied().flatten()
            })?;
            Ok((fields, clouds))
        })();
        let (mut fields, clouds) = agree(comm, tags.take(), stage, local).map_err(|e| e.at(stage))?;
        correct_coupled_boundaries(comm, tags.take(), &stitched.mesh, &mut fields).map_err(|e| e.at(stage))?;

        // ---- Finalized -----------------------------------------------------
        let stage = Stage::Finalized;
        let replies = (0..n_procs)
            .map(|src| {
                if stitched.cells.construct_map[src].is_empty() {
                    Vec::new()
                } else {
                    write_construct(&stitched, src)
                }
            })
            .collect();
        let replies = all_to_allv(comm, tags.take(), replies).map_err(|e| e.at(stage))?;
        let n_old = (ctx.mesh.n_cells(), ctx.mesh.n_faces(), ctx.mesh.n_points());
        let local = read_constructs(&replies, &outbound.cells, &outbound.faces, &outbound.points, n_old);
        let (old_cell_targets, old_face_targets, old_point_targets) =
            agree(comm, tags.take(), stage, local).map_err(|e| e.at(stage))?;

        let n_total = all_reduce_sum(comm, tags.take(), stitched.mesh.n_cells() as u64).map_err(|e| e.at(stage))?;
        let received_from = stitched.cells.construct_map.iter().filter(|m| !m.is_empty()).count();
        info!(
            "rank {me}: redistribution sent {} cells away and now holds {} of {n_total} cells from {received_from} ranks",
            classes.n_moving,
            stitched.mesh.n_cells()
        );

        let Stitched {
            mesh,
            cells,
            faces,
            points,
            patch_origin,
            ..
        } = stitched;
        let map = RedistributionMap {
            rank: me,
            cells: with_construct(outbound.cells, cells),
            faces: with_construct(outbound.faces, faces),
            points: with_construct(outbound.points, points),
            patch_origin,
            old_cell_targets,
            old_face_targets,
            old_point_targets,
            source_faces,
        };
        *ctx = MeshContext { mesh, fields, clouds };
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::algs::meshgen::block_mesh;
    use crate::data::value::Dimensions;

    #[test]
    fn stage_names_read_well_in_errors() {
        let err = MeshError::Wire("short".into()).at(Stage::Transferred);
        assert_eq!(err.to_string(), "redistribution failed during mesh transfer: wire protocol violation: short");
        assert_eq!(err.stage(), Some(Stage::Transferred));
    }

    #[test]
    fn tags_do_not_overlap() {
        let mut tags = TagSeq::new(0xfffe);
        assert_eq!(tags.take(), CommTag::new(0xfffe));
        assert_eq!(tags.take(), CommTag::new(0x0002));
    }

    #[test]
    fn config_defaults() {
        let c = DistributeConfig::default();
        assert_eq!(c.missing_field_policy, MissingFieldPolicy::Fail);
        assert_eq!(c.max_point_sync_iterations, None);
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(serde_json::from_str::<DistributeConfig>(&json).unwrap(), c);
    }

    #[test]
    fn serial_stay_put_is_identity() {
        let mesh = block_mesh([2, 2, 1], [2.0, 2.0, 1.0]).unwrap();
        let mut fields = FieldStore::new();
        fields.insert(
            Field::volume("p", Dimensions::PRESSURE, &mesh, vec![1.0, 2.0, 3.0, 4.0]).unwrap(),
            true,
        );
        let mut ctx = MeshContext::new(mesh).with_fields(fields);
        let before = ctx.clone();
        let map = Distributor::new(&NoComm, DistributeConfig::default())
            .distribute(&mut ctx, &[0; 4])
            .unwrap();
        assert!(map.is_identity());
        assert_eq!(ctx, before);
    }

    #[test]
    fn bad_destination_leaves_context_untouched() {
        let mesh = block_mesh([2, 1, 1], [2.0, 1.0, 1.0]).unwrap();
        let mut ctx = MeshContext::new(mesh);
        let before = ctx.clone();
        let err = Distributor::new(&NoComm, DistributeConfig::default())
            .distribute(&mut ctx, &[0, 3])
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Classified));
        assert!(matches!(
            err,
            MeshError::Stage { ref source, .. } if matches!(**source, MeshError::InvalidRank { cell: 1, rank: 3, size: 1 })
        ));
        assert_eq!(ctx, before);
    }

    #[test]
    fn serial_distribute_field_through_identity() {
        let mesh = block_mesh([3, 1, 1], [3.0, 1.0, 1.0]).unwrap();
        let field = Field::volume("T", Dimensions::DIMLESS, &mesh, vec![3.0, 1.0, 2.0]).unwrap();
        let map = RedistributionMap::identity(&mesh, 0, 1);
        let moved = map.distribute_field(&NoComm, CommTag::new(0x700), &mesh, &field).unwrap();
        assert_eq!(moved, field);
        let labels = map
            .distribute_values(&NoComm, CommTag::new(0x710), FieldLocation::Point, &vec![7i64; mesh.n_points()], false)
            .unwrap();
        assert_eq!(labels.len(), mesh.n_points());
    }
}
