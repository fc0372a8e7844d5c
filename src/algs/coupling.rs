//! Exchanges across processor patches and the global identities built on
//! them: face keys shared by both copies of a coupled face, and point
//! masters shared by every copy of a point on a processor boundary.
//!
//! Two processor patches match when they connect the same pair of ranks and
//! refer to partner cyclic patches (or both to none). Matching patches list
//! their faces in the same order, and point `i` of a face pairs with point
//! `(n - i) % n` of its partner.

use bytemuck::Pod;
use hashbrown::HashMap;
use log::debug;

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::distribute::Stage;
use crate::algs::exchange::{all_gather_u64, all_to_allv};
use crate::algs::wire::{WireReader, WireWriter, kind};
use crate::data::field::{Field, FieldLocation};
use crate::data::value::FieldValue;
use crate::mesh_error::MeshError;
use crate::topology::mesh::PolyMesh;
use crate::topology::patch::PatchKind;

/// Globally unique `(rank, local index)` identity.
pub type GlobalKey = [u64; 2];

pub fn global_key(rank: usize, index: usize) -> GlobalKey {
    [rank as u64, index as u64]
}

/// Cyclic partner of `patch`, if it is a cyclic patch.
pub fn cyclic_partner(mesh: &PolyMesh, patch: usize) -> Option<usize> {
    match mesh.patches().get(patch)?.kind {
        PatchKind::Cyclic { neighbour_patch, .. } => Some(neighbour_patch),
        _ => None,
    }
}

/// Face across a local cyclic interface from boundary face `face` of `patch`.
pub fn cyclic_partner_face(mesh: &PolyMesh, patch: usize, face: usize) -> Option<usize> {
    let partner = &mesh.patches()[cyclic_partner(mesh, patch)?];
    let offset = face - mesh.patches()[patch].start;
    (offset < partner.size).then(|| partner.start + offset)
}

/// Swap one list of values per processor-patch face with the neighbouring
/// ranks. `lists` is indexed by boundary face (`face - n_internal_faces`);
/// the result holds, for every processor face, the list its partner face
/// sent, and an empty list for every other boundary face.
pub fn swap_face_lists<T, C>(comm: &C, tag: CommTag, mesh: &PolyMesh, lists: &[Vec<T>]) -> Result<Vec<Vec<T>>, MeshError>
where
    T: Pod,
    C: Communicator,
{
    let size = comm.size();
    let n_internal = mesh.n_internal_faces();
    if lists.len() != mesh.n_boundary_faces() {
        return Err(MeshError::FieldSize {
            name: "boundary face lists".into(),
            expected: mesh.n_boundary_faces(),
            got: lists.len(),
        });
    }

    let mut blocks: Vec<Vec<usize>> = vec![Vec::new(); size];
    for (p, patch) in mesh.patches().iter().enumerate() {
        if let PatchKind::Processor { neighb_proc, .. } = patch.kind {
            let slot = blocks.get_mut(neighb_proc).ok_or_else(|| MeshError::CommError {
                neighbor: neighb_proc,
                detail: format!("patch `{}` names rank {neighb_proc} of {size}", patch.name),
            })?;
            slot.push(p);
        }
    }

    let sends = blocks
        .iter()
        .map(|patches| {
            if patches.is_empty() {
                return Vec::new();
            }
            let mut w = WireWriter::new(kind::PATCH_VALUES);
            w.put_usize(patches.len());
            for &p in patches {
                let patch = &mesh.patches()[p];
                let PatchKind::Processor { referred_patch, .. } = patch.kind else {
                    continue;
                };
                w.put_opt(referred_patch);
                w.put_usize(patch.size);
                for f in patch.range() {
                    w.put_pods(&lists[f - n_internal]);
                }
            }
            w.finish()
        })
        .collect();
    let received = all_to_allv(comm, tag, sends)?;

    let mut out = vec![Vec::new(); lists.len()];
    for (src, patches) in blocks.iter().enumerate() {
        if patches.is_empty() {
            continue;
        }
        let mut r = WireReader::open(&received[src], kind::PATCH_VALUES)?;
        let n_blocks = r.get_count(16, "patch blocks")?;
        let mut by_referred: HashMap<Option<usize>, Vec<Vec<T>>> = HashMap::with_capacity(n_blocks);
        for _ in 0..n_blocks {
            let referred = r.get_opt()?;
            let n_faces = r.get_count(8, "patch faces")?;
            let faces = (0..n_faces).map(|_| r.get_pods::<T>()).collect::<Result<_, _>>()?;
            by_referred.insert(referred, faces);
        }
        r.finish()?;

        for &p in patches {
            let patch = &mesh.patches()[p];
            let PatchKind::Processor { referred_patch, .. } = patch.kind else {
                continue;
            };
            let key = referred_patch.and_then(|r| cyclic_partner(mesh, r));
            let theirs = by_referred.remove(&key).ok_or_else(|| MeshError::UnmatchedFace {
                origin_proc: src,
                origin_face: patch.start,
                detail: format!("rank {src} has no patch matching `{}`", patch.name),
            })?;
            if theirs.len() != patch.size {
                return Err(MeshError::UnmatchedFace {
                    origin_proc: src,
                    origin_face: patch.start,
                    detail: format!(
                        "patch `{}` has {} faces, its partner on rank {src} has {}",
                        patch.name,
                        patch.size,
                        theirs.len()
                    ),
                });
            }
            for (f, list) in patch.range().zip(theirs) {
                out[f - n_internal] = list;
            }
        }
    }
    Ok(out)
}

/// Swap one value per boundary face; non-processor faces keep their own value.
pub fn swap_boundary_values<T, C>(comm: &C, tag: CommTag, mesh: &PolyMesh, values: &[T]) -> Result<Vec<T>, MeshError>
where
    T: Pod,
    C: Communicator,
{
    let lists: Vec<Vec<T>> = values.iter().map(|&v| vec![v]).collect();
    let swapped = swap_face_lists(comm, tag, mesh, &lists)?;
    Ok(swapped
        .into_iter()
        .zip(values)
        .map(|(theirs, &mine)| theirs.first().copied().unwrap_or(mine))
        .collect())
}

/// Key shared by both copies of every face.
///
/// Internal and ordinary faces use their own `(rank, face)`. The two halves
/// of a local cyclic pair share the smaller face index; the two copies of a
/// processor face share the smaller of the two `(rank, face)` pairs.
pub fn face_keys<C: Communicator>(comm: &C, tag: CommTag, mesh: &PolyMesh) -> Result<Vec<GlobalKey>, MeshError> {
    let me = comm.rank();
    let n_internal = mesh.n_internal_faces();
    let own: Vec<GlobalKey> = (n_internal..mesh.n_faces()).map(|f| global_key(me, f)).collect();
    let theirs = swap_boundary_values(comm, tag, mesh, &own)?;

    let mut keys: Vec<GlobalKey> = (0..mesh.n_faces()).map(|f| global_key(me, f)).collect();
    for (p, patch) in mesh.patches().iter().enumerate() {
        for f in patch.range() {
            keys[f] = match patch.kind {
                PatchKind::Processor { .. } => own[f - n_internal].min(theirs[f - n_internal]),
                PatchKind::Cyclic { .. } => {
                    let partner = cyclic_partner_face(mesh, p, f).unwrap_or(f);
                    global_key(me, f.min(partner))
                }
                _ => keys[f],
            };
        }
    }
    Ok(keys)
}

/// Global identity of every local point: the smallest `(rank, point)` among
/// all copies of the point reachable across plain processor patches.
///
/// Chains of more than two ranks around a point need several passes; the
/// loop runs until no rank changes a key. More than `max_passes` passes
/// means the processor patches do not pair up consistently.
pub fn point_masters<C: Communicator>(
    comm: &C,
    tag: CommTag,
    mesh: &PolyMesh,
    max_passes: usize,
) -> Result<Vec<GlobalKey>, MeshError> {
    let me = comm.rank();
    let n_internal = mesh.n_internal_faces();
    let mut keys: Vec<GlobalKey> = (0..mesh.n_points()).map(|p| global_key(me, p)).collect();
    let plain: Vec<usize> = mesh
        .patches()
        .iter()
        .filter(|p| {
            matches!(
                p.kind,
                PatchKind::Processor {
                    referred_patch: None,
                    ..
                }
            )
        })
        .flat_map(|p| p.range())
        .collect();

    let mut passes = 0usize;
    loop {
        let mut lists: Vec<Vec<GlobalKey>> = vec![Vec::new(); mesh.n_boundary_faces()];
        for &f in &plain {
            lists[f - n_internal] = mesh.faces()[f].iter().map(|&p| keys[p]).collect();
        }
        let theirs = swap_face_lists(comm, tag, mesh, &lists)?;

        let mut first_changed = None;
        for &f in &plain {
            let face = &mesh.faces()[f];
            let other = &theirs[f - n_internal];
            if other.len() != face.len() {
                return Err(MeshError::UnmatchedFace {
                    origin_proc: me,
                    origin_face: f,
                    detail: format!("{} points here, {} on the partner face", face.len(), other.len()),
                });
            }
            let n = face.len();
            for (i, &p) in face.iter().enumerate() {
                let candidate = other[(n - i) % n];
                if candidate < keys[p] {
                    keys[p] = candidate;
                    first_changed.get_or_insert(p);
                }
            }
        }
        passes += 1;

        let flags = all_gather_u64(comm, tag.offset(2), u64::from(first_changed.is_some()))?;
        let changed: Vec<usize> = flags
            .iter()
            .enumerate()
            .filter_map(|(rank, &f)| (f != 0).then_some(rank))
            .collect();
        if changed.is_empty() {
            debug!("rank {me}: point masters settled after {passes} passes");
            return Ok(keys);
        }
        if passes >= max_passes {
            return Err(match first_changed {
                Some(point) => MeshError::PointMasterNotConverged {
                    iterations: passes,
                    rank: me,
                    point,
                    ranks: sharing_ranks(mesh, point),
                },
                None => MeshError::PeerFailure {
                    stage: Stage::Resolved,
                    ranks: changed,
                },
            });
        }
    }
}

/// Neighbour ranks whose processor patches touch `point`.
fn sharing_ranks(mesh: &PolyMesh, point: usize) -> Vec<usize> {
    let mut ranks: Vec<usize> = mesh
        .patches()
        .iter()
        .filter_map(|patch| {
            let nbr = patch.neighb_proc()?;
            patch
                .range()
                .any(|f| mesh.faces()[f].contains(&point))
                .then_some(nbr)
        })
        .collect();
    ranks.sort_unstable();
    ranks.dedup();
    ranks
}

/// Set the processor-patch values of a volume field to the cell values
/// across the interface.
pub fn correct_processor_values<T, C>(comm: &C, tag: CommTag, mesh: &PolyMesh, field: &mut Field<T>) -> Result<(), MeshError>
where
    T: FieldValue,
    C: Communicator,
{
    if field.location() != FieldLocation::Volume {
        return Ok(());
    }
    let owner_values: Vec<T> = (mesh.n_internal_faces()..mesh.n_faces())
        .map(|f| field.values()[mesh.owner()[f]])
        .collect();
    let theirs = swap_boundary_values(comm, tag, mesh, &owner_values)?;
    let n_internal = mesh.n_internal_faces();
    for (patch, pf) in mesh.patches().iter().zip(field.boundary_mut()) {
        if !patch.is_processor() {
            continue;
        }
        for (k, f) in patch.range().enumerate() {
            pf.values[k] = theirs[f - n_internal];
        }
    }
    Ok(())
}
