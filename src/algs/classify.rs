//! Face classification for a target distribution, and the precondition
//! checks that must pass before anything is sent.

use log::debug;

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::coupling::{cyclic_partner_face, swap_boundary_values};
use crate::algs::exchange::all_gather;
use crate::algs::wire::{WireReader, WireWriter, kind};
use crate::mesh_error::MeshError;
use crate::topology::mesh::PolyMesh;
use crate::topology::patch::PatchKind;

/// What happens to one face under a distribution.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FaceClass {
    /// Internal face whose cells go to the same rank.
    Internal { dest: usize },
    /// Internal face whose cells go to different ranks: it becomes a
    /// processor face on both of them.
    Cut { owner_dest: usize, neighbour_dest: usize },
    /// Face of an uncoupled patch; it follows its owner.
    Boundary { patch: usize },
    /// Face of a cyclic or processor patch. `nbr_dest` is where the cell on
    /// the other side of the interface goes.
    Coupled { patch: usize, nbr_dest: usize },
}

/// Per-face classes and per-rank cell counts of a distribution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub classes: Vec<FaceClass>,
    /// Cells this rank sends to each rank (including itself).
    pub cells_per_rank: Vec<usize>,
    /// Cells leaving this rank.
    pub n_moving: usize,
}

impl Classification {
    /// Non-processor patch a face belongs to, directly or through the
    /// cyclic patch a processor patch refers to.
    pub fn origin_patch(&self, mesh: &PolyMesh, face: usize) -> Option<usize> {
        match self.classes[face] {
            FaceClass::Boundary { patch } => Some(patch),
            FaceClass::Coupled { patch, .. } => match mesh.patches()[patch].kind {
                PatchKind::Processor { referred_patch, .. } => referred_patch,
                _ => Some(patch),
            },
            FaceClass::Internal { .. } | FaceClass::Cut { .. } => None,
        }
    }

    /// Destination of the cell across `face` as seen from the cell on the
    /// side that goes to `from_dest`.
    pub fn nbr_dest(&self, face: usize, from_dest: usize) -> Option<usize> {
        match self.classes[face] {
            FaceClass::Internal { dest } => Some(dest),
            FaceClass::Cut {
                owner_dest,
                neighbour_dest,
            } => Some(if from_dest == owner_dest { neighbour_dest } else { owner_dest }),
            FaceClass::Boundary { .. } => None,
            FaceClass::Coupled { nbr_dest, .. } => Some(nbr_dest),
        }
    }
}

/// `dest` must hold one valid rank per cell.
pub fn check_destination(mesh: &PolyMesh, dest: &[usize], size: usize) -> Result<(), MeshError> {
    if dest.len() != mesh.n_cells() {
        return Err(MeshError::DestinationSize {
            expected: mesh.n_cells(),
            got: dest.len(),
        });
    }
    match dest.iter().enumerate().find(|(_, r)| **r >= size) {
        Some((cell, &rank)) => Err(MeshError::InvalidRank { cell, rank, size }),
        None => Ok(()),
    }
}

/// Signature of one non-processor patch: name, type and cyclic partner.
#[derive(Clone, Debug, PartialEq, Eq)]
struct PatchSignature {
    name: String,
    type_name: String,
    partner: Option<usize>,
}

fn signatures(mesh: &PolyMesh) -> Vec<PatchSignature> {
    mesh.patches()
        .iter()
        .filter(|p| !p.is_processor())
        .map(|p| PatchSignature {
            name: p.name.clone(),
            type_name: p.kind.type_name().to_owned(),
            partner: match p.kind {
                PatchKind::Cyclic { neighbour_patch, .. } => Some(neighbour_patch),
                _ => None,
            },
        })
        .collect()
}

/// Collective: every rank must list the same non-processor patches in the
/// same order. All ranks return the same verdict.
pub fn check_patch_agreement<C: Communicator>(comm: &C, tag: CommTag, mesh: &PolyMesh) -> Result<(), MeshError> {
    let mine = signatures(mesh);
    let mut w = WireWriter::new(kind::PATCH_TABLE);
    w.put_usize(mine.len());
    for s in &mine {
        w.put_str(&s.name);
        w.put_str(&s.type_name);
        w.put_opt(s.partner);
    }
    let gathered = all_gather(comm, tag, &w.finish())?;

    let tables = gathered
        .iter()
        .map(|bytes| {
            let mut r = WireReader::open(bytes, kind::PATCH_TABLE)?;
            let n = r.get_count(24, "patch table")?;
            let table = (0..n)
                .map(|_| {
                    Ok(PatchSignature {
                        name: r.get_str()?,
                        type_name: r.get_str()?,
                        partner: r.get_opt()?,
                    })
                })
                .collect::<Result<Vec<_>, MeshError>>()?;
            r.finish()?;
            Ok(table)
        })
        .collect::<Result<Vec<_>, MeshError>>()?;

    let reference = &tables[0];
    for (rank, table) in tables.iter().enumerate().skip(1) {
        if table.len() != reference.len() {
            return Err(MeshError::PatchMismatch {
                rank,
                detail: format!("{} non-processor patches, rank 0 has {}", table.len(), reference.len()),
            });
        }
        if let Some((i, (a, b))) = table.iter().zip(reference).enumerate().find(|(_, (a, b))| a != b) {
            return Err(MeshError::PatchMismatch {
                rank,
                detail: format!(
                    "patch {i} is `{}` ({}), rank 0 has `{}` ({})",
                    a.name, a.type_name, b.name, b.type_name
                ),
            });
        }
    }
    Ok(())
}

/// Classify every face of `mesh` under `dest`. Collective: destinations of
/// cells across processor patches are swapped with the neighbours.
pub fn classify<C: Communicator>(comm: &C, tag: CommTag, mesh: &PolyMesh, dest: &[usize]) -> Result<Classification, MeshError> {
    let me = comm.rank();
    let n_internal = mesh.n_internal_faces();
    let owner_dest: Vec<u64> = (n_internal..mesh.n_faces())
        .map(|f| dest[mesh.owner()[f]] as u64)
        .collect();
    let across = swap_boundary_values(comm, tag, mesh, &owner_dest)?;

    let mut classes = Vec::with_capacity(mesh.n_faces());
    for f in 0..n_internal {
        let (o, n) = (dest[mesh.owner()[f]], dest[mesh.neighbour()[f]]);
        classes.push(if o == n {
            FaceClass::Internal { dest: o }
        } else {
            FaceClass::Cut {
                owner_dest: o,
                neighbour_dest: n,
            }
        });
    }
    for (p, patch) in mesh.patches().iter().enumerate() {
        for f in patch.range() {
            classes.push(match patch.kind {
                PatchKind::Ordinary | PatchKind::Empty => FaceClass::Boundary { patch: p },
                PatchKind::Cyclic { .. } => {
                    let partner = cyclic_partner_face(mesh, p, f).ok_or_else(|| MeshError::UnmatchedFace {
                        origin_proc: me,
                        origin_face: f,
                        detail: format!("cyclic patch `{}` is larger than its partner", patch.name),
                    })?;
                    FaceClass::Coupled {
                        patch: p,
                        nbr_dest: dest[mesh.owner()[partner]],
                    }
                }
                PatchKind::Processor { .. } => FaceClass::Coupled {
                    patch: p,
                    nbr_dest: across[f - n_internal] as usize,
                },
            });
        }
    }

    let mut cells_per_rank = vec![0usize; comm.size()];
    for &d in dest {
        cells_per_rank[d] += 1;
    }
    let n_moving = dest.iter().filter(|&&d| d != me).count();
    debug!(
        "rank {me}: {} faces classified, {n_moving} of {} cells leave",
        classes.len(),
        mesh.n_cells()
    );
    Ok(Classification {
        classes,
        cells_per_rank,
        n_moving,
    })
}
