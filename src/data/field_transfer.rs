//! Cross-process field migration.
//!
//! The sending side packs, per destination, the values of every agreed field
//! in the order of the destination's sub maps. The receiving side scatters
//! them through the construct maps of the stitched mesh and rebuilds each
//! field with its own metadata: name, dimensions, orientation and the
//! boundary kinds of its non-processor patches never travel.
//!
//! Volume fields send one extra value per face: the boundary value for
//! boundary faces and the value of the cell going to the destination for
//! internal faces. New boundary faces take these, so exposed faces default
//! to their owner's value.

use log::warn;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::coupling::correct_processor_values;
use crate::algs::distribute::MissingFieldPolicy;
use crate::algs::exchange::all_gather;
use crate::algs::wire::{WireReader, WireWriter, kind};
use crate::data::field::{BoundaryKind, Field, FieldLocation, PatchField};
use crate::data::field_store::{AnyField, FieldEntry, FieldStore, map_any_field, with_field};
use crate::data::map_distribute::MapDistribute;
use crate::data::value::{FieldValue, ValueType};
use crate::mesh_error::MeshError;
use crate::topology::mesh::PolyMesh;

/// Face addressing of the sending mesh, kept so volume fields can be packed
/// after the mesh itself is gone.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFaces {
    owner: Vec<usize>,
    neighbour: Vec<usize>,
    /// Per boundary face: patch and position within the patch.
    boundary: Vec<(usize, usize)>,
}

impl SourceFaces {
    pub fn of(mesh: &PolyMesh) -> Self {
        let boundary = mesh
            .patches()
            .iter()
            .enumerate()
            .flat_map(|(p, patch)| (0..patch.size).map(move |k| (p, k)))
            .collect();
        Self {
            owner: mesh.owner().to_vec(),
            neighbour: mesh.neighbour().to_vec(),
            boundary,
        }
    }
}

/// Sender side of a migration.
#[derive(Copy, Clone, Debug)]
pub struct Outgoing<'a> {
    pub faces_of: &'a SourceFaces,
    /// Destination rank of every sending cell.
    pub cell_dest: &'a [usize],
    pub cells: &'a MapDistribute,
    pub faces: &'a MapDistribute,
    pub points: &'a MapDistribute,
}

fn pick<T: Copy>(values: &[T], i: usize, name: &str) -> Result<T, MeshError> {
    values.get(i).copied().ok_or_else(|| MeshError::FieldSize {
        name: name.to_owned(),
        expected: i + 1,
        got: values.len(),
    })
}

impl Outgoing<'_> {
    /// Face value of a volume field as seen from the cells going to `to`.
    fn face_value<T: FieldValue>(&self, field: &Field<T>, face: usize, to: usize) -> Result<T, MeshError> {
        let src = self.faces_of;
        let n_internal = src.neighbour.len();
        if face >= n_internal {
            let (p, k) = src.boundary[face - n_internal];
            let pf = field.boundary().get(p).ok_or_else(|| MeshError::FieldSize {
                name: field.name().to_owned(),
                expected: p + 1,
                got: field.boundary().len(),
            })?;
            return pick(&pf.values, k, field.name());
        }
        let owner = src.owner[face];
        let cell = if self.cell_dest[owner] == to { owner } else { src.neighbour[face] };
        pick(field.values(), cell, field.name())
    }

    /// Values of one field bound for `to`.
    pub fn pack<T: FieldValue>(&self, field: &Field<T>, to: usize) -> Result<Vec<u8>, MeshError> {
        let gather = |map: &MapDistribute| -> Result<Vec<T>, MeshError> {
            map.sub_map[to].iter().map(|&i| pick(field.values(), i, field.name())).collect()
        };
        let mut w = WireWriter::new(kind::FIELD_VALUES);
        w.put_str(field.name());
        w.put_u8(field.location().to_wire());
        match field.location() {
            FieldLocation::Volume => {
                w.put_pods(&gather(self.cells)?);
                let faces = self.faces.sub_map[to]
                    .iter()
                    .map(|&f| self.face_value(field, f, to))
                    .collect::<Result<Vec<T>, MeshError>>()?;
                w.put_pods(&faces);
            }
            FieldLocation::Surface => w.put_pods(&gather(self.faces)?),
            FieldLocation::Point => w.put_pods(&gather(self.points)?),
        }
        Ok(w.finish())
    }
}

/// Receiver side of a migration.
#[derive(Copy, Clone, Debug)]
pub struct Incoming<'a> {
    pub mesh: &'a PolyMesh,
    pub cells: &'a MapDistribute,
    pub faces: &'a MapDistribute,
    pub points: &'a MapDistribute,
    /// Per new patch: the non-processor patch it continues.
    pub patch_origin: &'a [Option<usize>],
}

impl Incoming<'_> {
    /// Rebuild `old` on the new mesh from the records received from every
    /// rank (empty when a rank sent nothing).
    pub fn unpack<T: FieldValue>(&self, old: &Field<T>, received: &[&[u8]]) -> Result<Field<T>, MeshError> {
        let location = old.location();
        let mut first = Vec::with_capacity(received.len());
        let mut second = Vec::with_capacity(received.len());
        for bytes in received {
            if bytes.is_empty() {
                first.push(Vec::new());
                second.push(Vec::new());
                continue;
            }
            let mut r = WireReader::open(bytes, kind::FIELD_VALUES)?;
            let name = r.get_str()?;
            let loc = FieldLocation::from_wire(r.get_u8()?);
            if name != old.name() || loc != Some(location) {
                return Err(MeshError::Wire(format!(
                    "expected values of `{}`, got `{name}` ({loc:?})",
                    old.name()
                )));
            }
            first.push(r.get_pods::<T>()?);
            if location == FieldLocation::Volume {
                second.push(r.get_pods::<T>()?);
            }
            r.finish()?;
        }

        let field = match location {
            FieldLocation::Volume => {
                let values = self.cells.unpack(&first, false)?;
                let faces = self.faces.unpack(&second, false)?;
                let boundary = self
                    .mesh
                    .patches()
                    .iter()
                    .zip(self.patch_origin)
                    .map(|(patch, origin)| {
                        let kind = match origin {
                            Some(c) => old.boundary().get(*c).map_or(BoundaryKind::for_patch(&patch.kind), |pf| pf.kind),
                            None => BoundaryKind::Coupled,
                        };
                        PatchField {
                            kind,
                            values: faces[patch.range()].to_vec(),
                        }
                    })
                    .collect();
                let mut field = old.with_data(values, boundary);
                field.correct_boundary(self.mesh);
                field
            }
            FieldLocation::Surface => old.with_data(self.faces.unpack(&first, old.is_oriented())?, Vec::new()),
            FieldLocation::Point => old.with_data(self.points.unpack(&first, false)?, Vec::new()),
        };
        field.check(self.mesh)?;
        Ok(field)
    }
}

/// Collective: names of the fields every rank holds with the same element
/// type and location, in first-registration order.
///
/// A field missing on some ranks fails the redistribution when it is
/// required anywhere or the policy says so; otherwise it is dropped with a
/// warning. All ranks reach the same verdict.
pub fn agree_field_names<C: Communicator>(
    comm: &C,
    tag: CommTag,
    store: &FieldStore,
    policy: MissingFieldPolicy,
) -> Result<Vec<String>, MeshError> {
    let mut w = WireWriter::new(kind::FIELD_NAMES);
    w.put_usize(store.len());
    for e in store.entries() {
        w.put_str(e.field.name());
        w.put_u8(e.field.value_type().to_wire());
        w.put_u8(e.field.location().to_wire());
        w.put_bool(e.required);
    }
    let gathered = all_gather(comm, tag, &w.finish())?;

    type Signature = (ValueType, FieldLocation);
    let mut seen: Vec<(String, Signature, Vec<usize>, bool)> = Vec::new();
    for (rank, bytes) in gathered.iter().enumerate() {
        let mut r = WireReader::open(bytes, kind::FIELD_NAMES)?;
        let n = r.get_count(11, "field names")?;
        for _ in 0..n {
            let name = r.get_str()?;
            let vt = ValueType::from_wire(r.get_u8()?)
                .ok_or_else(|| MeshError::Wire(format!("unknown value type for `{name}`")))?;
            let loc = FieldLocation::from_wire(r.get_u8()?)
                .ok_or_else(|| MeshError::Wire(format!("unknown location for `{name}`")))?;
            let required = r.get_bool()?;
            match seen.iter_mut().find(|s| s.0 == name) {
                Some(s) => {
                    if s.1 == (vt, loc) {
                        s.2.push(rank);
                    }
                    s.3 |= required;
                }
                None => seen.push((name, (vt, loc), vec![rank], required)),
            }
        }
        r.finish()?;
    }

    let mut names = Vec::with_capacity(seen.len());
    for (name, _, holders, required) in seen {
        if holders.len() == comm.size() {
            names.push(name);
            continue;
        }
        let ranks: Vec<usize> = (0..comm.size()).filter(|r| !holders.contains(r)).collect();
        if required || policy == MissingFieldPolicy::Fail {
            return Err(MeshError::MissingField { name, ranks });
        }
        if store.get_any(&name).is_some() {
            warn!("field `{name}` is missing on ranks {ranks:?}; it is dropped from this redistribution");
        }
    }
    Ok(names)
}

fn agreed<'s>(store: &'s FieldStore, names: &[String]) -> Result<Vec<&'s FieldEntry>, MeshError> {
    names
        .iter()
        .map(|n| {
            store
                .entries()
                .iter()
                .find(|e| e.field.name() == n)
                .ok_or_else(|| MeshError::MissingField {
                    name: n.clone(),
                    ranks: Vec::new(),
                })
        })
        .collect()
}

/// Per destination, one `FIELDS` record holding the values of every agreed
/// field bound there. Destinations without cells from this rank get an
/// empty buffer.
pub fn pack_fields(store: &FieldStore, names: &[String], out: &Outgoing<'_>) -> Result<Vec<Vec<u8>>, MeshError> {
    let entries = agreed(store, names)?;
    let pack_one = |to: usize| -> Result<Vec<u8>, MeshError> {
        if out.cells.sub_map[to].is_empty() {
            return Ok(Vec::new());
        }
        let mut w = WireWriter::new(kind::FIELDS);
        w.put_usize(entries.len());
        for e in &entries {
            let bytes = with_field!(&e.field, f => out.pack(f, to))?;
            w.put_bytes(&bytes);
        }
        Ok(w.finish())
    };
    let n_procs = out.cells.n_procs();
    #[cfg(feature = "rayon")]
    let packed = (0..n_procs).into_par_iter().map(pack_one).collect();
    #[cfg(not(feature = "rayon"))]
    let packed = (0..n_procs).map(pack_one).collect();
    packed
}

/// Rebuild the agreed fields from the `FIELDS` records received from every
/// rank. Processor-patch values are left for [`correct_coupled_boundaries`].
pub fn unpack_fields(
    store: &FieldStore,
    names: &[String],
    incoming: &Incoming<'_>,
    received: &[&[u8]],
) -> Result<FieldStore, MeshError> {
    let entries = agreed(store, names)?;
    let mut per_field: Vec<Vec<&[u8]>> = vec![vec![&[][..]; received.len()]; entries.len()];
    for (src, bytes) in received.iter().enumerate() {
        if bytes.is_empty() {
            continue;
        }
        let mut r = WireReader::open(bytes, kind::FIELDS)?;
        let n = r.get_count(8, "fields")?;
        if n != entries.len() {
            return Err(MeshError::Wire(format!(
                "rank {src} sent {n} fields, {} agreed",
                entries.len()
            )));
        }
        for slot in per_field.iter_mut() {
            slot[src] = r.get_bytes()?;
        }
        r.finish()?;
    }
    entries
        .iter()
        .zip(&per_field)
        .map(|(e, bytes)| {
            let field: AnyField = map_any_field!(&e.field, f => incoming.unpack(f, bytes))?;
            Ok(FieldEntry {
                field,
                required: e.required,
            })
        })
        .collect()
}

/// Collective: refresh the processor-patch values of every volume field.
pub fn correct_coupled_boundaries<C: Communicator>(
    comm: &C,
    tag: CommTag,
    mesh: &PolyMesh,
    store: &mut FieldStore,
) -> Result<(), MeshError> {
    for e in store.entries_mut() {
        with_field!(&mut e.field, f => correct_processor_values(comm, tag, mesh, f))?;
    }
    Ok(())
}
