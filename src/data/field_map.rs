//! Remap fields through a [`MapPolyMesh`] after a local topology change.

use serde::{Deserialize, Serialize};

use crate::data::field::{BoundaryKind, Field, FieldLocation, PatchField};
use crate::data::value::FieldValue;
use crate::mesh_error::MeshError;
use crate::topology::map::MapPolyMesh;
use crate::topology::mesh::PolyMesh;

/// Value of a cell without predecessor or master.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum NewCellPolicy<T> {
    #[default]
    Default,
    Value(T),
}

/// Value of a boundary face that used to be an internal face.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum ExposedFacePolicy<T> {
    /// Zero-gradient: the owner cell's value.
    #[default]
    OwnerValue,
    Value(T),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MapPolicy<T> {
    pub new_cell: NewCellPolicy<T>,
    pub exposed_face: ExposedFacePolicy<T>,
}

/// Remap `field` (living on `old_mesh`) onto `new_mesh`.
///
/// Cells, faces and points take the value of their predecessor, else of their
/// master. Boundary faces that were internal follow `policy.exposed_face`;
/// other boundary faces without a boundary predecessor take the owner value.
/// Oriented surface values change sign on flipped faces.
pub fn map_field<T: FieldValue>(
    field: &Field<T>,
    old_mesh: &PolyMesh,
    new_mesh: &PolyMesh,
    map: &MapPolyMesh,
    policy: &MapPolicy<T>,
) -> Result<Field<T>, MeshError> {
    field.check(old_mesh)?;
    let old = field.values();
    match field.location() {
        FieldLocation::Volume => {
            let fill = match policy.new_cell {
                NewCellPolicy::Default => T::default(),
                NewCellPolicy::Value(v) => v,
            };
            let internal: Vec<T> = (0..map.n_cells())
                .map(|c| map.cell_source(c).map_or(fill, |o| old[o]))
                .collect();

            let mut boundary = Vec::with_capacity(new_mesh.patches().len());
            for (p, patch) in new_mesh.patches().iter().enumerate() {
                let kind = map
                    .patch_map
                    .get(p)
                    .copied()
                    .flatten()
                    .and_then(|op| field.boundary().get(op))
                    .map_or_else(|| BoundaryKind::for_patch(&patch.kind), |pf| pf.kind);
                let values = patch
                    .range()
                    .map(|f| {
                        let owner_value = internal[new_mesh.owner()[f]];
                        if map.is_exposed(f) {
                            return match policy.exposed_face {
                                ExposedFacePolicy::OwnerValue => owner_value,
                                ExposedFacePolicy::Value(v) => v,
                            };
                        }
                        match map.face_source(f) {
                            Some(of) if !old_mesh.is_internal_face(of) => {
                                field.boundary_value(old_mesh, of).unwrap_or(owner_value)
                            }
                            _ => owner_value,
                        }
                    })
                    .collect();
                boundary.push(PatchField { kind, values });
            }
            let mut out = field.with_data(internal, boundary);
            out.correct_boundary(new_mesh);
            Ok(out)
        }
        FieldLocation::Surface => {
            let values = (0..map.n_faces())
                .map(|f| match map.face_source(f) {
                    Some(o) if field.is_oriented() && map.flip_face_flux[f] => old[o].negate(),
                    Some(o) => old[o],
                    None => T::default(),
                })
                .collect();
            Ok(field.with_data(values, Vec::new()))
        }
        FieldLocation::Point => {
            let values = (0..map.n_points())
                .map(|p| map.point_source(p).map_or_else(T::default, |o| old[o]))
                .collect();
            Ok(field.with_data(values, Vec::new()))
        }
    }
}
