//! Fields: one value per cell, face or point of a mesh.
//!
//! A volume field also carries one [`PatchField`] per patch holding the
//! boundary-face values and the boundary-condition kind of that patch.

use serde::{Deserialize, Serialize};

use crate::data::value::{Dimensions, FieldValue};
use crate::mesh_error::MeshError;
use crate::topology::mesh::PolyMesh;
use crate::topology::patch::PatchKind;

/// Where a field's values live.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldLocation {
    Volume,
    Surface,
    Point,
}

impl FieldLocation {
    pub(crate) fn to_wire(self) -> u8 {
        match self {
            FieldLocation::Volume => 0,
            FieldLocation::Surface => 1,
            FieldLocation::Point => 2,
        }
    }

    pub(crate) fn from_wire(v: u8) -> Option<Self> {
        match v {
            0 => Some(FieldLocation::Volume),
            1 => Some(FieldLocation::Surface),
            2 => Some(FieldLocation::Point),
            _ => None,
        }
    }
}

/// Boundary-condition kind of one patch of a volume field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoundaryKind {
    /// Values are set from outside and carried as-is.
    Calculated,
    FixedValue,
    /// Values follow the owner cell.
    ZeroGradient,
    /// `empty` patch.
    Empty,
    /// Processor or cyclic patch: values are the cell values across the interface.
    Coupled,
}

impl BoundaryKind {
    /// Kind a freshly created patch of `kind` gets.
    pub fn for_patch(kind: &PatchKind) -> Self {
        match kind {
            PatchKind::Ordinary => BoundaryKind::Calculated,
            PatchKind::Empty => BoundaryKind::Empty,
            PatchKind::Processor { .. } | PatchKind::Cyclic { .. } => BoundaryKind::Coupled,
        }
    }

    pub(crate) fn to_wire(self) -> u8 {
        match self {
            BoundaryKind::Calculated => 0,
            BoundaryKind::FixedValue => 1,
            BoundaryKind::ZeroGradient => 2,
            BoundaryKind::Empty => 3,
            BoundaryKind::Coupled => 4,
        }
    }

    pub(crate) fn from_wire(v: u8) -> Option<Self> {
        match v {
            0 => Some(BoundaryKind::Calculated),
            1 => Some(BoundaryKind::FixedValue),
            2 => Some(BoundaryKind::ZeroGradient),
            3 => Some(BoundaryKind::Empty),
            4 => Some(BoundaryKind::Coupled),
            _ => None,
        }
    }
}

/// Values of a volume field on one patch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatchField<T> {
    pub kind: BoundaryKind,
    pub values: Vec<T>,
}

/// A named field over a mesh.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field<T> {
    name: String,
    dimensions: Dimensions,
    location: FieldLocation,
    /// Surface fields only: values are fluxes and change sign with the face.
    oriented: bool,
    values: Vec<T>,
    boundary: Vec<PatchField<T>>,
}

impl<T: FieldValue> Field<T> {
    /// Volume field; boundary values start as the owner-cell values.
    pub fn volume(
        name: impl Into<String>,
        dimensions: Dimensions,
        mesh: &PolyMesh,
        internal: Vec<T>,
    ) -> Result<Self, MeshError> {
        let name = name.into();
        expect_len(&name, mesh.n_cells(), internal.len())?;
        let boundary = mesh
            .patches()
            .iter()
            .map(|p| PatchField {
                kind: BoundaryKind::for_patch(&p.kind),
                values: p.range().map(|f| internal[mesh.owner()[f]]).collect(),
            })
            .collect();
        Ok(Self {
            name,
            dimensions,
            location: FieldLocation::Volume,
            oriented: false,
            values: internal,
            boundary,
        })
    }

    pub fn surface(
        name: impl Into<String>,
        dimensions: Dimensions,
        mesh: &PolyMesh,
        values: Vec<T>,
        oriented: bool,
    ) -> Result<Self, MeshError> {
        let name = name.into();
        expect_len(&name, mesh.n_faces(), values.len())?;
        Ok(Self {
            name,
            dimensions,
            location: FieldLocation::Surface,
            oriented,
            values,
            boundary: Vec::new(),
        })
    }

    pub fn point(
        name: impl Into<String>,
        dimensions: Dimensions,
        mesh: &PolyMesh,
        values: Vec<T>,
    ) -> Result<Self, MeshError> {
        let name = name.into();
        expect_len(&name, mesh.n_points(), values.len())?;
        Ok(Self {
            name,
            dimensions,
            location: FieldLocation::Point,
            oriented: false,
            values,
            boundary: Vec::new(),
        })
    }

    /// Same metadata, new data.
    pub fn with_data(&self, values: Vec<T>, boundary: Vec<PatchField<T>>) -> Self {
        Self {
            name: self.name.clone(),
            dimensions: self.dimensions,
            location: self.location,
            oriented: self.oriented,
            values,
            boundary,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn location(&self) -> FieldLocation {
        self.location
    }

    pub fn is_oriented(&self) -> bool {
        self.oriented
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<T> {
        self.values.get(i).copied()
    }

    pub fn set(&mut self, i: usize, value: T) -> Result<(), MeshError> {
        let len = self.values.len();
        match self.values.get_mut(i) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(MeshError::FieldSize {
                name: self.name.clone(),
                expected: i + 1,
                got: len,
            }),
        }
    }

    /// Resize the value array, padding with `T::default()`.
    pub fn resize(&mut self, n: usize) {
        self.values.resize(n, T::default());
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    pub fn boundary(&self) -> &[PatchField<T>] {
        &self.boundary
    }

    pub fn boundary_mut(&mut self) -> &mut [PatchField<T>] {
        &mut self.boundary
    }

    /// Value on boundary face `face` (volume fields only).
    pub fn boundary_value(&self, mesh: &PolyMesh, face: usize) -> Option<T> {
        let patch = mesh.which_patch(face)?;
        let start = mesh.patches()[patch].start;
        self.boundary.get(patch)?.values.get(face - start).copied()
    }

    /// Check the sizes against `mesh`.
    pub fn check(&self, mesh: &PolyMesh) -> Result<(), MeshError> {
        let expected = match self.location {
            FieldLocation::Volume => mesh.n_cells(),
            FieldLocation::Surface => mesh.n_faces(),
            FieldLocation::Point => mesh.n_points(),
        };
        expect_len(&self.name, expected, self.values.len())?;
        if self.location == FieldLocation::Volume {
            expect_len(&self.name, mesh.patches().len(), self.boundary.len())?;
            for (patch, pf) in mesh.patches().iter().zip(&self.boundary) {
                expect_len(&format!("{}.{}", self.name, patch.name), patch.size, pf.values.len())?;
            }
        }
        Ok(())
    }

    /// Re-evaluate boundary values that follow the interior: zero-gradient
    /// patches take the owner value, cyclic patches the value behind the
    /// partner face. Processor patches need the neighbour rank and are left
    /// to [`crate::algs::coupling::correct_processor_values`].
    pub fn correct_boundary(&mut self, mesh: &PolyMesh) {
        if self.location != FieldLocation::Volume {
            return;
        }
        for (p, patch) in mesh.patches().iter().enumerate() {
            let Some(pf) = self.boundary.get_mut(p) else {
                continue;
            };
            match (&patch.kind, pf.kind) {
                (_, BoundaryKind::ZeroGradient) => {
                    for (k, f) in patch.range().enumerate() {
                        pf.values[k] = self.values[mesh.owner()[f]];
                    }
                }
                (PatchKind::Cyclic { neighbour_patch, .. }, BoundaryKind::Coupled) => {
                    let partner = &mesh.patches()[*neighbour_patch];
                    if partner.size != patch.size {
                        continue;
                    }
                    for (k, f) in partner.range().enumerate() {
                        pf.values[k] = self.values[mesh.owner()[f]];
                    }
                }
                _ => {}
            }
        }
    }
}

pub(crate) fn expect_len(name: &str, expected: usize, got: usize) -> Result<(), MeshError> {
    if expected == got {
        Ok(())
    } else {
        Err(MeshError::FieldSize {
            name: name.to_owned(),
            expected,
            got,
        })
    }
}
