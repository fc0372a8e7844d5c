//! Type-erased collection of the fields registered on a mesh.

use serde::{Deserialize, Serialize};

use crate::data::field::{Field, FieldLocation};
use crate::data::field_map::{MapPolicy, map_field};
use crate::data::value::{Label, Scalar, SymmTensor, Tensor, ValueType, Vector};
use crate::mesh_error::MeshError;
use crate::topology::map::MapPolyMesh;
use crate::topology::mesh::PolyMesh;

/// Tagged field of any supported element type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AnyField {
    Scalar(Field<Scalar>),
    Vector(Field<Vector>),
    SymmTensor(Field<SymmTensor>),
    Tensor(Field<Tensor>),
    Label(Field<Label>),
}

/// Run `$body` with `$f` bound to the typed field inside an [`AnyField`].
macro_rules! with_field {
    ($any:expr, $f:ident => $body:expr) => {
        match $any {
            AnyField::Scalar($f) => $body,
            AnyField::Vector($f) => $body,
            AnyField::SymmTensor($f) => $body,
            AnyField::Tensor($f) => $body,
            AnyField::Label($f) => $body,
        }
    };
}
pub(crate) use with_field;

/// Like [`with_field!`] but rewraps the typed result into the same variant.
macro_rules! map_any_field {
    ($any:expr, $f:ident => $body:expr) => {
        match $any {
            AnyField::Scalar($f) => $body.map(AnyField::Scalar),
            AnyField::Vector($f) => $body.map(AnyField::Vector),
            AnyField::SymmTensor($f) => $body.map(AnyField::SymmTensor),
            AnyField::Tensor($f) => $body.map(AnyField::Tensor),
            AnyField::Label($f) => $body.map(AnyField::Label),
        }
    };
}
pub(crate) use map_any_field;

impl AnyField {
    pub fn value_type(&self) -> ValueType {
        match self {
            AnyField::Scalar(_) => ValueType::Scalar,
            AnyField::Vector(_) => ValueType::Vector,
            AnyField::SymmTensor(_) => ValueType::SymmTensor,
            AnyField::Tensor(_) => ValueType::Tensor,
            AnyField::Label(_) => ValueType::Label,
        }
    }

    pub fn name(&self) -> &str {
        with_field!(self, f => f.name())
    }

    pub fn location(&self) -> FieldLocation {
        with_field!(self, f => f.location())
    }

    pub fn check(&self, mesh: &PolyMesh) -> Result<(), MeshError> {
        with_field!(self, f => f.check(mesh))
    }

    /// Remap through a local topology change with the default policies.
    pub fn map(&self, old_mesh: &PolyMesh, new_mesh: &PolyMesh, map: &MapPolyMesh) -> Result<AnyField, MeshError> {
        map_any_field!(self, f => map_field(f, old_mesh, new_mesh, map, &MapPolicy::default()))
    }
}

/// Maps element types onto [`AnyField`] variants for typed access.
pub trait StoredValue: Sized + 'static {
    const VALUE_TYPE: ValueType;

    fn wrap(field: Field<Self>) -> AnyField;
    fn unwrap(field: &AnyField) -> Option<&Field<Self>>;
    fn unwrap_mut(field: &mut AnyField) -> Option<&mut Field<Self>>;
}

macro_rules! impl_stored_value {
    ($t:ty, $variant:ident) => {
        impl StoredValue for $t {
            const VALUE_TYPE: ValueType = ValueType::$variant;

            fn wrap(field: Field<Self>) -> AnyField {
                AnyField::$variant(field)
            }

            fn unwrap(field: &AnyField) -> Option<&Field<Self>> {
                if let AnyField::$variant(f) = field { Some(f) } else { None }
            }

            fn unwrap_mut(field: &mut AnyField) -> Option<&mut Field<Self>> {
                if let AnyField::$variant(f) = field { Some(f) } else { None }
            }
        }
    };
}

impl_stored_value!(Scalar, Scalar);
impl_stored_value!(Vector, Vector);
impl_stored_value!(SymmTensor, SymmTensor);
impl_stored_value!(Tensor, Tensor);
impl_stored_value!(Label, Label);

/// One registered field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldEntry {
    pub field: AnyField,
    /// Required fields must exist on every rank for a redistribution to go ahead.
    pub required: bool,
}

/// Fields registered on one mesh, in registration order. Names are unique.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldStore {
    entries: Vec<FieldEntry>,
}

impl FieldStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a field, replacing any field of the same name.
    pub fn insert<T: StoredValue>(&mut self, field: Field<T>, required: bool) {
        self.insert_any(T::wrap(field), required);
    }

    pub fn insert_any(&mut self, field: AnyField, required: bool) {
        let entry = FieldEntry { field, required };
        match self.position(entry.field.name()) {
            Some(i) => self.entries[i] = entry,
            None => self.entries.push(entry),
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.field.name() == name)
    }

    pub fn get<T: StoredValue>(&self, name: &str) -> Option<&Field<T>> {
        self.get_any(name).and_then(T::unwrap)
    }

    pub fn get_mut<T: StoredValue>(&mut self, name: &str) -> Option<&mut Field<T>> {
        let i = self.position(name)?;
        T::unwrap_mut(&mut self.entries[i].field)
    }

    pub fn get_any(&self, name: &str) -> Option<&AnyField> {
        self.position(name).map(|i| &self.entries[i].field)
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldEntry> {
        self.position(name).map(|i| self.entries.remove(i))
    }

    pub fn entries(&self) -> &[FieldEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [FieldEntry] {
        &mut self.entries
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.field.name())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check every field against `mesh`.
    pub fn check(&self, mesh: &PolyMesh) -> Result<(), MeshError> {
        self.entries.iter().try_for_each(|e| e.field.check(mesh))
    }

    /// Remap every field through a local topology change.
    pub fn map(&self, old_mesh: &PolyMesh, new_mesh: &PolyMesh, map: &MapPolyMesh) -> Result<FieldStore, MeshError> {
        let entries = self
            .entries
            .iter()
            .map(|e| {
                Ok(FieldEntry {
                    field: e.field.map(old_mesh, new_mesh, map)?,
                    required: e.required,
                })
            })
            .collect::<Result<_, MeshError>>()?;
        Ok(FieldStore { entries })
    }
}

impl FromIterator<FieldEntry> for FieldStore {
    fn from_iter<I: IntoIterator<Item = FieldEntry>>(iter: I) -> Self {
        let mut store = FieldStore::new();
        for e in iter {
            store.insert_any(e.field, e.required);
        }
        store
    }
}
