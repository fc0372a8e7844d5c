//! Field data carried by a mesh: value types, volume/surface/point fields,
//! the named field store, particle clouds, and the maps that move all of
//! these across a topology change or a redistribution.
#![warn(missing_docs)]

pub mod cloud;
pub mod field;
pub mod field_map;
pub mod field_store;
pub mod field_transfer;
pub mod map_distribute;
pub mod value;

pub use cloud::{Attribute, Cloud};
pub use field::{BoundaryKind, Field, FieldLocation, PatchField};
pub use field_map::{ExposedFacePolicy, MapPolicy, NewCellPolicy, map_field};
pub use field_store::{AnyField, FieldStore};
pub use map_distribute::MapDistribute;
pub use value::{Dimensions, FieldValue, Label, Scalar, SymmTensor, Tensor, ValueType, Vector};
