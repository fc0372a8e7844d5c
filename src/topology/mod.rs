//! Mesh topology: the face-based polyhedral mesh, its patches and zones, and
//! the topology-change engine that edits it.
//!
//! Meshes are never edited in place. A [`TopoChange`] records edits against a
//! reference mesh and [`TopoChange::commit`] builds a new mesh plus the
//! [`MapPolyMesh`] relating the two.

pub mod baffles;
pub mod map;
pub mod mesh;
pub mod patch;
pub mod remove_cells;
pub mod topo_change;
pub mod zones;

pub use map::MapPolyMesh;
pub use mesh::{Face, MeshParts, Point, PolyMesh, reverse_face};
pub use patch::{CyclicTransform, Patch, PatchKind, processor_patch_name};
pub use topo_change::{FaceEdit, TopoAction, TopoChange};
pub use zones::{Zone, ZoneKind, ZoneSet};
