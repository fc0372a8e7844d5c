#![cfg_attr(docsrs, feature(doc_cfg))]
//! # fvmesh-distribute
//!
//! fvmesh-distribute moves cells of a decomposed finite-volume mesh between
//! ranks, together with the fields and particle clouds that live on it. It
//! provides the face-based polyhedral mesh, a topology-change engine that
//! records the mapping between old and new meshes, and the collective
//! redistribution pipeline that uses both.
//!
//! ## Features
//! - Face-based polyhedral meshes with ordinary, empty, cyclic and processor patches
//! - Topology changes (cell removal, baffles, point duplication) with full old-to-new maps
//! - Volume, surface and point fields that follow a topology change or a redistribution
//! - Lagrangian particle clouds that follow their cells
//! - Pluggable communication backends (serial, in-process threads, MPI)
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! fvmesh-distribute = "0.3"
//! # Optional features:
//! # features = ["mpi-support", "rayon"]
//! ```
//!
//! Every rank calls [`Distributor::distribute`](algs::distribute::Distributor::distribute)
//! with the destination rank of each of its local cells. On success the
//! [`MeshContext`](algs::distribute::MeshContext) holds the new local mesh and
//! the returned [`RedistributionMap`](algs::distribute::RedistributionMap)
//! can move further data the same way. On error every rank reports the
//! failing stage and no context is changed.
//!
//! ## Determinism
//!
//! Received pieces are stitched in rank order and coupled faces are paired
//! by global key, so the same inputs yield the same local numbering on
//! every run.

pub mod algs;
pub mod data;
pub mod mesh_error;
pub mod topology;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{CommTag, Communicator, NoComm, RayonComm};
    pub use crate::algs::distribute::{
        DistributeConfig, Distributor, MeshContext, MissingFieldPolicy, RedistributionMap, Stage,
    };
    pub use crate::algs::meshgen::{block_mesh, chain_mesh, cyclic_block_mesh, decompose};
    pub use crate::data::cloud::{Attribute, Cloud};
    pub use crate::data::field::{BoundaryKind, Field, FieldLocation};
    pub use crate::data::field_store::FieldStore;
    pub use crate::data::value::{Dimensions, FieldValue, Scalar, Vector};
    pub use crate::mesh_error::MeshError;
    pub use crate::topology::map::MapPolyMesh;
    pub use crate::topology::mesh::{PolyMesh, Point};
    pub use crate::topology::patch::{Patch, PatchKind};
    pub use crate::topology::topo_change::TopoChange;
}

#[cfg(test)]
mod tests {
    #[test]
    fn usage_snippet_names_this_release() {
        let version = env!("CARGO_PKG_VERSION");
        let minor = version.rsplit_once('.').map_or(version, |(head, _)| head);
        let line = format!("fvmesh-distribute = \"{minor}\"");
        assert!(include_str!("lib.rs").contains(&line), "usage snippet should pin {minor}");
    }
}
