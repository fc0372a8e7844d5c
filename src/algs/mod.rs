//! Parallel algorithms: message passing, face classification, mesh transfer
//! and the redistribution driver built on top of them.

pub mod classify;
pub mod communicator;
pub mod coupling;
pub mod distribute;
pub mod duplicate_points;
pub mod exchange;
pub mod meshgen;
pub mod point_region;
pub mod stitch;
pub mod subset;
pub mod transfer;
pub mod wire;

pub use distribute::{DistributeConfig, Distributor, MeshContext, RedistributionMap, Stage};
pub use duplicate_points::duplicate_points;
pub use point_region::LocalPointRegion;
pub use subset::subset_mesh;
