//! MeshError: unified error type for fvmesh-distribute public APIs
//!
//! Every fallible operation in the crate reports through this enum. Errors
//! raised inside a redistribution are wrapped in [`MeshError::Stage`] so the
//! caller can tell which pipeline stage failed.

use crate::algs::distribute::Stage;
use thiserror::Error;

/// Unified error type for mesh, topology-change and redistribution operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshError {
    /// A face references a point that does not exist.
    #[error("face {face} references point {point}, but the mesh has {n_points} points")]
    PointOutOfRange {
        face: usize,
        point: usize,
        n_points: usize,
    },
    /// A face has fewer than three points.
    #[error("face {face} has {len} points (at least 3 required)")]
    DegenerateFace { face: usize, len: usize },
    /// A face owner or neighbour is not a valid cell.
    #[error("face {face} references cell {cell}, but the mesh has {n_cells} cells")]
    CellOutOfRange {
        face: usize,
        cell: usize,
        n_cells: usize,
    },
    /// An internal face has identical owner and neighbour.
    #[error("internal face {face} has owner == neighbour == {cell}")]
    SelfNeighbour { face: usize, cell: usize },
    /// Owner/neighbour arrays do not fit the face list.
    #[error("addressing size mismatch: {0}")]
    AddressingSize(String),
    /// Boundary patches do not tile the boundary faces contiguously.
    #[error("patch layout error: {0}")]
    PatchLayout(String),
    /// Non-processor patch tables differ between ranks.
    #[error("patch table of rank {rank} differs from rank 0: {detail}")]
    PatchMismatch { rank: usize, detail: String },
    /// A cell's faces do not form a closed polyhedron.
    #[error("cell {cell} is not closed: edge ({a}, {b}) is used {count} times")]
    OpenCell {
        cell: usize,
        a: usize,
        b: usize,
        count: usize,
    },
    /// A topology edit references an entity that does not exist (or was removed).
    #[error("invalid topology edit #{action}: {detail}")]
    InvalidTopoEdit { action: usize, detail: String },
    /// A face survives a topology change but one of its cells was removed.
    #[error("face {face} still references removed cell {cell}; remove or repatch it")]
    DanglingFace { face: usize, cell: usize },
    /// The destination array does not match the number of cells.
    #[error("destination array has {got} entries, mesh has {expected} cells")]
    DestinationSize { expected: usize, got: usize },
    /// A destination names a rank outside the communicator.
    #[error("cell {cell} is sent to rank {rank}, but the communicator has {size} ranks")]
    InvalidRank {
        cell: usize,
        rank: usize,
        size: usize,
    },
    /// Point-master propagation did not settle within the iteration cap.
    #[error(
        "point-master propagation did not converge after {iterations} passes \
         (point {point} on rank {rank}, shared with ranks {ranks:?})"
    )]
    PointMasterNotConverged {
        iterations: usize,
        rank: usize,
        point: usize,
        ranks: Vec<usize>,
    },
    /// A particle sits in a cell the mesh does not have.
    #[error("particle references cell {cell}, but the mesh has {n_cells} cells")]
    ParticleCell { cell: usize, n_cells: usize },
    /// A transferred or received record is malformed.
    #[error("wire protocol violation: {0}")]
    Wire(String),
    /// A coupled face has no partner where one is required.
    #[error("face with origin ({origin_proc}, {origin_face}) has no coupled partner: {detail}")]
    UnmatchedFace {
        origin_proc: usize,
        origin_face: usize,
        detail: String,
    },
    /// A field is registered on some ranks but not on others.
    #[error("field `{name}` is missing on ranks {ranks:?}")]
    MissingField { name: String, ranks: Vec<usize> },
    /// Field data length does not match the mesh it lives on.
    #[error("field `{name}` has {got} values, expected {expected}")]
    FieldSize {
        name: String,
        expected: usize,
        got: usize,
    },
    /// Communication failure with a neighbour.
    #[error("communication error with rank {neighbor}: {detail}")]
    CommError { neighbor: usize, detail: String },
    /// Another rank failed during a collective stage.
    #[error("rank(s) {ranks:?} failed during {stage}")]
    PeerFailure { stage: Stage, ranks: Vec<usize> },
    /// A redistribution stage failed.
    #[error("redistribution failed during {stage}: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<MeshError>,
    },
}

impl MeshError {
    /// Wrap this error with the pipeline stage it was raised in.
    pub fn at(self, stage: Stage) -> Self {
        match self {
            e @ MeshError::Stage { .. } => e,
            e => MeshError::Stage {
                stage,
                source: Box::new(e),
            },
        }
    }

    /// The pipeline stage this error was raised in, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            MeshError::Stage { stage, .. } | MeshError::PeerFailure { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
