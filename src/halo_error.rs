//! HaloError: Unified error type for pic-halo public APIs
//!
//! Every fallible operation in the crate returns this type. None of the variants
//! is retried internally: a failed decomposition or exchange round leaves the
//! simulation in a state that only the caller can decide to abandon.

use crate::data::field::FieldId;
use crate::topology::direction::Direction;
use crate::topology::patch_id::PatchId;
use thiserror::Error;

/// Unified error type for decomposition and exchange operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HaloError {
    /// The grid configuration or the requested decomposition is infeasible.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A particle moved further than one patch width in a single step.
    #[error(
        "Topology invariant violated: particle {particle_id} of patch {patch} at {position:?} \
         is more than one patch width outside the owned region"
    )]
    TopologyInvariantViolation {
        patch: PatchId,
        particle_id: u64,
        position: [f64; 3],
    },

    /// Message delivery to or from `peer` failed.
    #[error(
        "Transport failure with rank {peer} (patch {patch:?}, direction {direction:?}, field {field:?}): {reason}"
    )]
    TransportFailure {
        peer: usize,
        patch: Option<PatchId>,
        direction: Option<Direction>,
        field: Option<FieldId>,
        reason: String,
    },

    /// The same particle arrived in two destination patches during one migration round.
    ///
    /// Checked in debug builds or with `check-invariants`, across all ranks.
    /// `first` and `second` may live on different ranks.
    #[error("Particle {particle_id} delivered twice (patches {first} and {second})")]
    DoubleDelivery {
        particle_id: u64,
        first: PatchId,
        second: PatchId,
    },

    /// The patch does not exist in the current decomposition.
    #[error("Unknown patch {0}")]
    UnknownPatch(PatchId),

    /// The patch exists but is not owned by this rank.
    #[error("Patch {patch} is owned by rank {owner}, not by this rank")]
    NotLocal { patch: PatchId, owner: usize },

    /// A local cell index lies outside the field buffer.
    #[error("Cell {cell:?} outside {field:?} buffer of extent {extent:?}")]
    CellOutOfBounds {
        field: FieldId,
        cell: [usize; 3],
        extent: [usize; 3],
    },

    /// Imported data does not match the slab shape for the direction.
    #[error("Slab for {field:?} toward {direction} expects {expected} values, got {got}")]
    SlabLength {
        field: FieldId,
        direction: Direction,
        expected: usize,
        got: usize,
    },

    /// A mapping or communicator disagrees with the decomposition on rank count.
    #[error("Rank mismatch: expected {expected} ranks, got {got}")]
    RankMismatch { expected: usize, got: usize },
}

impl HaloError {
    /// Shorthand for a transport failure that cannot be pinned to a single segment.
    pub fn transport(peer: usize, reason: impl Into<String>) -> Self {
        HaloError::TransportFailure {
            peer,
            patch: None,
            direction: None,
            field: None,
            reason: reason.into(),
        }
    }
}
