#![cfg_attr(docsrs, feature(doc_cfg))]
//! # pic-halo
//!
//! pic-halo splits the global grid of a particle-in-cell plasma code into
//! rectangular patches, spreads the patches over ranks, and keeps
//! neighboring patches consistent every timestep.
//!
//! ## Features
//! - Cartesian decomposition of 1-, 2- and 3-D grids with lexicographic or
//!   Morton patch numbering
//! - Yee-staggered field buffers with ghost margins and strided typed regions
//! - Halo exchange in two flavours: **sum** for deposited densities (ρ, J) and
//!   **copy** for solver outputs (E, B), faces, edges and corners included
//!   in one round, or one axis at a time
//! - Particle migration across patch boundaries with periodic wrapping
//! - Rebalancing: moving whole patches between ranks
//! - A moving window along non-periodic axes
//! - Pluggable transports: single rank, in-process threads, MPI
//!   (`mpi-support` feature)
//!
//! ## Timestep
//! ```text
//! deposit -> sum_exchange(densities) -> field solve -> copy_exchange(E, B)
//!         -> push particles -> migrate_particles
//! ```
//!
//! ## Usage
//! ```rust
//! use pic_halo::prelude::*;
//!
//! let grid = GlobalGrid::try_from(GridConfig {
//!     dim: 2,
//!     cells: vec![32, 32],
//!     cell_size: vec![0.1, 0.1],
//!     ghost_width: 2,
//!     stencil_radius: 1,
//!     periodic: vec![true, true],
//! })?;
//! let mapping = decompose(grid, 4, 1, PatchOrdering::Morton)?;
//! let mut engine = ExchangeEngine::new(NoComm, mapping)?;
//! for patch in engine.local_patches_mut() {
//!     patch.deposit(FieldId::Rho, [2, 2, 0], 1.0)?;
//! }
//! engine.sum_exchange(&FieldId::DENSITIES)?;
//! engine.copy_exchange(&FieldId::ELECTROMAGNETIC)?;
//! engine.migrate_particles()?;
//! # Ok::<(), pic_halo::halo_error::HaloError>(())
//! ```

pub mod algs;
pub mod data;
pub mod debug_invariants;
pub mod halo_error;
pub mod patch;
pub mod topology;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{CommTag, Communicator, ExchangeTags, NoComm, ThreadComm, Wait};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::exchange::{
        ExchangeEngine, HaloReport, HaloRound, MigrationReport, MigrationRound, RebalanceReport,
        WindowShiftReport,
    };
    pub use crate::data::field::{FieldBuffer, FieldId, FieldLayout, Staggering};
    pub use crate::data::halo_plan::{HaloMode, HaloPlan, TransferDescriptor};
    pub use crate::data::particle::{OutgoingParticles, Particle};
    pub use crate::data::region::{RegionDescriptor, RegionView};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::halo_error::HaloError;
    pub use crate::patch::{Locality, NeighborEntry, NeighborTable, Patch};
    pub use crate::topology::{
        Decomposition, Direction, GlobalGrid, GridConfig, PatchCoords, PatchId, PatchMapping,
        PatchOrdering, PatchRegion, RankAssignment, decompose,
    };
}
