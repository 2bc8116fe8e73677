//! Grid topology: the global grid, its patch decomposition, directions
//! between patches and the patch-to-rank ownership map.
//!
//! Everything in this module is immutable once built and identical on every
//! rank that builds it from the same inputs.

pub mod decomposition;
pub mod direction;
pub mod grid;
pub mod ownership;
pub mod patch_id;

pub use decomposition::{Decomposition, PatchOrdering, PatchRegion};
pub use direction::Direction;
pub use grid::{GlobalGrid, GridConfig};
pub use ownership::{PatchMapping, RankAssignment, decompose};
pub use patch_id::{PatchCoords, PatchId};
