//! `PatchId`: a strong, zero-cost handle for patches
//!
//! A patch is identified by its position along the decomposition curve
//! (lexicographic or Morton order, see [`PatchOrdering`](crate::topology::decomposition::PatchOrdering)).
//! The curve position is what ranks are assigned by, so the derived ordering of
//! `PatchId` is the ownership order. The mapping to integer coordinates lives in
//! the [`Decomposition`](crate::topology::decomposition::Decomposition).

use std::fmt;

/// Position of a patch along the decomposition curve.
///
/// # Memory layout
/// `repr(transparent)` over `u32`, so it travels on the wire as a plain
/// little-endian `u32` (see [`crate::algs::wire`]).
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct PatchId(u32);

impl PatchId {
    /// Creates a `PatchId` from its curve index.
    #[inline]
    pub const fn new(index: u32) -> Self {
        PatchId(index)
    }

    /// Creates a `PatchId` from a `usize` curve index.
    ///
    /// Decompositions never hold more than `u32::MAX` patches, which is
    /// checked when they are built.
    #[inline]
    pub(crate) fn from_index(index: usize) -> Self {
        debug_assert!(index <= u32::MAX as usize);
        PatchId(index as u32)
    }

    /// Returns the curve index.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns the curve index as `usize`, handy for indexing per-patch tables.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PatchId").field(&self.0).finish()
    }
}

impl fmt::Display for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Integer coordinates of a patch in decomposition space.
///
/// Inactive axes (beyond the grid dimensionality) are always zero.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct PatchCoords(pub [usize; 3]);

impl PatchCoords {
    #[inline]
    pub fn get(&self, axis: usize) -> usize {
        self.0[axis]
    }
}
