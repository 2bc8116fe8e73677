//! Ownership of patches by ranks.
//!
//! The [`RankAssignment`] map records the owning rank of every patch. Rank
//! assignment follows the decomposition curve: the default split gives each
//! rank a contiguous run of [`PatchId`]s. An external load-balancing policy may
//! hand in any other owner list through [`RankAssignment::from_owners`]; the
//! exchange engine only implements the mechanism of moving patches.

use crate::debug_invariants::DebugInvariants;
use crate::halo_error::HaloError;
use crate::topology::decomposition::{Decomposition, PatchOrdering, PatchRegion};
use crate::topology::grid::GlobalGrid;
use crate::topology::patch_id::PatchId;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Deserialized assignments go through [`RankAssignment::from_owners`].
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "RawAssignment")]
pub struct RankAssignment {
    /// Owner of each patch, indexed by curve position.
    owners: Vec<usize>,
    n_ranks: usize,
}

/// Unvalidated wire form of a [`RankAssignment`].
#[derive(serde::Deserialize)]
struct RawAssignment {
    owners: Vec<usize>,
    n_ranks: usize,
}

impl TryFrom<RawAssignment> for RankAssignment {
    type Error = HaloError;

    fn try_from(raw: RawAssignment) -> Result<Self, Self::Error> {
        Self::from_owners(raw.owners, raw.n_ranks)
    }
}

impl RankAssignment {
    /// Split `n_patches` curve positions into `n_ranks` contiguous chunks whose
    /// sizes differ by at most one (lower ranks get the larger chunks).
    ///
    /// # Errors
    /// `HaloError::Configuration` if `n_ranks` is zero or exceeds `n_patches`.
    pub fn balanced(n_patches: usize, n_ranks: usize) -> Result<Self, HaloError> {
        if n_ranks == 0 || n_ranks > n_patches {
            return Err(HaloError::Configuration(format!(
                "cannot assign {n_patches} patches to {n_ranks} ranks"
            )));
        }
        let base = n_patches / n_ranks;
        let rem = n_patches % n_ranks;
        let mut owners = Vec::with_capacity(n_patches);
        for rank in 0..n_ranks {
            let len = base + usize::from(rank < rem);
            owners.extend(std::iter::repeat_n(rank, len));
        }
        Ok(Self { owners, n_ranks })
    }

    /// Build an assignment from an explicit owner per patch.
    ///
    /// # Errors
    /// `HaloError::Configuration` if `n_ranks` is zero, an owner is out of
    /// range, or some rank owns no patch.
    pub fn from_owners(owners: Vec<usize>, n_ranks: usize) -> Result<Self, HaloError> {
        let assignment = Self { owners, n_ranks };
        assignment.validate_invariants()?;
        Ok(assignment)
    }

    #[cfg(test)]
    pub(crate) fn from_owners_unchecked(owners: Vec<usize>, n_ranks: usize) -> Self {
        Self { owners, n_ranks }
    }

    /// Number of tracked patches.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Returns true if no patch is tracked.
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn n_ranks(&self) -> usize {
        self.n_ranks
    }

    /// Owner of a patch.
    pub fn owner(&self, patch: PatchId) -> Option<usize> {
        self.owners.get(patch.index()).copied()
    }

    /// Owner of a patch, or `UnknownPatch`.
    pub fn owner_or_err(&self, patch: PatchId) -> Result<usize, HaloError> {
        self.owner(patch).ok_or(HaloError::UnknownPatch(patch))
    }

    /// Returns true if the patch is owned by `rank`.
    pub fn is_owned_by(&self, patch: PatchId, rank: usize) -> bool {
        self.owner(patch).is_some_and(|owner| owner == rank)
    }

    /// Patches owned by `rank`, in curve order.
    pub fn patches_of(&self, rank: usize) -> impl Iterator<Item = PatchId> + '_ {
        self.owners
            .iter()
            .enumerate()
            .filter(move |&(_, &owner)| owner == rank)
            .map(|(idx, _)| PatchId::from_index(idx))
    }

    /// Patches owned by `rank` as a sorted set.
    pub fn owned_set(&self, rank: usize) -> BTreeSet<PatchId> {
        self.patches_of(rank).collect()
    }

    /// Patches whose owner differs between `self` and `next`, with `(old, new)` owners.
    pub fn moves_to<'a>(
        &'a self,
        next: &'a RankAssignment,
    ) -> impl Iterator<Item = (PatchId, usize, usize)> + 'a {
        self.owners
            .iter()
            .zip(&next.owners)
            .enumerate()
            .filter(|(_, (old, new))| old != new)
            .map(|(idx, (&old, &new))| (PatchId::from_index(idx), old, new))
    }
}

impl DebugInvariants for RankAssignment {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "RankAssignment");
    }

    fn validate_invariants(&self) -> Result<(), HaloError> {
        if self.n_ranks == 0 {
            return Err(HaloError::Configuration("zero ranks".into()));
        }
        let mut has_patch = vec![false; self.n_ranks];
        for (idx, &owner) in self.owners.iter().enumerate() {
            if owner >= self.n_ranks {
                return Err(HaloError::Configuration(format!(
                    "patch #{idx} assigned to rank {owner}, only {} ranks",
                    self.n_ranks
                )));
            }
            has_patch[owner] = true;
        }
        if let Some(idle) = has_patch.iter().position(|&h| !h) {
            return Err(HaloError::Configuration(format!(
                "rank {idle} owns no patch"
            )));
        }
        Ok(())
    }
}

/// The full decomposition result: patch regions plus owning ranks.
#[derive(Clone, Debug)]
pub struct PatchMapping {
    pub decomposition: Arc<Decomposition>,
    pub assignment: RankAssignment,
}

impl PatchMapping {
    /// Pair a decomposition with an assignment covering the same patches.
    ///
    /// # Errors
    /// `HaloError::Configuration` if the assignment tracks a different number of patches.
    pub fn new(
        decomposition: Arc<Decomposition>,
        assignment: RankAssignment,
    ) -> Result<Self, HaloError> {
        if assignment.len() != decomposition.n_patches() {
            return Err(HaloError::Configuration(format!(
                "assignment covers {} patches, decomposition has {}",
                assignment.len(),
                decomposition.n_patches()
            )));
        }
        Ok(Self {
            decomposition,
            assignment,
        })
    }

    /// `(PatchId, region, owner)` for every patch, in curve order.
    pub fn entries(&self) -> impl Iterator<Item = (PatchId, PatchRegion, usize)> + '_ {
        self.decomposition.patch_ids().filter_map(move |id| {
            let region = self.decomposition.region(id).ok()?;
            let owner = self.assignment.owner(id)?;
            Some((id, region, owner))
        })
    }
}

/// Decompose `grid` into `patch_count_hint` patches spread over `n_ranks` ranks.
///
/// # Errors
/// `HaloError::Configuration` for any infeasible combination; see
/// [`Decomposition::new`] and [`RankAssignment::balanced`].
pub fn decompose(
    grid: GlobalGrid,
    patch_count_hint: usize,
    n_ranks: usize,
    ordering: PatchOrdering,
) -> Result<PatchMapping, HaloError> {
    let decomposition = Decomposition::new(grid, patch_count_hint, ordering)?;
    let assignment = RankAssignment::balanced(decomposition.n_patches(), n_ranks)?;
    PatchMapping::new(Arc::new(decomposition), assignment)
}
