//! Exchange engine: halo rounds, particle migration, rebalancing and the
//! moving window for the patches one rank owns.
//!
//! A round moves through four states. **Initiate** packs every export slab of
//! every local patch, posts receives and sends for remote peers and applies
//! same-rank transfers directly. **Pending** is the lifetime of the returned
//! round handle, which mutably borrows the engine so that ghost cells cannot
//! be read or patches mutated before completion. **Complete** (`wait`)
//! unpacks every received segment through [`Patch::import_region`].
//! **Quiesce** drains every send and passes a transport barrier; only then
//! does `wait` return.
//!
//! Remote halo traffic is aggregated into one message per peer rank per
//! round. Segments are laid out in the order `(receiver patch, direction at
//! receiver, field)`, which sender and receiver both derive from the shared
//! decomposition, so messages carry no per-segment headers.

mod halo;
mod migration;
mod perf;
mod rebalance;
pub(crate) mod transfer;
mod window;

pub use halo::{HaloReport, HaloRound};
pub use migration::{MigrationReport, MigrationRound};
pub use rebalance::RebalanceReport;
pub use window::WindowShiftReport;

use crate::algs::communicator::{Communicator, ExchangeTags};
use crate::data::halo_plan::HaloPlan;
use crate::halo_error::HaloError;
use crate::patch::{NeighborTable, Patch};
use crate::topology::decomposition::Decomposition;
use crate::topology::ownership::{PatchMapping, RankAssignment};
use crate::topology::patch_id::PatchId;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Owns this rank's patches and drives every exchange between them and the
/// patches of other ranks.
pub struct ExchangeEngine<C: Communicator> {
    comm: C,
    tags: ExchangeTags,
    decomposition: Arc<Decomposition>,
    assignment: RankAssignment,
    plan: Arc<HaloPlan>,
    patches: BTreeMap<PatchId, Patch>,
}

impl<C: Communicator> ExchangeEngine<C> {
    /// Create the local patches of `comm.rank()` with zeroed fields.
    ///
    /// # Errors
    /// `RankMismatch` if the mapping was made for a different number of ranks
    /// than the communicator has.
    pub fn new(comm: C, mapping: PatchMapping) -> Result<Self, HaloError> {
        Self::with_tags(comm, mapping, ExchangeTags::default())
    }

    /// As [`new`](Self::new), with explicit message tags.
    pub fn with_tags(comm: C, mapping: PatchMapping, tags: ExchangeTags) -> Result<Self, HaloError> {
        let PatchMapping {
            decomposition,
            assignment,
        } = mapping;
        if assignment.n_ranks() != comm.size() {
            return Err(HaloError::RankMismatch {
                expected: assignment.n_ranks(),
                got: comm.size(),
            });
        }
        let me = comm.rank();
        let plan = Arc::new(HaloPlan::new(&decomposition));
        let mut patches = BTreeMap::new();
        for id in assignment.patches_of(me) {
            patches.insert(id, Patch::new(id, &decomposition, Arc::clone(&plan), me)?);
        }
        let mut engine = Self {
            comm,
            tags,
            decomposition,
            assignment,
            plan,
            patches,
        };
        engine.relink()?;
        log::info!(
            "rank {me}/{}: {} local patches, {} remote peers",
            engine.comm.size(),
            engine.patches.len(),
            engine.remote_peers().len()
        );
        Ok(engine)
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    #[inline]
    pub fn comm(&self) -> &C {
        &self.comm
    }

    #[inline]
    pub fn decomposition(&self) -> &Decomposition {
        &self.decomposition
    }

    #[inline]
    pub fn assignment(&self) -> &RankAssignment {
        &self.assignment
    }

    #[inline]
    pub fn plan(&self) -> &HaloPlan {
        &self.plan
    }

    /// Local patches in `PatchId` order; stable until the next rebalance.
    pub fn local_patches(&self) -> impl Iterator<Item = &Patch> {
        self.patches.values()
    }

    pub fn local_patches_mut(&mut self) -> impl Iterator<Item = &mut Patch> {
        self.patches.values_mut()
    }

    pub fn local_patch_ids(&self) -> impl Iterator<Item = PatchId> + '_ {
        self.patches.keys().copied()
    }

    pub fn patch(&self, id: PatchId) -> Result<&Patch, HaloError> {
        self.patches
            .get(&id)
            .ok_or_else(|| missing_patch(&self.assignment, id))
    }

    pub fn patch_mut(&mut self, id: PatchId) -> Result<&mut Patch, HaloError> {
        match self.patches.get_mut(&id) {
            Some(p) => Ok(p),
            None => Err(missing_patch(&self.assignment, id)),
        }
    }

    /// Total particles held by local patches.
    pub fn particle_count(&self) -> usize {
        self.patches.values().map(|p| p.particles().len()).sum()
    }

    /// Ranks owning at least one neighbor of a local patch.
    fn remote_peers(&self) -> BTreeSet<usize> {
        self.patches
            .values()
            .flat_map(|p| p.neighbors().remote_ranks())
            .collect()
    }

    /// Rebuild ownership and neighbor locality of every local patch.
    fn relink(&mut self) -> Result<(), HaloError> {
        let me = self.comm.rank();
        for (&id, patch) in self.patches.iter_mut() {
            patch.set_owner(me);
            patch.set_neighbors(NeighborTable::build(
                id,
                &self.decomposition,
                &self.assignment,
                me,
            )?);
        }
        Ok(())
    }
}

fn missing_patch(assignment: &RankAssignment, id: PatchId) -> HaloError {
    match assignment.owner(id) {
        Some(owner) => HaloError::NotLocal { patch: id, owner },
        None => HaloError::UnknownPatch(id),
    }
}
