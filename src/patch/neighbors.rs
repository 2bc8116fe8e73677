//! Neighbor tables: who sits in each direction and how to reach it.

use crate::halo_error::HaloError;
use crate::topology::decomposition::Decomposition;
use crate::topology::direction::Direction;
use crate::topology::ownership::RankAssignment;
use crate::topology::patch_id::PatchId;
use std::collections::BTreeMap;

/// Whether a neighbor is on the calling rank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Locality {
    /// Same rank: transfers use direct buffer access.
    Local,
    /// Another rank: transfers go through the communicator.
    Remote { rank: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NeighborEntry {
    pub patch: PatchId,
    pub locality: Locality,
}

impl NeighborEntry {
    #[inline]
    pub fn is_local(&self) -> bool {
        self.locality == Locality::Local
    }

    /// Owning rank given the calling rank.
    #[inline]
    pub fn rank(&self, my_rank: usize) -> usize {
        match self.locality {
            Locality::Local => my_rank,
            Locality::Remote { rank } => rank,
        }
    }
}

/// Neighbors of one patch keyed by direction.
///
/// Directions that leave the domain through a non-periodic boundary have no
/// entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NeighborTable {
    entries: BTreeMap<Direction, NeighborEntry>,
}

impl NeighborTable {
    /// Build the table of `patch` as seen from `my_rank`.
    pub fn build(
        patch: PatchId,
        decomposition: &Decomposition,
        assignment: &RankAssignment,
        my_rank: usize,
    ) -> Result<Self, HaloError> {
        let mut entries = BTreeMap::new();
        for (dir, nbr) in decomposition.neighbors(patch) {
            let owner = assignment.owner_or_err(nbr)?;
            let locality = if owner == my_rank {
                Locality::Local
            } else {
                Locality::Remote { rank: owner }
            };
            entries.insert(dir, NeighborEntry { patch: nbr, locality });
        }
        Ok(Self { entries })
    }

    #[inline]
    pub fn get(&self, dir: Direction) -> Option<&NeighborEntry> {
        self.entries.get(&dir)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Direction, &NeighborEntry)> {
        self.entries.iter().map(|(d, e)| (*d, e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ranks other than the caller's that own at least one neighbor.
    pub fn remote_ranks(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.values().filter_map(|e| match e.locality {
            Locality::Remote { rank } => Some(rank),
            Locality::Local => None,
        })
    }
}
