//! Per-direction transfer descriptors for halo exchange.
//!
//! A [`HaloPlan`] is built once per topology. For every staggering in use, every
//! direction and both exchange modes it stores the export slab (what this
//! patch sends toward the direction) and the import slab (what it receives
//! from the neighbor in that direction). Because all patches of a
//! decomposition have the same shape, one plan serves every patch.
//!
//! Slab ranges along one axis, with `n` owned cells, ghost `g` and `s = 1` on
//! primal axes (`0` on dual axes):
//!
//! | component | copy export   | copy import      | sum (both)       |
//! |-----------|---------------|------------------|------------------|
//! | `-1`      | `[g, 2g+s)`   | `[0, g)`         | `[0, 2g+s)`      |
//! | `0`       | `[g, n+g)`    | `[g, n+g)`       | `[0, n+2g+s)`    |
//! | `+1`      | `[n, n+g)`    | `[n+g, n+2g+s)`  | `[n, n+2g+s)`    |
//!
//! Copy slabs along `d` on one patch have the shape of the slabs along `-d` on
//! the neighbor. Sum slabs are the exact overlap of the two buffers, so adding
//! the neighbor's pre-exchange values counts every deposit once, diagonals
//! included.

use crate::data::field::{FieldId, FieldLayout, Staggering};
use crate::data::region::RegionDescriptor;
use crate::topology::decomposition::Decomposition;
use crate::topology::direction::Direction;
use std::collections::BTreeMap;

/// How imported halo data combines with local values.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub enum HaloMode {
    /// Ghosts are overwritten with the neighbor's interior (E/B fields).
    Copy,
    /// Overlapping cells accumulate the neighbor's contributions (densities).
    Sum,
}

/// Export and import slab for one (staggering, direction, mode).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferDescriptor {
    pub export: RegionDescriptor,
    pub import: RegionDescriptor,
}

#[derive(Clone, Debug)]
pub struct HaloPlan {
    dim: usize,
    patch_cells: [usize; 3],
    ghost_width: usize,
    layouts: [FieldLayout; 10],
    transfers: BTreeMap<(Staggering, Direction, HaloMode), TransferDescriptor>,
}

impl HaloPlan {
    /// Plan for the patches of a decomposition.
    pub fn new(decomposition: &Decomposition) -> Self {
        Self::for_shape(
            decomposition.patch_cells(),
            decomposition.grid().ghost_width(),
            decomposition.dim(),
        )
    }

    /// Plan for patches of `patch_cells` owned cells.
    pub fn for_shape(patch_cells: [usize; 3], ghost_width: usize, dim: usize) -> Self {
        let layouts = FieldId::ALL
            .map(|f| FieldLayout::new(patch_cells, ghost_width, dim, f.staggering()));
        let mut transfers = BTreeMap::new();
        for layout in &layouts {
            let stag = layout.staggering();
            if transfers.keys().any(|(s, _, _)| *s == stag) {
                continue;
            }
            for &dir in Direction::all(dim) {
                for mode in [HaloMode::Copy, HaloMode::Sum] {
                    let export = slab(layout, patch_cells, dir, mode, Role::Export);
                    let import = slab(layout, patch_cells, dir, mode, Role::Import);
                    transfers.insert((stag, dir, mode), TransferDescriptor { export, import });
                }
            }
        }
        Self {
            dim,
            patch_cells,
            ghost_width,
            layouts,
            transfers,
        }
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn patch_cells(&self) -> [usize; 3] {
        self.patch_cells
    }

    #[inline]
    pub fn ghost_width(&self) -> usize {
        self.ghost_width
    }

    /// Buffer layout of a field.
    #[inline]
    pub fn layout(&self, field: FieldId) -> &FieldLayout {
        &self.layouts[field.index()]
    }

    /// Slabs for `field` toward `dir`; `None` if `dir` is not a direction of this grid.
    pub fn transfer(
        &self,
        field: FieldId,
        dir: Direction,
        mode: HaloMode,
    ) -> Option<&TransferDescriptor> {
        self.transfers.get(&(field.staggering(), dir, mode))
    }

    /// Number of values exchanged for `field` toward `dir` (0 if no such direction).
    pub fn slab_len(&self, field: FieldId, dir: Direction, mode: HaloMode) -> usize {
        self.transfer(field, dir, mode).map_or(0, |t| t.import.len())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Role {
    Export,
    Import,
}

fn slab(
    layout: &FieldLayout,
    patch_cells: [usize; 3],
    dir: Direction,
    mode: HaloMode,
    role: Role,
) -> RegionDescriptor {
    let mut start = [0usize; 3];
    let mut shape = [1usize; 3];
    let ghost = layout.ghost();
    for a in 0..3 {
        let g = ghost[a];
        // Inactive axes have no ghost and no extra node.
        let s = if g == 0 { 0 } else { layout.staggering().extra_node(a) };
        let n = if g == 0 { layout.extents()[a] } else { patch_cells[a] };
        let (lo, hi) = axis_range(n, g, s, dir.component(a), mode, role);
        start[a] = lo;
        shape[a] = hi - lo;
    }
    RegionDescriptor::from_box(layout, start, shape)
}

/// Half-open local index range along one axis.
fn axis_range(n: usize, g: usize, s: usize, comp: i8, mode: HaloMode, role: Role) -> (usize, usize) {
    match (mode, comp, role) {
        (HaloMode::Copy, -1, Role::Export) => (g, 2 * g + s),
        (HaloMode::Copy, -1, Role::Import) => (0, g),
        (HaloMode::Copy, 1, Role::Export) => (n, n + g),
        (HaloMode::Copy, 1, Role::Import) => (n + g, n + 2 * g + s),
        (HaloMode::Copy, _, _) => (g, n + g),
        (HaloMode::Sum, -1, _) => (0, 2 * g + s),
        (HaloMode::Sum, 1, _) => (n, n + 2 * g + s),
        (HaloMode::Sum, _, _) => (0, n + 2 * g + s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_shape_matches_neighbor_import_shape() {
        let plan = HaloPlan::for_shape([7, 5, 6], 2, 3);
        for field in FieldId::ALL {
            for &dir in Direction::all(3) {
                for mode in [HaloMode::Copy, HaloMode::Sum] {
                    let here = plan.transfer(field, dir, mode).unwrap();
                    let there = plan.transfer(field, dir.opposite(), mode).unwrap();
                    assert_eq!(
                        here.export.shape(),
                        there.import.shape(),
                        "{field:?} {dir} {mode:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn copy_slabs_partition_the_buffer() {
        // Interior plus all import slabs cover every buffer cell exactly once.
        let plan = HaloPlan::for_shape([6, 5, 1], 2, 2);
        for field in FieldId::ALL {
            let layout = plan.layout(field);
            let mut hits = vec![0u32; layout.len()];
            let g = layout.ghost();
            let interior = RegionDescriptor::from_box(
                layout,
                [g[0], g[1], 0],
                [6, 5, 1],
            );
            for i in interior.indices() {
                hits[i] += 1;
            }
            for &dir in Direction::all(2) {
                let t = plan.transfer(field, dir, HaloMode::Copy).unwrap();
                assert!(t.import.fits(layout.len()));
                for i in t.import.indices() {
                    hits[i] += 1;
                }
            }
            assert!(hits.iter().all(|&h| h == 1), "{field:?}: {hits:?}");
        }
    }

    #[test]
    fn sum_slab_is_overlap_width() {
        let plan = HaloPlan::for_shape([10, 1, 1], 2, 1);
        let plus = Direction::face(0, true);
        // Primal: 2g + 1 nodes overlap; dual: 2g cells.
        assert_eq!(plan.slab_len(FieldId::Rho, plus, HaloMode::Sum), 5);
        assert_eq!(plan.slab_len(FieldId::Jx, plus, HaloMode::Sum), 4);
        let t = plan.transfer(FieldId::Rho, plus, HaloMode::Sum).unwrap();
        assert_eq!(t.export.offset(), 10);
        assert_eq!(t.export, t.import);
    }

    #[test]
    fn directions_outside_dimensionality_have_no_slab() {
        let plan = HaloPlan::for_shape([10, 10, 1], 1, 2);
        assert!(plan.transfer(FieldId::Ex, Direction::face(2, true), HaloMode::Copy).is_none());
        assert_eq!(plan.slab_len(FieldId::Ex, Direction::face(2, true), HaloMode::Copy), 0);
    }
}
