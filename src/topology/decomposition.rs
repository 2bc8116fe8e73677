//! Cartesian patch decomposition of a [`GlobalGrid`].
//!
//! The grid is cut into `patches_per_axis[a]` equal slabs along every active
//! axis. Patches are numbered along a fixed curve ([`PatchOrdering`]); that
//! number is the [`PatchId`] and the order in which ranks receive patches.
//!
//! The decomposition is a pure function of its inputs: two ranks building it
//! from the same grid and hint get identical ids, regions and neighbors,
//! which is what lets them agree on message layouts without negotiating.
//!
//! A moving window advances along a non-periodic axis in whole patches
//! ([`Decomposition::shifted`]). Cell indices stay relative to the window;
//! only the physical bounds of every region move.

use crate::debug_invariants::DebugInvariants;
use crate::halo_error::HaloError;
use crate::topology::direction::Direction;
use crate::topology::grid::GlobalGrid;
use crate::topology::patch_id::{PatchCoords, PatchId};
use itertools::Itertools;

/// Curve used to number patches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PatchOrdering {
    /// Row-major over coordinates, last axis fastest.
    #[default]
    Lexicographic,
    /// Z-order: interleaved coordinate bits, keeps rank chunks compact.
    Morton,
}

/// Owned region of one patch, in global cells and physical units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PatchRegion {
    /// First owned cell on each axis, counted from the window origin.
    pub cell_offset: [usize; 3],
    /// Owned cells on each axis (1 on inactive axes).
    pub cells: [usize; 3],
    /// Physical lower bound (inclusive).
    pub lo: [f64; 3],
    /// Physical upper bound (exclusive).
    pub hi: [f64; 3],
}

impl PatchRegion {
    /// Whether the global cell lies inside the owned region.
    pub fn contains_cell(&self, cell: [usize; 3]) -> bool {
        (0..3).all(|a| cell[a] >= self.cell_offset[a] && cell[a] < self.cell_offset[a] + self.cells[a])
    }

    /// Whether the position lies in `[lo, hi)` on the first `dim` axes.
    pub fn contains_position(&self, pos: [f64; 3], dim: usize) -> bool {
        (0..dim).all(|a| pos[a] >= self.lo[a] && pos[a] < self.hi[a])
    }
}

/// Equal-slab Cartesian decomposition with curve-ordered patch ids.
#[derive(Clone, Debug)]
pub struct Decomposition {
    grid: GlobalGrid,
    patches_per_axis: [usize; 3],
    patch_cells: [usize; 3],
    ordering: PatchOrdering,
    /// Curve index -> coordinates.
    coords: Vec<PatchCoords>,
    /// Row-major coordinate index -> curve id.
    by_coords: Vec<PatchId>,
    /// Cells the moving window has advanced along each axis.
    moved_cells: [usize; 3],
}

impl Decomposition {
    /// Decompose `grid` into `patch_count_hint` patches.
    ///
    /// Every factorization of the hint over the active axes whose factors divide
    /// the per-axis cell counts is considered; the one with the smallest total
    /// patch surface wins (ties broken by the factor tuple).
    ///
    /// # Errors
    /// `HaloError::Configuration` if the hint is zero, does not factor evenly
    /// over the grid, or every even factorization leaves fewer than
    /// `2 * ghost_width + 1` owned cells on some axis.
    pub fn new(
        grid: GlobalGrid,
        patch_count_hint: usize,
        ordering: PatchOrdering,
    ) -> Result<Self, HaloError> {
        if patch_count_hint == 0 {
            return Err(HaloError::Configuration(
                "patch count hint must be positive".into(),
            ));
        }
        let dim = grid.dim();
        let cells = grid.cells();
        let mut even = Vec::new();
        collect_factorizations(patch_count_hint, 0, dim, &cells, [1; 3], &mut even);
        if even.is_empty() {
            return Err(HaloError::Configuration(format!(
                "{patch_count_hint} patches do not evenly factor a {:?} grid",
                &cells[..dim]
            )));
        }
        let min_cells = 2 * grid.ghost_width() + 1;
        let best = even
            .iter()
            .filter(|p| (0..dim).all(|a| cells[a] / p[a] >= min_cells))
            .min_by_key(|p| (surface(&cells, p, dim), **p))
            .copied()
            .ok_or_else(|| {
                HaloError::Configuration(format!(
                    "every even split of {patch_count_hint} patches over {:?} cells leaves \
                     fewer than {min_cells} cells per patch on some axis (ghost width {})",
                    &cells[..dim],
                    grid.ghost_width()
                ))
            })?;
        Self::with_patches_per_axis(grid, &best[..dim], ordering)
    }

    /// Decompose with an explicit patch count per active axis.
    ///
    /// # Errors
    /// `HaloError::Configuration` if the slice length differs from the grid
    /// dimensionality, a count is zero or does not divide the axis, or the
    /// resulting patches are too narrow for the ghost width.
    pub fn with_patches_per_axis(
        grid: GlobalGrid,
        patches: &[usize],
        ordering: PatchOrdering,
    ) -> Result<Self, HaloError> {
        let dim = grid.dim();
        if patches.len() != dim {
            return Err(HaloError::Configuration(format!(
                "expected {dim} per-axis patch counts, got {}",
                patches.len()
            )));
        }
        let cells = grid.cells();
        let min_cells = 2 * grid.ghost_width() + 1;
        let mut patches_per_axis = [1usize; 3];
        let mut patch_cells = [1usize; 3];
        for a in 0..dim {
            let p = patches[a];
            if p == 0 || cells[a] % p != 0 {
                return Err(HaloError::Configuration(format!(
                    "{p} patches do not evenly divide {} cells on axis {a}",
                    cells[a]
                )));
            }
            let n = cells[a] / p;
            if n < min_cells {
                return Err(HaloError::Configuration(format!(
                    "axis {a}: {n} cells per patch, ghost width {} requires at least {min_cells}",
                    grid.ghost_width()
                )));
            }
            patches_per_axis[a] = p;
            patch_cells[a] = n;
        }
        let total: usize = patches_per_axis.iter().product();
        if total > u32::MAX as usize {
            return Err(HaloError::Configuration(format!(
                "{total} patches exceed the PatchId range"
            )));
        }

        let all_coords: Vec<PatchCoords> = (0..patches_per_axis[0])
            .cartesian_product(0..patches_per_axis[1])
            .cartesian_product(0..patches_per_axis[2])
            .map(|((i, j), k)| PatchCoords([i, j, k]))
            .collect();
        let coords: Vec<PatchCoords> = match ordering {
            PatchOrdering::Lexicographic => all_coords,
            PatchOrdering::Morton => all_coords
                .into_iter()
                .sorted_by_key(|c| morton_code(c, dim))
                .collect(),
        };

        let mut by_coords = vec![PatchId::new(0); total];
        for (idx, c) in coords.iter().enumerate() {
            by_coords[row_major(c, &patches_per_axis)] = PatchId::from_index(idx);
        }

        log::info!(
            "decomposed {:?} cells into {:?} patches of {:?} cells ({ordering:?} order)",
            &cells[..dim],
            &patches_per_axis[..dim],
            &patch_cells[..dim]
        );

        let decomposition = Self {
            grid,
            patches_per_axis,
            patch_cells,
            ordering,
            coords,
            by_coords,
            moved_cells: [0; 3],
        };
        crate::debug_invariants!(decomposition.validate_invariants(), "Decomposition::new");
        Ok(decomposition)
    }

    #[inline]
    pub fn grid(&self) -> &GlobalGrid {
        &self.grid
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.grid.dim()
    }

    #[inline]
    pub fn n_patches(&self) -> usize {
        self.coords.len()
    }

    #[inline]
    pub fn patches_per_axis(&self) -> [usize; 3] {
        self.patches_per_axis
    }

    /// Owned cells per patch on each axis (identical for every patch).
    #[inline]
    pub fn patch_cells(&self) -> [usize; 3] {
        self.patch_cells
    }

    #[inline]
    pub fn ordering(&self) -> PatchOrdering {
        self.ordering
    }

    /// All patch ids in curve order.
    pub fn patch_ids(&self) -> impl Iterator<Item = PatchId> + '_ {
        (0..self.coords.len()).map(PatchId::from_index)
    }

    /// Coordinates of a patch.
    pub fn coords(&self, id: PatchId) -> Result<PatchCoords, HaloError> {
        self.coords
            .get(id.index())
            .copied()
            .ok_or(HaloError::UnknownPatch(id))
    }

    /// The patch at the given coordinates, if inside the decomposition.
    pub fn patch_at(&self, coords: PatchCoords) -> Option<PatchId> {
        if (0..3).any(|a| coords.0[a] >= self.patches_per_axis[a]) {
            return None;
        }
        Some(self.by_coords[row_major(&coords, &self.patches_per_axis)])
    }

    /// Owned region of a patch.
    pub fn region(&self, id: PatchId) -> Result<PatchRegion, HaloError> {
        let c = self.coords(id)?;
        let dx = self.grid.cell_size();
        let mut cell_offset = [0usize; 3];
        let mut lo = [0.0f64; 3];
        let mut hi = [1.0f64; 3];
        for a in 0..3 {
            cell_offset[a] = c.0[a] * self.patch_cells[a];
            let first = self.moved_cells[a] + cell_offset[a];
            lo[a] = first as f64 * dx[a];
            hi[a] = (first + self.patch_cells[a]) as f64 * dx[a];
        }
        Ok(PatchRegion {
            cell_offset,
            cells: self.patch_cells,
            lo,
            hi,
        })
    }

    /// Physical width of a patch along `axis`.
    #[inline]
    pub fn patch_width(&self, axis: usize) -> f64 {
        self.patch_cells[axis] as f64 * self.grid.cell_size()[axis]
    }

    /// Neighbor of `id` in `dir`, wrapping across periodic axes.
    ///
    /// `None` when the offset leaves the domain through a non-periodic boundary,
    /// or when `dir` has a component on an inactive axis.
    pub fn neighbor(&self, id: PatchId, dir: Direction) -> Option<PatchId> {
        let c = self.coords(id).ok()?;
        let mut n = [0usize; 3];
        for a in 0..3 {
            let d = dir.component(a) as isize;
            if a >= self.dim() {
                if d != 0 {
                    return None;
                }
                continue;
            }
            let p = self.patches_per_axis[a] as isize;
            let mut x = c.0[a] as isize + d;
            if x < 0 || x >= p {
                if !self.grid.is_periodic(a) {
                    return None;
                }
                x = x.rem_euclid(p);
            }
            n[a] = x as usize;
        }
        self.patch_at(PatchCoords(n))
    }

    /// Every existing neighbor of `id`, faces, edges and corners, in direction order.
    pub fn neighbors(&self, id: PatchId) -> Vec<(Direction, PatchId)> {
        Direction::all(self.dim())
            .iter()
            .filter_map(|&d| self.neighbor(id, d).map(|n| (d, n)))
            .collect()
    }

    /// Displacement to add to a particle position moving from `id` toward `dir`.
    ///
    /// Zero on every axis except those where the move wraps across a periodic
    /// boundary, where it is minus/plus the domain length.
    pub fn wrap_shift(&self, id: PatchId, dir: Direction) -> Result<[f64; 3], HaloError> {
        let c = self.coords(id)?;
        let mut shift = [0.0f64; 3];
        for a in 0..self.dim() {
            let x = c.0[a] as isize + dir.component(a) as isize;
            if x < 0 {
                shift[a] = self.grid.length(a);
            } else if x >= self.patches_per_axis[a] as isize {
                shift[a] = -self.grid.length(a);
            }
        }
        Ok(shift)
    }

    /// Add a [`wrap_shift`](Self::wrap_shift) to `position`.
    ///
    /// A coordinate a fraction of an ulp below zero plus the domain length
    /// rounds onto the length itself, outside the last patch; it is pulled
    /// back to the largest value below the length.
    pub fn apply_wrap(&self, position: &mut [f64; 3], shift: [f64; 3]) {
        for a in 0..self.dim() {
            if shift[a] == 0.0 {
                continue;
            }
            let length = self.grid.length(a);
            let x = position[a] + shift[a];
            position[a] = if x >= length { next_below(length) } else { x.max(0.0) };
        }
    }

    /// Physical lower corner of the moving window.
    pub fn window_origin(&self) -> [f64; 3] {
        let dx = self.grid.cell_size();
        [0, 1, 2].map(|a| self.moved_cells[a] as f64 * dx[a])
    }

    /// Cells the window has advanced along each axis.
    #[inline]
    pub fn moved_cells(&self) -> [usize; 3] {
        self.moved_cells
    }

    /// This decomposition with the window advanced `n_patches` patch widths
    /// along `axis`. Ids, coordinates and cell offsets are unchanged.
    ///
    /// # Errors
    /// `HaloError::Configuration` if `axis` is inactive or periodic.
    pub fn shifted(&self, axis: usize, n_patches: usize) -> Result<Self, HaloError> {
        if axis >= self.dim() {
            return Err(HaloError::Configuration(format!(
                "cannot move the window along axis {axis} of a {}-D grid",
                self.dim()
            )));
        }
        if self.grid.is_periodic(axis) {
            return Err(HaloError::Configuration(format!(
                "cannot move the window along periodic axis {axis}"
            )));
        }
        let mut next = self.clone();
        next.moved_cells[axis] += n_patches * self.patch_cells[axis];
        Ok(next)
    }

    /// Patch that takes over the contents of `id` when the window advances
    /// `n_patches` along `axis`; `None` if they fall behind the window.
    pub fn window_target(
        &self,
        id: PatchId,
        axis: usize,
        n_patches: usize,
    ) -> Result<Option<PatchId>, HaloError> {
        let mut c = self.coords(id)?;
        let Some(x) = c.0.get_mut(axis) else {
            return Err(HaloError::Configuration(format!("no axis {axis}")));
        };
        if *x < n_patches {
            return Ok(None);
        }
        *x -= n_patches;
        Ok(self.patch_at(c))
    }

    /// The patch whose owned region contains the global cell.
    pub fn locate_cell(&self, cell: [usize; 3]) -> Option<PatchId> {
        let mut c = [0usize; 3];
        for a in 0..3 {
            if cell[a] >= self.grid.cells()[a] {
                return None;
            }
            c[a] = cell[a] / self.patch_cells[a];
        }
        self.patch_at(PatchCoords(c))
    }

    /// The patch whose owned region contains the physical position.
    pub fn locate_position(&self, pos: [f64; 3]) -> Option<PatchId> {
        let dx = self.grid.cell_size();
        let origin = self.window_origin();
        let mut cell = [0usize; 3];
        for a in 0..self.dim() {
            let x = pos[a] - origin[a];
            if !(x.is_finite() && x >= 0.0) {
                return None;
            }
            cell[a] = (x / dx[a]).floor() as usize;
        }
        let id = self.locate_cell(cell)?;
        // floor() can land one cell off at a patch boundary.
        let region = self.region(id).ok()?;
        if region.contains_position(pos, self.dim()) {
            return Some(id);
        }
        self.patch_ids().find(|&p| {
            self.region(p)
                .is_ok_and(|r| r.contains_position(pos, self.dim()))
        })
    }
}

impl DebugInvariants for Decomposition {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "Decomposition");
    }

    /// Ids and coordinates are bijective and the regions tile the grid exactly once.
    fn validate_invariants(&self) -> Result<(), HaloError> {
        let mut covered = 0usize;
        for id in self.patch_ids() {
            let c = self.coords(id)?;
            if self.patch_at(c) != Some(id) {
                return Err(HaloError::Configuration(format!(
                    "patch {id} at {c:?} does not map back to itself"
                )));
            }
            let r = self.region(id)?;
            for a in 0..3 {
                if r.cells[a] == 0 || r.cell_offset[a] + r.cells[a] > self.grid.cells()[a] {
                    return Err(HaloError::Configuration(format!(
                        "patch {id} region {r:?} leaves the grid on axis {a}"
                    )));
                }
            }
            covered += r.cells.iter().product::<usize>();
        }
        if covered != self.grid.total_cells() {
            return Err(HaloError::Configuration(format!(
                "patches cover {covered} cells, grid has {}",
                self.grid.total_cells()
            )));
        }
        Ok(())
    }
}

/// Largest double below a positive finite `x`.
fn next_below(x: f64) -> f64 {
    f64::from_bits(x.to_bits() - 1)
}

fn row_major(c: &PatchCoords, shape: &[usize; 3]) -> usize {
    (c.0[0] * shape[1] + c.0[1]) * shape[2] + c.0[2]
}

fn morton_code(c: &PatchCoords, dim: usize) -> u64 {
    let mut code = 0u64;
    for bit in 0..21 {
        for a in 0..dim {
            code |= (((c.0[a] >> bit) & 1) as u64) << (bit * dim + a);
        }
    }
    code
}

/// Sum over axes of the face area of one patch, in cells.
fn surface(cells: &[usize; 3], patches: &[usize; 3], dim: usize) -> usize {
    let n: Vec<usize> = (0..dim).map(|a| cells[a] / patches[a]).collect();
    (0..dim)
        .map(|a| (0..dim).filter(|&b| b != a).map(|b| n[b]).product::<usize>())
        .sum()
}

fn collect_factorizations(
    remaining: usize,
    axis: usize,
    dim: usize,
    cells: &[usize; 3],
    current: [usize; 3],
    out: &mut Vec<[usize; 3]>,
) {
    if axis + 1 == dim {
        if cells[axis] % remaining == 0 {
            let mut done = current;
            done[axis] = remaining;
            out.push(done);
        }
        return;
    }
    for p in (1..=remaining).filter(|p| remaining % p == 0 && cells[axis] % p == 0) {
        let mut next = current;
        next[axis] = p;
        collect_factorizations(remaining / p, axis + 1, dim, cells, next, out);
    }
}
