//! Exchange directions between neighboring patches.
//!
//! A [`Direction`] is a composite of one offset in `{-1, 0, +1}` per axis.
//! Faces have one non-zero component, edges two and corners three. Tables keyed
//! by direction replace per-axis/per-parity arrays: every halo slab and every
//! particle destination is looked up by the full direction, so a diagonal
//! crossing always resolves to exactly one neighbor.

use itertools::Itertools;
use once_cell::sync::Lazy;
use std::fmt;

/// Offset of a neighbor patch, one component per axis.
///
/// Components of axes beyond the grid dimensionality are always zero.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct Direction([i8; 3]);

/// `DIRECTIONS[dim]` lists every non-zero direction for a `dim`-dimensional grid,
/// sorted by [`Direction`]'s ordering.
static DIRECTIONS: Lazy<[Vec<Direction>; 4]> = Lazy::new(|| {
    let mut tables: [Vec<Direction>; 4] = Default::default();
    for (dim, table) in tables.iter_mut().enumerate().skip(1) {
        *table = std::iter::repeat_n(-1i8..=1, dim)
            .multi_cartesian_product()
            .filter_map(|comps| {
                let mut offsets = [0i8; 3];
                offsets[..dim].copy_from_slice(&comps);
                Direction::new(offsets)
            })
            .sorted()
            .collect();
    }
    tables
});

impl Direction {
    /// Build a direction; `None` if all components are zero or any lies outside `-1..=1`.
    pub fn new(offsets: [i8; 3]) -> Option<Self> {
        if offsets.iter().all(|&c| c == 0) || offsets.iter().any(|c| !(-1..=1).contains(c)) {
            None
        } else {
            Some(Direction(offsets))
        }
    }

    /// The face direction along `axis`; `positive` selects the `+` side.
    pub fn face(axis: usize, positive: bool) -> Self {
        let mut offsets = [0i8; 3];
        offsets[axis] = if positive { 1 } else { -1 };
        Direction(offsets)
    }

    #[inline]
    pub fn component(&self, axis: usize) -> i8 {
        self.0[axis]
    }

    #[inline]
    pub fn offsets(&self) -> [i8; 3] {
        self.0
    }

    #[inline]
    pub fn opposite(&self) -> Self {
        Direction([-self.0[0], -self.0[1], -self.0[2]])
    }

    /// Number of non-zero components (1 = face, 2 = edge, 3 = corner).
    #[inline]
    pub fn order(&self) -> usize {
        self.0.iter().filter(|&&c| c != 0).count()
    }

    #[inline]
    pub fn is_face(&self) -> bool {
        self.order() == 1
    }

    #[inline]
    pub fn is_diagonal(&self) -> bool {
        self.order() > 1
    }

    /// Dense index in `0..27`, base-3 encoding of the components.
    #[inline]
    pub fn index(&self) -> usize {
        self.0
            .iter()
            .fold(0usize, |acc, &c| acc * 3 + (c + 1) as usize)
    }

    /// Every direction of a `dim`-dimensional grid (`3^dim - 1` entries).
    ///
    /// # Panics
    /// Panics if `dim` is not in `1..=3`; grids are validated before any
    /// direction table is requested.
    pub fn all(dim: usize) -> &'static [Direction] {
        assert!((1..=3).contains(&dim), "dimensionality must be 1, 2 or 3");
        &DIRECTIONS[dim]
    }

    /// The `2 * dim` face directions of a `dim`-dimensional grid.
    pub fn faces(dim: usize) -> impl Iterator<Item = Direction> {
        Self::all(dim).iter().copied().filter(Direction::is_face)
    }
}

impl fmt::Debug for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Direction({self})")
    }
}

/// Prints the non-zero components, e.g. `+x`, `-x+y`, `+x-y-z`.
impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (axis, name) in ["x", "y", "z"].iter().enumerate() {
            match self.0[axis] {
                1 => write!(f, "+{name}")?,
                -1 => write!(f, "-{name}")?,
                _ => {}
            }
        }
        Ok(())
    }
}
