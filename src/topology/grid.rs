//! Global grid description.
//!
//! [`GridConfig`] is the plain, serializable input (what a setup script or
//! a JSON file would provide); [`GlobalGrid`] is the validated, immutable value
//! the rest of the crate works with. Validation happens once, in
//! `GlobalGrid::try_from`.

use crate::halo_error::HaloError;

/// Raw grid configuration.
///
/// Vectors hold one entry per active axis; their length must equal `dim`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub dim: usize,
    pub cells: Vec<usize>,
    pub cell_size: Vec<f64>,
    /// Ghost cells per side, identical on every axis.
    pub ghost_width: usize,
    /// Radius of the field solver stencil; the ghost width must cover it.
    pub stencil_radius: usize,
    /// Per-axis periodicity. Empty means non-periodic everywhere.
    pub periodic: Vec<bool>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            dim: 2,
            cells: vec![64, 64],
            cell_size: vec![1.0, 1.0],
            ghost_width: 2,
            stencil_radius: 1,
            periodic: Vec::new(),
        }
    }
}

/// Validated, immutable global grid.
///
/// Arrays always have three entries; axes at or beyond `dim` have one cell,
/// unit cell size and are never periodic.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct GlobalGrid {
    dim: usize,
    cells: [usize; 3],
    cell_size: [f64; 3],
    ghost_width: usize,
    stencil_radius: usize,
    periodic: [bool; 3],
}

impl TryFrom<GridConfig> for GlobalGrid {
    type Error = HaloError;

    fn try_from(cfg: GridConfig) -> Result<Self, Self::Error> {
        GlobalGrid::from_config(&cfg)
    }
}

impl GlobalGrid {
    /// Validate a configuration into a grid.
    ///
    /// # Errors
    /// `HaloError::Configuration` if the dimensionality is not 1–3, a per-axis
    /// vector has the wrong length, any cell count is zero, any cell size is not
    /// a positive finite number, or the ghost width is zero or below the
    /// stencil radius.
    pub fn from_config(cfg: &GridConfig) -> Result<Self, HaloError> {
        let dim = cfg.dim;
        if !(1..=3).contains(&dim) {
            return Err(HaloError::Configuration(format!(
                "dimensionality must be 1, 2 or 3, got {dim}"
            )));
        }
        if cfg.cells.len() != dim || cfg.cell_size.len() != dim {
            return Err(HaloError::Configuration(format!(
                "expected {dim} cell counts and cell sizes, got {} and {}",
                cfg.cells.len(),
                cfg.cell_size.len()
            )));
        }
        if !cfg.periodic.is_empty() && cfg.periodic.len() != dim {
            return Err(HaloError::Configuration(format!(
                "expected {dim} periodicity flags, got {}",
                cfg.periodic.len()
            )));
        }
        if let Some(axis) = cfg.cells.iter().position(|&n| n == 0) {
            return Err(HaloError::Configuration(format!(
                "axis {axis} has zero cells"
            )));
        }
        if let Some(axis) = cfg
            .cell_size
            .iter()
            .position(|&dx| !(dx.is_finite() && dx > 0.0))
        {
            return Err(HaloError::Configuration(format!(
                "axis {axis} has invalid cell size {}",
                cfg.cell_size[axis]
            )));
        }
        if cfg.ghost_width == 0 {
            return Err(HaloError::Configuration(
                "ghost width must be at least one cell".into(),
            ));
        }
        if cfg.ghost_width < cfg.stencil_radius {
            return Err(HaloError::Configuration(format!(
                "ghost width {} is smaller than the solver stencil radius {}",
                cfg.ghost_width, cfg.stencil_radius
            )));
        }

        let mut cells = [1usize; 3];
        let mut cell_size = [1.0f64; 3];
        let mut periodic = [false; 3];
        cells[..dim].copy_from_slice(&cfg.cells);
        cell_size[..dim].copy_from_slice(&cfg.cell_size);
        if !cfg.periodic.is_empty() {
            periodic[..dim].copy_from_slice(&cfg.periodic);
        }

        Ok(Self {
            dim,
            cells,
            cell_size,
            ghost_width: cfg.ghost_width,
            stencil_radius: cfg.stencil_radius,
            periodic,
        })
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn cells(&self) -> [usize; 3] {
        self.cells
    }

    #[inline]
    pub fn cell_size(&self) -> [f64; 3] {
        self.cell_size
    }

    #[inline]
    pub fn ghost_width(&self) -> usize {
        self.ghost_width
    }

    #[inline]
    pub fn stencil_radius(&self) -> usize {
        self.stencil_radius
    }

    #[inline]
    pub fn is_periodic(&self, axis: usize) -> bool {
        self.periodic[axis]
    }

    /// Ghost width on `axis`: the configured width on active axes, zero otherwise.
    #[inline]
    pub fn ghost_on(&self, axis: usize) -> usize {
        if axis < self.dim { self.ghost_width } else { 0 }
    }

    /// Physical length of the domain along `axis`.
    #[inline]
    pub fn length(&self, axis: usize) -> f64 {
        self.cells[axis] as f64 * self.cell_size[axis]
    }

    /// Total number of cells.
    pub fn total_cells(&self) -> usize {
        self.cells.iter().product()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg_2d() -> GridConfig {
        GridConfig {
            dim: 2,
            cells: vec![30, 20],
            cell_size: vec![0.5, 0.25],
            ghost_width: 2,
            stencil_radius: 1,
            periodic: vec![true, false],
        }
    }

    #[test]
    fn valid_config_pads_inactive_axes() {
        let g = GlobalGrid::try_from(cfg_2d()).unwrap();
        assert_eq!(g.cells(), [30, 20, 1]);
        assert_eq!(g.ghost_on(2), 0);
        assert!(g.is_periodic(0));
        assert!(!g.is_periodic(2));
        assert_eq!(g.length(0), 15.0);
    }

    #[test]
    fn ghost_narrower_than_stencil_is_rejected() {
        let mut cfg = cfg_2d();
        cfg.ghost_width = 1;
        cfg.stencil_radius = 2;
        assert!(matches!(
            GlobalGrid::try_from(cfg),
            Err(HaloError::Configuration(_))
        ));
    }

    #[test]
    fn mismatched_axis_vectors_are_rejected() {
        let mut cfg = cfg_2d();
        cfg.cells.push(4);
        assert!(GlobalGrid::try_from(cfg).is_err());

        let mut cfg = cfg_2d();
        cfg.dim = 4;
        assert!(GlobalGrid::try_from(cfg).is_err());

        let mut cfg = cfg_2d();
        cfg.cell_size[1] = f64::NAN;
        assert!(GlobalGrid::try_from(cfg).is_err());
    }
}
