//! Field identities, staggering and dense field buffers.
//!
//! Fields live on a staggered (Yee) grid: along each axis a component is either
//! *primal* (stored on nodes) or *dual* (stored at cell centres, half a cell
//! further). Along an active axis with `n` owned cells and ghost width `g` a
//! primal buffer holds `n + 2g + 1` values and a dual buffer `n + 2g`. The
//! node at local index `n + g` of a primal buffer is the lower boundary node
//! of the next patch and therefore belongs to its ghost margin.

use crate::halo_error::HaloError;

/// The field buffers every patch carries.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[repr(u8)]
pub enum FieldId {
    Rho,
    Jx,
    Jy,
    Jz,
    Ex,
    Ey,
    Ez,
    Bx,
    By,
    Bz,
}

impl FieldId {
    pub const ALL: [FieldId; 10] = [
        FieldId::Rho,
        FieldId::Jx,
        FieldId::Jy,
        FieldId::Jz,
        FieldId::Ex,
        FieldId::Ey,
        FieldId::Ez,
        FieldId::Bx,
        FieldId::By,
        FieldId::Bz,
    ];

    /// Deposited quantities, exchanged by summation.
    pub const DENSITIES: [FieldId; 4] = [FieldId::Rho, FieldId::Jx, FieldId::Jy, FieldId::Jz];

    /// Solver outputs, exchanged by copy.
    pub const ELECTROMAGNETIC: [FieldId; 6] = [
        FieldId::Ex,
        FieldId::Ey,
        FieldId::Ez,
        FieldId::Bx,
        FieldId::By,
        FieldId::Bz,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn is_density(self) -> bool {
        matches!(self, FieldId::Rho | FieldId::Jx | FieldId::Jy | FieldId::Jz)
    }

    /// Yee staggering of the component.
    pub fn staggering(self) -> Staggering {
        let dual = match self {
            FieldId::Rho => [false, false, false],
            FieldId::Jx | FieldId::Ex => [true, false, false],
            FieldId::Jy | FieldId::Ey => [false, true, false],
            FieldId::Jz | FieldId::Ez => [false, false, true],
            FieldId::Bx => [false, true, true],
            FieldId::By => [true, false, true],
            FieldId::Bz => [true, true, false],
        };
        Staggering(dual)
    }
}

/// Per-axis primal/dual flags (`true` = dual).
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct Staggering(pub [bool; 3]);

impl Staggering {
    pub const PRIMAL: Staggering = Staggering([false; 3]);

    #[inline]
    pub fn is_dual(&self, axis: usize) -> bool {
        self.0[axis]
    }

    /// Extra node a primal axis stores beyond the dual extent (1 or 0).
    #[inline]
    pub fn extra_node(&self, axis: usize) -> usize {
        usize::from(!self.0[axis])
    }
}

/// Extents and strides of one field buffer, row-major with the last axis fastest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldLayout {
    extents: [usize; 3],
    strides: [usize; 3],
    ghost: [usize; 3],
    staggering: Staggering,
}

impl FieldLayout {
    /// Layout for a patch of `patch_cells` owned cells.
    ///
    /// Axes at or beyond `dim` collapse to a single value with no ghosts.
    pub fn new(patch_cells: [usize; 3], ghost_width: usize, dim: usize, staggering: Staggering) -> Self {
        let mut extents = [1usize; 3];
        let mut ghost = [0usize; 3];
        for a in 0..dim {
            ghost[a] = ghost_width;
            extents[a] = patch_cells[a] + 2 * ghost_width + staggering.extra_node(a);
        }
        let strides = [extents[1] * extents[2], extents[2], 1];
        Self {
            extents,
            strides,
            ghost,
            staggering,
        }
    }

    #[inline]
    pub fn extents(&self) -> [usize; 3] {
        self.extents
    }

    #[inline]
    pub fn strides(&self) -> [usize; 3] {
        self.strides
    }

    #[inline]
    pub fn ghost(&self) -> [usize; 3] {
        self.ghost
    }

    #[inline]
    pub fn staggering(&self) -> Staggering {
        self.staggering
    }

    /// Number of stored values.
    #[inline]
    pub fn len(&self) -> usize {
        self.extents.iter().product()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Linear index of a local cell (ghosts included), if inside the buffer.
    #[inline]
    pub fn linear(&self, cell: [usize; 3]) -> Option<usize> {
        if (0..3).any(|a| cell[a] >= self.extents[a]) {
            return None;
        }
        Some(cell[0] * self.strides[0] + cell[1] * self.strides[1] + cell[2] * self.strides[2])
    }
}

/// Dense storage for one field of one patch.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldBuffer {
    id: FieldId,
    layout: FieldLayout,
    data: Vec<f64>,
}

impl FieldBuffer {
    /// Zero-initialized buffer.
    pub fn new(id: FieldId, layout: FieldLayout) -> Self {
        Self {
            id,
            layout,
            data: vec![0.0; layout.len()],
        }
    }

    /// Buffer over existing data, which must match the layout length.
    pub fn from_vec(id: FieldId, layout: FieldLayout, data: Vec<f64>) -> Result<Self, HaloError> {
        if data.len() != layout.len() {
            return Err(HaloError::Configuration(format!(
                "{id:?} buffer holds {} values, layout needs {}",
                data.len(),
                layout.len()
            )));
        }
        Ok(Self { id, layout, data })
    }

    #[inline]
    pub fn id(&self) -> FieldId {
        self.id
    }

    #[inline]
    pub fn layout(&self) -> &FieldLayout {
        &self.layout
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn get(&self, cell: [usize; 3]) -> Option<f64> {
        self.layout.linear(cell).map(|i| self.data[i])
    }

    /// Accumulate `value` into a local cell.
    pub fn add(&mut self, cell: [usize; 3], value: f64) -> Result<(), HaloError> {
        let i = self.index_or_err(cell)?;
        self.data[i] += value;
        Ok(())
    }

    /// Overwrite a local cell.
    pub fn set(&mut self, cell: [usize; 3], value: f64) -> Result<(), HaloError> {
        let i = self.index_or_err(cell)?;
        self.data[i] = value;
        Ok(())
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    fn index_or_err(&self, cell: [usize; 3]) -> Result<usize, HaloError> {
        self.layout.linear(cell).ok_or(HaloError::CellOutOfBounds {
            field: self.id,
            cell,
            extent: self.layout.extents,
        })
    }
}
