//! Patch: one rectangular sub-domain with its field buffers and particles.
//!
//! Cell indices passed to a patch are *local*: they include the ghost margin,
//! so the first owned cell on an active axis is at index `ghost_width`.

pub mod neighbors;

pub use neighbors::{Locality, NeighborEntry, NeighborTable};

use crate::data::delta::{AddDelta, CopyDelta};
use crate::data::field::{FieldBuffer, FieldId};
use crate::data::halo_plan::{HaloMode, HaloPlan};
use crate::data::particle::{OutgoingParticles, Particle};
use crate::data::region::RegionView;
use crate::debug_invariants::DebugInvariants;
use crate::halo_error::HaloError;
use crate::topology::decomposition::{Decomposition, PatchRegion};
use crate::topology::direction::Direction;
use crate::topology::patch_id::{PatchCoords, PatchId};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct Patch {
    id: PatchId,
    coords: PatchCoords,
    owner: usize,
    dim: usize,
    region: PatchRegion,
    /// Physical patch width per axis, the migration reach limit.
    width: [f64; 3],
    plan: Arc<HaloPlan>,
    /// Indexed by `FieldId::index`.
    fields: Vec<FieldBuffer>,
    particles: Vec<Particle>,
    neighbors: NeighborTable,
}

impl Patch {
    /// Empty patch (zeroed fields, no particles) owned by `owner`.
    pub fn new(
        id: PatchId,
        decomposition: &Decomposition,
        plan: Arc<HaloPlan>,
        owner: usize,
    ) -> Result<Self, HaloError> {
        let coords = decomposition.coords(id)?;
        let region = decomposition.region(id)?;
        let mut width = [0.0f64; 3];
        for (a, w) in width.iter_mut().enumerate() {
            *w = decomposition.patch_width(a);
        }
        let fields = FieldId::ALL
            .iter()
            .map(|&f| FieldBuffer::new(f, *plan.layout(f)))
            .collect();
        Ok(Self {
            id,
            coords,
            owner,
            dim: decomposition.dim(),
            region,
            width,
            plan,
            fields,
            particles: Vec::new(),
            neighbors: NeighborTable::default(),
        })
    }

    #[inline]
    pub fn id(&self) -> PatchId {
        self.id
    }

    #[inline]
    pub fn coords(&self) -> PatchCoords {
        self.coords
    }

    /// Rank currently owning the patch.
    #[inline]
    pub fn owner(&self) -> usize {
        self.owner
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn region(&self) -> &PatchRegion {
        &self.region
    }

    /// Physical `[lo, hi)` of the owned region.
    #[inline]
    pub fn owned_bounds(&self) -> ([f64; 3], [f64; 3]) {
        (self.region.lo, self.region.hi)
    }

    #[inline]
    pub fn plan(&self) -> &HaloPlan {
        &self.plan
    }

    #[inline]
    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    pub(crate) fn set_owner(&mut self, owner: usize) {
        self.owner = owner;
    }

    pub(crate) fn set_neighbors(&mut self, neighbors: NeighborTable) {
        self.neighbors = neighbors;
    }

    /// Take the identity of `id` in `decomposition`, keeping the contents.
    /// Used when the window moves: the region's physical bounds stay put.
    pub(crate) fn relocate(&mut self, id: PatchId, decomposition: &Decomposition) -> Result<(), HaloError> {
        self.coords = decomposition.coords(id)?;
        self.region = decomposition.region(id)?;
        self.id = id;
        Ok(())
    }

    #[inline]
    pub fn field(&self, field: FieldId) -> &FieldBuffer {
        &self.fields[field.index()]
    }

    #[inline]
    pub fn field_mut(&mut self, field: FieldId) -> &mut FieldBuffer {
        &mut self.fields[field.index()]
    }

    /// Add `value` to a local cell (ghosts included). Never overwrites.
    pub fn deposit(&mut self, field: FieldId, local_cell: [usize; 3], value: f64) -> Result<(), HaloError> {
        self.field_mut(field).add(local_cell, value)
    }

    /// Zero the listed fields, typically densities before a deposition step.
    pub fn reset_fields(&mut self, fields: &[FieldId]) {
        for &f in fields {
            self.field_mut(f).fill(0.0);
        }
    }

    /// Read-only view of the slab this patch sends toward `direction`.
    pub fn export_region(
        &self,
        field: FieldId,
        direction: Direction,
        mode: HaloMode,
    ) -> Result<RegionView<'_>, HaloError> {
        let transfer = self.transfer_or_err(field, direction, mode)?;
        Ok(transfer.export.view(self.field(field).as_slice()))
    }

    /// Write `data` into the slab received from `direction`.
    ///
    /// `Copy` overwrites, `Sum` accumulates. `data` must hold exactly one
    /// value per slab cell, in slab order.
    pub fn import_region(
        &mut self,
        field: FieldId,
        direction: Direction,
        data: &[f64],
        mode: HaloMode,
    ) -> Result<(), HaloError> {
        let import = self.transfer_or_err(field, direction, mode)?.import;
        if import.len() != data.len() {
            return Err(HaloError::SlabLength {
                field,
                direction,
                expected: import.len(),
                got: data.len(),
            });
        }
        let dst = self.fields[field.index()].as_mut_slice();
        match mode {
            HaloMode::Copy => import.unpack::<f64, CopyDelta>(dst, data),
            HaloMode::Sum => import.unpack::<f64, AddDelta>(dst, data),
        }
        Ok(())
    }

    fn transfer_or_err(
        &self,
        field: FieldId,
        direction: Direction,
        mode: HaloMode,
    ) -> Result<&crate::data::halo_plan::TransferDescriptor, HaloError> {
        self.plan.transfer(field, direction, mode).ok_or_else(|| {
            HaloError::Configuration(format!(
                "direction {direction} does not exist on a {}-D grid",
                self.dim
            ))
        })
    }

    #[inline]
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Mutable access for the pusher.
    #[inline]
    pub fn particles_mut(&mut self) -> &mut Vec<Particle> {
        &mut self.particles
    }

    /// Remove every particle outside the owned region, grouped by destination.
    ///
    /// The direction is computed from all axes at once, so a particle past a
    /// corner goes to the diagonal neighbor. If any particle is more than one
    /// patch width outside (or not finite), nothing is removed and the first
    /// such particle is reported.
    pub fn take_outgoing_particles(&mut self) -> Result<OutgoingParticles, HaloError> {
        let destinations = self
            .particles
            .iter()
            .map(|p| self.destination(p))
            .collect::<Result<Vec<_>, _>>()?;
        let mut out = OutgoingParticles::default();
        if destinations.iter().all(Option::is_none) {
            return Ok(out);
        }
        let mut kept = Vec::with_capacity(self.particles.len());
        for (p, dest) in self.particles.drain(..).zip(destinations) {
            match dest {
                Some(dir) => out.push(dir, p),
                None => kept.push(p),
            }
        }
        self.particles = kept;
        log::trace!("patch {}: {} particles leaving", self.id, out.len());
        Ok(out)
    }

    /// Append particles. Positions are trusted to lie inside the owned region.
    pub fn receive_particles(&mut self, batch: impl IntoIterator<Item = Particle>) {
        self.particles.extend(batch);
    }

    /// Put back particles previously taken, e.g. when a migration round aborts.
    pub(crate) fn restore_particles(&mut self, outgoing: OutgoingParticles) {
        for (_, batch) in outgoing {
            self.particles.extend(batch);
        }
    }

    /// Drain all state for transfer to another rank.
    pub(crate) fn take_contents(&mut self) -> (Vec<FieldBuffer>, Vec<Particle>) {
        let fresh = FieldId::ALL
            .iter()
            .map(|&f| FieldBuffer::new(f, *self.plan.layout(f)))
            .collect();
        (
            std::mem::replace(&mut self.fields, fresh),
            std::mem::take(&mut self.particles),
        )
    }

    /// Install received field data (in `FieldId::ALL` order) and particles.
    pub(crate) fn install_contents(
        &mut self,
        fields: Vec<Vec<f64>>,
        particles: Vec<Particle>,
    ) -> Result<(), HaloError> {
        if fields.len() != FieldId::ALL.len() {
            return Err(HaloError::Configuration(format!(
                "patch {} received {} field buffers, expected {}",
                self.id,
                fields.len(),
                FieldId::ALL.len()
            )));
        }
        let buffers = FieldId::ALL
            .iter()
            .zip(fields)
            .map(|(&f, data)| FieldBuffer::from_vec(f, *self.plan.layout(f), data))
            .collect::<Result<Vec<_>, _>>()?;
        self.fields = buffers;
        self.particles = particles;
        Ok(())
    }

    /// `None` if the particle stays, its destination direction otherwise.
    fn destination(&self, p: &Particle) -> Result<Option<Direction>, HaloError> {
        let violation = || HaloError::TopologyInvariantViolation {
            patch: self.id,
            particle_id: p.id,
            position: p.position,
        };
        let mut offsets = [0i8; 3];
        for a in 0..self.dim {
            let x = p.position[a];
            let (lo, hi, w) = (self.region.lo[a], self.region.hi[a], self.width[a]);
            if !x.is_finite() {
                return Err(violation());
            }
            if x < lo {
                if x < lo - w {
                    return Err(violation());
                }
                offsets[a] = -1;
            } else if x >= hi {
                if x >= hi + w {
                    return Err(violation());
                }
                offsets[a] = 1;
            }
        }
        Ok(Direction::new(offsets))
    }
}

impl DebugInvariants for Patch {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "Patch");
    }

    /// Buffers match the plan and every particle lies in the owned region.
    fn validate_invariants(&self) -> Result<(), HaloError> {
        for f in FieldId::ALL {
            let buf = self.field(f);
            if buf.id() != f || buf.layout() != self.plan.layout(f) {
                return Err(HaloError::Configuration(format!(
                    "patch {}: buffer for {f:?} does not match the halo plan",
                    self.id
                )));
            }
        }
        if let Some(p) = self
            .particles
            .iter()
            .find(|p| !self.region.contains_position(p.position, self.dim))
        {
            return Err(HaloError::TopologyInvariantViolation {
                patch: self.id,
                particle_id: p.id,
                position: p.position,
            });
        }
        Ok(())
    }
}
