//! Halo rounds: sum exchange of deposited densities, copy exchange of fields.
//!
//! A full round moves every slab toward all face, edge and corner neighbors
//! at once, so corner ghosts are filled in one pass. The `_along` variants
//! restrict a round to the two face neighbors on one axis. A sum sweep over
//! every active axis in turn gives the same owned-cell totals as one full
//! sum round, because sum slabs span the whole perpendicular extent. Copy
//! slabs only span owned cells across the face, so copy sweeps fill face
//! ghosts and leave edge and corner ghosts untouched.

use super::ExchangeEngine;
use super::transfer::PostedTransfer;
use crate::algs::communicator::Communicator;
use crate::algs::wire::{decode_f64s, encode_f64s};
use crate::data::field::FieldId;
use crate::data::halo_plan::HaloMode;
use crate::halo_error::HaloError;
use crate::patch::{Locality, Patch};
use crate::topology::direction::Direction;
use crate::topology::patch_id::PatchId;
use itertools::Itertools;
use std::collections::BTreeMap;
use std::mem::size_of;

/// `(receiving patch, direction at the receiver, field)`.
type SegmentKey = (PatchId, Direction, FieldId);

/// One packed export slab.
struct Segment {
    key: SegmentKey,
    locality: Locality,
    data: Vec<f64>,
}

/// Summary of a completed halo round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HaloReport {
    pub mode: HaloMode,
    pub fields: Vec<FieldId>,
    /// The axis of a face-only round, `None` for a full round.
    pub axis: Option<usize>,
    /// Segments applied between patches of this rank.
    pub local_segments: usize,
    /// Segments received from other ranks.
    pub remote_segments: usize,
    pub peers: usize,
    pub bytes_sent: usize,
    pub bytes_received: usize,
}

/// A halo round in flight. Holds the engine until [`wait`](Self::wait).
///
/// Dropping the handle without waiting completes the round anyway and logs
/// an error.
#[must_use = "a halo round must be waited on before ghost cells are valid"]
pub struct HaloRound<'a, C: Communicator> {
    engine: &'a mut ExchangeEngine<C>,
    mode: HaloMode,
    fields: Vec<FieldId>,
    axis: Option<usize>,
    posted: Option<PostedTransfer<C>>,
    /// Per peer: segments in message order with their value counts.
    expected: BTreeMap<usize, Vec<(SegmentKey, usize)>>,
    local_segments: usize,
    local_error: Option<HaloError>,
    done: bool,
}

impl<C: Communicator> ExchangeEngine<C> {
    /// Start a sum exchange: overlapping cells of neighboring patches
    /// accumulate each other's pre-exchange values.
    pub fn begin_sum_exchange(&mut self, fields: &[FieldId]) -> Result<HaloRound<'_, C>, HaloError> {
        self.begin_halo(HaloMode::Sum, fields, None)
    }

    /// Start a copy exchange: ghost cells are overwritten with the owning
    /// neighbor's interior.
    pub fn begin_copy_exchange(&mut self, fields: &[FieldId]) -> Result<HaloRound<'_, C>, HaloError> {
        self.begin_halo(HaloMode::Copy, fields, None)
    }

    /// Sum exchange with the two face neighbors along `axis` only.
    ///
    /// # Errors
    /// `Configuration` if `axis` is not an active axis of the grid.
    pub fn begin_sum_exchange_along(
        &mut self,
        axis: usize,
        fields: &[FieldId],
    ) -> Result<HaloRound<'_, C>, HaloError> {
        self.check_axis(axis)?;
        self.begin_halo(HaloMode::Sum, fields, Some(axis))
    }

    /// Copy exchange with the two face neighbors along `axis` only.
    ///
    /// # Errors
    /// `Configuration` if `axis` is not an active axis of the grid.
    pub fn begin_copy_exchange_along(
        &mut self,
        axis: usize,
        fields: &[FieldId],
    ) -> Result<HaloRound<'_, C>, HaloError> {
        self.check_axis(axis)?;
        self.begin_halo(HaloMode::Copy, fields, Some(axis))
    }

    pub fn sum_exchange(&mut self, fields: &[FieldId]) -> Result<HaloReport, HaloError> {
        self.begin_sum_exchange(fields)?.wait()
    }

    pub fn copy_exchange(&mut self, fields: &[FieldId]) -> Result<HaloReport, HaloError> {
        self.begin_copy_exchange(fields)?.wait()
    }

    pub fn sum_exchange_along(&mut self, axis: usize, fields: &[FieldId]) -> Result<HaloReport, HaloError> {
        self.begin_sum_exchange_along(axis, fields)?.wait()
    }

    pub fn copy_exchange_along(&mut self, axis: usize, fields: &[FieldId]) -> Result<HaloReport, HaloError> {
        self.begin_copy_exchange_along(axis, fields)?.wait()
    }

    fn check_axis(&self, axis: usize) -> Result<(), HaloError> {
        if axis < self.decomposition.dim() {
            Ok(())
        } else {
            Err(HaloError::Configuration(format!(
                "no axis {axis} in a {}-D grid",
                self.decomposition.dim()
            )))
        }
    }

    fn begin_halo(
        &mut self,
        mode: HaloMode,
        fields: &[FieldId],
        axis: Option<usize>,
    ) -> Result<HaloRound<'_, C>, HaloError> {
        let fields: Vec<FieldId> = fields.iter().copied().sorted().dedup().collect();
        log::debug!("rank {}: begin {mode:?} exchange of {fields:?} (axis {axis:?})", self.rank());

        // Every export is packed before any import is applied: sum slabs
        // overlap the ghost margin they are added into.
        let packed = self.pack_exports(mode, &fields, axis)?;

        let mut local = Vec::new();
        let mut remote: BTreeMap<usize, Vec<Segment>> = BTreeMap::new();
        for seg in packed.into_iter().flatten() {
            match seg.locality {
                Locality::Local => local.push(seg),
                Locality::Remote { rank } => remote.entry(rank).or_default().push(seg),
            }
        }
        let outgoing: BTreeMap<usize, Vec<u8>> = remote
            .into_iter()
            .map(|(peer, mut segs)| {
                segs.sort_by_key(|s| s.key);
                let mut buf = Vec::new();
                for s in &segs {
                    encode_f64s(&s.data, &mut buf);
                }
                (peer, buf)
            })
            .collect();

        let expected = self.expected_segments(mode, &fields, axis);
        let incoming: BTreeMap<usize, usize> = expected
            .iter()
            .map(|(&peer, segs)| (peer, segs.iter().map(|(_, n)| n * size_of::<f64>()).sum()))
            .filter(|&(_, len)| len > 0)
            .collect();
        let tag = match mode {
            HaloMode::Sum => self.tags.sum,
            HaloMode::Copy => self.tags.copy,
        };
        let posted = PostedTransfer::post(&self.comm, tag, &outgoing, &incoming);

        let local_segments = local.len();
        let mut local_error = None;
        for seg in local {
            let (to, dir, field) = seg.key;
            let applied = match self.patches.get_mut(&to) {
                Some(patch) => patch.import_region(field, dir, &seg.data, mode),
                None => Err(HaloError::UnknownPatch(to)),
            };
            if let Err(e) = applied {
                local_error.get_or_insert(e);
            }
        }

        Ok(HaloRound {
            engine: self,
            mode,
            fields,
            axis,
            posted: Some(posted),
            expected,
            local_segments,
            local_error,
            done: false,
        })
    }

    #[cfg(feature = "rayon")]
    fn pack_exports(
        &self,
        mode: HaloMode,
        fields: &[FieldId],
        axis: Option<usize>,
    ) -> Result<Vec<Vec<Segment>>, HaloError> {
        use rayon::prelude::*;
        self.patches
            .par_iter()
            .map(|(_, p)| pack_patch(p, mode, fields, axis))
            .collect()
    }

    #[cfg(not(feature = "rayon"))]
    fn pack_exports(
        &self,
        mode: HaloMode,
        fields: &[FieldId],
        axis: Option<usize>,
    ) -> Result<Vec<Vec<Segment>>, HaloError> {
        self.patches
            .values()
            .map(|p| pack_patch(p, mode, fields, axis))
            .collect()
    }

    /// Remote segments this rank receives, grouped by sending rank, in message order.
    fn expected_segments(
        &self,
        mode: HaloMode,
        fields: &[FieldId],
        axis: Option<usize>,
    ) -> BTreeMap<usize, Vec<(SegmentKey, usize)>> {
        let mut expected: BTreeMap<usize, Vec<(SegmentKey, usize)>> = BTreeMap::new();
        for patch in self.patches.values() {
            for (dir, entry) in patch.neighbors().iter().filter(|(d, _)| in_round(d, axis)) {
                let Locality::Remote { rank } = entry.locality else {
                    continue;
                };
                let segs = expected.entry(rank).or_default();
                for &field in fields {
                    segs.push((
                        (patch.id(), dir, field),
                        self.plan.slab_len(field, dir, mode),
                    ));
                }
            }
        }
        expected
    }
}

/// Whether `dir` takes part in a round restricted to `axis`.
fn in_round(dir: &Direction, axis: Option<usize>) -> bool {
    axis.map_or(true, |a| dir.is_face() && dir.component(a) != 0)
}

/// Export slabs of one patch toward every neighbor of the round, keyed at the receiver.
fn pack_patch(
    patch: &Patch,
    mode: HaloMode,
    fields: &[FieldId],
    axis: Option<usize>,
) -> Result<Vec<Segment>, HaloError> {
    let mut out = Vec::with_capacity(patch.neighbors().len() * fields.len());
    for (dir, entry) in patch.neighbors().iter().filter(|(d, _)| in_round(d, axis)) {
        for &field in fields {
            let data = patch.export_region(field, dir, mode)?.to_vec();
            out.push(Segment {
                key: (entry.patch, dir.opposite(), field),
                locality: entry.locality,
                data,
            });
        }
    }
    Ok(out)
}

impl<C: Communicator> HaloRound<'_, C> {
    #[inline]
    pub fn mode(&self) -> HaloMode {
        self.mode
    }

    #[inline]
    pub fn fields(&self) -> &[FieldId] {
        &self.fields
    }

    /// Number of peer ranks whose messages are still outstanding.
    pub fn pending_peers(&self) -> usize {
        if self.posted.is_some() { self.expected.len() } else { 0 }
    }

    /// Block until every remote segment is applied and all ranks are done.
    pub fn wait(mut self) -> Result<HaloReport, HaloError> {
        self.finish()
    }

    fn finish(&mut self) -> Result<HaloReport, HaloError> {
        self.done = true;
        let mut first_err = self.local_error.take();
        let mut bytes_sent = 0;
        let mut bytes_received = 0;
        let mut remote_segments = 0;

        if let Some(posted) = self.posted.take() {
            bytes_sent = posted.bytes_sent();
            match posted.complete() {
                Ok(received) => {
                    for (peer, bytes) in received {
                        bytes_received += bytes.len();
                        match self.unpack_peer(peer, &bytes) {
                            Ok(n) => remote_segments += n,
                            Err(e) => {
                                first_err.get_or_insert(e);
                            }
                        }
                    }
                }
                Err(e) => {
                    first_err.get_or_insert(self.locate(e));
                }
            }
        }
        if let Err(e) = self.engine.comm.barrier() {
            first_err.get_or_insert(e);
        }
        if let Some(e) = first_err {
            return Err(e);
        }

        let report = HaloReport {
            mode: self.mode,
            fields: self.fields.clone(),
            axis: self.axis,
            local_segments: self.local_segments,
            remote_segments,
            peers: self.expected.len(),
            bytes_sent,
            bytes_received,
        };
        log::debug!(
            "rank {}: {:?} exchange complete ({} local, {} remote segments)",
            self.engine.rank(),
            self.mode,
            report.local_segments,
            report.remote_segments
        );
        Ok(report)
    }

    /// Apply one peer's message segment by segment.
    fn unpack_peer(&mut self, peer: usize, bytes: &[u8]) -> Result<usize, HaloError> {
        let values = decode_f64s(bytes).map_err(|reason| HaloError::transport(peer, reason))?;
        let segs = self.expected.get(&peer).map(Vec::as_slice).unwrap_or(&[]);
        let mut cursor = 0;
        for &((to, dir, field), n) in segs {
            let Some(chunk) = values.get(cursor..cursor + n) else {
                return Err(segment_failure(peer, to, dir, field, "message too short"));
            };
            let patch = self
                .engine
                .patches
                .get_mut(&to)
                .ok_or(HaloError::UnknownPatch(to))?;
            patch
                .import_region(field, dir, chunk, self.mode)
                .map_err(|e| segment_failure(peer, to, dir, field, &e.to_string()))?;
            cursor += n;
        }
        Ok(segs.len())
    }

    /// Attach the first segment expected from the failing peer to a transport error.
    fn locate(&self, err: HaloError) -> HaloError {
        match err {
            HaloError::TransportFailure {
                peer,
                patch: None,
                reason,
                ..
            } => match self.expected.get(&peer).and_then(|s| s.first()) {
                Some(&((to, dir, field), _)) => segment_failure(peer, to, dir, field, &reason),
                None => HaloError::transport(peer, reason),
            },
            other => other,
        }
    }
}

fn segment_failure(peer: usize, patch: PatchId, dir: Direction, field: FieldId, reason: &str) -> HaloError {
    HaloError::TransportFailure {
        peer,
        patch: Some(patch),
        direction: Some(dir),
        field: Some(field),
        reason: reason.to_string(),
    }
}

impl<C: Communicator> Drop for HaloRound<'_, C> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        log::error!(
            "rank {}: {:?} halo round dropped without wait; completing it now",
            self.engine.rank(),
            self.mode
        );
        if let Err(e) = self.finish() {
            log::error!("rank {}: implicit completion failed: {e}", self.engine.rank());
        }
    }
}
