//! Moving window.
//!
//! Advancing the window by `n` patches along a non-periodic axis hands the
//! contents of every patch to the patch `n` places behind it. Patch ids and
//! rank ownership stay as they are; only the physical origin of the
//! decomposition moves. Contents of the first `n` patch layers fall behind
//! the window and are dropped, and the last `n` layers start zeroed and
//! empty. Cross-rank hand-overs use the same patch encoding as rebalancing.

use super::ExchangeEngine;
use super::rebalance::encode_patch_as;
use super::transfer::exchange_payloads;
use crate::algs::communicator::Communicator;
use crate::halo_error::HaloError;
use crate::patch::Patch;
use crate::topology::patch_id::PatchId;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WindowShiftReport {
    pub axis: usize,
    pub n_patches: usize,
    /// Local patches whose contents fell behind the window.
    pub dropped: Vec<PatchId>,
    /// Local patches that entered at the leading edge, zeroed and empty.
    pub entered: Vec<PatchId>,
    /// Particles held by dropped contents.
    pub particles_lost: usize,
    pub bytes_sent: usize,
    pub bytes_received: usize,
}

impl<C: Communicator> ExchangeEngine<C> {
    /// Advance the window `n_patches` patch widths along `axis`.
    ///
    /// Collective: every rank must call it with the same arguments.
    ///
    /// # Errors
    /// `Configuration` if `axis` is inactive or periodic (nothing has moved
    /// yet); `TransportFailure` if contents fail to arrive. After a transport
    /// failure the engine is not usable.
    pub fn shift_window(&mut self, axis: usize, n_patches: usize) -> Result<WindowShiftReport, HaloError> {
        let next = Arc::new(self.decomposition.shifted(axis, n_patches)?);
        let me = self.rank();

        // target -> owner of its source, for every target fed from elsewhere.
        let mut sources: BTreeMap<PatchId, usize> = BTreeMap::new();
        let mut targets: BTreeMap<PatchId, Option<PatchId>> = BTreeMap::new();
        let mut peers = BTreeSet::new();
        for id in self.decomposition.patch_ids() {
            let target = self.decomposition.window_target(id, axis, n_patches)?;
            let from = self.assignment.owner_or_err(id)?;
            if let Some(t) = target {
                let to = self.assignment.owner_or_err(t)?;
                sources.insert(t, from);
                if from == me && to != me {
                    peers.insert(to);
                } else if to == me && from != me {
                    peers.insert(from);
                }
            }
            if from == me {
                targets.insert(id, target);
            }
        }

        let mut report = WindowShiftReport {
            axis,
            n_patches,
            ..WindowShiftReport::default()
        };
        let mut kept: BTreeMap<PatchId, Patch> = BTreeMap::new();
        let mut outgoing: BTreeMap<usize, Vec<u8>> = BTreeMap::new();
        for (id, mut patch) in std::mem::take(&mut self.patches) {
            match targets.get(&id).copied().flatten() {
                None => {
                    report.dropped.push(id);
                    report.particles_lost += patch.particles().len();
                }
                Some(t) => match self.assignment.owner_or_err(t)? {
                    to if to == me => {
                        patch.relocate(t, &next)?;
                        kept.insert(t, patch);
                    }
                    to => encode_patch_as(&mut patch, t, outgoing.entry(to).or_default()),
                },
            }
        }

        let (received, bytes_sent) =
            exchange_payloads(&self.comm, self.tags.window_sizes, self.tags.window_data, outgoing, &peers)?;
        report.bytes_sent = bytes_sent;
        for (peer, bytes) in received {
            report.bytes_received += bytes.len();
            for patch in self.decode_patches(peer, &bytes, &self.assignment, &next)? {
                kept.insert(patch.id(), patch);
            }
        }

        for id in self.assignment.patches_of(me) {
            if kept.contains_key(&id) {
                continue;
            }
            if let Some(&from) = sources.get(&id) {
                return Err(HaloError::TransportFailure {
                    peer: from,
                    patch: Some(id),
                    direction: None,
                    field: None,
                    reason: "patch contents did not arrive during window shift".into(),
                });
            }
            kept.insert(id, Patch::new(id, &next, Arc::clone(&self.plan), me)?);
            report.entered.push(id);
        }

        self.patches = kept;
        self.decomposition = next;
        self.relink()?;
        self.comm.barrier()?;
        if report.particles_lost > 0 {
            log::warn!(
                "rank {me}: {} particles left behind the moving window",
                report.particles_lost
            );
        }
        log::info!(
            "rank {me}: window moved {n_patches} patches along axis {axis}; origin now {:?}",
            self.decomposition.window_origin()
        );
        Ok(report)
    }
}
