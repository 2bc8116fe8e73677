//! Particle migration rounds.
//!
//! Particles that left their patch are routed to the single neighbor in their
//! exit direction (diagonals included). Crossing a periodic boundary shifts
//! the position by one domain length; leaving through an open boundary
//! removes the particle and counts it as lost. Remote deliveries use two
//! phases per peer: a record count, then the `WireParticle` records, each
//! carrying its destination patch.

use super::ExchangeEngine;
use super::perf::FastMap;
use super::transfer::{
    PostedTransfer, complete_counts, complete_payloads, exchange_payloads, post_counts,
};
use crate::algs::communicator::Communicator;
use crate::algs::wire::{WireParticle, WireTrackedId, cast_slice, decode_records};
use crate::data::particle::{OutgoingParticles, Particle};
use crate::halo_error::HaloError;
use crate::patch::Locality;
use crate::topology::patch_id::PatchId;
use std::collections::{BTreeMap, BTreeSet};
use std::mem::size_of;

/// Summary of a completed migration round.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Particles moved between patches of this rank.
    pub moved_local: usize,
    pub sent_remote: usize,
    pub received_remote: usize,
    /// Particles that left the domain through a non-periodic boundary.
    pub lost: usize,
    pub peers: usize,
    pub bytes_sent: usize,
    pub bytes_received: usize,
}

/// A migration round in flight. Holds the engine until [`wait`](Self::wait).
#[must_use = "a migration round must be waited on before particles are in place"]
pub struct MigrationRound<'a, C: Communicator> {
    engine: &'a mut ExchangeEngine<C>,
    /// Encoded records per peer; empty for peers we send nothing to.
    outgoing: BTreeMap<usize, Vec<u8>>,
    counts: Option<PostedTransfer<C>>,
    report: MigrationReport,
    done: bool,
}

impl<C: Communicator> ExchangeEngine<C> {
    /// Take every outgoing particle from every local patch, deliver same-rank
    /// moves and announce remote counts.
    ///
    /// # Errors
    /// `TopologyInvariantViolation` if any particle moved more than one patch
    /// width. All particles are then back where they were.
    pub fn begin_particle_migration(&mut self) -> Result<MigrationRound<'_, C>, HaloError> {
        let staged = self.stage_outgoing()?;
        let me = self.rank();

        let mut report = MigrationReport::default();
        let mut local: BTreeMap<PatchId, Vec<Particle>> = BTreeMap::new();
        let mut remote: BTreeMap<usize, Vec<WireParticle>> = BTreeMap::new();
        for (from, outgoing) in staged {
            let Some(patch) = self.patches.get(&from) else {
                continue;
            };
            for (dir, batch) in outgoing {
                let Some(entry) = patch.neighbors().get(dir) else {
                    log::warn!(
                        "rank {me}: {} particles left patch {from} through the open {dir} boundary",
                        batch.len()
                    );
                    report.lost += batch.len();
                    continue;
                };
                let shift = self.decomposition.wrap_shift(from, dir)?;
                let wraps = shift.iter().any(|&s| s != 0.0);
                for mut p in batch {
                    if wraps {
                        self.decomposition.apply_wrap(&mut p.position, shift);
                    }
                    match entry.locality {
                        Locality::Local => local.entry(entry.patch).or_default().push(p),
                        Locality::Remote { rank } => remote
                            .entry(rank)
                            .or_default()
                            .push(WireParticle::new(entry.patch, &p)),
                    }
                }
            }
        }

        for (to, batch) in local {
            report.moved_local += batch.len();
            self.patch_mut(to)?.receive_particles(batch);
        }

        let peers = self.remote_peers();
        let mut announce = BTreeMap::new();
        let mut outgoing = BTreeMap::new();
        for &peer in &peers {
            let records = remote.remove(&peer).unwrap_or_default();
            report.sent_remote += records.len();
            announce.insert(peer, records.len());
            outgoing.insert(peer, cast_slice(&records).to_vec());
        }
        report.peers = peers.len();
        let counts = post_counts(&self.comm, self.tags.migration_sizes, &announce, &peers);
        log::debug!(
            "rank {me}: migration begun ({} local, {} remote, {} lost)",
            report.moved_local,
            report.sent_remote,
            report.lost
        );

        Ok(MigrationRound {
            engine: self,
            outgoing,
            counts: Some(counts),
            report,
            done: false,
        })
    }

    /// Begin and wait in one call.
    pub fn migrate_particles(&mut self) -> Result<MigrationReport, HaloError> {
        self.begin_particle_migration()?.wait()
    }

    /// Outgoing particles of every local patch, or none at all on error.
    fn stage_outgoing(&mut self) -> Result<Vec<(PatchId, OutgoingParticles)>, HaloError> {
        let mut staged = Vec::new();
        let mut failure = None;
        for (&id, patch) in self.patches.iter_mut() {
            match patch.take_outgoing_particles() {
                Ok(out) if out.is_empty() => {}
                Ok(out) => staged.push((id, out)),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        let Some(err) = failure else {
            return Ok(staged);
        };
        for (id, out) in staged {
            if let Some(patch) = self.patches.get_mut(&id) {
                patch.restore_particles(out);
            }
        }
        Err(err)
    }

    /// Every tracked particle id appears in at most one patch of any rank.
    ///
    /// Collective: with more than one rank every rank sends its tracked ids
    /// to every other rank, so a particle held by two ranks is reported on
    /// both. The exchange runs even when a local duplicate is already known.
    fn check_single_delivery(&self) -> Result<(), HaloError> {
        let mut local_dup = None;
        let mut seen: FastMap<u64, PatchId> = FastMap::default();
        for patch in self.patches.values() {
            for p in patch.particles().iter().filter(|p| p.id != 0) {
                match seen.get(&p.id) {
                    Some(&first) => {
                        local_dup.get_or_insert(HaloError::DoubleDelivery {
                            particle_id: p.id,
                            first,
                            second: patch.id(),
                        });
                    }
                    None => {
                        seen.insert(p.id, patch.id());
                    }
                }
            }
        }
        if self.comm.size() == 1 {
            return local_dup.map_or(Ok(()), Err);
        }

        let me = self.rank();
        let peers: BTreeSet<usize> = (0..self.comm.size()).filter(|&r| r != me).collect();
        let mut records: Vec<WireTrackedId> =
            seen.iter().map(|(&id, &patch)| WireTrackedId::new(id, patch)).collect();
        records.sort_by_key(WireTrackedId::id);
        let payload = cast_slice(&records).to_vec();
        let outgoing = peers.iter().map(|&p| (p, payload.clone())).collect();
        let (received, _) = exchange_payloads(
            &self.comm,
            self.tags.migration_check_sizes,
            self.tags.migration_check_data,
            outgoing,
            &peers,
        )?;
        if let Some(e) = local_dup {
            return Err(e);
        }
        for (peer, bytes) in received {
            let size = size_of::<WireTrackedId>();
            if bytes.len() % size != 0 {
                return Err(HaloError::transport(
                    peer,
                    format!("{} bytes is not a whole number of id records", bytes.len()),
                ));
            }
            let remote = decode_records::<WireTrackedId>(&bytes, bytes.len() / size)
                .map_err(|reason| HaloError::transport(peer, reason))?;
            for rec in remote {
                if let Some(&mine) = seen.get(&rec.id()) {
                    let (first, second) = if rec.patch() < mine {
                        (rec.patch(), mine)
                    } else {
                        (mine, rec.patch())
                    };
                    return Err(HaloError::DoubleDelivery {
                        particle_id: rec.id(),
                        first,
                        second,
                    });
                }
            }
        }
        Ok(())
    }
}

impl<C: Communicator> MigrationRound<'_, C> {
    /// Block until remote particles are delivered and all ranks are done.
    pub fn wait(mut self) -> Result<MigrationReport, HaloError> {
        self.finish()
    }

    fn finish(&mut self) -> Result<MigrationReport, HaloError> {
        self.done = true;
        let mut first_err = None;
        if let Some(counts) = self.counts.take() {
            if let Err(e) = self.deliver_remote(counts) {
                first_err = Some(e);
            }
        }
        // Collective, so it runs even after a failed delivery.
        if cfg!(any(debug_assertions, feature = "check-invariants")) {
            if let Err(e) = self.engine.check_single_delivery() {
                first_err.get_or_insert(e);
            }
        }
        if let Err(e) = self.engine.comm.barrier() {
            first_err.get_or_insert(e);
        }
        if let Some(e) = first_err {
            return Err(e);
        }
        log::debug!(
            "rank {}: migration complete ({} received)",
            self.engine.rank(),
            self.report.received_remote
        );
        Ok(self.report.clone())
    }

    fn deliver_remote(&mut self, counts: PostedTransfer<C>) -> Result<(), HaloError> {
        let counts = complete_counts(counts)?;
        let sizes: BTreeMap<usize, usize> = counts
            .iter()
            .map(|(&peer, &n)| (peer, n * size_of::<WireParticle>()))
            .collect();
        let outgoing = std::mem::take(&mut self.outgoing);
        let (received, sent) =
            complete_payloads(&self.engine.comm, self.engine.tags.migration_data, outgoing, &sizes)?;
        self.report.bytes_sent = sent;

        let mut by_patch: BTreeMap<PatchId, Vec<Particle>> = BTreeMap::new();
        for (peer, bytes) in received {
            self.report.bytes_received += bytes.len();
            let n = counts.get(&peer).copied().unwrap_or(0);
            let records = decode_records::<WireParticle>(&bytes, n)
                .map_err(|reason| HaloError::transport(peer, reason))?;
            for rec in records {
                let dest = rec.dest();
                if !self.engine.patches.contains_key(&dest) {
                    return Err(HaloError::TransportFailure {
                        peer,
                        patch: Some(dest),
                        direction: None,
                        field: None,
                        reason: "particle addressed to a patch this rank does not own".into(),
                    });
                }
                by_patch.entry(dest).or_default().push(rec.particle());
            }
        }
        for (dest, batch) in by_patch {
            self.report.received_remote += batch.len();
            self.engine.patch_mut(dest)?.receive_particles(batch);
        }
        Ok(())
    }
}

impl<C: Communicator> Drop for MigrationRound<'_, C> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        log::error!(
            "rank {}: migration round dropped without wait; completing it now",
            self.engine.rank()
        );
        if let Err(e) = self.finish() {
            log::error!("rank {}: implicit completion failed: {e}", self.engine.rank());
        }
    }
}
