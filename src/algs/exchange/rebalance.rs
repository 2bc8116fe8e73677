//! Re-assignment of patches to ranks.
//!
//! Only the mechanism lives here: an external policy decides the new owner of
//! every patch, then every rank calls [`ExchangeEngine::on_rebalance`] with
//! the same assignment. Both sides of a move derive it from the old and new
//! assignments, so no negotiation is needed. Each moved patch travels as a
//! [`WirePatchHeader`], its field values in `FieldId::ALL` order and its
//! particles.

use super::ExchangeEngine;
use super::transfer::exchange_payloads;
use crate::algs::communicator::Communicator;
use crate::algs::wire::{
    WireParticle, WirePatchHeader, cast_slice, decode_f64s, decode_records, encode_f64s,
};
use crate::data::field::FieldId;
use crate::debug_invariants::DebugInvariants;
use crate::halo_error::HaloError;
use crate::patch::Patch;
use crate::topology::decomposition::Decomposition;
use crate::topology::ownership::RankAssignment;
use crate::topology::patch_id::PatchId;
use std::collections::{BTreeMap, BTreeSet};
use std::mem::size_of;
use std::sync::Arc;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RebalanceReport {
    /// Patches handed to other ranks.
    pub sent: Vec<PatchId>,
    /// Patches taken over from other ranks.
    pub received: Vec<PatchId>,
    pub bytes_sent: usize,
    pub bytes_received: usize,
}

impl<C: Communicator> ExchangeEngine<C> {
    /// Move patches whose owner changes in `next`, then relink neighbors.
    ///
    /// Collective: every rank must call it with the same assignment.
    /// Rebalancing to the current assignment moves nothing.
    ///
    /// # Errors
    /// `Configuration`/`RankMismatch` if `next` is invalid or does not fit the
    /// decomposition or communicator (nothing has moved yet); `TransportFailure` if a patch fails to arrive. After a
    /// transport failure the engine is not usable.
    pub fn on_rebalance(&mut self, next: RankAssignment) -> Result<RebalanceReport, HaloError> {
        if next.len() != self.decomposition.n_patches() {
            return Err(HaloError::Configuration(format!(
                "assignment covers {} patches, decomposition has {}",
                next.len(),
                self.decomposition.n_patches()
            )));
        }
        if next.n_ranks() != self.comm.size() {
            return Err(HaloError::RankMismatch {
                expected: self.comm.size(),
                got: next.n_ranks(),
            });
        }
        // Deserialized or hand-built assignments are checked before any patch leaves.
        next.validate_invariants()?;

        let me = self.rank();
        let moves: Vec<_> = self.assignment.moves_to(&next).collect();
        let mut report = RebalanceReport::default();
        let mut peers = BTreeSet::new();
        let mut outgoing: BTreeMap<usize, Vec<u8>> = BTreeMap::new();
        for &(id, old, new) in &moves {
            if old == me {
                let mut patch = self.patches.remove(&id).ok_or(HaloError::UnknownPatch(id))?;
                encode_patch_as(&mut patch, id, outgoing.entry(new).or_default());
                report.sent.push(id);
                peers.insert(new);
            } else if new == me {
                peers.insert(old);
            }
        }

        let (received, bytes_sent) = exchange_payloads(
            &self.comm,
            self.tags.rebalance_sizes,
            self.tags.rebalance_data,
            outgoing,
            &peers,
        )?;
        report.bytes_sent = bytes_sent;
        for (peer, bytes) in received {
            report.bytes_received += bytes.len();
            for patch in self.decode_patches(peer, &bytes, &next, &self.decomposition)? {
                report.received.push(patch.id());
                self.patches.insert(patch.id(), patch);
            }
        }
        if let Some(&(id, old, _)) = moves
            .iter()
            .find(|&&(id, _, new)| new == me && !self.patches.contains_key(&id))
        {
            return Err(HaloError::TransportFailure {
                peer: old,
                patch: Some(id),
                direction: None,
                field: None,
                reason: "patch did not arrive during rebalance".into(),
            });
        }

        self.assignment = next;
        self.relink()?;
        self.comm.barrier()?;
        log::info!(
            "rank {me}: rebalanced, sent {} and received {} patches; now owns {}",
            report.sent.len(),
            report.received.len(),
            self.patches.len()
        );
        Ok(report)
    }

    /// Rebuild the patches in one rebalance or window message. Every patch
    /// must be assigned here by `next`; regions come from `decomposition`.
    pub(super) fn decode_patches(
        &self,
        peer: usize,
        bytes: &[u8],
        next: &RankAssignment,
        decomposition: &Decomposition,
    ) -> Result<Vec<Patch>, HaloError> {
        let me = self.rank();
        let fail = |reason: String| HaloError::transport(peer, reason);
        let field_lens: Vec<usize> = FieldId::ALL.iter().map(|&f| self.plan.layout(f).len()).collect();
        let total_values: usize = field_lens.iter().sum();

        let mut patches = Vec::new();
        let mut cursor = 0;
        while cursor < bytes.len() {
            let header = decode_records::<WirePatchHeader>(&bytes[cursor..], 1).map_err(fail)?[0];
            cursor += size_of::<WirePatchHeader>();
            let id = header.patch();
            if next.owner(id) != Some(me) {
                return Err(fail(format!("received patch {id} which is not assigned here")));
            }
            if header.n_fields() != FieldId::ALL.len() || header.n_values() != total_values {
                return Err(fail(format!(
                    "patch {id}: {} fields / {} values, expected {} / {total_values}",
                    header.n_fields(),
                    header.n_values(),
                    FieldId::ALL.len()
                )));
            }
            let value_bytes = total_values * size_of::<f64>();
            let raw = bytes
                .get(cursor..cursor + value_bytes)
                .ok_or_else(|| fail(format!("patch {id}: field data truncated")))?;
            let values = decode_f64s(raw).map_err(fail)?;
            cursor += value_bytes;

            let mut fields = Vec::with_capacity(field_lens.len());
            let mut start = 0;
            for &len in &field_lens {
                fields.push(values[start..start + len].to_vec());
                start += len;
            }

            let n = header.n_particles();
            let particles = decode_records::<WireParticle>(&bytes[cursor..], n)
                .map_err(fail)?
                .iter()
                .map(WireParticle::particle)
                .collect();
            cursor += n * size_of::<WireParticle>();

            let mut patch = Patch::new(id, decomposition, Arc::clone(&self.plan), me)?;
            patch.install_contents(fields, particles)?;
            patches.push(patch);
        }
        Ok(patches)
    }
}

/// Drain `patch` into `out`, labelled as patch `id` on the receiving side.
pub(super) fn encode_patch_as(patch: &mut Patch, id: PatchId, out: &mut Vec<u8>) {
    let (fields, particles) = patch.take_contents();
    let n_values = fields.iter().map(|f| f.as_slice().len()).sum();
    let header = WirePatchHeader::new(id, fields.len(), n_values, particles.len());
    out.extend_from_slice(cast_slice(std::slice::from_ref(&header)));
    for f in &fields {
        encode_f64s(f.as_slice(), out);
    }
    let records: Vec<WireParticle> = particles.iter().map(|p| WireParticle::new(id, p)).collect();
    out.extend_from_slice(cast_slice(&records));
}

#[cfg(test)]
mod tests {
    use super::super::tests::grid_2d;
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::data::particle::Particle;
    use crate::topology::decomposition::PatchOrdering;
    use crate::topology::ownership::decompose;

    #[test]
    fn identical_assignment_moves_nothing() {
        let mapping = decompose(grid_2d(30, 1, false), 9, 1, PatchOrdering::Morton).unwrap();
        let mut e = ExchangeEngine::new(NoComm, mapping).unwrap();
        let id = e.local_patch_ids().next().unwrap();
        let (lo, _) = e.patch(id).unwrap().owned_bounds();
        {
            let p = e.patch_mut(id).unwrap();
            p.deposit(FieldId::Rho, [3, 3, 0], 2.5).unwrap();
            p.receive_particles([Particle::at([lo[0] + 0.5, lo[1] + 0.5, 0.0], 1)]);
        }
        let before: Vec<_> = e.local_patches().map(|p| (p.field(FieldId::Rho).clone(), p.particles().to_vec())).collect();

        let same = e.assignment().clone();
        let report = e.on_rebalance(same).unwrap();
        assert_eq!(report, RebalanceReport::default());
        let after: Vec<_> = e.local_patches().map(|p| (p.field(FieldId::Rho).clone(), p.particles().to_vec())).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn mismatched_assignment_is_rejected() {
        let mapping = decompose(grid_2d(30, 1, false), 9, 1, PatchOrdering::Lexicographic).unwrap();
        let mut e = ExchangeEngine::new(NoComm, mapping).unwrap();
        let short = RankAssignment::balanced(4, 1).unwrap();
        assert!(matches!(e.on_rebalance(short), Err(HaloError::Configuration(_))));
        let wide = RankAssignment::balanced(9, 2).unwrap();
        assert!(matches!(e.on_rebalance(wide), Err(HaloError::RankMismatch { .. })));
    }

    #[test]
    fn out_of_range_owner_is_an_error_not_a_panic() {
        let mapping = decompose(grid_2d(30, 1, false), 9, 1, PatchOrdering::Lexicographic).unwrap();
        let mut e = ExchangeEngine::new(NoComm, mapping).unwrap();
        let bad = RankAssignment::from_owners_unchecked(vec![0, 0, 0, 0, 0, 0, 0, 0, 5], 1);
        assert!(matches!(e.on_rebalance(bad), Err(HaloError::Configuration(_))));
        assert_eq!(e.local_patches().count(), 9);
    }

    #[test]
    fn patch_encoding_round_trips() {
        let mapping = decompose(grid_2d(30, 1, false), 9, 1, PatchOrdering::Lexicographic).unwrap();
        let mut e = ExchangeEngine::new(NoComm, mapping).unwrap();
        let id = PatchId::new(4);
        let mut patch = e.patches.remove(&id).unwrap();
        patch.deposit(FieldId::Bz, [1, 2, 0], -3.0).unwrap();
        patch.receive_particles([Particle::at([15.0, 15.0, 0.0], 77)]);
        let mut bytes = Vec::new();
        encode_patch_as(&mut patch, id, &mut bytes);
        let decoded = e.decode_patches(0, &bytes, &e.assignment, &e.decomposition).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].id(), id);
        assert_eq!(decoded[0].field(FieldId::Bz).get([1, 2, 0]), Some(-3.0));
        assert_eq!(decoded[0].particles()[0].id, 77);
        assert!(e.decode_patches(0, &bytes[..bytes.len() - 1], &e.assignment, &e.decomposition).is_err());
    }
}
