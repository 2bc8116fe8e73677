//! Posted point-to-point transfers and the two-phase sizes-then-data pattern.
//!
//! Every helper here posts all receives first, then all sends, then waits on
//! every receive. Errors never cut the wait short: each send and receive
//! handle is drained before the first error is returned, so no message of a
//! failed phase can leak into the next one.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{WireCount, cast_slice, expect_exact_len};
use crate::halo_error::HaloError;
use std::collections::{BTreeMap, BTreeSet};
use std::mem::size_of;

/// Receives and sends of one phase, in flight.
pub(crate) struct PostedTransfer<C: Communicator> {
    recvs: Vec<(usize, usize, C::RecvHandle)>,
    sends: Vec<C::SendHandle>,
    bytes_sent: usize,
}

impl<C: Communicator> PostedTransfer<C> {
    /// Post one receive per entry of `incoming` (peer → expected bytes) and
    /// one send per entry of `outgoing`.
    pub(crate) fn post(
        comm: &C,
        tag: CommTag,
        outgoing: &BTreeMap<usize, Vec<u8>>,
        incoming: &BTreeMap<usize, usize>,
    ) -> Self {
        let recvs = incoming
            .iter()
            .map(|(&peer, &len)| (peer, len, comm.irecv(peer, tag.as_u16(), len)))
            .collect();
        let mut bytes_sent = 0;
        let sends = outgoing
            .iter()
            .map(|(&peer, buf)| {
                bytes_sent += buf.len();
                comm.isend(peer, tag.as_u16(), buf)
            })
            .collect();
        Self {
            recvs,
            sends,
            bytes_sent,
        }
    }

    pub(crate) fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }

    /// Wait for everything; received payloads keyed by peer.
    pub(crate) fn complete(self) -> Result<BTreeMap<usize, Vec<u8>>, HaloError> {
        let mut received = BTreeMap::new();
        let mut maybe_err = None;
        for (peer, len, h) in self.recvs {
            match h.wait() {
                Some(data) => match expect_exact_len(data.len(), len) {
                    Ok(()) => {
                        received.insert(peer, data);
                    }
                    Err(reason) if maybe_err.is_none() => {
                        maybe_err = Some(HaloError::transport(peer, reason));
                    }
                    Err(_) => {}
                },
                None if maybe_err.is_none() => {
                    maybe_err = Some(HaloError::transport(
                        peer,
                        format!("no message from rank {peer}"),
                    ));
                }
                None => {} // already have an error; just drain
            }
        }
        for send in self.sends {
            let _ = send.wait();
        }
        match maybe_err {
            Some(err) => Err(err),
            None => Ok(received),
        }
    }
}

/// Post a count exchange: `send_to` maps peers to the count we announce,
/// `recv_from` lists peers whose count we expect.
pub(crate) fn post_counts<C: Communicator>(
    comm: &C,
    tag: CommTag,
    send_to: &BTreeMap<usize, usize>,
    recv_from: &BTreeSet<usize>,
) -> PostedTransfer<C> {
    let outgoing = send_to
        .iter()
        .map(|(&peer, &n)| {
            let count = WireCount::new(n);
            (peer, cast_slice(std::slice::from_ref(&count)).to_vec())
        })
        .collect();
    let incoming = recv_from
        .iter()
        .map(|&peer| (peer, size_of::<WireCount>()))
        .collect();
    PostedTransfer::post(comm, tag, &outgoing, &incoming)
}

/// Complete a count exchange posted with [`post_counts`].
pub(crate) fn complete_counts<C: Communicator>(
    posted: PostedTransfer<C>,
) -> Result<BTreeMap<usize, usize>, HaloError> {
    Ok(posted
        .complete()?
        .into_iter()
        .map(|(peer, data)| {
            let count: WireCount = bytemuck::pod_read_unaligned(&data);
            (peer, count.get())
        })
        .collect())
}

/// Two-phase exchange of variable-size payloads.
///
/// Phase one announces byte lengths to every peer in `send_to ∪ recv_from`
/// as agreed by both sides; phase two moves the data, skipping empty
/// payloads on both ends.
pub(crate) fn exchange_payloads<C: Communicator>(
    comm: &C,
    sizes_tag: CommTag,
    data_tag: CommTag,
    outgoing: BTreeMap<usize, Vec<u8>>,
    peers: &BTreeSet<usize>,
) -> Result<(BTreeMap<usize, Vec<u8>>, usize), HaloError> {
    let announce = peers
        .iter()
        .map(|&p| (p, outgoing.get(&p).map_or(0, Vec::len)))
        .collect();
    let sizes = complete_counts(post_counts(comm, sizes_tag, &announce, peers))?;
    complete_payloads(comm, data_tag, outgoing, &sizes)
}

/// Phase two of [`exchange_payloads`] once incoming sizes are known.
pub(crate) fn complete_payloads<C: Communicator>(
    comm: &C,
    data_tag: CommTag,
    mut outgoing: BTreeMap<usize, Vec<u8>>,
    sizes: &BTreeMap<usize, usize>,
) -> Result<(BTreeMap<usize, Vec<u8>>, usize), HaloError> {
    outgoing.retain(|_, buf| !buf.is_empty());
    let incoming: BTreeMap<usize, usize> = sizes
        .iter()
        .filter(|&(_, &n)| n > 0)
        .map(|(&p, &n)| (p, n))
        .collect();
    let posted = PostedTransfer::post(comm, data_tag, &outgoing, &incoming);
    let sent = posted.bytes_sent();
    Ok((posted.complete()?, sent))
}
