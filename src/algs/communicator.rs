//! Thin façade over in-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are contiguous byte slices. All handles are waitable but posting is
//! non-blocking; the exchange engine calls `.wait()` before it trusts a buffer.

use crate::halo_error::HaloError;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Typed message tag. Each exchange phase uses its own tag so that messages of
/// different phases between the same pair of ranks never mix.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommTag(u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        CommTag(tag)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Tag `k` steps after this one (wrapping).
    pub const fn offset(self, k: u16) -> Self {
        CommTag(self.0.wrapping_add(k))
    }
}

/// Tags of the exchange engine's phases, derived from one base tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExchangeTags {
    pub sum: CommTag,
    pub copy: CommTag,
    pub migration_sizes: CommTag,
    pub migration_data: CommTag,
    /// Tracked particle ids, exchanged when delivery checks are enabled.
    pub migration_check_sizes: CommTag,
    pub migration_check_data: CommTag,
    pub rebalance_sizes: CommTag,
    pub rebalance_data: CommTag,
    pub window_sizes: CommTag,
    pub window_data: CommTag,
}

impl ExchangeTags {
    /// Phases at `base + 0x000`, `+0x100`, `+0x200..=0x203`, `+0x300`/`+0x301`
    /// and `+0x400`/`+0x401`.
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            sum: base,
            copy: base.offset(0x100),
            migration_sizes: base.offset(0x200),
            migration_data: base.offset(0x201),
            migration_check_sizes: base.offset(0x202),
            migration_check_data: base.offset(0x203),
            rebalance_sizes: base.offset(0x300),
            rebalance_data: base.offset(0x301),
            window_sizes: base.offset(0x400),
            window_data: base.offset(0x401),
        }
    }
}

impl Default for ExchangeTags {
    fn default() -> Self {
        Self::from_base(CommTag::new(0x5100))
    }
}

/// Non-blocking point-to-point communication between ranks.
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Post a send of `buf` to `peer`. The data is copied or retained by the
    /// transport; `buf` may be reused immediately.
    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;

    /// Post a receive of one message from `peer`. `len` is the expected size;
    /// transports deliver whatever arrived and callers check the length.
    fn irecv(&self, peer: usize, tag: u16, len: usize) -> Self::RecvHandle;

    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Block until every rank reaches the barrier.
    fn barrier(&self) -> Result<(), HaloError>;
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    ///
    /// `None` from a receive handle means the message can never arrive.
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Single-rank communicator. Every remote receive fails.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}

    fn irecv(&self, _peer: usize, _tag: u16, _len: usize) {}

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) -> Result<(), HaloError> {
        Ok(())
    }
}

// --- ThreadComm: in-process ranks on separate threads ---

type Key = (usize, usize, u16); // (src, dst, tag)

#[derive(Debug)]
struct BarrierState {
    arrived: usize,
    generation: u64,
}

#[derive(Debug)]
struct Shared {
    size: usize,
    mailbox: DashMap<Key, VecDeque<Bytes>>,
    alive: Vec<AtomicBool>,
    barrier: Mutex<BarrierState>,
    cv: Condvar,
    /// Bumped after every send and rank exit; receivers sleep on `mail_cv`.
    mail: Mutex<u64>,
    mail_cv: Condvar,
}

impl Shared {
    fn notify_mail(&self) {
        let mut posted = self.mail.lock();
        *posted = posted.wrapping_add(1);
        self.mail_cv.notify_all();
    }

    fn pop(&self, key: &Key) -> Option<Bytes> {
        self.mailbox.get_mut(key).and_then(|mut q| q.pop_front())
    }

    fn first_dead(&self) -> Option<usize> {
        self.alive.iter().position(|a| !a.load(Ordering::Acquire))
    }
}

/// One rank of an in-process group.
///
/// Ranks share a mailbox keyed by `(src, dst, tag)`; messages with the same
/// key are delivered in send order. Dropping a `ThreadComm` marks its rank
/// dead, which turns pending receives from it (and barriers) into failures.
#[derive(Debug)]
pub struct ThreadComm {
    rank: usize,
    shared: Arc<Shared>,
}

impl ThreadComm {
    /// Create `n` connected ranks; move each to its own thread.
    pub fn group(n: usize) -> Vec<ThreadComm> {
        let shared = Arc::new(Shared {
            size: n,
            mailbox: DashMap::new(),
            alive: (0..n).map(|_| AtomicBool::new(true)).collect(),
            barrier: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
            }),
            cv: Condvar::new(),
            mail: Mutex::new(0),
            mail_cv: Condvar::new(),
        });
        (0..n)
            .map(|rank| ThreadComm {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

impl Drop for ThreadComm {
    fn drop(&mut self) {
        self.shared.alive[self.rank].store(false, Ordering::Release);
        {
            let _guard = self.shared.barrier.lock();
            self.shared.cv.notify_all();
        }
        self.shared.notify_mail();
    }
}

pub struct ThreadRecv {
    shared: Arc<Shared>,
    key: Key,
}

impl Wait for ThreadRecv {
    fn wait(self) -> Option<Vec<u8>> {
        let peer = self.key.0;
        let alive = self.shared.alive.get(peer)?;
        // Senders push before taking `mail`, so checking under the lock
        // cannot miss a wake-up.
        let mut posted = self.shared.mail.lock();
        loop {
            if let Some(bytes) = self.shared.pop(&self.key) {
                return Some(bytes.to_vec());
            }
            if !alive.load(Ordering::Acquire) {
                // The peer may have sent right before leaving.
                return self.shared.pop(&self.key).map(|b| b.to_vec());
            }
            self.shared.mail_cv.wait(&mut posted);
        }
    }
}

impl Communicator for ThreadComm {
    type SendHandle = ();
    type RecvHandle = ThreadRecv;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        self.shared
            .mailbox
            .entry((self.rank, peer, tag))
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
        self.shared.notify_mail();
    }

    fn irecv(&self, peer: usize, tag: u16, _len: usize) -> ThreadRecv {
        ThreadRecv {
            shared: Arc::clone(&self.shared),
            key: (peer, self.rank, tag),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self) -> Result<(), HaloError> {
        let shared = &self.shared;
        let mut state = shared.barrier.lock();
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == shared.size {
            state.arrived = 0;
            state.generation += 1;
            shared.cv.notify_all();
            return Ok(());
        }
        while state.generation == generation {
            shared.cv.wait_for(&mut state, Duration::from_millis(10));
            if state.generation != generation {
                break;
            }
            if let Some(dead) = shared.first_dead() {
                state.arrived -= 1;
                return Err(HaloError::transport(dead, "rank left before reaching the barrier"));
            }
        }
        Ok(())
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::environment::Universe;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// MPI world communicator. Owns the MPI environment: dropping it finalizes MPI.
    pub struct MpiComm {
        world: Arc<SimpleCommunicator>,
        rank: usize,
        size: usize,
        _universe: Universe,
    }

    // The world communicator handle is only used from the owning thread; the
    // bounds let the engine stay generic over `Communicator`.
    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl MpiComm {
        /// Initialize MPI and wrap the world communicator.
        pub fn new() -> Result<Self, HaloError> {
            let universe = mpi::initialize()
                .ok_or_else(|| HaloError::Configuration("MPI is already initialized".into()))?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                world: Arc::new(world),
                rank,
                size,
                _universe: universe,
            })
        }
    }

    /// Pending send; owns the leaked buffer until completion.
    pub struct MpiSend {
        request: Request<'static, [u8], StaticScope>,
        buf: *mut [u8],
    }

    impl Wait for MpiSend {
        fn wait(self) -> Option<Vec<u8>> {
            self.request.wait();
            // SAFETY: `buf` came from `Box::leak` in `isend` and the request
            // referencing it has completed.
            drop(unsafe { Box::from_raw(self.buf) });
            None
        }
    }

    /// Deferred receive: matched when waited on.
    pub struct MpiRecv {
        world: Arc<SimpleCommunicator>,
        peer: i32,
        tag: i32,
    }

    impl Wait for MpiRecv {
        fn wait(self) -> Option<Vec<u8>> {
            let (data, _status) = self
                .world
                .process_at_rank(self.peer)
                .receive_vec_with_tag::<u8>(self.tag);
            Some(data)
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSend;
        type RecvHandle = MpiRecv;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSend {
            let leaked: &'static mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let ptr: *mut [u8] = leaked;
            // SAFETY: the buffer lives until `MpiSend::wait` reclaims it.
            let data: &'static [u8] = unsafe { &*ptr };
            let request = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, data, i32::from(tag));
            MpiSend { request, buf: ptr }
        }

        fn irecv(&self, peer: usize, tag: u16, _len: usize) -> MpiRecv {
            MpiRecv {
                world: Arc::clone(&self.world),
                peer: peer as i32,
                tag: i32::from(tag),
            }
        }

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn barrier(&self) -> Result<(), HaloError> {
            self.world.barrier();
            Ok(())
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_roundtrip_two_ranks() {
        let mut group = ThreadComm::group(2);
        let comm1 = group.pop().unwrap();
        let comm0 = group.pop().unwrap();

        let recv = comm1.irecv(0, 7, 4);
        comm0.isend(1, 7, &[1, 2, 3, 4]).wait();
        assert_eq!(recv.wait(), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn same_key_is_fifo() {
        let group = ThreadComm::group(2);
        group[0].isend(1, 3, &[1]);
        group[0].isend(1, 3, &[2]);
        assert_eq!(group[1].irecv(0, 3, 1).wait(), Some(vec![1]));
        assert_eq!(group[1].irecv(0, 3, 1).wait(), Some(vec![2]));
    }

    #[test]
    fn dead_peer_fails_receive() {
        let mut group = ThreadComm::group(2);
        let comm1 = group.pop().unwrap();
        let comm0 = group.pop().unwrap();
        comm0.isend(1, 1, &[9]);
        drop(comm0);
        // Sent before leaving: still delivered.
        assert_eq!(comm1.irecv(0, 1, 1).wait(), Some(vec![9]));
        assert_eq!(comm1.irecv(0, 1, 1).wait(), None);
        assert!(comm1.barrier().is_err());
    }

    #[test]
    fn receive_sleeps_until_the_message_is_posted() {
        let mut group = ThreadComm::group(2);
        let comm1 = group.pop().unwrap();
        let comm0 = group.pop().unwrap();
        let reader = std::thread::spawn(move || comm1.irecv(0, 5, 3).wait());
        std::thread::sleep(Duration::from_millis(20));
        comm0.isend(1, 5, &[7, 8, 9]);
        assert_eq!(reader.join().unwrap(), Some(vec![7, 8, 9]));
    }

    #[test]
    fn peer_exit_wakes_a_sleeping_receive() {
        let mut group = ThreadComm::group(2);
        let comm1 = group.pop().unwrap();
        let comm0 = group.pop().unwrap();
        let reader = std::thread::spawn(move || comm1.irecv(0, 5, 3).wait());
        std::thread::sleep(Duration::from_millis(20));
        drop(comm0);
        assert_eq!(reader.join().unwrap(), None);
    }

    #[test]
    fn barrier_releases_all_ranks() {
        let handles: Vec<_> = ThreadComm::group(3)
            .into_iter()
            .map(|c| {
                std::thread::spawn(move || {
                    for _ in 0..5 {
                        c.barrier().unwrap();
                    }
                    c.rank()
                })
            })
            .collect();
        let mut ranks: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ranks.sort();
        assert_eq!(ranks, vec![0, 1, 2]);
    }

    #[test]
    fn no_comm_is_single_rank() {
        let c = NoComm;
        assert_eq!((c.rank(), c.size()), (0, 1));
        assert_eq!(c.irecv(0, 0, 8).wait(), None);
        assert!(c.barrier().is_ok());
        assert_eq!(CommTag::new(0x5100).offset(1).as_u16(), 0x5101);
        let tags = ExchangeTags::default();
        assert_eq!(tags.copy.as_u16(), 0x5200);
        assert_eq!(tags.rebalance_data.as_u16(), 0x5401);
        assert_eq!(tags.window_data.as_u16(), 0x5501);
    }
}
