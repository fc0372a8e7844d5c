//! Thin façade over intra-process (mailbox) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable** but non-blocking: [`exchange`](crate::algs::exchange)
//! calls `.wait()` before it trusts that a buffer is ready.

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

/// Non-blocking communication interface (minimal by design).
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive sized for `buf`. The handle yields the whole message
    /// even when it is longer or shorter than `buf`; callers compare.
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// Rank of this process in the communicator.
    fn rank(&self) -> usize;
    /// Number of ranks in the communicator.
    fn size(&self) -> usize;

    /// Block until every rank reached the barrier. Default: no-op.
    fn barrier(&self) {}
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

/// Typed message tag. Each collective stage draws its own tag so that
/// concurrent epochs never collide.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Derive a sub-tag; wraps on overflow.
    pub const fn offset(self, by: u16) -> Self {
        Self(self.0.wrapping_add(by))
    }
}

/// Compile-time no-op comm for pure serial runs: a world of one rank.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
}

// --- RayonComm: intra-process ranks, one thread per rank ---
type Key = (usize, usize, u16); // (src, dst, tag)
type Mailbox = DashMap<Key, VecDeque<Bytes>>;

static GLOBAL_MAILBOX: Lazy<Arc<Mailbox>> = Lazy::new(|| Arc::new(DashMap::new()));

/// Reusable generation barrier shared by the ranks of one [`RayonComm::world`].
#[derive(Debug)]
struct WorldBarrier {
    n: usize,
    state: Mutex<(usize, u64)>, // (arrived, generation)
    cvar: Condvar,
}

impl WorldBarrier {
    fn new(n: usize) -> Self {
        Self {
            n,
            state: Mutex::new((0, 0)),
            cvar: Condvar::new(),
        }
    }

    fn wait(&self) {
        let mut guard = self.state.lock();
        let generation = guard.1;
        guard.0 += 1;
        if guard.0 == self.n {
            guard.0 = 0;
            guard.1 = guard.1.wrapping_add(1);
            self.cvar.notify_all();
        } else {
            while guard.1 == generation {
                self.cvar.wait(&mut guard);
            }
        }
    }
}

/// Receive handle polling the shared mailbox.
pub struct MailboxHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
}

impl Wait for MailboxHandle {
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            if let Some(mut queue) = self.mailbox.get_mut(&self.key) {
                if let Some(bytes) = queue.pop_front() {
                    return Some(bytes.to_vec());
                }
            }
            std::thread::yield_now();
        }
    }
}

/// In-process communicator: every rank is a thread, messages go through a
/// mailbox keyed by `(src, dst, tag)` and are delivered FIFO per key.
#[derive(Clone, Debug)]
pub struct RayonComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
    barrier: Option<Arc<WorldBarrier>>,
}

impl RayonComm {
    /// A rank attached to the process-wide mailbox.
    pub fn new(rank: usize, size: usize) -> Self {
        Self {
            rank,
            size,
            mailbox: Arc::clone(&GLOBAL_MAILBOX),
            barrier: None,
        }
    }

    /// All ranks of a fresh, isolated world of `size` ranks. Hand one to each thread.
    pub fn world(size: usize) -> Vec<Self> {
        let mailbox: Arc<Mailbox> = Arc::new(DashMap::new());
        let barrier = Arc::new(WorldBarrier::new(size));
        (0..size)
            .map(|rank| Self {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
                barrier: Some(Arc::clone(&barrier)),
            })
            .collect()
    }
}

impl Communicator for RayonComm {
    type SendHandle = ();
    type RecvHandle = MailboxHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.rank, peer, tag);
        self.mailbox
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> Self::RecvHandle {
        MailboxHandle {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        if let Some(barrier) = &self.barrier {
            barrier.wait();
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use crate::mesh_error::MeshError;
    use mpi::environment::Universe;
    use mpi::point_to_point::{Destination, Source};
    use mpi::request::{Request, StaticScope};
    use mpi::Threading;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::{Communicator as MpiCommunicator, CommunicatorCollectives};

    /// MPI world communicator. Receives match the pending message first,
    /// so message lengths never need to be known up front.
    pub struct MpiComm {
        world: Arc<SimpleCommunicator>,
        rank: usize,
        size: usize,
        _universe: Arc<Universe>,
    }

    // SAFETY: `new` only succeeds under MPI_THREAD_MULTIPLE, where MPI may be
    // called concurrently from any thread.
    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl MpiComm {
        pub fn new() -> Result<Self, MeshError> {
            let (universe, provided) =
                mpi::initialize_with_threading(Threading::Multiple).ok_or_else(|| MeshError::CommError {
                    neighbor: 0,
                    detail: "MPI was already initialised".into(),
                })?;
            if provided != Threading::Multiple {
                return Err(MeshError::CommError {
                    neighbor: 0,
                    detail: format!("MPI provides {provided:?}, thread-multiple support is required"),
                });
            }
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                world: Arc::new(world),
                rank,
                size,
                _universe: Arc::new(universe),
            })
        }
    }

    pub struct MpiSendHandle {
        request: Request<'static, [u8], StaticScope>,
        buf: *mut [u8],
    }

    impl Wait for MpiSendHandle {
        fn wait(self) -> Option<Vec<u8>> {
            self.request.wait();
            // SAFETY: `buf` came from `Box::leak` in `isend` and the request that
            // borrowed it has completed.
            unsafe { drop(Box::from_raw(self.buf)) };
            None
        }
    }

    pub struct MpiRecvHandle {
        world: Arc<SimpleCommunicator>,
        peer: i32,
        tag: i32,
    }

    impl Wait for MpiRecvHandle {
        fn wait(self) -> Option<Vec<u8>> {
            let (msg, _status) = self
                .world
                .process_at_rank(self.peer)
                .matched_probe_with_tag(self.tag);
            let (data, _status) = msg.matched_receive_vec::<u8>();
            Some(data)
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            let leaked: &'static mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let ptr: *mut [u8] = leaked;
            // SAFETY: the leaked slice lives until `MpiSendHandle::wait` reclaims it.
            let data: &'static [u8] = unsafe { &*ptr };
            let request = self.world.process_at_rank(peer as i32).immediate_send_with_tag(
                StaticScope,
                data,
                i32::from(tag),
            );
            MpiSendHandle { request, buf: ptr }
        }

        fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> MpiRecvHandle {
            MpiRecvHandle {
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

        fn barrier(&self) {
            self.world.barrier();
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_roundtrip_two_ranks() {
        let world = RayonComm::world(2);
        let mut recv_buf = [0u8; 4];

        let recv_handle = world[1].irecv(0, 7, &mut recv_buf);
        let send_handle = world[0].isend(1, 7, &[1, 2, 3, 4]);
        send_handle.wait();

        let data = recv_handle
            .wait()
            .expect("Expected to receive data from rank 0");
        recv_buf.copy_from_slice(&data);
        assert_eq!(&recv_buf, &[1, 2, 3, 4]);
    }

    #[test]
    fn worlds_are_isolated() {
        let a = RayonComm::world(2);
        let b = RayonComm::world(2);
        a[0].isend(1, 3, &[9]);
        b[0].isend(1, 3, &[5]);
        let mut buf = [0u8; 1];
        assert_eq!(b[1].irecv(0, 3, &mut buf).wait(), Some(vec![5]));
        assert_eq!(a[1].irecv(0, 3, &mut buf).wait(), Some(vec![9]));
    }

    #[test]
    fn oversized_message_arrives_whole() {
        let world = RayonComm::world(2);
        world[0].isend(1, 4, &[1, 2, 3, 4, 5, 6]);
        let mut buf = [0u8; 4];
        assert_eq!(world[1].irecv(0, 4, &mut buf).wait(), Some(vec![1, 2, 3, 4, 5, 6]));
    }

    #[test]
    fn barrier_releases_all_ranks() {
        let world = RayonComm::world(3);
        std::thread::scope(|s| {
            for comm in &world {
                s.spawn(move || {
                    comm.barrier();
                    comm.barrier();
                });
            }
        });
    }

    #[test]
    fn nocomm_is_single_rank() {
        let c = NoComm;
        assert_eq!((c.rank(), c.size()), (0, 1));
        assert!(c.irecv(0, 1, &mut []).wait().is_none());
    }

    #[test]
    fn tag_offset_wraps() {
        assert_eq!(CommTag::new(u16::MAX).offset(1).as_u16(), 0);
    }
}
