//! Collective building blocks on top of [`Communicator`]: personalised
//! all-to-all, all-gather, reductions and collective error agreement.
//!
//! Every collective is entered by **all** ranks. A rank with nothing to say
//! still takes part in the size exchange with a zero count, so mismatched
//! call counts (and the deadlocks that follow) cannot happen. Zero-length
//! payloads themselves are never put on the wire.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::distribute::Stage;
use crate::algs::wire::{WireLen, cast_slice, cast_slice_mut};
use crate::mesh_error::MeshError;

/// Stage 1: tell every peer how many bytes it will receive from us.
/// Returns `recv_sizes[peer]` (our own slot mirrors `sends[rank]`).
pub fn exchange_sizes<C>(comm: &C, tag: CommTag, sends: &[Vec<u8>]) -> Result<Vec<usize>, MeshError>
where
    C: Communicator,
{
    let me = comm.rank();
    let size = comm.size();
    if sends.len() != size {
        return Err(MeshError::CommError {
            neighbor: me,
            detail: format!("exchange_sizes given {} buffers for {size} ranks", sends.len()),
        });
    }

    // 1) post all receives
    let mut pending_recvs = Vec::with_capacity(size.saturating_sub(1));
    for peer in (0..size).filter(|&p| p != me) {
        let mut len = WireLen::new(0);
        let h = comm.irecv(peer, tag.as_u16(), cast_slice_mut(std::slice::from_mut(&mut len)));
        pending_recvs.push((peer, h));
    }

    // 2) post all sends, including zero counts
    let mut pending_sends = Vec::with_capacity(size.saturating_sub(1));
    for peer in (0..size).filter(|&p| p != me) {
        let len = WireLen::new(sends[peer].len());
        pending_sends.push(comm.isend(peer, tag.as_u16(), cast_slice(std::slice::from_ref(&len))));
    }

    // 3) wait for all receives without early return
    let mut sizes = vec![0usize; size];
    sizes[me] = sends[me].len();
    let mut maybe_err = None;
    for (peer, h) in pending_recvs {
        match h.wait() {
            Some(data) if data.len() == std::mem::size_of::<WireLen>() => {
                let mut len = WireLen::new(0);
                cast_slice_mut(std::slice::from_mut(&mut len)).copy_from_slice(&data);
                sizes[peer] = len.get();
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(MeshError::CommError {
                    neighbor: peer,
                    detail: format!(
                        "expected {} bytes for size header, got {}",
                        std::mem::size_of::<WireLen>(),
                        data.len()
                    ),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(MeshError::CommError {
                    neighbor: peer,
                    detail: format!("failed to receive size from rank {peer}"),
                });
            }
            _ => {}
        }
    }

    // 4) always drain all send handles before returning
    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(sizes),
    }
}

/// Personalised all-to-all: `sends[peer]` goes to `peer`, the result holds
/// what every peer sent to us (our own slot is moved, not copied).
pub fn all_to_allv<C>(comm: &C, tag: CommTag, mut sends: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, MeshError>
where
    C: Communicator,
{
    let me = comm.rank();
    let size = comm.size();
    if sends.len() != size {
        return Err(MeshError::CommError {
            neighbor: me,
            detail: format!("all_to_allv given {} buffers for {size} ranks", sends.len()),
        });
    }

    let sizes = exchange_sizes(comm, tag, &sends)?;
    let data_tag = tag.offset(1).as_u16();

    let mut pending_recvs = Vec::new();
    for peer in (0..size).filter(|&p| p != me && sizes[p] > 0) {
        let mut buffer = vec![0u8; sizes[peer]];
        let h = comm.irecv(peer, data_tag, &mut buffer);
        pending_recvs.push((peer, h));
    }

    let mut pending_sends = Vec::new();
    for peer in (0..size).filter(|&p| p != me && !sends[p].is_empty()) {
        pending_sends.push(comm.isend(peer, data_tag, &sends[peer]));
    }

    let mut received: Vec<Vec<u8>> = vec![Vec::new(); size];
    received[me] = std::mem::take(&mut sends[me]);
    let mut maybe_err = None;
    for (peer, h) in pending_recvs {
        match h.wait() {
            Some(data) if data.len() == sizes[peer] => received[peer] = data,
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(MeshError::CommError {
                    neighbor: peer,
                    detail: format!("expected {} payload bytes, got {}", sizes[peer], data.len()),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(MeshError::CommError {
                    neighbor: peer,
                    detail: format!("failed to receive payload from rank {peer}"),
                });
            }
            _ => {}
        }
    }
    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(received),
    }
}

/// Every rank contributes `bytes`; everyone receives all contributions in rank order.
pub fn all_gather<C>(comm: &C, tag: CommTag, bytes: &[u8]) -> Result<Vec<Vec<u8>>, MeshError>
where
    C: Communicator,
{
    let sends = vec![bytes.to_vec(); comm.size()];
    all_to_allv(comm, tag, sends)
}

/// Gather one `u64` from every rank.
pub fn all_gather_u64<C>(comm: &C, tag: CommTag, value: u64) -> Result<Vec<u64>, MeshError>
where
    C: Communicator,
{
    let gathered = all_gather(comm, tag, &value.to_le_bytes())?;
    gathered
        .into_iter()
        .enumerate()
        .map(|(rank, bytes)| {
            let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| MeshError::CommError {
                neighbor: rank,
                detail: format!("expected 8 bytes in all_gather_u64, got {}", bytes.len()),
            })?;
            Ok(u64::from_le_bytes(raw))
        })
        .collect()
}

pub fn all_reduce_max<C: Communicator>(comm: &C, tag: CommTag, value: u64) -> Result<u64, MeshError> {
    Ok(all_gather_u64(comm, tag, value)?.into_iter().max().unwrap_or(value))
}

pub fn all_reduce_sum<C: Communicator>(comm: &C, tag: CommTag, value: u64) -> Result<u64, MeshError> {
    Ok(all_gather_u64(comm, tag, value)?.into_iter().sum())
}

pub fn all_reduce_or<C: Communicator>(comm: &C, tag: CommTag, flag: bool) -> Result<bool, MeshError> {
    Ok(all_reduce_max(comm, tag, u64::from(flag))? != 0)
}

/// Collective error agreement: every rank learns whether any rank failed.
///
/// A local failure is returned unchanged; if this rank succeeded but a peer
/// did not, [`MeshError::PeerFailure`] names the failing ranks. Either way the
/// stage aborts on all ranks together.
pub fn agree<C, T>(comm: &C, tag: CommTag, stage: Stage, local: Result<T, MeshError>) -> Result<T, MeshError>
where
    C: Communicator,
{
    let flags = all_gather_u64(comm, tag, u64::from(local.is_err()))?;
    let failed: Vec<usize> = flags
        .iter()
        .enumerate()
        .filter_map(|(rank, &f)| (f != 0).then_some(rank))
        .collect();
    match local {
        Err(e) => Err(e),
        Ok(_) if !failed.is_empty() => Err(MeshError::PeerFailure {
            stage,
            ranks: failed,
        }),
        Ok(v) => Ok(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, RayonComm};

    #[test]
    fn serial_all_to_allv_moves_own_slot() {
        let out = all_to_allv(&NoComm, CommTag::new(0x10), vec![vec![1, 2, 3]]).unwrap();
        assert_eq!(out, vec![vec![1, 2, 3]]);
    }

    #[test]
    fn wrong_buffer_count_errors() {
        let res = all_to_allv(&NoComm, CommTag::new(0x10), vec![vec![], vec![]]);
        assert!(matches!(res, Err(MeshError::CommError { .. })));
    }

    #[test]
    fn three_rank_all_to_allv_with_empty_messages() {
        let world = RayonComm::world(3);
        let results: Vec<Vec<Vec<u8>>> = std::thread::scope(|s| {
            let handles: Vec<_> = world
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        let me = comm.rank() as u8;
                        // rank r sends [r, peer] to peers with peer > r only
                        let sends = (0..3u8)
                            .map(|p| if p > me { vec![me, p] } else { Vec::new() })
                            .collect();
                        all_to_allv(comm, CommTag::new(0x20), sends).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results[0], vec![Vec::<u8>::new(), vec![], vec![]]);
        assert_eq!(results[1], vec![vec![0, 1], vec![], vec![]]);
        assert_eq!(results[2], vec![vec![0, 2], vec![1, 2], vec![]]);
    }

    #[test]
    fn agree_reports_peer_failure() {
        let world = RayonComm::world(2);
        let results: Vec<Result<u8, MeshError>> = std::thread::scope(|s| {
            let handles: Vec<_> = world
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        let local = if comm.rank() == 1 {
                            Err(MeshError::Wire("bad".into()))
                        } else {
                            Ok(7)
                        };
                        agree(comm, CommTag::new(0x30), Stage::Transferred, local)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(
            results[0],
            Err(MeshError::PeerFailure {
                stage: Stage::Transferred,
                ranks: vec![1]
            })
        );
        assert_eq!(results[1], Err(MeshError::Wire("bad".into())));
    }

    #[test]
    fn reductions_over_two_ranks() {
        let world = RayonComm::world(2);
        let sums: Vec<(u64, u64)> = std::thread::scope(|s| {
            let handles: Vec<_> = world
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        let v = comm.rank() as u64 + 5;
                        (
                            all_reduce_sum(comm, CommTag::new(0x40), v).unwrap(),
                            all_reduce_max(comm, CommTag::new(0x42), v).unwrap(),
                        )
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(sums, vec![(11, 6), (11, 6)]);
    }
}
