mod util;

use fvmesh_distribute::algs::communicator::{CommTag, Communicator, NoComm, Wait};
use fvmesh_distribute::algs::distribute::Stage;
use fvmesh_distribute::algs::exchange::{agree, all_gather, all_reduce_max, all_reduce_sum, all_to_allv};
use fvmesh_distribute::algs::wire::{WireLen, cast_slice};
use fvmesh_distribute::mesh_error::MeshError;
use serial_test::serial;
use util::{rayons, run_ranks};

#[test]
#[serial]
fn rayon_round_trip() {
    let tag = CommTag::new(0x1000);
    let (c0, c1) = rayons();

    let msg = b"hello";
    c0.isend(1, tag.as_u16(), msg);

    let mut buf = [0u8; 5];
    let got = c1.irecv(0, tag.as_u16(), &mut buf).wait().unwrap();
    assert_eq!(&got, msg);
}

#[test]
#[serial]
fn rayon_fifo_order() {
    let tag = CommTag::new(0x1001);
    let (c0, c1) = rayons();

    for i in 0..10u8 {
        c0.isend(1, tag.as_u16(), &[i]);
    }
    let out: Vec<u8> = (0..10)
        .map(|_| {
            let mut b = [0u8; 1];
            c1.irecv(0, tag.as_u16(), &mut b).wait().unwrap()[0]
        })
        .collect();
    assert_eq!(out, (0u8..10u8).collect::<Vec<_>>());
}

#[test]
#[serial]
fn longer_message_is_not_cut_to_the_buffer() {
    let tag = CommTag::new(0x1002);
    let (c0, c1) = rayons();

    c0.isend(1, tag.as_u16(), &[1, 2, 3, 4, 5, 6]);
    let mut b = [0u8; 4];
    let got = c1.irecv(0, tag.as_u16(), &mut b).wait().unwrap();
    assert_eq!(got, vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn serial_collectives_are_local() {
    let got = all_to_allv(&NoComm, CommTag::new(0x1100), vec![b"self".to_vec()]).unwrap();
    assert_eq!(got, vec![b"self".to_vec()]);
    assert_eq!(all_reduce_sum(&NoComm, CommTag::new(0x1104), 7).unwrap(), 7);
}

#[test]
fn payload_longer_than_announced_is_a_comm_error() {
    let tag = CommTag::new(0x1500);
    let out = run_ranks(2, |comm| {
        if comm.rank() == 0 {
            Some(all_to_allv(comm, tag, vec![Vec::new(), Vec::new()]))
        } else {
            // announce two bytes, then send four
            comm.isend(0, tag.as_u16(), cast_slice(&[WireLen::new(2)]));
            comm.isend(0, tag.offset(1).as_u16(), &[1, 2, 3, 4]);
            None
        }
    });
    assert!(matches!(
        out[0],
        Some(Err(MeshError::CommError { neighbor: 1, .. }))
    ));
}

#[test]
fn all_to_allv_delivers_by_source() {
    let out = run_ranks(3, |comm| {
        let me = comm.rank();
        // rank r sends r + 1 copies of byte `10 * r + to` to every rank `to`, none to itself
        let sends = (0..3)
            .map(|to| if to == me { Vec::new() } else { vec![(10 * me + to) as u8; me + 1] })
            .collect();
        all_to_allv(comm, CommTag::new(0x1200), sends).unwrap()
    });
    for (me, received) in out.iter().enumerate() {
        for (from, bytes) in received.iter().enumerate() {
            if from == me {
                assert!(bytes.is_empty());
            } else {
                assert_eq!(bytes, &vec![(10 * from + me) as u8; from + 1]);
            }
        }
    }
}

#[test]
fn reductions_agree_everywhere() {
    let out = run_ranks(4, |comm| {
        let me = comm.rank() as u64;
        let gathered = all_gather(comm, CommTag::new(0x1300), &[me as u8]).unwrap();
        let sum = all_reduce_sum(comm, CommTag::new(0x1304), me).unwrap();
        let max = all_reduce_max(comm, CommTag::new(0x1308), me * me).unwrap();
        (gathered, sum, max)
    });
    for (gathered, sum, max) in out {
        assert_eq!(gathered, vec![vec![0], vec![1], vec![2], vec![3]]);
        assert_eq!(sum, 6);
        assert_eq!(max, 9);
    }
}

#[test]
fn agree_names_the_failing_ranks() {
    let out = run_ranks(3, |comm| {
        let local = if comm.rank() == 2 {
            Err(MeshError::Wire("bad record".into()))
        } else {
            Ok(comm.rank())
        };
        agree(comm, CommTag::new(0x1400), Stage::Transferred, local)
    });
    for r in &out[..2] {
        assert_eq!(
            r,
            &Err(MeshError::PeerFailure {
                stage: Stage::Transferred,
                ranks: vec![2]
            })
        );
    }
    assert_eq!(out[2], Err(MeshError::Wire("bad record".into())));
}
