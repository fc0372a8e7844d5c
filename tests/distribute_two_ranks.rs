mod util;

use fvmesh_distribute::algs::communicator::{CommTag, Communicator};
use fvmesh_distribute::algs::distribute::{DistributeConfig, Distributor, MeshContext, Stage};
use fvmesh_distribute::algs::meshgen::{chain_mesh, cyclic_block_mesh};
use fvmesh_distribute::data::cloud::{Attribute, Cloud};
use fvmesh_distribute::data::field::Field;
use fvmesh_distribute::data::value::Dimensions;
use fvmesh_distribute::mesh_error::MeshError;
use fvmesh_distribute::topology::mesh::PolyMesh;
use fvmesh_distribute::topology::patch::PatchKind;
use fvmesh_distribute::topology::zones::Zone;
use util::{assert_close, centre_x, n_processor_faces, run_ranks, split, with_x_field};

fn sorted(mut v: Vec<f64>) -> Vec<f64> {
    v.sort_by(f64::total_cmp);
    v
}

fn parcels_on(ctx: &MeshContext) -> Cloud {
    let positions: Vec<_> = centre_x(&ctx.mesh).iter().map(|&x| [x, 0.5, 0.5]).collect();
    let d = positions.iter().map(|p| p[0]).collect();
    Cloud::locate("parcels", positions, &ctx.mesh)
        .unwrap()
        .with_attribute("d", Attribute::Scalar(d))
        .unwrap()
}

#[test]
fn half_a_chain_moves_to_an_empty_rank() {
    let global = chain_mesh(10, 10.0).unwrap();
    let parts = split(&global, &[0; 10], 2);

    let out = run_ranks(2, |comm| {
        let me = comm.rank();
        let mut ctx = with_x_field(parts[me].mesh.clone());
        if me == 0 {
            let cloud = parcels_on(&ctx);
            ctx = ctx.with_clouds(vec![cloud]);
        }
        let old = ctx.mesh.clone();
        let u_old = Field::volume("U", Dimensions::VELOCITY, &old, centre_x(&old).iter().map(|x| 2.0 * x).collect())
            .unwrap();
        let dest = if me == 0 { vec![0, 0, 0, 0, 0, 1, 1, 1, 1, 1] } else { Vec::new() };
        let map = Distributor::new(comm, DistributeConfig::default())
            .distribute(&mut ctx, &dest)
            .unwrap();
        let u_new = map
            .distribute_field(comm, CommTag::new(0x7000), &ctx.mesh, &u_old)
            .unwrap();
        (ctx, map, u_new)
    });

    let expected = [vec![0.5, 1.5, 2.5, 3.5, 4.5], vec![5.5, 6.5, 7.5, 8.5, 9.5]];
    let across = [5.5, 4.5];
    for (rank, (ctx, map, u)) in out.iter().enumerate() {
        ctx.mesh.check().unwrap();
        assert_eq!(ctx.mesh.n_cells(), 5);
        assert_eq!(n_processor_faces(&ctx.mesh), 1);
        let centres = centre_x(&ctx.mesh);
        for (got, want) in sorted(centres.clone()).iter().zip(&expected[rank]) {
            assert_close(*got, *want);
        }

        // volume values travel with their cells
        let t = ctx.fields.get::<f64>("T").unwrap();
        for (c, &x) in centres.iter().enumerate() {
            assert_close(t.values()[c], x);
            assert_close(u.values()[c], 2.0 * x);
        }
        // the processor face sees the cell on the other rank
        let proc = ctx.mesh.patches().iter().position(|p| p.is_processor()).unwrap();
        assert_close(t.boundary()[proc].values[0], across[rank]);
        assert_close(u.boundary()[proc].values[0], 2.0 * across[rank]);

        // particles follow their cells and keep their attributes
        assert_eq!(ctx.clouds.len(), 1);
        let cloud = &ctx.clouds[0];
        assert_eq!(cloud.len(), 5);
        let Some(Attribute::Scalar(d)) = cloud.attribute("d") else {
            panic!("attribute `d` lost on rank {rank}");
        };
        for (i, p) in cloud.positions().iter().enumerate() {
            assert_close(centres[cloud.cells()[i]], p[0]);
            assert_close(d[i], p[0]);
        }
        assert_eq!(map.rank(), rank);
    }

    // old cell 7 of rank 0 went to rank 1
    let (_, map0, _) = &out[0];
    assert_eq!(map0.old_cell_targets.len(), 10);
    assert_eq!(map0.old_cell_targets[7].0, 1);
    assert!(map0.old_cell_targets[..5].iter().all(|&(r, _)| r == 0));
    // the cut face lives on both ranks afterwards
    let cut = 4;
    let ranks: Vec<usize> = map0.old_face_targets[cut].iter().map(|&(r, _)| r).collect();
    assert_eq!(ranks, vec![0, 1]);
}

/// Zones on a piece of a unit chain: global cells 1 and 4, the faces on the
/// planes x = 2, 3, 4 oriented along +x, and the points of the x = 3 plane.
fn mark_zones(mesh: &mut PolyMesh, cell_ids: &[usize]) {
    let cells = (0..cell_ids.len()).filter(|&c| matches!(cell_ids[c], 1 | 4)).collect();
    let mut faces = Vec::new();
    let mut flips = Vec::new();
    for f in 0..mesh.n_faces() {
        let x = mesh.face_centre(f)[0];
        let n = mesh.face_area_vector(f)[0];
        if n.abs() > 0.5 && [2.0, 3.0, 4.0].iter().any(|v| (x - v).abs() < 1e-9) {
            faces.push(f);
            flips.push(n < 0.0);
        }
    }
    let points = (0..mesh.n_points())
        .filter(|&p| (mesh.points()[p][0] - 3.0).abs() < 1e-9)
        .collect();
    let zones = mesh.zones_mut();
    zones.cell_zones.push(Zone::new("marked", cells));
    zones.face_zones.push(Zone::with_flips("planes", faces, flips));
    zones.point_zones.push(Zone::new("mid", points));
}

#[test]
fn zones_follow_their_cells_onto_one_rank() {
    let global = chain_mesh(6, 6.0).unwrap();
    let parts = split(&global, &[0, 0, 0, 1, 1, 1], 2);

    let out = run_ranks(2, |comm| {
        let me = comm.rank();
        let mut mesh = parts[me].mesh.clone();
        mark_zones(&mut mesh, &parts[me].cell_ids);
        mesh.check().unwrap();
        let mut ctx = with_x_field(mesh);
        Distributor::new(comm, DistributeConfig::default())
            .distribute(&mut ctx, &[0, 0, 0])
            .unwrap();
        ctx
    });

    assert_eq!(out[1].mesh.n_cells(), 0);
    let mesh = &out[0].mesh;
    mesh.check().unwrap();
    let zones = mesh.zones();

    let centres = centre_x(mesh);
    let marked = sorted(zones.cell_zones[0].indices.iter().map(|&c| centres[c]).collect());
    assert_eq!(marked.len(), 2);
    assert_close(marked[0], 1.5);
    assert_close(marked[1], 4.5);

    // the x = 3 face arrived twice and was merged into one entry
    let planes = &zones.face_zones[0];
    assert_eq!(planes.len(), 3);
    let xs = sorted(planes.indices.iter().map(|&f| mesh.face_centre(f)[0]).collect());
    for (x, want) in xs.into_iter().zip([2.0, 3.0, 4.0]) {
        assert_close(x, want);
    }
    for (k, &f) in planes.indices.iter().enumerate() {
        let n = mesh.face_area_vector(f)[0];
        let along = if planes.flip(k) { -n } else { n };
        assert!(along > 0.0, "face {f} lost its zone orientation");
    }

    let mid = &zones.point_zones[0];
    assert_eq!(mid.len(), 4);
    assert!(mid.indices.iter().all(|&p| (mesh.points()[p][0] - 3.0).abs() < 1e-9));
}

#[test]
fn merging_both_halves_removes_the_processor_patch() {
    let global = chain_mesh(10, 10.0).unwrap();
    let parts = split(&global, &[0, 0, 0, 0, 0, 1, 1, 1, 1, 1], 2);

    let out = run_ranks(2, |comm| {
        let me = comm.rank();
        let mut ctx = with_x_field(parts[me].mesh.clone());
        let cloud = parcels_on(&ctx);
        ctx = ctx.with_clouds(vec![cloud]);
        Distributor::new(comm, DistributeConfig::default())
            .distribute(&mut ctx, &[0; 5])
            .unwrap();
        ctx
    });

    let (ctx, empty) = (&out[0], &out[1]);
    ctx.mesh.check().unwrap();
    ctx.mesh.check_closed().unwrap();
    assert_eq!(ctx.mesh.n_cells(), 10);
    assert_eq!(ctx.mesh.n_internal_faces(), 9);
    assert_eq!(n_processor_faces(&ctx.mesh), 0);
    assert_eq!(ctx.mesh.patches().len(), global.patches().len());
    for (p, q) in ctx.mesh.patches().iter().zip(global.patches()) {
        assert_eq!((p.name.as_str(), p.size), (q.name.as_str(), q.size));
    }
    assert_eq!(ctx.mesh.n_points(), global.n_points());
    assert_eq!(ctx.n_particles(), 10);
    let t = ctx.fields.get::<f64>("T").unwrap();
    for (c, x) in centre_x(&ctx.mesh).into_iter().enumerate() {
        assert_close(t.values()[c], x);
    }

    assert_eq!(empty.mesh.n_cells(), 0);
    assert_eq!(empty.n_particles(), 0);
    assert_eq!(empty.mesh.patches().len(), global.patches().len());
}

#[test]
fn cyclic_pairs_split_into_processor_cyclic_patches() {
    let global = cyclic_block_mesh([4, 1, 1], [4.0, 1.0, 1.0]).unwrap();
    let parts = split(&global, &[0; 4], 2);

    let out = run_ranks(2, |comm| {
        let me = comm.rank();
        let mut ctx = with_x_field(parts[me].mesh.clone());
        let dest = if me == 0 { vec![0, 0, 1, 1] } else { Vec::new() };
        Distributor::new(comm, DistributeConfig::default())
            .distribute(&mut ctx, &dest)
            .unwrap();
        ctx
    });

    // the far end of the periodic pair sits on the other rank
    let across = [3.5, 0.5];
    for (rank, ctx) in out.iter().enumerate() {
        ctx.mesh.check().unwrap();
        assert_eq!(ctx.mesh.n_cells(), 2);
        assert_eq!(n_processor_faces(&ctx.mesh), 2);
        assert_eq!(ctx.mesh.patches()[0].size + ctx.mesh.patches()[1].size, 0);

        let through: Vec<usize> = ctx
            .mesh
            .patches()
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                matches!(
                    p.kind,
                    PatchKind::Processor {
                        referred_patch: Some(_),
                        ..
                    }
                )
            })
            .map(|(i, _)| i)
            .collect();
        assert_eq!(through.len(), 1, "rank {rank}: {:?}", ctx.mesh.patches());
        let patch = &ctx.mesh.patches()[through[0]];
        assert_eq!(patch.kind.type_name(), "processorCyclic");
        assert_eq!(patch.neighb_proc(), Some(1 - rank));

        let t = ctx.fields.get::<f64>("T").unwrap();
        assert_close(t.boundary()[through[0]].values[0], across[rank]);
    }
}

#[test]
fn failure_on_one_rank_aborts_every_rank() {
    let global = chain_mesh(10, 10.0).unwrap();
    let parts = split(&global, &[0, 0, 0, 0, 0, 1, 1, 1, 1, 1], 2);

    let out = run_ranks(2, |comm| {
        let me = comm.rank();
        let mut ctx = with_x_field(parts[me].mesh.clone());
        let before = ctx.clone();
        let dest = if me == 0 { vec![0, 0, 0, 1, 1] } else { vec![1, 1, 1, 1, 7] };
        let err = Distributor::new(comm, DistributeConfig::default())
            .distribute(&mut ctx, &dest)
            .unwrap_err();
        (err, ctx == before)
    });

    for (rank, (err, untouched)) in out.iter().enumerate() {
        assert_eq!(err.stage(), Some(Stage::Classified), "rank {rank}: {err}");
        assert!(untouched, "rank {rank} changed its context");
    }
    let MeshError::Stage { source, .. } = &out[0].0 else {
        panic!("rank 0 error is not staged: {}", out[0].0);
    };
    assert_eq!(
        **source,
        MeshError::PeerFailure {
            stage: Stage::Classified,
            ranks: vec![1]
        }
    );
}

#[test]
fn point_sync_cap_is_enforced() {
    let global = chain_mesh(10, 10.0).unwrap();
    let parts = split(&global, &[0, 0, 0, 0, 0, 1, 1, 1, 1, 1], 2);
    let config = DistributeConfig {
        max_point_sync_iterations: Some(1),
        ..DistributeConfig::default()
    };

    let out = run_ranks(2, |comm| {
        let me = comm.rank();
        let mut ctx = with_x_field(parts[me].mesh.clone());
        let before = ctx.clone();
        let dest = if me == 0 { vec![0, 0, 0, 0, 1] } else { vec![1; 5] };
        let err = Distributor::new(comm, config.clone())
            .distribute(&mut ctx, &dest)
            .unwrap_err();
        (err, ctx == before)
    });

    for (err, untouched) in &out {
        assert_eq!(err.stage(), Some(Stage::Resolved), "{err}");
        assert!(untouched);
    }
    // rank 1 holds the higher keys, so it is the one still changing
    let MeshError::Stage { source, .. } = &out[1].0 else {
        panic!("rank 1 error is not staged: {}", out[1].0);
    };
    assert!(
        matches!(**source, MeshError::PointMasterNotConverged { iterations: 1, rank: 1, ref ranks, .. } if ranks == &[0]),
        "{source}"
    );
}

#[test]
fn round_trip_restores_the_cell_layout() {
    let global = chain_mesh(6, 6.0).unwrap();
    let parts = split(&global, &[0, 0, 0, 1, 1, 1], 2);

    let out = run_ranks(2, |comm| {
        let me = comm.rank();
        let mut ctx = with_x_field(parts[me].mesh.clone());
        let distributor = Distributor::new(comm, DistributeConfig::default());
        // swap the two middle cells, then swap back
        let there = if me == 0 { vec![0, 0, 1] } else { vec![0, 1, 1] };
        let map = distributor.distribute(&mut ctx, &there).unwrap();
        let back: Vec<usize> = centre_x(&ctx.mesh).iter().map(|&x| usize::from(x > 3.0)).collect();
        distributor.distribute(&mut ctx, &back).unwrap();
        (ctx, map)
    });

    for (rank, (ctx, map)) in out.iter().enumerate() {
        ctx.mesh.check().unwrap();
        assert_eq!(ctx.mesh.n_cells(), 3);
        assert_eq!(n_processor_faces(&ctx.mesh), 1);
        let centres = sorted(centre_x(&ctx.mesh));
        let want: Vec<f64> = (0..3).map(|i| (3 * rank + i) as f64 + 0.5).collect();
        for (got, want) in centres.iter().zip(&want) {
            assert_close(*got, *want);
        }
        let t = ctx.fields.get::<f64>("T").unwrap();
        for (c, x) in centre_x(&ctx.mesh).into_iter().enumerate() {
            assert_close(t.values()[c], x);
        }
        assert!(!map.is_identity());
    }
}
