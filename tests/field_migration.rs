mod util;

use fvmesh_distribute::algs::communicator::{CommTag, Communicator, NoComm};
use fvmesh_distribute::algs::distribute::{
    DistributeConfig, Distributor, MeshContext, MissingFieldPolicy, RedistributionMap,
};
use fvmesh_distribute::algs::meshgen::{block_mesh, chain_mesh};
use fvmesh_distribute::data::cloud::Cloud;
use fvmesh_distribute::data::field::{Field, FieldLocation};
use fvmesh_distribute::data::field_store::FieldStore;
use fvmesh_distribute::data::value::{Dimensions, Vector};
use fvmesh_distribute::topology::mesh::PolyMesh;
use util::{assert_close, run_ranks, split};

/// Uniform flow along x: cell velocities, face fluxes and point coordinates
/// that can be recomputed from any mesh.
fn flow_fields(mesh: &PolyMesh, with_k: bool) -> FieldStore {
    let mut store = FieldStore::new();
    let u: Vec<Vector> = mesh.cell_centres().iter().map(|c| [1.0, c[0], 0.0]).collect();
    store.insert(Field::volume("U", Dimensions::VELOCITY, mesh, u).unwrap(), true);
    let phi = (0..mesh.n_faces()).map(|f| mesh.face_area_vector(f)[0]).collect();
    store.insert(Field::surface("phi", Dimensions::FLUX, mesh, phi, true).unwrap(), true);
    let px = mesh.points().iter().map(|p| p[0]).collect();
    store.insert(Field::point("px", Dimensions::DIMLESS, mesh, px).unwrap(), true);
    if with_k {
        let k = vec![0.1; mesh.n_cells()];
        store.insert(Field::volume("k", Dimensions::DIMLESS, mesh, k).unwrap(), false);
    }
    store
}

fn assert_flow(mesh: &PolyMesh, store: &FieldStore) {
    let u = store.get::<Vector>("U").unwrap();
    for (c, centre) in mesh.cell_centres().iter().enumerate() {
        assert_close(u.values()[c][0], 1.0);
        assert_close(u.values()[c][1], centre[0]);
    }
    let phi = store.get::<f64>("phi").unwrap();
    assert!(phi.is_oriented());
    for f in 0..mesh.n_faces() {
        assert_close(phi.values()[f], mesh.face_area_vector(f)[0]);
    }
    let px = store.get::<f64>("px").unwrap();
    for (p, x) in mesh.points().iter().enumerate() {
        assert_close(px.values()[p], x[0]);
    }
}

#[test]
fn every_location_follows_the_mesh() {
    let global = chain_mesh(8, 8.0).unwrap();
    let parts = split(&global, &[0, 0, 0, 0, 1, 1, 1, 1], 2);

    let out = run_ranks(2, |comm| {
        let me = comm.rank();
        let mesh = parts[me].mesh.clone();
        let fields = flow_fields(&mesh, false);
        let mut ctx = MeshContext::new(mesh).with_fields(fields);
        // interleave: even global cells on rank 0, odd on rank 1
        let dest: Vec<usize> = parts[me].cell_ids.iter().map(|g| g % 2).collect();
        Distributor::new(comm, DistributeConfig::default())
            .distribute(&mut ctx, &dest)
            .unwrap();
        ctx
    });

    for ctx in &out {
        ctx.mesh.check().unwrap();
        assert_eq!(ctx.mesh.n_cells(), 4);
        assert_eq!(ctx.fields.len(), 3);
        assert_flow(&ctx.mesh, &ctx.fields);
    }
}

#[test]
fn optional_field_missing_somewhere_is_dropped_everywhere() {
    let global = chain_mesh(4, 4.0).unwrap();
    let parts = split(&global, &[0, 0, 1, 1], 2);
    let config = DistributeConfig {
        missing_field_policy: MissingFieldPolicy::SkipWithWarning,
        ..DistributeConfig::default()
    };

    let out = run_ranks(2, |comm| {
        let me = comm.rank();
        let mesh = parts[me].mesh.clone();
        let fields = flow_fields(&mesh, me == 0);
        let mut ctx = MeshContext::new(mesh).with_fields(fields);
        Distributor::new(comm, config.clone())
            .distribute(&mut ctx, &[1 - me, 1 - me])
            .unwrap();
        ctx
    });

    for ctx in &out {
        assert!(ctx.fields.get_any("k").is_none());
        assert_eq!(ctx.fields.len(), 3);
        assert_flow(&ctx.mesh, &ctx.fields);
    }
}

#[test]
fn optional_field_is_dropped_even_when_nothing_moves() {
    let global = chain_mesh(4, 4.0).unwrap();
    let parts = split(&global, &[0, 0, 1, 1], 2);
    let config = DistributeConfig {
        missing_field_policy: MissingFieldPolicy::SkipWithWarning,
        ..DistributeConfig::default()
    };

    let out = run_ranks(2, |comm| {
        let me = comm.rank();
        let mesh = parts[me].mesh.clone();
        let fields = flow_fields(&mesh, me == 1);
        let mut ctx = MeshContext::new(mesh).with_fields(fields);
        let map = Distributor::new(comm, config.clone())
            .distribute(&mut ctx, &[me, me])
            .unwrap();
        (ctx, map)
    });

    for (rank, (ctx, map)) in out.iter().enumerate() {
        assert!(map.is_identity());
        assert_eq!(ctx.mesh, parts[rank].mesh);
        assert!(ctx.fields.get_any("k").is_none());
        assert_eq!(ctx.fields.len(), 3);
        assert_flow(&ctx.mesh, &ctx.fields);
    }
}

#[test]
fn map_moves_plain_arrays_and_clouds() {
    let global = chain_mesh(6, 6.0).unwrap();
    let parts = split(&global, &[0; 6], 2);

    let out = run_ranks(2, |comm| {
        let me = comm.rank();
        let old = parts[me].mesh.clone();
        let mut ctx = MeshContext::new(old.clone());
        let dest = if me == 0 { vec![0, 0, 0, 1, 1, 1] } else { Vec::new() };
        let map = Distributor::new(comm, DistributeConfig::default())
            .distribute(&mut ctx, &dest)
            .unwrap();

        let ids: Vec<i64> = parts[me].cell_ids.iter().map(|&g| g as i64).collect();
        let moved_ids = map
            .distribute_values(comm, CommTag::new(0x6000), FieldLocation::Volume, &ids, false)
            .unwrap();
        let positions = if me == 0 { vec![[0.5, 0.5, 0.5], [4.5, 0.5, 0.5]] } else { Vec::new() };
        let cloud = Cloud::locate("tracers", positions, &old).unwrap();
        let moved = map
            .distribute_lagrangian(comm, CommTag::new(0x6100), &ctx.mesh, &cloud)
            .unwrap();
        (ctx, moved_ids, moved)
    });

    for (rank, (ctx, ids, cloud)) in out.iter().enumerate() {
        assert_eq!(ids.len(), ctx.mesh.n_cells());
        for (c, centre) in ctx.mesh.cell_centres().iter().enumerate() {
            assert_close(ids[c] as f64 + 0.5, centre[0]);
        }
        assert_eq!(cloud.len(), 1, "rank {rank}");
        let p = cloud.positions()[0];
        let c = cloud.cells()[0];
        assert!(ctx.mesh.point_in_cell(p, c, &ctx.mesh.cells()[c]));
    }
}

#[test]
fn serial_identity_keeps_every_field() {
    let mesh = block_mesh([2, 2, 2], [1.0, 1.0, 1.0]).unwrap();
    let fields = flow_fields(&mesh, true);
    let mut ctx = MeshContext::new(mesh.clone()).with_fields(fields);
    let before = ctx.clone();
    let map = Distributor::new(&NoComm, DistributeConfig::default())
        .distribute(&mut ctx, &[0; 8])
        .unwrap();
    assert_eq!(ctx, before);
    assert_eq!(map, RedistributionMap::identity(&mesh, 0, 1));

    let u = ctx.fields.get::<Vector>("U").unwrap();
    let again = map
        .distribute_field(&NoComm, CommTag::new(0x6200), &ctx.mesh, u)
        .unwrap();
    assert_eq!(&again, u);
    let phi = ctx.fields.get::<f64>("phi").unwrap();
    let values = map
        .distribute_values(&NoComm, CommTag::new(0x6300), FieldLocation::Surface, phi.values(), true)
        .unwrap();
    assert_eq!(values, phi.values());
}
