#![allow(dead_code)]
use fvmesh_distribute::{
    algs::communicator::RayonComm,
    algs::distribute::MeshContext,
    algs::meshgen::{Decomposed, decompose},
    data::field::Field,
    data::field_store::FieldStore,
    data::value::Dimensions,
    topology::mesh::PolyMesh,
};

/// Run `f` once per rank of a fresh `n`-rank world, one thread each, and
/// collect the results in rank order.
pub fn run_ranks<R, F>(n: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(&RayonComm) -> R + Sync,
{
    let world = RayonComm::world(n);
    let f = &f;
    std::thread::scope(|s| {
        let handles: Vec<_> = world.iter().map(|comm| s.spawn(move || f(comm))).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// Split `global` by `cell_rank` into per-rank meshes.
pub fn split(global: &PolyMesh, cell_rank: &[usize], n_ranks: usize) -> Vec<Decomposed> {
    decompose(global, cell_rank, n_ranks).unwrap()
}

/// x coordinate of every cell centre.
pub fn centre_x(mesh: &PolyMesh) -> Vec<f64> {
    mesh.cell_centres().iter().map(|c| c[0]).collect()
}

/// Context carrying a volume field `T = x` of the cell centres.
pub fn with_x_field(mesh: PolyMesh) -> MeshContext {
    let mut fields = FieldStore::new();
    fields.insert(Field::volume("T", Dimensions::DIMLESS, &mesh, centre_x(&mesh)).unwrap(), true);
    MeshContext::new(mesh).with_fields(fields)
}

/// Two-rank Rayon comms (ranks 0 and 1) on the shared mailbox.
pub fn rayons() -> (RayonComm, RayonComm) {
    (RayonComm::new(0, 2), RayonComm::new(1, 2))
}

pub fn assert_close(got: f64, want: f64) {
    assert!((got - want).abs() < 1e-9, "got {got}, want {want}");
}

/// Number of processor faces of `mesh`.
pub fn n_processor_faces(mesh: &PolyMesh) -> usize {
    mesh.patches().iter().filter(|p| p.is_processor()).map(|p| p.size).sum()
}

