//! Accumulated topology edits against a reference mesh.
//!
//! A [`TopoChange`] records add/modify/remove actions for points, faces and
//! cells without touching the reference mesh. [`TopoChange::commit`] replays
//! the log, checks the result and returns the new mesh together with the
//! [`MapPolyMesh`] that translates indices between the two.
//!
//! Created entities are numbered in call order after the existing ones, so an
//! edit may refer to a point, face or cell created by an earlier edit.

use log::debug;

use crate::mesh_error::MeshError;
use crate::topology::map::MapPolyMesh;
use crate::topology::mesh::{Face, Point, PolyMesh};
use crate::topology::patch::{Patch, PatchKind};
use crate::topology::zones::{Zone, ZoneSet};

/// New definition of a face.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceEdit {
    pub points: Face,
    pub owner: usize,
    pub neighbour: Option<usize>,
    /// Patch of a boundary face; must be `None` for internal faces.
    pub patch: Option<usize>,
    /// The face is reversed relative to the face it replaces (fluxes change sign).
    pub flip_flux: bool,
    /// Face zone and flip flag. `None` keeps the current membership.
    pub zone: Option<(usize, bool)>,
}

impl FaceEdit {
    pub fn internal(points: Face, owner: usize, neighbour: usize) -> Self {
        Self {
            points,
            owner,
            neighbour: Some(neighbour),
            patch: None,
            flip_flux: false,
            zone: None,
        }
    }

    pub fn boundary(points: Face, owner: usize, patch: usize) -> Self {
        Self {
            points,
            owner,
            neighbour: None,
            patch: Some(patch),
            flip_flux: false,
            zone: None,
        }
    }

    pub fn flipped(mut self, flip_flux: bool) -> Self {
        self.flip_flux = flip_flux;
        self
    }

    pub fn in_zone(mut self, zone: usize, flip: bool) -> Self {
        self.zone = Some((zone, flip));
        self
    }
}

/// One recorded edit.
#[derive(Clone, Debug, PartialEq)]
pub enum TopoAction {
    AddPoint {
        coord: Point,
        master: Option<usize>,
        zone: Option<usize>,
        in_cell: bool,
    },
    ModifyPoint {
        point: usize,
        coord: Point,
        zone: Option<usize>,
        in_cell: bool,
    },
    RemovePoint {
        point: usize,
    },
    AddFace {
        face: FaceEdit,
        master: Option<usize>,
    },
    ModifyFace {
        face_id: usize,
        face: FaceEdit,
    },
    RemoveFace {
        face_id: usize,
    },
    AddCell {
        master: Option<usize>,
        zone: Option<usize>,
    },
    ModifyCell {
        cell: usize,
        zone: Option<usize>,
    },
    RemoveCell {
        cell: usize,
    },
    AddPatch {
        name: String,
        kind: PatchKind,
    },
}

/// Pending topology change against `mesh`.
pub struct TopoChange<'a> {
    mesh: &'a PolyMesh,
    actions: Vec<TopoAction>,
    n_points: usize,
    n_faces: usize,
    n_cells: usize,
    n_patches: usize,
}

impl<'a> TopoChange<'a> {
    pub fn new(mesh: &'a PolyMesh) -> Self {
        Self {
            mesh,
            actions: Vec::new(),
            n_points: mesh.n_points(),
            n_faces: mesh.n_faces(),
            n_cells: mesh.n_cells(),
            n_patches: mesh.patches().len(),
        }
    }

    pub fn mesh(&self) -> &'a PolyMesh {
        self.mesh
    }

    pub fn actions(&self) -> &[TopoAction] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Add a point; returns the index it will have before compaction.
    pub fn add_point(
        &mut self,
        coord: Point,
        master: Option<usize>,
        zone: Option<usize>,
        in_cell: bool,
    ) -> usize {
        self.actions.push(TopoAction::AddPoint {
            coord,
            master,
            zone,
            in_cell,
        });
        self.n_points += 1;
        self.n_points - 1
    }

    pub fn modify_point(&mut self, point: usize, coord: Point, zone: Option<usize>, in_cell: bool) {
        self.actions.push(TopoAction::ModifyPoint {
            point,
            coord,
            zone,
            in_cell,
        });
    }

    pub fn remove_point(&mut self, point: usize) {
        self.actions.push(TopoAction::RemovePoint { point });
    }

    pub fn add_face(&mut self, face: FaceEdit, master: Option<usize>) -> usize {
        self.actions.push(TopoAction::AddFace { face, master });
        self.n_faces += 1;
        self.n_faces - 1
    }

    pub fn modify_face(&mut self, face_id: usize, face: FaceEdit) {
        self.actions.push(TopoAction::ModifyFace { face_id, face });
    }

    pub fn remove_face(&mut self, face_id: usize) {
        self.actions.push(TopoAction::RemoveFace { face_id });
    }

    pub fn add_cell(&mut self, master: Option<usize>, zone: Option<usize>) -> usize {
        self.actions.push(TopoAction::AddCell { master, zone });
        self.n_cells += 1;
        self.n_cells - 1
    }

    pub fn modify_cell(&mut self, cell: usize, zone: Option<usize>) {
        self.actions.push(TopoAction::ModifyCell { cell, zone });
    }

    /// Remove a cell. Its faces are left alone: remove or repatch them too.
    pub fn remove_cell(&mut self, cell: usize) {
        self.actions.push(TopoAction::RemoveCell { cell });
    }

    /// Append a patch. Non-processor patches are placed ahead of the
    /// processor patches on commit; the returned index is the one edits use.
    pub fn add_patch(&mut self, name: impl Into<String>, kind: PatchKind) -> usize {
        self.actions.push(TopoAction::AddPatch {
            name: name.into(),
            kind,
        });
        self.n_patches += 1;
        self.n_patches - 1
    }

    /// Replay the log into a new mesh.
    pub fn commit(self) -> Result<(PolyMesh, MapPolyMesh), MeshError> {
        let mut state = Replay::new(self.mesh);
        for (i, action) in self.actions.iter().enumerate() {
            state.apply(i, action)?;
        }
        let out = state.finish()?;
        debug!(
            "topo change: {} actions, cells {} -> {}, faces {} -> {}, points {} -> {}",
            self.actions.len(),
            self.mesh.n_cells(),
            out.0.n_cells(),
            self.mesh.n_faces(),
            out.0.n_faces(),
            self.mesh.n_points(),
            out.0.n_points()
        );
        Ok(out)
    }
}

struct PointSlot {
    coord: Point,
    master: Option<usize>,
    in_cell: bool,
    zones: Vec<usize>,
    removed_by: Option<usize>,
}

struct FaceSlot {
    points: Face,
    owner: usize,
    neighbour: Option<usize>,
    patch: Option<usize>,
    master: Option<usize>,
    flip: bool,
    zones: Vec<(usize, bool)>,
    /// Last action that defined this face.
    action: Option<usize>,
    removed: bool,
}

struct CellSlot {
    master: Option<usize>,
    zones: Vec<usize>,
    removed: bool,
}

struct PatchSlot {
    name: String,
    kind: PatchKind,
}

struct Replay<'a> {
    mesh: &'a PolyMesh,
    points: Vec<PointSlot>,
    faces: Vec<FaceSlot>,
    cells: Vec<CellSlot>,
    patches: Vec<PatchSlot>,
}

fn edit_err(action: usize, detail: String) -> MeshError {
    MeshError::InvalidTopoEdit { action, detail }
}

impl<'a> Replay<'a> {
    fn new(mesh: &'a PolyMesh) -> Self {
        let mut points: Vec<PointSlot> = mesh
            .points()
            .iter()
            .map(|&coord| PointSlot {
                coord,
                master: None,
                in_cell: true,
                zones: Vec::new(),
                removed_by: None,
            })
            .collect();
        let patch_ids = mesh.boundary_patch_ids();
        let n_internal = mesh.n_internal_faces();
        let mut faces: Vec<FaceSlot> = (0..mesh.n_faces())
            .map(|f| FaceSlot {
                points: mesh.faces()[f].clone(),
                owner: mesh.owner()[f],
                neighbour: mesh.face_neighbour(f),
                patch: (f >= n_internal).then(|| patch_ids[f - n_internal]),
                master: None,
                flip: false,
                zones: Vec::new(),
                action: None,
                removed: false,
            })
            .collect();
        let mut cells: Vec<CellSlot> = (0..mesh.n_cells())
            .map(|_| CellSlot {
                master: None,
                zones: Vec::new(),
                removed: false,
            })
            .collect();

        let zones = mesh.zones();
        for (zi, zone) in zones.cell_zones.iter().enumerate() {
            for &c in &zone.indices {
                cells[c].zones.push(zi);
            }
        }
        for (zi, zone) in zones.face_zones.iter().enumerate() {
            for (k, &f) in zone.indices.iter().enumerate() {
                faces[f].zones.push((zi, zone.flip(k)));
            }
        }
        for (zi, zone) in zones.point_zones.iter().enumerate() {
            for &p in &zone.indices {
                points[p].zones.push(zi);
            }
        }

        let patches = mesh
            .patches()
            .iter()
            .map(|p| PatchSlot {
                name: p.name.clone(),
                kind: p.kind.clone(),
            })
            .collect();

        Self {
            mesh,
            points,
            faces,
            cells,
            patches,
        }
    }

    fn live_point(&self, action: usize, p: usize) -> Result<(), MeshError> {
        match self.points.get(p) {
            Some(slot) if slot.removed_by.is_none() => Ok(()),
            Some(_) => Err(edit_err(action, format!("point {p} was already removed"))),
            None => Err(edit_err(
                action,
                format!("point {p} does not exist ({} points)", self.points.len()),
            )),
        }
    }

    fn live_face(&self, action: usize, f: usize) -> Result<(), MeshError> {
        match self.faces.get(f) {
            Some(slot) if !slot.removed => Ok(()),
            Some(_) => Err(edit_err(action, format!("face {f} was already removed"))),
            None => Err(edit_err(
                action,
                format!("face {f} does not exist ({} faces)", self.faces.len()),
            )),
        }
    }

    fn live_cell(&self, action: usize, c: usize) -> Result<(), MeshError> {
        match self.cells.get(c) {
            Some(slot) if !slot.removed => Ok(()),
            Some(_) => Err(edit_err(action, format!("cell {c} was already removed"))),
            None => Err(edit_err(
                action,
                format!("cell {c} does not exist ({} cells)", self.cells.len()),
            )),
        }
    }

    fn check_zone(&self, action: usize, zone: Option<usize>, n_zones: usize, what: &str) -> Result<(), MeshError> {
        match zone {
            Some(z) if z >= n_zones => Err(edit_err(
                action,
                format!("{what} zone {z} does not exist ({n_zones} zones)"),
            )),
            _ => Ok(()),
        }
    }

    fn check_face_edit(&self, action: usize, face: &FaceEdit) -> Result<(), MeshError> {
        if face.points.len() < 3 {
            return Err(edit_err(
                action,
                format!("face has {} points (at least 3 required)", face.points.len()),
            ));
        }
        for &p in &face.points {
            self.live_point(action, p)?;
        }
        self.live_cell(action, face.owner)?;
        match (face.neighbour, face.patch) {
            (Some(n), None) => {
                self.live_cell(action, n)?;
                if n == face.owner {
                    return Err(edit_err(action, format!("face owner and neighbour are both cell {n}")));
                }
            }
            (None, Some(p)) if p >= self.patches.len() => {
                return Err(edit_err(
                    action,
                    format!("patch {p} does not exist ({} patches)", self.patches.len()),
                ));
            }
            (None, Some(_)) => {}
            (Some(_), Some(_)) => {
                return Err(edit_err(action, "internal face given a patch".into()));
            }
            (None, None) => {
                return Err(edit_err(action, "boundary face without a patch".into()));
            }
        }
        self.check_zone(
            action,
            face.zone.map(|z| z.0),
            self.mesh.zones().face_zones.len(),
            "face",
        )
    }

    fn apply(&mut self, i: usize, action: &TopoAction) -> Result<(), MeshError> {
        let n_cell_zones = self.mesh.zones().cell_zones.len();
        let n_point_zones = self.mesh.zones().point_zones.len();
        match action {
            TopoAction::AddPoint {
                coord,
                master,
                zone,
                in_cell,
            } => {
                if let Some(m) = *master {
                    if m >= self.mesh.n_points() {
                        return Err(edit_err(i, format!("master point {m} is not an old point")));
                    }
                }
                self.check_zone(i, *zone, n_point_zones, "point")?;
                self.points.push(PointSlot {
                    coord: *coord,
                    master: *master,
                    in_cell: *in_cell,
                    zones: zone.iter().copied().collect(),
                    removed_by: None,
                });
            }
            TopoAction::ModifyPoint {
                point,
                coord,
                zone,
                in_cell,
            } => {
                self.live_point(i, *point)?;
                self.check_zone(i, *zone, n_point_zones, "point")?;
                let slot = &mut self.points[*point];
                slot.coord = *coord;
                slot.in_cell = *in_cell;
                if let Some(z) = *zone {
                    if !slot.zones.contains(&z) {
                        slot.zones.push(z);
                    }
                }
            }
            TopoAction::RemovePoint { point } => {
                self.live_point(i, *point)?;
                self.points[*point].removed_by = Some(i);
            }
            TopoAction::AddFace { face, master } => {
                self.check_face_edit(i, face)?;
                if let Some(m) = *master {
                    if m >= self.mesh.n_faces() {
                        return Err(edit_err(i, format!("master face {m} is not an old face")));
                    }
                }
                self.faces.push(FaceSlot {
                    points: face.points.clone(),
                    owner: face.owner,
                    neighbour: face.neighbour,
                    patch: face.patch,
                    master: *master,
                    flip: face.flip_flux,
                    zones: face.zone.iter().copied().collect(),
                    action: Some(i),
                    removed: false,
                });
            }
            TopoAction::ModifyFace { face_id, face } => {
                self.live_face(i, *face_id)?;
                self.check_face_edit(i, face)?;
                let slot = &mut self.faces[*face_id];
                slot.points = face.points.clone();
                slot.owner = face.owner;
                slot.neighbour = face.neighbour;
                slot.patch = face.patch;
                slot.flip = face.flip_flux;
                slot.action = Some(i);
                match face.zone {
                    Some((z, flip)) => match slot.zones.iter_mut().find(|e| e.0 == z) {
                        Some(entry) => entry.1 = flip,
                        None => slot.zones.push((z, flip)),
                    },
                    // a reversed face keeps its zone orientation by toggling the flag
                    None if face.flip_flux => {
                        for entry in &mut slot.zones {
                            entry.1 = !entry.1;
                        }
                    }
                    None => {}
                }
            }
            TopoAction::RemoveFace { face_id } => {
                self.live_face(i, *face_id)?;
                self.faces[*face_id].removed = true;
            }
            TopoAction::AddCell { master, zone } => {
                if let Some(m) = *master {
                    if m >= self.mesh.n_cells() {
                        return Err(edit_err(i, format!("master cell {m} is not an old cell")));
                    }
                }
                self.check_zone(i, *zone, n_cell_zones, "cell")?;
                self.cells.push(CellSlot {
                    master: *master,
                    zones: zone.iter().copied().collect(),
                    removed: false,
                });
            }
            TopoAction::ModifyCell { cell, zone } => {
                self.live_cell(i, *cell)?;
                self.check_zone(i, *zone, n_cell_zones, "cell")?;
                if let Some(z) = *zone {
                    let slot = &mut self.cells[*cell];
                    if !slot.zones.contains(&z) {
                        slot.zones.push(z);
                    }
                }
            }
            TopoAction::RemoveCell { cell } => {
                self.live_cell(i, *cell)?;
                self.cells[*cell].removed = true;
            }
            TopoAction::AddPatch { name, kind } => {
                if self.patches.iter().any(|p| p.name == *name) {
                    return Err(edit_err(i, format!("patch `{name}` already exists")));
                }
                self.patches.push(PatchSlot {
                    name: name.clone(),
                    kind: kind.clone(),
                });
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<(PolyMesh, MapPolyMesh), MeshError> {
        let mesh = self.mesh;
        let n_old_points = mesh.n_points();
        let n_old_faces = mesh.n_faces();
        let n_old_cells = mesh.n_cells();
        let n_old_internal = mesh.n_internal_faces();

        // cells: survivors in slot order
        let mut reverse_cell_slot = vec![None; self.cells.len()];
        let mut cell_map = Vec::new();
        let mut cell_masters = Vec::new();
        for (slot, cell) in self.cells.iter().enumerate() {
            if !cell.removed {
                reverse_cell_slot[slot] = Some(cell_map.len());
                cell_map.push((slot < n_old_cells).then_some(slot));
                cell_masters.push(cell.master);
            }
        }

        // patches: partners must exist, non-processor ahead of processor
        for slot in &self.patches {
            if let Some(partner) = slot.kind.partner_patch().filter(|&p| p >= self.patches.len()) {
                return Err(MeshError::PatchLayout(format!(
                    "patch `{}` refers to patch {partner}, change has {}",
                    slot.name,
                    self.patches.len()
                )));
            }
        }
        let mut patch_order: Vec<usize> = (0..self.patches.len()).collect();
        patch_order.sort_by_key(|&p| matches!(self.patches[p].kind, PatchKind::Processor { .. }));
        let mut new_patch_of = vec![0usize; self.patches.len()];
        for (new, &slot) in patch_order.iter().enumerate() {
            new_patch_of[slot] = new;
        }

        // faces: validate survivors, then order internal first, patches in order
        let mut order: Vec<(usize, usize)> = Vec::new();
        for (slot, face) in self.faces.iter().enumerate() {
            if face.removed {
                continue;
            }
            for cell in std::iter::once(face.owner).chain(face.neighbour) {
                if self.cells[cell].removed {
                    return Err(MeshError::DanglingFace { face: slot, cell });
                }
            }
            for &p in &face.points {
                if let Some(action) = self.points[p].removed_by {
                    return Err(edit_err(
                        action,
                        format!("point {p} was removed but face {slot} still uses it"),
                    ));
                }
            }
            let bucket = face.patch.map_or(0, |p| new_patch_of[p] + 1);
            order.push((bucket, slot));
        }
        order.sort_unstable();

        // points: referenced ones only, points outside cells last
        let mut used = vec![false; self.points.len()];
        for &(_, slot) in &order {
            for &p in &self.faces[slot].points {
                used[p] = true;
            }
        }
        let mut point_slots: Vec<usize> = (0..self.points.len())
            .filter(|&p| used[p] && self.points[p].in_cell)
            .collect();
        point_slots.extend((0..self.points.len()).filter(|&p| used[p] && !self.points[p].in_cell));
        let mut reverse_point_slot = vec![None; self.points.len()];
        for (new, &slot) in point_slots.iter().enumerate() {
            reverse_point_slot[slot] = Some(new);
        }

        let mut faces = Vec::with_capacity(order.len());
        let mut owner = Vec::with_capacity(order.len());
        let mut neighbour = Vec::new();
        let mut face_map = Vec::with_capacity(order.len());
        let mut face_masters = Vec::with_capacity(order.len());
        let mut flip_face_flux = Vec::with_capacity(order.len());
        let mut exposed_faces = Vec::new();
        let mut reverse_face_slot = vec![None; self.faces.len()];
        let mut patch_sizes = vec![0usize; self.patches.len()];
        for &(bucket, slot) in &order {
            let face = &self.faces[slot];
            let new = faces.len();
            reverse_face_slot[slot] = Some(new);
            faces.push(
                face.points
                    .iter()
                    .filter_map(|&p| reverse_point_slot[p])
                    .collect::<Face>(),
            );
            owner.push(reverse_cell_slot[face.owner].unwrap_or_default());
            if let Some(n) = face.neighbour {
                neighbour.push(reverse_cell_slot[n].unwrap_or_default());
            }
            face_map.push((slot < n_old_faces).then_some(slot));
            face_masters.push(face.master);
            flip_face_flux.push(face.flip);
            if bucket > 0 {
                patch_sizes[bucket - 1] += 1;
                if slot < n_old_internal {
                    exposed_faces.push(new);
                }
            }
        }

        let mut patches = Vec::with_capacity(self.patches.len());
        let mut start = neighbour.len();
        for (new, &slot) in patch_order.iter().enumerate() {
            let src = &self.patches[slot];
            let kind = remap_patch_kind(&src.kind, &new_patch_of);
            patches.push(Patch::new(src.name.clone(), kind, start, patch_sizes[new]));
            start += patch_sizes[new];
        }
        let patch_map = patch_order
            .iter()
            .map(|&slot| (slot < mesh.patches().len()).then_some(slot))
            .collect();

        // zones
        let old_zones = mesh.zones();
        let mut zones = ZoneSet {
            cell_zones: old_zones.cell_zones.iter().map(empty_like).collect(),
            face_zones: old_zones.face_zones.iter().map(empty_like).collect(),
            point_zones: old_zones.point_zones.iter().map(empty_like).collect(),
        };
        for (new, &slot) in point_slots.iter().enumerate() {
            for &z in &self.points[slot].zones {
                zones.point_zones[z].indices.push(new);
            }
        }
        for (new, &(_, slot)) in order.iter().enumerate() {
            for &(z, flip) in &self.faces[slot].zones {
                let zone = &mut zones.face_zones[z];
                zone.indices.push(new);
                if let Some(flips) = zone.flip_map.as_mut() {
                    flips.push(flip);
                }
            }
        }
        let mut new_cell = 0usize;
        for cell in &self.cells {
            if cell.removed {
                continue;
            }
            for &z in &cell.zones {
                zones.cell_zones[z].indices.push(new_cell);
            }
            new_cell += 1;
        }

        let points: Vec<Point> = point_slots.iter().map(|&p| self.points[p].coord).collect();
        let point_map = point_slots
            .iter()
            .map(|&p| (p < n_old_points).then_some(p))
            .collect();
        let point_masters = point_slots.iter().map(|&p| self.points[p].master).collect();

        let new_mesh = PolyMesh::with_cells(points, faces, owner, neighbour, patches, cell_map.len())?
            .with_zones(zones)?;
        new_mesh.check_closed()?;

        let map = MapPolyMesh {
            n_old_points,
            n_old_faces,
            n_old_cells,
            n_old_internal_faces: n_old_internal,
            point_map,
            face_map,
            cell_map,
            reverse_point_map: reverse_point_slot[..n_old_points].to_vec(),
            reverse_face_map: reverse_face_slot[..n_old_faces].to_vec(),
            reverse_cell_map: reverse_cell_slot[..n_old_cells].to_vec(),
            point_masters,
            face_masters,
            cell_masters,
            flip_face_flux,
            patch_map,
            exposed_faces,
            added_point_map: reverse_point_slot[n_old_points..].to_vec(),
            added_face_map: reverse_face_slot[n_old_faces..].to_vec(),
            added_cell_map: reverse_cell_slot[n_old_cells..].to_vec(),
        };
        Ok((new_mesh, map))
    }
}

fn empty_like(zone: &Zone) -> Zone {
    Zone {
        name: zone.name.clone(),
        indices: Vec::new(),
        flip_map: zone.flip_map.as_ref().map(|_| Vec::new()),
    }
}

fn remap_patch_kind(kind: &PatchKind, new_patch_of: &[usize]) -> PatchKind {
    match kind {
        PatchKind::Processor {
            my_proc,
            neighb_proc,
            referred_patch,
        } => PatchKind::Processor {
            my_proc: *my_proc,
            neighb_proc: *neighb_proc,
            referred_patch: referred_patch.map(|p| new_patch_of[p]),
        },
        PatchKind::Cyclic {
            neighbour_patch,
            transform,
        } => PatchKind::Cyclic {
            neighbour_patch: new_patch_of[*neighbour_patch],
            transform: *transform,
        },
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::meshgen::block_mesh;

    #[test]
    fn empty_commit_is_identity() {
        let mesh = block_mesh([2, 2, 1], [1.0, 1.0, 1.0]).unwrap();
        let (out, map) = TopoChange::new(&mesh).commit().unwrap();
        assert_eq!(out, mesh);
        assert!(map.is_identity());
        assert!(map.exposed_faces.is_empty());
    }

    #[test]
    fn modify_face_out_of_range_point_fails_at_commit() {
        let mesh = block_mesh([1, 1, 1], [1.0, 1.0, 1.0]).unwrap();
        let mut tc = TopoChange::new(&mesh);
        tc.modify_face(0, FaceEdit::boundary(vec![0, 1, 99], 0, 0));
        assert!(matches!(
            tc.commit(),
            Err(MeshError::InvalidTopoEdit { action: 0, .. })
        ));
    }

    #[test]
    fn removing_a_cell_without_its_faces_is_dangling() {
        let mesh = block_mesh([2, 1, 1], [2.0, 1.0, 1.0]).unwrap();
        let mut tc = TopoChange::new(&mesh);
        tc.remove_cell(1);
        assert!(matches!(tc.commit(), Err(MeshError::DanglingFace { cell: 1, .. })));
    }

    #[test]
    fn added_cyclic_patch_needs_an_existing_partner() {
        let mesh = block_mesh([1, 1, 1], [1.0, 1.0, 1.0]).unwrap();
        let mut tc = TopoChange::new(&mesh);
        tc.add_patch(
            "periodic",
            PatchKind::Cyclic {
                neighbour_patch: 99,
                transform: crate::topology::patch::CyclicTransform::None,
            },
        );
        assert!(matches!(tc.commit(), Err(MeshError::PatchLayout(_))));
    }

    #[test]
    fn added_patch_goes_before_processor_patches() {
        let mesh = block_mesh([1, 1, 1], [1.0, 1.0, 1.0]).unwrap();
        let mut tc = TopoChange::new(&mesh);
        let proc_patch = tc.add_patch(
            "procBoundary0to1",
            PatchKind::Processor {
                my_proc: 0,
                neighb_proc: 1,
                referred_patch: None,
            },
        );
        let wall = tc.add_patch("extra", PatchKind::Ordinary);
        let f0 = mesh.faces()[0].clone();
        let f1 = mesh.faces()[1].clone();
        tc.modify_face(0, FaceEdit::boundary(f0, 0, proc_patch));
        tc.modify_face(1, FaceEdit::boundary(f1, 0, wall));
        let (out, map) = tc.commit().unwrap();
        let names: Vec<&str> = out.patches().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names.last(), Some(&"procBoundary0to1"));
        assert_eq!(names[names.len() - 2], "extra");
        assert_eq!(map.patch_map.last(), Some(&None));
        out.check().unwrap();
    }

    #[test]
    fn face_zone_flip_toggles_with_flux_flip() {
        let mesh = block_mesh([2, 1, 1], [2.0, 1.0, 1.0]).unwrap();
        let mut zones = ZoneSet::default();
        zones.face_zones.push(Zone::with_flips("mid", vec![0], vec![false]));
        let mesh = mesh.with_zones(zones).unwrap();
        let mut tc = TopoChange::new(&mesh);
        let reversed = mesh.faces()[0].iter().rev().copied().collect();
        tc.modify_face(0, FaceEdit::internal(reversed, 1, 0).flipped(true));
        let (out, map) = tc.commit().unwrap();
        assert!(map.flip_face_flux[0]);
        assert_eq!(out.zones().face_zones[0].flip_map, Some(vec![true]));
    }
}
