//! Lagrangian particle clouds.
//!
//! A cloud stores its particles column-wise: positions, current cells and one
//! array per user attribute. Cell indices are only meaningful on the mesh the
//! cloud was built for; when particles move to another process their cell is
//! found again from the position (see [`Cloud::relocate`]).

use serde::{Deserialize, Serialize};

use crate::algs::wire::{WireReader, WireWriter, kind};
use crate::data::value::{Label, Scalar, Tensor, Vector};
use crate::mesh_error::MeshError;
use crate::topology::mesh::{Point, PolyMesh};

/// Per-particle attribute column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Attribute {
    Scalar(Vec<Scalar>),
    Vector(Vec<Vector>),
    Tensor(Vec<Tensor>),
    Label(Vec<Label>),
    /// Variable-length list per particle (e.g. sampled history).
    ScalarList(Vec<Vec<Scalar>>),
    VectorList(Vec<Vec<Vector>>),
}

macro_rules! each_column {
    ($attr:expr, $v:ident => $body:expr) => {
        match $attr {
            Attribute::Scalar($v) => $body,
            Attribute::Vector($v) => $body,
            Attribute::Tensor($v) => $body,
            Attribute::Label($v) => $body,
            Attribute::ScalarList($v) => $body,
            Attribute::VectorList($v) => $body,
        }
    };
}

macro_rules! map_column {
    ($attr:expr, $v:ident => $body:expr) => {
        match $attr {
            Attribute::Scalar($v) => Attribute::Scalar($body),
            Attribute::Vector($v) => Attribute::Vector($body),
            Attribute::Tensor($v) => Attribute::Tensor($body),
            Attribute::Label($v) => Attribute::Label($body),
            Attribute::ScalarList($v) => Attribute::ScalarList($body),
            Attribute::VectorList($v) => Attribute::VectorList($body),
        }
    };
}

impl Attribute {
    pub fn len(&self) -> usize {
        each_column!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn tag(&self) -> u8 {
        match self {
            Attribute::Scalar(_) => 0,
            Attribute::Vector(_) => 1,
            Attribute::Tensor(_) => 2,
            Attribute::Label(_) => 3,
            Attribute::ScalarList(_) => 4,
            Attribute::VectorList(_) => 5,
        }
    }

    fn select(&self, idx: &[usize]) -> Attribute {
        map_column!(self, v => idx.iter().map(|&i| v[i].clone()).collect())
    }

    fn append(&mut self, other: Attribute) -> Result<(), MeshError> {
        match (self, other) {
            (Attribute::Scalar(a), Attribute::Scalar(b)) => a.extend(b),
            (Attribute::Vector(a), Attribute::Vector(b)) => a.extend(b),
            (Attribute::Tensor(a), Attribute::Tensor(b)) => a.extend(b),
            (Attribute::Label(a), Attribute::Label(b)) => a.extend(b),
            (Attribute::ScalarList(a), Attribute::ScalarList(b)) => a.extend(b),
            (Attribute::VectorList(a), Attribute::VectorList(b)) => a.extend(b),
            (a, b) => {
                return Err(MeshError::Wire(format!(
                    "attribute kind {} cannot take values of kind {}",
                    a.tag(),
                    b.tag()
                )));
            }
        }
        Ok(())
    }

    fn write(&self, w: &mut WireWriter) {
        w.put_u8(self.tag());
        match self {
            Attribute::Scalar(v) => w.put_pods(v),
            Attribute::Vector(v) => w.put_pods(v),
            Attribute::Tensor(v) => w.put_pods(v),
            Attribute::Label(v) => w.put_pods(v),
            Attribute::ScalarList(v) => {
                w.put_usize(v.len());
                v.iter().for_each(|l| w.put_pods(l));
            }
            Attribute::VectorList(v) => {
                w.put_usize(v.len());
                v.iter().for_each(|l| w.put_pods(l));
            }
        }
    }

    fn read(r: &mut WireReader<'_>) -> Result<Attribute, MeshError> {
        Ok(match r.get_u8()? {
            0 => Attribute::Scalar(r.get_pods()?),
            1 => Attribute::Vector(r.get_pods()?),
            2 => Attribute::Tensor(r.get_pods()?),
            3 => Attribute::Label(r.get_pods()?),
            4 => {
                let n = r.get_count(8, "scalar lists")?;
                Attribute::ScalarList((0..n).map(|_| r.get_pods()).collect::<Result<_, _>>()?)
            }
            5 => {
                let n = r.get_count(8, "vector lists")?;
                Attribute::VectorList((0..n).map(|_| r.get_pods()).collect::<Result<_, _>>()?)
            }
            t => return Err(MeshError::Wire(format!("unknown attribute kind {t}"))),
        })
    }
}

/// Named particle cloud.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Cloud {
    name: String,
    positions: Vec<Point>,
    cells: Vec<usize>,
    attributes: Vec<(String, Attribute)>,
}

impl Cloud {
    pub fn new(name: impl Into<String>, positions: Vec<Point>, cells: Vec<usize>) -> Result<Self, MeshError> {
        let name = name.into();
        if positions.len() != cells.len() {
            return Err(MeshError::FieldSize {
                name: format!("{name}.cells"),
                expected: positions.len(),
                got: cells.len(),
            });
        }
        Ok(Self {
            name,
            positions,
            cells,
            attributes: Vec::new(),
        })
    }

    /// Cloud whose particle cells are found by searching `mesh`.
    pub fn locate(name: impl Into<String>, positions: Vec<Point>, mesh: &PolyMesh) -> Result<Self, MeshError> {
        let cells = positions
            .iter()
            .map(|&p| {
                mesh.find_cell(p)
                    .ok_or_else(|| MeshError::Wire(format!("no cell for particle at {p:?}")))
            })
            .collect::<Result<_, _>>()?;
        Self::new(name, positions, cells)
    }

    /// Add (or replace) an attribute column.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Result<Self, MeshError> {
        let name = name.into();
        if attr.len() != self.len() {
            return Err(MeshError::FieldSize {
                name: format!("{}.{name}", self.name),
                expected: self.len(),
                got: attr.len(),
            });
        }
        match self.attributes.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = attr,
            None => self.attributes.push((name, attr)),
        }
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[Point] {
        &self.positions
    }

    pub fn cells(&self) -> &[usize] {
        &self.cells
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|(n, _)| n == name).map(|(_, a)| a)
    }

    pub fn attributes(&self) -> &[(String, Attribute)] {
        &self.attributes
    }

    /// Same cloud without particles.
    pub fn empty_like(&self) -> Cloud {
        self.select(&[])
    }

    /// The particles at `idx`, in that order.
    pub fn select(&self, idx: &[usize]) -> Cloud {
        Cloud {
            name: self.name.clone(),
            positions: idx.iter().map(|&i| self.positions[i]).collect(),
            cells: idx.iter().map(|&i| self.cells[i]).collect(),
            attributes: self
                .attributes
                .iter()
                .map(|(n, a)| (n.clone(), a.select(idx)))
                .collect(),
        }
    }

    /// Append the particles of `other`. An empty cloud adopts the attribute
    /// layout of `other`; otherwise the layouts must match.
    pub fn append(&mut self, other: Cloud) -> Result<(), MeshError> {
        if self.attributes.is_empty() && self.is_empty() {
            self.attributes = other.attributes.iter().map(|(n, a)| (n.clone(), a.select(&[]))).collect();
        }
        if other.attributes.len() != self.attributes.len() && !other.is_empty() {
            return Err(MeshError::Wire(format!(
                "cloud `{}`: {} attributes received, {} expected",
                self.name,
                other.attributes.len(),
                self.attributes.len()
            )));
        }
        let n_other = other.len();
        for (name, attr) in other.attributes {
            match self.attributes.iter_mut().find(|(n, _)| *n == name) {
                Some(slot) => slot.1.append(attr)?,
                None if n_other == 0 => {}
                None => {
                    return Err(MeshError::Wire(format!(
                        "cloud `{}` has no attribute `{name}`",
                        self.name
                    )));
                }
            }
        }
        self.positions.extend(other.positions);
        self.cells.extend(other.cells);
        Ok(())
    }

    /// Set particle cells on `mesh`. `hints[i]` is a cell that probably holds
    /// particle `i`; it is verified with a point-in-cell test and replaced by
    /// a search when the test fails.
    pub fn relocate(&mut self, mesh: &PolyMesh, hints: &[Option<usize>]) -> Result<(), MeshError> {
        if hints.len() != self.len() {
            return Err(MeshError::FieldSize {
                name: format!("{}.hints", self.name),
                expected: self.len(),
                got: hints.len(),
            });
        }
        if self.is_empty() {
            self.cells.clear();
            return Ok(());
        }
        let cells = mesh.cells();
        let mut searched = 0usize;
        self.cells = self
            .positions
            .iter()
            .zip(hints)
            .map(|(&p, hint)| match *hint {
                Some(c) if c < cells.len() && mesh.point_in_cell(p, c, &cells[c]) => Ok(c),
                _ => {
                    searched += 1;
                    mesh.find_cell(p)
                        .ok_or_else(|| MeshError::Wire(format!("no cell for particle at {p:?}")))
                }
            })
            .collect::<Result<_, _>>()?;
        if searched > 0 {
            log::debug!("cloud `{}`: {searched} of {} particles located by search", self.name, self.len());
        }
        Ok(())
    }

    fn write(&self, w: &mut WireWriter, hints: &[usize]) {
        w.put_str(&self.name);
        w.put_pods(&self.positions);
        w.put_usizes(hints);
        w.put_usize(self.attributes.len());
        for (name, attr) in &self.attributes {
            w.put_str(name);
            attr.write(w);
        }
    }

    fn read(r: &mut WireReader<'_>) -> Result<(Cloud, Vec<usize>), MeshError> {
        let name = r.get_str()?;
        let positions: Vec<Point> = r.get_pods()?;
        let hints = r.get_usizes()?;
        if hints.len() != positions.len() {
            return Err(MeshError::Wire(format!(
                "cloud `{name}`: {} hints for {} particles",
                hints.len(),
                positions.len()
            )));
        }
        let n_attr = r.get_count(9, "attributes")?;
        let mut attributes = Vec::with_capacity(n_attr);
        for _ in 0..n_attr {
            let attr_name = r.get_str()?;
            let attr = Attribute::read(r)?;
            if attr.len() != positions.len() {
                return Err(MeshError::Wire(format!(
                    "cloud `{name}` attribute `{attr_name}`: {} values for {} particles",
                    attr.len(),
                    positions.len()
                )));
            }
            attributes.push((attr_name, attr));
        }
        let cells = vec![0; positions.len()];
        Ok((
            Cloud {
                name,
                positions,
                cells,
                attributes,
            },
            hints,
        ))
    }
}

/// Split `clouds` by destination. `target(cell)` gives the destination rank
/// of a particle in `cell` and a cell hint the receiver understands. Every
/// destination gets a record naming every cloud, possibly without particles.
pub fn pack_clouds(
    clouds: &[Cloud],
    n_procs: usize,
    target: impl Fn(usize) -> Result<(usize, usize), MeshError>,
) -> Result<Vec<Vec<u8>>, MeshError> {
    let mut writers: Vec<WireWriter> = (0..n_procs).map(|_| WireWriter::new(kind::CLOUD)).collect();
    for w in &mut writers {
        w.put_usize(clouds.len());
    }
    for cloud in clouds {
        let mut selected = vec![Vec::new(); n_procs];
        let mut hints = vec![Vec::new(); n_procs];
        for (i, &cell) in cloud.cells.iter().enumerate() {
            let (rank, hint) = target(cell)?;
            let slot = selected.get_mut(rank).ok_or_else(|| MeshError::InvalidRank {
                cell,
                rank,
                size: n_procs,
            })?;
            slot.push(i);
            hints[rank].push(hint);
        }
        for (rank, w) in writers.iter_mut().enumerate() {
            cloud.select(&selected[rank]).write(w, &hints[rank]);
        }
    }
    Ok(writers.into_iter().map(WireWriter::finish).collect())
}

/// Merge the records received from every source into clouds on `mesh`.
///
/// Clouds are ordered like `local`, followed by clouds only other ranks
/// know. Particles are appended in source order; `hint(src, h)` turns a
/// sender's hint into a cell of `mesh`.
pub fn unpack_clouds(
    local: &[Cloud],
    received: &[&[u8]],
    mesh: &PolyMesh,
    hint: impl Fn(usize, usize) -> Option<usize>,
) -> Result<Vec<Cloud>, MeshError> {
    let mut out: Vec<Cloud> = local.iter().map(Cloud::empty_like).collect();
    let mut out_hints: Vec<Vec<Option<usize>>> = vec![Vec::new(); out.len()];
    for (src, bytes) in received.iter().enumerate() {
        if bytes.is_empty() {
            continue;
        }
        let mut r = WireReader::open(bytes, kind::CLOUD)?;
        let n = r.get_count(8, "clouds")?;
        for _ in 0..n {
            let (cloud, hints) = Cloud::read(&mut r)?;
            let slot = match out.iter().position(|c| c.name == cloud.name) {
                Some(i) => i,
                None => {
                    out.push(cloud.empty_like());
                    out_hints.push(Vec::new());
                    out.len() - 1
                }
            };
            out_hints[slot].extend(hints.iter().map(|&h| hint(src, h)));
            out[slot].append(cloud)?;
        }
        r.finish()?;
    }
    for (cloud, hints) in out.iter_mut().zip(&out_hints) {
        cloud.relocate(mesh, hints)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::meshgen::chain_mesh;

    fn sample(mesh: &PolyMesh) -> Cloud {
        Cloud::locate("sprays", vec![[0.5, 0.5, 0.5], [2.5, 0.5, 0.5], [1.5, 0.2, 0.8]], mesh)
            .unwrap()
            .with_attribute("d", Attribute::Scalar(vec![1e-3, 2e-3, 3e-3]))
            .unwrap()
            .with_attribute(
                "history",
                Attribute::VectorList(vec![vec![], vec![[1.0, 0.0, 0.0]], vec![[0.0; 3]; 2]]),
            )
            .unwrap()
    }

    #[test]
    fn locate_finds_containing_cells() {
        let mesh = chain_mesh(3, 3.0).unwrap();
        assert_eq!(sample(&mesh).cells(), &[0, 2, 1]);
    }

    #[test]
    fn attribute_length_is_checked() {
        let mesh = chain_mesh(3, 3.0).unwrap();
        let err = sample(&mesh)
            .with_attribute("T", Attribute::Scalar(vec![300.0]))
            .unwrap_err();
        assert!(matches!(err, MeshError::FieldSize { expected: 3, got: 1, .. }));
    }

    #[test]
    fn pack_then_unpack_keeps_every_particle() {
        let mesh = chain_mesh(3, 3.0).unwrap();
        let cloud = sample(&mesh);
        // cells 0 and 1 to rank 0, cell 2 to rank 1; hints are the cells themselves
        let packed = pack_clouds(std::slice::from_ref(&cloud), 2, |c| Ok((usize::from(c == 2), c))).unwrap();
        let views: Vec<&[u8]> = packed.iter().map(Vec::as_slice).collect();
        let out = unpack_clouds(&[], &views, &mesh, |_, h| Some(h)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), 3);
        // rank 0's particles first, then rank 1's
        assert_eq!(out[0].cells(), &[0, 1, 2]);
        assert_eq!(
            out[0].attribute("d"),
            Some(&Attribute::Scalar(vec![1e-3, 3e-3, 2e-3]))
        );
    }

    #[test]
    fn wrong_hint_is_corrected_by_search() {
        let mesh = chain_mesh(3, 3.0).unwrap();
        let mut cloud = sample(&mesh);
        cloud.relocate(&mesh, &[Some(2), None, Some(1)]).unwrap();
        assert_eq!(cloud.cells(), &[0, 2, 1]);
    }
}
