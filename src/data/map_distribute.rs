//! `MapDistribute`: which local entries go to which rank and where received
//! entries land.
//!
//! `sub_map[rank]` lists, in send order, the local indices whose values go to
//! `rank`. `construct_map[rank]` lists, in the same order as `rank` sent them,
//! the local index each received value is written to (`None`: received but
//! not used, e.g. the second copy of a merged face). `construct_flip` marks
//! entries whose orientation is reversed on arrival.

use serde::{Deserialize, Serialize};

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange::all_to_allv;
use crate::algs::wire::{WireReader, WireWriter, kind};
use crate::data::value::FieldValue;
use crate::mesh_error::MeshError;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapDistribute {
    pub construct_size: usize,
    pub sub_map: Vec<Vec<usize>>,
    pub construct_map: Vec<Vec<Option<usize>>>,
    /// Per source rank; an empty list means no flips.
    pub construct_flip: Vec<Vec<bool>>,
}

impl MapDistribute {
    /// Every entry stays on `rank` at the same index.
    pub fn identity(n: usize, rank: usize, n_procs: usize) -> Self {
        let mut sub_map = vec![Vec::new(); n_procs];
        let mut construct_map = vec![Vec::new(); n_procs];
        sub_map[rank] = (0..n).collect();
        construct_map[rank] = (0..n).map(Some).collect();
        Self {
            construct_size: n,
            sub_map,
            construct_map,
            construct_flip: vec![Vec::new(); n_procs],
        }
    }

    pub fn n_procs(&self) -> usize {
        self.sub_map.len()
    }

    fn flip(&self, src: usize, k: usize) -> bool {
        self.construct_flip
            .get(src)
            .and_then(|f| f.get(k).copied())
            .unwrap_or(false)
    }

    /// Per destination, the values in send order.
    pub fn pack<T: Copy>(&self, values: &[T]) -> Result<Vec<Vec<T>>, MeshError> {
        self.sub_map
            .iter()
            .map(|idx| {
                idx.iter()
                    .map(|&i| {
                        values.get(i).copied().ok_or_else(|| {
                            MeshError::Wire(format!(
                                "sub map index {i} outside {} local values",
                                values.len()
                            ))
                        })
                    })
                    .collect()
            })
            .collect()
    }

    /// Scatter received per-source values into a new array of `construct_size`.
    /// Flipped entries are negated when `oriented`.
    pub fn unpack<T: FieldValue>(&self, received: &[Vec<T>], oriented: bool) -> Result<Vec<T>, MeshError> {
        let mut out = vec![T::default(); self.construct_size];
        for (src, (values, slots)) in received.iter().zip(&self.construct_map).enumerate() {
            if values.len() != slots.len() {
                return Err(MeshError::Wire(format!(
                    "rank {src} sent {} values, expected {}",
                    values.len(),
                    slots.len()
                )));
            }
            for (k, (&v, slot)) in values.iter().zip(slots).enumerate() {
                let Some(new) = *slot else { continue };
                out[new] = if oriented && self.flip(src, k) { v.negate() } else { v };
            }
        }
        Ok(out)
    }

    /// Send `values` (indexed by old local entry) along the map and return the
    /// array of the new distribution.
    pub fn distribute<T, C>(&self, comm: &C, tag: CommTag, values: &[T], oriented: bool) -> Result<Vec<T>, MeshError>
    where
        T: FieldValue,
        C: Communicator,
    {
        let packed = self.pack(values)?;
        let sends = packed
            .iter()
            .map(|vals| {
                if vals.is_empty() {
                    return Vec::new();
                }
                let mut w = WireWriter::new(kind::FIELD_VALUES);
                w.put_pods(vals);
                w.finish()
            })
            .collect();
        let received = all_to_allv(comm, tag, sends)?;
        let decoded = received
            .iter()
            .map(|buf| {
                if buf.is_empty() {
                    return Ok(Vec::new());
                }
                let mut r = WireReader::open(buf, kind::FIELD_VALUES)?;
                let vals = r.get_pods::<T>()?;
                r.finish()?;
                Ok(vals)
            })
            .collect::<Result<Vec<_>, MeshError>>()?;
        self.unpack(&decoded, oriented)
    }
}
