//! Named, possibly overlapping subsets of cells, faces or points.

use serde::{Deserialize, Serialize};

/// What a zone indexes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneKind {
    Cell,
    Face,
    Point,
}

impl ZoneKind {
    pub(crate) fn to_wire(self) -> u8 {
        match self {
            ZoneKind::Cell => 0,
            ZoneKind::Face => 1,
            ZoneKind::Point => 2,
        }
    }

    pub(crate) fn from_wire(v: u8) -> Option<Self> {
        match v {
            0 => Some(ZoneKind::Cell),
            1 => Some(ZoneKind::Face),
            2 => Some(ZoneKind::Point),
            _ => None,
        }
    }
}

/// A named subset. Face zones additionally carry one flip flag per entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    pub indices: Vec<usize>,
    /// Only present for face zones.
    pub flip_map: Option<Vec<bool>>,
}

impl Zone {
    pub fn new(name: impl Into<String>, indices: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            indices,
            flip_map: None,
        }
    }

    pub fn with_flips(name: impl Into<String>, indices: Vec<usize>, flips: Vec<bool>) -> Self {
        Self {
            name: name.into(),
            indices,
            flip_map: Some(flips),
        }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn flip(&self, i: usize) -> bool {
        self.flip_map
            .as_ref()
            .and_then(|f| f.get(i).copied())
            .unwrap_or(false)
    }

    /// Renumber through `old_to_new`, dropping entries that vanished.
    /// Entries stay sorted by new index.
    pub fn renumbered(&self, old_to_new: impl Fn(usize) -> Option<usize>) -> Zone {
        let mut entries: Vec<(usize, bool)> = self
            .indices
            .iter()
            .enumerate()
            .filter_map(|(i, &old)| old_to_new(old).map(|new| (new, self.flip(i))))
            .collect();
        entries.sort_unstable();
        entries.dedup_by_key(|e| e.0);
        let indices = entries.iter().map(|e| e.0).collect();
        let flip_map = self
            .flip_map
            .as_ref()
            .map(|_| entries.iter().map(|e| e.1).collect());
        Zone {
            name: self.name.clone(),
            indices,
            flip_map,
        }
    }
}

/// Cell, face and point zones of one mesh.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneSet {
    pub cell_zones: Vec<Zone>,
    pub face_zones: Vec<Zone>,
    pub point_zones: Vec<Zone>,
}

impl ZoneSet {
    pub fn zones(&self, kind: ZoneKind) -> &[Zone] {
        match kind {
            ZoneKind::Cell => &self.cell_zones,
            ZoneKind::Face => &self.face_zones,
            ZoneKind::Point => &self.point_zones,
        }
    }

    pub fn zones_mut(&mut self, kind: ZoneKind) -> &mut Vec<Zone> {
        match kind {
            ZoneKind::Cell => &mut self.cell_zones,
            ZoneKind::Face => &mut self.face_zones,
            ZoneKind::Point => &mut self.point_zones,
        }
    }

    pub fn find(&self, kind: ZoneKind, name: &str) -> Option<usize> {
        self.zones(kind).iter().position(|z| z.name == name)
    }

    /// Index of the zone called `name`, creating an empty one if needed.
    pub fn find_or_insert(&mut self, kind: ZoneKind, name: &str) -> usize {
        if let Some(i) = self.find(kind, name) {
            return i;
        }
        let zone = match kind {
            ZoneKind::Face => Zone::with_flips(name, Vec::new(), Vec::new()),
            _ => Zone::new(name, Vec::new()),
        };
        let zones = self.zones_mut(kind);
        zones.push(zone);
        zones.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.cell_zones.is_empty() && self.face_zones.is_empty() && self.point_zones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renumber_drops_removed_and_keeps_flips() {
        let z = Zone::with_flips("fz", vec![4, 2, 7], vec![true, false, true]);
        let r = z.renumbered(|old| if old == 2 { None } else { Some(10 - old) });
        assert_eq!(r.indices, vec![3, 6]);
        assert_eq!(r.flip_map, Some(vec![true, true]));
    }

    #[test]
    fn find_or_insert_is_idempotent() {
        let mut zs = ZoneSet::default();
        let a = zs.find_or_insert(ZoneKind::Cell, "porous");
        let b = zs.find_or_insert(ZoneKind::Cell, "porous");
        assert_eq!(a, b);
        assert_eq!(zs.cell_zones.len(), 1);
        assert!(zs.face_zones.is_empty());
    }
}
