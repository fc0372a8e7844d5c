//! Boundary patch descriptors.
//!
//! A patch is a named, contiguous run of boundary faces. The set of patch
//! kinds is closed: ordinary walls/inlets/outlets, `empty` (2-D front/back),
//! processor interfaces and cyclic (periodic) pairs.

use serde::{Deserialize, Serialize};

/// Transformation between the two halves of a cyclic pair.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub enum CyclicTransform {
    #[default]
    None,
    /// Points on this half map to the neighbour half by adding the vector.
    Translational([f64; 3]),
}

/// Kind of a boundary patch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PatchKind {
    /// Ordinary non-coupled boundary (wall, inlet, outlet, ...).
    Ordinary,
    /// Non-coupled patch whose faces carry no values (2-D cases).
    Empty,
    /// Inter-process cut. `referred_patch` names the cyclic half this
    /// processor patch stands in for when a cyclic pair is split across ranks.
    Processor {
        my_proc: usize,
        neighb_proc: usize,
        referred_patch: Option<usize>,
    },
    /// One half of a periodic pair living on the same rank.
    Cyclic {
        neighbour_patch: usize,
        transform: CyclicTransform,
    },
}

impl PatchKind {
    /// Short tag used in messages and precondition checks.
    pub fn type_name(&self) -> &'static str {
        match self {
            PatchKind::Ordinary => "patch",
            PatchKind::Empty => "empty",
            PatchKind::Processor {
                referred_patch: None,
                ..
            } => "processor",
            PatchKind::Processor { .. } => "processorCyclic",
            PatchKind::Cyclic { .. } => "cyclic",
        }
    }

    /// Index of the other patch this kind refers to: the cyclic partner,
    /// or the cyclic patch a processor patch stands in for.
    pub fn partner_patch(&self) -> Option<usize> {
        match self {
            PatchKind::Cyclic { neighbour_patch, .. } => Some(*neighbour_patch),
            PatchKind::Processor { referred_patch, .. } => *referred_patch,
            _ => None,
        }
    }
}

/// Boundary patch `{name, kind, start, size}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub name: String,
    pub kind: PatchKind,
    pub start: usize,
    pub size: usize,
}

impl Patch {
    pub fn new(name: impl Into<String>, kind: PatchKind, start: usize, size: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            start,
            size,
        }
    }

    /// Processor patch named the conventional way.
    pub fn processor(my_proc: usize, neighb_proc: usize, start: usize, size: usize) -> Self {
        Self::new(
            processor_patch_name(my_proc, neighb_proc, None),
            PatchKind::Processor {
                my_proc,
                neighb_proc,
                referred_patch: None,
            },
            start,
            size,
        )
    }

    pub fn is_processor(&self) -> bool {
        matches!(self.kind, PatchKind::Processor { .. })
    }

    pub fn is_coupled(&self) -> bool {
        matches!(
            self.kind,
            PatchKind::Processor { .. } | PatchKind::Cyclic { .. }
        )
    }

    /// Face indices covered by this patch.
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.size
    }

    pub fn neighb_proc(&self) -> Option<usize> {
        match self.kind {
            PatchKind::Processor { neighb_proc, .. } => Some(neighb_proc),
            _ => None,
        }
    }
}

/// `procBoundary{me}to{nbr}` or `procBoundary{me}to{nbr}through{cyclic}`.
pub fn processor_patch_name(my_proc: usize, neighb_proc: usize, through: Option<&str>) -> String {
    match through {
        None => format!("procBoundary{my_proc}to{neighb_proc}"),
        Some(cyclic) => format!("procBoundary{my_proc}to{neighb_proc}through{cyclic}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processor_naming_and_flags() {
        let p = Patch::processor(0, 3, 10, 4);
        assert_eq!(p.name, "procBoundary0to3");
        assert!(p.is_processor() && p.is_coupled());
        assert_eq!(p.neighb_proc(), Some(3));
        assert_eq!(p.range(), 10..14);
        assert_eq!(
            processor_patch_name(1, 2, Some("periodic0")),
            "procBoundary1to2throughperiodic0"
        );
    }

    #[test]
    fn ordinary_is_not_coupled() {
        let p = Patch::new("wall", PatchKind::Ordinary, 0, 0);
        assert!(!p.is_coupled());
        assert_eq!(p.kind.type_name(), "patch");
        assert_eq!(p.kind.partner_patch(), None);
    }
}
