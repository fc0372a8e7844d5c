//! Field element types and physical dimensions.

use bytemuck::Pod;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type Scalar = f64;
pub type Vector = [f64; 3];
/// Symmetric tensor `(xx, xy, xz, yy, yz, zz)`.
pub type SymmTensor = [f64; 6];
/// Full tensor, row-major.
pub type Tensor = [f64; 9];
pub type Label = i64;

/// Element type tag for type-erased storage and the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Scalar,
    Vector,
    SymmTensor,
    Tensor,
    Label,
}

impl ValueType {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::Scalar => "scalar",
            ValueType::Vector => "vector",
            ValueType::SymmTensor => "symmTensor",
            ValueType::Tensor => "tensor",
            ValueType::Label => "label",
        }
    }

    pub(crate) fn to_wire(self) -> u8 {
        match self {
            ValueType::Scalar => 0,
            ValueType::Vector => 1,
            ValueType::SymmTensor => 2,
            ValueType::Tensor => 3,
            ValueType::Label => 4,
        }
    }

    pub(crate) fn from_wire(v: u8) -> Option<Self> {
        match v {
            0 => Some(ValueType::Scalar),
            1 => Some(ValueType::Vector),
            2 => Some(ValueType::SymmTensor),
            3 => Some(ValueType::Tensor),
            4 => Some(ValueType::Label),
            _ => None,
        }
    }
}

/// Capability set of a field element: plain data that can travel on the wire
/// and change sign when the face it lives on is reversed.
pub trait FieldValue: Pod + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    const TYPE: ValueType;

    fn negate(self) -> Self;
}

impl FieldValue for f64 {
    const TYPE: ValueType = ValueType::Scalar;

    fn negate(self) -> Self {
        -self
    }
}

impl FieldValue for i64 {
    const TYPE: ValueType = ValueType::Label;

    fn negate(self) -> Self {
        self.wrapping_neg()
    }
}

macro_rules! impl_array_value {
    ($n:literal, $tag:expr) => {
        impl FieldValue for [f64; $n] {
            const TYPE: ValueType = $tag;

            fn negate(self) -> Self {
                self.map(|x| -x)
            }
        }
    };
}

impl_array_value!(3, ValueType::Vector);
impl_array_value!(6, ValueType::SymmTensor);
impl_array_value!(9, ValueType::Tensor);

/// SI dimension exponents `[mass, length, time, temperature, moles, current, luminous intensity]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions(pub [i8; 7]);

impl Dimensions {
    pub const DIMLESS: Dimensions = Dimensions([0; 7]);
    pub const PRESSURE: Dimensions = Dimensions([1, -1, -2, 0, 0, 0, 0]);
    pub const VELOCITY: Dimensions = Dimensions([0, 1, -1, 0, 0, 0, 0]);
    /// Volumetric flux through a face.
    pub const FLUX: Dimensions = Dimensions([0, 3, -1, 0, 0, 0, 0]);
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}
