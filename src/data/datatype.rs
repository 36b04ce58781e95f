use std::fmt;

use serde::{Deserialize, Serialize};

use crate::attribute::AttributeValue;

use super::buffer::Buffer;
use super::selection::Extent;

/// Element datatype of a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Datatype {
    /// 32-bit signed integer
    #[serde(rename = "INT32")]
    I32,
    /// 64-bit signed integer
    #[serde(rename = "INT64")]
    I64,
    /// 8-bit unsigned integer
    #[serde(rename = "UINT8")]
    U8,
    /// 32-bit unsigned integer
    #[serde(rename = "UINT32")]
    U32,
    /// 64-bit unsigned integer
    #[serde(rename = "UINT64")]
    U64,
    /// Single precision float
    #[serde(rename = "FLOAT")]
    F32,
    /// Double precision float
    #[serde(rename = "DOUBLE")]
    F64,
}

impl Datatype {
    /// Name used in persisted documents
    pub fn name(self) -> &'static str {
        match self {
            Datatype::I32 => "INT32",
            Datatype::I64 => "INT64",
            Datatype::U8 => "UINT8",
            Datatype::U32 => "UINT32",
            Datatype::U64 => "UINT64",
            Datatype::F32 => "FLOAT",
            Datatype::F64 => "DOUBLE",
        }
    }

    /// Parse a persisted datatype name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "INT32" => Some(Datatype::I32),
            "INT64" => Some(Datatype::I64),
            "UINT8" => Some(Datatype::U8),
            "UINT32" => Some(Datatype::U32),
            "UINT64" => Some(Datatype::U64),
            "FLOAT" => Some(Datatype::F32),
            "DOUBLE" => Some(Datatype::F64),
            _ => None,
        }
    }

    /// Size of one element in bytes
    pub fn size_bytes(self) -> usize {
        match self {
            Datatype::U8 => 1,
            Datatype::I32 | Datatype::U32 | Datatype::F32 => 4,
            Datatype::I64 | Datatype::U64 | Datatype::F64 => 8,
        }
    }

    /// Whether this is a floating point type
    pub fn is_floating_point(self) -> bool {
        matches!(self, Datatype::F32 | Datatype::F64)
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declared shape and element type of a record component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    /// Element datatype
    pub datatype: Datatype,
    /// Global extent, one entry per dimension
    pub extent: Extent,
}

impl Dataset {
    /// Declare a dataset of the given type and extent
    pub fn new(datatype: Datatype, extent: impl Into<Extent>) -> Self {
        Self {
            datatype,
            extent: extent.into(),
        }
    }

    /// Declare a dataset whose datatype follows a Rust element type
    pub fn of<T: Element>(extent: impl Into<Extent>) -> Self {
        Self::new(T::DATATYPE, extent)
    }

    /// Rank (number of dimensions)
    pub fn rank(&self) -> usize {
        self.extent.len()
    }
}

/// Rust types that may be stored as dataset elements
pub trait Element: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Datatype tag for this element type
    const DATATYPE: Datatype;

    /// Wrap owned values into a typed buffer
    fn into_buffer(values: Vec<Self>) -> Buffer;

    /// Borrow the values of a buffer of this element type
    fn from_buffer(buffer: &Buffer) -> Option<&[Self]>;

    /// Convert to a scalar attribute value
    fn into_attribute(self) -> AttributeValue;

    /// Extract from a scalar attribute value of exactly this type
    fn from_attribute(value: &AttributeValue) -> Option<Self>;
}

/// Floating point element types, used for caller-chosen time precision
pub trait FloatElement: Element {
    /// Narrow or widen from `f64`
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_element {
    ($t:ty, $variant:ident) => {
        impl Element for $t {
            const DATATYPE: Datatype = Datatype::$variant;

            fn into_buffer(values: Vec<Self>) -> Buffer {
                Buffer::$variant(values)
            }

            fn from_buffer(buffer: &Buffer) -> Option<&[Self]> {
                match buffer {
                    Buffer::$variant(values) => Some(values.as_slice()),
                    _ => None,
                }
            }

            fn into_attribute(self) -> AttributeValue {
                AttributeValue::$variant(self)
            }

            fn from_attribute(value: &AttributeValue) -> Option<Self> {
                match value {
                    AttributeValue::$variant(v) => Some(*v),
                    _ => None,
                }
            }
        }
    };
}

impl_element!(i32, I32);
impl_element!(i64, I64);
impl_element!(u8, U8);
impl_element!(u32, U32);
impl_element!(u64, U64);
impl_element!(f32, F32);
impl_element!(f64, F64);

impl FloatElement for f32 {
    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl FloatElement for f64 {
    fn from_f64(value: f64) -> Self {
        value
    }
}
