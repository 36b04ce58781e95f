use serde::{Deserialize, Serialize};

/// Typed scalar or one-dimensional array attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "datatype", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttributeValue {
    /// Boolean flag
    Bool(bool),
    /// 32-bit signed integer
    I32(i32),
    /// 64-bit signed integer
    I64(i64),
    /// 8-bit unsigned integer
    U8(u8),
    /// 32-bit unsigned integer
    U32(u32),
    /// 64-bit unsigned integer
    U64(u64),
    /// Single precision float
    F32(f32),
    /// Double precision float
    F64(f64),
    /// UTF-8 string
    String(String),
    /// Array of signed integers
    VecI64(Vec<i64>),
    /// Array of unsigned integers
    VecU64(Vec<u64>),
    /// Array of single precision floats
    VecF32(Vec<f32>),
    /// Array of double precision floats
    VecF64(Vec<f64>),
    /// Array of strings
    VecString(Vec<String>),
}

impl AttributeValue {
    /// Short name of the stored type, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::Bool(_) => "bool",
            AttributeValue::I32(_) => "i32",
            AttributeValue::I64(_) => "i64",
            AttributeValue::U8(_) => "u8",
            AttributeValue::U32(_) => "u32",
            AttributeValue::U64(_) => "u64",
            AttributeValue::F32(_) => "f32",
            AttributeValue::F64(_) => "f64",
            AttributeValue::String(_) => "string",
            AttributeValue::VecI64(_) => "vec<i64>",
            AttributeValue::VecU64(_) => "vec<u64>",
            AttributeValue::VecF32(_) => "vec<f32>",
            AttributeValue::VecF64(_) => "vec<f64>",
            AttributeValue::VecString(_) => "vec<string>",
        }
    }

    /// Numeric scalar widened to `f64`
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            AttributeValue::I32(v) => Some(f64::from(v)),
            AttributeValue::I64(v) => Some(v as f64),
            AttributeValue::U8(v) => Some(f64::from(v)),
            AttributeValue::U32(v) => Some(f64::from(v)),
            AttributeValue::U64(v) => Some(v as f64),
            AttributeValue::F32(v) => Some(f64::from(v)),
            AttributeValue::F64(v) => Some(v),
            _ => None,
        }
    }

    /// Non-negative integer scalar as `u64`
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            AttributeValue::I32(v) => u64::try_from(v).ok(),
            AttributeValue::I64(v) => u64::try_from(v).ok(),
            AttributeValue::U8(v) => Some(u64::from(v)),
            AttributeValue::U32(v) => Some(u64::from(v)),
            AttributeValue::U64(v) => Some(v),
            AttributeValue::Bool(v) => Some(u64::from(v)),
            _ => None,
        }
    }

    /// String value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Floating point array widened to `f64`
    pub fn as_vec_f64(&self) -> Option<Vec<f64>> {
        match self {
            AttributeValue::VecF64(v) => Some(v.clone()),
            AttributeValue::VecF32(v) => Some(v.iter().map(|&x| f64::from(x)).collect()),
            _ => None,
        }
    }

    /// Unsigned integer array
    pub fn as_vec_u64(&self) -> Option<Vec<u64>> {
        match self {
            AttributeValue::VecU64(v) => Some(v.clone()),
            AttributeValue::VecI64(v) => v.iter().map(|&x| u64::try_from(x).ok()).collect(),
            _ => None,
        }
    }

    /// String array
    pub fn as_vec_string(&self) -> Option<&[String]> {
        match self {
            AttributeValue::VecString(v) => Some(v),
            _ => None,
        }
    }
}

macro_rules! impl_from {
    ($t:ty, $variant:ident) => {
        impl From<$t> for AttributeValue {
            fn from(value: $t) -> Self {
                AttributeValue::$variant(value)
            }
        }
    };
}

impl_from!(bool, Bool);
impl_from!(i32, I32);
impl_from!(i64, I64);
impl_from!(u8, U8);
impl_from!(u32, U32);
impl_from!(u64, U64);
impl_from!(f32, F32);
impl_from!(f64, F64);
impl_from!(String, String);
impl_from!(Vec<i64>, VecI64);
impl_from!(Vec<u64>, VecU64);
impl_from!(Vec<f32>, VecF32);
impl_from!(Vec<f64>, VecF64);
impl_from!(Vec<String>, VecString);

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<&[f64]> for AttributeValue {
    fn from(value: &[f64]) -> Self {
        AttributeValue::VecF64(value.to_vec())
    }
}

impl From<&[u64]> for AttributeValue {
    fn from(value: &[u64]) -> Self {
        AttributeValue::VecU64(value.to_vec())
    }
}

impl From<&[&str]> for AttributeValue {
    fn from(value: &[&str]) -> Self {
        AttributeValue::VecString(value.iter().map(|s| s.to_string()).collect())
    }
}
