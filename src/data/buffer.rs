use serde::{Deserialize, Serialize};

use super::datatype::{Datatype, Element};
use super::selection::{check_region, element_count, for_each_run};
use super::DataError;

/// Owned, typed element buffer in row-major order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "datatype", content = "values")]
pub enum Buffer {
    /// `i32` elements
    #[serde(rename = "INT32")]
    I32(Vec<i32>),
    /// `i64` elements
    #[serde(rename = "INT64")]
    I64(Vec<i64>),
    /// `u8` elements
    #[serde(rename = "UINT8")]
    U8(Vec<u8>),
    /// `u32` elements
    #[serde(rename = "UINT32")]
    U32(Vec<u32>),
    /// `u64` elements
    #[serde(rename = "UINT64")]
    U64(Vec<u64>),
    /// `f32` elements
    #[serde(rename = "FLOAT")]
    F32(Vec<f32>),
    /// `f64` elements
    #[serde(rename = "DOUBLE")]
    F64(Vec<f64>),
}

macro_rules! map_buffer {
    ($buffer:expr, $values:ident => $body:expr) => {
        match $buffer {
            Buffer::I32($values) => $body,
            Buffer::I64($values) => $body,
            Buffer::U8($values) => $body,
            Buffer::U32($values) => $body,
            Buffer::U64($values) => $body,
            Buffer::F32($values) => $body,
            Buffer::F64($values) => $body,
        }
    };
}

macro_rules! zip_buffers {
    ($dst:expr, $src:expr, $d:ident, $s:ident => $body:expr, else $fallback:expr) => {
        match ($dst, $src) {
            (Buffer::I32($d), Buffer::I32($s)) => $body,
            (Buffer::I64($d), Buffer::I64($s)) => $body,
            (Buffer::U8($d), Buffer::U8($s)) => $body,
            (Buffer::U32($d), Buffer::U32($s)) => $body,
            (Buffer::U64($d), Buffer::U64($s)) => $body,
            (Buffer::F32($d), Buffer::F32($s)) => $body,
            (Buffer::F64($d), Buffer::F64($s)) => $body,
            _ => $fallback,
        }
    };
}

fn scatter<T: Copy>(dst: &mut [T], src: &[T], dataset: &[u64], offset: &[u64], extent: &[u64]) {
    for_each_run(dataset, offset, extent, |ds, ch, n| {
        dst[ds..ds + n].copy_from_slice(&src[ch..ch + n]);
    });
}

fn gather<T: Element>(src: &[T], dataset: &[u64], offset: &[u64], extent: &[u64]) -> Buffer {
    let mut out = vec![T::default(); element_count(extent) as usize];
    for_each_run(dataset, offset, extent, |ds, ch, n| {
        out[ch..ch + n].copy_from_slice(&src[ds..ds + n]);
    });
    T::into_buffer(out)
}

impl Buffer {
    /// Zero-filled buffer of `len` elements
    pub fn zeros(datatype: Datatype, len: usize) -> Self {
        match datatype {
            Datatype::I32 => Buffer::I32(vec![0; len]),
            Datatype::I64 => Buffer::I64(vec![0; len]),
            Datatype::U8 => Buffer::U8(vec![0; len]),
            Datatype::U32 => Buffer::U32(vec![0; len]),
            Datatype::U64 => Buffer::U64(vec![0; len]),
            Datatype::F32 => Buffer::F32(vec![0.0; len]),
            Datatype::F64 => Buffer::F64(vec![0.0; len]),
        }
    }

    /// Empty buffer of the given type
    pub fn empty(datatype: Datatype) -> Self {
        Self::zeros(datatype, 0)
    }

    /// Element datatype
    pub fn datatype(&self) -> Datatype {
        match self {
            Buffer::I32(_) => Datatype::I32,
            Buffer::I64(_) => Datatype::I64,
            Buffer::U8(_) => Datatype::U8,
            Buffer::U32(_) => Datatype::U32,
            Buffer::U64(_) => Datatype::U64,
            Buffer::F32(_) => Datatype::F32,
            Buffer::F64(_) => Datatype::F64,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        map_buffer!(self, values => values.len())
    }

    /// Whether the buffer holds no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Typed view of the elements
    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::from_buffer(self)
    }

    /// Append the elements of another buffer of the same type
    pub fn extend_from(&mut self, other: &Buffer) -> Result<(), DataError> {
        let expected = self.datatype();
        zip_buffers!(self, other, dst, src => {
            dst.extend_from_slice(src);
            Ok(())
        }, else Err(DataError::DatatypeMismatch { expected, found: other.datatype() }))
    }

    /// Copy `chunk` into the region `offset`/`extent` of this dense dataset buffer
    pub fn write_region(
        &mut self,
        dataset: &[u64],
        offset: &[u64],
        extent: &[u64],
        chunk: &Buffer,
    ) -> Result<(), DataError> {
        check_region(dataset, offset, extent)?;
        self.check_len(element_count(dataset))?;
        chunk.check_len(element_count(extent))?;
        let expected = self.datatype();
        zip_buffers!(self, chunk, dst, src => {
            scatter(dst, src, dataset, offset, extent);
            Ok(())
        }, else Err(DataError::DatatypeMismatch { expected, found: chunk.datatype() }))
    }

    /// Copy the region `offset`/`extent` out of this dense dataset buffer
    pub fn read_region(
        &self,
        dataset: &[u64],
        offset: &[u64],
        extent: &[u64],
    ) -> Result<Buffer, DataError> {
        check_region(dataset, offset, extent)?;
        self.check_len(element_count(dataset))?;
        Ok(map_buffer!(self, values => gather(values, dataset, offset, extent)))
    }

    /// Re-layout this dense buffer from extent `old` into a larger extent `new`
    pub fn resized(&self, old: &[u64], new: &[u64]) -> Result<Buffer, DataError> {
        let origin = vec![0u64; new.len()];
        let mut grown = Buffer::zeros(self.datatype(), element_count(new) as usize);
        grown.write_region(new, &origin, old, self)?;
        Ok(grown)
    }

    fn check_len(&self, expected: u64) -> Result<(), DataError> {
        let found = self.len() as u64;
        if found == expected {
            Ok(())
        } else {
            Err(DataError::LengthMismatch { expected, found })
        }
    }
}

impl<T: Element> From<Vec<T>> for Buffer {
    fn from(values: Vec<T>) -> Self {
        T::into_buffer(values)
    }
}
