//! # Dataset Element Types
//!
//! Typed element buffers and the row-major region arithmetic shared by the
//! frontend (bounds checks before a chunk is queued) and by the storage
//! engines (scatter/gather of chunks into dense datasets).
//!
//! | Datatype | Rust type | Name on disk |
//! |----------|-----------|--------------|
//! | `I32`    | `i32`     | `INT32`      |
//! | `I64`    | `i64`     | `INT64`      |
//! | `U8`     | `u8`      | `UINT8`      |
//! | `U32`    | `u32`     | `UINT32`     |
//! | `U64`    | `u64`     | `UINT64`     |
//! | `F32`    | `f32`     | `FLOAT`      |
//! | `F64`    | `f64`     | `DOUBLE`     |

mod buffer;
mod datatype;
mod selection;


pub use buffer::Buffer;
pub use datatype::{Dataset, Datatype, Element, FloatElement};
pub use selection::{check_region, element_count, Extent, Offset};

pub(crate) use selection::for_each_run;

/// Errors raised by region and datatype checks
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataError {
    /// Buffer element type differs from the declared datatype
    #[error("datatype mismatch: expected {expected}, found {found}")]
    DatatypeMismatch {
        /// Declared datatype
        expected: Datatype,
        /// Datatype actually supplied
        found: Datatype,
    },

    /// Offset and extent have a different rank than the dataset
    #[error("rank mismatch: dataset has {dataset} dimensions, selection has {selection}")]
    RankMismatch {
        /// Dataset rank
        dataset: usize,
        /// Selection rank
        selection: usize,
    },

    /// Selection reaches past the dataset extent
    #[error("selection out of bounds in dimension {dim}: offset {offset} + extent {extent} > {bound}")]
    OutOfBounds {
        /// Offending dimension
        dim: usize,
        /// Offset in that dimension
        offset: u64,
        /// Extent in that dimension
        extent: u64,
        /// Dataset extent in that dimension
        bound: u64,
    },

    /// Buffer length does not match the selection's element count
    #[error("buffer holds {found} elements, selection needs {expected}")]
    LengthMismatch {
        /// Elements required by the selection
        expected: u64,
        /// Elements held by the buffer
        found: u64,
    },
}
