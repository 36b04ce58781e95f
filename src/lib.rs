//! # pmdio - Deferred-Write I/O for openPMD Data
//!
//! `pmdio` writes and reads particle-and-mesh simulation output organized the
//! openPMD way: a series of iterations, each holding meshes and particle
//! species, each made of records and record components backed by
//! n-dimensional datasets.
//!
//! ## Key Features
//!
//! - **Deferred writes**: setters and chunk submissions are recorded in memory
//!   and only turned into storage operations at an explicit flush, so many
//!   small updates become one ordered batch.
//!
//! - **Interchangeable engines**: the same hierarchy is persisted as a JSON
//!   document, as a directory bundle of Parquet files, or kept in an
//!   in-process memory store for tests.
//!
//! - **Iteration lifecycle**: closed iterations reject further mutation and
//!   release their files; streaming engines publish each flush as one step.
//!
//! - **Collective flushes**: with a [`backend::Communicator`], all ranks
//!   flush together and structural operations are deduplicated and checked
//!   for consistency on rank 0.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pmdio::{Dataset, Series};
//!
//! let series = Series::create("diags/simData_%06T.json")?;
//! series.set_author("Jane Doe <jane@example.org>")?;
//!
//! let iteration = series.iteration(0)?;
//! iteration.set_time(0.0f64)?;
//!
//! let rho = iteration.mesh("rho")?.scalar()?;
//! rho.reset_dataset(Dataset::of::<f64>(vec![64, 64]))?;
//! rho.store_chunk(vec![0.0f64; 64 * 64], vec![0, 0], vec![64, 64])?;
//!
//! let charge = iteration.particle_species("electrons")?.record("charge")?.scalar()?;
//! charge.make_constant(-1.602_176_634e-19f64, vec![1000])?;
//!
//! iteration.close(true)?;
//! series.close()?;
//! # Ok::<(), pmdio::PmdError>(())
//! ```
//!
//! ## Reading
//!
//! ```rust,no_run
//! use pmdio::{Access, Series};
//!
//! let series = Series::open("diags/simData_%06T.json", Access::ReadOnly)?;
//! for index in series.iteration_indices() {
//!     let rho = series.iteration(index)?.mesh("rho")?.scalar()?;
//!     let chunk = rho.load_chunk::<f64>(vec![0, 0], vec![64, 64])?;
//!     series.flush()?;
//!     println!("iteration {index}: rho[0] = {}", chunk.get()?[0]);
//! }
//! # Ok::<(), pmdio::PmdError>(())
//! ```
//!
//! ## Architecture
//!
//! - [`series`]: user-facing handles (series, iterations, meshes, records)
//! - [`hierarchy`]: node arena with dirty tracking
//! - [`attribute`]: typed attribute values and per-node stores
//! - [`task`]: backend task vocabulary and queue
//! - [`flush`]: flush scheduler turning dirty nodes into ordered tasks
//! - [`close`]: iteration close state machine
//! - [`backend`]: storage engines and the collective wrapper
//! - [`config`]: TOML series configuration with environment overrides

#![warn(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]

pub mod attribute;
pub mod backend;
pub mod close;
pub mod config;
pub mod data;
pub mod error;
pub mod flush;
pub mod hierarchy;
pub mod series;
pub mod task;

pub use attribute::{AttributeValue, Attributes};
pub use close::CloseStatus;
pub use config::{Access, ParallelMode, SeriesConfig};
pub use data::{Buffer, Dataset, Datatype, Element, Extent, FloatElement, Offset};
pub use error::{PmdError, Result};
pub use flush::FlushReport;
pub use hierarchy::SCALAR;
pub use series::{
    Iteration, IterationEncoding, LoadedChunk, Mesh, ParticleSpecies, Record, RecordComponent,
    Series, SeriesBuilder, WriteIterations,
};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::backend::{Backend, LocalCommunicator, MemoryStore};
    pub use crate::{
        Access, AttributeValue, CloseStatus, Dataset, Datatype, FlushReport, Iteration, Mesh,
        ParticleSpecies, PmdError, Record, RecordComponent, Result, Series, SeriesConfig, SCALAR,
    };
}
