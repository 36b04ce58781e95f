//! # Backend Protocol
//!
//! Every storage engine integrates by implementing [`Backend`]: accept a
//! [`Task`], execute it (or enqueue it when the engine batches), force
//! completion on [`Backend::flush`], and report its [`Capabilities`]. The
//! engine owns physical layout entirely; the frontend never looks at engine
//! state, it only issues tasks and reads results or errors.
//!
//! ## Engines
//!
//! | Engine | Selected by | Physical file |
//! |--------|-------------|---------------|
//! | [`JsonBackend`] | `.json` | one JSON document per file |
//! | [`ColumnarBackend`] | `.parquet` | directory bundle, one Parquet file per dataset |
//! | [`MemoryBackend`] | explicit | in-process [`MemoryStore`] |
//!
//! [`CollectiveBackend`] wraps any engine for execution across the ranks of
//! a [`Communicator`].

mod collective;
mod columnar;
mod communicator;
mod error;
mod json;
mod memory;
mod stored;


use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::task::Task;

pub use collective::CollectiveBackend;
pub use columnar::ColumnarBackend;
pub use communicator::{Communicator, LocalCommunicator, Verdict};
pub use error::BackendError;
pub use json::JsonBackend;
pub use memory::{MemoryBackend, MemoryStore};

/// Feature set of a storage engine, queried once at attach time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Chunk writes from all ranks are issued together at a collective flush
    pub collective_chunk_writes: bool,
    /// Datasets may grow after creation
    pub resizable_datasets: bool,
    /// Constant record components are representable
    pub constant_records: bool,
    /// Streaming steps (`AdvanceStep`) are meaningful
    pub steps: bool,
    /// Independent instances see each other's writes immediately
    pub shared_storage: bool,
}

impl Capabilities {
    /// Whether chunk writes are executed collectively
    pub fn supports_collective_chunk_writes(&self) -> bool {
        self.collective_chunk_writes
    }

    /// Whether datasets may be extended
    pub fn supports_resizable_datasets(&self) -> bool {
        self.resizable_datasets
    }

    /// Whether constant components are supported
    pub fn supports_constant_records(&self) -> bool {
        self.constant_records
    }
}

/// Contract every storage engine satisfies
pub trait Backend: Send + fmt::Debug {
    /// Apply one task, or enqueue it if the engine batches
    fn execute(&mut self, task: Task) -> Result<(), BackendError>;

    /// Complete everything enqueued so far
    fn flush(&mut self) -> Result<(), BackendError>;

    /// Engine feature set
    fn capabilities(&self) -> Capabilities;

    /// Engine name for logging
    fn name(&self) -> &'static str;
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn execute(&mut self, task: Task) -> Result<(), BackendError> {
        (**self).execute(task)
    }

    fn flush(&mut self) -> Result<(), BackendError> {
        (**self).flush()
    }

    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// File-backed engine selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Hierarchical JSON documents
    Json,
    /// Columnar Parquet bundles
    Parquet,
}

impl Format {
    /// Sniff the engine from a path's extension
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?;
        Self::from_name(ext)
    }

    /// Parse an engine name or extension
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "json" => Some(Format::Json),
            "parquet" | "pq" => Some(Format::Parquet),
            _ => None,
        }
    }
}
