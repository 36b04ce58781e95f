use std::fmt;
use std::sync::Arc;

use crate::attribute::AttributeValue;
use crate::data::{Buffer, Dataset, Datatype, Extent, Offset};
use crate::hierarchy::NodeId;

use super::Slot;

/// Physical address of an entity: backend file plus in-file path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    /// Physical file (or bundle) name as given by the naming pattern
    pub file: String,
    /// Slash-separated path inside the file, `/` for the file root
    pub path: String,
}

impl Location {
    /// Root group of a file
    pub fn root(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            path: "/".to_string(),
        }
    }

    /// Location of a named child
    pub fn join(&self, name: &str) -> Self {
        let name = name.trim_matches('/');
        let path = if self.path == "/" {
            format!("/{name}")
        } else {
            format!("{}/{name}", self.path)
        };
        Self {
            file: self.file.clone(),
            path,
        }
    }

    /// Same file, different absolute path
    pub fn with_path(&self, path: impl Into<String>) -> Self {
        Self {
            file: self.file.clone(),
            path: path.into(),
        }
    }

    /// Non-empty path components
    pub fn components(&self) -> Vec<&str> {
        self.path.split('/').filter(|c| !c.is_empty()).collect()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.path)
    }
}

/// Phase of a streaming step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    /// Open a new step
    Begin,
    /// Finalize the current step and publish it to readers
    End,
}

/// Operation requested from a backend
#[derive(Debug, Clone)]
pub enum TaskKind {
    /// Create (truncating) the file at `location.file`
    CreateFile,
    /// Open an existing file; idempotent for an already open file
    OpenFile,
    /// Finalize and release a file
    CloseFile,
    /// Create the group at `location.path`, including missing parents
    CreatePath,
    /// Release a group; no further tasks target it
    ClosePath,
    /// Write one attribute on a group or dataset
    WriteAttribute {
        /// Attribute name
        name: String,
        /// New value
        value: AttributeValue,
    },
    /// Declare a dataset; idempotent when the declaration matches
    CreateDataset {
        /// Element type
        datatype: Datatype,
        /// Global extent
        extent: Extent,
    },
    /// Grow a resizable dataset
    ExtendDataset {
        /// New global extent
        extent: Extent,
    },
    /// Write one chunk
    WriteChunk {
        /// Chunk offset
        offset: Offset,
        /// Chunk extent
        extent: Extent,
        /// Chunk data, shared with the pending queue until the flush succeeds
        data: Arc<Buffer>,
    },
    /// Read one chunk into `slot`
    ReadChunk {
        /// Chunk offset
        offset: Offset,
        /// Chunk extent
        extent: Extent,
        /// Expected datatype
        datatype: Datatype,
        /// Output
        slot: Slot<Buffer>,
    },
    /// Begin or end a streaming step
    AdvanceStep {
        /// Step phase
        mode: StepMode,
    },
    /// List file names in the directory `location.file`
    ListFiles {
        /// Output
        slot: Slot<Vec<String>>,
    },
    /// List child groups of `location.path`
    ListPaths {
        /// Output
        slot: Slot<Vec<String>>,
    },
    /// List child datasets of `location.path`
    ListDatasets {
        /// Output
        slot: Slot<Vec<String>>,
    },
    /// List attribute names of a group or dataset
    ListAttributes {
        /// Output
        slot: Slot<Vec<String>>,
    },
    /// Read one attribute
    ReadAttribute {
        /// Attribute name
        name: String,
        /// Output
        slot: Slot<AttributeValue>,
    },
    /// Inspect an existing dataset
    OpenDataset {
        /// Output
        slot: Slot<Dataset>,
    },
}

impl TaskKind {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::CreateFile => "create-file",
            TaskKind::OpenFile => "open-file",
            TaskKind::CloseFile => "close-file",
            TaskKind::CreatePath => "create-path",
            TaskKind::ClosePath => "close-path",
            TaskKind::WriteAttribute { .. } => "write-attribute",
            TaskKind::CreateDataset { .. } => "create-dataset",
            TaskKind::ExtendDataset { .. } => "extend-dataset",
            TaskKind::WriteChunk { .. } => "write-chunk",
            TaskKind::ReadChunk { .. } => "read-chunk",
            TaskKind::AdvanceStep { .. } => "advance-step",
            TaskKind::ListFiles { .. } => "list-files",
            TaskKind::ListPaths { .. } => "list-paths",
            TaskKind::ListDatasets { .. } => "list-datasets",
            TaskKind::ListAttributes { .. } => "list-attributes",
            TaskKind::ReadAttribute { .. } => "read-attribute",
            TaskKind::OpenDataset { .. } => "open-dataset",
        }
    }

    /// Whether the task only reads from storage
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            TaskKind::OpenFile
                | TaskKind::ReadChunk { .. }
                | TaskKind::ListFiles { .. }
                | TaskKind::ListPaths { .. }
                | TaskKind::ListDatasets { .. }
                | TaskKind::ListAttributes { .. }
                | TaskKind::ReadAttribute { .. }
                | TaskKind::OpenDataset { .. }
        )
    }
}

/// One pending backend operation
#[derive(Debug, Clone)]
pub struct Task {
    /// Node on whose behalf the task was emitted
    pub target: NodeId,
    /// Physical address
    pub location: Location,
    /// Operation and its parameters
    pub kind: TaskKind,
}

impl Task {
    /// Bundle a task
    pub fn new(target: NodeId, location: Location, kind: TaskKind) -> Self {
        Self {
            target,
            location,
            kind,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.name(), self.location)
    }
}
