//! # Series Frontend
//!
//! Public handles onto one attached hierarchy:
//!
//! ```text
//! Series
//! └── Iteration (by index)
//!     ├── meshes
//!     │   └── Mesh ── RecordComponent (x, y, z or SCALAR)
//!     └── particles
//!         └── ParticleSpecies ── Record ── RecordComponent
//! ```
//!
//! Every handle is a cheap clone of `(Arc<Mutex<SeriesInner>>, NodeId)`, so
//! all copies observe the same attributes, dirty flags and close state.
//! Setters and chunk submissions only touch memory; backend work happens in
//! [`Series::flush`], [`Iteration::close`] with `flush = true`, and when the
//! [`Series`] is closed or dropped.
//!
//! ## Example
//!
//! ```no_run
//! use pmdio::{Dataset, Series};
//!
//! let series = Series::create("out/data_%T.json")?;
//! let iteration = series.iteration(100)?;
//! let ex = iteration.mesh("E")?.component("x")?;
//! ex.reset_dataset(Dataset::of::<f64>(vec![100]))?;
//! ex.store_chunk((0..100).map(|i| i as f64).collect(), vec![0], vec![100])?;
//! iteration.close(true)?;
//! series.close()?;
//! # Ok::<(), pmdio::PmdError>(())
//! ```

mod iteration;
pub(crate) mod naming;
mod read;
mod record;

#[cfg(test)]
mod tests;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{error, info, warn};

use crate::attribute::AttributeValue;
use crate::backend::{
    Backend, BackendError, CollectiveBackend, ColumnarBackend, Communicator, Format, JsonBackend,
    MemoryStore,
};
use crate::close::CloseStatus;
use crate::config::{Access, SeriesConfig};
use crate::error::{PmdError, Result};
use crate::flush::{
    FlushContext, FlushReport, DEFAULT_BASE_PATH, DEFAULT_MESHES_PATH, DEFAULT_PARTICLES_PATH,
};
use crate::hierarchy::{ContainerKind, IterationState, Node, NodeId, Payload, Tree};

pub use iteration::{Iteration, WriteIterations};
pub use naming::IterationEncoding;
pub use record::{LoadedChunk, Mesh, ParticleSpecies, Record, RecordComponent};

use naming::FileNaming;

/// Version of the standard written into new series
pub const OPENPMD_VERSION: &str = "1.1.0";

/// State owned by one attached series
#[derive(Debug)]
pub(crate) struct SeriesInner {
    pub(crate) tree: Tree,
    pub(crate) backend: Box<dyn Backend>,
    pub(crate) access: Access,
    pub(crate) naming: FileNaming,
    pub(crate) config: SeriesConfig,
    /// Flushes are bracketed in backend steps
    pub(crate) steps: bool,
    pub(crate) finalized: bool,
}

pub(crate) type Shared = Arc<Mutex<SeriesInner>>;

impl SeriesInner {
    pub(crate) fn flush(&mut self, finalize: bool) -> Result<FlushReport> {
        let ctx = FlushContext {
            naming: &self.naming,
            steps: self.steps,
            finalize,
        };
        crate::flush::run(&mut self.tree, self.backend.as_mut(), ctx)
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        if self.access.is_writable() {
            Ok(())
        } else {
            Err(PmdError::InvalidState(format!(
                "series '{}' is opened read-only",
                self.naming.pattern()
            )))
        }
    }

    /// Fail unless `id` may be mutated under the access mode and close state
    pub(crate) fn check_mutable(&self, id: NodeId) -> Result<()> {
        self.check_writable()?;
        if let Some(it) = self.tree.owning_iteration(id) {
            if let Some(state) = self.tree.node(it).iteration() {
                state.close.check_mutable(state.index)?;
            }
        }
        Ok(())
    }

    /// Parse the iteration containing `id` if that was deferred
    pub(crate) fn ensure_parsed(&mut self, id: NodeId) -> Result<()> {
        let Some(it) = self.tree.owning_iteration(id) else {
            return Ok(());
        };
        match self.tree.node(it).iteration() {
            Some(state) if !state.parsed => read::parse_iteration(self, it),
            _ => Ok(()),
        }
    }

    pub(crate) fn set_attribute(&mut self, id: NodeId, name: &str, value: AttributeValue) -> Result<()> {
        self.ensure_parsed(id)?;
        self.check_mutable(id)?;
        self.tree.node_mut(id).attributes.set(name, value);
        self.tree.mark_dirty(id);
        Ok(())
    }

    pub(crate) fn attribute(&mut self, id: NodeId, name: &str) -> Result<AttributeValue> {
        self.ensure_parsed(id)?;
        self.tree
            .node(id)
            .attributes
            .get(name)
            .cloned()
            .ok_or_else(|| {
                PmdError::NotFound(format!(
                    "attribute '{name}' on {}",
                    self.tree.logical_path(id)
                ))
            })
    }

    /// Named child of `parent`, inserted from `make` if missing
    pub(crate) fn child_or_insert(
        &mut self,
        parent: NodeId,
        name: &str,
        make: impl FnOnce() -> Node,
    ) -> Result<NodeId> {
        self.ensure_parsed(parent)?;
        if let Some(id) = self.tree.child(parent, name) {
            return Ok(id);
        }
        if !self.access.is_writable() {
            return Err(PmdError::NotFound(format!(
                "'{name}' under {}",
                self.tree.logical_path(parent)
            )));
        }
        self.check_mutable(parent)?;
        let node = make();
        self.tree.add_child(parent, node)
    }

    pub(crate) fn child_names(&mut self, parent: NodeId) -> Result<Vec<String>> {
        self.ensure_parsed(parent)?;
        Ok(self
            .tree
            .children(parent)
            .iter()
            .map(|&c| self.tree.node(c).name.clone())
            .collect())
    }

    fn root_string(&self, name: &str, default: &str) -> String {
        let root = self.tree.node(self.tree.root());
        root.attributes
            .get(name)
            .and_then(|v| v.as_str())
            .unwrap_or(default)
            .to_string()
    }

    /// Attributes every new series carries
    fn write_defaults(&mut self) {
        let root = self.tree.root();
        let encoding = self.naming.encoding();
        let format = self.naming.iteration_format(DEFAULT_BASE_PATH);
        let date = chrono::Local::now().format("%Y-%m-%d %H:%M:%S %z").to_string();

        let attributes = &mut self.tree.node_mut(root).attributes;
        attributes.set("openPMD", OPENPMD_VERSION);
        attributes.set("openPMDextension", 0u32);
        attributes.set("basePath", DEFAULT_BASE_PATH);
        attributes.set("meshesPath", DEFAULT_MESHES_PATH);
        attributes.set("particlesPath", DEFAULT_PARTICLES_PATH);
        attributes.set("iterationEncoding", encoding.as_str());
        attributes.set("iterationFormat", format);
        attributes.set("date", date);
        attributes.set("software", env!("CARGO_PKG_NAME"));
        attributes.set("softwareVersion", env!("CARGO_PKG_VERSION"));
        self.tree.mark_dirty(root);
    }

    /// Add a new, empty iteration with default attributes
    pub(crate) fn insert_iteration(&mut self, index: u64) -> Result<NodeId> {
        self.check_writable()?;
        let root = self.tree.root();
        let mut node = Node::new(
            index.to_string(),
            Payload::Iteration(IterationState {
                index,
                close: CloseStatus::Open,
                parsed: true,
            }),
        );
        node.attributes.set("time", 0.0f64);
        node.attributes.set("dt", 1.0f64);
        node.attributes.set("timeUnitSI", 1.0f64);
        let id = self.tree.add_child(root, node)?;
        self.tree.add_child(id, Node::container(ContainerKind::Meshes))?;
        self.tree.add_child(id, Node::container(ContainerKind::Particles))?;
        Ok(id)
    }

    /// Close every open iteration and release the backend files
    fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        let root = self.tree.root();
        let iterations = self.tree.children(root).to_vec();
        for it in iterations {
            let Some(state) = self.tree.node_mut(it).iteration_mut() else {
                continue;
            };
            if state.parsed && !state.close.is_closed() {
                state.close = state.close.request_close();
                self.tree.mark_dirty(it);
            }
        }
        let report = self.flush(true)?;
        info!("Closed series {}: {report}", self.naming.pattern());
        Ok(())
    }
}

/// Common part of every handle
#[derive(Debug, Clone)]
pub(crate) struct Handle {
    pub(crate) shared: Shared,
    pub(crate) id: NodeId,
}

impl Handle {
    pub(crate) fn lock(&self) -> MutexGuard<'_, SeriesInner> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle to another node of the same series
    pub(crate) fn at(&self, id: NodeId) -> Handle {
        Handle {
            shared: Arc::clone(&self.shared),
            id,
        }
    }

    pub(crate) fn set_attribute(&self, name: &str, value: impl Into<AttributeValue>) -> Result<()> {
        self.lock().set_attribute(self.id, name, value.into())
    }

    pub(crate) fn attribute(&self, name: &str) -> Result<AttributeValue> {
        self.lock().attribute(self.id, name)
    }

    pub(crate) fn attribute_names(&self) -> Result<Vec<String>> {
        let mut inner = self.lock();
        inner.ensure_parsed(self.id)?;
        Ok(inner
            .tree
            .node(self.id)
            .attributes
            .names()
            .map(str::to_string)
            .collect())
    }

    pub(crate) fn string_attribute(&self, name: &str) -> Result<String> {
        let value = self.attribute(name)?;
        value.as_str().map(str::to_string).ok_or_else(|| {
            PmdError::TypeMismatch(format!(
                "attribute '{name}' holds {}, expected string",
                value.type_name()
            ))
        })
    }

    pub(crate) fn f64_attribute(&self, name: &str) -> Result<f64> {
        let value = self.attribute(name)?;
        value.as_f64().ok_or_else(|| {
            PmdError::TypeMismatch(format!(
                "attribute '{name}' holds {}, expected a number",
                value.type_name()
            ))
        })
    }

    pub(crate) fn vec_f64_attribute(&self, name: &str) -> Result<Vec<f64>> {
        let value = self.attribute(name)?;
        value.as_vec_f64().ok_or_else(|| {
            PmdError::TypeMismatch(format!(
                "attribute '{name}' holds {}, expected a numeric array",
                value.type_name()
            ))
        })
    }

    pub(crate) fn child_or_insert(&self, name: &str, make: impl FnOnce() -> Node) -> Result<Handle> {
        let id = self.lock().child_or_insert(self.id, name, make)?;
        Ok(self.at(id))
    }

    pub(crate) fn child_names(&self) -> Result<Vec<String>> {
        self.lock().child_names(self.id)
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.lock().tree.is_dirty(self.id)
    }
}

/// Attaches a series with non-default settings
#[must_use]
pub struct SeriesBuilder {
    pattern: String,
    access: Access,
    config: Option<SeriesConfig>,
    backend: Option<Box<dyn Backend>>,
    communicator: Option<Box<dyn Communicator>>,
}

impl SeriesBuilder {
    /// Access mode, [`Access::Create`] by default
    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    /// Explicit configuration instead of the defaults
    pub fn config(mut self, config: SeriesConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use this engine instead of choosing one by extension
    pub fn backend(mut self, backend: impl Backend + 'static) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    /// Store the series in an in-process [`MemoryStore`]
    pub fn memory(self, store: &MemoryStore) -> Self {
        self.backend(store.backend())
    }

    /// Run collectively across the ranks of `communicator`
    pub fn communicator(mut self, communicator: impl Communicator + 'static) -> Self {
        self.communicator = Some(Box::new(communicator));
        self
    }

    /// Attach to the storage target
    pub fn open(self) -> Result<Series> {
        let config = self.config.unwrap_or_default().with_env_overrides()?;
        let naming = FileNaming::parse(&self.pattern)?;
        let writable = self.access.is_writable();

        let engine: Box<dyn Backend> = match self.backend {
            Some(backend) => backend,
            None => {
                let format = config
                    .backend
                    .or_else(|| Format::from_path(&self.pattern))
                    .ok_or_else(|| {
                        BackendError::Unsupported(format!(
                            "cannot choose a storage engine for '{}'",
                            self.pattern
                        ))
                    })?;
                match format {
                    Format::Json => Box::new(JsonBackend::new(writable, config.json.pretty)),
                    Format::Parquet => {
                        Box::new(ColumnarBackend::new(writable, config.parquet.clone()))
                    }
                }
            }
        };
        let backend: Box<dyn Backend> = match self.communicator {
            Some(communicator) => Box::new(CollectiveBackend::new(
                engine,
                communicator,
                config.parallel.mode,
            )),
            None => engine,
        };

        let capabilities = backend.capabilities();
        let steps = config.streaming
            && writable
            && capabilities.steps
            && naming.encoding() == IterationEncoding::GroupBased;
        if config.streaming && !steps {
            warn!(
                "Streaming requested for '{}' but the {} engine cannot write steps in this layout or access mode; flushing without steps",
                self.pattern,
                backend.name()
            );
        }

        let root = if self.access.reads_existing() {
            Node::loaded("series", Payload::Series)
        } else {
            Node::new("series", Payload::Series)
        };
        let mut inner = SeriesInner {
            tree: Tree::new(root),
            backend,
            access: self.access,
            naming,
            config,
            steps,
            finalized: false,
        };

        let existing = if self.access.reads_existing() {
            read::read_series(&mut inner)?
        } else {
            false
        };
        if !existing {
            let root = inner.tree.root();
            inner.tree.node_mut(root).written = false;
            inner.write_defaults();
        }

        info!(
            "Attached series {} ({:?}, {} engine, {})",
            self.pattern,
            self.access,
            inner.backend.name(),
            inner.naming.encoding().as_str()
        );
        let root = inner.tree.root();
        Ok(Series {
            handle: Handle {
                shared: Arc::new(Mutex::new(inner)),
                id: root,
            },
        })
    }
}

/// Root of an attached hierarchy.
///
/// Dropping the series closes every open iteration and flushes; errors in
/// that final flush can only be logged, so prefer [`Series::close`].
#[derive(Debug)]
pub struct Series {
    handle: Handle,
}

impl Series {
    /// Create a new series, choosing the engine by extension
    pub fn create(pattern: impl Into<String>) -> Result<Series> {
        Self::builder(pattern).open()
    }

    /// Attach to an existing series
    pub fn open(pattern: impl Into<String>, access: Access) -> Result<Series> {
        Self::builder(pattern).access(access).open()
    }

    /// Builder for non-default settings
    pub fn builder(pattern: impl Into<String>) -> SeriesBuilder {
        SeriesBuilder {
            pattern: pattern.into(),
            access: Access::Create,
            config: None,
            backend: None,
            communicator: None,
        }
    }

    /// Access mode the series was attached with
    pub fn access(&self) -> Access {
        self.handle.lock().access
    }

    /// File-based or group-based layout
    pub fn iteration_encoding(&self) -> IterationEncoding {
        self.handle.lock().naming.encoding()
    }

    /// Whether flushes are bracketed in streaming steps
    pub fn is_streaming(&self) -> bool {
        self.handle.lock().steps
    }

    /// Active configuration
    pub fn config(&self) -> SeriesConfig {
        self.handle.lock().config.clone()
    }

    /// Set a series attribute
    pub fn set_attribute(&self, name: &str, value: impl Into<AttributeValue>) -> Result<()> {
        self.handle.set_attribute(name, value)
    }

    /// Read a series attribute
    pub fn attribute(&self, name: &str) -> Result<AttributeValue> {
        self.handle.attribute(name)
    }

    /// Names of all series attributes
    pub fn attribute_names(&self) -> Result<Vec<String>> {
        self.handle.attribute_names()
    }

    /// `openPMD` standard version
    pub fn openpmd_version(&self) -> Result<String> {
        self.handle.string_attribute("openPMD")
    }

    /// `basePath`, e.g. `/data/%T/`
    pub fn base_path(&self) -> Result<String> {
        self.handle.string_attribute("basePath")
    }

    /// `meshesPath`, e.g. `meshes/`
    pub fn meshes_path(&self) -> Result<String> {
        self.handle.string_attribute("meshesPath")
    }

    /// Rename the per-iteration mesh group
    pub fn set_meshes_path(&self, path: &str) -> Result<()> {
        self.handle.set_attribute("meshesPath", with_trailing_slash(path))
    }

    /// `particlesPath`, e.g. `particles/`
    pub fn particles_path(&self) -> Result<String> {
        self.handle.string_attribute("particlesPath")
    }

    /// Rename the per-iteration particle group
    pub fn set_particles_path(&self, path: &str) -> Result<()> {
        self.handle.set_attribute("particlesPath", with_trailing_slash(path))
    }

    /// `author`
    pub fn author(&self) -> Result<String> {
        self.handle.string_attribute("author")
    }

    /// Set `author`
    pub fn set_author(&self, author: &str) -> Result<()> {
        self.handle.set_attribute("author", author)
    }

    /// `software`
    pub fn software(&self) -> Result<String> {
        self.handle.string_attribute("software")
    }

    /// Set `software` and `softwareVersion`
    pub fn set_software(&self, name: &str, version: &str) -> Result<()> {
        self.handle.set_attribute("software", name)?;
        self.handle.set_attribute("softwareVersion", version)
    }

    /// `comment`
    pub fn comment(&self) -> Result<String> {
        self.handle.string_attribute("comment")
    }

    /// Set `comment`
    pub fn set_comment(&self, comment: &str) -> Result<()> {
        self.handle.set_attribute("comment", comment)
    }

    /// `date` of creation
    pub fn date(&self) -> Result<String> {
        self.handle.string_attribute("date")
    }

    /// Iteration `index`, created on first reference when writable
    pub fn iteration(&self, index: u64) -> Result<Iteration> {
        let mut inner = self.handle.lock();
        let id = match inner.tree.iteration_by_index(index) {
            Some(id) => id,
            None if inner.access.is_writable() => inner.insert_iteration(index)?,
            None => {
                return Err(PmdError::NotFound(format!(
                    "iteration {index} in '{}'",
                    inner.naming.pattern()
                )))
            }
        };
        drop(inner);
        Ok(Iteration::new(self.handle.at(id), index))
    }

    /// Indices of all known iterations in ascending order
    pub fn iteration_indices(&self) -> Vec<u64> {
        let inner = self.handle.lock();
        let root = inner.tree.root();
        inner
            .tree
            .children(root)
            .iter()
            .filter_map(|&c| inner.tree.node(c).iteration().map(|s| s.index))
            .collect()
    }

    /// Whether iteration `index` exists
    pub fn contains_iteration(&self, index: u64) -> bool {
        self.handle.lock().tree.iteration_by_index(index).is_some()
    }

    /// Writer that closes each iteration before handing out the next
    pub fn write_iterations(&self) -> WriteIterations {
        WriteIterations::new(self.handle.clone())
    }

    /// Propagate all pending mutations to the backend
    pub fn flush(&self) -> Result<FlushReport> {
        self.handle.lock().flush(false)
    }

    /// Whether anything is waiting for a flush
    pub fn is_dirty(&self) -> bool {
        self.handle.is_dirty()
    }

    /// Close all open iterations, flush and release the backend
    pub fn close(self) -> Result<()> {
        let mut inner = self.handle.lock();
        inner.finalize()
    }
}

impl Drop for Series {
    fn drop(&mut self) {
        let mut inner = self.handle.lock();
        if let Err(e) = inner.finalize() {
            error!(
                "Final flush of series {} failed: {e}",
                inner.naming.pattern()
            );
        }
    }
}

fn with_trailing_slash(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    format!("{trimmed}/")
}
