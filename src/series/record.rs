use std::marker::PhantomData;
use std::sync::{Arc, PoisonError};

use crate::attribute::AttributeValue;
use crate::backend::BackendError;
use crate::data::{check_region, element_count, Buffer, DataError, Dataset, Element, Extent, Offset};
use crate::error::{PmdError, Result};
use crate::hierarchy::{ComponentState, Node, NodeId, Payload, PendingChunk, SCALAR};
use crate::task::{new_slot, slot_is_filled, Slot};

use super::{Handle, SeriesInner};

/// Generic attribute access shared by all record-level handles
macro_rules! impl_attributes {
    ($t:ty) => {
        impl $t {
            /// Set an arbitrary attribute
            pub fn set_attribute(&self, name: &str, value: impl Into<AttributeValue>) -> Result<()> {
                self.handle.set_attribute(name, value)
            }

            /// Read an attribute
            pub fn attribute(&self, name: &str) -> Result<AttributeValue> {
                self.handle.attribute(name)
            }

            /// Names of all attributes
            pub fn attribute_names(&self) -> Result<Vec<String>> {
                self.handle.attribute_names()
            }

            /// Whether anything here awaits a flush
            pub fn is_dirty(&self) -> bool {
                self.handle.is_dirty()
            }
        }
    };
}

const NO_UNITS: [f64; 7] = [0.0; 7];

/// Component `name` of a mesh or record.
///
/// A record holds either a single [`SCALAR`] component or any number of
/// named ones; mixing both fails with `InvalidState`.
fn component(handle: &Handle, name: &str, make: fn(&str) -> Node) -> Result<RecordComponent> {
    {
        let mut inner = handle.lock();
        inner.ensure_parsed(handle.id)?;
        if let Some(id) = inner.tree.child(handle.id, name) {
            return Ok(RecordComponent::new(handle.at(id)));
        }
        let siblings = inner.tree.children(handle.id);
        let clash = if name == SCALAR {
            !siblings.is_empty()
        } else {
            siblings.iter().any(|&c| inner.tree.node(c).name == SCALAR)
        };
        if clash {
            return Err(PmdError::InvalidState(format!(
                "{} cannot mix a {SCALAR} component with named components",
                inner.tree.logical_path(handle.id)
            )));
        }
    }
    let child = handle.child_or_insert(name, || make(name))?;
    Ok(RecordComponent::new(child))
}

fn unit_dimension(handle: &Handle) -> Result<[f64; 7]> {
    let values = handle.vec_f64_attribute("unitDimension")?;
    let len = values.len();
    values.try_into().map_err(|_| {
        PmdError::TypeMismatch(format!("unitDimension has {len} entries, expected 7"))
    })
}

/// Mesh record: a field sampled on a grid
#[derive(Debug, Clone)]
pub struct Mesh {
    handle: Handle,
}

impl_attributes!(Mesh);

impl Mesh {
    pub(crate) fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Fresh mesh node carrying the required attributes
    pub(crate) fn node(name: &str) -> Node {
        let mut node = Node::new(name, Payload::Mesh);
        let attributes = &mut node.attributes;
        attributes.set("geometry", "cartesian");
        attributes.set("dataOrder", "C");
        attributes.set("axisLabels", vec!["x".to_string()]);
        attributes.set("gridSpacing", vec![1.0f64]);
        attributes.set("gridGlobalOffset", vec![0.0f64]);
        attributes.set("gridUnitSI", 1.0f64);
        attributes.set("unitDimension", NO_UNITS.to_vec());
        attributes.set("timeOffset", 0.0f64);
        node
    }

    fn component_node(name: &str) -> Node {
        let mut node = Node::new(name, Payload::Component(ComponentState::default()));
        node.attributes.set("position", vec![0.0f64]);
        node.attributes.set("unitSI", 1.0f64);
        node
    }

    /// Named component such as `x`, created on first reference
    pub fn component(&self, name: &str) -> Result<RecordComponent> {
        component(&self.handle, name, Self::component_node)
    }

    /// The single [`SCALAR`] component
    pub fn scalar(&self) -> Result<RecordComponent> {
        self.component(SCALAR)
    }

    /// Names of all components
    pub fn component_names(&self) -> Result<Vec<String>> {
        self.handle.child_names()
    }

    /// Grid geometry, e.g. `cartesian`
    pub fn geometry(&self) -> Result<String> {
        self.handle.string_attribute("geometry")
    }

    /// Set the grid geometry
    pub fn set_geometry(&self, geometry: &str) -> Result<()> {
        self.handle.set_attribute("geometry", geometry)
    }

    /// Set the memory layout, `C` or `F`
    pub fn set_data_order(&self, order: &str) -> Result<()> {
        self.handle.set_attribute("dataOrder", order)
    }

    /// Axis labels, slowest varying first
    pub fn axis_labels(&self) -> Result<Vec<String>> {
        let value = self.handle.attribute("axisLabels")?;
        value
            .as_vec_string()
            .map(<[String]>::to_vec)
            .ok_or_else(|| {
                PmdError::TypeMismatch(format!(
                    "axisLabels holds {}, expected strings",
                    value.type_name()
                ))
            })
    }

    /// Set the axis labels
    pub fn set_axis_labels(&self, labels: &[&str]) -> Result<()> {
        self.handle.set_attribute("axisLabels", labels)
    }

    /// Grid spacing per axis
    pub fn grid_spacing(&self) -> Result<Vec<f64>> {
        self.handle.vec_f64_attribute("gridSpacing")
    }

    /// Set the grid spacing per axis
    pub fn set_grid_spacing(&self, spacing: &[f64]) -> Result<()> {
        self.handle.set_attribute("gridSpacing", spacing)
    }

    /// Set the global offset of the grid origin per axis
    pub fn set_grid_global_offset(&self, offset: &[f64]) -> Result<()> {
        self.handle.set_attribute("gridGlobalOffset", offset)
    }

    /// Set the conversion factor of grid spacing to meters
    pub fn set_grid_unit_si(&self, unit: f64) -> Result<()> {
        self.handle.set_attribute("gridUnitSI", unit)
    }

    /// Powers of the seven SI base units
    pub fn unit_dimension(&self) -> Result<[f64; 7]> {
        unit_dimension(&self.handle)
    }

    /// Set the powers of L, M, T, I, θ, N, J
    pub fn set_unit_dimension(&self, dimension: [f64; 7]) -> Result<()> {
        self.handle.set_attribute("unitDimension", dimension.to_vec())
    }

    /// Set the time offset relative to the iteration time
    pub fn set_time_offset(&self, offset: f64) -> Result<()> {
        self.handle.set_attribute("timeOffset", offset)
    }
}

/// Group of particle records such as `electrons`
#[derive(Debug, Clone)]
pub struct ParticleSpecies {
    handle: Handle,
}

impl_attributes!(ParticleSpecies);

impl ParticleSpecies {
    pub(crate) fn new(handle: Handle) -> Self {
        Self { handle }
    }

    fn record_node(name: &str) -> Node {
        let mut node = Node::new(name, Payload::Record);
        node.attributes.set("unitDimension", NO_UNITS.to_vec());
        node.attributes.set("timeOffset", 0.0f64);
        node
    }

    /// Record `name`, e.g. `position`, created on first reference
    pub fn record(&self, name: &str) -> Result<Record> {
        let handle = self
            .handle
            .child_or_insert(name, || Self::record_node(name))?;
        Ok(Record { handle })
    }

    /// Names of all records
    pub fn record_names(&self) -> Result<Vec<String>> {
        self.handle.child_names()
    }
}

/// Particle record such as `position` or `charge`
#[derive(Debug, Clone)]
pub struct Record {
    handle: Handle,
}

impl_attributes!(Record);

impl Record {
    fn component_node(name: &str) -> Node {
        let mut node = Node::new(name, Payload::Component(ComponentState::default()));
        node.attributes.set("unitSI", 1.0f64);
        node
    }

    /// Named component, created on first reference
    pub fn component(&self, name: &str) -> Result<RecordComponent> {
        component(&self.handle, name, Self::component_node)
    }

    /// The single [`SCALAR`] component
    pub fn scalar(&self) -> Result<RecordComponent> {
        self.component(SCALAR)
    }

    /// Names of all components
    pub fn component_names(&self) -> Result<Vec<String>> {
        self.handle.child_names()
    }

    /// Powers of the seven SI base units
    pub fn unit_dimension(&self) -> Result<[f64; 7]> {
        unit_dimension(&self.handle)
    }

    /// Set the powers of L, M, T, I, θ, N, J
    pub fn set_unit_dimension(&self, dimension: [f64; 7]) -> Result<()> {
        self.handle.set_attribute("unitDimension", dimension.to_vec())
    }

    /// Set the time offset relative to the iteration time
    pub fn set_time_offset(&self, offset: f64) -> Result<()> {
        self.handle.set_attribute("timeOffset", offset)
    }
}

fn component_state(inner: &mut SeriesInner, id: NodeId) -> Result<&mut ComponentState> {
    let path = inner.tree.logical_path(id);
    inner
        .tree
        .node_mut(id)
        .component_mut()
        .ok_or_else(|| PmdError::InvalidState(format!("{path} is not a record component")))
}

/// Leaf of the hierarchy: one dataset or one constant
#[derive(Debug, Clone)]
pub struct RecordComponent {
    handle: Handle,
}

impl_attributes!(RecordComponent);

impl RecordComponent {
    pub(crate) fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Declare or grow the dataset.
    ///
    /// Before the first flush the declaration may change freely. Afterwards
    /// only the extent may grow, and only on engines with resizable datasets.
    pub fn reset_dataset(&self, dataset: Dataset) -> Result<()> {
        let mut inner = self.handle.lock();
        let id = self.handle.id;
        inner.ensure_parsed(id)?;
        inner.check_mutable(id)?;
        let resizable = inner.backend.capabilities().resizable_datasets;
        let engine = inner.backend.name();
        let path = inner.tree.logical_path(id);

        let state = component_state(&mut inner, id)?;
        if state.constant {
            return Err(PmdError::InvalidState(format!(
                "{path} holds a constant and cannot be given a dataset"
            )));
        }
        if let (Some(current), true) = (&state.dataset, state.dataset_created) {
            if current.datatype != dataset.datatype {
                return Err(PmdError::TypeMismatch(format!(
                    "{path} was declared as {}, cannot change to {}",
                    current.datatype, dataset.datatype
                )));
            }
            if current.rank() != dataset.rank() {
                return Err(PmdError::TypeMismatch(format!(
                    "{path} has rank {}, cannot change to {}",
                    current.rank(),
                    dataset.rank()
                )));
            }
            if dataset.extent.iter().zip(&current.extent).any(|(new, old)| new < old) {
                return Err(PmdError::TypeMismatch(format!(
                    "{path} cannot shrink from {:?} to {:?}",
                    current.extent, dataset.extent
                )));
            }
            if dataset.extent != current.extent {
                if !resizable {
                    return Err(BackendError::Unsupported(format!(
                        "the {engine} engine cannot resize {path}"
                    ))
                    .into());
                }
                state.extended = true;
            }
        }
        state.dataset = Some(dataset);
        inner.tree.mark_dirty(id);
        Ok(())
    }

    /// Declared dataset, if any
    pub fn dataset(&self) -> Option<Dataset> {
        let inner = self.handle.lock();
        inner
            .tree
            .node(self.handle.id)
            .component()
            .and_then(|s| s.dataset.clone())
    }

    /// Store one value for the whole `extent` without writing a dataset
    pub fn make_constant<T: Element>(&self, value: T, extent: impl Into<Extent>) -> Result<()> {
        let extent: Extent = extent.into();
        let mut inner = self.handle.lock();
        let id = self.handle.id;
        inner.ensure_parsed(id)?;
        inner.check_mutable(id)?;
        let path = inner.tree.logical_path(id);

        let state = component_state(&mut inner, id)?;
        if state.dataset_created || !state.pending.is_empty() {
            return Err(PmdError::InvalidState(format!(
                "{path} already holds chunk data and cannot become constant"
            )));
        }
        state.constant = true;
        state.dataset = Some(Dataset::new(T::DATATYPE, extent.clone()));

        let attributes = &mut inner.tree.node_mut(id).attributes;
        attributes.set("value", value.into_attribute());
        attributes.set("shape", extent);
        inner.tree.mark_dirty(id);
        Ok(())
    }

    /// Whether the component is a constant
    pub fn is_constant(&self) -> bool {
        let inner = self.handle.lock();
        inner
            .tree
            .node(self.handle.id)
            .component()
            .map_or(false, |s| s.constant)
    }

    /// The constant value
    pub fn constant_value<T: Element>(&self) -> Result<T> {
        if !self.is_constant() {
            return Err(PmdError::InvalidState(
                "component is not a constant".to_string(),
            ));
        }
        let value = self.handle.attribute("value")?;
        T::from_attribute(&value).ok_or_else(|| {
            PmdError::TypeMismatch(format!(
                "constant holds {}, requested {}",
                value.type_name(),
                T::DATATYPE
            ))
        })
    }

    /// Conversion factor of the values to SI units
    pub fn unit_si(&self) -> Result<f64> {
        self.handle.f64_attribute("unitSI")
    }

    /// Set the conversion factor to SI units
    pub fn set_unit_si(&self, unit: f64) -> Result<()> {
        self.handle.set_attribute("unitSI", unit)
    }

    /// Validate a chunk selection against the declared dataset
    fn checked_dataset<T: Element>(
        state: &ComponentState,
        path: &str,
        offset: &[u64],
        extent: &[u64],
    ) -> Result<Dataset> {
        if state.constant {
            return Err(PmdError::InvalidState(format!(
                "{path} is a constant and holds no chunks"
            )));
        }
        let dataset = state.dataset.clone().ok_or_else(|| {
            PmdError::InvalidState(format!("{path} has no dataset, call reset_dataset first"))
        })?;
        if dataset.datatype != T::DATATYPE {
            return Err(DataError::DatatypeMismatch {
                expected: dataset.datatype,
                found: T::DATATYPE,
            }
            .into());
        }
        check_region(&dataset.extent, offset, extent)?;
        Ok(dataset)
    }

    /// Queue `data` for the region at `offset` of size `extent`.
    ///
    /// The data is owned by the queue until a flush writes it.
    pub fn store_chunk<T: Element>(
        &self,
        data: Vec<T>,
        offset: impl Into<Offset>,
        extent: impl Into<Extent>,
    ) -> Result<()> {
        let (offset, extent): (Offset, Extent) = (offset.into(), extent.into());
        let mut inner = self.handle.lock();
        let id = self.handle.id;
        inner.ensure_parsed(id)?;
        inner.check_mutable(id)?;
        let path = inner.tree.logical_path(id);

        let state = component_state(&mut inner, id)?;
        Self::checked_dataset::<T>(state, &path, &offset, &extent)?;
        let expected = element_count(&extent);
        if data.len() as u64 != expected {
            return Err(PmdError::TypeMismatch(format!(
                "{path}: chunk of extent {extent:?} needs {expected} values, got {}",
                data.len()
            )));
        }
        state.pending.push(PendingChunk::Write {
            offset,
            extent,
            data: Arc::new(Buffer::from(data)),
        });
        inner.tree.mark_dirty(id);
        Ok(())
    }

    /// Request the region at `offset` of size `extent`.
    ///
    /// The returned handle is filled by the next flush.
    pub fn load_chunk<T: Element>(
        &self,
        offset: impl Into<Offset>,
        extent: impl Into<Extent>,
    ) -> Result<LoadedChunk<T>> {
        let (offset, extent): (Offset, Extent) = (offset.into(), extent.into());
        let mut inner = self.handle.lock();
        let id = self.handle.id;
        inner.ensure_parsed(id)?;
        if let Some(it) = inner.tree.owning_iteration(id) {
            if let Some(state) = inner.tree.node(it).iteration() {
                if state.close.is_closed() {
                    return Err(PmdError::InvalidState(format!(
                        "iteration {} is closed, its chunks can no longer be read",
                        state.index
                    )));
                }
            }
        }
        let path = inner.tree.logical_path(id);

        let state = component_state(&mut inner, id)?;
        Self::checked_dataset::<T>(state, &path, &offset, &extent)?;
        let slot = new_slot();
        state.pending.push(PendingChunk::Read {
            offset,
            extent: extent.clone(),
            slot: slot.clone(),
        });
        inner.tree.mark_dirty(id);
        Ok(LoadedChunk {
            slot,
            extent,
            marker: PhantomData,
        })
    }
}

/// Chunk requested by [`RecordComponent::load_chunk`]
#[derive(Debug, Clone)]
pub struct LoadedChunk<T: Element> {
    slot: Slot<Buffer>,
    extent: Extent,
    marker: PhantomData<T>,
}

impl<T: Element> LoadedChunk<T> {
    /// Whether a flush has delivered the data
    pub fn is_ready(&self) -> bool {
        slot_is_filled(&self.slot)
    }

    /// Requested extent
    pub fn extent(&self) -> &[u64] {
        &self.extent
    }

    /// The loaded values, row-major
    pub fn get(&self) -> Result<Vec<T>> {
        let guard = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let buffer = guard.as_ref().ok_or_else(|| {
            PmdError::InvalidState("chunk has not been loaded yet, flush the series first".to_string())
        })?;
        T::from_buffer(buffer).map(<[T]>::to_vec).ok_or_else(|| {
            DataError::DatatypeMismatch {
                expected: T::DATATYPE,
                found: buffer.datatype(),
            }
            .into()
        })
    }
}
