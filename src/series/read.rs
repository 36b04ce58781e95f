//! Rebuilds the node tree from an existing series.
//!
//! Everything here runs synchronously against the backend: each query is a
//! single read task whose slot is answered within `execute`. Loaded nodes are
//! clean and written, so reading never produces work for the next flush.

use log::debug;

use crate::attribute::AttributeValue;
use crate::backend::{Backend, BackendError};
use crate::close::CloseStatus;
use crate::config::Access;
use crate::data::{Dataset, Datatype};
use crate::error::{PmdError, Result};
use crate::flush::{DEFAULT_BASE_PATH, DEFAULT_MESHES_PATH, DEFAULT_PARTICLES_PATH};
use crate::hierarchy::{ComponentState, ContainerKind, IterationState, Node, NodeId, Payload, SCALAR};
use crate::task::{new_slot, take_slot, Location, Slot, Task, TaskKind};

use super::naming::{container_name, iteration_path, iterations_group, IterationEncoding};
use super::SeriesInner;

/// Attributes of a scalar record that belong to its component
const COMPONENT_ATTRIBUTES: [&str; 4] = ["unitSI", "value", "shape", "position"];

fn query<T>(
    backend: &mut dyn Backend,
    target: NodeId,
    location: &Location,
    make: impl FnOnce(Slot<T>) -> TaskKind,
) -> Result<T> {
    let slot = new_slot();
    let kind = make(slot.clone());
    let name = kind.name();
    backend.execute(Task::new(target, location.clone(), kind))?;
    take_slot(&slot).ok_or_else(|| {
        PmdError::InvalidState(format!(
            "{} engine left {name} at {location} unanswered",
            backend.name()
        ))
    })
}

fn list_paths(backend: &mut dyn Backend, target: NodeId, location: &Location) -> Result<Vec<String>> {
    query(backend, target, location, |slot| TaskKind::ListPaths { slot })
}

fn list_datasets(
    backend: &mut dyn Backend,
    target: NodeId,
    location: &Location,
) -> Result<Vec<String>> {
    query(backend, target, location, |slot| TaskKind::ListDatasets { slot })
}

fn read_attributes(
    backend: &mut dyn Backend,
    target: NodeId,
    location: &Location,
) -> Result<Vec<(String, AttributeValue)>> {
    let names = query(backend, target, location, |slot| TaskKind::ListAttributes { slot })?;
    names
        .into_iter()
        .map(|name| {
            let value = query(backend, target, location, |slot| TaskKind::ReadAttribute {
                name: name.clone(),
                slot,
            })?;
            Ok((name, value))
        })
        .collect()
}

fn load_attributes(inner: &mut SeriesInner, id: NodeId, attributes: Vec<(String, AttributeValue)>) {
    let store = &mut inner.tree.node_mut(id).attributes;
    for (name, value) in attributes {
        store.load(name, value);
    }
}

fn open_file(inner: &mut SeriesInner, file: &str) -> Result<()> {
    let root = inner.tree.root();
    inner
        .backend
        .execute(Task::new(root, Location::root(file), TaskKind::OpenFile))?;
    Ok(())
}

/// Add a not yet parsed iteration node with empty containers
fn add_iteration(inner: &mut SeriesInner, index: u64) -> Result<NodeId> {
    // existing iterations are frozen when appending
    let close = match inner.access {
        Access::Append => CloseStatus::ClosedInBackend,
        _ => CloseStatus::Open,
    };
    let root = inner.tree.root();
    let id = inner.tree.add_child(
        root,
        Node::loaded(
            index.to_string(),
            Payload::Iteration(IterationState {
                index,
                close,
                parsed: false,
            }),
        ),
    )?;
    inner.tree.add_child(id, Node::container(ContainerKind::Meshes))?;
    inner.tree.add_child(id, Node::container(ContainerKind::Particles))?;
    Ok(id)
}

/// Read series attributes and the list of iterations.
///
/// Returns `false` when appending to a series that does not exist yet.
pub(crate) fn read_series(inner: &mut SeriesInner) -> Result<bool> {
    let root = inner.tree.root();
    let appending = inner.access == Access::Append;

    let indices = match inner.naming.encoding() {
        IterationEncoding::GroupBased => {
            let file = inner.naming.series_file().to_string();
            match open_file(inner, &file) {
                Err(PmdError::NotFound(_)) if appending => return Ok(false),
                other => other?,
            }
            let location = Location::root(&file);
            let attributes = read_attributes(inner.backend.as_mut(), root, &location)?;
            load_attributes(inner, root, attributes);

            let base = inner.root_string("basePath", DEFAULT_BASE_PATH);
            let group = location.with_path(iterations_group(&base));
            let names = match list_paths(inner.backend.as_mut(), root, &group) {
                Ok(names) => names,
                Err(PmdError::NotFound(_)) => Vec::new(),
                Err(e) => return Err(e),
            };
            let mut indices: Vec<u64> = names.iter().filter_map(|name| name.parse().ok()).collect();
            indices.sort_unstable();
            indices
        }
        IterationEncoding::FileBased => {
            let directory = Location::root(inner.naming.directory());
            let listing = query(inner.backend.as_mut(), root, &directory, |slot| {
                TaskKind::ListFiles { slot }
            });
            let names = match listing {
                Ok(names) => names,
                Err(PmdError::NotFound(_) | PmdError::Backend(BackendError::Io(_))) if appending => {
                    Vec::new()
                }
                Err(e) => return Err(e),
            };
            let mut indices: Vec<u64> = names
                .iter()
                .filter_map(|name| inner.naming.match_file(name))
                .collect();
            indices.sort_unstable();
            indices.dedup();

            let Some(&first) = indices.first() else {
                if appending {
                    return Ok(false);
                }
                return Err(PmdError::NotFound(format!(
                    "no files match '{}'",
                    inner.naming.pattern()
                )));
            };
            let file = inner.naming.file_for(first);
            open_file(inner, &file)?;
            let attributes = read_attributes(inner.backend.as_mut(), root, &Location::root(&file))?;
            load_attributes(inner, root, attributes);
            indices
        }
    };

    let mut ids = Vec::with_capacity(indices.len());
    for index in indices {
        ids.push(add_iteration(inner, index)?);
    }
    debug!(
        "Found {} iterations in {}",
        ids.len(),
        inner.naming.pattern()
    );

    if !inner.config.defer_iteration_parsing {
        for id in ids {
            parse_iteration(inner, id)?;
        }
    }
    Ok(true)
}

/// Read the contents of one iteration
pub(crate) fn parse_iteration(inner: &mut SeriesInner, id: NodeId) -> Result<()> {
    let Some(index) = inner.tree.node(id).iteration().map(|s| s.index) else {
        return Ok(());
    };
    let file = inner.naming.file_for(index);
    if inner.naming.encoding() == IterationEncoding::FileBased {
        open_file(inner, &file)?;
    }

    let base = inner.root_string("basePath", DEFAULT_BASE_PATH);
    let location = Location::root(&file).with_path(iteration_path(&base, index));
    let attributes = read_attributes(inner.backend.as_mut(), id, &location)?;
    load_attributes(inner, id, attributes);

    let groups = list_paths(inner.backend.as_mut(), id, &location)?;
    let meshes = container_name(&inner.root_string("meshesPath", DEFAULT_MESHES_PATH));
    let particles = container_name(&inner.root_string("particlesPath", DEFAULT_PARTICLES_PATH));

    for (kind, node_name, stored_name) in [
        (ContainerKind::Meshes, "meshes", meshes),
        (ContainerKind::Particles, "particles", particles),
    ] {
        if !groups.contains(&stored_name) {
            continue;
        }
        let container = match inner.tree.child(id, node_name) {
            Some(container) => container,
            None => inner.tree.add_child(id, Node::container(kind))?,
        };
        inner.tree.node_mut(container).written = true;
        let container_location = location.join(&stored_name);
        match kind {
            ContainerKind::Meshes => parse_records(inner, container, &container_location, Payload::Mesh)?,
            ContainerKind::Particles => parse_species(inner, container, &container_location)?,
        }
    }

    if let Some(state) = inner.tree.node_mut(id).iteration_mut() {
        state.parsed = true;
    }
    debug!("Parsed iteration {index} from {file}");
    Ok(())
}

fn parse_species(inner: &mut SeriesInner, container: NodeId, location: &Location) -> Result<()> {
    for name in list_paths(inner.backend.as_mut(), container, location)? {
        let species_location = location.join(&name);
        let species = inner
            .tree
            .add_child(container, Node::loaded(name, Payload::ParticleSpecies))?;
        let attributes = read_attributes(inner.backend.as_mut(), species, &species_location)?;
        load_attributes(inner, species, attributes);
        parse_records(inner, species, &species_location, Payload::Record)?;
    }
    Ok(())
}

/// Read the mesh or particle records below `parent`
fn parse_records(
    inner: &mut SeriesInner,
    parent: NodeId,
    location: &Location,
    payload: Payload,
) -> Result<()> {
    for name in list_paths(inner.backend.as_mut(), parent, location)? {
        let record_location = location.join(&name);
        let attributes = read_attributes(inner.backend.as_mut(), parent, &record_location)?;
        let record = inner
            .tree
            .add_child(parent, Node::loaded(name, payload.clone()))?;

        if is_constant(&attributes) && is_leaf(inner, record, &record_location)? {
            let (own, component) = split_scalar(attributes);
            load_attributes(inner, record, own);
            add_constant(inner, record, SCALAR, component)?;
            continue;
        }
        load_attributes(inner, record, attributes);
        parse_components(inner, record, &record_location)?;
    }

    for name in list_datasets(inner.backend.as_mut(), parent, location)? {
        let dataset_location = location.join(&name);
        let attributes = read_attributes(inner.backend.as_mut(), parent, &dataset_location)?;
        let dataset = open_dataset(inner, parent, &dataset_location)?;
        let record = inner
            .tree
            .add_child(parent, Node::loaded(name, payload.clone()))?;
        let (own, component) = split_scalar(attributes);
        load_attributes(inner, record, own);
        add_dataset(inner, record, SCALAR, dataset, component)?;
    }
    Ok(())
}

fn parse_components(inner: &mut SeriesInner, record: NodeId, location: &Location) -> Result<()> {
    for name in list_paths(inner.backend.as_mut(), record, location)? {
        let attributes = read_attributes(inner.backend.as_mut(), record, &location.join(&name))?;
        if !is_constant(&attributes) {
            debug!("Skipping unknown group {}", location.join(&name));
            continue;
        }
        add_constant(inner, record, &name, attributes)?;
    }
    for name in list_datasets(inner.backend.as_mut(), record, location)? {
        let component_location = location.join(&name);
        let attributes = read_attributes(inner.backend.as_mut(), record, &component_location)?;
        let dataset = open_dataset(inner, record, &component_location)?;
        add_dataset(inner, record, &name, dataset, attributes)?;
    }
    Ok(())
}

fn open_dataset(inner: &mut SeriesInner, target: NodeId, location: &Location) -> Result<Dataset> {
    query(inner.backend.as_mut(), target, location, |slot| {
        TaskKind::OpenDataset { slot }
    })
}

fn is_constant(attributes: &[(String, AttributeValue)]) -> bool {
    let has = |key: &str| attributes.iter().any(|(name, _)| name == key);
    has("value") && has("shape")
}

fn is_leaf(inner: &mut SeriesInner, target: NodeId, location: &Location) -> Result<bool> {
    Ok(list_paths(inner.backend.as_mut(), target, location)?.is_empty()
        && list_datasets(inner.backend.as_mut(), target, location)?.is_empty())
}

/// Separate record-level attributes from those of its scalar component
fn split_scalar(
    attributes: Vec<(String, AttributeValue)>,
) -> (Vec<(String, AttributeValue)>, Vec<(String, AttributeValue)>) {
    attributes
        .into_iter()
        .partition(|(name, _)| !COMPONENT_ATTRIBUTES.contains(&name.as_str()))
}

fn datatype_of(value: &AttributeValue) -> Option<Datatype> {
    match value {
        AttributeValue::I32(_) => Some(Datatype::I32),
        AttributeValue::I64(_) => Some(Datatype::I64),
        AttributeValue::U8(_) => Some(Datatype::U8),
        AttributeValue::U32(_) => Some(Datatype::U32),
        AttributeValue::U64(_) => Some(Datatype::U64),
        AttributeValue::F32(_) => Some(Datatype::F32),
        AttributeValue::F64(_) => Some(Datatype::F64),
        _ => None,
    }
}

fn add_constant(
    inner: &mut SeriesInner,
    record: NodeId,
    name: &str,
    attributes: Vec<(String, AttributeValue)>,
) -> Result<()> {
    let find = |key: &str| {
        attributes
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    };
    let datatype = find("value").and_then(datatype_of);
    let shape = find("shape").and_then(AttributeValue::as_vec_u64);
    let (Some(datatype), Some(shape)) = (datatype, shape) else {
        return Err(PmdError::TypeMismatch(format!(
            "constant component {name} under {} has an unreadable value or shape",
            inner.tree.logical_path(record)
        )));
    };

    let state = ComponentState {
        dataset: Some(Dataset::new(datatype, shape)),
        constant: true,
        ..ComponentState::default()
    };
    let id = inner
        .tree
        .add_child(record, Node::loaded(name, Payload::Component(state)))?;
    load_attributes(inner, id, attributes);
    Ok(())
}

fn add_dataset(
    inner: &mut SeriesInner,
    record: NodeId,
    name: &str,
    dataset: Dataset,
    attributes: Vec<(String, AttributeValue)>,
) -> Result<()> {
    let state = ComponentState {
        dataset: Some(dataset),
        dataset_created: true,
        ..ComponentState::default()
    };
    let id = inner
        .tree
        .add_child(record, Node::loaded(name, Payload::Component(state)))?;
    load_attributes(inner, id, attributes);
    Ok(())
}
