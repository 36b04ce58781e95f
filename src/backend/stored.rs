//! Hierarchical document shared by the memory and JSON engines.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::attribute::AttributeValue;
use crate::data::{element_count, Buffer, Dataset, Extent};
use crate::task::{fill_slot, Location, TaskKind};

use super::BackendError;

/// Group with nested groups, datasets and attributes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct StoredGroup {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) attributes: BTreeMap<String, AttributeValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) groups: BTreeMap<String, StoredGroup>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) datasets: BTreeMap<String, StoredDataset>,
}

/// Dense dataset in row-major order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct StoredDataset {
    pub(crate) extent: Extent,
    pub(crate) data: Buffer,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) attributes: BTreeMap<String, AttributeValue>,
}

fn split_last<'a>(components: &'a [&'a str]) -> Option<(&'a [&'a str], &'a str)> {
    components
        .split_last()
        .map(|(last, parents)| (parents, *last))
}

fn not_found(location: &Location) -> BackendError {
    BackendError::NotFound(format!("no group or dataset at {location}"))
}

impl StoredGroup {
    fn group(&self, components: &[&str]) -> Option<&StoredGroup> {
        components
            .iter()
            .try_fold(self, |group, name| group.groups.get(*name))
    }

    fn group_mut(&mut self, components: &[&str]) -> Option<&mut StoredGroup> {
        components
            .iter()
            .try_fold(self, |group, name| group.groups.get_mut(*name))
    }

    /// Walk to a group, creating missing levels
    fn ensure_group(&mut self, components: &[&str]) -> Result<&mut StoredGroup, BackendError> {
        let mut group = self;
        for name in components {
            if group.datasets.contains_key(*name) {
                return Err(BackendError::InvalidData(format!(
                    "cannot create group '{name}': a dataset of that name exists"
                )));
            }
            group = group.groups.entry((*name).to_string()).or_default();
        }
        Ok(group)
    }

    fn dataset(&self, components: &[&str]) -> Option<&StoredDataset> {
        let (parents, name) = split_last(components)?;
        self.group(parents)?.datasets.get(name)
    }

    fn dataset_mut(&mut self, components: &[&str]) -> Option<&mut StoredDataset> {
        let (parents, name) = split_last(components)?;
        self.group_mut(parents)?.datasets.get_mut(name)
    }

    /// Attributes of the dataset or group at `components`
    fn attributes(&self, components: &[&str]) -> Option<&BTreeMap<String, AttributeValue>> {
        match self.dataset(components) {
            Some(dataset) => Some(&dataset.attributes),
            None => self.group(components).map(|g| &g.attributes),
        }
    }

    fn attributes_mut(
        &mut self,
        components: &[&str],
    ) -> Option<&mut BTreeMap<String, AttributeValue>> {
        if self.dataset(components).is_some() {
            return self.dataset_mut(components).map(|d| &mut d.attributes);
        }
        self.group_mut(components).map(|g| &mut g.attributes)
    }

    /// Execute a path-level task against this file root.
    ///
    /// File-level tasks (`CreateFile`, `OpenFile`, `CloseFile`, `ListFiles`)
    /// and `AdvanceStep` are the caller's business.
    pub(crate) fn apply(&mut self, location: &Location, kind: TaskKind) -> Result<(), BackendError> {
        let components = location.components();
        match kind {
            TaskKind::CreatePath => {
                self.ensure_group(&components)?;
            }
            TaskKind::ClosePath => {}
            TaskKind::WriteAttribute { name, value } => {
                let attributes = self
                    .attributes_mut(&components)
                    .ok_or_else(|| not_found(location))?;
                attributes.insert(name, value);
            }
            TaskKind::CreateDataset { datatype, extent } => {
                let (parents, name) = split_last(&components).ok_or_else(|| {
                    BackendError::InvalidData("a dataset cannot live at the file root".to_string())
                })?;
                let parent = self.ensure_group(parents)?;
                if parent.groups.contains_key(name) {
                    return Err(BackendError::InvalidData(format!(
                        "cannot create dataset {location}: a group of that name exists"
                    )));
                }
                match parent.datasets.get(name) {
                    Some(existing)
                        if existing.data.datatype() == datatype && existing.extent == extent => {}
                    Some(existing) => {
                        return Err(BackendError::InvalidData(format!(
                            "dataset {location} already declared as {} {:?}",
                            existing.data.datatype(),
                            existing.extent
                        )))
                    }
                    None => {
                        let data = Buffer::zeros(datatype, element_count(&extent) as usize);
                        parent.datasets.insert(
                            name.to_string(),
                            StoredDataset {
                                extent,
                                data,
                                attributes: BTreeMap::new(),
                            },
                        );
                    }
                }
            }
            TaskKind::ExtendDataset { extent } => {
                let dataset = self
                    .dataset_mut(&components)
                    .ok_or_else(|| not_found(location))?;
                let shrinks = extent.len() != dataset.extent.len()
                    || extent.iter().zip(&dataset.extent).any(|(new, old)| new < old);
                if shrinks {
                    return Err(BackendError::InvalidData(format!(
                        "cannot resize {location} from {:?} to {extent:?}",
                        dataset.extent
                    )));
                }
                dataset.data = dataset.data.resized(&dataset.extent, &extent)?;
                dataset.extent = extent;
            }
            TaskKind::WriteChunk {
                offset,
                extent,
                data,
            } => {
                let dataset = self
                    .dataset_mut(&components)
                    .ok_or_else(|| not_found(location))?;
                dataset
                    .data
                    .write_region(&dataset.extent, &offset, &extent, &data)?;
            }
            TaskKind::ReadChunk {
                offset,
                extent,
                datatype,
                slot,
            } => {
                let dataset = self.dataset(&components).ok_or_else(|| not_found(location))?;
                if dataset.data.datatype() != datatype {
                    return Err(BackendError::InvalidData(format!(
                        "dataset {location} holds {}, requested {datatype}",
                        dataset.data.datatype()
                    )));
                }
                let chunk = dataset.data.read_region(&dataset.extent, &offset, &extent)?;
                fill_slot(&slot, chunk);
            }
            TaskKind::ListPaths { slot } => {
                let group = self.group(&components).ok_or_else(|| not_found(location))?;
                fill_slot(&slot, group.groups.keys().cloned().collect());
            }
            TaskKind::ListDatasets { slot } => {
                let group = self.group(&components).ok_or_else(|| not_found(location))?;
                fill_slot(&slot, group.datasets.keys().cloned().collect());
            }
            TaskKind::ListAttributes { slot } => {
                let attributes = self
                    .attributes(&components)
                    .ok_or_else(|| not_found(location))?;
                fill_slot(&slot, attributes.keys().cloned().collect());
            }
            TaskKind::ReadAttribute { name, slot } => {
                let value = self
                    .attributes(&components)
                    .ok_or_else(|| not_found(location))?
                    .get(&name)
                    .ok_or_else(|| {
                        BackendError::NotFound(format!("attribute '{name}' at {location}"))
                    })?;
                fill_slot(&slot, value.clone());
            }
            TaskKind::OpenDataset { slot } => {
                let dataset = self.dataset(&components).ok_or_else(|| not_found(location))?;
                fill_slot(
                    &slot,
                    Dataset::new(dataset.data.datatype(), dataset.extent.clone()),
                );
            }
            other => {
                return Err(BackendError::Unsupported(format!(
                    "{} is not a path-level task",
                    other.name()
                )))
            }
        }
        Ok(())
    }
}
