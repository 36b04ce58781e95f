use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use log::info;

use crate::task::{fill_slot, Task, TaskKind};

use super::stored::StoredGroup;
use super::{Backend, BackendError, Capabilities};

/// In-process storage shared by every backend created from it.
///
/// Cloning the store clones the handle, so a series written through one
/// backend can be reopened through another, and several simulated ranks can
/// share one target.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    files: Arc<Mutex<BTreeMap<String, StoredGroup>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all files in the store
    pub fn file_names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Whether a file of that name exists
    pub fn contains_file(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    /// New backend instance writing into this store
    pub fn backend(&self) -> MemoryBackend {
        MemoryBackend {
            store: self.clone(),
            opened: BTreeSet::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StoredGroup>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Engine executing every task immediately against a [`MemoryStore`]
#[derive(Debug)]
pub struct MemoryBackend {
    store: MemoryStore,
    /// Files this instance created or opened
    opened: BTreeSet<String>,
}

fn parent_dir(name: &str) -> &str {
    name.rsplit_once('/').map_or("", |(dir, _)| dir)
}

fn base_name(name: &str) -> &str {
    name.rsplit_once('/').map_or(name, |(_, base)| base)
}

impl Backend for MemoryBackend {
    fn execute(&mut self, task: Task) -> Result<(), BackendError> {
        let Task { location, kind, .. } = task;
        let mut files = self.store.lock();
        match kind {
            TaskKind::CreateFile => {
                // another instance may already have created it for a peer rank
                if self.opened.insert(location.file.clone()) {
                    info!("Creating in-memory file {}", location.file);
                    files.insert(location.file, StoredGroup::default());
                }
                Ok(())
            }
            TaskKind::OpenFile => {
                if files.contains_key(&location.file) {
                    self.opened.insert(location.file);
                    Ok(())
                } else {
                    Err(BackendError::NotFound(format!(
                        "no in-memory file '{}'",
                        location.file
                    )))
                }
            }
            TaskKind::CloseFile => {
                self.opened.remove(&location.file);
                Ok(())
            }
            TaskKind::AdvanceStep { .. } => Ok(()),
            TaskKind::ListFiles { slot } => {
                let names = files
                    .keys()
                    .filter(|name| parent_dir(name) == location.file.trim_end_matches('/'))
                    .map(|name| base_name(name).to_string())
                    .collect();
                fill_slot(&slot, names);
                Ok(())
            }
            kind => {
                let root = files.get_mut(&location.file).ok_or_else(|| {
                    BackendError::NotFound(format!("no in-memory file '{}'", location.file))
                })?;
                root.apply(&location, kind)
            }
        }
    }

    fn flush(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            collective_chunk_writes: false,
            resizable_datasets: true,
            constant_records: true,
            steps: true,
            shared_storage: true,
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
