use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::Path;

use log::{debug, info};

use crate::task::{fill_slot, Task, TaskKind};

use super::stored::StoredGroup;
use super::{Backend, BackendError, Capabilities};

#[derive(Debug)]
struct OpenDocument {
    root: StoredGroup,
    modified: bool,
}

/// Hierarchical-file engine: one JSON document per physical file.
///
/// Documents are held in memory while open and written out on `CloseFile`
/// and on every `flush()`.
#[derive(Debug)]
pub struct JsonBackend {
    writable: bool,
    pretty: bool,
    files: BTreeMap<String, OpenDocument>,
}

impl JsonBackend {
    /// Create an engine; `writable = false` rejects every mutating task
    pub fn new(writable: bool, pretty: bool) -> Self {
        Self {
            writable,
            pretty,
            files: BTreeMap::new(),
        }
    }

    fn write_document(&self, name: &str, document: &OpenDocument) -> Result<(), BackendError> {
        let path = Path::new(name);
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        if self.pretty {
            serde_json::to_writer_pretty(&mut writer, &document.root)?;
        } else {
            serde_json::to_writer(&mut writer, &document.root)?;
        }
        writer.flush()?;
        debug!("Wrote JSON document {name}");
        Ok(())
    }

    fn read_document(name: &str) -> Result<StoredGroup, BackendError> {
        let text = fs::read_to_string(name).map_err(|e| match e.kind() {
            ErrorKind::NotFound => BackendError::NotFound(format!("no JSON file '{name}'")),
            _ => BackendError::Io(e),
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    fn list_files(dir: &str) -> Result<Vec<String>, BackendError> {
        let dir = if dir.is_empty() { "." } else { dir };
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

impl Backend for JsonBackend {
    fn execute(&mut self, task: Task) -> Result<(), BackendError> {
        let Task { location, kind, .. } = task;
        if !self.writable && !kind.is_read() && !matches!(kind, TaskKind::CloseFile | TaskKind::ClosePath) {
            return Err(BackendError::Unsupported(format!(
                "{} on read-only file {}",
                kind.name(),
                location.file
            )));
        }
        match kind {
            TaskKind::CreateFile => {
                if !self.files.contains_key(&location.file) {
                    info!("Creating JSON file {}", location.file);
                    self.files.insert(
                        location.file,
                        OpenDocument {
                            root: StoredGroup::default(),
                            modified: true,
                        },
                    );
                }
                Ok(())
            }
            TaskKind::OpenFile => {
                if !self.files.contains_key(&location.file) {
                    let root = Self::read_document(&location.file)?;
                    self.files.insert(
                        location.file,
                        OpenDocument {
                            root,
                            modified: false,
                        },
                    );
                }
                Ok(())
            }
            TaskKind::CloseFile => {
                if let Some(document) = self.files.remove(&location.file) {
                    if document.modified && self.writable {
                        self.write_document(&location.file, &document)?;
                    }
                }
                Ok(())
            }
            TaskKind::ListFiles { slot } => {
                fill_slot(&slot, Self::list_files(&location.file)?);
                Ok(())
            }
            TaskKind::AdvanceStep { .. } => Err(BackendError::Unsupported(
                "the JSON engine has no streaming steps".to_string(),
            )),
            kind => {
                let mutates = !kind.is_read();
                let document = self.files.get_mut(&location.file).ok_or_else(|| {
                    BackendError::NotFound(format!("JSON file '{}' is not open", location.file))
                })?;
                document.root.apply(&location, kind)?;
                document.modified |= mutates;
                Ok(())
            }
        }
    }

    fn flush(&mut self) -> Result<(), BackendError> {
        if !self.writable {
            return Ok(());
        }
        for (name, document) in &self.files {
            if document.modified {
                self.write_document(name, document)?;
            }
        }
        for document in self.files.values_mut() {
            document.modified = false;
        }
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            collective_chunk_writes: false,
            resizable_datasets: true,
            constant_records: true,
            steps: false,
            shared_storage: false,
        }
    }

    fn name(&self) -> &'static str {
        "json"
    }
}
