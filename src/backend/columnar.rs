//! Columnar engine storing every dataset as its own Parquet file.
//!
//! A physical file is a directory bundle:
//!
//! ```text
//! series.parquet/
//! ├── attributes.json        groups, dataset declarations, attributes, step count
//! └── data/
//!     └── 100/
//!         └── meshes/
//!             └── E/
//!                 ├── x.parquet
//!                 └── y.parquet
//! ```
//!
//! Each dataset file has a single non-nullable `data` column holding the
//! dense row-major values; datatype and extent are repeated in the footer's
//! key-value metadata. Chunk writes are staged in memory and only
//! materialized on `flush()` (or when a step ends), so one flush rewrites
//! each touched dataset once.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Float32Array, Float64Array, Int32Array, Int64Array, UInt32Array,
    UInt64Array, UInt8Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use log::{debug, info};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};

use crate::attribute::AttributeValue;
use crate::config::ParquetConfig;
use crate::data::{check_region, element_count, Buffer, Dataset, Datatype, Extent, Offset};
use crate::task::{fill_slot, Location, Slot, StepMode, Task, TaskKind};

use super::{Backend, BackendError, Capabilities};

const INDEX_FILE: &str = "attributes.json";
const DATA_COLUMN: &str = "data";
const KEY_DATATYPE: &str = "pmdio:datatype";
const KEY_EXTENT: &str = "pmdio:extent";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DatasetEntry {
    datatype: Datatype,
    extent: Extent,
    #[serde(default)]
    attributes: BTreeMap<String, AttributeValue>,
    /// A Parquet file exists for this dataset
    #[serde(default)]
    materialized: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BundleIndex {
    #[serde(default)]
    groups: BTreeMap<String, BTreeMap<String, AttributeValue>>,
    #[serde(default)]
    datasets: BTreeMap<String, DatasetEntry>,
    /// Completed streaming steps
    #[serde(default)]
    steps: u64,
}

#[derive(Debug)]
struct StagedChunk {
    path: String,
    offset: Offset,
    extent: Extent,
    data: Arc<Buffer>,
}

#[derive(Debug)]
struct StagedRead {
    path: String,
    offset: Offset,
    extent: Extent,
    datatype: Datatype,
    slot: Slot<Buffer>,
}

#[derive(Debug, Default)]
struct Bundle {
    index: BundleIndex,
    staged: Vec<StagedChunk>,
    reads: Vec<StagedRead>,
    modified: bool,
}

fn parent_path(path: &str) -> &str {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) => "/",
        Some((parent, _)) => parent,
        None => "/",
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn not_found(location: &Location) -> BackendError {
    BackendError::NotFound(format!("no group or dataset at {location}"))
}

fn arrow_type(datatype: Datatype) -> DataType {
    match datatype {
        Datatype::I32 => DataType::Int32,
        Datatype::I64 => DataType::Int64,
        Datatype::U8 => DataType::UInt8,
        Datatype::U32 => DataType::UInt32,
        Datatype::U64 => DataType::UInt64,
        Datatype::F32 => DataType::Float32,
        Datatype::F64 => DataType::Float64,
    }
}

fn to_array(buffer: &Buffer) -> ArrayRef {
    match buffer {
        Buffer::I32(v) => Arc::new(Int32Array::from(v.clone())),
        Buffer::I64(v) => Arc::new(Int64Array::from(v.clone())),
        Buffer::U8(v) => Arc::new(UInt8Array::from(v.clone())),
        Buffer::U32(v) => Arc::new(UInt32Array::from(v.clone())),
        Buffer::U64(v) => Arc::new(UInt64Array::from(v.clone())),
        Buffer::F32(v) => Arc::new(Float32Array::from(v.clone())),
        Buffer::F64(v) => Arc::new(Float64Array::from(v.clone())),
    }
}

fn downcast<'a, A: Array + 'static>(array: &'a ArrayRef, path: &str) -> Result<&'a A, BackendError> {
    array.as_any().downcast_ref::<A>().ok_or_else(|| {
        BackendError::InvalidData(format!(
            "column '{DATA_COLUMN}' of {path} has unexpected type {}",
            array.data_type()
        ))
    })
}

fn append_column(out: &mut Buffer, array: &ArrayRef, path: &str) -> Result<(), BackendError> {
    match out {
        Buffer::I32(v) => v.extend_from_slice(downcast::<Int32Array>(array, path)?.values()),
        Buffer::I64(v) => v.extend_from_slice(downcast::<Int64Array>(array, path)?.values()),
        Buffer::U8(v) => v.extend_from_slice(downcast::<UInt8Array>(array, path)?.values()),
        Buffer::U32(v) => v.extend_from_slice(downcast::<UInt32Array>(array, path)?.values()),
        Buffer::U64(v) => v.extend_from_slice(downcast::<UInt64Array>(array, path)?.values()),
        Buffer::F32(v) => v.extend_from_slice(downcast::<Float32Array>(array, path)?.values()),
        Buffer::F64(v) => v.extend_from_slice(downcast::<Float64Array>(array, path)?.values()),
    }
    Ok(())
}

/// Columnar bundle engine, selected by the `.parquet` extension
#[derive(Debug)]
pub struct ColumnarBackend {
    writable: bool,
    options: ParquetConfig,
    bundles: BTreeMap<String, Bundle>,
}

impl ColumnarBackend {
    /// Create an engine; `writable = false` rejects every mutating task
    pub fn new(writable: bool, options: ParquetConfig) -> Self {
        Self {
            writable,
            options,
            bundles: BTreeMap::new(),
        }
    }

    fn dataset_file(bundle_dir: &Path, path: &str) -> PathBuf {
        let mut file = bundle_dir.to_path_buf();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            file.push(component);
        }
        let name = format!("{}.parquet", file.file_name().and_then(|n| n.to_str()).unwrap_or(""));
        file.set_file_name(name);
        file
    }

    fn bundle_mut(&mut self, location: &Location) -> Result<&mut Bundle, BackendError> {
        self.bundles.get_mut(&location.file).ok_or_else(|| {
            BackendError::NotFound(format!("bundle '{}' is not open", location.file))
        })
    }

    fn read_index(dir: &str) -> Result<BundleIndex, BackendError> {
        let path = Path::new(dir).join(INDEX_FILE);
        let text = fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => BackendError::NotFound(format!("no Parquet bundle '{dir}'")),
            _ => BackendError::Io(e),
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    fn write_index(dir: &Path, index: &BundleIndex) -> Result<(), BackendError> {
        fs::create_dir_all(dir)?;
        let mut writer = BufWriter::new(File::create(dir.join(INDEX_FILE))?);
        serde_json::to_writer_pretty(&mut writer, index)?;
        writer.flush()?;
        Ok(())
    }

    fn read_dataset(
        bundle_dir: &Path,
        path: &str,
        entry: &DatasetEntry,
    ) -> Result<Buffer, BackendError> {
        let expected = element_count(&entry.extent) as usize;
        if !entry.materialized {
            return Ok(Buffer::zeros(entry.datatype, expected));
        }
        let file = File::open(Self::dataset_file(bundle_dir, path))?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

        let mut data = Buffer::empty(entry.datatype);
        for batch in reader {
            let batch = batch?;
            let column = batch.column_by_name(DATA_COLUMN).ok_or_else(|| {
                BackendError::InvalidData(format!("{path} has no '{DATA_COLUMN}' column"))
            })?;
            append_column(&mut data, column, path)?;
        }
        if data.len() != expected {
            return Err(BackendError::InvalidData(format!(
                "{path} holds {} elements, extent {:?} needs {expected}",
                data.len(),
                entry.extent
            )));
        }
        Ok(data)
    }

    fn write_dataset(
        &self,
        bundle_dir: &Path,
        path: &str,
        entry: &DatasetEntry,
        data: &Buffer,
    ) -> Result<(), BackendError> {
        let file_path = Self::dataset_file(bundle_dir, path);
        if let Some(dir) = file_path.parent() {
            fs::create_dir_all(dir)?;
        }

        let schema = Arc::new(Schema::new(vec![Field::new(
            DATA_COLUMN,
            arrow_type(entry.datatype),
            false,
        )]));
        let batch = RecordBatch::try_new(schema.clone(), vec![to_array(data)])?;

        let mut metadata = HashMap::new();
        metadata.insert(KEY_DATATYPE.to_string(), entry.datatype.name().to_string());
        metadata.insert(KEY_EXTENT.to_string(), serde_json::to_string(&entry.extent)?);
        let props = self.options.to_writer_properties(&metadata);

        let file = File::create(&file_path)?;
        let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
        writer.write(&batch)?;
        writer.close()?;
        debug!("Wrote {} elements to {}", data.len(), file_path.display());
        Ok(())
    }

    /// Apply staged chunks, persist the index and serve staged reads
    fn materialize(&self, name: &str, bundle: &mut Bundle) -> Result<(), BackendError> {
        let dir = PathBuf::from(name);
        let staged = std::mem::take(&mut bundle.staged);

        let mut touched: Vec<String> = Vec::new();
        for chunk in &staged {
            if !touched.contains(&chunk.path) {
                touched.push(chunk.path.clone());
            }
        }
        for path in touched {
            let entry = bundle
                .index
                .datasets
                .get(&path)
                .ok_or_else(|| BackendError::NotFound(format!("dataset {path} in {name}")))?;
            let mut data = Self::read_dataset(&dir, &path, entry)?;
            for chunk in staged.iter().filter(|c| c.path == path) {
                data.write_region(&entry.extent, &chunk.offset, &chunk.extent, &chunk.data)?;
            }
            self.write_dataset(&dir, &path, entry, &data)?;
            if let Some(entry) = bundle.index.datasets.get_mut(&path) {
                entry.materialized = true;
            }
            bundle.modified = true;
        }

        if bundle.modified && self.writable {
            Self::write_index(&dir, &bundle.index)?;
            bundle.modified = false;
        }

        for read in std::mem::take(&mut bundle.reads) {
            let entry = bundle
                .index
                .datasets
                .get(&read.path)
                .ok_or_else(|| BackendError::NotFound(format!("dataset {} in {name}", read.path)))?;
            if entry.datatype != read.datatype {
                return Err(BackendError::InvalidData(format!(
                    "dataset {} holds {}, requested {}",
                    read.path, entry.datatype, read.datatype
                )));
            }
            let data = Self::read_dataset(&dir, &read.path, entry)?;
            let chunk = data.read_region(&entry.extent, &read.offset, &read.extent)?;
            fill_slot(&read.slot, chunk);
        }
        Ok(())
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

    fn execute_in_bundle(bundle: &mut Bundle, location: &Location, kind: TaskKind) -> Result<(), BackendError> {
        let path = location.path.clone();
        let index = &mut bundle.index;
        match kind {
            TaskKind::CreatePath => {
                if index.datasets.contains_key(&path) {
                    return Err(BackendError::InvalidData(format!(
                        "cannot create group {location}: a dataset of that name exists"
                    )));
                }
                let mut current = path.as_str();
                loop {
                    index.groups.entry(current.to_string()).or_default();
                    if current == "/" {
                        break;
                    }
                    current = parent_path(current);
                }
                bundle.modified = true;
            }
            TaskKind::ClosePath => {}
            TaskKind::WriteAttribute { name, value } => {
                let attributes = match index.datasets.get_mut(&path) {
                    Some(entry) => &mut entry.attributes,
                    None => index.groups.get_mut(&path).ok_or_else(|| not_found(location))?,
                };
                attributes.insert(name, value);
                bundle.modified = true;
            }
            TaskKind::CreateDataset { datatype, extent } => {
                if path == "/" || index.groups.contains_key(&path) {
                    return Err(BackendError::InvalidData(format!(
                        "cannot create dataset {location}: a group of that name exists"
                    )));
                }
                match index.datasets.get(&path) {
                    Some(existing) if existing.datatype == datatype && existing.extent == extent => {}
                    Some(existing) => {
                        return Err(BackendError::InvalidData(format!(
                            "dataset {location} already declared as {} {:?}",
                            existing.datatype, existing.extent
                        )))
                    }
                    None => {
                        let mut current = parent_path(&path);
                        loop {
                            index.groups.entry(current.to_string()).or_default();
                            if current == "/" {
                                break;
                            }
                            current = parent_path(current);
                        }
                        index.datasets.insert(
                            path,
                            DatasetEntry {
                                datatype,
                                extent,
                                attributes: BTreeMap::new(),
                                materialized: false,
                            },
                        );
                        bundle.modified = true;
                    }
                }
            }
            TaskKind::ExtendDataset { .. } => {
                return Err(BackendError::Unsupported(format!(
                    "the columnar engine cannot resize {location}"
                )))
            }
            TaskKind::WriteChunk {
                offset,
                extent,
                data,
            } => {
                let entry = index.datasets.get(&path).ok_or_else(|| not_found(location))?;
                check_region(&entry.extent, &offset, &extent)?;
                if data.datatype() != entry.datatype {
                    return Err(BackendError::InvalidData(format!(
                        "chunk for {location} holds {}, dataset is {}",
                        data.datatype(),
                        entry.datatype
                    )));
                }
                bundle.staged.push(StagedChunk {
                    path,
                    offset,
                    extent,
                    data,
                });
            }
            TaskKind::ReadChunk {
                offset,
                extent,
                datatype,
                slot,
            } => {
                let entry = index.datasets.get(&path).ok_or_else(|| not_found(location))?;
                check_region(&entry.extent, &offset, &extent)?;
                bundle.reads.push(StagedRead {
                    path,
                    offset,
                    extent,
                    datatype,
                    slot,
                });
            }
            TaskKind::ListPaths { slot } => {
                if !index.groups.contains_key(&path) {
                    return Err(not_found(location));
                }
                let names = index
                    .groups
                    .keys()
                    .filter(|g| g.as_str() != "/" && parent_path(g) == path)
                    .map(|g| base_name(g).to_string())
                    .collect();
                fill_slot(&slot, names);
            }
            TaskKind::ListDatasets { slot } => {
                if !index.groups.contains_key(&path) {
                    return Err(not_found(location));
                }
                let names = index
                    .datasets
                    .keys()
                    .filter(|d| parent_path(d) == path)
                    .map(|d| base_name(d).to_string())
                    .collect();
                fill_slot(&slot, names);
            }
            TaskKind::ListAttributes { slot } => {
                let attributes = match index.datasets.get(&path) {
                    Some(entry) => &entry.attributes,
                    None => index.groups.get(&path).ok_or_else(|| not_found(location))?,
                };
                fill_slot(&slot, attributes.keys().cloned().collect());
            }
            TaskKind::ReadAttribute { name, slot } => {
                let attributes = match index.datasets.get(&path) {
                    Some(entry) => &entry.attributes,
                    None => index.groups.get(&path).ok_or_else(|| not_found(location))?,
                };
                let value = attributes.get(&name).ok_or_else(|| {
                    BackendError::NotFound(format!("attribute '{name}' at {location}"))
                })?;
                fill_slot(&slot, value.clone());
            }
            TaskKind::OpenDataset { slot } => {
                let entry = index.datasets.get(&path).ok_or_else(|| not_found(location))?;
                fill_slot(&slot, Dataset::new(entry.datatype, entry.extent.clone()));
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

impl Backend for ColumnarBackend {
    fn execute(&mut self, task: Task) -> Result<(), BackendError> {
        let Task { location, kind, .. } = task;
        if !self.writable && !kind.is_read() && !matches!(kind, TaskKind::CloseFile | TaskKind::ClosePath) {
            return Err(BackendError::Unsupported(format!(
                "{} on read-only bundle {}",
                kind.name(),
                location.file
            )));
        }
        match kind {
            TaskKind::CreateFile => {
                if !self.bundles.contains_key(&location.file) {
                    let dir = Path::new(&location.file);
                    if dir.join(INDEX_FILE).is_file() {
                        fs::remove_dir_all(dir)?;
                    }
                    info!("Creating Parquet bundle {}", location.file);
                    let mut bundle = Bundle {
                        modified: true,
                        ..Bundle::default()
                    };
                    bundle.index.groups.insert("/".to_string(), BTreeMap::new());
                    self.bundles.insert(location.file, bundle);
                }
                Ok(())
            }
            TaskKind::OpenFile => {
                if !self.bundles.contains_key(&location.file) {
                    let index = Self::read_index(&location.file)?;
                    self.bundles.insert(
                        location.file,
                        Bundle {
                            index,
                            ..Bundle::default()
                        },
                    );
                }
                Ok(())
            }
            TaskKind::CloseFile => {
                if let Some(mut bundle) = self.bundles.remove(&location.file) {
                    self.materialize(&location.file, &mut bundle)?;
                }
                Ok(())
            }
            TaskKind::ListFiles { slot } => {
                fill_slot(&slot, Self::list_files(&location.file)?);
                Ok(())
            }
            TaskKind::AdvanceStep { mode } => {
                let name = location.file.clone();
                let mut bundle = self
                    .bundles
                    .remove(&name)
                    .ok_or_else(|| BackendError::NotFound(format!("bundle '{name}' is not open")))?;
                let result = match mode {
                    StepMode::Begin => Ok(()),
                    StepMode::End => {
                        bundle.index.steps += 1;
                        bundle.modified = true;
                        self.materialize(&name, &mut bundle)
                    }
                };
                self.bundles.insert(name, bundle);
                result
            }
            kind => {
                let bundle = self.bundle_mut(&location)?;
                Self::execute_in_bundle(bundle, &location, kind)
            }
        }
    }

    fn flush(&mut self) -> Result<(), BackendError> {
        let mut bundles = std::mem::take(&mut self.bundles);
        let mut result = Ok(());
        for (name, bundle) in bundles.iter_mut() {
            result = self.materialize(name, bundle);
            if result.is_err() {
                break;
            }
        }
        self.bundles = bundles;
        result
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            collective_chunk_writes: false,
            resizable_datasets: false,
            constant_records: true,
            steps: true,
            shared_storage: false,
        }
    }

    fn name(&self) -> &'static str {
        "parquet"
    }
}
