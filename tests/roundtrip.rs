//! Write-then-read cycles through every storage engine

use pmdio::backend::MemoryStore;
use pmdio::{Access, Dataset, Series, SeriesConfig};
use tempfile::tempdir;

const EXTENT: u64 = 100;

fn values() -> Vec<f64> {
    (0..EXTENT).map(|i| i as f64 * 0.25).collect()
}

/// One mesh component written in two chunks plus a constant particle record
fn write_series(series: &Series) {
    let iteration = series.iteration(0).unwrap();
    iteration.set_time(1.5f64).unwrap();
    iteration.set_dt(0.5f64).unwrap();

    let ex = iteration.mesh("E").unwrap().component("x").unwrap();
    ex.reset_dataset(Dataset::of::<f64>(vec![EXTENT])).unwrap();
    let data = values();
    ex.store_chunk(data[..40].to_vec(), vec![0], vec![40]).unwrap();
    ex.store_chunk(data[40..].to_vec(), vec![40], vec![60]).unwrap();

    let species = iteration.particle_species("electrons").unwrap();
    species
        .record("charge")
        .unwrap()
        .scalar()
        .unwrap()
        .make_constant(-1.0f64, vec![EXTENT])
        .unwrap();
    let id = species.record("id").unwrap().scalar().unwrap();
    id.reset_dataset(Dataset::of::<u64>(vec![4])).unwrap();
    id.store_chunk(vec![7u64, 8, 9, 10], vec![0], vec![4]).unwrap();

    iteration.close(true).unwrap();
}

fn verify_series(series: &Series) {
    assert_eq!(series.iteration_indices(), vec![0]);
    let iteration = series.iteration(0).unwrap();
    assert_eq!(iteration.time::<f64>().unwrap(), 1.5);
    assert_eq!(iteration.dt::<f32>().unwrap(), 0.5);
    assert!(iteration.closed_by_writer().unwrap());

    let ex = iteration.mesh("E").unwrap().component("x").unwrap();
    assert_eq!(ex.dataset(), Some(Dataset::of::<f64>(vec![EXTENT])));
    let whole = ex.load_chunk::<f64>(vec![0], vec![EXTENT]).unwrap();
    let middle = ex.load_chunk::<f64>(vec![35], vec![10]).unwrap();

    let species = iteration.particle_species("electrons").unwrap();
    let charge = species.record("charge").unwrap().scalar().unwrap();
    assert!(charge.is_constant());
    assert_eq!(charge.constant_value::<f64>().unwrap(), -1.0);
    let id = species
        .record("id")
        .unwrap()
        .scalar()
        .unwrap()
        .load_chunk::<u64>(vec![1], vec![2])
        .unwrap();

    series.flush().unwrap();
    assert_eq!(whole.get().unwrap(), values());
    assert_eq!(middle.get().unwrap(), values()[35..45].to_vec());
    assert_eq!(id.get().unwrap(), vec![8, 9]);
}

#[test]
fn test_memory_roundtrip() {
    let store = MemoryStore::new();
    let series = Series::builder("sim.json").memory(&store).open().unwrap();
    write_series(&series);
    series.close().unwrap();

    let series = Series::builder("sim.json")
        .access(Access::ReadOnly)
        .memory(&store)
        .open()
        .unwrap();
    verify_series(&series);
}

#[test]
fn test_json_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sim.json");
    let pattern = path.to_str().unwrap();

    let series = Series::create(pattern).unwrap();
    write_series(&series);
    series.close().unwrap();
    assert!(path.exists());

    let document: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert!(document.is_object());

    let series = Series::open(pattern, Access::ReadOnly).unwrap();
    verify_series(&series);
}

#[test]
fn test_json_file_based_roundtrip() {
    let dir = tempdir().unwrap();
    let pattern = dir.path().join("data_%T.json");
    let pattern = pattern.to_str().unwrap();

    let series = Series::create(pattern).unwrap();
    write_series(&series);
    let second = series.iteration(10).unwrap();
    second.set_time(2.0f64).unwrap();
    series.close().unwrap();

    assert!(dir.path().join("data_0.json").exists());
    assert!(dir.path().join("data_10.json").exists());

    let series = Series::open(pattern, Access::ReadOnly).unwrap();
    assert_eq!(series.iteration_indices(), vec![0, 10]);
    assert_eq!(series.iteration(10).unwrap().time::<f64>().unwrap(), 2.0);
    assert_eq!(series.openpmd_version().unwrap(), "1.1.0");
}

#[test]
fn test_parquet_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sim.parquet");
    let pattern = path.to_str().unwrap();

    let series = Series::create(pattern).unwrap();
    write_series(&series);
    series.close().unwrap();
    assert!(path.join("attributes.json").exists());

    let series = Series::open(pattern, Access::ReadOnly).unwrap();
    verify_series(&series);
}

#[test]
fn test_engine_chosen_from_config() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bundle");
    let pattern = path.to_str().unwrap();
    let config = SeriesConfig::from_toml_str("backend = \"parquet\"").unwrap();

    let series = Series::builder(pattern).config(config.clone()).open().unwrap();
    write_series(&series);
    series.close().unwrap();
    assert!(path.join("attributes.json").exists());

    let series = Series::builder(pattern)
        .access(Access::ReadOnly)
        .config(config)
        .open()
        .unwrap();
    verify_series(&series);
}

#[test]
fn test_unknown_extension_without_engine_fails() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sim.h5");
    let result = Series::create(path.to_str().unwrap());
    assert!(matches!(result, Err(pmdio::PmdError::Backend(_))));
}
