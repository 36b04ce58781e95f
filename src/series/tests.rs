use super::*;
use crate::data::Dataset;
use crate::hierarchy::SCALAR;

fn memory_series(store: &MemoryStore, pattern: &str) -> Series {
    Series::builder(pattern).memory(store).open().unwrap()
}

fn reopen(store: &MemoryStore, pattern: &str, access: Access) -> Series {
    Series::builder(pattern)
        .access(access)
        .memory(store)
        .open()
        .unwrap()
}

/// Iteration 0 with a vector mesh, a scalar mesh and one particle species
fn write_sample(store: &MemoryStore) {
    let series = memory_series(store, "sample.json");
    let iteration = series.iteration(0).unwrap();
    iteration.set_time(0.5f64).unwrap();

    let e = iteration.mesh("E").unwrap();
    e.set_axis_labels(&["x"]).unwrap();
    for (name, value) in [("x", 1.0), ("y", 2.0)] {
        let component = e.component(name).unwrap();
        component.reset_dataset(Dataset::of::<f64>(vec![4])).unwrap();
        component.store_chunk(vec![value; 4], vec![0], vec![4]).unwrap();
    }

    let rho = iteration.mesh("rho").unwrap().scalar().unwrap();
    rho.reset_dataset(Dataset::of::<f32>(vec![4])).unwrap();
    rho.set_unit_si(2.5).unwrap();
    rho.store_chunk(vec![0.0f32, 1.0, 2.0, 3.0], vec![0], vec![4])
        .unwrap();

    let electrons = iteration.particle_species("e").unwrap();
    electrons
        .record("charge")
        .unwrap()
        .scalar()
        .unwrap()
        .make_constant(-1.0f64, vec![10])
        .unwrap();
    let x = electrons.record("position").unwrap().component("x").unwrap();
    x.reset_dataset(Dataset::of::<f64>(vec![10])).unwrap();
    x.store_chunk((0..10).map(f64::from).collect(), vec![0], vec![10])
        .unwrap();

    iteration.close(true).unwrap();
    series.close().unwrap();
}

#[test]
fn test_new_series_carries_required_attributes() {
    let store = MemoryStore::new();
    let series = memory_series(&store, "defaults.json");
    assert_eq!(series.openpmd_version().unwrap(), OPENPMD_VERSION);
    assert_eq!(series.base_path().unwrap(), "/data/%T/");
    assert_eq!(series.meshes_path().unwrap(), "meshes/");
    assert_eq!(series.particles_path().unwrap(), "particles/");
    assert_eq!(series.iteration_encoding(), IterationEncoding::GroupBased);
    assert_eq!(
        series.attribute("iterationEncoding").unwrap().as_str(),
        Some("groupBased")
    );
    assert!(series.date().is_ok());
    assert!(series.is_dirty());

    series.flush().unwrap();
    assert!(!series.is_dirty());
    assert!(store.contains_file("defaults.json"));
}

#[test]
fn test_missing_attribute_is_not_found() {
    let store = MemoryStore::new();
    let series = memory_series(&store, "missing.json");
    assert!(matches!(series.author(), Err(PmdError::NotFound(_))));
    series.set_author("someone").unwrap();
    assert_eq!(series.author().unwrap(), "someone");
}

#[test]
fn test_new_iteration_defaults() {
    let store = MemoryStore::new();
    let series = memory_series(&store, "iteration.json");
    let iteration = series.iteration(5).unwrap();
    assert_eq!(iteration.index(), 5);
    assert_eq!(iteration.time::<f64>().unwrap(), 0.0);
    assert_eq!(iteration.dt::<f32>().unwrap(), 1.0);
    assert_eq!(iteration.time_unit_si().unwrap(), 1.0);
    assert_eq!(iteration.close_status(), CloseStatus::Open);
    assert_eq!(series.iteration_indices(), vec![5]);
    assert!(series.contains_iteration(5));
    assert!(!series.contains_iteration(6));
}

#[test]
fn test_closed_iteration_rejects_mutation() {
    let store = MemoryStore::new();
    let series = memory_series(&store, "closed.json");
    let iteration = series.iteration(1).unwrap();
    let mesh = iteration.mesh("B").unwrap();

    iteration.close(false).unwrap();
    assert_eq!(iteration.close_status(), CloseStatus::ClosedInFrontend);
    assert!(matches!(
        iteration.set_time(1.0f64),
        Err(PmdError::InvalidState(_))
    ));
    assert!(matches!(
        mesh.set_geometry("thetaMode"),
        Err(PmdError::InvalidState(_))
    ));
    assert!(matches!(
        iteration.mesh("C"),
        Err(PmdError::InvalidState(_))
    ));

    series.flush().unwrap();
    assert_eq!(iteration.close_status(), CloseStatus::ClosedInBackend);
    // closing again changes nothing
    iteration.close(true).unwrap();
    assert_eq!(iteration.close_status(), CloseStatus::ClosedInBackend);
    assert!(iteration.closed_by_writer().unwrap());
}

#[test]
fn test_scalar_and_named_components_do_not_mix() {
    let store = MemoryStore::new();
    let series = memory_series(&store, "mix.json");
    let iteration = series.iteration(0).unwrap();

    let rho = iteration.mesh("rho").unwrap();
    rho.scalar().unwrap();
    assert!(matches!(rho.component("x"), Err(PmdError::InvalidState(_))));

    let e = iteration.mesh("E").unwrap();
    e.component("x").unwrap();
    assert!(matches!(e.scalar(), Err(PmdError::InvalidState(_))));
    // existing components are returned, not re-created
    e.component("x").unwrap();
    assert_eq!(e.component_names().unwrap(), vec!["x".to_string()]);
}

#[test]
fn test_store_chunk_is_validated_on_submission() {
    let store = MemoryStore::new();
    let series = memory_series(&store, "chunks.json");
    let x = series
        .iteration(0)
        .unwrap()
        .mesh("E")
        .unwrap()
        .component("x")
        .unwrap();

    assert!(matches!(
        x.store_chunk(vec![0.0f64; 2], vec![0], vec![2]),
        Err(PmdError::InvalidState(_))
    ));

    x.reset_dataset(Dataset::of::<f64>(vec![10])).unwrap();
    assert!(matches!(
        x.store_chunk(vec![0i32; 2], vec![0], vec![2]),
        Err(PmdError::TypeMismatch(_))
    ));
    assert!(matches!(
        x.store_chunk(vec![0.0f64; 4], vec![8], vec![4]),
        Err(PmdError::TypeMismatch(_))
    ));
    assert!(matches!(
        x.store_chunk(vec![0.0f64; 3], vec![0], vec![4]),
        Err(PmdError::TypeMismatch(_))
    ));
    assert!(matches!(
        x.store_chunk(vec![0.0f64; 2], vec![0, 0], vec![1, 2]),
        Err(PmdError::TypeMismatch(_))
    ));
    x.store_chunk(vec![0.0f64; 4], vec![6], vec![4]).unwrap();
}

#[test]
fn test_constant_component_rules() {
    let store = MemoryStore::new();
    let series = memory_series(&store, "constant.json");
    let species = series.iteration(0).unwrap().particle_species("ions").unwrap();

    let charge = species.record("charge").unwrap().scalar().unwrap();
    charge.make_constant(2.0f64, vec![100]).unwrap();
    assert!(charge.is_constant());
    assert_eq!(charge.constant_value::<f64>().unwrap(), 2.0);
    assert!(matches!(
        charge.constant_value::<f32>(),
        Err(PmdError::TypeMismatch(_))
    ));
    assert_eq!(charge.dataset(), Some(Dataset::of::<f64>(vec![100])));
    assert!(matches!(
        charge.reset_dataset(Dataset::of::<f64>(vec![100])),
        Err(PmdError::InvalidState(_))
    ));
    assert!(matches!(
        charge.store_chunk(vec![1.0f64], vec![0], vec![1]),
        Err(PmdError::InvalidState(_))
    ));
    assert!(matches!(
        charge.load_chunk::<f64>(vec![0], vec![1]),
        Err(PmdError::InvalidState(_))
    ));

    let mass = species.record("mass").unwrap().scalar().unwrap();
    mass.reset_dataset(Dataset::of::<f64>(vec![4])).unwrap();
    mass.store_chunk(vec![1.0f64; 4], vec![0], vec![4]).unwrap();
    assert!(matches!(
        mass.make_constant(1.0f64, vec![4]),
        Err(PmdError::InvalidState(_))
    ));
    series.flush().unwrap();
}

#[test]
fn test_dataset_may_only_grow_after_flush() {
    let store = MemoryStore::new();
    let series = memory_series(&store, "grow.json");
    let x = series
        .iteration(0)
        .unwrap()
        .mesh("E")
        .unwrap()
        .component("x")
        .unwrap();

    // free to change before the first flush
    x.reset_dataset(Dataset::of::<f32>(vec![2])).unwrap();
    x.reset_dataset(Dataset::of::<f64>(vec![4])).unwrap();
    x.store_chunk(vec![1.0f64; 4], vec![0], vec![4]).unwrap();
    series.flush().unwrap();

    assert!(matches!(
        x.reset_dataset(Dataset::of::<f64>(vec![2])),
        Err(PmdError::TypeMismatch(_))
    ));
    assert!(matches!(
        x.reset_dataset(Dataset::of::<f32>(vec![8])),
        Err(PmdError::TypeMismatch(_))
    ));
    assert!(matches!(
        x.reset_dataset(Dataset::of::<f64>(vec![4, 1])),
        Err(PmdError::TypeMismatch(_))
    ));

    x.reset_dataset(Dataset::of::<f64>(vec![8])).unwrap();
    x.store_chunk(vec![2.0f64; 4], vec![4], vec![4]).unwrap();
    let loaded = x.load_chunk::<f64>(vec![0], vec![8]).unwrap();
    series.flush().unwrap();
    assert_eq!(loaded.get().unwrap(), [vec![1.0; 4], vec![2.0; 4]].concat());
}

#[test]
fn test_loaded_chunk_filled_by_flush() {
    let store = MemoryStore::new();
    let series = memory_series(&store, "load.json");
    let x = series
        .iteration(0)
        .unwrap()
        .mesh("E")
        .unwrap()
        .component("x")
        .unwrap();
    x.reset_dataset(Dataset::of::<i64>(vec![3, 2])).unwrap();
    x.store_chunk(vec![1i64, 2, 3, 4, 5, 6], vec![0, 0], vec![3, 2])
        .unwrap();

    let chunk = x.load_chunk::<i64>(vec![1, 0], vec![2, 2]).unwrap();
    assert!(!chunk.is_ready());
    assert!(matches!(chunk.get(), Err(PmdError::InvalidState(_))));
    assert_eq!(chunk.extent(), &[2, 2]);

    series.flush().unwrap();
    assert!(chunk.is_ready());
    assert_eq!(chunk.get().unwrap(), vec![3, 4, 5, 6]);
}

#[test]
fn test_reopen_read_only_restores_hierarchy() {
    let store = MemoryStore::new();
    write_sample(&store);

    let series = reopen(&store, "sample.json", Access::ReadOnly);
    assert_eq!(series.iteration_indices(), vec![0]);
    assert_eq!(series.openpmd_version().unwrap(), OPENPMD_VERSION);

    let iteration = series.iteration(0).unwrap();
    assert!(iteration.closed_by_writer().unwrap());
    assert_eq!(iteration.time::<f64>().unwrap(), 0.5);

    let mut meshes = iteration.mesh_names().unwrap();
    meshes.sort();
    assert_eq!(meshes, vec!["E".to_string(), "rho".to_string()]);

    let rho = iteration.mesh("rho").unwrap();
    assert_eq!(rho.geometry().unwrap(), "cartesian");
    assert_eq!(rho.component_names().unwrap(), vec![SCALAR.to_string()]);
    let scalar = rho.scalar().unwrap();
    assert_eq!(scalar.unit_si().unwrap(), 2.5);
    assert_eq!(scalar.dataset(), Some(Dataset::of::<f32>(vec![4])));
    assert!(matches!(
        rho.attribute("unitSI"),
        Err(PmdError::NotFound(_))
    ));

    let e = iteration.mesh("E").unwrap();
    assert_eq!(e.axis_labels().unwrap(), vec!["x".to_string()]);
    let y = e.component("y").unwrap();
    let values = y.load_chunk::<f64>(vec![1], vec![2]).unwrap();

    let species = iteration.particle_species("e").unwrap();
    let charge = species.record("charge").unwrap().scalar().unwrap();
    assert!(charge.is_constant());
    assert_eq!(charge.constant_value::<f64>().unwrap(), -1.0);
    assert_eq!(charge.dataset(), Some(Dataset::of::<f64>(vec![10])));
    let position = species.record("position").unwrap();
    assert_eq!(position.component_names().unwrap(), vec!["x".to_string()]);

    series.flush().unwrap();
    assert_eq!(values.get().unwrap(), vec![2.0, 2.0]);
    series.close().unwrap();
}

#[test]
fn test_read_only_rejects_mutation() {
    let store = MemoryStore::new();
    write_sample(&store);
    let series = reopen(&store, "sample.json", Access::ReadOnly);

    assert!(matches!(
        series.set_comment("nope"),
        Err(PmdError::InvalidState(_))
    ));
    assert!(matches!(series.iteration(9), Err(PmdError::NotFound(_))));
    let iteration = series.iteration(0).unwrap();
    assert!(matches!(iteration.mesh("B"), Err(PmdError::NotFound(_))));
    assert!(matches!(
        iteration.set_dt(0.1f64),
        Err(PmdError::InvalidState(_))
    ));
}

#[test]
fn test_deferred_parsing_reads_on_first_access() {
    let store = MemoryStore::new();
    write_sample(&store);

    let config = SeriesConfig {
        defer_iteration_parsing: true,
        ..SeriesConfig::default()
    };
    let series = Series::builder("sample.json")
        .access(Access::ReadOnly)
        .config(config)
        .memory(&store)
        .open()
        .unwrap();
    let iteration = series.iteration(0).unwrap();
    assert!(!iteration.is_parsed());

    let species = iteration.particle_species_names().unwrap();
    assert!(iteration.is_parsed());
    assert_eq!(species, vec!["e".to_string()]);
}

#[test]
fn test_missing_series_is_not_found() {
    let store = MemoryStore::new();
    let result = Series::builder("absent.json")
        .access(Access::ReadOnly)
        .memory(&store)
        .open();
    assert!(matches!(result, Err(PmdError::NotFound(_))));
}

#[test]
fn test_append_freezes_existing_iterations() {
    let store = MemoryStore::new();
    write_sample(&store);

    let series = reopen(&store, "sample.json", Access::Append);
    let old = series.iteration(0).unwrap();
    assert_eq!(old.close_status(), CloseStatus::ClosedInBackend);
    assert!(matches!(
        old.set_time(2.0f64),
        Err(PmdError::InvalidState(_))
    ));

    let new = series.iteration(1).unwrap();
    new.mesh("rho")
        .unwrap()
        .scalar()
        .unwrap()
        .make_constant(0.0f64, vec![4])
        .unwrap();
    series.close().unwrap();

    let series = reopen(&store, "sample.json", Access::ReadOnly);
    assert_eq!(series.iteration_indices(), vec![0, 1]);
}

#[test]
fn test_append_to_missing_series_creates_it() {
    let store = MemoryStore::new();
    let series = reopen(&store, "fresh.json", Access::Append);
    assert_eq!(series.openpmd_version().unwrap(), OPENPMD_VERSION);
    series.iteration(0).unwrap();
    series.close().unwrap();
    assert!(store.contains_file("fresh.json"));
}

#[test]
fn test_file_based_naming_in_memory() {
    let store = MemoryStore::new();
    let series = memory_series(&store, "out/data_%03T.json");
    assert_eq!(series.iteration_encoding(), IterationEncoding::FileBased);
    for index in [0, 20] {
        series.iteration(index).unwrap().close(false).unwrap();
    }
    series.close().unwrap();
    assert_eq!(
        store.file_names(),
        vec!["out/data_000.json".to_string(), "out/data_020.json".to_string()]
    );

    let series = reopen(&store, "out/data_%03T.json", Access::ReadOnly);
    assert_eq!(series.iteration_indices(), vec![0, 20]);
    assert_eq!(
        series.attribute("iterationFormat").unwrap().as_str(),
        Some("data_%03T.json")
    );
}

#[test]
fn test_write_iterations_closes_previous() {
    let store = MemoryStore::new();
    let series = memory_series(&store, "stream.json");
    let mut writer = series.write_iterations();

    let first = writer.get(0).unwrap();
    first.set_time(0.0f64).unwrap();
    assert_eq!(writer.get(0).unwrap().index(), 0);

    let second = writer.get(1).unwrap();
    assert_eq!(first.close_status(), CloseStatus::ClosedInBackend);
    assert_eq!(second.close_status(), CloseStatus::Open);
    assert_eq!(writer.active().map(Iteration::index), Some(1));
}

#[test]
fn test_streaming_marks_iterations_temporarily_closed() {
    let store = MemoryStore::new();
    let config = SeriesConfig {
        streaming: true,
        ..SeriesConfig::default()
    };
    let series = Series::builder("steps.json")
        .config(config)
        .memory(&store)
        .open()
        .unwrap();
    assert!(series.is_streaming());

    let iteration = series.iteration(0).unwrap();
    let report = series.flush().unwrap();
    assert!(report.stepped);
    assert_eq!(iteration.close_status(), CloseStatus::ClosedTemporarily);

    // still logically open
    iteration.set_time(1.0f64).unwrap();
    iteration.close(true).unwrap();
    assert_eq!(iteration.close_status(), CloseStatus::ClosedInBackend);
}

#[test]
fn test_renamed_meshes_path_is_used() {
    let store = MemoryStore::new();
    let series = memory_series(&store, "renamed.json");
    series.set_meshes_path("fields").unwrap();
    assert_eq!(series.meshes_path().unwrap(), "fields/");
    let rho = series.iteration(0).unwrap().mesh("rho").unwrap().scalar().unwrap();
    rho.make_constant(1u32, vec![2]).unwrap();
    series.close().unwrap();

    let series = reopen(&store, "renamed.json", Access::ReadOnly);
    let names = series.iteration(0).unwrap().mesh_names().unwrap();
    assert_eq!(names, vec!["rho".to_string()]);
}

#[test]
fn test_file_based_attribute_after_last_close_fails_on_close() {
    let store = MemoryStore::new();
    let series = memory_series(&store, "out/f_%T.json");
    series.iteration(0).unwrap().close(true).unwrap();

    series.set_comment("late").unwrap();
    assert!(series.flush().unwrap().is_noop());
    assert!(series.is_dirty());

    let err = series.close().unwrap_err();
    assert!(matches!(err, PmdError::InvalidState(_)), "{err}");
}

#[test]
fn test_file_based_attribute_reaches_next_iteration() {
    let store = MemoryStore::new();
    let series = memory_series(&store, "out/g_%T.json");
    series.iteration(0).unwrap().close(true).unwrap();

    series.set_comment("late").unwrap();
    series.iteration(1).unwrap().close(true).unwrap();
    assert!(!series.is_dirty());
    series.close().unwrap();

    let series = reopen(&store, "out/g_%T.json", Access::ReadOnly);
    assert_eq!(series.iteration_indices(), vec![0, 1]);
}
