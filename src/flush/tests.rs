use std::sync::Arc;

use super::*;
use crate::backend::{BackendError, Capabilities};
use crate::data::{Buffer, Dataset, Datatype};
use crate::hierarchy::{ComponentState, IterationState, Node, Payload};

#[derive(Debug, Default)]
struct RecordingBackend {
    tasks: Vec<String>,
    fail_on: Option<&'static str>,
    flushes: usize,
}

impl Backend for RecordingBackend {
    fn execute(&mut self, task: Task) -> Result<(), BackendError> {
        if self.fail_on == Some(task.kind.name()) {
            return Err(BackendError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected failure",
            )));
        }
        self.tasks.push(task.to_string());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), BackendError> {
        self.flushes += 1;
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            steps: true,
            ..Capabilities::default()
        }
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

fn series_tree() -> Tree {
    let mut root = Node::new("series", Payload::Series);
    root.attributes.set("openPMD", "1.1.0");
    Tree::new(root)
}

fn add_iteration(tree: &mut Tree, index: u64) -> (NodeId, NodeId, NodeId) {
    let root = tree.root();
    let it = tree
        .add_child(
            root,
            Node::new(
                index.to_string(),
                Payload::Iteration(IterationState {
                    index,
                    close: CloseStatus::Open,
                    parsed: true,
                }),
            ),
        )
        .unwrap();
    let meshes = tree.add_child(it, Node::container(ContainerKind::Meshes)).unwrap();
    let particles = tree
        .add_child(it, Node::container(ContainerKind::Particles))
        .unwrap();
    (it, meshes, particles)
}

fn add_component(tree: &mut Tree, parent: NodeId, name: &str, extent: u64) -> NodeId {
    let state = ComponentState {
        dataset: Some(Dataset::new(Datatype::F64, vec![extent])),
        ..ComponentState::default()
    };
    tree.add_child(parent, Node::new(name, Payload::Component(state)))
        .unwrap()
}

fn queue_chunk(tree: &mut Tree, component: NodeId, offset: u64, values: Vec<f64>) {
    let extent = values.len() as u64;
    if let Some(state) = tree.node_mut(component).component_mut() {
        state.pending.push(PendingChunk::Write {
            offset: vec![offset],
            extent: vec![extent],
            data: Arc::new(Buffer::from(values)),
        });
    }
    tree.mark_dirty(component);
}

fn group_based() -> FileNaming {
    FileNaming::parse("series.json").unwrap()
}

fn flush(tree: &mut Tree, backend: &mut RecordingBackend, naming: &FileNaming) -> Result<FlushReport> {
    run(
        tree,
        backend,
        FlushContext {
            naming,
            steps: false,
            finalize: false,
        },
    )
}

fn position(tasks: &[String], needle: &str) -> usize {
    tasks
        .iter()
        .position(|t| t == needle)
        .unwrap_or_else(|| panic!("missing task '{needle}' in {tasks:#?}"))
}

#[test]
fn test_clean_tree_emits_nothing() {
    let mut tree = series_tree();
    let naming = group_based();
    let mut backend = RecordingBackend::default();

    flush(&mut tree, &mut backend, &naming).unwrap();
    let tasks_after_first = backend.tasks.len();

    let report = flush(&mut tree, &mut backend, &naming).unwrap();
    assert!(report.is_noop());
    assert_eq!(backend.tasks.len(), tasks_after_first);
    // the backend still takes part in every flush
    assert_eq!(backend.flushes, 2);
}

#[test]
fn test_create_before_use() {
    let mut tree = series_tree();
    let (_, meshes, _) = add_iteration(&mut tree, 0);
    let mesh = tree.add_child(meshes, Node::new("E", Payload::Mesh)).unwrap();
    let x = add_component(&mut tree, mesh, "x", 100);
    tree.node_mut(x).attributes.set("unitSI", 1.0);
    queue_chunk(&mut tree, x, 0, vec![0.0; 40]);
    queue_chunk(&mut tree, x, 40, vec![0.0; 60]);

    let naming = group_based();
    let mut backend = RecordingBackend::default();
    let report = flush(&mut tree, &mut backend, &naming).unwrap();
    let tasks = &backend.tasks;

    let file = position(tasks, "create-file series.json:/");
    let iteration = position(tasks, "create-path series.json:/data/0");
    let container = position(tasks, "create-path series.json:/data/0/meshes");
    let group = position(tasks, "create-path series.json:/data/0/meshes/E");
    let dataset = position(tasks, "create-dataset series.json:/data/0/meshes/E/x");
    let attribute = position(tasks, "write-attribute series.json:/data/0/meshes/E/x");
    assert!(file < iteration && iteration < container && container < group && group < dataset);
    assert!(dataset < attribute);

    let chunks: Vec<usize> = tasks
        .iter()
        .enumerate()
        .filter(|(_, t)| t.starts_with("write-chunk"))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(chunks.len(), 2);
    assert!(chunks.iter().all(|&i| i > dataset));

    // nothing is left pending afterwards
    assert!(!tree.is_dirty(tree.root()));
    assert!(tree.node(x).component().unwrap().pending.is_empty());
    assert!(tree.node(x).component().unwrap().dataset_created);
    assert_eq!(report.tasks, tasks.len());
}

#[test]
fn test_empty_particles_container_not_written() {
    let mut tree = series_tree();
    add_iteration(&mut tree, 3);
    let naming = group_based();
    let mut backend = RecordingBackend::default();
    flush(&mut tree, &mut backend, &naming).unwrap();
    assert!(backend.tasks.iter().all(|t| !t.contains("particles")));
    assert!(backend.tasks.iter().all(|t| !t.contains("meshes")));
}

#[test]
fn test_failed_flush_keeps_state_and_retry_matches() {
    let mut tree = series_tree();
    let (it, meshes, _) = add_iteration(&mut tree, 1);
    let rho = tree.add_child(meshes, Node::new("rho", Payload::Mesh)).unwrap();
    let scalar = add_component(&mut tree, rho, SCALAR, 4);
    queue_chunk(&mut tree, scalar, 0, vec![1.0, 2.0, 3.0, 4.0]);

    let naming = group_based();
    let mut failing = RecordingBackend {
        fail_on: Some("write-chunk"),
        ..RecordingBackend::default()
    };
    let result = flush(&mut tree, &mut failing, &naming);
    assert!(matches!(result, Err(PmdError::Backend(BackendError::Io(_)))));
    assert!(tree.is_dirty(it));
    assert!(!tree.node(it).written);
    let state = tree.node(scalar).component().unwrap();
    assert_eq!(state.pending.len(), 1);
    assert!(!state.dataset_created);

    let mut first = RecordingBackend::default();
    flush(&mut tree, &mut first, &naming).unwrap();
    assert!(first.tasks.starts_with(&failing.tasks));
    assert!(!tree.is_dirty(it));
}

#[test]
fn test_scalar_record_has_no_group() {
    let mut tree = series_tree();
    let (_, meshes, _) = add_iteration(&mut tree, 0);
    let rho = tree.add_child(meshes, Node::new("rho", Payload::Mesh)).unwrap();
    tree.node_mut(rho).attributes.set("geometry", "cartesian");
    add_component(&mut tree, rho, SCALAR, 8);

    let naming = group_based();
    let mut backend = RecordingBackend::default();
    flush(&mut tree, &mut backend, &naming).unwrap();
    let tasks = &backend.tasks;

    assert!(!tasks.contains(&"create-path series.json:/data/0/meshes/rho".to_string()));
    let dataset = position(tasks, "create-dataset series.json:/data/0/meshes/rho");
    let attribute = position(tasks, "write-attribute series.json:/data/0/meshes/rho");
    assert!(dataset < attribute);
}

#[test]
fn test_component_without_dataset_fails_before_execution() {
    let mut tree = series_tree();
    let (_, meshes, _) = add_iteration(&mut tree, 0);
    let mesh = tree.add_child(meshes, Node::new("B", Payload::Mesh)).unwrap();
    tree.add_child(mesh, Node::new("x", Payload::Component(ComponentState::default())))
        .unwrap();

    let naming = group_based();
    let mut backend = RecordingBackend::default();
    let result = flush(&mut tree, &mut backend, &naming);
    assert!(matches!(result, Err(PmdError::InvalidState(_))));
    assert!(backend.tasks.is_empty());
}

#[test]
fn test_close_reaches_backend_after_flush() {
    let mut tree = series_tree();
    let (it, _, _) = add_iteration(&mut tree, 7);
    let naming = group_based();
    let mut backend = RecordingBackend::default();
    flush(&mut tree, &mut backend, &naming).unwrap();

    let state = tree.node_mut(it).iteration_mut().unwrap();
    state.close = state.close.request_close();
    tree.mark_dirty(it);
    assert_eq!(
        tree.node(it).iteration().unwrap().close,
        CloseStatus::ClosedInFrontend
    );

    let report = flush(&mut tree, &mut backend, &naming).unwrap();
    assert_eq!(report.iterations_closed, 1);
    assert_eq!(backend.tasks.last().unwrap(), "close-path series.json:/data/7");
    assert_eq!(
        tree.node(it).iteration().unwrap().close,
        CloseStatus::ClosedInBackend
    );
}

#[test]
fn test_file_based_creates_file_per_iteration() {
    let mut tree = series_tree();
    add_iteration(&mut tree, 10);
    add_iteration(&mut tree, 2);
    let naming = FileNaming::parse("out/data_%T.json").unwrap();
    let mut backend = RecordingBackend::default();
    flush(&mut tree, &mut backend, &naming).unwrap();

    let files: Vec<&String> = backend
        .tasks
        .iter()
        .filter(|t| t.starts_with("create-file"))
        .collect();
    assert_eq!(
        files,
        vec!["create-file out/data_2.json:/", "create-file out/data_10.json:/"]
    );
    // series attributes land in both files
    position(&backend.tasks, "write-attribute out/data_2.json:/");
    position(&backend.tasks, "write-attribute out/data_10.json:/");
}

#[test]
fn test_resize_emits_extend() {
    let mut tree = series_tree();
    let (_, meshes, _) = add_iteration(&mut tree, 0);
    let mesh = tree.add_child(meshes, Node::new("E", Payload::Mesh)).unwrap();
    let x = add_component(&mut tree, mesh, "x", 4);
    let naming = group_based();
    let mut backend = RecordingBackend::default();
    flush(&mut tree, &mut backend, &naming).unwrap();

    if let Some(state) = tree.node_mut(x).component_mut() {
        state.dataset = Some(Dataset::new(Datatype::F64, vec![8]));
        state.extended = true;
    }
    tree.mark_dirty(x);
    backend.tasks.clear();
    flush(&mut tree, &mut backend, &naming).unwrap();
    assert_eq!(
        backend.tasks,
        vec!["extend-dataset series.json:/data/0/meshes/E/x".to_string()]
    );
}

#[test]
fn test_streaming_step_brackets_batch() {
    let mut tree = series_tree();
    let (it, _, _) = add_iteration(&mut tree, 0);
    let naming = group_based();
    let mut backend = RecordingBackend::default();
    let report = run(
        &mut tree,
        &mut backend,
        FlushContext {
            naming: &naming,
            steps: true,
            finalize: true,
        },
    )
    .unwrap();

    assert!(report.stepped);
    // the step opens on the freshly created file
    assert_eq!(backend.tasks[0], "create-file series.json:/");
    assert_eq!(backend.tasks[1], "advance-step series.json:/");
    let n = backend.tasks.len();
    assert_eq!(backend.tasks[n - 2], "advance-step series.json:/");
    assert_eq!(backend.tasks[n - 1], "close-file series.json:/");

    let status = tree.node(it).iteration().unwrap().close;
    assert_eq!(status, CloseStatus::ClosedTemporarily);
    assert!(status.is_mutable());
}
