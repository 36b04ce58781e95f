use super::*;
use crate::close::CloseStatus;
use crate::error::PmdError;

fn iteration(index: u64) -> Node {
    Node::new(
        index.to_string(),
        Payload::Iteration(IterationState {
            index,
            close: CloseStatus::Open,
            parsed: true,
        }),
    )
}

fn clean_tree() -> Tree {
    let mut root = Node::new("series", Payload::Series);
    root.dirty = false;
    Tree::new(root)
}

#[test]
fn test_dirty_propagates_to_ancestors() {
    let mut tree = clean_tree();
    let root = tree.root();
    let it = tree.add_child(root, iteration(0)).unwrap();
    let meshes = tree.add_child(it, Node::container(ContainerKind::Meshes)).unwrap();

    for id in [root, it] {
        tree.node_mut(id).dirty = false;
    }
    assert!(!tree.is_dirty(meshes));

    let mesh = tree.insert(Node::new("E", Payload::Mesh));
    tree.node_mut(mesh).dirty = false;
    tree.link(mesh, meshes).unwrap();
    assert!(!tree.is_dirty(root));

    tree.mark_dirty(mesh);
    assert!(tree.is_dirty(mesh));
    assert!(tree.is_dirty(meshes));
    assert!(tree.is_dirty(it));
    assert!(tree.is_dirty(root));
}

#[test]
fn test_linking_dirty_child_marks_parent() {
    let mut tree = clean_tree();
    let root = tree.root();
    tree.add_child(root, iteration(5)).unwrap();
    assert!(tree.is_dirty(root));
}

#[test]
fn test_empty_container_stays_clean() {
    let mut tree = clean_tree();
    let root = tree.root();
    let it = tree.add_child(root, iteration(0)).unwrap();
    tree.node_mut(it).dirty = false;
    tree.node_mut(root).dirty = false;

    tree.add_child(it, Node::container(ContainerKind::Particles)).unwrap();
    assert!(!tree.is_dirty(it));
}

#[test]
fn test_iterations_sorted_numerically() {
    let mut tree = clean_tree();
    let root = tree.root();
    for index in [100, 2, 30, 7] {
        tree.add_child(root, iteration(index)).unwrap();
    }
    let order: Vec<u64> = tree
        .children(root)
        .iter()
        .filter_map(|&c| tree.node(c).iteration().map(|s| s.index))
        .collect();
    assert_eq!(order, vec![2, 7, 30, 100]);
    assert!(tree.iteration_by_index(30).is_some());
    assert!(tree.iteration_by_index(31).is_none());
}

#[test]
fn test_link_to_other_parent_fails() {
    let mut tree = clean_tree();
    let root = tree.root();
    let a = tree.add_child(root, iteration(0)).unwrap();
    let b = tree.add_child(root, iteration(1)).unwrap();
    let mesh = tree.add_child(a, Node::new("E", Payload::Mesh)).unwrap();

    // relinking to the same parent is fine
    assert!(tree.link(mesh, a).is_ok());
    assert!(matches!(tree.link(mesh, b), Err(PmdError::InvalidState(_))));
}

#[test]
fn test_link_rejects_root_cycles_and_duplicates() {
    let mut tree = clean_tree();
    let root = tree.root();
    let it = tree.add_child(root, iteration(0)).unwrap();
    assert!(matches!(tree.link(root, it), Err(PmdError::InvalidState(_))));

    let detached = tree.insert(iteration(0));
    assert!(matches!(tree.link(detached, root), Err(PmdError::InvalidState(_))));

    let mesh = tree.add_child(it, Node::new("E", Payload::Mesh)).unwrap();
    let loose = tree.insert(Node::new("loose", Payload::Record));
    tree.link(loose, mesh).unwrap();
    assert!(matches!(tree.link(mesh, loose), Err(PmdError::InvalidState(_))));
}

#[test]
fn test_owning_iteration_and_path() {
    let mut tree = clean_tree();
    let root = tree.root();
    let it = tree.add_child(root, iteration(42)).unwrap();
    let meshes = tree.add_child(it, Node::container(ContainerKind::Meshes)).unwrap();
    let mesh = tree.add_child(meshes, Node::new("E", Payload::Mesh)).unwrap();
    let x = tree
        .add_child(mesh, Node::new("x", Payload::Component(ComponentState::default())))
        .unwrap();

    assert_eq!(tree.owning_iteration(x), Some(it));
    assert_eq!(tree.owning_iteration(it), Some(it));
    assert_eq!(tree.owning_iteration(root), None);
    assert_eq!(tree.logical_path(x), "/42/meshes/E/x");
    assert_eq!(tree.node(x).kind(), NodeKind::Component);
    assert_eq!(tree.len(), 5);
}
