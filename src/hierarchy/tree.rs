use crate::error::{PmdError, Result};

use super::node::{Node, NodeId, NodeKind, Payload};

/// Arena holding one rooted entity tree
#[derive(Debug)]
pub(crate) struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    /// Tree consisting of `root` only
    pub(crate) fn new(root: Node) -> Self {
        Self { nodes: vec![root] }
    }

    pub(crate) fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// Add a node that is not yet attached anywhere
    pub(crate) fn insert(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Attach `child` under `parent`.
    ///
    /// Re-linking to the same parent is a no-op. Linking a node that already
    /// belongs to another parent, linking the root, creating a cycle or a
    /// sibling name clash fail with `InvalidState`.
    pub(crate) fn link(&mut self, child: NodeId, parent: NodeId) -> Result<()> {
        if child == self.root() {
            return Err(PmdError::InvalidState(
                "the series root cannot be linked under another node".to_string(),
            ));
        }
        match self.node(child).parent {
            Some(current) if current == parent => return Ok(()),
            Some(_) => {
                return Err(PmdError::InvalidState(format!(
                    "'{}' is already attached to a different parent",
                    self.node(child).name
                )))
            }
            None => {}
        }
        if parent == child || self.ancestors(parent).any(|a| a == child) {
            return Err(PmdError::InvalidState(format!(
                "linking '{}' would create a cycle",
                self.node(child).name
            )));
        }
        let name = self.node(child).name.clone();
        if self.child(parent, &name).is_some() {
            return Err(PmdError::InvalidState(format!(
                "'{}' already has a child named '{name}'",
                self.node(parent).name
            )));
        }

        let position = match self.node(child).iteration() {
            // iterations are kept in numeric order
            Some(state) if self.node(parent).kind() == NodeKind::Series => {
                let index = state.index;
                self.node(parent)
                    .children
                    .iter()
                    .position(|&c| self.node(c).iteration().map_or(false, |s| s.index > index))
            }
            _ => None,
        };
        let siblings = &mut self.node_mut(parent).children;
        match position {
            Some(at) => siblings.insert(at, child),
            None => siblings.push(child),
        }
        self.node_mut(child).parent = Some(parent);

        if self.node(child).dirty {
            self.mark_dirty(parent);
        }
        Ok(())
    }

    /// Insert and attach in one step
    pub(crate) fn add_child(&mut self, parent: NodeId, node: Node) -> Result<NodeId> {
        let id = self.insert(node);
        self.link(id, parent)?;
        Ok(id)
    }

    /// Named child lookup
    pub(crate) fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.node(parent)
            .children
            .iter()
            .copied()
            .find(|&c| self.node(c).name == name)
    }

    pub(crate) fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    /// Iterator over strict ancestors, nearest first
    pub(crate) fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.node(id).parent, move |&p| self.node(p).parent)
    }

    /// Mark `id` and all of its ancestors dirty
    pub(crate) fn mark_dirty(&mut self, id: NodeId) {
        let mut current = Some(id);
        while let Some(node) = current {
            let entry = self.node_mut(node);
            entry.dirty = true;
            current = entry.parent;
        }
    }

    pub(crate) fn is_dirty(&self, id: NodeId) -> bool {
        self.node(id).dirty
    }

    /// The iteration containing `id` (or `id` itself if it is one)
    pub(crate) fn owning_iteration(&self, id: NodeId) -> Option<NodeId> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find(|&n| matches!(self.node(n).payload, Payload::Iteration(_)))
    }

    /// Iteration node with the given index
    pub(crate) fn iteration_by_index(&self, index: u64) -> Option<NodeId> {
        self.children(self.root())
            .iter()
            .copied()
            .find(|&c| self.node(c).iteration().map_or(false, |s| s.index == index))
    }

    /// Names from the root (exclusive) down to `id`
    pub(crate) fn logical_path(&self, id: NodeId) -> String {
        let mut names: Vec<&str> = std::iter::once(id)
            .chain(self.ancestors(id))
            .filter(|&n| n != self.root())
            .map(|n| self.node(n).name.as_str())
            .collect();
        names.reverse();
        format!("/{}", names.join("/"))
    }
}
