//! # Flush Scheduler
//!
//! Translates the pending mutations of a hierarchy into one ordered batch of
//! backend tasks, hands the batch to the backend, and only then commits the
//! new state to the tree.
//!
//! ## Ordering
//!
//! The walk is depth-first from the root, visits only dirty nodes and follows
//! each node's child order (numeric for iterations, insertion order
//! otherwise). For every visited node it emits:
//!
//! 1. the create task (`CreateFile`, `CreatePath` or `CreateDataset`) if the
//!    node is not yet written, or `ExtendDataset` after a resize,
//! 2. one `WriteAttribute` per changed attribute,
//! 3. the pending chunk reads and writes of a component, in submission order,
//! 4. the tasks of its dirty children,
//! 5. `ClosePath` (and `CloseFile` for file-based layout) for an iteration
//!    whose close was requested.
//!
//! A record with a `SCALAR` component has no group of its own: the dataset
//! lives at the record's location, so the component's tasks come first and
//! the record's attributes follow.
//!
//! ## Commit
//!
//! Planning is pure. If the backend fails anywhere in the batch, the tree is
//! left untouched so the same flush can be retried; if the batch succeeds,
//! dirty flags and pending chunks of every visited node are cleared and close
//! states advance.

mod report;

#[cfg(test)]
mod tests;

use log::{debug, warn};

use crate::attribute::{AttributeValue, Attributes};
use crate::backend::Backend;
use crate::close::CloseStatus;
use crate::error::{PmdError, Result};
use crate::hierarchy::{ContainerKind, NodeId, NodeKind, PendingChunk, Tree, SCALAR};
use crate::series::naming::{container_name, iteration_path, FileNaming, IterationEncoding};
use crate::task::{Location, StepMode, Task, TaskKind, TaskQueue};

pub use report::FlushReport;

/// Inputs of a flush beyond the tree itself
#[derive(Debug, Clone, Copy)]
pub(crate) struct FlushContext<'a> {
    pub(crate) naming: &'a FileNaming,
    /// Bracket the batch in a backend step
    pub(crate) steps: bool,
    /// Series teardown: also release the series file
    pub(crate) finalize: bool,
}

/// Task batch plus what to commit once it succeeded
#[derive(Debug, Default)]
pub(crate) struct FlushPlan {
    pub(crate) queue: TaskQueue,
    pub(crate) visited: Vec<NodeId>,
    pub(crate) closing: Vec<NodeId>,
    pub(crate) stepped: bool,
    /// Dirty series attributes reached at least one file
    pub(crate) root_attributes_emitted: bool,
}

/// Default `basePath`
pub(crate) const DEFAULT_BASE_PATH: &str = "/data/%T/";
/// Default `meshesPath`
pub(crate) const DEFAULT_MESHES_PATH: &str = "meshes/";
/// Default `particlesPath`
pub(crate) const DEFAULT_PARTICLES_PATH: &str = "particles/";

fn string_attribute<'a>(attributes: &'a Attributes, name: &str, default: &'a str) -> &'a str {
    attributes
        .get(name)
        .and_then(|value| value.as_str())
        .unwrap_or(default)
}

/// Walks dirty nodes and produces the task batch
pub(crate) struct FlushScheduler<'a> {
    tree: &'a Tree,
    ctx: FlushContext<'a>,
    base_path: String,
    meshes: String,
    particles: String,
    plan: FlushPlan,
}

impl<'a> FlushScheduler<'a> {
    /// Plan one flush cycle without touching the tree
    pub(crate) fn plan(tree: &'a Tree, ctx: FlushContext<'a>) -> Result<FlushPlan> {
        let root = tree.node(tree.root());
        let mut scheduler = Self {
            tree,
            ctx,
            base_path: string_attribute(&root.attributes, "basePath", DEFAULT_BASE_PATH).to_string(),
            meshes: container_name(string_attribute(
                &root.attributes,
                "meshesPath",
                DEFAULT_MESHES_PATH,
            )),
            particles: container_name(string_attribute(
                &root.attributes,
                "particlesPath",
                DEFAULT_PARTICLES_PATH,
            )),
            plan: FlushPlan::default(),
        };
        scheduler.visit_series()?;
        Ok(scheduler.plan)
    }

    fn push(&mut self, target: NodeId, location: &Location, kind: TaskKind) {
        self.plan.queue.push(Task::new(target, location.clone(), kind));
    }

    fn push_attributes<'b>(
        &mut self,
        target: NodeId,
        location: &Location,
        entries: impl Iterator<Item = (&'b str, &'b AttributeValue)>,
    ) {
        for (name, value) in entries {
            self.push(
                target,
                location,
                TaskKind::WriteAttribute {
                    name: name.to_string(),
                    value: value.clone(),
                },
            );
        }
    }

    fn file_based(&self) -> bool {
        self.ctx.naming.encoding() == IterationEncoding::FileBased
    }

    fn visit_series(&mut self) -> Result<()> {
        let tree = self.tree;
        let root = tree.root();
        let node = tree.node(root);
        let series_file = Location::root(self.ctx.naming.series_file());

        if node.dirty {
            self.plan.visited.push(root);
            if !self.file_based() {
                if !node.written {
                    self.push(root, &series_file, TaskKind::CreateFile);
                }
                self.push_attributes(root, &series_file, node.attributes.dirty_entries());
                self.plan.root_attributes_emitted = true;
            }
            for &child in tree.children(root) {
                let Some(state) = tree.node(child).iteration() else {
                    continue;
                };
                if tree.node(child).dirty {
                    self.visit_iteration(child)?;
                } else if self.file_based()
                    && node.attributes.is_dirty()
                    && tree.node(child).written
                    && state.parsed
                    && state.close != CloseStatus::ClosedInBackend
                {
                    // series attributes are repeated in every open iteration file
                    let file = Location::root(self.ctx.naming.file_for(state.index));
                    self.push_attributes(root, &file, node.attributes.dirty_entries());
                    self.plan.root_attributes_emitted = true;
                }
            }
            if self.file_based() && node.attributes.is_dirty() && !self.plan.root_attributes_emitted
            {
                let written = tree
                    .children(root)
                    .iter()
                    .any(|&c| tree.node(c).iteration().is_some() && tree.node(c).written);
                if written && self.ctx.finalize {
                    return Err(PmdError::InvalidState(
                        "series attributes changed after every iteration file was closed; \
                         they can only be written with a new iteration"
                            .to_string(),
                    ));
                } else if written {
                    warn!("Series attributes stay pending until a new iteration is written");
                }
            }
        }

        if self.plan.queue.is_empty() && !self.ctx.finalize {
            return Ok(());
        }

        let mut tail = Vec::new();
        if self.ctx.finalize && !self.file_based() && (node.written || node.dirty) {
            tail.push(Task::new(root, series_file.clone(), TaskKind::CloseFile));
        }
        if self.ctx.steps && !self.plan.queue.is_empty() {
            let begin = TaskKind::AdvanceStep {
                mode: StepMode::Begin,
            };
            // the step opens on an existing file
            let position = match self.plan.queue.iter().next() {
                Some(first) if matches!(first.kind, TaskKind::CreateFile) => 1,
                _ => 0,
            };
            self.plan
                .queue
                .insert(position, Task::new(root, series_file.clone(), begin));
            let end = TaskKind::AdvanceStep {
                mode: StepMode::End,
            };
            self.push(root, &series_file, end);
            self.plan.stepped = true;
        }
        for task in tail {
            self.plan.queue.push(task);
        }
        Ok(())
    }

    fn visit_iteration(&mut self, id: NodeId) -> Result<()> {
        let tree = self.tree;
        let node = tree.node(id);
        let Some(state) = node.iteration() else {
            return Ok(());
        };
        let file = self.ctx.naming.file_for(state.index);
        let location = Location::root(&file).with_path(iteration_path(&self.base_path, state.index));
        self.plan.visited.push(id);

        if self.file_based() {
            let root = tree.root();
            let series = &tree.node(root).attributes;
            let file_root = Location::root(&file);
            if !node.written {
                self.push(id, &file_root, TaskKind::CreateFile);
                self.push_attributes(root, &file_root, series.iter());
                self.plan.root_attributes_emitted = true;
            } else if series.is_dirty() {
                self.push_attributes(root, &file_root, series.dirty_entries());
                self.plan.root_attributes_emitted = true;
            }
        }

        if !node.written {
            self.push(id, &location, TaskKind::CreatePath);
        }
        self.push_attributes(id, &location, node.attributes.dirty_entries());

        for &child in tree.children(id) {
            let child_node = tree.node(child);
            if !child_node.dirty {
                continue;
            }
            let name = match child_node.kind() {
                NodeKind::Container(ContainerKind::Meshes) => self.meshes.clone(),
                NodeKind::Container(ContainerKind::Particles) => self.particles.clone(),
                _ => child_node.name.clone(),
            };
            self.visit_group(child, location.join(&name))?;
        }

        if state.close == CloseStatus::ClosedInFrontend {
            self.push(id, &location, TaskKind::ClosePath);
            if self.file_based() {
                self.push(id, &Location::root(&file), TaskKind::CloseFile);
            }
            self.plan.closing.push(id);
        }
        Ok(())
    }

    fn visit_group(&mut self, id: NodeId, location: Location) -> Result<()> {
        let tree = self.tree;
        let node = tree.node(id);
        self.plan.visited.push(id);

        let scalar = match node.kind() {
            NodeKind::Mesh | NodeKind::Record => tree.child(id, SCALAR),
            _ => None,
        };
        if let Some(component) = scalar {
            if tree.node(component).dirty {
                self.visit_component(component, location.clone())?;
            }
            self.push_attributes(id, &location, node.attributes.dirty_entries());
            return Ok(());
        }

        if !node.written {
            self.push(id, &location, TaskKind::CreatePath);
        }
        self.push_attributes(id, &location, node.attributes.dirty_entries());

        for &child in tree.children(id) {
            let child_node = tree.node(child);
            if !child_node.dirty {
                continue;
            }
            let child_location = location.join(&child_node.name);
            if child_node.kind() == NodeKind::Component {
                self.visit_component(child, child_location)?;
            } else {
                self.visit_group(child, child_location)?;
            }
        }
        Ok(())
    }

    fn visit_component(&mut self, id: NodeId, location: Location) -> Result<()> {
        let node = self.tree.node(id);
        let Some(state) = node.component() else {
            return Ok(());
        };
        self.plan.visited.push(id);

        if state.constant {
            if !node.written {
                self.push(id, &location, TaskKind::CreatePath);
            }
            self.push_attributes(id, &location, node.attributes.dirty_entries());
            return Ok(());
        }

        let dataset = state.dataset.as_ref().ok_or_else(|| {
            PmdError::InvalidState(format!(
                "record component {} has no dataset declared",
                self.tree.logical_path(id)
            ))
        })?;
        if !state.dataset_created {
            self.push(
                id,
                &location,
                TaskKind::CreateDataset {
                    datatype: dataset.datatype,
                    extent: dataset.extent.clone(),
                },
            );
        } else if state.extended {
            self.push(
                id,
                &location,
                TaskKind::ExtendDataset {
                    extent: dataset.extent.clone(),
                },
            );
        }
        self.push_attributes(id, &location, node.attributes.dirty_entries());

        for chunk in &state.pending {
            let kind = match chunk {
                PendingChunk::Write {
                    offset,
                    extent,
                    data,
                } => TaskKind::WriteChunk {
                    offset: offset.clone(),
                    extent: extent.clone(),
                    data: data.clone(),
                },
                PendingChunk::Read {
                    offset,
                    extent,
                    slot,
                } => TaskKind::ReadChunk {
                    offset: offset.clone(),
                    extent: extent.clone(),
                    datatype: dataset.datatype,
                    slot: slot.clone(),
                },
            };
            self.push(id, &location, kind);
        }
        Ok(())
    }
}

/// Commit a successful batch to the tree
pub(crate) fn commit(tree: &mut Tree, plan: &FlushPlan) {
    let root = tree.root();
    for &id in &plan.visited {
        let node = tree.node_mut(id);
        if id == root {
            if plan.root_attributes_emitted {
                node.attributes.clear_dirty();
            }
            node.dirty = node.attributes.is_dirty();
        } else {
            node.attributes.clear_dirty();
            node.dirty = false;
        }
        node.written = true;

        if let Some(state) = node.component_mut() {
            state.pending.clear();
            state.extended = false;
            if !state.constant && state.dataset.is_some() {
                state.dataset_created = true;
            }
        }
        if plan.stepped {
            if let Some(state) = node.iteration_mut() {
                state.close = state.close.after_step();
            }
        }
    }
    for &id in &plan.closing {
        if let Some(state) = tree.node_mut(id).iteration_mut() {
            state.close = state.close.after_flush();
        }
    }
}

/// Run one flush cycle: plan, execute, commit
pub(crate) fn run(tree: &mut Tree, backend: &mut dyn Backend, ctx: FlushContext<'_>) -> Result<FlushReport> {
    let mut plan = FlushScheduler::plan(tree, ctx)?;
    let tasks = plan.queue.len();

    if tasks == 0 {
        // ranks without work still take part in a collective flush
        backend.flush()?;
        return Ok(FlushReport::default());
    }

    debug!(
        "Flushing {tasks} tasks for {} dirty nodes to the {} backend",
        plan.visited.len(),
        backend.name()
    );
    for task in plan.queue.drain() {
        backend.execute(task)?;
    }
    backend.flush()?;

    commit(tree, &plan);
    Ok(FlushReport {
        tasks,
        nodes_cleared: plan.visited.len(),
        iterations_closed: plan.closing.len(),
        stepped: plan.stepped,
    })
}
