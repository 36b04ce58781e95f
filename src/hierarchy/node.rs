use std::sync::Arc;

use crate::attribute::Attributes;
use crate::close::CloseStatus;
use crate::data::{Buffer, Dataset, Extent, Offset};
use crate::task::Slot;

/// Index of a node inside its series arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// Which of the two per-iteration containers a node is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// `meshes` container
    Meshes,
    /// `particles` container
    Particles,
}

/// Entity kind of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Root of the hierarchy
    Series,
    /// One snapshot
    Iteration,
    /// `meshes` or `particles` group of an iteration
    Container(ContainerKind),
    /// Mesh record
    Mesh,
    /// Particle species
    ParticleSpecies,
    /// Particle record
    Record,
    /// Record component (dataset or constant)
    Component,
}

/// Iteration-specific node state
#[derive(Debug, Clone)]
pub(crate) struct IterationState {
    pub(crate) index: u64,
    pub(crate) close: CloseStatus,
    /// Contents read from the backend (always true for iterations created in memory)
    pub(crate) parsed: bool,
}

/// Chunk operation queued on a component until the next flush
#[derive(Debug, Clone)]
pub(crate) enum PendingChunk {
    Write {
        offset: Offset,
        extent: Extent,
        data: Arc<Buffer>,
    },
    Read {
        offset: Offset,
        extent: Extent,
        slot: Slot<Buffer>,
    },
}

/// Component-specific node state
#[derive(Debug, Clone, Default)]
pub(crate) struct ComponentState {
    pub(crate) dataset: Option<Dataset>,
    /// Dataset declared in the backend
    pub(crate) dataset_created: bool,
    /// Extent grew after the dataset was created
    pub(crate) extended: bool,
    pub(crate) constant: bool,
    pub(crate) pending: Vec<PendingChunk>,
}

/// Kind-specific data attached to the common node
#[derive(Debug, Clone)]
pub(crate) enum Payload {
    Series,
    Iteration(IterationState),
    Container(ContainerKind),
    Mesh,
    ParticleSpecies,
    Record,
    Component(ComponentState),
}

impl Payload {
    pub(crate) fn kind(&self) -> NodeKind {
        match self {
            Payload::Series => NodeKind::Series,
            Payload::Iteration(_) => NodeKind::Iteration,
            Payload::Container(kind) => NodeKind::Container(*kind),
            Payload::Mesh => NodeKind::Mesh,
            Payload::ParticleSpecies => NodeKind::ParticleSpecies,
            Payload::Record => NodeKind::Record,
            Payload::Component(_) => NodeKind::Component,
        }
    }
}

/// Structural unit shared by every entity kind
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) name: String,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) attributes: Attributes,
    /// This node or a descendant carries unflushed mutations
    pub(crate) dirty: bool,
    /// Created in the backend
    pub(crate) written: bool,
    pub(crate) payload: Payload,
}

impl Node {
    /// New entity that still has to be created in the backend
    pub(crate) fn new(name: impl Into<String>, payload: Payload) -> Self {
        Self {
            name: name.into(),
            parent: None,
            children: Vec::new(),
            attributes: Attributes::new(),
            dirty: true,
            written: false,
            payload,
        }
    }

    /// Container that only becomes dirty once something is added to it
    pub(crate) fn container(kind: ContainerKind) -> Self {
        let name = match kind {
            ContainerKind::Meshes => "meshes",
            ContainerKind::Particles => "particles",
        };
        Self {
            dirty: false,
            ..Self::new(name, Payload::Container(kind))
        }
    }

    /// Entity read back from the backend: clean and already written
    pub(crate) fn loaded(name: impl Into<String>, payload: Payload) -> Self {
        Self {
            dirty: false,
            written: true,
            ..Self::new(name, payload)
        }
    }

    pub(crate) fn kind(&self) -> NodeKind {
        self.payload.kind()
    }

    pub(crate) fn iteration(&self) -> Option<&IterationState> {
        match &self.payload {
            Payload::Iteration(state) => Some(state),
            _ => None,
        }
    }

    pub(crate) fn iteration_mut(&mut self) -> Option<&mut IterationState> {
        match &mut self.payload {
            Payload::Iteration(state) => Some(state),
            _ => None,
        }
    }

    pub(crate) fn component(&self) -> Option<&ComponentState> {
        match &self.payload {
            Payload::Component(state) => Some(state),
            _ => None,
        }
    }

    pub(crate) fn component_mut(&mut self) -> Option<&mut ComponentState> {
        match &mut self.payload {
            Payload::Component(state) => Some(state),
            _ => None,
        }
    }
}
