use log::debug;

use crate::attribute::AttributeValue;
use crate::close::CloseStatus;
use crate::data::{Element, FloatElement};
use crate::error::{PmdError, Result};
use crate::hierarchy::{ContainerKind, Node, NodeId, Payload, Tree};

use super::record::{Mesh, ParticleSpecies};
use super::Handle;

/// One snapshot of the simulation
#[derive(Debug, Clone)]
pub struct Iteration {
    handle: Handle,
    index: u64,
}

impl Iteration {
    pub(crate) fn new(handle: Handle, index: u64) -> Self {
        Self { handle, index }
    }

    /// Iteration index
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Whether anything below this iteration awaits a flush
    pub fn is_dirty(&self) -> bool {
        self.handle.is_dirty()
    }

    /// Whether the iteration contents have been read from the backend
    pub fn is_parsed(&self) -> bool {
        let inner = self.handle.lock();
        inner
            .tree
            .node(self.handle.id)
            .iteration()
            .map_or(true, |s| s.parsed)
    }

    /// Current close state
    pub fn close_status(&self) -> CloseStatus {
        let inner = self.handle.lock();
        inner
            .tree
            .node(self.handle.id)
            .iteration()
            .map_or(CloseStatus::Open, |s| s.close)
    }

    /// Whether the writer marked this iteration as complete
    pub fn closed_by_writer(&self) -> Result<bool> {
        match self.handle.attribute("closed") {
            Ok(value) => Ok(value.as_u64().map_or(false, |v| v != 0)),
            Err(PmdError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Simulation time, converted to `T`
    pub fn time<T: FloatElement>(&self) -> Result<T> {
        self.handle.f64_attribute("time").map(T::from_f64)
    }

    /// Set the simulation time
    pub fn set_time<T: FloatElement>(&self, time: T) -> Result<()> {
        self.handle.set_attribute("time", time.into_attribute())
    }

    /// Time step, converted to `T`
    pub fn dt<T: FloatElement>(&self) -> Result<T> {
        self.handle.f64_attribute("dt").map(T::from_f64)
    }

    /// Set the time step
    pub fn set_dt<T: FloatElement>(&self, dt: T) -> Result<()> {
        self.handle.set_attribute("dt", dt.into_attribute())
    }

    /// Conversion factor of `time` and `dt` to seconds
    pub fn time_unit_si(&self) -> Result<f64> {
        self.handle.f64_attribute("timeUnitSI")
    }

    /// Set the conversion factor of `time` and `dt` to seconds
    pub fn set_time_unit_si(&self, unit: f64) -> Result<()> {
        self.handle.set_attribute("timeUnitSI", unit)
    }

    /// Set an arbitrary attribute
    pub fn set_attribute(&self, name: &str, value: impl Into<AttributeValue>) -> Result<()> {
        self.handle.set_attribute(name, value)
    }

    /// Read an attribute
    pub fn attribute(&self, name: &str) -> Result<AttributeValue> {
        self.handle.attribute(name)
    }

    /// Names of all attributes
    pub fn attribute_names(&self) -> Result<Vec<String>> {
        self.handle.attribute_names()
    }

    fn container(&self, kind: ContainerKind) -> Result<Handle> {
        let name = match kind {
            ContainerKind::Meshes => "meshes",
            ContainerKind::Particles => "particles",
        };
        self.handle.child_or_insert(name, || Node::container(kind))
    }

    /// Mesh `name`, created on first reference
    pub fn mesh(&self, name: &str) -> Result<Mesh> {
        let container = self.container(ContainerKind::Meshes)?;
        let handle = container.child_or_insert(name, || Mesh::node(name))?;
        Ok(Mesh::new(handle))
    }

    /// Names of all meshes
    pub fn mesh_names(&self) -> Result<Vec<String>> {
        self.container(ContainerKind::Meshes)?.child_names()
    }

    /// Particle species `name`, created on first reference
    pub fn particle_species(&self, name: &str) -> Result<ParticleSpecies> {
        let container = self.container(ContainerKind::Particles)?;
        let handle =
            container.child_or_insert(name, || Node::new(name, Payload::ParticleSpecies))?;
        Ok(ParticleSpecies::new(handle))
    }

    /// Names of all particle species
    pub fn particle_species_names(&self) -> Result<Vec<String>> {
        self.container(ContainerKind::Particles)?.child_names()
    }

    /// Close the iteration.
    ///
    /// Further mutations fail with `InvalidState`. With `flush = true` the
    /// close is propagated to the backend before returning; otherwise it is
    /// carried by the next flush. Closing twice is a no-op.
    pub fn close(&self, flush: bool) -> Result<()> {
        let mut inner = self.handle.lock();
        let id = self.handle.id;
        inner.ensure_parsed(id)?;

        let status = current_status(&inner.tree, id);
        if status.is_closed() {
            return Ok(());
        }
        if inner.access.is_writable() {
            inner.tree.node_mut(id).attributes.set("closed", 1u8);
        }
        if let Some(state) = inner.tree.node_mut(id).iteration_mut() {
            state.close = state.close.request_close();
        }
        inner.tree.mark_dirty(id);
        debug!("Iteration {} closed in frontend", self.index);

        if flush {
            inner.flush(false)?;
        }
        Ok(())
    }
}

fn current_status(tree: &Tree, id: NodeId) -> CloseStatus {
    tree.node(id)
        .iteration()
        .map_or(CloseStatus::Open, |s| s.close)
}

/// Hands out iterations for writing one after another.
///
/// Requesting a new index closes (and flushes) the previously handed out
/// iteration, which is how streaming producers publish each snapshot.
#[derive(Debug)]
pub struct WriteIterations {
    handle: Handle,
    active: Option<Iteration>,
}

impl WriteIterations {
    pub(crate) fn new(handle: Handle) -> Self {
        Self {
            handle,
            active: None,
        }
    }

    /// Iteration `index`, closing the previous one if it differs
    pub fn get(&mut self, index: u64) -> Result<Iteration> {
        if let Some(active) = &self.active {
            if active.index() == index {
                return Ok(active.clone());
            }
        }
        if let Some(previous) = self.active.take() {
            previous.close(true)?;
        }

        let id = {
            let mut inner = self.handle.lock();
            match inner.tree.iteration_by_index(index) {
                Some(id) => id,
                None => inner.insert_iteration(index)?,
            }
        };
        let iteration = Iteration::new(self.handle.at(id), index);
        self.active = Some(iteration.clone());
        Ok(iteration)
    }

    /// Iteration currently being written
    pub fn active(&self) -> Option<&Iteration> {
        self.active.as_ref()
    }
}
