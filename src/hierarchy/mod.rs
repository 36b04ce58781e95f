//! # Hierarchy Nodes
//!
//! The entity tree (series → iterations → meshes / particle species →
//! records → components) lives in one arena per series. Handles refer to
//! nodes by [`NodeId`], so every copy of a handle observes the same dirty,
//! written and close state.
//!
//! Dirtiness is a subtree OR: marking a node dirty marks all of its
//! ancestors. Only the flush scheduler clears it, and only for nodes whose
//! tasks the backend confirmed.

mod node;
mod tree;

#[cfg(test)]
mod tests;

pub use node::{ContainerKind, NodeId, NodeKind};
pub(crate) use node::{ComponentState, IterationState, Node, Payload, PendingChunk};
pub(crate) use tree::Tree;

/// Component name whose dataset lives at the record's own location
pub const SCALAR: &str = "SCALAR";
