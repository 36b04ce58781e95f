//! # Attribute Store
//!
//! Every entity of the hierarchy carries a set of named, typed attributes.
//! Writes land in memory and are tracked per name so that a flush emits one
//! write task per changed attribute and nothing for unchanged ones.

mod store;
mod value;

#[cfg(test)]
mod tests;

pub use store::Attributes;
pub use value::AttributeValue;
