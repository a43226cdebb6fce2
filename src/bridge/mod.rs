//! Translation between the visitor protocol and the structured model.
//!
//! [`ClassNodeReader`] replays a [`ClassNode`](crate::nodes::ClassNode) as
//! visitor calls; [`ClassNodeWriter`] assembles one from visitor calls.

pub mod annotations;
pub mod constants;
pub mod frames;
pub mod labels;
pub mod reader;
pub mod writer;

pub use labels::LabelMap;
pub use reader::{ClassNodeReader, InstructionCursor};
pub use writer::{ClassNodeWriter, DelayBuffer};
