//! Reading and writing JVM class files through two interchangeable APIs.
//!
//! The visitor API streams a class as ordered calls on [`ClassVisitor`]
//! and friends. The structured API holds the whole class as a
//! [`ClassNode`]. The [`bridge`] translates between them in both
//! directions, and [`backend`] picks the codec that handles a given class
//! file version so callers can stay on the visitor API.

pub mod analysis;
pub mod annotation;
pub mod attribute;
pub mod backend;
pub mod bridge;
pub mod builder;
pub mod bytecode;
mod bytes;
pub mod class_reader;
pub mod class_writer;
pub mod constant_pool;
pub mod constants;
pub mod desc;
pub mod error;
pub mod frame;
mod guard;
pub mod hierarchy;
pub mod insn;
pub mod node_reader;
pub mod node_writer;
pub mod nodes;
pub mod opcodes;
pub mod types;
pub mod visitor;

pub use backend::{read_class, select_backend, Backend, VersionedClassWriter};
pub use bridge::{ClassNodeReader, ClassNodeWriter};
pub use class_reader::ClassReader;
pub use class_writer::ClassWriter;
pub use error::{Error, Result};
pub use node_reader::{read_class_node, NodeReadOptions};
pub use node_writer::{write_class_node, NodeWriteOptions};
pub use nodes::ClassNode;
pub use visitor::{ClassVisitor, Label, MethodVisitor};
