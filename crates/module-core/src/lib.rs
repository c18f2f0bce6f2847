//! Shared identity types for the module loader: names, revision tags, and
//! filesystem primitives used by archives and scratch directories.
//!
//! This crate is intentionally small and dependency-light.

pub mod fs;
pub mod ids;
pub mod path;
pub mod revision;

pub use ids::{InvalidName, ModuleId};
pub use path::{AbsPathBuf, AbsPathError};
pub use revision::{RevisionTag, SequenceCounter};
