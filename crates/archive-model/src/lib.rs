//! Immutable code-bundle abstraction over file-tree and zip-tree roots, and
//! the codec for its embedded descriptor.

mod archive;
mod descriptor;
mod error;

pub use archive::{Archive, ArchiveRoot};
pub use descriptor::{ArchiveDescriptor, DescriptorCodec, OrderedMap, OrderedSet, DEFAULT_DESCRIPTOR_ENTRY};
pub use error::ArchiveError;
