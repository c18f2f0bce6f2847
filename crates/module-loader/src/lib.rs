//! Archive ingestion, linkage, and hot-swap orchestration.
//!
//! [`ModuleLoader`] is the entry point: feed it candidate archives via
//! [`ModuleLoader::update`] and it drives leaf-first compilation, isolated
//! per-revision linkage ([`LinkageContext`]), and cascading relink of
//! dependents, publishing the result to anyone holding a reference to the
//! loader and notifying registered [`Listener`]s along the way.

mod dispatch;
mod error;
mod events;
mod linkage;
mod loader;
mod registry;
mod symbol;

pub use dispatch::{Compiler, CompilerDispatch, CompilerPluginFactory};
pub use error::LoaderError;
pub use events::{Listener, ListenerBus, LoaderEvent, ModuleRecord, RejectReason};
pub use linkage::{passes_filter, DependencyEdge, LinkageContext};
pub use loader::{Module, ModuleLoader, ModuleLoaderConfig};
pub use registry::{LinkageSpec, RevisionRegistry};
pub use symbol::{EmptySymbolSource, InMemorySymbolSource, Symbol, SymbolSource};
