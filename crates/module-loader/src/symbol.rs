//! Resolved symbols and the external sources a [`crate::LinkageContext`]
//! can resolve them from.

use std::sync::Arc;

/// A concrete symbol bound to a name within some linkage scope.
#[derive(Clone)]
pub struct Symbol {
    pub name: String,
    pub bytes: Arc<Vec<u8>>,
}

impl Symbol {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes: Arc::new(bytes),
        }
    }
}

impl std::fmt::Debug for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Symbol")
            .field("name", &self.name)
            .field("bytes_len", &self.bytes.len())
            .finish()
    }
}

/// An external provider of symbols, used for the host-runtime and system
/// edges of a [`crate::LinkageContext`]. Concrete implementations (e.g. a
/// JDK-equivalent core path set) are supplied by the embedder; the core
/// only defines the resolution contract.
pub trait SymbolSource: Send + Sync {
    fn lookup(&self, name: &str) -> Option<Symbol>;
}

/// A `SymbolSource` with nothing to offer. Useful as a default system or
/// host-runtime edge in tests and in embedders that don't need one.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptySymbolSource;

impl SymbolSource for EmptySymbolSource {
    fn lookup(&self, _name: &str) -> Option<Symbol> {
        None
    }
}

/// A `SymbolSource` backed by an in-memory map, useful for tests and for
/// embedders that pre-resolve their host-runtime symbols.
#[derive(Debug, Default)]
pub struct InMemorySymbolSource(std::collections::BTreeMap<String, Vec<u8>>);

impl InMemorySymbolSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.0.insert(name.into(), bytes.into());
        self
    }
}

impl SymbolSource for InMemorySymbolSource {
    fn lookup(&self, name: &str) -> Option<Symbol> {
        self.0.get(name).map(|bytes| Symbol::new(name, bytes.clone()))
    }
}
