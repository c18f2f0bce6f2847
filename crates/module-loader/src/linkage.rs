//! Per-revision isolated symbol-resolution context.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use archive_model::OrderedSet;

use crate::error::LoaderError;
use crate::symbol::{Symbol, SymbolSource};

/// A resolved edge to one declared dependency: the dependency's own
/// linkage context (for resolving through it) and the export filter it
/// publishes, captured at the moment the edge was built.
pub struct DependencyEdge {
    pub name: String,
    pub context: Arc<LinkageContext>,
    pub export_filter: OrderedSet<String>,
}

/// Per-revision isolated symbol-resolution scope.
///
/// Once published, a `LinkageContext` is immutable other than its local
/// symbol cache, which only ever grows monotonically as names are first
/// resolved.
pub struct LinkageContext {
    resource_roots: Vec<PathBuf>,
    dependency_edges: Vec<DependencyEdge>,
    system_edge: Arc<dyn SymbolSource>,
    host_runtime_edge: Arc<dyn SymbolSource>,
    import_filter: OrderedSet<String>,
    export_filter: OrderedSet<String>,
    app_import_filter: OrderedSet<String>,
    default_app_packages: OrderedSet<String>,
    local_cache: Mutex<std::collections::HashMap<String, Symbol>>,
}

impl LinkageContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resource_roots: Vec<PathBuf>,
        dependency_edges: Vec<DependencyEdge>,
        system_edge: Arc<dyn SymbolSource>,
        host_runtime_edge: Arc<dyn SymbolSource>,
        import_filter: OrderedSet<String>,
        export_filter: OrderedSet<String>,
        app_import_filter: OrderedSet<String>,
        default_app_packages: OrderedSet<String>,
    ) -> Self {
        Self {
            resource_roots,
            dependency_edges,
            system_edge,
            host_runtime_edge,
            import_filter,
            export_filter,
            app_import_filter,
            default_app_packages,
            local_cache: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// The filter this module itself publishes to consumers resolving
    /// through a dependency edge bound to this context.
    pub fn export_filter(&self) -> &OrderedSet<String> {
        &self.export_filter
    }

    pub fn resource_roots(&self) -> &[PathBuf] {
        &self.resource_roots
    }

    /// Insert a symbol directly into the local cache, bypassing the normal
    /// resolution order. Used to prime the cache with a revision's own
    /// compiled outputs, which must never be satisfied by walking a
    /// dependency or the host runtime.
    pub fn prime_local(&self, symbol: Symbol) {
        self.local_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(symbol.name.clone(), symbol);
    }

    /// Resolve `name` to a concrete symbol.
    ///
    /// `must_initialize` signals that the caller expects side effects
    /// associated with first use of the symbol; the loader sets this when
    /// warming the cache immediately after publication.
    pub fn resolve(&self, name: &str, must_initialize: bool) -> Result<Symbol, LoaderError> {
        let _ = must_initialize;

        if let Some(symbol) = self
            .local_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
        {
            return Ok(symbol);
        }

        if self.app_import_permits(name) {
            if let Some(symbol) = self.host_runtime_edge.lookup(name) {
                return Ok(self.cache_and_return(symbol));
            }
        }

        for edge in &self.dependency_edges {
            if !passes_filter(&edge.export_filter, name) {
                continue;
            }
            if !passes_filter(&self.import_filter, name) {
                continue;
            }
            if let Ok(symbol) = edge.context.resolve(name, false) {
                return Ok(self.cache_and_return(symbol));
            }
        }

        // System edge and local resource roots together form step 4: the
        // host runtime's core paths are themselves a local resource, just
        // one supplied by the embedder rather than this archive.
        if let Some(symbol) = self.system_edge.lookup(name) {
            return Ok(self.cache_and_return(symbol));
        }

        if let Some(symbol) = self.resolve_from_local_roots(name) {
            return Ok(self.cache_and_return(symbol));
        }

        Err(LoaderError::NotFound(name.to_string()))
    }

    fn cache_and_return(&self, symbol: Symbol) -> Symbol {
        self.local_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(symbol.name.clone(), symbol.clone());
        symbol
    }

    fn app_import_permits(&self, name: &str) -> bool {
        if !self.app_import_filter.is_empty() {
            return passes_filter(&self.app_import_filter, name);
        }
        passes_filter(&self.default_app_packages, name)
    }

    fn resolve_from_local_roots(&self, name: &str) -> Option<Symbol> {
        let relative = name.replace('.', "/");
        for root in &self.resource_roots {
            let candidate = root.join(&relative);
            if candidate.is_file() {
                if let Ok(bytes) = std::fs::read(&candidate) {
                    return Some(Symbol::new(name, bytes));
                }
            }
        }
        None
    }
}

/// An empty filter is unrestricted; a non-empty filter accepts a candidate
/// only if its dotted-name-to-slash-path representation starts with one of
/// the listed prefixes.
pub fn passes_filter(filter: &OrderedSet<String>, name: &str) -> bool {
    if filter.is_empty() {
        return true;
    }
    let path = name.replace('.', "/");
    filter.iter().any(|prefix| path.starts_with(prefix.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::InMemorySymbolSource;

    fn filter(prefixes: &[&str]) -> OrderedSet<String> {
        prefixes.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_filter_is_unrestricted() {
        assert!(passes_filter(&OrderedSet::new(), "anything.at.all"));
    }

    #[test]
    fn nonempty_filter_requires_prefix_match() {
        let f = filter(&["com/acme/api"]);
        assert!(passes_filter(&f, "com.acme.api.Widget"));
        assert!(!passes_filter(&f, "com.acme.internal.Widget"));
    }

    #[test]
    fn resolves_from_local_cache_before_anything_else() {
        let ctx = LinkageContext::new(
            vec![],
            vec![],
            Arc::new(InMemorySymbolSource::new().with("x", b"wrong".to_vec())),
            Arc::new(InMemorySymbolSource::new()),
            OrderedSet::new(),
            OrderedSet::new(),
            OrderedSet::new(),
            OrderedSet::new(),
        );
        ctx.prime_local(Symbol::new("x", b"right".to_vec()));
        let symbol = ctx.resolve("x", false).unwrap();
        assert_eq!(&*symbol.bytes, b"right");
    }

    #[test]
    fn resolves_through_host_runtime_when_app_import_permits() {
        let ctx = LinkageContext::new(
            vec![],
            vec![],
            Arc::new(InMemorySymbolSource::new()),
            Arc::new(InMemorySymbolSource::new().with("com.acme.Main", b"host".to_vec())),
            OrderedSet::new(),
            OrderedSet::new(),
            filter(&["com/acme"]),
            OrderedSet::new(),
        );
        let symbol = ctx.resolve("com.acme.Main", false).unwrap();
        assert_eq!(&*symbol.bytes, b"host");
    }
}
