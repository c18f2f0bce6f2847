//! Ordered map of `(moduleId, revision) -> LinkageContext`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use archive_model::OrderedSet;
use dependency_graph::DependencyGraph;
use module_core::RevisionTag;

use crate::error::LoaderError;
use crate::linkage::{DependencyEdge, LinkageContext};
use crate::symbol::SymbolSource;

/// A to-be-loaded linkage spec: everything [`RevisionRegistry::load`] needs
/// to materialize a [`LinkageContext`], once every declared dependency
/// revision is itself already loaded.
#[derive(Clone)]
pub struct LinkageSpec {
    pub resource_roots: Vec<PathBuf>,
    pub declared_dependency_names: Vec<String>,
    pub dependencies: Vec<RevisionTag>,
    pub import_filter: OrderedSet<String>,
    pub export_filter: OrderedSet<String>,
    pub app_import_filter: OrderedSet<String>,
}

pub struct RevisionRegistry {
    specs: Mutex<BTreeMap<RevisionTag, LinkageSpec>>,
    contexts: Mutex<BTreeMap<RevisionTag, Arc<LinkageContext>>>,
    system_edge: Arc<dyn SymbolSource>,
    host_runtime_edge: Arc<dyn SymbolSource>,
    default_app_packages: OrderedSet<String>,
}

impl RevisionRegistry {
    pub fn new(
        system_edge: Arc<dyn SymbolSource>,
        host_runtime_edge: Arc<dyn SymbolSource>,
        default_app_packages: OrderedSet<String>,
    ) -> Self {
        Self {
            specs: Mutex::new(BTreeMap::new()),
            contexts: Mutex::new(BTreeMap::new()),
            system_edge,
            host_runtime_edge,
            default_app_packages,
        }
    }

    /// Idempotent: returns whether the insert actually happened.
    pub fn add_spec(&self, tag: RevisionTag, spec: LinkageSpec) -> bool {
        let mut specs = self.specs.lock().unwrap_or_else(|p| p.into_inner());
        if specs.contains_key(&tag) {
            return false;
        }
        specs.insert(tag, spec);
        true
    }

    pub fn load(&self, tag: &RevisionTag) -> Result<Arc<LinkageContext>, LoaderError> {
        let spec = self
            .specs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(tag)
            .cloned()
            .ok_or_else(|| LoaderError::NotFound(tag.to_string()))?;

        let contexts = self.contexts.lock().unwrap_or_else(|p| p.into_inner());
        let mut dependency_edges = Vec::with_capacity(spec.dependencies.len());
        for dep_tag in &spec.dependencies {
            let dep_ctx = contexts.get(dep_tag).cloned().ok_or_else(|| {
                LoaderError::LinkageFailure(format!(
                    "dependency revision {dep_tag} not loaded for {tag}"
                ))
            })?;
            dependency_edges.push(DependencyEdge {
                name: dep_tag.name().to_string(),
                export_filter: dep_ctx.export_filter().clone(),
                context: dep_ctx,
            });
        }
        drop(contexts);

        let context = Arc::new(LinkageContext::new(
            spec.resource_roots.clone(),
            dependency_edges,
            self.system_edge.clone(),
            self.host_runtime_edge.clone(),
            spec.import_filter.clone(),
            spec.export_filter.clone(),
            spec.app_import_filter.clone(),
            self.default_app_packages.clone(),
        ));

        self.contexts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(tag.clone(), context.clone());

        Ok(context)
    }

    /// Removes `tag`'s spec and materialized context, if any.
    pub fn unload(&self, tag: &RevisionTag) {
        self.specs.lock().unwrap_or_else(|p| p.into_inner()).remove(tag);
        self.contexts.lock().unwrap_or_else(|p| p.into_inner()).remove(tag);
    }

    pub fn unload_all(&self, name: &str) {
        let tags: Vec<RevisionTag> = self
            .specs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .filter(|tag| tag.name() == name)
            .cloned()
            .collect();
        for tag in tags {
            self.unload(&tag);
        }
    }

    /// The highest-sequence revision registered for `name`, if any.
    ///
    /// Relies on `RevisionTag`'s ordering (name ascending, sequence
    /// descending) so that every name's latest revision sorts first among
    /// its siblings in the backing sorted map.
    pub fn latest(&self, name: &str) -> Option<RevisionTag> {
        let specs = self.specs.lock().unwrap_or_else(|p| p.into_inner());
        let lo = RevisionTag::new(name.to_string(), i64::MAX);
        let hi = RevisionTag::new(name.to_string(), i64::MIN);
        specs.range(lo..=hi).next().map(|(tag, _)| tag.clone())
    }

    pub fn latest_map(&self) -> BTreeMap<String, RevisionTag> {
        let specs = self.specs.lock().unwrap_or_else(|p| p.into_inner());
        let mut out = BTreeMap::new();
        for tag in specs.keys() {
            out.entry(tag.name().to_string())
                .or_insert_with(|| tag.clone());
        }
        out
    }

    /// The dependency graph over every name's latest revision, built from
    /// that revision's declared dependency names.
    pub fn graph(&self) -> DependencyGraph {
        let specs = self.specs.lock().unwrap_or_else(|p| p.into_inner());
        let mut graph = DependencyGraph::new();
        let mut seen_names = std::collections::BTreeSet::new();

        for (tag, spec) in specs.iter() {
            if !seen_names.insert(tag.name().to_string()) {
                continue;
            }
            graph.add_vertices([tag.name().to_string()]);
            graph.add_outgoing(tag.name(), spec.declared_dependency_names.clone());
        }

        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::EmptySymbolSource;

    fn registry() -> RevisionRegistry {
        RevisionRegistry::new(
            Arc::new(EmptySymbolSource),
            Arc::new(EmptySymbolSource),
            OrderedSet::new(),
        )
    }

    fn spec(deps: Vec<RevisionTag>, names: Vec<&str>) -> LinkageSpec {
        LinkageSpec {
            resource_roots: vec![],
            declared_dependency_names: names.into_iter().map(String::from).collect(),
            dependencies: deps,
            import_filter: OrderedSet::new(),
            export_filter: OrderedSet::new(),
            app_import_filter: OrderedSet::new(),
        }
    }

    #[test]
    fn latest_picks_highest_sequence() {
        let reg = registry();
        reg.add_spec(RevisionTag::new("a", 1), spec(vec![], vec![]));
        reg.add_spec(RevisionTag::new("a", 2), spec(vec![], vec![]));
        assert_eq!(reg.latest("a"), Some(RevisionTag::new("a", 2)));
    }

    #[test]
    fn add_spec_is_idempotent() {
        let reg = registry();
        assert!(reg.add_spec(RevisionTag::new("a", 1), spec(vec![], vec![])));
        assert!(!reg.add_spec(RevisionTag::new("a", 1), spec(vec![], vec![])));
    }

    #[test]
    fn load_fails_when_dependency_not_yet_loaded() {
        let reg = registry();
        reg.add_spec(
            RevisionTag::new("a", 1),
            spec(vec![RevisionTag::new("b", 1)], vec!["b"]),
        );
        assert!(matches!(
            reg.load(&RevisionTag::new("a", 1)),
            Err(LoaderError::LinkageFailure(_))
        ));
    }

    #[test]
    fn load_succeeds_once_dependency_loaded_first() {
        let reg = registry();
        reg.add_spec(RevisionTag::new("b", 1), spec(vec![], vec![]));
        reg.load(&RevisionTag::new("b", 1)).unwrap();

        reg.add_spec(
            RevisionTag::new("a", 1),
            spec(vec![RevisionTag::new("b", 1)], vec!["b"]),
        );
        assert!(reg.load(&RevisionTag::new("a", 1)).is_ok());
    }
}
