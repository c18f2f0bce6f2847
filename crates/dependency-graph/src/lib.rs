//! A directed graph over module names, used to drive leaf-first compilation
//! and cascading relink of dependents.
//!
//! Vertices are module *names* (not full revision identities) — the graph
//! tracks which name depends on which; the revision actually bound to an
//! edge is resolved separately at link time.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    vertices: BTreeSet<String>,
    outgoing: BTreeMap<String, BTreeSet<String>>,
    incoming: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertices(&mut self, names: impl IntoIterator<Item = String>) {
        for name in names {
            self.vertices.insert(name);
        }
    }

    pub fn add_outgoing(&mut self, src: &str, targets: impl IntoIterator<Item = String>) {
        let entry = self.outgoing.entry(src.to_string()).or_default();
        for target in targets {
            entry.insert(target.clone());
            self.incoming
                .entry(target)
                .or_default()
                .insert(src.to_string());
        }
    }

    pub fn add_incoming(&mut self, dst: &str, sources: impl IntoIterator<Item = String>) {
        let entry = self.incoming.entry(dst.to_string()).or_default();
        for source in sources {
            entry.insert(source.clone());
            self.outgoing
                .entry(source)
                .or_default()
                .insert(dst.to_string());
        }
    }

    /// Replace the outgoing edges of every name in `alternates` with its new
    /// declared dependencies, preserving existing incoming edges.
    ///
    /// An entry whose declared dependencies are not all present in the
    /// vertex set (after adding the entries' own names) is skipped and
    /// returned in the deferred list, to be retried once those
    /// dependencies become available.
    pub fn swap(&mut self, alternates: BTreeMap<String, BTreeSet<String>>) -> Vec<String> {
        let mut deferred = Vec::new();

        for (name, deps) in alternates {
            let satisfiable = deps.iter().all(|dep| self.vertices.contains(dep));
            if !satisfiable {
                deferred.push(name);
                continue;
            }

            self.vertices.insert(name.clone());

            // Remove the vertex's current outgoing edges (and their mirrored
            // incoming entries) but keep incoming edges pointed at it.
            if let Some(old_deps) = self.outgoing.remove(&name) {
                for dep in old_deps {
                    if let Some(in_set) = self.incoming.get_mut(&dep) {
                        in_set.remove(&name);
                    }
                }
            }

            for dep in &deps {
                self.vertices.insert(dep.clone());
                self.incoming.entry(dep.clone()).or_default().insert(name.clone());
            }
            self.outgoing.insert(name, deps);
        }

        deferred
    }

    /// Vertices with no outgoing edges.
    pub fn leaves(&self) -> BTreeSet<String> {
        self.vertices
            .iter()
            .filter(|v| self.outgoing.get(*v).map_or(true, |out| out.is_empty()))
            .cloned()
            .collect()
    }

    pub fn incoming(&self, v: &str) -> BTreeSet<String> {
        self.incoming.get(v).cloned().unwrap_or_default()
    }

    pub fn outgoing(&self, v: &str) -> BTreeSet<String> {
        self.outgoing.get(v).cloned().unwrap_or_default()
    }

    pub fn remove_vertices(&mut self, names: &BTreeSet<String>) {
        for name in names {
            self.vertices.remove(name);

            if let Some(deps) = self.outgoing.remove(name) {
                for dep in deps {
                    if let Some(in_set) = self.incoming.get_mut(&dep) {
                        in_set.remove(name);
                    }
                }
            }

            if let Some(sources) = self.incoming.remove(name) {
                for src in sources {
                    if let Some(out_set) = self.outgoing.get_mut(&src) {
                        out_set.remove(name);
                    }
                }
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vertices.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn vertices(&self) -> impl Iterator<Item = &str> {
        self.vertices.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn leaves_are_vertices_with_no_outgoing_edges() {
        let mut graph = DependencyGraph::new();
        graph.add_vertices(["a".into(), "b".into(), "c".into()]);
        graph.add_outgoing("a", ["b".into()]);
        graph.add_outgoing("b", ["c".into()]);

        assert_eq!(graph.leaves(), deps(&["c"]));
    }

    #[test]
    fn removing_leaves_uncovers_the_next_layer() {
        let mut graph = DependencyGraph::new();
        graph.add_vertices(["a".into(), "b".into(), "c".into()]);
        graph.add_outgoing("a", ["b".into()]);
        graph.add_outgoing("b", ["c".into()]);

        let leaves = graph.leaves();
        graph.remove_vertices(&leaves);
        assert_eq!(graph.leaves(), deps(&["b"]));
    }

    #[test]
    fn swap_preserves_incoming_edges() {
        let mut graph = DependencyGraph::new();
        graph.add_vertices(["a".into(), "b".into(), "c".into()]);
        graph.add_outgoing("a", ["b".into()]);
        graph.add_outgoing("b", ["c".into()]);

        let mut alternates = BTreeMap::new();
        alternates.insert("b".to_string(), deps(&["c"]));
        let deferred = graph.swap(alternates);

        assert!(deferred.is_empty());
        assert_eq!(graph.incoming("b"), deps(&["a"]));
        assert_eq!(graph.outgoing("b"), deps(&["c"]));
    }

    #[test]
    fn swap_defers_entries_with_unsatisfiable_dependencies() {
        let mut graph = DependencyGraph::new();
        graph.add_vertices(["a".into()]);

        let mut alternates = BTreeMap::new();
        alternates.insert("a".to_string(), deps(&["missing"]));
        let deferred = graph.swap(alternates);

        assert_eq!(deferred, vec!["a".to_string()]);
        assert!(graph.outgoing("a").is_empty());
    }
}
