//! Orchestrates ingestion: descriptor -> graph update -> leaf-first compile
//! -> publish -> cascading relink of dependents.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use archive_model::{Archive, OrderedSet};
use module_core::{AbsPathBuf, ModuleId, RevisionTag, SequenceCounter};

use tracing::{debug, warn};

use crate::dispatch::{CompilerDispatch, CompilerPluginFactory};
use crate::error::LoaderError;
use crate::events::{ListenerBus, Listener, LoaderEvent, ModuleRecord, RejectReason};
use crate::linkage::LinkageContext;
use crate::registry::{LinkageSpec, RevisionRegistry};
use crate::symbol::{EmptySymbolSource, SymbolSource};

/// The published view of a loaded linkage context.
#[derive(Clone)]
pub struct Module {
    pub module_id: ModuleId,
    pub revision: RevisionTag,
    pub linkage: Arc<LinkageContext>,
    pub creation_time_millis: i64,
    pub source_archive: Archive,
}

impl Module {
    fn to_record(&self) -> ModuleRecord {
        ModuleRecord {
            name: self.module_id.name().to_string(),
            revision: self.revision.clone(),
            linkage: self.linkage.clone(),
            creation_time_millis: self.creation_time_millis,
        }
    }
}

pub struct ModuleLoaderConfig {
    pub scratch_root: AbsPathBuf,
    pub system_edge: Arc<dyn SymbolSource>,
    pub host_runtime_edge: Arc<dyn SymbolSource>,
    pub default_app_packages: OrderedSet<String>,
}

impl Default for ModuleLoaderConfig {
    fn default() -> Self {
        Self {
            scratch_root: AbsPathBuf::new(std::env::temp_dir().join("module-loader-scratch"))
                .expect("std::env::temp_dir() is always absolute"),
            system_edge: Arc::new(EmptySymbolSource),
            host_runtime_edge: Arc::new(EmptySymbolSource),
            default_app_packages: OrderedSet::new(),
        }
    }
}

/// Single-threaded-cooperative-over-a-mutex orchestrator.
///
/// Every public mutating operation (`update`, `add_compiler_plugin`,
/// `remove_module`) holds `apply_lock` for its entire duration; readers
/// (`get`, `list_all`) never block on it.
pub struct ModuleLoader {
    apply_lock: Mutex<()>,
    registry: RevisionRegistry,
    loaded_modules: RwLock<BTreeMap<String, Module>>,
    compiler_dispatch: CompilerDispatch,
    listener_bus: ListenerBus,
    sequence: SequenceCounter,
    scratch_root: PathBuf,
}

impl ModuleLoader {
    pub fn new(config: ModuleLoaderConfig) -> Self {
        Self {
            apply_lock: Mutex::new(()),
            registry: RevisionRegistry::new(
                config.system_edge,
                config.host_runtime_edge,
                config.default_app_packages,
            ),
            loaded_modules: RwLock::new(BTreeMap::new()),
            compiler_dispatch: CompilerDispatch::new(),
            listener_bus: ListenerBus::new(),
            sequence: SequenceCounter::new(),
            scratch_root: config.scratch_root.into_path_buf(),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn Listener>) {
        self.listener_bus.add(listener);
    }

    /// Lock-free: reads the concurrent `loadedModules` map.
    pub fn get(&self, name: &str) -> Option<Module> {
        self.loaded_modules
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .cloned()
    }

    pub fn list_all(&self) -> Vec<Module> {
        self.loaded_modules
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Register a compiler plugin. The plugin's own archive is loaded and
    /// linked exactly like a user module (same dependency/filter
    /// discipline), but its `LinkageContext` is kept permanently rather
    /// than being subject to the normal update/remove cascade, and the
    /// compilers it produces are added to the shared dispatch table.
    pub fn add_compiler_plugin(
        &self,
        archive: Archive,
        factory: Arc<dyn CompilerPluginFactory>,
    ) -> Result<(), LoaderError> {
        let _guard = self.apply_lock.lock().unwrap_or_else(|p| p.into_inner());

        let sequence = self.sequence.next();
        let name = archive.module_id().name().to_string();
        let tag = RevisionTag::new(name.clone(), sequence);

        let declared_dependency_names = declared_dependency_names(&archive)?;
        let dependency_tags = self.resolve_dependency_tags(&declared_dependency_names)?;

        let scratch_dir = self.scratch_dir_for(&tag);
        recreate_dir(&scratch_dir)?;

        let spec = LinkageSpec {
            resource_roots: vec![archive.root().path().to_path_buf(), scratch_dir],
            declared_dependency_names,
            dependencies: dependency_tags,
            import_filter: archive.descriptor().module_import_filter.clone(),
            export_filter: archive.descriptor().module_export_filter.clone(),
            app_import_filter: archive.descriptor().app_import_filter.clone(),
        };
        self.registry.add_spec(tag.clone(), spec);
        let ctx = self.registry.load(&tag)?;

        for compiler in factory.create(&ctx) {
            self.compiler_dispatch.register(compiler);
        }

        Ok(())
    }

    fn resolve_dependency_tags(&self, names: &[String]) -> Result<Vec<RevisionTag>, LoaderError> {
        names
            .iter()
            .map(|name| {
                self.registry
                    .latest(name)
                    .ok_or_else(|| LoaderError::LinkageFailure(format!("unresolved dependency {name}")))
            })
            .collect()
    }

    fn scratch_dir_for(&self, tag: &RevisionTag) -> PathBuf {
        self.scratch_root.join(format!("{}@{}", tag.name(), tag.sequence()))
    }

    /// Ingest a batch of candidate archives: leaf-first compile, publish,
    /// and cascade relink of dependents.
    pub fn update(&self, candidates: Vec<Archive>) {
        let _guard = self.apply_lock.lock().unwrap_or_else(|p| p.into_inner());
        let sequence = self.sequence.next();
        debug!(candidate_count = candidates.len(), sequence, "applying archive batch");

        // Step 2: filter stale candidates.
        let mut pending: BTreeMap<String, Archive> = BTreeMap::new();
        for candidate in candidates {
            let name = candidate.module_id().name().to_string();
            let existing = self.get(&name);
            if let Some(existing) = &existing {
                if existing.creation_time_millis > candidate.creation_time_millis() {
                    warn!(module_name = %name, "candidate older than published revision; rejecting");
                    self.listener_bus.publish(LoaderEvent::ArchiveRejected {
                        module_name: name,
                        reason: RejectReason::HigherRevisionAvailable,
                        cause: None,
                    });
                    continue;
                }
            }
            pending.insert(name, candidate);
        }

        if pending.is_empty() {
            return;
        }

        // Step 3: provisional specs, overlaying the current latest map.
        let mut latest_prime = self.registry.latest_map();
        let mut candidate_deps: BTreeMap<String, std::collections::BTreeSet<String>> = BTreeMap::new();
        for (name, archive) in &pending {
            let deps = match declared_dependency_names(archive) {
                Ok(deps) => deps,
                Err(err) => {
                    self.listener_bus.publish(LoaderEvent::ArchiveRejected {
                        module_name: name.clone(),
                        reason: RejectReason::MalformedDescriptor,
                        cause: Some(err.to_string()),
                    });
                    continue;
                }
            };
            latest_prime.insert(name.clone(), RevisionTag::new(name.clone(), sequence));
            candidate_deps.insert(name.clone(), deps.into_iter().collect());
        }
        pending.retain(|name, _| candidate_deps.contains_key(name));

        // Step 4: candidate graph.
        let mut graph = self.registry.graph();
        graph.add_vertices(pending.keys().cloned());
        let deferred = graph.swap(candidate_deps);
        for name in deferred {
            pending.remove(&name);
        }

        // Step 5: leaf-first loop with cascading relink.
        let mut scheduled: std::collections::BTreeSet<String> = pending.keys().cloned().collect();

        while !graph.is_empty() {
            let leaves = graph.leaves();
            if leaves.is_empty() {
                break;
            }

            for leaf in &leaves {
                let Some(archive) = pending.remove(leaf) else {
                    continue;
                };

                self.compile_and_publish_leaf(leaf, archive, sequence, &mut latest_prime, &graph, &mut pending, &mut scheduled);
            }

            graph.remove_vertices(&leaves);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_and_publish_leaf(
        &self,
        name: &str,
        archive: Archive,
        sequence: i64,
        latest_prime: &mut BTreeMap<String, RevisionTag>,
        graph: &dependency_graph::DependencyGraph,
        pending: &mut BTreeMap<String, Archive>,
        scheduled: &mut std::collections::BTreeSet<String>,
    ) {
        let previous_tag = self.registry.latest(name);
        let new_tag = RevisionTag::new(name.to_string(), sequence);
        let scratch_dir = self.scratch_dir_for(&new_tag);

        if let Err(err) = recreate_dir(&scratch_dir) {
            self.listener_bus.publish(LoaderEvent::ArchiveRejected {
                module_name: name.to_string(),
                reason: RejectReason::ArchiveIoException,
                cause: Some(err.to_string()),
            });
            return;
        }

        let declared_dependency_names = match declared_dependency_names(&archive) {
            Ok(names) => names,
            Err(err) => {
                let _ = std::fs::remove_dir_all(&scratch_dir);
                self.listener_bus.publish(LoaderEvent::ArchiveRejected {
                    module_name: name.to_string(),
                    reason: RejectReason::MalformedDescriptor,
                    cause: Some(err.to_string()),
                });
                return;
            }
        };

        let dependencies: Result<Vec<RevisionTag>, LoaderError> = declared_dependency_names
            .iter()
            .map(|dep_name| {
                latest_prime
                    .get(dep_name)
                    .cloned()
                    .ok_or_else(|| LoaderError::LinkageFailure(format!("unresolved dependency {dep_name}")))
            })
            .collect();
        let dependencies = match dependencies {
            Ok(deps) => deps,
            Err(err) => {
                let _ = std::fs::remove_dir_all(&scratch_dir);
                self.listener_bus.publish(LoaderEvent::ArchiveRejected {
                    module_name: name.to_string(),
                    reason: RejectReason::LinkageFailure,
                    cause: Some(err.to_string()),
                });
                return;
            }
        };

        let spec = LinkageSpec {
            resource_roots: vec![archive.root().path().to_path_buf(), scratch_dir.clone()],
            declared_dependency_names,
            dependencies,
            import_filter: archive.descriptor().module_import_filter.clone(),
            export_filter: archive.descriptor().module_export_filter.clone(),
            app_import_filter: archive.descriptor().app_import_filter.clone(),
        };
        self.registry.add_spec(new_tag.clone(), spec);

        let ctx = match self.registry.load(&new_tag) {
            Ok(ctx) => ctx,
            Err(err) => {
                self.registry.unload(&new_tag);
                let _ = std::fs::remove_dir_all(&scratch_dir);
                self.listener_bus.publish(LoaderEvent::ArchiveRejected {
                    module_name: name.to_string(),
                    reason: RejectReason::LinkageFailure,
                    cause: Some(err.to_string()),
                });
                return;
            }
        };

        match self.compiler_dispatch.dispatch(&archive, &ctx, &scratch_dir) {
            Ok(_symbols) => {
                if let Err(err) = prime_local_cache_from_scratch(&ctx, &scratch_dir) {
                    self.registry.unload(&new_tag);
                    let _ = std::fs::remove_dir_all(&scratch_dir);
                    self.listener_bus.publish(LoaderEvent::ArchiveRejected {
                        module_name: name.to_string(),
                        reason: RejectReason::ArchiveIoException,
                        cause: Some(err.to_string()),
                    });
                    return;
                }

                if let Some(old_tag) = &previous_tag {
                    self.registry.unload(old_tag);
                    let _ = std::fs::remove_dir_all(self.scratch_dir_for(old_tag));
                }

                latest_prime.insert(name.to_string(), new_tag.clone());

                let module = Module {
                    module_id: archive.module_id().clone(),
                    revision: new_tag,
                    linkage: ctx,
                    creation_time_millis: archive.creation_time_millis(),
                    source_archive: archive,
                };

                let old_module = self
                    .loaded_modules
                    .write()
                    .unwrap_or_else(|p| p.into_inner())
                    .insert(name.to_string(), module.clone());

                debug!(module_name = name, sequence, "published module revision");
                self.listener_bus.publish(LoaderEvent::ModuleUpdated {
                    new: Some(module.to_record()),
                    old: old_module.map(|m| m.to_record()),
                });

                // Cascade: schedule dependents that aren't already part of
                // this batch, reusing their existing source archive.
                for dependent in graph.incoming(name) {
                    if scheduled.contains(&dependent) {
                        continue;
                    }
                    if let Some(existing) = self.get(&dependent) {
                        pending.insert(dependent.clone(), existing.source_archive);
                        scheduled.insert(dependent);
                    }
                }
            }
            Err(err) => {
                self.registry.unload(&new_tag);
                let _ = std::fs::remove_dir_all(&scratch_dir);
                let reason = match err {
                    LoaderError::NoCompiler => RejectReason::NoCompiler,
                    _ => RejectReason::CompileFailure,
                };
                warn!(module_name = name, error = %err, "archive rejected during compile");
                self.listener_bus.publish(LoaderEvent::ArchiveRejected {
                    module_name: name.to_string(),
                    reason,
                    cause: Some(err.to_string()),
                });
            }
        }
    }

    /// Unloads every revision of `name`, removes it from the published
    /// view, and emits `ModuleUpdated(None, oldLatest)`.
    pub fn remove_module(&self, name: &str) {
        let _guard = self.apply_lock.lock().unwrap_or_else(|p| p.into_inner());

        self.registry.unload_all(name);
        let old = self
            .loaded_modules
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(name);

        if let Some(old) = old {
            debug!(module_name = name, "removing module");
            let _ = std::fs::remove_dir_all(self.scratch_dir_for(&old.revision));
            self.listener_bus.publish(LoaderEvent::ModuleUpdated {
                new: None,
                old: Some(old.to_record()),
            });
        }
    }
}

fn declared_dependency_names(archive: &Archive) -> Result<Vec<String>, LoaderError> {
    archive
        .descriptor()
        .module_dependencies
        .iter()
        .map(|text| Ok(ModuleId::parse(text)?.name().to_string()))
        .collect()
}

fn recreate_dir(path: &std::path::Path) -> std::io::Result<()> {
    if path.exists() {
        std::fs::remove_dir_all(path)?;
    }
    std::fs::create_dir_all(path)
}

/// Walks `scratch_dir` for compiler-produced symbol files and primes the
/// context's local cache directly with each, bypassing the normal
/// resolution order — a revision's own freshly compiled outputs must never
/// be satisfied through a dependency or the host runtime.
fn prime_local_cache_from_scratch(ctx: &LinkageContext, scratch_dir: &std::path::Path) -> std::io::Result<()> {
    for relative in module_core::fs::collect_entries(scratch_dir)? {
        let bytes = std::fs::read(scratch_dir.join(&relative))?;
        let name = relative.replace('/', ".");
        ctx.prime_local(crate::symbol::Symbol::new(name, bytes));
    }
    Ok(())
}
