//! Pluggable compiler dispatch: selects every applicable compiler for an
//! archive and invokes them sequentially against a shared scratch
//! directory.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use archive_model::Archive;

use crate::error::LoaderError;
use crate::linkage::LinkageContext;

/// One pluggable, language-specific compiler.
pub trait Compiler: Send + Sync {
    fn should_compile(&self, archive: &Archive) -> bool;

    fn compile(
        &self,
        archive: &Archive,
        ctx: &LinkageContext,
        scratch_dir: &Path,
    ) -> Result<BTreeSet<String>, LoaderError>;
}

/// The entry point a compiler-plugin module exposes once its archive has
/// been loaded: given the plugin's own linkage context, produce the
/// compilers it implements.
pub trait CompilerPluginFactory: Send + Sync {
    fn create(&self, ctx: &LinkageContext) -> Vec<Arc<dyn Compiler>>;
}

/// Ordered registry of compiler plugins.
#[derive(Default)]
pub struct CompilerDispatch {
    compilers: Mutex<Vec<Arc<dyn Compiler>>>,
}

impl CompilerDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, compiler: Arc<dyn Compiler>) {
        self.compilers.lock().unwrap_or_else(|p| p.into_inner()).push(compiler);
    }

    /// Selects every compiler that claims `archive` and invokes each in
    /// registration order against the same `scratch_dir`. The union of
    /// produced symbol names becomes the module's loaded-symbols set.
    pub fn dispatch(
        &self,
        archive: &Archive,
        ctx: &LinkageContext,
        scratch_dir: &Path,
    ) -> Result<BTreeSet<String>, LoaderError> {
        let compilers = self.compilers.lock().unwrap_or_else(|p| p.into_inner()).clone();
        let applicable: Vec<_> = compilers
            .into_iter()
            .filter(|c| c.should_compile(archive))
            .collect();

        if applicable.is_empty() {
            return Err(LoaderError::NoCompiler);
        }

        let mut symbols = BTreeSet::new();
        for compiler in applicable {
            let produced = compiler.compile(archive, ctx, scratch_dir)?;
            symbols.extend(produced);
        }
        Ok(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AlwaysCompiler {
        produced: &'static str,
        invocations: Arc<AtomicUsize>,
    }

    impl Compiler for AlwaysCompiler {
        fn should_compile(&self, _archive: &Archive) -> bool {
            true
        }

        fn compile(
            &self,
            _archive: &Archive,
            _ctx: &LinkageContext,
            _scratch_dir: &Path,
        ) -> Result<BTreeSet<String>, LoaderError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(BTreeSet::from([self.produced.to_string()]))
        }
    }

    struct NeverCompiler;

    impl Compiler for NeverCompiler {
        fn should_compile(&self, _archive: &Archive) -> bool {
            false
        }

        fn compile(
            &self,
            _archive: &Archive,
            _ctx: &LinkageContext,
            _scratch_dir: &Path,
        ) -> Result<BTreeSet<String>, LoaderError> {
            unreachable!("never claims any archive")
        }
    }

    fn test_archive(dir: &std::path::Path) -> Archive {
        std::fs::create_dir_all(dir).unwrap();
        Archive::open(dir, None).unwrap()
    }

    #[test]
    fn no_applicable_compiler_is_no_compiler_error() {
        let dispatch = CompilerDispatch::new();
        dispatch.register(Arc::new(NeverCompiler));

        let dir = tempfile::tempdir().unwrap();
        let archive = test_archive(dir.path());
        let ctx = crate::linkage::LinkageContext::new(
            vec![],
            vec![],
            Arc::new(crate::symbol::EmptySymbolSource),
            Arc::new(crate::symbol::EmptySymbolSource),
            archive_model::OrderedSet::new(),
            archive_model::OrderedSet::new(),
            archive_model::OrderedSet::new(),
            archive_model::OrderedSet::new(),
        );
        let scratch = tempfile::tempdir().unwrap();
        assert!(matches!(
            dispatch.dispatch(&archive, &ctx, scratch.path()),
            Err(LoaderError::NoCompiler)
        ));
    }

    #[test]
    fn unions_symbols_from_every_applicable_compiler() {
        let dispatch = CompilerDispatch::new();
        let invocations = Arc::new(AtomicUsize::new(0));
        dispatch.register(Arc::new(AlwaysCompiler {
            produced: "a",
            invocations: invocations.clone(),
        }));
        dispatch.register(Arc::new(AlwaysCompiler {
            produced: "b",
            invocations,
        }));

        let dir = tempfile::tempdir().unwrap();
        let archive = test_archive(dir.path());
        let ctx = crate::linkage::LinkageContext::new(
            vec![],
            vec![],
            Arc::new(crate::symbol::EmptySymbolSource),
            Arc::new(crate::symbol::EmptySymbolSource),
            archive_model::OrderedSet::new(),
            archive_model::OrderedSet::new(),
            archive_model::OrderedSet::new(),
            archive_model::OrderedSet::new(),
        );
        let scratch = tempfile::tempdir().unwrap();
        let symbols = dispatch.dispatch(&archive, &ctx, scratch.path()).unwrap();
        assert_eq!(symbols, BTreeSet::from(["a".to_string(), "b".to_string()]));
    }
}
