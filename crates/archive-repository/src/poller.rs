//! Timer-driven repository polling: diffs update times against the last
//! observed snapshot and feeds new/changed archives and deletions into a
//! [`ModuleLoader`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use archive_model::Archive;
use module_loader::ModuleLoader;

/// A source of polling metadata and archive bytes. Implemented by
/// [`crate::ArchiveRepository`]; trait-ized so tests can poll a fake source
/// without standing up a real repository.
pub trait RepositorySource: Send + Sync {
    fn update_times(&self) -> BTreeMap<String, i64>;
    fn fetch(&self, ids: &BTreeSet<String>) -> Vec<Archive>;
}

impl RepositorySource for crate::ArchiveRepository {
    fn update_times(&self) -> BTreeMap<String, i64> {
        crate::ArchiveRepository::update_times(self)
    }

    fn fetch(&self, ids: &BTreeSet<String>) -> Vec<Archive> {
        match crate::ArchiveRepository::fetch(self, ids) {
            Ok(archives) => archives,
            Err(err) => {
                tracing::warn!(error = %err, "repository fetch failed; skipping this poll");
                Vec::new()
            }
        }
    }
}

struct Cancellation {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl Cancellation {
    fn new() -> Self {
        Self {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        }
    }

    fn cancel(&self) {
        *self.stopped.lock().unwrap() = true;
        self.wake.notify_all();
    }

    /// Waits up to `interval`, or until cancelled. Returns whether the wait
    /// ended because of cancellation.
    fn wait_or_cancelled(&self, interval: Duration) -> bool {
        let guard = self.stopped.lock().unwrap();
        let (guard, _timeout) = self
            .wake
            .wait_timeout_while(guard, interval, |stopped| !*stopped)
            .unwrap();
        *guard
    }
}

struct Registration {
    #[allow(dead_code)]
    name: String,
    cancellation: Arc<Cancellation>,
    thread: JoinHandle<()>,
}

/// Owns one polling thread per registered repository. Each thread polls on
/// a fixed interval, diffs `updateTimes()` against what it last saw, and
/// calls [`ModuleLoader::update`] / [`ModuleLoader::remove_module`]
/// accordingly.
pub struct RepositoryPoller {
    loader: Arc<ModuleLoader>,
    registrations: Mutex<Vec<Registration>>,
}

impl RepositoryPoller {
    pub fn new(loader: Arc<ModuleLoader>) -> Self {
        Self {
            loader,
            registrations: Mutex::new(Vec::new()),
        }
    }

    /// Starts polling `repo` on its own named thread. If
    /// `wait_for_initial_poll` is set, blocks until the first poll has run.
    pub fn add_repository(
        &self,
        name: impl Into<String>,
        repo: Arc<dyn RepositorySource>,
        interval: Duration,
        wait_for_initial_poll: bool,
    ) {
        let name = name.into();
        let cancellation = Arc::new(Cancellation::new());
        let (initial_tx, initial_rx) = mpsc::sync_channel::<()>(1);

        let loader = self.loader.clone();
        let thread_cancellation = cancellation.clone();
        let thread_name = format!("archive-repository-poller-{name}");
        let thread = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || poll_loop(loader, repo, interval, thread_cancellation, initial_tx))
            .expect("failed to spawn repository poller thread");

        if wait_for_initial_poll {
            let _ = initial_rx.recv();
        }

        self.registrations.lock().unwrap().push(Registration {
            name,
            cancellation,
            thread,
        });
    }

    /// Cancels every registered poller and waits for its thread to exit.
    pub fn shutdown(&self) {
        let mut registrations = self.registrations.lock().unwrap();
        for registration in registrations.iter() {
            registration.cancellation.cancel();
        }
        for registration in registrations.drain(..) {
            let _ = registration.thread.join();
        }
    }
}

impl Drop for RepositoryPoller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn poll_loop(
    loader: Arc<ModuleLoader>,
    repo: Arc<dyn RepositorySource>,
    interval: Duration,
    cancellation: Arc<Cancellation>,
    initial_tx: mpsc::SyncSender<()>,
) {
    let mut last_seen = BTreeMap::new();
    poll_once(&loader, &repo, &mut last_seen);
    let _ = initial_tx.send(());

    loop {
        if cancellation.wait_or_cancelled(interval) {
            return;
        }
        poll_once(&loader, &repo, &mut last_seen);
    }
}

fn poll_once(loader: &ModuleLoader, repo: &Arc<dyn RepositorySource>, last_seen: &mut BTreeMap<String, i64>) {
    let now = repo.update_times();

    let updated: BTreeSet<String> = now
        .iter()
        .filter(|(id, &time)| time > *last_seen.get(id.as_str()).unwrap_or(&0))
        .map(|(id, _)| id.clone())
        .collect();
    let deleted: Vec<String> = last_seen.keys().filter(|id| !now.contains_key(id.as_str())).cloned().collect();

    *last_seen = now;

    if !updated.is_empty() {
        loader.update(repo.fetch(&updated));
    }
    for id in deleted {
        loader.remove_module(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archive_model::DEFAULT_DESCRIPTOR_ENTRY;
    use module_core::AbsPathBuf;
    use module_loader::{Compiler, CompilerPluginFactory, LinkageContext, LoaderError, ModuleLoaderConfig};
    use std::sync::Mutex as StdMutex;

    /// Claims every archive and writes a trivial output symbol, so the
    /// poller tests can exercise an actual publish rather than always
    /// hitting `NoCompiler`.
    struct EchoCompiler;

    impl Compiler for EchoCompiler {
        fn should_compile(&self, _archive: &Archive) -> bool {
            true
        }

        fn compile(
            &self,
            archive: &Archive,
            _ctx: &LinkageContext,
            scratch_dir: &std::path::Path,
        ) -> Result<BTreeSet<String>, LoaderError> {
            let output = format!("{}.out", archive.module_id().name());
            std::fs::write(scratch_dir.join(&output), b"compiled").unwrap();
            Ok(BTreeSet::from([output]))
        }
    }

    struct EchoFactory;

    impl CompilerPluginFactory for EchoFactory {
        fn create(&self, _ctx: &LinkageContext) -> Vec<Arc<dyn Compiler>> {
            vec![Arc::new(EchoCompiler)]
        }
    }

    struct FakeSource {
        times: StdMutex<BTreeMap<String, i64>>,
        archives_dir: std::path::PathBuf,
    }

    impl FakeSource {
        fn new(archives_dir: std::path::PathBuf) -> Self {
            Self {
                times: StdMutex::new(BTreeMap::new()),
                archives_dir,
            }
        }

        fn set(&self, name: &str, time: i64) {
            self.times.lock().unwrap().insert(name.to_string(), time);
        }

        fn unset(&self, name: &str) {
            self.times.lock().unwrap().remove(name);
        }
    }

    impl RepositorySource for FakeSource {
        fn update_times(&self) -> BTreeMap<String, i64> {
            self.times.lock().unwrap().clone()
        }

        fn fetch(&self, ids: &BTreeSet<String>) -> Vec<Archive> {
            ids.iter()
                .filter_map(|id| {
                    let dir = self.archives_dir.join(id);
                    std::fs::create_dir_all(&dir).ok()?;
                    std::fs::write(
                        dir.join(DEFAULT_DESCRIPTOR_ENTRY),
                        format!(
                            r#"{{"moduleId": "{id}", "compilerPluginIds": [], "moduleDependencies": [], "archiveMetadata": {{}}}}"#
                        ),
                    )
                    .ok()?;
                    let time = *self.times.lock().unwrap().get(id)?;
                    Archive::open(&dir, None).ok().map(|a| a.with_creation_time(time))
                })
                .collect()
        }
    }

    fn loader() -> Arc<ModuleLoader> {
        let scratch = tempfile::tempdir().unwrap();
        let loader = ModuleLoader::new(ModuleLoaderConfig {
            scratch_root: AbsPathBuf::new(scratch.path().to_path_buf()).unwrap(),
            ..ModuleLoaderConfig::default()
        });

        let plugin_dir = scratch.path().join("echo-compiler-plugin");
        std::fs::create_dir_all(&plugin_dir).unwrap();
        let plugin_archive = Archive::open(&plugin_dir, None).unwrap();
        loader.add_compiler_plugin(plugin_archive, Arc::new(EchoFactory)).unwrap();

        Arc::new(loader)
    }

    #[test]
    fn initial_poll_publishes_existing_archives() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(dir.path().to_path_buf()));
        source.set("a", 1);

        let loader = loader();
        let poller = RepositoryPoller::new(loader.clone());
        poller.add_repository("test", source, Duration::from_millis(20), true);

        assert!(loader.get("a").is_some());
        poller.shutdown();
    }

    #[test]
    fn detects_deletion_on_a_later_tick() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(dir.path().to_path_buf()));
        source.set("a", 1);

        let loader = loader();
        let poller = RepositoryPoller::new(loader.clone());
        poller.add_repository("test", source.clone(), Duration::from_millis(20), true);
        assert!(loader.get("a").is_some());

        source.unset("a");
        std::thread::sleep(Duration::from_millis(80));
        assert!(loader.get("a").is_none());

        poller.shutdown();
    }
}
