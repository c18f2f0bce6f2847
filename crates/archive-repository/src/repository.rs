//! A sharded, content-addressed archive store.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Mutex;

use archive_model::{Archive, DescriptorCodec, DEFAULT_DESCRIPTOR_ENTRY};
use module_core::ModuleId;
use sha1::{Digest, Sha1};

use crate::error::RepositoryError;

#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    pub module_id: String,
    pub module_name: String,
    pub module_version: String,
    pub last_update: i64,
}

#[derive(Debug, Clone)]
pub struct RepositorySummary {
    pub id: String,
    pub description: String,
    pub count: usize,
    pub max_updated: i64,
}

struct StoredArchive {
    module_id: ModuleId,
    last_update: i64,
    descriptor_bytes: Vec<u8>,
    entries: Vec<(String, Vec<u8>)>,
    content_hash: [u8; 20],
}

/// Listing operations (`summaries`, `update_times`) issue one scan per
/// shard and merge the results, amortizing load across many concurrent
/// pollers. `fetch` recomputes each archive's SHA-1 at read time and
/// silently omits anything whose bytes no longer match what was recorded
/// at insert.
pub struct ArchiveRepository {
    id: String,
    description: String,
    output_dir: PathBuf,
    fetch_batch_size: usize,
    shards: Vec<Mutex<BTreeMap<String, StoredArchive>>>,
}

impl ArchiveRepository {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        shard_count: usize,
        fetch_batch_size: usize,
    ) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            id: id.into(),
            description: description.into(),
            output_dir: output_dir.into(),
            fetch_batch_size: fetch_batch_size.max(1),
            shards: (0..shard_count).map(|_| Mutex::new(BTreeMap::new())).collect(),
        }
    }

    pub fn insert(&self, archive: &Archive) -> Result<(), RepositoryError> {
        let module_id = archive.module_id().clone();
        let key = module_id.format();
        let shard = self.shard_for(&key);

        let mut entries = Vec::new();
        for entry in archive.entries() {
            if let Some(mut reader) = archive.read_entry(entry)? {
                let mut bytes = Vec::new();
                reader.read_to_end(&mut bytes)?;
                entries.push((entry.to_string(), bytes));
            }
        }
        let descriptor_bytes = DescriptorCodec::format(archive.descriptor())?;
        let content_hash = archive.content_hash()?;

        let stored = StoredArchive {
            module_id,
            last_update: archive.creation_time_millis(),
            descriptor_bytes,
            entries,
            content_hash,
        };

        self.shards[shard]
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key, stored);
        Ok(())
    }

    pub fn delete(&self, module_id: &str) {
        let shard = self.shard_for(module_id);
        self.shards[shard]
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(module_id);
    }

    pub fn summaries(&self) -> Vec<ArchiveSummary> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let guard = shard.lock().unwrap_or_else(|p| p.into_inner());
            out.extend(guard.values().map(|stored| ArchiveSummary {
                module_id: stored.module_id.format(),
                module_name: stored.module_id.name().to_string(),
                module_version: stored.module_id.version().to_string(),
                last_update: stored.last_update,
            }));
        }
        out
    }

    pub fn update_times(&self) -> BTreeMap<String, i64> {
        let mut out = BTreeMap::new();
        for shard in &self.shards {
            let guard = shard.lock().unwrap_or_else(|p| p.into_inner());
            for (key, stored) in guard.iter() {
                out.insert(key.clone(), stored.last_update);
            }
        }
        out
    }

    /// Fetches and materializes the requested archives to disk, in
    /// `fetch_batch_size`-sized chunks.
    pub fn fetch(&self, ids: &BTreeSet<String>) -> Result<Vec<Archive>, RepositoryError> {
        let ordered: Vec<&String> = ids.iter().collect();
        let mut out = Vec::new();

        for chunk in ordered.chunks(self.fetch_batch_size) {
            for id in chunk {
                let shard = self.shard_for(id);
                let guard = self.shards[shard].lock().unwrap_or_else(|p| p.into_inner());
                let Some(stored) = guard.get(id.as_str()) else {
                    continue;
                };

                if hash_entries(&stored.entries) != stored.content_hash {
                    tracing::warn!(module_id = %id, "archive content hash mismatch on fetch; omitting");
                    continue;
                }

                out.push(self.materialize(stored)?);
            }
        }
        Ok(out)
    }

    pub fn summary(&self) -> RepositorySummary {
        let times = self.update_times();
        RepositorySummary {
            id: self.id.clone(),
            description: self.description.clone(),
            count: times.len(),
            max_updated: times.values().copied().max().unwrap_or(0),
        }
    }

    /// Reconstructs a directory-rooted archive under `output_dir`, named
    /// `moduleId-lastUpdate`, so the module loader can reopen it as an
    /// ordinary archive-file-rooted archive.
    ///
    /// Archives stored without an embedded descriptor entry (a synthesized
    /// descriptor, per the archive model's single-file/directory fallback)
    /// would otherwise reopen with an identity derived from the timestamped
    /// directory name instead of the original `moduleId`; write the stored
    /// descriptor back out whenever the entries don't already carry one.
    fn materialize(&self, stored: &StoredArchive) -> Result<Archive, RepositoryError> {
        let dir_name = format!("{}-{}", sanitize(&stored.module_id.format()), stored.last_update);
        let dir = self.output_dir.join(dir_name);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;

        for (relative, bytes) in &stored.entries {
            let path = dir.join(relative);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, bytes)?;
        }

        let has_descriptor_entry = stored.entries.iter().any(|(name, _)| name == DEFAULT_DESCRIPTOR_ENTRY);
        if !has_descriptor_entry {
            std::fs::write(dir.join(DEFAULT_DESCRIPTOR_ENTRY), &stored.descriptor_bytes)?;
        }

        Ok(Archive::open(&dir, Some(DEFAULT_DESCRIPTOR_ENTRY))?.with_creation_time(stored.last_update))
    }

    fn shard_for(&self, module_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        module_id.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    #[cfg(test)]
    pub(crate) fn corrupt_for_test(&self, module_id: &str) {
        let shard = self.shard_for(module_id);
        let mut guard = self.shards[shard].lock().unwrap();
        if let Some(stored) = guard.get_mut(module_id) {
            if let Some((_, bytes)) = stored.entries.first_mut() {
                bytes.push(0xFF);
            } else {
                stored.entries.push(("corrupt".to_string(), vec![0xFF]));
            }
        }
    }
}

fn hash_entries(entries: &[(String, Vec<u8>)]) -> [u8; 20] {
    let mut sorted: Vec<&(String, Vec<u8>)> = entries.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha1::new();
    for (name, bytes) in sorted {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(bytes);
    }
    hasher.finalize().into()
}

fn sanitize(module_id: &str) -> String {
    module_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
