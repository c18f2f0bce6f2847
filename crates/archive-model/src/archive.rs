//! The archive abstraction: an immutable code bundle rooted at either a
//! directory or a zip file, with its entries enumerated once on
//! construction.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use module_core::ModuleId;
use sha1::{Digest, Sha1};
use zip::ZipArchive;

use crate::descriptor::{ArchiveDescriptor, DescriptorCodec, DEFAULT_DESCRIPTOR_ENTRY};
use crate::error::ArchiveError;

#[derive(Debug, Clone)]
pub enum ArchiveRoot {
    Directory(PathBuf),
    ZipFile(PathBuf),
}

impl ArchiveRoot {
    pub fn path(&self) -> &Path {
        match self {
            ArchiveRoot::Directory(path) | ArchiveRoot::ZipFile(path) => path,
        }
    }
}

/// An immutable code bundle: a descriptor plus a fixed set of entries.
#[derive(Debug, Clone)]
pub struct Archive {
    descriptor: ArchiveDescriptor,
    root: ArchiveRoot,
    entries: BTreeSet<String>,
    creation_time_millis: i64,
}

impl Archive {
    /// Open an archive rooted at `root_path`, which may be a directory or a
    /// zip file. If `descriptor_entry` is not supplied, entries are
    /// searched for [`DEFAULT_DESCRIPTOR_ENTRY`]; if none is found, a
    /// descriptor is synthesized from the root's file name.
    pub fn open(root_path: &Path, descriptor_entry: Option<&str>) -> Result<Self, ArchiveError> {
        if !root_path.exists() {
            return Err(ArchiveError::RootNotFound(root_path.to_path_buf()));
        }

        let root = if root_path.is_dir() {
            ArchiveRoot::Directory(root_path.to_path_buf())
        } else {
            ArchiveRoot::ZipFile(root_path.to_path_buf())
        };

        let entries = enumerate_entries(&root)?;
        let descriptor_entry = descriptor_entry.unwrap_or(DEFAULT_DESCRIPTOR_ENTRY);

        let descriptor = if entries.contains(descriptor_entry) {
            let bytes = read_entry_bytes(&root, descriptor_entry)?
                .expect("entry presence was just checked against the enumerated set");
            DescriptorCodec::parse(&bytes)?
        } else {
            ArchiveDescriptor::synthesized(synthesize_module_id(root_path)?)
        };

        let creation_time_millis = root_modified_time_millis(root_path)?;

        Ok(Self {
            descriptor,
            root,
            entries,
            creation_time_millis,
        })
    }

    pub fn with_creation_time(mut self, creation_time_millis: i64) -> Self {
        self.creation_time_millis = creation_time_millis;
        self
    }

    pub fn descriptor(&self) -> &ArchiveDescriptor {
        &self.descriptor
    }

    pub fn module_id(&self) -> &ModuleId {
        &self.descriptor.module_id
    }

    pub fn root(&self) -> &ArchiveRoot {
        &self.root
    }

    pub fn creation_time_millis(&self) -> i64 {
        self.creation_time_millis
    }

    pub fn has_entry(&self, name: &str) -> bool {
        self.entries.contains(name)
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Read an entry's contents as a readable byte stream. Returns `None`
    /// if the entry does not exist.
    pub fn read_entry(&self, name: &str) -> Result<Option<Box<dyn Read>>, ArchiveError> {
        if !self.entries.contains(name) {
            return Ok(None);
        }
        let bytes = read_entry_bytes(&self.root, name)?;
        Ok(bytes.map(|b| Box::new(Cursor::new(b)) as Box<dyn Read>))
    }

    /// SHA-1 of the archive's canonical byte form: every entry's bytes,
    /// concatenated in sorted entry-path order, each entry prefixed with
    /// its path.
    pub fn content_hash(&self) -> Result<[u8; 20], ArchiveError> {
        let mut hasher = Sha1::new();
        for entry in &self.entries {
            hasher.update(entry.as_bytes());
            hasher.update([0u8]);
            if let Some(bytes) = read_entry_bytes(&self.root, entry)? {
                hasher.update(&bytes);
            }
        }
        Ok(hasher.finalize().into())
    }
}

fn enumerate_entries(root: &ArchiveRoot) -> Result<BTreeSet<String>, ArchiveError> {
    match root {
        ArchiveRoot::Directory(dir) => {
            let raw = module_core::fs::collect_entries(dir).map_err(|source| ArchiveError::Io {
                path: dir.clone(),
                source,
            })?;
            Ok(raw.into_iter().collect())
        }
        ArchiveRoot::ZipFile(path) => {
            let file = File::open(path).map_err(|source| ArchiveError::Io {
                path: path.clone(),
                source,
            })?;
            let zip = ZipArchive::new(file).map_err(|source| ArchiveError::Zip {
                path: path.clone(),
                source,
            })?;
            Ok(zip.file_names().map(str::to_string).collect())
        }
    }
}

fn read_entry_bytes(root: &ArchiveRoot, name: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
    match root {
        ArchiveRoot::Directory(dir) => {
            let candidate = dir.join(name);
            if !candidate.is_file() {
                return Ok(None);
            }
            let mut buf = Vec::new();
            File::open(&candidate)
                .and_then(|mut f| f.read_to_end(&mut buf))
                .map_err(|source| ArchiveError::Io {
                    path: candidate,
                    source,
                })?;
            Ok(Some(buf))
        }
        ArchiveRoot::ZipFile(path) => {
            let file = File::open(path).map_err(|source| ArchiveError::Io {
                path: path.clone(),
                source,
            })?;
            let mut zip = ZipArchive::new(file).map_err(|source| ArchiveError::Zip {
                path: path.clone(),
                source,
            })?;
            let result = match zip.by_name(name) {
                Ok(mut entry) => {
                    let mut buf = Vec::new();
                    entry
                        .read_to_end(&mut buf)
                        .map_err(|source| ArchiveError::Io {
                            path: path.clone(),
                            source,
                        })?;
                    Ok(Some(buf))
                }
                Err(zip::result::ZipError::FileNotFound) => Ok(None),
                Err(source) => Err(ArchiveError::Zip {
                    path: path.clone(),
                    source,
                }),
            };
            result
        }
    }
}

fn synthesize_module_id(root_path: &Path) -> Result<ModuleId, ArchiveError> {
    let file_name = root_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sanitized = file_name.replace('.', "_");
    Ok(ModuleId::new(sanitized, "")?)
}

fn root_modified_time_millis(root_path: &Path) -> Result<i64, ArchiveError> {
    let metadata = std::fs::metadata(root_path).map_err(|source| ArchiveError::Io {
        path: root_path.to_path_buf(),
        source,
    })?;
    let modified = metadata.modified().map_err(|source| ArchiveError::Io {
        path: root_path.to_path_buf(),
        source,
    })?;
    let millis = modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| SystemTime::UNIX_EPOCH.duration_since(UNIX_EPOCH).unwrap())
        .as_millis() as i64;
    Ok(millis)
}
